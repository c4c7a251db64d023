pub mod depth;
pub mod diploid;
pub mod taxa_dist;
