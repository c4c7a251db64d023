pub use crate::builder::{GenotypeBuilder, GenotypeTable, Taxon};
pub use crate::codec::depth::{byte_to_depth, depth_to_byte, DEPTH_MISSING, DEPTH_MISSING_BYTE};
pub use crate::codec::diploid::{
    decode_diploid, decode_haplotype, diploid_from_iupac, encode_allele, pack, pack_unphased,
    UNKNOWN_ALLELE, UNKNOWN_DIPLOID,
};
pub use crate::codec::taxa_dist::{TaxaDist, TaxaDistCompressed};
pub use crate::error::{BuildError, CodecError};
pub use crate::formats::line_index::{IndexedReader, LineIndex};
pub use crate::matrix::{DepthMatrix, GenotypeMatrix};
pub use crate::order::MergedVariant;
pub use crate::position::{ChromTable, Chromosome, Position};
