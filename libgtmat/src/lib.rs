//! Columnar genotype matrix ingestion.
//!
//! Decodes HapMap, PLINK, and VCF variant-call text (plus a block-compressed,
//! line-indexed HapMap variant) into a taxon-major genotype matrix of diploid
//! bytes, with optional per-allele read depth, using a bounded worker pool
//! that preserves input-line order.

pub mod builder;
pub mod codec;
pub mod error;
pub mod formats;
pub mod matrix;
pub mod order;
pub mod position;
pub mod prelude;

pub use crate::builder::*;
pub use crate::error::*;
pub use crate::matrix::*;
pub use crate::position::*;
