//! Sparse per-tag taxon -> depth distributions.
//!
//! The expandable form records one taxon index per observed read and stays
//! list-backed during accumulation. The fixed form is a compressed buffer:
//! a small header, a delta-encoded taxon stream, and a depth stream, both
//! using saturating continuation bytes, the whole thing zstd-compressed.
//! Tags are seen in few taxa but depths can be large; the continuation byte
//! handles both extremes.

use crate::error::{BuildError, CodecError};

// Fixed so re-encoding an already-fixed distribution is bit-identical.
const ZSTD_LEVEL: i32 = 3;

const CONTINUATION: u8 = 0xFF;

/// Expandable taxon-depth distribution for one genomic tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxaDist {
    max_taxa: u32,
    // One entry per increment, in arrival order.
    observations: Vec<u32>,
}

impl TaxaDist {
    pub fn new(max_taxa: u32) -> TaxaDist {
        TaxaDist {
            max_taxa,
            observations: Vec::new(),
        }
    }

    pub fn max_taxa(&self) -> u32 {
        self.max_taxa
    }

    /// Record one read for a taxon.
    pub fn increment(&mut self, taxon: u32) -> Result<(), CodecError> {
        if taxon >= self.max_taxa {
            return Err(CodecError::IndexOutOfRange {
                index: taxon,
                max_taxa: self.max_taxa,
            });
        }
        self.observations.push(taxon);
        Ok(())
    }

    /// Total reads across all taxa.
    pub fn total_depth(&self) -> u64 {
        self.observations.len() as u64
    }

    /// Dense depths, replayed from the observation list. Cost is
    /// proportional to total depth plus the allocation.
    pub fn depths(&self) -> Vec<u32> {
        let mut depths = vec![0u32; self.max_taxa as usize];
        for &taxon in self.observations.iter() {
            depths[taxon as usize] += 1;
        }
        depths
    }

    pub fn num_taxa_with_depth(&self) -> usize {
        self.pairs().len()
    }

    /// Non-zero (taxon, depth) pairs sorted by taxon index.
    pub fn pairs(&self) -> Vec<(u32, u32)> {
        let mut sorted = self.observations.clone();
        sorted.sort_unstable();
        let mut pairs: Vec<(u32, u32)> = Vec::new();
        for taxon in sorted {
            match pairs.last_mut() {
                Some((t, d)) if *t == taxon => *d += 1,
                _ => pairs.push((taxon, 1)),
            }
        }
        pairs
    }

    /// Fold another distribution into this one. Both sides must agree on
    /// the taxa universe.
    pub fn merge(&mut self, other: &TaxaDist) -> Result<(), CodecError> {
        if other.max_taxa != self.max_taxa {
            return Err(CodecError::IndexOutOfRange {
                index: other.max_taxa,
                max_taxa: self.max_taxa,
            });
        }
        self.observations.extend_from_slice(&other.observations);
        Ok(())
    }

    /// Convert to the immutable compressed form. Lossless.
    pub fn compress(&self) -> TaxaDistCompressed {
        let pairs = self.pairs();

        let mut buf = Vec::with_capacity(8 + pairs.len() * 3);
        buf.extend_from_slice(&self.max_taxa.to_le_bytes());
        buf.extend_from_slice(&(pairs.len() as u32).to_le_bytes());

        let mut prev = 0u32;
        for &(taxon, _) in pairs.iter() {
            push_saturating(&mut buf, taxon - prev);
            prev = taxon;
        }
        for &(_, depth) in pairs.iter() {
            push_saturating(&mut buf, depth);
        }

        let compressed =
            zstd::stream::encode_all(&buf[..], ZSTD_LEVEL).expect("zstd encoding is infallible");
        TaxaDistCompressed { buf: compressed }
    }
}

/// Immutable compressed distribution, ready to persist or transmit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxaDistCompressed {
    buf: Vec<u8>,
}

impl TaxaDistCompressed {
    pub fn from_bytes(buf: Vec<u8>) -> TaxaDistCompressed {
        TaxaDistCompressed { buf }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Reconstruct the expandable form, for merging.
    pub fn decompress(&self) -> Result<TaxaDist, BuildError> {
        let raw = zstd::stream::decode_all(&self.buf[..]).map_err(|_| truncated())?;
        if raw.len() < 8 {
            return Err(truncated());
        }
        let max_taxa = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let count = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;

        let mut cursor = 8;
        let mut taxa = Vec::with_capacity(count);
        let mut taxon = 0u32;
        for _ in 0..count {
            taxon += read_saturating(&raw, &mut cursor)?;
            taxa.push(taxon);
        }

        let mut dist = TaxaDist::new(max_taxa);
        for taxon in taxa {
            let depth = read_saturating(&raw, &mut cursor)?;
            for _ in 0..depth {
                dist.observations.push(taxon);
            }
        }

        if cursor != raw.len() {
            return Err(truncated());
        }
        Ok(dist)
    }
}

fn truncated() -> BuildError {
    BuildError::Resource("taxa distribution buffer truncated or malformed".to_string())
}

/// Emit v as zero or more 0xFF continuation bytes followed by the remainder.
fn push_saturating(buf: &mut Vec<u8>, mut v: u32) {
    while v >= CONTINUATION as u32 {
        buf.push(CONTINUATION);
        v -= CONTINUATION as u32;
    }
    buf.push(v as u8);
}

fn read_saturating(buf: &[u8], cursor: &mut usize) -> Result<u32, BuildError> {
    let mut v = 0u32;
    loop {
        let byte = *buf.get(*cursor).ok_or_else(truncated)?;
        *cursor += 1;
        v += byte as u32;
        if byte != CONTINUATION {
            return Ok(v);
        }
    }
}
