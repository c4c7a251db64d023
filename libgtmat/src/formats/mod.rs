//! Per-format block decoders sharing one contract: a batch of raw lines in,
//! a position list plus a column-block of diploid bytes (and, for VCF, a
//! depth block) out.

pub mod hapmap;
pub mod line_index;
pub mod plink;
pub mod vcf;

use crate::error::BuildError;
use crate::matrix::{DepthBlock, GenotypeBlock};
use crate::position::Position;

/// Output of one decoded batch, in input-line order.
#[derive(Debug)]
pub struct DecodedBlock {
    pub positions: Vec<Position>,
    pub genotypes: GenotypeBlock,
    pub depth: Option<DepthBlock>,
}

/// Decoded PLINK .ped rows: one taxon per input line.
#[derive(Debug)]
pub struct RowBlock {
    pub names: Vec<String>,
    pub rows: Vec<Vec<u8>>,
}

/// Tab boundaries located by direct byte scan, not generic splitting.
pub(crate) fn tab_stops(line: &[u8]) -> Vec<usize> {
    let mut stops = Vec::with_capacity(32);
    for (i, &b) in line.iter().enumerate() {
        if b == b'\t' {
            stops.push(i);
        }
    }
    stops
}

/// Slice field f out of a line given its tab stops. Field 0 runs from the
/// start; the last field runs to the end of the line.
pub(crate) fn field<'a>(line: &'a [u8], stops: &[usize], f: usize) -> &'a [u8] {
    let start = if f == 0 { 0 } else { stops[f - 1] + 1 };
    let end = if f < stops.len() { stops[f] } else { line.len() };
    &line[start..end]
}

/// Strip a trailing carriage return left by CRLF input.
pub(crate) fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

pub(crate) fn utf8_field<'a>(
    raw: &'a [u8],
    file: &str,
    line_no: u64,
) -> Result<&'a str, BuildError> {
    simdutf8::basic::from_utf8(raw).map_err(|_| BuildError::Format {
        file: file.to_string(),
        line: line_no,
        message: "field is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_tab_stops_and_fields() {
        let line = b"rs1\tA/T\t1\t100";
        let stops = tab_stops(line);
        assert!(stops == vec![3, 7, 9]);
        assert!(field(line, &stops, 0) == b"rs1");
        assert!(field(line, &stops, 1) == b"A/T");
        assert!(field(line, &stops, 3) == b"100");
    }

    #[test]
    pub fn test_strip_cr() {
        assert!(strip_cr(b"abc\r") == b"abc");
        assert!(strip_cr(b"abc") == b"abc");
    }
}
