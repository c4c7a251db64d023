//! PLINK .map/.ped decoding. The .map file supplies the position list; .ped
//! lines are taxon-major, so they decode straight into matrix rows.

use bytelines::ByteLinesReader;
use std::io::BufRead;

use crate::codec::diploid::{encode_allele, pack};
use crate::error::{preview, BuildError};
use crate::formats::{strip_cr, utf8_field, RowBlock};
use crate::position::{ChromTable, Position};

/// Leading .ped columns: family, individual, paternal, maternal, sex,
/// phenotype.
pub const PED_FIXED_COLUMNS: usize = 6;

/// Immutable per-file decoding state shared by every worker.
#[derive(Debug)]
pub struct PedContext {
    pub file: String,
    pub sites: usize,
}

/// Whitespace-delimited fields, located by direct byte scan. PLINK files
/// mix tabs and spaces freely.
pub(crate) fn ws_fields(line: &[u8]) -> Vec<(usize, usize)> {
    let mut fields = Vec::new();
    let mut start = None;
    for (i, &b) in line.iter().enumerate() {
        match (b == b' ' || b == b'\t', start) {
            (false, None) => start = Some(i),
            (true, Some(s)) => {
                fields.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        fields.push((s, line.len()));
    }
    fields
}

/// Read a whole .map file into a position list. Columns are chromosome,
/// site name, genetic distance (ignored), physical position.
pub fn parse_map<R: BufRead>(
    reader: R,
    file: &str,
    chrom_table: &ChromTable,
) -> Result<Vec<Position>, BuildError> {
    let mut positions = Vec::new();
    let mut lines = reader.byte_lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next() {
        line_no += 1;
        let line = line?;
        let line = strip_cr(line);
        if line.is_empty() {
            continue;
        }

        let fields = ws_fields(line);
        if fields.len() != 4 {
            return Err(BuildError::Format {
                file: file.to_string(),
                line: line_no,
                message: format!(
                    "expected 4 columns, found {}: {}",
                    fields.len(),
                    preview(line)
                ),
            });
        }

        let chrom = utf8_field(&line[fields[0].0..fields[0].1], file, line_no)?;
        let name = utf8_field(&line[fields[1].0..fields[1].1], file, line_no)?;
        let pos_text = utf8_field(&line[fields[3].0..fields[3].1], file, line_no)?;
        let pos: u64 = pos_text.parse().map_err(|_| BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: format!("unparseable position '{}'", pos_text),
        })?;

        positions.push(Position::new(chrom_table.intern(chrom), pos).with_name(name));
    }
    Ok(positions)
}

/// Decode one batch of .ped lines into taxon names and matrix rows. Each
/// site occupies a fixed four-character cell in the genotype region, with
/// the two allele symbols at offsets 0 and 2.
pub fn decode_ped_lines(
    ctx: &PedContext,
    lines: &[Vec<u8>],
    first_line_no: u64,
) -> Result<RowBlock, BuildError> {
    let mut names = Vec::with_capacity(lines.len());
    let mut rows = Vec::with_capacity(lines.len());

    for (i, raw) in lines.iter().enumerate() {
        let line_no = first_line_no + i as u64;
        let line = strip_cr(raw);
        if line.is_empty() {
            continue;
        }

        let fields = ws_fields(line);
        if fields.len() < PED_FIXED_COLUMNS + 1 {
            return Err(BuildError::Format {
                file: ctx.file.to_string(),
                line: line_no,
                message: format!(
                    "expected {} leading columns plus genotypes: {}",
                    PED_FIXED_COLUMNS,
                    preview(line)
                ),
            });
        }

        let name = utf8_field(&line[fields[1].0..fields[1].1], &ctx.file, line_no)?;
        let region = &line[fields[PED_FIXED_COLUMNS].0..];
        let expected = ctx.sites * 4;
        if region.len() + 1 != expected && region.len() != expected {
            return Err(BuildError::Format {
                file: ctx.file.to_string(),
                line: line_no,
                message: format!(
                    "genotype region is {} bytes, expected {} for {} sites",
                    region.len(),
                    expected - 1,
                    ctx.sites
                ),
            });
        }

        let mut row = Vec::with_capacity(ctx.sites);
        for site in 0..ctx.sites {
            let a = region[site * 4];
            let b = region[site * 4 + 2];
            match (encode_allele(a), encode_allele(b)) {
                (Ok(a), Ok(b)) => row.push(pack(a, b)),
                (Err(e), _) | (_, Err(e)) => {
                    return Err(BuildError::Codec {
                        file: ctx.file.to_string(),
                        line: line_no,
                        source: e,
                    })
                }
            }
        }

        names.push(name.to_string());
        rows.push(row);
    }

    Ok(RowBlock { names, rows })
}
