//! HapMap text decoding: header and ##SAMPLE annotation parsing, genotype
//! code width detection, and batch decoding of data lines into site columns.

use std::sync::Arc;

use crate::codec::diploid::{diploid_from_iupac, encode_allele, pack};
use crate::error::{preview, BuildError};
use crate::formats::{field, strip_cr, tab_stops, utf8_field, DecodedBlock};
use crate::matrix::GenotypeBlock;
use crate::order::swap_adjacent_if_disordered;
use crate::position::{ChromTable, Position};

/// Leading non-genotype columns: rs#, alleles, chrom, pos, strand,
/// assembly#, center, protLSID, assayLSID, panelLSID, QCcode.
pub const HAPMAP_FIXED_COLUMNS: usize = 11;

/// Immutable per-file decoding state shared by every worker.
#[derive(Debug)]
pub struct HapMapContext {
    pub file: String,
    pub taxa: usize,
    pub two_char: bool,
    pub chrom_table: Arc<ChromTable>,
}

/// Parse one `##SAMPLE=<ID=name,key=value,...>` annotation line. Returns
/// the sample name and its key-value pairs, or None if the line is some
/// other `##` comment.
pub fn parse_sample_annotation(line: &[u8]) -> Option<(String, Vec<(String, String)>)> {
    let line = strip_cr(line);
    let body = line
        .strip_prefix(b"##SAMPLE=<")
        .and_then(|rest| rest.strip_suffix(b">"))?;
    let body = std::str::from_utf8(body).ok()?;

    let mut id = None;
    let mut pairs = Vec::new();
    for entry in body.split(',') {
        let (key, value) = entry.split_once('=')?;
        if key == "ID" {
            id = Some(value.to_string());
        } else {
            pairs.push((key.to_string(), value.to_string()));
        }
    }
    Some((id?, pairs))
}

/// Parse the taxa header row and return the taxon names in column order.
pub fn parse_header_row(line: &[u8], file: &str, line_no: u64) -> Result<Vec<String>, BuildError> {
    let line = strip_cr(line);
    let stops = tab_stops(line);
    let fields = stops.len() + 1;
    if fields < HAPMAP_FIXED_COLUMNS {
        return Err(BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: format!(
                "header row has {} columns, expected at least {}: {}",
                fields,
                HAPMAP_FIXED_COLUMNS,
                preview(line)
            ),
        });
    }

    let mut names = Vec::with_capacity(fields - HAPMAP_FIXED_COLUMNS);
    for f in HAPMAP_FIXED_COLUMNS..fields {
        names.push(utf8_field(field(line, &stops, f), file, line_no)?.to_string());
    }
    Ok(names)
}

/// Sniff whether the file uses one- or two-character genotype codes from the
/// first data line: with a trailing tab imputed, uniform 1-char fields
/// average two bytes per taxon and 2-char fields average three.
pub fn detect_code_width(
    line: &[u8],
    taxa: usize,
    file: &str,
    line_no: u64,
) -> Result<bool, BuildError> {
    let line = strip_cr(line);
    let stops = tab_stops(line);
    if taxa == 0 || stops.len() < HAPMAP_FIXED_COLUMNS {
        return Err(BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: format!("first data line has no genotype payload: {}", preview(line)),
        });
    }

    let payload = line.len() - (stops[HAPMAP_FIXED_COLUMNS - 1] + 1);
    let avg = (payload + 1) as f64 / taxa as f64;
    if (avg - 2.0).abs() < 0.5 {
        Ok(false)
    } else if (avg - 3.0).abs() < 0.5 {
        Ok(true)
    } else {
        Err(BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: format!(
                "cannot determine genotype code width ({:.2} bytes per taxon): {}",
                avg,
                preview(line)
            ),
        })
    }
}

/// Decode one batch of data lines into a position list and a site-column
/// block, repairing adjacent coordinate ties as columns are appended.
pub fn decode_block(
    ctx: &HapMapContext,
    lines: &[Vec<u8>],
    first_line_no: u64,
) -> Result<DecodedBlock, BuildError> {
    let mut positions: Vec<Position> = Vec::with_capacity(lines.len());
    let mut genotypes = GenotypeBlock::new(ctx.taxa);
    let mut last_site: Option<String> = None;

    for (i, raw) in lines.iter().enumerate() {
        let line_no = first_line_no + i as u64;
        let line = strip_cr(raw);
        if line.is_empty() {
            continue;
        }

        let stops = tab_stops(line);
        let fields = stops.len() + 1;
        let name = if fields > 1 {
            utf8_field(field(line, &stops, 0), &ctx.file, line_no)?
        } else {
            ""
        };
        let site_context = if name.is_empty() {
            last_site.as_deref()
        } else {
            Some(name)
        };

        if fields != HAPMAP_FIXED_COLUMNS + ctx.taxa {
            return Err(BuildError::format_at(
                &ctx.file,
                line_no,
                site_context,
                format!(
                    "expected {} fields for {} taxa, found {}: {}",
                    HAPMAP_FIXED_COLUMNS + ctx.taxa,
                    ctx.taxa,
                    fields,
                    preview(line)
                ),
            ));
        }

        let chrom_name = utf8_field(field(line, &stops, 2), &ctx.file, line_no)?;
        let pos_text = utf8_field(field(line, &stops, 3), &ctx.file, line_no)?;
        let pos: u64 = pos_text.parse().map_err(|_| {
            BuildError::format_at(
                &ctx.file,
                line_no,
                site_context,
                format!("unparseable position '{}'", pos_text),
            )
        })?;

        let mut position =
            Position::new(ctx.chrom_table.intern(chrom_name), pos).with_name(name);
        let alleles = field(line, &stops, 1);
        if alleles.len() == 3 && alleles[1] == b'/' {
            position.ref_allele = Some(alleles[0].to_ascii_uppercase());
            position.alt_allele = Some(alleles[2].to_ascii_uppercase());
        }

        let mut column = Vec::with_capacity(ctx.taxa);
        for t in 0..ctx.taxa {
            let code = field(line, &stops, HAPMAP_FIXED_COLUMNS + t);
            let diploid = decode_code(ctx, code).map_err(|message| {
                BuildError::format_at(&ctx.file, line_no, site_context, message)
            })?;
            column.push(diploid);
        }

        positions.push(position);
        genotypes.push_site(column);
        let at = positions.len() - 1;
        swap_adjacent_if_disordered(&mut positions, &mut genotypes, None, at);

        last_site = Some(name.to_string());
    }

    Ok(DecodedBlock {
        positions,
        genotypes,
        depth: None,
    })
}

fn decode_code(ctx: &HapMapContext, code: &[u8]) -> Result<u8, String> {
    if ctx.two_char {
        match code {
            [a, b] => match (encode_allele(*a), encode_allele(*b)) {
                (Ok(a), Ok(b)) => Ok(pack(a, b)),
                (Err(e), _) | (_, Err(e)) => Err(format!("{}", e)),
            },
            _ => Err(format!(
                "genotype code '{}' is not two characters",
                String::from_utf8_lossy(code)
            )),
        }
    } else {
        match code {
            [symbol] => diploid_from_iupac(*symbol).map_err(|e| format!("{}", e)),
            _ => Err(format!(
                "genotype code '{}' is not one character",
                String::from_utf8_lossy(code)
            )),
        }
    }
}
