//! VCF decoding: header column discovery, genotype/AD parsing, and the
//! expansion of multi-base alleles into per-character sites with insertion
//! sub-positions.

use std::sync::Arc;

use crate::codec::depth::{depth_to_byte, DEPTH_MISSING, DEPTH_MISSING_BYTE};
use crate::codec::diploid::{encode_allele, pack, UNKNOWN_ALLELE};
use crate::error::{preview, BuildError};
use crate::formats::{field, strip_cr, tab_stops, utf8_field, DecodedBlock};
use crate::matrix::{DepthBlock, GenotypeBlock};
use crate::position::{ChromTable, Position};

/// CHROM through INFO.
const VCF_FIXED_COLUMNS: usize = 8;
const FORMAT_COLUMN: usize = 8;

/// Immutable per-file decoding state shared by every worker.
#[derive(Debug)]
pub struct VcfContext {
    pub file: String,
    pub taxa: usize,
    pub keep_depth: bool,
    pub chrom_table: Arc<ChromTable>,
}

/// Parse the `#CHROM` header line and return the taxon names in column
/// order. Columns are located by name, not assumed by index.
pub fn parse_header(line: &[u8], file: &str, line_no: u64) -> Result<Vec<String>, BuildError> {
    let line = strip_cr(line);
    let stops = tab_stops(line);
    let fields = stops.len() + 1;
    if !line.starts_with(b"#CHROM") || fields < VCF_FIXED_COLUMNS {
        return Err(BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: format!("malformed #CHROM header: {}", preview(line)),
        });
    }

    if fields == VCF_FIXED_COLUMNS {
        return Ok(Vec::new());
    }
    if field(line, &stops, FORMAT_COLUMN) != b"FORMAT" {
        return Err(BuildError::Format {
            file: file.to_string(),
            line: line_no,
            message: "FORMAT column absent while sample columns are present".to_string(),
        });
    }

    let mut names = Vec::with_capacity(fields - FORMAT_COLUMN - 1);
    for f in FORMAT_COLUMN + 1..fields {
        names.push(utf8_field(field(line, &stops, f), file, line_no)?.to_string());
    }
    Ok(names)
}

/// One taxon's parsed call before site expansion.
struct TaxonCall {
    // Indices into the record's allele list; None is an uncalled haplotype.
    a: Option<usize>,
    b: Option<usize>,
    depths: (i8, i8),
}

/// Decode one batch of VCF records, expanding each into one site per
/// allele character. Insertion characters past the reference length become
/// sub-positions at the anchor coordinate.
pub fn decode_block(
    ctx: &VcfContext,
    lines: &[Vec<u8>],
    first_line_no: u64,
) -> Result<DecodedBlock, BuildError> {
    let mut positions = Vec::with_capacity(lines.len());
    let mut genotypes = GenotypeBlock::new(ctx.taxa);
    let mut depth = if ctx.keep_depth {
        Some(DepthBlock::new(ctx.taxa))
    } else {
        None
    };
    let mut last_site: Option<String> = None;

    for (i, raw) in lines.iter().enumerate() {
        let line_no = first_line_no + i as u64;
        let line = strip_cr(raw);
        if line.is_empty() {
            continue;
        }

        let stops = tab_stops(line);
        let fields = stops.len() + 1;
        let expected = VCF_FIXED_COLUMNS + if ctx.taxa > 0 { 1 + ctx.taxa } else { 0 };
        let id = if fields > 3 {
            utf8_field(field(line, &stops, 2), &ctx.file, line_no)?
        } else {
            ""
        };
        let site_context = if id.is_empty() || id == "." {
            last_site.as_deref()
        } else {
            Some(id)
        };

        if fields != expected {
            return Err(BuildError::format_at(
                &ctx.file,
                line_no,
                site_context,
                format!(
                    "expected {} fields for {} samples, found {}: {}",
                    expected,
                    ctx.taxa,
                    fields,
                    preview(line)
                ),
            ));
        }

        let chrom = utf8_field(field(line, &stops, 0), &ctx.file, line_no)?;
        let pos_text = utf8_field(field(line, &stops, 1), &ctx.file, line_no)?;
        let pos: u64 = pos_text.parse().map_err(|_| {
            BuildError::format_at(
                &ctx.file,
                line_no,
                site_context,
                format!("unparseable position '{}'", pos_text),
            )
        })?;
        let qual = match field(line, &stops, 5) {
            b"." => None,
            raw => utf8_field(raw, &ctx.file, line_no)?.parse::<f32>().ok(),
        };

        // Allele list: REF first, then each comma-separated ALT.
        let mut alleles: Vec<Vec<u8>> = Vec::new();
        let ref_field = field(line, &stops, 3);
        let ref_len = if ref_field == b"." { 0 } else { ref_field.len() };
        alleles.push(if ref_field == b"." {
            Vec::new()
        } else {
            ref_field.to_ascii_uppercase()
        });
        let alt_field = field(line, &stops, 4);
        if alt_field != b"." {
            for alt in alt_field.split(|&b| b == b',') {
                alleles.push(alt.to_ascii_uppercase());
            }
        }
        let width = alleles.iter().map(|a| a.len()).max().unwrap_or(0);
        if width == 0 {
            return Err(BuildError::format_at(
                &ctx.file,
                line_no,
                site_context,
                "record has no allele characters",
            ));
        }

        let ad_index = if ctx.taxa > 0 {
            parse_format(field(line, &stops, FORMAT_COLUMN), ctx, line_no, site_context)?
        } else {
            None
        };

        let mut calls = Vec::with_capacity(ctx.taxa);
        for t in 0..ctx.taxa {
            let sample = field(line, &stops, FORMAT_COLUMN + 1 + t);
            calls.push(parse_call(
                ctx,
                sample,
                alleles.len(),
                ad_index,
                line_no,
                site_context,
            )?);
        }

        let chrom = ctx.chrom_table.intern(chrom);
        for c in 0..width {
            let mut position = if c < ref_len {
                let mut p = Position::new(Arc::clone(&chrom), pos + c as u64);
                p.ref_allele = Some(ref_field[c].to_ascii_uppercase());
                p
            } else {
                let anchor = pos + ref_len.saturating_sub(1) as u64;
                let mut p = Position::new(Arc::clone(&chrom), anchor)
                    .with_insert_offset((c - ref_len + 1) as u16);
                p.ref_allele = Some(b'+');
                p
            };
            if c == 0 && !id.is_empty() && id != "." {
                position.name = Some(id.to_string());
            }
            position.quality = qual;
            if alleles.len() > 1 {
                position.alt_allele = Some(if c < alleles[1].len() {
                    alleles[1][c]
                } else {
                    b'-'
                });
            }

            let mut column = Vec::with_capacity(ctx.taxa);
            let mut depth_column = Vec::with_capacity(ctx.taxa * 2);
            for call in calls.iter() {
                let a = allele_char_code(&alleles, call.a, c);
                let b = allele_char_code(&alleles, call.b, c);
                match (a, b) {
                    (Ok(a), Ok(b)) => column.push(pack(a, b)),
                    (Err(e), _) | (_, Err(e)) => {
                        return Err(BuildError::Codec {
                            file: ctx.file.to_string(),
                            line: line_no,
                            source: e,
                        })
                    }
                }
                depth_column.push(call.depths.0);
                depth_column.push(call.depths.1);
            }

            positions.push(position);
            genotypes.push_site(column);
            if let Some(depth) = depth.as_mut() {
                depth.push_site(depth_column);
            }
        }

        if !id.is_empty() && id != "." {
            last_site = Some(id.to_string());
        }
    }

    Ok(DecodedBlock {
        positions,
        genotypes,
        depth,
    })
}

/// The genotype sub-field is always first; AD is located by name when depth
/// capture is on.
fn parse_format(
    format: &[u8],
    ctx: &VcfContext,
    line_no: u64,
    site: Option<&str>,
) -> Result<Option<usize>, BuildError> {
    let mut ad_index = None;
    for (i, sub) in format.split(|&b| b == b':').enumerate() {
        if i == 0 && sub != b"GT" {
            return Err(BuildError::format_at(
                &ctx.file,
                line_no,
                site,
                format!(
                    "FORMAT does not begin with GT: {}",
                    String::from_utf8_lossy(format)
                ),
            ));
        }
        if sub == b"AD" {
            ad_index = Some(i);
        }
    }
    Ok(if ctx.keep_depth { ad_index } else { None })
}

fn parse_call(
    ctx: &VcfContext,
    sample: &[u8],
    num_alleles: usize,
    ad_index: Option<usize>,
    line_no: u64,
    site: Option<&str>,
) -> Result<TaxonCall, BuildError> {
    let mut subs = sample.split(|&b| b == b':');
    let gt = subs.next().unwrap_or(b"");

    // A payload opening with '.' is wholly uncalled, even when the other
    // haplotype carries an index (a half-call like "./1"). No AD either.
    if gt.first() == Some(&b'.') {
        return Ok(TaxonCall {
            a: None,
            b: None,
            depths: (DEPTH_MISSING_BYTE, DEPTH_MISSING_BYTE),
        });
    }

    let mut indices = [None, None];
    let mut n = 0;
    for token in gt.split(|&b| b == b'/' || b == b'|') {
        if n == 2 {
            return Err(BuildError::format_at(
                &ctx.file,
                line_no,
                site,
                format!(
                    "genotype '{}' has more than two alleles",
                    String::from_utf8_lossy(gt)
                ),
            ));
        }
        indices[n] = parse_allele_index(token, num_alleles).map_err(|message| {
            BuildError::format_at(&ctx.file, line_no, site, message)
        })?;
        n += 1;
    }
    // A haploid call counts for both haplotypes.
    if n == 1 {
        indices[1] = indices[0];
    }
    let (a, b) = (indices[0], indices[1]);

    let mut depths = (DEPTH_MISSING_BYTE, DEPTH_MISSING_BYTE);
    if let Some(ad_index) = ad_index {
        if let Some(ad) = sample.split(|&b| b == b':').nth(ad_index) {
            let per_allele: Vec<i32> = ad
                .split(|&b| b == b',')
                .map(|v| {
                    std::str::from_utf8(v)
                        .ok()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEPTH_MISSING)
                })
                .collect();
            depths = (
                encode_call_depth(ctx, &per_allele, a, line_no)?,
                encode_call_depth(ctx, &per_allele, b, line_no)?,
            );
        }
    }

    Ok(TaxonCall { a, b, depths })
}

fn parse_allele_index(token: &[u8], num_alleles: usize) -> Result<Option<usize>, String> {
    if token == b"." {
        return Ok(None);
    }
    let index: usize = std::str::from_utf8(token)
        .ok()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| {
            format!(
                "unparseable allele index '{}'",
                String::from_utf8_lossy(token)
            )
        })?;
    if index >= num_alleles {
        return Err(format!(
            "allele index {} out of range ({} alleles)",
            index, num_alleles
        ));
    }
    Ok(Some(index))
}

fn encode_call_depth(
    ctx: &VcfContext,
    per_allele: &[i32],
    index: Option<usize>,
    line_no: u64,
) -> Result<i8, BuildError> {
    let depth = index
        .and_then(|i| per_allele.get(i).copied())
        .unwrap_or(DEPTH_MISSING);
    depth_to_byte(depth).map_err(|source| BuildError::Codec {
        file: ctx.file.to_string(),
        line: line_no,
        source,
    })
}

/// Character of an allele at expansion column c: past the allele's own
/// length is a gap, an uncalled haplotype is unknown.
fn allele_char_code(
    alleles: &[Vec<u8>],
    index: Option<usize>,
    c: usize,
) -> Result<u8, crate::error::CodecError> {
    match index {
        None => Ok(UNKNOWN_ALLELE),
        Some(i) => match alleles[i].get(c) {
            Some(&symbol) => encode_allele(symbol),
            None => encode_allele(b'-'),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::depth::byte_to_depth;
    use crate::codec::diploid::{
        pack, A_ALLELE, GAP_ALLELE, G_ALLELE, T_ALLELE, UNKNOWN_DIPLOID,
    };

    fn ctx(taxa: usize, keep_depth: bool) -> VcfContext {
        VcfContext {
            file: "test.vcf".to_string(),
            taxa,
            keep_depth,
            chrom_table: Arc::new(ChromTable::new()),
        }
    }

    fn line(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[test]
    pub fn test_header_taxa() {
        let names = parse_header(
            b"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tTx1\tTx2",
            "test.vcf",
            5,
        )
        .unwrap();
        assert!(names == vec!["Tx1".to_string(), "Tx2".to_string()]);
    }

    #[test]
    pub fn test_header_missing_format() {
        let err = parse_header(
            b"#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tTx1",
            "test.vcf",
            5,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("FORMAT column absent"));
    }

    #[test]
    pub fn test_snp_record() {
        let block = decode_block(
            &ctx(3, false),
            &[line("1\t100\trs1\tA\tG\t40\tPASS\t.\tGT\t0/0\t0|1\t.")],
            10,
        )
        .unwrap();

        assert!(block.positions.len() == 1);
        assert!(block.positions[0].pos == 100);
        assert!(block.positions[0].ref_allele == Some(b'A'));
        assert!(block.positions[0].alt_allele == Some(b'G'));
        assert!(block.positions[0].quality == Some(40.0));
        assert!(
            block.genotypes.sites[0]
                == vec![
                    pack(A_ALLELE, A_ALLELE),
                    pack(A_ALLELE, G_ALLELE),
                    UNKNOWN_DIPLOID
                ]
        );
    }

    #[test]
    pub fn test_dot_prefixed_call_is_fully_unknown() {
        // A half-call like "./1" is wholly uncalled, not unknown/ALT, and
        // its AD is not captured.
        let block = decode_block(
            &ctx(2, true),
            &[line("1\t100\t.\tA\tG\t.\tPASS\t.\tGT:AD\t./1:7,3\t.")],
            10,
        )
        .unwrap();

        assert!(block.genotypes.sites[0] == vec![UNKNOWN_DIPLOID, UNKNOWN_DIPLOID]);
        let depth = block.depth.unwrap();
        assert!(depth.sites[0] == vec![DEPTH_MISSING_BYTE; 4]);
    }

    #[test]
    pub fn test_insertion_expands_to_sub_positions() {
        // REF=A ALT=ATT: one base site plus two insertion columns.
        let block = decode_block(
            &ctx(2, false),
            &[line("1\t100\t.\tA\tATT\t.\tPASS\t.\tGT\t0/1\t0/0")],
            10,
        )
        .unwrap();

        assert!(block.positions.len() == 3);
        assert!(block.positions[0].pos == 100);
        assert!(block.positions[0].insert_offset == 0);
        assert!(block.positions[1].pos == 100);
        assert!(block.positions[1].insert_offset == 1);
        assert!(block.positions[2].insert_offset == 2);
        assert!(block.positions[1].ref_allele == Some(b'+'));

        // Taxon 0 is ref/insertion, taxon 1 ref/ref.
        assert!(block.genotypes.sites[0] == vec![pack(A_ALLELE, A_ALLELE), pack(A_ALLELE, A_ALLELE)]);
        assert!(
            block.genotypes.sites[1] == vec![pack(GAP_ALLELE, T_ALLELE), pack(GAP_ALLELE, GAP_ALLELE)]
        );
        assert!(
            block.genotypes.sites[2] == vec![pack(GAP_ALLELE, T_ALLELE), pack(GAP_ALLELE, GAP_ALLELE)]
        );
    }

    #[test]
    pub fn test_deletion_pads_alt_with_gaps() {
        // REF=AC ALT=A: the deleted base is a gap on alt haplotypes.
        let block = decode_block(
            &ctx(1, false),
            &[line("1\t100\t.\tAC\tA\t.\tPASS\t.\tGT\t1/1")],
            10,
        )
        .unwrap();
        assert!(block.positions.len() == 2);
        assert!(block.positions[1].pos == 101);
        assert!(block.positions[1].insert_offset == 0);
        assert!(block.genotypes.sites[1] == vec![pack(GAP_ALLELE, GAP_ALLELE)]);
    }

    #[test]
    pub fn test_ad_depth_capture() {
        let block = decode_block(
            &ctx(2, true),
            &[line(
                "1\t100\t.\tA\tG\t.\tPASS\t.\tGT:AD:DP\t0/1:7,3:10\t0/0:.:.",
            )],
            10,
        )
        .unwrap();

        let depth = block.depth.unwrap();
        let col = &depth.sites[0];
        assert!(byte_to_depth(col[0]) == 7);
        assert!(byte_to_depth(col[1]) == 3);
        assert!(byte_to_depth(col[2]) == DEPTH_MISSING);
        assert!(byte_to_depth(col[3]) == DEPTH_MISSING);
    }

    #[test]
    pub fn test_multi_digit_allele_index() {
        // Eleven filler alts, then T at index 12.
        let alts = vec!["C"; 11]
            .into_iter()
            .chain(["T"])
            .collect::<Vec<_>>()
            .join(",");
        let record = format!("1\t100\t.\tA\t{}\t.\tPASS\t.\tGT\t12/12", alts);
        let block = decode_block(&ctx(1, false), &[line(&record)], 10).unwrap();
        assert!(block.genotypes.sites[0] == vec![pack(T_ALLELE, T_ALLELE)]);
    }

    #[test]
    pub fn test_allele_index_out_of_range() {
        let err = decode_block(
            &ctx(1, false),
            &[line("1\t100\t.\tA\tG\t.\tPASS\t.\tGT\t0/2")],
            10,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("out of range"));
    }

    #[test]
    pub fn test_format_must_begin_with_gt() {
        let err = decode_block(
            &ctx(1, false),
            &[line("1\t100\t.\tA\tG\t.\tPASS\t.\tDP:GT\t10:0/0")],
            10,
        )
        .unwrap_err();
        assert!(format!("{}", err).contains("does not begin with GT"));
    }
}
