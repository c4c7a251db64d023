//! Position-stream ordering: global validation, one-shot sort repair, the
//! HapMap adjacent-tie swap, and VCF indel group merging.

use itertools::Itertools;

use crate::codec::diploid::decode_diploid;
use crate::error::BuildError;
use crate::matrix::{DepthBlock, DepthMatrix, GenotypeBlock, GenotypeMatrix};
use crate::position::Position;

/// Confirm the full position list is non-decreasing under the total order.
pub fn validate_ordering(positions: &[Position]) -> Result<(), BuildError> {
    for (i, (prev, cur)) in positions.iter().tuple_windows().enumerate() {
        if prev > cur {
            return Err(BuildError::Ordering {
                index: i + 1,
                previous: format!("{}", prev),
                current: format!("{}", cur),
            });
        }
    }
    Ok(())
}

/// Sort positions (stably) and apply the same permutation to the matrix
/// columns, then re-validate. A second validation failure is fatal and is
/// not retried.
pub fn sort_and_revalidate(
    positions: &mut Vec<Position>,
    genotypes: &mut GenotypeMatrix,
    depth: Option<&mut DepthMatrix>,
) -> Result<(), BuildError> {
    let mut perm: Vec<usize> = (0..positions.len()).collect();
    perm.sort_by(|&a, &b| positions[a].cmp(&positions[b]));

    let sorted: Vec<Position> = perm.iter().map(|&i| positions[i].clone()).collect();
    *positions = sorted;
    genotypes.permute_sites(&perm);
    if let Some(depth) = depth {
        depth.permute_sites(&perm);
    }

    log::debug!("Sorted {} sites into position order", positions.len());
    validate_ordering(positions)
}

/// Repair the common HapMap case of two adjacent records sharing a
/// coordinate but arriving name-swapped: swap positions i-1 and i along
/// with their genotype (and depth) columns, then re-check only the newly
/// adjacent pair. Disorder spanning more than one adjacent pair is left
/// for global validation to reject.
pub fn swap_adjacent_if_disordered(
    positions: &mut [Position],
    genotypes: &mut GenotypeBlock,
    mut depth: Option<&mut DepthBlock>,
    i: usize,
) -> bool {
    if i == 0 || positions[i - 1] <= positions[i] {
        return false;
    }

    positions.swap(i - 1, i);
    genotypes.swap_sites(i - 1, i);
    if let Some(depth) = depth.as_mut() {
        depth.swap_sites(i - 1, i);
    }

    if i >= 2 && positions[i - 2] > positions[i - 1] {
        // A chain longer than one pair; global validation will surface it.
        log::debug!("adjacent swap at site {} left an earlier pair disordered", i);
    }
    true
}

/// One multi-base variant reassembled from a run of per-character sites.
///
/// This is the read-side output contract: writers that emit record-per-
/// variant text (VCF-style) from a built table consume these instead of
/// re-deriving indel grouping from raw columns. Ingestion itself never
/// calls the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedVariant {
    pub position: Position,
    pub ref_allele: String,
    /// Per-taxon haplotype strings, placeholders dropped.
    pub calls: Vec<(String, String)>,
}

fn is_placeholder(symbol: u8) -> bool {
    symbol == b'+' || symbol == b'-'
}

fn site_extends_group(positions: &[Position], matrix: &GenotypeMatrix, i: usize) -> bool {
    let prev = &positions[i - 1];
    let cur = &positions[i];
    if cur.chrom != prev.chrom || cur.pos > prev.pos + 1 {
        return false;
    }
    if matches!(cur.ref_allele, Some(r) if is_placeholder(r)) {
        return true;
    }
    (0..matrix.taxa()).any(|taxon| {
        let (a, b) = decode_diploid(matrix.get(taxon, i));
        is_placeholder(a) || is_placeholder(b)
    })
}

/// Group consecutive sites that together encode one multi-base indel and
/// emit one merged record per group.
///
/// Each taxon's per-site allele characters are concatenated with
/// insertion/gap placeholders dropped. A group with no informative allele
/// data at all gets a padding 'N' prepended to the reference and every
/// call, and its coordinate shifted back by one: the workaround for a
/// record with no flanking base.
pub fn merge_indel_groups(positions: &[Position], matrix: &GenotypeMatrix) -> Vec<MergedVariant> {
    let mut merged = Vec::new();
    let mut start = 0;

    while start < positions.len() {
        let mut end = start + 1;
        while end < positions.len() && site_extends_group(positions, matrix, end) {
            end += 1;
        }
        merged.push(close_group(positions, matrix, start, end));
        start = end;
    }
    merged
}

fn close_group(
    positions: &[Position],
    matrix: &GenotypeMatrix,
    start: usize,
    end: usize,
) -> MergedVariant {
    let mut ref_allele = String::new();
    for p in positions[start..end].iter() {
        if let Some(r) = p.ref_allele {
            if !is_placeholder(r) {
                ref_allele.push(r as char);
            }
        }
    }

    let mut calls = Vec::with_capacity(matrix.taxa());
    for taxon in 0..matrix.taxa() {
        let mut hap_a = String::new();
        let mut hap_b = String::new();
        for site in start..end {
            let (a, b) = decode_diploid(matrix.get(taxon, site));
            if !is_placeholder(a) {
                hap_a.push(a as char);
            }
            if !is_placeholder(b) {
                hap_b.push(b as char);
            }
        }
        calls.push((hap_a, hap_b));
    }

    let mut position = positions[start].clone();
    let empty = calls.iter().all(|(a, b)| a.is_empty() && b.is_empty());
    if empty {
        ref_allele.insert(0, 'N');
        for (a, b) in calls.iter_mut() {
            a.insert(0, 'N');
            b.insert(0, 'N');
        }
        position.pos = position.pos.saturating_sub(1);
    }

    MergedVariant {
        position,
        ref_allele,
        calls,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::diploid::{pack, GAP_ALLELE, INSERT_ALLELE, A_ALLELE, T_ALLELE};
    use crate::position::ChromTable;
    use std::sync::Arc;

    fn positions_at(coords: &[(u64, u16)]) -> Vec<Position> {
        let table = ChromTable::new();
        let c1 = table.intern("1");
        coords
            .iter()
            .map(|&(pos, off)| Position::new(Arc::clone(&c1), pos).with_insert_offset(off))
            .collect()
    }

    #[test]
    pub fn test_validate_ordering() {
        assert!(validate_ordering(&positions_at(&[(10, 0), (10, 1), (20, 0)])).is_ok());

        let err = validate_ordering(&positions_at(&[(10, 0), (5, 0)])).unwrap_err();
        match err {
            BuildError::Ordering { index, .. } => assert!(index == 1),
            _ => panic!("expected ordering error"),
        }
    }

    #[test]
    pub fn test_adjacent_swap() {
        let mut positions = positions_at(&[(10, 0), (30, 0), (20, 0)]);
        let mut block = GenotypeBlock::new(1);
        block.push_site(vec![1]);
        block.push_site(vec![2]);
        block.push_site(vec![3]);

        assert!(swap_adjacent_if_disordered(&mut positions, &mut block, None, 2));
        assert!(positions[1].pos == 20);
        assert!(positions[2].pos == 30);
        assert!(block.sites[1] == vec![3]);
        assert!(block.sites[2] == vec![2]);

        // Already ordered: no-op.
        assert!(!swap_adjacent_if_disordered(&mut positions, &mut block, None, 1));
    }

    #[test]
    pub fn test_identical_coordinates_need_no_swap() {
        // Two records sharing a coordinate compare equal under the total
        // order whatever their name order, so the stream is already
        // non-decreasing and the repair leaves it alone.
        let mut positions = positions_at(&[(10, 0), (10, 0)]);
        positions[0].name = Some("rs2".to_string());
        positions[1].name = Some("rs1".to_string());

        let mut block = GenotypeBlock::new(1);
        block.push_site(vec![1]);
        block.push_site(vec![2]);

        assert!(validate_ordering(&positions).is_ok());
        assert!(!swap_adjacent_if_disordered(&mut positions, &mut block, None, 1));
        assert!(positions[0].name.as_deref() == Some("rs2"));
        assert!(block.sites[0] == vec![1]);
    }

    #[test]
    pub fn test_sort_and_revalidate() {
        let mut positions = positions_at(&[(30, 0), (10, 0), (20, 0)]);
        let mut m = GenotypeMatrix::new_unknown(1, 3);
        m.set(0, 0, 30);
        m.set(0, 1, 10);
        m.set(0, 2, 20);

        sort_and_revalidate(&mut positions, &mut m, None).unwrap();
        assert!(positions[0].pos == 10);
        assert!(positions[2].pos == 30);
        assert!(m.row(0) == &[10, 20, 30]);
    }

    #[test]
    pub fn test_indel_group_merge() {
        // REF=A ALT=ATT expansion: base site plus two insertion columns.
        let table = ChromTable::new();
        let c1 = table.intern("1");
        let mut positions = vec![
            Position::new(Arc::clone(&c1), 100),
            Position::new(Arc::clone(&c1), 100).with_insert_offset(1),
            Position::new(Arc::clone(&c1), 100).with_insert_offset(2),
            Position::new(Arc::clone(&c1), 200),
        ];
        positions[0].ref_allele = Some(b'A');
        positions[1].ref_allele = Some(b'+');
        positions[2].ref_allele = Some(b'+');
        positions[3].ref_allele = Some(b'A');

        let mut m = GenotypeMatrix::new_unknown(2, 4);
        // Taxon 0 carries the insertion; taxon 1 does not.
        m.set(0, 0, pack(A_ALLELE, A_ALLELE));
        m.set(0, 1, pack(T_ALLELE, GAP_ALLELE));
        m.set(0, 2, pack(T_ALLELE, GAP_ALLELE));
        m.set(1, 0, pack(A_ALLELE, A_ALLELE));
        m.set(1, 1, pack(GAP_ALLELE, GAP_ALLELE));
        m.set(1, 2, pack(GAP_ALLELE, GAP_ALLELE));
        m.set(0, 3, pack(A_ALLELE, A_ALLELE));
        m.set(1, 3, pack(A_ALLELE, A_ALLELE));

        let merged = merge_indel_groups(&positions, &m);
        assert!(merged.len() == 2);
        assert!(merged[0].position.pos == 100);
        assert!(merged[0].ref_allele == "A");
        assert!(merged[0].calls[0] == ("ATT".to_string(), "A".to_string()));
        assert!(merged[0].calls[1] == ("A".to_string(), "A".to_string()));
        assert!(merged[1].position.pos == 200);
    }

    #[test]
    pub fn test_indel_group_all_empty_pads() {
        let table = ChromTable::new();
        let c1 = table.intern("1");
        let mut positions = vec![Position::new(c1, 50)];
        positions[0].ref_allele = Some(b'+');

        let mut m = GenotypeMatrix::new_unknown(1, 1);
        m.set(0, 0, pack(INSERT_ALLELE, INSERT_ALLELE));

        let merged = merge_indel_groups(&positions, &m);
        assert!(merged.len() == 1);
        assert!(merged[0].position.pos == 49);
        assert!(merged[0].ref_allele == "N");
        assert!(merged[0].calls[0] == ("N".to_string(), "N".to_string()));
    }
}
