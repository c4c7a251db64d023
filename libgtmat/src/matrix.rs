//! Genotype and depth matrices, plus the per-block staging buffers decoder
//! tasks hand back to the coordinator.

use crate::codec::depth::DEPTH_MISSING_BYTE;
use crate::codec::diploid::UNKNOWN_DIPLOID;
use crate::position::Position;

/// Decoded output of one worker batch. Site-major while staged: one column
/// per site, each column holding one diploid byte per taxon. Owned by the
/// decoder task until the coordinator merges and releases it.
#[derive(Debug)]
pub struct GenotypeBlock {
    pub taxa: usize,
    pub sites: Vec<Vec<u8>>,
}

impl GenotypeBlock {
    pub fn new(taxa: usize) -> GenotypeBlock {
        GenotypeBlock {
            taxa,
            sites: Vec::new(),
        }
    }

    pub fn push_site(&mut self, column: Vec<u8>) {
        debug_assert!(column.len() == self.taxa);
        self.sites.push(column);
    }

    pub fn width(&self) -> usize {
        self.sites.len()
    }

    /// Swap two site columns, for the adjacent-tie repair.
    pub fn swap_sites(&mut self, a: usize, b: usize) {
        self.sites.swap(a, b);
    }
}

/// Depth companion to a genotype block: two encoded depth bytes per
/// (taxon, site), one for each packed allele.
#[derive(Debug)]
pub struct DepthBlock {
    pub taxa: usize,
    pub sites: Vec<Vec<i8>>,
}

impl DepthBlock {
    pub fn new(taxa: usize) -> DepthBlock {
        DepthBlock {
            taxa,
            sites: Vec::new(),
        }
    }

    pub fn push_site(&mut self, column: Vec<i8>) {
        debug_assert!(column.len() == self.taxa * 2);
        self.sites.push(column);
    }

    pub fn swap_sites(&mut self, a: usize, b: usize) {
        self.sites.swap(a, b);
    }
}

/// Final taxon-major genotype matrix: taxa rows, one diploid byte per site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeMatrix {
    taxa: usize,
    sites: usize,
    data: Vec<u8>,
}

impl GenotypeMatrix {
    pub fn new_unknown(taxa: usize, sites: usize) -> GenotypeMatrix {
        GenotypeMatrix {
            taxa,
            sites,
            data: vec![UNKNOWN_DIPLOID; taxa * sites],
        }
    }

    pub fn taxa(&self) -> usize {
        self.taxa
    }

    pub fn sites(&self) -> usize {
        self.sites
    }

    #[inline]
    pub fn get(&self, taxon: usize, site: usize) -> u8 {
        self.data[taxon * self.sites + site]
    }

    #[inline]
    pub fn set(&mut self, taxon: usize, site: usize, diploid: u8) {
        self.data[taxon * self.sites + site] = diploid;
    }

    pub fn row(&self, taxon: usize) -> &[u8] {
        &self.data[taxon * self.sites..(taxon + 1) * self.sites]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Swap two site columns across every taxon.
    pub fn swap_sites(&mut self, a: usize, b: usize) {
        for taxon in 0..self.taxa {
            self.data.swap(taxon * self.sites + a, taxon * self.sites + b);
        }
    }

    /// Reorder sites so new column j holds old column perm[j].
    pub fn permute_sites(&mut self, perm: &[usize]) {
        debug_assert!(perm.len() == self.sites);
        let mut data = Vec::with_capacity(self.data.len());
        for taxon in 0..self.taxa {
            let row = self.row(taxon);
            data.extend(perm.iter().map(|&old| row[old]));
        }
        self.data = data;
    }
}

/// Final depth matrix, same shape as the genotype matrix with two encoded
/// bytes per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthMatrix {
    taxa: usize,
    sites: usize,
    data: Vec<i8>,
}

impl DepthMatrix {
    pub fn new_missing(taxa: usize, sites: usize) -> DepthMatrix {
        DepthMatrix {
            taxa,
            sites,
            data: vec![DEPTH_MISSING_BYTE; taxa * sites * 2],
        }
    }

    pub fn taxa(&self) -> usize {
        self.taxa
    }

    pub fn sites(&self) -> usize {
        self.sites
    }

    /// Encoded depth bytes for the two packed alleles at (taxon, site).
    #[inline]
    pub fn get(&self, taxon: usize, site: usize) -> (i8, i8) {
        let i = (taxon * self.sites + site) * 2;
        (self.data[i], self.data[i + 1])
    }

    #[inline]
    pub fn set(&mut self, taxon: usize, site: usize, depths: (i8, i8)) {
        let i = (taxon * self.sites + site) * 2;
        self.data[i] = depths.0;
        self.data[i + 1] = depths.1;
    }

    pub fn swap_sites(&mut self, a: usize, b: usize) {
        for taxon in 0..self.taxa {
            let ia = (taxon * self.sites + a) * 2;
            let ib = (taxon * self.sites + b) * 2;
            self.data.swap(ia, ib);
            self.data.swap(ia + 1, ib + 1);
        }
    }

    pub fn permute_sites(&mut self, perm: &[usize]) {
        debug_assert!(perm.len() == self.sites);
        let mut data = Vec::with_capacity(self.data.len());
        for taxon in 0..self.taxa {
            let row = &self.data[taxon * self.sites * 2..(taxon + 1) * self.sites * 2];
            for &old in perm.iter() {
                data.push(row[old * 2]);
                data.push(row[old * 2 + 1]);
            }
        }
        self.data = data;
    }
}

/// Accumulates blocks in submission order into the final matrices.
///
/// Row-backed while growing, flattened once the site count is known. The
/// coordinator is the only writer, so no column range can overlap.
#[derive(Debug)]
pub struct MatrixAssembler {
    taxa: usize,
    keep_depth: bool,
    positions: Vec<Position>,
    rows: Vec<Vec<u8>>,
    depth_rows: Vec<Vec<i8>>,
}

impl MatrixAssembler {
    pub fn new(taxa: usize, keep_depth: bool) -> MatrixAssembler {
        MatrixAssembler {
            taxa,
            keep_depth,
            positions: Vec::new(),
            rows: vec![Vec::new(); taxa],
            depth_rows: if keep_depth {
                vec![Vec::new(); taxa]
            } else {
                Vec::new()
            },
        }
    }

    pub fn sites(&self) -> usize {
        self.positions.len()
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.positions.last()
    }

    /// Merge one decoded block at the next column offset and release it.
    pub fn push_block(
        &mut self,
        positions: Vec<Position>,
        genotypes: GenotypeBlock,
        depth: Option<DepthBlock>,
    ) {
        debug_assert!(genotypes.width() == positions.len());
        for column in genotypes.sites.iter() {
            for (taxon, &diploid) in column.iter().enumerate() {
                self.rows[taxon].push(diploid);
            }
        }
        if self.keep_depth {
            match depth {
                Some(block) => {
                    debug_assert!(block.sites.len() == positions.len());
                    for column in block.sites.iter() {
                        for taxon in 0..self.taxa {
                            self.depth_rows[taxon].push(column[taxon * 2]);
                            self.depth_rows[taxon].push(column[taxon * 2 + 1]);
                        }
                    }
                }
                None => {
                    for _ in 0..positions.len() {
                        for taxon in 0..self.taxa {
                            self.depth_rows[taxon].push(DEPTH_MISSING_BYTE);
                            self.depth_rows[taxon].push(DEPTH_MISSING_BYTE);
                        }
                    }
                }
            }
        }
        self.positions.extend(positions);
    }

    pub fn finish(self) -> (Vec<Position>, GenotypeMatrix, Option<DepthMatrix>) {
        let sites = self.positions.len();
        let mut data = Vec::with_capacity(self.taxa * sites);
        for row in self.rows.iter() {
            debug_assert!(row.len() == sites);
            data.extend_from_slice(row);
        }
        let genotypes = GenotypeMatrix {
            taxa: self.taxa,
            sites,
            data,
        };

        let depth = if self.keep_depth {
            let mut data = Vec::with_capacity(self.taxa * sites * 2);
            for row in self.depth_rows.iter() {
                data.extend_from_slice(row);
            }
            Some(DepthMatrix {
                taxa: self.taxa,
                sites,
                data,
            })
        } else {
            None
        };

        (self.positions, genotypes, depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::diploid::pack;
    use crate::position::{ChromTable, Position};
    use std::sync::Arc;

    #[test]
    pub fn test_matrix_get_set_swap() {
        let mut m = GenotypeMatrix::new_unknown(2, 3);
        assert!(m.get(1, 2) == UNKNOWN_DIPLOID);
        m.set(0, 0, pack(0, 0));
        m.set(0, 2, pack(3, 3));
        m.swap_sites(0, 2);
        assert!(m.get(0, 0) == pack(3, 3));
        assert!(m.get(0, 2) == pack(0, 0));
    }

    #[test]
    pub fn test_permute_sites() {
        let mut m = GenotypeMatrix::new_unknown(1, 3);
        m.set(0, 0, 10);
        m.set(0, 1, 20);
        m.set(0, 2, 30);
        m.permute_sites(&[2, 0, 1]);
        assert!(m.row(0) == &[30, 10, 20]);
    }

    #[test]
    pub fn test_assembler_blocks_in_order() {
        let table = ChromTable::new();
        let c1 = table.intern("1");

        let mut asm = MatrixAssembler::new(2, false);

        let mut block = GenotypeBlock::new(2);
        block.push_site(vec![1, 2]);
        block.push_site(vec![3, 4]);
        asm.push_block(
            vec![
                Position::new(Arc::clone(&c1), 10),
                Position::new(Arc::clone(&c1), 20),
            ],
            block,
            None,
        );

        let mut block = GenotypeBlock::new(2);
        block.push_site(vec![5, 6]);
        asm.push_block(vec![Position::new(c1, 30)], block, None);

        let (positions, m, depth) = asm.finish();
        assert!(positions.len() == 3);
        assert!(m.row(0) == &[1, 3, 5]);
        assert!(m.row(1) == &[2, 4, 6]);
        assert!(depth.is_none());
    }

    #[test]
    pub fn test_assembler_depth_fill() {
        let table = ChromTable::new();
        let c1 = table.intern("1");

        let mut asm = MatrixAssembler::new(1, true);
        let mut block = GenotypeBlock::new(1);
        block.push_site(vec![9]);
        let mut depth = DepthBlock::new(1);
        depth.push_site(vec![7, 3]);
        asm.push_block(vec![Position::new(c1, 5)], block, Some(depth));

        let (_, _, depth) = asm.finish();
        let depth = depth.unwrap();
        assert!(depth.get(0, 0) == (7, 3));
    }
}
