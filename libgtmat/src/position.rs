//! Genomic positions and the shared chromosome-name interning table.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A chromosome, interned once per distinct name.
///
/// Ordering is numeric-aware: names that parse as integers sort numerically
/// and ahead of non-numeric names, so "2" < "10" < "X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chromosome {
    pub name: String,
}

impl Chromosome {
    pub fn new(name: &str) -> Chromosome {
        Chromosome {
            name: name.to_string(),
        }
    }
}

impl Ord for Chromosome {
    fn cmp(&self, other: &Chromosome) -> Ordering {
        match (self.name.parse::<u64>(), other.name.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.name.cmp(&other.name),
        }
    }
}

impl PartialOrd for Chromosome {
    fn partial_cmp(&self, other: &Chromosome) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One site in the position list.
///
/// `insert_offset` is non-zero only for a base inserted at the same physical
/// coordinate. The total order is (chromosome, coordinate, insert offset);
/// the annotation fields do not participate.
#[derive(Debug, Clone)]
pub struct Position {
    pub chrom: Arc<Chromosome>,
    pub pos: u64,
    pub insert_offset: u16,
    pub name: Option<String>,
    pub ref_allele: Option<u8>,
    pub alt_allele: Option<u8>,
    pub quality: Option<f32>,
}

impl Position {
    pub fn new(chrom: Arc<Chromosome>, pos: u64) -> Position {
        Position {
            chrom,
            pos,
            insert_offset: 0,
            name: None,
            ref_allele: None,
            alt_allele: None,
            quality: None,
        }
    }

    pub fn with_insert_offset(mut self, insert_offset: u16) -> Position {
        self.insert_offset = insert_offset;
        self
    }

    pub fn with_name(mut self, name: &str) -> Position {
        self.name = Some(name.to_string());
        self
    }

    fn key(&self) -> (&Chromosome, u64, u16) {
        (&self.chrom, self.pos, self.insert_offset)
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Position) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Position {}

impl Ord for Position {
    fn cmp(&self, other: &Position) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Position) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chrom.name, self.pos)?;
        if self.insert_offset > 0 {
            write!(f, "+{}", self.insert_offset)?;
        }
        Ok(())
    }
}

/// Insert-if-absent chromosome interning, shared across decoder tasks.
///
/// The only structure mutated by more than one concurrent decoder. Decoders
/// only ever add names, and distinct names are few relative to record count,
/// so the read-lock fast path covers almost every call.
#[derive(Debug, Default)]
pub struct ChromTable {
    table: RwLock<HashMap<String, Arc<Chromosome>>>,
}

impl ChromTable {
    pub fn new() -> ChromTable {
        ChromTable::default()
    }

    pub fn intern(&self, name: &str) -> Arc<Chromosome> {
        {
            let table = self.table.read().expect("chromosome table poisoned");
            if let Some(chrom) = table.get(name) {
                return Arc::clone(chrom);
            }
        }

        let mut table = self.table.write().expect("chromosome table poisoned");
        // Another decoder may have inserted between the two locks.
        Arc::clone(
            table
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Chromosome::new(name))),
        )
    }

    pub fn len(&self) -> usize {
        self.table.read().expect("chromosome table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    pub fn test_chromosome_numeric_ordering() {
        let c2 = Chromosome::new("2");
        let c10 = Chromosome::new("10");
        let cx = Chromosome::new("X");
        assert!(c2 < c10);
        assert!(c10 < cx);
    }

    #[test]
    pub fn test_position_total_order() {
        let table = ChromTable::new();
        let c1 = table.intern("1");
        let c2 = table.intern("2");

        let a = Position::new(Arc::clone(&c1), 100);
        let b = Position::new(Arc::clone(&c1), 100).with_insert_offset(1);
        let c = Position::new(Arc::clone(&c1), 101);
        let d = Position::new(Arc::clone(&c2), 5);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);

        // Names do not participate in the order.
        let named = Position::new(c1, 100).with_name("rs1");
        assert!(named == a);
    }

    #[test]
    pub fn test_interning_shares() {
        let table = ChromTable::new();
        let a = table.intern("7");
        let b = table.intern("7");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(table.len() == 1);
    }

    #[test]
    pub fn test_interning_concurrent() {
        let table = Arc::new(ChromTable::new());
        crossbeam::thread::scope(|s| {
            for _ in 0..4 {
                let table = Arc::clone(&table);
                s.spawn(move |_| {
                    for i in 0..100 {
                        table.intern(&format!("{}", i % 5));
                    }
                });
            }
        })
        .unwrap();
        assert!(table.len() == 5);
    }
}
