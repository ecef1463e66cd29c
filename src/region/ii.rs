// region/ii.rs
//
// Inverted index: a sorted vector of 32-bit RIDs. The simplest region
// representation and the reference for the others' set semantics.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::RegionUniformity;
use crate::setops::SetOp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IiRegion {
    domain_size: u64,
    rids: Vec<u32>,
}

impl IiRegion {
    /// `rids` must be sorted and duplicate-free.
    pub fn from_sorted(domain_size: u64, rids: Vec<u32>) -> Self {
        debug_assert!(rids.windows(2).all(|w| w[0] < w[1]));
        debug_assert!(rids.last().map_or(true, |&r| (r as u64) < domain_size));
        IiRegion { domain_size, rids }
    }

    pub fn make_uniform(domain_size: u64, filled: bool) -> Self {
        let rids = if filled {
            (0..domain_size as u32).collect()
        } else {
            Vec::new()
        };
        IiRegion { domain_size, rids }
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn rids(&self) -> &[u32] {
        &self.rids
    }

    pub fn size_in_bytes(&self) -> usize {
        self.rids.len() * std::mem::size_of::<u32>()
    }

    pub fn element_count(&self) -> u64 {
        self.rids.len() as u64
    }

    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        self.rids.iter().map(|&r| r as u64 + offset).collect()
    }

    pub fn uniformity(&self) -> RegionUniformity {
        if self.rids.is_empty() {
            RegionUniformity::Empty
        } else if self.rids.len() as u64 == self.domain_size {
            RegionUniformity::Filled
        } else {
            RegionUniformity::Mixed
        }
    }

    pub fn complement(&self) -> IiRegion {
        let mut out = Vec::with_capacity(self.domain_size as usize - self.rids.len());
        let mut it = self.rids.iter().peekable();
        for rid in 0..self.domain_size as u32 {
            if it.peek() == Some(&&rid) {
                it.next();
            } else {
                out.push(rid);
            }
        }
        IiRegion {
            domain_size: self.domain_size,
            rids: out,
        }
    }

    /// Merge of two sorted RID sequences under the given operation.
    pub fn binary_op(&self, other: &IiRegion, op: SetOp) -> IiRegion {
        let (a, b) = (&self.rids, &other.rids);
        let mut out = Vec::new();
        let (mut i, mut j) = (0usize, 0usize);
        while i < a.len() || j < b.len() {
            let in_a = j >= b.len() || (i < a.len() && a[i] < b[j]);
            let in_b = i >= a.len() || (j < b.len() && b[j] < a[i]);
            if in_a {
                if matches!(op, SetOp::Union | SetOp::Difference | SetOp::SymmetricDifference) {
                    out.push(a[i]);
                }
                i += 1;
            } else if in_b {
                if matches!(op, SetOp::Union | SetOp::SymmetricDifference) {
                    out.push(b[j]);
                }
                j += 1;
            } else {
                // Present in both.
                if matches!(op, SetOp::Union | SetOp::Intersection) {
                    out.push(a[i]);
                }
                i += 1;
                j += 1;
            }
        }
        IiRegion {
            domain_size: self.domain_size,
            rids: out,
        }
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        bincode::serialize_into(w, self)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self, BinIdxError> {
        Ok(bincode::deserialize_from(r)?)
    }
}

#[derive(Debug)]
pub struct IiEncoder {
    domain_size: u64,
    rids: Vec<u32>,
}

impl IiEncoder {
    pub fn new(domain_size: u64) -> Self {
        IiEncoder {
            domain_size,
            rids: Vec::new(),
        }
    }

    pub fn insert_bits(&mut self, start: u64, len: u64) {
        self.rids.extend((start..start + len).map(|r| r as u32));
    }

    pub fn finish(self) -> IiRegion {
        IiRegion::from_sorted(self.domain_size, self.rids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ii(rids: &[u32]) -> IiRegion {
        IiRegion::from_sorted(16, rids.to_vec())
    }

    #[test]
    fn test_binary_ops() {
        let a = ii(&[1, 2, 3, 8]);
        let b = ii(&[2, 3, 4]);
        assert_eq!(a.binary_op(&b, SetOp::Union).rids(), &[1, 2, 3, 4, 8]);
        assert_eq!(a.binary_op(&b, SetOp::Intersection).rids(), &[2, 3]);
        assert_eq!(a.binary_op(&b, SetOp::Difference).rids(), &[1, 8]);
        assert_eq!(a.binary_op(&b, SetOp::SymmetricDifference).rids(), &[1, 4, 8]);
    }

    #[test]
    fn test_idempotence() {
        let a = ii(&[0, 5, 9]);
        assert_eq!(a.binary_op(&a, SetOp::Union), a);
        assert_eq!(a.binary_op(&a, SetOp::Intersection), a);
        assert!(a.binary_op(&a, SetOp::Difference).rids().is_empty());
        assert!(a.binary_op(&a, SetOp::SymmetricDifference).rids().is_empty());
    }

    #[test]
    fn test_complement() {
        let a = ii(&[0, 15]);
        let c = a.complement();
        assert_eq!(c.element_count(), 14);
        assert_eq!(c.complement(), a);
    }
}
