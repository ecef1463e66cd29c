// region/cii.rs
//
// Compressed inverted index: the II's sorted RID vector with runs of
// consecutive RIDs collapsed to (start, len) pairs. Set operations merge
// run sequences directly and coalesce adjacent output runs.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::RegionUniformity;
use crate::setops::SetOp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiiRegion {
    domain_size: u64,
    /// Sorted, disjoint, non-adjacent (start, len) runs; len > 0.
    runs: Vec<(u32, u32)>,
}

impl CiiRegion {
    pub fn from_runs(domain_size: u64, runs: Vec<(u32, u32)>) -> Self {
        debug_assert!(runs.iter().all(|&(_, len)| len > 0));
        debug_assert!(runs
            .windows(2)
            .all(|w| (w[0].0 as u64 + w[0].1 as u64) < w[1].0 as u64));
        CiiRegion { domain_size, runs }
    }

    pub fn make_uniform(domain_size: u64, filled: bool) -> Self {
        let runs = if filled && domain_size > 0 {
            vec![(0, domain_size as u32)]
        } else {
            Vec::new()
        };
        CiiRegion { domain_size, runs }
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn runs(&self) -> &[(u32, u32)] {
        &self.runs
    }

    pub fn size_in_bytes(&self) -> usize {
        self.runs.len() * 2 * std::mem::size_of::<u32>()
    }

    pub fn element_count(&self) -> u64 {
        self.runs.iter().map(|&(_, len)| len as u64).sum()
    }

    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.element_count() as usize);
        for &(start, len) in &self.runs {
            out.extend((start as u64..start as u64 + len as u64).map(|r| r + offset));
        }
        out
    }

    pub fn uniformity(&self) -> RegionUniformity {
        match self.runs.as_slice() {
            [] => RegionUniformity::Empty,
            [(0, len)] if *len as u64 == self.domain_size => RegionUniformity::Filled,
            _ => RegionUniformity::Mixed,
        }
    }

    pub fn complement(&self) -> CiiRegion {
        let mut out = RunBuilder::new();
        let mut cursor = 0u64;
        for &(start, len) in &self.runs {
            if (start as u64) > cursor {
                out.push(cursor as u32, (start as u64 - cursor) as u32);
            }
            cursor = start as u64 + len as u64;
        }
        if cursor < self.domain_size {
            out.push(cursor as u32, (self.domain_size - cursor) as u32);
        }
        CiiRegion {
            domain_size: self.domain_size,
            runs: out.finish(),
        }
    }

    pub fn binary_op(&self, other: &CiiRegion, op: SetOp) -> CiiRegion {
        match op {
            SetOp::Union => self.merge(other, |a, b| a | b),
            SetOp::Intersection => self.merge(other, |a, b| a & b),
            SetOp::Difference => self.merge(other, |a, b| a & !b),
            SetOp::SymmetricDifference => self.merge(other, |a, b| a ^ b),
        }
    }

    /// Boundary sweep over both run lists; `f` decides membership of each
    /// elementary segment from the two sides' membership bits.
    fn merge(&self, other: &CiiRegion, f: impl Fn(bool, bool) -> bool) -> CiiRegion {
        let mut out = RunBuilder::new();
        let (mut i, mut j) = (0usize, 0usize);
        let mut pos = 0u64;
        let end = self.domain_size;
        while pos < end {
            let a_run = self.runs.get(i).copied();
            let b_run = other.runs.get(j).copied();
            let in_a = a_run.map_or(false, |(s, l)| (s as u64) <= pos && pos < s as u64 + l as u64);
            let in_b = b_run.map_or(false, |(s, l)| (s as u64) <= pos && pos < s as u64 + l as u64);

            // Next position where either side's membership can change.
            let mut next = end;
            if let Some((s, l)) = a_run {
                let boundary = if in_a { s as u64 + l as u64 } else { s as u64 };
                if boundary > pos {
                    next = next.min(boundary);
                }
            }
            if let Some((s, l)) = b_run {
                let boundary = if in_b { s as u64 + l as u64 } else { s as u64 };
                if boundary > pos {
                    next = next.min(boundary);
                }
            }

            if f(in_a, in_b) {
                out.push(pos as u32, (next - pos) as u32);
            }

            if let Some((s, l)) = a_run {
                if next >= s as u64 + l as u64 {
                    i += 1;
                }
            }
            if let Some((s, l)) = b_run {
                if next >= s as u64 + l as u64 {
                    j += 1;
                }
            }
            pos = next;
        }
        CiiRegion {
            domain_size: self.domain_size,
            runs: out.finish(),
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

/// Accumulates runs, coalescing adjacent ones.
#[derive(Debug, Default)]
struct RunBuilder {
    runs: Vec<(u32, u32)>,
}

impl RunBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, start: u32, len: u32) {
        if len == 0 {
            return;
        }
        if let Some(last) = self.runs.last_mut() {
            if last.0 as u64 + last.1 as u64 == start as u64 {
                last.1 += len;
                return;
            }
        }
        self.runs.push((start, len));
    }

    fn finish(self) -> Vec<(u32, u32)> {
        self.runs
    }
}

#[derive(Debug)]
pub struct CiiEncoder {
    domain_size: u64,
    runs: RunBuilder,
}

impl CiiEncoder {
    pub fn new(domain_size: u64) -> Self {
        CiiEncoder {
            domain_size,
            runs: RunBuilder::new(),
        }
    }

    pub fn insert_bits(&mut self, start: u64, len: u64) {
        self.runs.push(start as u32, len as u32);
    }

    pub fn finish(self) -> CiiRegion {
        CiiRegion {
            domain_size: self.domain_size,
            runs: self.runs.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_rids(rids: &[u64]) -> CiiRegion {
        match crate::region::region_from_rids(crate::region::RegionType::Cii, 32, rids) {
            crate::region::Region::Cii(r) => r,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_run_coalescing() {
        let r = from_rids(&[0, 1, 2, 3, 10, 11]);
        assert_eq!(r.runs(), &[(0, 4), (10, 2)]);
    }

    #[test]
    fn test_ops_match_rid_semantics() {
        let a = from_rids(&[0, 1, 2, 3, 8, 9]);
        let b = from_rids(&[2, 3, 4, 9, 20]);
        assert_eq!(
            a.binary_op(&b, SetOp::Union).to_rids(0),
            vec![0, 1, 2, 3, 4, 8, 9, 20]
        );
        assert_eq!(a.binary_op(&b, SetOp::Intersection).to_rids(0), vec![2, 3, 9]);
        assert_eq!(a.binary_op(&b, SetOp::Difference).to_rids(0), vec![0, 1, 8]);
        assert_eq!(
            a.binary_op(&b, SetOp::SymmetricDifference).to_rids(0),
            vec![0, 1, 4, 8, 20]
        );
    }

    #[test]
    fn test_complement_round_trip() {
        let a = from_rids(&[5, 6, 7, 31]);
        assert_eq!(a.complement().complement(), a);
        assert_eq!(a.complement().element_count(), 32 - 4);
    }
}
