// region/bitmap.rs
//
// Uncompressed bitmap: ceil(domain_size / 64) machine words, tail bits
// beyond the domain kept zero. Set operations are word-parallel boolean
// ops; the in-place variants mutate the left operand's words.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::RegionUniformity;
use crate::setops::SetOp;

pub const BITS_PER_WORD: u64 = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitmapRegion {
    domain_size: u64,
    pub(crate) words: Vec<u64>,
}

fn words_for(domain_size: u64) -> usize {
    domain_size.div_ceil(BITS_PER_WORD) as usize
}

impl BitmapRegion {
    pub fn new_empty(domain_size: u64) -> Self {
        BitmapRegion {
            domain_size,
            words: vec![0; words_for(domain_size)],
        }
    }

    pub fn make_uniform(domain_size: u64, filled: bool) -> Self {
        let mut region = Self::new_empty(domain_size);
        if filled {
            for w in &mut region.words {
                *w = u64::MAX;
            }
            region.mask_tail();
        }
        region
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u64>()
    }

    pub fn element_count(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn get(&self, rid: u64) -> bool {
        (self.words[(rid / BITS_PER_WORD) as usize] >> (rid % BITS_PER_WORD)) & 1 == 1
    }

    pub fn set(&mut self, rid: u64) {
        self.words[(rid / BITS_PER_WORD) as usize] |= 1u64 << (rid % BITS_PER_WORD);
    }

    pub fn set_run(&mut self, start: u64, len: u64) {
        // Word-aligned middle, masked ends.
        let mut pos = start;
        let end = start + len;
        while pos < end {
            let word = (pos / BITS_PER_WORD) as usize;
            let bit = pos % BITS_PER_WORD;
            let take = (BITS_PER_WORD - bit).min(end - pos);
            let mask = if take == 64 {
                u64::MAX
            } else {
                ((1u64 << take) - 1) << bit
            };
            self.words[word] |= mask;
            pos += take;
        }
    }

    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.element_count() as usize);
        for (wi, &word) in self.words.iter().enumerate() {
            let mut w = word;
            while w != 0 {
                let bit = w.trailing_zeros() as u64;
                out.push(wi as u64 * BITS_PER_WORD + bit + offset);
                w &= w - 1;
            }
        }
        out
    }

    pub fn uniformity(&self) -> RegionUniformity {
        let count = self.element_count();
        if count == 0 {
            RegionUniformity::Empty
        } else if count == self.domain_size {
            RegionUniformity::Filled
        } else {
            RegionUniformity::Mixed
        }
    }

    /// Zero any bits at positions >= domain_size in the last word.
    pub(crate) fn mask_tail(&mut self) {
        let tail_bits = self.domain_size % BITS_PER_WORD;
        if tail_bits != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail_bits) - 1;
            }
        }
    }

    pub fn complement(&self) -> BitmapRegion {
        let mut out = self.clone();
        out.complement_in_place();
        out
    }

    pub fn complement_in_place(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
        self.mask_tail();
    }

    pub fn binary_op(&self, other: &BitmapRegion, op: SetOp) -> BitmapRegion {
        let mut out = self.clone();
        out.binary_op_in_place(other, op);
        out
    }

    pub fn binary_op_in_place(&mut self, other: &BitmapRegion, op: SetOp) {
        for (a, &b) in self.words.iter_mut().zip(other.words.iter()) {
            *a = match op {
                SetOp::Union => *a | b,
                SetOp::Intersection => *a & b,
                SetOp::Difference => *a & !b,
                SetOp::SymmetricDifference => *a ^ b,
            };
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
pub struct BitmapEncoder {
    region: BitmapRegion,
}

impl BitmapEncoder {
    pub fn new(domain_size: u64) -> Self {
        BitmapEncoder {
            region: BitmapRegion::new_empty(domain_size),
        }
    }

    pub fn insert_bits(&mut self, start: u64, len: u64) {
        self.region.set_run(start, len);
    }

    pub fn finish(self) -> BitmapRegion {
        self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_run_spanning_words() {
        let mut b = BitmapRegion::new_empty(200);
        b.set_run(60, 10);
        assert_eq!(b.to_rids(0), (60..70).collect::<Vec<_>>());
        assert_eq!(b.element_count(), 10);
    }

    #[test]
    fn test_complement_masks_tail() {
        let b = BitmapRegion::new_empty(70);
        let c = b.complement();
        assert_eq!(c.element_count(), 70);
        assert_eq!(c.uniformity(), RegionUniformity::Filled);
    }

    #[test]
    fn test_word_ops() {
        let mut a = BitmapRegion::new_empty(128);
        a.set_run(0, 64);
        let mut b = BitmapRegion::new_empty(128);
        b.set_run(32, 64);
        assert_eq!(a.binary_op(&b, SetOp::Union).element_count(), 96);
        assert_eq!(a.binary_op(&b, SetOp::Intersection).element_count(), 32);
        assert_eq!(a.binary_op(&b, SetOp::Difference).element_count(), 32);
        assert_eq!(a.binary_op(&b, SetOp::SymmetricDifference).element_count(), 64);
    }
}
