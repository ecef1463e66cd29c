// region/wah.rs
//
// Word-aligned hybrid compressed bitmap over 32-bit words. A word with
// the MSB clear is a literal of 31 payload bits (bit 0 = lowest RID). A
// word with the MSB set is a fill: bit 30 is the fill value, bits 0..30
// count how many 31-bit groups it covers. Encodes are canonical: fills
// are maximal, tail bits beyond the domain are zero. Set operations walk
// both operands a group at a time, fast-forwarding across common fills.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::RegionUniformity;
use crate::setops::SetOp;

pub const PAYLOAD_BITS: u64 = 31;
const LITERAL_MASK: u32 = 0x7FFF_FFFF;
const FILL_FLAG: u32 = 1 << 31;
const FILL_VALUE_FLAG: u32 = 1 << 30;
const FILL_COUNT_MASK: u32 = FILL_VALUE_FLAG - 1;

fn is_fill(word: u32) -> bool {
    word & FILL_FLAG != 0
}

fn fill_value(word: u32) -> bool {
    word & FILL_VALUE_FLAG != 0
}

fn fill_groups(word: u32) -> u64 {
    (word & FILL_COUNT_MASK) as u64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WahRegion {
    domain_size: u64,
    words: Vec<u32>,
}

impl WahRegion {
    pub fn make_uniform(domain_size: u64, filled: bool) -> Self {
        let mut b = WahBuilder::new(domain_size);
        b.push_bits(filled, domain_size);
        b.finish()
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    fn num_groups(&self) -> u64 {
        self.domain_size.div_ceil(PAYLOAD_BITS)
    }

    pub fn element_count(&self) -> u64 {
        self.words
            .iter()
            .map(|&w| {
                if is_fill(w) {
                    if fill_value(w) {
                        fill_groups(w) * PAYLOAD_BITS
                    } else {
                        0
                    }
                } else {
                    w.count_ones() as u64
                }
            })
            .sum()
    }

    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        let mut out = Vec::new();
        let mut pos = 0u64;
        for &w in &self.words {
            if is_fill(w) {
                let bits = fill_groups(w) * PAYLOAD_BITS;
                if fill_value(w) {
                    out.extend((pos..(pos + bits).min(self.domain_size)).map(|r| r + offset));
                }
                pos += bits;
            } else {
                let mut lit = w & LITERAL_MASK;
                while lit != 0 {
                    let bit = lit.trailing_zeros() as u64;
                    out.push(pos + bit + offset);
                    lit &= lit - 1;
                }
                pos += PAYLOAD_BITS;
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

    pub fn complement(&self) -> WahRegion {
        let mut out = WahBuilder::new(self.domain_size);
        let mut cursor = GroupCursor::new(&self.words);
        let groups = self.num_groups();
        let mut g = 0u64;
        while g < groups {
            if let Some((value, run)) = cursor.fill_run() {
                let take = run.min(groups - g);
                out.push_fill_groups(!value, take);
                cursor.skip_groups(take);
                g += take;
            } else {
                let lit = cursor.next_group();
                out.push_literal_group(!lit & LITERAL_MASK);
                g += 1;
            }
        }
        let mut region = out.finish();
        region.mask_tail();
        region
    }

    /// Zero bits of the last group at positions >= domain_size.
    fn mask_tail(&mut self) {
        let tail_bits = self.domain_size % PAYLOAD_BITS;
        if tail_bits == 0 {
            return;
        }
        // Re-encode through a builder so a trailing fill that crosses the
        // tail is split and the masked group re-merges canonically.
        let mut out = WahBuilder::new(self.domain_size);
        let mut cursor = GroupCursor::new(&self.words);
        let groups = self.num_groups();
        for g in 0..groups {
            let mut lit = cursor.next_group();
            if g == groups - 1 {
                lit &= (1u32 << tail_bits) - 1;
            }
            out.push_literal_group(lit);
        }
        *self = out.finish();
    }

    pub fn binary_op(&self, other: &WahRegion, op: SetOp) -> WahRegion {
        let mut out = WahBuilder::new(self.domain_size);
        let mut a = GroupCursor::new(&self.words);
        let mut b = GroupCursor::new(&other.words);
        let groups = self.num_groups();
        let mut g = 0u64;
        while g < groups {
            match (a.fill_run(), b.fill_run()) {
                (Some((av, arun)), Some((bv, brun))) => {
                    let take = arun.min(brun).min(groups - g);
                    let v = match op {
                        SetOp::Union => av | bv,
                        SetOp::Intersection => av & bv,
                        SetOp::Difference => av & !bv,
                        SetOp::SymmetricDifference => av ^ bv,
                    };
                    out.push_fill_groups(v, take);
                    a.skip_groups(take);
                    b.skip_groups(take);
                    g += take;
                }
                _ => {
                    let la = a.next_group();
                    let lb = b.next_group();
                    let lit = match op {
                        SetOp::Union => la | lb,
                        SetOp::Intersection => la & lb,
                        SetOp::Difference => la & !lb,
                        SetOp::SymmetricDifference => la ^ lb,
                    };
                    out.push_literal_group(lit & LITERAL_MASK);
                    g += 1;
                }
            }
        }
        out.finish()
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        bincode::serialize_into(w, self)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self, BinIdxError> {
        Ok(bincode::deserialize_from(r)?)
    }
}

/// Walks a WAH word sequence in 31-bit group units.
struct GroupCursor<'a> {
    words: &'a [u32],
    word_idx: usize,
    /// Groups already consumed from the current fill word.
    fill_consumed: u64,
}

impl<'a> GroupCursor<'a> {
    fn new(words: &'a [u32]) -> Self {
        GroupCursor {
            words,
            word_idx: 0,
            fill_consumed: 0,
        }
    }

    /// If positioned inside a fill, its value and remaining group count.
    fn fill_run(&self) -> Option<(bool, u64)> {
        let w = *self.words.get(self.word_idx)?;
        if is_fill(w) {
            Some((fill_value(w), fill_groups(w) - self.fill_consumed))
        } else {
            None
        }
    }

    fn next_group(&mut self) -> u32 {
        let Some(&w) = self.words.get(self.word_idx) else {
            return 0;
        };
        if is_fill(w) {
            let value = fill_value(w);
            self.fill_consumed += 1;
            if self.fill_consumed == fill_groups(w) {
                self.word_idx += 1;
                self.fill_consumed = 0;
            }
            if value {
                LITERAL_MASK
            } else {
                0
            }
        } else {
            self.word_idx += 1;
            w & LITERAL_MASK
        }
    }

    fn skip_groups(&mut self, mut n: u64) {
        while n > 0 {
            let Some(&w) = self.words.get(self.word_idx) else {
                return;
            };
            if is_fill(w) {
                let remaining = fill_groups(w) - self.fill_consumed;
                if n < remaining {
                    self.fill_consumed += n;
                    return;
                }
                n -= remaining;
                self.word_idx += 1;
                self.fill_consumed = 0;
            } else {
                self.word_idx += 1;
                n -= 1;
            }
        }
    }
}

/// Canonicalizing WAH assembler: collapses pure groups into maximal
/// fills as they are appended.
#[derive(Debug)]
pub struct WahBuilder {
    domain_size: u64,
    words: Vec<u32>,
    cur: u32,
    cur_bits: u64,
}

impl WahBuilder {
    pub fn new(domain_size: u64) -> Self {
        WahBuilder {
            domain_size,
            words: Vec::new(),
            cur: 0,
            cur_bits: 0,
        }
    }

    pub fn push_bits(&mut self, bit: bool, mut count: u64) {
        // Fill the partial group first.
        while count > 0 && self.cur_bits > 0 {
            let take = (PAYLOAD_BITS - self.cur_bits).min(count);
            if bit {
                let mask = ((1u64 << take) - 1) as u32;
                self.cur |= mask << self.cur_bits;
            }
            self.cur_bits += take;
            count -= take;
            if self.cur_bits == PAYLOAD_BITS {
                let lit = self.cur;
                self.cur = 0;
                self.cur_bits = 0;
                self.push_literal_group(lit);
            }
        }
        // Whole groups as a fill.
        if count >= PAYLOAD_BITS {
            self.push_fill_groups(bit, count / PAYLOAD_BITS);
            count %= PAYLOAD_BITS;
        }
        // Leftover partial group.
        if count > 0 {
            if bit {
                self.cur |= ((1u64 << count) - 1) as u32;
            }
            self.cur_bits = count;
        }
    }

    pub fn push_literal_group(&mut self, lit: u32) {
        debug_assert_eq!(self.cur_bits, 0);
        if lit == 0 {
            self.append_fill(false, 1);
        } else if lit == LITERAL_MASK {
            self.append_fill(true, 1);
        } else {
            self.words.push(lit);
        }
    }

    pub fn push_fill_groups(&mut self, bit: bool, groups: u64) {
        debug_assert_eq!(self.cur_bits, 0);
        self.append_fill(bit, groups);
    }

    fn append_fill(&mut self, bit: bool, mut groups: u64) {
        if groups == 0 {
            return;
        }
        if let Some(last) = self.words.last_mut() {
            if is_fill(*last) && fill_value(*last) == bit {
                let merged = (fill_groups(*last) + groups).min(FILL_COUNT_MASK as u64);
                let added = merged - fill_groups(*last);
                *last = FILL_FLAG | (if bit { FILL_VALUE_FLAG } else { 0 }) | merged as u32;
                groups -= added;
            }
        }
        while groups > 0 {
            let take = groups.min(FILL_COUNT_MASK as u64);
            self.words
                .push(FILL_FLAG | (if bit { FILL_VALUE_FLAG } else { 0 }) | take as u32);
            groups -= take;
        }
    }

    pub fn finish(mut self) -> WahRegion {
        if self.cur_bits > 0 {
            // Zero-pad the final partial group.
            let lit = self.cur;
            self.cur = 0;
            self.cur_bits = 0;
            self.push_literal_group(lit);
        }
        WahRegion {
            domain_size: self.domain_size,
            words: self.words,
        }
    }
}

#[derive(Debug)]
pub struct WahEncoder {
    domain_size: u64,
    builder: WahBuilder,
    pos: u64,
}

impl WahEncoder {
    pub fn new(domain_size: u64) -> Self {
        WahEncoder {
            domain_size,
            builder: WahBuilder::new(domain_size),
            pos: 0,
        }
    }

    pub fn insert_bits(&mut self, start: u64, len: u64) {
        debug_assert!(start >= self.pos);
        self.builder.push_bits(false, start - self.pos);
        self.builder.push_bits(true, len);
        self.pos = start + len;
    }

    pub fn finish(mut self) -> WahRegion {
        self.builder.push_bits(false, self.domain_size - self.pos);
        self.builder.finish()
    }
}
