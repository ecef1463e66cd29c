// region/cblq/mod.rs
//
// CBLQ: a hierarchical region encoding over recursive 2^N-way
// partitioning of the (padded) RID space. Each node is one two-bit code:
// 0 = subtree all clear, 1 = all set, 2 = mixed (children stored on the
// next level). Code 3 appears only transiently inside union kernels and
// never escapes the set-op engine. Words hold the 2^N codes of one node,
// low code first; the flat word vector is levels top-down with
// `level_lens` giving the boundaries. The deepest level may instead be
// stored as a dense suffix of 1-bit codes (see semiwords.rs).

mod encode;
mod semiwords;
mod to_bitmap;

pub use encode::CblqEncoder;
pub use semiwords::CblqSemiwords;

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::RegionUniformity;

#[derive(Debug, Clone)]
pub struct CblqRegion<const N: usize> {
    pub(crate) words: Vec<u32>,
    /// level_lens[0] is the topmost level (one word for nonempty domains).
    pub(crate) level_lens: Vec<u64>,
    pub(crate) has_dense_suffix: bool,
    pub(crate) dense_suffix: CblqSemiwords<N>,
    pub(crate) domain_size: u64,
}

const fn word_mask(n: usize) -> u32 {
    (((1u64) << (2 * (1 << n))) - 1) as u32
}

impl<const N: usize> CblqRegion<N> {
    pub const CODES_PER_WORD: usize = 1 << N;
    pub const BITS_PER_WORD: u32 = 2 * (1 << N) as u32;
    pub const ZERO_CODES_WORD: u32 = 0;
    pub const ONE_CODES_WORD: u32 = 0x5555_5555 & word_mask(N);
    pub const TWO_CODES_WORD: u32 = 0xAAAA_AAAA & word_mask(N);
    pub const FULL_SEMIWORD: u32 = CblqSemiwords::<N>::FULL_SEMIWORD;

    /// Number of levels needed to cover `nelem` elements.
    pub fn levels_for(nelem: u64) -> usize {
        let mut levels = 1usize;
        while nelem > 1u64 << (levels * N) {
            levels += 1;
        }
        levels
    }

    pub fn padded_size(nelem: u64) -> u64 {
        1u64 << (Self::levels_for(nelem) * N)
    }

    pub fn new_uniform(domain_size: u64, filled: bool) -> Self {
        let levels = Self::levels_for(domain_size);
        let mut level_lens = vec![0u64; levels];
        level_lens[0] = if domain_size > 0 { 1 } else { 0 };
        CblqRegion {
            words: vec![if filled {
                Self::ONE_CODES_WORD
            } else {
                Self::ZERO_CODES_WORD
            }],
            level_lens,
            has_dense_suffix: false,
            dense_suffix: CblqSemiwords::new(),
            domain_size,
        }
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn num_levels(&self) -> usize {
        self.level_lens.len()
    }

    pub fn size_in_bytes(&self) -> usize {
        let word_bytes = (self.words.len() * Self::BITS_PER_WORD as usize).div_ceil(8);
        if self.has_dense_suffix {
            word_bytes + self.dense_suffix.size_in_bytes()
        } else {
            word_bytes
        }
    }

    pub fn is_suffix_empty(&self) -> bool {
        *self.level_lens.last().unwrap_or(&0) == 0 && self.dense_suffix.is_empty()
    }

    pub fn suffix_density(&self, preferred: bool) -> bool {
        if self.is_suffix_empty() {
            preferred
        } else {
            self.has_dense_suffix
        }
    }

    /// Decide the shared dense-suffix density of a set of operands:
    /// empty suffixes defer, one non-empty density wins, conflicting
    /// non-empty densities are an operand-incompatibility error.
    pub fn deduce_common_suffix_density(
        operands: &[&CblqRegion<N>],
    ) -> Result<bool, BinIdxError> {
        let mut current: Option<bool> = None;
        for cblq in operands {
            if cblq.is_suffix_empty() {
                continue;
            }
            match current {
                None => current = Some(cblq.has_dense_suffix),
                Some(density) => {
                    if cblq.has_dense_suffix != density {
                        return Err(BinIdxError::DenseSuffixMismatch);
                    }
                }
            }
        }
        Ok(current.unwrap_or(false))
    }

    fn is_single_word(&self, expected: u32) -> bool {
        if self.words.len() != 1 || self.words[0] != expected {
            return false;
        }
        let mut lens = self.level_lens.iter();
        if lens.next() != Some(&1) {
            return false;
        }
        if lens.any(|&l| l != 0) {
            return false;
        }
        !self.has_dense_suffix || self.dense_suffix.is_empty()
    }

    pub fn is_empty_region(&self) -> bool {
        self.is_single_word(Self::ZERO_CODES_WORD)
    }

    pub fn is_filled_region(&self) -> bool {
        self.is_single_word(Self::ONE_CODES_WORD)
    }

    pub fn uniformity(&self) -> RegionUniformity {
        if self.is_empty_region() {
            RegionUniformity::Empty
        } else if self.is_filled_region() {
            RegionUniformity::Filled
        } else {
            // Non-canonical uniform trees still count.
            let count = self.element_count();
            if count == 0 {
                RegionUniformity::Empty
            } else if count == self.domain_size {
                RegionUniformity::Filled
            } else {
                RegionUniformity::Mixed
            }
        }
    }

    /// Breadth-first traversal visiting every maximal pure block whose
    /// code equals `visit_code` (0 or 1) as `(block_size, block_offset)`.
    /// Blocks may overhang the logical domain; callers clamp.
    pub(crate) fn traverse_blocks(&self, visit_code: u32, mut visit: impl FnMut(u64, u64)) {
        let levels = self.level_lens.len();
        if levels == 0 {
            return;
        }
        let non_dense = if self.has_dense_suffix {
            levels - 1
        } else {
            levels
        };

        let mut queue: Vec<u64> = vec![0];
        let mut next_queue: Vec<u64> = Vec::new();
        let mut word_idx = 0usize;

        for level in 0..non_dense {
            let level_len = self.level_lens[level] as usize;
            let child_size = 1u64 << ((levels - 1 - level) * N);
            next_queue.clear();
            for base in queue.iter().take(level_len) {
                let word = self.words[word_idx];
                word_idx += 1;
                for i in 0..Self::CODES_PER_WORD {
                    let code = (word >> (2 * i)) & 0b11;
                    let off = base + (i as u64) * child_size;
                    if code == visit_code {
                        visit(child_size, off);
                    } else if code == 0b10 {
                        next_queue.push(off);
                    }
                }
            }
            std::mem::swap(&mut queue, &mut next_queue);
        }

        if self.has_dense_suffix {
            let want_set = visit_code == 1;
            for (pos, base) in queue.iter().enumerate() {
                let semiword = self.dense_suffix.get(pos as u64);
                for i in 0..Self::CODES_PER_WORD {
                    if ((semiword >> i) & 1 == 1) == want_set {
                        visit(1, base + i as u64);
                    }
                }
            }
        }
    }

    pub fn element_count(&self) -> u64 {
        let domain = self.domain_size;
        let mut count = 0u64;
        self.traverse_blocks(1, |size, off| {
            let end = (off + size).min(domain);
            if end > off {
                count += end - off;
            }
        });
        count
    }

    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        let domain = self.domain_size;
        let mut out = Vec::new();
        self.traverse_blocks(1, |size, off| {
            let end = (off + size).min(domain);
            if end > off {
                out.extend((off + offset)..(end + offset));
            }
        });
        out.sort_unstable();
        out
    }

    /// Bottom-up removal of uniform subtrees: any word that is all
    /// 0-codes (resp. 1-codes) after child patching is deleted and its
    /// parent code rewritten to 0 (resp. 1). Idempotent.
    pub fn compact(&mut self) {
        // Single-level CBLQs (including single-level dense-suffix ones)
        // have nothing to upmerge.
        if self.level_lens.len() < 2 {
            return;
        }

        let levels = self.level_lens.len();
        let non_dense = if self.has_dense_suffix {
            levels - 1
        } else {
            levels
        };

        // (child word position, child became all-ones) pairs, ascending.
        let mut upmerges: Vec<(u64, bool)> = Vec::new();

        if self.has_dense_suffix {
            let mut new_dense = CblqSemiwords::new();
            for pos in 0..self.dense_suffix.num_semiwords() {
                let semiword = self.dense_suffix.get(pos);
                if semiword == 0 {
                    upmerges.push((pos, false));
                } else if semiword == Self::FULL_SEMIWORD {
                    upmerges.push((pos, true));
                } else {
                    new_dense.push(semiword);
                }
            }
            self.dense_suffix = new_dense;
        }

        let mut level_starts = vec![0usize; non_dense];
        for level in 1..non_dense {
            level_starts[level] = level_starts[level - 1] + self.level_lens[level - 1] as usize;
        }

        let mut new_level_words: Vec<Vec<u32>> = vec![Vec::new(); non_dense];
        for level in (0..non_dense).rev() {
            let start = level_starts[level];
            let len = self.level_lens[level] as usize;
            let child_upmerges = std::mem::take(&mut upmerges);
            let mut um_iter = child_upmerges.iter().peekable();
            let mut child_pos = 0u64;

            for word_pos in 0..len {
                let mut word = self.words[start + word_pos];
                if word & Self::TWO_CODES_WORD != 0 {
                    for i in 0..Self::CODES_PER_WORD {
                        if (word >> (2 * i)) & 0b10 != 0 {
                            if let Some(&&(pos, is_one)) = um_iter.peek() {
                                if pos == child_pos {
                                    let patch = if is_one { 0b11u32 } else { 0b10u32 };
                                    word ^= patch << (2 * i);
                                    um_iter.next();
                                }
                            }
                            child_pos += 1;
                        }
                    }
                }
                if word == Self::ZERO_CODES_WORD {
                    upmerges.push((word_pos as u64, false));
                } else if word == Self::ONE_CODES_WORD {
                    upmerges.push((word_pos as u64, true));
                } else {
                    new_level_words[level].push(word);
                }
            }
            debug_assert!(um_iter.peek().is_none());
        }

        let mut words = Vec::new();
        for (level, level_words) in new_level_words.iter().enumerate() {
            self.level_lens[level] = level_words.len() as u64;
            words.extend_from_slice(level_words);
        }
        if self.has_dense_suffix {
            self.level_lens[levels - 1] = 0;
        }

        if words.is_empty() {
            // The whole tree was uniform; keep the canonical single word.
            let is_one = upmerges.first().map(|&(_, one)| one).unwrap_or(false);
            for l in self.level_lens.iter_mut() {
                *l = 0;
            }
            self.level_lens[0] = 1;
            words.push(if is_one {
                Self::ONE_CODES_WORD
            } else {
                Self::ZERO_CODES_WORD
            });
            self.dense_suffix.clear();
        }
        self.words = words;
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        let word_bytes = (Self::BITS_PER_WORD / 8) as usize;
        let mut packed = Vec::with_capacity(self.words.len() * word_bytes);
        for &word in &self.words {
            packed.extend_from_slice(&word.to_le_bytes()[..word_bytes]);
        }
        let payload = CblqPayload {
            domain_size: self.domain_size,
            has_dense_suffix: self.has_dense_suffix,
            level_lens: self.level_lens.clone(),
            words: packed,
            num_semiwords: self.dense_suffix.num_semiwords(),
            semiwords: if self.has_dense_suffix {
                self.dense_suffix.to_min_bytes()
            } else {
                Vec::new()
            },
        };
        bincode::serialize_into(w, &payload)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self, BinIdxError> {
        let payload: CblqPayload = bincode::deserialize_from(r)?;
        let word_bytes = (Self::BITS_PER_WORD / 8) as usize;
        if payload.words.len() % word_bytes != 0 {
            return Err(BinIdxError::CorruptFile(
                "CBLQ word payload length not word-aligned".into(),
            ));
        }
        let words = payload
            .words
            .chunks_exact(word_bytes)
            .map(|chunk| {
                let mut buf = [0u8; 4];
                buf[..word_bytes].copy_from_slice(chunk);
                u32::from_le_bytes(buf)
            })
            .collect();
        let dense_suffix = if payload.has_dense_suffix {
            CblqSemiwords::from_min_bytes(payload.num_semiwords, &payload.semiwords)
        } else {
            CblqSemiwords::new()
        };
        Ok(CblqRegion {
            words,
            level_lens: payload.level_lens,
            has_dense_suffix: payload.has_dense_suffix,
            dense_suffix,
            domain_size: payload.domain_size,
        })
    }
}

impl<const N: usize> PartialEq for CblqRegion<N> {
    fn eq(&self, other: &Self) -> bool {
        self.domain_size == other.domain_size
            && self.has_dense_suffix == other.has_dense_suffix
            && self.level_lens == other.level_lens
            && self.words == other.words
            && (!self.has_dense_suffix || self.dense_suffix == other.dense_suffix)
    }
}

#[derive(Serialize, Deserialize)]
struct CblqPayload {
    domain_size: u64,
    has_dense_suffix: bool,
    level_lens: Vec<u64>,
    words: Vec<u8>,
    num_semiwords: u64,
    semiwords: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(CblqRegion::<2>::CODES_PER_WORD, 4);
        assert_eq!(CblqRegion::<2>::ONE_CODES_WORD, 0b01010101);
        assert_eq!(CblqRegion::<2>::TWO_CODES_WORD, 0b10101010);
        assert_eq!(CblqRegion::<3>::BITS_PER_WORD, 16);
        assert_eq!(CblqRegion::<4>::ONE_CODES_WORD, 0x5555_5555);
    }

    #[test]
    fn test_levels_for() {
        assert_eq!(CblqRegion::<2>::levels_for(1), 1);
        assert_eq!(CblqRegion::<2>::levels_for(4), 1);
        assert_eq!(CblqRegion::<2>::levels_for(5), 2);
        assert_eq!(CblqRegion::<2>::levels_for(16), 2);
        assert_eq!(CblqRegion::<2>::levels_for(17), 3);
        assert_eq!(CblqRegion::<3>::levels_for(64), 2);
    }

    #[test]
    fn test_uniform_regions() {
        let empty: CblqRegion<2> = CblqRegion::new_uniform(100, false);
        assert!(empty.is_empty_region());
        assert_eq!(empty.element_count(), 0);
        let full: CblqRegion<2> = CblqRegion::new_uniform(100, true);
        assert!(full.is_filled_region());
        assert_eq!(full.element_count(), 100);
        assert_eq!(full.to_rids(0).len(), 100);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let rids: Vec<u64> = vec![0, 1, 2, 3, 7, 8, 9, 10, 12, 13, 15];
        for dense in [false, true] {
            let mut enc: CblqEncoder<2> = CblqEncoder::new(16, dense);
            enc.insert_bits(0, 4);
            enc.insert_bits(7, 4);
            enc.insert_bits(12, 2);
            enc.insert_bits(15, 1);
            let region = enc.finish();
            assert_eq!(region.to_rids(0), rids, "dense={}", dense);
            assert_eq!(region.element_count(), rids.len() as u64);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        for dense in [false, true] {
            let mut enc: CblqEncoder<3> = CblqEncoder::new(1000, dense);
            enc.insert_bits(10, 50);
            enc.insert_bits(512, 100);
            let region = enc.finish();
            let mut buf = Vec::new();
            region.save(&mut buf).unwrap();
            let loaded: CblqRegion<3> = CblqRegion::load(&mut buf.as_slice()).unwrap();
            assert_eq!(loaded, region);
        }
    }

    #[test]
    fn test_compact_idempotent() {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(64, false);
        enc.insert_bits(0, 32);
        enc.insert_bits(40, 3);
        let mut region = enc.finish();
        let rids = region.to_rids(0);
        region.compact();
        assert_eq!(region.to_rids(0), rids);
        let once = region.clone();
        region.compact();
        assert_eq!(region, once);
    }

    #[test]
    fn test_compact_collapses_uniform_tree() {
        // Built from raw words: a 2-level tree in which every leaf is
        // set, written without upmerging.
        let mut region: CblqRegion<2> = CblqRegion {
            words: vec![
                CblqRegion::<2>::TWO_CODES_WORD,
                CblqRegion::<2>::ONE_CODES_WORD,
                CblqRegion::<2>::ONE_CODES_WORD,
                CblqRegion::<2>::ONE_CODES_WORD,
                CblqRegion::<2>::ONE_CODES_WORD,
            ],
            level_lens: vec![1, 4],
            has_dense_suffix: false,
            dense_suffix: CblqSemiwords::new(),
            domain_size: 16,
        };
        region.compact();
        assert!(region.is_filled_region());
    }

    #[test]
    fn test_suffix_density_deduction() {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(16, true);
        enc.insert_bits(1, 3);
        let dense = enc.finish();
        let mut enc: CblqEncoder<2> = CblqEncoder::new(16, false);
        enc.insert_bits(1, 3);
        let plain = enc.finish();
        let empty: CblqRegion<2> = CblqRegion::new_uniform(16, false);

        assert!(CblqRegion::deduce_common_suffix_density(&[&dense, &dense]).unwrap());
        assert!(!CblqRegion::deduce_common_suffix_density(&[&plain, &plain]).unwrap());
        assert!(CblqRegion::deduce_common_suffix_density(&[&empty, &dense]).unwrap());
        assert!(!CblqRegion::deduce_common_suffix_density(&[&empty, &empty]).unwrap());
        assert!(CblqRegion::deduce_common_suffix_density(&[&dense, &plain]).is_err());
    }
}
