// region/cblq/encode.rs
//
// Streaming CBLQ construction. Bits arrive as runs (insert_bits); each
// run is appended to the leaf layer and overflowing words carry upward:
// a full pure word becomes a single pure code in its parent, a full
// mixed word becomes a 2-code. Only non-pure words are materialized
// (pure ones are represented entirely by their parent code), except at
// the top layer, which always keeps its word.

use super::semiwords::CblqSemiwords;
use super::CblqRegion;

#[derive(Debug)]
pub struct CblqEncoder<const N: usize> {
    nlayers: usize,
    nelem: u64,
    padded: u64,
    encode_dense_suffix: bool,
    /// layer_words[0] is the leaf layer; reversed on output.
    layer_words: Vec<Vec<u32>>,
    dense_suffix: CblqSemiwords<N>,
    cur_words: Vec<u32>,
    cur_word_lens: Vec<u64>,
    position: u64,
}

impl<const N: usize> CblqEncoder<N> {
    pub fn new(total_elements: u64, encode_dense_suffix: bool) -> Self {
        let nlayers = CblqRegion::<N>::levels_for(total_elements);
        CblqEncoder {
            nlayers,
            nelem: total_elements,
            padded: 1u64 << (nlayers * N),
            encode_dense_suffix,
            layer_words: vec![Vec::new(); nlayers],
            dense_suffix: CblqSemiwords::new(),
            cur_words: vec![0; nlayers],
            cur_word_lens: vec![0; nlayers],
            position: 0,
        }
    }

    /// Append a run of set bits at [start, start + len). Runs must be
    /// disjoint and arrive in increasing position order.
    pub fn insert_bits(&mut self, start: u64, len: u64) {
        debug_assert!(start >= self.position);
        self.push_bits(start - self.position, false);
        self.push_bits(len, true);
        self.position = start + len;
    }

    fn push_bits(&mut self, mut count: u64, bitval: bool) {
        const MIXED_CODE: u32 = 0b10;
        if count == 0 {
            return;
        }

        let codes_per_word = CblqRegion::<N>::CODES_PER_WORD as u64;
        let one_codes = CblqRegion::<N>::ONE_CODES_WORD;
        // Codes live in the low BITS_PER_WORD bits; remainder fills below
        // shift past that and must be masked back off.
        let word_mask = CblqRegion::<N>::ONE_CODES_WORD | CblqRegion::<N>::TWO_CODES_WORD;
        let set_code: u32 = if bitval { 0b01 } else { 0b00 };
        let set_mask: u32 = if bitval { one_codes } else { 0 };

        let mut carry = false;
        let mut carry_pure_word = false;
        for layer in 0..self.nlayers {
            let mut cur_word = self.cur_words[layer];
            let mut cur_word_len = self.cur_word_lens[layer];

            if layer > 0 {
                // Append the carry code from the layer below first.
                let code = if carry_pure_word { set_code } else { MIXED_CODE };
                cur_word |= code << (cur_word_len * 2);
                cur_word_len += 1;
                if cur_word_len < codes_per_word {
                    // Fill the remainder with the set value; trimmed below.
                    cur_word |= set_mask << (cur_word_len * 2);
                }
            } else {
                cur_word |= set_mask << (cur_word_len * 2);
            }
            cur_word &= word_mask;

            cur_word_len += count;

            if cur_word_len >= codes_per_word {
                carry = true;
                // A homogeneous word can only match the value being
                // pushed: at least one code of this push or carry is in it.
                carry_pure_word = cur_word == set_mask;

                if !carry_pure_word || layer == self.nlayers - 1 {
                    if self.encode_dense_suffix && layer == 0 {
                        self.dense_suffix.push_fullword(cur_word);
                    } else {
                        self.layer_words[layer].push(cur_word);
                    }
                }

                cur_word = set_mask;
                count = cur_word_len / codes_per_word - 1;
                cur_word_len %= codes_per_word;
            } else {
                carry = false;
            }

            // Trim codes past the current length (cur_word_len < codes_per_word here).
            cur_word &= (1u32 << (cur_word_len * 2)).wrapping_sub(1);

            self.cur_words[layer] = cur_word;
            self.cur_word_lens[layer] = cur_word_len;

            if !carry {
                break;
            }
        }
    }

    pub fn finish(mut self) -> CblqRegion<N> {
        // Zero-fill to the padded power-of-2^N domain; every layer then
        // flushes exactly.
        self.push_bits(self.padded - self.position, false);
        debug_assert!(self.cur_word_lens.iter().all(|&l| l == 0));

        let mut words = Vec::new();
        let mut level_lens = Vec::with_capacity(self.nlayers);
        for layer in (0..self.nlayers).rev() {
            words.extend_from_slice(&self.layer_words[layer]);
            level_lens.push(self.layer_words[layer].len() as u64);
        }

        CblqRegion {
            words,
            level_lens,
            has_dense_suffix: self.encode_dense_suffix,
            dense_suffix: self.dense_suffix,
            domain_size: self.nelem,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_region_is_canonical() {
        let enc: CblqEncoder<2> = CblqEncoder::new(16, false);
        let region = enc.finish();
        assert!(region.is_empty_region());
    }

    #[test]
    fn test_full_region_is_canonical() {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(16, false);
        enc.insert_bits(0, 16);
        let region = enc.finish();
        assert!(region.is_filled_region());
    }

    #[test]
    fn test_unpadded_domain() {
        // Domain 10 pads to 16; the padding stays clear.
        let mut enc: CblqEncoder<2> = CblqEncoder::new(10, false);
        enc.insert_bits(8, 2);
        let region = enc.finish();
        assert_eq!(region.to_rids(0), vec![8, 9]);
        assert_eq!(region.element_count(), 2);
    }

    #[test]
    fn test_3d_and_4d_round_trip() {
        let rids: Vec<u64> = vec![0, 63, 64, 100, 101, 102, 511];
        let mut enc: CblqEncoder<3> = CblqEncoder::new(512, false);
        for &r in &rids {
            enc.insert_bits(r, 1);
        }
        // Runs of width 1 are legal but coalescing is fine too.
        let region = enc.finish();
        let mut expect = rids.clone();
        expect.dedup();
        assert_eq!(region.to_rids(0), expect);

        let mut enc: CblqEncoder<4> = CblqEncoder::new(4096, true);
        enc.insert_bits(100, 200);
        let region = enc.finish();
        assert_eq!(region.to_rids(0), (100..300).collect::<Vec<_>>());
    }

    #[test]
    fn test_dense_suffix_only_stores_mixed_leaves() {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(64, true);
        enc.insert_bits(0, 16); // four fully-set leaf words: upmerged
        enc.insert_bits(17, 2); // one mixed leaf word
        let region = enc.finish();
        assert!(region.has_dense_suffix);
        assert_eq!(region.dense_suffix.num_semiwords(), 1);
        assert_eq!(region.to_rids(0), {
            let mut v: Vec<u64> = (0..16).collect();
            v.extend([17, 18]);
            v
        });
    }
}
