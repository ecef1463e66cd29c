// setops/cblq_fast.rs
//
// Word-at-a-time CBLQ union. The output word is (L | R) with the
// transient 3-codes (1 union 2) masked back to 1-codes:
//     w & ~((w & ONE_CODES) << 1)
// Follow-up work is queued as action blocks (runs of whole-subtree
// copies/deletes on one operand, or single recursive unions), and the
// dense suffix is finished with a bit-level copy/skip pass over the
// packed semiword blocks.

use crate::error::BinIdxError;
use crate::region::cblq::{CblqRegion, CblqSemiwords};
use crate::setops::SetOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnionAction {
    CopyR,
    DeleteR,
    Union,
    DeleteL,
    CopyL,
}

// 0|2 -> copy right, 1|2 -> delete right, 2|2 -> recurse,
// 2|1 -> delete left, 2|0 -> copy left.
fn action_from_code_diff(left_code: u32, right_code: u32) -> UnionAction {
    match left_code as i32 - right_code as i32 {
        -2 => UnionAction::CopyR,
        -1 => UnionAction::DeleteR,
        0 => UnionAction::Union,
        1 => UnionAction::DeleteL,
        2 => UnionAction::CopyL,
        _ => unreachable!("codes are 0..=2"),
    }
}

#[derive(Debug, Clone, Copy)]
struct ActionBlock {
    action: UnionAction,
    count: u64,
}

fn count_two_codes<const N: usize>(word: u32) -> u64 {
    (word & CblqRegion::<N>::TWO_CODES_WORD).count_ones() as u64
}

/// OR-copy `nbits` bits from `src` starting at `src_pos` into `dst`
/// starting at `dst_pos`, both positions in bits over u64 blocks.
fn copy_bits(src: &[u64], mut src_pos: u64, dst: &mut Vec<u64>, mut dst_pos: u64, mut nbits: u64) {
    while nbits > 0 {
        let src_block = (src_pos / 64) as usize;
        let src_shift = src_pos % 64;
        let dst_block = (dst_pos / 64) as usize;
        let dst_shift = dst_pos % 64;

        let take = nbits.min(64 - src_shift).min(64 - dst_shift);
        let mask = if take == 64 { u64::MAX } else { (1u64 << take) - 1 };
        let chunk = (src.get(src_block).copied().unwrap_or(0) >> src_shift) & mask;

        while dst.len() <= dst_block {
            dst.push(0);
        }
        dst[dst_block] |= chunk << dst_shift;

        src_pos += take;
        dst_pos += take;
        nbits -= take;
    }
}

pub fn binary_union<const N: usize>(
    left: &CblqRegion<N>,
    right: &CblqRegion<N>,
) -> Result<CblqRegion<N>, BinIdxError> {
    if left.domain_size() != right.domain_size() {
        return Err(BinIdxError::DomainSizeMismatch {
            left: left.domain_size(),
            right: right.domain_size(),
        });
    }

    let has_dense = CblqRegion::deduce_common_suffix_density(&[left, right])?;
    let levels = left.num_levels();
    let non_dense_levels = if has_dense { levels - 1 } else { levels };

    let one_codes = CblqRegion::<N>::ONE_CODES_WORD;
    let codes_per_word = CblqRegion::<N>::CODES_PER_WORD;

    let mut out_words: Vec<u32> = Vec::with_capacity(left.words.len() + right.words.len());
    let mut level_lens = vec![0u64; levels];

    let mut left_idx = 0usize;
    let mut right_idx = 0usize;

    let mut queue: Vec<ActionBlock> = vec![ActionBlock {
        action: UnionAction::Union,
        count: 1,
    }];
    let mut next_queue: Vec<ActionBlock> = Vec::new();

    for level in 0..non_dense_levels {
        next_queue.clear();
        let words_before = out_words.len();

        for block in &queue {
            match block.action {
                UnionAction::Union => {
                    debug_assert_eq!(block.count, 1);
                    let lw = left.words[left_idx];
                    let rw = right.words[right_idx];
                    left_idx += 1;
                    right_idx += 1;

                    let or_word = lw | rw;
                    out_words.push(or_word & !((or_word & one_codes) << 1));

                    for i in 0..codes_per_word {
                        if (or_word >> (2 * i)) & 0b10 != 0 {
                            let lc = (lw >> (2 * i)) & 0b11;
                            let rc = (rw >> (2 * i)) & 0b11;
                            next_queue.push(ActionBlock {
                                action: action_from_code_diff(lc, rc),
                                count: 1,
                            });
                        }
                    }
                }
                UnionAction::CopyL | UnionAction::DeleteL => {
                    let mut children = 0u64;
                    for _ in 0..block.count {
                        let word = left.words[left_idx];
                        left_idx += 1;
                        if block.action == UnionAction::CopyL {
                            out_words.push(word);
                        }
                        children += count_two_codes::<N>(word);
                    }
                    if children > 0 {
                        next_queue.push(ActionBlock {
                            action: block.action,
                            count: children,
                        });
                    }
                }
                UnionAction::CopyR | UnionAction::DeleteR => {
                    let mut children = 0u64;
                    for _ in 0..block.count {
                        let word = right.words[right_idx];
                        right_idx += 1;
                        if block.action == UnionAction::CopyR {
                            out_words.push(word);
                        }
                        children += count_two_codes::<N>(word);
                    }
                    if children > 0 {
                        next_queue.push(ActionBlock {
                            action: block.action,
                            count: children,
                        });
                    }
                }
            }
        }

        level_lens[level] = (out_words.len() - words_before) as u64;
        std::mem::swap(&mut queue, &mut next_queue);
    }

    debug_assert_eq!(left_idx, left.words.len());
    debug_assert_eq!(right_idx, right.words.len());

    let mut out = CblqRegion::<N> {
        words: out_words,
        level_lens,
        has_dense_suffix: has_dense,
        dense_suffix: CblqSemiwords::new(),
        domain_size: left.domain_size(),
    };

    if has_dense {
        out.level_lens[levels - 1] = 0;

        let semiword_bits = CblqSemiwords::<N>::SEMIWORD_BITS;
        let left_blocks = left.dense_suffix.blocks();
        let right_blocks = right.dense_suffix.blocks();
        let mut dst_blocks: Vec<u64> = Vec::new();
        let mut left_pos = 0u64;
        let mut right_pos = 0u64;
        let mut dst_pos = 0u64;

        for block in &queue {
            let bits = block.count * semiword_bits;
            match block.action {
                UnionAction::Union => {
                    // OR both sides into the same destination bits.
                    copy_bits(left_blocks, left_pos, &mut dst_blocks, dst_pos, bits);
                    copy_bits(right_blocks, right_pos, &mut dst_blocks, dst_pos, bits);
                    left_pos += bits;
                    right_pos += bits;
                    dst_pos += bits;
                }
                UnionAction::CopyL => {
                    copy_bits(left_blocks, left_pos, &mut dst_blocks, dst_pos, bits);
                    left_pos += bits;
                    dst_pos += bits;
                }
                UnionAction::CopyR => {
                    copy_bits(right_blocks, right_pos, &mut dst_blocks, dst_pos, bits);
                    right_pos += bits;
                    dst_pos += bits;
                }
                UnionAction::DeleteL => left_pos += bits,
                UnionAction::DeleteR => right_pos += bits,
            }
        }

        debug_assert_eq!(left_pos, left.dense_suffix.num_semiwords() * semiword_bits);
        debug_assert_eq!(right_pos, right.dense_suffix.num_semiwords() * semiword_bits);

        let num_semiwords = dst_pos / semiword_bits;
        let nbytes = (dst_pos as usize).div_ceil(8);
        let mut bytes = Vec::with_capacity(nbytes);
        'outer: for block in &dst_blocks {
            for byte in block.to_le_bytes() {
                if bytes.len() == nbytes {
                    break 'outer;
                }
                bytes.push(byte);
            }
        }
        while bytes.len() < nbytes {
            bytes.push(0);
        }
        out.dense_suffix = CblqSemiwords::from_min_bytes(num_semiwords, &bytes);
    } else {
        debug_assert!(queue.is_empty());
    }

    Ok(out)
}

/// Left-associative union fold over the fast binary kernel.
pub fn nary_union<const N: usize>(
    operands: &[&CblqRegion<N>],
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    let mut acc = binary_union(operands[0], operands[1])?;
    for next in &operands[2..] {
        acc = binary_union(&acc, next)?;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::cblq::CblqEncoder;
    use crate::setops::cblq_baseline;

    fn cblq(domain: u64, rids: &[u64], dense: bool) -> CblqRegion<2> {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(domain, dense);
        for &r in rids {
            enc.insert_bits(r, 1);
        }
        enc.finish()
    }

    #[test]
    fn test_matches_baseline_union() {
        for dense in [false, true] {
            let a = cblq(64, &[0, 1, 2, 3, 10, 31, 32], dense);
            let b = cblq(64, &[2, 3, 4, 31, 40, 41, 63], dense);
            let mut fast = binary_union(&a, &b).unwrap();
            let mut base = cblq_baseline::binary(&a, &b, SetOp::Union).unwrap();
            fast.compact();
            base.compact();
            assert_eq!(fast, base, "dense={}", dense);
            assert_eq!(
                fast.to_rids(0),
                vec![0, 1, 2, 3, 4, 10, 31, 32, 40, 41, 63]
            );
        }
    }

    #[test]
    fn test_disjoint_subtree_union() {
        // One operand entirely inside a subtree the other leaves clear:
        // exercises the 3-code fixup (1 union 2).
        for dense in [false, true] {
            let a = cblq(64, &(0..16).collect::<Vec<u64>>(), dense);
            let b = cblq(64, &[1, 17], dense);
            let out = binary_union(&a, &b).unwrap();
            let mut expect: Vec<u64> = (0..16).collect();
            expect.push(17);
            assert_eq!(out.to_rids(0), expect);
            // No 3-codes in the output.
            for &w in &out.words {
                for i in 0..CblqRegion::<2>::CODES_PER_WORD {
                    assert_ne!((w >> (2 * i)) & 0b11, 0b11);
                }
            }
        }
    }

    #[test]
    fn test_nary_fold() {
        let a = cblq(32, &[0], false);
        let b = cblq(32, &[15], false);
        let c = cblq(32, &[31], false);
        let out = nary_union(&[&a, &b, &c]).unwrap();
        assert_eq!(out.to_rids(0), vec![0, 15, 31]);
    }
}
