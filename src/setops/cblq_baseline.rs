// setops/cblq_baseline.rs
//
// The reference CBLQ set-op implementation: traverse both operands in
// lockstep, level by level, looking each (left code, right code) pair up
// in a static table that yields the output code and enqueues follow-up
// work (copy/delete/complement a single operand's subtree, or recurse
// the binary op) for the next level. N-ary is a left-associative fold.

use std::collections::VecDeque;

use crate::error::BinIdxError;
use crate::region::cblq::CblqRegion;
use crate::setops::cblq_tables::{binary_table, initial_binary_action, unary_table, CodeAction};
use crate::setops::SetOp;

/// 0 -> 1, 1 -> 0, 2 -> 2 across every word, plus a bit-flip of the
/// dense suffix.
pub fn complement<const N: usize>(region: &CblqRegion<N>) -> CblqRegion<N> {
    let mut out = region.clone();
    for word in &mut out.words {
        *word = *word
            ^ ((*word & CblqRegion::<N>::TWO_CODES_WORD) >> 1)
            ^ CblqRegion::<N>::ONE_CODES_WORD;
    }
    if out.has_dense_suffix {
        let full = CblqRegion::<N>::FULL_SEMIWORD;
        for pos in 0..out.dense_suffix.num_semiwords() {
            let semiword = out.dense_suffix.get(pos);
            out.dense_suffix.set(pos, semiword ^ full);
        }
    }
    out
}

struct WordCursor<'a> {
    words: &'a [u32],
    idx: usize,
}

impl<'a> WordCursor<'a> {
    fn next(&mut self) -> u32 {
        let w = self.words[self.idx];
        self.idx += 1;
        w
    }
}

fn apply_unary<const N: usize>(
    action: CodeAction,
    word: u32,
    queue: &mut VecDeque<CodeAction>,
) -> u32 {
    let table = unary_table(action);
    let mut out = 0u32;
    for i in 0..CblqRegion::<N>::CODES_PER_WORD {
        let code = ((word >> (2 * i)) & 0b11) as usize;
        let entry = table[code];
        out |= entry.output << (2 * i);
        if entry.action != CodeAction::NoOp {
            queue.push_back(entry.action);
        }
    }
    out
}

fn apply_binary<const N: usize>(
    action: CodeAction,
    left_word: u32,
    right_word: u32,
    queue: &mut VecDeque<CodeAction>,
) -> u32 {
    let table = binary_table(action);
    let mut out = 0u32;
    for i in 0..CblqRegion::<N>::CODES_PER_WORD {
        let left = ((left_word >> (2 * i)) & 0b11) as usize;
        let right = ((right_word >> (2 * i)) & 0b11) as usize;
        let entry = table[left][right];
        out |= entry.output << (2 * i);
        if entry.action != CodeAction::NoOp {
            queue.push_back(entry.action);
        }
    }
    out
}

pub fn binary<const N: usize>(
    left: &CblqRegion<N>,
    right: &CblqRegion<N>,
    op: SetOp,
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

    let mut out = CblqRegion::<N> {
        words: Vec::new(),
        level_lens: vec![0; levels],
        has_dense_suffix: has_dense,
        dense_suffix: Default::default(),
        domain_size: left.domain_size(),
    };

    let mut left_cur = WordCursor {
        words: &left.words,
        idx: 0,
    };
    let mut right_cur = WordCursor {
        words: &right.words,
        idx: 0,
    };

    let mut queue: VecDeque<CodeAction> = VecDeque::new();
    queue.push_back(initial_binary_action(op));

    for level in 0..non_dense_levels {
        let level_len = queue.len();
        let words_before = out.words.len();

        for _ in 0..level_len {
            let action = queue.pop_front().unwrap_or_else(|| unreachable!());
            match action {
                CodeAction::NoOp => {}
                CodeAction::DeleteL | CodeAction::CopyL | CodeAction::ComplementL => {
                    let word = apply_unary::<N>(action, left_cur.next(), &mut queue);
                    if action != CodeAction::DeleteL {
                        out.words.push(word);
                    }
                }
                CodeAction::DeleteR | CodeAction::CopyR | CodeAction::ComplementR => {
                    let word = apply_unary::<N>(action, right_cur.next(), &mut queue);
                    if action != CodeAction::DeleteR {
                        out.words.push(word);
                    }
                }
                CodeAction::Union
                | CodeAction::Intersect
                | CodeAction::Difference
                | CodeAction::SymDifference => {
                    let word =
                        apply_binary::<N>(action, left_cur.next(), right_cur.next(), &mut queue);
                    out.words.push(word);
                }
            }
        }

        out.level_lens[level] = (out.words.len() - words_before) as u64;
    }

    debug_assert_eq!(left_cur.idx, left.words.len());
    debug_assert_eq!(right_cur.idx, right.words.len());

    if has_dense {
        out.level_lens[levels - 1] = 0;

        let full = CblqRegion::<N>::FULL_SEMIWORD;
        let mut left_pos = 0u64;
        let mut right_pos = 0u64;
        let mut take_left = || {
            let v = left.dense_suffix.get(left_pos);
            left_pos += 1;
            v
        };
        let mut take_right = || {
            let v = right.dense_suffix.get(right_pos);
            right_pos += 1;
            v
        };

        while let Some(action) = queue.pop_front() {
            match action {
                CodeAction::NoOp => {}
                CodeAction::DeleteL => {
                    take_left();
                }
                CodeAction::DeleteR => {
                    take_right();
                }
                CodeAction::CopyL => {
                    let v = take_left();
                    out.dense_suffix.push(v);
                }
                CodeAction::CopyR => {
                    let v = take_right();
                    out.dense_suffix.push(v);
                }
                CodeAction::ComplementL => {
                    let v = take_left();
                    out.dense_suffix.push(v ^ full);
                }
                CodeAction::ComplementR => {
                    let v = take_right();
                    out.dense_suffix.push(v ^ full);
                }
                CodeAction::Union => {
                    let v = take_left() | take_right();
                    out.dense_suffix.push(v);
                }
                CodeAction::Intersect => {
                    let v = take_left() & take_right();
                    out.dense_suffix.push(v);
                }
                CodeAction::Difference => {
                    let v = take_left() & (take_right() ^ full);
                    out.dense_suffix.push(v);
                }
                CodeAction::SymDifference => {
                    let v = take_left() ^ take_right();
                    out.dense_suffix.push(v);
                }
            }
        }

        debug_assert_eq!(left_pos, left.dense_suffix.num_semiwords());
        debug_assert_eq!(right_pos, right.dense_suffix.num_semiwords());
    } else {
        debug_assert!(queue.is_empty());
    }

    Ok(out)
}

/// Left-associative fold; compaction is the caller's concern.
pub fn nary<const N: usize>(
    operands: &[&CblqRegion<N>],
    op: SetOp,
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    let mut acc = binary(operands[0], operands[1], op)?;
    for next in &operands[2..] {
        acc = binary(&acc, next, op)?;
    }
    Ok(acc)
}
