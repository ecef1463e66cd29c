// setops/cblq_nary.rs
//
// Level-by-level N-ary CBLQ set operations. Each output word slot
// carries an (action, code) state; every participating operand's code
// transitions the state through the N-ary action table, and operands
// contributing a 2-code re-enlist for the slot's children.
//
// `nary1` threads a flat operand queue (cheapest bookkeeping, non-dense
// suffixes only); `nary2_dense` keeps an explicit operand set per slot
// and finishes a dense suffix with an action-per-semiword loop.

use std::collections::VecDeque;

use crate::error::BinIdxError;
use crate::region::cblq::{CblqRegion, CblqSemiwords};
use crate::setops::cblq_tables::{initial_nary_action, nary_initial_code, nary_table, NaryAction};
use crate::setops::SetOp;

fn check_operands<const N: usize>(operands: &[&CblqRegion<N>]) -> Result<(), BinIdxError> {
    let domain = operands[0].domain_size();
    for o in &operands[1..] {
        if o.domain_size() != domain {
            return Err(BinIdxError::DomainSizeMismatch {
                left: domain,
                right: o.domain_size(),
            });
        }
    }
    Ok(())
}

pub fn nary1<const N: usize>(
    operands: &[&CblqRegion<N>],
    op: SetOp,
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    check_operands(operands)?;
    debug_assert!(!CblqRegion::deduce_common_suffix_density(operands)?);

    let first_action = initial_nary_action(op);
    let levels = operands[0].num_levels();
    let domain_size = operands[0].domain_size();
    let codes_per_word = CblqRegion::<N>::CODES_PER_WORD;

    let mut word_idxs = vec![0usize; operands.len()];

    let mut out = CblqRegion::<N> {
        words: Vec::new(),
        level_lens: vec![0; levels],
        has_dense_suffix: false,
        dense_suffix: CblqSemiwords::new(),
        domain_size,
    };

    let mut action_queue: VecDeque<NaryAction> = VecDeque::new();
    let mut opercount_queue: VecDeque<usize> = VecDeque::new();
    let mut oper_queue: VecDeque<usize> = (0..operands.len()).collect();
    action_queue.push_back(first_action);
    opercount_queue.push_back(operands.len());

    for level in 0..levels {
        let level_len = action_queue.len();
        let words_before = out.words.len();

        for _ in 0..level_len {
            let cur_action = action_queue.pop_front().unwrap_or_else(|| unreachable!());
            let cur_opercount = opercount_queue.pop_front().unwrap_or_else(|| unreachable!());

            let mut out_word = 0u32;
            for code_pos in 0..codes_per_word {
                let mut next_action = cur_action;
                let mut next_code = nary_initial_code(cur_action);
                let mut next_opercount = 0usize;

                // Indexing (not iterators): the queue grows inside this loop.
                for oper_index in 0..cur_opercount {
                    let oper = *oper_queue
                        .get(oper_index)
                        .unwrap_or_else(|| unreachable!());
                    let oper_word = operands[oper].words[word_idxs[oper]];
                    let oper_code = (oper_word >> (2 * code_pos)) & 0b11;

                    let entry = nary_table(next_action)[next_code as usize][oper_code as usize];
                    next_action = entry.action;
                    next_code = entry.output;

                    if oper_code == 0b10 {
                        oper_queue.push_back(oper);
                        next_opercount += 1;
                    }
                }

                out_word |= next_code << (2 * code_pos);
                if next_opercount > 0 {
                    action_queue.push_back(next_action);
                    opercount_queue.push_back(next_opercount);
                }
            }

            if cur_action != NaryAction::Delete {
                out.words.push(out_word);
            }

            // Advance every operand drawn from, then retire this
            // action's slice of the operand queue.
            for oper_index in 0..cur_opercount {
                let oper = *oper_queue.get(oper_index).unwrap_or_else(|| unreachable!());
                word_idxs[oper] += 1;
            }
            oper_queue.drain(..cur_opercount);
        }

        out.level_lens[level] = (out.words.len() - words_before) as u64;
    }

    debug_assert!(action_queue.is_empty() && oper_queue.is_empty());
    debug_assert!(word_idxs
        .iter()
        .zip(operands.iter())
        .all(|(&idx, o)| idx == o.words.len()));

    Ok(out)
}

pub fn nary2_dense<const N: usize>(
    operands: &[&CblqRegion<N>],
    op: SetOp,
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    check_operands(operands)?;

    let first_action = initial_nary_action(op);
    let has_dense = CblqRegion::deduce_common_suffix_density(operands)?;
    let levels = operands[0].num_levels();
    let non_dense_levels = if has_dense { levels - 1 } else { levels };
    let domain_size = operands[0].domain_size();
    let codes_per_word = CblqRegion::<N>::CODES_PER_WORD;
    let one_codes = CblqRegion::<N>::ONE_CODES_WORD;

    let mut word_idxs = vec![0usize; operands.len()];

    let mut out = CblqRegion::<N> {
        words: Vec::new(),
        level_lens: vec![0; levels],
        has_dense_suffix: has_dense,
        dense_suffix: CblqSemiwords::new(),
        domain_size,
    };

    let mut action_queue: VecDeque<NaryAction> = VecDeque::new();
    let mut operset_queue: VecDeque<Vec<usize>> = VecDeque::new();
    action_queue.push_back(first_action);
    operset_queue.push_back((0..operands.len()).collect());

    let mut next_actions = vec![first_action; codes_per_word];
    let mut next_opersets: Vec<Vec<usize>> = vec![Vec::new(); codes_per_word];

    for level in 0..non_dense_levels {
        let level_len = action_queue.len();
        let words_before = out.words.len();

        for _ in 0..level_len {
            let cur_action = action_queue.pop_front().unwrap_or_else(|| unreachable!());
            let cur_operset = operset_queue.pop_front().unwrap_or_else(|| unreachable!());

            let mut out_word = if nary_initial_code(cur_action) == 1 {
                one_codes
            } else {
                0
            };
            for slot in next_actions.iter_mut() {
                *slot = cur_action;
            }

            for &oper in &cur_operset {
                let oper_word = operands[oper].words[word_idxs[oper]];
                word_idxs[oper] += 1;

                let prev_word = out_word;
                out_word = 0;
                for code_pos in 0..codes_per_word {
                    let oper_code = (oper_word >> (2 * code_pos)) & 0b11;
                    let prev_code = (prev_word >> (2 * code_pos)) & 0b11;

                    let entry =
                        nary_table(next_actions[code_pos])[prev_code as usize][oper_code as usize];
                    next_actions[code_pos] = entry.action;
                    out_word |= entry.output << (2 * code_pos);

                    if oper_code == 0b10 {
                        next_opersets[code_pos].push(oper);
                    }
                }
            }

            if cur_action != NaryAction::Delete {
                out.words.push(out_word);
            }

            for code_pos in 0..codes_per_word {
                if !next_opersets[code_pos].is_empty() {
                    action_queue.push_back(next_actions[code_pos]);
                    operset_queue.push_back(std::mem::take(&mut next_opersets[code_pos]));
                }
            }
        }

        out.level_lens[level] = (out.words.len() - words_before) as u64;
    }

    if has_dense {
        out.level_lens[levels - 1] = 0;

        let full = CblqRegion::<N>::FULL_SEMIWORD;
        let mut semiword_pos = vec![0u64; operands.len()];

        while let Some(mut cur_action) = action_queue.pop_front() {
            let cur_operset = operset_queue.pop_front().unwrap_or_else(|| unreachable!());

            if cur_action == NaryAction::Delete {
                for &oper in &cur_operset {
                    semiword_pos[oper] += 1;
                }
                continue;
            }

            let mut out_semiword = if nary_initial_code(cur_action) == 1 {
                full
            } else {
                0
            };
            for &oper in &cur_operset {
                let semiword = operands[oper].dense_suffix.get(semiword_pos[oper]);
                semiword_pos[oper] += 1;

                match cur_action {
                    NaryAction::Union => out_semiword |= semiword,
                    NaryAction::Inter => out_semiword &= semiword,
                    NaryAction::Diff => {
                        // The first participant seeds the minuend.
                        out_semiword = semiword;
                        cur_action = NaryAction::CDiff;
                    }
                    NaryAction::CDiff => out_semiword &= semiword ^ full,
                    NaryAction::SymDiff | NaryAction::CSymDiff => out_semiword ^= semiword,
                    NaryAction::Delete | NaryAction::Infeasible => unreachable!(),
                }
            }
            out.dense_suffix.push(out_semiword);
        }

        debug_assert!(semiword_pos
            .iter()
            .zip(operands.iter())
            .all(|(&pos, o)| pos == o.dense_suffix.num_semiwords()));
    } else {
        debug_assert!(action_queue.is_empty());
    }

    Ok(out)
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

    fn baseline(operands: &[&CblqRegion<2>], op: SetOp) -> CblqRegion<2> {
        let mut out = cblq_baseline::nary(operands, op).unwrap();
        out.compact();
        out
    }

    #[test]
    fn test_nary1_matches_baseline() {
        let a = cblq(64, &[0, 1, 2, 3, 17, 40], false);
        let b = cblq(64, &[2, 3, 17, 41, 63], false);
        let c = cblq(64, &[3, 17, 42], false);
        let operands = [&a, &b, &c];
        for op in [
            SetOp::Union,
            SetOp::Intersection,
            SetOp::Difference,
            SetOp::SymmetricDifference,
        ] {
            let mut got = nary1(&operands, op).unwrap();
            got.compact();
            assert_eq!(got, baseline(&operands, op), "op {:?}", op);
        }
    }

    #[test]
    fn test_nary2_dense_matches_baseline() {
        for dense in [false, true] {
            let a = cblq(256, &[0, 1, 2, 3, 100, 101, 200], dense);
            let b = cblq(256, &[2, 3, 100, 201, 255], dense);
            let c = cblq(256, &[3, 100, 202], dense);
            let operands = [&a, &b, &c];
            for op in [
                SetOp::Union,
                SetOp::Intersection,
                SetOp::Difference,
                SetOp::SymmetricDifference,
            ] {
                let mut got = nary2_dense(&operands, op).unwrap();
                got.compact();
                assert_eq!(got, baseline(&operands, op), "op {:?} dense {}", op, dense);
            }
        }
    }

    #[test]
    fn test_difference_first_operand_seeds() {
        // Difference is left-associative: ((a - b) - c).
        let a = cblq(16, &[0, 1, 2, 3, 8], true);
        let b = cblq(16, &[1, 8], true);
        let c = cblq(16, &[2], true);
        let out = nary2_dense(&[&a, &b, &c], SetOp::Difference).unwrap();
        assert_eq!(out.to_rids(0), vec![0, 3]);
    }
}
