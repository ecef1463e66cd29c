// setops/cblq_nary3.rs
//
// Level-by-level N-ary CBLQ set operations with dense slot remapping.
//
// `nary3_dense` keeps one action/code state per output slot and a
// per-operand indirection array ("outinds") from operand words to
// slots; after each level the indirection is densely remapped, dropping
// DELETE slots and renumbering the survivors.
//
// `nary3_fast` specializes union and intersection to raw word
// operations: operand words are OR-imprinted (union) or mask-ANDed
// (intersection) straight onto the output slot words, and the transient
// 3-codes are corrected once per level by the fixup masks. The dense
// suffix runs union via OR placement and intersection via De Morgan.

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

pub fn nary3_dense<const N: usize>(
    operands: &[&CblqRegion<N>],
    op: SetOp,
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    check_operands(operands)?;

    let first_action = initial_nary_action(op);
    let has_dense = CblqRegion::deduce_common_suffix_density(operands)?;
    let levels = operands[0].num_levels();
    let non_dense_levels = if has_dense { levels - 1 } else { levels };
    let codes_per_word = CblqRegion::<N>::CODES_PER_WORD;
    let one_codes = CblqRegion::<N>::ONE_CODES_WORD;
    let nopers = operands.len();

    let mut out = CblqRegion::<N> {
        words: Vec::new(),
        level_lens: vec![0; levels],
        has_dense_suffix: has_dense,
        dense_suffix: CblqSemiwords::new(),
        domain_size: operands[0].domain_size(),
    };

    // Active-slot state for the current level.
    let mut slot_actions: Vec<NaryAction> = vec![first_action; codes_per_word];
    let mut slot_words: Vec<u32> = vec![if nary_initial_code(first_action) == 1 {
        one_codes
    } else {
        0
    }];
    // Per operand: the slot index (or -1 = delete) of each of its words
    // at the current level, in word order.
    let mut in_outinds: Vec<Vec<i64>> = vec![vec![0]; nopers];

    let mut word_idxs = vec![0usize; nopers];

    // Populated per level: which (slot, code) positions were referenced.
    let mut out_outinds: Vec<Vec<i64>> = vec![Vec::new(); nopers];
    let mut out_present: Vec<bool> = Vec::new();

    let mut remap =
        |slot_actions: &mut Vec<NaryAction>,
         slot_words: &mut Vec<u32>,
         out_present: &mut Vec<bool>,
         out_outinds: &mut Vec<Vec<i64>>,
         in_outinds: &mut Vec<Vec<i64>>| {
            let mut mapping = vec![-1i64; out_present.len()];
            let mut next = 0i64;
            for (i, &present) in out_present.iter().enumerate() {
                if present && slot_actions[i] != NaryAction::Delete {
                    mapping[i] = next;
                    next += 1;
                }
            }
            let mut new_actions = Vec::with_capacity(next as usize * codes_per_word);
            let mut new_words = Vec::with_capacity(next as usize);
            for (i, &present) in out_present.iter().enumerate() {
                if present && slot_actions[i] != NaryAction::Delete {
                    let action = slot_actions[i];
                    new_actions.extend(std::iter::repeat(action).take(codes_per_word));
                    new_words.push(if nary_initial_code(action) == 1 {
                        one_codes
                    } else {
                        0
                    });
                }
            }
            *slot_actions = new_actions;
            *slot_words = new_words;
            for oper in 0..nopers {
                in_outinds[oper] = out_outinds[oper]
                    .iter()
                    .map(|&ind| if ind < 0 { ind } else { mapping[ind as usize] })
                    .collect();
                out_outinds[oper].clear();
            }
            next as u64
        };

    for level in 0..non_dense_levels {
        out.level_lens[level] = slot_words.len() as u64;
        out_present.clear();
        out_present.resize(slot_words.len() * codes_per_word, false);

        for (oper, region) in operands.iter().enumerate() {
            let nwords = region.level_lens[level] as usize;
            for w in 0..nwords {
                let outind = in_outinds[oper][w];
                let oper_word = region.words[word_idxs[oper]];
                word_idxs[oper] += 1;

                if outind < 0 {
                    for code_pos in 0..codes_per_word {
                        if (oper_word >> (2 * code_pos)) & 0b10 != 0 {
                            out_outinds[oper].push(-1);
                        }
                    }
                    continue;
                }

                let slot = outind as usize;
                let mut state_word = slot_words[slot];
                for code_pos in 0..codes_per_word {
                    let oper_code = (oper_word >> (2 * code_pos)) & 0b11;
                    let prev_code = (state_word >> (2 * code_pos)) & 0b11;
                    let action_slot = slot * codes_per_word + code_pos;

                    let entry =
                        nary_table(slot_actions[action_slot])[prev_code as usize][oper_code as usize];
                    slot_actions[action_slot] = entry.action;
                    state_word = (state_word & !(0b11 << (2 * code_pos)))
                        | (entry.output << (2 * code_pos));

                    if oper_code == 0b10 {
                        let out_ind = slot * codes_per_word + code_pos;
                        out_outinds[oper].push(out_ind as i64);
                        out_present[out_ind] = true;
                    }
                }
                slot_words[slot] = state_word;
            }
        }

        out.words.extend_from_slice(&slot_words);

        if level != non_dense_levels - 1 || has_dense {
            let next_len = remap(
                &mut slot_actions,
                &mut slot_words,
                &mut out_present,
                &mut out_outinds,
                &mut in_outinds,
            );
            if level == non_dense_levels - 1 {
                // The remapped state seeds the dense-suffix pass below.
                out.dense_suffix.expand(next_len);
            }
        }
    }

    if has_dense {
        out.level_lens[levels - 1] = 0;

        let full = CblqRegion::<N>::FULL_SEMIWORD;
        // slot_actions now holds one action word per dense slot; only
        // the first action of each word is needed (per-slot action).
        let nslots = slot_words.len();
        let mut dense_actions: Vec<NaryAction> = (0..nslots)
            .map(|slot| slot_actions[slot * codes_per_word])
            .collect();
        for slot in 0..nslots {
            let init = if nary_initial_code(dense_actions[slot]) == 1 {
                full
            } else {
                0
            };
            out.dense_suffix.set(slot as u64, init);
        }

        let mut semiword_pos = vec![0u64; nopers];
        for (oper, region) in operands.iter().enumerate() {
            for &ind in &in_outinds[oper] {
                let semiword = region.dense_suffix.get(semiword_pos[oper]);
                semiword_pos[oper] += 1;
                if ind < 0 {
                    continue;
                }
                let slot = ind as usize;
                let mut state = out.dense_suffix.get(slot as u64);
                match dense_actions[slot] {
                    NaryAction::Union => state |= semiword,
                    NaryAction::Inter => state &= semiword,
                    NaryAction::Diff => {
                        state = semiword;
                        dense_actions[slot] = NaryAction::CDiff;
                    }
                    NaryAction::CDiff => state &= semiword ^ full,
                    NaryAction::SymDiff | NaryAction::CSymDiff => state ^= semiword,
                    NaryAction::Delete | NaryAction::Infeasible => unreachable!(),
                }
                out.dense_suffix.set(slot as u64, state);
            }
        }

        debug_assert!(semiword_pos
            .iter()
            .zip(operands.iter())
            .all(|(&pos, o)| pos == o.dense_suffix.num_semiwords()));
    }

    debug_assert!(word_idxs
        .iter()
        .zip(operands.iter())
        .all(|(&idx, o)| idx == o.words.len()));

    Ok(out)
}

fn count_two_codes<const N: usize>(word: u32) -> u64 {
    (word & CblqRegion::<N>::TWO_CODES_WORD).count_ones() as u64
}

pub fn nary3_fast<const N: usize>(
    operands: &[&CblqRegion<N>],
    op: SetOp,
) -> Result<CblqRegion<N>, BinIdxError> {
    debug_assert!(operands.len() >= 2);
    debug_assert!(matches!(op, SetOp::Union | SetOp::Intersection));
    check_operands(operands)?;

    let is_union = op == SetOp::Union;
    let has_dense = CblqRegion::deduce_common_suffix_density(operands)?;
    let levels = operands[0].num_levels();
    let non_dense_levels = if has_dense { levels - 1 } else { levels };
    let codes_per_word = CblqRegion::<N>::CODES_PER_WORD;
    let one_codes = CblqRegion::<N>::ONE_CODES_WORD;
    let two_codes = CblqRegion::<N>::TWO_CODES_WORD;
    let nopers = operands.len();

    let mut out = CblqRegion::<N> {
        words: Vec::new(),
        level_lens: vec![0; levels],
        has_dense_suffix: has_dense,
        dense_suffix: CblqSemiwords::new(),
        domain_size: operands[0].domain_size(),
    };

    let mut word_idxs = vec![0usize; nopers];

    // One entry per operand word at the current level (slot index), or a
    // negative run -k meaning "skip k of this operand's words".
    let mut in_inds: Vec<Vec<i64>> = vec![vec![0]; nopers];
    let mut next_level_len: u64 = 1;

    for level in 0..non_dense_levels {
        out.level_lens[level] = next_level_len;

        let words_before = out.words.len();
        let init_word = if is_union { 0 } else { one_codes };
        out.words
            .extend(std::iter::repeat(init_word).take(next_level_len as usize));
        let level_words_start = words_before;

        let mut out_inds: Vec<Vec<i64>> = vec![Vec::new(); nopers];

        for (oper, region) in operands.iter().enumerate() {
            let nwords = region.level_lens[level] as usize;
            let mut consumed = 0usize;
            let mut ind_iter = in_inds[oper].iter();
            while consumed < nwords {
                let &ind = ind_iter.next().unwrap_or_else(|| unreachable!());
                if ind >= 0 {
                    let oper_word = region.words[word_idxs[oper]];
                    word_idxs[oper] += 1;
                    consumed += 1;

                    let slot = level_words_start + ind as usize;
                    if is_union {
                        // 1|2 produces a transient 3; fixed after the level.
                        out.words[slot] |= oper_word;
                    } else {
                        out.words[slot] |= oper_word & two_codes;
                        out.words[slot] &= oper_word | (oper_word >> 1) | two_codes;
                    }

                    let base_ind = ind * codes_per_word as i64;
                    for code_pos in 0..codes_per_word {
                        if (oper_word >> (2 * code_pos)) & 0b10 != 0 {
                            out_inds[oper].push(base_ind + code_pos as i64);
                        }
                    }
                } else {
                    let mut skip_children = 0i64;
                    for _ in 0..(-ind) {
                        skip_children +=
                            count_two_codes::<N>(region.words[word_idxs[oper]]) as i64;
                        word_idxs[oper] += 1;
                        consumed += 1;
                    }
                    if skip_children > 0 {
                        out_inds[oper].push(-skip_children);
                    }
                }
            }
        }

        // Level postprocess: fix transient codes, then densely remap the
        // produced inds (2-codes keep slots, everything else deletes).
        let max_ind = next_level_len * codes_per_word as u64;
        let mut mapping = vec![-1i64; max_ind as usize];
        let mut mapped = 0i64;
        for slot in 0..next_level_len as usize {
            let mut word = out.words[level_words_start + slot];
            if is_union {
                word &= !((word & one_codes) << 1);
            } else {
                // low bit: all operands intersected to 1-or-2;
                // high bit: some operand was mixed. Both -> a live 2.
                word &= (word << 1) | one_codes;
                word &= (!word >> 1) | two_codes;
            }
            out.words[level_words_start + slot] = word;
            for code_pos in 0..codes_per_word {
                if (word >> (2 * code_pos)) & 0b10 != 0 {
                    mapping[slot * codes_per_word + code_pos] = mapped;
                    mapped += 1;
                }
            }
        }

        for oper in 0..nopers {
            in_inds[oper] = out_inds[oper]
                .iter()
                .map(|&ind| if ind < 0 { ind } else { mapping[ind as usize] })
                .collect();
        }
        next_level_len = mapped as u64;
    }

    debug_assert!(word_idxs
        .iter()
        .zip(operands.iter())
        .all(|(&idx, o)| idx == o.words.len()));

    if has_dense {
        out.level_lens[levels - 1] = 0;

        let semiword_bits = CblqSemiwords::<N>::SEMIWORD_BITS;
        let mask = CblqSemiwords::<N>::SEMIWORD_MASK;
        let nblocks = ((next_level_len * semiword_bits).div_ceil(64) as usize).max(1);
        let mut out_blocks = vec![0u64; nblocks];

        for (oper, region) in operands.iter().enumerate() {
            let mut pos = 0u64;
            for &ind in &in_inds[oper] {
                if ind >= 0 {
                    let semiword = region.dense_suffix.get(pos) as u64;
                    pos += 1;
                    // Intersection via De Morgan: OR the negations, then
                    // negate the accumulated output once at the end.
                    let bits = if is_union {
                        semiword
                    } else {
                        !semiword & mask
                    };
                    let bitpos = ind as u64 * semiword_bits;
                    out_blocks[(bitpos / 64) as usize] |= bits << (bitpos % 64);
                } else {
                    pos += (-ind) as u64;
                }
            }
            debug_assert_eq!(pos, region.dense_suffix.num_semiwords());
        }

        if !is_union {
            for block in &mut out_blocks {
                *block = !*block;
            }
        }

        let nbytes = ((next_level_len * semiword_bits) as usize).div_ceil(8);
        let mut bytes = Vec::with_capacity(nbytes);
        'outer: for block in &out_blocks {
            for byte in block.to_le_bytes() {
                if bytes.len() == nbytes {
                    break 'outer;
                }
                bytes.push(byte);
            }
        }
        let mut dense = CblqSemiwords::<N>::from_min_bytes(next_level_len, &bytes);
        dense.trim(next_level_len);
        out.dense_suffix = dense;
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

    const ALL_OPS: &[SetOp] = &[
        SetOp::Union,
        SetOp::Intersection,
        SetOp::Difference,
        SetOp::SymmetricDifference,
    ];

    #[test]
    fn test_nary3_dense_matches_baseline() {
        for dense in [false, true] {
            let a = cblq(256, &[0, 1, 2, 3, 100, 101, 200], dense);
            let b = cblq(256, &[2, 3, 100, 201, 255], dense);
            let c = cblq(256, &[3, 100, 202], dense);
            let operands = [&a, &b, &c];
            for &op in ALL_OPS {
                let mut got = nary3_dense(&operands, op).unwrap();
                got.compact();
                assert_eq!(got, baseline(&operands, op), "op {:?} dense {}", op, dense);
            }
        }
    }

    #[test]
    fn test_nary3_fast_matches_baseline() {
        for dense in [false, true] {
            let a = cblq(256, &(0..40).collect::<Vec<u64>>(), dense);
            let b = cblq(256, &[2, 3, 38, 39, 40, 41, 250], dense);
            let c = cblq(256, &[3, 39, 41, 128, 250], dense);
            let operands = [&a, &b, &c];
            for &op in &[SetOp::Union, SetOp::Intersection] {
                let mut got = nary3_fast(&operands, op).unwrap();
                got.compact();
                assert_eq!(got, baseline(&operands, op), "op {:?} dense {}", op, dense);
            }
        }
    }

    #[test]
    fn test_settled_union_slot_deletes_children() {
        // A subtree filled by one operand while another is still mixed
        // exercises the delete-run bookkeeping.
        let a = cblq(64, &(0..16).collect::<Vec<u64>>(), false);
        let b = cblq(64, &[1, 2, 17], false);
        let mut got = nary3_fast(&[&a, &b], SetOp::Union).unwrap();
        got.compact();
        assert_eq!(got, baseline(&[&a, &b], SetOp::Union));
    }
}
