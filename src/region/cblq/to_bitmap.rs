// region/cblq/to_bitmap.rs
//
// In-place CBLQ -> Bitmap combining converter. For each combine
// operator the CBLQ's constant subtrees are imprinted on an existing
// target bitmap with word-aligned mutations: blocks smaller than one
// machine word rewrite a bitfield inside a single word (block offsets
// are always aligned to the block size, so a sub-word block never
// straddles words); blocks of at least one word mutate a run of whole
// words, trimmed to the block-aligned domain.
//
// Union, difference and symmetric difference visit the all-set blocks
// of the CBLQ; intersection visits the all-clear blocks and masks them
// out of the target.

use crate::error::BinIdxError;
use crate::region::bitmap::{BitmapRegion, BITS_PER_WORD};
use crate::region::cblq::CblqRegion;
use crate::setops::SetOp;

fn sub_word_imprint(words: &mut [u64], offset: u64, count: u64, op: SetOp) {
    let word_pos = (offset / BITS_PER_WORD) as usize;
    if word_pos >= words.len() {
        return;
    }
    let bit_pos = offset % BITS_PER_WORD;
    let mask = if count == BITS_PER_WORD {
        u64::MAX
    } else {
        ((1u64 << count) - 1) << bit_pos
    };
    match op {
        SetOp::Union => words[word_pos] |= mask,
        // The visited block is a 0-block of the CBLQ.
        SetOp::Intersection => words[word_pos] &= !mask,
        // The CBLQ is the right side of the difference.
        SetOp::Difference => words[word_pos] &= !mask,
        SetOp::SymmetricDifference => words[word_pos] ^= mask,
    }
}

fn whole_word_imprint(words: &mut [u64], offset: u64, count: u64, op: SetOp) {
    let start = (offset / BITS_PER_WORD) as usize;
    let nwords = (count / BITS_PER_WORD) as usize;
    let end = (start + nwords).min(words.len());
    let start = start.min(words.len());
    for word in &mut words[start..end] {
        match op {
            SetOp::Union => *word = u64::MAX,
            SetOp::Intersection => *word = 0,
            SetOp::Difference => *word = 0,
            SetOp::SymmetricDifference => *word ^= u64::MAX,
        }
    }
}

impl<const N: usize> CblqRegion<N> {
    /// Combine this CBLQ into `target` under `op` (`target = target op self`).
    pub fn imprint_on_bitmap(
        &self,
        target: &mut BitmapRegion,
        op: SetOp,
    ) -> Result<(), BinIdxError> {
        if target.domain_size() != self.domain_size {
            return Err(BinIdxError::DomainSizeMismatch {
                left: target.domain_size(),
                right: self.domain_size,
            });
        }

        let visit_code = match op {
            SetOp::Intersection => 0,
            _ => 1,
        };

        self.traverse_blocks(visit_code, |size, offset| {
            if size < BITS_PER_WORD {
                sub_word_imprint(&mut target.words, offset, size, op);
            } else {
                whole_word_imprint(&mut target.words, offset, size, op);
            }
        });

        target.mask_tail();
        Ok(())
    }

    /// Standalone conversion: a fresh bitmap imprinted by union.
    pub fn to_bitmap(&self) -> BitmapRegion {
        let mut out = BitmapRegion::new_empty(self.domain_size);
        self.imprint_on_bitmap(&mut out, SetOp::Union)
            .unwrap_or_else(|_| unreachable!("fresh bitmap shares the domain"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::cblq::CblqEncoder;

    fn cblq_from_runs(domain: u64, runs: &[(u64, u64)], dense: bool) -> CblqRegion<2> {
        let mut enc: CblqEncoder<2> = CblqEncoder::new(domain, dense);
        for &(start, len) in runs {
            enc.insert_bits(start, len);
        }
        enc.finish()
    }

    fn bitmap_from_runs(domain: u64, runs: &[(u64, u64)]) -> BitmapRegion {
        let mut b = BitmapRegion::new_empty(domain);
        for &(start, len) in runs {
            b.set_run(start, len);
        }
        b
    }

    #[test]
    fn test_to_bitmap_matches_rids() {
        for dense in [false, true] {
            let cblq = cblq_from_runs(200, &[(0, 3), (64, 64), (130, 1)], dense);
            let bitmap = cblq.to_bitmap();
            assert_eq!(bitmap.to_rids(0), cblq.to_rids(0));
        }
    }

    #[test]
    fn test_imprint_ops() {
        let cblq = cblq_from_runs(100, &[(10, 20)], false);
        let base = bitmap_from_runs(100, &[(0, 15), (90, 5)]);

        let mut union = base.clone();
        cblq.imprint_on_bitmap(&mut union, SetOp::Union).unwrap();
        assert_eq!(
            union.element_count(),
            base.binary_op(&cblq.to_bitmap(), SetOp::Union).element_count()
        );

        let mut inter = base.clone();
        cblq.imprint_on_bitmap(&mut inter, SetOp::Intersection).unwrap();
        assert_eq!(
            inter.to_rids(0),
            base.binary_op(&cblq.to_bitmap(), SetOp::Intersection).to_rids(0)
        );

        let mut diff = base.clone();
        cblq.imprint_on_bitmap(&mut diff, SetOp::Difference).unwrap();
        assert_eq!(
            diff.to_rids(0),
            base.binary_op(&cblq.to_bitmap(), SetOp::Difference).to_rids(0)
        );

        let mut sym = base.clone();
        cblq.imprint_on_bitmap(&mut sym, SetOp::SymmetricDifference)
            .unwrap();
        assert_eq!(
            sym.to_rids(0),
            base.binary_op(&cblq.to_bitmap(), SetOp::SymmetricDifference)
                .to_rids(0)
        );
    }

    #[test]
    fn test_domain_mismatch_rejected() {
        let cblq = cblq_from_runs(100, &[(0, 1)], false);
        let mut target = BitmapRegion::new_empty(50);
        assert!(cblq.imprint_on_bitmap(&mut target, SetOp::Union).is_err());
    }
}
