// setops/mod.rs
//
// The set-operation algebra over regions: concrete per-encoding kernels,
// a dynamic dispatcher over polymorphic operands, an operand-uniformity
// short-circuit, and the postfix region-math evaluator the query engine
// runs on.

pub mod cblq_baseline;
pub mod cblq_fast;
pub mod cblq_nary;
pub mod cblq_nary3;
pub mod cblq_tables;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::region::cblq::CblqRegion;
use crate::region::{BitmapRegion, Region, RegionType, RegionUniformity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Complement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SetOp {
    Union,
    Intersection,
    Difference,
    SymmetricDifference,
}

impl SetOp {
    /// Result for the zero-operand case: full domain for intersection,
    /// empty for the rest.
    pub fn identity_is_full(&self) -> bool {
        matches!(self, SetOp::Intersection)
    }
}

/// Which CBLQ set-op implementation the engine runs. All produce the
/// same logical result; they differ in CPU cost and in how compact the
/// un-compacted output is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CblqAlgorithm {
    #[default]
    Baseline,
    FastUnion,
    NAry1,
    NAry2Dense,
    NAry3Dense,
    NAry3Fast,
}

#[derive(Debug, Clone, Copy)]
pub struct SetOpsConfig {
    pub cblq_algorithm: CblqAlgorithm,
    pub compact_after_setop: bool,
}

impl Default for SetOpsConfig {
    fn default() -> Self {
        SetOpsConfig {
            cblq_algorithm: CblqAlgorithm::default(),
            compact_after_setop: true,
        }
    }
}

/// A postfix expression over stored regions: region references, unary
/// complement, and N-ary operators with explicit arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionMathTerm {
    Region(u64),
    Unary(UnaryOp),
    Nary(SetOp, usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionMath {
    terms: Vec<RegionMathTerm>,
}

impl RegionMath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_region(&mut self, region_id: u64) -> &mut Self {
        self.terms.push(RegionMathTerm::Region(region_id));
        self
    }

    pub fn push_unary(&mut self, op: UnaryOp) -> &mut Self {
        self.terms.push(RegionMathTerm::Unary(op));
        self
    }

    pub fn push_nary(&mut self, op: SetOp, arity: usize) -> &mut Self {
        self.terms.push(RegionMathTerm::Nary(op, arity));
        self
    }

    pub fn terms(&self) -> &[RegionMathTerm] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// All region ids referenced, deduplicated and ordered.
    pub fn referenced_regions(&self) -> BTreeSet<u64> {
        self.terms
            .iter()
            .filter_map(|t| match t {
                RegionMathTerm::Region(id) => Some(*id),
                _ => None,
            })
            .collect()
    }
}

/// Folds known-uniform operands of an N-ary op into the identity rules
/// without touching encoded data. Tracks a pending complement on the
/// final result (a full minuend turns a difference into a complemented
/// union, a full operand toggles a symmetric difference).
#[derive(Debug, Clone, Copy)]
pub struct SimplifiedSetOp {
    pub uniformity: RegionUniformity,
    pub op: SetOp,
    pub complement_result: bool,
}

impl SimplifiedSetOp {
    pub fn start(op: SetOp, first: RegionUniformity) -> Self {
        SimplifiedSetOp {
            uniformity: first,
            op,
            complement_result: false,
        }
    }

    pub fn append(self, operand: RegionUniformity) -> Self {
        use RegionUniformity as RU;
        let s = |uniformity, op, complement_result| SimplifiedSetOp {
            uniformity,
            op,
            complement_result,
        };
        let (this, op, c) = (self.uniformity, self.op, self.complement_result);
        match op {
            SetOp::Union => match (this, operand) {
                (RU::Empty, o) => s(o, op, c),
                (RU::Filled, _) => s(RU::Filled, op, c),
                (RU::Mixed, RU::Empty) => s(RU::Mixed, op, c),
                (RU::Mixed, RU::Filled) => s(RU::Filled, op, c),
                (RU::Mixed, RU::Mixed) => s(RU::Mixed, op, c),
            },
            SetOp::Intersection => match (this, operand) {
                (RU::Empty, _) => s(RU::Empty, op, c),
                (RU::Filled, o) => s(o, op, c),
                (RU::Mixed, RU::Empty) => s(RU::Empty, op, c),
                (RU::Mixed, RU::Filled) => s(RU::Mixed, op, c),
                (RU::Mixed, RU::Mixed) => s(RU::Mixed, op, c),
            },
            SetOp::Difference => match (this, operand) {
                (RU::Empty, _) => s(RU::Empty, op, c),
                // full \ X = complement(union of the remaining operands)
                (RU::Filled, o) => s(o, SetOp::Union, !c),
                (RU::Mixed, RU::Empty) => s(RU::Mixed, op, c),
                (RU::Mixed, RU::Filled) => s(RU::Empty, op, c),
                (RU::Mixed, RU::Mixed) => s(RU::Mixed, op, c),
            },
            SetOp::SymmetricDifference => match (this, operand) {
                (RU::Empty, o) => s(o, op, c),
                (RU::Filled, o) => s(o, op, !c),
                (RU::Mixed, RU::Empty) => s(RU::Mixed, op, c),
                (RU::Mixed, RU::Filled) => s(RU::Mixed, op, !c),
                (RU::Mixed, RU::Mixed) => s(RU::Mixed, op, c),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SetOps {
    pub config: SetOpsConfig,
}

impl SetOps {
    pub fn new(config: SetOpsConfig) -> Self {
        SetOps { config }
    }

    pub fn with_algorithm(algorithm: CblqAlgorithm) -> Self {
        SetOps {
            config: SetOpsConfig {
                cblq_algorithm: algorithm,
                ..SetOpsConfig::default()
            },
        }
    }

    pub fn complement(&self, region: &Region) -> Result<Region, BinIdxError> {
        Ok(match region {
            Region::Ii(r) => Region::Ii(r.complement()),
            Region::Cii(r) => Region::Cii(r.complement()),
            Region::Bitmap(r) => Region::Bitmap(r.complement()),
            Region::Wah(r) => Region::Wah(r.complement()),
            Region::Cblq2(r) => Region::Cblq2(cblq_baseline::complement(r)),
            Region::Cblq3(r) => Region::Cblq3(cblq_baseline::complement(r)),
            Region::Cblq4(r) => Region::Cblq4(cblq_baseline::complement(r)),
        })
    }

    pub fn binary(&self, left: &Region, right: &Region, op: SetOp) -> Result<Region, BinIdxError> {
        let operands = [Arc::new(left.clone()), Arc::new(right.clone())];
        self.nary(left.region_type(), left.domain_size(), &operands, op)
            .map(|arc| (*arc).clone())
    }

    /// In-place binary op: reuses the left operand's storage where the
    /// representation allows it (bitmap word arrays, CBLQ imprinting),
    /// and replaces the left operand with a fresh region otherwise. Only
    /// legal on a region the caller exclusively owns.
    pub fn binary_in_place(
        &self,
        left: &mut Region,
        right: &Region,
        op: SetOp,
    ) -> Result<(), BinIdxError> {
        if left.domain_size() != right.domain_size() {
            return Err(BinIdxError::DomainSizeMismatch {
                left: left.domain_size(),
                right: right.domain_size(),
            });
        }
        match (&mut *left, right) {
            (Region::Bitmap(l), Region::Bitmap(r)) => {
                l.binary_op_in_place(r, op);
                Ok(())
            }
            (Region::Bitmap(l), Region::Cblq2(r)) => r.imprint_on_bitmap(l, op),
            (Region::Bitmap(l), Region::Cblq3(r)) => r.imprint_on_bitmap(l, op),
            (Region::Bitmap(l), Region::Cblq4(r)) => r.imprint_on_bitmap(l, op),
            (left_other, right) => {
                *left_other = self.binary(&*left_other, right, op)?;
                Ok(())
            }
        }
    }

    /// N-ary dispatch with the operand-uniformity short-circuit. Zero
    /// operands produce the identity for `op` over the given domain;
    /// one operand is returned unchanged; non-commutative operations
    /// are left-associative.
    pub fn nary(
        &self,
        rep: RegionType,
        domain_size: u64,
        operands: &[Arc<Region>],
        op: SetOp,
    ) -> Result<Arc<Region>, BinIdxError> {
        for r in operands {
            if r.domain_size() != domain_size {
                return Err(BinIdxError::DomainSizeMismatch {
                    left: domain_size,
                    right: r.domain_size(),
                });
            }
        }

        let mut state: Option<SimplifiedSetOp> = None;
        let mut kept: Vec<&Arc<Region>> = Vec::new();
        for region in operands {
            let ru = region.uniformity();
            state = Some(match state {
                None => SimplifiedSetOp::start(op, ru),
                Some(s) => s.append(ru),
            });
            if ru == RegionUniformity::Mixed {
                kept.push(region);
            }
        }

        let Some(state) = state else {
            return Ok(Arc::new(Region::make_uniform(
                rep,
                domain_size,
                op.identity_is_full(),
            )));
        };

        let result = match state.uniformity {
            RegionUniformity::Empty => {
                Arc::new(Region::make_uniform(rep, domain_size, state.complement_result))
            }
            RegionUniformity::Filled => {
                Arc::new(Region::make_uniform(rep, domain_size, !state.complement_result))
            }
            RegionUniformity::Mixed => {
                let combined = if kept.len() == 1 {
                    kept[0].clone()
                } else {
                    Arc::new(self.concrete_nary(&kept, state.op)?)
                };
                if state.complement_result {
                    Arc::new(self.complement(&combined)?)
                } else {
                    combined
                }
            }
        };
        Ok(result)
    }

    fn concrete_nary(&self, operands: &[&Arc<Region>], op: SetOp) -> Result<Region, BinIdxError> {
        debug_assert!(operands.len() >= 2);
        let homogeneous = operands
            .iter()
            .all(|r| r.region_type() == operands[0].region_type());
        if homogeneous {
            self.same_type_nary(operands, op)
        } else {
            // Cross-encoding: combine through a bitmap, imprinting CBLQ
            // operands with the in-place converter and expanding the rest.
            self.bitmap_mixed_nary(operands, op)
        }
    }

    fn same_type_nary(&self, operands: &[&Arc<Region>], op: SetOp) -> Result<Region, BinIdxError> {
        match operands[0].as_ref() {
            Region::Ii(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Ii(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                let mut acc = regions[0].clone();
                for r in &regions[1..] {
                    acc = acc.binary_op(r, op);
                }
                Ok(Region::Ii(acc))
            }
            Region::Cii(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Cii(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                let mut acc = regions[0].clone();
                for r in &regions[1..] {
                    acc = acc.binary_op(r, op);
                }
                Ok(Region::Cii(acc))
            }
            Region::Bitmap(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Bitmap(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                let mut acc = regions[0].clone();
                for r in &regions[1..] {
                    acc.binary_op_in_place(r, op);
                }
                Ok(Region::Bitmap(acc))
            }
            Region::Wah(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Wah(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                let mut acc = regions[0].clone();
                for r in &regions[1..] {
                    acc = acc.binary_op(r, op);
                }
                Ok(Region::Wah(acc))
            }
            Region::Cblq2(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Cblq2(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                Ok(Region::Cblq2(self.cblq_nary(&regions, op)?))
            }
            Region::Cblq3(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Cblq3(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                Ok(Region::Cblq3(self.cblq_nary(&regions, op)?))
            }
            Region::Cblq4(_) => {
                let regions: Vec<_> = operands
                    .iter()
                    .map(|r| match r.as_ref() {
                        Region::Cblq4(r) => r,
                        _ => unreachable!(),
                    })
                    .collect();
                Ok(Region::Cblq4(self.cblq_nary(&regions, op)?))
            }
        }
    }

    /// N-ary over same-dimension CBLQs, routed by the configured
    /// algorithm. Algorithms that do not handle a case (dense suffixes
    /// for NAry1, non-union/intersect ops for the fast paths) fall back
    /// to the nearest general implementation, as the originals did.
    pub fn cblq_nary<const N: usize>(
        &self,
        operands: &[&CblqRegion<N>],
        op: SetOp,
    ) -> Result<CblqRegion<N>, BinIdxError> {
        let compact = self.config.compact_after_setop;
        let dense = CblqRegion::deduce_common_suffix_density(operands)?;
        let mut out = match self.config.cblq_algorithm {
            CblqAlgorithm::Baseline => cblq_baseline::nary(operands, op)?,
            CblqAlgorithm::FastUnion => {
                if op == SetOp::Union {
                    cblq_fast::nary_union(operands)?
                } else {
                    cblq_baseline::nary(operands, op)?
                }
            }
            CblqAlgorithm::NAry1 => {
                if dense {
                    cblq_nary::nary2_dense(operands, op)?
                } else {
                    cblq_nary::nary1(operands, op)?
                }
            }
            CblqAlgorithm::NAry2Dense => cblq_nary::nary2_dense(operands, op)?,
            CblqAlgorithm::NAry3Dense => cblq_nary3::nary3_dense(operands, op)?,
            CblqAlgorithm::NAry3Fast => {
                if matches!(op, SetOp::Union | SetOp::Intersection) {
                    cblq_nary3::nary3_fast(operands, op)?
                } else {
                    cblq_nary::nary2_dense(operands, op)?
                }
            }
        };
        if compact {
            out.compact();
        }
        Ok(out)
    }

    fn bitmap_mixed_nary(&self, operands: &[&Arc<Region>], op: SetOp) -> Result<Region, BinIdxError> {
        let domain_size = operands[0].domain_size();
        let mut acc = region_to_bitmap(operands[0]);
        for region in &operands[1..] {
            match region.as_ref() {
                Region::Cblq2(c) => c.imprint_on_bitmap(&mut acc, op)?,
                Region::Cblq3(c) => c.imprint_on_bitmap(&mut acc, op)?,
                Region::Cblq4(c) => c.imprint_on_bitmap(&mut acc, op)?,
                other => {
                    let rhs = region_to_bitmap_ref(other, domain_size);
                    acc.binary_op_in_place(&rhs, op);
                }
            }
        }
        Ok(Region::Bitmap(acc))
    }

    /// Evaluate a postfix region-math expression, materializing region
    /// references through `fetch`. `rep`/`domain_size` supply the
    /// identity element for zero-arity operators.
    pub fn evaluate_region_math(
        &self,
        rmath: &RegionMath,
        rep: RegionType,
        domain_size: u64,
        mut fetch: impl FnMut(u64) -> Result<Arc<Region>, BinIdxError>,
    ) -> Result<Arc<Region>, BinIdxError> {
        let mut stack: Vec<Arc<Region>> = Vec::new();
        for term in rmath.terms() {
            match *term {
                RegionMathTerm::Region(id) => stack.push(fetch(id)?),
                RegionMathTerm::Unary(UnaryOp::Complement) => {
                    let top = stack
                        .pop()
                        .ok_or_else(|| BinIdxError::BadRegionMath("unary on empty stack".into()))?;
                    stack.push(Arc::new(self.complement(&top)?));
                }
                RegionMathTerm::Nary(op, arity) => {
                    if stack.len() < arity {
                        return Err(BinIdxError::BadRegionMath(format!(
                            "arity {} exceeds stack depth {}",
                            arity,
                            stack.len()
                        )));
                    }
                    let operands = stack.split_off(stack.len() - arity);
                    stack.push(self.nary(rep, domain_size, &operands, op)?);
                }
            }
        }
        if stack.len() != 1 {
            return Err(BinIdxError::BadRegionMath(format!(
                "expression left {} values on the stack",
                stack.len()
            )));
        }
        Ok(stack.pop().unwrap_or_else(|| unreachable!()))
    }
}

fn region_to_bitmap(region: &Region) -> BitmapRegion {
    match region {
        Region::Bitmap(b) => b.clone(),
        Region::Cblq2(c) => c.to_bitmap(),
        Region::Cblq3(c) => c.to_bitmap(),
        Region::Cblq4(c) => c.to_bitmap(),
        other => region_to_bitmap_ref(other, other.domain_size()),
    }
}

fn region_to_bitmap_ref(region: &Region, domain_size: u64) -> BitmapRegion {
    let mut out = BitmapRegion::new_empty(domain_size);
    for rid in region.to_rids(0) {
        out.set(rid);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::region_from_rids;

    const ALL_REPS: &[RegionType] = &[
        RegionType::Ii,
        RegionType::Cii,
        RegionType::Bitmap,
        RegionType::Wah,
        RegionType::Cblq2,
        RegionType::Cblq3,
        RegionType::Cblq4,
    ];

    fn arc(rep: RegionType, domain: u64, rids: &[u64]) -> Arc<Region> {
        Arc::new(region_from_rids(rep, domain, rids))
    }

    #[test]
    fn test_nary_identity_cases() {
        let ops = SetOps::default();
        for rep in ALL_REPS {
            let empty = ops.nary(*rep, 32, &[], SetOp::Union).unwrap();
            assert_eq!(empty.element_count(), 0);
            let full = ops.nary(*rep, 32, &[], SetOp::Intersection).unwrap();
            assert_eq!(full.element_count(), 32);

            let one = arc(*rep, 32, &[1, 2, 3]);
            let same = ops.nary(*rep, 32, &[one.clone()], SetOp::Difference).unwrap();
            assert_eq!(same.to_rids(0), vec![1, 2, 3]);
        }
    }

    #[test]
    fn test_nary_ops_all_reps() {
        let ops = SetOps::default();
        let a_rids = vec![0u64, 1, 2, 3, 10, 11];
        let b_rids = vec![2u64, 3, 4, 11, 20];
        let c_rids = vec![3u64, 11, 31];
        for rep in ALL_REPS {
            let a = arc(*rep, 32, &a_rids);
            let b = arc(*rep, 32, &b_rids);
            let c = arc(*rep, 32, &c_rids);
            let operands = [a, b, c];

            let union = ops.nary(*rep, 32, &operands, SetOp::Union).unwrap();
            assert_eq!(union.to_rids(0), vec![0, 1, 2, 3, 4, 10, 11, 20, 31]);

            let inter = ops.nary(*rep, 32, &operands, SetOp::Intersection).unwrap();
            assert_eq!(inter.to_rids(0), vec![3, 11]);

            let diff = ops.nary(*rep, 32, &operands, SetOp::Difference).unwrap();
            assert_eq!(diff.to_rids(0), vec![0, 1, 10]);

            let sym = ops
                .nary(*rep, 32, &operands, SetOp::SymmetricDifference)
                .unwrap();
            assert_eq!(sym.to_rids(0), vec![0, 1, 3, 4, 10, 11, 20, 31]);
        }
    }

    #[test]
    fn test_set_op_idempotence() {
        let ops = SetOps::default();
        for rep in ALL_REPS {
            let a = arc(*rep, 64, &[0, 7, 8, 9, 40, 63]);
            let pair = [a.clone(), a.clone()];
            assert_eq!(
                ops.nary(*rep, 64, &pair, SetOp::Union).unwrap().to_rids(0),
                a.to_rids(0)
            );
            assert_eq!(
                ops.nary(*rep, 64, &pair, SetOp::Intersection)
                    .unwrap()
                    .to_rids(0),
                a.to_rids(0)
            );
            assert_eq!(
                ops.nary(*rep, 64, &pair, SetOp::Difference)
                    .unwrap()
                    .element_count(),
                0
            );
            assert_eq!(
                ops.nary(*rep, 64, &pair, SetOp::SymmetricDifference)
                    .unwrap()
                    .element_count(),
                0
            );
        }
    }

    #[test]
    fn test_uniformity_short_circuit() {
        let ops = SetOps::default();
        for rep in ALL_REPS {
            let mixed = arc(*rep, 16, &[3, 4, 5]);
            let empty = Arc::new(Region::make_uniform(*rep, 16, false));
            let full = Arc::new(Region::make_uniform(*rep, 16, true));

            // full \ mixed = complement(mixed)
            let diff = ops
                .nary(*rep, 16, &[full.clone(), mixed.clone()], SetOp::Difference)
                .unwrap();
            assert_eq!(
                diff.to_rids(0),
                vec![0, 1, 2, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
            );

            // union with full is full
            let u = ops
                .nary(*rep, 16, &[mixed.clone(), full.clone()], SetOp::Union)
                .unwrap();
            assert_eq!(u.element_count(), 16);

            // symdiff with full complements, with empty is a no-op
            let s = ops
                .nary(
                    *rep,
                    16,
                    &[mixed.clone(), full.clone(), empty.clone()],
                    SetOp::SymmetricDifference,
                )
                .unwrap();
            assert_eq!(s.to_rids(0), diff.to_rids(0));
        }
    }

    #[test]
    fn test_cross_encoding_mix() {
        let ops = SetOps::default();
        let bitmap = arc(RegionType::Bitmap, 64, &[0, 1, 2, 3, 32]);
        let cblq = arc(RegionType::Cblq2, 64, &[2, 3, 4, 33]);
        let wah = arc(RegionType::Wah, 64, &[3, 63]);
        let out = ops
            .nary(RegionType::Bitmap, 64, &[bitmap, cblq, wah], SetOp::Union)
            .unwrap();
        assert_eq!(out.to_rids(0), vec![0, 1, 2, 3, 4, 32, 33, 63]);
    }

    #[test]
    fn test_region_math_evaluation() {
        let ops = SetOps::default();
        let regions: Vec<Arc<Region>> = vec![
            arc(RegionType::Bitmap, 16, &[0, 1, 2]),
            arc(RegionType::Bitmap, 16, &[2, 3]),
            arc(RegionType::Bitmap, 16, &[3, 4]),
        ];
        // (r0 U r1) \ r2
        let mut rmath = RegionMath::new();
        rmath
            .push_region(0)
            .push_region(1)
            .push_nary(SetOp::Union, 2)
            .push_region(2)
            .push_nary(SetOp::Difference, 2);
        let out = ops
            .evaluate_region_math(&rmath, RegionType::Bitmap, 16, |id| {
                Ok(regions[id as usize].clone())
            })
            .unwrap();
        assert_eq!(out.to_rids(0), vec![0, 1, 2]);
    }

    #[test]
    fn test_binary_in_place() {
        let ops = SetOps::default();
        // Bitmap <- bitmap reuses storage; bitmap <- CBLQ imprints.
        let mut acc = region_from_rids(RegionType::Bitmap, 64, &[0, 1, 2]);
        let other = region_from_rids(RegionType::Bitmap, 64, &[2, 3]);
        ops.binary_in_place(&mut acc, &other, SetOp::Union).unwrap();
        assert_eq!(acc.to_rids(0), vec![0, 1, 2, 3]);

        let cblq = region_from_rids(RegionType::Cblq2, 64, &[3, 4]);
        ops.binary_in_place(&mut acc, &cblq, SetOp::Difference)
            .unwrap();
        assert_eq!(acc.to_rids(0), vec![0, 1, 2]);

        // Other representations replace the left operand.
        let mut wah = region_from_rids(RegionType::Wah, 64, &[5, 6]);
        let wah2 = region_from_rids(RegionType::Wah, 64, &[6, 7]);
        ops.binary_in_place(&mut wah, &wah2, SetOp::Intersection)
            .unwrap();
        assert_eq!(wah.to_rids(0), vec![6]);
    }

    #[test]
    fn test_region_math_bad_arity() {
        let ops = SetOps::default();
        let mut rmath = RegionMath::new();
        rmath.push_region(0).push_nary(SetOp::Union, 2);
        let err = ops.evaluate_region_math(&rmath, RegionType::Bitmap, 8, |_| {
            Ok(Arc::new(Region::make_uniform(RegionType::Bitmap, 8, false)))
        });
        assert!(matches!(err, Err(BinIdxError::BadRegionMath(_))));
    }
}
