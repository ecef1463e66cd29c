// Property tests over the universal region invariants: encode/decode
// and save/load round trips for every representation, compaction
// invariance, and agreement of all CBLQ set-op implementations.

use std::collections::BTreeSet;
use std::sync::Arc;

use binidx::region::{region_from_rids, Region, RegionType};
use binidx::setops::{CblqAlgorithm, SetOp, SetOps};
use proptest::prelude::*;

const ALL_REPS: [RegionType; 7] = [
    RegionType::Ii,
    RegionType::Cii,
    RegionType::Bitmap,
    RegionType::Wah,
    RegionType::Cblq2,
    RegionType::Cblq3,
    RegionType::Cblq4,
];

const ALL_OPS: [SetOp; 4] = [
    SetOp::Union,
    SetOp::Intersection,
    SetOp::Difference,
    SetOp::SymmetricDifference,
];

fn rid_set(domain: u64) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(0..domain, 0..128)
        .prop_map(|set| set.into_iter().collect::<Vec<u64>>())
}

fn reference_op(a: &[u64], b: &[u64], op: SetOp) -> Vec<u64> {
    let a: BTreeSet<u64> = a.iter().copied().collect();
    let b: BTreeSet<u64> = b.iter().copied().collect();
    let out: BTreeSet<u64> = match op {
        SetOp::Union => a.union(&b).copied().collect(),
        SetOp::Intersection => a.intersection(&b).copied().collect(),
        SetOp::Difference => a.difference(&b).copied().collect(),
        SetOp::SymmetricDifference => a.symmetric_difference(&b).copied().collect(),
    };
    out.into_iter().collect()
}

proptest! {
    #[test]
    fn prop_encode_decode_round_trip(rids in rid_set(777)) {
        for rep in ALL_REPS {
            let region = region_from_rids(rep, 777, &rids);
            prop_assert_eq!(region.to_rids(0), rids.clone(), "rep {:?}", rep);
            prop_assert_eq!(region.element_count(), rids.len() as u64);
        }
    }

    #[test]
    fn prop_save_load_round_trip(rids in rid_set(777)) {
        for rep in ALL_REPS {
            let region = region_from_rids(rep, 777, &rids);
            let mut buf = Vec::new();
            region.save_tagged(&mut buf).unwrap();
            let loaded = Region::load_tagged(&mut buf.as_slice()).unwrap();
            prop_assert_eq!(loaded, region, "rep {:?}", rep);
        }
    }

    #[test]
    fn prop_binary_ops_match_reference(
        a in rid_set(300),
        b in rid_set(300),
    ) {
        let setops = SetOps::default();
        for rep in ALL_REPS {
            let ra = Arc::new(region_from_rids(rep, 300, &a));
            let rb = Arc::new(region_from_rids(rep, 300, &b));
            for op in ALL_OPS {
                let got = setops
                    .nary(rep, 300, &[ra.clone(), rb.clone()], op)
                    .unwrap();
                prop_assert_eq!(
                    got.to_rids(0),
                    reference_op(&a, &b, op),
                    "rep {:?} op {:?}",
                    rep,
                    op
                );
            }
        }
    }

    #[test]
    fn prop_complement_involution(rids in rid_set(500)) {
        let setops = SetOps::default();
        for rep in ALL_REPS {
            let region = region_from_rids(rep, 500, &rids);
            let complemented = setops.complement(&region).unwrap();
            prop_assert_eq!(
                complemented.element_count(),
                500 - rids.len() as u64
            );
            let back = setops.complement(&complemented).unwrap();
            prop_assert_eq!(back.to_rids(0), rids.clone(), "rep {:?}", rep);
        }
    }

    #[test]
    fn prop_cblq_implementations_agree(
        a in rid_set(1024),
        b in rid_set(1024),
        c in rid_set(1024),
        dense in any::<bool>(),
    ) {
        let algorithms = [
            CblqAlgorithm::Baseline,
            CblqAlgorithm::FastUnion,
            CblqAlgorithm::NAry1,
            CblqAlgorithm::NAry2Dense,
            CblqAlgorithm::NAry3Dense,
            CblqAlgorithm::NAry3Fast,
        ];
        let make = |rids: &[u64]| -> Arc<Region> {
            let mut enc = binidx::region::cblq::CblqEncoder::<2>::new(1024, dense);
            let mut run: Option<(u64, u64)> = None;
            for &rid in rids {
                match run {
                    Some((start, len)) if start + len == rid => run = Some((start, len + 1)),
                    Some((start, len)) => {
                        enc.insert_bits(start, len);
                        run = Some((rid, 1));
                    }
                    None => run = Some((rid, 1)),
                }
            }
            if let Some((start, len)) = run {
                enc.insert_bits(start, len);
            }
            Arc::new(Region::Cblq2(enc.finish()))
        };
        let operands = [make(&a), make(&b), make(&c)];

        for op in ALL_OPS {
            let baseline = SetOps::with_algorithm(CblqAlgorithm::Baseline)
                .nary(RegionType::Cblq2, 1024, &operands, op)
                .unwrap();
            for algorithm in &algorithms[1..] {
                let got = SetOps::with_algorithm(*algorithm)
                    .nary(RegionType::Cblq2, 1024, &operands, op)
                    .unwrap();
                prop_assert_eq!(
                    got.as_ref(),
                    baseline.as_ref(),
                    "algorithm {:?} op {:?} dense {}",
                    algorithm,
                    op,
                    dense
                );
            }
        }
    }

    #[test]
    fn prop_cblq_compaction_invariant(rids in rid_set(512), dense in any::<bool>()) {
        let mut enc = binidx::region::cblq::CblqEncoder::<3>::new(512, dense);
        for &rid in &rids {
            enc.insert_bits(rid, 1);
        }
        let mut region = enc.finish();
        let decoded = region.to_rids(0);
        region.compact();
        prop_assert_eq!(region.to_rids(0), decoded);
        let compacted_once = region.clone();
        region.compact();
        prop_assert_eq!(region, compacted_once);
    }
}
