// encoding/mod.rs
//
// Index encodings: rules rewriting the per-bin regions of an
// equality-encoded index into a different stored region set, together
// with the query-time region math that reconstructs "union of bins
// [lb, ub)" from the stored regions.
//
// For every encoding the prefer-complement plan differs from the direct
// plan only when the bin interval touches the last bin; it is then the
// complement of the remaining prefix interval under a final complement,
// which is what the query engine's cost model weighs against the direct
// plan.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::BinIdxError;
use crate::io::archive::{read_u8, write_u8};
use crate::region::{Region, RegionType};
use crate::setops::{RegionMath, SetOp, SetOps, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexEncoding {
    Equality,
    Range,
    Interval,
    Hierarchical,
    BinaryComponent,
}

impl IndexEncoding {
    pub fn tag(&self) -> u8 {
        match self {
            IndexEncoding::Equality => 0,
            IndexEncoding::Range => 1,
            IndexEncoding::Interval => 2,
            IndexEncoding::Hierarchical => 3,
            IndexEncoding::BinaryComponent => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, BinIdxError> {
        Ok(match tag {
            0 => IndexEncoding::Equality,
            1 => IndexEncoding::Range,
            2 => IndexEncoding::Interval,
            3 => IndexEncoding::Hierarchical,
            4 => IndexEncoding::BinaryComponent,
            other => return Err(BinIdxError::UnknownEncodingTag(other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexEncoding::Equality => "flat",
            IndexEncoding::Range => "range",
            IndexEncoding::Interval => "interval",
            IndexEncoding::Hierarchical => "hier",
            IndexEncoding::BinaryComponent => "binarycomp",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, BinIdxError> {
        Ok(match name {
            "flat" => IndexEncoding::Equality,
            "range" => IndexEncoding::Range,
            "interval" => IndexEncoding::Interval,
            "hier" => IndexEncoding::Hierarchical,
            "binarycomp" => IndexEncoding::BinaryComponent,
            other => {
                return Err(BinIdxError::StringError(format!(
                    "unknown index encoding: {}",
                    other
                )))
            }
        })
    }

    /// All encodings are parameterless; the tag is the whole encoding.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        write_u8(w, self.tag())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self, BinIdxError> {
        Self::from_tag(read_u8(r)?)
    }

    pub fn num_regions(&self, nbins: usize) -> usize {
        match self {
            IndexEncoding::Equality | IndexEncoding::Range => nbins,
            IndexEncoding::Interval => nbins.div_ceil(2),
            IndexEncoding::Hierarchical => hier_levels(nbins)
                .iter()
                .map(|level| level.count)
                .sum(),
            IndexEncoding::BinaryComponent => binarycomp_bits(nbins),
        }
    }

    /// The bins composing each stored region. The reference semantics;
    /// `encoded_regions` must agree with it.
    pub fn region_definitions(&self, nbins: usize) -> Vec<Vec<usize>> {
        match self {
            IndexEncoding::Equality => (0..nbins).map(|i| vec![i]).collect(),
            IndexEncoding::Range => (0..nbins).map(|i| (0..=i).collect()).collect(),
            IndexEncoding::Interval => {
                let nregions = nbins.div_ceil(2);
                let width = nbins / 2;
                (0..nregions).map(|i| (i..i + width).collect()).collect()
            }
            IndexEncoding::Hierarchical => {
                let mut defs = Vec::new();
                for level in hier_levels(nbins) {
                    for g in 0..level.count {
                        let lo = g * level.width;
                        let hi = ((g + 1) * level.width).min(nbins);
                        defs.push((lo..hi).collect());
                    }
                }
                defs
            }
            IndexEncoding::BinaryComponent => {
                let bits = binarycomp_bits(nbins);
                (0..bits)
                    .map(|b| (0..nbins).filter(|i| (i >> b) & 1 == 1).collect())
                    .collect()
            }
        }
    }

    /// Build the stored regions from the bin regions. Range and Interval
    /// reuse the previous region incrementally instead of unioning from
    /// scratch; the rest go through the generic definitions.
    pub fn encoded_regions(
        &self,
        bins: &[Arc<Region>],
        setops: &SetOps,
    ) -> Result<Vec<Arc<Region>>, BinIdxError> {
        if bins.is_empty() {
            return Ok(Vec::new());
        }
        let rep = bins[0].region_type();
        let domain_size = bins[0].domain_size();

        match self {
            IndexEncoding::Equality => Ok(bins.to_vec()),
            IndexEncoding::Range => {
                // Running prefix union.
                let mut out: Vec<Arc<Region>> = Vec::with_capacity(bins.len());
                let mut acc = bins[0].clone();
                out.push(acc.clone());
                for bin in &bins[1..] {
                    acc = setops.nary(rep, domain_size, &[acc, bin.clone()], SetOp::Union)?;
                    out.push(acc.clone());
                }
                Ok(out)
            }
            IndexEncoding::Interval => {
                let nregions = bins.len().div_ceil(2);
                let width = bins.len() / 2;
                let mut out: Vec<Arc<Region>> = Vec::with_capacity(nregions);
                let first = setops.nary(rep, domain_size, &bins[..width], SetOp::Union)?;
                out.push(first);
                for i in 1..nregions {
                    // Slide the window: drop bin i-1, add bin i-1+width.
                    let dropped = setops.nary(
                        rep,
                        domain_size,
                        &[out[i - 1].clone(), bins[i - 1].clone()],
                        SetOp::Difference,
                    )?;
                    let slid = setops.nary(
                        rep,
                        domain_size,
                        &[dropped, bins[i - 1 + width].clone()],
                        SetOp::Union,
                    )?;
                    out.push(slid);
                }
                Ok(out)
            }
            IndexEncoding::Hierarchical | IndexEncoding::BinaryComponent => {
                let mut out = Vec::new();
                for def in self.region_definitions(bins.len()) {
                    let operands: Vec<Arc<Region>> =
                        def.iter().map(|&b| bins[b].clone()).collect();
                    out.push(setops.nary(rep, domain_size, &operands, SetOp::Union)?);
                }
                Ok(out)
            }
        }
    }

    /// The region-math plan computing "union of bins [lb, ub)" over the
    /// stored regions. `prefer_complement` selects the complement form
    /// for intervals touching the last bin. The caller guarantees
    /// `lb < ub` and that the interval does not cover all bins.
    pub fn region_math(
        &self,
        nbins: usize,
        lb: usize,
        ub: usize,
        prefer_complement: bool,
    ) -> RegionMath {
        debug_assert!(lb < ub && ub <= nbins && (lb > 0 || ub < nbins));
        let mut rmath = RegionMath::new();
        if prefer_complement && ub == nbins && *self != IndexEncoding::Interval {
            // [lb, nbins) = complement of [0, lb); lb > 0 here.
            self.push_interval_math(&mut rmath, nbins, 0, lb);
            rmath.push_unary(UnaryOp::Complement);
        } else {
            self.push_interval_math(&mut rmath, nbins, lb, ub);
        }
        rmath
    }

    fn push_interval_math(&self, rmath: &mut RegionMath, nbins: usize, lb: usize, ub: usize) {
        match self {
            IndexEncoding::Equality => {
                for bin in lb..ub {
                    rmath.push_region(bin as u64);
                }
                if ub - lb > 1 {
                    rmath.push_nary(SetOp::Union, ub - lb);
                }
            }
            IndexEncoding::Range => {
                // Stored region i = union of bins [0..i]. The direct
                // plan reads R[ub-1] even when it is the full region;
                // the prefer-complement path (¬R[lb-1], via the generic
                // rewrite above) is what the cost model weighs it against.
                if lb == 0 {
                    rmath.push_region((ub - 1) as u64);
                } else {
                    rmath.push_region((ub - 1) as u64);
                    rmath.push_region((lb - 1) as u64);
                    rmath.push_nary(SetOp::Difference, 2);
                }
            }
            IndexEncoding::Interval => {
                interval_math(rmath, nbins, lb, ub);
            }
            IndexEncoding::Hierarchical => {
                let mut count = 0usize;
                for region in hier_cover(nbins, lb, ub) {
                    rmath.push_region(region as u64);
                    count += 1;
                }
                if count > 1 {
                    rmath.push_nary(SetOp::Union, count);
                }
            }
            IndexEncoding::BinaryComponent => {
                binarycomp_math(rmath, nbins, lb, ub);
            }
        }
    }
}

// ---- Interval encoding (Wu-Buchmann) ----

/// The five cases of the interval-encoded range lookup. A request
/// covering the last bin is rewritten as the complement of the
/// remaining prefix interval.
fn interval_math(rmath: &mut RegionMath, nbins: usize, mut lb: usize, mut ub: usize) {
    let nregions = nbins.div_ceil(2);
    let width = nbins / 2;

    let mut complement = false;
    if ub == nbins {
        ub = lb;
        lb = 0;
        complement = true;
    }

    if ub < nregions {
        rmath.push_region(lb as u64);
        rmath.push_region(ub as u64);
        rmath.push_nary(SetOp::Difference, 2);
    } else if lb >= nregions {
        rmath.push_region((ub - width) as u64);
        rmath.push_region((lb - width) as u64);
        rmath.push_nary(SetOp::Difference, 2);
    } else if ub - lb < width {
        rmath.push_region(lb as u64);
        rmath.push_region((ub - width) as u64);
        rmath.push_nary(SetOp::Intersection, 2);
    } else if ub - lb > width {
        rmath.push_region(lb as u64);
        rmath.push_region((ub - width) as u64);
        rmath.push_nary(SetOp::Union, 2);
    } else {
        rmath.push_region(lb as u64);
    }

    if complement {
        rmath.push_unary(UnaryOp::Complement);
    }
}

// ---- Hierarchical encoding ----

struct HierLevel {
    width: usize,
    count: usize,
}

/// Levels of union groups: width 1 (the bins), then doubling widths
/// while a level still has at least two groups.
fn hier_levels(nbins: usize) -> Vec<HierLevel> {
    let mut levels = Vec::new();
    let mut width = 1usize;
    while width == 1 || nbins.div_ceil(width) >= 2 {
        levels.push(HierLevel {
            width,
            count: nbins.div_ceil(width),
        });
        if width >= nbins {
            break;
        }
        width *= 2;
    }
    levels
}

/// Region id of group `g` at the level with the given width.
fn hier_region_id(nbins: usize, width: usize, g: usize) -> usize {
    let mut id = 0usize;
    for level in hier_levels(nbins) {
        if level.width == width {
            return id + g;
        }
        id += level.count;
    }
    unreachable!("width is always a generated level width")
}

/// Greedy aligned cover of [lb, ub) by maximal group regions. A group
/// is usable when its start is aligned to its width and its (possibly
/// nbins-truncated) extent stays inside the request.
fn hier_cover(nbins: usize, lb: usize, ub: usize) -> Vec<usize> {
    let widths: Vec<usize> = hier_levels(nbins).iter().map(|l| l.width).collect();
    let mut out = Vec::new();
    let mut pos = lb;
    while pos < ub {
        let mut best = 1usize;
        for &width in &widths {
            if pos % width == 0 && (pos + width).min(nbins) <= ub {
                best = best.max(width);
            }
        }
        out.push(hier_region_id(nbins, best, pos / best));
        pos = (pos + best).min(nbins);
    }
    out
}

// ---- Binary component encoding ----

fn binarycomp_bits(nbins: usize) -> usize {
    if nbins <= 1 {
        1
    } else {
        (usize::BITS - (nbins - 1).leading_zeros()) as usize
    }
}

/// Push the postfix form of `lt(x)` = union of bins with id < x, built
/// from the bit slices by the standard bit-sliced scan: for every set
/// bit b of x, the bins matching x on all higher bits and having bit b
/// clear are below x.
fn push_lt(rmath: &mut RegionMath, bits: usize, x: usize) {
    debug_assert!(x > 0);
    let mut terms = 0usize;
    for b in (0..bits).rev() {
        if (x >> b) & 1 == 0 {
            continue;
        }
        // intersect over j > b: slice j if x_j set, else its complement;
        // then the complement of slice b.
        let mut factors = 0usize;
        for j in (b + 1..bits).rev() {
            rmath.push_region(j as u64);
            if (x >> j) & 1 == 0 {
                rmath.push_unary(UnaryOp::Complement);
            }
            factors += 1;
        }
        rmath.push_region(b as u64);
        rmath.push_unary(UnaryOp::Complement);
        factors += 1;
        if factors > 1 {
            rmath.push_nary(SetOp::Intersection, factors);
        }
        terms += 1;
    }
    if terms > 1 {
        rmath.push_nary(SetOp::Union, terms);
    }
}

fn binarycomp_math(rmath: &mut RegionMath, nbins: usize, lb: usize, ub: usize) {
    let bits = binarycomp_bits(nbins);
    if lb == 0 {
        if ub == nbins {
            unreachable!("full cover is short-circuited by the caller");
        }
        push_lt(rmath, bits, ub);
    } else if ub == nbins {
        // [lb, nbins) = complement(lt(lb))
        push_lt(rmath, bits, lb);
        rmath.push_unary(UnaryOp::Complement);
    } else {
        // lt(ub) \ lt(lb)
        push_lt(rmath, bits, ub);
        push_lt(rmath, bits, lb);
        rmath.push_nary(SetOp::Difference, 2);
    }
}

pub const ALL_ENCODINGS: &[IndexEncoding] = &[
    IndexEncoding::Equality,
    IndexEncoding::Range,
    IndexEncoding::Interval,
    IndexEncoding::Hierarchical,
    IndexEncoding::BinaryComponent,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{region_from_rids, RegionType};
    use std::collections::BTreeSet;

    fn bins(nbins: usize, domain: u64) -> Vec<Arc<Region>> {
        // Bin i holds rids congruent to i modulo nbins.
        (0..nbins)
            .map(|i| {
                let rids: Vec<u64> = (0..domain).filter(|r| (*r as usize) % nbins == i).collect();
                Arc::new(region_from_rids(RegionType::Bitmap, domain, &rids))
            })
            .collect()
    }

    fn expected_rids(nbins: usize, domain: u64, lb: usize, ub: usize) -> Vec<u64> {
        (0..domain)
            .filter(|r| {
                let bin = (*r as usize) % nbins;
                bin >= lb && bin < ub
            })
            .collect()
    }

    #[test]
    fn test_tag_round_trip() {
        for enc in ALL_ENCODINGS {
            assert_eq!(IndexEncoding::from_tag(enc.tag()).unwrap(), *enc);
            assert_eq!(IndexEncoding::from_name(enc.name()).unwrap(), *enc);
        }
        assert!(IndexEncoding::from_tag(7).is_err());
    }

    #[test]
    fn test_region_counts_match_definitions() {
        for enc in ALL_ENCODINGS {
            for nbins in [1usize, 2, 3, 5, 7, 8, 16] {
                assert_eq!(
                    enc.num_regions(nbins),
                    enc.region_definitions(nbins).len(),
                    "{:?} nbins {}",
                    enc,
                    nbins
                );
            }
        }
    }

    #[test]
    fn test_encoded_regions_match_definitions() {
        let setops = SetOps::default();
        let nbins = 7;
        let domain = 70u64;
        let bin_regions = bins(nbins, domain);
        for enc in ALL_ENCODINGS {
            let encoded = enc.encoded_regions(&bin_regions, &setops).unwrap();
            let defs = enc.region_definitions(nbins);
            assert_eq!(encoded.len(), defs.len());
            for (region, def) in encoded.iter().zip(defs.iter()) {
                let expect: BTreeSet<u64> = def
                    .iter()
                    .flat_map(|&b| bin_regions[b].to_rids(0))
                    .collect();
                assert_eq!(
                    region.to_rids(0).into_iter().collect::<BTreeSet<_>>(),
                    expect,
                    "{:?} def {:?}",
                    enc,
                    def
                );
            }
        }
    }

    #[test]
    fn test_region_math_equivalence_all_ranges() {
        let setops = SetOps::default();
        for nbins in [3usize, 5, 8] {
            let domain = (nbins as u64) * 9;
            let bin_regions = bins(nbins, domain);
            for enc in ALL_ENCODINGS {
                let encoded = enc.encoded_regions(&bin_regions, &setops).unwrap();
                for lb in 0..nbins {
                    for ub in (lb + 1)..=nbins {
                        if lb == 0 && ub == nbins {
                            continue; // engine short-circuits full cover
                        }
                        for prefer_complement in [false, true] {
                            let rmath = enc.region_math(nbins, lb, ub, prefer_complement);
                            let got = setops
                                .evaluate_region_math(
                                    &rmath,
                                    RegionType::Bitmap,
                                    domain,
                                    |id| Ok(encoded[id as usize].clone()),
                                )
                                .unwrap();
                            assert_eq!(
                                got.to_rids(0),
                                expected_rids(nbins, domain, lb, ub),
                                "{:?} nbins {} [{},{}) compl {}",
                                enc,
                                nbins,
                                lb,
                                ub,
                                prefer_complement
                            );
                        }
                    }
                }
            }
        }
    }
}
