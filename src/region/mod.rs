// region/mod.rs
//
// Region encodings: compact representations of a set of RIDs drawn from
// [0, domain_size). The closed set of variants is a tagged enum; every
// operation on the polymorphic `Region` pattern-matches the tag and calls
// the concrete implementation.

pub mod bitmap;
pub mod cblq;
pub mod cii;
pub mod ii;
pub mod wah;

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

pub use bitmap::BitmapRegion;
pub use cblq::{CblqRegion, CblqSemiwords};
pub use cii::CiiRegion;
pub use ii::IiRegion;
pub use wah::WahRegion;

use crate::error::BinIdxError;
use crate::io::archive::{read_u8, write_u8};

/// One-byte on-disk tags for region representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegionType {
    Ii,
    Cii,
    Bitmap,
    Wah,
    Cblq2,
    Cblq3,
    Cblq4,
}

impl RegionType {
    pub fn tag(&self) -> u8 {
        match self {
            RegionType::Ii => 0,
            RegionType::Cii => 1,
            RegionType::Bitmap => 2,
            RegionType::Wah => 3,
            RegionType::Cblq2 => 4,
            RegionType::Cblq3 => 5,
            RegionType::Cblq4 => 6,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, BinIdxError> {
        Ok(match tag {
            0 => RegionType::Ii,
            1 => RegionType::Cii,
            2 => RegionType::Bitmap,
            3 => RegionType::Wah,
            4 => RegionType::Cblq2,
            5 => RegionType::Cblq3,
            6 => RegionType::Cblq4,
            other => return Err(BinIdxError::UnknownRegionTag(other)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegionType::Ii => "ii",
            RegionType::Cii => "cii",
            RegionType::Bitmap => "bitmap",
            RegionType::Wah => "wah",
            RegionType::Cblq2 => "cblq-2",
            RegionType::Cblq3 => "cblq-3",
            RegionType::Cblq4 => "cblq-4",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, BinIdxError> {
        Ok(match name {
            "ii" => RegionType::Ii,
            "cii" => RegionType::Cii,
            "bitmap" => RegionType::Bitmap,
            "wah" => RegionType::Wah,
            "cblq-2" => RegionType::Cblq2,
            "cblq-3" => RegionType::Cblq3,
            "cblq-4" => RegionType::Cblq4,
            other => {
                return Err(BinIdxError::StringError(format!(
                    "unknown region representation: {}",
                    other
                )))
            }
        })
    }
}

/// Whether a region is known to be all-clear, all-set, or neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionUniformity {
    Empty,
    Filled,
    Mixed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Ii(IiRegion),
    Cii(CiiRegion),
    Bitmap(BitmapRegion),
    Wah(WahRegion),
    Cblq2(CblqRegion<2>),
    Cblq3(CblqRegion<3>),
    Cblq4(CblqRegion<4>),
}

impl Region {
    pub fn region_type(&self) -> RegionType {
        match self {
            Region::Ii(_) => RegionType::Ii,
            Region::Cii(_) => RegionType::Cii,
            Region::Bitmap(_) => RegionType::Bitmap,
            Region::Wah(_) => RegionType::Wah,
            Region::Cblq2(_) => RegionType::Cblq2,
            Region::Cblq3(_) => RegionType::Cblq3,
            Region::Cblq4(_) => RegionType::Cblq4,
        }
    }

    pub fn domain_size(&self) -> u64 {
        match self {
            Region::Ii(r) => r.domain_size(),
            Region::Cii(r) => r.domain_size(),
            Region::Bitmap(r) => r.domain_size(),
            Region::Wah(r) => r.domain_size(),
            Region::Cblq2(r) => r.domain_size(),
            Region::Cblq3(r) => r.domain_size(),
            Region::Cblq4(r) => r.domain_size(),
        }
    }

    /// Encoded payload size, as counted against the query cost model.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            Region::Ii(r) => r.size_in_bytes(),
            Region::Cii(r) => r.size_in_bytes(),
            Region::Bitmap(r) => r.size_in_bytes(),
            Region::Wah(r) => r.size_in_bytes(),
            Region::Cblq2(r) => r.size_in_bytes(),
            Region::Cblq3(r) => r.size_in_bytes(),
            Region::Cblq4(r) => r.size_in_bytes(),
        }
    }

    pub fn element_count(&self) -> u64 {
        match self {
            Region::Ii(r) => r.element_count(),
            Region::Cii(r) => r.element_count(),
            Region::Bitmap(r) => r.element_count(),
            Region::Wah(r) => r.element_count(),
            Region::Cblq2(r) => r.element_count(),
            Region::Cblq3(r) => r.element_count(),
            Region::Cblq4(r) => r.element_count(),
        }
    }

    /// Sorted RIDs, shifted by `offset` into the global domain.
    pub fn to_rids(&self, offset: u64) -> Vec<u64> {
        match self {
            Region::Ii(r) => r.to_rids(offset),
            Region::Cii(r) => r.to_rids(offset),
            Region::Bitmap(r) => r.to_rids(offset),
            Region::Wah(r) => r.to_rids(offset),
            Region::Cblq2(r) => r.to_rids(offset),
            Region::Cblq3(r) => r.to_rids(offset),
            Region::Cblq4(r) => r.to_rids(offset),
        }
    }

    pub fn uniformity(&self) -> RegionUniformity {
        match self {
            Region::Ii(r) => r.uniformity(),
            Region::Cii(r) => r.uniformity(),
            Region::Bitmap(r) => r.uniformity(),
            Region::Wah(r) => r.uniformity(),
            Region::Cblq2(r) => r.uniformity(),
            Region::Cblq3(r) => r.uniformity(),
            Region::Cblq4(r) => r.uniformity(),
        }
    }

    pub fn make_uniform(rep: RegionType, domain_size: u64, filled: bool) -> Region {
        match rep {
            RegionType::Ii => Region::Ii(IiRegion::make_uniform(domain_size, filled)),
            RegionType::Cii => Region::Cii(CiiRegion::make_uniform(domain_size, filled)),
            RegionType::Bitmap => Region::Bitmap(BitmapRegion::make_uniform(domain_size, filled)),
            RegionType::Wah => Region::Wah(WahRegion::make_uniform(domain_size, filled)),
            RegionType::Cblq2 => Region::Cblq2(CblqRegion::new_uniform(domain_size, filled)),
            RegionType::Cblq3 => Region::Cblq3(CblqRegion::new_uniform(domain_size, filled)),
            RegionType::Cblq4 => Region::Cblq4(CblqRegion::new_uniform(domain_size, filled)),
        }
    }

    /// Payload only; the representation tag is written by the container.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        match self {
            Region::Ii(r) => r.save(w),
            Region::Cii(r) => r.save(w),
            Region::Bitmap(r) => r.save(w),
            Region::Wah(r) => r.save(w),
            Region::Cblq2(r) => r.save(w),
            Region::Cblq3(r) => r.save(w),
            Region::Cblq4(r) => r.save(w),
        }
    }

    pub fn load<R: Read>(rep: RegionType, r: &mut R) -> Result<Region, BinIdxError> {
        Ok(match rep {
            RegionType::Ii => Region::Ii(IiRegion::load(r)?),
            RegionType::Cii => Region::Cii(CiiRegion::load(r)?),
            RegionType::Bitmap => Region::Bitmap(BitmapRegion::load(r)?),
            RegionType::Wah => Region::Wah(WahRegion::load(r)?),
            RegionType::Cblq2 => Region::Cblq2(CblqRegion::load(r)?),
            RegionType::Cblq3 => Region::Cblq3(CblqRegion::load(r)?),
            RegionType::Cblq4 => Region::Cblq4(CblqRegion::load(r)?),
        })
    }

    /// Tagged form: `u8` representation tag followed by the payload.
    pub fn save_tagged<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        write_u8(w, self.region_type().tag())?;
        self.save(w)
    }

    pub fn load_tagged<R: Read>(r: &mut R) -> Result<Region, BinIdxError> {
        let rep = RegionType::from_tag(read_u8(r)?)?;
        Region::load(rep, r)
    }
}

/// Streaming region construction for the index builder: set bits arrive
/// as non-overlapping runs in increasing position order; gaps and the
/// tail are zero-filled.
#[derive(Debug)]
pub enum RegionEncoder {
    Ii(ii::IiEncoder),
    Cii(cii::CiiEncoder),
    Bitmap(bitmap::BitmapEncoder),
    Wah(wah::WahEncoder),
    Cblq2(cblq::CblqEncoder<2>),
    Cblq3(cblq::CblqEncoder<3>),
    Cblq4(cblq::CblqEncoder<4>),
}

impl RegionEncoder {
    pub fn new(rep: RegionType, domain_size: u64, cblq_dense_suffix: bool) -> RegionEncoder {
        match rep {
            RegionType::Ii => RegionEncoder::Ii(ii::IiEncoder::new(domain_size)),
            RegionType::Cii => RegionEncoder::Cii(cii::CiiEncoder::new(domain_size)),
            RegionType::Bitmap => RegionEncoder::Bitmap(bitmap::BitmapEncoder::new(domain_size)),
            RegionType::Wah => RegionEncoder::Wah(wah::WahEncoder::new(domain_size)),
            RegionType::Cblq2 => {
                RegionEncoder::Cblq2(cblq::CblqEncoder::new(domain_size, cblq_dense_suffix))
            }
            RegionType::Cblq3 => {
                RegionEncoder::Cblq3(cblq::CblqEncoder::new(domain_size, cblq_dense_suffix))
            }
            RegionType::Cblq4 => {
                RegionEncoder::Cblq4(cblq::CblqEncoder::new(domain_size, cblq_dense_suffix))
            }
        }
    }

    pub fn insert_bits(&mut self, start: u64, len: u64) {
        match self {
            RegionEncoder::Ii(e) => e.insert_bits(start, len),
            RegionEncoder::Cii(e) => e.insert_bits(start, len),
            RegionEncoder::Bitmap(e) => e.insert_bits(start, len),
            RegionEncoder::Wah(e) => e.insert_bits(start, len),
            RegionEncoder::Cblq2(e) => e.insert_bits(start, len),
            RegionEncoder::Cblq3(e) => e.insert_bits(start, len),
            RegionEncoder::Cblq4(e) => e.insert_bits(start, len),
        }
    }

    pub fn finish(self) -> Region {
        match self {
            RegionEncoder::Ii(e) => Region::Ii(e.finish()),
            RegionEncoder::Cii(e) => Region::Cii(e.finish()),
            RegionEncoder::Bitmap(e) => Region::Bitmap(e.finish()),
            RegionEncoder::Wah(e) => Region::Wah(e.finish()),
            RegionEncoder::Cblq2(e) => Region::Cblq2(e.finish()),
            RegionEncoder::Cblq3(e) => Region::Cblq3(e.finish()),
            RegionEncoder::Cblq4(e) => Region::Cblq4(e.finish()),
        }
    }
}

/// Build a region of the given representation from a sorted RID set.
/// Convenience used by tests and the re-encoding paths.
pub fn region_from_rids(rep: RegionType, domain_size: u64, rids: &[u64]) -> Region {
    let mut enc = RegionEncoder::new(rep, domain_size, false);
    let mut run_start = None;
    let mut prev = 0u64;
    for &rid in rids {
        match run_start {
            None => run_start = Some(rid),
            Some(start) => {
                if rid != prev + 1 {
                    enc.insert_bits(start, prev - start + 1);
                    run_start = Some(rid);
                }
            }
        }
        prev = rid;
    }
    if let Some(start) = run_start {
        enc.insert_bits(start, prev - start + 1);
    }
    enc.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) const ALL_REPS: &[RegionType] = &[
        RegionType::Ii,
        RegionType::Cii,
        RegionType::Bitmap,
        RegionType::Wah,
        RegionType::Cblq2,
        RegionType::Cblq3,
        RegionType::Cblq4,
    ];

    #[test]
    fn test_tag_round_trip() {
        for rep in ALL_REPS {
            assert_eq!(RegionType::from_tag(rep.tag()).unwrap(), *rep);
            assert_eq!(RegionType::from_name(rep.name()).unwrap(), *rep);
        }
        assert!(RegionType::from_tag(99).is_err());
    }

    #[test]
    fn test_encode_decode_all_reps() {
        let rids: Vec<u64> = vec![0, 1, 2, 3, 7, 8, 9, 10, 12, 13, 15];
        for rep in ALL_REPS {
            let region = region_from_rids(*rep, 16, &rids);
            assert_eq!(region.to_rids(0), rids, "rep {:?}", rep);
            assert_eq!(region.element_count(), rids.len() as u64);
            assert_eq!(region.domain_size(), 16);
        }
    }

    #[test]
    fn test_save_load_all_reps() {
        let rids: Vec<u64> = vec![5, 6, 7, 100, 230, 231, 1000];
        for rep in ALL_REPS {
            let region = region_from_rids(*rep, 1024, &rids);
            let mut buf = Vec::new();
            region.save_tagged(&mut buf).unwrap();
            let loaded = Region::load_tagged(&mut buf.as_slice()).unwrap();
            assert_eq!(loaded, region, "rep {:?}", rep);
        }
    }

    #[test]
    fn test_uniform_regions() {
        for rep in ALL_REPS {
            let empty = Region::make_uniform(*rep, 100, false);
            let full = Region::make_uniform(*rep, 100, true);
            assert_eq!(empty.uniformity(), RegionUniformity::Empty);
            assert_eq!(full.uniformity(), RegionUniformity::Filled);
            assert_eq!(empty.element_count(), 0);
            assert_eq!(full.element_count(), 100);
            assert_eq!(full.to_rids(0), (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_offset_rid_conversion() {
        let region = region_from_rids(RegionType::Ii, 8, &[1, 3]);
        assert_eq!(region.to_rids(100), vec![101, 103]);
    }
}
