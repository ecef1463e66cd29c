// index.rs
//
// A binned index: the indexed datatype, the domain size, the index
// encoding, the region representation, the binning specification, and
// the ordered stored regions. Under the equality encoding region i is
// bin i; other encodings derive their regions (and may change the
// region count).

use std::sync::Arc;

use crate::binning::BinningSpec;
use crate::encoding::IndexEncoding;
use crate::error::BinIdxError;
use crate::region::{Region, RegionType};
use crate::setops::SetOps;
use crate::value::DataType;

#[derive(Debug, Clone)]
pub struct BinnedIndex {
    datatype: DataType,
    domain_size: u64,
    encoding: IndexEncoding,
    rep: RegionType,
    binning: Arc<BinningSpec>,
    regions: Vec<Arc<Region>>,
}

impl BinnedIndex {
    pub fn new(
        datatype: DataType,
        domain_size: u64,
        encoding: IndexEncoding,
        rep: RegionType,
        binning: Arc<BinningSpec>,
        regions: Vec<Arc<Region>>,
    ) -> Self {
        BinnedIndex {
            datatype,
            domain_size,
            encoding,
            rep,
            binning,
            regions,
        }
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn domain_size(&self) -> u64 {
        self.domain_size
    }

    pub fn encoding(&self) -> IndexEncoding {
        self.encoding
    }

    pub fn rep(&self) -> RegionType {
        self.rep
    }

    pub fn binning(&self) -> &Arc<BinningSpec> {
        &self.binning
    }

    pub fn num_bins(&self) -> Result<usize, BinIdxError> {
        self.binning.num_bins()
    }

    pub fn num_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, id: usize) -> &Arc<Region> {
        &self.regions[id]
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }

    pub fn size_in_bytes(&self) -> usize {
        self.regions.iter().map(|r| r.size_in_bytes()).sum()
    }

    /// Re-encode an equality index under a new index encoding. The
    /// binning spec is shared with the derived index.
    pub fn reencode(
        &self,
        encoding: IndexEncoding,
        setops: &SetOps,
    ) -> Result<BinnedIndex, BinIdxError> {
        if self.encoding != IndexEncoding::Equality {
            return Err(BinIdxError::IncompatibleOperands(
                "re-encoding starts from an equality-encoded index".into(),
            ));
        }
        let regions = encoding.encoded_regions(&self.regions, setops)?;
        Ok(BinnedIndex {
            datatype: self.datatype,
            domain_size: self.domain_size,
            encoding,
            rep: self.rep,
            binning: self.binning.clone(),
            regions,
        })
    }
}
