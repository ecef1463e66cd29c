// binning.rs
//
// A BinningSpec binds a quantizer to the ordered list of quantized keys
// actually observed while building an index. Before population only the
// quantization services are usable; the bin-lookup operations require a
// populated spec and report a logic error otherwise.

use std::cmp::Ordering;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::io::archive::{read_u8, write_u8};
use crate::quant::{QKey, Quantizer};
use crate::value::{DataType, UniversalValue};

pub type BinId = usize;
pub type BinCount = usize;

const BINNING_TAG_SIGBITS: u8 = 0;
const BINNING_TAG_EXPLICIT: u8 = 1;
const BINNING_TAG_PRECISION: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct BinningSpec {
    datatype: DataType,
    quantizer: Quantizer,
    keys: Vec<QKey>,
    populated: bool,
}

/// On-disk payload following the two tag bytes.
#[derive(Serialize, Deserialize)]
struct SigbitsPayload {
    bits: u32,
    keys: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct PrecisionPayload {
    digits: u32,
    keys: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct ExplicitPayload {
    bounds: Vec<f64>,
    keys: Vec<f64>,
}

impl BinningSpec {
    pub fn new(datatype: DataType, quantizer: Quantizer) -> Self {
        BinningSpec {
            datatype,
            quantizer,
            keys: Vec::new(),
            populated: false,
        }
    }

    pub fn datatype(&self) -> DataType {
        self.datatype
    }

    pub fn quantizer(&self) -> &Quantizer {
        &self.quantizer
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Install the sorted key list observed by an index build.
    /// Keys must be strictly increasing under the quantizer's compare.
    pub fn populate(&mut self, keys: Vec<QKey>) -> Result<(), BinIdxError> {
        debug_assert!(keys
            .windows(2)
            .all(|w| self.quantizer.compare(w[0], w[1]) == Ordering::Less));
        self.keys = keys;
        self.populated = true;
        Ok(())
    }

    pub fn depopulate(&mut self) {
        self.keys.clear();
        self.populated = false;
    }

    pub fn num_bins(&self) -> Result<BinCount, BinIdxError> {
        self.require_populated()?;
        Ok(self.keys.len())
    }

    pub fn bin_qkey(&self, bin: BinId) -> Result<QKey, BinIdxError> {
        self.require_populated()?;
        Ok(self.keys[bin])
    }

    pub fn bin_key(&self, bin: BinId) -> Result<UniversalValue, BinIdxError> {
        self.require_populated()?;
        Ok(self
            .quantizer
            .key_to_universal(self.datatype, self.keys[bin]))
    }

    pub fn all_bin_keys(&self) -> Result<Vec<UniversalValue>, BinIdxError> {
        self.require_populated()?;
        (0..self.keys.len()).map(|i| self.bin_key(i)).collect()
    }

    /// Smallest bin `i` with `key[i] >= quantize(value)`.
    pub fn lower_bound_bin(&self, value: &UniversalValue) -> Result<BinId, BinIdxError> {
        self.bound_bin(value, true)
    }

    /// Smallest bin `i` with `key[i] > quantize(value)`.
    pub fn upper_bound_bin(&self, value: &UniversalValue) -> Result<BinId, BinIdxError> {
        self.bound_bin(value, false)
    }

    fn bound_bin(&self, value: &UniversalValue, inclusive: bool) -> Result<BinId, BinIdxError> {
        self.require_populated()?;
        let value_key = match self.quantizer.quantize_universal(value) {
            Ok(k) => k,
            // A value outside the datatype's class cannot match any bin.
            Err(_) => return Ok(self.keys.len()),
        };
        let idx = self.keys.partition_point(|&k| {
            let ord = self.quantizer.compare(k, value_key);
            if inclusive {
                ord == Ordering::Less
            } else {
                ord != Ordering::Greater
            }
        });
        Ok(idx)
    }

    fn require_populated(&self) -> Result<(), BinIdxError> {
        if self.populated {
            Ok(())
        } else {
            Err(BinIdxError::UnpopulatedBinning)
        }
    }

    pub fn binning_tag(&self) -> u8 {
        match self.quantizer {
            Quantizer::Sigbits { .. } => BINNING_TAG_SIGBITS,
            Quantizer::ExplicitBins { .. } => BINNING_TAG_EXPLICIT,
            Quantizer::Precision { .. } => BINNING_TAG_PRECISION,
        }
    }

    /// `u8 datatype`, `u8 binning type`, bincode payload. Only populated
    /// specs are written; loading always yields a populated spec.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        self.require_populated()?;
        write_u8(w, self.datatype.tag())?;
        write_u8(w, self.binning_tag())?;
        match &self.quantizer {
            Quantizer::Sigbits { bits, .. } => {
                let keys = self
                    .keys
                    .iter()
                    .map(|k| match k {
                        QKey::U(v) => *v,
                        _ => unreachable!("sigbits keys are raw-bit keys"),
                    })
                    .collect();
                bincode::serialize_into(w, &SigbitsPayload { bits: *bits, keys })?;
            }
            Quantizer::Precision { digits } => {
                bincode::serialize_into(
                    w,
                    &PrecisionPayload {
                        digits: *digits,
                        keys: self.float_keys(),
                    },
                )?;
            }
            Quantizer::ExplicitBins { bounds } => {
                bincode::serialize_into(
                    w,
                    &ExplicitPayload {
                        bounds: bounds.clone(),
                        keys: self.float_keys(),
                    },
                )?;
            }
        }
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R) -> Result<Self, BinIdxError> {
        let datatype = DataType::from_tag(read_u8(r)?)?;
        let binning_tag = read_u8(r)?;
        let (quantizer, keys) = match binning_tag {
            BINNING_TAG_SIGBITS => {
                let payload: SigbitsPayload = bincode::deserialize_from(&mut *r)?;
                let quantizer = Quantizer::sigbits(datatype, payload.bits)?;
                let keys = payload.keys.into_iter().map(QKey::U).collect();
                (quantizer, keys)
            }
            BINNING_TAG_PRECISION => {
                let payload: PrecisionPayload = bincode::deserialize_from(&mut *r)?;
                let quantizer = Quantizer::precision(datatype, payload.digits)?;
                let keys = payload.keys.into_iter().map(QKey::F).collect();
                (quantizer, keys)
            }
            BINNING_TAG_EXPLICIT => {
                let payload: ExplicitPayload = bincode::deserialize_from(&mut *r)?;
                let quantizer = Quantizer::explicit_bins(datatype, payload.bounds)?;
                let keys = payload.keys.into_iter().map(QKey::F).collect();
                (quantizer, keys)
            }
            other => return Err(BinIdxError::UnknownBinningTag(other)),
        };
        let mut spec = BinningSpec::new(datatype, quantizer);
        spec.populate(keys)?;
        Ok(spec)
    }

    fn float_keys(&self) -> Vec<f64> {
        self.keys
            .iter()
            .map(|k| match k {
                QKey::F(f) => *f,
                QKey::I(i) => *i as f64,
                QKey::U(u) => *u as f64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_u8_spec() -> BinningSpec {
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();
        let mut spec = BinningSpec::new(DataType::UInt8, quantizer);
        spec.populate(vec![QKey::U(0), QKey::U(1), QKey::U(2)]).unwrap();
        spec
    }

    #[test]
    fn test_unpopulated_is_logic_error() {
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();
        let spec = BinningSpec::new(DataType::UInt8, quantizer);
        assert!(matches!(
            spec.num_bins(),
            Err(BinIdxError::UnpopulatedBinning)
        ));
        assert!(matches!(
            spec.lower_bound_bin(&UniversalValue::UInt(1)),
            Err(BinIdxError::UnpopulatedBinning)
        ));
    }

    #[test]
    fn test_bound_bins() {
        let spec = populated_u8_spec();
        assert_eq!(spec.lower_bound_bin(&UniversalValue::UInt(0)).unwrap(), 0);
        assert_eq!(spec.upper_bound_bin(&UniversalValue::UInt(0)).unwrap(), 1);
        assert_eq!(spec.lower_bound_bin(&UniversalValue::UInt(2)).unwrap(), 2);
        assert_eq!(spec.upper_bound_bin(&UniversalValue::UInt(2)).unwrap(), 3);
        // Above every bin.
        assert_eq!(spec.lower_bound_bin(&UniversalValue::UInt(9)).unwrap(), 3);
    }

    #[test]
    fn test_save_load_round_trip() {
        let spec = populated_u8_spec();
        let mut buf = Vec::new();
        spec.save(&mut buf).unwrap();
        let loaded = BinningSpec::load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded, spec);
        assert_eq!(loaded.num_bins().unwrap(), 3);
    }

    #[test]
    fn test_explicit_spec_round_trip() {
        let quantizer =
            Quantizer::explicit_bins(DataType::Float64, vec![0.0, 10.0, 20.0]).unwrap();
        let mut spec = BinningSpec::new(DataType::Float64, quantizer);
        spec.populate(vec![
            QKey::F(f64::NEG_INFINITY),
            QKey::F(0.0),
            QKey::F(10.0),
        ])
        .unwrap();
        let mut buf = Vec::new();
        spec.save(&mut buf).unwrap();
        let loaded = BinningSpec::load(&mut buf.as_slice()).unwrap();
        assert_eq!(loaded, spec);
    }
}
