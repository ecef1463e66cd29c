// quant.rs
//
// Quantization: mapping values to quantized keys (QKeys) and ordering
// QKeys. Three quantizers exist: sigbits (top bits of the raw pattern),
// precision (round to d significant decimal digits, floats only) and
// explicit bins (sorted boundary list).

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;
use crate::value::{DataType, Indexable, Signedness, UniversalValue};

/// A quantized key. Sigbits keys are shifted bit patterns (`U`); precision
/// and explicit-bins keys are representative values of the bin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum QKey {
    U(u64),
    I(i64),
    F(f64),
}

impl QKey {
    fn raw_bits(&self) -> u64 {
        match self {
            QKey::U(v) => *v,
            QKey::I(v) => *v as u64,
            QKey::F(v) => v.to_bits(),
        }
    }
}

// Bin identity is raw-bit identity; ordering is the quantizer's business.
impl PartialEq for QKey {
    fn eq(&self, other: &Self) -> bool {
        self.raw_bits() == other.raw_bits()
    }
}

impl Eq for QKey {}

impl Hash for QKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw_bits().hash(state);
    }
}

/// FastBit's coarsen_double: round to `prec` significant decimal digits.
/// Small magnitudes are computed through integer division of powers of
/// ten so persisted precision-binned keys are reproducible bit-for-bit.
/// Zero stays zero; denormals round to zero; `prec > 15` passes through.
pub fn coarsen_double(input: f64, prec: u32) -> f64 {
    if prec > 15 {
        return input;
    }
    if input == 0.0 {
        return input;
    }

    let mut ret = input.abs();
    if ret < f64::MIN_POSITIVE {
        // denormalized number
        return 0.0;
    }
    if ret >= f64::MAX {
        return input;
    }

    ret = ret.log10();
    let prec = if prec > 0 { prec - 1 } else { prec };
    let ixp = (ret.floor() as i32) - (prec as i32);
    ret = (0.5 + 10f64.powf(ret - ixp as f64)).floor();
    if ixp > 0 {
        ret *= 10f64.powi(ixp);
    } else if ixp < 0 {
        ret /= 10f64.powi(-ixp);
    }
    if input < 0.0 {
        ret = -ret;
    }
    ret
}

fn sign_extend(val: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((val as i64) << shift) >> shift
}

/// Ones-complement comparison of sign-extended keys: map negative
/// sign-magnitude patterns below every non-negative value, with -0
/// strictly below +0.
fn compare_1c(mut key1: i64, mut key2: i64) -> Ordering {
    let signbit = i64::MIN;
    if key1 & signbit != 0 {
        key1 = signbit.wrapping_sub(key1).wrapping_sub(1);
    }
    if key2 & signbit != 0 {
        key2 = signbit.wrapping_sub(key2).wrapping_sub(1);
    }
    key1.cmp(&key2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quantizer {
    /// Keep the top `bits` bits of a `width_bits`-wide value pattern.
    Sigbits {
        bits: u32,
        width_bits: u32,
        signedness: Signedness,
    },
    /// Round floats to `digits` significant decimal digits.
    Precision { digits: u32 },
    /// Sorted boundary values; quantize(v) = greatest boundary <= v,
    /// or negative infinity below the first boundary.
    ExplicitBins { bounds: Vec<f64> },
}

impl Quantizer {
    pub fn sigbits(datatype: DataType, bits: u32) -> Result<Self, BinIdxError> {
        let signedness = datatype
            .signedness()
            .ok_or(BinIdxError::InapplicableBinning {
                binning: "sigbits",
                datatype: datatype.name(),
            })?;
        let width_bits = datatype.width_bits();
        if bits == 0 || bits > width_bits {
            return Err(BinIdxError::StringError(format!(
                "sigbits parameter {} out of range for {}-bit datatype",
                bits, width_bits
            )));
        }
        Ok(Quantizer::Sigbits {
            bits,
            width_bits,
            signedness,
        })
    }

    pub fn precision(datatype: DataType, digits: u32) -> Result<Self, BinIdxError> {
        if !datatype.is_float() {
            return Err(BinIdxError::InapplicableBinning {
                binning: "precision",
                datatype: datatype.name(),
            });
        }
        Ok(Quantizer::Precision { digits })
    }

    pub fn explicit_bins(datatype: DataType, mut bounds: Vec<f64>) -> Result<Self, BinIdxError> {
        if !datatype.is_numeric() {
            return Err(BinIdxError::InapplicableBinning {
                binning: "explicit",
                datatype: datatype.name(),
            });
        }
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup_by(|a, b| a.total_cmp(b) == Ordering::Equal);
        Ok(Quantizer::ExplicitBins { bounds })
    }

    pub fn quantize<T: Indexable>(&self, value: T) -> QKey {
        match self {
            Quantizer::Sigbits { bits, width_bits, .. } => {
                QKey::U(value.to_bits() >> (width_bits - bits))
            }
            Quantizer::Precision { digits } => {
                let v = match value.to_universal() {
                    UniversalValue::Float(f) => f,
                    other => other.as_f64().unwrap_or(f64::NAN),
                };
                QKey::F(coarsen_double(v, *digits))
            }
            Quantizer::ExplicitBins { bounds } => {
                let v = value.to_universal().as_f64().unwrap_or(f64::NAN);
                Self::explicit_quantize(bounds, v)
            }
        }
    }

    pub fn quantize_universal(&self, value: &UniversalValue) -> Result<QKey, BinIdxError> {
        Ok(match self {
            Quantizer::Sigbits { bits, width_bits, signedness } => {
                let raw = match (signedness, value) {
                    (Signedness::Unsigned, v) => v
                        .as_u64()
                        .ok_or_else(|| BinIdxError::StringError("value not convertible to unsigned".into()))?,
                    (Signedness::TwosComplement, v) => {
                        let i = v
                            .as_i64()
                            .ok_or_else(|| BinIdxError::StringError("value not convertible to signed".into()))?;
                        let mask = if *width_bits == 64 { u64::MAX } else { (1u64 << width_bits) - 1 };
                        (i as u64) & mask
                    }
                    (Signedness::OnesComplement, v) => {
                        let f = v
                            .as_f64()
                            .ok_or_else(|| BinIdxError::StringError("value not convertible to float".into()))?;
                        if *width_bits == 32 {
                            (f as f32).to_bits() as u64
                        } else {
                            f.to_bits()
                        }
                    }
                };
                QKey::U(raw >> (width_bits - bits))
            }
            Quantizer::Precision { digits } => {
                let f = value
                    .as_f64()
                    .ok_or_else(|| BinIdxError::StringError("value not convertible to float".into()))?;
                QKey::F(coarsen_double(f, *digits))
            }
            Quantizer::ExplicitBins { bounds } => {
                let f = value
                    .as_f64()
                    .ok_or_else(|| BinIdxError::StringError("value not convertible to float".into()))?;
                Self::explicit_quantize(bounds, f)
            }
        })
    }

    fn explicit_quantize(bounds: &[f64], v: f64) -> QKey {
        // Greatest boundary <= v, else -inf.
        match bounds.partition_point(|b| b.total_cmp(&v) != Ordering::Greater) {
            0 => QKey::F(f64::NEG_INFINITY),
            n => QKey::F(bounds[n - 1]),
        }
    }

    pub fn compare(&self, key1: QKey, key2: QKey) -> Ordering {
        match self {
            Quantizer::Sigbits { bits, signedness, .. } => {
                let (k1, k2) = (key1.raw_bits(), key2.raw_bits());
                match signedness {
                    Signedness::Unsigned => k1.cmp(&k2),
                    Signedness::TwosComplement => {
                        sign_extend(k1, *bits).cmp(&sign_extend(k2, *bits))
                    }
                    Signedness::OnesComplement => {
                        compare_1c(sign_extend(k1, *bits), sign_extend(k2, *bits))
                    }
                }
            }
            Quantizer::Precision { .. } | Quantizer::ExplicitBins { .. } => {
                let as_f = |k: QKey| match k {
                    QKey::F(f) => f,
                    QKey::I(i) => i as f64,
                    QKey::U(u) => u as f64,
                };
                as_f(key1).total_cmp(&as_f(key2))
            }
        }
    }

    pub fn min_key(&self) -> QKey {
        match self {
            Quantizer::Sigbits { bits, signedness, .. } => {
                let all_ones = if *bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                QKey::U(match signedness {
                    Signedness::Unsigned => 0,
                    Signedness::TwosComplement => 1u64 << (bits - 1),
                    Signedness::OnesComplement => all_ones,
                })
            }
            Quantizer::Precision { .. } => QKey::F(f64::NEG_INFINITY),
            Quantizer::ExplicitBins { .. } => QKey::F(f64::NEG_INFINITY),
        }
    }

    pub fn max_key(&self) -> QKey {
        match self {
            Quantizer::Sigbits { bits, signedness, .. } => {
                let all_ones = if *bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                QKey::U(match signedness {
                    Signedness::Unsigned => all_ones,
                    Signedness::TwosComplement | Signedness::OnesComplement => {
                        (1u64 << (bits - 1)) - 1
                    }
                })
            }
            Quantizer::Precision { .. } => QKey::F(f64::INFINITY),
            Quantizer::ExplicitBins { bounds } => {
                QKey::F(bounds.last().copied().unwrap_or(f64::INFINITY))
            }
        }
    }

    /// Representative universal value of a key, for reporting bin keys.
    pub fn key_to_universal(&self, datatype: DataType, key: QKey) -> UniversalValue {
        match (self, key) {
            (Quantizer::Sigbits { signedness, bits, .. }, QKey::U(raw)) => match signedness {
                Signedness::Unsigned => UniversalValue::UInt(raw),
                Signedness::TwosComplement => UniversalValue::Int(sign_extend(raw, *bits)),
                Signedness::OnesComplement => {
                    // Restore the top bits of the float pattern.
                    let shift = datatype.width_bits() - bits;
                    if datatype == DataType::Float32 {
                        UniversalValue::Float(f32::from_bits((raw as u32) << shift) as f64)
                    } else {
                        UniversalValue::Float(f64::from_bits(raw << shift))
                    }
                }
            },
            (_, QKey::F(f)) => UniversalValue::Float(f),
            (_, QKey::I(i)) => UniversalValue::Int(i),
            (_, QKey::U(u)) => UniversalValue::UInt(u),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigbits_unsigned() {
        let q = Quantizer::sigbits(DataType::UInt8, 2).unwrap();
        assert_eq!(q.quantize(0u8), QKey::U(0));
        assert_eq!(q.quantize(63u8), QKey::U(0));
        assert_eq!(q.quantize(64u8), QKey::U(1));
        assert_eq!(q.quantize(255u8), QKey::U(3));
        assert_eq!(q.compare(QKey::U(1), QKey::U(2)), Ordering::Less);
    }

    #[test]
    fn test_sigbits_signed_ordering() {
        let q = Quantizer::sigbits(DataType::Int8, 8).unwrap();
        let neg = q.quantize(-5i8);
        let pos = q.quantize(5i8);
        assert_eq!(q.compare(neg, pos), Ordering::Less);
        assert_eq!(q.compare(pos, neg), Ordering::Greater);
        assert_eq!(q.min_key(), QKey::U(0x80));
        assert_eq!(q.max_key(), QKey::U(0x7F));
    }

    #[test]
    fn test_sigbits_float_ordering() {
        let q = Quantizer::sigbits(DataType::Float64, 64).unwrap();
        let a = q.quantize(-2.0f64);
        let b = q.quantize(-1.0f64);
        let c = q.quantize(1.0f64);
        assert_eq!(q.compare(a, b), Ordering::Less);
        assert_eq!(q.compare(b, c), Ordering::Less);
        // -0 sorts strictly below +0
        let nz = q.quantize(-0.0f64);
        let pz = q.quantize(0.0f64);
        assert_eq!(q.compare(nz, pz), Ordering::Less);
    }

    #[test]
    fn test_sigbits_rejects_strings() {
        assert!(matches!(
            Quantizer::sigbits(DataType::String, 4),
            Err(BinIdxError::InapplicableBinning { .. })
        ));
    }

    #[test]
    fn test_coarsen_double() {
        assert_eq!(coarsen_double(0.0, 3), 0.0);
        assert_eq!(coarsen_double(1234.5, 2), 1200.0);
        assert_eq!(coarsen_double(-1234.5, 2), -1200.0);
        assert_eq!(coarsen_double(0.0012345, 2), 0.0012);
        assert_eq!(coarsen_double(987.0, 20), 987.0);
        // Idempotent on its own output.
        let v = coarsen_double(3.14159, 3);
        assert_eq!(coarsen_double(v, 3), v);
    }

    #[test]
    fn test_explicit_bins() {
        let q = Quantizer::explicit_bins(DataType::Float64, vec![0.0, 10.0, 20.0]).unwrap();
        assert_eq!(q.quantize(-1.0f64), QKey::F(f64::NEG_INFINITY));
        assert_eq!(q.quantize(0.0f64), QKey::F(0.0));
        assert_eq!(q.quantize(9.5f64), QKey::F(0.0));
        assert_eq!(q.quantize(10.0f64), QKey::F(10.0));
        assert_eq!(q.quantize(99.0f64), QKey::F(20.0));
    }

    #[test]
    fn test_precision_quantizer() {
        let q = Quantizer::precision(DataType::Float64, 2).unwrap();
        assert_eq!(q.quantize(1234.5f64), QKey::F(1200.0));
        assert!(matches!(
            Quantizer::precision(DataType::Int32, 2),
            Err(BinIdxError::InapplicableBinning { .. })
        ));
    }
}
