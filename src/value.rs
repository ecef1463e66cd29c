// value.rs
//
// Scalar datatypes and the runtime universal value.
//
// Every indexable value belongs to one of four classes (unsigned integer,
// signed integer, floating point, string); `UniversalValue` reduces a value
// to the widest type of its class, which is what the binning layer and the
// query API traffic in. The datatype registry is a fixed table: name, one
// byte on-disk tag, signedness and bit width.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BinIdxError;

/// How the raw bit pattern of a type orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signedness {
    Unsigned,
    TwosComplement,
    /// Sign-magnitude bit patterns (IEEE floats): negative values order
    /// reversed, and -0 sorts strictly below +0.
    OnesComplement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
}

struct DataTypeInfo {
    datatype: DataType,
    name: &'static str,
    tag: u8,
    signedness: Option<Signedness>,
    width_bits: u32,
}

const DATATYPE_TABLE: &[DataTypeInfo] = &[
    DataTypeInfo { datatype: DataType::UInt8, name: "u8", tag: 0, signedness: Some(Signedness::Unsigned), width_bits: 8 },
    DataTypeInfo { datatype: DataType::UInt16, name: "u16", tag: 1, signedness: Some(Signedness::Unsigned), width_bits: 16 },
    DataTypeInfo { datatype: DataType::UInt32, name: "u32", tag: 2, signedness: Some(Signedness::Unsigned), width_bits: 32 },
    DataTypeInfo { datatype: DataType::UInt64, name: "u64", tag: 3, signedness: Some(Signedness::Unsigned), width_bits: 64 },
    DataTypeInfo { datatype: DataType::Int8, name: "i8", tag: 4, signedness: Some(Signedness::TwosComplement), width_bits: 8 },
    DataTypeInfo { datatype: DataType::Int16, name: "i16", tag: 5, signedness: Some(Signedness::TwosComplement), width_bits: 16 },
    DataTypeInfo { datatype: DataType::Int32, name: "i32", tag: 6, signedness: Some(Signedness::TwosComplement), width_bits: 32 },
    DataTypeInfo { datatype: DataType::Int64, name: "i64", tag: 7, signedness: Some(Signedness::TwosComplement), width_bits: 64 },
    DataTypeInfo { datatype: DataType::Float32, name: "f32", tag: 8, signedness: Some(Signedness::OnesComplement), width_bits: 32 },
    DataTypeInfo { datatype: DataType::Float64, name: "f64", tag: 9, signedness: Some(Signedness::OnesComplement), width_bits: 64 },
    DataTypeInfo { datatype: DataType::String, name: "string", tag: 10, signedness: None, width_bits: 0 },
];

impl DataType {
    fn info(&self) -> &'static DataTypeInfo {
        DATATYPE_TABLE
            .iter()
            .find(|i| i.datatype == *self)
            .unwrap_or_else(|| unreachable!("datatype registry covers all variants"))
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }

    pub fn tag(&self) -> u8 {
        self.info().tag
    }

    pub fn from_tag(tag: u8) -> Result<Self, BinIdxError> {
        DATATYPE_TABLE
            .iter()
            .find(|i| i.tag == tag)
            .map(|i| i.datatype)
            .ok_or(BinIdxError::UnknownDatatypeTag(tag))
    }

    pub fn from_name(name: &str) -> Result<Self, BinIdxError> {
        DATATYPE_TABLE
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.datatype)
            .ok_or_else(|| BinIdxError::UnknownDatatypeName(name.to_string()))
    }

    /// Bit-pattern ordering class, `None` for strings.
    pub fn signedness(&self) -> Option<Signedness> {
        self.info().signedness
    }

    pub fn width_bits(&self) -> u32 {
        self.info().width_bits
    }

    pub fn width_bytes(&self) -> usize {
        (self.info().width_bits as usize) / 8
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::String)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value of any indexable class, widened to the class representative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UniversalValue {
    UInt(u64),
    Int(i64),
    Float(f64),
    Str(String),
}

impl UniversalValue {
    /// Checked widening to u64. Signed and float values convert only when
    /// exactly representable and non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            UniversalValue::UInt(v) => Some(*v),
            UniversalValue::Int(v) => u64::try_from(*v).ok(),
            UniversalValue::Float(v) => {
                if *v >= 0.0 && v.fract() == 0.0 && *v <= u64::MAX as f64 {
                    Some(*v as u64)
                } else {
                    None
                }
            }
            UniversalValue::Str(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            UniversalValue::UInt(v) => i64::try_from(*v).ok(),
            UniversalValue::Int(v) => Some(*v),
            UniversalValue::Float(v) => {
                if v.fract() == 0.0 && *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    Some(*v as i64)
                } else {
                    None
                }
            }
            UniversalValue::Str(_) => None,
        }
    }

    /// Widening to f64 always succeeds for numeric classes.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            UniversalValue::UInt(v) => Some(*v as f64),
            UniversalValue::Int(v) => Some(*v as f64),
            UniversalValue::Float(v) => Some(*v),
            UniversalValue::Str(_) => None,
        }
    }

    pub fn parse(datatype: DataType, text: &str) -> Result<Self, BinIdxError> {
        let bad = |e: String| BinIdxError::StringError(format!("cannot parse {:?}: {}", text, e));
        Ok(match datatype {
            DataType::UInt8 | DataType::UInt16 | DataType::UInt32 | DataType::UInt64 => {
                UniversalValue::UInt(text.parse::<u64>().map_err(|e| bad(e.to_string()))?)
            }
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
                UniversalValue::Int(text.parse::<i64>().map_err(|e| bad(e.to_string()))?)
            }
            DataType::Float32 | DataType::Float64 => {
                UniversalValue::Float(text.parse::<f64>().map_err(|e| bad(e.to_string()))?)
            }
            DataType::String => UniversalValue::Str(text.to_string()),
        })
    }
}

impl fmt::Display for UniversalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniversalValue::UInt(v) => write!(f, "{}", v),
            UniversalValue::Int(v) => write!(f, "{}", v),
            UniversalValue::Float(v) => write!(f, "{}", v),
            UniversalValue::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Native scalar types the index builder can stream.
pub trait Indexable: Copy + PartialEq + 'static {
    const DATATYPE: DataType;

    /// Raw bit pattern, zero-extended to 64 bits. This is what the sigbits
    /// quantizer shifts; the crate commits to the native little-endian
    /// value representation for on-disk quantized keys.
    fn to_bits(self) -> u64;

    fn to_universal(self) -> UniversalValue;

    fn from_le_bytes(bytes: &[u8]) -> Self;
}

macro_rules! impl_indexable_uint {
    ($t:ty, $dt:expr) => {
        impl Indexable for $t {
            const DATATYPE: DataType = $dt;
            fn to_bits(self) -> u64 {
                self as u64
            }
            fn to_universal(self) -> UniversalValue {
                UniversalValue::UInt(self as u64)
            }
            fn from_le_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

macro_rules! impl_indexable_int {
    ($t:ty, $ut:ty, $dt:expr) => {
        impl Indexable for $t {
            const DATATYPE: DataType = $dt;
            fn to_bits(self) -> u64 {
                (self as $ut) as u64
            }
            fn to_universal(self) -> UniversalValue {
                UniversalValue::Int(self as i64)
            }
            fn from_le_bytes(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

impl_indexable_uint!(u8, DataType::UInt8);
impl_indexable_uint!(u16, DataType::UInt16);
impl_indexable_uint!(u32, DataType::UInt32);
impl_indexable_uint!(u64, DataType::UInt64);
impl_indexable_int!(i8, u8, DataType::Int8);
impl_indexable_int!(i16, u16, DataType::Int16);
impl_indexable_int!(i32, u32, DataType::Int32);
impl_indexable_int!(i64, u64, DataType::Int64);

impl Indexable for f32 {
    const DATATYPE: DataType = DataType::Float32;
    fn to_bits(self) -> u64 {
        self.to_bits() as u64
    }
    fn to_universal(self) -> UniversalValue {
        UniversalValue::Float(self as f64)
    }
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_le_bytes(buf)
    }
}

impl Indexable for f64 {
    const DATATYPE: DataType = DataType::Float64;
    fn to_bits(self) -> u64 {
        self.to_bits()
    }
    fn to_universal(self) -> UniversalValue {
        UniversalValue::Float(self)
    }
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        f64::from_le_bytes(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for tag in 0..=10u8 {
            let dt = DataType::from_tag(tag).unwrap();
            assert_eq!(dt.tag(), tag);
            assert_eq!(DataType::from_name(dt.name()).unwrap(), dt);
        }
        assert!(DataType::from_tag(42).is_err());
        assert!(DataType::from_name("quux").is_err());
    }

    #[test]
    fn test_universal_widening() {
        assert_eq!(UniversalValue::Int(-1).as_u64(), None);
        assert_eq!(UniversalValue::Int(7).as_u64(), Some(7));
        assert_eq!(UniversalValue::UInt(7).as_i64(), Some(7));
        assert_eq!(UniversalValue::Float(2.5).as_u64(), None);
        assert_eq!(UniversalValue::Float(2.0).as_u64(), Some(2));
        assert_eq!(UniversalValue::Str("x".into()).as_f64(), None);
    }

    #[test]
    fn test_signed_bits_zero_extend() {
        // i8 -1 occupies only the low 8 bits of the key space.
        assert_eq!((-1i8).to_bits(), 0xFF);
        assert_eq!((-1i64).to_bits(), u64::MAX);
    }
}
