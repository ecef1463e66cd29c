// error.rs

use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BinIdxError {
    #[error("Invalid range: upper bound ({ub}) must be greater than lower bound ({lb})")]
    InvalidRange { lb: String, ub: String },

    #[error("Unknown region representation tag: {0}")]
    UnknownRegionTag(u8),

    #[error("Unknown index encoding tag: {0}")]
    UnknownEncodingTag(u8),

    #[error("Unknown binning type tag: {0}")]
    UnknownBinningTag(u8),

    #[error("Unknown datatype tag: {0}")]
    UnknownDatatypeTag(u8),

    #[error("Unknown datatype name: {0}")]
    UnknownDatatypeName(String),

    #[error("Binning {binning} is not applicable to datatype {datatype}")]
    InapplicableBinning {
        binning: &'static str,
        datatype: &'static str,
    },

    #[error("Malformed descriptor file {path}: {reason}")]
    MalformedDescriptor { path: String, reason: String },

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Corrupt index file: {0}")]
    CorruptFile(String),

    #[error("CBLQ operands disagree on dense-suffix density")]
    DenseSuffixMismatch,

    #[error("Operand domain sizes differ: {left} vs {right}")]
    DomainSizeMismatch { left: u64, right: u64 },

    #[error("Incompatible set operation operands: {0}")]
    IncompatibleOperands(String),

    #[error("Query variables disagree on partition domain mappings")]
    PartitionMappingMismatch,

    #[error("Binning specification is not populated")]
    UnpopulatedBinning,

    #[error("Partition metadata is not fully populated at write time")]
    IncompleteMetadata,

    #[error("Region math is malformed: {0}")]
    BadRegionMath(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Parse integer error: {0}")]
    ParseIntError(#[from] ParseIntError),

    #[error("{0}")]
    StringError(String),
}

impl From<&str> for BinIdxError {
    fn from(error: &str) -> Self {
        BinIdxError::StringError(error.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for BinIdxError {
    fn from(error: Box<bincode::ErrorKind>) -> Self {
        BinIdxError::SerializationError(error.to_string())
    }
}
