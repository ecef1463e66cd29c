pub mod binning;
pub mod build;
pub mod data;
pub mod db;
pub mod encoding;
pub mod error;
pub mod index;
pub mod io;
pub mod parallel;
pub mod quant;
pub mod query;
pub mod region;
pub mod setops;
pub mod stats;
pub mod value;

pub use binning::BinningSpec;
pub use build::IndexBuilder;
pub use db::Database;
pub use encoding::IndexEncoding;
pub use error::BinIdxError;
pub use index::BinnedIndex;
pub use io::{IndexFile, IndexFileWriter};
pub use parallel::ParallelIndexGenerator;
pub use quant::Quantizer;
pub use query::{Query, QueryEngine};
pub use region::{Region, RegionType};
pub use setops::{SetOp, SetOps, UnaryOp};
pub use value::{DataType, UniversalValue};
