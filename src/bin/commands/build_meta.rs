// bin/commands/build_meta.rs

use std::path::PathBuf;

use binidx::data::{DatasetMeta, DimOrder};
use binidx::error::BinIdxError;
use binidx::value::DataType;
use clap::Args;

#[derive(Args)]
pub struct BuildMetaArgs {
    /// Raw dataset file the descriptor points at.
    #[arg(short, long)]
    pub data: PathBuf,

    /// Output descriptor path.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Element datatype name (u8..u64, i8..i64, f32, f64).
    #[arg(short = 't', long)]
    pub datatype: String,

    /// Dimension order.
    #[arg(long, default_value = "c")]
    pub order: String,

    /// Grid dimensions, outermost first.
    #[arg(required = true)]
    pub dims: Vec<u64>,
}

pub fn run(args: BuildMetaArgs) -> Result<(), BinIdxError> {
    let order = match args.order.to_ascii_uppercase().as_str() {
        "C" => DimOrder::C,
        "FORTRAN" => DimOrder::Fortran,
        other => {
            return Err(BinIdxError::StringError(format!(
                "unknown dimension order {:?}",
                other
            )))
        }
    };
    let meta = DatasetMeta {
        path: args.data,
        datatype: DataType::from_name(&args.datatype)?,
        order,
        dims: args.dims,
    };
    meta.save(&args.output)?;
    eprintln!(
        "Wrote descriptor for {} {} elements to {}",
        meta.element_count(),
        meta.datatype,
        args.output.display()
    );
    Ok(())
}
