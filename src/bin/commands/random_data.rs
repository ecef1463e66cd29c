// bin/commands/random_data.rs

use std::path::PathBuf;

use binidx::data::{write_raw_dataset, DatasetMeta, DimOrder};
use binidx::error::BinIdxError;
use binidx::value::DataType;
use clap::Args;
use rand::Rng;

#[derive(Args)]
pub struct RandomDataArgs {
    /// Output prefix; writes <prefix>.raw and <prefix>.meta.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Number of elements to generate.
    #[arg(short = 'n', long, default_value = "1000000")]
    pub num_elements: u64,

    /// Upper bound (exclusive) for generated values.
    #[arg(long, default_value = "1000.0")]
    pub max_value: f64,
}

pub fn run(args: RandomDataArgs) -> Result<(), BinIdxError> {
    eprintln!(
        "Generating {} random f64 values to {}.raw",
        args.num_elements,
        args.output.display()
    );

    let mut rng = rand::thread_rng();
    let values: Vec<f64> = (0..args.num_elements)
        .map(|_| rng.gen_range(0.0..args.max_value))
        .collect();

    let raw_path = args.output.with_extension("raw");
    let meta_path = args.output.with_extension("meta");
    write_raw_dataset(&raw_path, &values)?;
    let meta = DatasetMeta {
        path: raw_path,
        datatype: DataType::Float64,
        order: DimOrder::C,
        dims: vec![args.num_elements],
    };
    meta.save(&meta_path)?;

    eprintln!("Done! Descriptor at {}", meta_path.display());
    Ok(())
}
