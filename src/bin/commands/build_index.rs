// bin/commands/build_index.rs

use std::path::PathBuf;

use binidx::data::{DatasetMeta, RawDatasetStream};
use binidx::encoding::IndexEncoding;
use binidx::error::BinIdxError;
use binidx::parallel::ParallelIndexGenerator;
use binidx::quant::Quantizer;
use binidx::region::RegionType;
use binidx::value::{DataType, Indexable};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Args)]
pub struct BuildIndexArgs {
    /// Dataset descriptor produced by build-meta.
    #[arg(short, long)]
    pub meta: PathBuf,

    /// Output index file.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Region representation: ii|cii|wah|cblq-2|cblq-3|cblq-4.
    #[arg(short, long, default_value = "wah")]
    pub rep: String,

    /// Index encoding: flat|range|interval|hier|binarycomp.
    #[arg(short, long, default_value = "flat")]
    pub encoding: String,

    /// Binning strategy: sigbits|precision|explicit.
    #[arg(short, long, default_value = "sigbits")]
    pub binning: String,

    /// Binning parameter: bit count, digit count, or a comma-separated
    /// boundary list for explicit binning.
    #[arg(short = 'p', long, default_value = "8")]
    pub binning_param: String,

    /// Pack the deepest CBLQ level as a dense suffix.
    #[arg(long)]
    pub dense_suffix: bool,

    /// Elements per index partition.
    #[arg(long, default_value = "1048576")]
    pub partition_size: u64,

    /// Writer ranks (defaults to the CPU count).
    #[arg(short, long)]
    pub jobs: Option<usize>,
}

fn make_quantizer(args: &BuildIndexArgs, datatype: DataType) -> Result<Quantizer, BinIdxError> {
    match args.binning.as_str() {
        "sigbits" => Quantizer::sigbits(datatype, args.binning_param.parse()?),
        "precision" => Quantizer::precision(datatype, args.binning_param.parse()?),
        "explicit" => {
            let bounds: Vec<f64> = args
                .binning_param
                .split(',')
                .map(|s| s.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| BinIdxError::StringError(format!("bad boundary list: {}", e)))?;
            Quantizer::explicit_bins(datatype, bounds)
        }
        other => Err(BinIdxError::StringError(format!(
            "unknown binning strategy {:?}",
            other
        ))),
    }
}

fn build_typed<T: Indexable + Sync>(
    args: &BuildIndexArgs,
    meta: &DatasetMeta,
) -> Result<(), BinIdxError> {
    let rep = RegionType::from_name(&args.rep)?;
    let encoding = IndexEncoding::from_name(&args.encoding)?;
    let quantizer = make_quantizer(args, meta.datatype)?;
    let ranks = args.jobs.unwrap_or_else(num_cpus::get);

    let bar = ProgressBar::new(meta.element_count());
    bar.set_style(
        ProgressStyle::with_template("{msg} {bar:30} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.set_message("reading");

    let mut stream = RawDatasetStream::<T>::open(meta, 0, meta.element_count())?;
    let mut values: Vec<T> = Vec::with_capacity(meta.element_count() as usize);
    while let Some(block) = stream.next_block()? {
        values.extend_from_slice(block);
        bar.set_position(values.len() as u64);
    }
    bar.set_message("indexing");

    let mut generator =
        ParallelIndexGenerator::new(quantizer, rep, args.partition_size, ranks);
    generator.encoding = encoding;
    generator.cblq_dense_suffix = args.dense_suffix;
    let stats = generator.generate(&args.output, &values)?;
    bar.finish_and_clear();

    eprintln!(
        "Indexed {} elements into {} partitions ({} bins total) at {}",
        stats.build.elements_indexed,
        stats.partitions_indexed,
        stats.build.bins_built,
        args.output.display()
    );
    Ok(())
}

pub fn run(args: BuildIndexArgs) -> Result<(), BinIdxError> {
    let meta = DatasetMeta::open(&args.meta)?;
    match meta.datatype {
        DataType::UInt8 => build_typed::<u8>(&args, &meta),
        DataType::UInt16 => build_typed::<u16>(&args, &meta),
        DataType::UInt32 => build_typed::<u32>(&args, &meta),
        DataType::UInt64 => build_typed::<u64>(&args, &meta),
        DataType::Int8 => build_typed::<i8>(&args, &meta),
        DataType::Int16 => build_typed::<i16>(&args, &meta),
        DataType::Int32 => build_typed::<i32>(&args, &meta),
        DataType::Int64 => build_typed::<i64>(&args, &meta),
        DataType::Float32 => build_typed::<f32>(&args, &meta),
        DataType::Float64 => build_typed::<f64>(&args, &meta),
        DataType::String => Err(BinIdxError::StringError(
            "string datasets are not indexable from the CLI".into(),
        )),
    }
}
