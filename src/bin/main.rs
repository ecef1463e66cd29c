#[cfg(feature = "cli")]
mod commands;

#[cfg(feature = "cli")]
mod cli {
    use crate::commands::{build_index, build_meta, query};
    #[cfg(feature = "dev")]
    use crate::commands::random_data;
    use binidx::error::BinIdxError;
    use clap::Parser;

    #[derive(Parser)]
    #[command(author, version, about = "Binned bitmap/region index for scientific arrays")]
    pub struct Cli {
        #[command(subcommand)]
        command: Commands,
    }

    #[derive(clap::Subcommand)]
    enum Commands {
        /// Write a dataset descriptor for a raw binary file.
        BuildMeta(build_meta::BuildMetaArgs),
        /// Build a partitioned index from a dataset descriptor.
        BuildIndex(build_index::BuildIndexArgs),
        /// Run a range query against a database descriptor.
        Query(query::QueryArgs),
        #[cfg(feature = "dev")]
        /// Generate a random raw dataset plus descriptor (dev only).
        RandomData(random_data::RandomDataArgs),
    }

    pub fn run() -> Result<(), BinIdxError> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .init();

        let cli = Cli::parse();
        match cli.command {
            Commands::BuildMeta(args) => build_meta::run(args),
            Commands::BuildIndex(args) => build_index::run(args),
            Commands::Query(args) => query::run(args),
            #[cfg(feature = "dev")]
            Commands::RandomData(args) => random_data::run(args),
        }
    }
}

fn main() {
    #[cfg(feature = "cli")]
    if let Err(e) = cli::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("CLI feature not enabled. Please rebuild with --features cli");
        std::process::exit(1);
    }
}
