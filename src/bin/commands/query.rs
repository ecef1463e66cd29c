// bin/commands/query.rs

use std::path::PathBuf;

use binidx::db::Database;
use binidx::error::BinIdxError;
use binidx::query::{collect_rids, ComplementMode, Query, QueryEngine, QueryOptions};
use binidx::setops::SetOps;
use binidx::value::UniversalValue;
use clap::Args;

#[derive(Args)]
pub struct QueryArgs {
    /// Database descriptor (var.metapath= / var.indexpath= lines).
    #[arg(short, long)]
    pub db: PathBuf,

    /// Variable to constrain.
    #[arg(short, long)]
    pub var: String,

    /// Inclusive lower bound.
    #[arg(long)]
    pub lb: String,

    /// Exclusive upper bound.
    #[arg(long)]
    pub ub: String,

    /// Decode-plan policy.
    #[arg(long, value_enum, default_value_t = ComplementMode::Auto)]
    pub complement: ComplementMode,

    /// Print only the match count.
    #[arg(long)]
    pub count: bool,
}

fn parse_bound(text: &str) -> UniversalValue {
    if text.contains(['.', 'e', 'E']) {
        if let Ok(f) = text.parse::<f64>() {
            return UniversalValue::Float(f);
        }
    }
    if let Ok(u) = text.parse::<u64>() {
        return UniversalValue::UInt(u);
    }
    if let Ok(i) = text.parse::<i64>() {
        return UniversalValue::Int(i);
    }
    text.parse::<f64>()
        .map(UniversalValue::Float)
        .unwrap_or_else(|_| UniversalValue::Str(text.to_string()))
}

pub fn run(args: QueryArgs) -> Result<(), BinIdxError> {
    let db = Database::open(&args.db)?;
    let engine = QueryEngine::with_options(
        db,
        QueryOptions {
            complement_mode: args.complement,
        },
        SetOps::default(),
    );

    let query = Query::new().constraint(&args.var, parse_bound(&args.lb), parse_bound(&args.ub));
    let rids = collect_rids(&engine, &query)?;

    if args.count {
        println!("{}", rids.len());
    } else {
        let mut out = String::new();
        for rid in rids {
            out.push_str(&rid.to_string());
            out.push('\n');
        }
        print!("{}", out);
    }
    Ok(())
}
