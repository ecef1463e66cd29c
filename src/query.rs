// query.rs
//
// The query engine. A query is a postfix expression of constraint terms
// (varname, [lb, ub) value range), unary complement, and N-ary set
// operators with explicit arity. Evaluation is per partition: each
// constraint resolves to a bin range, a decode plan is chosen between
// the direct and complement region math by a byte+seek cost model, the
// plan's regions are read with coalesced runs, and the region algebra
// runs on the set-op engine. Constraints at the query level are
// deferred stack slots, materialized on demand. Results stream through
// a cursor, one partition domain at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::db::Database;
use crate::error::BinIdxError;
use crate::io::file::{DomainMapping, IndexFile, PartitionId};
use crate::region::{Region, RegionType};
use crate::setops::{RegionMath, SetOp, SetOps, UnaryOp};
use crate::stats::{ConstraintTermStats, QueryStats, TimeStats};
use crate::value::UniversalValue;

/// Cost calibration: reading a byte costs 1, a coalesced-run seek costs
/// a fixed penalty.
const READ_BYTE_COST: u64 = 1;
const SEEK_COST: u64 = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum ComplementMode {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub complement_mode: ComplementMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub varname: String,
    pub lb: UniversalValue,
    pub ub: UniversalValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryTerm {
    Constraint(Constraint),
    Unary(UnaryOp),
    Nary(SetOp, usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    terms: Vec<QueryTerm>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn constraint(
        mut self,
        varname: impl Into<String>,
        lb: UniversalValue,
        ub: UniversalValue,
    ) -> Self {
        self.terms.push(QueryTerm::Constraint(Constraint {
            varname: varname.into(),
            lb,
            ub,
        }));
        self
    }

    pub fn complement(mut self) -> Self {
        self.terms.push(QueryTerm::Unary(UnaryOp::Complement));
        self
    }

    pub fn op(mut self, op: SetOp, arity: usize) -> Self {
        self.terms.push(QueryTerm::Nary(op, arity));
        self
    }

    pub fn terms(&self) -> &[QueryTerm] {
        &self.terms
    }
}

#[derive(Debug)]
pub struct QueryPartitionResult {
    pub domain_id: u64,
    pub partition_domain: DomainMapping,
    pub region: Arc<Region>,
    pub stats: QueryStats,
}

pub struct QueryEngine {
    db: Database,
    readers: Mutex<FxHashMap<String, Arc<IndexFile>>>,
    pub options: QueryOptions,
    setops: SetOps,
}

impl QueryEngine {
    pub fn open(db: Database) -> Self {
        QueryEngine {
            db,
            readers: Mutex::new(FxHashMap::default()),
            options: QueryOptions::default(),
            setops: SetOps::default(),
        }
    }

    pub fn with_options(db: Database, options: QueryOptions, setops: SetOps) -> Self {
        QueryEngine {
            db,
            readers: Mutex::new(FxHashMap::default()),
            options,
            setops,
        }
    }

    fn reader(&self, varname: &str) -> Result<Arc<IndexFile>, BinIdxError> {
        let mut readers = self.readers.lock();
        if let Some(reader) = readers.get(varname) {
            return Ok(reader.clone());
        }
        let path = self.db.index_path(varname)?;
        let reader = Arc::new(IndexFile::open(&path)?);
        readers.insert(varname.to_string(), reader.clone());
        Ok(reader)
    }

    /// Evaluate over every partition domain.
    pub fn evaluate(&self, query: &Query) -> Result<QueryCursor<'_>, BinIdxError> {
        self.evaluate_range(query, 0, u64::MAX)
    }

    /// Evaluate over partition domains [begin, end), clipped to the
    /// number of domains that exist.
    pub fn evaluate_range(
        &self,
        query: &Query,
        begin_domain: u64,
        end_domain: u64,
    ) -> Result<QueryCursor<'_>, BinIdxError> {
        // Split the query into deferred constraints plus the top-level
        // region math over their stack slots.
        let mut constraints = Vec::new();
        let mut rmath = RegionMath::new();
        for term in query.terms() {
            match term {
                QueryTerm::Constraint(c) => {
                    rmath.push_region(constraints.len() as u64);
                    constraints.push(c.clone());
                }
                QueryTerm::Unary(op) => {
                    rmath.push_unary(*op);
                }
                QueryTerm::Nary(op, arity) => {
                    rmath.push_nary(*op, *arity);
                }
            }
        }
        if constraints.is_empty() {
            return Err(BinIdxError::BadRegionMath(
                "query contains no constraint terms".into(),
            ));
        }

        // Every touched variable must agree on partition count and
        // per-partition domain mapping.
        let mut mappings: Vec<Vec<(PartitionId, DomainMapping)>> =
            Vec::with_capacity(constraints.len());
        for constraint in &constraints {
            let reader = self.reader(&constraint.varname)?;
            mappings.push(reader.sorted_domain_mappings());
        }
        let expected: Vec<DomainMapping> = mappings[0].iter().map(|&(_, d)| d).collect();
        for mapping in &mappings[1..] {
            if mapping.len() != expected.len()
                || mapping.iter().zip(expected.iter()).any(|(&(_, d), e)| d != *e)
            {
                return Err(BinIdxError::PartitionMappingMismatch);
            }
        }

        let end = end_domain.min(expected.len() as u64);
        Ok(QueryCursor {
            engine: self,
            constraints,
            rmath,
            mappings,
            cur_domain: begin_domain.min(end),
            end_domain: end,
        })
    }

    fn evaluate_constraint(
        &self,
        constraint: &Constraint,
        partition_id: PartitionId,
        stats: &mut QueryStats,
    ) -> Result<Arc<Region>, BinIdxError> {
        let reader = self.reader(&constraint.varname)?;
        let mut part = reader.partition(partition_id)?;
        let meta = part.metadata().clone();
        let binning = meta.binning.as_ref().ok_or(BinIdxError::IncompleteMetadata)?;
        let rep = meta.rep.ok_or(BinIdxError::IncompleteMetadata)?;
        let encoding = meta.encoding.ok_or(BinIdxError::IncompleteMetadata)?;
        let domain = meta.domain.ok_or(BinIdxError::IncompleteMetadata)?;

        let mut term = ConstraintTermStats {
            varname: constraint.varname.clone(),
            ..Default::default()
        };

        let nbins = binning.num_bins()?;
        let lb_bin = binning.lower_bound_bin(&constraint.lb)?;
        let ub_bin = binning.upper_bound_bin(&constraint.ub)?;
        term.lb_bin = lb_bin as u64;
        term.ub_bin = ub_bin as u64;

        // Degenerate ranges decode to uniform regions without IO.
        if lb_bin >= ub_bin {
            stats.terms.push(term);
            return Ok(Arc::new(Region::make_uniform(rep, domain.length, false)));
        }
        if lb_bin == 0 && ub_bin == nbins {
            stats.terms.push(term);
            return Ok(Arc::new(Region::make_uniform(rep, domain.length, true)));
        }

        // Choose between the direct and complement decode plans.
        let direct = encoding.region_math(nbins, lb_bin, ub_bin, false);
        let complement = encoding.region_math(nbins, lb_bin, ub_bin, true);
        let direct_cost = plan_cost(&part, &direct);
        let complement_cost = plan_cost(&part, &complement);

        let use_complement = match self.options.complement_mode {
            ComplementMode::Always => true,
            ComplementMode::Never => false,
            ComplementMode::Auto => direct_cost > complement_cost,
        };
        term.forced_plan = self.options.complement_mode != ComplementMode::Auto;
        term.used_complement_plan = use_complement;
        (term.used_plan_cost, term.other_plan_cost) = if use_complement {
            (complement_cost, direct_cost)
        } else {
            (direct_cost, complement_cost)
        };
        let plan = if use_complement { complement } else { direct };

        debug!(
            var = %constraint.varname,
            partition = partition_id,
            lb_bin,
            ub_bin,
            use_complement,
            "constraint decode plan selected"
        );

        // Read exactly the plan's regions, coalesced.
        let ids: Vec<usize> = plan.referenced_regions().iter().map(|&r| r as usize).collect();
        part.reset_io_stats();
        let loaded = part.read_regions(&ids)?;
        term.regions_read = ids.len() as u64;
        term.io = part.io_stats();

        let mut by_id: FxHashMap<u64, Arc<Region>> = FxHashMap::default();
        for (id, region) in loaded {
            by_id.insert(id as u64, region);
        }

        let (result, decode_time) = {
            let setops = &self.setops;
            let mut out = None;
            let ((), elapsed) = TimeStats::time(|| {
                out = Some(setops.evaluate_region_math(&plan, rep, domain.length, |id| {
                    by_id
                        .get(&id)
                        .cloned()
                        .ok_or_else(|| BinIdxError::BadRegionMath(format!("region {} not read", id)))
                }));
            });
            (out.unwrap_or_else(|| unreachable!())?, elapsed)
        };
        term.decode = decode_time;

        stats.io.read_bytes += term.io.read_bytes;
        stats.io.read_seeks += term.io.read_seeks;
        stats.decode.elapsed += decode_time.elapsed;
        stats.terms.push(term);
        Ok(result)
    }
}

/// Cost of a decode plan: the byte size of each coalesced run of stored
/// regions plus a fixed seek penalty per run.
fn plan_cost(part: &crate::io::file::PartitionReader<'_>, plan: &RegionMath) -> u64 {
    let ids: Vec<usize> = plan.referenced_regions().iter().map(|&r| r as usize).collect();
    let mut cost = 0u64;
    let mut i = 0usize;
    while i < ids.len() {
        let run_start = ids[i];
        let mut run_end = run_start;
        while i + 1 < ids.len() && ids[i + 1] == run_end + 1 {
            run_end += 1;
            i += 1;
        }
        i += 1;
        cost += SEEK_COST + part.regions_size(run_start, run_end + 1) * READ_BYTE_COST;
    }
    cost
}

pub struct QueryCursor<'a> {
    engine: &'a QueryEngine,
    constraints: Vec<Constraint>,
    rmath: RegionMath,
    /// Per constraint: (partition id, domain) sorted by domain offset.
    mappings: Vec<Vec<(PartitionId, DomainMapping)>>,
    cur_domain: u64,
    end_domain: u64,
}

impl QueryCursor<'_> {
    pub fn num_domains(&self) -> u64 {
        self.end_domain
    }

    fn next_impl(&mut self) -> Result<QueryPartitionResult, BinIdxError> {
        let domain_id = self.cur_domain;
        let partition_domain = self.mappings[0][domain_id as usize].1;

        let mut stats = QueryStats::default();
        let (region, total) = {
            let engine = self.engine;
            let constraints = &self.constraints;
            let mappings = &self.mappings;
            let rmath = &self.rmath;
            let stats_ref = &mut stats;
            let mut out = None;
            let ((), elapsed) = TimeStats::time(|| {
                // Bitmap serves as the identity backend for degenerate
                // zero-arity operators; constraint slots carry their own
                // representations and mixed backends are normalized by
                // the set-op dispatcher.
                out = Some(engine.setops.evaluate_region_math(
                    rmath,
                    RegionType::Bitmap,
                    partition_domain.length,
                    |constraint_id| {
                        let (partition_id, _) =
                            mappings[constraint_id as usize][domain_id as usize];
                        engine.evaluate_constraint(
                            &constraints[constraint_id as usize],
                            partition_id,
                            stats_ref,
                        )
                    },
                ));
            });
            (out.unwrap_or_else(|| unreachable!())?, elapsed)
        };
        stats.total = total;

        Ok(QueryPartitionResult {
            domain_id,
            partition_domain,
            region,
            stats,
        })
    }
}

impl Iterator for QueryCursor<'_> {
    type Item = Result<QueryPartitionResult, BinIdxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cur_domain >= self.end_domain {
            return None;
        }
        let out = self.next_impl();
        self.cur_domain += 1;
        Some(out)
    }
}

/// Convenience: evaluate a query and collect the matching global RIDs
/// across all partitions.
pub fn collect_rids(engine: &QueryEngine, query: &Query) -> Result<Vec<u64>, BinIdxError> {
    let mut out = Vec::new();
    for result in engine.evaluate(query)? {
        let result = result?;
        out.extend(result.region.to_rids(result.partition_domain.offset));
    }
    out.sort_unstable();
    Ok(out)
}
