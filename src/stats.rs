// src/stats.rs
//
// Lightweight counters carried through builds and queries. All stats
// structs share one aggregation scheme: a `combine` walk over their
// fields parameterized by the combining operation.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineOp {
    Add,
    Sub,
    Set,
    Clear,
}

pub trait Stat {
    fn combine(&mut self, other: &Self, op: CombineOp);

    fn add(&mut self, other: &Self) {
        self.combine(other, CombineOp::Add);
    }
}

fn combine_u64(v1: &mut u64, v2: u64, op: CombineOp) {
    match op {
        CombineOp::Add => *v1 += v2,
        CombineOp::Sub => *v1 -= v2,
        CombineOp::Set => *v1 = v2,
        CombineOp::Clear => *v1 = 0,
    }
}

fn combine_duration(v1: &mut Duration, v2: Duration, op: CombineOp) {
    match op {
        CombineOp::Add => *v1 += v2,
        CombineOp::Sub => *v1 = v1.saturating_sub(v2),
        CombineOp::Set => *v1 = v2,
        CombineOp::Clear => *v1 = Duration::ZERO,
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TimeStats {
    pub elapsed: Duration,
}

impl TimeStats {
    pub fn time<T>(f: impl FnOnce() -> T) -> (T, TimeStats) {
        let start = Instant::now();
        let out = f();
        (
            out,
            TimeStats {
                elapsed: start.elapsed(),
            },
        )
    }
}

impl Stat for TimeStats {
    fn combine(&mut self, other: &Self, op: CombineOp) {
        combine_duration(&mut self.elapsed, other.elapsed, op);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IoStats {
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_seeks: u64,
    pub write_seeks: u64,
}

impl Stat for IoStats {
    fn combine(&mut self, other: &Self, op: CombineOp) {
        combine_u64(&mut self.read_bytes, other.read_bytes, op);
        combine_u64(&mut self.write_bytes, other.write_bytes, op);
        combine_u64(&mut self.read_seeks, other.read_seeks, op);
        combine_u64(&mut self.write_seeks, other.write_seeks, op);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildStats {
    pub elements_indexed: u64,
    pub bins_built: u64,
    pub total: TimeStats,
}

impl Stat for BuildStats {
    fn combine(&mut self, other: &Self, op: CombineOp) {
        combine_u64(&mut self.elements_indexed, other.elements_indexed, op);
        combine_u64(&mut self.bins_built, other.bins_built, op);
        self.total.combine(&other.total, op);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParallelBuildStats {
    pub partitions_indexed: u64,
    pub build: BuildStats,
    pub io: IoStats,
}

impl Stat for ParallelBuildStats {
    fn combine(&mut self, other: &Self, op: CombineOp) {
        combine_u64(&mut self.partitions_indexed, other.partitions_indexed, op);
        self.build.combine(&other.build, op);
        self.io.combine(&other.io, op);
    }
}

/// Per-constraint-term evaluation record: which bin range was touched,
/// which decode plan won, and what both plans would have cost.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintTermStats {
    pub varname: String,
    pub lb_bin: u64,
    pub ub_bin: u64,
    pub used_complement_plan: bool,
    pub forced_plan: bool,
    pub used_plan_cost: u64,
    pub other_plan_cost: u64,
    pub regions_read: u64,
    pub io: IoStats,
    pub decode: TimeStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryStats {
    pub io: IoStats,
    pub decode: TimeStats,
    pub setops: TimeStats,
    pub total: TimeStats,
    pub terms: Vec<ConstraintTermStats>,
}

impl Stat for QueryStats {
    fn combine(&mut self, other: &Self, op: CombineOp) {
        self.io.combine(&other.io, op);
        self.decode.combine(&other.decode, op);
        self.setops.combine(&other.setops, op);
        self.total.combine(&other.total, op);
        match op {
            CombineOp::Add => self.terms.extend(other.terms.iter().cloned()),
            CombineOp::Set => self.terms = other.terms.clone(),
            CombineOp::Clear => self.terms.clear(),
            CombineOp::Sub => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_add_sub() {
        let mut a = IoStats {
            read_bytes: 10,
            write_bytes: 5,
            read_seeks: 2,
            write_seeks: 1,
        };
        let b = IoStats {
            read_bytes: 3,
            write_bytes: 1,
            read_seeks: 1,
            write_seeks: 0,
        };
        a.combine(&b, CombineOp::Add);
        assert_eq!(a.read_bytes, 13);
        a.combine(&b, CombineOp::Sub);
        assert_eq!(a.read_bytes, 10);
        a.combine(&b, CombineOp::Set);
        assert_eq!(a.write_bytes, 1);
        a.combine(&b, CombineOp::Clear);
        assert_eq!(a.read_seeks, 0);
    }
}
