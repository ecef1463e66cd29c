// build.rs
//
// One-pass index construction. Values are quantized as they stream by;
// runs of same-key values turn into a single insert_bits call on that
// key's region encoder. At the end of the stream the observed keys are
// sorted under the quantizer's compare, the encoders finalize in key
// order, and the binning spec is populated with the sorted key list.
// The result is always an equality-encoded index; re-encoding is a
// separate step (BinnedIndex::reencode).

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::binning::BinningSpec;
use crate::encoding::IndexEncoding;
use crate::error::BinIdxError;
use crate::index::BinnedIndex;
use crate::quant::{QKey, Quantizer};
use crate::region::{Region, RegionEncoder, RegionType};
use crate::stats::{BuildStats, TimeStats};
use crate::value::Indexable;

pub struct IndexBuilder<T: Indexable> {
    quantizer: Quantizer,
    rep: RegionType,
    domain_size: u64,
    cblq_dense_suffix: bool,
    encoders: FxHashMap<QKey, RegionEncoder>,
    position: u64,
    run_key: Option<QKey>,
    run_start: u64,
    stats: BuildStats,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Indexable> IndexBuilder<T> {
    pub fn new(
        quantizer: Quantizer,
        rep: RegionType,
        domain_size: u64,
        cblq_dense_suffix: bool,
    ) -> Self {
        IndexBuilder {
            quantizer,
            rep,
            domain_size,
            cblq_dense_suffix,
            encoders: FxHashMap::default(),
            position: 0,
            run_key: None,
            run_start: 0,
            stats: BuildStats::default(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Stream a buffer of values. May be called repeatedly; runs are
    /// tracked across buffer boundaries.
    pub fn append_values(&mut self, values: &[T]) {
        for &value in values {
            let key = self.quantizer.quantize(value);
            match self.run_key {
                Some(run_key) if run_key == key => {}
                Some(run_key) => {
                    self.flush_run(run_key);
                    self.run_key = Some(key);
                    self.run_start = self.position;
                }
                None => {
                    self.run_key = Some(key);
                    self.run_start = self.position;
                }
            }
            self.position += 1;
        }
    }

    fn flush_run(&mut self, key: QKey) {
        let run_len = self.position - self.run_start;
        debug_assert!(run_len > 0);
        let encoder = self.encoders.entry(key).or_insert_with(|| {
            RegionEncoder::new(self.rep, self.domain_size, self.cblq_dense_suffix)
        });
        encoder.insert_bits(self.run_start, run_len);
    }

    pub fn finish(mut self) -> Result<BinnedIndex, BinIdxError> {
        let ((), total) = TimeStats::time(|| {
            if let Some(run_key) = self.run_key.take() {
                self.flush_run(run_key);
            }
        });
        self.stats.total.elapsed += total.elapsed;
        self.stats.elements_indexed = self.position;
        self.stats.bins_built = self.encoders.len() as u64;

        // Sort observed keys into the final bin order.
        let mut sorted_keys: Vec<QKey> = self.encoders.keys().copied().collect();
        sorted_keys.sort_by(|a, b| self.quantizer.compare(*a, *b));

        let mut regions: Vec<Arc<Region>> = Vec::with_capacity(sorted_keys.len());
        for key in &sorted_keys {
            let encoder = self
                .encoders
                .remove(key)
                .unwrap_or_else(|| unreachable!("key came from this map"));
            regions.push(Arc::new(encoder.finish()));
        }

        let mut binning = BinningSpec::new(T::DATATYPE, self.quantizer);
        binning.populate(sorted_keys)?;

        debug!(
            elements = self.position,
            bins = regions.len(),
            rep = ?self.rep,
            "index build complete"
        );

        Ok(BinnedIndex::new(
            T::DATATYPE,
            self.domain_size,
            IndexEncoding::Equality,
            self.rep,
            Arc::new(binning),
            regions,
        ))
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }
}
