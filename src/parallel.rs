// parallel.rs
//
// Parallel index generation: the dataset's RID space is split into
// fixed-size partitions; writer ranks build partitions round-robin and
// write them through the shared-file format, with partition space
// reserved by the master-rank allocator. Rank 0 is the master; it
// either also indexes (default) or is a dedicated allocator. Workers
// run as scoped rayon threads, and the scope join is the barrier that
// guarantees the footer is on disk before anyone reopens the file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use parking_lot::Mutex;
use rayon::Scope;
use tracing::{debug, info};

use crate::build::IndexBuilder;
use crate::encoding::IndexEncoding;
use crate::error::BinIdxError;
use crate::io::alloc::{ClientAllocator, MasterAllocator};
use crate::io::file::{
    serialize_partition, write_footer, write_partition_at, DomainMapping, PartitionMetadata,
};
use crate::quant::Quantizer;
use crate::region::RegionType;
use crate::setops::SetOps;
use crate::stats::{ParallelBuildStats, Stat};
use crate::value::Indexable;

#[derive(Debug, Clone)]
pub struct ParallelIndexGenerator {
    pub quantizer: Quantizer,
    pub rep: RegionType,
    pub encoding: IndexEncoding,
    pub cblq_dense_suffix: bool,
    pub partition_size: u64,
    pub ranks: usize,
    pub dedicated_master: bool,
}

impl ParallelIndexGenerator {
    pub fn new(quantizer: Quantizer, rep: RegionType, partition_size: u64, ranks: usize) -> Self {
        ParallelIndexGenerator {
            quantizer,
            rep,
            encoding: IndexEncoding::Equality,
            cblq_dense_suffix: false,
            partition_size,
            ranks: ranks.max(1),
            dedicated_master: false,
        }
    }

    /// Index `data` into `path`. Partition i covers RIDs
    /// [i * partition_size, min((i+1) * partition_size, len)).
    pub fn generate<T: Indexable + Sync>(
        &self,
        path: &Path,
        data: &[T],
    ) -> Result<ParallelBuildStats, BinIdxError> {
        let nelem = data.len() as u64;
        let num_partitions = if nelem == 0 {
            0
        } else {
            nelem.div_ceil(self.partition_size)
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let master_indexes = !(self.dedicated_master && self.ranks > 1);
        let indexer_ranks = if master_indexes {
            self.ranks
        } else {
            self.ranks - 1
        };
        let num_clients = if master_indexes {
            self.ranks - 1
        } else {
            indexer_ranks
        };

        info!(
            nelem,
            num_partitions,
            ranks = self.ranks,
            rep = ?self.rep,
            "parallel index generation starting"
        );

        let (mut master, clients) = MasterAllocator::new(num_clients);
        let stats = Mutex::new(ParallelBuildStats::default());
        let errors: Mutex<Vec<BinIdxError>> = Mutex::new(Vec::new());
        let footer_slot = Mutex::new(None);

        rayon::scope(|scope: &Scope<'_>| {
            let mut clients = clients.into_iter();
            for rank in 0..indexer_ranks {
                // With a combined master (the default), rank 0 indexes
                // on this thread below, allocating master-locally.
                if master_indexes && rank == 0 {
                    continue;
                }
                let client = clients.next().unwrap_or_else(|| unreachable!());
                let file = &file;
                let stats = &stats;
                let errors = &errors;
                let this = self;
                scope.spawn(move |_| {
                    let mut allocator = RankAllocator::Client(Some(client));
                    let result = this.run_rank(
                        rank,
                        indexer_ranks,
                        num_partitions,
                        data,
                        file,
                        &mut allocator,
                        stats,
                    );
                    // Always send the close so the master can finalize,
                    // failed rank or not; committed partitions stand.
                    let _ = allocator.finish();
                    if let Err(e) = result {
                        errors.lock().push(e);
                    }
                });
            }

            // The master participates from this thread, serving client
            // allocations opportunistically between its own partitions,
            // then blocks in close() until every client has closed.
            if master_indexes {
                let result = self.run_rank(
                    0,
                    indexer_ranks,
                    num_partitions,
                    data,
                    &file,
                    &mut RankAllocator::Master(&mut master),
                    &stats,
                );
                if let Err(e) = result {
                    errors.lock().push(e);
                }
            }
            match master.close() {
                Ok(footer) => *footer_slot.lock() = Some(footer),
                Err(e) => errors.lock().push(e),
            }
        });

        if let Some(err) = errors.into_inner().into_iter().next() {
            return Err(err);
        }

        let footer = footer_slot
            .into_inner()
            .ok_or_else(|| BinIdxError::StringError("allocator did not finalize".into()))?;
        write_footer(&file, &footer)?;
        info!(
            partitions = footer.num_partitions(),
            "parallel index generation complete"
        );

        let mut out = stats.into_inner();
        out.partitions_indexed = footer.num_partitions();
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn run_rank<T: Indexable>(
        &self,
        rank: usize,
        indexer_ranks: usize,
        num_partitions: u64,
        data: &[T],
        file: &File,
        allocator: &mut RankAllocator<'_>,
        stats: &Mutex<ParallelBuildStats>,
    ) -> Result<(), BinIdxError> {
        let setops = SetOps::default();
        let mut local = ParallelBuildStats::default();

        for pid in (rank as u64..num_partitions).step_by(indexer_ranks.max(1)) {
            let lo = pid * self.partition_size;
            let hi = ((pid + 1) * self.partition_size).min(data.len() as u64);
            let domain = DomainMapping {
                offset: lo,
                length: hi - lo,
            };

            let mut builder = IndexBuilder::<T>::new(
                self.quantizer.clone(),
                self.rep,
                domain.length,
                self.cblq_dense_suffix,
            );
            builder.append_values(&data[lo as usize..hi as usize]);
            let mut index = builder.finish()?;
            local.build.elements_indexed += domain.length;
            local.build.bins_built += index.num_bins()? as u64;
            if self.encoding != IndexEncoding::Equality {
                index = index.reencode(self.encoding, &setops)?;
            }

            let meta = PartitionMetadata {
                datatype: Some(index.datatype()),
                domain: Some(domain),
                encoding: Some(index.encoding()),
                rep: Some(index.rep()),
                binning: Some(index.binning().clone()),
            };
            let blob = serialize_partition(&meta, index.regions())?;
            let (partition_id, offset) = allocator.allocate(blob.len() as u64, domain)?;
            write_partition_at(file, offset, &blob)?;
            local.io.write_bytes += blob.len() as u64;
            local.io.write_seeks += 1;
            debug!(rank, partition = partition_id, offset, "partition written");
        }

        stats.lock().add(&local);
        Ok(())
    }
}

enum RankAllocator<'a> {
    Master(&'a mut MasterAllocator),
    Client(Option<ClientAllocator>),
}

impl RankAllocator<'_> {
    fn allocate(
        &mut self,
        size: u64,
        domain: DomainMapping,
    ) -> Result<(u64, u64), BinIdxError> {
        match self {
            RankAllocator::Master(master) => Ok(master.allocate(size, domain)),
            RankAllocator::Client(Some(client)) => client.allocate(size, domain),
            RankAllocator::Client(None) => Err(BinIdxError::StringError(
                "allocator already closed".into(),
            )),
        }
    }

    fn finish(&mut self) -> Result<(), BinIdxError> {
        match self {
            // The master counts itself closed in close().
            RankAllocator::Master(_) => Ok(()),
            RankAllocator::Client(client) => match client.take() {
                Some(c) => c.close(),
                None => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::file::IndexFile;
    use crate::value::DataType;
    use tempfile::TempDir;

    fn dataset(n: usize) -> Vec<u8> {
        (0..n).map(|i| ((i * 7 + i / 13) % 5) as u8).collect()
    }

    #[test]
    fn test_parallel_matches_serial() {
        let dir = TempDir::new().unwrap();
        let data = dataset(4096);
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();

        let parallel_path = dir.path().join("par.binidx");
        let generator =
            ParallelIndexGenerator::new(quantizer.clone(), RegionType::Ii, 1024, 4);
        generator.generate(&parallel_path, &data).unwrap();

        let serial_path = dir.path().join("ser.binidx");
        let serial = ParallelIndexGenerator::new(quantizer, RegionType::Ii, 1024, 1);
        serial.generate(&serial_path, &data).unwrap();

        let par = IndexFile::open(&parallel_path).unwrap();
        let ser = IndexFile::open(&serial_path).unwrap();
        assert_eq!(par.num_partitions(), 4);
        assert_eq!(ser.num_partitions(), 4);

        // Same partitions by domain, identical metadata and regions.
        let par_sorted = par.sorted_domain_mappings();
        let ser_sorted = ser.sorted_domain_mappings();
        for ((pid, pdom), (sid, sdom)) in par_sorted.iter().zip(ser_sorted.iter()) {
            assert_eq!(pdom, sdom);
            let mut ppart = par.partition(*pid).unwrap();
            let mut spart = ser.partition(*sid).unwrap();
            assert_eq!(ppart.num_regions(), spart.num_regions());
            assert_eq!(
                ppart.metadata().binning.as_ref().unwrap(),
                spart.metadata().binning.as_ref().unwrap()
            );
            let ids: Vec<usize> = (0..ppart.num_regions()).collect();
            let pregions = ppart.read_regions(&ids).unwrap();
            let sregions = spart.read_regions(&ids).unwrap();
            for ((_, pr), (_, sr)) in pregions.iter().zip(sregions.iter()) {
                assert_eq!(pr.as_ref(), sr.as_ref());
            }
        }
    }

    #[test]
    fn test_dedicated_master() {
        let dir = TempDir::new().unwrap();
        let data = dataset(512);
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();
        let path = dir.path().join("ded.binidx");
        let mut generator = ParallelIndexGenerator::new(quantizer, RegionType::Wah, 128, 3);
        generator.dedicated_master = true;
        generator.generate(&path, &data).unwrap();
        let file = IndexFile::open(&path).unwrap();
        assert_eq!(file.num_partitions(), 4);
    }

    #[test]
    fn test_uneven_tail_partition() {
        let dir = TempDir::new().unwrap();
        let data = dataset(1000);
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();
        let path = dir.path().join("tail.binidx");
        let generator = ParallelIndexGenerator::new(quantizer, RegionType::Cii, 300, 2);
        generator.generate(&path, &data).unwrap();
        let file = IndexFile::open(&path).unwrap();
        assert_eq!(file.num_partitions(), 4);
        let domains = file.sorted_domain_mappings();
        assert_eq!(domains[3].1.length, 100);
    }
}
