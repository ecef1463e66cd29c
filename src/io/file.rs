// io/file.rs
//
// The shared-file partitioned index format. Layout, little-endian:
//
//   segment offsets header   u64 partition_segment_offset
//                            u64 footer_segment_offset
//   partition segment        partitions back to back; each partition is
//                            a partition header (metadata + length-
//                            prefixed u64[nregions+1] of relative region
//                            offsets) followed by tagged region blobs
//   footer                   length-prefixed u64[npart+1] absolute
//                            partition offsets, length-prefixed domain
//                            mappings
//
// Writes go through a measuring pass so a partition's file space is
// reserved in full before the single seek+write that commits it. Reads
// are served from a memory map; requested region id sets are coalesced
// into contiguous runs, one "seek" per run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::binning::BinningSpec;
use crate::encoding::IndexEncoding;
use crate::error::BinIdxError;
use crate::io::alloc::{FooterState, SerialAllocator, HEADER_SIZE};
use crate::io::archive::{read_u64, read_u8, write_u64, write_u8};
use crate::region::{Region, RegionType};
use crate::stats::IoStats;
use crate::value::DataType;

pub type PartitionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMapping {
    pub offset: u64,
    pub length: u64,
}

/// Per-partition metadata. Fields are optional while a partition is
/// being staged; writing a partition with any field missing is a logic
/// error.
#[derive(Debug, Clone, Default)]
pub struct PartitionMetadata {
    pub datatype: Option<DataType>,
    pub domain: Option<DomainMapping>,
    pub encoding: Option<IndexEncoding>,
    pub rep: Option<RegionType>,
    pub binning: Option<Arc<BinningSpec>>,
}

impl PartitionMetadata {
    pub fn is_filled(&self) -> bool {
        self.datatype.is_some()
            && self.domain.is_some()
            && self.encoding.is_some()
            && self.rep.is_some()
            && self.binning.is_some()
    }

    pub fn save<W: Write>(&self, w: &mut W) -> Result<(), BinIdxError> {
        if !self.is_filled() {
            return Err(BinIdxError::IncompleteMetadata);
        }
        let datatype = self.datatype.unwrap_or_else(|| unreachable!());
        let domain = self.domain.unwrap_or_else(|| unreachable!());
        let encoding = self.encoding.unwrap_or_else(|| unreachable!());
        let rep = self.rep.unwrap_or_else(|| unreachable!());
        let binning = self.binning.as_ref().unwrap_or_else(|| unreachable!());

        write_u8(w, datatype.tag())?;
        write_u64(w, domain.offset)?;
        write_u64(w, domain.length)?;
        encoding.save(w)?;
        write_u8(w, rep.tag())?;
        binning.save(w)?;
        Ok(())
    }

    pub fn load(r: &mut &[u8]) -> Result<Self, BinIdxError> {
        let datatype = DataType::from_tag(read_u8(r)?)?;
        let offset = read_u64(r)?;
        let length = read_u64(r)?;
        let encoding = IndexEncoding::load(r)?;
        let rep = RegionType::from_tag(read_u8(r)?)?;
        let binning = BinningSpec::load(r)?;
        Ok(PartitionMetadata {
            datatype: Some(datatype),
            domain: Some(DomainMapping { offset, length }),
            encoding: Some(encoding),
            rep: Some(rep),
            binning: Some(Arc::new(binning)),
        })
    }
}

/// Serialize a partition blob: header (metadata + region offsets) then
/// the tagged regions. The relative region offset vector has
/// nregions + 1 entries; entry 0 is the header size.
pub fn serialize_partition(
    meta: &PartitionMetadata,
    regions: &[Arc<Region>],
) -> Result<Vec<u8>, BinIdxError> {
    if !meta.is_filled() {
        return Err(BinIdxError::IncompleteMetadata);
    }

    let mut meta_buf = Vec::new();
    meta.save(&mut meta_buf)?;

    let mut region_bufs: Vec<Vec<u8>> = Vec::with_capacity(regions.len());
    for region in regions {
        if Some(region.region_type()) != meta.rep {
            return Err(BinIdxError::IncompatibleOperands(
                "region representation differs from partition metadata".into(),
            ));
        }
        let mut buf = Vec::new();
        region.save_tagged(&mut buf)?;
        region_bufs.push(buf);
    }

    let header_size = meta_buf.len() as u64 + 8 + 8 * (regions.len() as u64 + 1);
    let mut region_offsets = Vec::with_capacity(regions.len() + 1);
    region_offsets.push(header_size);
    for buf in &region_bufs {
        let last = *region_offsets.last().unwrap_or_else(|| unreachable!());
        region_offsets.push(last + buf.len() as u64);
    }

    let total = *region_offsets.last().unwrap_or_else(|| unreachable!()) as usize;
    let mut blob = Vec::with_capacity(total);
    blob.extend_from_slice(&meta_buf);
    bincode::serialize_into(&mut blob, &region_offsets)?;
    debug_assert_eq!(blob.len() as u64, header_size);
    for buf in &region_bufs {
        blob.extend_from_slice(buf);
    }
    Ok(blob)
}

/// Write a partition blob at its allocated offset.
pub fn write_partition_at(file: &File, offset: u64, blob: &[u8]) -> Result<(), BinIdxError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::FileExt;
        file.write_all_at(blob, offset)?;
    }
    #[cfg(not(unix))]
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = file;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(blob)?;
    }
    Ok(())
}

/// Write the segment-offsets header and the footer once every partition
/// has committed. The footer offset is the end of the last partition.
pub fn write_footer(file: &File, footer: &FooterState) -> Result<(), BinIdxError> {
    let footer_offset = footer.end_offset();

    let mut footer_buf = Vec::new();
    bincode::serialize_into(&mut footer_buf, &footer.partition_offsets)?;
    bincode::serialize_into(&mut footer_buf, &footer.domains)?;
    write_partition_at(file, footer_offset, &footer_buf)?;

    let mut header = Vec::with_capacity(HEADER_SIZE as usize);
    write_u64(&mut header, HEADER_SIZE)?;
    write_u64(&mut header, footer_offset)?;
    write_partition_at(file, 0, &header)?;
    file.sync_all()?;
    Ok(())
}

/// Single-writer index file: partitions are staged, measured, allocated
/// serially and committed in offset order; `finalize` writes the footer.
#[derive(Debug)]
pub struct IndexFileWriter {
    file: File,
    allocator: SerialAllocator,
}

impl IndexFileWriter {
    pub fn create(path: &Path) -> Result<Self, BinIdxError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(IndexFileWriter {
            file,
            allocator: SerialAllocator::new(),
        })
    }

    pub fn append_partition(
        &mut self,
        meta: &PartitionMetadata,
        regions: &[Arc<Region>],
    ) -> Result<PartitionId, BinIdxError> {
        let domain = meta.domain.ok_or(BinIdxError::IncompleteMetadata)?;
        let blob = serialize_partition(meta, regions)?;
        let (id, offset) = self.allocator.allocate(blob.len() as u64, domain);
        write_partition_at(&self.file, offset, &blob)?;
        debug!(partition = id, offset, bytes = blob.len(), "partition committed");
        Ok(id)
    }

    pub fn num_partitions(&self) -> u64 {
        self.allocator.footer().num_partitions()
    }

    pub fn finalize(self) -> Result<(), BinIdxError> {
        write_footer(&self.file, self.allocator.footer())
    }
}

/// Read-only partitioned index file over a memory map.
#[derive(Debug)]
pub struct IndexFile {
    mmap: Mmap,
    footer: FooterState,
}

impl IndexFile {
    pub fn open(path: &Path) -> Result<Self, BinIdxError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE as usize {
            return Err(BinIdxError::CorruptFile("file shorter than header".into()));
        }
        let mut header = &mmap[..HEADER_SIZE as usize];
        let partition_segment_offset = read_u64(&mut header)?;
        let footer_offset = read_u64(&mut header)?;
        if partition_segment_offset != HEADER_SIZE {
            return Err(BinIdxError::CorruptFile(format!(
                "unexpected partition segment offset {}",
                partition_segment_offset
            )));
        }
        if footer_offset as usize > mmap.len() {
            return Err(BinIdxError::CorruptFile("footer offset past EOF".into()));
        }

        let mut footer_bytes = &mmap[footer_offset as usize..];
        let partition_offsets: Vec<u64> = bincode::deserialize_from(&mut footer_bytes)?;
        let domains: Vec<DomainMapping> = bincode::deserialize_from(&mut footer_bytes)?;

        if partition_offsets.len() != domains.len() + 1 {
            return Err(BinIdxError::CorruptFile(
                "footer offset and metadata vectors disagree".into(),
            ));
        }
        if !partition_offsets.windows(2).all(|w| w[0] < w[1]) {
            return Err(BinIdxError::CorruptFile(
                "partition offsets are not strictly increasing".into(),
            ));
        }
        match partition_offsets.first() {
            Some(&first) if first == HEADER_SIZE => {}
            _ => {
                return Err(BinIdxError::CorruptFile(
                    "partition segment does not start after the header".into(),
                ))
            }
        }
        // Anything past the footer-recorded end is an ignored torn tail.
        if *partition_offsets.last().unwrap_or(&0) != footer_offset {
            return Err(BinIdxError::CorruptFile(
                "footer offset does not match the end of the last partition".into(),
            ));
        }

        Ok(IndexFile {
            mmap,
            footer: FooterState {
                partition_offsets,
                domains,
            },
        })
    }

    pub fn num_partitions(&self) -> u64 {
        self.footer.num_partitions()
    }

    pub fn partition_domain(&self, id: PartitionId) -> DomainMapping {
        self.footer.domains[id as usize]
    }

    /// (partition id, domain) pairs ordered by domain offset.
    pub fn sorted_domain_mappings(&self) -> Vec<(PartitionId, DomainMapping)> {
        let mut out: Vec<(PartitionId, DomainMapping)> = self
            .footer
            .domains
            .iter()
            .enumerate()
            .map(|(id, &d)| (id as PartitionId, d))
            .collect();
        out.sort_by_key(|&(_, d)| d.offset);
        out
    }

    pub fn partition(&self, id: PartitionId) -> Result<PartitionReader<'_>, BinIdxError> {
        let start = self.footer.partition_offsets[id as usize] as usize;
        let end = self.footer.partition_offsets[id as usize + 1] as usize;
        if end > self.mmap.len() {
            return Err(BinIdxError::CorruptFile("partition extends past EOF".into()));
        }
        let bytes = &self.mmap[start..end];

        let mut cursor: &[u8] = bytes;
        let meta = PartitionMetadata::load(&mut cursor)?;
        let region_offsets: Vec<u64> = bincode::deserialize_from(&mut cursor)?;

        if !region_offsets.windows(2).all(|w| w[0] <= w[1]) {
            return Err(BinIdxError::CorruptFile(
                "region offsets are not monotonic".into(),
            ));
        }
        match region_offsets.last() {
            Some(&last) if last as usize == bytes.len() => {}
            _ => {
                return Err(BinIdxError::CorruptFile(
                    "region offsets do not span the partition".into(),
                ))
            }
        }

        Ok(PartitionReader {
            id,
            bytes,
            meta,
            region_offsets,
            io_stats: IoStats::default(),
        })
    }
}

/// One partition's header plus access to its region blobs.
#[derive(Debug)]
pub struct PartitionReader<'a> {
    id: PartitionId,
    bytes: &'a [u8],
    meta: PartitionMetadata,
    region_offsets: Vec<u64>,
    io_stats: IoStats,
}

impl<'a> PartitionReader<'a> {
    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn metadata(&self) -> &PartitionMetadata {
        &self.meta
    }

    pub fn num_regions(&self) -> usize {
        self.region_offsets.len() - 1
    }

    /// Serialized size of regions [lb, ub).
    pub fn regions_size(&self, lb: usize, ub: usize) -> u64 {
        self.region_offsets[ub] - self.region_offsets[lb]
    }

    pub fn io_stats(&self) -> IoStats {
        self.io_stats
    }

    pub fn reset_io_stats(&mut self) {
        self.io_stats = IoStats::default();
    }

    /// Read a set of regions, coalescing contiguous id runs into one
    /// read each. `ids` must be sorted and unique.
    pub fn read_regions(
        &mut self,
        ids: &[usize],
    ) -> Result<Vec<(usize, Arc<Region>)>, BinIdxError> {
        let rep = self.meta.rep.ok_or(BinIdxError::IncompleteMetadata)?;
        let mut out = Vec::with_capacity(ids.len());

        let mut i = 0usize;
        while i < ids.len() {
            let run_start = ids[i];
            let mut run_end = run_start;
            while i + 1 < ids.len() && ids[i + 1] == run_end + 1 {
                run_end += 1;
                i += 1;
            }
            i += 1;

            let lo = self.region_offsets[run_start] as usize;
            let hi = self.region_offsets[run_end + 1] as usize;
            self.io_stats.read_seeks += 1;
            self.io_stats.read_bytes += (hi - lo) as u64;
            let run_bytes = &self.bytes[lo..hi];

            for id in run_start..=run_end {
                let off = self.region_offsets[id] as usize - lo;
                let end = self.region_offsets[id + 1] as usize - lo;
                let mut slice = &run_bytes[off..end];
                let region = Region::load_tagged(&mut slice)?;
                if region.region_type() != rep {
                    return Err(BinIdxError::CorruptFile(format!(
                        "region {} tag disagrees with partition metadata",
                        id
                    )));
                }
                out.push((id, Arc::new(region)));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::Quantizer;
    use crate::region::region_from_rids;
    use tempfile::TempDir;

    fn test_meta(domain: DomainMapping) -> PartitionMetadata {
        let quantizer = Quantizer::sigbits(DataType::UInt8, 8).unwrap();
        let mut binning = BinningSpec::new(DataType::UInt8, quantizer);
        binning
            .populate(vec![
                crate::quant::QKey::U(0),
                crate::quant::QKey::U(1),
                crate::quant::QKey::U(2),
            ])
            .unwrap();
        PartitionMetadata {
            datatype: Some(DataType::UInt8),
            domain: Some(domain),
            encoding: Some(IndexEncoding::Equality),
            rep: Some(RegionType::Ii),
            binning: Some(Arc::new(binning)),
        }
    }

    fn test_regions(domain: u64) -> Vec<Arc<Region>> {
        vec![
            Arc::new(region_from_rids(RegionType::Ii, domain, &[0, 1])),
            Arc::new(region_from_rids(RegionType::Ii, domain, &[2, 5])),
            Arc::new(region_from_rids(RegionType::Ii, domain, &[7])),
        ]
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.binidx");

        let mut writer = IndexFileWriter::create(&path).unwrap();
        let meta0 = test_meta(DomainMapping { offset: 0, length: 8 });
        let meta1 = test_meta(DomainMapping { offset: 8, length: 8 });
        let regions = test_regions(8);
        assert_eq!(writer.append_partition(&meta0, &regions).unwrap(), 0);
        assert_eq!(writer.append_partition(&meta1, &regions).unwrap(), 1);
        writer.finalize().unwrap();

        let file = IndexFile::open(&path).unwrap();
        assert_eq!(file.num_partitions(), 2);
        assert_eq!(
            file.partition_domain(1),
            DomainMapping { offset: 8, length: 8 }
        );

        let mut part = file.partition(0).unwrap();
        assert_eq!(part.num_regions(), 3);
        assert_eq!(part.metadata().datatype, Some(DataType::UInt8));
        let loaded = part.read_regions(&[0, 1, 2]).unwrap();
        for ((id, region), expect) in loaded.iter().zip(regions.iter()) {
            assert_eq!(region.as_ref(), expect.as_ref(), "region {}", id);
        }
        // All three ids are contiguous: one coalesced read.
        assert_eq!(part.io_stats().read_seeks, 1);

        let mut part = file.partition(1).unwrap();
        let loaded = part.read_regions(&[0, 2]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(part.io_stats().read_seeks, 2);
    }

    #[test]
    fn test_incomplete_metadata_rejected() {
        let meta = PartitionMetadata {
            datatype: Some(DataType::UInt8),
            ..Default::default()
        };
        assert!(matches!(
            serialize_partition(&meta, &[]),
            Err(BinIdxError::IncompleteMetadata)
        ));
    }

    #[test]
    fn test_corrupt_footer_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.binidx");
        let mut writer = IndexFileWriter::create(&path).unwrap();
        let meta = test_meta(DomainMapping { offset: 0, length: 8 });
        writer.append_partition(&meta, &test_regions(8)).unwrap();
        writer.finalize().unwrap();

        // Truncate the footer offset in the header.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[8] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            IndexFile::open(&path),
            Err(BinIdxError::CorruptFile(_)) | Err(BinIdxError::SerializationError(_))
        ));
    }

    #[test]
    fn test_partition_sizes_and_region_sizes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sizes.binidx");
        let mut writer = IndexFileWriter::create(&path).unwrap();
        let meta = test_meta(DomainMapping { offset: 0, length: 8 });
        let regions = test_regions(8);
        writer.append_partition(&meta, &regions).unwrap();
        writer.finalize().unwrap();

        let file = IndexFile::open(&path).unwrap();
        let part = file.partition(0).unwrap();
        assert!(part.regions_size(0, 3) > 0);
        assert_eq!(
            part.regions_size(0, 3),
            part.regions_size(0, 1) + part.regions_size(1, 3)
        );
    }
}
