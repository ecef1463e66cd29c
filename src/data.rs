// data.rs
//
// Dataset access, as external collaborators of the core: the two-line
// dataset descriptor (`path` then `<datatype> {C|FORTRAN} d1 ... dN`)
// and a buffered reader for the backing raw little-endian binary file.
// HDF5-backed descriptors are recognized but not supported by this
// reader.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use crate::error::BinIdxError;
use crate::value::{DataType, Indexable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimOrder {
    C,
    Fortran,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetMeta {
    pub path: PathBuf,
    pub datatype: DataType,
    pub order: DimOrder,
    pub dims: Vec<u64>,
}

impl DatasetMeta {
    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    pub fn open(meta_path: &Path) -> Result<Self, BinIdxError> {
        let text = std::fs::read_to_string(meta_path)?;
        Self::parse(&text, &meta_path.display().to_string())
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self, BinIdxError> {
        let malformed = |reason: &str| BinIdxError::MalformedDescriptor {
            path: origin.to_string(),
            reason: reason.to_string(),
        };
        let mut lines = text.lines();
        let path = lines
            .next()
            .ok_or_else(|| malformed("missing dataset path line"))?
            .trim();
        let desc = lines
            .next()
            .ok_or_else(|| malformed("missing datatype/dims line"))?
            .trim();

        let mut fields = desc.split_whitespace();
        let datatype = DataType::from_name(
            fields
                .next()
                .ok_or_else(|| malformed("missing datatype name"))?,
        )?;
        let order = match fields.next() {
            Some("C") => DimOrder::C,
            Some("FORTRAN") => DimOrder::Fortran,
            _ => return Err(malformed("dimension order must be C or FORTRAN")),
        };
        let dims: Vec<u64> = fields
            .map(|f| f.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|_| malformed("bad dimension"))?;
        if dims.is_empty() {
            return Err(malformed("at least one dimension required"));
        }

        Ok(DatasetMeta {
            path: PathBuf::from(path),
            datatype,
            order,
            dims,
        })
    }

    pub fn to_text(&self) -> String {
        let order = match self.order {
            DimOrder::C => "C",
            DimOrder::Fortran => "FORTRAN",
        };
        let dims: Vec<String> = self.dims.iter().map(|d| d.to_string()).collect();
        format!(
            "{}\n{} {} {}\n",
            self.path.display(),
            self.datatype.name(),
            order,
            dims.join(" ")
        )
    }

    pub fn save(&self, meta_path: &Path) -> Result<(), BinIdxError> {
        std::fs::write(meta_path, self.to_text())?;
        Ok(())
    }
}

/// Buffered streaming over a subrange of the raw dataset file.
pub struct RawDatasetStream<T: Indexable> {
    reader: BufReader<File>,
    remaining: u64,
    buffer: Vec<T>,
}

const STREAM_BUFFER_ELEMS: usize = 1 << 16;

impl<T: Indexable> RawDatasetStream<T> {
    pub fn open(meta: &DatasetMeta, offset: u64, length: u64) -> Result<Self, BinIdxError> {
        if meta.datatype != T::DATATYPE {
            return Err(BinIdxError::StringError(format!(
                "dataset is {}, requested {}",
                meta.datatype,
                T::DATATYPE.name()
            )));
        }
        let file = File::open(&meta.path)?;
        let mut reader = BufReader::new(file);
        let width = T::DATATYPE.width_bytes() as u64;
        std::io::copy(
            &mut reader.by_ref().take(offset * width),
            &mut std::io::sink(),
        )?;
        let remaining = length.min(meta.element_count().saturating_sub(offset));
        Ok(RawDatasetStream {
            reader,
            remaining,
            buffer: Vec::new(),
        })
    }

    /// Read the next buffered block, or None at end of range.
    pub fn next_block(&mut self) -> Result<Option<&[T]>, BinIdxError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let width = T::DATATYPE.width_bytes();
        let take = (self.remaining as usize).min(STREAM_BUFFER_ELEMS);
        let mut bytes = vec![0u8; take * width];
        self.reader.read_exact(&mut bytes)?;
        self.buffer.clear();
        self.buffer
            .extend(bytes.chunks_exact(width).map(T::from_le_bytes));
        self.remaining -= take as u64;
        Ok(Some(&self.buffer))
    }

    /// Drain the whole range into memory.
    pub fn read_all(mut self) -> Result<Vec<T>, BinIdxError> {
        let mut out = Vec::new();
        while let Some(block) = self.next_block()? {
            out.extend_from_slice(block);
        }
        Ok(out)
    }
}

/// Write a raw little-endian dataset file.
pub fn write_raw_dataset<T: Indexable>(path: &Path, values: &[T]) -> Result<(), BinIdxError> {
    use std::io::Write;
    let mut out = std::io::BufWriter::new(File::create(path)?);
    for &v in values {
        let bits = v.to_bits();
        out.write_all(&bits.to_le_bytes()[..T::DATATYPE.width_bytes()])?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_meta_parse_round_trip() {
        let meta = DatasetMeta {
            path: PathBuf::from("/data/t.raw"),
            datatype: DataType::Float32,
            order: DimOrder::C,
            dims: vec![100, 20],
        };
        let parsed = DatasetMeta::parse(&meta.to_text(), "t").unwrap();
        assert_eq!(parsed, meta);
        assert_eq!(parsed.element_count(), 2000);
    }

    #[test]
    fn test_meta_rejects_bad_lines() {
        assert!(DatasetMeta::parse("only-path\n", "t").is_err());
        assert!(DatasetMeta::parse("p\nf32 COLMAJOR 4\n", "t").is_err());
        assert!(DatasetMeta::parse("p\nnope C 4\n", "t").is_err());
    }

    #[test]
    fn test_raw_stream_round_trip() {
        let dir = TempDir::new().unwrap();
        let raw = dir.path().join("d.raw");
        let values: Vec<u16> = (0..1000u16).collect();
        write_raw_dataset(&raw, &values).unwrap();

        let meta = DatasetMeta {
            path: raw,
            datatype: DataType::UInt16,
            order: DimOrder::C,
            dims: vec![1000],
        };
        let stream = RawDatasetStream::<u16>::open(&meta, 0, 1000).unwrap();
        assert_eq!(stream.read_all().unwrap(), values);

        // Subrange with an offset.
        let stream = RawDatasetStream::<u16>::open(&meta, 990, 100).unwrap();
        assert_eq!(stream.read_all().unwrap(), (990..1000u16).collect::<Vec<_>>());
    }

    #[test]
    fn test_datatype_mismatch() {
        let meta = DatasetMeta {
            path: PathBuf::from("x"),
            datatype: DataType::Float64,
            order: DimOrder::C,
            dims: vec![1],
        };
        assert!(RawDatasetStream::<u32>::open(&meta, 0, 1).is_err());
    }
}
