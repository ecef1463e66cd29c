// io/archive.rs
//
// Little-endian primitive framing for the index file format. Dynamic
// payloads are tagged with a single leading byte written by the container;
// vectors and plain structs go through bincode, whose default config
// (little-endian, fixed-width ints, u64 length prefixes) matches the
// format rules.

use std::io::{Read, Write};

use crate::error::BinIdxError;

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> Result<(), BinIdxError> {
    w.write_all(&[v])?;
    Ok(())
}

pub fn read_u8<R: Read>(r: &mut R) -> Result<u8, BinIdxError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<(), BinIdxError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64, BinIdxError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_primitives() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 7).unwrap();
        write_u64(&mut buf, 0xDEAD_BEEF_0102_0304).unwrap();
        let mut r = buf.as_slice();
        assert_eq!(read_u8(&mut r).unwrap(), 7);
        assert_eq!(read_u64(&mut r).unwrap(), 0xDEAD_BEEF_0102_0304);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 1).unwrap();
        assert_eq!(buf, vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }

}
