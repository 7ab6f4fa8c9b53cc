//! Small zero-copy-ish byte reader/writer pair used by every wire format in
//! this crate (frames, notifications, the `.sub` codec, the brute-force
//! state file). Flat little-endian fields throughout, so hand-written
//! `read_*`/`write_*` pairs are clearer than a derive-based codec; the
//! multi-byte integer encoding itself is delegated to `byteorder` rather
//! than hand-rolled, so the endianness convention lives in one place.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::Error;

/// A cursor over a `&mut [u8]` that rejects writes once the buffer is full.
pub struct ByteWriter<'a>(&'a mut [u8]);

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        ByteWriter(buf)
    }

    /// Returns the unwritten-to remainder of the buffer.
    pub fn into_rest(self) -> &'a mut [u8] {
        self.0
    }

    pub fn space_left(&self) -> usize {
        self.0.len()
    }

    pub fn write_slice(&mut self, other: &[u8]) -> Result<(), Error> {
        if other.len() > self.0.len() {
            return Err(Error::Eof);
        }
        let buf = core::mem::take(&mut self.0);
        let (dest, rest) = buf.split_at_mut(other.len());
        dest.copy_from_slice(other);
        self.0 = rest;
        Ok(())
    }

    /// Writes as much of `other` as fits, returning the number of bytes
    /// actually written. Used by the §4.5 file pipeline, which must carry a
    /// pending entry over to the next chunk rather than erroring.
    pub fn write_slice_truncate(&mut self, other: &[u8]) -> usize {
        let n = other.len().min(self.0.len());
        let buf = core::mem::take(&mut self.0);
        let (dest, rest) = buf.split_at_mut(n);
        dest.copy_from_slice(&other[..n]);
        self.0 = rest;
        n
    }

    pub fn write_u8(&mut self, byte: u8) -> Result<(), Error> {
        self.write_slice(&[byte])
    }

    pub fn write_i8(&mut self, byte: i8) -> Result<(), Error> {
        self.write_u8(byte as u8)
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<(), Error> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write_slice(&buf)
    }

    pub fn write_i16_le(&mut self, value: i16) -> Result<(), Error> {
        let mut buf = [0u8; 2];
        LittleEndian::write_i16(&mut buf, value);
        self.write_slice(&buf)
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<(), Error> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write_slice(&buf)
    }

    pub fn write_i32_le(&mut self, value: i32) -> Result<(), Error> {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.write_slice(&buf)
    }

    pub fn write_u64_le(&mut self, value: u64) -> Result<(), Error> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write_slice(&buf)
    }
}

/// A cursor over a `&[u8]` that rejects reads past the end.
#[derive(Clone, Copy)]
pub struct ByteReader<'a>(&'a [u8]);

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader(bytes)
    }

    pub fn as_raw_bytes(&self) -> &'a [u8] {
        self.0
    }

    pub fn into_rest(self) -> &'a [u8] {
        self.0
    }

    pub fn bytes_left(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn skip(&mut self, bytes: usize) -> Result<(), Error> {
        self.read_slice(bytes).map(|_| ())
    }

    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        if len > self.0.len() {
            return Err(Error::Eof);
        }
        let (front, rest) = self.0.split_at(len);
        self.0 = rest;
        Ok(front)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.0;
        self.0 = &[];
        rest
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_slice(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, Error> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        let b = self.read_slice(2)?;
        Ok(LittleEndian::read_u16(b))
    }

    pub fn read_i16_le(&mut self) -> Result<i16, Error> {
        let b = self.read_slice(2)?;
        Ok(LittleEndian::read_i16(b))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        let b = self.read_slice(4)?;
        Ok(LittleEndian::read_u32(b))
    }

    pub fn read_i32_le(&mut self) -> Result<i32, Error> {
        let b = self.read_slice(4)?;
        Ok(LittleEndian::read_i32(b))
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        let b = self.read_slice(8)?;
        Ok(LittleEndian::read_u64(b))
    }
}

/// Implemented by every type that can be serialized onto the wire.
pub trait ToBytes {
    fn to_bytes(&self, writer: &mut ByteWriter<'_>) -> Result<(), Error>;
}

/// Implemented by every type that can be parsed off the wire.
pub trait FromBytes<'a>: Sized {
    fn from_bytes(reader: &mut ByteReader<'a>) -> Result<Self, Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_slice_rejects_overflow() {
        let mut buf = [0u8; 2];
        let mut w = ByteWriter::new(&mut buf);
        assert!(w.write_slice(&[1, 2, 3]).is_err());
    }

    #[test]
    fn round_trip_le_fields() {
        let mut buf = [0u8; 16];
        {
            let mut w = ByteWriter::new(&mut buf);
            w.write_u8(0xAA).unwrap();
            w.write_u16_le(0x1234).unwrap();
            w.write_u32_le(0xDEAD_BEEF).unwrap();
            w.write_i32_le(-400).unwrap();
        }
        let mut r = ByteReader::new(&buf);
        assert_eq!(r.read_u8().unwrap(), 0xAA);
        assert_eq!(r.read_u16_le().unwrap(), 0x1234);
        assert_eq!(r.read_u32_le().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_i32_le().unwrap(), -400);
    }

    #[test]
    fn write_slice_truncate_returns_written_len() {
        let mut buf = [0u8; 3];
        let mut w = ByteWriter::new(&mut buf);
        let n = w.write_slice_truncate(&[1, 2, 3, 4, 5]);
        assert_eq!(n, 3);
    }
}
