//! Framed binary serialization.
//!
//! Every binary file starts with a fixed-width [`FileHeader`] carrying a
//! 64-bit version stamp; the stamp is how the text and binary loaders are
//! told apart on the same entry point. Sections are marked with a short
//! ASCII tag ("Vocab", "NgramModel", ...). Vectors are written as a u64
//! length prefix followed by the raw little-endian payload, padded up to
//! the next 8-byte boundary; strings the same way without a terminator.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};
use zerocopy::{AsBytes, FromBytes};

use crate::{Error, Result};

/// Version stamp of the current binary format.
pub const VERSION_STAMP: u64 = u64::from_le_bytes(*b"nglm\x00\x00\x00\x01");

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, AsBytes, FromBytes)]
pub struct FileHeader {
    pub magic: u64,
}

impl FileHeader {
    pub const CURRENT: FileHeader = FileHeader {
        magic: VERSION_STAMP,
    };

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    /// Reads the header and refuses any stamp other than the current one.
    pub fn verify<R: Read>(reader: &mut R) -> Result<()> {
        let mut buf = [0u8; std::mem::size_of::<FileHeader>()];
        reader.read_exact(&mut buf)?;
        let header =
            FileHeader::read_from(buf.as_slice()).ok_or(Error::VersionMismatch { found: 0 })?;
        if header != Self::CURRENT {
            return Err(Error::VersionMismatch {
                found: header.magic,
            });
        }
        Ok(())
    }

    /// Peeks at a stamp already read from the stream.
    pub fn matches(stamp: u64) -> bool {
        stamp == VERSION_STAMP
    }
}

const fn padding(len: usize) -> usize {
    (8 - len % 8) % 8
}

pub fn write_tag<W: Write>(writer: &mut W, tag: &str) -> Result<()> {
    write_string(writer, tag)
}

pub fn verify_tag<R: Read>(reader: &mut R, tag: &str) -> Result<()> {
    let found = read_string(reader)?;
    if found != tag {
        return Err(Error::SectionMismatch {
            expected: tag.to_string(),
            found,
        });
    }
    Ok(())
}

pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_u64::<LittleEndian>(value)?;
    Ok(())
}

pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    Ok(reader.read_u64::<LittleEndian>()?)
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    write_u64(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    writer.write_all(&[0u8; 8][..padding(value.len())])?;
    Ok(())
}

pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u64(reader)? as usize;
    let mut buf = vec![0u8; len + padding(len)];
    reader.read_exact(&mut buf)?;
    buf.truncate(len);
    String::from_utf8(buf).map_err(|_| Error::SectionMismatch {
        expected: "utf-8 string".to_string(),
        found: "invalid bytes".to_string(),
    })
}

pub fn write_u32_vec<W: Write>(writer: &mut W, values: &[u32]) -> Result<()> {
    write_u64(writer, values.len() as u64)?;
    for &v in values {
        writer.write_u32::<LittleEndian>(v)?;
    }
    writer.write_all(&[0u8; 8][..padding(values.len() * 4)])?;
    Ok(())
}

pub fn read_u32_vec<R: Read>(reader: &mut R) -> Result<Vec<u32>> {
    let len = read_u64(reader)? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(reader.read_u32::<LittleEndian>()?);
    }
    let mut pad = [0u8; 8];
    reader.read_exact(&mut pad[..padding(len * 4)])?;
    Ok(values)
}

pub fn write_f64_vec<W: Write>(writer: &mut W, values: &[f64]) -> Result<()> {
    write_u64(writer, values.len() as u64)?;
    for &v in values {
        writer.write_f64::<LittleEndian>(v)?;
    }
    Ok(())
}

pub fn read_f64_vec<R: Read>(reader: &mut R) -> Result<Vec<f64>> {
    let len = read_u64(reader)? as usize;
    let mut values = Vec::with_capacity(len);
    for _ in 0..len {
        values.push(reader.read_f64::<LittleEndian>()?);
    }
    Ok(values)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip() {
        let mut buf = Vec::new();
        FileHeader::CURRENT.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 8);
        FileHeader::verify(&mut Cursor::new(&buf)).unwrap();
    }

    #[test]
    fn stale_stamp_is_refused() {
        let mut buf = Vec::new();
        write_u64(&mut buf, 0xdead_beef).unwrap();
        match FileHeader::verify(&mut Cursor::new(&buf)) {
            Err(crate::Error::VersionMismatch { found }) => assert_eq!(found, 0xdead_beef),
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn strings_are_padded_to_eight_bytes() {
        let mut buf = Vec::new();
        write_string(&mut buf, "Vocab").unwrap();
        assert_eq!(buf.len(), 8 + 8);
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_string(&mut cursor).unwrap(), "Vocab");
    }

    #[test]
    fn vector_round_trip() {
        let mut buf = Vec::new();
        write_u32_vec(&mut buf, &[1, 2, 3]).unwrap();
        write_f64_vec(&mut buf, &[0.5, -0.25]).unwrap();
        let mut cursor = Cursor::new(&buf);
        assert_eq!(read_u32_vec(&mut cursor).unwrap(), vec![1, 2, 3]);
        assert_eq!(read_f64_vec(&mut cursor).unwrap(), vec![0.5, -0.25]);
    }

    #[test]
    fn tag_mismatch_is_reported() {
        let mut buf = Vec::new();
        write_tag(&mut buf, "NgramModel").unwrap();
        match verify_tag(&mut Cursor::new(&buf), "Vocab") {
            Err(crate::Error::SectionMismatch { expected, found }) => {
                assert_eq!(expected, "Vocab");
                assert_eq!(found, "NgramModel");
            }
            other => panic!("expected SectionMismatch, got {other:?}"),
        }
    }
}
