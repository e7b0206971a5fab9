// Binary serialization utilities for ledger data structures
//
// Integers are little-endian, variable-length fields carry a VarInt length prefix.

use crate::core::Hash256;
use crate::error::{ChainError, Result};
use std::io::{self, Cursor, Read};

/// Trait for serializable types
pub trait Serializable: Sized {
    fn serialize(&self) -> Vec<u8>;

    /// Decode from a reader positioned at the start of the value
    fn from_reader<R: Read + ?Sized>(reader: &mut R) -> Result<Self>;

    fn deserialize(data: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(data);
        let value = Self::from_reader(&mut cursor)?;
        if cursor.position() as usize != data.len() {
            return Err(ChainError::Serialization(format!(
                "{} trailing bytes after value",
                data.len() - cursor.position() as usize
            )));
        }
        Ok(value)
    }
}

fn decode_err(e: io::Error) -> ChainError {
    ChainError::Serialization(e.to_string())
}

/// Write a variable-length integer (VarInt)
pub fn write_varint(buf: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => buf.push(value as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x10000..=0xffffffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte).map_err(decode_err)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes).map_err(decode_err)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes).map_err(decode_err)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes).map_err(decode_err)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Upper bound on elements reserved ahead of decoding them
const MAX_PREALLOC: usize = 1024;

/// Read a VarInt used as an element count, rejecting counts above 2^24
///
/// The count comes from untrusted input, so callers size buffers with [`preallocate`] and let
/// truncated input fail on the element reads.
pub fn read_count<R: Read + ?Sized>(reader: &mut R) -> Result<usize> {
    const MAX_COUNT: u64 = 1 << 24;
    let count = read_varint(reader)?;
    if count > MAX_COUNT {
        return Err(ChainError::Serialization(format!("Count too large: {}", count)));
    }
    Ok(count as usize)
}

/// Vector with room for at most `MAX_PREALLOC` elements of a decoded count
pub fn preallocate<T>(count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(MAX_PREALLOC))
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    write_varint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read bytes with length prefix
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>> {
    let len = read_count(reader)?;
    let mut data = preallocate(len);
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut data)
        .map_err(decode_err)?;
    if data.len() != len {
        return Err(ChainError::Serialization(format!(
            "Expected {} bytes, got {}",
            len,
            data.len()
        )));
    }
    Ok(data)
}

pub fn write_var_str(buf: &mut Vec<u8>, value: &str) {
    write_var_bytes(buf, value.as_bytes());
}

pub fn read_var_str<R: Read + ?Sized>(reader: &mut R) -> Result<String> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| ChainError::Serialization(format!("Invalid UTF-8: {}", e)))
}

pub fn read_array<R: Read + ?Sized, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(decode_err)?;
    Ok(bytes)
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

pub fn read_i32<R: Read + ?Sized>(reader: &mut R) -> Result<i32> {
    Ok(i32::from_le_bytes(read_array(reader)?))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> Result<i64> {
    Ok(i64::from_le_bytes(read_array(reader)?))
}

pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> Result<Hash256> {
    Ok(Hash256::new(read_array(reader)?))
}
