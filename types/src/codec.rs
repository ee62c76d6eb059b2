use bytes::{Buf, BufMut};
use commonware_codec::{Error, ReadExt, Write};

/// Helper to write a string as length-prefixed UTF-8 bytes.
pub fn write_string(s: &str, writer: &mut impl BufMut) {
    write_bytes(s.as_bytes(), writer);
}

/// Helper to read a string from length-prefixed UTF-8 bytes.
pub fn read_string(reader: &mut impl Buf, max_len: usize) -> Result<String, Error> {
    let bytes = read_bytes(reader, max_len)?;
    String::from_utf8(bytes).map_err(|_| Error::Invalid("String", "invalid UTF-8"))
}

/// Helper to get encode size of a string.
pub fn string_encode_size(s: &str) -> usize {
    bytes_encode_size(s.as_bytes())
}

/// Helper to write an opaque byte string with a `u32` length prefix.
pub fn write_bytes(bytes: &[u8], writer: &mut impl BufMut) {
    (bytes.len() as u32).write(writer);
    writer.put_slice(bytes);
}

/// Helper to read an opaque byte string with a `u32` length prefix.
pub fn read_bytes(reader: &mut impl Buf, max_len: usize) -> Result<Vec<u8>, Error> {
    let len = u32::read(reader)? as usize;
    if len > max_len {
        return Err(Error::Invalid("Bytes", "too long"));
    }
    if reader.remaining() < len {
        return Err(Error::EndOfBuffer);
    }
    let mut bytes = vec![0u8; len];
    reader.copy_to_slice(&mut bytes);
    Ok(bytes)
}

pub fn bytes_encode_size(bytes: &[u8]) -> usize {
    4 + bytes.len()
}

/// Raw amounts are written as 16 big-endian bytes.
pub fn write_i128(value: i128, writer: &mut impl BufMut) {
    writer.put_i128(value);
}

pub fn read_i128(reader: &mut impl Buf) -> Result<i128, Error> {
    if reader.remaining() < 16 {
        return Err(Error::EndOfBuffer);
    }
    Ok(reader.get_i128())
}

pub const I128_ENCODE_SIZE: usize = 16;
