//! Packet buffer implementation
//!
//! Provides little-endian readers and writers for the binary game protocol:
//! - Fixed-width unsigned integers (u8, u16, u32)
//! - Fixed-length strings padded with NUL bytes
//! - Byte-length-prefixed strings and counted string lists
//! - Frame header patching (`{u16 length, u16 type}`) on finish
//!
//! Readers never trust the length declared in the frame header. Every read is
//! checked against the bytes actually supplied and reports the field that ran
//! past the end.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// Size of the `{u16 length, u16 type}` frame header
pub const HEADER_SIZE: usize = 4;

/// Maximum frame size accepted from or sent to a peer (excluding footer)
pub const MAX_FRAME_SIZE: usize = 2048;

/// Maximum length of a byte-length-prefixed string
pub const MAX_PREFIXED_STRING: usize = u8::MAX as usize;

/// Bounds-checked little-endian reader over a received frame
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    /// Frame bytes, header included
    data: &'a [u8],
    /// Current read position
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Create a reader positioned at the start of the frame
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Get the current read position
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Read the frame header, returning `(length, type)`
    pub fn read_header(&mut self) -> Result<(u16, u16), DecodeError> {
        if self.data.len() < HEADER_SIZE {
            return Err(DecodeError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {} byte header",
                self.data.len(),
                HEADER_SIZE
            )));
        }
        let length = self.read_u16("length")?;
        let packet_type = self.read_u16("type")?;
        Ok((length, packet_type))
    }

    /// Take the next `count` bytes
    pub fn read_bytes(&mut self, count: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let available = self.remaining();
        if count > available {
            return Err(DecodeError::TruncatedField {
                field,
                needed: count,
                available,
            });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    /// Skip reserved bytes
    pub fn skip(&mut self, count: usize, field: &'static str) -> Result<(), DecodeError> {
        self.read_bytes(count, field).map(|_| ())
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.read_bytes(1, field)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2, field)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4, field)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a fixed-length string, trimming trailing NUL bytes
    pub fn read_fixed_string(
        &mut self,
        length: usize,
        field: &'static str,
    ) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(length, field)?;
        let end = bytes
            .iter()
            .rposition(|&b| b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Read a string prefixed with its byte length
    pub fn read_string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let length = self.read_u8(field)? as usize;
        let bytes = self.read_bytes(length, field)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read a list of length-prefixed strings preceded by a string count
    pub fn read_strings(&mut self, field: &'static str) -> Result<Vec<String>, DecodeError> {
        let count = self.read_u8(field)? as usize;
        let mut strings = Vec::with_capacity(count);
        for _ in 0..count {
            strings.push(self.read_string(field)?);
        }
        Ok(strings)
    }
}

/// Little-endian frame writer
///
/// The header is reserved on construction and patched with the real length
/// and packet type by [`PacketWriter::finish`].
#[derive(Debug, Clone)]
pub struct PacketWriter {
    data: BytesMut,
}

impl PacketWriter {
    /// Create a writer with room reserved for the frame header
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create a writer with a specific body capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let mut data = BytesMut::with_capacity(HEADER_SIZE + capacity);
        data.put_bytes(0, HEADER_SIZE);
        Self { data }
    }

    /// Current frame length, header included
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing beyond the header has been written
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.len() == HEADER_SIZE
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.data.put_u8(value);
        self
    }

    pub fn write_u16(&mut self, value: u16) -> &mut Self {
        self.data.put_u16_le(value);
        self
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.data.put_u32_le(value);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.put_slice(bytes);
        self
    }

    /// Write zeroed padding
    pub fn write_zeros(&mut self, count: usize) -> &mut Self {
        self.data.put_bytes(0, count);
        self
    }

    /// Write a fixed-length string, truncating or padding with NUL bytes
    pub fn write_fixed_string(&mut self, value: &str, length: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let take = bytes.len().min(length);
        self.data.put_slice(&bytes[..take]);
        self.data.put_bytes(0, length - take);
        self
    }

    /// Write a string prefixed with its byte length (truncated at 255 bytes)
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        let take = bytes.len().min(MAX_PREFIXED_STRING);
        self.data.put_u8(take as u8);
        self.data.put_slice(&bytes[..take]);
        self
    }

    /// Write a counted list of length-prefixed strings
    pub fn write_strings<S: AsRef<str>>(&mut self, values: &[S]) -> &mut Self {
        let count = values.len().min(u8::MAX as usize);
        self.data.put_u8(count as u8);
        for value in &values[..count] {
            self.write_string(value.as_ref());
        }
        self
    }

    /// Patch the header and freeze the frame
    pub fn finish(mut self, packet_type: u16) -> Bytes {
        let length = self.data.len().min(u16::MAX as usize) as u16;
        self.data[0..2].copy_from_slice(&length.to_le_bytes());
        self.data[2..4].copy_from_slice(&packet_type.to_le_bytes());
        self.data.freeze()
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Read the `{u16 length, u16 type}` header of a frame without consuming it
pub fn peek_header(frame: &[u8]) -> Result<(u16, u16), DecodeError> {
    PacketReader::new(frame).read_header()
}
