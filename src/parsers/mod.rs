//! Container parsers for the audio formats the scanner recognizes.
//!
//! Every read goes through [`BoundedReader`], which returns
//! [`crate::error::ParseError::OutOfBounds`] instead of panicking when a
//! container claims more bytes than the buffer actually holds.

pub mod id3;
pub mod mp4;

use crate::error::ParseError;
use crate::models::Metadata;

/// A cursor over an in-memory byte buffer that never panics on a
/// truncated or malformed read.
pub struct BoundedReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> BoundedReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), ParseError> {
        if pos > self.buf.len() {
            return Err(ParseError::out_of_bounds(pos, 0, self.buf.len(), "seek"));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn advance(&mut self, n: usize) -> Result<(), ParseError> {
        self.seek(self.pos + n)
    }

    fn take(&mut self, n: usize, context: &str) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.buf.len() {
            return Err(ParseError::out_of_bounds(self.pos, n, self.buf.len(), context));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        self.take(n, "read_bytes")
    }

    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.buf.len() {
            return Err(ParseError::out_of_bounds(self.pos, n, self.buf.len(), "peek_bytes"));
        }
        Ok(&self.buf[self.pos..self.pos + n])
    }

    pub fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1, "read_u8")?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, ParseError> {
        let bytes = self.take(2, "read_u16_be")?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32_be(&mut self) -> Result<u32, ParseError> {
        let bytes = self.take(4, "read_u32_be")?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, ParseError> {
        let bytes = self.take(8, "read_u64_be")?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// A sub-reader over `[pos, pos+len)` of the current buffer, without
    /// consuming this reader's cursor.
    pub fn slice(&self, start: usize, len: usize) -> Result<BoundedReader<'a>, ParseError> {
        if start + len > self.buf.len() {
            return Err(ParseError::out_of_bounds(start, len, self.buf.len(), "slice"));
        }
        Ok(BoundedReader::new(&self.buf[start..start + len]))
    }
}

/// Dispatches to the format-appropriate parser based on extension, then
/// applies the narrator-from-composer fallback shared by both formats.
pub fn parse_file(path: &std::path::Path, bytes: &[u8]) -> Result<Metadata, ParseError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let mut metadata = match ext.as_str() {
        "m4a" | "m4b" | "mp4" => mp4::parse(path, bytes)?,
        "mp3" => id3::parse(path, bytes)?,
        other => return Err(ParseError::unsupported(format!("unrecognized audio extension: {other}"))),
    };

    metadata.apply_narrator_fallback();
    Ok(metadata)
}
