// Copyright 2025 Dustin McAfee
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Streaming IO contracts and cursors used by the encoders and decoders.
//!
//! The codec never asks for a whole framebuffer or a whole compressed stream
//! up front. Input scanlines are pulled through a [`LineSource`], compressed
//! bytes are pulled through a [`ByteSource`], and output space is granted chunk
//! by chunk through an [`OutputSink`].

use crate::error::{CodecError, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// Default grant size of [`Unbounded`].
pub const DEFAULT_SPACE_CHUNK: usize = 64 * 1024;

/// Grants output space to an encoder.
pub trait OutputSink {
    /// Returns how many more bytes the encoder may write.
    ///
    /// `size_hint` is the number of bytes the encoder needs right now. A
    /// return value of 0 aborts the encode call with
    /// [`CodecError::OutOfSpace`].
    fn more_space(&mut self, size_hint: usize) -> usize;
}

/// A sink that always grants more space.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl OutputSink for Unbounded {
    fn more_space(&mut self, size_hint: usize) -> usize {
        size_hint.max(DEFAULT_SPACE_CHUNK)
    }
}

/// A sink with a fixed total byte budget, handed out in chunks.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    remaining: usize,
    chunk: usize,
}

impl Budget {
    /// Creates a budget of `total` bytes granted in one chunk.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self { remaining: total, chunk: total }
    }

    /// Creates a budget of `total` bytes granted `chunk` bytes at a time.
    #[must_use]
    pub fn with_chunk(total: usize, chunk: usize) -> Self {
        Self { remaining: total, chunk: chunk.max(1) }
    }

    /// Bytes not yet granted.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

impl OutputSink for Budget {
    fn more_space(&mut self, size_hint: usize) -> usize {
        let grant = self.remaining.min(self.chunk.max(size_hint));
        self.remaining -= grant;
        grant
    }
}

/// Supplies compressed bytes to a decoder, one chunk at a time.
pub trait ByteSource<'a> {
    /// Returns the next chunk, or `None` when the stream is exhausted.
    fn more_bytes(&mut self) -> Option<&'a [u8]>;
}

impl<'a, I> ByteSource<'a> for I
where
    I: Iterator<Item = &'a [u8]>,
{
    fn more_bytes(&mut self) -> Option<&'a [u8]> {
        self.next()
    }
}

/// Supplies batches of whole scanlines to an encoder.
///
/// Bottom-up images are delivered from the last line to the first; the
/// stride is always positive.
pub trait LineSource<'a> {
    /// Returns the next batch of lines, or `None` when no lines remain.
    fn more_lines(&mut self) -> Option<&'a [u8]>;
}

impl<'a, I> LineSource<'a> for I
where
    I: Iterator<Item = &'a [u8]>,
{
    fn more_lines(&mut self) -> Option<&'a [u8]> {
        self.next()
    }
}

/// Index-addressable output cursor.
///
/// Bytes are appended through the sink's grants; a slot reserved with
/// [`Writer::reserve_slot`] can be given its final value later with
/// [`Writer::patch`].
pub(crate) struct Writer<'s, S: OutputSink + ?Sized> {
    buf: BytesMut,
    limit: usize,
    sink: &'s mut S,
}

impl<'s, S: OutputSink + ?Sized> Writer<'s, S> {
    pub(crate) fn new(sink: &'s mut S) -> Self {
        Self { buf: BytesMut::new(), limit: 0, sink }
    }

    #[inline]
    fn ensure(&mut self, needed: usize) -> Result<()> {
        while self.buf.len() + needed > self.limit {
            let missing = self.buf.len() + needed - self.limit;
            let grant = self.sink.more_space(missing);
            if grant == 0 {
                return Err(CodecError::OutOfSpace);
            }
            self.limit += grant;
            self.buf.reserve(grant);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn put_u8(&mut self, byte: u8) -> Result<()> {
        self.ensure(1)?;
        self.buf.put_u8(byte);
        Ok(())
    }

    pub(crate) fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub(crate) fn put_u32(&mut self, word: u32) -> Result<()> {
        self.ensure(4)?;
        self.buf.put_u32(word);
        Ok(())
    }

    pub(crate) fn put_u64(&mut self, word: u64) -> Result<()> {
        self.ensure(8)?;
        self.buf.put_u64(word);
        Ok(())
    }

    /// Reserves one byte whose value is written later with [`Writer::patch`].
    pub(crate) fn reserve_slot(&mut self) -> Result<usize> {
        let slot = self.buf.len();
        self.put_u8(0)?;
        Ok(slot)
    }

    pub(crate) fn patch(&mut self, slot: usize, byte: u8) {
        self.buf[slot] = byte;
    }

    pub(crate) fn len(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Input cursor over a chunked compressed stream.
pub struct Reader<'a, S> {
    chunk: &'a [u8],
    pos: usize,
    consumed: usize,
    source: S,
}

impl<'a> Reader<'a, std::iter::Empty<&'a [u8]>> {
    /// Creates a reader over a single in-memory buffer.
    #[must_use]
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::new(data, std::iter::empty())
    }
}

impl<'a, S: ByteSource<'a>> Reader<'a, S> {
    /// Creates a reader that starts with `first` and pulls further chunks
    /// from `source`.
    pub fn new(first: &'a [u8], source: S) -> Self {
        Self { chunk: first, pos: 0, consumed: 0, source }
    }

    fn refill(&mut self) -> bool {
        while let Some(next) = self.source.more_bytes() {
            if next.is_empty() {
                continue;
            }
            self.consumed += self.chunk.len();
            self.chunk = next;
            self.pos = 0;
            return true;
        }
        false
    }

    /// Reads one byte; running out of input is a corrupt stream.
    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        if self.pos == self.chunk.len() && !self.refill() {
            return Err(CodecError::corrupt("unexpected end of stream"));
        }
        let byte = self.chunk[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    /// Reads a big-endian 32-bit word.
    pub fn read_u32(&mut self) -> Result<u32> {
        let mut word = 0u32;
        for _ in 0..4 {
            word = (word << 8) | u32::from(self.read_u8()?);
        }
        Ok(word)
    }

    /// Reads a big-endian 64-bit word.
    pub fn read_u64(&mut self) -> Result<u64> {
        let high = u64::from(self.read_u32()?);
        let low = u64::from(self.read_u32()?);
        Ok((high << 32) | low)
    }

    /// Returns `true` once every byte of every chunk has been consumed.
    pub fn at_end(&mut self) -> bool {
        self.pos == self.chunk.len() && !self.refill()
    }

    /// Total bytes consumed so far.
    #[must_use]
    pub fn position(&self) -> usize {
        self.consumed + self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_spans_chunks() {
        let chunks: [&[u8]; 3] = [&[0x00, 0x01], &[], &[0x02, 0x03, 0x04]];
        let mut reader = Reader::new(&[0xAA], chunks.into_iter());

        assert_eq!(reader.read_u8().unwrap(), 0xAA);
        assert_eq!(reader.read_u32().unwrap(), 0x0001_0203);
        assert!(!reader.at_end());
        assert_eq!(reader.read_u8().unwrap(), 0x04);
        assert!(reader.at_end());
        assert_eq!(reader.position(), 6);
        assert!(matches!(reader.read_u8(), Err(CodecError::CorruptStream(_))));
    }

    #[test]
    fn test_writer_patches_reserved_slot() {
        let mut sink = Unbounded;
        let mut writer = Writer::new(&mut sink);
        let slot = writer.reserve_slot().unwrap();
        writer.put_u8(7).unwrap();
        writer.put_u32(0x0102_0304).unwrap();
        writer.patch(slot, 31);

        assert_eq!(&writer.finish()[..], &[31, 7, 1, 2, 3, 4]);
    }

    #[test]
    fn test_writer_budget_exhausted() {
        let mut sink = Budget::with_chunk(5, 2);
        let mut writer = Writer::new(&mut sink);
        writer.put_u32(0xDEAD_BEEF).unwrap();
        writer.put_u8(1).unwrap();

        assert_eq!(writer.put_u8(2), Err(CodecError::OutOfSpace));
        assert_eq!(writer.len(), 5);
    }
}
