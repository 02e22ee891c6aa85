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

//! Pixel format layer.
//!
//! The encoders are written once over [`SourcePixel`] and the decoders once
//! over [`OutPixel`]; each implementation below describes one format, and the
//! `match` on [`LzImageType`](crate::protocol::LzImageType) in the codec entry
//! points picks the monomorphized body.
//!
//! An encoded *unit* is one pixel for RGB and alpha formats, and one byte of
//! packed indices for palette formats.

use crate::error::Result;
use crate::io::{ByteSource, OutputSink, Reader, Writer};
use crate::protocol::HASH_MASK;
use crate::translate::{self, Palette};

const DJB2_START: u32 = 5381;

/// Units every dictionary hash covers, whatever the format.
pub(crate) const HASH_UNITS: usize = 3;

#[inline]
fn djb2(hash: u32, byte: u8) -> u32 {
    ((hash << 5).wrapping_add(hash)) ^ u32::from(byte)
}

/// A source unit as seen by the match finder.
pub(crate) trait SourcePixel {
    /// Bytes one unit occupies in the source lines.
    const BYTES: usize;
    /// Difference between a match's length in units and its length code.
    const LEN_BIAS: usize;
    /// Shortest match worth encoding.
    const MIN_MATCH: usize;
    /// Extra units a far match must verify.
    const FAR_EXTRA: usize;

    /// Value compared to decide whether two units are equal.
    type Key: Copy + Eq;

    fn key(data: &[u8], i: usize) -> Self::Key;

    /// Hash of the [`HASH_UNITS`] units starting at `i`, masked to a bucket.
    fn hash(data: &[u8], i: usize) -> u32;

    /// Writes unit `i` as it appears in a literal run.
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()>;
}

/// A palette byte or an A8 pixel.
pub(crate) struct PltUnit;

impl SourcePixel for PltUnit {
    const BYTES: usize = 1;
    const LEN_BIAS: usize = 2;
    const MIN_MATCH: usize = 3;
    const FAR_EXTRA: usize = 2;

    type Key = u8;

    #[inline]
    fn key(data: &[u8], i: usize) -> u8 {
        data[i]
    }

    #[inline]
    fn hash(data: &[u8], i: usize) -> u32 {
        let mut h = DJB2_START;
        for &byte in &data[i..i + HASH_UNITS] {
            h = djb2(h, byte);
        }
        h & HASH_MASK
    }

    #[inline]
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()> {
        w.put_u8(data[i])
    }
}

/// An x1r5g5b5 pixel, the unused top bit ignored.
pub(crate) struct Rgb16Unit;

impl Rgb16Unit {
    #[inline]
    fn value(data: &[u8], i: usize) -> u16 {
        u16::from_le_bytes([data[i * 2], data[i * 2 + 1]]) & 0x7fff
    }
}

impl SourcePixel for Rgb16Unit {
    const BYTES: usize = 2;
    const LEN_BIAS: usize = 1;
    const MIN_MATCH: usize = 2;
    const FAR_EXTRA: usize = 2;

    type Key = u16;

    #[inline]
    fn key(data: &[u8], i: usize) -> u16 {
        Self::value(data, i)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)] // byte extraction
    fn hash(data: &[u8], i: usize) -> u32 {
        let mut h = DJB2_START;
        for j in i..i + HASH_UNITS {
            let v = Self::value(data, j);
            h = djb2(h, v as u8);
            h = djb2(h, (v >> 8) as u8);
        }
        h & HASH_MASK
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)] // byte extraction
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()> {
        let v = Self::value(data, i);
        w.put_u8((v >> 8) as u8)?;
        w.put_u8(v as u8)
    }
}

/// Hash over the r, g, b bytes of the pixels starting at unit `i`, each
/// `bytes` long.
fn rgb_hash(data: &[u8], i: usize, bytes: usize) -> u32 {
    let mut h = DJB2_START;
    for j in i..i + HASH_UNITS {
        let o = j * bytes;
        h = djb2(h, data[o + 2]);
        h = djb2(h, data[o + 1]);
        h = djb2(h, data[o]);
    }
    h & HASH_MASK
}

/// A `[b, g, r]` pixel.
pub(crate) struct Rgb24Unit;

impl SourcePixel for Rgb24Unit {
    const BYTES: usize = 3;
    const LEN_BIAS: usize = 0;
    const MIN_MATCH: usize = 1;
    const FAR_EXTRA: usize = 1;

    type Key = [u8; 3];

    #[inline]
    fn key(data: &[u8], i: usize) -> [u8; 3] {
        let o = i * 3;
        [data[o], data[o + 1], data[o + 2]]
    }

    #[inline]
    fn hash(data: &[u8], i: usize) -> u32 {
        rgb_hash(data, i, 3)
    }

    #[inline]
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()> {
        w.put_slice(&data[i * 3..i * 3 + 3])
    }
}

/// A `[b, g, r, pad]` pixel; the pad byte is not encoded.
pub(crate) struct Rgb32Unit;

impl SourcePixel for Rgb32Unit {
    const BYTES: usize = 4;
    const LEN_BIAS: usize = 0;
    const MIN_MATCH: usize = 1;
    const FAR_EXTRA: usize = 1;

    type Key = [u8; 3];

    #[inline]
    fn key(data: &[u8], i: usize) -> [u8; 3] {
        let o = i * 4;
        [data[o], data[o + 1], data[o + 2]]
    }

    #[inline]
    fn hash(data: &[u8], i: usize) -> u32 {
        rgb_hash(data, i, 4)
    }

    #[inline]
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()> {
        w.put_slice(&data[i * 4..i * 4 + 3])
    }
}

/// The alpha (pad) byte of a 32-bit pixel.
pub(crate) struct AlphaUnit;

impl SourcePixel for AlphaUnit {
    const BYTES: usize = 4;
    const LEN_BIAS: usize = 2;
    const MIN_MATCH: usize = 3;
    const FAR_EXTRA: usize = 2;

    type Key = u8;

    #[inline]
    fn key(data: &[u8], i: usize) -> u8 {
        data[i * 4 + 3]
    }

    #[inline]
    fn hash(data: &[u8], i: usize) -> u32 {
        let mut h = DJB2_START;
        for j in i..i + HASH_UNITS {
            h = djb2(h, data[j * 4 + 3]);
        }
        h & HASH_MASK
    }

    #[inline]
    fn put<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, data: &[u8], i: usize) -> Result<()> {
        w.put_u8(data[i * 4 + 3])
    }
}

/// Palette handed to targets that do not widen through one.
pub(crate) static NO_PALETTE: Palette = Palette { unique: 0, ents: Vec::new() };

/// A decode target: how one encoded unit lands in the output buffer.
pub(crate) trait OutPixel {
    /// Bytes per output pixel.
    const OUT_BYTES: usize;
    /// Output pixels produced by one encoded unit.
    const EXPAND: usize = 1;
    /// Difference between a match's length in units and its length code.
    const LEN_BIAS: usize;
    /// First byte of each output pixel a back-reference copies; the rest of
    /// the pixel up to `OUT_BYTES` is copied too.
    const COPY_START: usize = 0;

    /// Reads one encoded unit and writes `EXPAND` output pixels to `out`.
    fn literal<'a, S: ByteSource<'a>>(
        r: &mut Reader<'a, S>,
        palette: &Palette,
        out: &mut [u8],
    ) -> Result<()>;
}

/// Palette bytes or A8 kept as they are.
pub(crate) struct ByteOut;

impl OutPixel for ByteOut {
    const OUT_BYTES: usize = 1;
    const LEN_BIAS: usize = 2;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[0] = r.read_u8()?;
        Ok(())
    }
}

/// RGB16 kept as little-endian x1r5g5b5.
pub(crate) struct Rgb16Out;

impl OutPixel for Rgb16Out {
    const OUT_BYTES: usize = 2;
    const LEN_BIAS: usize = 1;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[1] = r.read_u8()?;
        out[0] = r.read_u8()?;
        Ok(())
    }
}

/// RGB24 kept as `[b, g, r]`.
pub(crate) struct Rgb24Out;

impl OutPixel for Rgb24Out {
    const OUT_BYTES: usize = 3;
    const LEN_BIAS: usize = 0;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[0] = r.read_u8()?;
        out[1] = r.read_u8()?;
        out[2] = r.read_u8()?;
        Ok(())
    }
}

/// RGB24 or RGB32 written as RGB32 with a zero pad byte.
pub(crate) struct Rgb32Out;

impl OutPixel for Rgb32Out {
    const OUT_BYTES: usize = 4;
    const LEN_BIAS: usize = 0;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[0] = r.read_u8()?;
        out[1] = r.read_u8()?;
        out[2] = r.read_u8()?;
        out[3] = 0;
        Ok(())
    }
}

pub(crate) struct Rgb16ToRgb32;

impl OutPixel for Rgb16ToRgb32 {
    const OUT_BYTES: usize = 4;
    const LEN_BIAS: usize = 1;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        let high = r.read_u8()?;
        let low = r.read_u8()?;
        out[..4].copy_from_slice(&translate::rgb16_to_rgb32(u16::from_be_bytes([high, low])));
        Ok(())
    }
}

pub(crate) struct Plt8ToRgb32;

impl OutPixel for Plt8ToRgb32 {
    const OUT_BYTES: usize = 4;
    const LEN_BIAS: usize = 2;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(
        r: &mut Reader<'a, S>,
        palette: &Palette,
        out: &mut [u8],
    ) -> Result<()> {
        out[..4].copy_from_slice(&palette.plt8(r.read_u8()?)?);
        Ok(())
    }
}

/// Two 4-bit indices per byte; `BE` puts the first pixel in the high nibble.
pub(crate) struct Plt4ToRgb32<const BE: bool>;

impl<const BE: bool> OutPixel for Plt4ToRgb32<BE> {
    const OUT_BYTES: usize = 4;
    const EXPAND: usize = 2;
    const LEN_BIAS: usize = 2;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(
        r: &mut Reader<'a, S>,
        palette: &Palette,
        out: &mut [u8],
    ) -> Result<()> {
        let byte = r.read_u8()?;
        let (first, second) = if BE { (byte >> 4, byte & 0x0f) } else { (byte & 0x0f, byte >> 4) };
        out[..4].copy_from_slice(&palette.plt4(first));
        out[4..8].copy_from_slice(&palette.plt4(second));
        Ok(())
    }
}

/// Eight 1-bit indices per byte; `BE` puts the first pixel in the top bit.
pub(crate) struct Plt1ToRgb32<const BE: bool>;

impl<const BE: bool> OutPixel for Plt1ToRgb32<BE> {
    const OUT_BYTES: usize = 4;
    const EXPAND: usize = 8;
    const LEN_BIAS: usize = 2;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(
        r: &mut Reader<'a, S>,
        palette: &Palette,
        out: &mut [u8],
    ) -> Result<()> {
        let byte = r.read_u8()?;
        for (k, pixel) in out[..32].chunks_exact_mut(4).enumerate() {
            let shift = if BE { 7 - k } else { k };
            pixel.copy_from_slice(&palette.plt1((byte >> shift) & 1 != 0));
        }
        Ok(())
    }
}

pub(crate) struct A8ToRgb32;

impl OutPixel for A8ToRgb32 {
    const OUT_BYTES: usize = 4;
    const LEN_BIAS: usize = 2;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[..4].copy_from_slice(&translate::a8_to_rgb32(r.read_u8()?));
        Ok(())
    }
}

/// Alpha pass over a 32-bit buffer: only the pad byte is written or copied.
pub(crate) struct AlphaOut;

impl OutPixel for AlphaOut {
    const OUT_BYTES: usize = 4;
    const LEN_BIAS: usize = 2;
    const COPY_START: usize = 3;

    #[inline]
    fn literal<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>, _: &Palette, out: &mut [u8]) -> Result<()> {
        out[3] = r.read_u8()?;
        Ok(())
    }
}
