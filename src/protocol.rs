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

//! LZ/GLZ stream constants, image types and stream headers.
//!
//! Every compressed image starts with a header written once, in big-endian
//! words:
//!
//! - **LZ**: magic, version, image type, width, height, stride, top-down flag
//!   (seven 32-bit words).
//! - **GLZ**: magic, version, one byte holding the image type in the low
//!   nibble and the top-down flag above it, width, height, stride, the 64-bit
//!   image id and the 32-bit `win_head_dist`.
//!
//! The decoder rejects a magic or version mismatch before reading anything
//! else.

use crate::error::{CodecError, Result};
use crate::io::{ByteSource, OutputSink, Reader, Writer};

/// Stream magic, the bytes `"LZ  "` read as a little-endian word.
pub const LZ_MAGIC: u32 = 0x2020_5a4c;

/// Stream version: major 1, minor 1.
pub const LZ_VERSION: u32 = (1 << 16) | 1;

/// Image type bits in the GLZ type byte.
pub const LZ_IMAGE_TYPE_MASK: u8 = 0x0f;

/// Shift of the top-down flag in the GLZ type byte.
pub const LZ_IMAGE_TYPE_LOG: u8 = 4;

/// Log2 of the number of match-finder hash buckets.
pub const HASH_LOG: u32 = 13;

/// Number of match-finder hash buckets.
pub const HASH_SIZE: usize = 1 << HASH_LOG;

/// Mask applied to a hash value to select a bucket.
pub const HASH_MASK: u32 = (HASH_SIZE as u32) - 1;

/// Longest literal run behind a single control byte.
pub const MAX_COPY: usize = 32;

/// Largest biased distance encoded in the compact two-byte form.
pub const MAX_DISTANCE: usize = 8191;

/// Largest unbiased distance reachable with the far form.
pub const MAX_FARDISTANCE: usize = 65535 + MAX_DISTANCE - 1;

/// Images smaller than this many units are emitted as a plain literal block.
pub const MIN_FILE_SIZE: usize = 4;

/// Largest GLZ pixel offset (25 bits).
pub const GLZ_MAX_PIXEL_OFFSET: usize = (1 << 25) - 1;

/// Largest GLZ image distance encodable next to a long pixel offset (24 bits).
pub const GLZ_MAX_IMAGE_DIST: u64 = (1 << 24) - 1;

/// Largest image, in output pixels, a decoder will allocate for.
pub const MAX_IMAGE_PIXELS: usize = 1 << 28;

/// Default encoder dictionary size in pixels (16 MiB of RGB32).
pub const DEFAULT_GLZ_WINDOW_PIXELS: usize = 4 * 1024 * 1024;

/// Initial number of slots in a decoder window.
pub const INIT_WINDOW_CAPACITY: usize = 16;

/// Upper bound on the number of slots a decoder window may grow to.
pub const MAX_WINDOW_CAPACITY: usize = 1 << 20;

/// Image pixel formats, numbered as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LzImageType {
    /// Not a valid image type.
    Invalid = 0,
    /// 1 bit palette index, least significant bit first.
    Plt1Le = 1,
    /// 1 bit palette index, most significant bit first.
    Plt1Be = 2,
    /// 4 bit palette index, low nibble first.
    Plt4Le = 3,
    /// 4 bit palette index, high nibble first.
    Plt4Be = 4,
    /// 8 bit palette index.
    Plt8 = 5,
    /// 16 bit x1r5g5b5.
    Rgb16 = 6,
    /// 24 bit b, g, r.
    Rgb24 = 7,
    /// 32 bit b, g, r, pad.
    Rgb32 = 8,
    /// 32 bit b, g, r, alpha.
    Rgba = 9,
    /// 32 bit pixels of which only the alpha byte is encoded.
    Xxxa = 10,
    /// 8 bit alpha.
    A8 = 11,
}

impl LzImageType {
    /// Maps a wire value to an image type, rejecting unknown values.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptStream`] for values outside the enum.
    pub fn from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            1 => Self::Plt1Le,
            2 => Self::Plt1Be,
            3 => Self::Plt4Le,
            4 => Self::Plt4Be,
            5 => Self::Plt8,
            6 => Self::Rgb16,
            7 => Self::Rgb24,
            8 => Self::Rgb32,
            9 => Self::Rgba,
            10 => Self::Xxxa,
            11 => Self::A8,
            _ => return Err(CodecError::corrupt(format!("bad image type {value}"))),
        })
    }

    /// Returns `true` for palette-indexed types.
    #[must_use]
    pub fn is_palette(self) -> bool {
        matches!(
            self,
            Self::Plt1Le | Self::Plt1Be | Self::Plt4Le | Self::Plt4Be | Self::Plt8
        )
    }

    /// Pixels stored in one byte for palette types, 0 otherwise.
    #[must_use]
    pub fn pixels_per_byte(self) -> usize {
        match self {
            Self::Plt1Le | Self::Plt1Be => 8,
            Self::Plt4Le | Self::Plt4Be => 2,
            Self::Plt8 => 1,
            _ => 0,
        }
    }

    /// Size in bytes of one encoded unit: a pixel for RGB and alpha types,
    /// a byte of packed indices for palette types.
    #[must_use]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Invalid => 0,
            Self::Plt1Le | Self::Plt1Be | Self::Plt4Le | Self::Plt4Be | Self::Plt8 | Self::A8 => 1,
            Self::Rgb16 => 2,
            Self::Rgb24 => 3,
            Self::Rgb32 | Self::Rgba | Self::Xxxa => 4,
        }
    }

    /// Smallest stride that holds `width` pixels of this type.
    #[must_use]
    pub fn min_stride(self, width: u32) -> usize {
        let width = width as usize;
        if self.is_palette() {
            width.div_ceil(self.pixels_per_byte())
        } else {
            width * self.bytes_per_pixel()
        }
    }
}

/// Geometry of an image handed to an encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageParams {
    /// Pixel format of the source lines.
    pub image_type: LzImageType,
    /// Width in pixels.
    pub width: u32,
    /// Height in lines.
    pub height: u32,
    /// Bytes per source line.
    pub stride: u32,
    /// `true` when lines are delivered top line first.
    pub top_down: bool,
}

impl ImageParams {
    /// Creates parameters with the tightest stride for `width`.
    #[must_use]
    pub fn new(image_type: LzImageType, width: u32, height: u32, top_down: bool) -> Self {
        #[allow(clippy::cast_possible_truncation)] // checked by validate()
        let stride = image_type.min_stride(width) as u32;
        Self { image_type, width, height, stride, top_down }
    }

    /// Checks the buffer contract: an encodable type, a non-empty image and a
    /// stride that packs each line tightly.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameters`] if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.image_type == LzImageType::Invalid {
            return Err(CodecError::invalid("image type is invalid"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(CodecError::invalid(format!(
                "empty image {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.image_type.min_stride(self.width);
        if self.stride as usize != expected {
            return Err(CodecError::invalid(format!(
                "stride {} does not match {:?} width {} (expected {expected})",
                self.stride, self.image_type, self.width
            )));
        }
        Ok(())
    }

    /// Number of encoded units (pixels, or bytes for palette types).
    #[must_use]
    pub fn total_units(&self) -> usize {
        let bpp = self.image_type.bytes_per_pixel();
        self.stride as usize * self.height as usize / bpp.max(1)
    }
}

/// Header of an LZ stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzHeader {
    /// Pixel format of the encoded image.
    pub image_type: LzImageType,
    /// Width in pixels.
    pub width: u32,
    /// Height in lines.
    pub height: u32,
    /// Bytes per line of the source image.
    pub stride: u32,
    /// `true` when the first line is the top of the image.
    pub top_down: bool,
}

impl LzHeader {
    pub(crate) fn write_to<S: OutputSink + ?Sized>(&self, w: &mut Writer<'_, S>) -> Result<()> {
        w.put_u32(LZ_MAGIC)?;
        w.put_u32(LZ_VERSION)?;
        w.put_u32(self.image_type as u32)?;
        w.put_u32(self.width)?;
        w.put_u32(self.height)?;
        w.put_u32(self.stride)?;
        w.put_u32(u32::from(self.top_down))
    }

    /// Reads and validates an LZ header.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptStream`] on a magic/version mismatch, an
    /// unknown image type or a truncated header.
    pub fn read_from<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>) -> Result<Self> {
        read_magic(r)?;
        let image_type = LzImageType::from_u32(r.read_u32()?)?;
        let width = r.read_u32()?;
        let height = r.read_u32()?;
        let stride = r.read_u32()?;
        let top_down = r.read_u32()? != 0;
        Ok(Self { image_type, width, height, stride, top_down })
    }

    /// Number of output pixels `decode` produces for the requested format.
    ///
    /// Palette images widened to RGB32 include the padding bits at the end of
    /// each line, so this may exceed `width * height`.
    #[must_use]
    pub fn out_pixels(&self, to_type: LzImageType) -> usize {
        gross_pixels(self.image_type, to_type, self.width, self.height, self.stride)
    }
}

/// Header of a GLZ stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlzHeader {
    /// Pixel format of the encoded image.
    pub image_type: LzImageType,
    /// Width in pixels.
    pub width: u32,
    /// Height in lines.
    pub height: u32,
    /// Bytes per line of the source image.
    pub stride: u32,
    /// `true` when the first line is the top of the image.
    pub top_down: bool,
    /// Monotonic image id assigned by the encoder.
    pub id: u64,
    /// How far back (in ids) this image and its successors may reference.
    pub win_head_dist: u32,
}

impl GlzHeader {
    pub(crate) fn write_to<S: OutputSink + ?Sized>(&self, w: &mut Writer<'_, S>) -> Result<()> {
        w.put_u32(LZ_MAGIC)?;
        w.put_u32(LZ_VERSION)?;
        #[allow(clippy::cast_possible_truncation)] // image types fit in the low nibble
        let type_byte = (self.image_type as u8 & LZ_IMAGE_TYPE_MASK)
            | (u8::from(self.top_down) << LZ_IMAGE_TYPE_LOG);
        w.put_u8(type_byte)?;
        w.put_u32(self.width)?;
        w.put_u32(self.height)?;
        w.put_u32(self.stride)?;
        w.put_u64(self.id)?;
        w.put_u32(self.win_head_dist)
    }

    /// Reads and validates a GLZ header.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::CorruptStream`] on a magic/version mismatch, an
    /// unknown image type or a truncated header.
    pub fn read_from<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>) -> Result<Self> {
        read_magic(r)?;
        let type_byte = r.read_u8()?;
        let image_type = LzImageType::from_u32(u32::from(type_byte & LZ_IMAGE_TYPE_MASK))?;
        let top_down = (type_byte >> LZ_IMAGE_TYPE_LOG) != 0;
        let width = r.read_u32()?;
        let height = r.read_u32()?;
        let stride = r.read_u32()?;
        let id = r.read_u64()?;
        let win_head_dist = r.read_u32()?;
        Ok(Self { image_type, width, height, stride, top_down, id, win_head_dist })
    }

    /// Pixel count of the RGB32 buffer the decoder fills for this image.
    #[must_use]
    pub fn gross_pixels(&self) -> usize {
        gross_pixels(self.image_type, LzImageType::Rgb32, self.width, self.height, self.stride)
    }

    /// Oldest image id this image may reference.
    #[must_use]
    pub fn oldest_reference(&self) -> u64 {
        self.id.saturating_sub(u64::from(self.win_head_dist))
    }
}

fn read_magic<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>) -> Result<()> {
    let magic = r.read_u32()?;
    if magic != LZ_MAGIC {
        return Err(CodecError::corrupt(format!("bad magic {magic:#010x}")));
    }
    let version = r.read_u32()?;
    if version != LZ_VERSION {
        return Err(CodecError::corrupt(format!("bad version {version:#010x}")));
    }
    Ok(())
}

fn gross_pixels(from: LzImageType, to: LzImageType, width: u32, height: u32, stride: u32) -> usize {
    let height = height as usize;
    if from.is_palette() {
        let bytes = stride as usize * height;
        if to == from {
            bytes
        } else {
            bytes * from.pixels_per_byte()
        }
    } else {
        width as usize * height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Unbounded;

    #[test]
    fn test_lz_header_layout() {
        let header = LzHeader {
            image_type: LzImageType::Rgb32,
            width: 4,
            height: 2,
            stride: 16,
            top_down: true,
        };
        let mut sink = Unbounded;
        let mut w = Writer::new(&mut sink);
        header.write_to(&mut w).unwrap();
        let bytes = w.finish();

        assert_eq!(bytes.len(), 28);
        assert_eq!(&bytes[..8], &[0x20, 0x20, 0x5a, 0x4c, 0x00, 0x01, 0x00, 0x01]);
        assert_eq!(&bytes[8..12], &[0, 0, 0, 8]);
        assert_eq!(&bytes[24..], &[0, 0, 0, 1]);

        let mut r = Reader::from_slice(&bytes);
        assert_eq!(LzHeader::read_from(&mut r).unwrap(), header);
    }

    #[test]
    fn test_glz_header_round_trip() {
        let header = GlzHeader {
            image_type: LzImageType::Plt4Be,
            width: 7,
            height: 3,
            stride: 4,
            top_down: true,
            id: 0x0102_0304_0506_0708,
            win_head_dist: 12,
        };
        let mut sink = Unbounded;
        let mut w = Writer::new(&mut sink);
        header.write_to(&mut w).unwrap();
        let bytes = w.finish();

        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[8], 0x14);
        let mut r = Reader::from_slice(&bytes);
        let parsed = GlzHeader::read_from(&mut r).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.gross_pixels(), 4 * 2 * 3);
        assert_eq!(parsed.oldest_reference(), header.id - 12);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let bytes = [0x4c, 0x5a, 0x20, 0x20, 0, 1, 0, 1];
        let mut r = Reader::from_slice(&bytes);
        assert!(matches!(LzHeader::read_from(&mut r), Err(CodecError::CorruptStream(_))));
    }

    #[test]
    fn test_bad_version_rejected() {
        let bytes = [0x20, 0x20, 0x5a, 0x4c, 0, 2, 0, 0];
        let mut r = Reader::from_slice(&bytes);
        assert!(matches!(LzHeader::read_from(&mut r), Err(CodecError::CorruptStream(_))));
    }

    #[test]
    fn test_params_validation() {
        let params = ImageParams::new(LzImageType::Rgb24, 5, 2, true);
        assert!(params.validate().is_ok());
        assert_eq!(params.total_units(), 10);

        let loose = ImageParams { stride: 16, ..params };
        assert!(matches!(loose.validate(), Err(CodecError::InvalidParameters(_))));

        let empty = ImageParams::new(LzImageType::Rgb32, 0, 2, true);
        assert!(matches!(empty.validate(), Err(CodecError::InvalidParameters(_))));

        let palette = ImageParams::new(LzImageType::Plt1Le, 9, 3, false);
        assert_eq!(palette.stride, 2);
        assert_eq!(palette.total_units(), 6);
    }

    #[test]
    fn test_min_stride() {
        assert_eq!(LzImageType::Plt1Be.min_stride(9), 2);
        assert_eq!(LzImageType::Plt4Le.min_stride(8), 4);
        assert_eq!(LzImageType::Rgb24.min_stride(5), 15);
        assert_eq!(LzImageType::A8.min_stride(3), 3);
    }
}
