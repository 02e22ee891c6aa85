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

//! Decoders for LZ and GLZ streams.
//!
//! Input is untrusted: every literal, back-reference and header field is
//! checked against the output buffer, and violations surface as
//! [`CodecError::CorruptStream`](crate::error::CodecError::CorruptStream).

pub mod glz;
pub mod lz;

pub use glz::GlzDecoder;
pub use lz::{decode, decode_header, decode_into, output_bytes_per_pixel, DecodedImage};

use crate::error::{CodecError, Result};
use crate::io::{ByteSource, Reader};
use crate::pixel::OutPixel;
use crate::protocol::{LzImageType, MAX_IMAGE_PIXELS};
use crate::translate::Palette;

/// Checks header geometry before any buffer is sized from it.
pub(crate) fn check_geometry(image_type: LzImageType, width: u32, height: u32, stride: u32) -> Result<()> {
    if width == 0 || height == 0 {
        return Err(CodecError::corrupt(format!("empty image {width}x{height}")));
    }
    if stride as usize != image_type.min_stride(width) {
        return Err(CodecError::corrupt(format!(
            "stride {stride} does not match {image_type:?} width {width}"
        )));
    }
    let ppb = image_type.pixels_per_byte().max(1) as u64;
    let gross = if image_type.is_palette() {
        u64::from(stride) * ppb * u64::from(height)
    } else {
        u64::from(width) * u64::from(height)
    };
    if gross > MAX_IMAGE_PIXELS as u64 {
        return Err(CodecError::corrupt(format!("image of {gross} pixels is too large")));
    }
    Ok(())
}

/// Decodes a literal run of `count` units at output pixel `op`.
#[inline]
pub(crate) fn copy_literals<'a, S: ByteSource<'a>, P: OutPixel>(
    r: &mut Reader<'a, S>,
    palette: &Palette,
    out: &mut [u8],
    op: usize,
    count: usize,
    pixels: usize,
) -> Result<usize> {
    let end = op + count * P::EXPAND;
    if end > pixels {
        return Err(CodecError::corrupt(format!(
            "literal run of {count} units overflows the image at pixel {op}"
        )));
    }
    let step = P::EXPAND * P::OUT_BYTES;
    for chunk in out[op * P::OUT_BYTES..end * P::OUT_BYTES].chunks_exact_mut(step) {
        P::literal(r, palette, chunk)?;
    }
    Ok(end)
}

/// Copies `len` pixels from `dist` pixels back inside `out`.
///
/// A distance of one repeats the previous pixel; overlapping references are
/// copied pixel by pixel so they see their own output.
#[inline]
pub(crate) fn copy_match<P: OutPixel>(
    out: &mut [u8],
    op: usize,
    dist: usize,
    len: usize,
    pixels: usize,
) -> Result<usize> {
    if dist > op {
        return Err(CodecError::corrupt(format!(
            "reference {dist} pixels back from pixel {op}"
        )));
    }
    let end = op + len;
    if end > pixels {
        return Err(CodecError::corrupt(format!(
            "match of {len} pixels overflows the image at pixel {op}"
        )));
    }

    let ob = P::OUT_BYTES;
    let cs = P::COPY_START;
    let src = op - dist;
    if dist == 1 {
        let mut value = [0u8; 4];
        value[..ob].copy_from_slice(&out[src * ob..op * ob]);
        for pixel in out[op * ob..end * ob].chunks_exact_mut(ob) {
            pixel[cs..].copy_from_slice(&value[cs..ob]);
        }
    } else if cs == 0 && dist >= len {
        out.copy_within(src * ob..(src + len) * ob, op * ob);
    } else {
        for k in 0..len {
            let from = (src + k) * ob;
            out.copy_within(from + cs..from + ob, (op + k) * ob + cs);
        }
    }
    Ok(end)
}
