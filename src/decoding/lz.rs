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

//! LZ decoder.
//!
//! # Conversions
//!
//! | Encoded | Output |
//! |---------|--------|
//! | any type | the same type |
//! | PLT1/PLT4/PLT8 | RGB32 through a palette |
//! | RGB16, RGB24, A8 | RGB32 |
//!
//! RGBA and XXXA decode only to themselves. Other pairs are
//! [`CodecError::UnsupportedConversion`].

use bytes::Bytes;

use super::{check_geometry, copy_literals, copy_match};
use crate::error::{CodecError, Result};
use crate::io::{ByteSource, Reader};
use crate::pixel::{
    A8ToRgb32, AlphaOut, ByteOut, OutPixel, Plt1ToRgb32, Plt4ToRgb32, Plt8ToRgb32, Rgb16Out,
    Rgb16ToRgb32, Rgb24Out, Rgb32Out, NO_PALETTE,
};
use crate::protocol::{LzHeader, LzImageType, MAX_DISTANCE};
use crate::translate::Palette;

/// A fully decoded LZ image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Header of the encoded stream.
    pub header: LzHeader,
    /// Format of `pixels`.
    pub image_type: LzImageType,
    /// Number of pixels in `pixels`.
    pub pixel_count: usize,
    /// Decoded pixel data.
    pub pixels: Bytes,
}

/// Reads and validates the header of an LZ stream.
///
/// # Errors
///
/// Returns [`CodecError::CorruptStream`] on a magic or version mismatch, an
/// unknown type or inconsistent geometry.
pub fn decode_header<'a, S: ByteSource<'a>>(r: &mut Reader<'a, S>) -> Result<LzHeader> {
    let header = LzHeader::read_from(r)?;
    check_geometry(header.image_type, header.width, header.height, header.stride)?;
    log::debug!(
        "LZ: {:?} {}x{} stride {} top_down {}",
        header.image_type,
        header.width,
        header.height,
        header.stride,
        header.top_down
    );
    Ok(header)
}

/// Bytes per output pixel when decoding `from` into `to`.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedConversion`] if `to` cannot be produced
/// from `from`.
pub fn output_bytes_per_pixel(from: LzImageType, to: LzImageType) -> Result<usize> {
    use LzImageType::{Plt1Be, Plt1Le, Plt4Be, Plt4Le, Plt8, Rgb16, Rgb24, Rgb32, A8};

    match (from, to) {
        (LzImageType::Invalid, _) => Err(CodecError::UnsupportedConversion { from, to }),
        (f, t) if f == t => Ok(f.bytes_per_pixel()),
        (Plt1Le | Plt1Be | Plt4Le | Plt4Be | Plt8 | Rgb16 | Rgb24 | A8, Rgb32) => Ok(4),
        _ => Err(CodecError::UnsupportedConversion { from, to }),
    }
}

/// Decodes the body of an LZ stream into `out`, returning the number of
/// pixels written.
///
/// `out` must hold at least [`LzHeader::out_pixels`] pixels of `to_type`.
/// Palette types widened to RGB32 need `palette`.
///
/// # Errors
///
/// - [`CodecError::UnsupportedConversion`] for an unreachable `to_type`, or a
///   missing palette.
/// - [`CodecError::InvalidParameters`] if `out` is too small or the palette
///   is too short.
/// - [`CodecError::CorruptStream`] for a malformed body or trailing bytes.
pub fn decode_into<'a, S: ByteSource<'a>>(
    r: &mut Reader<'a, S>,
    header: &LzHeader,
    to_type: LzImageType,
    palette: Option<&Palette>,
    out: &mut [u8],
) -> Result<usize> {
    let from = header.image_type;
    let bytes_per_pixel = output_bytes_per_pixel(from, to_type)?;
    let pixels = header.out_pixels(to_type);
    let needed = pixels * bytes_per_pixel;
    if out.len() < needed {
        return Err(CodecError::invalid(format!(
            "output buffer of {} bytes, {needed} needed",
            out.len()
        )));
    }
    let out = &mut out[..needed];

    if from == to_type {
        match from {
            LzImageType::Rgb16 => decode_pass::<S, Rgb16Out>(r, &NO_PALETTE, out, pixels)?,
            LzImageType::Rgb24 => decode_pass::<S, Rgb24Out>(r, &NO_PALETTE, out, pixels)?,
            LzImageType::Rgb32 => decode_pass::<S, Rgb32Out>(r, &NO_PALETTE, out, pixels)?,
            LzImageType::Rgba => {
                decode_pass::<S, Rgb32Out>(r, &NO_PALETTE, out, pixels)?;
                decode_pass::<S, AlphaOut>(r, &NO_PALETTE, out, pixels)?;
            }
            LzImageType::Xxxa => decode_pass::<S, AlphaOut>(r, &NO_PALETTE, out, pixels)?,
            _ => decode_pass::<S, ByteOut>(r, &NO_PALETTE, out, pixels)?,
        }
    } else {
        let pal = if from.is_palette() { widen_palette(palette, from, to_type)? } else { &NO_PALETTE };
        match from {
            LzImageType::Plt1Le => decode_pass::<S, Plt1ToRgb32<false>>(r, pal, out, pixels)?,
            LzImageType::Plt1Be => decode_pass::<S, Plt1ToRgb32<true>>(r, pal, out, pixels)?,
            LzImageType::Plt4Le => decode_pass::<S, Plt4ToRgb32<false>>(r, pal, out, pixels)?,
            LzImageType::Plt4Be => decode_pass::<S, Plt4ToRgb32<true>>(r, pal, out, pixels)?,
            LzImageType::Plt8 => decode_pass::<S, Plt8ToRgb32>(r, pal, out, pixels)?,
            LzImageType::Rgb16 => decode_pass::<S, Rgb16ToRgb32>(r, pal, out, pixels)?,
            LzImageType::Rgb24 => decode_pass::<S, Rgb32Out>(r, pal, out, pixels)?,
            _ => decode_pass::<S, A8ToRgb32>(r, pal, out, pixels)?,
        }
    }

    if !r.at_end() {
        return Err(CodecError::corrupt(format!(
            "trailing bytes after {} bytes of stream",
            r.position()
        )));
    }
    Ok(pixels)
}

/// Returns the palette a palette type needs to widen to `to`.
pub(crate) fn widen_palette(
    palette: Option<&Palette>,
    from: LzImageType,
    to: LzImageType,
) -> Result<&Palette> {
    let palette = palette.ok_or(CodecError::UnsupportedConversion { from, to })?;
    palette.check_for(from)?;
    Ok(palette)
}

/// Decodes a complete LZ stream held in memory.
///
/// # Errors
///
/// See [`decode_header`] and [`decode_into`].
pub fn decode(data: &[u8], to_type: LzImageType, palette: Option<&Palette>) -> Result<DecodedImage> {
    let mut r = Reader::from_slice(data);
    let header = decode_header(&mut r)?;
    let bytes_per_pixel = output_bytes_per_pixel(header.image_type, to_type)?;
    let pixel_count = header.out_pixels(to_type);
    let mut out = vec![0u8; pixel_count * bytes_per_pixel];
    decode_into(&mut r, &header, to_type, palette, &mut out)?;
    Ok(DecodedImage { header, image_type: to_type, pixel_count, pixels: Bytes::from(out) })
}

/// One pass of control groups filling `pixels` output pixels.
fn decode_pass<'a, S: ByteSource<'a>, P: OutPixel>(
    r: &mut Reader<'a, S>,
    palette: &Palette,
    out: &mut [u8],
    pixels: usize,
) -> Result<()> {
    let mut op = 0;
    while op < pixels {
        let ctrl = r.read_u8()?;
        if ctrl < 32 {
            op = copy_literals::<S, P>(r, palette, out, op, usize::from(ctrl) + 1, pixels)?;
            continue;
        }

        let mut len = usize::from(ctrl >> 5) - 1;
        if len == 6 {
            loop {
                let code = r.read_u8()?;
                len += usize::from(code);
                if code != 255 {
                    break;
                }
            }
        }
        let high = usize::from(ctrl & 31) << 8;
        let code = r.read_u8()?;
        let mut ofs = high + usize::from(code);
        if code == 255 && high == 31 << 8 {
            let far_high = usize::from(r.read_u8()?);
            let far_low = usize::from(r.read_u8()?);
            ofs = (far_high << 8) + far_low + MAX_DISTANCE;
        }
        len += P::LEN_BIAS + 1;
        ofs += 1;

        op = copy_match::<P>(out, op, ofs * P::EXPAND, len * P::EXPAND, pixels)?;
    }
    Ok(())
}
