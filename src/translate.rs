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

//! Widening of encoded pixels to RGB32.
//!
//! RGB32 output pixels are laid out in memory as `[b, g, r, pad]`. The rules:
//!
//! - **Palette**: entry `0x00RRGGBB` becomes `[b, g, r, 0]`. PLT8 indices past
//!   the end of the palette are a corrupt stream, PLT4 indices wrap modulo the
//!   palette length, PLT1 uses entries 0 and 1.
//! - **RGB16** (x1r5g5b5): each 5-bit channel is widened by replicating its top
//!   bits, `(c << 3) | (c >> 2)`.
//! - **A8**: the alpha byte lands in the pad position, `[0, 0, 0, a]`.

use crate::error::{CodecError, Result};
use crate::protocol::LzImageType;

/// Color table used to widen palette images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    /// Identity the remote end assigned to this palette.
    pub unique: u64,
    /// Entries in `0x00RRGGBB` form.
    pub ents: Vec<u32>,
}

impl Palette {
    /// Creates a palette from its entries.
    #[must_use]
    pub fn new(unique: u64, ents: Vec<u32>) -> Self {
        Self { unique, ents }
    }

    /// Checks the palette is large enough to widen `image_type`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidParameters`] for an empty palette, or a
    /// PLT1 palette with fewer than two entries.
    pub fn check_for(&self, image_type: LzImageType) -> Result<()> {
        let needed = match image_type {
            LzImageType::Plt1Le | LzImageType::Plt1Be => 2,
            _ => 1,
        };
        if self.ents.len() < needed {
            return Err(CodecError::invalid(format!(
                "palette of {} entries cannot widen {image_type:?}",
                self.ents.len()
            )));
        }
        Ok(())
    }

    /// Widens a PLT8 index.
    #[inline]
    pub(crate) fn plt8(&self, index: u8) -> Result<[u8; 4]> {
        self.ents
            .get(usize::from(index))
            .map(|&ent| palette_entry_to_rgb32(ent))
            .ok_or_else(|| CodecError::corrupt(format!("palette index {index} out of range")))
    }

    /// Widens a PLT4 index; the palette must be non-empty.
    #[inline]
    pub(crate) fn plt4(&self, index: u8) -> [u8; 4] {
        palette_entry_to_rgb32(self.ents[usize::from(index) % self.ents.len()])
    }

    /// Widens a PLT1 bit; the palette must hold at least two entries.
    #[inline]
    pub(crate) fn plt1(&self, bit: bool) -> [u8; 4] {
        palette_entry_to_rgb32(self.ents[usize::from(bit)])
    }
}

/// Converts a `0x00RRGGBB` palette entry to an RGB32 pixel.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)] // channel extraction
pub fn palette_entry_to_rgb32(ent: u32) -> [u8; 4] {
    [ent as u8, (ent >> 8) as u8, (ent >> 16) as u8, 0]
}

/// Converts an x1r5g5b5 pixel to an RGB32 pixel.
#[inline]
#[must_use]
pub fn rgb16_to_rgb32(pixel: u16) -> [u8; 4] {
    let b = scale_component5(pixel);
    let g = scale_component5(pixel >> 5);
    let r = scale_component5(pixel >> 10);
    [b, g, r, 0]
}

/// Converts an A8 pixel to an RGB32 pixel carrying only alpha.
#[inline]
#[must_use]
pub fn a8_to_rgb32(alpha: u8) -> [u8; 4] {
    [0, 0, 0, alpha]
}

/// Packs an RGB32 pixel down to x1r5g5b5.
#[must_use]
pub fn rgb32_to_rgb16(pixel: [u8; 4]) -> u16 {
    let [b, g, r, _] = pixel;
    (u16::from(r >> 3) << 10) | (u16::from(g >> 3) << 5) | u16::from(b >> 3)
}

#[inline]
#[allow(clippy::cast_possible_truncation)] // 5-bit value widened to 8 bits
fn scale_component5(value: u16) -> u8 {
    let c = (value & 0x1f) as u8;
    (c << 3) | (c >> 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_palette_entry_layout() {
        assert_eq!(palette_entry_to_rgb32(0x00AA_BBCC), [0xCC, 0xBB, 0xAA, 0]);
        assert_eq!(palette_entry_to_rgb32(0xFF00_0000), [0, 0, 0, 0]);
    }

    #[test]
    fn test_rgb16_widening() {
        assert_eq!(rgb16_to_rgb32(0x7fff), [0xff, 0xff, 0xff, 0]);
        assert_eq!(rgb16_to_rgb32(0x0000), [0, 0, 0, 0]);
        // Pure red, 5 bits = 0x1f
        assert_eq!(rgb16_to_rgb32(0x7c00), [0, 0, 0xff, 0]);
        // c = 0b10000 -> 0b10000100
        assert_eq!(rgb16_to_rgb32(0x0010), [0x84, 0, 0, 0]);
    }

    #[test]
    fn test_rgb16_pack_round_trip() {
        for value in [0x0000u16, 0x7fff, 0x1234, 0x4210, 0x03e0] {
            assert_eq!(rgb32_to_rgb16(rgb16_to_rgb32(value)), value);
        }
    }

    #[test]
    fn test_palette_lookups() {
        let palette = Palette::new(7, vec![0x0000_0000, 0x00FF_FFFF, 0x0000_00FF]);
        assert_eq!(palette.plt8(2).unwrap(), [0xFF, 0, 0, 0]);
        assert!(matches!(palette.plt8(3), Err(CodecError::CorruptStream(_))));
        // 4 % 3 == 1
        assert_eq!(palette.plt4(4), [0xFF, 0xFF, 0xFF, 0]);
        assert_eq!(palette.plt1(false), [0, 0, 0, 0]);
        assert_eq!(a8_to_rgb32(0x80), [0, 0, 0, 0x80]);
    }

    #[test]
    fn test_palette_size_checks() {
        let single = Palette::new(1, vec![0x0012_3456]);
        assert!(single.check_for(LzImageType::Plt8).is_ok());
        assert!(single.check_for(LzImageType::Plt1Be).is_err());
        assert!(Palette::new(2, Vec::new()).check_for(LzImageType::Plt4Le).is_err());
    }
}
