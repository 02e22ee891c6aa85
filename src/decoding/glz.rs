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

//! GLZ decoder.
//!
//! Decodes GLZ streams to RGB32 (RGBA keeps its alpha) and registers every
//! decoded image with a [`GlzWindow`] so later images can reference it.

use std::sync::Arc;

use bytes::Bytes;

use super::lz::widen_palette;
use super::{check_geometry, copy_literals, copy_match};
use crate::error::{CodecError, Result};
use crate::io::{ByteSource, Reader};
use crate::pixel::{
    AlphaOut, OutPixel, Plt1ToRgb32, Plt4ToRgb32, Plt8ToRgb32, Rgb16ToRgb32, Rgb32Out, NO_PALETTE,
};
use crate::protocol::{GlzHeader, LzImageType};
use crate::translate::Palette;
use crate::window::{GlzImage, GlzWindow};

/// Decodes GLZ images into a shared window.
#[derive(Debug, Clone)]
pub struct GlzDecoder {
    window: GlzWindow,
}

impl GlzDecoder {
    /// Creates a decoder feeding `window`.
    #[must_use]
    pub fn new(window: GlzWindow) -> Self {
        Self { window }
    }

    /// The window this decoder inserts into.
    #[must_use]
    pub fn window(&self) -> &GlzWindow {
        &self.window
    }

    /// Decodes one GLZ image, inserts it into the window and releases images
    /// no longer reachable.
    ///
    /// Suspends while a referenced image has not been inserted yet.
    ///
    /// # Errors
    ///
    /// - [`CodecError::CorruptStream`] for a malformed stream or a reference
    ///   outside what the image may reach.
    /// - [`CodecError::UnsupportedConversion`] for XXXA and A8 images, and for
    ///   palette images without a palette.
    /// - [`CodecError::WaitCancelled`] if the window is cleared or dropped
    ///   while waiting.
    pub async fn decode(&self, data: &[u8], palette: Option<&Palette>) -> Result<Arc<GlzImage>> {
        let mut r = Reader::from_slice(data);
        let header = GlzHeader::read_from(&mut r)?;
        check_geometry(header.image_type, header.width, header.height, header.stride)?;
        log::debug!(
            "GLZ: image {} {:?} {}x{} win_head_dist {}",
            header.id,
            header.image_type,
            header.width,
            header.height,
            header.win_head_dist
        );

        let from = header.image_type;
        let pixels = header.gross_pixels();
        let mut out = vec![0u8; pixels * 4];
        let pal = if from.is_palette() {
            widen_palette(palette, from, LzImageType::Rgb32)?
        } else {
            &NO_PALETTE
        };

        let mut pass = Pass { r: &mut r, window: &self.window, header: &header, palette: pal };
        match from {
            LzImageType::Plt1Le => pass.run::<Plt1ToRgb32<false>>(&mut out, pixels).await?,
            LzImageType::Plt1Be => pass.run::<Plt1ToRgb32<true>>(&mut out, pixels).await?,
            LzImageType::Plt4Le => pass.run::<Plt4ToRgb32<false>>(&mut out, pixels).await?,
            LzImageType::Plt4Be => pass.run::<Plt4ToRgb32<true>>(&mut out, pixels).await?,
            LzImageType::Plt8 => pass.run::<Plt8ToRgb32>(&mut out, pixels).await?,
            LzImageType::Rgb16 => pass.run::<Rgb16ToRgb32>(&mut out, pixels).await?,
            LzImageType::Rgb24 | LzImageType::Rgb32 => pass.run::<Rgb32Out>(&mut out, pixels).await?,
            LzImageType::Rgba => {
                pass.run::<Rgb32Out>(&mut out, pixels).await?;
                pass.run::<AlphaOut>(&mut out, pixels).await?;
            }
            LzImageType::Xxxa | LzImageType::A8 | LzImageType::Invalid => {
                return Err(CodecError::UnsupportedConversion {
                    from,
                    to: LzImageType::Rgb32,
                })
            }
        }

        if !r.at_end() {
            return Err(CodecError::corrupt(format!(
                "trailing bytes after GLZ image {}",
                header.id
            )));
        }

        let image = Arc::new(GlzImage { header, pixels: Bytes::from(out) });
        self.window.add(Arc::clone(&image))?;
        self.window.release_for_tail();
        Ok(image)
    }
}

/// State shared by the passes over one image.
struct Pass<'p, 'a, S> {
    r: &'p mut Reader<'a, S>,
    window: &'p GlzWindow,
    header: &'p GlzHeader,
    palette: &'p Palette,
}

impl<'a, S: ByteSource<'a>> Pass<'_, 'a, S> {
    async fn run<P: OutPixel>(&mut self, out: &mut [u8], pixels: usize) -> Result<()> {
        let mut op = 0;
        while op < pixels {
            let ctrl = self.r.read_u8()?;
            if ctrl < 32 {
                op = copy_literals::<S, P>(self.r, self.palette, out, op, usize::from(ctrl) + 1, pixels)?;
                continue;
            }

            let mut len = usize::from(ctrl >> 5);
            let pixel_flag = (ctrl >> 4) & 1 != 0;
            let mut ofs = usize::from(ctrl & 0x0f);
            if len == 7 {
                loop {
                    let code = self.r.read_u8()?;
                    len += usize::from(code);
                    if code != 255 {
                        break;
                    }
                }
            }
            ofs += usize::from(self.r.read_u8()?) << 4;

            let code = self.r.read_u8()?;
            let image_flag = code >> 6;
            let mut dist = 0u64;
            if pixel_flag {
                let far = (code >> 5) & 1 != 0;
                ofs += usize::from(code & 0x1f) << 12;
                for i in 0..image_flag {
                    dist += u64::from(self.r.read_u8()?) << (8 * i);
                }
                if far {
                    ofs += usize::from(self.r.read_u8()?) << 17;
                }
            } else {
                dist = u64::from(code & 0x3f);
                for i in 0..image_flag {
                    dist += u64::from(self.r.read_u8()?) << (6 + 8 * i);
                }
            }
            len = (len + P::LEN_BIAS) * P::EXPAND;

            if dist == 0 {
                op = copy_match::<P>(out, op, (ofs + 1) * P::EXPAND, len, pixels)?;
            } else {
                op = self.copy_from_image::<P>(out, op, dist, ofs * P::EXPAND, len, pixels).await?;
            }
        }
        Ok(())
    }

    async fn copy_from_image<P: OutPixel>(
        &self,
        out: &mut [u8],
        op: usize,
        dist: u64,
        ofs: usize,
        len: usize,
        pixels: usize,
    ) -> Result<usize> {
        if dist > u64::from(self.header.win_head_dist) {
            return Err(CodecError::corrupt(format!(
                "image {} references {dist} images back, beyond its window of {}",
                self.header.id, self.header.win_head_dist
            )));
        }
        let end = op + len;
        if end > pixels {
            return Err(CodecError::corrupt(format!(
                "match of {len} pixels overflows the image at pixel {op}"
            )));
        }

        let image = self.window.resolve(self.header.id, dist, ofs, len).await?;
        let src = image
            .pixels
            .get(ofs * 4..(ofs + len) * 4)
            .ok_or_else(|| CodecError::corrupt("reference outside the referenced image"))?;
        let dst = &mut out[op * 4..end * 4];
        if P::COPY_START == 0 {
            dst.copy_from_slice(src);
        } else {
            for (to, from) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                to[P::COPY_START..].copy_from_slice(&from[P::COPY_START..]);
            }
        }
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{GlzEncoded, GlzEncoder};
    use crate::io::Unbounded;
    use crate::protocol::ImageParams;
    use crate::translate;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tokio_test::{assert_pending, assert_ready, task};

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn encode(enc: &mut GlzEncoder, params: &ImageParams, data: &[u8]) -> GlzEncoded {
        enc.encode(params, std::iter::once(data), &mut Unbounded).unwrap()
    }

    /// `[b, g, r, 0]` pixels of 32-bit source data.
    fn rgb(data: &[u8]) -> Vec<u8> {
        data.chunks_exact(4).flat_map(|p| [p[0], p[1], p[2], 0]).collect()
    }

    #[tokio::test]
    async fn test_frames_round_trip() {
        let params = ImageParams::new(LzImageType::Rgb32, 24, 24, false);
        let first = noise(24 * 24 * 4, 11);
        let mut second = first.clone();
        second[400..800].fill(0x5a);

        let mut enc = GlzEncoder::default();
        let a = encode(&mut enc, &params, &first);
        let b = encode(&mut enc, &params, &second);

        let decoder = GlzDecoder::new(GlzWindow::new());
        let da = decoder.decode(&a.bytes, None).await.unwrap();
        let db = decoder.decode(&b.bytes, None).await.unwrap();
        assert_eq!(&da.pixels[..], &rgb(&first)[..]);
        assert_eq!(&db.pixels[..], &rgb(&second)[..]);
        assert_eq!(db.id(), 1);
        assert_eq!(decoder.window().len(), 2);
    }

    #[tokio::test]
    async fn test_formats_decode_to_rgb32() {
        let mut enc = GlzEncoder::default();
        let decoder = GlzDecoder::new(GlzWindow::new());

        let rgb24 = ImageParams::new(LzImageType::Rgb24, 16, 4, true);
        let data = noise(16 * 4 * 3, 2);
        let out = decoder.decode(&encode(&mut enc, &rgb24, &data).bytes, None).await.unwrap();
        let expected: Vec<u8> = data.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 0]).collect();
        assert_eq!(&out.pixels[..], &expected[..]);

        let rgb16 = ImageParams::new(LzImageType::Rgb16, 16, 4, true);
        let data = noise(16 * 4 * 2, 3);
        let out = decoder.decode(&encode(&mut enc, &rgb16, &data).bytes, None).await.unwrap();
        let expected: Vec<u8> = data
            .chunks_exact(2)
            .flat_map(|p| translate::rgb16_to_rgb32(u16::from_le_bytes([p[0], p[1]])))
            .collect();
        assert_eq!(&out.pixels[..], &expected[..]);

        let palette = Palette::new(1, (0..256u32).map(|i| i * 0x0001_0101).collect());
        let plt8 = ImageParams::new(LzImageType::Plt8, 16, 4, true);
        let data: Vec<u8> = (0..64u8).map(|i| i % 5).collect();
        let out = decoder
            .decode(&encode(&mut enc, &plt8, &data).bytes, Some(&palette))
            .await
            .unwrap();
        let expected: Vec<u8> = data.iter().flat_map(|&i| palette.plt8(i).unwrap()).collect();
        assert_eq!(&out.pixels[..], &expected[..]);

        let plt1 = ImageParams::new(LzImageType::Plt1Be, 16, 2, true);
        let data = [0b1000_0001u8, 0xff, 0x00, 0x0f];
        let out = decoder
            .decode(&encode(&mut enc, &plt1, &data).bytes, Some(&palette))
            .await
            .unwrap();
        assert_eq!(out.gross_pixels(), 32);
        assert_eq!(&out.pixels[..4], &palette.plt1(true)[..]);
        assert_eq!(&out.pixels[4..8], &palette.plt1(false)[..]);
    }

    #[tokio::test]
    async fn test_rgba_keeps_alpha() {
        let params = ImageParams::new(LzImageType::Rgba, 20, 10, true);
        let data = noise(20 * 10 * 4, 4);
        let mut enc = GlzEncoder::default();
        let a = encode(&mut enc, &params, &data);
        let b = encode(&mut enc, &params, &data);

        let decoder = GlzDecoder::new(GlzWindow::new());
        decoder.decode(&a.bytes, None).await.unwrap();
        let image = decoder.decode(&b.bytes, None).await.unwrap();
        assert_eq!(&image.pixels[..], &data[..]);
    }

    #[tokio::test]
    async fn test_palette_needs_palette() {
        let params = ImageParams::new(LzImageType::Plt4Le, 8, 2, true);
        let a = encode(&mut GlzEncoder::default(), &params, &[0x21; 8]);
        let result = GlzDecoder::new(GlzWindow::new()).decode(&a.bytes, None).await;
        assert!(matches!(result, Err(CodecError::UnsupportedConversion { .. })));
    }

    #[test]
    fn test_waits_for_referenced_image() {
        let params = ImageParams::new(LzImageType::Rgb32, 32, 16, true);
        let data = noise(32 * 16 * 4, 9);
        let mut enc = GlzEncoder::default();
        let a = encode(&mut enc, &params, &data);
        let b = encode(&mut enc, &params, &data);

        let decoder = GlzDecoder::new(GlzWindow::new());
        let mut later = task::spawn(decoder.decode(&b.bytes, None));
        assert_pending!(later.poll());
        assert_eq!(decoder.window().pending_waits(), 1);
        assert!(!later.is_woken());

        tokio_test::block_on(decoder.decode(&a.bytes, None)).unwrap();
        assert!(later.is_woken());
        let image = assert_ready!(later.poll()).unwrap();
        assert_eq!(&image.pixels[..], &rgb(&data)[..]);
        assert_eq!(decoder.window().tail_gap(), 2);
    }

    #[tokio::test]
    async fn test_reference_beyond_window_rejected() {
        let params = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let data = noise(16 * 16 * 4, 6);
        let mut enc = GlzEncoder::default();
        let a = encode(&mut enc, &params, &data);
        let mut b = encode(&mut enc, &params, &data).bytes.to_vec();
        // win_head_dist is the last header word
        b[29..33].copy_from_slice(&0u32.to_be_bytes());

        let decoder = GlzDecoder::new(GlzWindow::new());
        decoder.decode(&a.bytes, None).await.unwrap();
        let result = decoder.decode(&b, None).await;
        assert!(matches!(result, Err(CodecError::CorruptStream(_))));
    }

    #[tokio::test]
    async fn test_released_target_rejected() {
        let params = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let data = noise(16 * 16 * 4, 8);
        let mut enc = GlzEncoder::default();
        let a = encode(&mut enc, &params, &data);
        let b = encode(&mut enc, &params, &data);

        let decoder = GlzDecoder::new(GlzWindow::new());
        decoder.decode(&a.bytes, None).await.unwrap();
        decoder.window().release(1);
        let result = decoder.decode(&b.bytes, None).await;
        assert!(matches!(result, Err(CodecError::CorruptStream(_))));
    }

    #[tokio::test]
    async fn test_trailing_bytes_rejected() {
        let params = ImageParams::new(LzImageType::Rgb32, 4, 4, true);
        let mut a = encode(&mut GlzEncoder::default(), &params, &[0u8; 64]).bytes.to_vec();
        a.push(0);
        let result = GlzDecoder::new(GlzWindow::new()).decode(&a, None).await;
        assert!(matches!(result, Err(CodecError::CorruptStream(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_rejected() {
        let params = ImageParams::new(LzImageType::Rgb24, 8, 8, true);
        let a = encode(&mut GlzEncoder::default(), &params, &noise(8 * 8 * 3, 1));
        let result = GlzDecoder::new(GlzWindow::new())
            .decode(&a.bytes[..a.bytes.len() - 5], None)
            .await;
        assert!(matches!(result, Err(CodecError::CorruptStream(_))));
    }
}
