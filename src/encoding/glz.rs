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

//! GLZ encoder.
//!
//! GLZ extends LZ with references into earlier images. The encoder keeps the
//! images it has sent in a dictionary sized to the decoder's window, and one
//! hash table per pass shared by every image, so a candidate found in the
//! table may point into any retained image of the same type.
//!
//! # Control word
//!
//! ```text
//! byte0: len << 5 | pixel_flag << 4 | ofs & 0x0f   (len 7 continues as in LZ)
//! byte1: (ofs >> 4) & 0xff
//! short form (pixel_flag 0, ofs < 2^12):
//!     image_flag << 6 | dist & 0x3f, then image_flag bytes of dist >> 6
//! long form (pixel_flag 1):
//!     image_flag << 6 | far << 5 | (ofs >> 12) & 0x1f,
//!     image_flag bytes of dist, then (ofs >> 17) if far
//! ```
//!
//! `dist` is the image distance (0 for the current image, where `ofs` is the
//! pixel distance minus one); for earlier images `ofs` is the unit offset
//! inside the referenced image.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::common::{match_len, put_length_ext, HashTable, LiteralRun, BOUND_OFFSET, LIMIT_OFFSET};
use crate::error::{CodecError, Result};
use crate::io::{LineSource, OutputSink, Writer};
use crate::pixel::{AlphaUnit, PltUnit, Rgb16Unit, Rgb24Unit, Rgb32Unit, SourcePixel};
use crate::protocol::{
    GlzHeader, ImageParams, LzImageType, DEFAULT_GLZ_WINDOW_PIXELS, GLZ_MAX_IMAGE_DIST,
    GLZ_MAX_PIXEL_OFFSET, MAX_WINDOW_CAPACITY,
};

/// Offsets below this fit the short control form.
const SHORT_OFS_LIMIT: usize = 1 << 12;

/// Offsets from this on need the far byte of the long form.
const FAR_OFS_LIMIT: usize = 1 << 17;

/// Image distances the short form can carry.
const SHORT_DIST_LIMIT: u64 = 1 << 30;

/// Encoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlzEncoderConfig {
    /// Pixels the decoder's window holds; the dictionary never exceeds it.
    pub max_window_pixels: usize,
}

impl Default for GlzEncoderConfig {
    fn default() -> Self {
        Self { max_window_pixels: DEFAULT_GLZ_WINDOW_PIXELS }
    }
}

/// An encoded GLZ image and the id it was assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlzEncoded {
    /// Id written in the header.
    pub id: u64,
    /// Complete stream, header included.
    pub bytes: Bytes,
}

/// An image retained for cross-image matching.
struct DictImage {
    id: u64,
    image_type: LzImageType,
    gross_pixels: usize,
    data: Bytes,
}

/// Hash table entry: image id and unit offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GlzRef {
    id: u64,
    pos: usize,
}

const NO_REF: GlzRef = GlzRef { id: u64::MAX, pos: 0 };

/// A match found at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GlzMatch {
    len: usize,
    dist: u64,
    ofs: usize,
}

/// The image being encoded and the dictionary it may reference.
struct Frame<'f> {
    id: u64,
    image_type: LzImageType,
    data: &'f [u8],
    dict: &'f VecDeque<DictImage>,
}

impl Frame<'_> {
    /// Data of the retained image `id` if it can be referenced from here.
    fn target(&self, id: u64) -> Option<&[u8]> {
        let front = self.dict.front()?;
        let idx = usize::try_from(id.checked_sub(front.id)?).ok()?;
        let image = self.dict.get(idx)?;
        (image.id == id && image.image_type == self.image_type).then_some(&image.data[..])
    }
}

/// GLZ image encoder.
///
/// One encoder feeds one decoder window; ids are assigned in call order.
pub struct GlzEncoder {
    config: GlzEncoderConfig,
    next_id: u64,
    dict: VecDeque<DictImage>,
    dict_pixels: usize,
    pixel_table: HashTable<GlzRef>,
    alpha_table: HashTable<GlzRef>,
}

impl Default for GlzEncoder {
    fn default() -> Self {
        Self::new(GlzEncoderConfig::default())
    }
}

impl GlzEncoder {
    /// Creates an encoder with an empty dictionary.
    #[must_use]
    pub fn new(config: GlzEncoderConfig) -> Self {
        Self {
            config,
            next_id: 0,
            dict: VecDeque::new(),
            dict_pixels: 0,
            pixel_table: HashTable::new(NO_REF),
            alpha_table: HashTable::new(NO_REF),
        }
    }

    /// Encoder settings.
    #[must_use]
    pub fn config(&self) -> &GlzEncoderConfig {
        &self.config
    }

    /// Id the next successful [`encode`](Self::encode) assigns.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of images retained for cross-image matching.
    #[must_use]
    pub fn dict_len(&self) -> usize {
        self.dict.len()
    }

    /// Pixels held by the retained images.
    #[must_use]
    pub fn dict_pixels(&self) -> usize {
        self.dict_pixels
    }

    /// Drops every retained image. Ids keep counting.
    pub fn reset(&mut self) {
        self.dict.clear();
        self.dict_pixels = 0;
        self.pixel_table.fill(NO_REF);
        self.alpha_table.fill(NO_REF);
    }

    /// Encodes one image and retains it for later images.
    ///
    /// `lines` follows the same contract as
    /// [`LzEncoder::encode`](super::LzEncoder::encode). A failed call assigns
    /// no id and does not retain the image.
    ///
    /// # Errors
    ///
    /// - [`CodecError::UnsupportedConversion`] for XXXA and A8 images, which
    ///   GLZ decoders cannot widen to RGB32.
    /// - [`CodecError::InvalidParameters`] if `params` or the delivered lines
    ///   break the buffer contract.
    /// - [`CodecError::WindowOverflow`] if the image alone exceeds the window.
    /// - [`CodecError::OutOfSpace`] if `sink` stops granting space.
    pub fn encode<'a, L, S>(&mut self, params: &ImageParams, lines: L, sink: &mut S) -> Result<GlzEncoded>
    where
        L: LineSource<'a>,
        S: OutputSink + ?Sized,
    {
        if matches!(params.image_type, LzImageType::Xxxa | LzImageType::A8 | LzImageType::Invalid) {
            return Err(CodecError::UnsupportedConversion {
                from: params.image_type,
                to: LzImageType::Rgb32,
            });
        }
        params.validate()?;
        let data = gather_lines(params, lines)?;

        let id = self.next_id;
        let mut header = GlzHeader {
            image_type: params.image_type,
            width: params.width,
            height: params.height,
            stride: params.stride,
            top_down: params.top_down,
            id,
            win_head_dist: 0,
        };
        let gross = header.gross_pixels();
        if gross > self.config.max_window_pixels {
            return Err(CodecError::WindowOverflow(format!(
                "image of {gross} pixels exceeds a window of {}",
                self.config.max_window_pixels
            )));
        }
        self.evict_for(id, gross);
        header.win_head_dist = match self.dict.front() {
            Some(front) => u32::try_from(id - front.id).map_err(|_| {
                CodecError::WindowOverflow(format!("image {id} is too far ahead of {}", front.id))
            })?,
            None => 0,
        };

        let mut w = Writer::new(sink);
        header.write_to(&mut w)?;
        let frame = Frame { id, image_type: params.image_type, data: &data, dict: &self.dict };
        let table = &mut self.pixel_table;
        match params.image_type {
            LzImageType::Plt1Le
            | LzImageType::Plt1Be
            | LzImageType::Plt4Le
            | LzImageType::Plt4Be
            | LzImageType::Plt8 => compress::<PltUnit, S>(&mut w, table, &frame)?,
            LzImageType::Rgb16 => compress::<Rgb16Unit, S>(&mut w, table, &frame)?,
            LzImageType::Rgb24 => compress::<Rgb24Unit, S>(&mut w, table, &frame)?,
            LzImageType::Rgb32 => compress::<Rgb32Unit, S>(&mut w, table, &frame)?,
            LzImageType::Rgba => {
                compress::<Rgb32Unit, S>(&mut w, table, &frame)?;
                compress::<AlphaUnit, S>(&mut w, &mut self.alpha_table, &frame)?;
            }
            from @ (LzImageType::Xxxa | LzImageType::A8 | LzImageType::Invalid) => {
                return Err(CodecError::UnsupportedConversion { from, to: LzImageType::Rgb32 })
            }
        }

        log::debug!(
            "GLZ: encoded image {id} {:?} {}x{} win_head_dist {} -> {} bytes",
            params.image_type,
            params.width,
            params.height,
            header.win_head_dist,
            w.len()
        );
        #[cfg(feature = "debug-logging")]
        {
            let raw = data.len();
            log::info!(
                "GLZ: compressed {}->{} bytes ({:.1}%)",
                raw,
                w.len(),
                w.len() as f64 * 100.0 / raw as f64
            );
        }

        let bytes = w.finish();
        self.dict.push_back(DictImage {
            id,
            image_type: params.image_type,
            gross_pixels: gross,
            data,
        });
        self.dict_pixels += gross;
        self.next_id += 1;
        Ok(GlzEncoded { id, bytes })
    }

    /// Drops the oldest images until one of `gross` pixels with `id` fits.
    fn evict_for(&mut self, id: u64, gross: usize) {
        let max_dist = GLZ_MAX_IMAGE_DIST.min(MAX_WINDOW_CAPACITY as u64 - 1);
        let mut evicted = 0;
        while let Some(front) = self.dict.front() {
            if self.dict_pixels + gross <= self.config.max_window_pixels && id - front.id <= max_dist {
                break;
            }
            self.dict_pixels -= front.gross_pixels;
            self.dict.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            log::debug!(
                "GLZ dictionary evicted {evicted} images, {} retained",
                self.dict.len()
            );
        }
    }
}

/// Copies the delivered line batches into one buffer, checking they are whole
/// lines adding up to the image height.
fn gather_lines<'a, L: LineSource<'a>>(params: &ImageParams, mut lines: L) -> Result<Bytes> {
    let stride = params.stride as usize;
    let height = params.height as usize;

    let mut data = BytesMut::with_capacity(stride * height);
    while let Some(batch) = lines.more_lines() {
        if batch.len() % stride != 0 {
            return Err(CodecError::invalid(format!(
                "line batch of {} bytes is not a whole number of {stride}-byte lines",
                batch.len()
            )));
        }
        if data.len() + batch.len() > stride * height {
            return Err(CodecError::invalid(format!("more than {height} lines delivered")));
        }
        data.extend_from_slice(batch);
    }
    if data.len() != stride * height {
        return Err(CodecError::invalid(format!(
            "{} lines delivered for an image of height {height}",
            data.len() / stride
        )));
    }
    Ok(data.freeze())
}

fn compress<P: SourcePixel, S: OutputSink + ?Sized>(
    w: &mut Writer<'_, S>,
    table: &mut HashTable<GlzRef>,
    frame: &Frame<'_>,
) -> Result<()> {
    let data = frame.data;
    let units = data.len() / P::BYTES;
    let limit = units.saturating_sub(LIMIT_OFFSET);
    let bound = units.saturating_sub(BOUND_OFFSET);

    let mut run = LiteralRun::default();
    let mut ip = 0;
    while ip < limit {
        let anchor = ip;
        match find_match::<P>(table, frame, anchor, bound) {
            Some(m) => {
                run.close(w);
                put_match(w, m.len - P::LEN_BIAS, m.dist, m.ofs)?;
                ip = anchor + m.len;
                for pos in [ip - 2, ip - 1] {
                    if pos > anchor {
                        table.set(P::hash(data, pos), GlzRef { id: frame.id, pos });
                    }
                }
            }
            None => {
                run.push::<P, S>(w, data, ip)?;
                ip += 1;
            }
        }
    }

    while ip < units {
        run.push::<P, S>(w, data, ip)?;
        ip += 1;
    }
    run.close(w);
    Ok(())
}

fn find_match<P: SourcePixel>(
    table: &mut HashTable<GlzRef>,
    frame: &Frame<'_>,
    ip: usize,
    bound: usize,
) -> Option<GlzMatch> {
    let data = frame.data;
    let room = bound - 1 - ip;

    // Runs of one value are matched against the previous unit
    if ip > 0 {
        let x = P::key(data, ip - 1);
        if P::key(data, ip) == x && P::key(data, ip + 1) == x && P::key(data, ip + 2) == x {
            let len = 3 + match_len::<P>(data, ip + 3, data, ip + 2, room - 3);
            return Some(GlzMatch { len, dist: 0, ofs: 0 });
        }
    }

    let cand = table.replace(P::hash(data, ip), GlzRef { id: frame.id, pos: ip });
    if cand.id == frame.id {
        let distance = ip.checked_sub(cand.pos)?;
        if distance == 0 || distance - 1 > GLZ_MAX_PIXEL_OFFSET {
            return None;
        }
        let len = match_len::<P>(data, ip, data, cand.pos, room);
        return (len >= P::MIN_MATCH).then_some(GlzMatch { len, dist: 0, ofs: distance - 1 });
    }

    // Palettes are not tracked, so palette indices never match across images
    if frame.image_type.is_palette() || cand.id > frame.id || cand.pos > GLZ_MAX_PIXEL_OFFSET {
        return None;
    }
    let target = frame.target(cand.id)?;
    let dist = frame.id - cand.id;
    if cand.pos >= SHORT_OFS_LIMIT && dist > GLZ_MAX_IMAGE_DIST {
        return None;
    }
    let max = room.min((target.len() / P::BYTES).saturating_sub(cand.pos));
    let len = match_len::<P>(data, ip, target, cand.pos, max);
    (len >= P::MIN_MATCH).then_some(GlzMatch { len, dist, ofs: cand.pos })
}

/// Bytes needed for the non-zero low bytes of `value`, at most three.
fn byte_count(value: u64) -> u8 {
    match value {
        0 => 0,
        1..=0xff => 1,
        0x100..=0xffff => 2,
        _ => 3,
    }
}

/// Writes a control word for length code `code` referencing unit offset
/// `ofs` of the image `dist` ids back.
#[allow(clippy::cast_possible_truncation)] // fields are masked to their widths
fn put_match<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, code: usize, dist: u64, ofs: usize) -> Result<()> {
    let long = ofs >= SHORT_OFS_LIMIT || dist >= SHORT_DIST_LIMIT;
    let pixel_flag = u8::from(long) << 4;
    w.put_u8(((code.min(7) as u8) << 5) | pixel_flag | (ofs & 0x0f) as u8)?;
    if code >= 7 {
        put_length_ext(w, code)?;
    }
    w.put_u8(((ofs >> 4) & 0xff) as u8)?;

    if long {
        let image_flag = byte_count(dist);
        let far = ofs >= FAR_OFS_LIMIT;
        w.put_u8((image_flag << 6) | (u8::from(far) << 5) | ((ofs >> 12) & 0x1f) as u8)?;
        for i in 0..image_flag {
            w.put_u8((dist >> (8 * i)) as u8)?;
        }
        if far {
            w.put_u8(((ofs >> 17) & 0xff) as u8)?;
        }
    } else {
        let rest = dist >> 6;
        let image_flag = byte_count(rest);
        w.put_u8((image_flag << 6) | (dist & 0x3f) as u8)?;
        for i in 0..image_flag {
            w.put_u8((rest >> (8 * i)) as u8)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoding::GlzDecoder;
    use crate::io::{Budget, Reader, Unbounded};
    use crate::window::GlzWindow;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len).map(|_| rng.gen()).collect()
    }

    fn encode_unbounded(enc: &mut GlzEncoder, params: &ImageParams, data: &[u8]) -> GlzEncoded {
        enc.encode(params, std::iter::once(data), &mut Unbounded).unwrap()
    }

    fn header_of(bytes: &[u8]) -> GlzHeader {
        GlzHeader::read_from(&mut Reader::from_slice(bytes)).unwrap()
    }

    /// Image distances of the match groups in a single-pass stream of
    /// `unit_bytes` literals.
    fn image_distances(stream: &[u8], unit_bytes: usize) -> Vec<u64> {
        let mut dists = Vec::new();
        let mut at = 33;
        let next = |at: &mut usize| {
            let byte = stream[*at];
            *at += 1;
            byte
        };
        while at < stream.len() {
            let ctrl = next(&mut at);
            if ctrl < 32 {
                at += (usize::from(ctrl) + 1) * unit_bytes;
                continue;
            }
            if ctrl >> 5 == 7 {
                while next(&mut at) == 255 {}
            }
            next(&mut at);
            let code = next(&mut at);
            let image_flag = code >> 6;
            let mut dist = 0u64;
            if ctrl & 0x10 != 0 {
                for i in 0..image_flag {
                    dist += u64::from(next(&mut at)) << (8 * i);
                }
                if code & 0x20 != 0 {
                    next(&mut at);
                }
            } else {
                dist = u64::from(code & 0x3f);
                for i in 0..image_flag {
                    dist += u64::from(next(&mut at)) << (6 + 8 * i);
                }
            }
            dists.push(dist);
        }
        dists
    }

    #[test]
    fn test_repeated_image_references_the_first() {
        let params = ImageParams::new(LzImageType::Rgb24, 32, 32, true);
        let data = noise(32 * 32 * 3, 7);
        let mut enc = GlzEncoder::default();
        let first = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded).unwrap();
        let second = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded).unwrap();

        assert_eq!((first.id, second.id), (0, 1));
        assert!(first.bytes.len() > data.len());
        assert!(second.bytes.len() * 4 < first.bytes.len());
        assert_eq!(header_of(&second.bytes).win_head_dist, 1);

        assert!(image_distances(&first.bytes, 3).iter().all(|&d| d == 0));
        let dists = image_distances(&second.bytes, 3);
        assert!(dists.contains(&1));
        assert!(dists.iter().all(|&d| d <= 1));
    }

    #[test]
    fn test_failed_encode_keeps_state() {
        let params = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let first = noise(16 * 16 * 4, 12);
        let second = noise(16 * 16 * 4, 13);

        let mut enc = GlzEncoder::default();
        let a = encode_unbounded(&mut enc, &params, &first);
        let result = enc.encode(&params, std::iter::once(&second[..]), &mut Budget::new(200));
        assert_eq!(result, Err(CodecError::OutOfSpace));
        assert_eq!(enc.next_id(), 1);
        assert_eq!(enc.dict_len(), 1);

        let b = encode_unbounded(&mut enc, &params, &second);
        assert_eq!(b.id, 1);
        let decoder = GlzDecoder::new(GlzWindow::new());
        tokio_test::block_on(async {
            decoder.decode(&a.bytes, None).await.unwrap();
            let image = decoder.decode(&b.bytes, None).await.unwrap();
            let expected: Vec<u8> = second
                .chunks_exact(4)
                .flat_map(|p| [p[0], p[1], p[2], 0])
                .collect();
            assert_eq!(&image.pixels[..], &expected[..]);
        });
    }

    #[test]
    fn test_eviction_tracks_window() {
        let params = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let data = noise(16 * 16 * 4, 1);
        let mut enc = GlzEncoder::new(GlzEncoderConfig { max_window_pixels: 2 * 256 });

        let dists: Vec<u32> = (0..4)
            .map(|_| {
                let out = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded).unwrap();
                header_of(&out.bytes).win_head_dist
            })
            .collect();
        assert_eq!(dists, vec![0, 1, 1, 1]);
        assert_eq!(enc.dict_len(), 2);
        assert_eq!(enc.dict_pixels(), 512);
    }

    #[test]
    fn test_image_larger_than_window() {
        let params = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let data = vec![0u8; 16 * 16 * 4];
        let mut enc = GlzEncoder::new(GlzEncoderConfig { max_window_pixels: 100 });
        let result = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded);
        assert!(matches!(result, Err(CodecError::WindowOverflow(_))));
        assert_eq!(enc.next_id(), 0);
        assert_eq!(enc.dict_len(), 0);
    }

    #[test]
    fn test_palette_images_stay_independent() {
        let params = ImageParams::new(LzImageType::Plt8, 64, 8, true);
        let data = noise(64 * 8, 3);
        let mut enc = GlzEncoder::default();
        let first = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded).unwrap();
        let second = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded).unwrap();
        assert_eq!(&first.bytes[33..], &second.bytes[33..]);
    }

    #[test]
    fn test_type_change_blocks_cross_reference() {
        let data = noise(16 * 16 * 4, 5);
        let mut enc = GlzEncoder::default();
        let rgb32 = ImageParams::new(LzImageType::Rgb32, 16, 16, true);
        let rgba = ImageParams::new(LzImageType::Rgba, 16, 16, true);
        let fresh = GlzEncoder::default()
            .encode(&rgba, std::iter::once(&data[..]), &mut Unbounded)
            .unwrap();
        enc.encode(&rgb32, std::iter::once(&data[..]), &mut Unbounded).unwrap();
        let after = enc.encode(&rgba, std::iter::once(&data[..]), &mut Unbounded).unwrap();
        assert_eq!(&after.bytes[33..], &fresh.bytes[33..]);
    }

    #[test]
    fn test_unsupported_types() {
        let mut enc = GlzEncoder::default();
        for image_type in [LzImageType::Xxxa, LzImageType::A8] {
            let params = ImageParams::new(image_type, 4, 4, true);
            let data = vec![0u8; params.stride as usize * 4];
            let result = enc.encode(&params, std::iter::once(&data[..]), &mut Unbounded);
            assert_eq!(
                result,
                Err(CodecError::UnsupportedConversion { from: image_type, to: LzImageType::Rgb32 })
            );
        }
    }

    #[test]
    fn test_rejects_missing_lines() {
        let params = ImageParams::new(LzImageType::Rgb16, 4, 4, true);
        let data = vec![0u8; 8 * 3];
        let result = GlzEncoder::default().encode(&params, std::iter::once(&data[..]), &mut Unbounded);
        assert!(matches!(result, Err(CodecError::InvalidParameters(_))));
    }

    #[test]
    fn test_short_and_long_control_forms() {
        let mut sink = Unbounded;
        let mut w = Writer::new(&mut sink);
        put_match(&mut w, 2, 0, 5).unwrap();
        put_match(&mut w, 1, 70, 0x12).unwrap();
        put_match(&mut w, 3, 2, 0x2_1234).unwrap();
        assert_eq!(
            &w.finish()[..],
            &[
                0x45, 0x00, 0x00, // in-image, short
                0x22, 0x01, 0x46, 0x01, // 70 = 6 + 1 << 6
                0x74, 0x23, 0x61, 0x02, 0x01, // long and far
            ]
        );
    }
}
