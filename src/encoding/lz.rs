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

//! LZ encoder.
//!
//! A greedy LZ77 parse with a single-candidate hash dictionary, in the style
//! of fastlz level 2, over pixel units instead of bytes.
//!
//! # Stream format
//!
//! After the header the stream is a sequence of control groups:
//!
//! - `ctrl < 32`: `ctrl + 1` literal units follow.
//! - otherwise a match. The top three bits hold the length code (7 means the
//!   code continues in following bytes, `255` per byte until a smaller byte),
//!   the low five bits and the next byte hold the biased distance. Distances
//!   of [`MAX_DISTANCE`] and beyond are written as `31, 255` followed by the
//!   16-bit excess.
//!
//! Input arrives as batches of scanlines; each batch is a segment, and matches
//! may reach back into earlier segments without the lines being copied into a
//! single buffer.

use bytes::Bytes;

use super::common::{match_len, put_length_ext, HashTable, LiteralRun, BOUND_OFFSET, LIMIT_OFFSET};
use crate::error::{CodecError, Result};
use crate::io::{LineSource, OutputSink, Writer};
use crate::pixel::{AlphaUnit, PltUnit, Rgb16Unit, Rgb24Unit, Rgb32Unit, SourcePixel};
use crate::protocol::{
    ImageParams, LzHeader, LzImageType, MAX_DISTANCE, MAX_FARDISTANCE, MIN_FILE_SIZE,
};

/// A batch of whole scanlines and the number of units before it.
struct Segment<'a> {
    data: &'a [u8],
    units: usize,
    size_delta: usize,
}

/// Position of a unit: segment index and unit offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegPos {
    seg: usize,
    off: usize,
}

/// LZ image encoder.
///
/// The encoder owns its hash table so repeated calls reuse the allocation.
pub struct LzEncoder {
    table: HashTable<SegPos>,
}

impl Default for LzEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LzEncoder {
    /// Creates an encoder.
    #[must_use]
    pub fn new() -> Self {
        Self { table: HashTable::new(SegPos { seg: 0, off: 0 }) }
    }

    /// Encodes one image.
    ///
    /// `lines` yields batches of whole scanlines (last line first for
    /// bottom-up images) adding up to `params.height`. Output space is drawn
    /// from `sink`.
    ///
    /// # Errors
    ///
    /// - [`CodecError::InvalidParameters`] if `params` or the delivered lines
    ///   break the buffer contract.
    /// - [`CodecError::OutOfSpace`] if `sink` stops granting space. Nothing
    ///   written by a failed call is usable.
    pub fn encode<'a, L, S>(&mut self, params: &ImageParams, lines: L, sink: &mut S) -> Result<Bytes>
    where
        L: LineSource<'a>,
        S: OutputSink + ?Sized,
    {
        params.validate()?;
        let segs = collect_segments(params, lines)?;

        let mut w = Writer::new(sink);
        LzHeader {
            image_type: params.image_type,
            width: params.width,
            height: params.height,
            stride: params.stride,
            top_down: params.top_down,
        }
        .write_to(&mut w)?;

        match params.image_type {
            LzImageType::Plt1Le
            | LzImageType::Plt1Be
            | LzImageType::Plt4Le
            | LzImageType::Plt4Be
            | LzImageType::Plt8
            | LzImageType::A8 => self.compress::<PltUnit, S>(&mut w, &segs)?,
            LzImageType::Rgb16 => self.compress::<Rgb16Unit, S>(&mut w, &segs)?,
            LzImageType::Rgb24 => self.compress::<Rgb24Unit, S>(&mut w, &segs)?,
            LzImageType::Rgb32 => self.compress::<Rgb32Unit, S>(&mut w, &segs)?,
            LzImageType::Rgba => {
                self.compress::<Rgb32Unit, S>(&mut w, &segs)?;
                self.compress::<AlphaUnit, S>(&mut w, &segs)?;
            }
            LzImageType::Xxxa => self.compress::<AlphaUnit, S>(&mut w, &segs)?,
            LzImageType::Invalid => return Err(CodecError::invalid("image type is invalid")),
        }

        log::debug!(
            "LZ: encoded {:?} {}x{} in {} segments -> {} bytes",
            params.image_type,
            params.width,
            params.height,
            segs.len(),
            w.len()
        );
        #[cfg(feature = "debug-logging")]
        {
            let raw = params.stride as usize * params.height as usize;
            log::info!(
                "LZ: compressed {}->{} bytes ({:.1}%)",
                raw,
                w.len(),
                w.len() as f64 * 100.0 / raw as f64
            );
        }

        Ok(w.finish())
    }

    fn compress<P: SourcePixel, S: OutputSink + ?Sized>(
        &mut self,
        w: &mut Writer<'_, S>,
        segs: &[Segment<'_>],
    ) -> Result<()> {
        // Segments too small to seed the dictionary go out as plain literals
        let mut first = None;
        for (idx, seg) in segs.iter().enumerate() {
            if seg.units >= MIN_FILE_SIZE {
                first = Some(idx);
                break;
            }
            #[allow(clippy::cast_possible_truncation)] // fewer than MIN_FILE_SIZE units
            w.put_u8((seg.units - 1) as u8)?;
            for i in 0..seg.units {
                P::put(w, seg.data, i)?;
            }
        }
        let Some(first) = first else {
            return Ok(());
        };

        self.table.fill(SegPos { seg: first, off: 0 });
        let mut run = LiteralRun::default();
        run.push::<P, S>(w, segs[first].data, 0)?;
        run.push::<P, S>(w, segs[first].data, 1)?;
        self.compress_seg::<P, S>(w, segs, first, 2, run)?;

        for idx in first + 1..segs.len() {
            self.compress_seg::<P, S>(w, segs, idx, 0, LiteralRun::default())?;
        }
        Ok(())
    }

    fn compress_seg<P: SourcePixel, S: OutputSink + ?Sized>(
        &mut self,
        w: &mut Writer<'_, S>,
        segs: &[Segment<'_>],
        s: usize,
        start: usize,
        mut run: LiteralRun,
    ) -> Result<()> {
        let seg = &segs[s];
        let limit = seg.units.saturating_sub(LIMIT_OFFSET);
        let bound = seg.units.saturating_sub(BOUND_OFFSET);

        let mut ip = start;
        while ip < limit {
            let anchor = ip;
            match self.find_match::<P>(segs, s, anchor, bound) {
                Some((len, distance)) => {
                    run.close(w);
                    put_match(w, len - P::LEN_BIAS, distance - 1)?;
                    ip = anchor + len;
                    for pos in [ip - 2, ip - 1] {
                        if pos > anchor {
                            self.table.set(P::hash(seg.data, pos), SegPos { seg: s, off: pos });
                        }
                    }
                }
                None => {
                    run.push::<P, S>(w, seg.data, ip)?;
                    ip += 1;
                }
            }
        }

        while ip < seg.units {
            run.push::<P, S>(w, seg.data, ip)?;
            ip += 1;
        }
        run.close(w);
        Ok(())
    }

    /// Looks for a match starting at unit `ip` of segment `s`; returns its
    /// length and unbiased distance in units.
    fn find_match<P: SourcePixel>(
        &mut self,
        segs: &[Segment<'_>],
        s: usize,
        ip: usize,
        bound: usize,
    ) -> Option<(usize, usize)> {
        let seg = &segs[s];
        let data = seg.data;
        let room = bound - 1 - ip;

        // Runs of one value are matched against the previous unit
        if ip > 0 {
            let x = P::key(data, ip - 1);
            if P::key(data, ip) == x && P::key(data, ip + 1) == x && P::key(data, ip + 2) == x {
                let len = 3 + match_len::<P>(data, ip + 3, data, ip + 2, room - 3);
                return Some((len, 1));
            }
        }

        let here = SegPos { seg: s, off: ip };
        let cand = self.table.replace(P::hash(data, ip), here);
        let cand_seg = &segs[cand.seg];
        let distance = (seg.size_delta + ip).checked_sub(cand_seg.size_delta + cand.off)?;
        if distance == 0 || distance >= MAX_FARDISTANCE {
            return None;
        }

        let mut min = P::MIN_MATCH;
        if distance >= MAX_DISTANCE {
            min += P::FAR_EXTRA;
        }
        let max = room.min(cand_seg.units - cand.off);
        let len = match_len::<P>(data, ip, cand_seg.data, cand.off, max);
        (len >= min).then_some((len, distance))
    }
}

/// Writes a match control group for length code `code` and biased distance
/// `d`.
#[allow(clippy::cast_possible_truncation)] // fields are masked to their widths
fn put_match<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, code: usize, d: usize) -> Result<()> {
    if d < MAX_DISTANCE {
        if code < 7 {
            w.put_u8(((code << 5) + (d >> 8)) as u8)?;
        } else {
            w.put_u8(((7 << 5) + (d >> 8)) as u8)?;
            put_length_ext(w, code)?;
        }
        w.put_u8((d & 255) as u8)
    } else {
        let far = d - MAX_DISTANCE;
        if code < 7 {
            w.put_u8(((code << 5) + 31) as u8)?;
        } else {
            w.put_u8((7 << 5) + 31)?;
            put_length_ext(w, code)?;
        }
        w.put_u8(255)?;
        w.put_u8((far >> 8) as u8)?;
        w.put_u8((far & 255) as u8)
    }
}

/// Splits the delivered line batches into segments, checking they are whole
/// lines adding up to the image height.
fn collect_segments<'a, L: LineSource<'a>>(
    params: &ImageParams,
    mut lines: L,
) -> Result<Vec<Segment<'a>>> {
    let stride = params.stride as usize;
    let bpp = params.image_type.bytes_per_pixel();
    let height = params.height as usize;

    let mut segs = Vec::new();
    let mut lines_seen = 0;
    let mut size_delta = 0;
    while let Some(batch) = lines.more_lines() {
        if batch.is_empty() {
            continue;
        }
        if batch.len() % stride != 0 {
            return Err(CodecError::invalid(format!(
                "line batch of {} bytes is not a whole number of {stride}-byte lines",
                batch.len()
            )));
        }
        lines_seen += batch.len() / stride;
        if lines_seen > height {
            return Err(CodecError::invalid(format!(
                "more than {height} lines delivered"
            )));
        }
        let units = batch.len() / bpp;
        segs.push(Segment { data: batch, units, size_delta });
        size_delta += units;
    }
    if lines_seen != height {
        return Err(CodecError::invalid(format!(
            "{lines_seen} lines delivered for an image of height {height}"
        )));
    }
    Ok(segs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Budget, Unbounded};

    fn encode_one(params: &ImageParams, data: &[u8]) -> Bytes {
        LzEncoder::new()
            .encode(params, std::iter::once(data), &mut Unbounded)
            .unwrap()
    }

    #[test]
    fn test_black_rgb32_fixture() {
        let params = ImageParams::new(LzImageType::Rgb32, 4, 4, true);
        let data = vec![0u8; 4 * 4 * 4];
        let bytes = encode_one(&params, &data);

        assert_eq!(bytes.len(), 28 + 20);
        assert_eq!(
            &bytes[28..],
            &[
                0x01, 0, 0, 0, 0, 0, 0, // two literals
                0xE0, 0x04, 0x00, // eleven pixels at distance one
                0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, // three literals
            ]
        );
    }

    #[test]
    fn test_tiny_image_is_literal_block() {
        let params = ImageParams::new(LzImageType::Plt8, 3, 1, true);
        let bytes = encode_one(&params, &[7, 8, 9]);
        assert_eq!(&bytes[28..], &[2, 7, 8, 9]);
    }

    #[test]
    fn test_far_match_uses_escape() {
        // A pattern, a long zero run, then the pattern again 9064 units back
        let pattern: Vec<u8> = (0..64u32).map(|i| (1 + i * 97 % 250) as u8).collect();
        let mut data = pattern.clone();
        data.resize(9064, 0);
        data.extend_from_slice(&pattern);
        let width = u32::try_from(data.len()).unwrap();
        let params = ImageParams::new(LzImageType::A8, width, 1, true);
        let bytes = encode_one(&params, &data);

        // 9064 - 1 - MAX_DISTANCE = 0x0368
        assert!(bytes.windows(3).any(|w| w == [255, 0x03, 0x68]));
        assert!(bytes.len() < 28 + 120);
    }

    #[test]
    fn test_rejects_partial_lines() {
        let params = ImageParams::new(LzImageType::Rgb24, 2, 2, true);
        let data = vec![0u8; 9];
        let result = LzEncoder::new().encode(&params, std::iter::once(&data[..]), &mut Unbounded);
        assert!(matches!(result, Err(CodecError::InvalidParameters(_))));
    }

    #[test]
    fn test_rejects_missing_lines() {
        let params = ImageParams::new(LzImageType::Rgb24, 2, 3, true);
        let data = vec![0u8; 12];
        let result = LzEncoder::new().encode(&params, std::iter::once(&data[..]), &mut Unbounded);
        assert!(matches!(result, Err(CodecError::InvalidParameters(_))));
    }

    #[test]
    fn test_out_of_space() {
        let params = ImageParams::new(LzImageType::Rgb32, 8, 8, true);
        let data: Vec<u8> = (0..=255u8).collect();
        let result = LzEncoder::new().encode(&params, std::iter::once(&data[..]), &mut Budget::new(40));
        assert_eq!(result, Err(CodecError::OutOfSpace));
    }

    #[test]
    fn test_segments_match_across_batches() {
        let params = ImageParams::new(LzImageType::Rgb24, 16, 2, true);
        let line: Vec<u8> = (0..48u8).collect();
        let batches: [&[u8]; 2] = [&line, &line];
        let split = LzEncoder::new().encode(&params, batches.into_iter(), &mut Unbounded).unwrap();

        // The second line is one match back into the first segment
        let literal_only = 28 + 2 * (1 + 16 * 3);
        assert!(split.len() < literal_only);
    }

    /// De Bruijn sequence over `k` symbols: every run of `n` appears once.
    fn de_bruijn(k: u8, n: usize) -> Vec<u8> {
        fn step(t: usize, p: usize, k: u8, n: usize, a: &mut [u8], out: &mut Vec<u8>) {
            if t > n {
                if n % p == 0 {
                    out.extend_from_slice(&a[1..=p]);
                }
                return;
            }
            a[t] = a[t - p];
            step(t + 1, p, k, n, a, out);
            for j in a[t - p] + 1..k {
                a[t] = j;
                step(t + 1, t, k, n, a, out);
            }
        }
        let mut a = vec![0; n + 1];
        let mut out = Vec::new();
        step(1, 1, k, n, &mut a, &mut out);
        out
    }

    #[test]
    fn test_repeated_rows_of_few_colours_match_whole() {
        // Four colours, each run of three distinct within a row
        let row: Vec<u8> = de_bruijn(4, 3)
            .into_iter()
            .flat_map(|c| [c * 60, 255 - c * 50, c * 17 + 3, 0])
            .collect();
        assert_eq!(row.len(), 64 * 4);
        let data = row.repeat(16);
        let params = ImageParams::new(LzImageType::Rgb32, 64, 16, true);
        let bytes = encode_one(&params, &data);

        // First row as literals, the other fifteen as a match one row back
        assert!(bytes.len() < 28 + 2 + 64 * 3 + 64, "{} bytes", bytes.len());
        let image = crate::decoding::decode(&bytes, LzImageType::Rgb32, None).unwrap();
        assert_eq!(&image.pixels[..], &data[..]);
    }
}
