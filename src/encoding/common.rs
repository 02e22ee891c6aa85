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

//! Match-finder pieces shared by the LZ and GLZ encoders.

use crate::error::Result;
use crate::io::{OutputSink, Writer};
use crate::pixel::SourcePixel;
use crate::protocol::{HASH_SIZE, MAX_COPY};

/// Units at the end of a segment that are never the start of a match.
pub(crate) const LIMIT_OFFSET: usize = 6;

/// Units at the end of a segment a match never reaches into.
pub(crate) const BOUND_OFFSET: usize = 2;

/// Single-candidate dictionary: one entry per hash bucket, overwritten on
/// every lookup.
pub(crate) struct HashTable<E: Copy> {
    slots: Vec<E>,
}

impl<E: Copy> HashTable<E> {
    pub(crate) fn new(fill: E) -> Self {
        Self { slots: vec![fill; HASH_SIZE] }
    }

    pub(crate) fn fill(&mut self, entry: E) {
        self.slots.fill(entry);
    }

    /// Returns the previous entry of `bucket` and stores `entry` in its place.
    #[inline]
    pub(crate) fn replace(&mut self, bucket: u32, entry: E) -> E {
        std::mem::replace(&mut self.slots[bucket as usize], entry)
    }

    #[inline]
    pub(crate) fn set(&mut self, bucket: u32, entry: E) {
        self.slots[bucket as usize] = entry;
    }
}

/// An open run of literal units.
///
/// The count byte is reserved when the first literal is written and patched
/// with `count - 1` when the run closes, so an empty run costs nothing.
#[derive(Default)]
pub(crate) struct LiteralRun {
    slot: Option<usize>,
    count: usize,
}

impl LiteralRun {
    /// Appends unit `i` of `data`, closing the run once it reaches `MAX_COPY`.
    #[inline]
    pub(crate) fn push<P: SourcePixel, S: OutputSink + ?Sized>(
        &mut self,
        w: &mut Writer<'_, S>,
        data: &[u8],
        i: usize,
    ) -> Result<()> {
        if self.slot.is_none() {
            self.slot = Some(w.reserve_slot()?);
        }
        P::put(w, data, i)?;
        self.count += 1;
        if self.count == MAX_COPY {
            self.close(w);
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)] // count never exceeds MAX_COPY
    pub(crate) fn close<S: OutputSink + ?Sized>(&mut self, w: &mut Writer<'_, S>) {
        if let Some(slot) = self.slot.take() {
            w.patch(slot, (self.count - 1) as u8);
        }
        self.count = 0;
    }
}

/// Writes the continuation bytes of a length code of 7 or more.
pub(crate) fn put_length_ext<S: OutputSink + ?Sized>(w: &mut Writer<'_, S>, code: usize) -> Result<()> {
    let mut rest = code - 7;
    while rest >= 255 {
        w.put_u8(255)?;
        rest -= 255;
    }
    #[allow(clippy::cast_possible_truncation)] // rest < 255
    w.put_u8(rest as u8)
}

/// Counts equal units of `cur` from `at` and `refs` from `ref_at`, up to `max`.
#[inline]
pub(crate) fn match_len<P: SourcePixel>(
    cur: &[u8],
    at: usize,
    refs: &[u8],
    ref_at: usize,
    max: usize,
) -> usize {
    let mut len = 0;
    while len < max && P::key(refs, ref_at + len) == P::key(cur, at + len) {
        len += 1;
    }
    len
}
