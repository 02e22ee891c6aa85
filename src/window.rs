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

//! Decoder-side GLZ window: the history of decoded images later images may
//! reference.
//!
//! The window is a direct-mapped table indexed by `id mod capacity`, with a
//! power-of-two capacity that doubles whenever a new image lands on an
//! occupied slot. It tracks:
//!
//! - `oldest`: no image below this id is held, or will be accepted.
//! - `tail_gap`: the first id not yet contiguously present.
//!
//! After each insertion the decoder releases everything older than the image
//! just below `tail_gap` says any later image may reference.
//!
//! # Waiting
//!
//! A decode that references an image not yet inserted suspends on a per-id
//! rendezvous instead of polling. [`GlzWindow::add`] completes exactly the
//! waits registered for the inserted id; no other waiter is woken. A pending
//! wait holds only a weak reference to the window, and clearing or dropping
//! the window completes it with [`CodecError::WaitCancelled`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{CodecError, Result};
use crate::protocol::{GlzHeader, INIT_WINDOW_CAPACITY, MAX_WINDOW_CAPACITY};

/// A decoded GLZ image held by the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlzImage {
    /// Header the image was decoded from.
    pub header: GlzHeader,
    /// RGB32 (or RGBA) pixels, 4 bytes each, `header.gross_pixels()` of them.
    pub pixels: Bytes,
}

impl GlzImage {
    /// Image id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.header.id
    }

    /// Number of pixels in the buffer.
    #[must_use]
    pub fn gross_pixels(&self) -> usize {
        self.pixels.len() / 4
    }
}

type Waiter = oneshot::Sender<Result<Arc<GlzImage>>>;

struct WindowState {
    images: Vec<Option<Arc<GlzImage>>>,
    oldest: u64,
    tail_gap: u64,
    /// No image has been added since creation or the last clear.
    fresh: bool,
    waiters: HashMap<u64, Vec<Waiter>>,
}

impl WindowState {
    fn new() -> Self {
        Self {
            images: vec![None; INIT_WINDOW_CAPACITY],
            oldest: 0,
            tail_gap: 0,
            fresh: true,
            waiters: HashMap::new(),
        }
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)] // masked to the capacity
    fn slot(&self, id: u64) -> usize {
        (id & (self.images.len() as u64 - 1)) as usize
    }

    fn get(&self, id: u64) -> Option<&Arc<GlzImage>> {
        self.images[self.slot(id)].as_ref().filter(|image| image.id() == id)
    }

    fn grow(&mut self) -> Result<()> {
        let capacity = self.images.len() * 2;
        if capacity > MAX_WINDOW_CAPACITY {
            return Err(CodecError::WindowOverflow(format!(
                "window would grow past {MAX_WINDOW_CAPACITY} images"
            )));
        }
        let mut images = vec![None; capacity];
        for image in self.images.drain(..).flatten() {
            #[allow(clippy::cast_possible_truncation)] // masked to the capacity
            let slot = (image.id() & (capacity as u64 - 1)) as usize;
            images[slot] = Some(image);
        }
        log::debug!("GLZ window resized to {capacity} slots");
        self.images = images;
        Ok(())
    }

    fn advance_tail(&mut self) {
        while self.get(self.tail_gap).is_some() {
            self.tail_gap += 1;
        }
    }

    fn release(&mut self, oldest_needed: u64) {
        if oldest_needed <= self.oldest {
            return;
        }
        let mut freed = 0;
        for slot in &mut self.images {
            if slot.as_ref().is_some_and(|image| image.id() < oldest_needed) {
                *slot = None;
                freed += 1;
            }
        }
        self.oldest = oldest_needed;
        if self.tail_gap < oldest_needed {
            self.tail_gap = oldest_needed;
            self.advance_tail();
        }

        self.fail_waits_below(oldest_needed);
        if freed > 0 {
            log::debug!("GLZ window released {freed} images below {oldest_needed}");
        }
    }

    /// Fails every wait for an id below `oldest`; those images never arrive.
    fn fail_waits_below(&mut self, oldest: u64) {
        let stale: Vec<u64> = self.waiters.keys().copied().filter(|&id| id < oldest).collect();
        for id in stale {
            for tx in self.waiters.remove(&id).unwrap_or_default() {
                // The waiting side may have gone away
                let _ = tx.send(Err(CodecError::corrupt(format!(
                    "image {id} is below the window ({oldest})"
                ))));
            }
        }
    }
}

/// Decoder-side GLZ window.
///
/// Clones share the same window.
#[derive(Clone)]
pub struct GlzWindow {
    inner: Arc<Mutex<WindowState>>,
}

impl Default for GlzWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlzWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = lock(&self.inner);
        f.debug_struct("GlzWindow")
            .field("capacity", &st.images.len())
            .field("oldest", &st.oldest)
            .field("tail_gap", &st.tail_gap)
            .finish_non_exhaustive()
    }
}

fn lock(inner: &Mutex<WindowState>) -> MutexGuard<'_, WindowState> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl GlzWindow {
    /// Creates an empty window of [`INIT_WINDOW_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(WindowState::new())) }
    }

    /// Inserts a decoded image and completes the waits registered for its id.
    ///
    /// The first image after creation or [`clear`](Self::clear) sets the
    /// starting point of `oldest` and `tail_gap`, failing waits for ids
    /// below that `oldest`.
    ///
    /// # Errors
    ///
    /// - [`CodecError::CorruptStream`] for an id already present or below
    ///   `oldest`.
    /// - [`CodecError::WindowOverflow`] if making room would grow the window
    ///   past [`MAX_WINDOW_CAPACITY`].
    pub fn add(&self, image: Arc<GlzImage>) -> Result<()> {
        let id = image.id();
        let mut st = lock(&self.inner);
        if st.fresh {
            let oldest = image.header.oldest_reference();
            st.oldest = oldest;
            st.tail_gap = id;
            st.fail_waits_below(oldest);
        }
        if id < st.oldest {
            return Err(CodecError::corrupt(format!(
                "image {id} is older than the window ({})",
                st.oldest
            )));
        }
        if st.get(id).is_some() {
            return Err(CodecError::corrupt(format!("image {id} added twice")));
        }
        while st.images[st.slot(id)].is_some() {
            st.grow()?;
        }

        let slot = st.slot(id);
        st.images[slot] = Some(Arc::clone(&image));
        st.fresh = false;
        st.advance_tail();

        if let Some(waiters) = st.waiters.remove(&id) {
            log::trace!("GLZ image {id} wakes {} waiters", waiters.len());
            for tx in waiters {
                // The waiting side may have gone away
                let _ = tx.send(Ok(Arc::clone(&image)));
            }
        }
        log::debug!(
            "GLZ window added image {id} (tail_gap {}, oldest {})",
            st.tail_gap,
            st.oldest
        );
        Ok(())
    }

    /// Frees every image with an id below `oldest_needed`.
    ///
    /// Waits for released ids can never complete and fail as corrupt.
    pub fn release(&self, oldest_needed: u64) {
        lock(&self.inner).release(oldest_needed);
    }

    /// Releases what the image just below `tail_gap` no longer allows later
    /// images to reference.
    pub fn release_for_tail(&self) {
        let mut st = lock(&self.inner);
        let Some(last) = st.tail_gap.checked_sub(1) else {
            return;
        };
        let Some(oldest_needed) = st.get(last).map(|image| image.header.oldest_reference()) else {
            return;
        };
        st.release(oldest_needed);
    }

    /// Returns a future that completes with image `id` once it is in the
    /// window.
    #[must_use]
    pub fn wait_for(&self, id: u64) -> ImageWait {
        let (tx, rx) = oneshot::channel();
        let mut st = lock(&self.inner);
        if let Some(image) = st.get(id) {
            let _ = tx.send(Ok(Arc::clone(image)));
        } else if id < st.oldest {
            let _ = tx.send(Err(CodecError::corrupt(format!("image {id} was released"))));
        } else {
            log::trace!("waiting for GLZ image {id}");
            st.waiters.entry(id).or_default().push(tx);
        }
        ImageWait { id, rx, window: Arc::downgrade(&self.inner) }
    }

    /// Resolves a cross-image reference of `len` pixels at `pixel_offset`
    /// inside the image `image_distance` ids before `current_id`, waiting for
    /// that image if it has not been inserted yet.
    ///
    /// # Errors
    ///
    /// - [`CodecError::CorruptStream`] for a zero distance, a target below
    ///   `oldest`, or a range outside the target image.
    /// - [`CodecError::WaitCancelled`] if the window is cleared or dropped
    ///   during the wait.
    pub async fn resolve(
        &self,
        current_id: u64,
        image_distance: u64,
        pixel_offset: usize,
        len: usize,
    ) -> Result<Arc<GlzImage>> {
        if image_distance == 0 {
            return Err(CodecError::corrupt("in-image reference resolved through the window"));
        }
        let target = current_id.checked_sub(image_distance).ok_or_else(|| {
            CodecError::corrupt(format!("image {current_id} references {image_distance} images back"))
        })?;

        let image = self.wait_for(target).await?;
        if pixel_offset + len > image.gross_pixels() {
            return Err(CodecError::corrupt(format!(
                "reference to pixels {}..{} of image {target} with {}",
                pixel_offset,
                pixel_offset + len,
                image.gross_pixels()
            )));
        }
        Ok(image)
    }

    /// Drops every image and cancels every pending wait.
    pub fn clear(&self) {
        let mut st = lock(&self.inner);
        let cancelled: usize = st.waiters.values().map(Vec::len).sum();
        *st = WindowState::new();
        if cancelled > 0 {
            log::warn!("GLZ window cleared with {cancelled} pending waits");
        }
        log::debug!("GLZ window cleared");
    }

    /// Returns the image with `id` if it is held.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<Arc<GlzImage>> {
        lock(&self.inner).get(id).cloned()
    }

    /// Current number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        lock(&self.inner).images.len()
    }

    /// Number of images held.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).images.iter().flatten().count()
    }

    /// Returns `true` if no image is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Smallest id the window still accepts.
    #[must_use]
    pub fn oldest(&self) -> u64 {
        lock(&self.inner).oldest
    }

    /// First id not yet contiguously present.
    #[must_use]
    pub fn tail_gap(&self) -> u64 {
        lock(&self.inner).tail_gap
    }

    /// Number of waits still registered and alive.
    #[must_use]
    pub fn pending_waits(&self) -> usize {
        lock(&self.inner)
            .waiters
            .values()
            .flatten()
            .filter(|tx| !tx.is_closed())
            .count()
    }
}

/// A pending wait for an image; see [`GlzWindow::wait_for`].
///
/// Dropping it before completion withdraws the registration.
#[must_use = "futures do nothing unless polled"]
pub struct ImageWait {
    id: u64,
    rx: oneshot::Receiver<Result<Arc<GlzImage>>>,
    window: Weak<Mutex<WindowState>>,
}

impl Future for ImageWait {
    type Output = Result<Arc<GlzImage>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                log::warn!("wait for GLZ image {} cancelled", self.id);
                Poll::Ready(Err(CodecError::WaitCancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ImageWait {
    fn drop(&mut self) {
        self.rx.close();
        let Some(inner) = self.window.upgrade() else {
            return;
        };
        let mut st = lock(&inner);
        if let Some(list) = st.waiters.get_mut(&self.id) {
            list.retain(|tx| !tx.is_closed());
            if list.is_empty() {
                st.waiters.remove(&self.id);
            }
        }
    }
}
