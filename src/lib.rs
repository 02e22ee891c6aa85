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


//! # lzimage
//!
//! A pure Rust implementation of the LZ and GLZ lossless image codecs used by
//! SPICE-style remote-display protocols.
//!
//! LZ compresses one image on its own. GLZ adds references into images sent
//! earlier on the same channel: the encoder keeps a dictionary of recent
//! images and the decoder keeps a matching [`GlzWindow`], waiting when an image
//! references one that has not been decoded yet.
//!
//! ## Features
//!
//! - **Pixel formats**: PLT1 (LE/BE), PLT4 (LE/BE), PLT8, RGB16, RGB24,
//!   RGB32, RGBA, XXXA and A8
//! - **Widening on decode**: palette, RGB16, RGB24 and A8 images decode
//!   straight to RGB32
//! - **Segmented input**: scanlines arrive in batches and are never copied
//!   into one buffer by the LZ encoder
//! - **Bounded output**: encoders draw space from an [`OutputSink`]
//! - **Async window**: cross-image references resolve through a Tokio
//!   rendezvous, one waiter per referenced id
//!
//! ## Quick Start
//!
//! ```no_run
//! use lzimage::{GlzDecoder, GlzEncoder, GlzWindow, ImageParams, LzImageType, Unbounded};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let params = ImageParams::new(LzImageType::Rgb32, 64, 64, true);
//!     let frame = vec![0u8; 64 * 64 * 4];
//!
//!     let mut encoder = GlzEncoder::default();
//!     let encoded = encoder.encode(&params, std::iter::once(&frame[..]), &mut Unbounded)?;
//!
//!     let decoder = GlzDecoder::new(GlzWindow::new());
//!     let image = decoder.decode(&encoded.bytes, None).await?;
//!     assert_eq!(image.pixels.len(), frame.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────┐            ┌───────────────────────┐
//! │  LzEncoder/GlzEncoder │            │  decode / GlzDecoder  │
//! │                       │   bytes    │                       │
//! │  • hash match finder  │ ─────────► │  • bounds-checked     │
//! │  • GLZ dictionary     │            │    copies             │
//! └──────────┬────────────┘            └──────────┬────────────┘
//!            │                                    │
//!            ▼                                    ▼
//! ┌───────────────────────┐            ┌───────────────────────┐
//! │  pixel / translate    │            │       GlzWindow       │
//! │                       │            │                       │
//! │  • per-format units   │            │  • images by id       │
//! │  • RGB32 widening     │            │  • waits per id       │
//! └───────────────────────┘            └───────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decoding;
pub mod encoding;
pub mod error;
pub mod io;
pub mod protocol;
pub mod translate;
pub mod window;

// Internal modules
mod pixel;

// Re-exports
pub use decoding::{decode, decode_header, decode_into, DecodedImage, GlzDecoder};
pub use encoding::{GlzEncoded, GlzEncoder, GlzEncoderConfig, LzEncoder};
pub use error::{CodecError, Result};
pub use io::{Budget, ByteSource, LineSource, OutputSink, Reader, Unbounded};
pub use protocol::{GlzHeader, ImageParams, LzHeader, LzImageType};
pub use translate::Palette;
pub use window::{GlzImage, GlzWindow, ImageWait};
