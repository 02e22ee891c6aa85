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

//! Encodes two successive frames with GLZ and decodes them through a window.
//!
//! Run with `RUST_LOG=debug cargo run --example roundtrip` to see the codec's
//! own logging.

use lzimage::{GlzDecoder, GlzEncoder, GlzWindow, ImageParams, LzEncoder, LzImageType, Unbounded};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 128;

/// A gradient with a moving square.
fn frame(offset: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity((WIDTH * HEIGHT * 4) as usize);
    for y in 0..HEIGHT {
        for x in 0..WIDTH {
            let inside = (offset..offset + 32).contains(&x) && (48..80).contains(&y);
            #[allow(clippy::cast_possible_truncation)]
            let pixel = if inside { [0, 0, 255, 0] } else { [x as u8, y as u8, (x ^ y) as u8, 0] };
            data.extend_from_slice(&pixel);
        }
    }
    data
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let params = ImageParams::new(LzImageType::Rgb32, WIDTH, HEIGHT, true);
    let frames = [frame(16), frame(24)];

    let mut encoder = GlzEncoder::default();
    let decoder = GlzDecoder::new(GlzWindow::new());
    for data in &frames {
        // Each line is handed over as its own batch
        let lz = LzEncoder::new().encode(&params, data.chunks(params.stride as usize), &mut Unbounded)?;
        let glz = encoder.encode(&params, data.chunks(params.stride as usize), &mut Unbounded)?;
        let image = decoder.decode(&glz.bytes, None).await?;

        if image.pixels[..] != data[..] {
            return Err(format!("frame {} did not survive the round trip", glz.id).into());
        }
        log::info!(
            "frame {}: raw {} bytes, LZ {} bytes, GLZ {} bytes",
            glz.id,
            data.len(),
            lz.len(),
            glz.bytes.len()
        );
    }

    log::info!(
        "window holds {} images, oldest {}",
        decoder.window().len(),
        decoder.window().oldest()
    );
    Ok(())
}
