// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Turns iteration counts into colors, and mixes colors together.
//!
//! Pixels are packed `0xAARRGGBB`.  Generated pixels are always fully
//! opaque.

/// Alpha bits of a fully opaque pixel.
pub const OPAQUE: u32 = 0xff00_0000;
/// Points inside the set.
pub const BLACK: u32 = OPAQUE;

#[inline]
fn pack(r: f32, g: f32, b: f32) -> u32 {
    OPAQUE | ((r * 255.0) as u32) << 16 | ((g * 255.0) as u32) << 8 | (b * 255.0) as u32
}

/// Maps an iteration count to a color.  The hue grows with the square
/// root of the count, so bands get wider the deeper into the set a
/// point sits; saturation and value are always full.
pub fn color_map(iterations: u32, max_iterations: u32) -> u32 {
    if iterations >= max_iterations {
        return BLACK;
    }

    let hue = ((iterations as f32).sqrt() * 10.0).floor() % 360.0;
    let sector = hue / 60.0;
    let x = sector - sector.floor();

    let (r, g, b) = match sector as u32 {
        0 => (1.0, x, 0.0),
        1 => (1.0 - x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, 1.0 - x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, 1.0 - x),
    };
    pack(r, g, b)
}

#[inline]
fn channel(color: u32, shift: u32) -> f32 {
    ((color >> shift) & 0xff) as f32
}

/// Mix `sample` into `base`, giving the sample weight `ratio`.  Each
/// channel is truncated back to eight bits; alpha is forced opaque.
pub fn blend(base: u32, sample: u32, ratio: f32) -> u32 {
    let keep = 1.0 - ratio;
    let mix = |shift: u32| {
        let value = channel(base, shift) * keep + channel(sample, shift) * ratio;
        (value as u32).min(0xff) << shift
    };
    OPAQUE | mix(16) | mix(8) | mix(0)
}

/// Splits a pixel buffer into tightly packed 8-bit RGB triples, the
/// layout image encoders want.
pub fn to_rgb8(pixels: &[u32]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(pixels.len() * 3);
    for &pixel in pixels {
        rgb.push((pixel >> 16) as u8);
        rgb.push((pixel >> 8) as u8);
        rgb.push(pixel as u8);
    }
    rgb
}
