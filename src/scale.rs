// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resampling of packed ARGB images.  Used to bring supersampled
//! exports back down to their requested size.

use std::str::FromStr;

use itertools::iproduct;

use crate::errors::{pixel_count, EngineError};

/// How exports rendered larger than requested are brought back down.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Bilinear,
}

impl Default for Filter {
    fn default() -> Self {
        Filter::Bilinear
    }
}

impl FromStr for Filter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Filter::Nearest),
            "bilinear" => Ok(Filter::Bilinear),
            _ => Err(format!("Unknown filter '{}'", s)),
        }
    }
}

pub fn resample(
    filter: Filter,
    pixels: &[u32],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Result<Vec<u32>, EngineError> {
    match filter {
        Filter::Nearest => nearest(pixels, width, height, new_width, new_height),
        Filter::Bilinear => bilinear(pixels, width, height, new_width, new_height),
    }
}

fn check(pixels: &[u32], width: usize, height: usize) -> Result<(), EngineError> {
    if pixel_count(width, height)? != pixels.len() {
        return Err(EngineError::InvalidDimensions { width, height });
    }
    Ok(())
}

/// Source coordinate of the centre of destination cell `dst`, clamped
/// to the source image.
fn source_coordinate(dst: usize, dst_len: usize, src_len: usize) -> f32 {
    let scale = src_len as f32 / dst_len as f32;
    let pos = (dst as f32 + 0.5) * scale - 0.5;
    num::clamp(pos, 0.0, (src_len - 1) as f32)
}

pub fn nearest(
    pixels: &[u32],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Result<Vec<u32>, EngineError> {
    check(pixels, width, height)?;
    pixel_count(new_width, new_height)?;
    Ok(iproduct!(0..new_height, 0..new_width)
        .map(|(y, x)| {
            let sx = (x * width / new_width).min(width - 1);
            let sy = (y * height / new_height).min(height - 1);
            pixels[sy * width + sx]
        })
        .collect())
}

fn channel(pixel: u32, shift: u32) -> f32 {
    ((pixel >> shift) & 0xff) as f32
}

/// Bilinear resampling; every channel, alpha included, is interpolated
/// separately and rounded to the nearest value.
pub fn bilinear(
    pixels: &[u32],
    width: usize,
    height: usize,
    new_width: usize,
    new_height: usize,
) -> Result<Vec<u32>, EngineError> {
    check(pixels, width, height)?;
    pixel_count(new_width, new_height)?;
    Ok(iproduct!(0..new_height, 0..new_width)
        .map(|(y, x)| {
            let fx = source_coordinate(x, new_width, width);
            let fy = source_coordinate(y, new_height, height);
            let (x0, y0) = (fx as usize, fy as usize);
            let (x1, y1) = ((x0 + 1).min(width - 1), (y0 + 1).min(height - 1));
            let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);

            let corners = [
                pixels[y0 * width + x0],
                pixels[y0 * width + x1],
                pixels[y1 * width + x0],
                pixels[y1 * width + x1],
            ];
            [24, 16, 8, 0].iter().fold(0u32, |acc, &shift| {
                let top = channel(corners[0], shift) * (1.0 - tx) + channel(corners[1], shift) * tx;
                let bottom =
                    channel(corners[2], shift) * (1.0 - tx) + channel(corners[3], shift) * tx;
                let value = (top * (1.0 - ty) + bottom * ty).round() as u32;
                acc | value.min(0xff) << shift
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: u32 = 0xffff_0000;
    const BLUE: u32 = 0xff00_00ff;

    #[test]
    fn nearest_duplicates_pixels_when_enlarging() {
        let out = nearest(&[RED, BLUE], 2, 1, 4, 2).unwrap();
        assert_eq!(out, vec![RED, RED, BLUE, BLUE, RED, RED, BLUE, BLUE]);
    }

    #[test]
    fn nearest_picks_a_source_pixel_when_shrinking() {
        let src: Vec<u32> = (0..16).collect();
        let out = nearest(&src, 4, 4, 2, 2).unwrap();
        assert_eq!(out, vec![0, 2, 8, 10]);
    }

    #[test]
    fn bilinear_averages_a_halved_image() {
        let src = vec![0xff00_0000, 0xff64_0000, 0xff00_0000, 0xff64_0000];
        let out = bilinear(&src, 2, 2, 1, 1).unwrap();
        assert_eq!(out, vec![0xff32_0000]);
    }

    #[test]
    fn bilinear_keeps_flat_images_flat() {
        let src = vec![BLUE; 6 * 4];
        let out = bilinear(&src, 6, 4, 13, 9).unwrap();
        assert!(out.iter().all(|&p| p == BLUE));
    }

    #[test]
    fn edges_clamp_instead_of_wrapping() {
        let out = bilinear(&[RED, BLUE], 2, 1, 8, 1).unwrap();
        assert_eq!(out[0], RED);
        assert_eq!(out[7], BLUE);
    }

    #[test]
    fn filters_parse_and_dispatch() {
        assert_eq!("nearest".parse::<Filter>(), Ok(Filter::Nearest));
        assert_eq!("bilinear".parse::<Filter>(), Ok(Filter::Bilinear));
        assert!("cubic".parse::<Filter>().is_err());

        let src = vec![0xff00_0000, 0xff64_0000, 0xff00_0000, 0xff64_0000];
        let sharp = resample(Filter::Nearest, &src, 2, 2, 1, 1).unwrap();
        let smooth = resample(Filter::default(), &src, 2, 2, 1, 1).unwrap();
        assert_eq!(sharp, vec![0xff00_0000]);
        assert_eq!(smooth, vec![0xff32_0000]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        assert!(nearest(&[RED; 3], 2, 2, 1, 1).is_err());
        assert!(bilinear(&[RED; 4], 2, 2, 0, 1).is_err());
    }
}
