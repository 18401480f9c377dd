// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Contains the Viewport, a rectangle on the complex plane, and the
//! PlaneMapper, which describes the relationship between a rectangle
//! on the integral plane with an origin at 0,0 (the pixels of an
//! image) and the viewport it is looking at.
//!
//! Every backend maps pixels to points through `PlaneMapper`, so that
//! two backends handed the same viewport and resolution iterate the
//! exact same complex numbers.

use num::Complex;

/// A rectangle in complex-plane coordinates.  `x`/`y` is the corner
/// that pixel (0, 0) maps onto; `w`/`h` are its extent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Viewport {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Viewport { x, y, w, h }
    }

    /// The starting view: four units wide, starting at -2.5 on the
    /// real axis, with a height that preserves the pixel aspect ratio
    /// and is centered on the real axis.
    pub fn initial(width: usize, height: usize) -> Self {
        let ratio = width as f32 / height as f32;
        let h = 4.0 / ratio;
        Viewport::new(-2.5, -h / 2.0, 4.0, h)
    }

    /// Move by a fraction of the current extent.
    pub fn pan(&mut self, fraction_x: f32, fraction_y: f32) {
        self.x += self.w * fraction_x;
        self.y += self.h * fraction_y;
    }

    /// Move by a pixel delta, as when dragging the image around.  The
    /// image follows the pointer, so the view moves the other way.
    pub fn drag(&mut self, dx: i32, dy: i32, width: usize, height: usize) {
        self.x -= dx as f32 * self.w / width as f32;
        self.y -= dy as f32 * self.h / height as f32;
    }

    /// Scale the extent by `factor` while keeping the point at the
    /// given fractional anchor (0..1 in each axis) fixed on screen.
    /// `factor < 1` zooms in.
    pub fn zoom(&mut self, factor: f32, anchor_x: f32, anchor_y: f32) {
        self.x += (1.0 - factor) * anchor_x * self.w;
        self.y += (1.0 - factor) * anchor_y * self.h;
        self.w *= factor;
        self.h *= factor;
    }

    /// Keep the width, recompute the height for a new pixel aspect
    /// ratio around the current vertical center.  Resizing a window
    /// crops (or uncovers) the image rather than distorting it.
    pub fn fit_aspect(&mut self, width: usize, height: usize) {
        let ratio = width as f32 / height as f32;
        let h = self.w / ratio;
        self.y = self.y + self.h / 2.0 - h / 2.0;
        self.h = h;
    }
}

/// Describes the width and height of an integral plane that is assumed to start at
/// 0,0 and all values are assumed to be non-negative integers.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IntegralPlane(pub usize, pub usize);

/// Describes the x, y of a pixel in the integral plane.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pixel(pub usize, pub usize);

/// Maps pixels of an image of a given size onto the viewport.
#[derive(Copy, Clone, Debug)]
pub struct PlaneMapper {
    pub integral_plane: IntegralPlane,
    pub viewport: Viewport,
    // Pixel dimensions, already converted for the per-pixel divide.
    extent: (f32, f32),
}

impl PlaneMapper {
    pub fn new(width: usize, height: usize, viewport: Viewport) -> PlaneMapper {
        PlaneMapper {
            integral_plane: IntegralPlane(width, height),
            viewport,
            extent: (width as f32, height as f32),
        }
    }

    /// The real coordinate of every pixel in column `column`.
    #[inline]
    pub fn column_to_re(&self, column: usize) -> f32 {
        column as f32 / self.extent.0 * self.viewport.w + self.viewport.x
    }

    /// The imaginary coordinate of every pixel in row `row`.
    #[inline]
    pub fn row_to_im(&self, row: usize) -> f32 {
        row as f32 / self.extent.1 * self.viewport.h + self.viewport.y
    }

    /// Given a pixel on the integral cartesian plane, map that to a
    /// point on the complex cartesian plane.
    #[inline]
    pub fn pixel_to_point(&self, pixel: &Pixel) -> Complex<f32> {
        Complex::new(self.column_to_re(pixel.0), self.row_to_im(pixel.1))
    }

    /// Row-major offset into an image buffer to pixel.
    #[inline]
    pub fn offset_to_pixel(&self, offset: usize) -> Pixel {
        Pixel(offset % self.integral_plane.0, offset / self.integral_plane.0)
    }

    #[inline]
    pub fn offset_to_point(&self, offset: usize) -> Complex<f32> {
        self.pixel_to_point(&self.offset_to_pixel(offset))
    }
}
