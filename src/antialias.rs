// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Progressive antialiasing.
//!
//! After a full render, the same viewport is rendered up to eight more
//! times, each shifted by a fraction of a pixel, and every shifted
//! render is mixed into the displayed image.  Sample `n` is mixed in
//! with weight `1 / (n + 2)`, which keeps the displayed image an
//! (approximately) unweighted average of the original render and all
//! samples taken so far.
//!
//! The progression is fixed: first the four diagonal offsets of a
//! third of a pixel, then the four axis-aligned offsets of half a
//! pixel.

use crate::color::blend;
use crate::config::MAX_ANTIALIAS_SAMPLES;
use crate::planes::Viewport;

/// The viewport shifted for sample `index`, measured in pixels of an
/// image of `width` × `height`.  `None` for indices past the table.
pub fn shifted_viewport(
    viewport: Viewport,
    width: usize,
    height: usize,
    index: usize,
) -> Option<Viewport> {
    let pixel_w = viewport.w / width as f32;
    let pixel_h = viewport.h / height as f32;

    let (dx, dy) = match index {
        // Corners: bit 1 picks the x sign, bit 0 the y sign.
        0..=3 => {
            let sx = if index & 2 != 0 { 1.0 } else { -1.0 };
            let sy = if index & 1 != 0 { 1.0 } else { -1.0 };
            (sx * pixel_w / 3.0, sy * pixel_h / 3.0)
        }
        // Edges: +x, +y, -x, -y.
        4..=7 => {
            let sign = if index > 5 { -1.0 } else { 1.0 };
            if index % 2 == 0 {
                (sign * pixel_w / 2.0, 0.0)
            } else {
                (0.0, sign * pixel_h / 2.0)
            }
        }
        _ => return None,
    };

    Some(Viewport::new(viewport.x + dx, viewport.y + dy, viewport.w, viewport.h))
}

/// Weight given to sample `index` when it is blended in.
#[inline]
pub fn blend_weight(index: usize) -> f32 {
    1.0 / (index as f32 + 2.0)
}

/// Mixes a freshly rendered sample into the displayed image.
pub fn accumulate(display: &mut [u32], sample: &[u32], index: usize) {
    let ratio = blend_weight(index);
    for (shown, &fresh) in display.iter_mut().zip(sample) {
        *shown = blend(*shown, fresh, ratio);
    }
}

/// Where the engine is in the progression for the current viewport.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SampleCounter {
    next: usize,
    cap: usize,
}

impl SampleCounter {
    pub fn new(cap: usize) -> Self {
        SampleCounter {
            next: 0,
            cap: cap.min(MAX_ANTIALIAS_SAMPLES),
        }
    }

    /// Start over; called whenever the viewport or parameters change.
    pub fn reset(&mut self) {
        self.next = 0;
    }

    /// The index of the next sample, or `None` once the cap is reached.
    pub fn pending(&self) -> Option<usize> {
        if self.next < self.cap {
            Some(self.next)
        } else {
            None
        }
    }

    pub fn advance(&mut self) {
        self.next = (self.next + 1).min(self.cap);
    }

    pub fn taken(&self) -> usize {
        self.next
    }

    pub fn is_exhausted(&self) -> bool {
        self.pending().is_none()
    }
}
