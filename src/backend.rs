// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The contract every execution strategy implements.
//!
//! A backend only has to know how to render a viewport at a given
//! resolution into a buffer; display-sized generation, caller-sized
//! generation, antialias passes, parameter changes and resizing are
//! all provided on top of that, so they behave identically whichever
//! backend is live.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::antialias::{accumulate, shifted_viewport};
use crate::errors::{pixel_count, try_alloc_pixels, EngineError};
use crate::params::{EngineParameters, ParameterCell};
use crate::planes::Viewport;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    ScalarCpu,
    SimdCpu,
    Gpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BackendKind::ScalarCpu => "scalar CPU",
            BackendKind::SimdCpu => "SIMD CPU",
            BackendKind::Gpu => "GPU",
        };
        f.write_str(name)
    }
}

/// Backend-private, display-sized state: the current display
/// resolution and the scratch buffer antialias samples are rendered
/// into.
#[derive(Debug)]
pub struct Surface {
    width: usize,
    height: usize,
    scratch: Vec<u32>,
}

impl Surface {
    pub fn new(width: usize, height: usize) -> Result<Self, EngineError> {
        let scratch = try_alloc_pixels(pixel_count(width, height)?)?;
        Ok(Surface {
            width,
            height,
            scratch,
        })
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub(crate) fn len(&self) -> usize {
        self.scratch.len()
    }
}

fn lock_surface(surface: &Mutex<Surface>) -> MutexGuard<'_, Surface> {
    surface.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The live parameters this backend renders with.
    fn parameters(&self) -> &Arc<ParameterCell>;

    fn surface(&self) -> &Mutex<Surface>;

    /// Fills `out` (exactly `width * height` long) with the image of
    /// `viewport`.
    fn render(
        &self,
        width: usize,
        height: usize,
        viewport: Viewport,
        params: EngineParameters,
        out: &mut [u32],
    ) -> Result<(), EngineError>;

    /// Reallocates whatever the backend keeps outside the surface.
    fn resize_resources(&self, _width: usize, _height: usize) -> Result<(), EngineError> {
        Ok(())
    }

    fn dimensions(&self) -> (usize, usize) {
        lock_surface(self.surface()).dimensions()
    }

    /// Renders the display-sized image into `out`.
    fn generate(&self, viewport: Viewport, out: &mut [u32]) -> Result<(), EngineError> {
        let (width, height) = self.dimensions();
        if out.len() != width * height {
            log::warn!(
                "Ignoring generate into a buffer of {} pixels; display is {}x{}",
                out.len(),
                width,
                height
            );
            return Ok(());
        }
        self.render(width, height, viewport, self.parameters().snapshot(), out)
    }

    /// Renders at a caller-chosen resolution into a caller-owned
    /// buffer, independently of the display size.
    fn generate_sized(
        &self,
        width: usize,
        height: usize,
        viewport: Viewport,
        out: &mut [u32],
    ) -> Result<(), EngineError> {
        if width < 1 || height < 1 || out.len() != width * height {
            log::warn!(
                "Ignoring sized generate of {}x{} into a buffer of {} pixels",
                width,
                height,
                out.len()
            );
            return Ok(());
        }
        self.render(width, height, viewport, self.parameters().snapshot(), out)
    }

    /// Renders sample `sample_index` of the antialias progression into
    /// the scratch buffer and mixes it into `display`.
    fn antialias_pass(
        &self,
        viewport: Viewport,
        display: &mut [u32],
        sample_index: usize,
    ) -> Result<(), EngineError> {
        let mut surface = lock_surface(self.surface());
        let (width, height) = surface.dimensions();
        if display.len() != surface.len() {
            log::warn!("Ignoring antialias pass into a buffer of the wrong size");
            return Ok(());
        }
        let shifted = match shifted_viewport(viewport, width, height, sample_index) {
            Some(shifted) => shifted,
            None => {
                log::warn!("Ignoring antialias sample {}", sample_index);
                return Ok(());
            }
        };

        let params = self.parameters().snapshot();
        self.render(width, height, shifted, params, &mut surface.scratch)?;
        accumulate(display, &surface.scratch, sample_index);
        Ok(())
    }

    fn change_iterations(&self, delta: i32) -> u32 {
        self.parameters().change_iterations(delta)
    }

    fn change_exponent(&self, delta: i32) -> u32 {
        self.parameters().change_exponent(delta)
    }

    /// Moves the backend to a new display resolution.  On failure the
    /// backend is left at its previous size.
    fn resize(&self, width: usize, height: usize) -> Result<(), EngineError> {
        let mut surface = lock_surface(self.surface());
        let resized = Surface::new(width, height)?;
        if let Err(err) = self.resize_resources(width, height) {
            log::error!("Could not resize {} backend: {}", self.kind(), err);
            return Err(err);
        }
        *surface = resized;
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::color::OPAQUE;

    /// Paints every pixel with one color; stands in for a real
    /// backend when only the provided methods are under test.
    pub struct Flat {
        pub color: u32,
        refuse_resize: bool,
        params: Arc<ParameterCell>,
        surface: Mutex<Surface>,
    }

    impl Flat {
        pub fn new(width: usize, height: usize, color: u32) -> Self {
            Flat {
                color,
                refuse_resize: false,
                params: Arc::new(ParameterCell::default()),
                surface: Mutex::new(Surface::new(width, height).unwrap()),
            }
        }

        /// A backend whose own resources can never be resized.
        pub fn refusing_resize(width: usize, height: usize, color: u32) -> Self {
            Flat {
                refuse_resize: true,
                ..Flat::new(width, height, color)
            }
        }
    }

    impl Backend for Flat {
        fn kind(&self) -> BackendKind {
            BackendKind::ScalarCpu
        }

        fn parameters(&self) -> &Arc<ParameterCell> {
            &self.params
        }

        fn surface(&self) -> &Mutex<Surface> {
            &self.surface
        }

        fn render(
            &self,
            _width: usize,
            _height: usize,
            _viewport: Viewport,
            _params: EngineParameters,
            out: &mut [u32],
        ) -> Result<(), EngineError> {
            for pixel in out.iter_mut() {
                *pixel = self.color;
            }
            Ok(())
        }

        fn resize_resources(&self, _width: usize, _height: usize) -> Result<(), EngineError> {
            if self.refuse_resize {
                return Err(EngineError::device("resources are fixed"));
            }
            Ok(())
        }
    }

    fn viewport() -> Viewport {
        Viewport::new(-2.0, -1.0, 3.0, 2.0)
    }

    #[test]
    fn antialias_blends_the_rendered_sample() {
        let backend = Flat::new(2, 2, OPAQUE | 100 << 16);
        let mut display = vec![OPAQUE | 200 << 16; 4];
        backend.antialias_pass(viewport(), &mut display, 0).unwrap();
        assert!(display.iter().all(|&p| p == OPAQUE | 150 << 16));
    }

    #[test]
    fn antialias_index_out_of_range_is_a_no_op() {
        let backend = Flat::new(2, 2, OPAQUE);
        let mut display = vec![0xffff_ffff; 4];
        backend.antialias_pass(viewport(), &mut display, 8).unwrap();
        assert_eq!(display, vec![0xffff_ffff; 4]);
    }

    #[test]
    fn mismatched_buffers_are_left_alone() {
        let backend = Flat::new(2, 2, OPAQUE);
        let mut wrong = vec![7; 5];
        backend.generate(viewport(), &mut wrong).unwrap();
        backend.generate_sized(0, 3, viewport(), &mut wrong).unwrap();
        backend.antialias_pass(viewport(), &mut wrong, 0).unwrap();
        assert_eq!(wrong, vec![7; 5]);
    }

    #[test]
    fn resize_changes_dimensions() {
        let backend = Flat::new(2, 2, OPAQUE);
        backend.resize(5, 3).unwrap();
        assert_eq!(backend.dimensions(), (5, 3));
        let mut display = vec![0; 15];
        backend.generate(viewport(), &mut display).unwrap();
        assert!(display.iter().all(|&p| p == OPAQUE));
    }

    #[test]
    fn failed_resize_keeps_the_old_size() {
        let backend = Flat::new(2, 2, OPAQUE);
        assert!(backend.resize(0, 3).is_err());
        assert!(backend.resize(usize::max_value() / 2, 4).is_err());
        assert_eq!(backend.dimensions(), (2, 2));
    }

    #[test]
    fn failed_resource_resize_leaves_the_surface_alone() {
        let backend = Flat::refusing_resize(2, 2, OPAQUE | 100 << 16);
        assert!(backend.resize(5, 3).is_err());
        assert_eq!(backend.dimensions(), (2, 2));
        assert_eq!(backend.surface().lock().unwrap().len(), 4);

        let mut display = vec![OPAQUE | 200 << 16; 4];
        backend.antialias_pass(viewport(), &mut display, 0).unwrap();
        assert!(display.iter().all(|&p| p == OPAQUE | 150 << 16));
    }

    #[test]
    fn parameter_changes_go_through_the_shared_cell() {
        let backend = Flat::new(1, 1, OPAQUE);
        let iterations = backend.change_iterations(10);
        assert_eq!(backend.parameters().snapshot().max_iterations, iterations);
        assert_eq!(backend.change_exponent(-5), 1);
    }
}
