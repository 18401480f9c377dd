// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors surfaced by the engine.  Everything here happens at a
//! boundary (start-up, resize, device traffic); the per-pixel kernel
//! itself cannot fail.

use failure::Fail;

use crate::backend::BackendKind;
use crate::engine::EngineState;

#[derive(Debug, Fail)]
pub enum EngineError {
    #[fail(display = "no rendering backend could be initialized: {}", reason)]
    NoBackend { reason: String },

    #[fail(display = "could not initialize {} backend: {}", backend, reason)]
    BackendInit { backend: BackendKind, reason: String },

    #[fail(display = "could not allocate a buffer of {} pixels", pixels)]
    OutOfMemory { pixels: usize },

    #[fail(display = "invalid output dimensions {}x{}", width, height)]
    InvalidDimensions { width: usize, height: usize },

    #[fail(display = "engine is not ready (currently {:?})", state)]
    NotReady { state: EngineState },

    #[fail(display = "device error: {}", reason)]
    Device { reason: String },
}

impl EngineError {
    pub fn backend_init<S: Into<String>>(backend: BackendKind, reason: S) -> Self {
        EngineError::BackendInit {
            backend,
            reason: reason.into(),
        }
    }

    pub fn device<S: Into<String>>(reason: S) -> Self {
        EngineError::Device {
            reason: reason.into(),
        }
    }

    /// True for the errors a caller may want to answer by asking for
    /// a smaller buffer.
    pub fn is_out_of_memory(&self) -> bool {
        match self {
            EngineError::OutOfMemory { .. } => true,
            _ => false,
        }
    }
}

/// Checked `width * height`, rejecting empty and overflowing shapes.
pub fn pixel_count(width: usize, height: usize) -> Result<usize, EngineError> {
    if width == 0 || height == 0 {
        return Err(EngineError::InvalidDimensions { width, height });
    }
    width
        .checked_mul(height)
        .ok_or(EngineError::InvalidDimensions { width, height })
}

/// Allocates a zeroed pixel buffer, reporting exhaustion instead of
/// aborting.
pub fn try_alloc_pixels(len: usize) -> Result<Vec<u32>, EngineError> {
    let mut pixels: Vec<u32> = Vec::new();
    pixels
        .try_reserve_exact(len)
        .map_err(|_| EngineError::OutOfMemory { pixels: len })?;
    pixels.resize(len, 0);
    Ok(pixels)
}
