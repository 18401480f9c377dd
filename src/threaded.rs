// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The scalar CPU backend.  One lane per logical core, each lane
//! running the plain escape-time kernel over its stripe of the image,
//! one pixel at a time.  This is the backend of last resort: it needs
//! nothing but threads.

use std::sync::{Arc, Mutex};

use crate::backend::{Backend, BackendKind, Surface};
use crate::color::color_map;
use crate::errors::EngineError;
use crate::kernel::escape_time;
use crate::params::{EngineParameters, ParameterCell};
use crate::partition::dispatch;
use crate::planes::{PlaneMapper, Viewport};

pub struct ScalarBackend {
    lanes: usize,
    params: Arc<ParameterCell>,
    surface: Mutex<Surface>,
}

impl ScalarBackend {
    pub fn new(
        width: usize,
        height: usize,
        lanes: usize,
        params: Arc<ParameterCell>,
    ) -> Result<Self, EngineError> {
        log::debug!("Starting scalar CPU engine with {} lanes", lanes);
        Ok(ScalarBackend {
            lanes: lanes.max(1),
            params,
            surface: Mutex::new(Surface::new(width, height)?),
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }
}

/// Renders the pixels at `indices` one by one.  Shared with the SIMD
/// backend, which uses it for the tail of a lane that does not fill a
/// whole vector.
pub fn render_indices<I>(plane: &PlaneMapper, params: &EngineParameters, indices: I) -> Vec<u32>
where
    I: Iterator<Item = usize>,
{
    indices
        .map(|offset| {
            let iterations = escape_time(plane.offset_to_point(offset), params);
            color_map(iterations, params.max_iterations)
        })
        .collect()
}

impl Backend for ScalarBackend {
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
        width: usize,
        height: usize,
        viewport: Viewport,
        params: EngineParameters,
        out: &mut [u32],
    ) -> Result<(), EngineError> {
        let plane = PlaneMapper::new(width, height, viewport);
        dispatch(out, self.lanes, |_, indices| render_indices(&plane, &params, indices));
        Ok(())
    }
}
