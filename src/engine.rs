// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The engine façade.
//!
//! On start-up the engine tries the backends in order of preference
//! (GPU, then SIMD, then scalar), commits to the first one that comes
//! up, and from then on forwards every operation to it.  It also owns
//! the display-sized pixel buffer, the antialias progression for the
//! current viewport, and the resize logic that keeps the buffer and
//! the backend the same size.

use std::sync::Arc;
use std::time::Instant;

use crate::antialias::SampleCounter;
use crate::backend::{Backend, BackendKind};
use crate::config::EngineOptions;
use crate::errors::{pixel_count, try_alloc_pixels, EngineError};
use crate::params::{EngineParameters, ParameterCell};
use crate::planes::Viewport;
use crate::simd::SimdBackend;
use crate::threaded::ScalarBackend;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Destroyed,
}

#[cfg(feature = "gpu")]
fn open_gpu(
    width: usize,
    height: usize,
    params: &Arc<ParameterCell>,
) -> Result<Arc<dyn Backend>, EngineError> {
    let backend = crate::gpu::GpuBackend::new(width, height, params.clone())?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "gpu"))]
fn open_gpu(
    _width: usize,
    _height: usize,
    _params: &Arc<ParameterCell>,
) -> Result<Arc<dyn Backend>, EngineError> {
    Err(EngineError::backend_init(
        BackendKind::Gpu,
        "built without GPU support",
    ))
}

/// Builds the backend of the given kind at `width` × `height`.
pub fn open_backend(
    kind: BackendKind,
    width: usize,
    height: usize,
    lanes: usize,
    params: &Arc<ParameterCell>,
) -> Result<Arc<dyn Backend>, EngineError> {
    match kind {
        BackendKind::Gpu => open_gpu(width, height, params),
        BackendKind::SimdCpu => SimdBackend::new(width, height, lanes, params.clone())
            .map(|backend| Arc::new(backend) as Arc<dyn Backend>),
        BackendKind::ScalarCpu => ScalarBackend::new(width, height, lanes, params.clone())
            .map(|backend| Arc::new(backend) as Arc<dyn Backend>),
    }
}

/// The backends the options allow, best first.
pub fn candidates(options: &EngineOptions) -> Vec<BackendKind> {
    let mut kinds = Vec::with_capacity(3);
    if !options.force_cpu {
        kinds.push(BackendKind::Gpu);
    }
    if !options.disable_simd {
        kinds.push(BackendKind::SimdCpu);
    }
    kinds.push(BackendKind::ScalarCpu);
    kinds
}

/// Tries every candidate in turn and keeps the first that comes up.
/// Running out of host memory ends the search, since every CPU backend
/// needs the same allocation; anything a device reports falls through.
fn select_backend<F>(
    kinds: &[BackendKind],
    params: &Arc<ParameterCell>,
    mut open: F,
) -> Result<Arc<dyn Backend>, EngineError>
where
    F: FnMut(BackendKind, &Arc<ParameterCell>) -> Result<Arc<dyn Backend>, EngineError>,
{
    let mut last_error = None;
    for &kind in kinds {
        match open(kind, params) {
            Ok(backend) => {
                log::info!("{} engine successfully initialized", kind);
                return Ok(backend);
            }
            Err(err) if err.is_out_of_memory() && kind != BackendKind::Gpu => {
                log::error!("Could not initialize {} engine: {}", kind, err);
                return Err(err);
            }
            Err(err) => {
                log::warn!("Could not initialize {} engine: {}", kind, err);
                last_error = Some(err);
            }
        }
    }

    Err(EngineError::NoBackend {
        reason: last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no backend was attempted".to_string()),
    })
}

fn live(
    state: EngineState,
    backend: &Option<Arc<dyn Backend>>,
) -> Result<&Arc<dyn Backend>, EngineError> {
    match (state, backend) {
        (EngineState::Ready, Some(backend)) => Ok(backend),
        (state, _) => Err(EngineError::NotReady { state }),
    }
}

pub struct Engine {
    state: EngineState,
    backend: Option<Arc<dyn Backend>>,
    params: Arc<ParameterCell>,
    width: usize,
    height: usize,
    display: Vec<u32>,
    samples: SampleCounter,
}

impl Engine {
    /// Brings up the best available backend at `width` × `height`.
    pub fn initialize(
        width: usize,
        height: usize,
        options: EngineOptions,
    ) -> Result<Engine, EngineError> {
        let lanes = options.lane_count();
        Engine::initialize_with(width, height, options, |kind, params| {
            open_backend(kind, width, height, lanes, params)
        })
    }

    /// Like `initialize`, but builds each candidate backend with
    /// `open`.  The candidates are offered in the order `candidates`
    /// gives for `options`.
    pub fn initialize_with<F>(
        width: usize,
        height: usize,
        options: EngineOptions,
        open: F,
    ) -> Result<Engine, EngineError>
    where
        F: FnMut(BackendKind, &Arc<ParameterCell>) -> Result<Arc<dyn Backend>, EngineError>,
    {
        let mut state = EngineState::Uninitialized;
        log::debug!("Engine {:?}, starting at {}x{}", state, width, height);
        let pixels = pixel_count(width, height)?;

        state = EngineState::Initializing;
        log::debug!("Engine {:?}", state);
        let params = Arc::new(ParameterCell::new(EngineParameters::from_options(&options)));
        let backend = select_backend(&candidates(&options), &params, open)?;
        let display = try_alloc_pixels(pixels)?;

        Ok(Engine {
            state: EngineState::Ready,
            params: backend.parameters().clone(),
            backend: Some(backend),
            width,
            height,
            display,
            samples: SampleCounter::new(options.sample_cap()),
        })
    }

    /// Wraps an already constructed backend, skipping selection.  The
    /// backend's current dimensions become the display size.
    pub fn with_backend(backend: Arc<dyn Backend>, antialias_samples: usize) -> Engine {
        let (width, height) = backend.dimensions();
        Engine {
            state: EngineState::Ready,
            params: backend.parameters().clone(),
            backend: Some(backend),
            width,
            height,
            display: vec![0; width * height],
            samples: SampleCounter::new(antialias_samples),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn backend(&self) -> Result<&Arc<dyn Backend>, EngineError> {
        live(self.state, &self.backend)
    }

    pub fn kind(&self) -> Result<BackendKind, EngineError> {
        Ok(self.backend()?.kind())
    }

    /// The shared parameter cell; the input side changes parameters
    /// through this while the engine renders.
    pub fn parameter_cell(&self) -> Arc<ParameterCell> {
        self.params.clone()
    }

    pub fn parameters(&self) -> EngineParameters {
        self.params.snapshot()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// The displayed image, `width * height` pixels, row-major.
    pub fn pixels(&self) -> &[u32] {
        &self.display
    }

    /// A handle that can render exports from another thread.
    pub fn exporter(&self) -> Result<Exporter, EngineError> {
        Ok(Exporter {
            backend: self.backend()?.clone(),
        })
    }

    /// Full render of `viewport` into the display buffer.  Restarts
    /// the antialias progression.
    pub fn generate(&mut self, viewport: Viewport) -> Result<&[u32], EngineError> {
        let started = Instant::now();
        self.samples.reset();
        let backend = live(self.state, &self.backend)?;
        backend.generate(viewport, &mut self.display)?;
        log::debug!("Image generation took {:?}", started.elapsed());
        Ok(&self.display)
    }

    /// Render at any resolution into a caller-owned buffer.
    pub fn generate_sized(
        &self,
        width: usize,
        height: usize,
        viewport: Viewport,
        out: &mut [u32],
    ) -> Result<(), EngineError> {
        self.backend()?.generate_sized(width, height, viewport, out)
    }

    /// Takes the next antialias sample of `viewport`, which should be
    /// the viewport of the last `generate`.  Returns false, doing
    /// nothing, once every requested sample has been taken.
    pub fn antialias_pass(&mut self, viewport: Viewport) -> Result<bool, EngineError> {
        let index = match self.samples.pending() {
            Some(index) => index,
            None => return Ok(false),
        };
        let started = Instant::now();
        let backend = live(self.state, &self.backend)?;
        backend.antialias_pass(viewport, &mut self.display, index)?;
        self.samples.advance();
        log::debug!("Antialias sample {} took {:?}", index, started.elapsed());
        Ok(true)
    }

    pub fn antialias_exhausted(&self) -> bool {
        self.samples.is_exhausted()
    }

    pub fn samples_taken(&self) -> usize {
        self.samples.taken()
    }

    pub fn change_iterations(&mut self, delta: i32) -> Result<u32, EngineError> {
        let iterations = self.backend()?.change_iterations(delta);
        self.samples.reset();
        Ok(iterations)
    }

    pub fn change_exponent(&mut self, delta: i32) -> Result<u32, EngineError> {
        let exponent = self.backend()?.change_exponent(delta);
        self.samples.reset();
        Ok(exponent)
    }

    /// Reallocates the display buffer and the backend's buffers.  The
    /// new display buffer starts out zeroed.  On failure nothing
    /// changes size.
    pub fn resize(&mut self, width: usize, height: usize) -> Result<(), EngineError> {
        let backend = self.backend()?.clone();
        let display = try_alloc_pixels(pixel_count(width, height)?).map_err(|err| {
            log::error!("Could not allocate memory for the framebuffer");
            err
        })?;
        backend.resize(width, height)?;

        log::debug!("Resized engine to {}x{}", width, height);
        self.display = display;
        self.width = width;
        self.height = height;
        self.samples.reset();
        Ok(())
    }

    /// Releases the backend.  Every later operation reports
    /// `NotReady`.
    pub fn shutdown(&mut self) {
        if self.state != EngineState::Ready {
            log::warn!("Ignoring shutdown of an engine that is {:?}", self.state);
            return;
        }
        self.state = EngineState::ShuttingDown;
        if let Some(backend) = self.backend.take() {
            log::debug!("Cleaning up {} engine...", backend.kind());
        }
        self.display = Vec::new();
        self.state = EngineState::Destroyed;
    }
}

/// Renders one-off images at their own resolution, from any thread.
/// Holds the engine's backend, so it stays usable while the engine
/// itself is busy on the compute thread.
#[derive(Clone)]
pub struct Exporter {
    backend: Arc<dyn Backend>,
}

impl Exporter {
    pub fn render(
        &self,
        width: usize,
        height: usize,
        viewport: Viewport,
    ) -> Result<Vec<u32>, EngineError> {
        let mut pixels = try_alloc_pixels(pixel_count(width, height)?)?;
        self.backend.generate_sized(width, height, viewport, &mut pixels)?;
        Ok(pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::Flat;
    use crate::color::OPAQUE;

    fn cpu(width: usize, height: usize) -> Engine {
        let options = EngineOptions::default().force_cpu(true).lanes(3).max_iterations(60);
        Engine::initialize(width, height, options).unwrap()
    }

    fn viewport() -> Viewport {
        Viewport::new(-2.5, -1.25, 3.5, 2.5)
    }

    #[test]
    fn cpu_only_engines_never_pick_the_gpu() {
        let engine = cpu(8, 6);
        assert_ne!(engine.kind().unwrap(), BackendKind::Gpu);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn disabling_simd_falls_back_to_scalar() {
        let options = EngineOptions::default().force_cpu(true).disable_simd(true);
        let engine = Engine::initialize(4, 4, options).unwrap();
        assert_eq!(engine.kind().unwrap(), BackendKind::ScalarCpu);
    }

    fn refuse(kind: BackendKind) -> Result<Arc<dyn Backend>, EngineError> {
        Err(EngineError::backend_init(kind, "unavailable"))
    }

    #[test]
    fn default_candidates_prefer_the_gpu() {
        assert_eq!(
            candidates(&EngineOptions::default()),
            vec![BackendKind::Gpu, BackendKind::SimdCpu, BackendKind::ScalarCpu]
        );
        let cpu_only = EngineOptions::default().force_cpu(true).disable_simd(true);
        assert_eq!(candidates(&cpu_only), vec![BackendKind::ScalarCpu]);
    }

    #[test]
    fn failing_backends_fall_through_in_order() {
        let mut tried = Vec::new();
        let engine = Engine::initialize_with(2, 2, EngineOptions::default(), |kind, _| {
            tried.push(kind);
            match kind {
                BackendKind::Gpu => Err(EngineError::OutOfMemory { pixels: 4 }),
                BackendKind::SimdCpu => refuse(kind),
                BackendKind::ScalarCpu => Ok(Arc::new(Flat::new(2, 2, OPAQUE)) as Arc<dyn Backend>),
            }
        })
        .unwrap();
        assert_eq!(
            tried,
            vec![BackendKind::Gpu, BackendKind::SimdCpu, BackendKind::ScalarCpu]
        );
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.dimensions(), (2, 2));
    }

    #[test]
    fn host_memory_exhaustion_stops_the_search() {
        let mut tried = Vec::new();
        let err = Engine::initialize_with(2, 2, EngineOptions::default(), |kind, _| {
            tried.push(kind);
            match kind {
                BackendKind::SimdCpu => Err(EngineError::OutOfMemory { pixels: 4 }),
                _ => refuse(kind),
            }
        })
        .err()
        .unwrap();
        assert!(err.is_out_of_memory());
        assert_eq!(tried, vec![BackendKind::Gpu, BackendKind::SimdCpu]);
    }

    #[test]
    fn no_working_backend_is_reported() {
        let err = Engine::initialize_with(2, 2, EngineOptions::default(), |kind, _| refuse(kind))
            .err()
            .unwrap();
        match err {
            EngineError::NoBackend { reason } => assert!(reason.contains("unavailable")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn zero_sized_engines_are_rejected() {
        let err = Engine::initialize(0, 10, EngineOptions::default().force_cpu(true));
        match err {
            Err(EngineError::InvalidDimensions { .. }) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn antialias_runs_until_the_cap_then_stops() {
        let mut engine = Engine::with_backend(Arc::new(Flat::new(2, 2, OPAQUE)), 3);
        engine.generate(viewport()).unwrap();
        assert!(engine.antialias_pass(viewport()).unwrap());
        assert!(engine.antialias_pass(viewport()).unwrap());
        assert!(engine.antialias_pass(viewport()).unwrap());
        assert!(!engine.antialias_pass(viewport()).unwrap());
        assert_eq!(engine.samples_taken(), 3);
        engine.generate(viewport()).unwrap();
        assert_eq!(engine.samples_taken(), 0);
    }

    #[test]
    fn parameter_changes_restart_antialiasing() {
        let mut engine = Engine::with_backend(Arc::new(Flat::new(2, 2, OPAQUE)), 8);
        engine.generate(viewport()).unwrap();
        engine.antialias_pass(viewport()).unwrap();
        engine.change_exponent(1).unwrap();
        assert_eq!(engine.samples_taken(), 0);
    }

    #[test]
    fn resize_replaces_the_display_buffer() {
        let mut engine = cpu(8, 8);
        engine.generate(viewport()).unwrap();
        engine.resize(5, 3).unwrap();
        assert_eq!(engine.pixels(), &[0; 15][..]);
        assert_eq!(engine.dimensions(), (5, 3));
    }

    #[test]
    fn failed_resize_keeps_the_old_buffers() {
        let mut engine = cpu(4, 4);
        assert!(engine.resize(0, 4).is_err());
        let err = engine.resize(usize::max_value() / 8, 2).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(engine.dimensions(), (4, 4));
        assert_eq!(engine.generate(viewport()).unwrap().len(), 16);
    }

    #[test]
    fn operations_after_shutdown_are_refused() {
        let mut engine = cpu(4, 4);
        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Destroyed);
        assert!(engine.generate(viewport()).is_err());
        assert!(engine.resize(2, 2).is_err());
        assert!(engine.exporter().is_err());
        engine.shutdown();
        assert_eq!(engine.state(), EngineState::Destroyed);
    }

    #[test]
    fn exporter_renders_at_its_own_size() {
        let engine = cpu(4, 4);
        let pixels = engine.exporter().unwrap().render(30, 20, viewport()).unwrap();
        assert_eq!(pixels.len(), 600);
        assert!(pixels.iter().all(|&p| p & OPAQUE == OPAQUE));
    }
}
