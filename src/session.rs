// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The interactive session: a compute thread that owns the engine and
//! an input side that steers it.
//!
//! The two sides share only a small, lock-guarded `ViewState`: the
//! viewport, the requested window size, a force-refresh flag and a
//! quit flag.  The input side mutates it and wakes the compute thread;
//! the compute thread snapshots it at the top of every pass, so a
//! pass always runs against one consistent viewport.  Resizes are
//! requested by the input side but carried out on the compute thread,
//! between passes.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use crate::config::{IDLE_INTERVAL, MAX_DIMENSION, PAN_STEP, ZOOM_IN_FACTOR, ZOOM_OUT_FACTOR};
use crate::engine::Engine;
pub use crate::engine::Exporter;
use crate::errors::EngineError;
use crate::params::{IterationStep, ParameterCell};
use crate::planes::Viewport;
use crate::scale::{self, Filter};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewState {
    pub viewport: Viewport,
    pub width: usize,
    pub height: usize,
    pub force_refresh: bool,
    pub quit: bool,
    /// Bumped by every change the input side makes.
    pub generation: u64,
}

#[derive(Debug)]
pub struct SharedState {
    state: Mutex<ViewState>,
    changed: Condvar,
}

impl SharedState {
    pub fn new(viewport: Viewport, width: usize, height: usize) -> Self {
        SharedState {
            state: Mutex::new(ViewState {
                viewport,
                width,
                height,
                force_refresh: false,
                quit: false,
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> ViewState {
        *self.lock()
    }

    fn update<F, T>(&self, change: F) -> T
    where
        F: FnOnce(&mut ViewState) -> T,
    {
        let result = {
            let mut state = self.lock();
            let result = change(&mut state);
            state.generation = state.generation.wrapping_add(1);
            result
        };
        self.changed.notify_all();
        result
    }

    /// Snapshot for the compute side, consuming any forced refresh.
    fn take(&self) -> ViewState {
        let mut state = self.lock();
        let view = *state;
        state.force_refresh = false;
        view
    }

    fn pending(state: &ViewState, seen: u64) -> bool {
        state.generation != seen || state.force_refresh || state.quit
    }

    /// True if anything changed since the snapshot of generation
    /// `seen`.
    fn has_changed(&self, seen: u64) -> bool {
        SharedState::pending(&self.lock(), seen)
    }

    /// Sleeps until the next change, unless one already arrived after
    /// the snapshot of generation `seen`.
    fn wait_idle(&self, seen: u64) {
        let state = self.lock();
        if SharedState::pending(&state, seen) {
            return;
        }
        let _ = self.changed.wait_timeout(state, IDLE_INTERVAL);
    }
}

/// Whatever shows the image.  Called on the compute thread after every
/// pass that changed the display buffer.
pub trait Presenter: Send {
    fn present(&mut self, width: usize, height: usize, pixels: &[u32]);
}

impl<F> Presenter for F
where
    F: FnMut(usize, usize, &[u32]) + Send,
{
    fn present(&mut self, width: usize, height: usize, pixels: &[u32]) {
        self(width, height, pixels)
    }
}

/// What one turn of the compute loop did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Generated,
    Antialiased,
    Idle,
    Quit,
}

pub struct ComputeLoop<P: Presenter> {
    engine: Engine,
    shared: Arc<SharedState>,
    presenter: P,
    cached: Option<Viewport>,
    seen: u64,
}

impl<P: Presenter> ComputeLoop<P> {
    pub fn new(engine: Engine, shared: Arc<SharedState>, presenter: P) -> Self {
        ComputeLoop {
            engine,
            shared,
            presenter,
            cached: None,
            seen: 0,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Whether the input side changed anything since the last step.
    pub fn input_pending(&self) -> bool {
        self.shared.has_changed(self.seen)
    }

    /// Applies a pending resize.  A resize that runs out of memory is
    /// abandoned and the requested size rolled back to the current one;
    /// anything else ends the session.
    fn apply_resize(&mut self, width: usize, height: usize) -> Result<(), EngineError> {
        match self.engine.resize(width, height) {
            Ok(()) => Ok(()),
            Err(err) if err.is_out_of_memory() => {
                log::error!("Abandoning resize to {}x{}: {}", width, height, err);
                let (current_width, current_height) = self.engine.dimensions();
                self.shared.update(|state| {
                    state.width = current_width;
                    state.height = current_height;
                    state.viewport.fit_aspect(current_width, current_height);
                });
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// One turn: resize if asked to, regenerate if anything changed,
    /// otherwise refine the current image with one more antialias
    /// sample.
    pub fn step(&mut self) -> Result<Step, EngineError> {
        let view = self.shared.take();
        self.seen = view.generation;
        if view.quit {
            return Ok(Step::Quit);
        }

        let mut dirty = view.force_refresh || self.cached != Some(view.viewport);
        if (view.width, view.height) != self.engine.dimensions() {
            self.apply_resize(view.width, view.height)?;
            dirty = true;
        }

        let (width, height) = self.engine.dimensions();
        if dirty {
            log::debug!("Regenerating {:?}", view.viewport);
            self.cached = Some(view.viewport);
            let pixels = self.engine.generate(view.viewport)?;
            self.presenter.present(width, height, pixels);
            return Ok(Step::Generated);
        }

        let viewport = view.viewport;
        if self.engine.antialias_pass(viewport)? {
            self.presenter.present(width, height, self.engine.pixels());
            return Ok(Step::Antialiased);
        }
        Ok(Step::Idle)
    }

    /// Runs until the input side asks to quit, then hands the engine
    /// back.
    pub fn run(mut self) -> Result<Engine, EngineError> {
        loop {
            match self.step()? {
                Step::Quit => break,
                Step::Idle => self.shared.wait_idle(self.seen),
                Step::Generated | Step::Antialiased => {}
            }
        }
        log::debug!("Compute loop finished");
        Ok(self.engine)
    }
}

/// The input side of a session.  Cheap to clone; every clone steers
/// the same compute loop.
#[derive(Clone)]
pub struct InputHandle {
    shared: Arc<SharedState>,
    params: Arc<ParameterCell>,
    exporter: Exporter,
}

impl InputHandle {
    pub fn new(shared: Arc<SharedState>, params: Arc<ParameterCell>, exporter: Exporter) -> Self {
        InputHandle {
            shared,
            params,
            exporter,
        }
    }

    pub fn view(&self) -> ViewState {
        self.shared.snapshot()
    }

    /// Moves the view by a fraction of its extent.
    pub fn pan(&self, fraction_x: f32, fraction_y: f32) {
        self.shared.update(|state| state.viewport.pan(fraction_x, fraction_y));
    }

    pub fn pan_left(&self) {
        self.pan(-PAN_STEP, 0.0)
    }

    pub fn pan_right(&self) {
        self.pan(PAN_STEP, 0.0)
    }

    pub fn pan_up(&self) {
        self.pan(0.0, -PAN_STEP)
    }

    pub fn pan_down(&self) {
        self.pan(0.0, PAN_STEP)
    }

    /// Moves the view by a pointer drag of `dx`, `dy` pixels.
    pub fn drag(&self, dx: i32, dy: i32) {
        self.shared.update(|state| {
            let (width, height) = (state.width, state.height);
            state.viewport.drag(dx, dy, width, height)
        });
    }

    /// Zooms about pixel (`x`, `y`), which stays put on screen.
    pub fn zoom_at(&self, factor: f32, x: i32, y: i32) {
        self.shared.update(|state| {
            let anchor_x = x as f32 / state.width as f32;
            let anchor_y = y as f32 / state.height as f32;
            state.viewport.zoom(factor, anchor_x, anchor_y)
        });
    }

    pub fn zoom_center(&self, factor: f32) {
        self.shared.update(|state| state.viewport.zoom(factor, 0.5, 0.5));
    }

    pub fn zoom_in(&self) {
        self.zoom_center(ZOOM_IN_FACTOR)
    }

    pub fn zoom_out(&self) {
        self.zoom_center(ZOOM_OUT_FACTOR)
    }

    pub fn change_iterations(&self, step: IterationStep, increase: bool) -> u32 {
        let delta = if increase { step.delta() } else { -step.delta() };
        let iterations = self.params.change_iterations(delta);
        self.shared.update(|state| state.force_refresh = true);
        iterations
    }

    pub fn change_exponent(&self, delta: i32) -> u32 {
        let exponent = self.params.change_exponent(delta);
        self.shared.update(|state| state.force_refresh = true);
        exponent
    }

    /// Asks the compute loop to move to a new window size.  The view
    /// keeps its width and is cropped to the new aspect ratio.
    pub fn request_resize(&self, width: usize, height: usize) {
        if width < 1 || height < 1 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            log::warn!("Ignoring resize to {}x{}", width, height);
            return;
        }
        self.shared.update(|state| {
            state.viewport.fit_aspect(width, height);
            state.width = width;
            state.height = height;
            state.force_refresh = true;
        });
    }

    pub fn quit(&self) {
        self.shared.update(|state| state.quit = true);
    }

    /// Renders the current view at `width` × `height` without touching
    /// the display.  Only the viewport snapshot holds the lock.
    pub fn export(&self, width: usize, height: usize) -> Result<Vec<u32>, EngineError> {
        let viewport = self.shared.snapshot().viewport;
        self.exporter.render(width, height, viewport)
    }

    /// Like `export`, but renders `factor` times larger in each
    /// direction and scales the result back down with `filter`.
    pub fn export_supersampled(
        &self,
        width: usize,
        height: usize,
        factor: usize,
        filter: Filter,
    ) -> Result<Vec<u32>, EngineError> {
        if factor <= 1 {
            return self.export(width, height);
        }
        let (big_width, big_height) = match (width.checked_mul(factor), height.checked_mul(factor))
        {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(EngineError::InvalidDimensions { width, height }),
        };
        let big = self.export(big_width, big_height)?;
        scale::resample(filter, &big, big_width, big_height, width, height)
    }
}

/// Wires an engine up for an interactive session, starting from the
/// initial view of its current size.
pub fn session<P: Presenter>(
    engine: Engine,
    presenter: P,
) -> Result<(ComputeLoop<P>, InputHandle), EngineError> {
    let (width, height) = engine.dimensions();
    let shared = Arc::new(SharedState::new(
        Viewport::initial(width, height),
        width,
        height,
    ));
    let input = InputHandle::new(shared.clone(), engine.parameter_cell(), engine.exporter()?);
    Ok((ComputeLoop::new(engine, shared, presenter), input))
}

/// Starts the compute thread.  Join the returned handle after calling
/// `InputHandle::quit` to get the engine back.
pub fn spawn<P: Presenter + 'static>(
    engine: Engine,
    presenter: P,
) -> Result<(InputHandle, thread::JoinHandle<Result<Engine, EngineError>>), EngineError> {
    let (compute, input) = session(engine, presenter)?;
    let handle = thread::spawn(move || compute.run());
    Ok((input, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tests::Flat;
    use crate::color::OPAQUE;

    fn flat_session(samples: usize) -> (ComputeLoop<impl Presenter>, InputHandle) {
        let engine = Engine::with_backend(Arc::new(Flat::new(4, 2, OPAQUE)), samples);
        session(engine, |_: usize, _: usize, _: &[u32]| {}).unwrap()
    }

    #[test]
    fn first_step_generates_then_refines_then_idles() {
        let (mut compute, _input) = flat_session(2);
        assert_eq!(compute.step().unwrap(), Step::Generated);
        assert_eq!(compute.step().unwrap(), Step::Antialiased);
        assert_eq!(compute.step().unwrap(), Step::Antialiased);
        assert_eq!(compute.step().unwrap(), Step::Idle);
    }

    #[test]
    fn viewport_changes_mark_the_view_dirty() {
        let (mut compute, input) = flat_session(8);
        compute.step().unwrap();
        input.pan_right();
        assert_eq!(compute.step().unwrap(), Step::Generated);
        assert_eq!(compute.engine().samples_taken(), 0);
    }

    #[test]
    fn parameter_changes_force_a_refresh() {
        let (mut compute, input) = flat_session(0);
        compute.step().unwrap();
        assert_eq!(compute.step().unwrap(), Step::Idle);
        input.change_exponent(1);
        assert_eq!(compute.step().unwrap(), Step::Generated);
    }

    #[test]
    fn changes_between_step_and_wait_are_not_slept_through() {
        let (mut compute, input) = flat_session(0);
        compute.step().unwrap();
        assert_eq!(compute.step().unwrap(), Step::Idle);
        assert!(!compute.input_pending());

        input.pan_right();
        assert!(compute.input_pending());
        let started = std::time::Instant::now();
        compute.shared.wait_idle(compute.seen);
        assert!(started.elapsed() < IDLE_INTERVAL);

        assert_eq!(compute.step().unwrap(), Step::Generated);
        assert!(!compute.input_pending());
    }

    #[test]
    fn resize_happens_on_the_compute_side() {
        let (mut compute, input) = flat_session(0);
        compute.step().unwrap();
        input.request_resize(6, 3);
        assert_eq!(compute.engine().dimensions(), (4, 2));
        assert_eq!(compute.step().unwrap(), Step::Generated);
        assert_eq!(compute.engine().dimensions(), (6, 3));
        assert_eq!(compute.engine().pixels().len(), 18);
    }

    #[test]
    fn resize_crops_instead_of_stretching() {
        let (_compute, input) = flat_session(0);
        let before = input.view().viewport;
        input.request_resize(8, 2);
        let after = input.view().viewport;
        assert_eq!(after.w, before.w);
        assert!((after.h - before.h / 2.0).abs() < 1e-6);
        assert!((after.y + after.h / 2.0 - (before.y + before.h / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_resizes_are_ignored() {
        let (_compute, input) = flat_session(0);
        input.request_resize(0, 10);
        input.request_resize(MAX_DIMENSION + 1, 10);
        assert_eq!((input.view().width, input.view().height), (4, 2));
    }

    #[test]
    fn quit_stops_the_loop() {
        let (mut compute, input) = flat_session(0);
        input.quit();
        assert_eq!(compute.step().unwrap(), Step::Quit);
    }

    #[test]
    fn zoom_keeps_the_anchor_in_place() {
        let (_compute, input) = flat_session(0);
        let before = input.view().viewport;
        input.zoom_at(ZOOM_IN_FACTOR, 1, 1);
        let after = input.view().viewport;
        let anchor = |vp: Viewport| (vp.x + vp.w * 0.25, vp.y + vp.h * 0.5);
        let (bx, by) = anchor(before);
        let (ax, ay) = anchor(after);
        assert!((bx - ax).abs() < 1e-5 && (by - ay).abs() < 1e-5);
        assert!((after.w - before.w * ZOOM_IN_FACTOR).abs() < 1e-5);
    }

    #[test]
    fn supersampled_exports_come_back_at_the_requested_size() {
        let (_compute, input) = flat_session(0);
        let pixels = input.export_supersampled(5, 3, 3, Filter::Nearest).unwrap();
        assert_eq!(pixels, vec![OPAQUE; 15]);
    }
}
