// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Mandelbrot compute engine
//!
//! The Mandelbrot set is the set of points `c` on the complex plane
//! for which iterating `z ← z² + c` from zero never runs off to
//! infinity.  This crate renders it, along with its generalization
//! `z ← z^pow + c`, by counting how many iterations each pixel's
//! point survives before escaping and turning that count into a
//! color.
//!
//! The counting can be done by one of three interchangeable
//! backends: a scalar CPU renderer that stripes the image across all
//! cores, a vectorized CPU renderer that works on eight points at a
//! time, and a GPU compute shader.  The `Engine` picks the best one
//! the machine supports at start-up and sticks with it.  On top of
//! the raw render it keeps a display buffer that successive
//! sub-pixel-shifted samples are blended into, so an image that sits
//! still gets smoother over time.
//!
//! `session` wires an engine to a compute thread and an input-side
//! handle for interactive use.

extern crate crossbeam;
extern crate failure;
extern crate itertools;
extern crate log;
extern crate num;
extern crate num_cpus;

pub mod antialias;
pub mod backend;
pub mod color;
pub mod config;
pub mod engine;
pub mod errors;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod kernel;
pub mod params;
pub mod partition;
pub mod planes;
pub mod scale;
pub mod session;
pub mod simd;
pub mod threaded;

pub use backend::{Backend, BackendKind};
pub use config::EngineOptions;
pub use engine::{Engine, EngineState, Exporter};
pub use errors::EngineError;
pub use params::{EngineParameters, IterationStep};
pub use planes::Viewport;
pub use session::{InputHandle, Presenter};
