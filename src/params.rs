// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The small set of numbers that, together with a viewport, decide
//! what a render looks like.  They are changed from the input side
//! and read by whichever thread is rendering, so the live copy sits
//! behind a lock and renders always work from a snapshot.

use std::sync::Mutex;

use crate::config::{
    EngineOptions, ESCAPE_RADIUS, DEFAULT_EXPONENT, DEFAULT_ITERATIONS, MAX_EXPONENT,
    MAX_ITERATIONS, MIN_EXPONENT, MIN_ITERATIONS,
};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineParameters {
    /// Iteration cap; a point that survives this many steps is in the set.
    pub max_iterations: u32,
    /// The `pow` in `z ← z^pow + c`.
    pub exponent: u32,
    pub escape_radius: f32,
}

impl Default for EngineParameters {
    fn default() -> Self {
        EngineParameters {
            max_iterations: DEFAULT_ITERATIONS,
            exponent: DEFAULT_EXPONENT,
            escape_radius: ESCAPE_RADIUS,
        }
    }
}

impl EngineParameters {
    pub fn new(max_iterations: u32, exponent: u32, escape_radius: f32) -> Self {
        EngineParameters {
            max_iterations: clamp_iterations(i64::from(max_iterations)),
            exponent: clamp_exponent(i64::from(exponent)),
            escape_radius: if escape_radius > 0.0 {
                escape_radius
            } else {
                ESCAPE_RADIUS
            },
        }
    }

    pub fn from_options(options: &EngineOptions) -> Self {
        EngineParameters::new(options.max_iterations, options.exponent, options.escape_radius)
    }

    #[inline]
    pub fn escape_radius_sq(&self) -> f32 {
        self.escape_radius * self.escape_radius
    }
}

fn clamp_iterations(value: i64) -> u32 {
    num::clamp(value, i64::from(MIN_ITERATIONS), i64::from(MAX_ITERATIONS)) as u32
}

fn clamp_exponent(value: i64) -> u32 {
    num::clamp(value, i64::from(MIN_EXPONENT), i64::from(MAX_EXPONENT)) as u32
}

/// The step sizes the keyboard bindings hand to `change_iterations`:
/// plain, shift, ctrl, and ctrl+shift.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IterationStep {
    One,
    Ten,
    Hundred,
    Thousand,
}

impl IterationStep {
    pub fn from_modifiers(shift: bool, ctrl: bool) -> Self {
        match (shift, ctrl) {
            (false, false) => IterationStep::One,
            (true, false) => IterationStep::Ten,
            (false, true) => IterationStep::Hundred,
            (true, true) => IterationStep::Thousand,
        }
    }

    pub fn delta(self) -> i32 {
        match self {
            IterationStep::One => 1,
            IterationStep::Ten => 10,
            IterationStep::Hundred => 100,
            IterationStep::Thousand => 1000,
        }
    }
}

/// Lock-guarded live parameters shared between the input side and
/// the backend doing the rendering.
#[derive(Debug, Default)]
pub struct ParameterCell {
    inner: Mutex<EngineParameters>,
}

impl ParameterCell {
    pub fn new(parameters: EngineParameters) -> Self {
        ParameterCell {
            inner: Mutex::new(parameters),
        }
    }

    /// A consistent copy of every field.
    pub fn snapshot(&self) -> EngineParameters {
        *self.lock()
    }

    /// Clamp-and-set; returns the value now in effect.
    pub fn change_iterations(&self, delta: i32) -> u32 {
        let mut params = self.lock();
        let updated = clamp_iterations(i64::from(params.max_iterations) + i64::from(delta));
        log::info!("Changing maximum iterations to {}", updated);
        params.max_iterations = updated;
        updated
    }

    /// Clamp-and-set; returns the value now in effect.
    pub fn change_exponent(&self, delta: i32) -> u32 {
        let mut params = self.lock();
        let updated = clamp_exponent(i64::from(params.exponent) + i64::from(delta));
        log::info!("Changing exponent to {}", updated);
        params.exponent = updated;
        updated
    }

    // A panic while holding this lock cannot leave the plain-old-data
    // inside half-written, so a poisoned lock is still usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, EngineParameters> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
