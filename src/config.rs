// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Compile-time defaults and the runtime options handed to the
//! engine when it is brought up.

use std::time::Duration;

/// Width of the preview when nothing else was asked for.
pub const DEFAULT_WIDTH: usize = 1600;
/// Height of the preview when nothing else was asked for.
pub const DEFAULT_HEIGHT: usize = 900;
/// Largest window dimension the driver will accept.
pub const MAX_DIMENSION: usize = 16383;

/// A point is considered escaped once |z| exceeds this.
pub const ESCAPE_RADIUS: f32 = 3.0;
pub const DEFAULT_ITERATIONS: u32 = 800;
pub const DEFAULT_EXPONENT: u32 = 2;
pub const MIN_ITERATIONS: u32 = 1;
pub const MAX_ITERATIONS: u32 = 5000;
pub const MIN_EXPONENT: u32 = 1;
pub const MAX_EXPONENT: u32 = 200;

/// Number of sub-pixel samples the antialiaser knows how to take.
pub const MAX_ANTIALIAS_SAMPLES: usize = 8;

/// Lane count used when the core count cannot be determined.
pub const FALLBACK_LANES: usize = 8;
pub const MAX_LANES: usize = 256;

/// The GPU grid: workgroups times invocations per workgroup gives the
/// stride every device lane walks the image with.
pub const GPU_WORKGROUPS: u32 = 32;
pub const GPU_WORKGROUP_SIZE: u32 = 256;

/// How long the compute loop sleeps when there is nothing to do.
pub const IDLE_INTERVAL: Duration = Duration::from_millis(30);

/// Fraction of the view an arrow key moves it by.
pub const PAN_STEP: f32 = 0.02;
pub const ZOOM_IN_FACTOR: f32 = 0.8;
pub const ZOOM_OUT_FACTOR: f32 = 1.25;

/// Detected logical core count, clamped to something sane.
pub fn detect_lanes() -> usize {
    let cores = num_cpus::get();
    if cores < 1 || cores > MAX_LANES {
        log::warn!(
            "Could not determine CPU core count. Using a default of {} lanes.",
            FALLBACK_LANES
        );
        FALLBACK_LANES
    } else {
        cores
    }
}

/// Knobs for engine start-up.  Everything defaults to "use the best
/// thing the machine offers".
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EngineOptions {
    /// Never try the GPU.
    pub force_cpu: bool,
    /// Skip the vectorized CPU backend even if the host supports it.
    pub disable_simd: bool,
    /// Never run antialias passes.
    pub disable_antialias: bool,
    /// How many of the eight sub-pixel samples to take after each
    /// full render.
    pub antialias_samples: usize,
    /// Overrides the detected lane count for the CPU backends.
    pub lanes: Option<usize>,
    pub max_iterations: u32,
    pub exponent: u32,
    pub escape_radius: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            force_cpu: false,
            disable_simd: false,
            disable_antialias: false,
            antialias_samples: MAX_ANTIALIAS_SAMPLES,
            lanes: None,
            max_iterations: DEFAULT_ITERATIONS,
            exponent: DEFAULT_EXPONENT,
            escape_radius: ESCAPE_RADIUS,
        }
    }
}

impl EngineOptions {
    pub fn force_cpu(mut self, force_cpu: bool) -> Self {
        self.force_cpu = force_cpu;
        self
    }

    pub fn disable_simd(mut self, disable_simd: bool) -> Self {
        self.disable_simd = disable_simd;
        self
    }

    pub fn disable_antialias(mut self, disable_antialias: bool) -> Self {
        self.disable_antialias = disable_antialias;
        self
    }

    pub fn antialias_samples(mut self, samples: usize) -> Self {
        self.antialias_samples = samples.min(MAX_ANTIALIAS_SAMPLES);
        self
    }

    pub fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = Some(lanes.max(1).min(MAX_LANES));
        self
    }

    pub fn max_iterations(mut self, iterations: u32) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn exponent(mut self, exponent: u32) -> Self {
        self.exponent = exponent;
        self
    }

    pub fn escape_radius(mut self, radius: f32) -> Self {
        self.escape_radius = radius;
        self
    }

    /// The number of antialias passes the engine will actually run.
    pub fn sample_cap(&self) -> usize {
        if self.disable_antialias {
            0
        } else {
            self.antialias_samples.min(MAX_ANTIALIAS_SAMPLES)
        }
    }

    /// Lane count for the CPU backends.
    pub fn lane_count(&self) -> usize {
        match self.lanes {
            Some(lanes) => lanes.max(1).min(MAX_LANES),
            None => detect_lanes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_antialias_caps_samples_at_zero() {
        let options = EngineOptions::default().disable_antialias(true);
        assert_eq!(options.sample_cap(), 0);
    }

    #[test]
    fn sample_count_never_exceeds_the_shift_table() {
        let options = EngineOptions::default().antialias_samples(50);
        assert_eq!(options.sample_cap(), MAX_ANTIALIAS_SAMPLES);
    }

    #[test]
    fn lane_override_is_clamped() {
        assert_eq!(EngineOptions::default().lanes(0).lane_count(), 1);
        assert_eq!(EngineOptions::default().lanes(1000).lane_count(), MAX_LANES);
    }

    #[test]
    fn detected_lanes_are_in_range() {
        let lanes = detect_lanes();
        assert!(lanes >= 1 && lanes <= MAX_LANES);
    }
}
