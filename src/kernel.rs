// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The escape-time kernel.  Takes a point `c` on the complex plane,
//! starts at `z = 0` and repeatedly applies `z ← z^pow + c`, counting
//! how many steps it takes for `|z|` to leave the escape radius.
//! Points that never leave within `max_iterations` steps are taken to
//! be inside the set.
//!
//! All arithmetic is single precision.  The SIMD and GPU backends
//! repeat exactly this sequence of multiplies and adds, which is what
//! keeps their output identical to this one.

use num::Complex;

use crate::params::EngineParameters;

/// `z^pow` by repeated multiplication: `pow - 1` complex multiplies,
/// and none at all for `pow == 1`.
#[inline]
pub fn power(z: Complex<f32>, pow: u32) -> Complex<f32> {
    let mut acc = z;
    for _ in 1..pow {
        acc = acc * z;
    }
    acc
}

/// Number of steps before the orbit of `c` escapes, in
/// `0..=max_iterations`.  Comparison is on the squared magnitude.
#[inline]
pub fn escape_time(c: Complex<f32>, params: &EngineParameters) -> u32 {
    let radius_sq = params.escape_radius_sq();
    let mut z: Complex<f32> = Complex { re: 0.0, im: 0.0 };
    let mut iterations = 0;
    while z.norm_sqr() <= radius_sq && iterations < params.max_iterations {
        z = power(z, params.exponent) + c;
        iterations += 1;
    }
    iterations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_iterations: u32, exponent: u32) -> EngineParameters {
        EngineParameters::new(max_iterations, exponent, 3.0)
    }

    #[test]
    fn origin_never_escapes_the_classic_set() {
        for &max in &[1, 2, 17, 100, 5000] {
            assert_eq!(escape_time(Complex::new(0.0, 0.0), &params(max, 2)), max);
        }
    }

    #[test]
    fn far_points_escape_after_one_step() {
        for pow in 1..12 {
            assert_eq!(escape_time(Complex::new(4.0, 0.0), &params(100, pow)), 1);
        }
    }

    #[test]
    fn boundary_point_is_bounded_by_the_cap() {
        // c = -2 is on the boundary; its orbit sits at 2 forever.
        assert_eq!(escape_time(Complex::new(-2.0, 0.0), &params(250, 2)), 250);
    }

    #[test]
    fn known_escape_counts() {
        // z1 = 1, z2 = 2, z3 = 5: |z3|^2 = 25 > 9.
        assert_eq!(escape_time(Complex::new(1.0, 0.0), &params(100, 2)), 3);
        // z1 = 1, z2 = 2, z3 = 9: cubic grows faster.
        assert_eq!(escape_time(Complex::new(1.0, 0.0), &params(100, 3)), 3);
        // Linear recurrence: z_n = n, escapes once n > 3.
        assert_eq!(escape_time(Complex::new(1.0, 0.0), &params(100, 1)), 4);
    }

    #[test]
    fn power_matches_repeated_multiplication() {
        let z = Complex::new(0.5_f32, -0.25);
        assert_eq!(power(z, 1), z);
        assert_eq!(power(z, 2), z * z);
        assert_eq!(power(z, 4), z * z * z * z);
    }
}
