// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The vectorized CPU backend.
//!
//! Pixel ownership is the same stripe as the scalar backend, but each
//! lane gathers its pixels eight at a time and runs the whole
//! iterate-and-compare loop on 256-bit AVX vectors.  A vector is
//! abandoned as soon as all eight of its points have escaped.
//!
//! The vector loop performs the same multiplies, adds and compares, in
//! the same order, as `kernel::escape_time`, so the two backends
//! produce identical images.

use std::iter::StepBy;
use std::ops::Range;
use std::sync::{Arc, Mutex};

use crate::backend::{Backend, BackendKind, Surface};
use crate::color::color_map;
use crate::errors::EngineError;
use crate::params::{EngineParameters, ParameterCell};
use crate::partition::{dispatch, lane_len};
use crate::planes::{PlaneMapper, Viewport};
use crate::threaded::render_indices;

/// Points per vector.
pub const VECTOR_WIDTH: usize = 8;

/// Does the host have the instructions this backend is built on?
pub fn is_supported() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

pub struct SimdBackend {
    lanes: usize,
    params: Arc<ParameterCell>,
    surface: Mutex<Surface>,
}

impl SimdBackend {
    pub fn new(
        width: usize,
        height: usize,
        lanes: usize,
        params: Arc<ParameterCell>,
    ) -> Result<Self, EngineError> {
        if !is_supported() {
            return Err(EngineError::backend_init(
                BackendKind::SimdCpu,
                "host CPU does not advertise AVX",
            ));
        }
        log::debug!("Starting SIMD CPU engine with {} lanes", lanes);
        Ok(SimdBackend {
            lanes: lanes.max(1),
            params,
            surface: Mutex::new(Surface::new(width, height)?),
        })
    }
}

fn render_lane(
    plane: &PlaneMapper,
    params: &EngineParameters,
    total: usize,
    lanes: usize,
    lane: usize,
    indices: StepBy<Range<usize>>,
) -> Vec<u32> {
    let mut out = Vec::with_capacity(lane_len(total, lanes, lane));
    let mut batch = [0usize; VECTOR_WIDTH];
    let mut filled = 0;

    for offset in indices {
        batch[filled] = offset;
        filled += 1;
        if filled == VECTOR_WIDTH {
            let mut re = [0f32; VECTOR_WIDTH];
            let mut im = [0f32; VECTOR_WIDTH];
            for (k, &offset) in batch.iter().enumerate() {
                let point = plane.offset_to_point(offset);
                re[k] = point.re;
                im[k] = point.im;
            }
            let counts = escape_times(&re, &im, params);
            out.extend(counts.iter().map(|&n| color_map(n, params.max_iterations)));
            filled = 0;
        }
    }

    // Fewer than a vector's worth left over.
    out.extend(render_indices(plane, params, batch[..filled].iter().cloned()));
    out
}

#[cfg(target_arch = "x86_64")]
fn escape_times(
    re: &[f32; VECTOR_WIDTH],
    im: &[f32; VECTOR_WIDTH],
    params: &EngineParameters,
) -> [u32; VECTOR_WIDTH] {
    // SimdBackend::new refuses to build without AVX.
    unsafe { avx::escape_times(re, im, params) }
}

#[cfg(not(target_arch = "x86_64"))]
fn escape_times(
    re: &[f32; VECTOR_WIDTH],
    im: &[f32; VECTOR_WIDTH],
    params: &EngineParameters,
) -> [u32; VECTOR_WIDTH] {
    let mut out = [0u32; VECTOR_WIDTH];
    for k in 0..VECTOR_WIDTH {
        out[k] = crate::kernel::escape_time(num::Complex::new(re[k], im[k]), params);
    }
    out
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use std::arch::x86_64::*;

    use super::VECTOR_WIDTH;
    use crate::params::EngineParameters;

    #[inline]
    #[target_feature(enable = "avx")]
    unsafe fn power(z_re: __m256, z_im: __m256, pow: u32) -> (__m256, __m256) {
        let mut re = z_re;
        let mut im = z_im;
        for _ in 1..pow {
            let next_re = _mm256_sub_ps(_mm256_mul_ps(re, z_re), _mm256_mul_ps(im, z_im));
            im = _mm256_add_ps(_mm256_mul_ps(re, z_im), _mm256_mul_ps(im, z_re));
            re = next_re;
        }
        (re, im)
    }

    #[target_feature(enable = "avx")]
    pub unsafe fn escape_times(
        re: &[f32; VECTOR_WIDTH],
        im: &[f32; VECTOR_WIDTH],
        params: &EngineParameters,
    ) -> [u32; VECTOR_WIDTH] {
        let c_re = _mm256_loadu_ps(re.as_ptr());
        let c_im = _mm256_loadu_ps(im.as_ptr());
        let radius_sq = _mm256_set1_ps(params.escape_radius_sq());
        let one = _mm256_set1_ps(1.0);

        let mut z_re = _mm256_setzero_ps();
        let mut z_im = _mm256_setzero_ps();
        let mut counts = _mm256_setzero_ps();
        // Lanes drop out of this mask for good once they escape.
        let mut active = _mm256_castsi256_ps(_mm256_set1_epi32(-1));

        for _ in 0..params.max_iterations {
            let norm = _mm256_add_ps(_mm256_mul_ps(z_re, z_re), _mm256_mul_ps(z_im, z_im));
            active = _mm256_and_ps(active, _mm256_cmp_ps(norm, radius_sq, _CMP_LE_OQ));
            if _mm256_movemask_ps(active) == 0 {
                break;
            }
            counts = _mm256_add_ps(counts, _mm256_and_ps(active, one));

            let (p_re, p_im) = power(z_re, z_im, params.exponent);
            z_re = _mm256_add_ps(p_re, c_re);
            z_im = _mm256_add_ps(p_im, c_im);
        }

        let mut lanes = [0f32; VECTOR_WIDTH];
        _mm256_storeu_ps(lanes.as_mut_ptr(), counts);
        let mut out = [0u32; VECTOR_WIDTH];
        for (slot, &count) in out.iter_mut().zip(lanes.iter()) {
            *slot = count as u32;
        }
        out
    }
}

impl Backend for SimdBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SimdCpu
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
        let total = out.len();
        let lanes = self.lanes.min(total.max(1));
        dispatch(out, lanes, |lane, indices| {
            render_lane(&plane, &params, total, lanes, lane, indices)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::escape_time;
    use crate::threaded::ScalarBackend;
    use num::Complex;

    fn cell(max_iterations: u32, exponent: u32) -> Arc<ParameterCell> {
        Arc::new(ParameterCell::new(EngineParameters::new(max_iterations, exponent, 3.0)))
    }

    #[test]
    fn vector_counts_match_the_scalar_kernel() {
        if !is_supported() {
            return;
        }
        let re = [-2.0, -1.0, -0.75, -0.5, 0.0, 0.25, 0.3, 4.0];
        let im = [0.0, 0.1, 0.1, 0.5, 0.0, 0.5, -0.02, 0.0];
        for &pow in &[1, 2, 3, 7] {
            let params = EngineParameters::new(300, pow, 3.0);
            let counts = escape_times(&re, &im, &params);
            for k in 0..VECTOR_WIDTH {
                assert_eq!(counts[k], escape_time(Complex::new(re[k], im[k]), &params));
            }
        }
    }

    #[test]
    fn images_match_the_scalar_backend() {
        if !is_supported() {
            return;
        }
        let vp = Viewport::new(-2.5, -1.25, 3.5, 2.5);
        for &(width, height, lanes) in &[(37, 23, 4), (8, 8, 1), (5, 3, 16), (64, 48, 7)] {
            let params = cell(250, 2);
            let scalar = ScalarBackend::new(width, height, lanes, params.clone()).unwrap();
            let simd = SimdBackend::new(width, height, lanes, params).unwrap();
            let mut expected = vec![0; width * height];
            let mut actual = vec![0; width * height];
            scalar.generate(vp, &mut expected).unwrap();
            simd.generate(vp, &mut actual).unwrap();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn construction_follows_host_support() {
        let built = SimdBackend::new(4, 4, 2, cell(10, 2));
        assert_eq!(built.is_ok(), is_supported());
    }
}
