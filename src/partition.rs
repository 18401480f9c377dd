// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Splits an image across execution lanes.
//!
//! Pixels are striped, not blocked: pixel `i` belongs to lane
//! `i % lanes`, so lane `k` walks `k, k + lanes, k + 2 * lanes, ...`.
//! The expensive pixels (those near the boundary of the set) tend to
//! cluster, and striping spreads each cluster evenly over every lane.
//!
//! Lanes cannot safely share one `&mut` buffer with interleaved
//! ownership, so each lane renders into its own small buffer, in the
//! order of its indices, and the results are merged back into the
//! output once every lane has been joined.

use std::iter::StepBy;
use std::ops::Range;

/// The indices of `0..total` owned by `lane` out of `lanes`.
#[inline]
pub fn lane_indices(total: usize, lanes: usize, lane: usize) -> StepBy<Range<usize>> {
    (lane.min(total)..total).step_by(lanes.max(1))
}

/// How many of `0..total` lane `lane` owns.
#[inline]
pub fn lane_len(total: usize, lanes: usize, lane: usize) -> usize {
    if lane >= total {
        0
    } else {
        (total - lane + lanes - 1) / lanes
    }
}

/// Runs `render` once per lane and scatters the results into `out`.
/// `render(lane, indices)` must return one value per index, in the
/// order the indices were handed out.  Blocks until every lane has
/// finished; a panicking lane is re-raised on the caller.
pub fn dispatch<F>(out: &mut [u32], lanes: usize, render: F)
where
    F: Fn(usize, StepBy<Range<usize>>) -> Vec<u32> + Sync,
{
    let total = out.len();
    let lanes = lanes.max(1).min(total.max(1));

    if lanes == 1 {
        let values = render(0, lane_indices(total, 1, 0));
        merge(out, 1, 0, values);
        return;
    }

    let render = &render;
    let results: Vec<Vec<u32>> = crossbeam::scope(|spawner| {
        let handles: Vec<_> = (0..lanes)
            .map(|lane| spawner.spawn(move |_| render(lane, lane_indices(total, lanes, lane))))
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(lane, handle)| {
                log::trace!("Waiting for lane {}", lane);
                handle
                    .join()
                    .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
            })
            .collect()
    })
    .unwrap_or_else(|panic| std::panic::resume_unwind(panic));

    for (lane, values) in results.into_iter().enumerate() {
        merge(out, lanes, lane, values);
    }
}

fn merge(out: &mut [u32], lanes: usize, lane: usize, values: Vec<u32>) {
    debug_assert_eq!(values.len(), lane_len(out.len(), lanes, lane));
    for (slot, value) in out.iter_mut().skip(lane).step_by(lanes).zip(values) {
        *slot = value;
    }
}
