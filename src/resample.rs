// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use crate::timestamps::TimestampedSample;

/// A sample picked for one tick of the 1 Hz grid.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPoint {
    pub offset_s: u64,       // Whole seconds from the first sample
    pub source_index: usize, // Index of the chosen input sample
    pub fields: Vec<f64>,
}

/// Index of the sample closest to `target`, first one on ties.
fn nearest_scan(times: &[f64], target: f64) -> usize {
    times.iter()
        .map(|t| (t - target).abs())
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|x| x.0)
        .unwrap_or(0)
}

/// Same as `nearest_scan` for non-decreasing `times`.
fn nearest_sorted(times: &[f64], target: f64) -> usize {
    let upper = times.partition_point(|t| *t < target);
    if upper == 0 {
        return 0;
    }
    let lower_time = times[upper - 1];
    let lower = times.partition_point(|t| *t < lower_time);
    if upper == times.len() || (target - lower_time).abs() <= (times[upper] - target).abs() {
        lower
    } else {
        upper
    }
}

/// Resamples to one point per second by nearest neighbour. The grid runs from the
/// first sample's time to `ceil(last - first)` seconds after it; values are copied,
/// never interpolated.
pub fn normalize_to_1hz(samples: &[TimestampedSample]) -> Vec<NormalizedPoint> {
    let (Some(first), Some(last)) = (samples.first(), samples.last()) else {
        return Vec::new();
    };
    let t_start = first.time;
    let duration = (last.time - t_start).ceil();
    if !(duration >= 0.0) {
        log::warn!("Samples end before they start ({:.3}s to {:.3}s)", t_start, last.time);
        return Vec::new();
    }

    let times: Vec<f64> = samples.iter().map(|s| s.time).collect();
    let sorted = times.windows(2).all(|w| w[0] <= w[1]);

    (0..=duration as u64).map(|offset_s| {
        let target = t_start + offset_s as f64;
        let source_index = if sorted { nearest_sorted(&times, target) } else { nearest_scan(&times, target) };
        NormalizedPoint { offset_s, source_index, fields: samples[source_index].fields.clone() }
    }).collect()
}
