// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2022 Adrian <adrian.eddy at gmail>

use crate::gpmf::SampleRecord;

/// One decoded sample row with its time in seconds on the file's sensor clock.
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedSample {
    pub time: f64,
    pub fields: Vec<f64>,
}

/// Sample count observed in one payload interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PayloadInterval {
    pub t_in: f64,
    pub t_out: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRate {
    pub rate: f64,  // Samples per second
    pub start: f64, // Time of the first sample
    pub end: f64,
}

/// `count` timestamps spread uniformly over `[t_in, t_out)`.
pub fn payload_timestamps(t_in: f64, t_out: f64, count: usize) -> Vec<f64> {
    let delta_t = t_out - t_in;
    (0..count).map(|i| t_in + (i as f64 * delta_t) / count as f64).collect()
}

/// Fits payload start times against the running sample index to find the sensor
/// stream's start time and rate. The end of the last payload closes the fit.
pub fn estimate_sample_rate(intervals: &[PayloadInterval]) -> Option<SampleRate> {
    let used: Vec<&PayloadInterval> = intervals.iter().filter(|x| x.count > 0).collect();
    let first = *used.first()?;
    let last = *used.last()?;
    let total: usize = used.iter().map(|x| x.count).sum();

    let single = || {
        let dt = first.t_out - first.t_in;
        SampleRate {
            rate: if dt > 0.0 { first.count as f64 / dt } else { 0.0 },
            start: first.t_in,
            end: first.t_out,
        }
    };
    if used.len() == 1 {
        return Some(single());
    }

    let mut points = Vec::with_capacity(used.len() + 1);
    let mut index = 0usize;
    for p in &used {
        points.push((index as f64, p.t_in));
        index += p.count;
    }
    points.push((total as f64, last.t_out));

    let n = points.len() as f64;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    let (sxx, sxy) = points.iter().fold((0.0, 0.0), |(sxx, sxy), (x, y)| (sxx + x * x, sxy + x * y));
    let denom = n * sxx - sx * sx;
    if denom == 0.0 {
        return Some(single());
    }
    let slope = (n * sxy - sx * sy) / denom;
    let intercept = (sy - slope * sx) / n;

    Some(SampleRate {
        rate: if slope > 0.0 { 1.0 / slope } else { 0.0 },
        start: intercept,
        end: intercept + slope * total as f64,
    })
}

/// Accumulates decoded records payload by payload and assigns each row a timestamp.
#[derive(Debug, Default)]
pub struct TimestampReconstructor {
    samples: Vec<TimestampedSample>,
    intervals: Vec<PayloadInterval>,
    out_of_order: usize,
}

impl TimestampReconstructor {
    pub fn new() -> Self { Self::default() }

    pub fn push_payload(&mut self, t_in: f64, t_out: f64, records: &[SampleRecord]) {
        let has_rows = records.iter().any(|r| r.count > 0 && r.width > 0);
        if let Some(prev) = self.samples.last().filter(|_| has_rows) {
            if t_in < prev.time {
                log::warn!("Payload at {t_in:.3}s starts before the previous sample at {:.3}s", prev.time);
                self.out_of_order += 1;
            }
        }
        let mut count = 0;
        for record in records {
            if record.count == 0 || record.width == 0 {
                continue;
            }
            let times = payload_timestamps(t_in, t_out, record.count);
            for (time, row) in times.into_iter().zip(record.rows()) {
                self.samples.push(TimestampedSample { time, fields: row.to_vec() });
            }
            count += record.count;
        }
        self.intervals.push(PayloadInterval { t_in, t_out, count });
    }

    pub fn len(&self) -> usize { self.samples.len() }
    pub fn is_empty(&self) -> bool { self.samples.is_empty() }

    /// Payloads that started before the last sample already collected.
    pub fn out_of_order_payloads(&self) -> usize { self.out_of_order }

    /// Shifts every timestamp by the estimated sensor stream start.
    pub fn finish(self) -> Vec<TimestampedSample> {
        let start = estimate_sample_rate(&self.intervals).map(|r| r.start).unwrap_or(0.0);
        log::debug!("Sensor stream start: {start:.3}s");
        let mut samples = self.samples;
        for s in &mut samples {
            s.time += start;
        }
        samples
    }
}
