use chrono::{DateTime, Duration, Utc};

use crate::config::N_FEATURES;
use crate::error::{PredictError, Result};
use crate::frame::TimeSeriesFrame;

/// Maximum run of consecutive empty bins still eligible for gap
/// interpolation. Longer outages stay missing rather than fabricating
/// physically meaningless readings.
pub const GAP_LIMIT: usize = 10;

/// A frame snapped onto a fixed grid: rows sit exactly
/// `interval_seconds` apart starting at `start`. Slots with no
/// interpolation source hold NaN in every component.
#[derive(Debug, Clone)]
pub struct FixedCadenceFrame {
    start: DateTime<Utc>,
    interval_seconds: i64,
    rows: Vec<[f64; N_FEATURES]>,
}

impl FixedCadenceFrame {
    pub fn rows(&self) -> &[[f64; N_FEATURES]] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn interval_seconds(&self) -> i64 {
        self.interval_seconds
    }

    pub fn timestamp_at(&self, slot: usize) -> DateTime<Utc> {
        self.start + Duration::seconds(self.interval_seconds * slot as i64)
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.timestamp_at(self.rows.len() - 1)
    }
}

/// Snaps an arbitrarily-spaced frame onto a fixed grid: half-open bins
/// of `interval_seconds` anchored at the first timestamp, each bin the
/// arithmetic mean of the samples falling in it, then short gaps filled
/// by time-weighted linear interpolation.
pub fn resample(frame: &TimeSeriesFrame, interval_seconds: i64) -> Result<FixedCadenceFrame> {
    if frame.is_empty() {
        return Err(PredictError::EmptyInput);
    }
    debug_assert!(interval_seconds > 0);

    let start = frame.first_timestamp();
    let span_ms = (frame.last_timestamp() - start).num_milliseconds();
    let interval_ms = interval_seconds * 1000;
    let n_bins = (span_ms / interval_ms) as usize + 1;

    let mut sums = vec![[0.0; N_FEATURES]; n_bins];
    let mut counts = vec![0usize; n_bins];
    for sample in frame.samples() {
        let offset_ms = (sample.timestamp - start).num_milliseconds();
        let bin = (offset_ms / interval_ms) as usize;
        let features = sample.features();
        for (acc, x) in sums[bin].iter_mut().zip(features) {
            *acc += x;
        }
        counts[bin] += 1;
    }

    let mut rows: Vec<[f64; N_FEATURES]> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &count)| {
            if count == 0 {
                [f64::NAN; N_FEATURES]
            } else {
                sum.map(|acc| acc / count as f64)
            }
        })
        .collect();

    fill_gaps(&mut rows, GAP_LIMIT);

    Ok(FixedCadenceFrame {
        start,
        interval_seconds,
        rows,
    })
}

fn is_missing(row: &[f64; N_FEATURES]) -> bool {
    row.iter().any(|x| x.is_nan())
}

/// Linear interpolation across runs of missing rows, bounded by `limit`.
/// A run longer than the limit is left missing in full, as are runs with
/// no known neighbor on either side (frame edges).
fn fill_gaps(rows: &mut [[f64; N_FEATURES]], limit: usize) {
    let mut i = 0;
    while i < rows.len() {
        if !is_missing(&rows[i]) {
            i += 1;
            continue;
        }
        let run_start = i;
        while i < rows.len() && is_missing(&rows[i]) {
            i += 1;
        }
        let run_len = i - run_start;
        // needs a known row on both sides and a short enough run
        if run_start == 0 || i == rows.len() || run_len > limit {
            continue;
        }
        let left = rows[run_start - 1];
        let right = rows[i];
        let denom = (run_len + 1) as f64;
        for (k, row) in rows[run_start..i].iter_mut().enumerate() {
            let w = (k + 1) as f64 / denom;
            for f in 0..N_FEATURES {
                row[f] = left[f] + (right[f] - left[f]) * w;
            }
        }
    }
}
