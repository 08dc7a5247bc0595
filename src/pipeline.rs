use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{PipelineConfig, N_FEATURES};
use crate::error::{PredictError, Result};
use crate::frame::{parse_payload, parse_records};
use crate::model::Forecaster;
use crate::resample::resample;
use crate::scaler::Scaler;
use crate::window::{last_window, training_pairs};

/// Fraction of training pairs held out for validation.
const VALIDATION_FRACTION: f64 = 0.1;
/// Fixed seed so the train/validation split is reproducible.
const SPLIT_SEED: u64 = 42;

// ---------- Inference ----------

/// One forecast step in physical units.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub timestamp: DateTime<Utc>,
    pub ppm: f64,
    pub temperature: f64,
    pub humidity: f64,
}

/// Everything a request handler needs, built once at startup and shared
/// read-only across concurrent requests. Never reassigned.
pub struct InferenceContext {
    pub forecaster: Arc<dyn Forecaster>,
    pub scaler: Scaler,
    pub config: PipelineConfig,
}

impl InferenceContext {
    /// Runs one request end to end: parse → resample → length check →
    /// scale → forecast → inverse scale → timestamp reconstruction.
    /// Any stage failure short-circuits with its originating kind.
    /// `now` only anchors synthetic timestamps for payloads that carry
    /// none; predicted timestamps always continue from the last
    /// observed input slot.
    pub fn run(&self, payload: &Value, now: DateTime<Utc>) -> Result<Vec<Prediction>> {
        let frame = parse_payload(payload, &self.config, now)?;
        debug!("parsed payload into {} samples", frame.len());

        let fixed = resample(&frame, self.config.resample_seconds)?;
        debug!("resampled to {} slots", fixed.len());

        let past_steps = self.config.past_steps();
        let window = last_window(fixed.rows(), past_steps)?;

        let scaled = self.scaler.transform(window);
        let forecast_scaled = self.forecaster.predict(&scaled)?;
        let forecast = self.scaler.inverse_transform(&forecast_scaled);

        // Continue the observed grid, not the wall clock: the first
        // prediction sits one cadence step after the last input slot,
        // at the cadence the frame was actually resampled to.
        let anchor = fixed.last_timestamp();
        let step = Duration::seconds(fixed.interval_seconds());
        Ok(forecast
            .iter()
            .enumerate()
            .map(|(k, row)| Prediction {
                timestamp: anchor + step * (k as i32 + 1),
                ppm: row[0],
                temperature: row[1],
                humidity: row[2],
            })
            .collect())
    }
}

// ---------- Training preparation ----------

/// A flat row-major batch ready to be handed to the training procedure
/// as a `(len, steps, features)` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    pub data: Vec<f32>,
    pub len: usize,
    pub steps: usize,
}

impl TensorBatch {
    fn from_windows(windows: &[&[[f64; N_FEATURES]]], steps: usize) -> Self {
        let mut data = Vec::with_capacity(windows.len() * steps * N_FEATURES);
        for window in windows {
            for row in *window {
                data.extend(row.iter().map(|&x| x as f32));
            }
        }
        Self {
            data,
            len: windows.len(),
            steps,
        }
    }

    pub fn shape(&self) -> [i64; 3] {
        [self.len as i64, self.steps as i64, N_FEATURES as i64]
    }
}

/// Output of the offline preparation stage: the fitted scaler plus
/// shuffled, split example batches in scaled space.
#[derive(Debug)]
pub struct TrainingSet {
    pub scaler: Scaler,
    pub x_train: TensorBatch,
    pub y_train: TensorBatch,
    pub x_val: TensorBatch,
    pub y_val: TensorBatch,
}

/// Turns historical raw records into training examples with the exact
/// same resample/scale semantics the inference path uses. Pairs whose
/// span still contains a missing slot (an outage longer than the gap
/// limit) are dropped rather than fed to the model as NaN.
pub fn prepare_training(records: &[Value], config: &PipelineConfig) -> Result<TrainingSet> {
    let frame = parse_records(records)?;
    debug!("parsed {} usable records", frame.len());

    let fixed = resample(&frame, config.resample_seconds)?;
    let scaler = Scaler::fit(fixed.rows())?;
    let scaled = scaler.transform(fixed.rows());

    let past_steps = config.past_steps();
    let future_steps = config.future_steps();
    let mut pairs: Vec<_> = training_pairs(&scaled, past_steps, future_steps)
        .into_iter()
        .filter(|pair| {
            pair.past
                .iter()
                .chain(pair.future)
                .all(|row| row.iter().all(|x| x.is_finite()))
        })
        .collect();
    if pairs.is_empty() {
        return Err(PredictError::InsufficientHistory {
            need: past_steps + future_steps,
            got: scaled.len(),
        });
    }

    let mut rng = rand::rngs::StdRng::seed_from_u64(SPLIT_SEED);
    pairs.shuffle(&mut rng);

    let n_val = if pairs.len() < 2 {
        0
    } else {
        (((pairs.len() as f64) * VALIDATION_FRACTION).ceil() as usize).clamp(1, pairs.len() - 1)
    };
    let (val, train) = pairs.split_at(n_val);

    fn past_of<'a>(ps: &[crate::window::WindowPair<'a>]) -> Vec<&'a [[f64; N_FEATURES]]> {
        ps.iter().map(|p| p.past).collect::<Vec<_>>()
    }
    fn future_of<'a>(ps: &[crate::window::WindowPair<'a>]) -> Vec<&'a [[f64; N_FEATURES]]> {
        ps.iter().map(|p| p.future).collect::<Vec<_>>()
    }

    Ok(TrainingSet {
        x_train: TensorBatch::from_windows(&past_of(train), past_steps),
        y_train: TensorBatch::from_windows(&future_of(train), future_steps),
        x_val: TensorBatch::from_windows(&past_of(val), past_steps),
        y_val: TensorBatch::from_windows(&future_of(val), future_steps),
        scaler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    /// Echoes the last observed row across the whole horizon.
    struct HoldForecaster {
        future_steps: usize,
    }

    impl Forecaster for HoldForecaster {
        fn predict(&self, past: &[[f64; N_FEATURES]]) -> Result<Vec<[f64; N_FEATURES]>> {
            let last = *past.last().ok_or(PredictError::EmptyInput)?;
            Ok(vec![last; self.future_steps])
        }
    }

    fn default_config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn context() -> InferenceContext {
        let cfg = default_config();
        let rows: Vec<[f64; N_FEATURES]> = (0..10)
            .map(|i| [400.0 + i as f64, 20.0 + i as f64, 40.0 + i as f64])
            .collect();
        InferenceContext {
            forecaster: Arc::new(HoldForecaster {
                future_steps: cfg.future_steps(),
            }),
            scaler: Scaler::fit(&rows).unwrap(),
            config: cfg,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn dense_payload(n: usize) -> Value {
        let samples: Vec<Value> = (0..n)
            .map(|i| json!([400.0 + (i % 7) as f64, 22.0, 45.0]))
            .collect();
        json!(samples)
    }

    #[test]
    fn insufficient_history_reports_need_and_got() {
        let ctx = context();
        // 100 cadence-spaced synthetic samples resample into 100 slots
        let err = ctx.run(&dense_payload(100), now()).unwrap_err();
        match err {
            PredictError::InsufficientHistory { need, got } => {
                assert_eq!(need, 240);
                assert_eq!(got, 100);
            }
            other => panic!("expected InsufficientHistory, got {other:?}"),
        }
    }

    #[test]
    fn predictions_continue_the_observed_grid() {
        let ctx = context();
        let preds = ctx.run(&dense_payload(241), now()).unwrap();
        assert_eq!(preds.len(), ctx.config.future_steps());
        // synthetic axis ends at `now`, and the grid is anchored there
        assert_eq!(preds[0].timestamp, now() + Duration::seconds(30));
        assert_eq!(
            preds[1].timestamp - preds[0].timestamp,
            Duration::seconds(30)
        );
    }

    #[test]
    fn inverse_scaling_restores_physical_units() {
        let ctx = context();
        let preds = ctx.run(&dense_payload(241), now()).unwrap();
        // HoldForecaster repeats the last scaled row, so every
        // prediction must equal the last resampled input in physical units
        for p in &preds {
            assert!((p.temperature - 22.0).abs() < 1e-9);
            assert!((p.humidity - 45.0).abs() < 1e-9);
        }
    }

    fn dense_records(n: usize, start: DateTime<Utc>) -> Vec<Value> {
        (0..n)
            .map(|i| {
                let ts = start + Duration::seconds(30 * i as i64);
                json!({
                    "timestamp": ts.to_rfc3339(),
                    "payload": { "ppm": 400.0 + (i % 5) as f64,
                                 "temperature": 20.0 + (i % 3) as f64,
                                 "humidity": 40.0 + (i % 4) as f64 }
                })
            })
            .collect()
    }

    #[test]
    fn training_split_covers_all_pairs_exactly_once() {
        let cfg = default_config();
        // 500 slots -> 500 - 480 + 1 = 21 pairs
        let records = dense_records(500, now());
        let set = prepare_training(&records, &cfg).unwrap();
        assert_eq!(set.x_train.len + set.x_val.len, 21);
        assert_eq!(set.x_val.len, 3); // ceil(21 * 0.1)
        assert_eq!(set.x_train.shape(), [18, 240, 3]);
        assert_eq!(set.y_train.shape(), [18, 240, 3]);
    }

    #[test]
    fn training_on_short_history_is_fatal() {
        let cfg = default_config();
        let records = dense_records(100, now());
        assert!(matches!(
            prepare_training(&records, &cfg),
            Err(PredictError::InsufficientHistory { .. })
        ));
    }
}
