use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{PipelineConfig, SchemaDescriptor, FEATURES, N_FEATURES};
use crate::error::{PredictError, Result};

/// Fitted per-feature standardization: `scaled = (x - mean) / scale`.
/// Fit once on training data, persisted, and reused unchanged for every
/// inference — refitting on a live request's small window would bias
/// predictions against the training distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    mean: [f64; N_FEATURES],
    scale: [f64; N_FEATURES],
}

/// On-disk form: statistics plus the schema they were fit under.
#[derive(Debug, Serialize, Deserialize)]
struct ScalerFile {
    schema: SchemaDescriptor,
    #[serde(flatten)]
    scaler: Scaler,
}

impl Scaler {
    /// Per-column mean and population standard deviation over the rows
    /// with all components finite (missing slots never contribute).
    pub fn fit(rows: &[[f64; N_FEATURES]]) -> Result<Self> {
        let complete: Vec<&[f64; N_FEATURES]> = rows
            .iter()
            .filter(|row| row.iter().all(|x| x.is_finite()))
            .collect();
        if complete.is_empty() {
            return Err(PredictError::EmptyInput);
        }
        let n = complete.len() as f64;

        let mut mean = [0.0; N_FEATURES];
        for row in &complete {
            for (m, x) in mean.iter_mut().zip(row.iter()) {
                *m += x;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut scale = [0.0; N_FEATURES];
        for row in &complete {
            for (v, (x, m)) in scale.iter_mut().zip(row.iter().zip(&mean)) {
                let d = x - m;
                *v += d * d;
            }
        }
        for (f, v) in scale.iter_mut().enumerate() {
            *v = (*v / n).sqrt();
            if *v <= 0.0 {
                return Err(PredictError::ZeroVariance {
                    feature: FEATURES[f],
                });
            }
        }

        Ok(Self { mean, scale })
    }

    pub fn transform(&self, rows: &[[f64; N_FEATURES]]) -> Vec<[f64; N_FEATURES]> {
        rows.iter()
            .map(|row| {
                let mut out = [0.0; N_FEATURES];
                for f in 0..N_FEATURES {
                    out[f] = (row[f] - self.mean[f]) / self.scale[f];
                }
                out
            })
            .collect()
    }

    /// Exact algebraic inverse of [`Scaler::transform`].
    pub fn inverse_transform(&self, rows: &[[f64; N_FEATURES]]) -> Vec<[f64; N_FEATURES]> {
        rows.iter()
            .map(|row| {
                let mut out = [0.0; N_FEATURES];
                for f in 0..N_FEATURES {
                    out[f] = row[f] * self.scale[f] + self.mean[f];
                }
                out
            })
            .collect()
    }

    /// Persists the statistics next to the schema descriptor so a
    /// future load can detect configuration drift.
    pub fn save(&self, path: &Path, config: &PipelineConfig) -> Result<()> {
        let file = ScalerFile {
            schema: SchemaDescriptor::current(config),
            scaler: self.clone(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| PredictError::ScalerPersist(e.to_string()))?;
        fs::write(path, text).map_err(|e| {
            PredictError::ScalerPersist(format!("cannot write {}: {e}", path.display()))
        })?;
        info!("saved scaler to {}", path.display());
        Ok(())
    }

    /// Loads a previously fitted scaler, refusing to serve one fit
    /// under a different cadence, window, or feature layout.
    pub fn load(path: &Path, config: &PipelineConfig) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            PredictError::ScalerNotReady(format!("cannot read {}: {e}", path.display()))
        })?;
        let file: ScalerFile = serde_json::from_str(&text).map_err(|e| {
            PredictError::ScalerNotReady(format!("cannot parse {}: {e}", path.display()))
        })?;
        file.schema.check(config)?;
        for (f, v) in file.scaler.scale.iter().enumerate() {
            if !v.is_finite() || *v <= 0.0 {
                return Err(PredictError::ScalerNotReady(format!(
                    "persisted scale for '{}' is {v}",
                    FEATURES[f]
                )));
            }
        }
        Ok(file.scaler)
    }
}
