use serde::{Deserialize, Serialize};

use crate::error::{PredictError, Result};

/// Feature order is load-bearing: the scaler columns, the model input
/// layout, and the response fields all follow it.
pub const FEATURES: [&str; 3] = ["ppm", "temperature", "humidity"];

pub const N_FEATURES: usize = FEATURES.len();

/// Current schema version; bump when the feature set or layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Cadence and window constants. Must be identical at train time and
/// inference time; the fitted scaler carries a [`SchemaDescriptor`] so a
/// mismatch fails at load instead of silently skewing predictions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub resample_seconds: i64,
    pub past_hours: i64,
    pub future_hours: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            resample_seconds: 30,
            past_hours: 2,
            future_hours: 2,
        }
    }
}

impl PipelineConfig {
    /// Model input length in resampled steps.
    pub fn past_steps(&self) -> usize {
        (self.past_hours * 3600 / self.resample_seconds) as usize
    }

    /// Forecast horizon in resampled steps.
    pub fn future_steps(&self) -> usize {
        (self.future_hours * 3600 / self.resample_seconds) as usize
    }
}

/// Written next to the scaler statistics at train time and checked
/// against the compiled configuration when the server loads them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub version: u32,
    pub features: Vec<String>,
    pub resample_seconds: i64,
    pub past_steps: usize,
    pub future_steps: usize,
}

impl SchemaDescriptor {
    pub fn current(config: &PipelineConfig) -> Self {
        Self {
            version: SCHEMA_VERSION,
            features: FEATURES.iter().map(|s| s.to_string()).collect(),
            resample_seconds: config.resample_seconds,
            past_steps: config.past_steps(),
            future_steps: config.future_steps(),
        }
    }

    /// Fails loudly when the persisted descriptor disagrees with the
    /// running configuration.
    pub fn check(&self, config: &PipelineConfig) -> Result<()> {
        let expected = SchemaDescriptor::current(config);
        if *self != expected {
            return Err(PredictError::SchemaMismatch(format!(
                "persisted {:?}, expected {:?}",
                self, expected
            )));
        }
        Ok(())
    }
}
