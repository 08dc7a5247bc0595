use std::path::Path;

use parking_lot::Mutex;
use tch::{kind::Kind, CModule, Device, Tensor};
use tracing::info;

use crate::config::N_FEATURES;
use crate::error::{PredictError, Result};

/// The sequence model behind the pipeline: a scaled past window in, a
/// scaled future window out. Deterministic given fixed weights; safe to
/// call from concurrent requests.
pub trait Forecaster: Send + Sync {
    fn predict(&self, past: &[[f64; N_FEATURES]]) -> Result<Vec<[f64; N_FEATURES]>>;
}

/// TorchScript-backed forecaster. The module is loaded once at startup;
/// forward calls are serialized behind a mutex since libtorch does not
/// guarantee concurrent forward on a shared CModule.
pub struct TorchForecaster {
    module: Mutex<CModule>,
    device: Device,
    past_steps: usize,
    future_steps: usize,
}

impl TorchForecaster {
    /// Loads the artifact and probes it with a zero forward pass so a
    /// wrong-shaped export fails here, not on the first request.
    pub fn load(path: &Path, past_steps: usize, future_steps: usize) -> Result<Self> {
        let device = Device::Cpu;
        let module = CModule::load_on_device(path, device).map_err(|e| {
            PredictError::ModelUnavailable {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let dummy = Tensor::zeros(
            [1, past_steps as i64, N_FEATURES as i64],
            (Kind::Float, device),
        );
        let out = module
            .forward_ts(&[dummy])
            .map_err(|e| PredictError::ModelUnavailable {
                path: path.display().to_string(),
                reason: format!("warmup forward failed: {e}"),
            })?;
        let size = out.size();
        if size != [1, future_steps as i64, N_FEATURES as i64] {
            return Err(PredictError::ModelUnavailable {
                path: path.display().to_string(),
                reason: format!(
                    "model emits {size:?}, expected [1, {future_steps}, {N_FEATURES}]"
                ),
            });
        }
        info!("loaded model from {} (warmup forward ok)", path.display());

        Ok(Self {
            module: Mutex::new(module),
            device,
            past_steps,
            future_steps,
        })
    }
}

impl Forecaster for TorchForecaster {
    fn predict(&self, past: &[[f64; N_FEATURES]]) -> Result<Vec<[f64; N_FEATURES]>> {
        if past.len() != self.past_steps {
            return Err(PredictError::Forecast(format!(
                "window length mismatch: got {}, expected {}",
                past.len(),
                self.past_steps
            )));
        }

        let flat: Vec<f32> = past.iter().flatten().map(|&x| x as f32).collect();
        let input = Tensor::from_slice(&flat)
            .reshape([1, self.past_steps as i64, N_FEATURES as i64])
            .to_device(self.device);

        let output = {
            let module = self.module.lock();
            module
                .forward_ts(&[input])
                .map_err(|e| PredictError::Forecast(e.to_string()))?
        };

        let flat_out = output.reshape([-1]).to_kind(Kind::Float);
        let values: Vec<f32> =
            Vec::try_from(&flat_out).map_err(|e: tch::TchError| PredictError::Forecast(e.to_string()))?;
        if values.len() != self.future_steps * N_FEATURES {
            return Err(PredictError::Forecast(format!(
                "model returned {} values, expected {}",
                values.len(),
                self.future_steps * N_FEATURES
            )));
        }

        Ok(values
            .chunks_exact(N_FEATURES)
            .map(|chunk| [chunk[0] as f64, chunk[1] as f64, chunk[2] as f64])
            .collect())
    }
}
