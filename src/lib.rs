//! Environmental time-series forecasting pipeline: reconciles irregular
//! sensor samples (gas ppm, temperature, humidity) onto a fixed cadence,
//! standardizes them with a persisted scaler, and windows them for a
//! sequence-to-sequence model. The same pipeline backs offline training
//! preparation and the online prediction endpoint, which is the point:
//! both sides must see statistically comparable data.

pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod pipeline;
pub mod resample;
pub mod scaler;
pub mod window;

pub use config::{PipelineConfig, SchemaDescriptor, FEATURES, N_FEATURES};
pub use error::{PredictError, Result};
pub use frame::{Sample, TimeSeriesFrame};
pub use model::{Forecaster, TorchForecaster};
pub use pipeline::{prepare_training, InferenceContext, Prediction, TensorBatch, TrainingSet};
pub use resample::{resample, FixedCadenceFrame, GAP_LIMIT};
pub use scaler::Scaler;
