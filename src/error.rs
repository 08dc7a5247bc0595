use thiserror::Error;

/// Everything that can go wrong between receiving raw samples and
/// emitting timestamped predictions. Request-side kinds map to 4xx at
/// the HTTP boundary, the rest to 5xx.
#[derive(Debug, Error)]
pub enum PredictError {
    /// Training-path record carries features but no usable timestamp.
    #[error("record has no timestamp (training input requires one per record)")]
    MissingTimestamp,

    /// A feature value is absent, non-numeric, or non-finite.
    #[error("invalid sample at index {index}: {reason}")]
    InvalidSample { index: usize, reason: String },

    /// No samples to work with.
    #[error("empty input")]
    EmptyInput,

    /// No fitted scaler state is available.
    #[error("scaler not ready: {0}")]
    ScalerNotReady(String),

    /// Fewer resampled rows than the model's input window.
    #[error("not enough timesteps after resampling: need {need}, got {got}")]
    InsufficientHistory { need: usize, got: usize },

    /// Model artifact missing or unloadable at startup.
    #[error("model unavailable at {path}: {reason}")]
    ModelUnavailable { path: String, reason: String },

    /// Payload shape violates the accepted input forms.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A feature column has zero variance; scaling it is undefined.
    #[error("feature '{feature}' has zero variance, cannot fit scaler")]
    ZeroVariance { feature: &'static str },

    /// Fitted scaler could not be written to disk.
    #[error("failed to persist scaler: {0}")]
    ScalerPersist(String),

    /// Persisted scaler was fit under a different configuration.
    #[error("scaler schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Model forward pass failed after a successful load.
    #[error("forecast failed: {0}")]
    Forecast(String),
}

impl PredictError {
    /// True for faults the caller can fix by resubmitting a corrected
    /// request, false for server-side state problems.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            PredictError::MissingTimestamp
                | PredictError::InvalidSample { .. }
                | PredictError::EmptyInput
                | PredictError::InsufficientHistory { .. }
                | PredictError::MalformedPayload(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PredictError>;
