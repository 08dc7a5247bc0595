//! Offline preparation: turns a historical sensor dump into the fitted
//! scaler and the (past, future) tensor batches the model trainer
//! consumes. Model fitting itself happens elsewhere; this stage owns
//! everything that must match the inference path exactly.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tch::Tensor;
use tracing::info;

use aq_predictor::pipeline::TensorBatch;
use aq_predictor::{prepare_training, PipelineConfig};

/// Sensor dumps sometimes arrive as concatenated JSON objects instead
/// of an array; patch the seams and wrap before giving up.
fn parse_records_file(text: &str) -> Result<Vec<Value>> {
    let text = text.trim();
    let parsed: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let wrapped = format!("[{}]", text.replace("}{", "},{"));
            serde_json::from_str(&wrapped).context("input is neither a JSON array nor concatenated objects")?
        }
    };
    match parsed {
        Value::Array(records) => Ok(records),
        _ => bail!("expected a JSON array of records"),
    }
}

fn to_tensor(batch: &TensorBatch) -> Tensor {
    Tensor::from_slice(&batch.data).reshape(batch.shape())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let data_path =
        PathBuf::from(std::env::var("DATA_PATH").unwrap_or_else(|_| "sensor_data.json".into()));
    let scaler_path =
        PathBuf::from(std::env::var("SCALER_PATH").unwrap_or_else(|_| "scaler.json".into()));
    let tensors_path =
        PathBuf::from(std::env::var("TENSORS_PATH").unwrap_or_else(|_| "train_tensors.npz".into()));

    let config = PipelineConfig::default();
    info!(
        "preparing training data from {} (past={}, future={}, cadence={}s)",
        data_path.display(),
        config.past_steps(),
        config.future_steps(),
        config.resample_seconds
    );

    let text = fs::read_to_string(&data_path)
        .with_context(|| format!("failed to read {}", data_path.display()))?;
    let records = parse_records_file(&text)?;
    info!("loaded {} raw records", records.len());

    let set = prepare_training(&records, &config)
        .context("training preparation failed")?;
    info!(
        "built {} training and {} validation pairs",
        set.x_train.len, set.x_val.len
    );

    set.scaler
        .save(&scaler_path, &config)
        .context("failed to persist scaler")?;

    Tensor::write_npz(
        &[
            ("x_train", &to_tensor(&set.x_train)),
            ("y_train", &to_tensor(&set.y_train)),
            ("x_val", &to_tensor(&set.x_val)),
            ("y_val", &to_tensor(&set.y_val)),
        ],
        &tensors_path,
    )
    .with_context(|| format!("failed to write {}", tensors_path.display()))?;
    info!("wrote tensor batches to {}", tensors_path.display());

    Ok(())
}
