use std::path::PathBuf;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use aq_predictor::{
    InferenceContext, PipelineConfig, PredictError, Scaler, TorchForecaster,
};

// ---------- Handler ----------

async fn predict(
    State(ctx): State<Arc<InferenceContext>>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let predictions = ctx.run(&payload, Utc::now()).map_err(|e| {
        let status = if e.is_client_fault() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": e.to_string() })))
    })?;
    Ok(Json(json!({ "predictions": predictions })))
}

// ---------- Startup ----------

fn build_context() -> Result<InferenceContext, PredictError> {
    let config = PipelineConfig::default();
    let model_path =
        PathBuf::from(std::env::var("MODEL_PATH").unwrap_or_else(|_| "seq2seq_model.pt".into()));
    let scaler_path =
        PathBuf::from(std::env::var("SCALER_PATH").unwrap_or_else(|_| "scaler.json".into()));

    // Both artifacts are startup-fatal: refuse to serve without them.
    let scaler = Scaler::load(&scaler_path, &config)?;
    info!("loaded scaler from {}", scaler_path.display());
    let forecaster =
        TorchForecaster::load(&model_path, config.past_steps(), config.future_steps())?;

    Ok(InferenceContext {
        forecaster: Arc::new(forecaster),
        scaler,
        config,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5000);

    let ctx = Arc::new(build_context()?);
    info!(
        "pipeline ready: {} past steps -> {} future steps at {}s cadence",
        ctx.config.past_steps(),
        ctx.config.future_steps(),
        ctx.config.resample_seconds
    );

    let app = axum::Router::new()
        .route("/predict", post(predict))
        .with_state(ctx);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
