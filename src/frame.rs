use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::config::{PipelineConfig, N_FEATURES};
use crate::error::{PredictError, Result};

// ---------- Samples and frames ----------

/// One physical-unit observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub ppm: f64,
    pub temperature: f64,
    pub humidity: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, features: [f64; N_FEATURES]) -> Self {
        Self {
            timestamp,
            ppm: features[0],
            temperature: features[1],
            humidity: features[2],
        }
    }

    pub fn features(&self) -> [f64; N_FEATURES] {
        [self.ppm, self.temperature, self.humidity]
    }
}

/// Ordered in-memory series. Always sorted ascending by timestamp;
/// exact-timestamp duplicates may survive on the inference path, where
/// the resampler bins them together. Transformations return new frames.
#[derive(Debug, Clone)]
pub struct TimeSeriesFrame {
    samples: Vec<Sample>,
}

impl TimeSeriesFrame {
    /// Sorts (stable, so later entries win ties downstream) but keeps
    /// duplicate timestamps.
    pub fn from_samples(mut samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(PredictError::EmptyInput);
        }
        samples.sort_by_key(|s| s.timestamp);
        Ok(Self { samples })
    }

    /// Sorts and collapses exact-timestamp duplicates, keeping the last
    /// occurrence. Training ingestion uses this.
    pub fn from_samples_dedup(samples: Vec<Sample>) -> Result<Self> {
        let mut frame = Self::from_samples(samples)?;
        let mut deduped: Vec<Sample> = Vec::with_capacity(frame.samples.len());
        for s in frame.samples.drain(..) {
            match deduped.last_mut() {
                Some(prev) if prev.timestamp == s.timestamp => *prev = s,
                _ => deduped.push(s),
            }
        }
        Ok(Self { samples: deduped })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first_timestamp(&self) -> DateTime<Utc> {
        self.samples[0].timestamp
    }

    pub fn last_timestamp(&self) -> DateTime<Utc> {
        self.samples[self.samples.len() - 1].timestamp
    }
}

// ---------- Inference payload parsing ----------

/// One parsed payload element: features always, timestamp maybe.
struct RawPoint {
    timestamp: Option<DateTime<Utc>>,
    features: [f64; N_FEATURES],
}

/// Builds a frame from a request payload: either `{"data": [...]}` or a
/// bare array, elements being objects (`timestamp` optional) or 3-value
/// arrays. `now` anchors synthetic timestamps when the payload carries
/// none at all.
pub fn parse_payload(
    payload: &Value,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Result<TimeSeriesFrame> {
    let items = unwrap_envelope(payload)?;
    if items.is_empty() {
        return Err(PredictError::EmptyInput);
    }

    let mut points = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        points.push(parse_point(item, index)?);
    }

    if points.iter().all(|p| p.timestamp.is_none()) {
        // No real time axis at all: assume the samples already arrive at
        // cadence and stamp them backwards from now.
        let timestamps = synthesize_timestamps(points.len(), config, now);
        let samples = points
            .iter()
            .zip(timestamps)
            .map(|(p, ts)| Sample::new(ts, p.features))
            .collect();
        return TimeSeriesFrame::from_samples(samples);
    }

    // Partial timestamps: forward-fill from the nearest preceding real
    // one. This approximates time rather than interpolating it; a
    // leading run with no predecessor inherits the first real timestamp
    // and gets binned together by the resampler.
    let first_real = points
        .iter()
        .find_map(|p| p.timestamp)
        .ok_or(PredictError::EmptyInput)?;
    let mut last_seen = first_real;
    let samples = points
        .iter()
        .map(|p| {
            if let Some(ts) = p.timestamp {
                last_seen = ts;
            }
            Sample::new(last_seen, p.features)
        })
        .collect();
    TimeSeriesFrame::from_samples(samples)
}

fn unwrap_envelope(payload: &Value) -> Result<&Vec<Value>> {
    let inner = match payload {
        Value::Object(map) => map.get("data").ok_or_else(|| {
            PredictError::MalformedPayload(
                "object payload must carry a \"data\" array".to_string(),
            )
        })?,
        other => other,
    };
    match inner {
        Value::Array(items) => Ok(items),
        other => Err(PredictError::MalformedPayload(format!(
            "payload must be an array of samples, got {}",
            json_type_name(other)
        ))),
    }
}

fn parse_point(item: &Value, index: usize) -> Result<RawPoint> {
    match item {
        Value::Object(map) => {
            let timestamp = match map.get("timestamp") {
                None | Some(Value::Null) => None,
                Some(v) => Some(parse_timestamp(v).ok_or_else(|| {
                    PredictError::InvalidSample {
                        index,
                        reason: format!("unparseable timestamp {}", v),
                    }
                })?),
            };
            let mut features = [0.0; N_FEATURES];
            for (slot, name) in features.iter_mut().zip(crate::config::FEATURES) {
                *slot = feature_value(map.get(name), name, index)?;
            }
            Ok(RawPoint {
                timestamp,
                features,
            })
        }
        Value::Array(values) => {
            if values.len() != N_FEATURES {
                return Err(PredictError::MalformedPayload(format!(
                    "array sample at index {index} must have {N_FEATURES} values \
                     (ppm, temperature, humidity), got {}",
                    values.len()
                )));
            }
            let mut features = [0.0; N_FEATURES];
            for (slot, (value, name)) in features
                .iter_mut()
                .zip(values.iter().zip(crate::config::FEATURES))
            {
                *slot = feature_value(Some(value), name, index)?;
            }
            Ok(RawPoint {
                timestamp: None,
                features,
            })
        }
        other => Err(PredictError::MalformedPayload(format!(
            "sample at index {index} must be an object or a 3-value array, got {}",
            json_type_name(other)
        ))),
    }
}

fn feature_value(value: Option<&Value>, name: &str, index: usize) -> Result<f64> {
    let value = value.ok_or_else(|| PredictError::InvalidSample {
        index,
        reason: format!("missing {name}"),
    })?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        // float("400") succeeds in the wild; accept numeric strings too.
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(x) if x.is_finite() => Ok(x),
        Some(x) => Err(PredictError::InvalidSample {
            index,
            reason: format!("{name} is not finite ({x})"),
        }),
        None => Err(PredictError::InvalidSample {
            index,
            reason: format!("{name} is not numeric ({value})"),
        }),
    }
}

/// `len` instants at `RESAMPLE_SECONDS` spacing, ending at `now`. A
/// full-length payload therefore covers exactly the most recent
/// `PAST_HOURS` window, and each synthetic sample lands in its own
/// resample bin so the post-resample length equals the payload length.
fn synthesize_timestamps(
    len: usize,
    config: &PipelineConfig,
    now: DateTime<Utc>,
) -> Vec<DateTime<Utc>> {
    (0..len)
        .map(|i| now - Duration::seconds(config.resample_seconds * (len - 1 - i) as i64))
        .collect()
}

// ---------- Training record parsing ----------

/// Builds a frame from historical raw records. Each record carries a
/// timestamp under one of several aliases and the three features either
/// nested under `payload` or flattened at the top level. Records missing
/// any feature are skipped; a feature-complete record with no timestamp
/// is an error, since training needs a real time axis.
pub fn parse_records(records: &[Value]) -> Result<TimeSeriesFrame> {
    let mut samples = Vec::with_capacity(records.len());
    for record in records {
        let Value::Object(map) = record else {
            continue;
        };
        let fields: &serde_json::Map<String, Value> = match map.get("payload") {
            Some(Value::Object(payload)) => payload,
            _ => map,
        };
        let Some(features) = record_features(fields) else {
            continue; // incomplete sensor reading, skip without failing
        };
        let ts_value = map
            .get("timestamp")
            .or_else(|| map.get("time"))
            .or_else(|| map.get("_id").and_then(|id| id.get("$date")));
        let timestamp = ts_value
            .and_then(parse_timestamp)
            .ok_or(PredictError::MissingTimestamp)?;
        samples.push(Sample::new(timestamp, features));
    }
    if samples.is_empty() {
        return Err(PredictError::EmptyInput);
    }
    TimeSeriesFrame::from_samples_dedup(samples)
}

fn record_features(fields: &serde_json::Map<String, Value>) -> Option<[f64; N_FEATURES]> {
    let mut features = [0.0; N_FEATURES];
    for (slot, name) in features.iter_mut().zip(crate::config::FEATURES) {
        let value = fields.get(name)?;
        let x = match value {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if !x.is_finite() {
            return None;
        }
        *slot = x;
    }
    Some(features)
}

// ---------- Timestamp parsing ----------

/// Accepts RFC 3339, naive `YYYY-MM-DD HH:MM:SS[.fff]` (UTC assumed),
/// and integer epochs (milliseconds when the magnitude says so).
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            None
        }
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            if epoch.abs() >= 100_000_000_000 {
                DateTime::from_timestamp_millis(epoch)
            } else {
                DateTime::from_timestamp(epoch, 0)
            }
        }
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn bare_array_of_triples_gets_synthetic_timestamps() {
        let payload = json!([[400.0, 22.0, 45.0], [410.0, 22.1, 45.2], [405.0, 22.2, 45.1]]);
        let frame = parse_payload(&payload, &cfg(), now()).unwrap();
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.first_timestamp(), now() - Duration::seconds(60));
        assert_eq!(frame.samples()[1].timestamp, now() - Duration::seconds(30));
        assert_eq!(frame.last_timestamp(), now());
        assert_eq!(frame.samples()[0].features(), [400.0, 22.0, 45.0]);
    }

    #[test]
    fn data_envelope_is_unwrapped() {
        let payload = json!({ "data": [[400.0, 22.0, 45.0]] });
        let frame = parse_payload(&payload, &cfg(), now()).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.last_timestamp(), now());
    }

    #[test]
    fn partial_timestamps_forward_fill() {
        let payload = json!([
            { "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 },
            { "timestamp": "2024-05-01T10:00:00Z", "ppm": 401.0, "temperature": 22.0, "humidity": 45.0 },
            { "ppm": 402.0, "temperature": 22.0, "humidity": 45.0 },
            { "timestamp": "2024-05-01T10:01:00Z", "ppm": 403.0, "temperature": 22.0, "humidity": 45.0 }
        ]);
        let frame = parse_payload(&payload, &cfg(), now()).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let stamps: Vec<_> = frame.samples().iter().map(|s| s.timestamp).collect();
        // leading gap inherits the first real timestamp; interior gap
        // inherits its predecessor
        assert_eq!(stamps, vec![t0, t0, t0, t0 + Duration::minutes(1)]);
    }

    #[test]
    fn missing_feature_reports_offending_index() {
        let payload = json!([
            { "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 },
            { "ppm": 400.0, "temperature": 22.0 }
        ]);
        let err = parse_payload(&payload, &cfg(), now()).unwrap_err();
        match err {
            PredictError::InvalidSample { index, .. } => assert_eq!(index, 1),
            other => panic!("expected InvalidSample, got {other:?}"),
        }
    }

    #[test]
    fn non_numeric_feature_is_rejected() {
        let payload = json!([[400.0, "warm", 45.0]]);
        assert!(matches!(
            parse_payload(&payload, &cfg(), now()),
            Err(PredictError::InvalidSample { index: 0, .. })
        ));
    }

    #[test]
    fn wrong_arity_array_is_malformed() {
        let payload = json!([[400.0, 22.0]]);
        assert!(matches!(
            parse_payload(&payload, &cfg(), now()),
            Err(PredictError::MalformedPayload(_))
        ));
    }

    #[test]
    fn scalar_payload_is_malformed() {
        assert!(matches!(
            parse_payload(&json!(42), &cfg(), now()),
            Err(PredictError::MalformedPayload(_))
        ));
    }

    #[test]
    fn empty_array_is_empty_input() {
        assert!(matches!(
            parse_payload(&json!([]), &cfg(), now()),
            Err(PredictError::EmptyInput)
        ));
    }

    #[test]
    fn records_skip_incomplete_payloads() {
        let records = vec![
            json!({ "timestamp": "2024-05-01T10:00:00Z",
                    "payload": { "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 } }),
            json!({ "timestamp": "2024-05-01T10:00:30Z",
                    "payload": { "ppm": 401.0, "temperature": 22.1 } }),
            json!({ "timestamp": "2024-05-01T10:01:00Z",
                    "payload": { "ppm": 402.0, "temperature": 22.2, "humidity": 45.4 } }),
        ];
        let frame = parse_records(&records).unwrap();
        assert_eq!(frame.len(), 2, "record missing humidity must be skipped");
    }

    #[test]
    fn records_accept_flattened_and_aliased_fields() {
        let records = vec![
            json!({ "_id": { "$date": "2024-05-01T10:00:00Z" },
                    "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 }),
            json!({ "time": 1714557630,
                    "payload": { "ppm": 401.0, "temperature": 22.1, "humidity": 45.2 } }),
        ];
        let frame = parse_records(&records).unwrap();
        assert_eq!(frame.len(), 2);
    }

    #[test]
    fn records_without_timestamp_fail() {
        let records = vec![json!({ "payload": { "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 } })];
        assert!(matches!(
            parse_records(&records),
            Err(PredictError::MissingTimestamp)
        ));
    }

    #[test]
    fn duplicate_timestamps_keep_last_on_training_path() {
        let ts = "2024-05-01T10:00:00Z";
        let records = vec![
            json!({ "timestamp": ts, "payload": { "ppm": 400.0, "temperature": 22.0, "humidity": 45.0 } }),
            json!({ "timestamp": ts, "payload": { "ppm": 999.0, "temperature": 22.0, "humidity": 45.0 } }),
        ];
        let frame = parse_records(&records).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.samples()[0].ppm, 999.0);
    }
}
