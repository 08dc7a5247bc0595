use crate::config::N_FEATURES;
use crate::error::{PredictError, Result};

/// One training example: `past` feeds the model, `future` is the target.
/// Both borrow from the scaled value matrix.
#[derive(Debug, Clone, Copy)]
pub struct WindowPair<'a> {
    pub past: &'a [[f64; N_FEATURES]],
    pub future: &'a [[f64; N_FEATURES]],
}

/// Slides a cursor one slot at a time, emitting every (past, future)
/// pair the matrix can hold: exactly `max(0, T - past - future + 1)`
/// of them. An empty result means there is not enough history to train;
/// the caller decides how fatal that is.
pub fn training_pairs(
    values: &[[f64; N_FEATURES]],
    past_steps: usize,
    future_steps: usize,
) -> Vec<WindowPair<'_>> {
    let total = past_steps + future_steps;
    if values.len() < total {
        return Vec::new();
    }
    (0..=values.len() - total)
        .map(|i| WindowPair {
            past: &values[i..i + past_steps],
            future: &values[i + past_steps..i + total],
        })
        .collect()
}

/// Extracts the model input for inference: exactly the last
/// `past_steps` rows. Surplus history is fine, a shortfall is not.
pub fn last_window(values: &[[f64; N_FEATURES]], past_steps: usize) -> Result<&[[f64; N_FEATURES]]> {
    if values.len() < past_steps {
        return Err(PredictError::InsufficientHistory {
            need: past_steps,
            got: values.len(),
        });
    }
    Ok(&values[values.len() - past_steps..])
}
