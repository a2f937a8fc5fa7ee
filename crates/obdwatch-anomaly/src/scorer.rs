//! Reconstruction-error scoring over a full window

use crate::error::{AnomalyError, Result};
use crate::model::ReconstructionModel;
use ndarray::Array2;
use obdwatch_core::{FeatureVector, Metric, FEATURE_COUNT};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whole-window reconstruction error plus the error of each feature column.
/// The mean of the contributions equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyScore {
    pub value: f64,
    pub contributions: BTreeMap<Metric, f64>,
}

impl AnomalyScore {
    pub fn is_anomalous(&self, threshold: f64) -> bool {
        self.value > threshold
    }

    /// Highest contributing features first; ties keep metric order
    pub fn top_contributors(&self, n: usize) -> Vec<(Metric, f64)> {
        let mut ranked: Vec<(Metric, f64)> =
            self.contributions.iter().map(|(m, v)| (*m, *v)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

/// Wraps the external reconstruction model. Without a model the scorer is
/// degraded and every `score` call fails with `ModelUnavailable`.
#[derive(Clone)]
pub struct AnomalyScorer {
    model: Option<Arc<dyn ReconstructionModel>>,
    window_size: usize,
}

impl AnomalyScorer {
    pub fn new(model: Arc<dyn ReconstructionModel>, window_size: usize) -> Self {
        Self {
            model: Some(model),
            window_size,
        }
    }

    pub fn degraded(window_size: usize) -> Self {
        Self {
            model: None,
            window_size,
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.model.as_deref().map(|m| m.name())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Score a normalized window of exactly `window_size` vectors
    pub fn score(&self, window: &[FeatureVector]) -> Result<AnomalyScore> {
        let model = self.model.as_deref().ok_or(AnomalyError::ModelUnavailable)?;

        if window.len() != self.window_size {
            return Err(AnomalyError::InsufficientData {
                required: self.window_size,
                got: window.len(),
            });
        }

        let input = to_matrix(window)?;
        let reconstruction = model.reconstruct(&input)?;
        if reconstruction.dim() != input.dim() {
            return Err(AnomalyError::ShapeMismatch {
                expected: input.dim(),
                got: reconstruction.dim(),
            });
        }

        let squared = (&input - &reconstruction).mapv(|d| d * d);
        let value = squared.mean().unwrap_or(0.0);
        if !value.is_finite() {
            return Err(AnomalyError::Model(format!(
                "{} produced a non-finite reconstruction",
                model.name()
            )));
        }

        let contributions = Metric::ALL
            .iter()
            .map(|metric| {
                let column = squared.column(metric.index());
                (*metric, column.mean().unwrap_or(0.0))
            })
            .collect();

        Ok(AnomalyScore {
            value,
            contributions,
        })
    }
}

/// Build the `(W, F)` matrix. Gaps are forward-filled, then back-filled,
/// per column; a column with no value at all cannot be scored.
fn to_matrix(window: &[FeatureVector]) -> Result<Array2<f64>> {
    let rows = window.len();
    let mut data = vec![0.0; rows * FEATURE_COUNT];

    for metric in Metric::ALL {
        let col = metric.index();
        let first = window
            .iter()
            .find_map(|v| v[col])
            .ok_or(AnomalyError::IncompleteWindow { metric })?;

        let mut last = first;
        for (row, vector) in window.iter().enumerate() {
            if let Some(x) = vector[col] {
                last = x;
            }
            data[row * FEATURE_COUNT + col] = last;
        }
    }

    Array2::from_shape_vec((rows, FEATURE_COUNT), data)
        .map_err(|e| AnomalyError::Model(e.to_string()))
}
