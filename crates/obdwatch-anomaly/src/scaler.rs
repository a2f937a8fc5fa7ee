//! Min-max feature normalization with a fit-once, transform-many contract

use crate::error::{AnomalyError, Result};
use obdwatch_core::{FeatureVector, Metric, FEATURE_COUNT};
use serde::{Deserialize, Serialize};

/// Learned (min, max) for one feature
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureBounds {
    pub min: f64,
    pub max: f64,
}

impl FeatureBounds {
    /// `(x - min) / (max - min)`, 0 for a degenerate feature
    pub fn scale(&self, x: f64) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 { 0.0 } else { (x - self.min) / range }
    }
}

/// Per-feature bounds learned once from a fitting corpus.
/// A feature that never had a value in the corpus has no bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub bounds: [Option<FeatureBounds>; FEATURE_COUNT],
    pub samples: usize,
}

impl NormalizationParams {
    /// Compute per-feature min and max, ignoring unset values
    pub fn from_corpus(corpus: &[FeatureVector]) -> Result<Self> {
        if corpus.is_empty() {
            return Err(AnomalyError::InsufficientData {
                required: 1,
                got: 0,
            });
        }

        let mut bounds: [Option<FeatureBounds>; FEATURE_COUNT] = [None; FEATURE_COUNT];
        for vector in corpus {
            for (slot, value) in bounds.iter_mut().zip(vector.iter()) {
                let Some(x) = value.filter(|x| x.is_finite()) else {
                    continue;
                };
                *slot = Some(match *slot {
                    Some(b) => FeatureBounds {
                        min: b.min.min(x),
                        max: b.max.max(x),
                    },
                    None => FeatureBounds { min: x, max: x },
                });
            }
        }

        Ok(Self {
            bounds,
            samples: corpus.len(),
        })
    }

    pub fn bounds(&self, metric: Metric) -> Option<FeatureBounds> {
        self.bounds[metric.index()]
    }

    /// Metrics that never had a value in the corpus
    pub fn unobserved(&self) -> Vec<Metric> {
        Metric::ALL
            .into_iter()
            .filter(|m| self.bounds[m.index()].is_none())
            .collect()
    }
}

/// Holds normalization parameters. Once fitted the parameters never change,
/// so a fitted scaler is shared read-only behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct FeatureScaler {
    params: Option<NormalizationParams>,
    clamp: bool,
}

impl FeatureScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp scaled output into [0,1] instead of letting it run past the bounds
    pub fn with_clamp(mut self, clamp: bool) -> Self {
        self.clamp = clamp;
        self
    }

    /// Scaler with externally fitted parameters; counts as fitted
    pub fn from_params(params: NormalizationParams) -> Self {
        Self {
            params: Some(params),
            clamp: false,
        }
    }

    /// Learn bounds from the corpus. A second call fails with `AlreadyFitted`
    /// and leaves the original parameters in place.
    pub fn fit(&mut self, corpus: &[FeatureVector]) -> Result<&NormalizationParams> {
        if self.params.is_some() {
            return Err(AnomalyError::AlreadyFitted);
        }
        let params = NormalizationParams::from_corpus(corpus)?;
        tracing::info!(samples = params.samples, "Feature scaler fitted");
        Ok(self.params.insert(params))
    }

    pub fn is_fitted(&self) -> bool {
        self.params.is_some()
    }

    pub fn params(&self) -> Option<&NormalizationParams> {
        self.params.as_ref()
    }

    /// Normalize one vector; unset stays unset
    pub fn transform(&self, vector: &FeatureVector) -> Result<FeatureVector> {
        let params = self.params.as_ref().ok_or(AnomalyError::NotFitted)?;

        let mut out: FeatureVector = [None; FEATURE_COUNT];
        for (i, value) in vector.iter().enumerate() {
            out[i] = match (value, params.bounds[i]) {
                (Some(x), Some(b)) => {
                    let scaled = b.scale(*x);
                    Some(if self.clamp { scaled.clamp(0.0, 1.0) } else { scaled })
                }
                _ => None,
            };
        }
        Ok(out)
    }

    /// Normalize every vector of a window, preserving order
    pub fn transform_window(&self, window: &[FeatureVector]) -> Result<Vec<FeatureVector>> {
        window.iter().map(|v| self.transform(v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[(Metric, f64)]) -> FeatureVector {
        let mut v: FeatureVector = [None; FEATURE_COUNT];
        for (metric, value) in values {
            v[metric.index()] = Some(*value);
        }
        v
    }

    fn corpus() -> Vec<FeatureVector> {
        vec![
            vector(&[(Metric::Rpm, 800.0), (Metric::CoolantTemp, 90.0), (Metric::Voltage, 13.0)]),
            vector(&[(Metric::Rpm, 3000.0), (Metric::CoolantTemp, 95.0), (Metric::Voltage, 13.0)]),
            vector(&[(Metric::Rpm, 1200.0), (Metric::Voltage, 13.0)]),
        ]
    }

    #[test]
    fn test_transform_before_fit_fails() {
        let scaler = FeatureScaler::new();
        let result = scaler.transform(&corpus()[0]);
        assert!(matches!(result, Err(AnomalyError::NotFitted)));
    }

    #[test]
    fn test_fit_twice_fails_and_keeps_params() {
        let mut scaler = FeatureScaler::new();
        scaler.fit(&corpus()).unwrap();
        let before = scaler.params().cloned();

        let other = vec![vector(&[(Metric::Rpm, 7000.0)])];
        assert!(matches!(scaler.fit(&other), Err(AnomalyError::AlreadyFitted)));
        assert_eq!(scaler.params().cloned(), before);
    }

    #[test]
    fn test_from_params_counts_as_fitted() {
        let params = NormalizationParams::from_corpus(&corpus()).unwrap();
        let mut scaler = FeatureScaler::from_params(params);
        assert!(scaler.is_fitted());
        assert!(matches!(scaler.fit(&corpus()), Err(AnomalyError::AlreadyFitted)));
    }

    #[test]
    fn test_empty_corpus_rejected() {
        let mut scaler = FeatureScaler::new();
        assert!(matches!(
            scaler.fit(&[]),
            Err(AnomalyError::InsufficientData { required: 1, got: 0 })
        ));
        assert!(!scaler.is_fitted());
    }

    #[test]
    fn test_corpus_values_scale_into_unit_range() {
        let mut scaler = FeatureScaler::new();
        let data = corpus();
        scaler.fit(&data).unwrap();

        for v in &data {
            let scaled = scaler.transform(v).unwrap();
            let rpm = scaled[Metric::Rpm.index()].unwrap();
            assert!((0.0..=1.0).contains(&rpm));
        }
        let first = scaler.transform(&data[0]).unwrap();
        assert_eq!(first[Metric::Rpm.index()], Some(0.0));
        let second = scaler.transform(&data[1]).unwrap();
        assert_eq!(second[Metric::Rpm.index()], Some(1.0));
    }

    #[test]
    fn test_degenerate_feature_scales_to_zero() {
        let mut scaler = FeatureScaler::new();
        scaler.fit(&corpus()).unwrap();

        for voltage in [13.0, 9.0, 18.5] {
            let scaled = scaler
                .transform(&vector(&[(Metric::Voltage, voltage)]))
                .unwrap();
            assert_eq!(scaled[Metric::Voltage.index()], Some(0.0));
        }
    }

    #[test]
    fn test_unset_values_stay_unset() {
        let mut scaler = FeatureScaler::new();
        scaler.fit(&corpus()).unwrap();

        let scaled = scaler.transform(&vector(&[(Metric::Rpm, 1000.0)])).unwrap();
        assert_eq!(scaled[Metric::CoolantTemp.index()], None);
        // never observed in the corpus
        assert_eq!(scaler.params().unwrap().bounds(Metric::Maf), None);
        assert!(scaler.params().unwrap().unobserved().contains(&Metric::Maf));
        assert!(!scaler.params().unwrap().unobserved().contains(&Metric::Rpm));
        let scaled = scaler.transform(&vector(&[(Metric::Maf, 10.0)])).unwrap();
        assert_eq!(scaled[Metric::Maf.index()], None);
    }

    #[test]
    fn test_out_of_range_is_not_clamped_by_default() {
        let mut scaler = FeatureScaler::new();
        scaler.fit(&corpus()).unwrap();
        let scaled = scaler.transform(&vector(&[(Metric::Rpm, 5200.0)])).unwrap();
        assert_eq!(scaled[Metric::Rpm.index()], Some(2.0));

        let mut clamped = FeatureScaler::new().with_clamp(true);
        clamped.fit(&corpus()).unwrap();
        let scaled = clamped.transform(&vector(&[(Metric::Rpm, 5200.0)])).unwrap();
        assert_eq!(scaled[Metric::Rpm.index()], Some(1.0));
    }

    #[test]
    fn test_params_roundtrip_json() {
        let params = NormalizationParams::from_corpus(&corpus()).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        let back: NormalizationParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
