//! Static threshold rules evaluated against each reading

use crate::config::{RuleConfig, Severity, default_rules};
use obdwatch_core::{Metric, Reading};
use std::fmt;

// Which side of the allowed range was crossed
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Lower(f64),
    Upper(f64),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Lower(v) => write!(f, "below minimum {}", v),
            Bound::Upper(v) => write!(f, "above maximum {}", v),
        }
    }
}

// represents one broken rule for one reading
#[derive(Debug, Clone, PartialEq)]
pub struct RuleViolation {
    pub metric: Metric,     // which sensor
    pub observed: f64,      // value found in the reading
    pub bound: Bound,       // the limit it crossed
    pub severity: Severity, // from rule config
}

impl RuleViolation {
    /// Human readable description, e.g. "coolant_temp above maximum 105: 110°C"
    pub fn message(&self) -> String {
        format!(
            "{} {}: {}{}",
            self.metric,
            self.bound,
            self.observed,
            self.metric.unit()
        )
    }
}

// one row of the rule table
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub metric: Metric,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub severity: Severity,
}

impl ThresholdRule {
    // check a value against both bounds
    fn check(&self, observed: f64) -> Option<Bound> {
        if let Some(lower) = self.lower.filter(|lower| observed < *lower) {
            return Some(Bound::Lower(lower));
        }
        self.upper
            .filter(|upper| observed > *upper)
            .map(Bound::Upper)
    }
}

impl From<&RuleConfig> for ThresholdRule {
    fn from(rule: &RuleConfig) -> Self {
        Self {
            metric: rule.metric,
            lower: rule.min,
            upper: rule.max,
            severity: rule.severity,
        }
    }
}

/// Stateless evaluator over a fixed rule table
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<ThresholdRule>,
}

impl RuleEngine {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    /// Build from config, dropping disabled rules
    pub fn from_config(rules: &[RuleConfig]) -> Self {
        Self::new(
            rules
                .iter()
                .filter(|r| r.enabled)
                .map(ThresholdRule::from)
                .collect(),
        )
    }

    /// Engine with the stock vehicle limits
    pub fn with_defaults() -> Self {
        Self::from_config(&default_rules())
    }

    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Violations in table order. Unset metrics are skipped: unknown is not
    /// evidence of an anomaly.
    pub fn evaluate(&self, reading: &Reading) -> Vec<RuleViolation> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let observed = reading.get(rule.metric)?;
                rule.check(observed).map(|bound| RuleViolation {
                    metric: rule.metric,
                    observed,
                    bound,
                    severity: rule.severity,
                })
            })
            .collect()
    }
}
