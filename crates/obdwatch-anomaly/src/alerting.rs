//! Alert composition and per-source cooldown

use crate::config::Severity;
use crate::rules::RuleViolation;
use crate::scorer::AnomalyScore;
use chrono::{DateTime, Duration, Utc};
use obdwatch_core::Metric;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// which detector raised the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertSource {
    Rule(Metric),
    Reconstruction,
}

impl fmt::Display for AlertSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSource::Rule(metric) => write!(f, "rule:{}", metric),
            AlertSource::Reconstruction => f.write_str("reconstruction"),
        }
    }
}

/// A composed alert. Built once and handed to the dispatcher by value.
#[derive(Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub severity: Severity,
    pub source: AlertSource,
    pub subject: String,
    pub message: String,
    pub breakdown: Option<Vec<(Metric, f64)>>, // top contributing sensors
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Alert for a broken threshold rule
    pub fn from_violation(violation: &RuleViolation, observed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity: violation.severity,
            source: AlertSource::Rule(violation.metric),
            subject: format!("{} out of range", violation.metric),
            message: format!(
                "{}\nObserved at {}",
                violation.message(),
                observed_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            breakdown: None,
            created_at: Utc::now(),
        }
    }

    /// Alert for a window whose reconstruction error crossed the threshold
    pub fn from_score(score: &AnomalyScore, threshold: f64, top: usize) -> Self {
        let breakdown = score.top_contributors(top);

        let mut message = format!(
            "Reconstruction anomaly score {:.6} exceeds threshold {:.6}",
            score.value, threshold
        );
        if !breakdown.is_empty() {
            message.push_str("\nTop contributing sensors:");
            for (metric, contribution) in &breakdown {
                message.push_str(&format!("\n  {}: {:.6}", metric, contribution));
            }
        }

        Self {
            id: Uuid::new_v4(),
            severity: Severity::Critical,
            source: AlertSource::Reconstruction,
            subject: "Abnormal sensor pattern detected".to_string(),
            message,
            breakdown: Some(breakdown),
            created_at: Utc::now(),
        }
    }

    /// Short single-line form for SMS relays
    pub fn summary(&self) -> String {
        let first_line = self.message.lines().next().unwrap_or_default();
        format!("[{}] {}: {}", self.severity, self.subject, first_line)
    }
}

/// Suppresses repeats from the same source inside the cooldown period.
/// The first alert from a source always passes.
#[derive(Debug)]
pub struct AlertThrottle {
    cooldown: Duration,
    last_sent: HashMap<AlertSource, DateTime<Utc>>,
}

impl AlertThrottle {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self {
            cooldown: Duration::from_std(cooldown).unwrap_or(Duration::MAX),
            last_sent: HashMap::new(),
        }
    }

    // check cooldown and record the send when allowed
    pub fn should_send(&mut self, alert: &Alert) -> bool {
        if self.cooldown.is_zero() {
            return true;
        }
        let now = alert.created_at;
        match self.last_sent.get(&alert.source) {
            Some(last) if now - *last < self.cooldown => false,
            _ => {
                self.last_sent.insert(alert.source, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Bound;
    use std::collections::BTreeMap;

    fn overheat() -> RuleViolation {
        RuleViolation {
            metric: Metric::CoolantTemp,
            observed: 110.0,
            bound: Bound::Upper(105.0),
            severity: Severity::Critical,
        }
    }

    #[test]
    fn test_rule_alert_message() {
        let alert = Alert::from_violation(&overheat(), Utc::now());
        assert_eq!(alert.source, AlertSource::Rule(Metric::CoolantTemp));
        assert_eq!(alert.subject, "coolant_temp out of range");
        assert!(alert.message.starts_with("coolant_temp above maximum 105: 110°C"));
        assert!(alert.breakdown.is_none());
    }

    #[test]
    fn test_score_alert_lists_top_contributors_descending() {
        let contributions = BTreeMap::from([
            (Metric::Rpm, 0.01),
            (Metric::CoolantTemp, 0.09),
            (Metric::Voltage, 0.04),
            (Metric::Maf, 0.0),
        ]);
        let score = AnomalyScore {
            value: 0.035,
            contributions,
        };

        let alert = Alert::from_score(&score, 0.01, 3);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(
            alert.breakdown,
            Some(vec![
                (Metric::CoolantTemp, 0.09),
                (Metric::Voltage, 0.04),
                (Metric::Rpm, 0.01),
            ])
        );
        assert!(alert.message.contains("score 0.035000 exceeds threshold 0.010000"));
        let coolant = alert.message.find("coolant_temp").unwrap();
        let voltage = alert.message.find("voltage").unwrap();
        assert!(coolant < voltage);
    }

    #[test]
    fn test_summary_is_single_line() {
        let alert = Alert::from_violation(&overheat(), Utc::now());
        assert_eq!(
            alert.summary(),
            "[CRITICAL] coolant_temp out of range: coolant_temp above maximum 105: 110°C"
        );
    }

    #[test]
    fn test_throttle_suppresses_within_cooldown() {
        let mut throttle = AlertThrottle::new(std::time::Duration::from_secs(60));
        let first = Alert::from_violation(&overheat(), Utc::now());
        let mut second = first.clone();
        second.created_at = first.created_at + Duration::seconds(30);
        let mut third = first.clone();
        third.created_at = first.created_at + Duration::seconds(61);

        assert!(throttle.should_send(&first));
        assert!(!throttle.should_send(&second));
        assert!(throttle.should_send(&third));
    }

    #[test]
    fn test_throttle_keys_by_source() {
        let mut throttle = AlertThrottle::new(std::time::Duration::from_secs(60));
        let rule = Alert::from_violation(&overheat(), Utc::now());
        let score = Alert::from_score(
            &AnomalyScore {
                value: 1.0,
                contributions: BTreeMap::new(),
            },
            0.5,
            3,
        );
        assert!(throttle.should_send(&rule));
        assert!(throttle.should_send(&score));
    }

    #[test]
    fn test_zero_cooldown_never_throttles() {
        let mut throttle = AlertThrottle::new(std::time::Duration::ZERO);
        let alert = Alert::from_violation(&overheat(), Utc::now());
        assert!(throttle.should_send(&alert));
        assert!(throttle.should_send(&alert));
    }
}
