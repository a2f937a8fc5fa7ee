//! Configuration parsing for the detection pipeline and alert delivery

use crate::error::{AnomalyError, Result};
use obdwatch_core::Metric;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

// Main config structure
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    // number of consecutive readings per scoring window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    // reconstruction error above this is anomalous
    #[serde(default = "default_threshold")]
    pub anomaly_threshold: f64,

    // clamp scaled values into [0,1]
    #[serde(default)]
    pub clamp_normalized: bool,

    // how many contributing sensors an anomaly alert lists
    #[serde(default = "default_top_contributors")]
    pub top_contributors: usize,

    // minimum gap between two alerts from the same source, 0 disables
    #[serde(default)]
    pub alert_cooldown_seconds: u64,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    // threshold rules, evaluated in table order
    #[serde(default = "default_rules")]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub delivery: DeliverySettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            anomaly_threshold: default_threshold(),
            clamp_normalized: false,
            top_contributors: default_top_contributors(),
            alert_cooldown_seconds: 0,
            dispatch: DispatchSettings::default(),
            rules: default_rules(),
            delivery: DeliverySettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.window_size < 1 {
            return Err(AnomalyError::Config(
                "window_size must be at least 1".to_string(),
            ));
        }
        if !self.anomaly_threshold.is_finite() || self.anomaly_threshold < 0.0 {
            return Err(AnomalyError::Config(format!(
                "anomaly_threshold must be a non-negative number, got {}",
                self.anomaly_threshold
            )));
        }
        if self.dispatch.workers < 1 || self.dispatch.queue_capacity < 1 {
            return Err(AnomalyError::Config(
                "dispatch workers and queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.delivery.timeout_seconds == 0 {
            return Err(AnomalyError::Config(
                "delivery timeout_seconds must be at least 1".to_string(),
            ));
        }
        for rule in &self.rules {
            if let (Some(min), Some(max)) = (rule.min, rule.max) {
                if min > max {
                    return Err(AnomalyError::Config(format!(
                        "rule for {} has min {} above max {}",
                        rule.metric, min, max
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_seconds)
    }
}

// Dispatch worker pool sizing
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

// A single threshold rule, either bound may be absent
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    pub metric: Metric,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub min: Option<f64>,

    #[serde(default)]
    pub max: Option<f64>,

    #[serde(default = "default_severity")]
    pub severity: Severity,
}

impl RuleConfig {
    pub fn new(metric: Metric, min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            metric,
            enabled: true,
            min,
            max,
            severity: default_severity(),
        }
    }
}

// alert severity levels
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

// Mail transport options. Missing sender or password disables every channel,
// missing phone or gateway disables the SMS relay only.
#[derive(Clone, Deserialize)]
pub struct DeliverySettings {
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub sender: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    // defaults to the sender when unset
    #[serde(default)]
    pub recipient: Option<String>,

    #[serde(default)]
    pub recipient_phone: Option<String>,

    // e.g. "txt.att.net"
    #[serde(default)]
    pub sms_gateway: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
            sender: None,
            password: None,
            recipient: None,
            recipient_phone: None,
            sms_gateway: None,
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl fmt::Debug for DeliverySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliverySettings")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_port", &self.smtp_port)
            .field("sender", &self.sender)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("recipient", &self.recipient)
            .field("recipient_phone", &self.recipient_phone)
            .field("sms_gateway", &self.sms_gateway)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

impl DeliverySettings {
    /// Override fields from environment variables (a `.env` file is loaded by the binary)
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_lookup(|key| std::env::var(key).ok())
    }

    /// Override fields from any key lookup, empty values count as unset
    pub fn apply_lookup<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(server) = get("SMTP_SERVER") {
            self.smtp_server = server;
        }
        if let Some(port) = get("SMTP_PORT") {
            self.smtp_port = port
                .parse()
                .map_err(|_| AnomalyError::Config(format!("SMTP_PORT is not a port: {}", port)))?;
        }
        if let Some(timeout) = get("SMTP_TIMEOUT_SECS") {
            self.timeout_seconds = timeout
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    AnomalyError::Config(format!(
                        "SMTP_TIMEOUT_SECS must be a positive number of seconds: {}",
                        timeout
                    ))
                })?;
        }
        self.sender = get("EMAIL_SENDER").or(self.sender.take());
        self.password = get("EMAIL_PASSWORD").or(self.password.take());
        self.recipient = get("EMAIL_RECIPIENT").or(self.recipient.take());
        self.recipient_phone = get("RECIPIENT_PHONE").or(self.recipient_phone.take());
        self.sms_gateway = get("SMS_GATEWAY").or(self.sms_gateway.take());
        Ok(())
    }

    /// Sender and password are both present
    pub fn has_credentials(&self) -> bool {
        self.sender.is_some() && self.password.is_some()
    }

    /// Direct recipient, falling back to the sender address
    pub fn direct_recipient(&self) -> Option<&str> {
        self.recipient.as_deref().or(self.sender.as_deref())
    }

    /// SMS gateway address built from phone number and gateway domain
    pub fn gateway_address(&self) -> Option<String> {
        match (&self.recipient_phone, &self.sms_gateway) {
            (Some(phone), Some(gateway)) => Some(format!("{}@{}", phone, gateway)),
            _ => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

// The stock vehicle limits
pub fn default_rules() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new(Metric::Rpm, Some(600.0), Some(5500.0)),
        RuleConfig::new(Metric::CoolantTemp, Some(70.0), Some(105.0)),
        RuleConfig::new(Metric::IntakePressure, None, Some(120.0)),
        RuleConfig::new(Metric::Maf, None, Some(120.0)),
        RuleConfig::new(Metric::ThrottlePos, Some(2.0), Some(95.0)),
        RuleConfig::new(Metric::EngineLoad, Some(10.0), Some(90.0)),
        RuleConfig::new(Metric::VehicleSpeed, None, Some(180.0)),
        RuleConfig::new(Metric::IntakeAirTemp, None, Some(60.0)),
        RuleConfig::new(Metric::Voltage, Some(11.5), Some(15.0)),
    ]
}

// defualt value helpers for serde
fn default_true() -> bool {
    true
}

fn default_window_size() -> usize {
    20
}

fn default_threshold() -> f64 {
    0.01
}

fn default_top_contributors() -> usize {
    3
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_timeout_seconds() -> u64 {
    10
}

/// Parse and validate configuration from TOML text
pub fn parse_config(content: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}
