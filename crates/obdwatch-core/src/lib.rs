//! Core types for vehicle sensor monitoring
//! this crate contains the shared data structures used across all components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// METRICS //

/// Number of sensor channels in a feature vector
pub const FEATURE_COUNT: usize = 9;

/// Sensor channels read from the vehicle, in canonical feature order.
/// The order here is the column order of every feature vector and window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Rpm,
    CoolantTemp,
    IntakePressure,
    Maf,
    ThrottlePos,
    EngineLoad,
    VehicleSpeed,
    IntakeAirTemp,
    Voltage,
}

impl Metric {
    pub const ALL: [Metric; FEATURE_COUNT] = [
        Metric::Rpm,
        Metric::CoolantTemp,
        Metric::IntakePressure,
        Metric::Maf,
        Metric::ThrottlePos,
        Metric::EngineLoad,
        Metric::VehicleSpeed,
        Metric::IntakeAirTemp,
        Metric::Voltage,
    ];

    /// Column index of this metric in a feature vector
    pub fn index(self) -> usize {
        self as usize
    }

    /// snake_case name, same as the JSON key
    pub fn name(self) -> &'static str {
        match self {
            Metric::Rpm => "rpm",
            Metric::CoolantTemp => "coolant_temp",
            Metric::IntakePressure => "intake_pressure",
            Metric::Maf => "maf",
            Metric::ThrottlePos => "throttle_pos",
            Metric::EngineLoad => "engine_load",
            Metric::VehicleSpeed => "vehicle_speed",
            Metric::IntakeAirTemp => "intake_air_temp",
            Metric::Voltage => "voltage",
        }
    }

    /// Unit suffix used in human readable messages
    pub fn unit(self) -> &'static str {
        match self {
            Metric::Rpm => "",
            Metric::CoolantTemp | Metric::IntakeAirTemp => "°C",
            Metric::IntakePressure => " kPa",
            Metric::Maf => " g/s",
            Metric::ThrottlePos | Metric::EngineLoad => "%",
            Metric::VehicleSpeed => " km/h",
            Metric::Voltage => "V",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One value per metric in canonical order; `None` means the sensor was unset
pub type FeatureVector = [Option<f64>; FEATURE_COUNT];

// READING //

/// A single timestamped sample of every sensor channel.
/// Any metric may be absent when the vehicle does not support it or the
/// query failed. One reading is one JSON object per line on the wire; values
/// may be numbers or raw logged strings such as `"45.1%"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub rpm: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub coolant_temp: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub intake_pressure: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub maf: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub throttle_pos: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub engine_load: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub vehicle_speed: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub intake_air_temp: Option<f64>,

    #[serde(default, deserialize_with = "sensor_value")]
    pub voltage: Option<f64>,
}

impl Reading {
    /// Reading with every metric unset
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            rpm: None,
            coolant_temp: None,
            intake_pressure: None,
            maf: None,
            throttle_pos: None,
            engine_load: None,
            vehicle_speed: None,
            intake_air_temp: None,
            voltage: None,
        }
    }

    /// Builder style setter, used by simulators and tests
    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        *self.slot_mut(metric) = Some(value);
        self
    }

    /// Value of a metric; NaN counts as unset
    pub fn get(&self, metric: Metric) -> Option<f64> {
        let value = match metric {
            Metric::Rpm => self.rpm,
            Metric::CoolantTemp => self.coolant_temp,
            Metric::IntakePressure => self.intake_pressure,
            Metric::Maf => self.maf,
            Metric::ThrottlePos => self.throttle_pos,
            Metric::EngineLoad => self.engine_load,
            Metric::VehicleSpeed => self.vehicle_speed,
            Metric::IntakeAirTemp => self.intake_air_temp,
            Metric::Voltage => self.voltage,
        };
        value.filter(|v| !v.is_nan())
    }

    /// Feature vector in canonical metric order
    pub fn features(&self) -> FeatureVector {
        Metric::ALL.map(|m| self.get(m))
    }

    /// Parse one JSON line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }

    fn slot_mut(&mut self, metric: Metric) -> &mut Option<f64> {
        match metric {
            Metric::Rpm => &mut self.rpm,
            Metric::CoolantTemp => &mut self.coolant_temp,
            Metric::IntakePressure => &mut self.intake_pressure,
            Metric::Maf => &mut self.maf,
            Metric::ThrottlePos => &mut self.throttle_pos,
            Metric::EngineLoad => &mut self.engine_load,
            Metric::VehicleSpeed => &mut self.vehicle_speed,
            Metric::IntakeAirTemp => &mut self.intake_air_temp,
            Metric::Voltage => &mut self.voltage,
        }
    }
}

// RAW VALUES //

/// Clean a raw logged sensor value such as `"45.1%"` or `"13,8"`.
/// Unparsable or NaN input is unset, never zero.
pub fn parse_sensor_value(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(['%', '"'], "").replace(',', ".");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| !v.is_nan())
}

// numbers pass through, strings go through parse_sensor_value
fn sensor_value<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Number(v)) => Some(v).filter(|v| !v.is_nan()),
        Some(Raw::Text(raw)) => parse_sensor_value(&raw),
        None => None,
    })
}
