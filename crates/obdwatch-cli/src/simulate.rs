// obdwatch Sensor Simulator - Generates realistic OBD-II readings for testing
// Writes one JSON reading per line to stdout, so it can be piped into the worker:
//   obdwatch-simulate --scenario overheating | obdwatch-worker --baseline-model --corpus normal.jsonl

use chrono::Utc;
use clap::{Parser, ValueEnum};
use colored::Colorize;
use obdwatch_core::{Metric, Reading};
use rand::prelude::*;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "obdwatch-simulate")]
#[command(about = "Generate vehicle sensor readings for obdwatch testing")]
struct Args {
    /// Scenario to simulate
    #[arg(short, long, default_value = "normal")]
    scenario: Scenario,

    /// Interval between readings (milliseconds)
    #[arg(short, long, default_value = "1000")]
    interval: u64,

    /// Number of readings to emit (0 = forever)
    #[arg(short, long, default_value = "0")]
    count: u64,

    /// Ticks of normal driving before the scenario kicks in
    #[arg(short, long, default_value = "30")]
    warmup: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum, Default)]
enum Scenario {
    #[default]
    Normal,
    Overheating,
    VoltageDrop,
    SensorDropout,
    Erratic,
}

struct SimulatorState {
    tick: u64,
    coolant_temp: f64, // drifts up when overheating
    voltage: f64,      // sags when the alternator fails
    speed: f64,
}

impl Default for SimulatorState {
    fn default() -> Self {
        Self {
            tick: 0,
            coolant_temp: 88.0,
            voltage: 14.1,
            speed: 40.0,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    eprintln!();
    eprintln!("{}", "╔══════════════════════════════════════════════════╗".cyan());
    eprintln!("{}", "║         🚗 obdwatch Sensor Simulator             ║".cyan().bold());
    eprintln!("{}", "╠══════════════════════════════════════════════════╣".cyan());
    eprintln!("║  Scenario: {:<37} ║", format!("{:?}", args.scenario).yellow());
    eprintln!("║  Interval: {:<37} ║", format!("{}ms", args.interval).green());
    eprintln!("║  Warmup:   {:<37} ║", format!("{} readings", args.warmup).green());
    eprintln!("{}", "╚══════════════════════════════════════════════════╝".cyan());
    eprintln!();

    let mut state = SimulatorState::default();
    let interval = Duration::from_millis(args.interval);
    let stdout = io::stdout();

    loop {
        // Check count limit
        if args.count > 0 && state.tick >= args.count {
            eprintln!("\n{} Emitted {} readings.", "✓".green(), state.tick);
            break;
        }

        let active = state.tick >= args.warmup;
        update_state(args.scenario, active, &mut state);
        let reading = generate_reading(args.scenario, active, &state);

        let mut out = stdout.lock();
        writeln!(out, "{}", serde_json::to_string(&reading)?)?;
        out.flush()?;
        drop(out);

        if active && state.tick == args.warmup {
            eprintln!("{} Scenario {:?} started", "⚠".yellow(), args.scenario);
        }

        state.tick += 1;
        tokio::time::sleep(interval).await;
    }

    Ok(())
}

fn update_state(scenario: Scenario, active: bool, state: &mut SimulatorState) {
    let mut rng = rand::rng();

    // speed wanders between stop-and-go and cruise
    state.speed = (state.speed + rng.random_range(-4.0..4.0)).clamp(0.0, 120.0);

    if !active {
        return;
    }
    match scenario {
        Scenario::Overheating => {
            // Coolant climbs until well past the limit
            state.coolant_temp = (state.coolant_temp + 0.8).min(125.0);
        }
        Scenario::VoltageDrop => {
            // Alternator failing, battery draining
            state.voltage = (state.voltage - 0.08).max(9.5);
        }
        Scenario::Normal | Scenario::SensorDropout | Scenario::Erratic => {}
    }
}

fn generate_reading(scenario: Scenario, active: bool, state: &SimulatorState) -> Reading {
    let mut rng = rand::rng();

    let throttle = 12.0 + state.speed * 0.35 + rng.random_range(-2.0..2.0);
    let mut rpm = 800.0 + state.speed * 28.0 + rng.random_range(-60.0..60.0);
    let mut load = 20.0 + throttle * 0.6 + rng.random_range(-3.0..3.0);

    if active && matches!(scenario, Scenario::Erratic) && rng.random_ratio(1, 4) {
        // misfire: rpm and load jump without a throttle change
        rpm += rng.random_range(-700.0..900.0);
        load += rng.random_range(-15.0..25.0);
    }

    let mut reading = Reading::new(Utc::now())
        .with(Metric::Rpm, round(rpm.max(0.0), 0))
        .with(Metric::CoolantTemp, round(state.coolant_temp + rng.random_range(-0.5..0.5), 1))
        .with(Metric::IntakePressure, round(30.0 + load * 0.5, 1))
        .with(Metric::Maf, round(2.5 + rpm * load / 12_000.0, 2))
        .with(Metric::ThrottlePos, round(throttle, 1))
        .with(Metric::EngineLoad, round(load.clamp(0.0, 100.0), 1))
        .with(Metric::VehicleSpeed, round(state.speed, 0))
        .with(Metric::IntakeAirTemp, round(28.0 + rng.random_range(-1.0..1.0), 1))
        .with(Metric::Voltage, round(state.voltage + rng.random_range(-0.05..0.05), 2));

    if active && matches!(scenario, Scenario::SensorDropout) {
        // flaky adapter: some queries come back empty
        if rng.random_ratio(3, 10) {
            reading.maf = None;
        }
        if rng.random_ratio(1, 10) {
            reading.intake_air_temp = None;
        }
        if rng.random_ratio(1, 20) {
            reading.voltage = None;
        }
    }

    reading
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
