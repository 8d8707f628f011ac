//! Synthetic Sensor Replay
//!
//! Generates a JSON-lines stream of feature rows whose quality measurement
//! drifts around a target band:
//! - Stable operation inside the band
//! - Slow drift toward the upper edge
//! - Excursion above the band
//! - Recovery back to the center
//!
//! Without a bundle each line is an advice request body
//! (`{"row": {...}, "measurement": y}`). With `--bundle` the rows are run
//! through a reasoning session and each line is the resulting advice. The
//! suggested smoothed action values are fed back into the next row.
//!
//! # Usage
//! ```bash
//! ./replay --count 200 --seed 7
//! ./replay --bundle artifacts/run_20240101_120000 --simulator artifacts/simulator
//! ```

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use tracing::info;

use bandwise::config::defaults::{ATTRIBUTION_TOP_K, REPLAY_BASE_DELAY_MS, SMOOTHING_WINDOW};
use bandwise::reasoning::{ModelGeneration, ReasoningSession};
use bandwise::types::{FeatureRow, TargetBand};

/// Feature names used when no bundle is given.
const DEFAULT_BACKGROUND: [&str; 3] = ["ambient_temp", "feed_moisture", "line_speed"];
const DEFAULT_ACTIONS: [&str; 2] = ["zone1_setpoint", "zone2_setpoint"];

/// Relative standard deviation of each feature's per-step random walk
const FEATURE_WALK_REL_STD: f64 = 0.005;
/// Pull of the measurement toward its phase target per step
const MEASUREMENT_REVERSION: f64 = 0.15;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Synthetic sensor stream for exercising the band-keeping advisor")]
#[command(version)]
struct Args {
    /// Number of rows to emit
    #[arg(short, long, default_value = "100")]
    count: u64,

    /// Speed multiplier (1 = one row per second, 0 = no delay)
    #[arg(short, long, default_value = "0")]
    speed: u64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Policy bundle to run the stream through
    #[arg(long)]
    bundle: Option<PathBuf>,

    /// Simulator directory paired with `--bundle`
    #[arg(long, requires = "bundle")]
    simulator: Option<PathBuf>,

    /// Lower band edge when no bundle is given
    #[arg(long, default_value = "2.0", allow_negative_numbers = true)]
    band_low: f64,

    /// Upper band edge when no bundle is given
    #[arg(long, default_value = "4.0", allow_negative_numbers = true)]
    band_high: f64,

    /// Smoothing window for the reasoning session
    #[arg(long, default_value_t = SMOOTHING_WINDOW)]
    window: usize,
}

// ============================================================================
// Replay Phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Measurement sits near the band center (0-30%)
    Stable,
    /// Slow drift toward the upper edge (30-55%)
    Drift,
    /// Disturbance pushes the measurement above the band (55-80%)
    Excursion,
    /// Return to the center (80-100%)
    Recovery,
}

impl Phase {
    const fn name(self) -> &'static str {
        match self {
            Self::Stable => "Stable (inside band)",
            Self::Drift => "Drift (toward upper edge)",
            Self::Excursion => "Excursion (above band)",
            Self::Recovery => "Recovery (back to center)",
        }
    }

    fn from_progress(progress: f64) -> Self {
        match progress {
            p if p < 0.30 => Self::Stable,
            p if p < 0.55 => Self::Drift,
            p if p < 0.80 => Self::Excursion,
            _ => Self::Recovery,
        }
    }

    /// Where the measurement is pulled to during this phase.
    fn target(self, band: TargetBand) -> f64 {
        match self {
            Self::Stable | Self::Recovery => band.midpoint(),
            Self::Drift => 0.1f64.mul_add(-band.width(), band.high),
            Self::Excursion => 0.5f64.mul_add(band.width(), band.high),
        }
    }
}

// ============================================================================
// Stream State
// ============================================================================

struct ReplayState {
    rng: StdRng,
    band: TargetBand,
    names: Vec<String>,
    values: HashMap<String, f64>,
    measurement: f64,
    noise: Normal<f64>,
}

impl ReplayState {
    fn new(band: TargetBand, names: Vec<String>, seed: Option<u64>) -> Result<Self> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let values = names
            .iter()
            .map(|name| (name.clone(), rng.gen_range(10.0..100.0)))
            .collect();
        let noise = Normal::new(0.0, band.width().max(f64::EPSILON) * 0.05)
            .context("band width gives an invalid noise distribution")?;
        Ok(Self {
            rng,
            band,
            names,
            values,
            measurement: band.midpoint(),
            noise,
        })
    }

    /// Advance one step toward `phase`'s target and return the new row.
    fn step(&mut self, phase: Phase) -> FeatureRow {
        for name in &self.names {
            if let Some(value) = self.values.get_mut(name) {
                let std = (value.abs() * FEATURE_WALK_REL_STD).max(1e-6);
                if let Ok(walk) = Normal::new(0.0, std) {
                    *value += walk.sample(&mut self.rng);
                }
            }
        }
        let pull = MEASUREMENT_REVERSION * (phase.target(self.band) - self.measurement);
        self.measurement += pull + self.noise.sample(&mut self.rng);
        self.row()
    }

    fn row(&self) -> FeatureRow {
        self.values.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Apply suggested setpoints so the next row starts from them.
    fn apply(&mut self, features: &[String], values: &[f64]) {
        for (name, value) in features.iter().zip(values) {
            if value.is_finite() {
                self.values.insert(name.clone(), *value);
            }
        }
    }
}

#[derive(Serialize)]
struct RowLine<'a> {
    row: &'a FeatureRow,
    measurement: f64,
}

/// Union of feature names, first occurrence wins.
fn feature_names<'a>(groups: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in groups.into_iter().flatten() {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut session = match &args.bundle {
        Some(dir) => {
            let generation = ModelGeneration::load(dir, args.simulator.as_deref())
                .with_context(|| format!("Failed to load bundle {}", dir.display()))?;
            Some(ReasoningSession::with_generation(
                Arc::new(generation),
                args.window,
                ATTRIBUTION_TOP_K,
            ))
        }
        None => None,
    };

    let (band, names) = match session.as_ref().and_then(ReasoningSession::generation) {
        Some(generation) => {
            let policy = generation.policy();
            let simulator_features = generation
                .simulator()
                .map(|s| s.feature_names().to_vec())
                .unwrap_or_default();
            let names = feature_names([
                policy.background_features(),
                policy.action_features(),
                simulator_features.as_slice(),
            ]);
            (policy.target_band(), names)
        }
        None => {
            anyhow::ensure!(
                args.band_low.is_finite() && args.band_high.is_finite() && args.band_low <= args.band_high,
                "band must satisfy low <= high"
            );
            let names = DEFAULT_BACKGROUND
                .iter()
                .chain(DEFAULT_ACTIONS.iter())
                .map(|s| (*s).to_string())
                .collect();
            (TargetBand::new(args.band_low, args.band_high), names)
        }
    };

    let mut state = ReplayState::new(band, names, args.seed)?;
    let delay = if args.speed == 0 {
        Duration::ZERO
    } else {
        Duration::from_millis(REPLAY_BASE_DELAY_MS / args.speed)
    };

    info!(
        rows = args.count,
        band_low = band.low,
        band_high = band.high,
        features = state.names.len(),
        seed = ?args.seed,
        reasoning = session.is_some(),
        "Replay starting"
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut phase = None;
    let mut out_of_band = 0u64;

    for i in 0..args.count {
        let loop_start = Instant::now();
        #[allow(clippy::cast_precision_loss)]
        let current = Phase::from_progress(i as f64 / args.count.max(1) as f64);
        if phase != Some(current) {
            info!(row = i, "Phase: {}", current.name());
            phase = Some(current);
        }

        let row = state.step(current);
        let measurement = state.measurement;
        if !band.contains(measurement) {
            out_of_band += 1;
        }

        match session.as_mut() {
            Some(session) => {
                let result = session.reasoned_advice(&row, measurement)?;
                writeln!(out, "{}", serde_json::to_string(&result)?)?;
                state.apply(&result.action_features, &result.suggested_action_values_smoothed);
            }
            None => {
                let line = RowLine {
                    row: &row,
                    measurement,
                };
                writeln!(out, "{}", serde_json::to_string(&line)?)?;
            }
        }
        out.flush()?;

        let elapsed = loop_start.elapsed();
        if elapsed < delay {
            std::thread::sleep(delay - elapsed);
        }
    }

    info!(rows = args.count, out_of_band, "Replay complete");
    Ok(())
}
