//! Fitting configuration
//!
//! Bundles every tunable of the measurement procedure into one immutable
//! value handed to each component at construction: the test frequency
//! list, trial timing, level bounds, staircase step sizes and stopping
//! rule, EQ band membership, and the threshold-to-gain rule.
//!
//! Stored as JSON at `<data_dir>/hearfit/config.json`; missing fields
//! fall back to the built-in defaults so older files keep loading.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_freqs_hz() -> Vec<u32> {
    vec![250, 500, 1000, 2000, 3000, 4000, 6000, 8000]
}

fn default_quiet_db() -> f64 {
    -90.0
}

fn default_tone_ms() -> u64 {
    450
}

fn default_gap_ms() -> u64 {
    250
}

fn default_pause_ms() -> u64 {
    250
}

fn default_settle_ms() -> u64 {
    150
}

fn default_tail_ms() -> u64 {
    50
}

fn default_response_poll_ms() -> u64 {
    20
}

fn default_start_db() -> f64 {
    -45.0
}

fn default_min_db() -> f64 {
    -80.0
}

fn default_max_db() -> f64 {
    -3.0
}

fn default_step_large_db() -> f64 {
    6.0
}

fn default_step_medium_db() -> f64 {
    3.0
}

fn default_step_small_db() -> f64 {
    2.0
}

fn default_stop_reversals() -> usize {
    6
}

fn default_avg_reversals() -> usize {
    4
}

fn default_band_low() -> Vec<u32> {
    vec![250, 500]
}

fn default_band_mid() -> Vec<u32> {
    vec![1000, 2000, 3000]
}

fn default_band_high() -> Vec<u32> {
    vec![4000, 6000, 8000]
}

fn default_gain_factor() -> f64 {
    0.5
}

fn default_gain_min_db() -> f64 {
    0.0
}

fn default_gain_max_db() -> f64 {
    25.0
}

/// Trial timing in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timing {
    /// Tone duration per interval
    #[serde(default = "default_tone_ms")]
    pub tone_ms: u64,
    /// Gap between the two intervals
    #[serde(default = "default_gap_ms")]
    pub gap_ms: u64,
    /// Pause between trials
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
    /// Settle time after switching the test frequency
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Tail after each tone before the next step
    #[serde(default = "default_tail_ms")]
    pub tail_ms: u64,
    /// Poll granularity while waiting for a subject response
    #[serde(default = "default_response_poll_ms")]
    pub response_poll_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tone_ms: default_tone_ms(),
            gap_ms: default_gap_ms(),
            pause_ms: default_pause_ms(),
            settle_ms: default_settle_ms(),
            tail_ms: default_tail_ms(),
            response_poll_ms: default_response_poll_ms(),
        }
    }
}

/// Staircase level bounds, step sizes, and stopping rule
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StaircaseParams {
    /// Starting stimulus level (dB rel)
    #[serde(default = "default_start_db")]
    pub start_db: f64,
    /// Level floor
    #[serde(default = "default_min_db")]
    pub min_db: f64,
    /// Level ceiling
    #[serde(default = "default_max_db")]
    pub max_db: f64,
    /// Step size before the first reversal
    #[serde(default = "default_step_large_db")]
    pub step_large_db: f64,
    /// Step size after exactly one reversal
    #[serde(default = "default_step_medium_db")]
    pub step_medium_db: f64,
    /// Step size after two or more reversals
    #[serde(default = "default_step_small_db")]
    pub step_small_db: f64,
    /// Number of reversals that stops the staircase
    #[serde(default = "default_stop_reversals")]
    pub stop_reversals: usize,
    /// Number of trailing reversals averaged into the threshold
    #[serde(default = "default_avg_reversals")]
    pub avg_reversals: usize,
}

impl Default for StaircaseParams {
    fn default() -> Self {
        Self {
            start_db: default_start_db(),
            min_db: default_min_db(),
            max_db: default_max_db(),
            step_large_db: default_step_large_db(),
            step_medium_db: default_step_medium_db(),
            step_small_db: default_step_small_db(),
            stop_reversals: default_stop_reversals(),
            avg_reversals: default_avg_reversals(),
        }
    }
}

/// EQ band membership: which test frequencies feed each band's loss
/// average. Lists may overlap; the mapper does not assume disjointness.
///
/// Serialized field names match the device's band commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BandMap {
    /// Low band members (EQ500)
    #[serde(rename = "EQ500", default = "default_band_low")]
    pub low: Vec<u32>,
    /// Mid band members (EQ2000)
    #[serde(rename = "EQ2000", default = "default_band_mid")]
    pub mid: Vec<u32>,
    /// High band members (EQ4000)
    #[serde(rename = "EQ4000", default = "default_band_high")]
    pub high: Vec<u32>,
}

impl Default for BandMap {
    fn default() -> Self {
        Self {
            low: default_band_low(),
            mid: default_band_mid(),
            high: default_band_high(),
        }
    }
}

/// Loss-to-gain rule: gain = factor x band loss, clamped to [min, max]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GainRule {
    #[serde(default = "default_gain_factor")]
    pub factor: f64,
    #[serde(default = "default_gain_min_db")]
    pub min_db: f64,
    #[serde(default = "default_gain_max_db")]
    pub max_db: f64,
}

impl Default for GainRule {
    fn default() -> Self {
        Self {
            factor: default_gain_factor(),
            min_db: default_gain_min_db(),
            max_db: default_gain_max_db(),
        }
    }
}

/// Complete fitting configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FitConfig {
    /// Audiometric test frequencies in Hz, iterated low to high
    #[serde(default = "default_freqs_hz")]
    pub freqs_hz: Vec<u32>,
    /// Level of the non-signal interval: a real, very quiet stimulus
    /// well below the tested range, not silence-as-absence
    #[serde(default = "default_quiet_db")]
    pub quiet_db: f64,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub staircase: StaircaseParams,
    #[serde(default)]
    pub bands: BandMap,
    #[serde(default)]
    pub gain_rule: GainRule,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            freqs_hz: default_freqs_hz(),
            quiet_db: default_quiet_db(),
            timing: Timing::default(),
            staircase: StaircaseParams::default(),
            bands: BandMap::default(),
            gain_rule: GainRule::default(),
        }
    }
}

impl FitConfig {
    /// Config file path: `<data_dir>/hearfit/config.json`
    pub fn path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("hearfit")
            .join("config.json")
    }

    /// Load config from disk, falling back to defaults on any error
    pub fn load() -> Self {
        let path = Self::path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
