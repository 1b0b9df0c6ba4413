//! Hearfit - 2AFC audiogram measurement and EQ fitting
//!
//! This library measures a subject's hearing thresholds at a fixed set of
//! audiometric frequencies using an adaptive two-interval forced-choice
//! (2AFC) staircase, converts the thresholds into a three-band equalizer
//! correction, and persists named fitting profiles that can be replayed to
//! a tone-generating DSP device over a line-oriented text protocol.

pub mod audiogram;
pub mod config;
pub mod device;
pub mod eq;
pub mod profile;

pub use audiogram::session::{AudiogramSession, SessionEvent, SessionOutcome, SessionState};
pub use audiogram::staircase::Staircase;
pub use audiogram::trial::TrialSequencer;
pub use audiogram::{AudiogramResult, Interval};
pub use config::FitConfig;
pub use device::{DeviceError, LineDevice, SharedDevice, ToneSink};
pub use eq::{EqGainSet, EqMapper};
pub use profile::store::ProfileStore;
pub use profile::{Profile, ProfileError};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
