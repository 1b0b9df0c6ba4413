//! Fitting profiles
//!
//! A profile is a named, persisted bundle of equalizer settings plus,
//! for audiogram-derived profiles, the raw thresholds and the provenance
//! of the computed gains. Profiles have no versioning or history:
//! create-or-overwrite on save, full read on load, explicit delete.

pub mod store;

use crate::audiogram::AudiogramResult;
use crate::eq::{EqGainSet, EqProvenance, EqSolution};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors from profile operations
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("profile name is empty or has no usable characters")]
    InvalidName,

    #[error("profile storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("profile record is not valid JSON: {0}")]
    Format(#[from] serde_json::Error),
}

impl ProfileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProfileError::NotFound(_))
    }
}

/// How a profile's equalizer settings were produced
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FitMethod {
    /// Gains chosen by hand
    #[serde(rename = "manual")]
    Manual,
    /// Gains derived from a 2AFC audiogram
    #[serde(rename = "audiogram-2afc")]
    Audiogram2Afc,
}

/// Persisted fitting profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub method: FitMethod,
    /// Frequency list the thresholds were measured at; absent for
    /// manual profiles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freqs_hz: Option<Vec<u32>>,
    /// Measured thresholds (dB rel); null for manual profiles
    #[serde(default)]
    pub thresholds_db_rel: Option<BTreeMap<u32, f64>>,
    pub eq: EqGainSet,
    /// Provenance of derived gains; null for manual profiles
    #[serde(default)]
    pub notes: Option<EqProvenance>,
    /// When the profile was last saved
    #[serde(default = "Utc::now")]
    pub saved_utc: DateTime<Utc>,
}

impl Profile {
    /// Manually authored profile: no thresholds, no provenance
    pub fn manual(eq: EqGainSet) -> Self {
        Self {
            method: FitMethod::Manual,
            freqs_hz: None,
            thresholds_db_rel: None,
            eq,
            notes: None,
            saved_utc: Utc::now(),
        }
    }

    /// Profile derived from a completed audiogram
    pub fn from_audiogram(result: &AudiogramResult, solution: &EqSolution, gain_global: f64) -> Self {
        Self {
            method: FitMethod::Audiogram2Afc,
            freqs_hz: Some(result.thresholds.keys().copied().collect()),
            thresholds_db_rel: Some(result.thresholds.clone()),
            eq: solution.gain_set(gain_global),
            notes: Some(solution.provenance.clone()),
            saved_utc: Utc::now(),
        }
    }
}

/// Derive the storage key for a display name: trim, keep only
/// alphanumerics, hyphens, underscores, and spaces, then collapse each
/// internal whitespace run to a single underscore.
///
/// Distinct display names can sanitize to the same key (`"Test A"` and
/// `"Test  A"`); the collision is accepted and last write wins.
pub fn sanitize_name(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ' '))
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join("_")
}

/// Reverse of the key derivation for display purposes
pub fn display_name(key: &str) -> String {
    key.replace('_', " ")
}
