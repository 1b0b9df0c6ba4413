//! Audiogram measurement
//!
//! This module contains the measurement core:
//! - adaptive 2-down-1-up staircase ([`staircase`])
//! - 2AFC trial planning and scoring ([`trial`])
//! - session orchestration across the frequency list ([`session`])

pub mod session;
pub mod staircase;
pub mod trial;

use std::collections::BTreeMap;

/// One of the two presentation intervals of a 2AFC trial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    A,
    B,
}

impl Interval {
    /// The other interval
    pub fn other(self) -> Self {
        match self {
            Interval::A => Interval::B,
            Interval::B => Interval::A,
        }
    }

    pub fn label(self) -> char {
        match self {
            Interval::A => 'A',
            Interval::B => 'B',
        }
    }
}

/// Converged thresholds per frequency, in session iteration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudiogramResult {
    /// Frequency (Hz) to threshold (dB rel)
    pub thresholds: BTreeMap<u32, f64>,
}

impl AudiogramResult {
    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.thresholds.iter().map(|(&f, &t)| (f, t))
    }
}
