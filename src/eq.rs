//! Threshold-to-equalizer mapping
//!
//! Maps a set of per-frequency hearing thresholds to three band gains.
//! The least-impaired frequency becomes the zero-loss reference; each
//! band's gain is a fixed fraction of its members' mean loss, clamped to
//! the configured range.

use crate::audiogram::AudiogramResult;
use crate::config::{BandMap, FitConfig, GainRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Equalizer settings: one global gain multiplier plus three band gains
/// in dB.
///
/// Serialized field names match the device's command vocabulary and the
/// on-disk profile format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EqGainSet {
    /// Global gain multiplier (linear, not dB)
    #[serde(rename = "GAIN_global")]
    pub gain_global: f64,
    /// Low band gain (500 Hz peaking filter)
    #[serde(rename = "EQ500_db")]
    pub low_db: f64,
    /// Mid band gain (2 kHz peaking filter)
    #[serde(rename = "EQ2000_db")]
    pub mid_db: f64,
    /// High band gain (4 kHz peaking filter)
    #[serde(rename = "EQ4000_db")]
    pub high_db: f64,
}

impl Default for EqGainSet {
    fn default() -> Self {
        Self::flat()
    }
}

impl EqGainSet {
    /// Unity gain, no correction
    pub fn flat() -> Self {
        Self {
            gain_global: 1.0,
            low_db: 0.0,
            mid_db: 0.0,
            high_db: 0.0,
        }
    }
}

/// Provenance of a computed correction, persisted alongside the gains so
/// a profile documents how it was derived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EqProvenance {
    /// Reference level: the minimum measured threshold (dB rel)
    pub reference_db: f64,
    /// Per-frequency loss relative to the reference (dB)
    pub losses_db: BTreeMap<u32, f64>,
    /// Band membership used for the averaging
    pub band_map: BandMap,
    /// Human-readable statement of the gain rule
    pub rule: String,
}

/// Band gains derived from an audiogram, plus their provenance
#[derive(Debug, Clone, PartialEq)]
pub struct EqSolution {
    pub low_db: f64,
    pub mid_db: f64,
    pub high_db: f64,
    pub provenance: EqProvenance,
}

impl EqSolution {
    /// Combine the band gains with an independently chosen global gain
    pub fn gain_set(&self, gain_global: f64) -> EqGainSet {
        EqGainSet {
            gain_global,
            low_db: self.low_db,
            mid_db: self.mid_db,
            high_db: self.high_db,
        }
    }
}

/// Pure threshold-to-gain mapper. Holds no state beyond its rule.
#[derive(Debug, Clone)]
pub struct EqMapper {
    bands: BandMap,
    rule: GainRule,
}

impl EqMapper {
    pub fn new(bands: BandMap, rule: GainRule) -> Self {
        Self { bands, rule }
    }

    pub fn from_config(config: &FitConfig) -> Self {
        Self::new(config.bands.clone(), config.gain_rule)
    }

    /// Map measured thresholds to three band gains.
    ///
    /// The reference level is the minimum threshold across all measured
    /// frequencies; per-frequency loss is threshold minus reference. Band
    /// loss is the mean over members present in the input (absent members
    /// are skipped; a band with no present members gets zero gain).
    ///
    /// # Panics
    /// Panics if `thresholds` is empty. Callers must guard.
    pub fn map(&self, thresholds: &BTreeMap<u32, f64>) -> EqSolution {
        assert!(!thresholds.is_empty(), "thresholds must not be empty");

        let reference_db = thresholds
            .values()
            .copied()
            .fold(f64::INFINITY, f64::min);
        let losses_db: BTreeMap<u32, f64> = thresholds
            .iter()
            .map(|(&f, &t)| (f, t - reference_db))
            .collect();

        let low_db = self.band_gain(&self.bands.low, &losses_db);
        let mid_db = self.band_gain(&self.bands.mid, &losses_db);
        let high_db = self.band_gain(&self.bands.high, &losses_db);

        let provenance = EqProvenance {
            reference_db,
            losses_db,
            band_map: self.bands.clone(),
            rule: format!(
                "gain = {} * loss (clipped {}..{} dB)",
                self.rule.factor, self.rule.min_db, self.rule.max_db
            ),
        };

        EqSolution {
            low_db,
            mid_db,
            high_db,
            provenance,
        }
    }

    /// Convenience wrapper over [`map`](Self::map) for a session result
    pub fn map_result(&self, result: &AudiogramResult) -> EqSolution {
        self.map(&result.thresholds)
    }

    fn band_gain(&self, members: &[u32], losses_db: &BTreeMap<u32, f64>) -> f64 {
        let present: Vec<f64> = members
            .iter()
            .filter_map(|f| losses_db.get(f).copied())
            .collect();
        if present.is_empty() {
            return 0.0;
        }
        let loss = present.iter().sum::<f64>() / present.len() as f64;
        (self.rule.factor * loss).clamp(self.rule.min_db, self.rule.max_db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn mapper() -> EqMapper {
        EqMapper::new(BandMap::default(), GainRule::default())
    }

    fn thresholds(pairs: &[(u32, f64)]) -> BTreeMap<u32, f64> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_reference_is_minimum_threshold() {
        let t = thresholds(&[(250, 10.0), (500, 10.0), (1000, 20.0)]);
        let solution = mapper().map(&t);
        assert_eq!(solution.provenance.reference_db, 10.0);
        assert_eq!(solution.provenance.losses_db[&250], 0.0);
        assert_eq!(solution.provenance.losses_db[&1000], 10.0);
    }

    #[test]
    fn test_worked_example() {
        // reference = 10; low loss 0, mid loss 10, high loss 20
        let t = thresholds(&[
            (250, 10.0),
            (500, 10.0),
            (1000, 20.0),
            (2000, 20.0),
            (3000, 20.0),
            (4000, 30.0),
            (6000, 30.0),
            (8000, 30.0),
        ]);
        let solution = mapper().map(&t);
        assert_abs_diff_eq!(solution.low_db, 0.0);
        assert_abs_diff_eq!(solution.mid_db, 5.0);
        assert_abs_diff_eq!(solution.high_db, 10.0);
    }

    #[test]
    fn test_gain_clamped_to_rule_bounds() {
        // 60 dB of high-band loss would map to 30 dB, above the 25 dB cap
        let t = thresholds(&[(250, 0.0), (4000, 60.0), (6000, 60.0), (8000, 60.0)]);
        let solution = mapper().map(&t);
        assert_eq!(solution.high_db, 25.0);
        // negative losses cannot occur, but a negative product clamps to 0
        assert!(solution.low_db >= 0.0);
    }

    #[test]
    fn test_absent_band_members_are_skipped() {
        // Only 1000 Hz measured in the mid band; low/high bands empty
        let t = thresholds(&[(1000, 12.0), (2000, 18.0)]);
        let solution = mapper().map(&t);
        assert_eq!(solution.low_db, 0.0);
        assert_eq!(solution.high_db, 0.0);
        // reference 12, losses 0 and 6, mean 3, gain 1.5
        assert_abs_diff_eq!(solution.mid_db, 1.5);
    }

    #[test]
    fn test_overlapping_band_membership() {
        // 1000 Hz contributes to both low and mid
        let bands = BandMap {
            low: vec![250, 500, 1000],
            mid: vec![1000, 2000, 3000],
            high: vec![4000, 6000, 8000],
        };
        let m = EqMapper::new(bands, GainRule::default());
        let t = thresholds(&[(500, 0.0), (1000, 8.0), (2000, 8.0)]);
        let solution = m.map(&t);
        // low: mean(0, 8) = 4 -> 2.0; mid: mean(8, 8) = 8 -> 4.0
        assert_abs_diff_eq!(solution.low_db, 2.0);
        assert_abs_diff_eq!(solution.mid_db, 4.0);
    }

    #[test]
    fn test_rule_text_documents_constants() {
        let t = thresholds(&[(250, 5.0)]);
        let solution = mapper().map(&t);
        assert_eq!(solution.provenance.rule, "gain = 0.5 * loss (clipped 0..25 dB)");
    }

    #[test]
    #[should_panic(expected = "thresholds must not be empty")]
    fn test_empty_input_panics() {
        mapper().map(&BTreeMap::new());
    }

    #[test]
    fn test_gain_set_carries_global_gain() {
        let t = thresholds(&[(250, 0.0), (4000, 10.0)]);
        let eq = mapper().map(&t).gain_set(1.25);
        assert_eq!(eq.gain_global, 1.25);
        assert_abs_diff_eq!(eq.high_db, 5.0);
    }
}
