use serde::{Deserialize, Serialize};

use crate::{clock::UtcDT, strategy::AccuracyTarget};

/// A single fix as reported by the device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, specta::Type)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty, `None` if the platform didn't report one
    pub accuracy_meters: Option<f64>,
    /// When the device says the fix was taken
    pub captured_at: UtcDT,
}

impl LocationSample {
    pub fn band(&self) -> AccuracyBand {
        AccuracyBand::classify(self.accuracy_meters)
    }

    /// Whether this fix is at least as accurate as `required_meters`
    pub fn satisfies(&self, required_meters: f64) -> bool {
        self.accuracy_meters
            .is_some_and(|acc| acc.is_finite() && acc >= 0.0 && acc <= required_meters)
    }

    /// Whether this fix is strictly more accurate than `other`, unknown accuracy loses to
    /// everything
    pub fn is_better_than(&self, other: &LocationSample) -> bool {
        match (known_accuracy(self.accuracy_meters), known_accuracy(other.accuracy_meters)) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }
}

fn known_accuracy(acc: Option<f64>) -> Option<f64> {
    acc.filter(|a| a.is_finite() && *a >= 0.0)
}

/// Qualitative accuracy of a fix, ordered from best to worst
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, specta::Type,
)]
pub enum AccuracyBand {
    /// Within 5 meters
    Excellent,
    /// Within 20 meters
    Good,
    /// Within 100 meters
    Fair,
    /// Worse than 100 meters, or unknown
    Poor,
}

impl AccuracyBand {
    pub const EXCELLENT_MAX_METERS: f64 = 5.0;
    pub const GOOD_MAX_METERS: f64 = 20.0;
    pub const FAIR_MAX_METERS: f64 = 100.0;

    pub fn classify(accuracy_meters: Option<f64>) -> Self {
        match known_accuracy(accuracy_meters) {
            Some(acc) if acc <= Self::EXCELLENT_MAX_METERS => Self::Excellent,
            Some(acc) if acc <= Self::GOOD_MAX_METERS => Self::Good,
            Some(acc) if acc <= Self::FAIR_MAX_METERS => Self::Fair,
            _ => Self::Poor,
        }
    }
}

/// Which positioning subsystem most likely produced a fix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum LocationSource {
    Gps,
    Network,
    Passive,
}

impl From<AccuracyTarget> for LocationSource {
    fn from(target: AccuracyTarget) -> Self {
        match target {
            AccuracyTarget::High | AccuracyTarget::Highest => Self::Gps,
            AccuracyTarget::Balanced => Self::Network,
            AccuracyTarget::Low | AccuracyTarget::Lowest => Self::Passive,
        }
    }
}
