use serde::{Deserialize, Serialize};

/// Accuracy level requested from the platform location API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum AccuracyTarget {
    Lowest,
    Low,
    Balanced,
    High,
    Highest,
}

impl AccuracyTarget {
    pub fn wants_high_accuracy(self) -> bool {
        matches!(self, Self::High | Self::Highest)
    }
}

/// Relative energy cost of a strategy. This is a fixed label attached to each strategy, nothing
/// measures actual battery usage.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, specta::Type,
)]
pub enum EnergyProfile {
    Low,
    Medium,
    High,
}

/// What the caller cares about more when picking a strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, specta::Type)]
pub enum EnergyPreference {
    /// Cheapest strategy that's still close enough
    Efficiency,
    #[default]
    Balanced,
    /// Most accurate strategy that's close enough
    Accuracy,
}

/// Name attached to an acquisition result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, specta::Type)]
pub enum StrategyName {
    Quick,
    Balanced,
    Precise,
    /// Result was served from the cache, no device request was needed (or it failed)
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct LocationStrategy {
    pub name: StrategyName,
    /// Accuracy level passed down to the device
    pub accuracy_target: AccuracyTarget,
    /// Accuracy this strategy nominally delivers, used when selecting
    pub expected_accuracy_meters: f64,
    /// How long a single device request may take
    pub timeout_ms: u32,
    pub energy: EnergyProfile,
}

impl LocationStrategy {
    pub fn quick() -> Self {
        Self {
            name: StrategyName::Quick,
            accuracy_target: AccuracyTarget::Low,
            expected_accuracy_meters: 100.0,
            timeout_ms: 5_000,
            energy: EnergyProfile::Low,
        }
    }

    pub fn balanced() -> Self {
        Self {
            name: StrategyName::Balanced,
            accuracy_target: AccuracyTarget::Balanced,
            expected_accuracy_meters: 20.0,
            timeout_ms: 10_000,
            energy: EnergyProfile::Medium,
        }
    }

    pub fn precise() -> Self {
        Self {
            name: StrategyName::Precise,
            accuracy_target: AccuracyTarget::Highest,
            expected_accuracy_meters: 5.0,
            timeout_ms: 15_000,
            energy: EnergyProfile::High,
        }
    }

    /// The default strategies, ordered from quickest to most precise
    pub fn defaults() -> Vec<Self> {
        vec![Self::quick(), Self::balanced(), Self::precise()]
    }

    fn qualifies_for(&self, required_meters: f64) -> bool {
        self.expected_accuracy_meters <= required_meters * 2.0
    }
}

fn most_accurate<'a>(
    strategies: impl Iterator<Item = &'a LocationStrategy>,
) -> Option<&'a LocationStrategy> {
    strategies.min_by(|a, b| a.expected_accuracy_meters.total_cmp(&b.expected_accuracy_meters))
}

/// Pick the strategy to use for a request needing `required_meters` of accuracy.
///
/// Strategies whose expected accuracy is within 2x of the requirement qualify, if none do (or
/// the requirement is nonsense) the most accurate strategy is used. Among qualifying strategies
/// `preference` decides. Only returns `None` if `strategies` is empty.
pub fn select_strategy(
    strategies: &[LocationStrategy],
    required_meters: f64,
    preference: EnergyPreference,
) -> Option<&LocationStrategy> {
    let fallback = most_accurate(strategies.iter());

    if !(required_meters.is_finite() && required_meters > 0.0) {
        return fallback;
    }

    let mut qualifying = strategies
        .iter()
        .filter(|s| s.qualifies_for(required_meters))
        .collect::<Vec<_>>();

    if qualifying.is_empty() {
        return fallback;
    }

    let picked = match preference {
        EnergyPreference::Efficiency => qualifying.iter().copied().min_by(|a, b| {
            a.energy.cmp(&b.energy).then(
                a.expected_accuracy_meters
                    .total_cmp(&b.expected_accuracy_meters),
            )
        }),
        EnergyPreference::Accuracy => most_accurate(qualifying.iter().copied()),
        EnergyPreference::Balanced => qualifying
            .iter()
            .copied()
            .find(|s| s.energy == EnergyProfile::Medium)
            .or_else(|| {
                // Middle of the qualifying strategies by accuracy
                qualifying.sort_by(|a, b| {
                    a.expected_accuracy_meters
                        .total_cmp(&b.expected_accuracy_meters)
                });
                qualifying.get(qualifying.len() / 2).copied()
            }),
    };

    picked.or(fallback)
}
