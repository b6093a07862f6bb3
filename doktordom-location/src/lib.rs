mod acquirer;
mod cache;
mod clock;
mod error;
mod provider;
mod sample;
mod settings;
mod strategy;

pub use acquirer::{AcquisitionResult, AcquisitionState, CacheWarning, LocationAcquirer};
pub use cache::{LocationCache, LocationCacheEntry};
pub use clock::{Clock, TokioClock, UtcDT};
pub use error::LocationError;
pub use provider::{LocationProvider, StatusUpdateSender};
pub use sample::{AccuracyBand, LocationSample, LocationSource};
pub use settings::LocationSettings;
pub use strategy::{
    AccuracyTarget, EnergyPreference, EnergyProfile, LocationStrategy, StrategyName,
    select_strategy,
};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}
