use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ways getting a location can fail
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize, specta::Type)]
pub enum LocationError {
    /// The user declined location access, never retried
    #[error("Location permission was denied")]
    PermissionDenied,
    /// The device didn't produce a fix in time
    #[error("Timed out waiting for a location after {after_ms}ms")]
    Timeout { after_ms: u32 },
    /// The platform location subsystem failed
    #[error("Location provider error: {0}")]
    ProviderError(String),
    /// Every strategy failed and nothing usable was cached
    #[error("No usable location could be determined")]
    NoUsableResult,
    /// The acquisition was aborted
    #[error("Location request was cancelled")]
    Cancelled,
}

impl LocationError {
    /// Whether the stale cache tier may be served in place of this error
    pub fn is_fallback_eligible(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::Timeout { .. } | Self::ProviderError(_)
        )
    }

    /// Whether the app should suggest entering an address by hand
    pub fn suggests_manual_entry(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::NoUsableResult)
    }
}
