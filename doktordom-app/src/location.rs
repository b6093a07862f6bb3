use chrono::{DateTime, Utc};
use doktordom_location::{AccuracyTarget, LocationError, LocationProvider, LocationSample};
use log::{debug, warn};
use tauri::{AppHandle, plugin::PermissionState};
use tauri_plugin_geolocation::{GeolocationExt, PermissionType, PositionOptions};
use tokio_util::sync::CancellationToken;

/// Platform-side cap, the acquirer enforces its own tighter timeouts
const PLATFORM_TIMEOUT_MS: u32 = 30_000;

pub struct TauriLocation(AppHandle);

impl TauriLocation {
    pub fn new(app: AppHandle) -> Self {
        Self(app)
    }
}

fn options_for(target: AccuracyTarget) -> PositionOptions {
    PositionOptions {
        enable_high_accuracy: target.wants_high_accuracy(),
        timeout: PLATFORM_TIMEOUT_MS,
        // Let the OS hand back a recent fix for coarse requests, our own cache does the rest
        maximum_age: if target.wants_high_accuracy() { 0 } else { 10_000 },
    }
}

fn map_plugin_error(err: impl std::fmt::Display) -> LocationError {
    let msg = err.to_string();
    let lower = msg.to_lowercase();
    // Denials are normally caught by the permission check, this covers the OS revoking mid-request
    if lower.contains("denied") {
        LocationError::PermissionDenied
    } else if lower.contains("timeout") || lower.contains("timed out") {
        LocationError::Timeout {
            after_ms: PLATFORM_TIMEOUT_MS,
        }
    } else {
        LocationError::ProviderError(msg)
    }
}

fn is_granted(state: &PermissionState) -> bool {
    matches!(state, PermissionState::Granted)
}

fn needs_prompt(state: &PermissionState) -> bool {
    matches!(
        state,
        PermissionState::Prompt | PermissionState::PromptWithRationale
    )
}

/// Check (and request if needed) permission, then block on the device for a fix
fn blocking_fix(app: &AppHandle, target: AccuracyTarget) -> Result<LocationSample, LocationError> {
    let geo = app.geolocation();

    let mut status = geo.check_permissions().map_err(map_plugin_error)?;

    if needs_prompt(&status.location) {
        debug!("Requesting location permission");
        status = geo
            .request_permissions(Some(vec![PermissionType::Location]))
            .map_err(map_plugin_error)?;
    }

    // Coarse requests are fine with approximate location access
    let allowed = is_granted(&status.location)
        || (!target.wants_high_accuracy() && is_granted(&status.coarse_location));

    if !allowed {
        return Err(LocationError::PermissionDenied);
    }

    let pos = geo
        .get_current_position(Some(options_for(target)))
        .map_err(map_plugin_error)?;

    let captured_at =
        DateTime::from_timestamp_millis(pos.timestamp as i64).unwrap_or_else(Utc::now);

    Ok(LocationSample {
        latitude: pos.coords.latitude,
        longitude: pos.coords.longitude,
        accuracy_meters: Some(pos.coords.accuracy).filter(|acc| acc.is_finite() && *acc >= 0.0),
        captured_at,
    })
}

impl LocationProvider for TauriLocation {
    async fn current_location(
        &self,
        target: AccuracyTarget,
        cancel: CancellationToken,
    ) -> Result<LocationSample, LocationError> {
        let app = self.0.clone();

        // The plugin call can't be interrupted, if we stop waiting it finishes on its own and
        // the result is dropped
        let task = tauri::async_runtime::spawn_blocking(move || blocking_fix(&app, target));

        tokio::select! {
            _ = cancel.cancelled() => Err(LocationError::Cancelled),
            res = task => match res {
                Ok(res) => res,
                Err(why) => {
                    warn!("Location task failed: {why:?}");
                    Err(LocationError::ProviderError(why.to_string()))
                }
            },
        }
    }
}
