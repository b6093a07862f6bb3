mod location;
mod settings;
mod state;

use doktordom_location::{
    AcquisitionResult, AcquisitionState, EnergyPreference, LocationCacheEntry, LocationSettings,
};
use log::LevelFilter;
use tauri::{AppHandle, Manager, State};
use tauri_specta::{ErrorHandlingMode, collect_commands, collect_events};

use std::result::Result as StdResult;

use crate::{
    settings::{read_settings_from_store, write_settings_to_store},
    state::{AppState, LocationStatusUpdate},
};

type Result<T = (), E = String> = StdResult<T, E>;

/// Flatten an error and all its causes into the message sent to the UI
fn describe(err: anyhow::Error) -> String {
    format!("{err:#}")
}

// == LOCATION COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Get the user's location accurate to `required_accuracy` meters. The strategy used is picked
/// based on `energy` (defaults to balanced). Served from cache when a recent enough fix exists.
async fn get_location(
    required_accuracy: f64,
    energy: Option<EnergyPreference>,
    state: State<'_, AppState>,
) -> Result<AcquisitionResult> {
    let res = state
        .acquirer
        .locate(required_accuracy, energy.unwrap_or_default())
        .await;
    state.report(res)
}

#[tauri::command]
#[specta::specta]
/// Get the user's location trying progressively more accurate strategies until one is accurate
/// to `required_accuracy` meters or `budget_ms` runs out (defaults to the configured budget).
/// Returns the best location found.
async fn get_location_progressive(
    required_accuracy: f64,
    budget_ms: Option<u32>,
    state: State<'_, AppState>,
) -> Result<AcquisitionResult> {
    let budget_ms = match budget_ms {
        Some(budget) => budget,
        None => state.acquirer.clone_settings().await.max_total_time_ms,
    };
    let res = state
        .acquirer
        .acquire_progressive(required_accuracy, budget_ms)
        .await;
    state.report(res)
}

#[tauri::command]
#[specta::specta]
/// Get the last location that was acquired, regardless of how old it is
async fn get_cached_location(state: State<'_, AppState>) -> Result<Option<LocationCacheEntry>> {
    Ok(state.acquirer.cached_entry().await)
}

#[tauri::command]
#[specta::specta]
/// Forget the last acquired location, the next request will always ask the device
async fn clear_location_cache(state: State<'_, AppState>) -> Result {
    state.acquirer.clear_cache().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Cancel the running location request, every pending call to [get_location] or
/// [get_location_progressive] will fail with a cancelled error
async fn abort_location(state: State<'_, AppState>) -> Result {
    state.acquirer.abort().await;
    Ok(())
}

#[tauri::command]
#[specta::specta]
/// Get what the location acquirer is currently doing, call after receiving a
/// [LocationStatusUpdate] event or on screen load
async fn get_location_state(state: State<'_, AppState>) -> Result<AcquisitionState> {
    Ok(state.acquirer.state().await)
}

// == SETTINGS COMMANDS ==

#[tauri::command]
#[specta::specta]
/// Get the current location settings
async fn get_location_settings(state: State<'_, AppState>) -> Result<LocationSettings> {
    Ok(state.acquirer.clone_settings().await)
}

#[tauri::command]
#[specta::specta]
/// Validate, apply, and persist new location settings
async fn update_location_settings(
    settings: LocationSettings,
    app: AppHandle,
    state: State<'_, AppState>,
) -> Result {
    state
        .acquirer
        .update_settings(settings.clone())
        .await
        .map_err(describe)?;
    write_settings_to_store(&app, &settings)
        .map_err(|err| describe(err.context("Failed to save location settings")))
}

pub fn mk_specta() -> tauri_specta::Builder {
    tauri_specta::Builder::<tauri::Wry>::new()
        .error_handling(ErrorHandlingMode::Throw)
        .commands(collect_commands![
            get_location,
            get_location_progressive,
            get_cached_location,
            clear_location_cache,
            abort_location,
            get_location_state,
            get_location_settings,
            update_location_settings,
        ])
        .events(collect_events![LocationStatusUpdate])
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    let builder = mk_specta();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(
            tauri_plugin_log::Builder::new()
                .level(LevelFilter::Debug)
                .build(),
        )
        .plugin(tauri_plugin_geolocation::init())
        .plugin(tauri_plugin_store::Builder::default().build())
        .invoke_handler(builder.invoke_handler())
        .setup(move |app| {
            builder.mount_events(app);

            let handle = app.handle().clone();
            let settings = read_settings_from_store(&handle);
            app.manage(AppState::new(handle, settings));
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
