use anyhow::Context;
use doktordom_location::LocationSettings;
use log::warn;
use tauri::AppHandle;
use tauri_plugin_store::StoreExt;

use std::result::Result as StdResult;

const STORE_NAME: &str = "location";
const SETTINGS_KEY: &str = "settings";

/// Read persisted settings, falling back to the defaults if there are none or they're invalid
pub fn read_settings_from_store(app: &AppHandle) -> LocationSettings {
    let stored = app.store(STORE_NAME).ok().and_then(|store| {
        let value = store.get(SETTINGS_KEY);
        store.close_resource();
        value
    });

    let Some(value) = stored else {
        return LocationSettings::default();
    };

    match serde_json::from_value::<LocationSettings>(value)
        .context("Failed to parse stored location settings")
        .and_then(|settings| settings.validate().map(|_| settings))
    {
        Ok(settings) => settings,
        Err(why) => {
            warn!("Ignoring stored location settings: {why:?}");
            LocationSettings::default()
        }
    }
}

pub fn write_settings_to_store(
    app: &AppHandle,
    settings: &LocationSettings,
) -> StdResult<(), anyhow::Error> {
    let store = app
        .store(STORE_NAME)
        .context("Couldn't open location store")?;
    let value = serde_json::to_value(settings).context("Failed to serialize settings")?;
    store.set(SETTINGS_KEY, value);
    Ok(())
}
