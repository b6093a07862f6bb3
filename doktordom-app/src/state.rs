use std::result::Result as StdResult;

use doktordom_location::{
    AcquisitionResult, AcquisitionState, LocationAcquirer, LocationError, LocationSettings,
    StatusUpdateSender, TokioClock,
};
use log::error;
use serde::{Deserialize, Serialize};
use tauri::AppHandle;
use tauri_plugin_dialog::{DialogExt, MessageDialogKind};
use tauri_specta::Event;

use crate::{Result, location::TauriLocation};

/// The location acquirer changed state, contains the new state
#[derive(Serialize, Deserialize, Clone, Debug, specta::Type, tauri_specta::Event)]
pub struct LocationStatusUpdate(AcquisitionState);

pub struct TauriStatusSender(AppHandle);

impl StatusUpdateSender for TauriStatusSender {
    fn send_update(&self, state: AcquisitionState) {
        if let Err(why) = LocationStatusUpdate(state).emit(&self.0) {
            error!("Error sending location status update to UI: {why:?}");
        }
    }
}

pub type Acquirer = LocationAcquirer<TauriLocation, TokioClock, TauriStatusSender>;

pub struct AppState {
    app: AppHandle,
    pub acquirer: Acquirer,
}

const MANUAL_ENTRY_HINT: &str =
    "Мы не смогли определить ваше местоположение. Вы можете ввести адрес вручную.";

fn info_dialog(app: &AppHandle, msg: &str) {
    app.dialog()
        .message(msg)
        .kind(MessageDialogKind::Info)
        .show(|_| {});
}

impl AppState {
    pub fn new(app: AppHandle, settings: LocationSettings) -> Self {
        let acquirer = Acquirer::new(
            TauriLocation::new(app.clone()),
            TokioClock::new(),
            TauriStatusSender(app.clone()),
            settings,
        );
        Self { app, acquirer }
    }

    /// Turn an acquisition outcome into a command result, suggesting manual address entry when
    /// there's no way we'll get a location
    pub fn report(
        &self,
        res: StdResult<AcquisitionResult, LocationError>,
    ) -> Result<AcquisitionResult> {
        res.map_err(|why| {
            if why.suggests_manual_entry() {
                info_dialog(&self.app, MANUAL_ENTRY_HINT);
            }
            why.to_string()
        })
    }
}
