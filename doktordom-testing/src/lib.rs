use std::{
    collections::VecDeque,
    str::FromStr,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use doktordom_location::{
    AccuracyTarget, AcquisitionResult, AcquisitionState, LocationCacheEntry, LocationError,
    LocationProvider, LocationSample, StatusUpdateSender,
};
use log::info;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

pub use prelude::*;

/// Where the simulated device claims to be
pub const SIM_LATITUDE: f64 = 55.7558;
pub const SIM_LONGITUDE: f64 = 37.6173;

/// One simulated device reply.
///
/// Written as `fix:<meters>[@<delay_ms>]`, `denied[@<delay_ms>]`, `error[@<delay_ms>]` or `hang`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScriptStep {
    Fix { accuracy: f64, delay_ms: u64 },
    Denied { delay_ms: u64 },
    ProviderError { delay_ms: u64 },
    Hang,
}

fn parse_delay(raw: Option<&str>) -> Result<u64> {
    raw.map(|d| d.parse::<u64>().context("Invalid delay"))
        .transpose()
        .map(|d| d.unwrap_or(0))
}

impl FromStr for ScriptStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (head, delay) = match s.split_once('@') {
            Some((head, delay)) => (head, Some(delay)),
            None => (s, None),
        };
        let delay_ms = parse_delay(delay).with_context(|| format!("In step \"{s}\""))?;

        match head.split_once(':') {
            Some(("fix", accuracy)) => {
                let accuracy = accuracy
                    .parse::<f64>()
                    .with_context(|| format!("Invalid accuracy in step \"{s}\""))?;
                Ok(Self::Fix { accuracy, delay_ms })
            }
            Some((other, _)) => bail!("Unknown step kind \"{other}\""),
            None => match head {
                "denied" => Ok(Self::Denied { delay_ms }),
                "error" => Ok(Self::ProviderError { delay_ms }),
                "hang" if delay.is_none() => Ok(Self::Hang),
                "hang" => bail!("hang never resolves, it can't have a delay"),
                other => Err(anyhow!("Unknown step \"{other}\"")),
            },
        }
    }
}

/// [LocationProvider] replying from a script, then hanging once it runs out
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptStep>>,
    requests: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> ScriptStep {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or(ScriptStep::Hang)
    }
}

impl LocationProvider for ScriptedProvider {
    fn current_location(
        &self,
        target: AccuracyTarget,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<LocationSample, LocationError>> + Send {
        let n = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.next_step();
        info!("Device request #{n} at {target:?}: {step:?}");

        async move {
            let reply = async {
                match step {
                    ScriptStep::Fix { accuracy, delay_ms } => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        Ok(LocationSample {
                            latitude: SIM_LATITUDE,
                            longitude: SIM_LONGITUDE,
                            accuracy_meters: Some(accuracy),
                            captured_at: Utc::now(),
                        })
                    }
                    ScriptStep::Denied { delay_ms } => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        Err(LocationError::PermissionDenied)
                    }
                    ScriptStep::ProviderError { delay_ms } => {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        Err(LocationError::ProviderError(
                            "Simulated provider failure".into(),
                        ))
                    }
                    ScriptStep::Hang => std::future::pending().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => Err(LocationError::Cancelled),
                res = reply => res,
            }
        }
    }
}

/// Keeps every state the acquirer went through
#[derive(Default)]
pub struct StateLog(Mutex<Vec<AcquisitionState>>);

impl StateLog {
    pub fn take(&self) -> Vec<AcquisitionState> {
        self.0
            .lock()
            .map(|mut states| std::mem::take(&mut *states))
            .unwrap_or_default()
    }
}

impl StatusUpdateSender for StateLog {
    fn send_update(&self, state: AcquisitionState) {
        if let Ok(mut states) = self.0.lock() {
            states.push(state);
        }
    }
}

/// Printed after every simulated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run: usize,
    pub outcome: std::result::Result<AcquisitionResult, LocationError>,
    /// Device requests made so far
    pub requests: usize,
    pub states: Vec<AcquisitionState>,
    pub cached: Option<LocationCacheEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps() {
        assert_eq!(
            "fix:80@3000".parse::<ScriptStep>().expect("Failed to parse"),
            ScriptStep::Fix {
                accuracy: 80.0,
                delay_ms: 3000
            }
        );
        assert_eq!(
            "fix:4.5".parse::<ScriptStep>().expect("Failed to parse"),
            ScriptStep::Fix {
                accuracy: 4.5,
                delay_ms: 0
            }
        );
        assert_eq!(
            "denied".parse::<ScriptStep>().expect("Failed to parse"),
            ScriptStep::Denied { delay_ms: 0 }
        );
        assert_eq!(
            " error@250 ".parse::<ScriptStep>().expect("Failed to parse"),
            ScriptStep::ProviderError { delay_ms: 250 }
        );
        assert_eq!(
            "hang".parse::<ScriptStep>().expect("Failed to parse"),
            ScriptStep::Hang
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "fix", "fix:far", "fix:10@soon", "hang@100", "teleport", "gps:5"] {
            assert!(bad.parse::<ScriptStep>().is_err(), "\"{bad}\" parsed");
        }
    }

    #[tokio::test]
    async fn test_scripted_provider_runs_out_into_hang() {
        tokio::time::pause();
        let provider = ScriptedProvider::new([ScriptStep::Fix {
            accuracy: 12.0,
            delay_ms: 100,
        }]);

        let sample = provider
            .current_location(AccuracyTarget::Balanced, CancellationToken::new())
            .await
            .expect("Scripted fix failed");
        assert_eq!(sample.accuracy_meters, Some(12.0));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let res = provider
            .current_location(AccuracyTarget::Balanced, cancel)
            .await;
        assert_eq!(res, Err(LocationError::Cancelled));
        assert_eq!(provider.requests(), 2);
    }
}
