use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::{Parser, Subcommand, ValueEnum};
use doktordom_location::{
    AccuracyBand, EnergyPreference, LocationAcquirer, LocationSettings, TokioClock,
    select_strategy,
};
use doktordom_test_shared::{RunReport, ScriptStep, ScriptedProvider, StateLog, prelude::*};
use log::info;

#[derive(Parser)]
/// Drive the location acquirer against a simulated device. Simulated time runs instantly.
struct Cli {
    /// JSON file with location settings, defaults are used otherwise
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Device replies in order: fix:<meters>[@<delay_ms>], denied[@<delay_ms>],
    /// error[@<delay_ms>] or hang. The device hangs once the script runs out.
    #[arg(long = "step", short = 's')]
    script: Vec<ScriptStep>,

    /// How many times to run the command
    #[arg(long, default_value_t = 1)]
    runs: usize,

    /// Simulated seconds to wait between runs
    #[arg(long, default_value_t = 0)]
    gap_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum Energy {
    Efficiency,
    Balanced,
    Accuracy,
}

impl From<Energy> for EnergyPreference {
    fn from(value: Energy) -> Self {
        match value {
            Energy::Efficiency => EnergyPreference::Efficiency,
            Energy::Balanced => EnergyPreference::Balanced,
            Energy::Accuracy => EnergyPreference::Accuracy,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pick a strategy and get one location
    Locate {
        /// Accuracy needed, in meters
        #[arg(long)]
        required: f64,
        #[arg(long, value_enum, default_value_t = Energy::Balanced)]
        energy: Energy,
    },
    /// Try every strategy in turn until one is accurate enough
    Progressive {
        /// Accuracy needed, in meters
        #[arg(long)]
        required: f64,
        /// Total time budget, defaults to the configured one
        #[arg(long)]
        budget_ms: Option<u32>,
    },
    /// Print the strategy that would be picked, without touching the device
    Strategy {
        #[arg(long)]
        required: f64,
        #[arg(long, value_enum, default_value_t = Energy::Balanced)]
        energy: Energy,
    },
    /// Print the accuracy band for each value
    Classify { meters: Vec<f64> },
}

/// What to do on every run
#[derive(Clone, Copy)]
enum Mode {
    Locate(f64, EnergyPreference),
    Progressive(f64, u32),
}

fn load_settings(path: Option<&PathBuf>) -> Result<LocationSettings> {
    let Some(path) = path else {
        return Ok(LocationSettings::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let settings: LocationSettings =
        serde_json::from_str(&raw).context("Failed to parse settings")?;
    settings.validate()?;
    Ok(settings)
}

fn print_json(value: &impl serde::Serialize) -> Result {
    let encoded = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{encoded}");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    colog::init();
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_ref())?;

    let mode = match cli.command {
        Commands::Strategy { required, energy } => {
            let picked = select_strategy(&settings.strategies, required, energy.into())
                .context("No strategies configured")?;
            return print_json(picked);
        }
        Commands::Classify { meters } => {
            let bands = meters
                .into_iter()
                .map(|m| (m, AccuracyBand::classify(Some(m))))
                .collect::<Vec<_>>();
            return print_json(&bands);
        }
        Commands::Locate { required, energy } => Mode::Locate(required, energy.into()),
        Commands::Progressive {
            required,
            budget_ms,
        } => Mode::Progressive(required, budget_ms.unwrap_or(settings.max_total_time_ms)),
    };

    // Device delays and timeouts resolve as fast as possible
    tokio::time::pause();

    let provider = Arc::new(ScriptedProvider::new(cli.script));
    let states = Arc::new(StateLog::default());
    let acquirer = LocationAcquirer::new(
        provider.clone(),
        TokioClock::new(),
        states.clone(),
        settings.clone(),
    );

    for run in 1..=cli.runs {
        if run > 1 && cli.gap_secs > 0 {
            info!("Waiting {}s", cli.gap_secs);
            tokio::time::sleep(Duration::from_secs(cli.gap_secs)).await;
        }

        let outcome = match mode {
            Mode::Locate(required, energy) => acquirer.locate(required, energy).await,
            Mode::Progressive(required, budget_ms) => {
                acquirer.acquire_progressive(required, budget_ms).await
            }
        };

        let report = RunReport {
            run,
            outcome,
            requests: provider.requests(),
            states: states.take(),
            cached: acquirer.cached_entry().await,
        };
        print_json(&report)?;
    }

    Ok(())
}
