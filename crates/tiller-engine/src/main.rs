//! Helm binary for Tiller.
//!
//! Loads behaviors from `tiller-config.yaml`, then drives the decision
//! engine from a simulated clock and a simulated info buffer, logging
//! one report per tick.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tiller-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the decision engine with the binary's behavior kinds
//! 4. Run the requested number of ticks (first argument, default 20)

mod behaviors;
mod error;

use std::path::Path;

use rand::Rng;
use tiller_helm::config::{LogFormat, LoggingConfig};
use tiller_helm::{DecisionEngine, HelmConfig, InfoBuffer, ManualClock, Report};
use tiller_ivp::text::compact;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Ticks run when no count is given.
const DEFAULT_TICKS: u64 = 20;

/// Simulated seconds between ticks.
const TICK_SECONDS: f64 = 1.0;

/// Info variable carrying spawn requests for templates.
const WAYPOINT_VAR: &str = "WAYPOINT_REQUEST";

/// Application entry point for the helm.
///
/// # Errors
///
/// Returns an error if configuration, engine construction, or report
/// serialization fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let loaded = load_config()?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("tiller-engine starting");
    if !found {
        warn!("Config file not found, using defaults");
    }
    info!(
        variables = config.domain.len(),
        behaviors = config.behaviors.len(),
        report_functions = config.helm.report_functions,
        "Configuration loaded"
    );

    // 3. Build the engine.
    let mut helm = DecisionEngine::from_config(&config, behaviors::factory(), ManualClock::new(0.0))
        .map_err(EngineError::from)?;
    info!(
        domain = %helm.domain(),
        behaviors = helm.registry().len(),
        "Decision engine ready"
    );

    // 4. Tick loop.
    let ticks = tick_count()?;
    let json = config.logging.format == LogFormat::Json;
    let mut sensors = Sensors::default();
    let mut previous: Option<Report> = None;

    for _ in 0..ticks {
        let info = sensors.sample(helm.iteration().saturating_add(1), previous.as_ref());
        let report = helm.run_tick(&info);

        if json {
            let encoded = serde_json::to_string(&report).map_err(EngineError::from)?;
            info!(report = %encoded, "Helm report");
        } else {
            info!(report = %report.render(previous.as_ref()), "Helm report");
        }
        if let Some(reason) = &report.halt {
            warn!(iteration = report.iteration, reason = %reason, "Tick halted");
        }

        helm.clock_mut().advance(TICK_SECONDS);
        previous = Some(report);
    }

    info!(
        ticks,
        life_events = helm.registry().life_events().len(),
        "tiller-engine finished"
    );
    Ok(())
}

/// Load the helm configuration, or `None` when no file is present.
fn load_config() -> Result<Option<HelmConfig>, EngineError> {
    let config_path = Path::new("tiller-config.yaml");
    if config_path.exists() {
        let config = HelmConfig::from_file(config_path)?;
        Ok(Some(config))
    } else {
        Ok(None)
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn tick_count() -> Result<u64, EngineError> {
    std::env::args().nth(1).map_or(Ok(DEFAULT_TICKS), |arg| {
        arg.parse().ok().ok_or_else(|| EngineError::Argument {
            message: format!("tick count must be a whole number, got {arg:?}"),
        })
    })
}

/// Simulated navigation feed.
///
/// Reported heading and speed follow the last decision with some jitter,
/// the target heading swings every ten ticks, and every seventh tick
/// requests a new waypoint behavior.
#[derive(Debug, Default)]
struct Sensors {
    info: InfoBuffer,
    target: f64,
    waypoints: u32,
}

impl Sensors {
    fn sample(&mut self, iteration: u64, last: Option<&Report>) -> InfoBuffer {
        let mut rng = rand::rng();
        self.info.clear_deltas();

        if iteration % 10 == 1 {
            self.target = rng.random_range(0.0..360.0);
        }
        self.info.set_number("TARGET_HEADING", self.target);
        self.info
            .set_text("DEPLOY", if iteration > 2 { "true" } else { "false" });

        let course = last.and_then(|r| r.decision("course")).unwrap_or(0.0);
        let speed = last.and_then(|r| r.decision("speed")).unwrap_or(0.0);
        self.info
            .set_number("NAV_HEADING", course + rng.random_range(-3.0..3.0));
        self.info
            .set_number("NAV_SPEED", (speed + rng.random_range(-0.2..0.2)).max(0.0));

        if iteration % 7 == 0 {
            self.waypoints = self.waypoints.saturating_add(1);
            let request = format!(
                "name=waypoint_{}#peak={}",
                self.waypoints,
                compact(rng.random_range(0.0..360.0_f64).round())
            );
            self.info.set_text(WAYPOINT_VAR, &request);
        }
        self.info.clone()
    }
}
