//! The behavior capability trait and its life-cycle states.
//!
//! A behavior is a stateful unit that, when running, proposes an
//! [`ObjectiveFunction`] over (part of) the decision domain. The registry
//! drives every behavior through the same state machine each tick:
//!
//! ```text
//!          +-------------------------------+
//!          v                               |
//!   idle <---> running <---> active        |
//!    |           |             |           |
//!    +-----------+------+------+           |
//!                       v                  |
//!                   completed  (terminal) -+-> removed at sweep
//! ```
//!
//! Hooks return values rather than errors. A behavior reports trouble
//! through [`BehaviorCommon::warn`] or [`BehaviorCommon::set_state_error`].

use serde::Serialize;
use tiller_ivp::{Domain, ObjectiveFunction};

use crate::common::BehaviorCommon;
use crate::config::ConfigError;
use crate::info::InfoBuffer;

/// Life-cycle state of a behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorState {
    /// Conditions not met; contributes nothing.
    Idle,
    /// Runnable but produced no function this tick.
    Running,
    /// Produced a valid function this tick.
    Active,
    /// Finished. Never stepped again.
    Completed,
}

impl BehaviorState {
    /// Lowercase state name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// Answer of [`Behavior::is_runnable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Runnable {
    /// Run this tick.
    Running,
    /// Sit this tick out.
    Idle,
    /// Finish for good.
    Completed,
}

/// Read-only inputs to one behavior step.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Tick number, starting at 1.
    pub iteration: u64,
    /// Tick time in seconds.
    pub now: f64,
    /// The helm's full decision domain.
    pub domain: &'a Domain,
    /// Snapshot of the variables behaviors react to.
    pub info: &'a InfoBuffer,
}

/// A decision-making unit driven by the registry.
///
/// Only [`Behavior::common`], [`Behavior::common_mut`], and
/// [`Behavior::on_run_state`] are required. Everything else has a default
/// that does nothing or defers to [`BehaviorCommon`].
pub trait Behavior {
    /// Shared parameters and bookkeeping.
    fn common(&self) -> &BehaviorCommon;

    /// Mutable access to shared parameters and bookkeeping.
    fn common_mut(&mut self) -> &mut BehaviorCommon;

    /// Apply a kind-specific parameter. The default recognizes none.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownParam`] for unrecognized keys and
    /// [`ConfigError::InvalidParam`] for bad values.
    fn set_param(&mut self, key: &str, _value: &str) -> Result<(), ConfigError> {
        Err(ConfigError::unknown(key))
    }

    /// Apply a parameter, trying the common set first.
    ///
    /// # Errors
    ///
    /// Returns the first handler's error other than "unknown", or
    /// [`ConfigError::UnknownParam`] if neither handler knows the key.
    fn apply_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match self.common_mut().apply_param(key, value) {
            Err(ConfigError::UnknownParam { .. }) => self.set_param(key, value),
            other => other,
        }
    }

    /// Called after a batch of parameters or updates has been applied.
    fn on_set_param_complete(&mut self) {}

    /// Whether to run, idle, or complete this tick.
    fn is_runnable(&mut self, ctx: &StepContext<'_>) -> Runnable {
        self.common_mut().runnable(ctx)
    }

    /// Called each tick the behavior is idle.
    fn on_idle_state(&mut self, _ctx: &StepContext<'_>) {}

    /// Called when a running or active behavior goes idle.
    fn on_run_to_idle(&mut self, _ctx: &StepContext<'_>) {}

    /// Called when an idle behavior starts running.
    fn on_idle_to_run(&mut self, _ctx: &StepContext<'_>) {}

    /// Called each tick the behavior runs. Returns its proposal, if any.
    fn on_run_state(&mut self, ctx: &StepContext<'_>) -> Option<ObjectiveFunction>;

    /// Called once when the behavior completes.
    fn on_complete_state(&mut self, _ctx: &StepContext<'_>) {}

    /// Whether the behavior is healthy. A broken behavior halts the tick.
    fn state_ok(&self) -> bool {
        self.common().state_ok()
    }
}

/// Apply the fresh update strings on the behavior's update variable.
///
/// Each accepted string is split into `param=value` pairs and applied
/// through [`Behavior::apply_param`]. A string counts as good if every
/// pair applied and as bad otherwise. Ends with
/// [`Behavior::on_set_param_complete`] if anything was applied.
pub fn apply_updates(behavior: &mut dyn Behavior, info: &InfoBuffer) {
    let Some(var) = behavior.common().update_var().map(str::to_owned) else {
        return;
    };
    let mut applied = false;
    for update in info.deltas(&var) {
        let Some(pairs) = behavior.common_mut().accept_update(update) else {
            continue;
        };
        let bad: Vec<String> = pairs
            .iter()
            .filter(|(key, value)| behavior.apply_param(key, value).is_err())
            .map(|(key, _)| key.clone())
            .collect();
        behavior.common_mut().record_update(&bad);
        applied = true;
    }
    if applied {
        behavior.on_set_param_complete();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    struct Probe {
        common: BehaviorCommon,
        gain: f64,
        completions: u32,
    }

    impl Behavior for Probe {
        fn common(&self) -> &BehaviorCommon {
            &self.common
        }

        fn common_mut(&mut self) -> &mut BehaviorCommon {
            &mut self.common
        }

        fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
            match key {
                "gain" => {
                    self.gain = value
                        .parse()
                        .ok()
                        .ok_or_else(|| ConfigError::invalid(key, value, "not a number"))?;
                    Ok(())
                }
                _ => Err(ConfigError::unknown(key)),
            }
        }

        fn on_set_param_complete(&mut self) {
            self.completions += 1;
        }

        fn on_run_state(&mut self, _ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
            None
        }
    }

    fn probe() -> Probe {
        let mut common = BehaviorCommon::new("probe");
        common.apply_param("updates", "PROBE_UPDATES").unwrap();
        Probe {
            common,
            gain: 1.0,
            completions: 0,
        }
    }

    #[test]
    fn apply_param_falls_back_to_kind_params() {
        let mut p = probe();
        p.apply_param("pwt", "5").unwrap();
        p.apply_param("gain", "2.5").unwrap();
        assert!((p.gain - 2.5).abs() < f64::EPSILON);
        assert!(matches!(
            p.apply_param("gain", "fast"),
            Err(ConfigError::InvalidParam { .. })
        ));
        assert!(matches!(
            p.apply_param("colour", "red"),
            Err(ConfigError::UnknownParam { .. })
        ));
    }

    #[test]
    fn updates_count_good_and_bad() {
        let mut p = probe();
        let mut info = InfoBuffer::new();
        info.set_text("PROBE_UPDATES", "gain=3");
        info.set_text("PROBE_UPDATES", "gain=3");
        info.set_text("PROBE_UPDATES", "gain=4#colour=red");
        info.set_text("PROBE_UPDATES", "name=other#gain=9");
        apply_updates(&mut p, &info);

        assert!((p.gain - 4.0).abs() < f64::EPSILON);
        assert_eq!(p.common().update_summary(), "1/2");
        assert_eq!(p.completions, 1);
        let postings = p.common_mut().take_postings();
        assert_eq!(postings.len(), 1);
        assert_eq!(
            postings.first().unwrap().value,
            "Faulty update for behavior: probe. Bad parameter(s): colour"
        );
    }
}
