//! Behavior life cycle, registry, and per-tick decision engine for Tiller.
//!
//! Behaviors propose [`tiller_ivp::ObjectiveFunction`]s; the engine steps
//! them, solves the combined problem, and reports one decision per
//! variable each tick.
//!
//! # Modules
//!
//! - [`behavior`] -- [`Behavior`] trait, life-cycle states, and update
//!   handling.
//! - [`clock`] -- [`TimeSource`] trait with wall and manual clocks.
//! - [`common`] -- Parameters and bookkeeping shared by every behavior.
//! - [`condition`] -- `VAR<op>value` run conditions.
//! - [`config`] -- Configuration loading from `tiller-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- The phased tick loop ([`DecisionEngine`]).
//! - [`factory`] -- Kind-name to constructor table.
//! - [`info`] -- Snapshot of the variables behaviors react to.
//! - [`life_event`] -- Spawn, death, and abort history.
//! - [`registry`] -- Ownership, stepping, and spawning of behaviors.
//! - [`report`] -- Per-tick [`Report`] and halt reasons.
//!
//! [`Behavior`]: behavior::Behavior
//! [`TimeSource`]: clock::TimeSource
//! [`DecisionEngine`]: engine::DecisionEngine
//! [`Report`]: report::Report

pub mod behavior;
pub mod clock;
pub mod common;
pub mod condition;
pub mod config;
pub mod engine;
pub mod factory;
pub mod info;
pub mod life_event;
pub mod registry;
pub mod report;

pub use behavior::{Behavior, BehaviorState, Runnable, StepContext};
pub use clock::{ManualClock, SystemClock, TimeSource};
pub use common::{BehaviorCommon, Posting};
pub use config::{BehaviorSpec, ConfigError, HelmConfig};
pub use engine::{DecisionEngine, EngineError};
pub use factory::BehaviorFactory;
pub use info::InfoBuffer;
pub use life_event::{LifeEvent, LifeEventKind};
pub use registry::{BehaviorRegistry, RegistryError};
pub use report::{HaltReason, Report};
