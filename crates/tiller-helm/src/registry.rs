//! Ownership and life cycle of every behavior in the helm.
//!
//! The registry owns behaviors as `Box<dyn Behavior>` in insertion order
//! and steps them through the state machine one filter level at a time.
//! It also turns fresh strings on template update variables into new
//! behavior instances, and records every spawn, abort, and death in a
//! bounded [`LifeEventLog`].
//!
//! Completed behaviors stay in place, never stepped again, until the next
//! [`BehaviorRegistry::sweep`].
//!
//! # Name uniqueness
//!
//! No behavior name may be a prefix of another. Flag values and update
//! routing match on names, so `loiter` and `loiter_2` cannot coexist.

use std::time::Instant;

use tiller_ivp::{Domain, ObjectiveFunction};
use tracing::{debug, info, warn};

use crate::behavior::{Behavior, BehaviorState, Runnable, StepContext, apply_updates};
use crate::common::{FlagKind, Posting};
use crate::config::{BehaviorSpec, ConfigError, EngineConfig};
use crate::factory::BehaviorFactory;
use crate::info::InfoBuffer;
use crate::life_event::{LifeEvent, LifeEventKind, LifeEventLog, STARTUP_SPAWN};

/// Errors raised while adding behaviors.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The name collides with, or is a prefix of, an existing name.
    #[error("behavior name {name} is not unique")]
    DuplicateName {
        /// The rejected name.
        name: String,
    },

    /// No constructor is registered for the kind.
    #[error("unknown behavior kind {kind}")]
    UnknownKind {
        /// The requested kind.
        kind: String,
    },

    /// A parameter was rejected.
    #[error("behavior {behavior}: {source}")]
    Config {
        /// Name (or kind, if unnamed) of the behavior being configured.
        behavior: String,
        /// The underlying config error.
        source: ConfigError,
    },
}

/// What one behavior did during one step.
#[derive(Debug)]
pub struct StepRecord {
    /// Behavior name.
    pub name: String,
    /// Behavior kind.
    pub kind: String,
    /// State before the step, `None` on the first step.
    pub previous: Option<BehaviorState>,
    /// State after the step.
    pub state: BehaviorState,
    /// Time the current state was entered.
    pub entered_at: f64,
    /// The accepted function, present exactly when `state` is active.
    pub function: Option<ObjectiveFunction>,
    /// Flags, warnings, and other postings queued during the step.
    pub postings: Vec<Posting>,
    /// Recoverable warnings queued during the step.
    pub warnings: Vec<String>,
    /// Set when the behavior declared itself broken.
    pub error: Option<String>,
    /// Good/total update counts.
    pub update_summary: String,
    /// Why a produced function was dropped, if it was.
    pub message: Option<String>,
    /// Seconds spent in the step.
    pub cpu_time: f64,
}

struct Slot {
    behavior: Box<dyn Behavior>,
    state: Option<BehaviorState>,
    entered_at: f64,
    retired: bool,
}

impl Slot {
    fn name(&self) -> &str {
        self.behavior.common().name()
    }

    fn step(&mut self, ctx: &StepContext<'_>) -> StepRecord {
        let started = Instant::now();
        let behavior = self.behavior.as_mut();
        apply_updates(behavior, ctx.info);

        let previous = self.state;
        let (state, function, message) = transition(behavior, previous, ctx);
        if state == BehaviorState::Completed {
            self.retired = true;
        }
        if previous != Some(state) {
            self.entered_at = ctx.now;
            debug!(
                behavior = behavior.common().name(),
                from = previous.map_or("start", BehaviorState::as_str),
                to = state.as_str(),
                "Behavior state change"
            );
        }
        self.state = Some(state);

        let error = (!behavior.state_ok()).then(|| {
            behavior
                .common()
                .state_error()
                .unwrap_or("behavior state not ok")
                .to_owned()
        });
        let common = behavior.common_mut();
        StepRecord {
            name: common.name().to_owned(),
            kind: common.kind().to_owned(),
            previous,
            state,
            entered_at: self.entered_at,
            function,
            postings: common.take_postings(),
            warnings: common.take_warnings(),
            error,
            update_summary: common.update_summary(),
            message,
            cpu_time: started.elapsed().as_secs_f64(),
        }
    }
}

/// Run the hooks for one step and post the flags of the transition.
///
/// Returns the new state, the accepted function, and why a produced
/// function was dropped.
fn transition(
    behavior: &mut dyn Behavior,
    previous: Option<BehaviorState>,
    ctx: &StepContext<'_>,
) -> (BehaviorState, Option<ObjectiveFunction>, Option<String>) {
    match behavior.is_runnable(ctx) {
        Runnable::Completed => {
            behavior.on_complete_state(ctx);
            behavior.common_mut().post_flags(FlagKind::End);
            (BehaviorState::Completed, None, None)
        }
        Runnable::Idle => {
            if matches!(previous, Some(BehaviorState::Running | BehaviorState::Active)) {
                behavior.on_run_to_idle(ctx);
            }
            behavior.on_idle_state(ctx);
            if previous != Some(BehaviorState::Idle) {
                behavior.common_mut().post_flags(FlagKind::Idle);
                behavior.common_mut().post_flags(FlagKind::Inactive);
            }
            (BehaviorState::Idle, None, None)
        }
        Runnable::Running => {
            if previous == Some(BehaviorState::Idle) {
                behavior.on_idle_to_run(ctx);
            }
            if matches!(previous, None | Some(BehaviorState::Idle)) {
                behavior.common_mut().post_flags(FlagKind::Run);
            }
            let produced = behavior.on_run_state(ctx);
            match vet(produced, behavior, ctx.iteration) {
                (Some(function), _) => {
                    if previous != Some(BehaviorState::Active) {
                        behavior.common_mut().post_flags(FlagKind::Active);
                    }
                    (BehaviorState::Active, Some(function), None)
                }
                (None, note) => {
                    if previous == Some(BehaviorState::Active) {
                        behavior.common_mut().post_flags(FlagKind::Inactive);
                    }
                    (BehaviorState::Running, None, note)
                }
            }
        }
    }
}

/// Drop non-finite or void functions and stamp the context of the rest.
fn vet(
    produced: Option<ObjectiveFunction>,
    behavior: &mut dyn Behavior,
    iteration: u64,
) -> (Option<ObjectiveFunction>, Option<String>) {
    let Some(mut function) = produced else {
        return (None, None);
    };
    let common = behavior.common_mut();
    if !function.is_finite() {
        let note = format!("{}: non-finite function discarded", common.name());
        common.warn(note.clone());
        return (None, Some(note));
    }
    if function.is_void() {
        let note = format!(
            "{}: function with weight {} discarded",
            common.name(),
            function.weight()
        );
        common.warn(note.clone());
        return (None, Some(note));
    }
    function.set_context(format!("{iteration}:{}", common.name()));
    (Some(function), None)
}

struct Template {
    spec: BehaviorSpec,
    update_var: String,
    max_spawns: Option<usize>,
    spawned: usize,
}

/// Owner of every behavior, its state, and its life history.
pub struct BehaviorRegistry {
    factory: BehaviorFactory,
    domain: Domain,
    slots: Vec<Slot>,
    templates: Vec<Template>,
    life_events: LifeEventLog,
    max_spawns_per_tick: usize,
}

impl std::fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("behaviors", &self.names().collect::<Vec<_>>())
            .field("templates", &self.templates.len())
            .field("life_events", &self.life_events.len())
            .finish_non_exhaustive()
    }
}

impl BehaviorRegistry {
    /// Empty registry deciding over `domain`.
    pub fn new(factory: BehaviorFactory, domain: Domain, config: &EngineConfig) -> Self {
        Self {
            factory,
            domain,
            slots: Vec::new(),
            templates: Vec::new(),
            life_events: LifeEventLog::new(config.life_event_capacity),
            max_spawns_per_tick: config.max_spawns_per_tick,
        }
    }

    /// Decision domain behaviors are bound to.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Create startup behaviors and register templates.
    ///
    /// Returns the number of behaviors created.
    ///
    /// # Errors
    ///
    /// Returns the first [`RegistryError`]. Startup problems are fatal,
    /// unlike failed spawns later on.
    pub fn build_from_specs(&mut self, specs: &[BehaviorSpec], now: f64) -> Result<usize, RegistryError> {
        let mut created = 0_usize;
        for spec in specs {
            if spec.template {
                self.add_template(spec.clone())?;
                continue;
            }
            let behavior = self.instantiate(spec, &[])?;
            self.insert(behavior, now, 0, STARTUP_SPAWN)?;
            created = created.saturating_add(1);
        }
        info!(
            behaviors = created,
            templates = self.templates.len(),
            "Behaviors loaded"
        );
        Ok(created)
    }

    /// Register a spawn template.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownKind`] for an unregistered kind, or
    /// [`RegistryError::Config`] if the template has no `updates` variable.
    pub fn add_template(&mut self, spec: BehaviorSpec) -> Result<(), RegistryError> {
        if !self.factory.knows(&spec.kind) {
            return Err(RegistryError::UnknownKind { kind: spec.kind });
        }
        let update_var = spec.updates_var().ok_or_else(|| RegistryError::Config {
            behavior: spec.kind.clone(),
            source: ConfigError::invalid("updates", "", "templates need an updates variable"),
        })?;
        self.templates.push(Template {
            max_spawns: spec.max_spawns(),
            spec,
            update_var,
            spawned: 0,
        });
        Ok(())
    }

    /// Add an already configured behavior, recorded as a startup spawn.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is not unique.
    pub fn add(&mut self, behavior: Box<dyn Behavior>, now: f64) -> Result<(), RegistryError> {
        self.insert(behavior, now, 0, STARTUP_SPAWN).map(drop)
    }

    /// Whether `name` neither prefixes nor is prefixed by an existing name.
    pub fn is_unique_name(&self, name: &str) -> bool {
        !self
            .slots
            .iter()
            .any(|slot| slot.name().starts_with(name) || name.starts_with(slot.name()))
    }

    /// Spawn instances requested on template update variables.
    ///
    /// Each fresh string carrying `name=<new name>` spawns one instance with
    /// the template's parameters overlaid by the string's. Strings naming
    /// an existing behavior are updates for it and are left alone. Returns
    /// the spawn and abort events recorded.
    pub fn handle_spawnings(
        &mut self,
        info: &InfoBuffer,
        now: f64,
        iteration: u64,
    ) -> Vec<LifeEvent> {
        let mut events = Vec::new();
        let mut spawned_this_tick = 0_usize;

        for ix in 0..self.templates.len() {
            let Some(template) = self.templates.get(ix) else {
                continue;
            };
            let kind = template.spec.kind.clone();
            let requests: Vec<String> = info.deltas(&template.update_var).to_vec();

            for request in requests {
                let event = self.spawn_request(ix, &kind, &request, now, iteration, spawned_this_tick);
                if let Some(event) = event {
                    if event.event == LifeEventKind::Spawn {
                        spawned_this_tick = spawned_this_tick.saturating_add(1);
                    }
                    events.push(event);
                }
            }
        }
        events
    }

    /// Handle one string on a template's update variable. Returns `None`
    /// when the string is not a spawn request.
    fn spawn_request(
        &mut self,
        template_ix: usize,
        kind: &str,
        request: &str,
        now: f64,
        iteration: u64,
        spawned_this_tick: usize,
    ) -> Option<LifeEvent> {
        let pairs = split_update(request);
        let name = pairs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("name"))
            .map(|(_, value)| value.clone())?;
        if self.slots.iter().any(|slot| slot.name() == name) {
            return None;
        }

        let spawned = self
            .try_spawn(template_ix, &pairs, &name, spawned_this_tick)
            .and_then(|mut behavior| {
                behavior.common_mut().mark_update_seen(request.trim());
                self.insert(behavior, now, iteration, request)
                    .map_err(|err| err.to_string())
            });
        match spawned {
            Ok(spawn) => {
                if let Some(template) = self.templates.get_mut(template_ix) {
                    template.spawned = template.spawned.saturating_add(1);
                }
                Some(spawn)
            }
            Err(reason) => {
                warn!(behavior = %name, kind, reason = %reason, "Spawn aborted");
                let abort = LifeEvent::new(now, iteration, &name, kind, LifeEventKind::Abort, request);
                self.life_events.push(abort.clone());
                Some(abort)
            }
        }
    }

    /// Step every live behavior at `level`, in insertion order.
    pub fn step(&mut self, level: u8, ctx: &StepContext<'_>) -> Vec<StepRecord> {
        self.slots
            .iter_mut()
            .filter(|slot| !slot.retired && slot.behavior.common().filter_level() == level)
            .map(|slot| slot.step(ctx))
            .collect()
    }

    /// Whether any live behavior runs at `level`.
    pub fn has_level(&self, level: u8) -> bool {
        self.slots
            .iter()
            .any(|slot| !slot.retired && slot.behavior.common().filter_level() == level)
    }

    /// Whether any behavior completed and awaits removal.
    pub fn has_retired(&self) -> bool {
        self.slots.iter().any(|slot| slot.retired)
    }

    /// Remove completed behaviors, recording a death for each.
    pub fn sweep(&mut self, now: f64, iteration: u64) -> Vec<LifeEvent> {
        let (dead, live): (Vec<Slot>, Vec<Slot>) = std::mem::take(&mut self.slots)
            .into_iter()
            .partition(|slot| slot.retired);
        self.slots = live;

        let mut events = Vec::with_capacity(dead.len());
        for slot in dead {
            let common = slot.behavior.common();
            info!(behavior = common.name(), iteration, "Behavior removed");
            let death = LifeEvent::new(now, iteration, common.name(), common.kind(), LifeEventKind::Death, "");
            self.life_events.push(death.clone());
            events.push(death);
        }
        events
    }

    /// Number of behaviors, including completed ones awaiting sweep.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry holds no behaviors.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Behavior names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(Slot::name)
    }

    /// Last stepped state of a behavior. `None` if unknown or never stepped.
    pub fn state_of(&self, name: &str) -> Option<BehaviorState> {
        self.slots
            .iter()
            .find(|slot| slot.name() == name)
            .and_then(|slot| slot.state)
    }

    /// A behavior by name.
    pub fn behavior(&self, name: &str) -> Option<&dyn Behavior> {
        self.slots
            .iter()
            .find(|slot| slot.name() == name)
            .map(|slot| slot.behavior.as_ref())
    }

    /// Life history, oldest first.
    pub const fn life_events(&self) -> &LifeEventLog {
        &self.life_events
    }

    /// Build a behavior of `spec.kind` with the spec's parameters followed
    /// by `overrides`.
    fn instantiate(
        &self,
        spec: &BehaviorSpec,
        overrides: &[(String, String)],
    ) -> Result<Box<dyn Behavior>, RegistryError> {
        let mut behavior = self
            .factory
            .create(&spec.kind)
            .ok_or_else(|| RegistryError::UnknownKind {
                kind: spec.kind.clone(),
            })?;
        for (key, value) in spec.param_pairs().iter().chain(overrides) {
            behavior
                .apply_param(key, value)
                .map_err(|source| RegistryError::Config {
                    behavior: spec.name().unwrap_or_else(|| spec.kind.clone()),
                    source,
                })?;
        }
        behavior.on_set_param_complete();
        Ok(behavior)
    }

    /// Checks shared by every spawn request; the error is the abort reason.
    fn try_spawn(
        &self,
        template_ix: usize,
        pairs: &[(String, String)],
        name: &str,
        spawned_this_tick: usize,
    ) -> Result<Box<dyn Behavior>, String> {
        let template = self
            .templates
            .get(template_ix)
            .ok_or_else(|| "template vanished".to_owned())?;
        if spawned_this_tick >= self.max_spawns_per_tick {
            return Err(format!("more than {} spawns this tick", self.max_spawns_per_tick));
        }
        if !self.is_unique_name(name) {
            return Err(format!("name {name} is not unique"));
        }
        if template.max_spawns.is_some_and(|max| template.spawned >= max) {
            return Err("template max_spawns reached".to_owned());
        }
        self.instantiate(&template.spec, pairs)
            .map_err(|err| err.to_string())
    }

    fn insert(
        &mut self,
        mut behavior: Box<dyn Behavior>,
        now: f64,
        iteration: u64,
        spawn_string: &str,
    ) -> Result<LifeEvent, RegistryError> {
        let name = behavior.common().name().to_owned();
        if !self.is_unique_name(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        behavior.common_mut().bind_domain(&self.domain);
        let kind = behavior.common().kind().to_owned();
        info!(behavior = %name, kind = %kind, iteration, "Behavior spawned");
        let spawn = LifeEvent::new(now, iteration, &name, &kind, LifeEventKind::Spawn, spawn_string);
        self.life_events.push(spawn.clone());
        self.slots.push(Slot {
            behavior,
            state: None,
            entered_at: now,
            retired: false,
        });
        Ok(spawn)
    }
}

/// `param=value` pairs of a `#`-separated update string.
fn split_update(update: &str) -> Vec<(String, String)> {
    update
        .split('#')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            (key.trim().to_owned(), value.trim().to_owned())
        })
        .collect()
}
