//! Tick orchestration: the phased loop that turns behavior proposals into
//! one decision per variable.
//!
//! Each call to [`DecisionEngine::run_tick`] runs these phases:
//!
//! 1. **Preliminary** -- advance the iteration, read the clock, and spawn
//!    behaviors requested on template update variables.
//!
//! 2. **Gather level 0** -- step every level-0 behavior and collect the
//!    functions of the active ones.
//!
//! 3. **Verify** -- reject functions over unknown variables and pick the
//!    sub-domain the solve runs over.
//!
//! 4. **Two-stage solve** -- only with level-1 behaviors: solve level 0,
//!    publish the result as `DESIRED_<VAR>_UNFILTERED`, then gather and
//!    verify level 1.
//!
//! 5. **Final solve** -- solve everything gathered and check that every
//!    mandatory variable got a value.
//!
//! 6. **Finish** -- sweep completed behaviors and record timings.
//!
//! A halt in any phase ends the tick early. The report still lists every
//! stepped behavior but carries no decision.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tiller_ivp::text::compact;
use tiller_ivp::{Domain, DomainError, ObjectiveFunction, SolveError, Solver, SolverSettings, codec};
use tracing::{debug, info, warn};

use crate::behavior::{BehaviorState, StepContext};
use crate::clock::TimeSource;
use crate::common::Posting;
use crate::config::HelmConfig;
use crate::factory::BehaviorFactory;
use crate::info::InfoBuffer;
use crate::life_event::LifeEventKind;
use crate::registry::{BehaviorRegistry, RegistryError};
use crate::report::{BehaviorEntry, HaltReason, Report};

/// Variable every accepted function is posted on, encoded, when enabled.
pub const IPF_VAR: &str = "BHV_IPF";

/// Errors raised while building an engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configured domain is invalid.
    #[error("domain error: {source}")]
    Domain {
        /// The underlying domain error.
        #[from]
        source: DomainError,
    },

    /// A startup behavior could not be created.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: RegistryError,
    },
}

/// The helm: owns the behaviors and produces one [`Report`] per tick.
#[derive(Debug)]
pub struct DecisionEngine<T: TimeSource> {
    clock: T,
    registry: BehaviorRegistry,
    domain: Domain,
    optional: BTreeSet<String>,
    settings: SolverSettings,
    report_functions: bool,
    iteration: u64,
    max_create_time: f64,
    max_solve_time: f64,
    max_loop_time: f64,
}

impl<T: TimeSource> DecisionEngine<T> {
    /// Engine over the registry's domain with default solver settings.
    pub fn new(registry: BehaviorRegistry, clock: T) -> Self {
        Self {
            clock,
            domain: registry.domain().clone(),
            registry,
            optional: BTreeSet::new(),
            settings: SolverSettings::default(),
            report_functions: false,
            iteration: 0,
            max_create_time: 0.0,
            max_solve_time: 0.0,
            max_loop_time: 0.0,
        }
    }

    /// Build the domain and startup behaviors described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Domain`] for an invalid domain, or
    /// [`EngineError::Registry`] if a startup behavior cannot be created.
    pub fn from_config(
        config: &HelmConfig,
        factory: BehaviorFactory,
        clock: T,
    ) -> Result<Self, EngineError> {
        let domain = config.build_domain()?;
        let mut registry = BehaviorRegistry::new(factory, domain, &config.helm);
        registry.build_from_specs(&config.behaviors, clock.current_time())?;
        info!(
            domain = %registry.domain(),
            behaviors = registry.len(),
            "Decision engine ready"
        );
        Ok(Self::new(registry, clock)
            .with_settings(config.solver.settings())
            .with_optional_variables(config.optional_variables())
            .with_report_functions(config.helm.report_functions))
    }

    /// Replace the solver settings.
    #[must_use]
    pub const fn with_settings(mut self, settings: SolverSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Variables that may go undecided without halting the tick.
    #[must_use]
    pub fn with_optional_variables(mut self, optional: BTreeSet<String>) -> Self {
        self.optional = optional;
        self
    }

    /// Post every accepted function, encoded, on [`IPF_VAR`].
    #[must_use]
    pub const fn with_report_functions(mut self, enabled: bool) -> Self {
        self.report_functions = enabled;
        self
    }

    /// Decision domain.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Ticks run so far.
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// The behaviors.
    pub const fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }

    /// Mutable access to the behaviors, e.g. to add one between ticks.
    pub const fn registry_mut(&mut self) -> &mut BehaviorRegistry {
        &mut self.registry
    }

    /// The time source.
    pub const fn clock(&self) -> &T {
        &self.clock
    }

    /// Mutable access to the time source.
    pub const fn clock_mut(&mut self) -> &mut T {
        &mut self.clock
    }

    /// Run one tick against the `info` snapshot.
    pub fn run_tick(&mut self, info: &InfoBuffer) -> Report {
        let loop_started = Instant::now();

        // --- Phase 1: Preliminary ---
        self.iteration = self.iteration.saturating_add(1);
        let iteration = self.iteration;
        let now = self.clock.current_time();
        let mut report = Report::new(iteration, now, self.domain.clone());
        report.life_events = self.registry.handle_spawnings(info, now, iteration);
        report.warnings.extend(
            report
                .life_events
                .iter()
                .filter(|e| e.event == LifeEventKind::Abort)
                .map(|e| format!("Behavior spawn aborted: {}", e.behavior)),
        );
        debug!(iteration, now, "Tick started");

        // --- Phases 2-5: Gather, verify, solve ---
        let mut solve_time = Duration::ZERO;
        let create_started = Instant::now();
        let outcome = self.decide(info, now, &mut report, &mut solve_time);
        let create_time = create_started.elapsed().saturating_sub(solve_time);

        // --- Phase 6: Finish ---
        match outcome {
            Ok(decisions) => report.decisions = decisions,
            Err(halt) => {
                warn!(iteration, halt = %halt, "Tick halted");
                report.unfiltered.clear();
                report.halt = Some(halt);
            }
        }
        if self.registry.has_retired() {
            let deaths = self.registry.sweep(now, iteration);
            report.life_events.extend(deaths);
        }

        report.create_time = millis(create_time);
        report.solve_time = millis(solve_time);
        report.loop_time = millis(loop_started.elapsed());
        self.max_create_time = self.max_create_time.max(report.create_time);
        self.max_solve_time = self.max_solve_time.max(report.solve_time);
        self.max_loop_time = self.max_loop_time.max(report.loop_time);
        report.max_create_time = self.max_create_time;
        report.max_solve_time = self.max_solve_time;
        report.max_loop_time = self.max_loop_time;

        info!(
            iteration,
            ofnum = report.ofnum,
            active = report.active.len(),
            halted = report.is_halted(),
            solve_ms = report.solve_time,
            "Tick complete"
        );
        report
    }

    /// Phases 2 through 5. Returns the decisions in domain order.
    fn decide(
        &mut self,
        info: &InfoBuffer,
        now: f64,
        report: &mut Report,
        solve_time: &mut Duration,
    ) -> Result<Vec<(String, f64)>, HaltReason> {
        let ctx = StepContext {
            iteration: self.iteration,
            now,
            domain: &self.domain,
            info,
        };

        // --- Phase 2: Gather level 0 ---
        let mut functions = gather(&mut self.registry, 0, &ctx, self.report_functions, report)?;

        // --- Phase 3: Verify ---
        let mut solve_domain = verify(&self.domain, &functions)?;

        // --- Phase 4: Two-stage solve ---
        if self.registry.has_level(1) {
            let mut staged = info.clone();
            if !functions.is_empty() {
                let started = Instant::now();
                let unfiltered = solve(&solve_domain, &functions, self.settings);
                *solve_time = solve_time.saturating_add(started.elapsed());
                let unfiltered = unfiltered?;
                for (var, value) in &unfiltered {
                    let key = format!("DESIRED_{}_UNFILTERED", var.to_uppercase());
                    staged.set_number(&key, *value);
                    report.postings.push(Posting::new(key, compact(*value)));
                }
                report.unfiltered = unfiltered;
            }
            let ctx = StepContext {
                info: &staged,
                ..ctx
            };
            functions.extend(gather(&mut self.registry, 1, &ctx, self.report_functions, report)?);
            solve_domain = verify(&self.domain, &functions)?;
        }

        // --- Phase 5: Final solve ---
        if functions.is_empty() {
            return Err(HaltReason::NoFunctions);
        }
        report.ofnum = functions.len();
        let started = Instant::now();
        let decided = solve(&solve_domain, &functions, self.settings);
        *solve_time = solve_time.saturating_add(started.elapsed());
        let decided = decided?;
        report.solve_domain = solve_domain;

        let mut decisions = Vec::with_capacity(decided.len());
        let mut missing = Vec::new();
        for name in self.domain.names() {
            match decided.iter().find(|(var, _)| var == name) {
                Some(&(_, value)) => decisions.push((name.to_owned(), value)),
                None if self.optional.contains(name) => {}
                None => missing.push(name.to_owned()),
            }
        }
        if !missing.is_empty() {
            return Err(HaltReason::MissingDecision { variables: missing });
        }
        Ok(decisions)
    }
}

/// Step one level, file each behavior into its report bucket, and collect
/// the accepted functions.
///
/// Every behavior at the level is stepped before a broken one halts the
/// tick.
fn gather(
    registry: &mut BehaviorRegistry,
    level: u8,
    ctx: &StepContext<'_>,
    report_functions: bool,
    report: &mut Report,
) -> Result<Vec<ObjectiveFunction>, HaltReason> {
    let mut functions = Vec::new();
    let mut broken = None;

    for record in registry.step(level, ctx) {
        let entry = BehaviorEntry {
            name: record.name.clone(),
            since: record.entered_at,
            weight: record.function.as_ref().map_or(0.0, ObjectiveFunction::weight),
            pieces: record
                .function
                .as_ref()
                .map_or(0, ObjectiveFunction::piece_count),
            cpu_time: record.cpu_time,
            updates: record.update_summary,
            ipfs: u32::from(record.function.is_some()),
        };
        match record.state {
            BehaviorState::Idle => report.idle.push(entry),
            BehaviorState::Running => report.running.push(entry),
            BehaviorState::Active => report.active.push(entry),
            BehaviorState::Completed => report.completed.push(entry),
        }
        report.postings.extend(record.postings);
        report.warnings.extend(record.warnings);
        report.messages.extend(record.message);

        if let Some(error) = record.error {
            warn!(behavior = %record.name, error = %error, "Behavior state not ok");
            broken = broken.or(Some(record.name));
        }
        if let Some(function) = record.function {
            if report_functions {
                report.postings.push(Posting::new(IPF_VAR, codec::encode(&function)));
            }
            functions.push(function);
        }
    }

    broken.map_or(Ok(functions), |behavior| {
        Err(HaltReason::BehaviorError { behavior })
    })
}

/// Check every referenced variable against the domain and return the
/// sub-domain to solve over: referenced variables in first-seen order, or
/// the whole domain if all are referenced.
fn verify(domain: &Domain, functions: &[ObjectiveFunction]) -> Result<Domain, HaltReason> {
    let mut names: Vec<&str> = Vec::new();
    for name in functions.iter().flat_map(|f| f.variable_names()) {
        if !domain.has_var(name) {
            return Err(HaltReason::UnknownVariable {
                name: name.to_owned(),
            });
        }
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.len() == domain.size() {
        return Ok(domain.clone());
    }
    domain.select(names).map_err(|err| match err {
        DomainError::UnknownVariable { name } => HaltReason::UnknownVariable { name },
        other => HaltReason::SolverFailure {
            message: other.to_string(),
        },
    })
}

fn solve(
    domain: &Domain,
    functions: &[ObjectiveFunction],
    settings: SolverSettings,
) -> Result<Vec<(String, f64)>, HaltReason> {
    let mut solver = Solver::new(domain.clone(), settings);
    for function in functions {
        solver
            .add_function(function.clone())
            .map_err(|err| solver_failure(&err))?;
    }
    let solution = solver.solve().map_err(|err| solver_failure(&err))?;
    let stats = solution.stats();
    debug!(
        functions = stats.functions,
        nodes = stats.nodes,
        leaves = stats.leaves,
        pruned = stats.pruned,
        value = solution.value(),
        "Solve finished"
    );
    Ok(solution.values())
}

fn solver_failure(err: &SolveError) -> HaltReason {
    HaltReason::SolverFailure {
        message: err.to_string(),
    }
}

const fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tiller_ivp::{Degree, Interval, Piece, PiecewiseMap};

    use super::*;
    use crate::behavior::Behavior;
    use crate::clock::ManualClock;
    use crate::common::BehaviorCommon;
    use crate::config::{BehaviorSpec, ConfigError, EngineConfig};

    /// Constant preference over a named set of variables.
    struct Level {
        common: BehaviorCommon,
        vars: Domain,
    }

    impl Behavior for Level {
        fn common(&self) -> &BehaviorCommon {
            &self.common
        }

        fn common_mut(&mut self) -> &mut BehaviorCommon {
            &mut self.common
        }

        fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
            if key != "over" {
                return Err(ConfigError::unknown(key));
            }
            self.vars = Domain::new()
                .with_variable(value, 0.0, 9.0, 10)
                .ok()
                .ok_or_else(|| ConfigError::invalid(key, value, "bad variable"))?;
            Ok(())
        }

        fn on_run_state(&mut self, _ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
            let bounds = self
                .vars
                .vars()
                .iter()
                .map(|v| Interval::closed(0, v.max_index()))
                .collect();
            let piece = Piece::new(bounds, Degree::Constant, vec![1.0]).ok()?;
            let map =
                PiecewiseMap::from_pieces(self.vars.clone(), Degree::Constant, vec![piece]).ok()?;
            Some(ObjectiveFunction::new(map, self.common.priority()))
        }
    }

    fn level() -> Box<dyn Behavior> {
        Box::new(Level {
            common: BehaviorCommon::new("level"),
            vars: Domain::new(),
        })
    }

    fn engine(optional: &[&str]) -> DecisionEngine<ManualClock> {
        let domain = Domain::new()
            .with_variable("x", 0.0, 9.0, 10)
            .unwrap()
            .with_variable("y", 0.0, 9.0, 10)
            .unwrap();
        let registry = BehaviorRegistry::new(
            BehaviorFactory::new().with("level", level),
            domain,
            &EngineConfig::default(),
        );
        DecisionEngine::new(registry, ManualClock::new(0.0))
            .with_optional_variables(optional.iter().map(|s| (*s).to_owned()).collect())
    }

    fn spec(name: &str, over: &str) -> BehaviorSpec {
        BehaviorSpec::new("level")
            .with_param("name", name)
            .with_param("over", over)
    }

    #[test]
    fn empty_helm_has_nothing_to_do() {
        let mut engine = engine(&[]);
        let report = engine.run_tick(&InfoBuffer::new());
        assert_eq!(report.halt, Some(HaltReason::NoFunctions));
        assert_eq!(report.iteration, 1);
    }

    #[test]
    fn sub_domain_follows_first_seen_order() {
        let y = Domain::new().with_variable("y", 0.0, 9.0, 10).unwrap();
        let functions = [ObjectiveFunction::new(PiecewiseMap::new(y, Degree::Constant), 1.0)];
        let domain = engine(&[]).domain().clone();
        let sub = verify(&domain, &functions).unwrap();
        assert_eq!(sub.names().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn optional_variables_may_go_undecided() {
        let mut strict = engine(&[]);
        strict
            .registry_mut()
            .build_from_specs(&[spec("only_x", "x")], 0.0)
            .unwrap();
        let report = strict.run_tick(&InfoBuffer::new());
        assert_eq!(
            report.halt,
            Some(HaltReason::MissingDecision {
                variables: vec!["y".to_owned()]
            })
        );
        assert!(report.decisions.is_empty());

        let mut relaxed = engine(&["y"]);
        relaxed
            .registry_mut()
            .build_from_specs(&[spec("only_x", "x")], 0.0)
            .unwrap();
        let report = relaxed.run_tick(&InfoBuffer::new());
        assert!(!report.is_halted());
        assert!(report.decision("x").is_some());
        assert!(report.decision("y").is_none());
        assert_eq!(report.solve_domain.names().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn report_functions_posts_encodings() {
        let mut engine = engine(&["y"]).with_report_functions(true);
        engine
            .registry_mut()
            .build_from_specs(&[spec("only_x", "x")], 0.0)
            .unwrap();
        let report = engine.run_tick(&InfoBuffer::new());
        let ipf = report.postings.iter().find(|p| p.var == IPF_VAR).unwrap();
        assert_eq!(codec::decode_context(&ipf.value).unwrap(), "1:only_x");
    }
}
