//! Per-tick summary of what the helm decided and why.
//!
//! A [`Report`] is the only product of [`crate::engine::DecisionEngine::run_tick`].
//! It serializes to JSON through serde. It also renders to a compact
//! `key=value` line, either in full or as a diff against the previous
//! report.

use std::fmt;

use serde::Serialize;
use tiller_ivp::Domain;
use tiller_ivp::text::compact;

use crate::common::Posting;
use crate::life_event::LifeEvent;

/// Why a tick published no decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum HaltReason {
    /// A behavior declared its state not ok.
    #[error("behavior {behavior} reported an error")]
    BehaviorError {
        /// The failing behavior.
        behavior: String,
    },

    /// A function references a variable outside the decision domain.
    #[error("unknown decision variable: {name}")]
    UnknownVariable {
        /// The unknown variable.
        name: String,
    },

    /// No behavior produced a function.
    #[error("nothing to do: no objective functions")]
    NoFunctions,

    /// Mandatory variables were left without a decision.
    #[error("missing decision for: {}", .variables.join(","))]
    MissingDecision {
        /// The undecided variables, in domain order.
        variables: Vec<String>,
    },

    /// The solver failed outright.
    #[error("solver failure: {message}")]
    SolverFailure {
        /// The solver's error message.
        message: String,
    },
}

/// One behavior in one lifecycle bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorEntry {
    /// Behavior name.
    pub name: String,
    /// Time the behavior entered its current state.
    pub since: f64,
    /// Weight of the function produced this tick, 0 if none.
    pub weight: f64,
    /// Pieces in the function produced this tick, 0 if none.
    pub pieces: usize,
    /// Seconds spent stepping the behavior.
    pub cpu_time: f64,
    /// Good/total update counts.
    pub updates: String,
    /// Functions produced this tick.
    pub ipfs: u32,
}

impl BehaviorEntry {
    fn brief(&self) -> String {
        format!("{}${:.2}${}", self.name, self.since, self.updates)
    }

    fn full(&self) -> String {
        format!(
            "{}${:.2}${:.5}${}${:.5}${}${}",
            self.name, self.since, self.weight, self.pieces, self.cpu_time, self.updates, self.ipfs
        )
    }
}

/// Everything one tick produced.
///
/// Timings are in milliseconds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    /// Tick number, starting at 1.
    pub iteration: u64,
    /// Tick time in seconds.
    pub time: f64,
    /// Number of functions in the final solve.
    pub ofnum: usize,
    /// Time spent stepping behaviors.
    pub create_time: f64,
    /// Time spent solving.
    pub solve_time: f64,
    /// Wall time of the whole tick.
    pub loop_time: f64,
    /// Largest create time so far.
    pub max_create_time: f64,
    /// Largest solve time so far.
    pub max_solve_time: f64,
    /// Largest loop time so far.
    pub max_loop_time: f64,
    /// Final decision per decided variable, in domain order.
    pub decisions: Vec<(String, f64)>,
    /// Decisions of the level-0 solve when a second pass ran.
    pub unfiltered: Vec<(String, f64)>,
    /// Set when the tick halted. A halted report carries no decisions.
    pub halt: Option<HaltReason>,
    /// Recoverable warnings raised this tick.
    pub warnings: Vec<String>,
    /// Postings emitted this tick.
    pub postings: Vec<Posting>,
    /// Why produced functions were dropped.
    pub messages: Vec<String>,
    /// Spawns, aborts, and deaths recorded this tick.
    pub life_events: Vec<LifeEvent>,
    /// Behaviors running without a function.
    pub running: Vec<BehaviorEntry>,
    /// Behaviors that produced a function.
    pub active: Vec<BehaviorEntry>,
    /// Idle behaviors.
    pub idle: Vec<BehaviorEntry>,
    /// Behaviors that completed this tick.
    pub completed: Vec<BehaviorEntry>,
    /// The helm's decision domain.
    pub domain: Domain,
    /// The sub-domain the final solve ran over.
    pub solve_domain: Domain,
}

impl Report {
    /// Empty report for one tick.
    pub fn new(iteration: u64, time: f64, domain: Domain) -> Self {
        Self {
            iteration,
            time,
            domain,
            ..Self::default()
        }
    }

    /// Whether the tick halted.
    pub const fn is_halted(&self) -> bool {
        self.halt.is_some()
    }

    /// Decision for `var`, if one was made.
    pub fn decision(&self, var: &str) -> Option<f64> {
        self.decisions
            .iter()
            .find(|(name, _)| name == var)
            .map(|&(_, value)| value)
    }

    /// Level-0 decision for `var`, if a second pass ran.
    pub fn unfiltered_decision(&self, var: &str) -> Option<f64> {
        self.unfiltered
            .iter()
            .find(|(name, _)| name == var)
            .map(|&(_, value)| value)
    }

    /// Halt message, or `none`.
    pub fn halt_message(&self) -> String {
        self.halt
            .as_ref()
            .map_or_else(|| "none".to_owned(), ToString::to_string)
    }

    /// Whether any lifecycle bucket differs from `previous` by membership.
    pub fn changed_behaviors(&self, previous: &Self) -> bool {
        fn names(bucket: &[BehaviorEntry]) -> Vec<&str> {
            bucket.iter().map(|e| e.name.as_str()).collect()
        }
        names(&self.running) != names(&previous.running)
            || names(&self.active) != names(&previous.active)
            || names(&self.idle) != names(&previous.idle)
            || names(&self.completed) != names(&previous.completed)
    }

    /// Render as a `key=value` line.
    ///
    /// With `previous`, only `iter`, `utc_time`, and fields whose text
    /// changed are included.
    pub fn render(&self, previous: Option<&Self>) -> String {
        let mut out = format!("iter={},utc_time={:.2}", self.iteration, self.time);
        let before = previous.map(Self::fields);
        for (ix, (key, value)) in self.fields().into_iter().enumerate() {
            let unchanged = before
                .as_ref()
                .and_then(|fields| fields.get(ix))
                .is_some_and(|(_, old)| *old == value);
            if unchanged {
                continue;
            }
            out.push(',');
            if !key.is_empty() {
                out.push_str(key);
                out.push('=');
            }
            out.push_str(&value);
        }
        out
    }

    /// `var=<name>:<value>` per domain variable, `varbalk` when undecided.
    pub fn decision_summary(&self) -> String {
        self.domain
            .names()
            .map(|name| {
                let value = self.decision(name).map_or_else(|| "varbalk".to_owned(), compact);
                format!("var={name}:{value}")
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Ordered fields after `iter` and `utc_time`. An empty key marks a
    /// field that carries its own keys.
    fn fields(&self) -> Vec<(&'static str, String)> {
        fn bucket(entries: &[BehaviorEntry], render: fn(&BehaviorEntry) -> String) -> String {
            if entries.is_empty() {
                return "none".to_owned();
            }
            entries.iter().map(render).collect::<Vec<_>>().join(":")
        }

        vec![
            ("ofnum", self.ofnum.to_string()),
            ("warnings", self.warnings.len().to_string()),
            ("solve_time", format!("{:.2}", self.solve_time)),
            ("create_time", format!("{:.2}", self.create_time)),
            ("max_create_time", format!("{:.2}", self.max_create_time)),
            ("max_solve_time", format!("{:.2}", self.max_solve_time)),
            ("max_loop_time", format!("{:.2}", self.max_loop_time)),
            ("loop_time", format!("{:.2}", self.loop_time)),
            ("", self.decision_summary()),
            ("halted", self.is_halted().to_string()),
            ("running_bhvs", bucket(&self.running, BehaviorEntry::brief)),
            ("active_bhvs", bucket(&self.active, BehaviorEntry::full)),
            ("idle_bhvs", bucket(&self.idle, BehaviorEntry::brief)),
            ("completed_bhvs", bucket(&self.completed, BehaviorEntry::brief)),
            ("ivpdomain", format!("\"{}\"", self.domain)),
            ("halt_msg", self.halt_message()),
        ]
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(None))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn entry(name: &str) -> BehaviorEntry {
        BehaviorEntry {
            name: name.to_owned(),
            since: 1.5,
            weight: 100.0,
            pieces: 3,
            cpu_time: 0.0,
            updates: "n/a".to_owned(),
            ipfs: 1,
        }
    }

    fn report() -> Report {
        let domain = Domain::new()
            .with_variable("course", 0.0, 359.0, 360)
            .unwrap()
            .with_variable("speed", 0.0, 5.0, 26)
            .unwrap();
        let mut report = Report::new(4, 12.0, domain);
        report.ofnum = 1;
        report.decisions = vec![("speed".to_owned(), 2.4)];
        report.active = vec![entry("transit")];
        report
    }

    #[test]
    fn full_render_lists_every_field() {
        let line = report().to_string();
        assert!(line.starts_with("iter=4,utc_time=12.00,ofnum=1,warnings=0,"));
        assert!(line.contains(",var=course:varbalk,var=speed:2.4,halted=false,"));
        assert!(line.contains(",running_bhvs=none,"));
        assert!(line.contains(",active_bhvs=transit$1.50$100.00000$3$0.00000$n/a$1,"));
        assert!(line.contains(",ivpdomain=\"course,0,359,360:speed,0,5,26\","));
        assert!(line.ends_with(",halt_msg=none"));
    }

    #[test]
    fn diff_render_keeps_only_changes() {
        let first = report();
        let mut second = report();
        second.iteration = 5;
        second.halt = Some(HaltReason::UnknownVariable {
            name: "torque".to_owned(),
        });
        second.decisions.clear();

        let line = second.render(Some(&first));
        assert_eq!(
            line,
            "iter=5,utc_time=12.00,var=course:varbalk,var=speed:varbalk,halted=true,\
             halt_msg=unknown decision variable: torque"
        );
        assert!(!second.changed_behaviors(&first));

        second.active.clear();
        second.idle = vec![entry("transit")];
        assert!(second.changed_behaviors(&first));
    }

    #[test]
    fn halt_messages_name_the_cause() {
        let missing = HaltReason::MissingDecision {
            variables: vec!["course".to_owned(), "depth".to_owned()],
        };
        assert_eq!(missing.to_string(), "missing decision for: course,depth");
        let json = serde_json::to_string(&missing).unwrap();
        assert!(json.contains("\"reason\":\"missing_decision\""));
    }

    #[test]
    fn solver_failure_serializes_with_its_message() {
        let mut halted = report();
        halted.halt = Some(HaltReason::SolverFailure {
            message: "no feasible box".to_owned(),
        });
        let json = serde_json::to_value(&halted).unwrap();
        assert_eq!(json["halt"]["reason"], "solver_failure");
        assert_eq!(json["halt"]["message"], "no feasible box");
        assert_eq!(halted.halt_message(), "solver failure: no feasible box");
    }
}
