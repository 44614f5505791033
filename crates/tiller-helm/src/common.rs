//! Parameters and bookkeeping shared by every behavior.
//!
//! [`BehaviorCommon`] owns everything the engine needs to know about a
//! behavior regardless of its kind: name, priority weight, run conditions,
//! duration, update channel, and the flags to post on state changes. A
//! behavior embeds one and exposes it through
//! [`Behavior::common`](crate::behavior::Behavior::common).
//!
//! Postings and warnings are queued here during a step and drained by the
//! registry afterwards.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use tiller_ivp::Domain;

use crate::behavior::{Runnable, StepContext};
use crate::condition::Condition;
use crate::config::ConfigError;

/// Variable warnings are posted to.
pub const WARNING_VAR: &str = "BHV_WARNING";

/// Variable errors are posted to.
pub const ERROR_VAR: &str = "BHV_ERROR";

/// Default priority weight.
const DEFAULT_PRIORITY: f64 = 100.0;

/// One `VAR=value` publication produced during a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Posting {
    /// Variable name.
    pub var: String,
    /// Value as text.
    pub value: String,
}

impl Posting {
    /// Create a posting.
    pub fn new(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            value: value.into(),
        }
    }
}

/// `VAR=value` flag posted on a state change.
///
/// `$[BHVNAME]` and `$[BHVTYPE]` in the value are replaced by the
/// behavior's name and kind when posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    var: String,
    value: String,
}

impl Flag {
    fn expand(&self, name: &str, kind: &str) -> Posting {
        let value = self
            .value
            .replace("$[BHVNAME]", name)
            .replace("$[BHVTYPE]", kind);
        Posting::new(self.var.clone(), value)
    }
}

impl FromStr for Flag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (var, value) = s.split_once('=').ok_or("expected VAR=value")?;
        let var = var.trim();
        if var.is_empty() {
            return Err("empty variable name".to_owned());
        }
        Ok(Self {
            var: var.to_owned(),
            value: value.trim().to_owned(),
        })
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.var, self.value)
    }
}

/// Which flag set to post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    /// Entering running.
    Run,
    /// Producing a function.
    Active,
    /// No longer producing a function.
    Inactive,
    /// Entering idle.
    Idle,
    /// Completed.
    End,
}

/// State shared by every behavior kind.
#[derive(Debug, Clone)]
pub struct BehaviorCommon {
    name: String,
    kind: String,
    priority: f64,
    filter_level: u8,
    conditions: Vec<Condition>,
    duration: Option<f64>,
    duration_start: Option<f64>,
    perpetual: bool,
    domain_names: Option<String>,
    domain: Domain,
    update_var: Option<String>,
    last_update: String,
    good_updates: u32,
    bad_updates: u32,
    run_flags: Vec<Flag>,
    active_flags: Vec<Flag>,
    inactive_flags: Vec<Flag>,
    idle_flags: Vec<Flag>,
    end_flags: Vec<Flag>,
    completed: bool,
    error: Option<String>,
    postings: Vec<Posting>,
    warnings: Vec<String>,
}

impl BehaviorCommon {
    /// Defaults for a behavior of `kind`. The name starts out equal to the
    /// kind.
    pub fn new(kind: &str) -> Self {
        Self {
            name: kind.to_owned(),
            kind: kind.to_owned(),
            priority: DEFAULT_PRIORITY,
            filter_level: 0,
            conditions: Vec::new(),
            duration: None,
            duration_start: None,
            perpetual: false,
            domain_names: None,
            domain: Domain::new(),
            update_var: None,
            last_update: String::new(),
            good_updates: 0,
            bad_updates: 0,
            run_flags: Vec::new(),
            active_flags: Vec::new(),
            inactive_flags: Vec::new(),
            idle_flags: Vec::new(),
            end_flags: Vec::new(),
            completed: false,
            error: None,
            postings: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Apply one common parameter.
    ///
    /// Keys are case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownParam`] for keys this type does not
    /// own, or [`ConfigError::InvalidParam`] for bad values.
    pub fn apply_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let key_lower = key.to_ascii_lowercase();
        let value = value.trim();
        match key_lower.as_str() {
            "name" => {
                if value.is_empty() {
                    return Err(ConfigError::invalid(key, value, "name must not be empty"));
                }
                value.clone_into(&mut self.name);
            }
            "pwt" | "priwt" | "priority" => {
                let priority = parse_number(key, value)?;
                if priority < 0.0 {
                    return Err(ConfigError::invalid(key, value, "must not be negative"));
                }
                self.priority = priority;
            }
            "filter_level" => {
                self.filter_level = match value {
                    "0" => 0,
                    "1" => 1,
                    _ => return Err(ConfigError::invalid(key, value, "must be 0 or 1")),
                };
            }
            "condition" => self.conditions.push(value.parse()?),
            "duration" => {
                self.duration = if value == "-1" || value.eq_ignore_ascii_case("no-time-limit") {
                    None
                } else {
                    let seconds = parse_number(key, value)?;
                    if seconds < 0.0 {
                        return Err(ConfigError::invalid(
                            key,
                            value,
                            "must be >= 0, -1, or no-time-limit",
                        ));
                    }
                    Some(seconds)
                };
                self.duration_start = None;
            }
            "perpetual" => self.perpetual = parse_bool(key, value)?,
            "domain" => {
                if value.is_empty() {
                    return Err(ConfigError::invalid(key, value, "no variables listed"));
                }
                self.domain_names = Some(value.to_owned());
            }
            "updates" => self.update_var = Some(value.to_owned()),
            "runflag" => self.run_flags.push(parse_flag(key, value)?),
            "activeflag" => self.active_flags.push(parse_flag(key, value)?),
            "inactiveflag" => self.inactive_flags.push(parse_flag(key, value)?),
            "idleflag" => self.idle_flags.push(parse_flag(key, value)?),
            "endflag" => self.end_flags.push(parse_flag(key, value)?),
            // Read by the registry from the template spec.
            "max_spawns" => {
                parse_number(key, value)?;
            }
            _ => return Err(ConfigError::unknown(key)),
        }
        Ok(())
    }

    /// Behavior name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind name the behavior was created from.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Priority weight.
    pub const fn priority(&self) -> f64 {
        self.priority
    }

    /// Solve pass the behavior contributes to (0 or 1).
    pub const fn filter_level(&self) -> u8 {
        self.filter_level
    }

    /// Variables the behavior decides over, bound by the registry.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Restrict to the variables named by the `domain` parameter, or take
    /// the whole helm domain if none were named. Unknown names are left
    /// out, which may leave the domain empty.
    pub fn bind_domain(&mut self, helm: &Domain) {
        self.domain = match &self.domain_names {
            None => helm.clone(),
            Some(names) => {
                let known = names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| helm.has_var(name));
                helm.select(known).unwrap_or_default()
            }
        };
    }

    /// Variable carrying update strings.
    pub fn update_var(&self) -> Option<&str> {
        self.update_var.as_deref()
    }

    /// Remember `update` as already applied, e.g. the string that spawned
    /// this behavior.
    pub fn mark_update_seen(&mut self, update: &str) {
        update.clone_into(&mut self.last_update);
    }

    /// `good/total` update counts, or `n/a` with no update variable.
    pub fn update_summary(&self) -> String {
        if self.update_var.is_none() {
            return "n/a".to_owned();
        }
        format!(
            "{}/{}",
            self.good_updates,
            self.good_updates.saturating_add(self.bad_updates)
        )
    }

    /// Mark the behavior complete. It will be retired at its next step.
    pub const fn set_complete(&mut self) {
        self.completed = true;
    }

    /// Whether the behavior was marked complete.
    pub const fn is_complete(&self) -> bool {
        self.completed
    }

    /// Declare the behavior broken. The engine halts the tick.
    pub fn set_state_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.postings.push(Posting::new(ERROR_VAR, message.clone()));
        self.error = Some(message);
    }

    /// Whether no error was declared.
    pub const fn state_ok(&self) -> bool {
        self.error.is_none()
    }

    /// The declared error, if any.
    pub fn state_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Queue a posting.
    pub fn post(&mut self, var: impl Into<String>, value: impl Into<String>) {
        self.postings.push(Posting::new(var, value));
    }

    /// Queue a recoverable warning, also posted as `BHV_WARNING`.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.postings.push(Posting::new(WARNING_VAR, message.clone()));
        self.warnings.push(message);
    }

    /// Queue every flag of one kind.
    pub fn post_flags(&mut self, which: FlagKind) {
        let flags = match which {
            FlagKind::Run => &self.run_flags,
            FlagKind::Active => &self.active_flags,
            FlagKind::Inactive => &self.inactive_flags,
            FlagKind::Idle => &self.idle_flags,
            FlagKind::End => &self.end_flags,
        };
        let expanded: Vec<Posting> = flags
            .iter()
            .map(|flag| flag.expand(&self.name, &self.kind))
            .collect();
        self.postings.extend(expanded);
    }

    /// Drain queued postings.
    pub fn take_postings(&mut self) -> Vec<Posting> {
        std::mem::take(&mut self.postings)
    }

    /// Drain queued warnings.
    pub fn take_warnings(&mut self) -> Vec<String> {
        std::mem::take(&mut self.warnings)
    }

    /// Default run check: completion, conditions, duration, domain.
    pub fn runnable(&mut self, ctx: &StepContext<'_>) -> Runnable {
        if self.completed {
            return Runnable::Completed;
        }
        if !self.conditions.iter().all(|c| c.holds(ctx.info)) {
            return Runnable::Idle;
        }
        if let Some(limit) = self.duration {
            let start = *self.duration_start.get_or_insert(ctx.now);
            if ctx.now - start >= limit {
                if self.perpetual {
                    self.duration_start = Some(ctx.now);
                } else {
                    self.completed = true;
                    return Runnable::Completed;
                }
            }
        }
        if self.domain.is_empty() {
            return Runnable::Idle;
        }
        Runnable::Running
    }

    /// Split an update string and decide whether it applies.
    ///
    /// Returns the `(param, value)` pairs to apply, or `None` when the
    /// string is empty, a repeat without `toggle`, or addressed to another
    /// behavior.
    pub(crate) fn accept_update(&mut self, update: &str) -> Option<Vec<(String, String)>> {
        let update = update.trim();
        if update.is_empty() || (update == self.last_update && !update.contains("toggle")) {
            return None;
        }
        update.clone_into(&mut self.last_update);

        let mut pairs = Vec::new();
        for part in update.split('#').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            let (key, value) = (key.trim(), value.trim());
            if key.eq_ignore_ascii_case("name") {
                if value != self.name {
                    return None;
                }
                continue;
            }
            pairs.push((key.to_owned(), value.to_owned()));
        }
        Some(pairs)
    }

    /// Count the outcome of one applied update, warning on failure.
    pub(crate) fn record_update(&mut self, bad_params: &[String]) {
        if bad_params.is_empty() {
            self.good_updates = self.good_updates.saturating_add(1);
            return;
        }
        self.bad_updates = self.bad_updates.saturating_add(1);
        let message = format!(
            "Faulty update for behavior: {}. Bad parameter(s): {}",
            self.name,
            bad_params.join(",")
        );
        self.warn(message);
    }
}

fn parse_number(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::invalid(key, value, "not a number"))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "not a boolean")),
    }
}

fn parse_flag(key: &str, value: &str) -> Result<Flag, ConfigError> {
    value
        .parse()
        .map_err(|reason: String| ConfigError::invalid(key, value, reason))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::info::InfoBuffer;

    fn helm_domain() -> Domain {
        Domain::new()
            .with_variable("course", 0.0, 359.0, 360)
            .unwrap()
            .with_variable("speed", 0.0, 5.0, 6)
            .unwrap()
    }

    fn ctx<'a>(info: &'a InfoBuffer, domain: &'a Domain, now: f64) -> StepContext<'a> {
        StepContext {
            iteration: 1,
            now,
            domain,
            info,
        }
    }

    #[test]
    fn common_params_apply() {
        let mut common = BehaviorCommon::new("waypoint");
        common.apply_param("name", "wpt_1").unwrap();
        common.apply_param("PWT", "250").unwrap();
        common.apply_param("duration", "no-time-limit").unwrap();
        common.apply_param("perpetual", "true").unwrap();
        common.apply_param("endflag", "DONE=$[BHVNAME]").unwrap();
        assert_eq!(common.name(), "wpt_1");
        assert!((common.priority() - 250.0).abs() < f64::EPSILON);
        assert!(matches!(
            common.apply_param("pwt", "-1"),
            Err(ConfigError::InvalidParam { .. })
        ));
        assert!(matches!(
            common.apply_param("speed", "3"),
            Err(ConfigError::UnknownParam { .. })
        ));
        assert!(common.apply_param("runflag", "nothing").is_err());
    }

    #[test]
    fn flags_substitute_name_and_kind() {
        let mut common = BehaviorCommon::new("loiter");
        common.apply_param("name", "patrol").unwrap();
        common.apply_param("activeflag", "STATUS=$[BHVNAME]:$[BHVTYPE]").unwrap();
        common.post_flags(FlagKind::Active);
        assert_eq!(
            common.take_postings(),
            vec![Posting::new("STATUS", "patrol:loiter")]
        );
        assert!(common.take_postings().is_empty());
    }

    #[test]
    fn domain_binding_skips_unknown_names() {
        let mut common = BehaviorCommon::new("x");
        common.bind_domain(&helm_domain());
        assert_eq!(common.domain().size(), 2);
        common.apply_param("domain", "speed,torque").unwrap();
        common.bind_domain(&helm_domain());
        assert_eq!(common.domain().names().collect::<Vec<_>>(), vec!["speed"]);
        common.apply_param("domain", "torque").unwrap();
        common.bind_domain(&helm_domain());
        assert!(common.domain().is_empty());
    }

    #[test]
    fn runnable_follows_conditions_and_duration() {
        let domain = helm_domain();
        let mut info = InfoBuffer::new();
        let mut common = BehaviorCommon::new("x");
        common.bind_domain(&domain);
        common.apply_param("condition", "MODE=go").unwrap();
        common.apply_param("duration", "10").unwrap();

        assert_eq!(common.runnable(&ctx(&info, &domain, 0.0)), Runnable::Idle);
        info.set_text("MODE", "go");
        assert_eq!(common.runnable(&ctx(&info, &domain, 1.0)), Runnable::Running);
        assert_eq!(common.runnable(&ctx(&info, &domain, 10.5)), Runnable::Running);
        assert_eq!(common.runnable(&ctx(&info, &domain, 11.0)), Runnable::Completed);
        assert!(common.is_complete());
    }

    #[test]
    fn perpetual_restarts_duration() {
        let domain = helm_domain();
        let info = InfoBuffer::new();
        let mut common = BehaviorCommon::new("x");
        common.bind_domain(&domain);
        common.apply_param("duration", "5").unwrap();
        common.apply_param("perpetual", "true").unwrap();
        assert_eq!(common.runnable(&ctx(&info, &domain, 0.0)), Runnable::Running);
        assert_eq!(common.runnable(&ctx(&info, &domain, 6.0)), Runnable::Running);
        assert!(!common.is_complete());
    }

    #[test]
    fn update_strings_filtered() {
        let mut common = BehaviorCommon::new("x");
        common.apply_param("name", "alpha").unwrap();
        assert!(common.accept_update("").is_none());
        let pairs = common.accept_update("pwt=20 # name=alpha").unwrap();
        assert_eq!(pairs, vec![("pwt".to_owned(), "20".to_owned())]);
        assert!(common.accept_update("pwt=20 # name=alpha").is_none());
        assert!(common.accept_update("pwt=30#name=beta").is_none());
        assert!(common.accept_update("toggle=1").is_some());
        assert!(common.accept_update("toggle=1").is_some());
    }

    #[test]
    fn update_summary_counts() {
        let mut common = BehaviorCommon::new("x");
        assert_eq!(common.update_summary(), "n/a");
        common.apply_param("updates", "X_UPDATES").unwrap();
        common.record_update(&[]);
        common.record_update(&["bogus".to_owned()]);
        assert_eq!(common.update_summary(), "1/2");
        let warnings = common.take_warnings();
        assert_eq!(
            warnings,
            vec!["Faulty update for behavior: x. Bad parameter(s): bogus".to_owned()]
        );
    }
}
