//! Behaviors shared by the helm integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::arithmetic_side_effects)]

use tiller_helm::config::ConfigError;
use tiller_helm::{
    Behavior, BehaviorCommon, BehaviorFactory, DecisionEngine, HelmConfig, ManualClock, StepContext,
};
use tiller_ivp::text::compact;
use tiller_ivp::{Degree, Interval, ObjectiveFunction, Piece, PiecewiseMap, Snap, codec};

/// Utility 100 at `peak`, falling by `slope` per grid step on both sides.
///
/// With `watch` set, posts the watched variable's current value as
/// `WATCHED` each time it runs.
pub struct Tent {
    common: BehaviorCommon,
    var: String,
    peak: f64,
    slope: f64,
    watch: Option<String>,
}

fn number(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse()
        .ok()
        .ok_or_else(|| ConfigError::invalid(key, value, "not a number"))
}

impl Behavior for Tent {
    fn common(&self) -> &BehaviorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut BehaviorCommon {
        &mut self.common
    }

    fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "var" => value.clone_into(&mut self.var),
            "peak" => self.peak = number(key, value)?,
            "slope" => self.slope = number(key, value)?,
            "watch" => self.watch = Some(value.to_owned()),
            _ => return Err(ConfigError::unknown(key)),
        }
        Ok(())
    }

    fn on_run_state(&mut self, ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
        if let Some(watch) = &self.watch {
            let seen = ctx.info.number(watch).map_or_else(|| "unknown".to_owned(), compact);
            self.common.post("WATCHED", seen);
        }
        let domain = self.common.domain().select([self.var.as_str()]).ok()?;
        let axis = domain.var(0)?;
        let top = axis.max_index();
        let peak = axis.index_of_value(self.peak, Snap::Nearest);
        let apex = f64::from(peak);

        let mut pieces = vec![
            Piece::new(
                vec![Interval::closed(0, peak)],
                Degree::Linear,
                vec![self.slope, (-self.slope).mul_add(apex, 100.0)],
            )
            .ok()?,
        ];
        if peak < top {
            pieces.push(
                Piece::new(
                    vec![Interval::closed(peak + 1, top)],
                    Degree::Linear,
                    vec![-self.slope, self.slope.mul_add(apex, 100.0)],
                )
                .ok()?,
            );
        }
        let map = PiecewiseMap::from_pieces(domain, Degree::Linear, pieces).ok()?;
        Some(ObjectiveFunction::new(map, self.common.priority()))
    }
}

/// Replays a function given in wire form. With `fail` set, declares
/// itself broken instead.
pub struct Fixed {
    common: BehaviorCommon,
    function: Option<ObjectiveFunction>,
    fail: bool,
}

impl Behavior for Fixed {
    fn common(&self) -> &BehaviorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut BehaviorCommon {
        &mut self.common
    }

    fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "ipf" => {
                let function = codec::decode(value)
                    .map_err(|err| ConfigError::invalid(key, value, err.to_string()))?;
                self.function = Some(function);
            }
            "fail" => self.fail = value == "true",
            _ => return Err(ConfigError::unknown(key)),
        }
        Ok(())
    }

    fn on_run_state(&mut self, _ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
        if self.fail {
            self.common.set_state_error("sensor lost");
            return None;
        }
        self.function.clone()
    }
}

fn tent() -> Box<dyn Behavior> {
    Box::new(Tent {
        common: BehaviorCommon::new("tent"),
        var: "speed".to_owned(),
        peak: 0.0,
        slope: 25.0,
        watch: None,
    })
}

fn fixed() -> Box<dyn Behavior> {
    Box::new(Fixed {
        common: BehaviorCommon::new("fixed"),
        function: None,
        fail: false,
    })
}

/// Factory knowing `tent` and `fixed`.
pub fn factory() -> BehaviorFactory {
    BehaviorFactory::new().with("tent", tent).with("fixed", fixed)
}

/// Engine built from a YAML config, starting at time 0.
pub fn engine(config: &HelmConfig) -> DecisionEngine<ManualClock> {
    DecisionEngine::from_config(config, factory(), ManualClock::new(0.0)).unwrap()
}

/// Parse a YAML config.
pub fn config(yaml: &str) -> HelmConfig {
    HelmConfig::parse(yaml).unwrap()
}

/// Names in one report bucket.
pub fn names(bucket: &[tiller_helm::report::BehaviorEntry]) -> Vec<&str> {
    bucket.iter().map(|e| e.name.as_str()).collect()
}
