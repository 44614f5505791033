//! Behavior kinds the helm binary registers.
//!
//! - `peak` prefers one value of one variable, with utility falling off
//!   linearly on both sides. With `source` set, the preferred value
//!   follows an info variable instead of the fixed `peak` parameter.
//! - `replay` contributes a function given in wire form.

use tiller_helm::{Behavior, BehaviorCommon, BehaviorFactory, ConfigError, StepContext};
use tiller_ivp::{
    Degree, Domain, Interval, MapError, ObjectiveFunction, Piece, PiecewiseMap, Snap, codec,
};

/// Utility at the preferred value.
const APEX_UTILITY: f64 = 100.0;

/// Factory knowing every kind in this module.
pub fn factory() -> BehaviorFactory {
    BehaviorFactory::new()
        .with("peak", Peak::boxed)
        .with("replay", Replay::boxed)
}

fn number(key: &str, value: &str) -> Result<f64, ConfigError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ConfigError::invalid(key, value, "not a finite number"))
}

/// Linear preference for one value of one decision variable.
///
/// Utility is [`APEX_UTILITY`] at the preferred value and reaches zero
/// `width` units away on either side.
pub struct Peak {
    common: BehaviorCommon,
    var: String,
    peak: f64,
    width: f64,
    source: Option<String>,
}

impl Peak {
    fn boxed() -> Box<dyn Behavior> {
        Box::new(Self {
            common: BehaviorCommon::new("peak"),
            var: "speed".to_owned(),
            peak: 0.0,
            width: 10.0,
            source: None,
        })
    }

    /// Where the behavior wants the variable this tick, if it knows.
    fn target(&self, ctx: &StepContext<'_>) -> Option<f64> {
        self.source
            .as_deref()
            .map_or(Some(self.peak), |var| ctx.info.number(var))
    }
}

/// Two linear pieces meeting at the grid point nearest `target`.
fn tent(domain: Domain, target: f64, width: f64) -> Result<PiecewiseMap, MapError> {
    let Some(axis) = domain.var(0) else {
        return PiecewiseMap::from_pieces(domain, Degree::Linear, Vec::new());
    };
    let top = axis.max_index();
    let apex = axis.index_of_value(target, Snap::Nearest);
    let at = f64::from(apex);
    let slope = APEX_UTILITY * axis.delta() / width;

    let mut pieces = vec![Piece::new(
        vec![Interval::closed(0, apex)],
        Degree::Linear,
        vec![slope, (-slope).mul_add(at, APEX_UTILITY)],
    )?];
    if apex < top {
        pieces.push(Piece::new(
            vec![Interval::closed(apex.saturating_add(1), top)],
            Degree::Linear,
            vec![-slope, slope.mul_add(at, APEX_UTILITY)],
        )?);
    }
    PiecewiseMap::from_pieces(domain, Degree::Linear, pieces)
}

impl Behavior for Peak {
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
            "width" => {
                let width = number(key, value)?;
                if width <= 0.0 {
                    return Err(ConfigError::invalid(key, value, "must be positive"));
                }
                self.width = width;
            }
            "source" => self.source = Some(value.to_owned()),
            _ => return Err(ConfigError::unknown(key)),
        }
        Ok(())
    }

    fn on_run_state(&mut self, ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
        let target = self.target(ctx)?;
        let domain = match self.common.domain().select([self.var.as_str()]) {
            Ok(domain) => domain,
            Err(err) => {
                self.common.warn(format!("{}: {err}", self.var));
                return None;
            }
        };
        match tent(domain, target, self.width) {
            Ok(map) => Some(ObjectiveFunction::new(map, self.common.priority())),
            Err(err) => {
                self.common.warn(err.to_string());
                None
            }
        }
    }
}

/// Contributes a fixed function decoded from its wire form.
pub struct Replay {
    common: BehaviorCommon,
    function: Option<ObjectiveFunction>,
}

impl Replay {
    fn boxed() -> Box<dyn Behavior> {
        Box::new(Self {
            common: BehaviorCommon::new("replay"),
            function: None,
        })
    }
}

impl Behavior for Replay {
    fn common(&self) -> &BehaviorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut BehaviorCommon {
        &mut self.common
    }

    fn set_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        if key != "ipf" {
            return Err(ConfigError::unknown(key));
        }
        let function =
            codec::decode(value).map_err(|err| ConfigError::invalid(key, value, err.to_string()))?;
        self.function = Some(function);
        Ok(())
    }

    fn on_run_state(&mut self, _ctx: &StepContext<'_>) -> Option<ObjectiveFunction> {
        let mut function = self.function.clone()?;
        function.set_weight(self.common.priority());
        Some(function)
    }
}
