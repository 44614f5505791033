//! Run conditions over info-buffer variables.
//!
//! A condition has the form `VAR<op>value` with `op` one of `=`, `!=`, `<`,
//! `>`, `<=`, `>=`. Equality compares numerically when both sides are
//! numbers and case-insensitively as text otherwise. Ordering operators
//! require numbers. A condition on a variable the buffer has never seen is
//! false.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;
use crate::info::InfoBuffer;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
}

impl Op {
    const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
        }
    }
}

/// Parsed `VAR<op>value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    var: String,
    op: Op,
    value: String,
}

impl Condition {
    /// Variable the condition reads.
    pub fn var(&self) -> &str {
        &self.var
    }

    /// Comparison operator.
    pub const fn op(&self) -> Op {
        self.op
    }

    /// Evaluate against the buffer.
    pub fn holds(&self, info: &InfoBuffer) -> bool {
        let Some(current) = info.get(&self.var) else {
            return false;
        };
        let target: Option<f64> = self.value.parse().ok();
        match (self.op, current.as_number(), target) {
            (Op::Eq, Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON,
            (Op::Ne, Some(a), Some(b)) => (a - b).abs() > f64::EPSILON,
            (Op::Eq, ..) => current.as_text().eq_ignore_ascii_case(&self.value),
            (Op::Ne, ..) => !current.as_text().eq_ignore_ascii_case(&self.value),
            (Op::Lt, Some(a), Some(b)) => a < b,
            (Op::Gt, Some(a), Some(b)) => a > b,
            (Op::Le, Some(a), Some(b)) => a <= b,
            (Op::Ge, Some(a), Some(b)) => a >= b,
            (Op::Lt | Op::Gt | Op::Le | Op::Ge, ..) => false,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.var, self.op.symbol(), self.value)
    }
}

impl FromStr for Condition {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Two-character operators first so `<=` is not read as `<`.
        const OPERATORS: [(&str, Op); 6] = [
            ("!=", Op::Ne),
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("=", Op::Eq),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];
        let (at, symbol, op) = OPERATORS
            .iter()
            .filter_map(|&(symbol, op)| s.find(symbol).map(|at| (at, symbol, op)))
            .min_by_key(|&(at, symbol, _)| (at, usize::MAX.saturating_sub(symbol.len())))
            .ok_or_else(|| ConfigError::invalid("condition", s, "no comparison operator"))?;

        let var = s.get(..at).unwrap_or_default().trim();
        let value = s
            .get(at.saturating_add(symbol.len())..)
            .unwrap_or_default()
            .trim();
        if var.is_empty() || value.is_empty() {
            return Err(ConfigError::invalid(
                "condition",
                s,
                "expected VAR<op>value",
            ));
        }
        Ok(Self {
            var: var.to_owned(),
            op,
            value: value.to_owned(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info() -> InfoBuffer {
        let mut info = InfoBuffer::new();
        info.set_text("MODE", "Transit");
        info.set_number("DEPTH", 12.0);
        info
    }

    #[test]
    fn parses_every_operator() {
        for (text, op) in [
            ("A=1", Op::Eq),
            ("A!=1", Op::Ne),
            ("A<1", Op::Lt),
            ("A>1", Op::Gt),
            ("A<=1", Op::Le),
            ("A>=1", Op::Ge),
        ] {
            let c: Condition = text.parse().unwrap();
            assert_eq!(c.op(), op, "{text}");
            assert_eq!(c.var(), "A");
            assert_eq!(c.to_string(), text);
        }
        assert!("MODE".parse::<Condition>().is_err());
        assert!("=x".parse::<Condition>().is_err());
    }

    #[test]
    fn evaluates_text_and_numbers() {
        let info = info();
        assert!("MODE=transit".parse::<Condition>().unwrap().holds(&info));
        assert!("MODE!=loiter".parse::<Condition>().unwrap().holds(&info));
        assert!("DEPTH>=12".parse::<Condition>().unwrap().holds(&info));
        assert!("DEPTH<20".parse::<Condition>().unwrap().holds(&info));
        assert!(!"DEPTH>12".parse::<Condition>().unwrap().holds(&info));
        assert!("DEPTH=12".parse::<Condition>().unwrap().holds(&info));
        assert!(!"MODE<3".parse::<Condition>().unwrap().holds(&info));
    }

    #[test]
    fn unknown_variable_fails() {
        assert!(!"ARMED=true".parse::<Condition>().unwrap().holds(&info()));
        assert!(!"ARMED!=true".parse::<Condition>().unwrap().holds(&info()));
    }
}
