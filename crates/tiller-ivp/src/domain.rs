//! Named, discretized decision axes.
//!
//! A [`Domain`] is an ordered list of variables (e.g. `course`, `speed`,
//! `depth`). Each variable spans `[low, high]` sampled at `points` evenly
//! spaced grid indices, so index `j` maps to `low + delta * j`.
//!
//! Pieces and grids speak in grid indices only. The domain is the single
//! place where indices are converted back to continuous values.
//!
//! Equality and subset checks between domains are by variable name. When
//! two domains share a name they must also agree on bounds and point
//! count, otherwise [`Domain::union_of`] refuses to merge them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::text;

/// Errors raised while building or combining domains.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// A variable with this name already exists in the domain.
    #[error("domain variable {name} already exists")]
    DuplicateVariable {
        /// The repeated variable name.
        name: String,
    },

    /// The low bound is above the high bound.
    #[error("domain variable {name} has low bound {low} above high bound {high}")]
    InvalidBounds {
        /// The offending variable.
        name: String,
        /// Requested low bound.
        low: f64,
        /// Requested high bound.
        high: f64,
    },

    /// The point count cannot describe the requested range.
    #[error("domain variable {name} cannot have {points} point(s) over its range")]
    InvalidPoints {
        /// The offending variable.
        name: String,
        /// Requested point count.
        points: u32,
    },

    /// A variable name was referenced that the domain does not contain.
    #[error("unknown domain variable {name}")]
    UnknownVariable {
        /// The missing variable name.
        name: String,
    },

    /// Two domains define the same variable with different bounds.
    #[error("domain variable {name} is defined with conflicting bounds")]
    Conflict {
        /// The conflicting variable name.
        name: String,
    },

    /// A domain description string could not be parsed.
    #[error("malformed domain description: {text}")]
    Malformed {
        /// The entry that failed to parse.
        text: String,
    },
}

/// How a continuous value is snapped onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Snap {
    /// Round down to the grid index at or below the value.
    Floor,
    /// Round up to the grid index at or above the value.
    Ceil,
    /// Round to the closest grid index.
    #[default]
    Nearest,
}

/// One discretized axis of a [`Domain`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainVar {
    name: String,
    low: f64,
    high: f64,
    points: u32,
}

impl DomainVar {
    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Low bound (value at grid index 0).
    pub const fn low(&self) -> f64 {
        self.low
    }

    /// High bound (value at the last grid index).
    pub const fn high(&self) -> f64 {
        self.high
    }

    /// Number of grid points.
    pub const fn points(&self) -> u32 {
        self.points
    }

    /// Largest valid grid index.
    pub const fn max_index(&self) -> u32 {
        self.points.saturating_sub(1)
    }

    /// Distance between neighboring grid points.
    pub fn delta(&self) -> f64 {
        if self.points <= 1 {
            return 0.0;
        }
        (self.high - self.low) / f64::from(self.max_index())
    }

    /// Continuous value at a grid index, or `None` past the last point.
    pub fn value_at(&self, index: u32) -> Option<f64> {
        (index < self.points).then(|| self.delta().mul_add(f64::from(index), self.low))
    }

    /// Grid index for a continuous value, clamped to the axis.
    pub fn index_of_value(&self, value: f64, snap: Snap) -> u32 {
        if value <= self.low || self.points <= 1 {
            return 0;
        }
        if value >= self.high {
            return self.max_index();
        }
        let steps = (value - self.low) / self.delta();
        let snapped = match snap {
            Snap::Floor => steps.floor(),
            Snap::Ceil => steps.ceil(),
            Snap::Nearest => steps.round(),
        };
        // Clamped above, so the value fits the axis.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let index = snapped.max(0.0) as u32;
        index.min(self.max_index())
    }

    /// Whether two variables describe the same axis.
    fn same_axis(&self, other: &Self) -> bool {
        self.points == other.points
            && approx_eq(self.low, other.low)
            && approx_eq(self.high, other.high)
    }
}

/// Ordered set of named, discretized decision variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    vars: Vec<DomainVar>,
}

impl Domain {
    /// Create an empty domain.
    pub const fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Builder form of [`Domain::add_variable`].
    ///
    /// # Errors
    ///
    /// See [`Domain::add_variable`].
    pub fn with_variable(
        mut self,
        name: &str,
        low: f64,
        high: f64,
        points: u32,
    ) -> Result<Self, DomainError> {
        self.add_variable(name, low, high, points)?;
        Ok(self)
    }

    /// Append a variable to the domain.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::DuplicateVariable`] if the name is taken,
    /// [`DomainError::InvalidBounds`] if `low > high`, or
    /// [`DomainError::InvalidPoints`] if `points` is zero or is one while
    /// `low != high`.
    pub fn add_variable(
        &mut self,
        name: &str,
        low: f64,
        high: f64,
        points: u32,
    ) -> Result<(), DomainError> {
        if self.has_var(name) {
            return Err(DomainError::DuplicateVariable {
                name: name.to_owned(),
            });
        }
        if low > high || !low.is_finite() || !high.is_finite() {
            return Err(DomainError::InvalidBounds {
                name: name.to_owned(),
                low,
                high,
            });
        }
        if points == 0 || (points == 1 && !approx_eq(low, high)) {
            return Err(DomainError::InvalidPoints {
                name: name.to_owned(),
                points,
            });
        }
        self.vars.push(DomainVar {
            name: name.to_owned(),
            low,
            high,
            points,
        });
        Ok(())
    }

    /// Number of variables (dimensions).
    pub fn size(&self) -> usize {
        self.vars.len()
    }

    /// Whether the domain has no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// All variables in order.
    pub fn vars(&self) -> &[DomainVar] {
        &self.vars
    }

    /// Variable at a dimension index.
    pub fn var(&self, dim: usize) -> Option<&DomainVar> {
        self.vars.get(dim)
    }

    /// Variable with the given name.
    pub fn var_named(&self, name: &str) -> Option<&DomainVar> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Dimension index of a variable.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == name)
    }

    /// Whether the domain contains a variable with this name.
    pub fn has_var(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Variable names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(DomainVar::name)
    }

    /// Point count of a dimension.
    pub fn points(&self, dim: usize) -> Option<u32> {
        self.vars.get(dim).map(DomainVar::points)
    }

    /// Continuous value of a grid index along a dimension.
    pub fn value_at(&self, dim: usize, index: u32) -> Option<f64> {
        self.vars.get(dim).and_then(|v| v.value_at(index))
    }

    /// Grid index nearest to a continuous value along a dimension.
    pub fn discrete_index(&self, dim: usize, value: f64, snap: Snap) -> Option<u32> {
        self.vars.get(dim).map(|v| v.index_of_value(value, snap))
    }

    /// Whether every variable of `self` is also named in `other`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.names().all(|name| other.has_var(name))
    }

    /// Whether both domains name exactly the same variables in the same order.
    pub fn same_names(&self, other: &Self) -> bool {
        self.names().eq(other.names())
    }

    /// Union of two domains by variable name.
    ///
    /// Variables of `a` come first, followed by those only in `b`.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::Conflict`] if a shared variable disagrees on
    /// bounds or point count.
    pub fn union_of(a: &Self, b: &Self) -> Result<Self, DomainError> {
        let mut merged = a.clone();
        for var in &b.vars {
            match merged.var_named(&var.name) {
                Some(existing) if existing.same_axis(var) => {}
                Some(_) => {
                    return Err(DomainError::Conflict {
                        name: var.name.clone(),
                    });
                }
                None => merged.vars.push(var.clone()),
            }
        }
        Ok(merged)
    }

    /// Sub-domain holding the comma-separated variables, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownVariable`] for a name not in `self`.
    pub fn sub_domain(&self, names: &str) -> Result<Self, DomainError> {
        self.select(names.split(',').map(str::trim).filter(|n| !n.is_empty()))
    }

    /// Sub-domain holding the given variables, in the order given.
    /// Repeated names are kept once.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownVariable`] for a name not in `self`.
    pub fn select<'a, I>(&self, names: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut sub = Self::new();
        for name in names {
            if sub.has_var(name) {
                continue;
            }
            let var = self
                .var_named(name)
                .ok_or_else(|| DomainError::UnknownVariable {
                    name: name.to_owned(),
                })?;
            sub.vars.push(var.clone());
        }
        Ok(sub)
    }

    /// Check that every variable of `self` appears in `other` with the
    /// same bounds and point count.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::UnknownVariable`] or [`DomainError::Conflict`].
    pub fn check_compatible(&self, other: &Self) -> Result<(), DomainError> {
        for var in &self.vars {
            let theirs = other
                .var_named(&var.name)
                .ok_or_else(|| DomainError::UnknownVariable {
                    name: var.name.clone(),
                })?;
            if !var.same_axis(theirs) {
                return Err(DomainError::Conflict {
                    name: var.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Text form: `name,low,high,points` entries joined by `:`.
impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, var) in self.vars.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(
                f,
                "{},{},{},{}",
                var.name,
                text::compact(var.low),
                text::compact(var.high),
                var.points
            )?;
        }
        Ok(())
    }
}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut domain = Self::new();
        for entry in s.split(':').map(str::trim).filter(|e| !e.is_empty()) {
            let malformed = || DomainError::Malformed {
                text: entry.to_owned(),
            };
            let fields: Vec<&str> = entry.split(',').map(str::trim).collect();
            let [name, low, high, points] = fields.as_slice() else {
                return Err(malformed());
            };
            let low: f64 = low.parse().ok().ok_or_else(malformed)?;
            let high: f64 = high.parse().ok().ok_or_else(malformed)?;
            let points: u32 = points.parse().ok().ok_or_else(malformed)?;
            domain.add_variable(name, low, high, points)?;
        }
        Ok(domain)
    }
}

/// Float equality with a relative tolerance.
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0)
}
