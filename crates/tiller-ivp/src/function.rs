//! Weighted, labeled piecewise map.
//!
//! An [`ObjectiveFunction`] is what a behavior hands to the solver each
//! tick: one piecewise map, a priority weight, and a free-form context
//! string (the engine stamps it `"<iteration>:<behavior>"`).
//!
//! A weight of zero or below makes the function void. Void functions are
//! dropped before solving.

use crate::domain::Domain;
use crate::map::PiecewiseMap;

/// A behavior's weighted preference over (part of) the domain.
#[derive(Debug, Clone)]
pub struct ObjectiveFunction {
    map: PiecewiseMap,
    weight: f64,
    context: String,
    piece_count: usize,
}

impl ObjectiveFunction {
    /// Wrap a map with a priority weight.
    pub fn new(map: PiecewiseMap, weight: f64) -> Self {
        let piece_count = map.len();
        Self {
            map,
            weight,
            context: String::new(),
            piece_count,
        }
    }

    /// Builder form of [`ObjectiveFunction::set_context`].
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// The underlying map.
    pub const fn map(&self) -> &PiecewiseMap {
        &self.map
    }

    /// Consume the function, returning its map.
    pub fn into_map(self) -> PiecewiseMap {
        self.map
    }

    /// Domain of the underlying map.
    pub const fn domain(&self) -> &Domain {
        self.map.domain()
    }

    /// Names of the variables the function is defined over.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.map.domain().names()
    }

    /// Priority weight.
    pub const fn weight(&self) -> f64 {
        self.weight
    }

    /// Replace the priority weight.
    pub const fn set_weight(&mut self, weight: f64) {
        self.weight = weight;
    }

    /// Context string.
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Replace the context string.
    pub fn set_context(&mut self, context: impl Into<String>) {
        self.context = context.into();
    }

    /// Number of pieces in the map, cached at construction.
    pub const fn piece_count(&self) -> usize {
        self.piece_count
    }

    /// Whether the weight excludes the function from solving.
    pub fn is_void(&self) -> bool {
        self.weight.is_nan() || self.weight <= 0.0
    }

    /// Whether the weight and every coefficient are finite.
    pub fn is_finite(&self) -> bool {
        self.weight.is_finite() && self.map.is_finite()
    }
}
