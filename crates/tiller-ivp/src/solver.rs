//! Branch-and-bound search over weighted piecewise maps.
//!
//! Functions are first prepared: void ones are dropped, the rest are
//! expanded onto the solve domain, normalized into `[0, range]` when their
//! spread is wider than `range`, and scaled by their weight.
//!
//! The search walks one function per level. At each level the pieces of
//! that function which overlap the current region are intersected with it.
//! Because [`Piece::intersect`] sums polynomials, the region at depth `L`
//! carries the committed weighted sum of the first `L` functions. A branch
//! is explored only while
//!
//! ```text
//! region.max_value() + sum_{k > L} cheap_bound_k(region) > best + epsilon
//! ```
//!
//! so the first maximum found is kept against later ties.

use serde::Serialize;
use tracing::debug;

use crate::domain::Domain;
use crate::function::ObjectiveFunction;
use crate::map::MapError;
use crate::piece::{Degree, Piece};

/// Errors raised by the solver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SolveError {
    /// No function survived preparation.
    #[error("no objective functions to solve")]
    NoFunctions,

    /// Every leaf was vetoed by the compactor.
    #[error("search found no acceptable point")]
    NoSolution,

    /// A function could not be placed on the solve domain.
    #[error("map error: {source}")]
    Map {
        /// The underlying map error.
        #[from]
        source: MapError,
    },
}

/// Leaf scoring hook.
///
/// At the bottom of the search every region is handed to the compactor,
/// which returns the point and value to compare against the incumbent, or
/// `None` to veto the region.
pub trait Compactor {
    /// Score a leaf region.
    fn assess(&self, region: &Piece) -> Option<(Vec<u32>, f64)>;
}

/// Default compactor: the exact maximum of the region's polynomial.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxCorner;

impl Compactor for MaxCorner {
    fn assess(&self, region: &Piece) -> Option<(Vec<u32>, f64)> {
        let point = region.max_point()?;
        Some((point, region.max_value()))
    }
}

/// Tunables for preparation and search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Minimum improvement for a region to replace the incumbent.
    pub epsilon: f64,
    /// Maps spreading wider than this are normalized to `[0, range]`.
    pub normalize_range: Option<f64>,
    /// Search functions in descending weight order.
    pub sort_by_priority: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            epsilon: 1e-5,
            normalize_range: Some(100.0),
            sort_by_priority: true,
        }
    }
}

/// Search counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SolveStats {
    /// Functions searched.
    pub functions: usize,
    /// Non-empty intersections visited.
    pub nodes: u64,
    /// Leaf regions scored.
    pub leaves: u64,
    /// Branches cut by the bound.
    pub pruned: u64,
}

/// Best point found by the solver.
#[derive(Debug, Clone)]
pub struct Solution {
    domain: Domain,
    point: Vec<u32>,
    value: f64,
    stats: SolveStats,
}

impl Solution {
    /// Domain the point indexes into.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Grid index per dimension.
    pub fn point(&self) -> &[u32] {
        &self.point
    }

    /// Weighted sum at the point.
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Search counters.
    pub const fn stats(&self) -> SolveStats {
        self.stats
    }

    /// Decided value of one variable.
    pub fn value_of(&self, name: &str) -> Option<f64> {
        let dim = self.domain.index_of(name)?;
        let index = self.point.get(dim).copied()?;
        self.domain.value_at(dim, index)
    }

    /// Decided value of every variable, in domain order.
    pub fn values(&self) -> Vec<(String, f64)> {
        self.domain
            .vars()
            .iter()
            .zip(&self.point)
            .filter_map(|(var, &ix)| var.value_at(ix).map(|v| (var.name().to_owned(), v)))
            .collect()
    }
}

/// Branch-and-bound solver over one domain.
#[derive(Debug, Clone)]
pub struct Solver<C = MaxCorner> {
    domain: Domain,
    settings: SolverSettings,
    functions: Vec<ObjectiveFunction>,
    initial: Option<Vec<u32>>,
    compactor: C,
}

impl Solver<MaxCorner> {
    /// Solver over `domain` with the default compactor.
    pub const fn new(domain: Domain, settings: SolverSettings) -> Self {
        Self {
            domain,
            settings,
            functions: Vec::new(),
            initial: None,
            compactor: MaxCorner,
        }
    }
}

impl<C: Compactor> Solver<C> {
    /// Replace the leaf compactor.
    pub fn with_compactor<D: Compactor>(self, compactor: D) -> Solver<D> {
        Solver {
            domain: self.domain,
            settings: self.settings,
            functions: self.functions,
            initial: self.initial,
            compactor,
        }
    }

    /// Solve domain.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Prepare and queue a function.
    ///
    /// Returns `Ok(false)` when the function is void and was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError::Map`] if the function's domain cannot be
    /// expanded onto the solve domain.
    pub fn add_function(&mut self, function: ObjectiveFunction) -> Result<bool, SolveError> {
        if function.is_void() {
            debug!(context = function.context(), weight = function.weight(), "Dropping void function");
            return Ok(false);
        }
        let weight = function.weight();
        let context = function.context().to_owned();
        let mut map = function.into_map().expand_to(&self.domain)?;

        let spread = map.max_value().zip(map.min_value()).map(|(high, low)| high - low);
        if let Some(range) = self
            .settings
            .normalize_range
            .filter(|&range| spread.is_some_and(|s| s > range))
        {
            map.normalize(0.0, range);
        }
        map.apply_weight(weight);

        self.functions
            .push(ObjectiveFunction::new(map, weight).with_context(context));
        Ok(true)
    }

    /// Seed the incumbent with the weighted sum at `point`.
    ///
    /// Points of the wrong dimension or outside the domain are ignored at
    /// solve time.
    pub fn set_initial_solution(&mut self, point: Vec<u32>) {
        self.initial = Some(point);
    }

    /// Functions queued so far, already expanded, normalized and weighted.
    pub fn prepared(&self) -> &[ObjectiveFunction] {
        &self.functions
    }

    /// Number of queued functions.
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Run the search.
    ///
    /// # Errors
    ///
    /// Returns [`SolveError::NoFunctions`] if nothing is queued, or
    /// [`SolveError::NoSolution`] if the compactor vetoed every leaf and no
    /// initial solution was seeded.
    pub fn solve(&self) -> Result<Solution, SolveError> {
        if self.functions.is_empty() {
            return Err(SolveError::NoFunctions);
        }
        let mut order: Vec<&ObjectiveFunction> = self.functions.iter().collect();
        if self.settings.sort_by_priority {
            order.sort_by(|a, b| b.weight().total_cmp(&a.weight()));
        }

        let mut search = Search {
            functions: &order,
            compactor: &self.compactor,
            epsilon: self.settings.epsilon,
            best: self.seed(),
            stats: SolveStats {
                functions: order.len(),
                ..SolveStats::default()
            },
        };
        search.descend(0, &Piece::universe(&self.domain, Degree::Constant));

        let stats = search.stats;
        let (point, value) = search.best.ok_or(SolveError::NoSolution)?;
        debug!(
            functions = stats.functions,
            nodes = stats.nodes,
            leaves = stats.leaves,
            pruned = stats.pruned,
            value,
            "Solve complete"
        );
        Ok(Solution {
            domain: self.domain.clone(),
            point,
            value,
            stats,
        })
    }

    /// Incumbent from the initial solution, if one was set and fits.
    fn seed(&self) -> Option<(Vec<u32>, f64)> {
        let point = self.initial.as_ref()?;
        let fits = point.len() == self.domain.size()
            && point
                .iter()
                .zip(self.domain.vars())
                .all(|(&p, var)| p < var.points());
        if !fits {
            return None;
        }
        let value = self
            .functions
            .iter()
            .map(|f| f.map().eval_point(point).value)
            .sum();
        Some((point.clone(), value))
    }
}

/// Mutable state of one search.
struct Search<'a, C> {
    functions: &'a [&'a ObjectiveFunction],
    compactor: &'a C,
    epsilon: f64,
    best: Option<(Vec<u32>, f64)>,
    stats: SolveStats,
}

impl<C: Compactor> Search<'_, C> {
    fn descend(&mut self, level: usize, region: &Piece) {
        let Some(function) = self.functions.get(level) else {
            self.leaf(region);
            return;
        };
        let map = function.map();
        let next_level = level.saturating_add(1);

        for ix in map.candidates(region.bounds()) {
            let Some(next) = map.piece(ix).and_then(|piece| region.intersect(piece)) else {
                continue;
            };
            self.stats.nodes = self.stats.nodes.saturating_add(1);

            let remaining: f64 = self
                .functions
                .iter()
                .skip(next_level)
                .map(|f| f.map().cheap_bound(next.bounds()))
                .sum();
            let bound = next.max_value() + remaining;
            if self.beaten(bound) {
                self.stats.pruned = self.stats.pruned.saturating_add(1);
                continue;
            }
            self.descend(next_level, &next);
        }
    }

    fn leaf(&mut self, region: &Piece) {
        self.stats.leaves = self.stats.leaves.saturating_add(1);
        let Some((point, value)) = self.compactor.assess(region) else {
            return;
        };
        if !self.beaten(value) {
            self.best = Some((point, value));
        }
    }

    /// Whether `value` fails to improve on the incumbent by more than epsilon.
    fn beaten(&self, value: f64) -> bool {
        self.best
            .as_ref()
            .is_some_and(|(_, best)| value <= best + self.epsilon)
    }
}
