//! Axis-aligned boxes carrying a low-degree polynomial.
//!
//! A [`Piece`] covers an integer interval per dimension (in grid-index
//! units) and evaluates a separable polynomial inside it:
//!
//! ```text
//! f(x) = sum_d (q_d * x_d^2 + a_d * x_d) + c
//! ```
//!
//! The coefficient vector has `degree * dim + 1` entries laid out as
//! `[q_0..q_{dim-1}, a_0..a_{dim-1}, c]` for quadratics, `[a_0..a_{dim-1}, c]`
//! for linear pieces, and `[c]` for constants.
//!
//! Because the polynomial is separable, the exact extremum over the integer
//! points of a box is found per dimension by checking both interval ends
//! plus the grid points either side of a quadratic vertex.

use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// Errors raised while building or transforming pieces.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PieceError {
    /// The coefficient vector has the wrong length for the degree and dimension.
    #[error("expected {expected} coefficients, found {found}")]
    CoefficientCount {
        /// Required length, `degree * dim + 1`.
        expected: usize,
        /// Supplied length.
        found: usize,
    },

    /// An interval has its low end above its high end.
    #[error("interval {lo}..{hi} on dimension {dim} is inverted")]
    InvertedInterval {
        /// Dimension index.
        dim: usize,
        /// Low end.
        lo: u32,
        /// High end.
        hi: u32,
    },

    /// A piece was combined with a domain of a different dimension.
    #[error("piece has {found} dimension(s), expected {expected}")]
    DimensionMismatch {
        /// Dimension required by the context.
        expected: usize,
        /// Dimension of the piece.
        found: usize,
    },

    /// A variable of the source domain is missing from the target domain.
    #[error("variable {name} is missing from the target domain")]
    MissingVariable {
        /// The missing variable name.
        name: String,
    },
}

/// Polynomial degree of a piece.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Degree {
    /// A single constant term.
    #[default]
    Constant,
    /// One linear coefficient per dimension plus a constant.
    Linear,
    /// Quadratic and linear coefficients per dimension plus a constant.
    Quadratic,
}

impl Degree {
    /// Numeric degree (0, 1, or 2).
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Constant => 0,
            Self::Linear => 1,
            Self::Quadratic => 2,
        }
    }

    /// Degree from its numeric form.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Constant),
            1 => Some(Self::Linear),
            2 => Some(Self::Quadratic),
            _ => None,
        }
    }

    /// Number of coefficients for a piece of this degree over `dim` dimensions.
    pub const fn coefficient_count(self, dim: usize) -> usize {
        let terms = match self {
            Self::Constant => 0,
            Self::Linear => dim,
            Self::Quadratic => dim.saturating_mul(2),
        };
        terms.saturating_add(1)
    }
}

/// Integer interval along one dimension, with per-end open flags.
///
/// An open end excludes that grid index, so `(2, 5]` holds `3, 4, 5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// Low grid index.
    pub lo: u32,
    /// High grid index.
    pub hi: u32,
    /// Whether `lo` itself is excluded.
    pub lo_open: bool,
    /// Whether `hi` itself is excluded.
    pub hi_open: bool,
}

impl Interval {
    /// Closed interval `[lo, hi]`.
    pub const fn closed(lo: u32, hi: u32) -> Self {
        Self {
            lo,
            hi,
            lo_open: false,
            hi_open: false,
        }
    }

    /// Single grid index `[at, at]`.
    pub const fn point(at: u32) -> Self {
        Self::closed(at, at)
    }

    /// Inclusive range of grid indices actually covered, or `None` if the
    /// open flags leave nothing.
    pub fn effective(&self) -> Option<(u32, u32)> {
        let lo = if self.lo_open {
            self.lo.checked_add(1)?
        } else {
            self.lo
        };
        let hi = if self.hi_open {
            self.hi.checked_sub(1)?
        } else {
            self.hi
        };
        (lo <= hi).then_some((lo, hi))
    }

    /// Whether the grid index lies inside the interval.
    pub fn contains(&self, at: u32) -> bool {
        self.effective().is_some_and(|(lo, hi)| lo <= at && at <= hi)
    }

    /// Overlap of two intervals.
    ///
    /// Intervals that only touch at an end are disjoint when either side
    /// of the touching end is open. Where both intervals share an end, the
    /// result is open if either input is open there.
    pub fn overlap(&self, other: &Self) -> Option<Self> {
        if self.hi < other.lo || other.hi < self.lo {
            return None;
        }
        if self.hi == other.lo && (self.hi_open || other.lo_open) {
            return None;
        }
        if other.hi == self.lo && (other.hi_open || self.lo_open) {
            return None;
        }

        let (lo, lo_open) = match self.lo.cmp(&other.lo) {
            std::cmp::Ordering::Greater => (self.lo, self.lo_open),
            std::cmp::Ordering::Less => (other.lo, other.lo_open),
            std::cmp::Ordering::Equal => (self.lo, self.lo_open || other.lo_open),
        };
        let (hi, hi_open) = match self.hi.cmp(&other.hi) {
            std::cmp::Ordering::Less => (self.hi, self.hi_open),
            std::cmp::Ordering::Greater => (other.hi, other.hi_open),
            std::cmp::Ordering::Equal => (self.hi, self.hi_open || other.hi_open),
        };

        let result = Self {
            lo,
            hi,
            lo_open,
            hi_open,
        };
        result.effective().map(|_| result)
    }
}

/// Axis-aligned box over the domain carrying a polynomial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    bounds: Vec<Interval>,
    degree: Degree,
    coeffs: Vec<f64>,
    origin: Option<usize>,
}

impl Piece {
    /// Build a piece from its intervals, degree, and coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`PieceError::CoefficientCount`] if `coeffs` does not have
    /// `degree * dim + 1` entries, or [`PieceError::InvertedInterval`] if
    /// any interval has `lo > hi`.
    pub fn new(bounds: Vec<Interval>, degree: Degree, coeffs: Vec<f64>) -> Result<Self, PieceError> {
        let expected = degree.coefficient_count(bounds.len());
        if coeffs.len() != expected {
            return Err(PieceError::CoefficientCount {
                expected,
                found: coeffs.len(),
            });
        }
        if let Some((dim, iv)) = bounds.iter().enumerate().find(|(_, iv)| iv.lo > iv.hi) {
            return Err(PieceError::InvertedInterval {
                dim,
                lo: iv.lo,
                hi: iv.hi,
            });
        }
        Ok(Self {
            bounds,
            degree,
            coeffs,
            origin: None,
        })
    }

    /// Piece covering the whole domain with an all-zero polynomial.
    pub fn universe(domain: &Domain, degree: Degree) -> Self {
        let bounds: Vec<Interval> = domain
            .vars()
            .iter()
            .map(|v| Interval::closed(0, v.max_index()))
            .collect();
        let coeffs = vec![0.0; degree.coefficient_count(bounds.len())];
        Self {
            bounds,
            degree,
            coeffs,
            origin: None,
        }
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.bounds.len()
    }

    /// Polynomial degree.
    pub const fn degree(&self) -> Degree {
        self.degree
    }

    /// Intervals per dimension.
    pub fn bounds(&self) -> &[Interval] {
        &self.bounds
    }

    /// Interval along one dimension.
    pub fn interval(&self, dim: usize) -> Option<&Interval> {
        self.bounds.get(dim)
    }

    /// Raw coefficient vector.
    pub fn coeffs(&self) -> &[f64] {
        &self.coeffs
    }

    /// Provenance index (e.g. the sample or region that produced the piece).
    pub const fn origin(&self) -> Option<usize> {
        self.origin
    }

    /// Set the provenance index.
    pub const fn set_origin(&mut self, origin: Option<usize>) {
        self.origin = origin;
    }

    /// Builder form of [`Piece::set_origin`].
    #[must_use]
    pub const fn with_origin(mut self, origin: usize) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Whether every coefficient is finite.
    pub fn is_finite(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_finite())
    }

    /// Whether the piece covers at least one grid point.
    pub fn is_empty(&self) -> bool {
        self.bounds.iter().any(|iv| iv.effective().is_none())
    }

    /// Quadratic coefficient of a dimension (0 below degree 2).
    pub fn quadratic(&self, dim: usize) -> f64 {
        match self.degree {
            Degree::Quadratic => self.coeffs.get(dim).copied().unwrap_or(0.0),
            Degree::Constant | Degree::Linear => 0.0,
        }
    }

    /// Linear coefficient of a dimension (0 for constant pieces).
    pub fn linear(&self, dim: usize) -> f64 {
        let slot = match self.degree {
            Degree::Constant => return 0.0,
            Degree::Linear => Some(dim),
            Degree::Quadratic => self.dim().checked_add(dim),
        };
        slot.and_then(|i| self.coeffs.get(i)).copied().unwrap_or(0.0)
    }

    /// Constant term.
    pub fn constant(&self) -> f64 {
        self.coeffs.last().copied().unwrap_or(0.0)
    }

    /// Whether the grid point lies inside the box.
    pub fn contains(&self, point: &[u32]) -> bool {
        point.len() == self.bounds.len()
            && self.bounds.iter().zip(point).all(|(iv, &p)| iv.contains(p))
    }

    /// Polynomial value at a grid point. The point is not checked against
    /// the box.
    pub fn eval(&self, point: &[u32]) -> f64 {
        point
            .iter()
            .enumerate()
            .fold(self.constant(), |acc, (d, &p)| acc + self.term(d, f64::from(p)))
    }

    /// Exact maximum over the grid points of the box.
    ///
    /// Returns negative infinity for an empty box.
    pub fn max_value(&self) -> f64 {
        self.extremum(true).map_or(f64::NEG_INFINITY, |(_, v)| v)
    }

    /// Exact minimum over the grid points of the box.
    ///
    /// Returns positive infinity for an empty box.
    pub fn min_value(&self) -> f64 {
        self.extremum(false).map_or(f64::INFINITY, |(_, v)| v)
    }

    /// Grid point where [`Piece::max_value`] is attained.
    ///
    /// Along a dimension with no preference (both coefficients zero) the
    /// midpoint of the interval is chosen. Returns `None` for an empty box.
    pub fn max_point(&self) -> Option<Vec<u32>> {
        self.extremum(true).map(|(p, _)| p)
    }

    /// Whether the boxes of two pieces share at least one grid point.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.overlaps_bounds(&other.bounds)
    }

    /// Whether the box overlaps a bare list of intervals.
    pub fn overlaps_bounds(&self, bounds: &[Interval]) -> bool {
        self.bounds.len() == bounds.len()
            && self
                .bounds
                .iter()
                .zip(bounds)
                .all(|(a, b)| a.overlap(b).is_some())
    }

    /// Intersection of two pieces.
    ///
    /// The result covers the per-dimension overlap and carries the **sum**
    /// of both polynomials, promoted to the higher degree. Chaining
    /// intersections down a search path therefore accumulates the value of
    /// every function committed along the way. Returns `None` if the boxes
    /// are disjoint on any dimension.
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        if self.bounds.len() != other.bounds.len() {
            return None;
        }
        let bounds = self
            .bounds
            .iter()
            .zip(&other.bounds)
            .map(|(a, b)| a.overlap(b))
            .collect::<Option<Vec<_>>>()?;

        let degree = self.degree.max(other.degree);
        let coeffs = self
            .layout(degree)
            .into_iter()
            .zip(other.layout(degree))
            .map(|(a, b)| a + b)
            .collect();

        Some(Self {
            bounds,
            degree,
            coeffs,
            origin: self.origin,
        })
    }

    /// Copy of the piece raised to a higher degree. Lower targets are
    /// ignored.
    #[must_use]
    pub fn promoted(&self, degree: Degree) -> Self {
        let degree = self.degree.max(degree);
        Self {
            bounds: self.bounds.clone(),
            degree,
            coeffs: self.layout(degree),
            origin: self.origin,
        }
    }

    /// Multiply every coefficient by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for c in &mut self.coeffs {
            *c *= factor;
        }
    }

    /// Add `delta` to the constant term.
    pub fn shift(&mut self, delta: f64) {
        if let Some(c) = self.coeffs.last_mut() {
            *c += delta;
        }
    }

    /// Re-express the piece over a larger domain.
    ///
    /// Dimensions of `to` that `from` lacks get their full range and zero
    /// coefficients.
    ///
    /// # Errors
    ///
    /// Returns [`PieceError::DimensionMismatch`] if the piece does not match
    /// `from`, or [`PieceError::MissingVariable`] if `to` lacks a variable
    /// of `from`.
    pub fn expand_to(&self, from: &Domain, to: &Domain) -> Result<Self, PieceError> {
        if from.size() != self.dim() {
            return Err(PieceError::DimensionMismatch {
                expected: from.size(),
                found: self.dim(),
            });
        }
        if let Some(missing) = from.names().find(|name| !to.has_var(name)) {
            return Err(PieceError::MissingVariable {
                name: missing.to_owned(),
            });
        }

        let mapping: Vec<Option<usize>> = to.names().map(|name| from.index_of(name)).collect();
        let bounds = mapping
            .iter()
            .zip(to.vars())
            .map(|(src, var)| {
                src.and_then(|d| self.bounds.get(d).copied())
                    .unwrap_or_else(|| Interval::closed(0, var.max_index()))
            })
            .collect();

        let mut coeffs = Vec::with_capacity(self.degree.coefficient_count(to.size()));
        if self.degree == Degree::Quadratic {
            coeffs.extend(mapping.iter().map(|src| src.map_or(0.0, |d| self.quadratic(d))));
        }
        if self.degree != Degree::Constant {
            coeffs.extend(mapping.iter().map(|src| src.map_or(0.0, |d| self.linear(d))));
        }
        coeffs.push(self.constant());

        Ok(Self {
            bounds,
            degree: self.degree,
            coeffs,
            origin: self.origin,
        })
    }

    /// Contribution of one dimension at a coordinate.
    fn term(&self, dim: usize, x: f64) -> f64 {
        self.quadratic(dim).mul_add(x * x, self.linear(dim) * x)
    }

    /// Coefficients laid out for `degree`, which must not be below the
    /// piece's own degree.
    fn layout(&self, degree: Degree) -> Vec<f64> {
        let dim = self.dim();
        let mut out = Vec::with_capacity(degree.coefficient_count(dim));
        if degree == Degree::Quadratic {
            out.extend((0..dim).map(|d| self.quadratic(d)));
        }
        if degree != Degree::Constant {
            out.extend((0..dim).map(|d| self.linear(d)));
        }
        out.push(self.constant());
        out
    }

    /// Best point and value over the box, maximizing or minimizing.
    fn extremum(&self, maximize: bool) -> Option<(Vec<u32>, f64)> {
        let mut point = Vec::with_capacity(self.dim());
        let mut value = self.constant();
        for (d, iv) in self.bounds.iter().enumerate() {
            let (lo, hi) = iv.effective()?;
            let (at, v) = self.best_along(d, lo, hi, maximize);
            point.push(at);
            value += v;
        }
        Some((point, value))
    }

    /// Best coordinate along one dimension within `[lo, hi]`.
    fn best_along(&self, dim: usize, lo: u32, hi: u32, maximize: bool) -> (u32, f64) {
        let q = self.quadratic(dim);
        let a = self.linear(dim);
        if q.abs() <= f64::EPSILON && a.abs() <= f64::EPSILON {
            let mid = lo.saturating_add(hi.saturating_sub(lo) / 2);
            return (mid, self.term(dim, f64::from(mid)));
        }

        let mut candidates = vec![lo, hi];
        if q.abs() > f64::EPSILON {
            let vertex = -a / (2.0 * q);
            if vertex > f64::from(lo) && vertex < f64::from(hi) {
                // Strictly inside [lo, hi], so both roundings fit in u32.
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let (below, above) = (vertex.floor() as u32, vertex.ceil() as u32);
                candidates.push(below);
                candidates.push(above);
            }
        }

        let better = |new: f64, old: f64| if maximize { new > old } else { new < old };
        let mut best = (lo, self.term(dim, f64::from(lo)));
        for at in candidates {
            let v = self.term(dim, f64::from(at));
            if better(v, best.1) {
                best = (at, v);
            }
        }
        best
    }
}
