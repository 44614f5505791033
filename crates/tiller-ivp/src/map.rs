//! Partition of a domain into pieces, with a grid index.
//!
//! A [`PiecewiseMap`] owns its pieces in a contiguous `Vec`. The grid refers
//! to pieces by index, and is rebuilt whenever pieces are added or removed,
//! so an index never outlives the map that issued it.
//!
//! Construction of the partition itself happens elsewhere. The map checks
//! the shape of every piece (dimension, degree, bounds inside the domain)
//! but trusts the caller that pieces do not overlap.

use crate::domain::{Domain, DomainError};
use crate::grid::Grid;
use crate::piece::{Degree, Interval, Piece, PieceError};

/// Errors raised while building or transforming piecewise maps.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MapError {
    /// A piece does not have the map's dimension.
    #[error("piece has {found} dimension(s), map has {expected}")]
    DimensionMismatch {
        /// Dimension of the map's domain.
        expected: usize,
        /// Dimension of the piece.
        found: usize,
    },

    /// A piece does not have the map's degree.
    #[error("piece has degree {found:?}, map has degree {expected:?}")]
    DegreeMismatch {
        /// Degree of the map.
        expected: Degree,
        /// Degree of the piece.
        found: Degree,
    },

    /// A piece extends beyond the last grid point of a dimension.
    #[error("piece reaches index {hi} on dimension {dim}, which has {points} point(s)")]
    OutOfDomain {
        /// Dimension index.
        dim: usize,
        /// Offending high bound.
        hi: u32,
        /// Point count of the dimension.
        points: u32,
    },

    /// A piece could not be transformed.
    #[error("piece error: {source}")]
    Piece {
        /// The underlying piece error.
        #[from]
        source: PieceError,
    },

    /// The target domain is incompatible.
    #[error("domain error: {source}")]
    Domain {
        /// The underlying domain error.
        #[from]
        source: DomainError,
    },
}

/// Result of evaluating a map at a grid point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Utility at the point, or 0 when uncovered.
    pub value: f64,
    /// Whether exactly one piece contains the point.
    pub covered: bool,
}

/// Ordered pieces over a fixed domain and degree, with a grid index.
#[derive(Debug, Clone)]
pub struct PiecewiseMap {
    domain: Domain,
    degree: Degree,
    pieces: Vec<Piece>,
    universe: Vec<Interval>,
    gel_size: Option<Vec<u32>>,
    grid: Grid,
}

impl PiecewiseMap {
    /// Empty map over `domain`.
    pub fn new(domain: Domain, degree: Degree) -> Self {
        let grid = Grid::build(&domain, &[], None);
        Self {
            domain,
            degree,
            pieces: Vec::new(),
            universe: Vec::new(),
            gel_size: None,
            grid,
        }
    }

    /// Map holding `pieces`, validated against `domain` and `degree`.
    ///
    /// # Errors
    ///
    /// Returns the first shape violation found, see [`PiecewiseMap::push`].
    pub fn from_pieces(domain: Domain, degree: Degree, pieces: Vec<Piece>) -> Result<Self, MapError> {
        let mut map = Self::new(domain, degree);
        for piece in &pieces {
            map.check(piece)?;
        }
        map.pieces = pieces;
        map.rebuild();
        Ok(map)
    }

    /// Append a piece and rebuild the index.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::DimensionMismatch`], [`MapError::DegreeMismatch`],
    /// or [`MapError::OutOfDomain`] if the piece does not fit the map.
    pub fn push(&mut self, piece: Piece) -> Result<(), MapError> {
        self.check(&piece)?;
        self.pieces.push(piece);
        self.rebuild();
        Ok(())
    }

    /// Remove the piece at `index` and rebuild the index.
    pub fn remove(&mut self, index: usize) -> Option<Piece> {
        if index >= self.pieces.len() {
            return None;
        }
        let removed = self.pieces.remove(index);
        self.rebuild();
        Some(removed)
    }

    /// Drop pieces that cover no grid point. Returns how many were dropped.
    pub fn remove_empty(&mut self) -> usize {
        let before = self.pieces.len();
        self.pieces.retain(|p| !p.is_empty());
        let dropped = before.saturating_sub(self.pieces.len());
        if dropped > 0 {
            self.rebuild();
        }
        dropped
    }

    /// Fix the grid cell size instead of the default sizing.
    pub fn set_gel_size(&mut self, gel_size: Vec<u32>) {
        self.gel_size = Some(gel_size);
        self.rebuild();
    }

    /// Domain the map is defined over.
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Degree shared by every piece.
    pub const fn degree(&self) -> Degree {
        self.degree
    }

    /// Pieces in order.
    pub fn pieces(&self) -> &[Piece] {
        &self.pieces
    }

    /// Piece at an index.
    pub fn piece(&self, index: usize) -> Option<&Piece> {
        self.pieces.get(index)
    }

    /// Number of pieces.
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Whether the map has no pieces.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// Bounding box of the extents actually covered by pieces.
    pub fn universe(&self) -> &[Interval] {
        &self.universe
    }

    /// The grid index.
    pub const fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Evaluate the map at a grid point.
    ///
    /// The grid cell holding the point supplies the candidates; if none of
    /// them contain the point, every piece is scanned. A point contained by
    /// zero or several pieces is reported as uncovered with value 0.
    pub fn eval_point(&self, point: &[u32]) -> Evaluation {
        let uncovered = Evaluation {
            value: 0.0,
            covered: false,
        };
        let from_cell: Vec<&Piece> = self
            .grid
            .cell_at(point)
            .unwrap_or_default()
            .iter()
            .filter_map(|&ix| self.pieces.get(ix))
            .filter(|p| p.contains(point))
            .collect();
        let hits = if from_cell.is_empty() {
            self.pieces.iter().filter(|p| p.contains(point)).collect()
        } else {
            from_cell
        };
        match hits.as_slice() {
            [piece] => Evaluation {
                value: piece.eval(point),
                covered: true,
            },
            _ => uncovered,
        }
    }

    /// Upper bound on the map's value anywhere inside `query`.
    ///
    /// Never below the true maximum. Negative infinity if no piece is near
    /// the query.
    pub fn cheap_bound(&self, query: &[Interval]) -> f64 {
        self.grid.cheap_bound(query)
    }

    /// Indices of pieces overlapping `query`.
    pub fn candidates(&self, query: &[Interval]) -> Vec<usize> {
        self.grid.candidates(query, &self.pieces)
    }

    /// Largest exact piece maximum, or `None` for an empty map.
    pub fn max_value(&self) -> Option<f64> {
        self.pieces.iter().map(Piece::max_value).reduce(f64::max)
    }

    /// Smallest exact piece minimum, or `None` for an empty map.
    pub fn min_value(&self) -> Option<f64> {
        self.pieces.iter().map(Piece::min_value).reduce(f64::min)
    }

    /// Whether every coefficient of every piece is finite.
    pub fn is_finite(&self) -> bool {
        self.pieces.iter().all(Piece::is_finite)
    }

    /// Affinely rescale so the map spans exactly `[base, base + range]`.
    ///
    /// Does nothing when the map is flat or empty.
    pub fn normalize(&mut self, base: f64, range: f64) {
        let (Some(low), Some(high)) = (self.min_value(), self.max_value()) else {
            return;
        };
        let existing = high - low;
        if existing <= 0.0 || !existing.is_finite() {
            return;
        }
        let factor = range / existing;
        for piece in &mut self.pieces {
            piece.shift(-low);
            piece.scale(factor);
            piece.shift(base);
        }
        self.grid.refresh_bounds(&self.pieces);
    }

    /// Multiply every piece by a priority weight.
    pub fn apply_weight(&mut self, weight: f64) {
        for piece in &mut self.pieces {
            piece.scale(weight);
        }
        self.grid.refresh_bounds(&self.pieces);
    }

    /// Add a constant to every piece.
    pub fn shift(&mut self, delta: f64) {
        for piece in &mut self.pieces {
            piece.shift(delta);
        }
        self.grid.refresh_bounds(&self.pieces);
    }

    /// Re-express the map over a domain containing all of its variables.
    ///
    /// # Errors
    ///
    /// Returns [`MapError::Domain`] if a variable is missing from `to` or
    /// disagrees on bounds.
    pub fn expand_to(&self, to: &Domain) -> Result<Self, MapError> {
        if self.domain == *to {
            return Ok(self.clone());
        }
        self.domain.check_compatible(to)?;
        let pieces = self
            .pieces
            .iter()
            .map(|p| p.expand_to(&self.domain, to))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_pieces(to.clone(), self.degree, pieces)
    }

    fn check(&self, piece: &Piece) -> Result<(), MapError> {
        if piece.dim() != self.domain.size() {
            return Err(MapError::DimensionMismatch {
                expected: self.domain.size(),
                found: piece.dim(),
            });
        }
        if piece.degree() != self.degree {
            return Err(MapError::DegreeMismatch {
                expected: self.degree,
                found: piece.degree(),
            });
        }
        for (dim, (iv, var)) in piece.bounds().iter().zip(self.domain.vars()).enumerate() {
            if iv.hi >= var.points() {
                return Err(MapError::OutOfDomain {
                    dim,
                    hi: iv.hi,
                    points: var.points(),
                });
            }
        }
        Ok(())
    }

    fn rebuild(&mut self) {
        self.universe = self.pieces.first().map_or_else(Vec::new, |first| {
            self.pieces.iter().skip(1).fold(first.bounds().to_vec(), |mut acc, p| {
                for (u, iv) in acc.iter_mut().zip(p.bounds()) {
                    if iv.lo < u.lo {
                        u.lo = iv.lo;
                        u.lo_open = iv.lo_open;
                    }
                    if iv.hi > u.hi {
                        u.hi = iv.hi;
                        u.hi_open = iv.hi_open;
                    }
                }
                acc
            })
        });
        self.grid = Grid::build(&self.domain, &self.pieces, self.gel_size.as_deref());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn speed_domain() -> Domain {
        Domain::new().with_variable("speed", 0.0, 5.0, 6).unwrap()
    }

    /// Tent over `speed` peaking at grid index 2.
    fn tent() -> PiecewiseMap {
        let pieces = vec![
            Piece::new(vec![Interval::closed(0, 2)], Degree::Linear, vec![20.0, 60.0]).unwrap(),
            Piece::new(vec![Interval::closed(3, 5)], Degree::Linear, vec![-20.0, 140.0]).unwrap(),
        ];
        PiecewiseMap::from_pieces(speed_domain(), Degree::Linear, pieces).unwrap()
    }

    #[test]
    fn eval_point_uses_containing_piece() {
        let map = tent();
        let at_peak = map.eval_point(&[2]);
        assert!(at_peak.covered);
        assert!((at_peak.value - 100.0).abs() < 1e-12);
        assert!((map.eval_point(&[5]).value - 40.0).abs() < 1e-12);
    }

    #[test]
    fn gap_is_reported_uncovered() {
        let pieces = vec![Piece::new(vec![Interval::closed(0, 2)], Degree::Constant, vec![1.0]).unwrap()];
        let map = PiecewiseMap::from_pieces(speed_domain(), Degree::Constant, pieces).unwrap();
        let miss = map.eval_point(&[4]);
        assert!(!miss.covered);
        assert!(miss.value.abs() < f64::EPSILON);
    }

    #[test]
    fn push_checks_shape() {
        let mut map = tent();
        assert!(matches!(
            map.push(Piece::new(vec![Interval::closed(0, 6)], Degree::Linear, vec![0.0, 0.0]).unwrap()),
            Err(MapError::OutOfDomain { hi: 6, .. })
        ));
        assert!(matches!(
            map.push(Piece::new(vec![Interval::closed(0, 1)], Degree::Constant, vec![0.0]).unwrap()),
            Err(MapError::DegreeMismatch { .. })
        ));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn normalize_spans_requested_range() {
        let mut map = tent();
        map.normalize(10.0, 50.0);
        assert!((map.min_value().unwrap() - 10.0).abs() < 1e-9);
        assert!((map.max_value().unwrap() - 60.0).abs() < 1e-9);
        assert!((map.eval_point(&[2]).value - 60.0).abs() < 1e-9);
    }

    #[test]
    fn normalize_leaves_flat_maps_alone() {
        let pieces = vec![Piece::new(vec![Interval::closed(0, 5)], Degree::Constant, vec![7.0]).unwrap()];
        let mut map = PiecewiseMap::from_pieces(speed_domain(), Degree::Constant, pieces).unwrap();
        map.normalize(0.0, 100.0);
        assert!((map.max_value().unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn weight_scales_bounds_too() {
        let mut map = tent();
        map.apply_weight(2.0);
        assert!((map.cheap_bound(&[Interval::closed(0, 5)]) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn universe_covers_used_extents() {
        let map = tent();
        assert_eq!(map.universe(), &[Interval::closed(0, 5)]);
        assert_eq!(map.candidates(&[Interval::closed(2, 3)]), vec![0, 1]);
    }

    #[test]
    fn expand_keeps_values_along_new_axis() {
        let wide = Domain::new()
            .with_variable("course", 0.0, 359.0, 360)
            .unwrap()
            .with_variable("speed", 0.0, 5.0, 6)
            .unwrap();
        let expanded = tent().expand_to(&wide).unwrap();
        assert_eq!(expanded.domain().size(), 2);
        assert!((expanded.eval_point(&[123, 2]).value - 100.0).abs() < 1e-12);
        let clash = Domain::new().with_variable("speed", 0.0, 10.0, 6).unwrap();
        assert!(matches!(tent().expand_to(&clash), Err(MapError::Domain { .. })));
    }

    #[test]
    fn remove_empty_drops_pointless_pieces() {
        let mut map = tent();
        map.push(
            Piece::new(
                vec![Interval {
                    lo: 3,
                    hi: 4,
                    lo_open: true,
                    hi_open: true,
                }],
                Degree::Linear,
                vec![0.0, 0.0],
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(map.remove_empty(), 1);
        assert_eq!(map.len(), 2);
        assert!(map.remove(5).is_none());
    }
}
