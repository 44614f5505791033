//! Coarse spatial index over the pieces of a piecewise map.
//!
//! The domain is cut into equally sized cells ("gels"). Each cell records
//! the indices of every piece whose box overlaps it, plus an upper bound on
//! the utility of those pieces. Queries by box only visit the cells the box
//! touches, so lookups cost O(pieces in region) rather than O(pieces).
//!
//! The per-cell bound is the max of [`Piece::max_value`] over the cell's
//! pieces. A box query returns the max bound over the cells it touches,
//! which can only over-estimate the true max inside the box.

use crate::domain::Domain;
use crate::piece::{Interval, Piece};

/// Upper limit on the number of cells picked by the default sizing.
const MAX_DEFAULT_CELLS: u64 = 40_000;

/// One grid cell.
#[derive(Debug, Clone)]
struct Cell {
    /// Indices of pieces overlapping the cell.
    pieces: Vec<usize>,
    /// Max of the pieces' exact maxima, or negative infinity when empty.
    bound: f64,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            pieces: Vec::new(),
            bound: f64::NEG_INFINITY,
        }
    }
}

/// Spatial index mapping grid cells to candidate piece indices.
#[derive(Debug, Clone)]
pub struct Grid {
    /// Grid points per cell along each dimension.
    gel_size: Vec<u32>,
    /// Cells along each dimension.
    cells_per_dim: Vec<u32>,
    /// Row-major stride of each dimension.
    strides: Vec<usize>,
    cells: Vec<Cell>,
}

impl Grid {
    /// Default cell size per dimension for a map of `piece_count` pieces.
    ///
    /// Aims for about four pieces per cell, with at least two cells per
    /// dimension and at most 40,000 cells overall.
    pub fn default_gel_size(domain: &Domain, piece_count: usize) -> Vec<u32> {
        let dim = domain.size();
        let Ok(dim_exp) = u32::try_from(dim) else {
            return domain.vars().iter().map(|v| v.points().max(1)).collect();
        };
        if dim == 0 {
            return Vec::new();
        }
        let floor = 2_u64.saturating_pow(dim_exp).min(MAX_DEFAULT_CELLS);
        let wanted = u64::try_from(piece_count / 4).unwrap_or(u64::MAX);
        let target = wanted.clamp(floor, MAX_DEFAULT_CELLS);

        let mut edge: u64 = 1;
        while edge
            .saturating_add(1)
            .checked_pow(dim_exp)
            .is_some_and(|cells| cells <= target)
        {
            edge = edge.saturating_add(1);
        }
        let edge = u32::try_from(edge).unwrap_or(u32::MAX);

        domain
            .vars()
            .iter()
            .map(|v| clamp_gel(v.points().div_ceil(edge), v.points()))
            .collect()
    }

    /// Build the index for `pieces` over `domain`.
    ///
    /// `gel_size` overrides the default cell sizing. Sizes are clamped to
    /// `[2, points]` per dimension.
    pub fn build(domain: &Domain, pieces: &[Piece], gel_size: Option<&[u32]>) -> Self {
        let gel_size: Vec<u32> = match gel_size {
            Some(sizes) if sizes.len() == domain.size() => domain
                .vars()
                .iter()
                .zip(sizes)
                .map(|(v, &s)| clamp_gel(s, v.points()))
                .collect(),
            _ => Self::default_gel_size(domain, pieces.len()),
        };
        let cells_per_dim: Vec<u32> = domain
            .vars()
            .iter()
            .zip(&gel_size)
            .map(|(v, &s)| v.points().div_ceil(s.max(1)).max(1))
            .collect();

        let mut strides = Vec::with_capacity(cells_per_dim.len());
        let mut total: usize = 1;
        for &n in &cells_per_dim {
            strides.push(total);
            total = total.saturating_mul(n as usize);
        }

        let mut grid = Self {
            gel_size,
            cells_per_dim,
            strides,
            cells: vec![Cell::default(); total],
        };
        for (ix, piece) in pieces.iter().enumerate() {
            grid.insert(ix, piece);
        }
        grid
    }

    /// Grid points per cell along each dimension.
    pub fn gel_size(&self) -> &[u32] {
        &self.gel_size
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    /// Upper bound on the utility of any piece overlapping `query`.
    ///
    /// Returns negative infinity if no piece overlaps the touched cells.
    pub fn cheap_bound(&self, query: &[Interval]) -> f64 {
        let Some(span) = self.span(query) else {
            return f64::NEG_INFINITY;
        };
        let mut bound = f64::NEG_INFINITY;
        self.for_each_cell(&span, |cell| bound = bound.max(cell.bound));
        bound
    }

    /// Indices of pieces whose boxes overlap `query`, in ascending order.
    pub fn candidates(&self, query: &[Interval], pieces: &[Piece]) -> Vec<usize> {
        let Some(span) = self.span(query) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        self.for_each_cell(&span, |cell| found.extend_from_slice(&cell.pieces));
        found.sort_unstable();
        found.dedup();
        found.retain(|&ix| pieces.get(ix).is_some_and(|p| p.overlaps_bounds(query)));
        found
    }

    /// Piece indices registered in the cell holding `point`.
    pub fn cell_at(&self, point: &[u32]) -> Option<&[usize]> {
        if point.len() != self.gel_size.len() {
            return None;
        }
        let cursor: Vec<u32> = point
            .iter()
            .zip(&self.gel_size)
            .map(|(&p, &s)| p.checked_div(s).unwrap_or(0))
            .collect();
        self.offset(&cursor)
            .and_then(|ix| self.cells.get(ix))
            .map(|cell| cell.pieces.as_slice())
    }

    /// Recompute every cell bound after piece values changed.
    pub fn refresh_bounds(&mut self, pieces: &[Piece]) {
        for cell in &mut self.cells {
            cell.bound = cell
                .pieces
                .iter()
                .filter_map(|&ix| pieces.get(ix))
                .map(Piece::max_value)
                .fold(f64::NEG_INFINITY, f64::max);
        }
    }

    /// Register one piece in every cell its box touches.
    fn insert(&mut self, ix: usize, piece: &Piece) {
        let Some(span) = self.span(piece.bounds()) else {
            return;
        };
        let value = piece.max_value();
        let mut offsets = Vec::new();
        self.for_each_offset(&span, |offset| offsets.push(offset));
        for offset in offsets {
            if let Some(cell) = self.cells.get_mut(offset) {
                cell.pieces.push(ix);
                cell.bound = cell.bound.max(value);
            }
        }
    }

    /// Cell index range `(first, last)` per dimension covered by `query`.
    fn span(&self, query: &[Interval]) -> Option<Vec<(u32, u32)>> {
        if query.len() != self.gel_size.len() {
            return None;
        }
        query
            .iter()
            .zip(self.gel_size.iter().zip(&self.cells_per_dim))
            .map(|(iv, (&size, &count))| {
                let (lo, hi) = iv.effective()?;
                let last = count.saturating_sub(1);
                let first = lo.checked_div(size)?.min(last);
                Some((first, hi.checked_div(size)?.min(last)))
            })
            .collect()
    }

    fn for_each_cell<F: FnMut(&Cell)>(&self, span: &[(u32, u32)], mut visit: F) {
        self.for_each_offset(span, |offset| {
            if let Some(cell) = self.cells.get(offset) {
                visit(cell);
            }
        });
    }

    /// Walk every cell offset in `span` in row-major order.
    fn for_each_offset<F: FnMut(usize)>(&self, span: &[(u32, u32)], mut visit: F) {
        let mut cursor: Vec<u32> = span.iter().map(|&(first, _)| first).collect();
        loop {
            if let Some(offset) = self.offset(&cursor) {
                visit(offset);
            }
            if !advance(&mut cursor, span) {
                break;
            }
        }
    }

    fn offset(&self, cursor: &[u32]) -> Option<usize> {
        cursor
            .iter()
            .zip(&self.strides)
            .try_fold(0_usize, |acc, (&c, &stride)| {
                (c as usize)
                    .checked_mul(stride)
                    .and_then(|step| acc.checked_add(step))
            })
    }
}

/// Step an odometer cursor through `span`. Returns `false` once every
/// combination has been visited.
fn advance(cursor: &mut [u32], span: &[(u32, u32)]) -> bool {
    for (c, &(first, last)) in cursor.iter_mut().zip(span) {
        if *c < last {
            *c = c.saturating_add(1);
            return true;
        }
        *c = first;
    }
    false
}

/// Clamp a cell size to `[2, points]`, or to 1 for single-point axes.
fn clamp_gel(size: u32, points: u32) -> u32 {
    size.clamp(2.min(points), points.max(1))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::piece::Degree;

    fn strip_pieces(points: u32, width: u32) -> (Domain, Vec<Piece>) {
        let domain = Domain::new()
            .with_variable("x", 0.0, f64::from(points - 1), points)
            .unwrap();
        let pieces = (0..points)
            .step_by(width as usize)
            .map(|lo| {
                let hi = (lo + width - 1).min(points - 1);
                Piece::new(
                    vec![Interval::closed(lo, hi)],
                    Degree::Constant,
                    vec![f64::from(lo)],
                )
                .unwrap()
            })
            .collect();
        (domain, pieces)
    }

    #[test]
    fn default_sizing_targets_four_pieces_per_cell() {
        let domain = Domain::new()
            .with_variable("course", 0.0, 359.0, 360)
            .unwrap()
            .with_variable("speed", 0.0, 5.0, 51)
            .unwrap();
        // 400 pieces -> 100 cells -> 10 per edge.
        let sizes = Grid::default_gel_size(&domain, 400);
        assert_eq!(sizes, vec![36, 6]);
        // Few pieces still get two cells per dimension.
        let sizes = Grid::default_gel_size(&domain, 3);
        assert_eq!(sizes, vec![180, 26]);
    }

    #[test]
    fn candidates_only_visit_overlapping_pieces() {
        let (domain, pieces) = strip_pieces(100, 10);
        let grid = Grid::build(&domain, &pieces, None);
        let found = grid.candidates(&[Interval::closed(25, 41)], &pieces);
        assert_eq!(found, vec![2, 3, 4]);
    }

    #[test]
    fn cheap_bound_never_below_true_max() {
        let (domain, pieces) = strip_pieces(100, 10);
        let grid = Grid::build(&domain, &pieces, Some(&[16]));
        let bound = grid.cheap_bound(&[Interval::closed(0, 35)]);
        assert!(bound >= 30.0);
        assert!(grid.cheap_bound(&[Interval::closed(90, 99)]) >= 90.0);
    }

    #[test]
    fn cell_lookup_finds_covering_piece() {
        let (domain, pieces) = strip_pieces(50, 5);
        let grid = Grid::build(&domain, &pieces, Some(&[8]));
        let cell = grid.cell_at(&[17]).unwrap();
        assert!(cell.contains(&3));
        assert_eq!(grid.gel_size(), &[8]);
        assert_eq!(grid.cell_count(), 7);
    }

    #[test]
    fn refresh_tracks_rescaled_pieces() {
        let (domain, mut pieces) = strip_pieces(20, 5);
        let mut grid = Grid::build(&domain, &pieces, Some(&[5]));
        for p in &mut pieces {
            p.scale(-1.0);
        }
        grid.refresh_bounds(&pieces);
        let bound = grid.cheap_bound(&[Interval::closed(15, 19)]);
        assert!((bound + 15.0).abs() < 1e-12);
    }
}
