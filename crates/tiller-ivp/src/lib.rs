//! Interval programming model for the Tiller decision engine.
//!
//! A behavior expresses its preference over the decision space as a
//! piecewise-defined function. This crate holds everything needed to
//! represent, ship, and combine such functions:
//!
//! # Modules
//!
//! - [`domain`] -- Named, discretized decision axes ([`Domain`]).
//! - [`piece`] -- Axis-aligned boxes carrying a low-degree polynomial ([`Piece`]).
//! - [`grid`] -- Coarse spatial index over the pieces of a map ([`Grid`]).
//! - [`map`] -- Partition of a domain into pieces ([`PiecewiseMap`]).
//! - [`function`] -- Weighted, labeled piecewise map ([`ObjectiveFunction`]).
//! - [`codec`] -- Text wire format and packetizing for objective functions.
//! - [`solver`] -- Branch-and-bound search over a set of objective functions.
//! - [`text`] -- Number formatting shared by the domain text form and the codec.

pub mod codec;
pub mod domain;
pub mod function;
pub mod grid;
pub mod map;
pub mod piece;
pub mod solver;
pub mod text;

pub use codec::CodecError;
pub use domain::{Domain, DomainError, DomainVar, Snap};
pub use function::ObjectiveFunction;
pub use grid::Grid;
pub use map::{Evaluation, MapError, PiecewiseMap};
pub use piece::{Degree, Interval, Piece, PieceError};
pub use solver::{
    Compactor, MaxCorner, Solution, SolveError, SolveStats, Solver, SolverSettings,
};
