//! Sparse linear algebra for circuit equations.
//!
//! This module provides the numerical engine the rest of the crate is built on.
//!
//! ## Storage
//!
//! [`SparseMatrix`] keeps every nonzero in an arena. Each element is linked
//! into a doubly linked list for its row and one for its column, so neighbors
//! are found in O(1) and new locations can be allocated at any time.
//!
//! ## Factorization
//!
//! [`SparseSolver`] orders and factors the matrix in place using a
//! Markowitz pivot search with a relative magnitude gate:
//!
//! ```text
//! cost(a_ij) = (row_nnz(i) - 1) * (col_nnz(j) - 1)
//! admissible(a_ij) = |a_ij| >= rel_threshold * max_k |a_ik|
//! ```
//!
//! The chosen pivots are remembered, so later factorizations of a matrix with
//! the same structure skip the search entirely.
//!
//! ## Indices
//!
//! External indices are 1-based. Index 0 is the ground reference and is never
//! stored; handles that touch it are no-ops.

mod handles;
mod permutation;
mod solver;
mod sparse;

use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

use num_complex::Complex64;

pub use handles::{
    BranchStamp, ConductanceStamp, CurrentStamp, MatrixHandle, RhsHandle, StampBuffer, StampSink,
};
pub use permutation::Translation;
pub use solver::{
    ObserverId, PivotConfig, ReducedEquation, SolverEvent, SolverView, SparseSolver,
};
pub use sparse::{ElementId, MatrixElement, SparseMatrix, SparseVector};

/// Default relative pivot threshold.
pub const DEFAULT_REL_THRESHOLD: f64 = 1e-3;

/// Default absolute pivot threshold.
pub const DEFAULT_ABS_THRESHOLD: f64 = 0.0;

/// Numeric type that can be stored in a [`SparseSolver`].
pub trait Scalar:
    Copy
    + Default
    + PartialEq
    + fmt::Debug
    + fmt::Display
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
{
    /// The additive identity.
    fn zero() -> Self {
        Self::default()
    }

    /// The multiplicative identity.
    fn one() -> Self;

    /// Magnitude used for pivot selection.
    fn magnitude(&self) -> f64;
}

impl Scalar for f64 {
    fn one() -> Self {
        1.0
    }

    fn magnitude(&self) -> f64 {
        self.abs()
    }
}

impl Scalar for Complex64 {
    fn one() -> Self {
        Complex64::new(1.0, 0.0)
    }

    // 1-norm, cheaper than the modulus and equivalent for pivoting purposes
    fn magnitude(&self) -> f64 {
        self.re.abs() + self.im.abs()
    }
}
