//! Markowitz-ordered sparse LU solver.

use std::mem;

use log::{debug, trace, warn};

use super::{
    ElementId, MatrixHandle, RhsHandle, Scalar, SparseMatrix, SparseVector, Translation,
    DEFAULT_ABS_THRESHOLD, DEFAULT_REL_THRESHOLD,
};
use crate::error::{NodalError, Result};

/// Pivot admission thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotConfig {
    /// A candidate must be at least this fraction of the largest candidate in its row.
    pub rel_threshold: f64,
    /// A candidate must be strictly larger than this magnitude.
    pub abs_threshold: f64,
}

impl Default for PivotConfig {
    fn default() -> Self {
        Self {
            rel_threshold: DEFAULT_REL_THRESHOLD,
            abs_threshold: DEFAULT_ABS_THRESHOLD,
        }
    }
}

/// Phase boundaries observers are notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverEvent {
    BeforeOrderAndFactor,
    AfterOrderAndFactor,
    BeforeFactor,
    AfterFactor,
    BeforeSolve,
    AfterSolve,
    BeforeSolveTransposed,
    AfterSolveTransposed,
}

/// Identifier returned by [`SparseSolver::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(usize);

/// Read-only view of a solver handed to observers.
pub struct SolverView<'a, T> {
    matrix: &'a SparseMatrix<T>,
    rhs: &'a SparseVector<T>,
    rows: &'a Translation,
    columns: &'a Translation,
}

impl<T: Scalar> SolverView<'_, T> {
    /// The matrix in external numbering.
    pub fn matrix(&self) -> &SparseMatrix<T> {
        self.matrix
    }

    /// The right-hand side in external numbering.
    pub fn rhs(&self) -> &SparseVector<T> {
        self.rhs
    }

    /// The value at an internal (permuted) location.
    pub fn permuted_value(&self, row: usize, column: usize) -> T {
        self.matrix
            .get(self.rows.to_external(row), self.columns.to_external(column))
    }

    /// The right-hand side at an internal (permuted) row.
    pub fn permuted_rhs(&self, row: usize) -> T {
        self.rhs.value(self.rows.to_external(row))
    }

    /// Map an internal location to an external one.
    pub fn internal_to_external(&self, (row, column): (usize, usize)) -> (usize, usize) {
        (self.rows.to_external(row), self.columns.to_external(column))
    }
}

type Observer<T> = Box<dyn FnMut(SolverEvent, &SolverView<'_, T>) + Send>;

/// An equation left unreduced by partial elimination.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedEquation<T> {
    /// External row index.
    pub row: usize,
    /// Right-hand side after forward elimination.
    pub rhs: T,
    /// Remaining coefficients as (external column, value).
    pub entries: Vec<(usize, T)>,
}

/// Sparse solver owning a matrix, a right-hand side and their permutations.
///
/// The solver is single-writer: all ordering, factoring and solving happens
/// on the thread that owns it.
pub struct SparseSolver<T: Scalar> {
    matrix: SparseMatrix<T>,
    rhs: SparseVector<T>,
    rows: Translation,
    columns: Translation,
    size: usize,
    /// Number of elimination steps, `None` for all of them.
    order: Option<usize>,
    /// Pivot element per elimination step (index 0 unused).
    pivots: Vec<Option<ElementId>>,
    factored: bool,
    needs_reordering: bool,
    config: PivotConfig,
    intermediate: Vec<T>,
    pivot_row: Vec<(usize, T)>,
    pivot_column: Vec<ElementId>,
    observers: Vec<(ObserverId, Observer<T>)>,
    next_observer: usize,
}

impl<T: Scalar> Default for SparseSolver<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> std::fmt::Debug for SparseSolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseSolver")
            .field("size", &self.size)
            .field("elements", &self.matrix.element_count())
            .field("order", &self.order)
            .field("factored", &self.factored)
            .finish()
    }
}

impl<T: Scalar> SparseSolver<T> {
    /// Create an empty solver with default pivot thresholds.
    pub fn new() -> Self {
        Self::with_config(PivotConfig::default())
    }

    /// Create an empty solver with custom pivot thresholds.
    pub fn with_config(config: PivotConfig) -> Self {
        Self {
            matrix: SparseMatrix::new(),
            rhs: SparseVector::new(),
            rows: Translation::new(),
            columns: Translation::new(),
            size: 0,
            order: None,
            pivots: Vec::new(),
            factored: false,
            needs_reordering: true,
            config,
            intermediate: Vec::new(),
            pivot_row: Vec::new(),
            pivot_column: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    /// The pivot thresholds.
    pub fn config(&self) -> PivotConfig {
        self.config
    }

    /// The matrix in external numbering.
    pub fn matrix(&self) -> &SparseMatrix<T> {
        &self.matrix
    }

    /// The right-hand side in external numbering.
    pub fn rhs(&self) -> &SparseVector<T> {
        &self.rhs
    }

    /// Number of equations.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the last factorization succeeded and values have not been reset since.
    pub fn is_factored(&self) -> bool {
        self.factored
    }

    /// Whether the next [`Self::factor`] call will perform a full pivot search.
    pub fn needs_reordering(&self) -> bool {
        self.needs_reordering
    }

    /// Force the next factorization to search for pivots again.
    pub fn request_reordering(&mut self) {
        self.needs_reordering = true;
    }

    /// Number of elimination steps that will be performed.
    pub fn order(&self) -> usize {
        self.order.map_or(self.size, |order| order.min(self.size))
    }

    /// Limit elimination to the leading `order` equations, or all of them for `None`.
    ///
    /// The remaining equations are left unreduced; see [`Self::reduced_equations`].
    pub fn set_order(&mut self, order: Option<usize>) {
        self.order = order;
        self.needs_reordering = true;
    }

    /// Move the given external variables (rows and columns) to the end of the
    /// elimination order and limit elimination to the others.
    ///
    /// Must be called after the final size of the system is known.
    pub fn defer(&mut self, externals: &[usize]) {
        if let Some(&largest) = externals.iter().max() {
            self.ensure_size(largest);
        }
        let size = self.size;
        for (offset, &external) in externals.iter().rev().enumerate() {
            let target = size - offset;
            let row = self.rows.to_internal(external);
            self.rows.swap(row, target);
            let column = self.columns.to_internal(external);
            self.columns.swap(column, target);
        }
        self.set_order(Some(size - externals.len()));
    }

    /// Grow the system to at least `size` equations.
    pub fn ensure_size(&mut self, size: usize) {
        if size > self.size {
            self.size = size;
            self.matrix.grow(size);
            self.rhs.grow(size);
            self.rows.grow(size);
            self.columns.grow(size);
            self.needs_reordering = true;
        }
    }

    /// Resolve a matrix location to a handle, allocating it if necessary.
    ///
    /// Locations in row or column 0 (ground) resolve to [`MatrixHandle::GROUND`].
    pub fn get_or_create_element(&mut self, row: usize, column: usize) -> MatrixHandle {
        if row == 0 || column == 0 {
            return MatrixHandle::GROUND;
        }
        self.ensure_size(row.max(column));
        let (id, created) = self.matrix.find_or_insert(row, column);
        if created {
            self.needs_reordering = true;
        }
        MatrixHandle::new(Some(id))
    }

    /// Find a matrix location without allocating it.
    pub fn find_element(&self, row: usize, column: usize) -> Option<ElementId> {
        self.matrix.find(row, column)
    }

    /// Resolve a right-hand side row to a handle.
    pub fn get_or_create_rhs(&mut self, row: usize) -> RhsHandle {
        if row == 0 {
            return RhsHandle::GROUND;
        }
        self.ensure_size(row);
        RhsHandle::new(Some(self.rhs.get_or_create(row)))
    }

    pub(crate) fn add_to_element_value(&mut self, id: ElementId, value: T) {
        self.matrix.add(id, value);
    }

    pub(crate) fn add_to_rhs_value(&mut self, row: usize, value: T) {
        self.rhs.add(row, value);
    }

    /// Zero all values, keeping the structure and the pivot order.
    pub fn reset(&mut self) {
        self.matrix.reset();
        self.rhs.reset();
        self.factored = false;
    }

    /// Drop all structure, permutations and pivots.
    pub fn clear(&mut self) {
        self.matrix.clear();
        self.rhs.clear();
        self.rows = Translation::new();
        self.columns = Translation::new();
        self.size = 0;
        self.order = None;
        self.pivots.clear();
        self.factored = false;
        self.needs_reordering = true;
    }

    /// Map an internal (row, column) pair to external numbering.
    pub fn internal_to_external(&self, (row, column): (usize, usize)) -> (usize, usize) {
        (self.rows.to_external(row), self.columns.to_external(column))
    }

    /// Map an external (row, column) pair to internal numbering.
    pub fn external_to_internal(&self, (row, column): (usize, usize)) -> (usize, usize) {
        (self.rows.to_internal(row), self.columns.to_internal(column))
    }

    /// Register an observer that is called synchronously at every phase boundary.
    ///
    /// Observers only get read access; they cannot change solver state.
    pub fn subscribe<F>(&mut self, observer: F) -> ObserverId
    where
        F: FnMut(SolverEvent, &SolverView<'_, T>) + Send + 'static,
    {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    /// Remove a previously registered observer.
    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(other, _)| *other != id);
        self.observers.len() != before
    }

    fn notify(&mut self, event: SolverEvent) {
        if self.observers.is_empty() {
            return;
        }
        let mut observers = mem::take(&mut self.observers);
        let view = SolverView {
            matrix: &self.matrix,
            rhs: &self.rhs,
            rows: &self.rows,
            columns: &self.columns,
        };
        for (_, observer) in observers.iter_mut() {
            observer(event, &view);
        }
        self.observers = observers;
    }

    /// Search for a pivot order and factor the matrix.
    pub fn order_and_factor(&mut self) -> Result<()> {
        self.notify(SolverEvent::BeforeOrderAndFactor);
        let result = self.eliminate(true);
        self.notify(SolverEvent::AfterOrderAndFactor);
        result
    }

    /// Factor the matrix reusing the previous pivot order.
    ///
    /// Falls back to a pivot search from the first step whose stored pivot
    /// has become unacceptable, and to a full [`Self::order_and_factor`] when
    /// the structure changed since the last ordering.
    pub fn factor(&mut self) -> Result<()> {
        if self.needs_reordering || self.pivots.len() != self.order() + 1 {
            return self.order_and_factor();
        }
        self.notify(SolverEvent::BeforeFactor);
        let result = self.eliminate(false);
        self.notify(SolverEvent::AfterFactor);
        result
    }

    fn eliminate(&mut self, mut search: bool) -> Result<()> {
        self.factored = false;
        let order = self.order();
        self.pivots.resize(order + 1, None);

        for step in 1..=order {
            let pivot = match self.pivots[step] {
                Some(pivot) if !search && self.is_acceptable(pivot, step) => pivot,
                _ => {
                    if !search {
                        warn!("pivot at step {step} is no longer acceptable, reordering");
                        search = true;
                    }
                    self.search_pivot(step)?
                }
            };
            self.move_to_diagonal(pivot, step);
            self.pivots[step] = Some(pivot);
            self.eliminate_step(pivot, step)?;
        }

        if search {
            debug!(
                "ordered {} of {} equations ({} elements)",
                order,
                self.size,
                self.matrix.element_count()
            );
        }
        self.needs_reordering = false;
        self.factored = true;
        Ok(())
    }

    fn is_acceptable(&self, pivot: ElementId, step: usize) -> bool {
        let magnitude = self.matrix.value(pivot).magnitude();
        if magnitude == 0.0 || magnitude <= self.config.abs_threshold {
            return false;
        }
        let order = self.order();
        let row = self.matrix.element(pivot).row;
        let largest = self
            .matrix
            .row(row)
            .filter(|&id| {
                let column = self.columns.to_internal(self.matrix.element(id).column);
                column >= step && column <= order
            })
            .map(|id| self.matrix.value(id).magnitude())
            .fold(0.0, f64::max);
        magnitude >= self.config.rel_threshold * largest
    }

    /// Markowitz search over the unreduced leading block.
    ///
    /// Ties on the Markowitz product go to the smallest internal row, then
    /// the smallest internal column.
    fn search_pivot(&self, step: usize) -> Result<ElementId> {
        let order = self.order();
        let size = self.size;

        let mut column_counts = vec![0usize; size + 1];
        for (internal, count) in column_counts.iter_mut().enumerate().skip(step) {
            let column = self.columns.to_external(internal);
            *count = self
                .matrix
                .column(column)
                .filter(|&id| self.rows.to_internal(self.matrix.element(id).row) >= step)
                .count();
        }

        let mut best: Option<(usize, usize, usize, ElementId)> = None;
        for internal_row in step..=order {
            let row = self.rows.to_external(internal_row);
            let mut row_count = 0usize;
            let mut largest = 0.0f64;
            for id in self.matrix.row(row) {
                let column = self.columns.to_internal(self.matrix.element(id).column);
                if column < step {
                    continue;
                }
                row_count += 1;
                if column <= order {
                    largest = largest.max(self.matrix.value(id).magnitude());
                }
            }
            if largest == 0.0 || largest <= self.config.abs_threshold {
                continue;
            }

            let gate = self.config.rel_threshold * largest;
            for id in self.matrix.row(row) {
                let column = self.columns.to_internal(self.matrix.element(id).column);
                if column < step || column > order {
                    continue;
                }
                let magnitude = self.matrix.value(id).magnitude();
                if magnitude == 0.0 || magnitude < gate || magnitude <= self.config.abs_threshold {
                    continue;
                }
                let product = (row_count - 1) * (column_counts[column].saturating_sub(1));
                let key = (product, internal_row, column);
                if best.map_or(true, |(p, r, c, _)| key < (p, r, c)) {
                    best = Some((product, internal_row, column, id));
                }
            }
        }

        match best {
            Some((product, _, _, id)) => {
                trace!("step {step}: pivot {} (markowitz {product})", self.matrix.element(id));
                Ok(id)
            }
            None => Err(NodalError::singular(self.singular_row(step))),
        }
    }

    /// Pick the external row to blame when no pivot is admissible.
    ///
    /// Rows without any element in the unreduced block are preferred; among
    /// equals the smallest external index wins.
    fn singular_row(&self, step: usize) -> usize {
        let order = self.order();
        let mut blame: Option<(bool, usize)> = None;
        for internal_row in step..=order {
            let row = self.rows.to_external(internal_row);
            let has_structure = self.matrix.row(row).any(|id| {
                let column = self.columns.to_internal(self.matrix.element(id).column);
                column >= step && column <= order
            });
            let key = (has_structure, row);
            if blame.map_or(true, |other| key < other) {
                blame = Some(key);
            }
        }
        blame.map_or(0, |(_, row)| row)
    }

    fn move_to_diagonal(&mut self, pivot: ElementId, step: usize) {
        let element = self.matrix.element(pivot);
        let (row, column) = (element.row, element.column);
        let internal_row = self.rows.to_internal(row);
        self.rows.swap(internal_row, step);
        let internal_column = self.columns.to_internal(column);
        self.columns.swap(internal_column, step);
    }

    fn eliminate_step(&mut self, pivot: ElementId, step: usize) -> Result<()> {
        let element = self.matrix.element(pivot);
        let (pivot_row, pivot_column) = (element.row, element.column);
        let pivot_value = element.value;
        if pivot_value.magnitude() == 0.0 {
            return Err(NodalError::singular(pivot_row));
        }

        let mut upper = mem::take(&mut self.pivot_row);
        let mut lower = mem::take(&mut self.pivot_column);
        upper.clear();
        lower.clear();
        for id in self.matrix.row(pivot_row) {
            let element = self.matrix.element(id);
            if self.columns.to_internal(element.column) > step {
                upper.push((element.column, element.value));
            }
        }
        for id in self.matrix.column(pivot_column) {
            if self.rows.to_internal(self.matrix.element(id).row) > step {
                lower.push(id);
            }
        }

        for &id in &lower {
            let multiplier = self.matrix.value(id) / pivot_value;
            self.matrix.set(id, multiplier);
            let row = self.matrix.element(id).row;
            // Fill-ins are created even for zero multipliers so the structure
            // stays identical across refactorizations.
            for &(column, value) in &upper {
                let (target, _) = self.matrix.find_or_insert(row, column);
                self.matrix.subtract(target, multiplier * value);
            }
        }

        self.pivot_row = upper;
        self.pivot_column = lower;
        Ok(())
    }

    fn pivot(&self, step: usize) -> Result<ElementId> {
        self.pivots
            .get(step)
            .copied()
            .flatten()
            .ok_or(NodalError::NotFactored)
    }

    fn check_solvable(&self, solution: &[T]) -> Result<()> {
        if !self.factored {
            return Err(NodalError::NotFactored);
        }
        if solution.len() <= self.size {
            return Err(NodalError::InvalidSolverOperation {
                message: format!(
                    "solution vector has {} entries, {} required",
                    solution.len(),
                    self.size + 1
                ),
            });
        }
        Ok(())
    }

    /// Forward-eliminate the right-hand side through the first `order` pivots.
    fn forward(&self, intermediate: &mut [T], order: usize) -> Result<()> {
        for step in 1..=order {
            let value = intermediate[step];
            if value == T::zero() {
                continue;
            }
            let column = self.matrix.element(self.pivot(step)?).column;
            for id in self.matrix.column(column) {
                let element = self.matrix.element(id);
                let row = self.rows.to_internal(element.row);
                if row > step {
                    intermediate[row] -= element.value * value;
                }
            }
        }
        Ok(())
    }

    fn load_intermediate(&mut self) -> Vec<T> {
        let mut intermediate = mem::take(&mut self.intermediate);
        intermediate.clear();
        intermediate.resize(self.size + 1, T::zero());
        for (internal, slot) in intermediate.iter_mut().enumerate().skip(1) {
            *slot = self.rhs.value(self.rows.to_external(internal));
        }
        intermediate
    }

    /// Solve the factored system for the current right-hand side.
    ///
    /// `solution` is indexed by external variable and must have `size + 1`
    /// entries; entry 0 is set to zero. When elimination was limited by an
    /// order, the unreduced variables are not solved for: their values are
    /// read from `solution` and used to back-substitute the others.
    pub fn solve(&mut self, solution: &mut [T]) -> Result<()> {
        self.check_solvable(solution)?;
        self.notify(SolverEvent::BeforeSolve);

        let order = self.order();
        let size = self.size;
        let mut x = self.load_intermediate();
        let result = self.forward(&mut x, order).and_then(|()| {
            for step in (1..=size).rev() {
                if step > order {
                    x[step] = solution[self.columns.to_external(step)];
                    continue;
                }
                let pivot = self.pivot(step)?;
                let mut accumulated = x[step];
                for id in self.matrix.row(self.matrix.element(pivot).row) {
                    let element = self.matrix.element(id);
                    let column = self.columns.to_internal(element.column);
                    if column > step {
                        accumulated -= element.value * x[column];
                    }
                }
                x[step] = accumulated / self.matrix.value(pivot);
            }
            Ok(())
        });

        if result.is_ok() {
            for (internal, &value) in x.iter().enumerate().skip(1) {
                solution[self.columns.to_external(internal)] = value;
            }
            solution[0] = T::zero();
        }
        self.intermediate = x;
        self.notify(SolverEvent::AfterSolve);
        result
    }

    /// Solve the transposed system using the existing factorization.
    ///
    /// The right-hand side is read per column and `solution` is written per row.
    pub fn solve_transposed(&mut self, solution: &mut [T]) -> Result<()> {
        self.check_solvable(solution)?;
        if self.order() < self.size {
            return Err(NodalError::InvalidSolverOperation {
                message: "transposed solve requires a complete factorization".to_string(),
            });
        }
        self.notify(SolverEvent::BeforeSolveTransposed);

        let size = self.size;
        let mut z = mem::take(&mut self.intermediate);
        z.clear();
        z.resize(size + 1, T::zero());
        for (internal, slot) in z.iter_mut().enumerate().skip(1) {
            *slot = self.rhs.value(self.columns.to_external(internal));
        }

        let result = (|| -> Result<()> {
            // U^T is lower triangular
            for step in 1..=size {
                let pivot = self.pivot(step)?;
                z[step] = z[step] / self.matrix.value(pivot);
                let value = z[step];
                for id in self.matrix.row(self.matrix.element(pivot).row) {
                    let element = self.matrix.element(id);
                    let column = self.columns.to_internal(element.column);
                    if column > step {
                        z[column] -= element.value * value;
                    }
                }
            }
            // L^T is unit upper triangular
            for step in (1..=size).rev() {
                let pivot = self.pivot(step)?;
                let mut accumulated = z[step];
                for id in self.matrix.column(self.matrix.element(pivot).column) {
                    let element = self.matrix.element(id);
                    let row = self.rows.to_internal(element.row);
                    if row > step {
                        accumulated -= element.value * z[row];
                    }
                }
                z[step] = accumulated;
            }
            Ok(())
        })();

        if result.is_ok() {
            for (internal, &value) in z.iter().enumerate().skip(1) {
                solution[self.rows.to_external(internal)] = value;
            }
            solution[0] = T::zero();
        }
        self.intermediate = z;
        self.notify(SolverEvent::AfterSolveTransposed);
        result
    }

    /// The equations left unreduced by a partial factorization.
    ///
    /// After eliminating the leading `order` equations, the trailing block of
    /// the matrix holds the Schur complement and the forward-eliminated
    /// right-hand side holds the matching reduced excitation.
    pub fn reduced_equations(&mut self) -> Result<Vec<ReducedEquation<T>>> {
        if !self.factored {
            return Err(NodalError::NotFactored);
        }
        let order = self.order();
        let mut intermediate = self.load_intermediate();
        let result = self.forward(&mut intermediate, order).map(|()| {
            (order + 1..=self.size)
                .map(|internal| {
                    let row = self.rows.to_external(internal);
                    let entries = self
                        .matrix
                        .row(row)
                        .filter_map(|id| {
                            let element = self.matrix.element(id);
                            (self.columns.to_internal(element.column) > order)
                                .then_some((element.column, element.value))
                        })
                        .collect();
                    ReducedEquation {
                        row,
                        rhs: intermediate[internal],
                        entries,
                    }
                })
                .collect()
        });
        self.intermediate = intermediate;
        result
    }

    /// Check the leading `order` block for structural singularity.
    ///
    /// Returns the external row that cannot be matched to any column, i.e.
    /// the block is singular no matter what values get stamped.
    pub fn structural_deficiency(&self) -> Option<usize> {
        let order = self.order();
        let mut matched: Vec<Option<usize>> = vec![None; order + 1];
        for internal_row in 1..=order {
            let mut visited = vec![false; order + 1];
            if !self.augment(internal_row, order, &mut visited, &mut matched) {
                return Some(self.rows.to_external(internal_row));
            }
        }
        None
    }

    fn augment(
        &self,
        internal_row: usize,
        order: usize,
        visited: &mut [bool],
        matched: &mut [Option<usize>],
    ) -> bool {
        let row = self.rows.to_external(internal_row);
        for id in self.matrix.row(row) {
            let column = self.columns.to_internal(self.matrix.element(id).column);
            if column == 0 || column > order || visited[column] {
                continue;
            }
            visited[column] = true;
            let free = match matched[column] {
                None => true,
                Some(other) => self.augment(other, order, visited, matched),
            };
            if free {
                matched[column] = Some(internal_row);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64;
    use std::sync::{Arc, Mutex};

    fn load(solver: &mut SparseSolver<f64>, matrix: &[&[f64]], rhs: &[f64]) {
        for (r, row) in matrix.iter().enumerate() {
            for (c, &value) in row.iter().enumerate() {
                if value != 0.0 {
                    let handle = solver.get_or_create_element(r + 1, c + 1);
                    handle.add(solver, value);
                }
            }
        }
        for (r, &value) in rhs.iter().enumerate() {
            let handle = solver.get_or_create_rhs(r + 1);
            handle.add(solver, value);
        }
    }

    fn dense_solve(matrix: &[&[f64]], rhs: &[f64]) -> Vec<f64> {
        let n = rhs.len();
        let mut a: Vec<Vec<f64>> = matrix.iter().map(|r| r.to_vec()).collect();
        let mut b = rhs.to_vec();
        for k in 0..n {
            let p = (k..n)
                .max_by(|&i, &j| a[i][k].abs().total_cmp(&a[j][k].abs()))
                .unwrap();
            a.swap(k, p);
            b.swap(k, p);
            for i in k + 1..n {
                let m = a[i][k] / a[k][k];
                for j in k..n {
                    a[i][j] -= m * a[k][j];
                }
                b[i] -= m * b[k];
            }
        }
        let mut x = vec![0.0; n];
        for k in (0..n).rev() {
            let s: f64 = (k + 1..n).map(|j| a[k][j] * x[j]).sum();
            x[k] = (b[k] - s) / a[k][k];
        }
        x
    }

    #[test]
    fn test_factor_solve_matches_dense() {
        let matrix: [&[f64]; 4] = [
            &[4.0, -1.0, 0.0, 2.0],
            &[-1.0, 0.0, 3.0, 0.0],
            &[0.0, 5.0, -2.0, 1.0],
            &[1.0, 0.0, 0.0, 3.0],
        ];
        let rhs = [1.0, -2.0, 3.0, 4.0];
        let mut solver = SparseSolver::new();
        load(&mut solver, &matrix, &rhs);
        solver.order_and_factor().unwrap();
        let mut x = vec![0.0; 5];
        solver.solve(&mut x).unwrap();

        let expected = dense_solve(&matrix, &rhs);
        for (i, value) in expected.iter().enumerate() {
            assert_abs_diff_eq!(x[i + 1], *value, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_refactor_reuses_pivots() {
        let matrix: [&[f64]; 3] = [&[2.0, 1.0, 0.0], &[1.0, 3.0, 1.0], &[0.0, 1.0, 4.0]];
        let rhs = [1.0, 2.0, 3.0];
        let mut solver = SparseSolver::new();
        load(&mut solver, &matrix, &rhs);
        solver.order_and_factor().unwrap();
        assert!(!solver.needs_reordering());

        // Same structure, scaled values: fast path must give the scaled answer
        solver.reset();
        let scaled: Vec<Vec<f64>> = matrix.iter().map(|r| r.iter().map(|v| v * 2.0).collect()).collect();
        let scaled_refs: Vec<&[f64]> = scaled.iter().map(|r| r.as_slice()).collect();
        load(&mut solver, &scaled_refs, &rhs);
        assert!(!solver.needs_reordering());
        solver.factor().unwrap();
        let mut x = vec![0.0; 4];
        solver.solve(&mut x).unwrap();
        let expected = dense_solve(&scaled_refs, &rhs);
        for (i, value) in expected.iter().enumerate() {
            assert_abs_diff_eq!(x[i + 1], *value, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_factor_falls_back_when_pivot_vanishes() {
        let mut solver = SparseSolver::new();
        load(&mut solver, &[&[1.0, 1.0], &[1.0, 2.0]], &[3.0, 5.0]);
        solver.order_and_factor().unwrap();

        // The old (1,1) pivot becomes zero
        solver.reset();
        load(&mut solver, &[&[0.0, 1.0], &[1.0, 2.0]], &[3.0, 5.0]);
        let stale = solver.find_element(1, 1).unwrap();
        assert_eq!(solver.matrix().value(stale), 0.0);
        solver.factor().unwrap();
        let mut x = vec![0.0; 3];
        solver.solve(&mut x).unwrap();
        assert_abs_diff_eq!(x[1], -1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[2], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_permutation_round_trip() {
        let mut solver = SparseSolver::new();
        load(
            &mut solver,
            &[&[0.0, 0.0, 1.0], &[1.0, 1.0, 1.0], &[2.0, 0.0, 0.0]],
            &[1.0, 1.0, 1.0],
        );
        solver.order_and_factor().unwrap();
        for r in 0..=3 {
            for c in 0..=3 {
                let internal = solver.external_to_internal((r, c));
                assert_eq!(solver.internal_to_external(internal), (r, c));
            }
        }
    }

    #[test]
    fn test_singular_floating_row() {
        let mut solver = SparseSolver::new();
        // Variable 2 is never stamped
        load(&mut solver, &[&[1.0, 0.0, -1.0], &[0.0, 0.0, 0.0], &[-1.0, 0.0, 2.0]], &[0.0, 0.0, 1.0]);
        solver.get_or_create_rhs(2);
        assert_eq!(solver.size(), 3);
        let err = solver.order_and_factor().unwrap_err();
        assert_eq!(err, NodalError::SingularMatrix { index: Some(2) });
        let mut x = vec![0.0; 4];
        assert_eq!(solver.solve(&mut x).unwrap_err(), NodalError::NotFactored);
    }

    #[test]
    fn test_markowitz_prefers_sparse_pivot() {
        // Row/column 1 is dense (arrow matrix); eliminating it first would fill everything
        let matrix: [&[f64]; 4] = [
            &[10.0, 1.0, 1.0, 1.0],
            &[1.0, 10.0, 0.0, 0.0],
            &[1.0, 0.0, 10.0, 0.0],
            &[1.0, 0.0, 0.0, 10.0],
        ];
        let mut solver = SparseSolver::new();
        load(&mut solver, &matrix, &[1.0; 4]);
        let before = solver.matrix().element_count();
        solver.order_and_factor().unwrap();
        assert_eq!(solver.matrix().element_count(), before, "no fill-in expected");
        assert_ne!(solver.internal_to_external((1, 1)), (1, 1));
    }

    #[test]
    fn test_transposed_solve() {
        let matrix: [&[f64]; 3] = [&[3.0, 1.0, 0.0], &[0.0, 2.0, 1.0], &[1.0, 0.0, 4.0]];
        let transposed: [&[f64]; 3] = [&[3.0, 0.0, 1.0], &[1.0, 2.0, 0.0], &[0.0, 1.0, 4.0]];
        let rhs = [1.0, 2.0, 3.0];
        let mut solver = SparseSolver::new();
        load(&mut solver, &matrix, &rhs);
        solver.order_and_factor().unwrap();
        let mut x = vec![0.0; 4];
        solver.solve_transposed(&mut x).unwrap();
        let expected = dense_solve(&transposed, &rhs);
        for (i, value) in expected.iter().enumerate() {
            assert_abs_diff_eq!(x[i + 1], *value, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_partial_elimination_gives_schur_complement() {
        // [2 -1 0; -1 2 -1; 0 -1 1] with variable 1 deferred
        let mut solver = SparseSolver::new();
        load(&mut solver, &[&[2.0, -1.0, 0.0], &[-1.0, 2.0, -1.0], &[0.0, -1.0, 1.0]], &[1.0, 0.0, 0.0]);
        solver.defer(&[1]);
        assert_eq!(solver.order(), 2);
        assert_eq!(solver.structural_deficiency(), None);
        solver.order_and_factor().unwrap();

        let reduced = solver.reduced_equations().unwrap();
        assert_eq!(reduced.len(), 1);
        assert_eq!(reduced[0].row, 1);
        assert_eq!(reduced[0].entries.len(), 1);
        // 2 - [-1 0] * inv([2 -1; -1 1]) * [-1; 0] = 2 - 1 = 1
        assert_abs_diff_eq!(reduced[0].entries[0].1, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(reduced[0].rhs, 1.0, epsilon = 1e-12);

        // Back-substitute with the deferred variable known
        let mut x = vec![0.0, 1.0, 0.0, 0.0];
        solver.solve(&mut x).unwrap();
        assert_abs_diff_eq!(x[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[2], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[3], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_structural_deficiency_detects_missing_diagonal_block() {
        // Branch equation only couples to the deferred pin: no internal pivot exists
        let mut solver = SparseSolver::<f64>::new();
        solver.get_or_create_element(1, 2);
        solver.get_or_create_element(2, 1);
        solver.defer(&[1]);
        assert_eq!(solver.structural_deficiency(), Some(2));
    }

    #[test]
    fn test_observers_see_every_phase() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut solver = SparseSolver::new();
        let sink = Arc::clone(&events);
        let id = solver.subscribe(move |event, view: &SolverView<'_, f64>| {
            let _ = view.permuted_value(1, 1);
            sink.lock().unwrap().push(event);
        });
        load(&mut solver, &[&[2.0]], &[4.0]);
        solver.order_and_factor().unwrap();
        solver.factor().unwrap();
        let mut x = vec![0.0; 2];
        solver.solve(&mut x).unwrap();
        solver.solve_transposed(&mut x).unwrap();
        assert!(solver.unsubscribe(id));
        solver.solve(&mut x).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                SolverEvent::BeforeOrderAndFactor,
                SolverEvent::AfterOrderAndFactor,
                SolverEvent::BeforeFactor,
                SolverEvent::AfterFactor,
                SolverEvent::BeforeSolve,
                SolverEvent::AfterSolve,
                SolverEvent::BeforeSolveTransposed,
                SolverEvent::AfterSolveTransposed,
            ]
        );
    }

    #[test]
    fn test_complex_solve() {
        let j = Complex64::new(0.0, 1.0);
        let mut solver = SparseSolver::<Complex64>::new();
        let a = solver.get_or_create_element(1, 1);
        let b = solver.get_or_create_element(1, 2);
        let c = solver.get_or_create_element(2, 1);
        let d = solver.get_or_create_element(2, 2);
        let r = solver.get_or_create_rhs(1);
        a.add(&mut solver, Complex64::new(1.0, 0.0) + j);
        b.add(&mut solver, -Complex64::new(1.0, 0.0));
        c.add(&mut solver, -Complex64::new(1.0, 0.0));
        d.add(&mut solver, Complex64::new(2.0, 0.0));
        r.add(&mut solver, Complex64::new(1.0, 0.0));
        solver.order_and_factor().unwrap();
        let mut x = vec![Complex64::default(); 3];
        solver.solve(&mut x).unwrap();
        // Residual check: A x = b
        let r1 = (Complex64::new(1.0, 0.0) + j) * x[1] - x[2];
        let r2 = -x[1] + Complex64::new(2.0, 0.0) * x[2];
        assert_abs_diff_eq!(r1.re, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r1.im, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r2.norm(), 0.0, epsilon = 1e-12);
    }
}
