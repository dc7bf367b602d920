//! Linked sparse matrix and vector storage.

use std::fmt;

use super::Scalar;

/// Index of an element in a [`SparseMatrix`] arena.
///
/// Element ids stay valid until the matrix is cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) usize);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A single nonzero location of a [`SparseMatrix`].
#[derive(Debug, Clone)]
pub struct MatrixElement<T> {
    pub row: usize,
    pub column: usize,
    pub value: T,
    next_in_row: Option<ElementId>,
    prev_in_row: Option<ElementId>,
    next_in_column: Option<ElementId>,
    prev_in_column: Option<ElementId>,
}

impl<T> MatrixElement<T> {
    /// Next element in the same row.
    pub fn right(&self) -> Option<ElementId> {
        self.next_in_row
    }

    /// Previous element in the same row.
    pub fn left(&self) -> Option<ElementId> {
        self.prev_in_row
    }

    /// Next element in the same column.
    pub fn below(&self) -> Option<ElementId> {
        self.next_in_column
    }

    /// Previous element in the same column.
    pub fn above(&self) -> Option<ElementId> {
        self.prev_in_column
    }
}

impl<T: fmt::Display> fmt::Display for MatrixElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}) = {}", self.row, self.column, self.value)
    }
}

/// Sparse matrix with row and column linked lists over an element arena.
///
/// Rows and columns are 1-based; row 0 and column 0 do not exist.
#[derive(Debug, Clone)]
pub struct SparseMatrix<T> {
    elements: Vec<MatrixElement<T>>,
    row_heads: Vec<Option<ElementId>>,
    column_heads: Vec<Option<ElementId>>,
    row_counts: Vec<usize>,
    column_counts: Vec<usize>,
    size: usize,
}

impl<T: Scalar> Default for SparseMatrix<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SparseMatrix<T> {
    /// Create an empty matrix.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            row_heads: vec![None],
            column_heads: vec![None],
            row_counts: vec![0],
            column_counts: vec![0],
            size: 0,
        }
    }

    /// The number of rows (and columns) of the square matrix.
    pub fn size(&self) -> usize {
        self.size
    }

    /// The number of allocated elements.
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Grow the matrix to at least `size` rows and columns.
    pub fn grow(&mut self, size: usize) {
        if size > self.size {
            self.row_heads.resize(size + 1, None);
            self.column_heads.resize(size + 1, None);
            self.row_counts.resize(size + 1, 0);
            self.column_counts.resize(size + 1, 0);
            self.size = size;
        }
    }

    /// Find the element at a location, if it has been allocated.
    pub fn find(&self, row: usize, column: usize) -> Option<ElementId> {
        if row == 0 || column == 0 || row > self.size || column > self.size {
            return None;
        }
        if self.row_counts[row] <= self.column_counts[column] {
            self.row(row).find(|&id| self.elements[id.0].column == column)
        } else {
            self.column(column).find(|&id| self.elements[id.0].row == row)
        }
    }

    /// Find the element at a location, allocating it if necessary.
    ///
    /// # Panics
    /// Panics if `row` or `column` is 0.
    pub fn get_or_create(&mut self, row: usize, column: usize) -> ElementId {
        self.find_or_insert(row, column).0
    }

    /// Like [`Self::get_or_create`], also reporting whether a new element was allocated.
    pub(crate) fn find_or_insert(&mut self, row: usize, column: usize) -> (ElementId, bool) {
        assert!(row > 0 && column > 0, "row and column indices are 1-based");
        if let Some(id) = self.find(row, column) {
            return (id, false);
        }
        self.grow(row.max(column));

        let id = ElementId(self.elements.len());
        let row_head = self.row_heads[row];
        let column_head = self.column_heads[column];
        self.elements.push(MatrixElement {
            row,
            column,
            value: T::zero(),
            next_in_row: row_head,
            prev_in_row: None,
            next_in_column: column_head,
            prev_in_column: None,
        });
        if let Some(head) = row_head {
            self.elements[head.0].prev_in_row = Some(id);
        }
        if let Some(head) = column_head {
            self.elements[head.0].prev_in_column = Some(id);
        }
        self.row_heads[row] = Some(id);
        self.column_heads[column] = Some(id);
        self.row_counts[row] += 1;
        self.column_counts[column] += 1;
        (id, true)
    }

    /// Access an element.
    pub fn element(&self, id: ElementId) -> &MatrixElement<T> {
        &self.elements[id.0]
    }

    /// The value stored in an element.
    pub fn value(&self, id: ElementId) -> T {
        self.elements[id.0].value
    }

    /// Overwrite the value of an element.
    pub fn set(&mut self, id: ElementId, value: T) {
        self.elements[id.0].value = value;
    }

    /// Add to the value of an element.
    pub fn add(&mut self, id: ElementId, value: T) {
        self.elements[id.0].value += value;
    }

    /// Subtract from the value of an element.
    pub fn subtract(&mut self, id: ElementId, value: T) {
        self.elements[id.0].value -= value;
    }

    /// The value at a location, zero if nothing is allocated there.
    pub fn get(&self, row: usize, column: usize) -> T {
        self.find(row, column)
            .map(|id| self.value(id))
            .unwrap_or_else(T::zero)
    }

    /// Number of allocated elements in a row.
    pub fn row_count(&self, row: usize) -> usize {
        self.row_counts.get(row).copied().unwrap_or(0)
    }

    /// Number of allocated elements in a column.
    pub fn column_count(&self, column: usize) -> usize {
        self.column_counts.get(column).copied().unwrap_or(0)
    }

    /// Iterate over the elements of a row.
    pub fn row(&self, row: usize) -> Walk<'_, T> {
        Walk {
            matrix: self,
            current: self.row_heads.get(row).copied().flatten(),
            along_row: true,
        }
    }

    /// Iterate over the elements of a column.
    pub fn column(&self, column: usize) -> Walk<'_, T> {
        Walk {
            matrix: self,
            current: self.column_heads.get(column).copied().flatten(),
            along_row: false,
        }
    }

    /// Zero every value, keeping the structure.
    pub fn reset(&mut self) {
        for element in &mut self.elements {
            element.value = T::zero();
        }
    }

    /// Drop every element and shrink to size 0.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Copy the matrix into a dense row-major representation (1-based rows and columns).
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::zero(); self.size + 1]; self.size + 1];
        for element in &self.elements {
            dense[element.row][element.column] = element.value;
        }
        dense
    }
}

/// Iterator following the row or column links of a [`SparseMatrix`].
pub struct Walk<'a, T> {
    matrix: &'a SparseMatrix<T>,
    current: Option<ElementId>,
    along_row: bool,
}

impl<T> Iterator for Walk<'_, T> {
    type Item = ElementId;

    fn next(&mut self) -> Option<ElementId> {
        let id = self.current?;
        let element = &self.matrix.elements[id.0];
        self.current = if self.along_row {
            element.next_in_row
        } else {
            element.next_in_column
        };
        Some(id)
    }
}

/// Dense-backed right-hand side vector with 1-based rows.
#[derive(Debug, Clone)]
pub struct SparseVector<T> {
    values: Vec<T>,
}

impl<T: Scalar> Default for SparseVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> SparseVector<T> {
    /// Create an empty vector.
    pub fn new() -> Self {
        Self {
            values: vec![T::zero()],
        }
    }

    /// The number of rows.
    pub fn len(&self) -> usize {
        self.values.len() - 1
    }

    /// Whether the vector has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow the vector to at least `size` rows.
    pub fn grow(&mut self, size: usize) {
        if size > self.len() {
            self.values.resize(size + 1, T::zero());
        }
    }

    /// Make sure a row exists and return it.
    pub fn get_or_create(&mut self, row: usize) -> usize {
        assert!(row > 0, "vector rows are 1-based");
        self.grow(row);
        row
    }

    /// The value at a row, zero if out of range.
    pub fn value(&self, row: usize) -> T {
        self.values.get(row).copied().unwrap_or_else(T::zero)
    }

    /// Add to a row.
    pub fn add(&mut self, row: usize, value: T) {
        self.values[row] += value;
    }

    /// Overwrite a row.
    pub fn set(&mut self, row: usize, value: T) {
        self.values[row] = value;
    }

    /// Zero every value, keeping the size.
    pub fn reset(&mut self) {
        self.values.fill(T::zero());
    }

    /// Drop every row.
    pub fn clear(&mut self) {
        self.values.truncate(1);
        self.values[0] = T::zero();
    }

    /// The values including the unused ground slot at index 0.
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }
}
