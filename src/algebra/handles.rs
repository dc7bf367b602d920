//! Element handles: pre-resolved references into a solver.
//!
//! A behavior resolves the locations it stamps once, at bind time, and keeps
//! the handles. Loading then only adds values through a [`StampSink`], which
//! is either the solver itself or a [`StampBuffer`] that is replayed later.
//!
//! Handles that touch the ground reference resolve to nothing and silently
//! drop their contributions.

use super::{ElementId, Scalar, SparseSolver};

/// Destination for stamped values.
pub trait StampSink<T> {
    /// Add a value to a matrix element.
    fn add_to_element(&mut self, id: ElementId, value: T);

    /// Add a value to a right-hand side row.
    fn add_to_rhs(&mut self, row: usize, value: T);
}

impl<T: Scalar> StampSink<T> for SparseSolver<T> {
    fn add_to_element(&mut self, id: ElementId, value: T) {
        self.add_to_element_value(id, value);
    }

    fn add_to_rhs(&mut self, row: usize, value: T) {
        self.add_to_rhs_value(row, value);
    }
}

/// A recorded list of contributions, replayed into another sink in order.
#[derive(Debug, Clone, Default)]
pub struct StampBuffer<T> {
    elements: Vec<(ElementId, T)>,
    rhs: Vec<(usize, T)>,
}

impl<T: Scalar> StampBuffer<T> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
            rhs: Vec::new(),
        }
    }

    /// Number of recorded contributions.
    pub fn len(&self) -> usize {
        self.elements.len() + self.rhs.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replay every contribution into `sink` and empty the buffer.
    pub fn drain_into(&mut self, sink: &mut dyn StampSink<T>) {
        for (id, value) in self.elements.drain(..) {
            sink.add_to_element(id, value);
        }
        for (row, value) in self.rhs.drain(..) {
            sink.add_to_rhs(row, value);
        }
    }
}

impl<T: Scalar> StampSink<T> for StampBuffer<T> {
    fn add_to_element(&mut self, id: ElementId, value: T) {
        self.elements.push((id, value));
    }

    fn add_to_rhs(&mut self, row: usize, value: T) {
        self.rhs.push((row, value));
    }
}

/// Handle to a single matrix location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixHandle(Option<ElementId>);

impl MatrixHandle {
    /// A handle that touches the ground reference.
    pub const GROUND: MatrixHandle = MatrixHandle(None);

    pub fn new(id: Option<ElementId>) -> Self {
        Self(id)
    }

    /// The element this handle resolves to.
    pub fn id(&self) -> Option<ElementId> {
        self.0
    }

    pub fn is_ground(&self) -> bool {
        self.0.is_none()
    }

    #[inline]
    pub fn add<T>(&self, sink: &mut dyn StampSink<T>, value: T) {
        if let Some(id) = self.0 {
            sink.add_to_element(id, value);
        }
    }

    #[inline]
    pub fn subtract<T: Scalar>(&self, sink: &mut dyn StampSink<T>, value: T) {
        self.add(sink, -value);
    }
}

/// Handle to a single right-hand side row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RhsHandle(Option<usize>);

impl RhsHandle {
    /// A handle that touches the ground reference.
    pub const GROUND: RhsHandle = RhsHandle(None);

    pub fn new(row: Option<usize>) -> Self {
        Self(row)
    }

    pub fn row(&self) -> Option<usize> {
        self.0
    }

    #[inline]
    pub fn add<T>(&self, sink: &mut dyn StampSink<T>, value: T) {
        if let Some(row) = self.0 {
            sink.add_to_rhs(row, value);
        }
    }

    #[inline]
    pub fn subtract<T: Scalar>(&self, sink: &mut dyn StampSink<T>, value: T) {
        self.add(sink, -value);
    }
}

/// Four-corner stamp of a two-terminal admittance between `pos` and `neg`.
///
/// ```text
///        pos   neg
/// pos  [ +g    -g ]
/// neg  [ -g    +g ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConductanceStamp {
    pub pos_pos: MatrixHandle,
    pub pos_neg: MatrixHandle,
    pub neg_pos: MatrixHandle,
    pub neg_neg: MatrixHandle,
}

impl ConductanceStamp {
    /// Resolve the four corners between two external indices.
    pub fn new<T: Scalar>(solver: &mut SparseSolver<T>, pos: usize, neg: usize) -> Self {
        Self {
            pos_pos: solver.get_or_create_element(pos, pos),
            pos_neg: solver.get_or_create_element(pos, neg),
            neg_pos: solver.get_or_create_element(neg, pos),
            neg_neg: solver.get_or_create_element(neg, neg),
        }
    }

    #[inline]
    pub fn add<T: Scalar>(&self, sink: &mut dyn StampSink<T>, g: T) {
        self.pos_pos.add(sink, g);
        self.neg_neg.add(sink, g);
        self.pos_neg.add(sink, -g);
        self.neg_pos.add(sink, -g);
    }
}

/// Current injection into a pair of nodes.
///
/// A positive value flows out of `pos` through the element into `neg`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentStamp {
    pub pos: RhsHandle,
    pub neg: RhsHandle,
}

impl CurrentStamp {
    pub fn new<T: Scalar>(solver: &mut SparseSolver<T>, pos: usize, neg: usize) -> Self {
        Self {
            pos: solver.get_or_create_rhs(pos),
            neg: solver.get_or_create_rhs(neg),
        }
    }

    #[inline]
    pub fn add<T: Scalar>(&self, sink: &mut dyn StampSink<T>, current: T) {
        self.pos.add(sink, -current);
        self.neg.add(sink, current);
    }
}

/// Incidence stamp of a branch current variable between two nodes.
///
/// ```text
///        pos   neg   br
/// pos  [             +1 ]
/// neg  [             -1 ]
/// br   [ +1    -1       ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BranchStamp {
    pub pos_branch: MatrixHandle,
    pub neg_branch: MatrixHandle,
    pub branch_pos: MatrixHandle,
    pub branch_neg: MatrixHandle,
}

impl BranchStamp {
    pub fn new<T: Scalar>(solver: &mut SparseSolver<T>, pos: usize, neg: usize, branch: usize) -> Self {
        Self {
            pos_branch: solver.get_or_create_element(pos, branch),
            neg_branch: solver.get_or_create_element(neg, branch),
            branch_pos: solver.get_or_create_element(branch, pos),
            branch_neg: solver.get_or_create_element(branch, neg),
        }
    }

    #[inline]
    pub fn add<T: Scalar>(&self, sink: &mut dyn StampSink<T>) {
        let one = T::one();
        self.pos_branch.add(sink, one);
        self.neg_branch.add(sink, -one);
        self.branch_pos.add(sink, one);
        self.branch_neg.add(sink, -one);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conductance_stamp_distribution() {
        let mut solver = SparseSolver::<f64>::new();
        let stamp = ConductanceStamp::new(&mut solver, 1, 2);
        stamp.add(&mut solver, 0.5);
        let m = solver.matrix();
        assert_eq!(m.get(1, 1), 0.5);
        assert_eq!(m.get(2, 2), 0.5);
        assert_eq!(m.get(1, 2), -0.5);
        assert_eq!(m.get(2, 1), -0.5);
    }

    #[test]
    fn test_ground_handles_drop_contributions() {
        let mut solver = SparseSolver::<f64>::new();
        let stamp = ConductanceStamp {
            pos_pos: solver.get_or_create_element(1, 1),
            pos_neg: solver.get_or_create_element(1, 0),
            neg_pos: solver.get_or_create_element(0, 1),
            neg_neg: solver.get_or_create_element(0, 0),
        };
        assert!(stamp.neg_neg.is_ground());
        stamp.add(&mut solver, 2.0);
        assert_eq!(solver.matrix().element_count(), 1);
        assert_eq!(solver.matrix().get(1, 1), 2.0);
    }

    #[test]
    fn test_branch_stamp_incidence() {
        let mut solver = SparseSolver::<f64>::new();
        let stamp = BranchStamp::new(&mut solver, 1, 0, 2);
        stamp.add(&mut solver);
        assert_eq!(solver.matrix().get(1, 2), 1.0);
        assert_eq!(solver.matrix().get(2, 1), 1.0);
        assert!(stamp.neg_branch.is_ground());
        assert_eq!(solver.matrix().element_count(), 2);
    }

    #[test]
    fn test_buffer_replays_in_order() {
        let mut solver = SparseSolver::<f64>::new();
        let handle = solver.get_or_create_element(1, 1);
        let rhs = solver.get_or_create_rhs(1);
        let mut buffer = StampBuffer::new();
        handle.add(&mut buffer, 1.0);
        handle.add(&mut buffer, 2.0);
        rhs.add(&mut buffer, 3.0);
        assert_eq!(buffer.len(), 3);
        buffer.drain_into(&mut solver);
        assert!(buffer.is_empty());
        assert_eq!(solver.matrix().get(1, 1), 3.0);
        assert_eq!(solver.rhs().value(1), 3.0);
    }
}
