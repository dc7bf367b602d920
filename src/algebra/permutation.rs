//! Row and column permutations between external and internal numbering.

/// A bijection between external (user-assigned) indices and internal
/// (elimination-order) indices.
///
/// Index 0 always maps to itself. Indices beyond the tracked range map to
/// themselves as well.
#[derive(Debug, Clone)]
pub struct Translation {
    int_to_ext: Vec<usize>,
    ext_to_int: Vec<usize>,
}

impl Default for Translation {
    fn default() -> Self {
        Self::new()
    }
}

impl Translation {
    /// Create an empty (identity) translation.
    pub fn new() -> Self {
        Self {
            int_to_ext: vec![0],
            ext_to_int: vec![0],
        }
    }

    /// Number of tracked indices.
    pub fn len(&self) -> usize {
        self.int_to_ext.len() - 1
    }

    /// Whether no index is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Extend the translation with identity entries up to `size`.
    pub fn grow(&mut self, size: usize) {
        for index in self.len() + 1..=size {
            self.int_to_ext.push(index);
            self.ext_to_int.push(index);
        }
    }

    /// Map an internal index to its external index.
    pub fn to_external(&self, internal: usize) -> usize {
        self.int_to_ext.get(internal).copied().unwrap_or(internal)
    }

    /// Map an external index to its internal index.
    pub fn to_internal(&self, external: usize) -> usize {
        self.ext_to_int.get(external).copied().unwrap_or(external)
    }

    /// Swap two internal positions.
    pub fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let (ext_a, ext_b) = (self.int_to_ext[a], self.int_to_ext[b]);
        self.int_to_ext.swap(a, b);
        self.ext_to_int[ext_a] = b;
        self.ext_to_int[ext_b] = a;
    }

    /// Restore the identity mapping.
    pub fn reset(&mut self) {
        let size = self.len();
        *self = Self::new();
        self.grow(size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_is_a_bijection() {
        let mut t = Translation::new();
        t.grow(4);
        t.swap(1, 3);
        t.swap(3, 4);
        for ext in 0..=4 {
            assert_eq!(t.to_external(t.to_internal(ext)), ext);
        }
        assert_eq!(t.to_external(1), 3);
        assert_eq!(t.to_internal(1), 4);
    }

    #[test]
    fn test_reset_restores_identity() {
        let mut t = Translation::new();
        t.grow(3);
        t.swap(1, 2);
        t.reset();
        assert_eq!(t.len(), 3);
        assert!((0..=3).all(|i| t.to_internal(i) == i));
    }
}
