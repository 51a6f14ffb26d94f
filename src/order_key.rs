//! Lexicographically comparable classpath precedence keys.
use std::fmt;

/// Width used to zero-pad a single positional component. Four digits supports up to 9999
/// siblings at any one level, comfortably larger than any real manifest `Class-Path` list
/// or top-level classpath.
const COMPONENT_WIDTH: usize = 4;

/// A dotted, zero-padded ordering string defining classpath precedence: lower sorts first.
///
/// `OrderKey`s form a forest: a key derived from a parent is always strictly greater than
/// the parent and strictly less than any sibling with a higher positional index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct OrderKey(String);

impl OrderKey {
    /// The key for the `index`-th top-level classpath entry.
    pub fn root(index: usize) -> Self {
        OrderKey(format!("{:0width$}", index, width = COMPONENT_WIDTH))
    }

    /// Derives the key for the `index`-th child of this key (e.g. the `index`-th entry of a
    /// manifest `Class-Path` expanded from the archive this key identifies).
    pub fn child(&self, index: usize) -> Self {
        OrderKey(format!("{}.{:0width$}", self.0, index, width = COMPONENT_WIDTH))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_keys_sort_by_index() {
        let mut keys = vec![OrderKey::root(3), OrderKey::root(1), OrderKey::root(2)];
        keys.sort();
        assert_eq!(keys, vec![OrderKey::root(1), OrderKey::root(2), OrderKey::root(3)]);
    }

    #[test]
    fn child_sorts_between_parent_and_next_sibling() {
        let parent = OrderKey::root(1);
        let next_sibling = OrderKey::root(2);
        let child = parent.child(0);
        assert!(parent < child);
        assert!(child < next_sibling);
    }

    #[test]
    fn children_sort_by_their_own_index() {
        let parent = OrderKey::root(0);
        let mut children = vec![parent.child(2), parent.child(0), parent.child(1)];
        children.sort();
        assert_eq!(children, vec![parent.child(0), parent.child(1), parent.child(2)]);
    }

    proptest::proptest! {
        #[test]
        fn root_order_matches_index_order(a in 0usize..500, b in 0usize..500) {
            proptest::prop_assert_eq!(a.cmp(&b), OrderKey::root(a).cmp(&OrderKey::root(b)));
        }

        #[test]
        fn any_child_sorts_strictly_between_its_parent_and_the_next_sibling(
            parent_index in 0usize..500,
            child_index in 0usize..500,
        ) {
            let parent = OrderKey::root(parent_index);
            let next_sibling = OrderKey::root(parent_index + 1);
            let child = parent.child(child_index);
            proptest::prop_assert!(parent < child);
            proptest::prop_assert!(child < next_sibling);
        }
    }
}
