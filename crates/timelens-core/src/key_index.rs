#![forbid(unsafe_code)]

//! Hierarchical key index: a prefix tree over ordered key sequences.
//!
//! A [`KeyIndex`] maps a path (`&[K]`) to a leaf value. Each interior level is
//! an insertion-ordered map from one path segment to either a leaf or a nested
//! index, so enumeration follows the order in which keys were first written.
//!
//! # Invariants
//!
//! 1. No empty interior node is ever retained: deleting or clearing the last
//!    entry of a nested index removes that index from its parent, recursively.
//! 2. The root itself may be empty; it is never pruned.
//! 3. A segment maps to exactly one node. Writing a longer path through an
//!    existing leaf replaces that leaf with a nested index.
//!
//! # Failure Modes
//!
//! - **Empty path on write**: `set(&[], ..)` has no slot to write into and is
//!   ignored (returns `None`).
//! - **Path through a leaf on read**: reads and deletes that would need to
//!   descend through a leaf report "absent" rather than panicking.

use std::hash::Hash;

use indexmap::IndexMap;

/// A single entry in a [`KeyIndex`]: a leaf value or a nested index.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<K: Hash + Eq, V> {
    /// Terminal value stored at a full path.
    Leaf(V),
    /// Nested index holding longer paths that share this prefix.
    Branch(KeyIndex<K, V>),
}

impl<K: Hash + Eq, V> Node<K, V> {
    /// The leaf value, if this node is a leaf.
    #[must_use]
    pub fn as_leaf(&self) -> Option<&V> {
        match self {
            Self::Leaf(v) => Some(v),
            Self::Branch(_) => None,
        }
    }

    /// The nested index, if this node is a branch.
    #[must_use]
    pub fn as_branch(&self) -> Option<&KeyIndex<K, V>> {
        match self {
            Self::Leaf(_) => None,
            Self::Branch(b) => Some(b),
        }
    }
}

/// Prefix tree keyed by ordered segment sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyIndex<K: Hash + Eq, V> {
    entries: IndexMap<K, Node<K, V>>,
}

impl<K: Hash + Eq, V> Default for KeyIndex<K, V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }
}

impl<K: Hash + Eq + Clone, V> KeyIndex<K, V> {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of direct children at the root level.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the root holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of leaves in the whole tree.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.entries
            .values()
            .map(|node| match node {
                Node::Leaf(_) => 1,
                Node::Branch(b) => b.leaf_count(),
            })
            .sum()
    }

    /// Leaf value stored at `path`, if any.
    ///
    /// Returns `None` for the empty path, for missing paths, and for paths
    /// that end on a nested index rather than a leaf.
    #[must_use]
    pub fn get(&self, path: &[K]) -> Option<&V> {
        self.node(path).and_then(Node::as_leaf)
    }

    /// Mutable access to the leaf value stored at `path`.
    pub fn get_mut(&mut self, path: &[K]) -> Option<&mut V> {
        let (last, prefix) = path.split_last()?;
        let mut current = self;
        for seg in prefix {
            current = match current.entries.get_mut(seg)? {
                Node::Branch(b) => b,
                Node::Leaf(_) => return None,
            };
        }
        match current.entries.get_mut(last)? {
            Node::Leaf(v) => Some(v),
            Node::Branch(_) => None,
        }
    }

    /// Node stored at `path` (leaf or nested index).
    #[must_use]
    pub fn node(&self, path: &[K]) -> Option<&Node<K, V>> {
        let (last, prefix) = path.split_last()?;
        self.subtree(prefix)?.entries.get(last)
    }

    /// Nested index rooted at `path`. The empty path yields the root.
    #[must_use]
    pub fn subtree(&self, path: &[K]) -> Option<&KeyIndex<K, V>> {
        let mut current = self;
        for seg in path {
            current = current.entries.get(seg)?.as_branch()?;
        }
        Some(current)
    }

    /// Whether anything (leaf or nested index) exists at `path`.
    ///
    /// The empty path always exists.
    #[must_use]
    pub fn has(&self, path: &[K]) -> bool {
        match path.split_last() {
            None => true,
            Some((last, prefix)) => self
                .subtree(prefix)
                .is_some_and(|sub| sub.entries.contains_key(last)),
        }
    }

    /// Direct child segments of the index at `path`, in insertion order.
    ///
    /// Yields nothing when `path` is missing or ends on a leaf.
    pub fn keys<'a>(&'a self, path: &[K]) -> impl Iterator<Item = &'a K> + use<'a, K, V> {
        self.subtree(path)
            .into_iter()
            .flat_map(|sub| sub.entries.keys())
    }

    /// Store `value` at `path`, creating intermediate indexes as needed.
    ///
    /// Returns the previous leaf value at exactly that path.
    pub fn set(&mut self, path: &[K], value: V) -> Option<V> {
        let (last, prefix) = path.split_last()?;
        let mut current = self;
        for seg in prefix {
            let node = current
                .entries
                .entry(seg.clone())
                .or_insert_with(|| Node::Branch(KeyIndex::new()));
            if let Node::Leaf(_) = node {
                *node = Node::Branch(KeyIndex::new());
            }
            let Node::Branch(b) = node else {
                return None;
            };
            current = b;
        }
        match current.entries.insert(last.clone(), Node::Leaf(value)) {
            Some(Node::Leaf(old)) => Some(old),
            _ => None,
        }
    }

    /// Remove whatever is stored at `path`, pruning emptied ancestors.
    ///
    /// Returns the removed node. Deleting a missing path is a no-op.
    pub fn delete(&mut self, path: &[K]) -> Option<Node<K, V>> {
        let (first, rest) = path.split_first()?;
        if rest.is_empty() {
            return self.entries.shift_remove(first);
        }
        let Node::Branch(child) = self.entries.get_mut(first)? else {
            return None;
        };
        let removed = child.delete(rest);
        if removed.is_some() && child.is_empty() {
            self.entries.shift_remove(first);
        }
        removed
    }

    /// Remove every entry under `path`, pruning emptied ancestors.
    ///
    /// Clearing the empty path empties the whole index. Clearing a path that
    /// ends on a leaf is a no-op.
    pub fn clear(&mut self, path: &[K]) {
        if path.is_empty() {
            self.entries.clear();
            return;
        }
        if matches!(self.node(path), Some(Node::Branch(_))) {
            self.delete(path);
        }
    }

    /// Every leaf under `path` with its full path, depth first, in insertion
    /// order.
    #[must_use]
    pub fn leaves(&self, path: &[K]) -> Vec<(Vec<K>, &V)> {
        let mut out = Vec::new();
        if let Some(sub) = self.subtree(path) {
            let mut prefix = path.to_vec();
            sub.collect_leaves(&mut prefix, &mut out);
        }
        out
    }

    fn collect_leaves<'a>(&'a self, prefix: &mut Vec<K>, out: &mut Vec<(Vec<K>, &'a V)>) {
        for (seg, node) in &self.entries {
            prefix.push(seg.clone());
            match node {
                Node::Leaf(v) => out.push((prefix.clone(), v)),
                Node::Branch(b) => b.collect_leaves(prefix, out),
            }
            prefix.pop();
        }
    }
}

impl<K: Hash + Eq + Clone, V> FromIterator<(Vec<K>, V)> for KeyIndex<K, V> {
    fn from_iter<I: IntoIterator<Item = (Vec<K>, V)>>(iter: I) -> Self {
        let mut index = Self::new();
        for (path, value) in iter {
            index.set(&path, value);
        }
        index
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KeyIndex<&'static str, &'static str> {
        [
            (vec!["1", "1.1"], "Test"),
            (vec!["2", "2.1"], "Test"),
            (vec!["2", "2.2"], "Test"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn get_leaf_and_branch() {
        let index = sample();
        assert_eq!(index.get(&["1", "1.1"]), Some(&"Test"));
        assert_eq!(index.get(&["2", "2.2"]), Some(&"Test"));
        assert_eq!(index.get(&["1"]), None);
        assert!(index.node(&["1"]).and_then(Node::as_branch).is_some());
        assert_eq!(index.get(&[]), None);
        assert_eq!(index.subtree(&[]).map(KeyIndex::len), Some(2));
    }

    #[test]
    fn keys_in_insertion_order() {
        let index = sample();
        assert_eq!(index.keys(&[]).copied().collect::<Vec<_>>(), vec!["1", "2"]);
        assert_eq!(index.keys(&["1"]).copied().collect::<Vec<_>>(), vec!["1.1"]);
        assert_eq!(
            index.keys(&["2"]).copied().collect::<Vec<_>>(),
            vec!["2.1", "2.2"]
        );
        assert_eq!(index.keys(&["3"]).count(), 0);
        assert_eq!(index.keys(&["1", "1.1"]).count(), 0);
    }

    #[test]
    fn has_paths() {
        let index = sample();
        assert!(index.has(&[]));
        assert!(index.has(&["1"]));
        assert!(index.has(&["1", "1.1"]));
        assert!(index.has(&["2", "2.1"]));
        assert!(!index.has(&["1", "1.2"]));
        assert!(!index.has(&["3", "1.2"]));
    }

    #[test]
    fn set_returns_previous_leaf() {
        let mut index = KeyIndex::new();
        assert_eq!(index.set(&["a", "b"], 1), None);
        assert_eq!(index.set(&["a", "b"], 2), Some(1));
        assert_eq!(index.get(&["a", "b"]), Some(&2));
        assert_eq!(index.leaf_count(), 1);
    }

    #[test]
    fn set_through_leaf_replaces_it() {
        let mut index = KeyIndex::new();
        index.set(&["a"], 1);
        index.set(&["a", "b"], 2);
        assert_eq!(index.get(&["a"]), None);
        assert_eq!(index.get(&["a", "b"]), Some(&2));
    }

    #[test]
    fn get_mut_updates_leaf_in_place() {
        let mut index = sample();
        if let Some(v) = index.get_mut(&["2", "2.1"]) {
            *v = "Changed";
        }
        assert_eq!(index.get(&["2", "2.1"]), Some(&"Changed"));
        assert!(index.get_mut(&["2"]).is_none());
        assert!(index.get_mut(&["1", "1.1", "x"]).is_none());
    }

    #[test]
    fn empty_path_write_is_ignored() {
        let mut index: KeyIndex<&str, i32> = KeyIndex::new();
        assert_eq!(index.set(&[], 1), None);
        assert!(index.is_empty());
    }

    #[test]
    fn delete_prunes_empty_branches() {
        let mut index = sample();
        index.delete(&["1", "1.1"]);
        index.delete(&["2", "2.2"]);
        assert_eq!(index.keys(&[]).copied().collect::<Vec<_>>(), vec!["2"]);
        assert!(!index.has(&["1"]));

        index.delete(&["1", "1.1"]);
        index.delete(&["2", "2.1"]);
        assert!(index.is_empty());
    }

    #[test]
    fn delete_deeply_nested_prunes_all_levels() {
        let mut index = KeyIndex::new();
        index.set(&["a", "b", "c", "d"], 1);
        index.set(&["a", "x"], 2);
        index.delete(&["a", "b", "c", "d"]);
        assert!(!index.has(&["a", "b"]));
        assert_eq!(index.get(&["a", "x"]), Some(&2));
    }

    #[test]
    fn delete_missing_is_noop() {
        let mut index = sample();
        assert!(index.delete(&["9"]).is_none());
        assert!(index.delete(&["1", "1.1", "deeper"]).is_none());
        assert_eq!(index, sample());
    }

    #[test]
    fn clear_subtree() {
        let mut index = sample();
        index.clear(&["2"]);
        assert_eq!(index.keys(&[]).copied().collect::<Vec<_>>(), vec!["1"]);
        index.clear(&["1", "1.1"]);
        assert!(index.has(&["1", "1.1"]));
        index.clear(&["1"]);
        assert!(index.is_empty());
    }

    #[test]
    fn clear_root() {
        let mut index = sample();
        index.clear(&[]);
        assert!(index.is_empty());
    }

    #[test]
    fn leaves_enumerate_full_paths() {
        let index = sample();
        let all: Vec<_> = index
            .leaves(&[])
            .into_iter()
            .map(|(p, v)| (p, *v))
            .collect();
        assert_eq!(
            all,
            vec![
                (vec!["1", "1.1"], "Test"),
                (vec!["2", "2.1"], "Test"),
                (vec!["2", "2.2"], "Test"),
            ]
        );
        let under_two = index.leaves(&["2"]);
        assert_eq!(under_two.len(), 2);
        assert_eq!(under_two[0].0, vec!["2", "2.1"]);
    }
}
