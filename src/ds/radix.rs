//! Compressed radix tree mapping string keys to their 64-bit hashes.
//!
//! The cache facade keeps one of these (behind a single `RwLock`) when keys
//! are strings, so `scan_prefix` and `scan_match` can prune to the matching
//! subtree instead of walking every shard.
//!
//! ## Architecture
//!
//! ```text
//!   insert("user:1:name"), insert("user:1:email"), insert("user:2:name")
//!
//!                (root)
//!                  │ "user:"
//!                (inner)
//!              ┌───┴────┐
//!         "1:" │        │ "2:name" ── leaf h3
//!            (inner)
//!          ┌───┴─────┐
//!   "name" │         │ "email"
//!        leaf h1   leaf h2
//! ```
//!
//! Edges hold byte prefixes (splits may land inside a UTF-8 sequence; full
//! leaf paths always reassemble to the original valid key). Deleting a key
//! collapses single-child interior nodes by merging edge labels, so the tree
//! never accumulates chains of empty nodes.
//!
//! The empty string is a valid key: it lives as a leaf mark on the root.

use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct Node {
    prefix: Vec<u8>,
    children: FxHashMap<u8, Node>,
    leaf: Option<u64>,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Prefix index over live string keys.
///
/// Not internally synchronized; the facade serializes access with a
/// reader-writer lock.
#[derive(Debug, Default)]
pub struct RadixTree {
    root: Node,
    len: usize,
}

impl RadixTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys in the tree.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `key` with its hash. Returns `false` if the key was already
    /// present (the hash is updated either way).
    pub fn insert(&mut self, key: &str, hash: u64) -> bool {
        let inserted = Self::insert_node(&mut self.root, key.as_bytes(), hash);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    fn insert_node(node: &mut Node, key: &[u8], hash: u64) -> bool {
        if key.is_empty() {
            let inserted = node.leaf.is_none();
            node.leaf = Some(hash);
            return inserted;
        }

        let first = key[0];
        let Some(child) = node.children.get_mut(&first) else {
            node.children.insert(
                first,
                Node {
                    prefix: key.to_vec(),
                    children: FxHashMap::default(),
                    leaf: Some(hash),
                },
            );
            return true;
        };

        let common = common_prefix_len(&child.prefix, key);
        if common == child.prefix.len() {
            return Self::insert_node(child, &key[common..], hash);
        }

        // Split the edge at the divergence point.
        let mut split = Node {
            prefix: key[..common].to_vec(),
            children: FxHashMap::default(),
            leaf: None,
        };
        let mut old = node.children.remove(&first).expect("child just seen");
        old.prefix.drain(..common);
        split.children.insert(old.prefix[0], old);

        let remaining = &key[common..];
        if remaining.is_empty() {
            split.leaf = Some(hash);
        } else {
            split.children.insert(
                remaining[0],
                Node {
                    prefix: remaining.to_vec(),
                    children: FxHashMap::default(),
                    leaf: Some(hash),
                },
            );
        }
        node.children.insert(first, split);
        true
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn delete(&mut self, key: &str) -> bool {
        let deleted = Self::delete_node(&mut self.root, key.as_bytes());
        if deleted {
            self.len -= 1;
        }
        deleted
    }

    fn delete_node(node: &mut Node, key: &[u8]) -> bool {
        if key.is_empty() {
            return node.leaf.take().is_some();
        }

        let first = key[0];
        let Some(child) = node.children.get_mut(&first) else {
            return false;
        };
        let common = common_prefix_len(&child.prefix, key);
        if common < child.prefix.len() {
            return false;
        }

        let deleted = Self::delete_node(child, &key[common..]);
        if deleted && child.leaf.is_none() {
            if child.children.is_empty() {
                node.children.remove(&first);
            } else if child.children.len() == 1 {
                // Merge the lone grandchild into this edge.
                let mut child = node.children.remove(&first).expect("child just seen");
                let grandchild_key = *child.children.keys().next().expect("one child");
                let mut grandchild = child
                    .children
                    .remove(&grandchild_key)
                    .expect("keyed grandchild");
                let mut merged_prefix = child.prefix;
                merged_prefix.extend_from_slice(&grandchild.prefix);
                grandchild.prefix = merged_prefix;
                node.children.insert(first, grandchild);
            }
        }
        deleted
    }

    /// Returns `true` if `key` is stored as a leaf.
    pub fn has(&self, key: &str) -> bool {
        let mut node = &self.root;
        let mut remaining = key.as_bytes();
        loop {
            if remaining.is_empty() {
                return node.leaf.is_some();
            }
            let Some(child) = node.children.get(&remaining[0]) else {
                return false;
            };
            let common = common_prefix_len(&child.prefix, remaining);
            if common < child.prefix.len() {
                return false;
            }
            node = child;
            remaining = &remaining[common..];
        }
    }

    /// Collects up to `limit` hashes of keys starting with `prefix`.
    ///
    /// A `limit` of zero means unlimited.
    pub fn find_by_prefix(&self, prefix: &str, limit: usize) -> Vec<u64> {
        let mut hashes = Vec::new();
        self.walk_prefix(prefix, |_, hash| {
            hashes.push(hash);
            limit == 0 || hashes.len() < limit
        });
        hashes
    }

    /// Visits every `(key, hash)` whose key starts with `prefix`.
    ///
    /// The visitor returns `false` to stop the walk early. Visit order is
    /// unspecified.
    pub fn walk_prefix<F>(&self, prefix: &str, mut visitor: F)
    where
        F: FnMut(&str, u64) -> bool,
    {
        let Some((node, mut path)) = self.descend(prefix.as_bytes()) else {
            return;
        };
        Self::walk_node(node, &mut path, &mut visitor);
    }

    /// Finds the node whose subtree holds exactly the keys starting with
    /// `prefix`, along with the full byte path leading to it.
    fn descend(&self, prefix: &[u8]) -> Option<(&Node, Vec<u8>)> {
        let mut node = &self.root;
        let mut path = Vec::with_capacity(prefix.len());
        let mut remaining = prefix;
        loop {
            if remaining.is_empty() {
                return Some((node, path));
            }
            let child = node.children.get(&remaining[0])?;
            let common = common_prefix_len(&child.prefix, remaining);
            if common == remaining.len() {
                // The prefix ends inside this edge; the whole subtree matches.
                path.extend_from_slice(&child.prefix);
                return Some((child, path));
            }
            if common < child.prefix.len() {
                return None;
            }
            path.extend_from_slice(&child.prefix);
            node = child;
            remaining = &remaining[common..];
        }
    }

    fn walk_node<F>(node: &Node, path: &mut Vec<u8>, visitor: &mut F) -> bool
    where
        F: FnMut(&str, u64) -> bool,
    {
        if let Some(hash) = node.leaf {
            let key = std::str::from_utf8(path).unwrap_or_default();
            if !visitor(key, hash) {
                return false;
            }
        }
        for child in node.children.values() {
            path.extend_from_slice(&child.prefix);
            let keep_going = Self::walk_node(child, path, visitor);
            path.truncate(path.len() - child.prefix.len());
            if !keep_going {
                return false;
            }
        }
        true
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    proptest! {
        /// Property: the tree holds exactly the inserted key set.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_matches_reference_set(
            keys in prop::collection::btree_set("[a-c]{0,6}", 0..40)
        ) {
            let mut tree = RadixTree::new();
            for (i, key) in keys.iter().enumerate() {
                tree.insert(key, i as u64);
            }
            prop_assert_eq!(tree.len(), keys.len());
            for key in &keys {
                prop_assert!(tree.has(key));
            }
            let mut walked = BTreeSet::new();
            tree.walk_prefix("", |key, _| {
                walked.insert(key.to_string());
                true
            });
            prop_assert_eq!(&walked, &keys);
        }

        /// Property: find_by_prefix returns exactly the matching subset.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_prefix_filter_is_exact(
            keys in prop::collection::btree_set("[a-b]{0,5}", 0..30),
            prefix in "[a-b]{0,3}"
        ) {
            let mut tree = RadixTree::new();
            for (i, key) in keys.iter().enumerate() {
                tree.insert(key, i as u64);
            }
            let found = tree.find_by_prefix(&prefix, 0).len();
            let expected = keys.iter().filter(|k| k.starts_with(&prefix)).count();
            prop_assert_eq!(found, expected);
        }

        /// Property: deleting half the keys leaves the other half reachable.
        #[cfg_attr(miri, ignore)]
        #[test]
        fn prop_delete_preserves_survivors(
            keys in prop::collection::btree_set("[a-c]{1,5}", 2..30)
        ) {
            let keys: Vec<String> = keys.into_iter().collect();
            let mut tree = RadixTree::new();
            for (i, key) in keys.iter().enumerate() {
                tree.insert(key, i as u64);
            }
            let (gone, kept) = keys.split_at(keys.len() / 2);
            for key in gone {
                prop_assert!(tree.delete(key));
            }
            for key in gone {
                prop_assert!(!tree.has(key));
            }
            for key in kept {
                prop_assert!(tree.has(key));
            }
            prop_assert_eq!(tree.len(), kept.len());
        }
    }
}
