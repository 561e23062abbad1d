//! In-memory B-tree mapping integer keys to record locations.
//!
//! Classical (not B+) layout: every node, leaf or internal, stores values
//! next to its keys. Nodes live in an arena and refer to each other by
//! index. With minimum degree `t`, every node except the root holds between
//! `t - 1` and `2t - 1` keys, and full nodes are split on the way down so
//! an insert never has to walk back up.

use crate::access::record_id::RecordId;

pub type Key = i64;

/// Index of a node in the tree's arena.
pub type NodeId = usize;

#[derive(Debug, Clone)]
struct Node {
    is_leaf: bool,
    keys: Vec<Key>,
    values: Vec<RecordId>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl Node {
    fn new(is_leaf: bool, parent: Option<NodeId>) -> Self {
        Self {
            is_leaf,
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            parent,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BTree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
    degree: usize,
    len: usize,
}

impl BTree {
    /// Creates an empty tree with minimum degree `degree`. Degrees below 2
    /// cannot form a valid tree.
    pub fn new(degree: usize) -> Option<Self> {
        if degree < 2 {
            return None;
        }
        Some(Self {
            nodes: Vec::new(),
            root: None,
            degree,
            len: 0,
        })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&self) -> usize {
        let mut height = 0;
        let mut cursor = self.root;
        while let Some(id) = cursor {
            height += 1;
            cursor = self.nodes[id].children.first().copied();
        }
        height
    }

    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Finds the node and position holding `key`.
    fn locate(&self, key: Key) -> Option<(NodeId, usize)> {
        let mut current = self.root?;
        loop {
            let node = &self.nodes[current];
            let mut i = 0;
            while i < node.keys.len() && key > node.keys[i] {
                i += 1;
            }
            if i < node.keys.len() && node.keys[i] == key {
                return Some((current, i));
            }
            if node.is_leaf {
                return None;
            }
            current = node.children[i];
        }
    }

    pub fn search(&self, key: Key) -> Option<RecordId> {
        self.locate(key)
            .map(|(node, idx)| self.nodes[node].values[idx])
    }

    /// Inserts `key`. An existing key has its location replaced.
    pub fn insert(&mut self, key: Key, value: RecordId) {
        if let Some((node, idx)) = self.locate(key) {
            self.nodes[node].values[idx] = value;
            return;
        }

        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.alloc(Node::new(true, None));
                self.root = Some(root);
                root
            }
        };

        let target = if self.nodes[root].keys.len() == self.max_keys() {
            let new_root = self.alloc(Node::new(false, None));
            self.nodes[new_root].children.push(root);
            self.nodes[root].parent = Some(new_root);
            self.root = Some(new_root);
            self.split_child(new_root, 0);
            new_root
        } else {
            root
        };

        self.insert_non_full(target, key, value);
        self.len += 1;
    }

    fn insert_non_full(&mut self, mut current: NodeId, key: Key, value: RecordId) {
        loop {
            let pos = self.nodes[current].keys.partition_point(|k| *k < key);

            if self.nodes[current].is_leaf {
                let node = &mut self.nodes[current];
                node.keys.insert(pos, key);
                node.values.insert(pos, value);
                return;
            }

            let mut child_idx = pos;
            let child = self.nodes[current].children[child_idx];
            if self.nodes[child].keys.len() == self.max_keys() {
                self.split_child(current, child_idx);
                if key > self.nodes[current].keys[child_idx] {
                    child_idx += 1;
                }
            }
            current = self.nodes[current].children[child_idx];
        }
    }

    /// Splits the full child at `child_idx` of `parent`, moving its median
    /// key up into `parent`.
    fn split_child(&mut self, parent: NodeId, child_idx: usize) {
        let t = self.degree;
        let child = self.nodes[parent].children[child_idx];

        let (right_keys, right_values, right_children, median_key, median_value, is_leaf) = {
            let node = &mut self.nodes[child];
            let right_keys = node.keys.split_off(t);
            let right_values = node.values.split_off(t);
            let right_children = if node.is_leaf {
                Vec::new()
            } else {
                node.children.split_off(t)
            };
            let median_key = node.keys.pop();
            let median_value = node.values.pop();
            (
                right_keys,
                right_values,
                right_children,
                median_key,
                median_value,
                node.is_leaf,
            )
        };

        let (Some(median_key), Some(median_value)) = (median_key, median_value) else {
            return;
        };

        let sibling = self.alloc(Node {
            is_leaf,
            keys: right_keys,
            values: right_values,
            children: right_children,
            parent: Some(parent),
        });

        for i in 0..self.nodes[sibling].children.len() {
            let grandchild = self.nodes[sibling].children[i];
            self.nodes[grandchild].parent = Some(sibling);
        }

        let node = &mut self.nodes[parent];
        node.keys.insert(child_idx, median_key);
        node.values.insert(child_idx, median_value);
        node.children.insert(child_idx + 1, sibling);
    }

    /// All entries in ascending key order.
    pub fn entries(&self) -> Vec<(Key, RecordId)> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect(root, &mut out);
        }
        out
    }

    pub fn keys(&self) -> Vec<Key> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    fn collect(&self, id: NodeId, out: &mut Vec<(Key, RecordId)>) {
        let node = &self.nodes[id];
        for i in 0..node.keys.len() {
            if !node.is_leaf {
                self.collect(node.children[i], out);
            }
            out.push((node.keys[i], node.values[i]));
        }
        if !node.is_leaf {
            if let Some(&last) = node.children.last() {
                self.collect(last, out);
            }
        }
    }

    /// Verifies ordering, occupancy, fan-out, parent links and uniform leaf
    /// depth. Returns a description of the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        let Some(root) = self.root else {
            return Ok(());
        };
        if self.nodes[root].parent.is_some() {
            return Err("root has a parent".to_string());
        }
        let mut leaf_depth = None;
        let count = self.check_node(root, None, None, 1, &mut leaf_depth)?;
        if count != self.len {
            return Err(format!("tree holds {} keys but len is {}", count, self.len));
        }
        Ok(())
    }

    fn check_node(
        &self,
        id: NodeId,
        lower: Option<Key>,
        upper: Option<Key>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
    ) -> Result<usize, String> {
        let node = &self.nodes[id];
        let n = node.keys.len();

        if node.values.len() != n {
            return Err(format!("node {} has {} keys but {} values", id, n, node.values.len()));
        }
        if n > self.max_keys() || (Some(id) != self.root && n < self.degree - 1) {
            return Err(format!("node {} holds {} keys", id, n));
        }
        if node.keys.windows(2).any(|w| w[0] >= w[1]) {
            return Err(format!("node {} keys are not strictly ascending", id));
        }
        if let (Some(lo), Some(&first)) = (lower, node.keys.first()) {
            if first <= lo {
                return Err(format!("node {} key {} not above separator {}", id, first, lo));
            }
        }
        if let (Some(hi), Some(&last)) = (upper, node.keys.last()) {
            if last >= hi {
                return Err(format!("node {} key {} not below separator {}", id, last, hi));
            }
        }

        if node.is_leaf {
            if !node.children.is_empty() {
                return Err(format!("leaf {} has children", id));
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(d) if d != depth => {
                    return Err(format!("leaf {} at depth {} but others at {}", id, depth, d));
                }
                Some(_) => {}
            }
            return Ok(n);
        }

        if node.children.len() != n + 1 {
            return Err(format!(
                "internal node {} has {} keys and {} children",
                id,
                n,
                node.children.len()
            ));
        }

        let mut count = n;
        for (i, &child) in node.children.iter().enumerate() {
            if self.nodes[child].parent != Some(id) {
                return Err(format!("child {} does not point back to {}", child, id));
            }
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1]) };
            let hi = if i == n { upper } else { Some(node.keys[i]) };
            count += self.check_node(child, lo, hi, depth + 1, leaf_depth)?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};

    fn rid(n: i64) -> RecordId {
        RecordId::new(PageId(n.unsigned_abs()), n.rem_euclid(10) as u32 + 1)
    }

    #[test]
    fn test_invalid_degree() {
        assert!(BTree::new(0).is_none());
        assert!(BTree::new(1).is_none());
        assert!(BTree::new(2).is_some());
    }

    #[test]
    fn test_empty_tree() {
        let tree = BTree::new(3).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.search(1), None);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_sequential_inserts_degree_three() {
        let mut tree = BTree::new(3).unwrap();

        for key in 1..=10 {
            tree.insert(key, rid(key));
            tree.check_invariants().unwrap();
            for seen in 1..=key {
                assert_eq!(tree.search(seen), Some(rid(seen)), "key {}", seen);
            }
        }

        assert_eq!(tree.len(), 10);
        assert!(tree.height() >= 2);
        assert_eq!(tree.keys(), (1..=10).collect::<Vec<_>>());
        assert_eq!(tree.search(11), None);
        assert_eq!(tree.search(0), None);
    }

    #[test]
    fn test_root_split() {
        let mut tree = BTree::new(2).unwrap();
        for key in [10, 20, 30] {
            tree.insert(key, rid(key));
        }
        assert_eq!(tree.height(), 1);

        // The root is full (3 keys); the next insert splits it around 20.
        tree.insert(40, rid(40));
        assert_eq!(tree.height(), 2);
        let root = tree.root.unwrap();
        assert_eq!(tree.nodes[root].keys, vec![20]);
        assert_eq!(tree.search(20), Some(rid(20)));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_reverse_inserts() {
        let mut tree = BTree::new(2).unwrap();
        for key in (0..200).rev() {
            tree.insert(key, rid(key));
        }
        tree.check_invariants().unwrap();
        assert_eq!(tree.keys(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_random_inserts() {
        let mut rng = StdRng::seed_from_u64(7);
        for degree in [2, 3, 5, 16] {
            let mut keys: Vec<i64> = (0..1000).map(|k| k * 3 - 500).collect();
            keys.shuffle(&mut rng);

            let mut tree = BTree::new(degree).unwrap();
            for &key in &keys {
                tree.insert(key, rid(key));
            }

            tree.check_invariants().unwrap();
            assert_eq!(tree.len(), keys.len());
            for &key in &keys {
                assert_eq!(tree.search(key), Some(rid(key)));
            }
            let mut sorted = keys.clone();
            sorted.sort();
            assert_eq!(tree.keys(), sorted);
        }
    }

    #[test]
    fn test_duplicate_key_replaces_value() {
        let mut tree = BTree::new(2).unwrap();
        for key in 0..20 {
            tree.insert(key, rid(key));
        }
        let replacement = RecordId::new(PageId(99), 1);
        tree.insert(7, replacement);

        assert_eq!(tree.len(), 20);
        assert_eq!(tree.search(7), Some(replacement));
        tree.check_invariants().unwrap();
    }

    #[test]
    fn test_entries_in_order() {
        let mut tree = BTree::new(3).unwrap();
        for key in [5, 1, 9, 3, 7] {
            tree.insert(key, rid(key));
        }
        let entries = tree.entries();
        assert_eq!(
            entries,
            vec![(1, rid(1)), (3, rid(3)), (5, rid(5)), (7, rid(7)), (9, rid(9))]
        );
    }
}
