//! Recency list with O(1) touch, insert and removal.
//!
//! Nodes live in a vector and link to each other by index, so handles stay
//! valid until the node is removed. Freed indices are recycled.

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: usize,
    next: usize,
}

#[derive(Debug)]
pub struct LruList<K> {
    nodes: Vec<Node<K>>,
    free: Vec<usize>,
    /// Most recently used.
    head: usize,
    /// Least recently used.
    tail: usize,
    len: usize,
}

impl<K: Copy> LruList<K> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts `key` as most recently used and returns its handle.
    pub fn push_front(&mut self, key: K) -> usize {
        let node = Node {
            key,
            prev: NIL,
            next: NIL,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.attach_front(idx);
        self.len += 1;
        idx
    }

    pub fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    pub fn remove(&mut self, idx: usize) -> K {
        self.detach(idx);
        self.free.push(idx);
        self.len -= 1;
        self.nodes[idx].key
    }

    /// Keys from least to most recently used, with their handles.
    pub fn iter_lru(&self) -> LruIter<'_, K> {
        LruIter {
            list: self,
            cursor: self.tail,
        }
    }

    fn attach_front(&mut self, idx: usize) {
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = self.head;
        if self.head != NIL {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }

    fn detach(&mut self, idx: usize) {
        let Node { prev, next, .. } = self.nodes[idx];
        if prev != NIL {
            self.nodes[prev].next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nodes[next].prev = prev;
        } else {
            self.tail = prev;
        }
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }
}

pub struct LruIter<'a, K> {
    list: &'a LruList<K>,
    cursor: usize,
}

impl<K: Copy> Iterator for LruIter<'_, K> {
    type Item = (usize, K);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let idx = self.cursor;
        let node = &self.list.nodes[idx];
        self.cursor = node.prev;
        Some((idx, node.key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(list: &LruList<u32>) -> Vec<u32> {
        list.iter_lru().map(|(_, key)| key).collect()
    }

    #[test]
    fn test_basic_lru_operations() {
        let mut list = LruList::with_capacity(3);
        assert!(list.is_empty());
        assert_eq!(list.iter_lru().next(), None);

        let a = list.push_front(1);
        list.push_front(2);
        list.push_front(3);
        assert_eq!(list.len(), 3);
        assert_eq!(order(&list), vec![1, 2, 3]);

        list.touch(a);
        assert_eq!(order(&list), vec![2, 3, 1]);
    }

    #[test]
    fn test_remove_and_reuse() {
        let mut list = LruList::with_capacity(3);
        list.push_front(1);
        let b = list.push_front(2);
        list.push_front(3);

        assert_eq!(list.remove(b), 2);
        assert_eq!(order(&list), vec![1, 3]);

        let d = list.push_front(4);
        assert_eq!(d, b);
        assert_eq!(order(&list), vec![1, 3, 4]);
    }

    #[test]
    fn test_remove_head_and_tail() {
        let mut list = LruList::with_capacity(2);
        let a = list.push_front(1);
        let b = list.push_front(2);

        list.remove(a);
        assert_eq!(order(&list), vec![2]);
        list.remove(b);
        assert!(list.is_empty());
        assert_eq!(order(&list), Vec::<u32>::new());

        list.push_front(5);
        assert_eq!(order(&list), vec![5]);
    }
}
