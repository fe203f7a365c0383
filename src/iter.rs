//! Tree cursors.
//!
//! Both cursors keep their ancestor stack in a fixed [`ArrayVec`] of
//! [`MAX_HEIGHT`] entries and never allocate. A tree taller than that (only
//! possible after [`AvlTree::insert_unbalanced`]) makes them panic.
//!
//! [`AvlTree::insert_unbalanced`]: crate::AvlTree::insert_unbalanced

use std::cmp::Ordering;
use std::iter::FusedIterator;

use arrayvec::ArrayVec;
use log::trace;

use crate::addr::Pos;
use crate::node;
use crate::order::KeyOrder;
use crate::region::Region;
use crate::tree::{push_bounded, MAX_HEIGHT};

/// Ascending cursor yielding node positions.
pub struct InOrder<'a, R> {
    region: &'a R,
    stack: ArrayVec<Pos, MAX_HEIGHT>,
}

impl<'a, R: Region> InOrder<'a, R> {
    pub(crate) fn new(region: &'a R, root: Option<Pos>) -> Self {
        let mut it = Self {
            region,
            stack: ArrayVec::new(),
        };
        it.push_left_spine(root);
        it
    }

    pub(crate) fn from_key<O: KeyOrder>(
        region: &'a R,
        root: Option<Pos>,
        order: &O,
        key: &O::Key,
        inclusive: bool,
    ) -> Self {
        let mut stack = ArrayVec::new();
        let mut cur = root;
        while let Some(n) = cur {
            cur = match order.compare(region, n, key) {
                Ordering::Greater => {
                    push_bounded(&mut stack, n);
                    node::left(region, n)
                }
                Ordering::Equal if inclusive => {
                    push_bounded(&mut stack, n);
                    None
                }
                _ => node::right(region, n),
            };
        }
        Self { region, stack }
    }

    fn push_left_spine(&mut self, mut cur: Option<Pos>) {
        while let Some(n) = cur {
            push_bounded(&mut self.stack, n);
            cur = node::left(self.region, n);
        }
    }
}

impl<R: Region> Iterator for InOrder<'_, R> {
    type Item = Pos;

    fn next(&mut self) -> Option<Pos> {
        let n = self.stack.pop()?;
        self.push_left_spine(node::right(self.region, n));
        Some(n)
    }
}

impl<R: Region> FusedIterator for InOrder<'_, R> {}

/// Destructive cursor: yields every node exactly once, children before their
/// parent, unlinking each as it goes.
///
/// A yielded node has no children. The link that used to lead to it from its
/// parent is cleared, and the node's own link on that side is pointed back at
/// the former parent so [`AvlTree::replace`] can undo the removal in O(1).
/// Balance factors are left alone. Once the root is yielded the tree is
/// empty. A tree whose traversal is abandoned midway is structurally
/// incomplete until the yielded nodes are replaced.
///
/// [`AvlTree::replace`]: crate::AvlTree::replace
pub struct LeafFirst<'a, R> {
    region: &'a mut R,
    header: Pos,
    stack: ArrayVec<Pos, MAX_HEIGHT>,
}

impl<'a, R: Region> LeafFirst<'a, R> {
    pub(crate) fn new(region: &'a mut R, header: Pos) -> Self {
        let root = region.load_ref(header);
        let mut it = Self {
            region,
            header,
            stack: ArrayVec::new(),
        };
        it.descend(root);
        it
    }

    /// Push the path from `cur` down to its first leaf, preferring left.
    fn descend(&mut self, mut cur: Option<Pos>) {
        while let Some(n) = cur {
            push_bounded(&mut self.stack, n);
            cur = match node::left(self.region, n) {
                Some(l) => Some(l),
                None => node::right(self.region, n),
            };
        }
    }
}

impl<R: Region> Iterator for LeafFirst<'_, R> {
    type Item = Pos;

    fn next(&mut self) -> Option<Pos> {
        let n = self.stack.pop()?;
        node::set_left(self.region, n, None);
        node::set_right(self.region, n, None);

        match self.stack.last().copied() {
            Some(parent) if node::left(self.region, parent) == Some(n) => {
                node::set_left(self.region, parent, None);
                node::set_left(self.region, n, Some(parent));
                let sibling = node::right(self.region, parent);
                self.descend(sibling);
            }
            Some(parent) => {
                node::set_right(self.region, parent, None);
                node::set_right(self.region, n, Some(parent));
            }
            None => {
                self.region.store_ref(self.header, None);
                trace!("leaf-first traversal emptied tree {}", self.header);
            }
        }
        Some(n)
    }
}

impl<R: Region> FusedIterator for LeafFirst<'_, R> {}

/// Hook a node yielded by [`LeafFirst`] back under its former parent, or
/// back in as the root.
pub(crate) fn relink<R: Region>(region: &mut R, header: Pos, n: Pos) {
    if let Some(parent) = node::left(region, n) {
        node::set_left(region, parent, Some(n));
        node::set_left(region, n, None);
    } else if let Some(parent) = node::right(region, n) {
        node::set_right(region, parent, Some(n));
        node::set_right(region, n, None);
    } else {
        region.store_ref(header, Some(n));
    }
}

#[cfg(test)]
mod tests {
    use crate::arena::Arena;
    use crate::node;
    use crate::order::U64Keys;
    use crate::region::Region;
    use crate::tree::{AvlTree, TREE_HEADER_SIZE};
    use crate::Pos;

    fn build(keys: &[u64]) -> (Arena, AvlTree<U64Keys>) {
        let mut arena = Arena::new();
        let header = arena.alloc(TREE_HEADER_SIZE, 8).unwrap();
        let tree = AvlTree::create(&mut arena, header, U64Keys::default());
        for &k in keys {
            let record = arena.alloc_bytes(&k.to_le_bytes()).unwrap();
            let n = arena.alloc_node().unwrap();
            node::init(&mut arena, n, Some(record));
            assert!(tree.insert(&mut arena, n));
        }
        (arena, tree)
    }

    fn keys_of(arena: &Arena, tree: &AvlTree<U64Keys>, nodes: impl Iterator<Item = Pos>) -> Vec<u64> {
        nodes.map(|n| tree.key_of(arena, n)).collect()
    }

    #[test]
    fn test_in_order() {
        let (arena, tree) = build(&[50, 20, 80, 10, 30, 70, 90, 60]);
        assert_eq!(
            keys_of(&arena, &tree, tree.iter(&arena)),
            [10, 20, 30, 50, 60, 70, 80, 90]
        );
    }

    #[test]
    fn test_in_order_is_fused() {
        let (arena, tree) = build(&[1]);
        let mut it = tree.iter(&arena);
        assert!(it.next().is_some());
        assert_eq!(it.next(), None);
        assert_eq!(it.next(), None);

        let (arena, tree) = build(&[]);
        assert_eq!(tree.iter(&arena).next(), None);
    }

    #[test]
    fn test_iter_from() {
        let (arena, tree) = build(&[50, 20, 80, 10, 30, 70, 90, 60]);
        assert_eq!(
            keys_of(&arena, &tree, tree.iter_from(&arena, &50, false)),
            [60, 70, 80, 90]
        );
        assert_eq!(
            keys_of(&arena, &tree, tree.iter_from(&arena, &50, true)),
            [50, 60, 70, 80, 90]
        );
        assert_eq!(
            keys_of(&arena, &tree, tree.iter_from(&arena, &55, true)),
            [60, 70, 80, 90]
        );
        assert_eq!(
            keys_of(&arena, &tree, tree.iter_from(&arena, &0, false)),
            [10, 20, 30, 50, 60, 70, 80, 90]
        );
        assert_eq!(tree.iter_from(&arena, &90, false).next(), None);
    }

    #[test]
    fn test_leaf_first_children_before_parents() {
        let keys = [50, 20, 80, 10, 30, 70, 90, 60];
        let (mut arena, tree) = build(&keys);
        let header = tree.header();

        let visited: Vec<Pos> = tree.leaf_first(&mut arena).collect();
        assert_eq!(visited.len(), keys.len());
        assert_eq!(arena.load_ref(header), None);

        // Every node's back link points at a node yielded later.
        for (i, &n) in visited.iter().enumerate() {
            let view = node::read(&arena, n);
            assert!(view.left.is_none() || view.right.is_none());
            if let Some(parent) = view.left.or(view.right) {
                let j = visited.iter().position(|&p| p == parent).unwrap();
                assert!(j > i);
            } else {
                assert_eq!(i, visited.len() - 1, "only the root has no back link");
            }
        }

        let mut seen = keys_of(&arena, &tree, visited.into_iter());
        seen.sort_unstable();
        let mut expected = keys.to_vec();
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_replace_in_reverse_restores_tree() {
        let (mut arena, tree) = build(&[8, 4, 12, 2, 6, 10, 14, 1, 3, 5, 7, 9]);
        let before = arena.as_bytes().to_vec();

        let visited: Vec<Pos> = tree.leaf_first(&mut arena).collect();
        assert!(tree.is_empty(&arena));
        for &n in visited.iter().rev() {
            tree.replace(&mut arena, n);
        }

        assert_eq!(arena.as_bytes(), &before[..]);
        tree.audit(&arena).unwrap();
    }

    #[test]
    fn test_abandoned_teardown_can_be_undone() {
        let (mut arena, tree) = build(&[4, 2, 6, 1, 3, 5, 7]);
        let before = arena.as_bytes().to_vec();

        let taken: Vec<Pos> = tree.leaf_first(&mut arena).take(3).collect();
        assert_eq!(keys_of(&arena, &tree, taken.iter().copied()), [1, 3, 2]);
        for &n in taken.iter().rev() {
            tree.replace(&mut arena, n);
        }
        assert_eq!(arena.as_bytes(), &before[..]);
    }
}
