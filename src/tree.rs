//! The AVL engine.
//!
//! A tree is an 8-byte root reference stored in a region plus the ordering
//! policy bound to it. Every operation takes the region explicitly; the
//! engine reads and rewrites node headers in place and never allocates.

use std::cmp::Ordering;

use arrayvec::ArrayVec;
use log::{debug, trace};

use crate::addr::Pos;
use crate::error::{Error, Result};
use crate::iter::{self, InOrder, LeafFirst};
use crate::node::{self, Dir};
use crate::order::KeyOrder;
use crate::region::Region;

/// Deepest tree any operation can walk.
///
/// AVL height is below `1.4405 * log2(n + 2)`, so 64 levels cover trees of
/// more than 2^44 nodes.
pub const MAX_HEIGHT: usize = 64;

/// Bytes of region storage a tree header occupies (its root reference).
pub const TREE_HEADER_SIZE: usize = 8;

/// Root link plus one link per level.
const PATH_CAPACITY: usize = MAX_HEIGHT + 1;

#[cold]
#[track_caller]
fn height_exceeded() -> ! {
    panic!("tree deeper than MAX_HEIGHT ({MAX_HEIGHT}); traversal stack exhausted")
}

#[inline]
#[track_caller]
pub(crate) fn push_bounded<T, const N: usize>(stack: &mut ArrayVec<T, N>, item: T) {
    if stack.try_push(item).is_err() {
        height_exceeded();
    }
}

/// A link that can hold a node: the tree root or one child field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Root,
    Child(Pos, Dir),
}

/// A node taken out by [`AvlTree::delete`]. It is detached: no children,
/// balance 0, payload untouched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Removed {
    pub node: Pos,
    pub payload: Option<Pos>,
}

/// Summary returned by a successful [`AvlTree::audit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Audit {
    pub nodes: usize,
    pub height: usize,
}

/// Intrusive AVL tree whose root lives at `header` inside a region.
#[derive(Clone, Debug)]
pub struct AvlTree<O> {
    header: Pos,
    order: O,
}

impl<O: KeyOrder> AvlTree<O> {
    /// Initialize an empty tree at `header` (`TREE_HEADER_SIZE` bytes).
    pub fn create<R: Region>(region: &mut R, header: Pos, order: O) -> Self {
        region.store_ref(header, None);
        Self { header, order }
    }

    /// Attach to a tree previously created at `header`.
    pub fn open(header: Pos, order: O) -> Self {
        Self { header, order }
    }

    #[inline]
    pub fn header(&self) -> Pos {
        self.header
    }

    #[inline]
    pub fn order(&self) -> &O {
        &self.order
    }

    #[inline]
    pub fn root<R: Region>(&self, region: &R) -> Option<Pos> {
        region.load_ref(self.header)
    }

    #[inline]
    pub fn is_empty<R: Region>(&self, region: &R) -> bool {
        self.root(region).is_none()
    }

    /// Key of a node, as derived by this tree's ordering policy.
    #[inline]
    pub fn key_of<R: Region>(&self, region: &R, node: Pos) -> O::Key {
        self.order.key(region, node)
    }

    /// The caller's record behind `node`.
    #[inline]
    pub fn payload_of<R: Region>(&self, region: &R, node: Pos) -> Option<Pos> {
        node::payload(region, node)
    }

    #[inline]
    fn field(&self, slot: Slot) -> Pos {
        match slot {
            Slot::Root => self.header,
            Slot::Child(owner, dir) => node::link_field(owner, dir),
        }
    }

    #[inline]
    fn get<R: Region>(&self, region: &R, slot: Slot) -> Option<Pos> {
        region.load_ref(self.field(slot))
    }

    #[inline]
    fn set<R: Region>(&self, region: &mut R, slot: Slot, to: Option<Pos>) {
        region.store_ref(self.field(slot), to);
    }

    #[inline]
    fn occupant<R: Region>(&self, region: &R, slot: Slot) -> Pos {
        self.get(region, slot).expect("rebalanced link must hold a node")
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Node whose key equals `key`.
    pub fn find<R: Region>(&self, region: &R, key: &O::Key) -> Option<Pos> {
        let mut cur = self.root(region);
        while let Some(n) = cur {
            cur = match self.order.compare(region, n, key) {
                Ordering::Greater => node::left(region, n),
                Ordering::Less => node::right(region, n),
                Ordering::Equal => return Some(n),
            };
        }
        None
    }

    /// Node with the smallest key.
    pub fn first<R: Region>(&self, region: &R) -> Option<Pos> {
        let mut cur = self.root(region)?;
        while let Some(l) = node::left(region, cur) {
            cur = l;
        }
        Some(cur)
    }

    /// Node with the largest key.
    pub fn last<R: Region>(&self, region: &R) -> Option<Pos> {
        let mut cur = self.root(region)?;
        while let Some(r) = node::right(region, cur) {
            cur = r;
        }
        Some(cur)
    }

    /// Node with the smallest key strictly greater than `key`. `key` itself
    /// need not be present.
    pub fn next<R: Region>(&self, region: &R, key: &O::Key) -> Option<Pos> {
        self.successor(region, key, false)
    }

    /// Like [`AvlTree::next`], but an exact match wins.
    pub fn equal_or_next<R: Region>(&self, region: &R, key: &O::Key) -> Option<Pos> {
        self.successor(region, key, true)
    }

    /// Node with the largest key strictly less than `key`.
    pub fn prev<R: Region>(&self, region: &R, key: &O::Key) -> Option<Pos> {
        self.predecessor(region, key, false)
    }

    /// Like [`AvlTree::prev`], but an exact match wins.
    pub fn equal_or_prev<R: Region>(&self, region: &R, key: &O::Key) -> Option<Pos> {
        self.predecessor(region, key, true)
    }

    fn successor<R: Region>(&self, region: &R, key: &O::Key, inclusive: bool) -> Option<Pos> {
        let mut best = None;
        let mut cur = self.root(region);
        while let Some(n) = cur {
            cur = match self.order.compare(region, n, key) {
                Ordering::Greater => {
                    best = Some(n);
                    node::left(region, n)
                }
                Ordering::Equal if inclusive => return Some(n),
                _ => node::right(region, n),
            };
        }
        best
    }

    fn predecessor<R: Region>(&self, region: &R, key: &O::Key, inclusive: bool) -> Option<Pos> {
        let mut best = None;
        let mut cur = self.root(region);
        while let Some(n) = cur {
            cur = match self.order.compare(region, n, key) {
                Ordering::Less => {
                    best = Some(n);
                    node::right(region, n)
                }
                Ordering::Equal if inclusive => return Some(n),
                _ => node::left(region, n),
            };
        }
        best
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Link `node` as a leaf without rebalancing.
    ///
    /// Returns `false` (and links nothing) if its key is already present.
    /// The only write to the tree is the final link, so the tree is a valid
    /// search tree at every instant, even if the process dies midway. Balance
    /// factors are left stale: do not use balanced operations on this tree
    /// again until [`AvlTree::rebuild`] has run.
    pub fn insert_unbalanced<R: Region>(&self, region: &mut R, node: Pos) -> bool {
        node::clear_links(region, node);
        let key = self.order.key(region, node);
        match self.insertion_point(region, &key) {
            Some((slot, _)) => {
                self.set(region, slot, Some(node));
                true
            }
            None => false,
        }
    }

    /// Insert `node` and restore the AVL invariant.
    ///
    /// Returns `false` (and changes nothing in the tree) if its key is
    /// already present.
    pub fn insert<R: Region>(&self, region: &mut R, node: Pos) -> bool {
        node::clear_links(region, node);
        let key = self.order.key(region, node);
        let Some((slot, critical)) = self.insertion_point(region, &key) else {
            return false;
        };
        self.set(region, slot, Some(node));

        // Heights change only from the critical node down to the new leaf.
        let top = self.occupant(region, critical);
        let mut cur = top;
        while cur != node {
            let dir = match self.order.compare(region, cur, &key) {
                Ordering::Greater => Dir::Left,
                _ => Dir::Right,
            };
            let balance = node::balance(region, cur) + dir.delta();
            node::set_balance(region, cur, balance);
            cur = node::child(region, cur, dir).expect("insertion path is linked");
        }

        match node::balance(region, top) {
            2 => {
                let heavy = node::right(region, top).expect("right-heavy node has a right child");
                if node::balance(region, heavy) > 0 {
                    self.rotate_left(region, critical);
                } else {
                    self.rotate_right_left(region, critical);
                }
            }
            -2 => {
                let heavy = node::left(region, top).expect("left-heavy node has a left child");
                if node::balance(region, heavy) < 0 {
                    self.rotate_right(region, critical);
                } else {
                    self.rotate_left_right(region, critical);
                }
            }
            _ => {}
        }
        true
    }

    /// Empty link where `key` belongs, and the link holding the deepest node
    /// on the way with a non-zero balance (the root link if there is none).
    /// `None` if `key` is present.
    fn insertion_point<R: Region>(&self, region: &R, key: &O::Key) -> Option<(Slot, Slot)> {
        let mut slot = Slot::Root;
        let mut critical = Slot::Root;
        while let Some(cur) = self.get(region, slot) {
            if node::balance(region, cur) != 0 {
                critical = slot;
            }
            let dir = match self.order.compare(region, cur, key) {
                Ordering::Greater => Dir::Left,
                Ordering::Less => Dir::Right,
                Ordering::Equal => return None,
            };
            slot = Slot::Child(cur, dir);
        }
        Some((slot, critical))
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Remove the node whose key equals `key` and rebalance.
    ///
    /// `None` if the key is absent, in which case nothing is written.
    pub fn delete<R: Region>(&self, region: &mut R, key: &O::Key) -> Option<Removed> {
        let mut path: ArrayVec<Slot, PATH_CAPACITY> = ArrayVec::new();
        let mut slot = Slot::Root;
        let target = loop {
            let cur = self.get(region, slot)?;
            push_bounded(&mut path, slot);
            slot = match self.order.compare(region, cur, key) {
                Ordering::Greater => Slot::Child(cur, Dir::Left),
                Ordering::Less => Slot::Child(cur, Dir::Right),
                Ordering::Equal => break cur,
            };
        };

        let removed = Removed {
            node: target,
            payload: node::payload(region, target),
        };
        let left = node::left(region, target);
        let right = node::right(region, target);

        let orphan = match (left, right) {
            (Some(l), Some(r)) => {
                // Relink the in-order predecessor into the target's place so the
                // recorded path stays valid; the target is then spliced out from
                // where the predecessor was.
                let above = *path.last().expect("path holds the target's link");
                let swap_at = path.len();
                push_bounded(&mut path, Slot::Child(target, Dir::Left));
                let mut pred = l;
                while let Some(next) = node::right(region, pred) {
                    push_bounded(&mut path, Slot::Child(pred, Dir::Right));
                    pred = next;
                }

                let pred_left = node::left(region, pred);
                let balance = node::balance(region, target);
                self.set(region, above, Some(pred));
                node::set_left(region, pred, Some(l));
                node::set_right(region, pred, Some(r));
                node::set_balance(region, pred, balance);
                path[swap_at] = Slot::Child(pred, Dir::Left);
                pred_left
            }
            (l, r) => l.or(r),
        };

        let last = *path.last().expect("path holds the target's link");
        self.set(region, last, orphan);
        node::clear_links(region, target);
        self.rebalance_after_delete(region, &path);
        Some(removed)
    }

    /// Walk back up `path` after the subtree under its last link lost a level.
    fn rebalance_after_delete<R: Region>(&self, region: &mut R, path: &[Slot]) {
        for i in (1..path.len()).rev() {
            let Slot::Child(owner, dir) = path[i] else {
                unreachable!("only the first link on a path is the root");
            };
            let balance = node::balance(region, owner) - dir.delta();
            node::set_balance(region, owner, balance);
            let above = path[i - 1];

            match balance {
                2 => {
                    let heavy =
                        node::right(region, owner).expect("right-heavy node has a right child");
                    match node::balance(region, heavy) {
                        0 => {
                            // Height unchanged by the rotation.
                            self.rotate_left(region, above);
                            return;
                        }
                        1 => self.rotate_left(region, above),
                        _ => self.rotate_right_left(region, above),
                    }
                }
                -2 => {
                    let heavy =
                        node::left(region, owner).expect("left-heavy node has a left child");
                    match node::balance(region, heavy) {
                        0 => {
                            self.rotate_right(region, above);
                            return;
                        }
                        -1 => self.rotate_right(region, above),
                        _ => self.rotate_left_right(region, above),
                    }
                }
                0 => {}
                _ => return,
            }
        }
    }

    // =========================================================================
    // Rotations
    // =========================================================================

    fn rotate_left<R: Region>(&self, region: &mut R, slot: Slot) {
        let n = self.occupant(region, slot);
        let r = node::right(region, n).expect("left rotation needs a right child");
        let inner = node::left(region, r);

        node::set_right(region, n, inner);
        node::set_left(region, r, Some(n));
        self.set(region, slot, Some(r));

        if node::balance(region, r) == 1 {
            node::set_balance(region, r, 0);
            node::set_balance(region, n, 0);
        } else {
            node::set_balance(region, r, -1);
            node::set_balance(region, n, 1);
        }
    }

    fn rotate_right<R: Region>(&self, region: &mut R, slot: Slot) {
        let n = self.occupant(region, slot);
        let l = node::left(region, n).expect("right rotation needs a left child");
        let inner = node::right(region, l);

        node::set_left(region, n, inner);
        node::set_right(region, l, Some(n));
        self.set(region, slot, Some(l));

        if node::balance(region, l) == -1 {
            node::set_balance(region, l, 0);
            node::set_balance(region, n, 0);
        } else {
            node::set_balance(region, l, 1);
            node::set_balance(region, n, -1);
        }
    }

    /// Right-heavy node whose right child leans left.
    fn rotate_right_left<R: Region>(&self, region: &mut R, slot: Slot) {
        let n = self.occupant(region, slot);
        let r = node::right(region, n).expect("double rotation needs a right child");
        let m = node::left(region, r).expect("double rotation needs an inner grandchild");
        let m_left = node::left(region, m);
        let m_right = node::right(region, m);

        node::set_right(region, n, m_left);
        node::set_left(region, r, m_right);
        node::set_left(region, m, Some(n));
        node::set_right(region, m, Some(r));

        let (bn, br) = match node::balance(region, m) {
            -1 => (0, 1),
            1 => (-1, 0),
            _ => (0, 0),
        };
        node::set_balance(region, n, bn);
        node::set_balance(region, r, br);
        node::set_balance(region, m, 0);
        self.set(region, slot, Some(m));
    }

    /// Left-heavy node whose left child leans right.
    fn rotate_left_right<R: Region>(&self, region: &mut R, slot: Slot) {
        let n = self.occupant(region, slot);
        let l = node::left(region, n).expect("double rotation needs a left child");
        let m = node::right(region, l).expect("double rotation needs an inner grandchild");
        let m_left = node::left(region, m);
        let m_right = node::right(region, m);

        node::set_right(region, l, m_left);
        node::set_left(region, n, m_right);
        node::set_left(region, m, Some(l));
        node::set_right(region, m, Some(n));

        let (bl, bn) = match node::balance(region, m) {
            -1 => (0, 1),
            1 => (-1, 0),
            _ => (0, 0),
        };
        node::set_balance(region, l, bl);
        node::set_balance(region, n, bn);
        node::set_balance(region, m, 0);
        self.set(region, slot, Some(m));
    }

    // =========================================================================
    // Free-key search
    // =========================================================================

    /// Smallest key after `start` that no node holds, treating the key space
    /// as cyclic. `None` when every key is taken.
    ///
    /// `start` should lie between one below the minimum legal key and the
    /// maximum; a search that wraps twice without meeting `start` gives up.
    pub fn next_free_key<R: Region>(&self, region: &R, start: &O::Key) -> Option<O::Key>
    where
        O::Key: Clone,
    {
        let order = &self.order;
        let mut next = start.clone();
        let Some(root) = self.root(region) else {
            if order.key_increment(&mut next) {
                order.key_increment(&mut next);
            }
            if order.key_compare(&next, start) == Ordering::Equal {
                return None;
            }
            return Some(next);
        };

        let mut stack: ArrayVec<Pos, MAX_HEIGHT> = ArrayVec::new();
        let mut wrapped = false;
        let mut cur = root;
        loop {
            if order.compare(region, cur, &next) == Ordering::Greater {
                if let Some(l) = node::left(region, cur) {
                    push_bounded(&mut stack, cur);
                    cur = l;
                    continue;
                }
                // `cur` is the first key above `next`.
                order.key_increment(&mut next);
                if order.key_compare(&next, start) == Ordering::Equal {
                    return None;
                }
                if order.compare(region, cur, &next) != Ordering::Equal {
                    return Some(next);
                }
            }

            // `cur` holds a key at or below `next`: move to its in-order successor.
            loop {
                if let Some(r) = node::right(region, cur) {
                    cur = r;
                    break;
                }
                if let Some(up) = stack.pop() {
                    cur = up;
                    order.key_increment(&mut next);
                    if order.key_compare(&next, start) == Ordering::Equal {
                        return None;
                    }
                    if order.compare(region, cur, &next) != Ordering::Equal {
                        return Some(next);
                    }
                    continue;
                }

                // Past the largest key.
                if !order.key_increment(&mut next) {
                    if order.key_compare(&next, start) == Ordering::Equal {
                        return None;
                    }
                    return Some(next);
                }
                if wrapped || order.key_compare(&next, start) == Ordering::Equal {
                    return None;
                }
                trace!("free-key search in tree {} wrapped", self.header);
                wrapped = true;
                cur = root;
                break;
            }
        }
    }

    // =========================================================================
    // Traversal
    // =========================================================================

    /// In-order cursor over every node.
    pub fn iter<'a, R: Region>(&self, region: &'a R) -> InOrder<'a, R> {
        InOrder::new(region, self.root(region))
    }

    /// In-order cursor starting at the first key above `key` (or at `key`
    /// itself when `inclusive`).
    pub fn iter_from<'a, R: Region>(
        &self,
        region: &'a R,
        key: &O::Key,
        inclusive: bool,
    ) -> InOrder<'a, R> {
        InOrder::from_key(region, self.root(region), &self.order, key, inclusive)
    }

    /// Destructive cursor that unlinks nodes leaves-first. See [`LeafFirst`].
    pub fn leaf_first<'a, R: Region>(&self, region: &'a mut R) -> LeafFirst<'a, R> {
        LeafFirst::new(region, self.header)
    }

    /// Undo the unlink of a node returned by [`LeafFirst`].
    ///
    /// Replacing nodes in reverse visit order restores the original tree,
    /// balance factors included.
    pub fn replace<R: Region>(&self, region: &mut R, node: Pos) {
        iter::relink(region, self.header, node);
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Check ordering and every balance factor.
    ///
    /// Trees built with [`AvlTree::insert_unbalanced`] fail this until
    /// [`AvlTree::rebuild`] runs.
    pub fn audit<R: Region>(&self, region: &R) -> Result<Audit> {
        let nodes = self.collect(region);
        for pair in nodes.windows(2) {
            let prev = self.order.key(region, pair[0]);
            if self.order.compare(region, pair[1], &prev) != Ordering::Greater {
                return Err(Error::OutOfOrder { node: pair[1] });
            }
        }
        let height = check_heights(region, self.root(region), 0)?;
        Ok(Audit {
            nodes: nodes.len(),
            height,
        })
    }

    /// Relink every node into a perfectly balanced shape with correct balance
    /// factors. Returns the number of nodes.
    ///
    /// Unlike the engine's other operations this allocates (one position per
    /// node) and is not interruption-safe.
    pub fn rebuild<R: Region>(&self, region: &mut R) -> usize {
        let nodes = self.collect(region);
        let (root, height) = build_balanced(region, &nodes);
        self.set(region, Slot::Root, root);
        debug!(
            "rebuilt tree {} ({} nodes, height {height})",
            self.header,
            nodes.len()
        );
        nodes.len()
    }

    /// In-order node list without the height bound, so degenerate trees can
    /// still be audited and rebuilt.
    fn collect<R: Region>(&self, region: &R) -> Vec<Pos> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        let mut cur = self.root(region);
        loop {
            while let Some(n) = cur {
                stack.push(n);
                cur = node::left(region, n);
            }
            let Some(n) = stack.pop() else {
                break;
            };
            out.push(n);
            cur = node::right(region, n);
        }
        out
    }
}

fn check_heights<R: Region>(region: &R, node: Option<Pos>, depth: usize) -> Result<usize> {
    let Some(n) = node else {
        return Ok(0);
    };
    if depth >= MAX_HEIGHT {
        return Err(Error::TooDeep { limit: MAX_HEIGHT });
    }
    let hl = check_heights(region, node::left(region, n), depth + 1)?;
    let hr = check_heights(region, node::right(region, n), depth + 1)?;

    let actual = hr as i64 - hl as i64;
    let stored = node::balance(region, n);
    if i64::from(stored) != actual {
        return Err(Error::BalanceMismatch {
            node: n,
            stored,
            actual,
        });
    }
    if !(-1..=1).contains(&stored) {
        return Err(Error::Unbalanced {
            node: n,
            balance: stored,
        });
    }
    Ok(hl.max(hr) + 1)
}

/// Link `nodes` (in key order) into a balanced subtree; returns its root and height.
fn build_balanced<R: Region>(region: &mut R, nodes: &[Pos]) -> (Option<Pos>, usize) {
    if nodes.is_empty() {
        return (None, 0);
    }
    let mid = nodes.len() / 2;
    let (left, hl) = build_balanced(region, &nodes[..mid]);
    let (right, hr) = build_balanced(region, &nodes[mid + 1..]);

    let n = nodes[mid];
    node::set_left(region, n, left);
    node::set_right(region, n, right);
    node::set_balance(region, n, (hr as i64 - hl as i64) as i8);
    (Some(n), hl.max(hr) + 1)
}
