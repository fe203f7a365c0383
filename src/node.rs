//! Intrusive node header.
//!
//! Callers embed this 32-byte header in their own records (or allocate it
//! next to them) and give the tree its position. The engine only ever
//! touches the header:
//!
//! ```text
//! [0..8)   payload: relative reference to the caller's record (opaque)
//! [8]      balance: i8, height(right) - height(left)
//! [9..16)  padding
//! [16..24) left:  relative reference to the left child
//! [24..32) right: relative reference to the right child
//! ```

use crate::addr::Pos;
use crate::region::Region;

pub const NODE_SIZE: usize = 32;
pub const NODE_ALIGN: usize = 8;

const PAYLOAD: u64 = 0;
const BALANCE: u64 = 8;
const LEFT: u64 = 16;
const RIGHT: u64 = 24;

/// Stand-in for a node header in typed references: `RelPtr<NodeSlot>`
/// arithmetic steps over whole headers.
#[repr(C, align(8))]
pub struct NodeSlot(pub [u8; NODE_SIZE]);

/// Child direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dir {
    Left,
    Right,
}

impl Dir {
    /// Balance change when the subtree on this side grows by one level.
    #[inline]
    pub(crate) fn delta(self) -> i8 {
        match self {
            Dir::Left => -1,
            Dir::Right => 1,
        }
    }

    #[inline]
    fn field(self) -> u64 {
        match self {
            Dir::Left => LEFT,
            Dir::Right => RIGHT,
        }
    }
}

/// Snapshot of a node header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeView {
    pub payload: Option<Pos>,
    pub balance: i8,
    pub left: Option<Pos>,
    pub right: Option<Pos>,
}

/// Prepare a header for insertion: no children, balance 0.
pub fn init<R: Region>(region: &mut R, node: Pos, payload: Option<Pos>) {
    region.store_ref(node.add(PAYLOAD), payload);
    clear_links(region, node);
}

pub fn read<R: Region>(region: &R, node: Pos) -> NodeView {
    NodeView {
        payload: payload(region, node),
        balance: balance(region, node),
        left: left(region, node),
        right: right(region, node),
    }
}

#[inline]
pub fn payload<R: Region>(region: &R, node: Pos) -> Option<Pos> {
    region.load_ref(node.add(PAYLOAD))
}

#[inline]
pub fn balance<R: Region>(region: &R, node: Pos) -> i8 {
    region.read_i8(node.add(BALANCE))
}

#[inline]
pub fn left<R: Region>(region: &R, node: Pos) -> Option<Pos> {
    child(region, node, Dir::Left)
}

#[inline]
pub fn right<R: Region>(region: &R, node: Pos) -> Option<Pos> {
    child(region, node, Dir::Right)
}

#[inline]
pub fn child<R: Region>(region: &R, node: Pos, dir: Dir) -> Option<Pos> {
    region.load_ref(link_field(node, dir))
}

/// Position of the `dir` link inside the header at `node`.
#[inline]
pub(crate) fn link_field(node: Pos, dir: Dir) -> Pos {
    node.add(dir.field())
}

#[inline]
pub(crate) fn set_balance<R: Region>(region: &mut R, node: Pos, balance: i8) {
    debug_assert!((-2..=2).contains(&balance), "balance {balance} out of range");
    region.write_i8(node.add(BALANCE), balance);
}

#[inline]
pub(crate) fn set_left<R: Region>(region: &mut R, node: Pos, to: Option<Pos>) {
    set_child(region, node, Dir::Left, to);
}

#[inline]
pub(crate) fn set_right<R: Region>(region: &mut R, node: Pos, to: Option<Pos>) {
    set_child(region, node, Dir::Right, to);
}

#[inline]
pub(crate) fn set_child<R: Region>(region: &mut R, node: Pos, dir: Dir, to: Option<Pos>) {
    region.store_ref(link_field(node, dir), to);
}

/// Drop both links and reset the balance; the payload is kept.
pub(crate) fn clear_links<R: Region>(region: &mut R, node: Pos) {
    set_balance(region, node, 0);
    set_left(region, node, None);
    set_right(region, node, None);
}
