//! # offset-avl
//!
//! An intrusive AVL tree whose links are relative offsets, so a whole tree
//! (nodes, root, payload references) can live in a memory-mapped file or a
//! shared-memory segment and be used at whatever address it is mapped.
//!
//! The engine never allocates and never owns a node. Callers reserve node
//! headers ([`node::NODE_SIZE`] bytes each) in a [`Region`], usually an
//! [`Arena`], point each at their own record, and hand positions to an
//! [`AvlTree`]. A [`KeyOrder`] derives keys from those records.
//!
//! ## Example
//!
//! ```rust
//! use offset_avl::{node, Arena, AvlTree, U64Keys, TREE_HEADER_SIZE};
//!
//! let mut arena = Arena::new();
//! let header = arena.alloc(TREE_HEADER_SIZE, 8)?;
//! let tree = AvlTree::create(&mut arena, header, U64Keys::default());
//!
//! for key in [10u64, 20, 5] {
//!     let record = arena.alloc_bytes(&key.to_le_bytes())?;
//!     let n = arena.alloc_node()?;
//!     node::init(&mut arena, n, Some(record));
//!     assert!(tree.insert(&mut arena, n));
//! }
//!
//! // The arena bytes are self-contained: a copy at a new address works as is.
//! let copy = Arena::from_bytes(arena.as_bytes().to_vec())?;
//! let keys: Vec<u64> = tree.iter(&copy).map(|n| tree.key_of(&copy, n)).collect();
//! assert_eq!(keys, [5, 10, 20]);
//! # Ok::<(), offset_avl::Error>(())
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

mod addr;
mod arena;
mod config;
mod error;
mod iter;
pub mod node;
mod order;
mod region;
mod relptr;
mod tree;

pub use addr::{Addr, Pos};
pub use arena::{Arena, HEADER_SIZE};
pub use config::Config;
pub use error::{Error, Result};
pub use iter::{InOrder, LeafFirst};
pub use order::{KeyOrder, U64Keys};
pub use region::Region;
pub use relptr::{RelPtr, NULL_OFFSET};
pub use tree::{Audit, AvlTree, Removed, MAX_HEIGHT, TREE_HEADER_SIZE};

#[cfg(test)]
mod proptests;
