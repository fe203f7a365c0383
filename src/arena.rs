//! Arenas: regions with bump allocation.
//!
//! An arena is a single contiguous block, either on the heap or a shared
//! memory mapping of a file. Allocations are never freed individually; the
//! tree engine does not allocate at all, so callers carve node and payload
//! slots out of an arena and hand their positions to the tree.
//!
//! Growing an arena moves it: a heap arena reallocates, a mapped arena
//! extends its file and maps it again. Positions stay valid and every stored
//! reference is relative, so nothing inside needs fixing up.
//!
//! Layout of the 32-byte header:
//!
//! ```text
//! [0..8)   magic "OAVLARN1"
//! [8..16)  used bytes (bump cursor), u64 LE
//! [16..24) anchor: relative reference to a caller-chosen root object
//! [24..32) reserved
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;

use log::debug;
use memmap2::MmapMut;

use crate::addr::{Addr, Pos};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::node::{NODE_ALIGN, NODE_SIZE};
use crate::region::Region;

const MAGIC: [u8; 8] = *b"OAVLARN1";
const USED: Pos = Pos::new(8);
const ANCHOR: Pos = Pos::new(16);

/// Size of the arena header. The first allocation starts here.
pub const HEADER_SIZE: usize = 32;

/// Minimum alignment for allocations
const MIN_ALIGN: usize = 8;

enum Backing {
    Heap(Vec<u8>),
    Mapped { file: File, map: MmapMut },
}

/// A growable, relocatable region with bump allocation.
pub struct Arena {
    backing: Backing,
    config: Config,
}

impl Arena {
    /// Create a heap arena with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a heap arena with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let capacity = config.initial_capacity.max(HEADER_SIZE);
        let mut arena = Self {
            backing: Backing::Heap(vec![0u8; capacity]),
            config,
        };
        arena.write_header();
        arena
    }

    /// Adopt a block previously produced by [`Arena::as_bytes`] (or any copy
    /// of a live arena). The block may live at any address.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        validate(&bytes)?;
        let defaults = Config::default();
        let config = Config {
            initial_capacity: bytes.len(),
            max_capacity: defaults.max_capacity.max(bytes.len()),
            ..defaults
        };
        Ok(Self {
            backing: Backing::Heap(bytes),
            config,
        })
    }

    /// Create (or truncate) `path` and map it as a fresh arena.
    pub fn create(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let capacity = config.initial_capacity.max(HEADER_SIZE);
        file.set_len(capacity as u64)?;
        let map = map_file(&file)?;
        let mut arena = Self {
            backing: Backing::Mapped { file, map },
            config,
        };
        arena.write_header();
        debug!(
            "created mapped arena {} ({capacity} bytes at {:?})",
            path.display(),
            arena.base()
        );
        Ok(arena)
    }

    /// Map an existing arena file.
    pub fn open(path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = map_file(&file)?;
        validate(&map)?;
        let arena = Self {
            backing: Backing::Mapped { file, map },
            config,
        };
        debug!(
            "opened mapped arena {} ({} of {} bytes used, at {:?})",
            path.display(),
            arena.used(),
            arena.capacity(),
            arena.base()
        );
        Ok(arena)
    }

    /// Allocate `size` zeroed bytes aligned to `align` (a power of two).
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<Pos> {
        let align = align.max(MIN_ALIGN);
        debug_assert!(align.is_power_of_two());

        let used = self.used();
        let start = (used + align - 1) & !(align - 1);
        let end = start.checked_add(size).ok_or(Error::OutOfSpace {
            requested: size,
            capacity: self.capacity(),
        })?;
        if end > self.capacity() {
            self.grow(end)?;
        }

        self.bytes_mut()[start..end].fill(0);
        self.write_u64(USED, end as u64);
        Ok(Pos::new(start as u64))
    }

    /// Allocate a slot for one node header.
    pub fn alloc_node(&mut self) -> Result<Pos> {
        self.alloc(NODE_SIZE, NODE_ALIGN)
    }

    /// Allocate and copy bytes into the arena.
    pub fn alloc_bytes(&mut self, bytes: &[u8]) -> Result<Pos> {
        let pos = self.alloc(bytes.len(), 1)?;
        let at = pos.as_usize();
        self.bytes_mut()[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(pos)
    }

    /// Bytes handed out so far, header included.
    pub fn used(&self) -> usize {
        self.read_u64(USED) as usize
    }

    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.backing, Backing::Mapped { .. })
    }

    /// The used part of the arena. Copying these bytes anywhere and passing
    /// them to [`Arena::from_bytes`] reproduces the arena.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes()[..self.used()]
    }

    /// The object recorded with [`Arena::set_anchor`], typically a tree header.
    pub fn anchor(&self) -> Option<Pos> {
        self.load_ref(ANCHOR)
    }

    pub fn set_anchor(&mut self, anchor: Option<Pos>) {
        self.store_ref(ANCHOR, anchor);
    }

    /// Write dirty pages of a mapped arena back to its file.
    pub fn flush(&self) -> Result<()> {
        if let Backing::Mapped { map, .. } = &self.backing {
            map.flush()?;
            debug!("flushed mapped arena ({} bytes used)", self.used());
        }
        Ok(())
    }

    fn write_header(&mut self) {
        self.bytes_mut()[..HEADER_SIZE].fill(0);
        self.bytes_mut()[..MAGIC.len()].copy_from_slice(&MAGIC);
        self.write_u64(USED, HEADER_SIZE as u64);
        self.set_anchor(None);
    }

    fn grow(&mut self, needed: usize) -> Result<()> {
        let capacity = self.capacity();
        if !self.config.growable || needed > self.config.max_capacity {
            return Err(Error::OutOfSpace {
                requested: needed,
                capacity,
            });
        }

        let new_capacity = capacity
            .saturating_mul(2)
            .max(needed)
            .min(self.config.max_capacity);
        let old_base = self.base();
        match &mut self.backing {
            Backing::Heap(bytes) => bytes.resize(new_capacity, 0),
            Backing::Mapped { file, map } => {
                map.flush()?;
                file.set_len(new_capacity as u64)?;
                *map = map_file(file)?;
            }
        }
        debug!(
            "arena grew {capacity} -> {new_capacity} bytes, base {old_base:?} -> {:?}",
            self.base()
        );
        Ok(())
    }
}

impl Default for Arena {
    fn default() -> Self {
        Self::new()
    }
}

impl Region for Arena {
    #[inline]
    fn base(&self) -> Addr {
        Addr::from_ptr(self.bytes().as_ptr())
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        match &self.backing {
            Backing::Heap(bytes) => &bytes[..],
            Backing::Mapped { map, .. } => &map[..],
        }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.backing {
            Backing::Heap(bytes) => &mut bytes[..],
            Backing::Mapped { map, .. } => &mut map[..],
        }
    }
}

fn map_file(file: &File) -> Result<MmapMut> {
    // SAFETY: the mapping is shared with the file we hold open read-write.
    // The arena only resizes the file after flushing and immediately replaces
    // the mapping. Outside writers must be serialized by the caller.
    let map = unsafe { MmapMut::map_mut(file)? };
    Ok(map)
}

fn validate(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::Truncated { len: bytes.len() });
    }
    if bytes[..MAGIC.len()] != MAGIC {
        return Err(Error::BadMagic);
    }
    let mut used = [0u8; 8];
    used.copy_from_slice(&bytes[8..16]);
    let used = u64::from_le_bytes(used);
    if used < HEADER_SIZE as u64 || used > bytes.len() as u64 {
        return Err(Error::CorruptHeader(format!(
            "used {used} outside {HEADER_SIZE}..={}",
            bytes.len()
        )));
    }
    Ok(())
}
