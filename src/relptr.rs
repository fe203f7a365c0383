//! Relocatable references.
//!
//! A [`RelPtr`] stores the distance from its own storage location to its
//! target instead of the target's address. A block of memory that contains
//! both a reference and its target can be copied or remapped to any base
//! address and the reference still resolves to the same logical target,
//! provided the caller resolves it against the new storage location.
//!
//! Offsets are `u64` and all arithmetic is modular, so targets below the
//! reference simply produce "negative" (wrapped) offsets.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use crate::addr::Addr;

/// Offset value reserved for null.
///
/// An 8-byte reference and a distinct target can never be exactly one byte
/// apart, so this distance never occurs between live objects.
pub const NULL_OFFSET: u64 = 1;

/// Relocatable reference to a `T`, encoded as `target - storage location`.
///
/// The value alone is meaningless: every operation that produces or consumes
/// an address takes `at`, the address the reference is (or will be) stored at.
#[repr(transparent)]
pub struct RelPtr<T> {
    offset: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RelPtr<T> {
    #[inline]
    pub const fn null() -> Self {
        Self::from_raw(NULL_OFFSET)
    }

    /// Reference stored at `at` pointing to `target`.
    #[inline]
    pub fn new(target: Option<Addr>, at: Addr) -> Self {
        match target {
            Some(target) => Self::with_offset(target.wrapping_sub(at)),
            None => Self::null(),
        }
    }

    /// Reinterprets an offset read back from storage.
    #[inline]
    pub const fn from_raw(offset: u64) -> Self {
        Self {
            offset,
            _marker: PhantomData,
        }
    }

    /// The stored offset, as written to storage.
    #[inline]
    pub const fn into_raw(self) -> u64 {
        self.offset
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.offset == NULL_OFFSET
    }

    /// Target address, given the address this reference is stored at.
    #[inline]
    pub fn resolve(self, at: Addr) -> Option<Addr> {
        if self.is_null() {
            None
        } else {
            Some(at.wrapping_add(self.offset))
        }
    }

    #[inline]
    pub fn set(&mut self, target: Option<Addr>, at: Addr) {
        *self = Self::new(target, at);
    }

    /// Compares the resolved target with a raw address.
    #[inline]
    pub fn points_to(self, at: Addr, addr: Option<Addr>) -> bool {
        self.resolve(at) == addr
    }

    /// Whether two references, each resolved at its own location, share a target.
    #[inline]
    pub fn same_target(self, at: Addr, other: RelPtr<T>, other_at: Addr) -> bool {
        self.resolve(at) == other.resolve(other_at)
    }

    /// Orders two references by target address. Null orders below any address.
    #[inline]
    pub fn cmp_target(self, at: Addr, other: RelPtr<T>, other_at: Addr) -> Ordering {
        self.resolve(at).cmp(&other.resolve(other_at))
    }

    /// Signed distance `self - other` in units of `T`.
    ///
    /// `None` if either reference is null or `T` is zero-sized.
    pub fn elements_between(self, at: Addr, other: RelPtr<T>, other_at: Addr) -> Option<i64> {
        let size = mem::size_of::<T>() as i64;
        if size == 0 {
            return None;
        }
        let a = self.resolve(at)?;
        let b = other.resolve(other_at)?;
        Some(a.wrapping_sub(b) as i64 / size)
    }

    /// Same target, different pointee type. The storage location does not
    /// change, so the offset is kept as is.
    #[inline]
    pub const fn cast<U>(self) -> RelPtr<U> {
        RelPtr::from_raw(self.offset)
    }

    /// The reference that reaches the same target when stored at `to`
    /// instead of `from`.
    #[inline]
    pub fn rebase(self, from: Addr, to: Addr) -> Self {
        if self.is_null() {
            return self;
        }
        Self::with_offset(from.wrapping_sub(to).wrapping_add(self.offset))
    }

    #[inline]
    pub fn cast_rebased<U>(self, from: Addr, to: Addr) -> RelPtr<U> {
        self.rebase(from, to).cast()
    }

    /// Advances the target by one `T`.
    #[inline]
    pub fn inc(&mut self) -> &mut Self {
        *self += 1;
        self
    }

    /// Moves the target back by one `T`.
    #[inline]
    pub fn dec(&mut self) -> &mut Self {
        *self -= 1;
        self
    }

    #[inline]
    fn with_offset(offset: u64) -> Self {
        debug_assert_ne!(offset, NULL_OFFSET, "target overlaps its own reference");
        Self::from_raw(offset)
    }

    #[inline]
    fn scaled(count: usize) -> u64 {
        (count as u64).wrapping_mul(mem::size_of::<T>() as u64)
    }
}

impl<T> Clone for RelPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RelPtr<T> {}

/// Raw offset equality. Only meaningful for references stored at the same
/// location; use [`RelPtr::same_target`] otherwise.
impl<T> PartialEq for RelPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset
    }
}

impl<T> Eq for RelPtr<T> {}

impl<T> Hash for RelPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
    }
}

impl<T> Default for RelPtr<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for RelPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("RelPtr(null)")
        } else {
            write!(f, "RelPtr({:+})", self.offset as i64)
        }
    }
}

// Pointer arithmetic. Null stays null.

impl<T> Add<usize> for RelPtr<T> {
    type Output = Self;

    fn add(self, count: usize) -> Self {
        if self.is_null() {
            return self;
        }
        Self::with_offset(self.offset.wrapping_add(Self::scaled(count)))
    }
}

impl<T> Sub<usize> for RelPtr<T> {
    type Output = Self;

    fn sub(self, count: usize) -> Self {
        if self.is_null() {
            return self;
        }
        Self::with_offset(self.offset.wrapping_sub(Self::scaled(count)))
    }
}

impl<T> AddAssign<usize> for RelPtr<T> {
    fn add_assign(&mut self, count: usize) {
        *self = *self + count;
    }
}

impl<T> SubAssign<usize> for RelPtr<T> {
    fn sub_assign(&mut self, count: usize) {
        *self = *self - count;
    }
}
