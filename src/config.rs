//! Arena configuration.

/// Configuration for an [`Arena`](crate::Arena).
#[derive(Debug, Clone)]
pub struct Config {
    /// Bytes reserved when the arena is created (rounded up to the header size)
    pub initial_capacity: usize,
    /// Hard limit on arena size in bytes
    pub max_capacity: usize,
    /// Grow (reallocate or extend and remap) when an allocation does not fit
    pub growable: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_capacity: 64 * 1024,
            max_capacity: 1 << 30,
            growable: true,
        }
    }
}

impl Config {
    /// A fixed-size arena of exactly `capacity` bytes.
    pub fn fixed(capacity: usize) -> Self {
        Self {
            initial_capacity: capacity,
            max_capacity: capacity,
            growable: false,
        }
    }
}
