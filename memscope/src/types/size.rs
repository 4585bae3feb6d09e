//! This module contains helper functions for creating various byte sizes.
//! All functions are const and are folded at compile time.

/// Returns a usize representing the length in bytes from the given number of kilobytes.
pub const fn kb(kb: usize) -> usize {
    kb * 1024
}

/// Returns a usize representing the length in bytes from the given number of megabytes.
pub const fn mb(mb: usize) -> usize {
    kb(mb) * 1024
}

/// Returns a usize representing the length in bytes from the given number of gigabytes.
pub const fn gb(gb: usize) -> usize {
    mb(gb) * 1024
}
