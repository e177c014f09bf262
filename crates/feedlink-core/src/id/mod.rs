//! Unique identifier allocation.
//!
//! This module provides the process-wide allocator used for action callback
//! ids and feed object ids. Identifiers are opaque, strictly increasing
//! within the process, and never persisted.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-wide unique identifier.
///
/// Identifiers are strictly increasing, which callers rely on for
/// registration-order iteration when ids are kept in an ordered set.
///
/// # Example
///
/// ```
/// use feedlink_core::id::next_id;
///
/// let a = next_id();
/// let b = next_id();
/// assert!(b > a);
/// ```
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
