//! rsmegapage: the fast megapage table of a page-based memory allocator.
//!
//! Maps a megapage index (`address >> FAST_MEGAPAGE_SHIFT`) to the kind of
//! allocator that owns it. Two tiers:
//! - Fast-fast bits (lock-free bit test for the hot kind at low indices)
//! - Growable snapshot table (lock-free reads, writes under the heap lock)
//!
//! Snapshots are carved out of an immortal heap and never freed, so readers
//! holding a stale snapshot always see valid memory.
//!
//! # Usage
//!
//! ```ignore
//! use rsmegapage::{FastMegapageKind, global};
//!
//! global::table().set_by_index(42, FastMegapageKind::LargeSlab);
//! assert_eq!(global::table().lookup(42), FastMegapageKind::LargeSlab);
//! ```

pub mod bitfield_vector;
pub mod bitvector;
pub mod config;
pub mod error;
pub mod global;
pub mod immortal_heap;
pub mod kind;
pub mod platform;
pub mod sync;
pub mod table;

#[cfg(feature = "ffi")]
pub mod ffi;

/// Megapage size used to derive indices from addresses (16 MiB).
pub const FAST_MEGAPAGE_SHIFT: usize = 24;
pub const FAST_MEGAPAGE_SIZE: usize = 1 << FAST_MEGAPAGE_SHIFT;

/// Default number of fast-fast bits (covers the low 8 TiB of address space).
pub const DEFAULT_FAST_BIT_COUNT: usize = 524_288;

// Re-export the main types at crate root for convenience
pub use config::TableConfig;
pub use error::{ConfigError, Error, Result};
pub use immortal_heap::ImmortalHeap;
pub use kind::FastMegapageKind;
pub use sync::{HeapLock, HeapLockGuard};
pub use table::{FastMegapageTable, Snapshot, TableStats};
