//! Process-wide table state.
//!
//! The heap lock is a plain static; the table and its immortal heap are
//! built on first use from [`TableConfig::from_env`] and live for the rest
//! of the process. Code that owns its own allocator instance should build a
//! [`FastMegapageTable`] directly instead.

use crate::config::TableConfig;
use crate::immortal_heap::ImmortalHeap;
use crate::sync::HeapLock;
use crate::table::FastMegapageTable;
use std::sync::OnceLock;

// =============================================================================
// Global static state
// =============================================================================

static HEAP_LOCK: HeapLock = HeapLock::new();
static TABLE: OnceLock<FastMegapageTable<'static>> = OnceLock::new();

/// The process-wide fast megapage table.
pub fn table() -> &'static FastMegapageTable<'static> {
    TABLE.get_or_init(init_cold)
}

/// The lock guarding writes to [`table`], for callers that compose several
/// updates through `set_by_index_locked`.
pub fn heap_lock() -> &'static HeapLock {
    &HEAP_LOCK
}

/// The immortal heap backing [`table`].
pub fn immortal_heap() -> &'static ImmortalHeap {
    table().immortal_heap()
}

#[cold]
#[inline(never)]
fn init_cold() -> FastMegapageTable<'static> {
    let config = TableConfig::from_env().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "ignoring invalid megapage table configuration");
        TableConfig::default()
    });
    let heap: &'static ImmortalHeap =
        Box::leak(Box::new(ImmortalHeap::with_chunk_size(config.chunk_size)));
    tracing::debug!(
        fast_bit_count = config.fast_bit_count,
        chunk_size = heap.chunk_size(),
        "initializing global megapage table"
    );
    FastMegapageTable::new(&config, &HEAP_LOCK, heap)
}
