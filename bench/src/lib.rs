//! Shared fixtures for the table benchmarks.

use rsmegapage::{FastMegapageKind, FastMegapageTable, HeapLock, ImmortalHeap, TableConfig};

/// A leaked table with the default fast bit count.
pub fn leaked_table() -> &'static FastMegapageTable<'static> {
    leaked_table_with(&TableConfig::default())
}

pub fn leaked_table_with(config: &TableConfig) -> &'static FastMegapageTable<'static> {
    let lock = Box::leak(Box::new(HeapLock::new()));
    let heap = Box::leak(Box::new(ImmortalHeap::with_chunk_size(config.chunk_size)));
    Box::leak(Box::new(FastMegapageTable::new(config, lock, heap)))
}

/// Populate `count` indices starting at `first`, cycling through the cold kinds.
pub fn populate(table: &FastMegapageTable<'_>, first: usize, count: usize) {
    const COLD: [FastMegapageKind; 2] =
        [FastMegapageKind::MediumSegregated, FastMegapageKind::LargeSlab];
    for i in 0..count {
        table.set_by_index(first + i, COLD[i % COLD.len()]);
    }
}
