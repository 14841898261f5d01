//! Fast megapage table: megapage index -> [`FastMegapageKind`].
//!
//! Lookups never lock. They test the fast-fast bits, then read the current
//! snapshot through a single acquire load. Writers serialize on the heap
//! lock; a write outside the current snapshot's range builds a larger
//! snapshot in the immortal heap, copies the old entries forward and
//! publishes it with a release store. Superseded snapshots are never
//! written again and stay reachable through `previous`.

use crate::FAST_MEGAPAGE_SHIFT;
use crate::bitfield_vector::{self, BitfieldVector, WORD_SIZE};
use crate::bitvector::{self, Bitvector};
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::immortal_heap::{ImmortalHeap, MIN_ALIGN};
use crate::kind::{FastMegapageKind, KIND_BITS};
use crate::sync::{HeapLock, HeapLockGuard};
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Size of a snapshot's header, which precedes its words in one allocation.
pub const SNAPSHOT_HEADER_SIZE: usize = mem::size_of::<Snapshot<'static>>();

/// Snapshot allocations are rounded up to this many bytes.
pub const SNAPSHOT_ALIGN: usize = MIN_ALIGN;

/// One generation of the growable table, covering `[index_begin, index_end)`.
pub struct Snapshot<'h> {
    index_begin: usize,
    index_end: usize,
    generation: usize,
    previous: Option<&'h Snapshot<'h>>,
    words: &'h [AtomicU32],
}

/// The shared empty snapshot every table starts from.
static NULL_SNAPSHOT: Snapshot<'static> = Snapshot {
    index_begin: 0,
    index_end: 0,
    generation: 0,
    previous: None,
    words: &[],
};

impl<'h> Snapshot<'h> {
    #[inline]
    pub fn index_begin(&self) -> usize {
        self.index_begin
    }

    #[inline]
    pub fn index_end(&self) -> usize {
        self.index_end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index_end - self.index_begin
    }

    /// True only for the shared empty snapshot.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.index_end == self.index_begin
    }

    /// Number of snapshots published before this one.
    #[inline]
    pub fn generation(&self) -> usize {
        self.generation
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index >= self.index_begin && index < self.index_end
    }

    /// The snapshot this one superseded.
    #[inline]
    pub fn previous(&self) -> Option<&'h Snapshot<'h>> {
        self.previous
    }

    /// This snapshot followed by every snapshot it superseded.
    pub fn history(&self) -> impl Iterator<Item = &Snapshot<'h>> {
        core::iter::successors(Some(self), |snapshot| snapshot.previous)
    }

    #[inline]
    pub fn get(&self, index: usize) -> FastMegapageKind {
        if !self.contains(index) {
            return FastMegapageKind::Unallocated;
        }
        FastMegapageKind::from_bits(self.bits().get(index - self.index_begin))
    }

    #[inline]
    fn bits(&self) -> BitfieldVector<'h> {
        BitfieldVector::new(self.words, KIND_BITS)
    }

    /// Caller holds the heap lock and this is the current snapshot.
    #[inline]
    fn store(&self, index: usize, kind: FastMegapageKind) {
        debug_assert!(self.contains(index));
        self.bits().set(index - self.index_begin, kind.to_bits());
    }
}

impl core::fmt::Debug for Snapshot<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Snapshot")
            .field("index_begin", &self.index_begin)
            .field("index_end", &self.index_end)
            .field("generation", &self.generation)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Point-in-time summary of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStats {
    pub index_begin: usize,
    pub index_end: usize,
    /// Snapshots published so far.
    pub generations: usize,
    pub fast_bit_count: usize,
    pub fast_bits_set: usize,
}

pub struct FastMegapageTable<'h> {
    instance: AtomicPtr<Snapshot<'h>>,
    fast_bits: &'h [AtomicU64],
    fast_bit_count: usize,
    lock: &'h HeapLock,
    heap: &'h ImmortalHeap,
}

/// Compute the range of the snapshot replacing `old` so that it covers `index`.
fn grown_range(old: &Snapshot<'_>, index: usize) -> (usize, usize) {
    if old.is_null() {
        return (index, index + 1);
    }
    let span = old.len();
    if index < old.index_begin {
        (index.min(old.index_begin.saturating_sub(span)), old.index_end)
    } else {
        debug_assert!(index >= old.index_end);
        (old.index_begin, (index + 1).max(old.index_end.saturating_add(span)))
    }
}

/// Bytes needed for a snapshot holding `num_fields` entries, rounded up to
/// [`SNAPSHOT_ALIGN`].
fn snapshot_size(num_fields: usize) -> usize {
    let raw = SNAPSHOT_HEADER_SIZE + bitfield_vector::num_words(num_fields, KIND_BITS) * WORD_SIZE;
    (raw + SNAPSHOT_ALIGN - 1) & !(SNAPSHOT_ALIGN - 1)
}

impl<'h> FastMegapageTable<'h> {
    /// Create an empty table whose writers serialize on `lock` and whose
    /// snapshots are carved from `heap`.
    pub fn new(config: &TableConfig, lock: &'h HeapLock, heap: &'h ImmortalHeap) -> Self {
        let fast_bits = unsafe {
            heap.allocate_zeroed_slice::<AtomicU64>(
                bitvector::num_words(config.fast_bit_count),
                "fast_megapage_table/fast_bits",
            )
        };
        Self {
            instance: AtomicPtr::new(
                &NULL_SNAPSHOT as *const Snapshot<'static> as *mut Snapshot<'h>,
            ),
            fast_bits,
            fast_bit_count: config.fast_bit_count,
            lock,
            heap,
        }
    }

    #[inline]
    pub fn fast_bit_count(&self) -> usize {
        self.fast_bit_count
    }

    /// The lock writers of this table serialize on.
    #[inline]
    pub fn heap_lock(&self) -> &'h HeapLock {
        self.lock
    }

    /// The heap snapshots are carved from.
    #[inline]
    pub fn immortal_heap(&self) -> &'h ImmortalHeap {
        self.heap
    }

    #[inline]
    fn fast_bits(&self) -> Bitvector<'h> {
        Bitvector::new(self.fast_bits)
    }

    /// The currently published snapshot.
    #[inline]
    pub fn snapshot(&self) -> &'h Snapshot<'h> {
        // SAFETY: the pointer is either NULL_SNAPSHOT or a snapshot fully
        // initialized in the immortal heap before its release store.
        unsafe { &*self.instance.load(Ordering::Acquire) }
    }

    /// Kind of the megapage at `index`. Never blocks.
    ///
    /// The fast bit is tested with acquire ordering before the snapshot is
    /// read, pairing with the release clear in `set_with_lock_held`.
    #[inline]
    pub fn lookup(&self, index: usize) -> FastMegapageKind {
        if index < self.fast_bit_count && self.fast_bits().get(index) {
            return FastMegapageKind::HOT;
        }
        self.snapshot().get(index)
    }

    /// Kind of the megapage containing `addr`.
    #[inline]
    pub fn lookup_address(&self, addr: usize) -> FastMegapageKind {
        self.lookup(addr >> FAST_MEGAPAGE_SHIFT)
    }

    /// Record `kind` for `index`, taking the heap lock.
    pub fn set_by_index(&self, index: usize, kind: FastMegapageKind) {
        let guard = self.lock.lock();
        self.set_with_lock_held(&guard, index, kind);
    }

    /// Record `kind` for `index` while the caller already holds the heap lock.
    ///
    /// Panics if `guard` belongs to a different lock.
    pub fn set_by_index_locked(
        &self,
        guard: &HeapLockGuard<'_>,
        index: usize,
        kind: FastMegapageKind,
    ) {
        self.set_with_lock_held(guard, index, kind);
    }

    pub fn set_by_address(&self, addr: usize, kind: FastMegapageKind) {
        self.set_by_index(addr >> FAST_MEGAPAGE_SHIFT, kind);
    }

    /// Record `kind` for every megapage overlapping `[begin, end)`.
    pub fn set_range(&self, begin: usize, end: usize, kind: FastMegapageKind) {
        let guard = self.lock.lock();
        self.set_range_locked(&guard, begin, end, kind);
    }

    pub fn set_range_locked(
        &self,
        guard: &HeapLockGuard<'_>,
        begin: usize,
        end: usize,
        kind: FastMegapageKind,
    ) {
        if begin >= end {
            return;
        }
        let first = begin >> FAST_MEGAPAGE_SHIFT;
        let last = (end - 1) >> FAST_MEGAPAGE_SHIFT;
        for index in first..=last {
            self.set_with_lock_held(guard, index, kind);
        }
    }

    fn set_with_lock_held(&self, guard: &HeapLockGuard<'_>, index: usize, kind: FastMegapageKind) {
        assert!(guard.holds(self.lock), "heap lock guard belongs to another lock");
        assert!(index < usize::MAX, "megapage index overflow");

        let in_fast_range = index < self.fast_bit_count;
        if in_fast_range && kind.is_hot() {
            self.fast_bits().set(index, true);
            return;
        }

        let instance = self.snapshot();
        if instance.contains(index) {
            instance.store(index, kind);
        } else {
            self.grow(instance, index).store(index, kind);
        }

        // Clear after the snapshot holds the new kind. The clear is a release
        // and lookup's bit test an acquire, so a reader that misses the bit
        // also sees the snapshot store.
        if in_fast_range {
            self.fast_bits().set(index, false);
        }
    }

    /// Publish a snapshot covering `index` and everything `old` covers.
    #[cold]
    fn grow(&self, old: &'h Snapshot<'h>, index: usize) -> &'h Snapshot<'h> {
        let (index_begin, mut index_end) = grown_range(old, index);
        assert!(index_end > index_begin);

        // Size the allocation first, then widen the range to fill it.
        let size = snapshot_size(index_end - index_begin);
        let num_words = (size - SNAPSHOT_HEADER_SIZE) / WORD_SIZE;
        index_end = index_begin.saturating_add(bitfield_vector::num_fields(num_words, KIND_BITS));
        assert!(index_end > index_begin && index_end > index);

        let block = self
            .heap
            .allocate(size, mem::align_of::<Snapshot<'h>>(), "fast_megapage_table/instance")
            .as_ptr();

        // SAFETY: `block` is `size` bytes, aligned for Snapshot, and owned by
        // us until published. The header size is a multiple of the word
        // alignment, so the words directly follow it.
        let snapshot = unsafe {
            ptr::write_bytes(block, 0, size);
            let words = core::slice::from_raw_parts(
                block.add(SNAPSHOT_HEADER_SIZE) as *const AtomicU32,
                num_words,
            );
            let snapshot = block as *mut Snapshot<'h>;
            snapshot.write(Snapshot {
                index_begin,
                index_end,
                generation: old.generation + 1,
                previous: Some(old),
                words,
            });
            &*snapshot
        };

        let bits = snapshot.bits();
        for i in old.index_begin..old.index_end {
            bits.set(i - index_begin, old.get(i).to_bits());
        }

        tracing::debug!(
            old_begin = old.index_begin,
            old_end = old.index_end,
            new_begin = index_begin,
            new_end = index_end,
            bytes = size,
            generation = snapshot.generation,
            "fast megapage table grew"
        );

        self.instance
            .store(snapshot as *const Snapshot<'h> as *mut Snapshot<'h>, Ordering::Release);

        #[cfg(feature = "debug")]
        {
            if let Err(err) = self.verify() {
                panic!("fast megapage table corrupt after growth: {err}");
            }
        }

        snapshot
    }

    pub fn stats(&self) -> TableStats {
        let snapshot = self.snapshot();
        TableStats {
            index_begin: snapshot.index_begin,
            index_end: snapshot.index_end,
            generations: snapshot.generation,
            fast_bit_count: self.fast_bit_count,
            fast_bits_set: self.fast_bits().count_ones(),
        }
    }

    /// Check the snapshot chain: every snapshot is non-empty, sized for its
    /// range, numbered one past its predecessor and covers its range, and
    /// the chain ends at the null snapshot.
    pub fn verify(&self) -> Result<()> {
        let corrupt = |generation: usize, reason: String| Error::Corrupt { generation, reason };

        for (depth, snapshot) in self.snapshot().history().enumerate() {
            let Some(previous) = snapshot.previous else {
                if !snapshot.is_null() || snapshot.generation != 0 {
                    return Err(corrupt(depth, "chain does not end at the null snapshot".into()));
                }
                continue;
            };
            if snapshot.is_null() {
                return Err(corrupt(depth, "empty snapshot with a predecessor".into()));
            }
            if snapshot.generation != previous.generation + 1 {
                return Err(corrupt(
                    depth,
                    format!(
                        "generation {} follows generation {}",
                        snapshot.generation, previous.generation
                    ),
                ));
            }
            if bitfield_vector::num_fields(snapshot.words.len(), KIND_BITS) < snapshot.len() {
                return Err(corrupt(
                    depth,
                    format!("{} words cannot hold {} entries", snapshot.words.len(), snapshot.len()),
                ));
            }
            if !previous.is_null()
                && (previous.index_begin < snapshot.index_begin
                    || previous.index_end > snapshot.index_end)
            {
                return Err(corrupt(
                    depth,
                    format!(
                        "[{}, {}) does not cover predecessor [{}, {})",
                        snapshot.index_begin,
                        snapshot.index_end,
                        previous.index_begin,
                        previous.index_end
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_table(fast_bit_count: usize) -> FastMegapageTable<'static> {
        let lock = Box::leak(Box::new(HeapLock::new()));
        let heap = Box::leak(Box::new(ImmortalHeap::new()));
        let config = TableConfig::builder()
            .fast_bit_count(fast_bit_count)
            .build()
            .unwrap();
        FastMegapageTable::new(&config, lock, heap)
    }

    #[test]
    fn test_starts_at_null_snapshot() {
        let table = make_table(64);
        let snapshot = table.snapshot();
        assert!(snapshot.is_null());
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.previous().is_none());
        assert_eq!(table.lookup(0), FastMegapageKind::Unallocated);
        assert_eq!(table.lookup(usize::MAX - 1), FastMegapageKind::Unallocated);
        assert!(table.verify().is_ok());
    }

    #[test]
    fn test_first_write_fills_rounded_allocation() {
        let table = make_table(0);
        table.set_by_index(1000, FastMegapageKind::LargeSlab);

        let snapshot = table.snapshot();
        assert_eq!(snapshot.index_begin(), 1000);
        let size = snapshot_size(1);
        let words = (size - SNAPSHOT_HEADER_SIZE) / WORD_SIZE;
        assert_eq!(snapshot.len(), bitfield_vector::num_fields(words, KIND_BITS));
        assert!(snapshot.len() > 1);
        assert_eq!(size % SNAPSHOT_ALIGN, 0);
    }

    #[test]
    fn test_grown_range_doubles_span() {
        let table = make_table(0);
        table.set_by_index(1000, FastMegapageKind::MediumSegregated);
        let first = table.snapshot();
        let span = first.len();

        table.set_by_index(first.index_end(), FastMegapageKind::LargeSlab);
        let second = table.snapshot();
        assert_eq!(second.index_begin(), 1000);
        assert!(second.index_end() >= first.index_end() + span);

        let (begin, end) = grown_range(second, 10);
        assert_eq!(begin, 10.min(1000usize.saturating_sub(second.len())));
        assert_eq!(end, second.index_end());
    }

    #[test]
    fn test_grow_below_saturates_at_zero() {
        let table = make_table(0);
        table.set_by_index(5, FastMegapageKind::LargeSlab);
        table.set_by_index(2, FastMegapageKind::MediumSegregated);
        let snapshot = table.snapshot();
        assert_eq!(snapshot.index_begin(), 0);
        assert_eq!(table.lookup(5), FastMegapageKind::LargeSlab);
        assert_eq!(table.lookup(2), FastMegapageKind::MediumSegregated);
    }

    #[test]
    fn test_in_range_write_does_not_grow() {
        let table = make_table(0);
        table.set_by_index(100, FastMegapageKind::LargeSlab);
        let generation = table.snapshot().generation();
        table.set_by_index(101, FastMegapageKind::MediumSegregated);
        table.set_by_index(100, FastMegapageKind::Unallocated);
        assert_eq!(table.snapshot().generation(), generation);
        assert_eq!(table.lookup(100), FastMegapageKind::Unallocated);
        assert_eq!(table.lookup(101), FastMegapageKind::MediumSegregated);
    }

    #[test]
    fn test_hot_kind_in_fast_range_skips_snapshot() {
        let table = make_table(64);
        table.set_by_index(10, FastMegapageKind::HOT);
        assert!(table.snapshot().is_null());
        assert_eq!(table.lookup(10), FastMegapageKind::HOT);
        assert_eq!(table.stats().fast_bits_set, 1);
    }

    #[test]
    fn test_hot_kind_outside_fast_range_uses_snapshot() {
        let table = make_table(64);
        table.set_by_index(64, FastMegapageKind::HOT);
        assert!(table.snapshot().contains(64));
        assert_eq!(table.lookup(64), FastMegapageKind::HOT);
        assert_eq!(table.stats().fast_bits_set, 0);
    }

    #[test]
    fn test_overwriting_hot_kind_clears_fast_bit() {
        let table = make_table(64);
        table.set_by_index(3, FastMegapageKind::HOT);
        table.set_by_index(3, FastMegapageKind::LargeSlab);
        assert_eq!(table.lookup(3), FastMegapageKind::LargeSlab);
        assert_eq!(table.stats().fast_bits_set, 0);

        table.set_by_index(3, FastMegapageKind::HOT);
        assert_eq!(table.lookup(3), FastMegapageKind::HOT);
    }

    #[test]
    fn test_locked_entry_point() {
        let table = make_table(64);
        let guard = table.heap_lock().lock();
        table.set_by_index_locked(&guard, 7, FastMegapageKind::MediumSegregated);
        table.set_by_index_locked(&guard, 700, FastMegapageKind::LargeSlab);
        drop(guard);
        assert_eq!(table.lookup(7), FastMegapageKind::MediumSegregated);
        assert_eq!(table.lookup(700), FastMegapageKind::LargeSlab);
    }

    #[test]
    #[should_panic(expected = "another lock")]
    fn test_foreign_guard_rejected() {
        let table = make_table(64);
        let other = HeapLock::new();
        let guard = other.lock();
        table.set_by_index_locked(&guard, 1, FastMegapageKind::LargeSlab);
    }

    #[test]
    fn test_fast_bit_toggle_never_exposes_unallocated() {
        let table: &'static FastMegapageTable<'static> = Box::leak(Box::new(make_table(64)));
        table.set_by_index(5, FastMegapageKind::LargeSlab);
        table.set_by_index(5, FastMegapageKind::HOT);

        let done = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let reader = {
            let done = std::sync::Arc::clone(&done);
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    assert_ne!(table.lookup(5), FastMegapageKind::Unallocated);
                }
            })
        };
        for i in 0..20_000 {
            let kind = if i % 2 == 0 {
                FastMegapageKind::LargeSlab
            } else {
                FastMegapageKind::HOT
            };
            table.set_by_index(5, kind);
        }
        done.store(true, Ordering::Release);
        reader.join().unwrap();
        assert_eq!(table.lookup(5), FastMegapageKind::HOT);
    }

    #[test]
    fn test_address_operations() {
        let table = make_table(0);
        let base = 3 << FAST_MEGAPAGE_SHIFT;
        table.set_by_address(base + 123, FastMegapageKind::LargeSlab);
        assert_eq!(table.lookup(3), FastMegapageKind::LargeSlab);
        assert_eq!(table.lookup_address(base), FastMegapageKind::LargeSlab);
        assert_eq!(
            table.lookup_address(base + crate::FAST_MEGAPAGE_SIZE),
            FastMegapageKind::Unallocated
        );
    }

    #[test]
    fn test_set_range_covers_partial_megapages() {
        let table = make_table(0);
        let begin = (10 << FAST_MEGAPAGE_SHIFT) + 1;
        let end = (13 << FAST_MEGAPAGE_SHIFT) + 1;
        table.set_range(begin, end, FastMegapageKind::MediumSegregated);
        for index in 10..=13 {
            assert_eq!(table.lookup(index), FastMegapageKind::MediumSegregated);
        }
        assert_eq!(table.lookup(9), FastMegapageKind::Unallocated);
        assert_eq!(table.lookup(14), FastMegapageKind::Unallocated);

        table.set_range(end, end, FastMegapageKind::LargeSlab);
        assert_eq!(table.lookup(13), FastMegapageKind::MediumSegregated);
    }

    #[cfg(feature = "debug")]
    #[test]
    fn test_growth_verifies_chain() {
        let table = make_table(64);
        for index in [70, 7000, 65, 700_000, 64] {
            table.set_by_index(index, FastMegapageKind::MediumSegregated);
        }
        assert!(table.stats().generations >= 3);
        assert_eq!(table.lookup(700_000), FastMegapageKind::MediumSegregated);
    }

    #[test]
    fn test_history_and_verify() {
        let table = make_table(0);
        for index in [500, 5000, 50, 50_000, 0] {
            table.set_by_index(index, FastMegapageKind::LargeSlab);
        }
        let generations: Vec<usize> = table.snapshot().history().map(|s| s.generation()).collect();
        let expected: Vec<usize> = (0..=table.stats().generations).rev().collect();
        assert_eq!(generations, expected);
        assert!(table.snapshot().history().last().unwrap().is_null());
        assert!(table.verify().is_ok());
    }
}
