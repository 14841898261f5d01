//! Multi-threaded integration test: lock-free readers racing writers.

use rsmegapage::{FastMegapageKind, FastMegapageTable, HeapLock, ImmortalHeap, TableConfig};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicBool, Ordering};

fn make_table(fast_bit_count: usize) -> &'static FastMegapageTable<'static> {
    let lock = Box::leak(Box::new(HeapLock::new()));
    let heap = Box::leak(Box::new(ImmortalHeap::new()));
    let config = TableConfig::builder()
        .fast_bit_count(fast_bit_count)
        .build()
        .unwrap();
    Box::leak(Box::new(FastMegapageTable::new(&config, lock, heap)))
}

#[test]
fn test_readers_never_lose_published_entries() {
    let table = make_table(64);
    // Anchors written before any reader starts must stay visible through
    // every later growth.
    table.set_by_index(1000, FastMegapageKind::LargeSlab);
    table.set_by_index(3, FastMegapageKind::HOT);

    let num_readers = 4;
    let done = Arc::new(AtomicBool::new(false));
    // Every reader finishes one lookup before the writer starts.
    let started = Arc::new(Barrier::new(num_readers + 1));
    let readers: Vec<_> = (0..num_readers)
        .map(|_| {
            let done = Arc::clone(&done);
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                assert_eq!(table.lookup(1000), FastMegapageKind::LargeSlab);
                let mut reads = 1usize;
                started.wait();
                while !done.load(Ordering::Acquire) {
                    assert_eq!(table.lookup(1000), FastMegapageKind::LargeSlab);
                    assert_eq!(table.lookup(3), FastMegapageKind::HOT);
                    let snapshot = table.snapshot();
                    assert!(snapshot.contains(1000));
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    started.wait();
    for i in 0..2000usize {
        let index = if i % 2 == 0 { 1001 + i * 37 } else { 999 - (i % 990) };
        table.set_by_index(index, FastMegapageKind::MediumSegregated);
    }
    done.store(true, Ordering::Release);

    for r in readers {
        assert!(r.join().unwrap() > 0);
    }
    assert!(table.verify().is_ok());
}

#[test]
fn test_concurrent_writers_disjoint_indices() {
    let table = make_table(64);
    let num_threads = 8;
    let per_thread = 500;

    let handles: Vec<_> = (0..num_threads)
        .map(|t| {
            std::thread::spawn(move || {
                for i in 0..per_thread {
                    let index = i * num_threads + t;
                    let kind = FastMegapageKind::ALL[index % 4];
                    table.set_by_index(index, kind);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for index in 0..num_threads * per_thread {
        assert_eq!(table.lookup(index), FastMegapageKind::ALL[index % 4], "index {}", index);
    }
    assert!(table.verify().is_ok());
}

#[test]
fn test_locked_batches_from_many_threads() {
    let table = make_table(0);
    let handles: Vec<_> = (0..4usize)
        .map(|t| {
            std::thread::spawn(move || {
                let guard = table.heap_lock().lock();
                for i in 0..100 {
                    table.set_by_index_locked(&guard, t * 10_000 + i, FastMegapageKind::LargeSlab);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    for t in 0..4usize {
        for i in 0..100 {
            assert_eq!(table.lookup(t * 10_000 + i), FastMegapageKind::LargeSlab);
        }
    }
}
