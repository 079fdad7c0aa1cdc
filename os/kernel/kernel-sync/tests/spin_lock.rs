use kernel_sync::SpinLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

/// A miniature id allocator: the shape every heap in the kernel has.
struct Ids {
    next: u64,
    free: Vec<u64>,
}

impl Ids {
    fn take(&mut self) -> u64 {
        self.free.pop().unwrap_or_else(|| {
            self.next += 1;
            self.next
        })
    }
}

#[test]
fn guard_holds_the_lock_until_dropped() {
    let l = SpinLock::new(0_u32);
    let mut g = l.lock();
    *g = 7;
    assert!(l.is_locked());
    assert!(l.try_lock().is_none());
    drop(g);

    assert!(!l.is_locked());
    assert_eq!(*l.try_lock().unwrap(), 7);
}

#[test]
fn concurrent_allocation_hands_out_distinct_ids() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 2_000;

    let ids = Arc::new(SpinLock::new(Ids {
        next: 0,
        free: Vec::new(),
    }));
    let inside = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let ids = Arc::clone(&ids);
            let inside = Arc::clone(&inside);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut kept = Vec::new();
                for round in 0..ROUNDS {
                    let id = ids.with_lock(|ids| {
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        let id = ids.take();
                        inside.fetch_sub(1, Ordering::SeqCst);
                        id
                    });
                    if round % 2 == 0 {
                        kept.push(id);
                    } else {
                        ids.lock().free.push(id);
                    }
                }
                kept
            })
        })
        .collect();

    let mut seen = BTreeSet::new();
    for w in workers {
        for id in w.join().unwrap() {
            assert!(seen.insert(id), "id {id} handed out twice");
        }
    }
    assert_eq!(seen.len(), THREADS * ROUNDS / 2);
}

#[test]
fn panic_inside_the_critical_section_releases_the_lock() {
    let l = SpinLock::new(Vec::<u64>::new());
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            v.push(1);
            panic!("fault while allocating");
        });
    }));
    assert!(res.is_err());
    assert!(!l.is_locked());
    assert_eq!(l.into_inner(), vec![1]);
}

#[test]
fn debug_does_not_block_on_a_held_lock() {
    let l = SpinLock::new(3u8);
    assert_eq!(format!("{l:?}"), "SpinLock { value: 3 }");
    let _g = l.lock();
    assert_eq!(format!("{l:?}"), "SpinLock { value: <held> }");
}
