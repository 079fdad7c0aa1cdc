use kernel_heaps::{BackedIdHeap, Heap, IdHeap, TaggedHeap};
use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

fn hammer<H: Heap + 'static>(heap: Arc<H>, size: u64, threads: usize, rounds: usize) {
    let live = Arc::new(Mutex::new(HashSet::new()));
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let heap = Arc::clone(&heap);
            let live = Arc::clone(&live);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut mine = Vec::new();
                for i in 0..rounds {
                    if let Some(a) = heap.alloc(size) {
                        assert!(live.lock().unwrap().insert(a), "{a:#x} handed out twice");
                        mine.push(a);
                    }
                    if i % 3 == 2 {
                        if let Some(a) = mine.pop() {
                            assert!(live.lock().unwrap().remove(&a));
                            heap.dealloc(a, size);
                        }
                    }
                }
                for a in mine {
                    assert!(live.lock().unwrap().remove(&a));
                    heap.dealloc(a, size);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert!(live.lock().unwrap().is_empty());
}

#[test]
fn id_heap_never_double_allocates() {
    let heap = Arc::new(IdHeap::new(0, 512, 1).unwrap());
    hammer(Arc::clone(&heap), 1, 8, 400);
    assert_eq!(heap.allocated(), 0);
}

#[test]
fn randomized_page_heap_never_double_allocates() {
    let heap = Arc::new(IdHeap::new(0x1000_0000, 0x100_0000, 0x1000).unwrap());
    heap.set_randomize(true);
    hammer(Arc::clone(&heap), 0x1000, 6, 300);
    assert_eq!(heap.allocated(), 0);
}

#[test]
fn backed_heap_never_double_allocates() {
    let parent = Arc::new(IdHeap::new(0x40_0000_0000, 0x4000_0000, 0x20_0000).unwrap());
    let heap = Arc::new(BackedIdHeap::new(Arc::clone(&parent), 0x1000).unwrap());
    hammer(Arc::clone(&heap), 0x1000, 6, 300);
    assert_eq!(heap.allocated(), 0);
}

#[test]
fn tagged_heap_keeps_tag_under_contention() {
    let parent = Arc::new(IdHeap::new(0, 0x100_0000, 0x1000).unwrap());
    let heap = Arc::new(TaggedHeap::new(Arc::clone(&parent), 2).unwrap());
    hammer(Arc::clone(&heap), 0x1000, 4, 200);
    assert_eq!(parent.allocated(), 0);
}
