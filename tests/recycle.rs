//! Allocation accounting for the slab cache: steady-state recycling does
//! not touch the allocator, and nothing leaks once a chain is gone.
//!
//! A counting global allocator tracks slab-sized allocations (everything
//! the chain allocates is exactly `ALLOC_SIZE` bytes). Tests that read the
//! counters run serially so unrelated test threads cannot skew them.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use serial_test::serial;
use zincir::{ActionChain, Mem, ALLOC_SIZE};

static SLAB_ALLOCS: AtomicU64 = AtomicU64::new(0);
static SLAB_FREES: AtomicU64 = AtomicU64::new(0);

struct CountingAlloc;

unsafe impl GlobalAlloc for CountingAlloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() == ALLOC_SIZE {
            SLAB_ALLOCS.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if layout.size() == ALLOC_SIZE {
            SLAB_FREES.fetch_add(1, Ordering::SeqCst);
        }
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOC: CountingAlloc = CountingAlloc;

fn slab_allocs() -> u64 {
    SLAB_ALLOCS.load(Ordering::SeqCst)
}

fn slabs_live() -> i64 {
    SLAB_ALLOCS.load(Ordering::SeqCst) as i64 - SLAB_FREES.load(Ordering::SeqCst) as i64
}

#[test]
#[serial]
fn test_steady_state_performs_no_allocations() {
    const WARMUP: usize = 4;
    const ITERATIONS: usize = 100_000;

    let chain = ActionChain::new();
    let mut mem = Mem::new();

    for _ in 0..WARMUP {
        chain.run_with(&mut mem, || {});
    }

    let before = slab_allocs();
    for _ in 0..ITERATIONS {
        chain.run_with(&mut mem, || {});
    }
    let after = slab_allocs();

    // Every publication consumed the slab reclaimed by the previous one.
    assert_eq!(after - before, 0);
}

#[test]
#[serial]
fn test_session_allocates_twice() {
    const ITERATIONS: usize = 10_000;

    let before = slab_allocs();

    let chain = ActionChain::new();
    let mut mem = Mem::new();
    for _ in 0..ITERATIONS {
        chain.run_with(&mut mem, || {});
    }

    // One slab for the sentinel, one for the first action; everything after
    // that rode the cache.
    assert_eq!(slab_allocs() - before, 2);

    drop(chain);
    drop(mem);
}

#[test]
#[serial]
fn test_no_leak_after_drop() {
    const NUM_THREADS: usize = 4;
    const PER_THREAD: usize = 10_000;

    let before = slabs_live();

    {
        let chain = Arc::new(ActionChain::new());
        let mut handles = vec![];

        for _ in 0..NUM_THREADS {
            let chain = Arc::clone(&chain);
            handles.push(thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    chain.run(|| {});
                }
            }));
        }

        // Thread exit releases each per-thread cache slot.
        for handle in handles {
            handle.join().unwrap();
        }

        let chain = Arc::try_unwrap(chain).ok().expect("chain still shared");
        drop(chain);
    }

    assert_eq!(slabs_live(), before);
}

#[test]
#[serial]
fn test_mem_frees_cached_slab_on_drop() {
    let before = slabs_live();

    let chain = ActionChain::new();
    let mut mem = Mem::new();
    // Two publications guarantee `mem` ends up holding a reclaimed slab.
    chain.run_with(&mut mem, || {});
    chain.run_with(&mut mem, || {});

    drop(chain);
    assert_eq!(slabs_live(), before + 1);

    drop(mem);
    assert_eq!(slabs_live(), before);
}

#[test]
#[serial]
fn test_contended_allocations_stay_bounded() {
    const NUM_THREADS: usize = 8;
    const PER_THREAD: usize = 20_000;

    let before = slab_allocs();
    let live_before = slabs_live();

    {
        let chain = Arc::new(ActionChain::new());
        let mut handles = vec![];

        for _ in 0..NUM_THREADS {
            let chain = Arc::clone(&chain);
            handles.push(thread::spawn(move || {
                let mut mem = Mem::new();
                for _ in 0..PER_THREAD {
                    chain.run_with(&mut mem, || {});
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let chain = Arc::try_unwrap(chain).ok().expect("chain still shared");
        drop(chain);
    }

    // A producer allocates at most once per publication (a cache miss
    // happens when the drain freed the predecessor's slab instead of
    // handing it back), plus one slab for the sentinel.
    let total_actions = (NUM_THREADS * PER_THREAD) as u64;
    let allocated = slab_allocs() - before;
    assert!(allocated <= total_actions + 1);
    assert_eq!(slabs_live(), live_before);

    println!("Contended allocation test:");
    println!(
        "  {} actions, {} slab allocations ({:.1}% recycled)",
        total_actions,
        allocated,
        100.0 * (total_actions.saturating_sub(allocated)) as f64 / total_actions as f64
    );
}
