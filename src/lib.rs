//! Zincir: wait-free action combining for short, hot critical sections.
//!
//! Instead of parking threads on a lock, callers publish closures ("actions")
//! onto an atomic chain. Exactly one thread at a time drains the chain and
//! executes the pending actions on behalf of every contributor, so the
//! critical sections stay serialized while every caller stays wait-free.
//!
//! # Key Features
//!
//! - **Wait-Free Publication**: `run` performs one unconditional atomic
//!   exchange to enqueue; there is no CAS retry loop and no spinning.
//! - **Lock-Free Draining**: the executor role migrates between threads
//!   through a single atomic handoff; no thread ever waits on another.
//! - **FIFO Execution**: actions on one chain execute in exactly the order
//!   their publications linearized.
//! - **Allocation Recycling**: each action lives inline in a fixed-size slab;
//!   a [`Mem`] cache hands the predecessor's slab back to the producer, so a
//!   steady-state producer touches the allocator zero times per action.
//!
//! # Example
//!
//! ```rust
//! use std::cell::UnsafeCell;
//! use std::sync::Arc;
//! use std::thread;
//! use zincir::ActionChain;
//!
//! // A plain, unsynchronized counter. The chain serializes every action,
//! // so no two increments ever overlap.
//! struct Counter(UnsafeCell<u64>);
//! unsafe impl Sync for Counter {}
//!
//! let chain = Arc::new(ActionChain::new());
//! let counter = Arc::new(Counter(UnsafeCell::new(0)));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let chain = Arc::clone(&chain);
//!         let counter = Arc::clone(&counter);
//!         thread::spawn(move || {
//!             for _ in 0..1000 {
//!                 let counter = Arc::clone(&counter);
//!                 chain.run(move || unsafe { *counter.0.get() += 1 });
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(unsafe { *counter.0.get() }, 4000);
//! ```
//!
//! # Safety
//!
//! This crate uses `unsafe` code internally to place type-erased closures
//! inline in raw slabs and to transfer node ownership through atomic pointer
//! exchanges. The public API is safe: actions must be `Send + 'static`
//! because a published action may execute on another thread after the
//! publishing `run` call has returned. Actions must not unwind; a panicking
//! action poisons no lock but leaves its chain unable to make progress.

#![warn(missing_docs)]

extern crate alloc;

mod cfg;
mod chain;
mod slab;
mod utils;
mod work;

pub use chain::ActionChain;
pub use slab::{Mem, ALLOC_SIZE, MAX_ACTION_SIZE};
