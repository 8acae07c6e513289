//! The public chain: a serialized action queue with an atomic tail.

use crate::cfg::atomic::{AtomicPtr, Ordering};
use crate::slab::{self, Mem};
use crate::utils::CacheAligned;
use crate::work::Work;

/// A wait-free alternative to a mutex for short critical sections.
///
/// Callers publish closures with [`run`]; the chain executes them one at a
/// time, in publication order, on whichever thread currently holds the
/// executor role. A `run` call returns once its action has either completed
/// on the calling thread (possibly together with other threads' actions) or
/// been handed off to the thread that is already draining the chain.
///
/// The chain is `Send + Sync`; share it with an `Arc` and call [`run`] from
/// any number of threads. Dropping the chain requires exclusive access, so
/// the borrow checker guarantees no action is still in flight.
///
/// [`run`]: ActionChain::run
pub struct ActionChain {
    tail: CacheAligned<AtomicPtr<Work>>,
}

impl ActionChain {
    /// Creates an empty chain.
    ///
    /// Allocates one sentinel node with a no-op action and drains it
    /// immediately, so the producer path never sees an empty chain.
    pub fn new() -> Self {
        let slab = slab::alloc_slab();
        // SAFETY: fresh, exclusively owned slab.
        let sentinel = unsafe { Work::new_in(slab, || {}) };
        // SAFETY: the sentinel is live, unsealed, and unpublished; draining
        // it runs the no-op and leaves the node sealed, which is exactly the
        // state of any other already-executed tail.
        unsafe { Work::run_all(sentinel) };
        Self {
            tail: CacheAligned::new(AtomicPtr::new(sentinel)),
        }
    }

    /// Publishes `action` for serialized execution, using the calling
    /// thread's slab cache.
    ///
    /// Actions on one chain run in the order their `run` calls linearized,
    /// and never overlap. The action may execute on another thread after
    /// this call returns; it runs exactly once either way.
    ///
    /// Actions must not unwind.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicU64, Ordering};
    /// use std::sync::Arc;
    /// use zincir::ActionChain;
    ///
    /// let chain = ActionChain::new();
    /// let hits = Arc::new(AtomicU64::new(0));
    /// let h = Arc::clone(&hits);
    /// chain.run(move || {
    ///     h.fetch_add(1, Ordering::Relaxed);
    /// });
    /// ```
    #[inline]
    pub fn run<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        slab::with_thread_mem(|mem| self.run_with(mem, action));
    }

    /// Publishes `action` for serialized execution, recycling slabs through
    /// the caller-owned `mem`.
    ///
    /// When this producer's predecessor has already been sealed, the
    /// predecessor's slab lands back in `mem`, and the next `run_with`
    /// through the same `mem` performs no allocation.
    ///
    /// The action must fit the slab: `size_of::<F>()` no larger than
    /// [`MAX_ACTION_SIZE`](crate::MAX_ACTION_SIZE), alignment at most the
    /// slab's. Oversized actions fail to compile.
    #[inline]
    pub fn run_with<F>(&self, mem: &mut Mem, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let slab = mem.take_or_alloc();
        // SAFETY: the slab came from the cache or the allocator; either way
        // it is ALLOC_SIZE bytes and exclusively ours.
        let work = unsafe { Work::new_in(slab, action) };
        // The exchange both linearizes this publication and hands us the
        // unique predecessor we must link to.
        let prev = self.tail.swap(work, Ordering::AcqRel);
        // SAFETY: `prev` was the tail, so it is live and has never been
        // linked; `work` is ours and fully initialized before the exchange
        // published it.
        let reclaimed = unsafe { Work::continue_with(prev, work) };
        if !reclaimed.is_null() {
            mem.put_back(reclaimed);
        }
    }
}

impl Default for ActionChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActionChain {
    fn drop(&mut self) {
        // Exclusive access means every `run` borrow has ended, and a chain
        // with no active `run` is quiescent: the final tail is sealed. The
        // relaxed load rides on the caller's happens-before.
        let tail = self.tail.load(Ordering::Relaxed);
        // SAFETY: quiescent chain, `tail` is its final node.
        unsafe { Work::destroy_tail(tail) };
    }
}
