//! Fixed-size slab storage for chain nodes.
//!
//! Every node lives in a raw slab of exactly [`ALLOC_SIZE`] bytes: a
//! reserved header region first, the caller's action in the bytes after it,
//! all in the same allocation. Because the size is a compile-time constant,
//! freeing a slab never needs to recover a stored size, and a slab
//! reclaimed from one node can be reused verbatim for the next.
//!
//! [`Mem`] is the single-slot producer-side cache that makes that reuse
//! happen: `run_with` consumes the held slab on entry and installs the
//! reclaimed predecessor slab on exit, so a warm producer performs no
//! allocator calls at all.

use alloc::alloc::{alloc, dealloc, handle_alloc_error};
use core::alloc::Layout;
use core::cell::Cell;
use core::fmt;
use core::mem::{align_of, size_of};
use core::ptr;

// Slab size ladder. Larger slabs admit larger inline actions.
#[cfg(all(feature = "slab-256", not(loom)))]
const SLAB_SIZE: usize = 256;
#[cfg(all(feature = "slab-128", not(feature = "slab-256"), not(loom)))]
const SLAB_SIZE: usize = 128;
#[cfg(all(not(feature = "slab-128"), not(feature = "slab-256"), not(loom)))]
const SLAB_SIZE: usize = 64;

// Loom's atomics are far larger than the hardware ones; model builds need
// the extra header room.
#[cfg(loom)]
const SLAB_SIZE: usize = 1024;

/// Size in bytes of the slab backing one node: header plus inline action.
///
/// The default is one x86 cache line. The `slab-128` and `slab-256` cargo
/// features select the larger rungs.
pub const ALLOC_SIZE: usize = SLAB_SIZE;

/// Bytes reserved at the start of each slab for the node header: one atomic
/// link plus one invoker pointer. The node module statically asserts its
/// header fits this reservation.
#[cfg(not(loom))]
pub(crate) const HEADER_SIZE: usize = 2 * size_of::<usize>();

// Loom's tracked atomics are larger than the hardware ones.
#[cfg(loom)]
pub(crate) const HEADER_SIZE: usize = 512;

/// Alignment of every slab, and the strictest alignment an inline action
/// may require.
pub(crate) const SLAB_ALIGN: usize = align_of::<usize>();

/// Largest action (in bytes) that fits inline in a slab.
///
/// `run` rejects larger actions at compile time.
pub const MAX_ACTION_SIZE: usize = ALLOC_SIZE - HEADER_SIZE;

const _: () = assert!(ALLOC_SIZE >= HEADER_SIZE + size_of::<usize>());
const _: () = assert!(HEADER_SIZE % SLAB_ALIGN == 0);

const fn slab_layout() -> Layout {
    match Layout::from_size_align(ALLOC_SIZE, SLAB_ALIGN) {
        Ok(layout) => layout,
        Err(_) => panic!("invalid slab layout"),
    }
}

pub(crate) fn alloc_slab() -> *mut u8 {
    // SAFETY: the layout has non-zero size.
    let p = unsafe { alloc(slab_layout()) };
    if p.is_null() {
        handle_alloc_error(slab_layout());
    }
    p
}

/// # Safety
///
/// `p` must have come from [`alloc_slab`] (directly or through node
/// reclamation) and must not be used again.
pub(crate) unsafe fn free_slab(p: *mut u8) {
    // SAFETY: caller guarantees `p` is a live slab allocation.
    unsafe { dealloc(p, slab_layout()) }
}

/// A single-slot cache of one node slab.
///
/// Holding a `Mem` across `run_with` calls lets a producer recycle the slab
/// reclaimed from its sealed predecessor into its next publication, skipping
/// the allocator entirely once warm. A `Mem` pairs with any chain built with
/// the same [`ALLOC_SIZE`]; its lifetime is independent of any chain.
///
/// `Mem` is movable and may migrate between threads, but it is not shareable:
/// the exclusive `&mut` borrow taken by [`ActionChain::run_with`] is what
/// keeps the slot coherent.
///
/// [`ActionChain::run_with`]: crate::ActionChain::run_with
pub struct Mem {
    slab: *mut u8,
}

// SAFETY: a cached slab is raw, unaliased memory; it may move with its owner.
// The raw pointer field keeps `Mem` !Sync, which is the intended contract.
unsafe impl Send for Mem {}

impl Mem {
    /// Creates an empty cache.
    pub const fn new() -> Self {
        Self { slab: ptr::null_mut() }
    }

    /// Consumes the held slab, or allocates a fresh one when empty.
    #[inline]
    pub(crate) fn take_or_alloc(&mut self) -> *mut u8 {
        if self.slab.is_null() {
            alloc_slab()
        } else {
            core::mem::replace(&mut self.slab, ptr::null_mut())
        }
    }

    /// Installs a reclaimed slab. The slot must be empty.
    #[inline]
    pub(crate) fn put_back(&mut self, slab: *mut u8) {
        debug_assert!(self.slab.is_null());
        self.slab = slab;
    }

    /// Empties the slot, returning the held slab (possibly null).
    #[inline]
    pub(crate) fn release(&mut self) -> *mut u8 {
        core::mem::replace(&mut self.slab, ptr::null_mut())
    }
}

impl Default for Mem {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mem {
    fn drop(&mut self) {
        if !self.slab.is_null() {
            // SAFETY: the slot owns its slab exclusively.
            unsafe { free_slab(self.slab) }
        }
    }
}

impl fmt::Debug for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mem")
            .field("cached", &!self.slab.is_null())
            .finish()
    }
}

/// Per-thread cache slot backing `run` calls that do not thread a `Mem`.
struct LocalSlot(Cell<*mut u8>);

impl Drop for LocalSlot {
    fn drop(&mut self) {
        let p = self.0.get();
        if !p.is_null() {
            // SAFETY: the slot owns its slab exclusively.
            unsafe { free_slab(p) }
        }
    }
}

std::thread_local! {
    static LOCAL_SLOT: LocalSlot = const { LocalSlot(Cell::new(ptr::null_mut())) };
}

/// Runs `f` with a `Mem` borrowed from the calling thread's cache slot.
///
/// The slot is emptied for the duration of the call, so a reentrant `run`
/// from inside an action sees an empty slot instead of an aliased slab. On
/// the way out the slab goes back to the slot unless a reentrant call
/// repopulated it first, in which case ours is simply freed.
pub(crate) fn with_thread_mem<R>(f: impl FnOnce(&mut Mem) -> R) -> R {
    LOCAL_SLOT.with(|slot| {
        let mut mem = Mem { slab: slot.0.replace(ptr::null_mut()) };
        let res = f(&mut mem);
        let slab = mem.release();
        if !slab.is_null() {
            if slot.0.get().is_null() {
                slot.0.set(slab);
            } else {
                // SAFETY: `slab` was reclaimed by `f` and is exclusively ours.
                unsafe { free_slab(slab) }
            }
        }
        res
    })
}
