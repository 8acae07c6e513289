//! Chain nodes and the handoff state machine.
//!
//! A [`Work`] node owns one published action. Its `next` field is the whole
//! concurrency protocol: it starts null, is exchanged exactly once by the
//! successor's producer (to a real node pointer) and exactly once by the
//! executor (to the sealed marker). Whichever exchange observes the other's
//! value inherits both the duty to destroy this node and the duty to keep
//! the chain draining:
//!
//! - Producer's exchange returns null: the executor has not finished here
//!   yet; it will pick up the linked successor itself. Nothing to do.
//! - Producer's exchange returns the sealed marker: the executor finished
//!   and walked away. The producer destroys this node, reclaims its slab,
//!   and becomes the executor starting at the successor.
//! - Executor's exchange returns a successor: the node is consumed in place
//!   and the loop advances.
//! - Executor's exchange returns null: the executor relinquishes. The next
//!   producer to link here finds the sealed marker and takes over.
//!
//! Every node is therefore destroyed exactly once, by exactly one thread,
//! and at most one thread is ever inside the executor loop per chain.

use core::mem::{align_of, size_of};
use core::ptr;

use crate::cfg::atomic::{AtomicPtr, Ordering};
use crate::slab::{free_slab, HEADER_SIZE, MAX_ACTION_SIZE, SLAB_ALIGN};

/// Type-erased invoker: runs and consumes the action stored after the header.
type InvokeFn = unsafe fn(*mut Work);

/// Node header. The action lives in the same slab, in the bytes after the
/// header reservation.
#[repr(C)]
pub(crate) struct Work {
    next: AtomicPtr<Work>,
    invoke: InvokeFn,
}

// The storage layer reserves header room without knowing this type; the
// real header must honor that contract.
const _: () = assert!(size_of::<Work>() <= HEADER_SIZE);
const _: () = assert!(align_of::<Work>() <= SLAB_ALIGN);

/// The sealed marker: non-null, aligned, never a valid node address.
#[inline]
fn sealed() -> *mut Work {
    align_of::<Work>() as *mut Work
}

/// Pointer to the action slot inside `w`'s slab.
///
/// # Safety
///
/// `w` must point at a live `Work` constructed by [`Work::new_in`] for this
/// same `F`.
#[inline]
unsafe fn action_slot<F>(w: *mut Work) -> *mut F {
    // The header reservation is a multiple of the slab alignment and
    // `new_in` rejects actions with stricter alignment, so the slot is in
    // bounds and aligned.
    unsafe { (w as *mut u8).add(HEADER_SIZE) as *mut F }
}

/// Runs the action in place and consumes it. Called exactly once per node.
unsafe fn invoke_erased<F: FnOnce()>(w: *mut Work) {
    // SAFETY: `w` was built by `new_in::<F>` and nobody else reads the slot.
    let action = unsafe { action_slot::<F>(w).read() };
    action();
}

impl Work {
    /// Constructs a node in place in `slab`, moving `action` into the
    /// trailer. The node is fully initialized before the caller publishes
    /// it; its `next` starts null.
    ///
    /// # Safety
    ///
    /// `slab` must be a live, exclusively owned slab allocation of
    /// [`ALLOC_SIZE`](crate::ALLOC_SIZE) bytes.
    pub(crate) unsafe fn new_in<F: FnOnce()>(slab: *mut u8, action: F) -> *mut Work {
        const {
            assert!(
                size_of::<F>() <= MAX_ACTION_SIZE,
                "action too large for the node slab",
            );
            assert!(
                align_of::<F>() <= SLAB_ALIGN,
                "action alignment exceeds the slab's",
            );
        }
        let work = slab as *mut Work;
        // SAFETY: the slab is big enough and aligned for the header plus the
        // action (checked above), and the caller owns it exclusively.
        unsafe {
            work.write(Work {
                next: AtomicPtr::new(ptr::null_mut()),
                invoke: invoke_erased::<F>,
            });
            action_slot::<F>(work).write(action);
        }
        work
    }

    /// Publishes `next` as this node's successor. Called exactly once per
    /// node, by the producer whose tail exchange returned this node.
    ///
    /// Returns null when the executor still owns this node. Otherwise the
    /// node was already sealed: this call drains the chain starting at
    /// `next` and returns the destroyed node's slab for reuse.
    ///
    /// # Safety
    ///
    /// `this` must be the caller's predecessor (live, published, never
    /// before linked); `next` must be a freshly published node owned by the
    /// caller.
    pub(crate) unsafe fn continue_with(this: *mut Work, next: *mut Work) -> *mut u8 {
        // SAFETY: the predecessor stays alive until one of the two `next`
        // exchanges observes the other's value; ours is the first and only
        // link ever written here.
        let prev = unsafe { (*this).next.swap(next, Ordering::AcqRel) };
        if prev.is_null() {
            return ptr::null_mut();
        }
        debug_assert_eq!(prev, sealed());
        // The executor sealed this node and relinquished: both destruction
        // of the predecessor and the executor role are ours now. The AcqRel
        // exchange synchronized with the seal, so the node is quiescent.
        unsafe {
            ptr::drop_in_place(this);
            Work::run_all(next);
        }
        this as *mut u8
    }

    /// The executor loop: runs `w`'s action, then every already-linked
    /// successor, until a seal lands on a node with no successor yet.
    ///
    /// Intermediate slabs are freed rather than recycled; only a producer
    /// reclaims into its own cache.
    ///
    /// # Safety
    ///
    /// `w` must be a live, unsealed node whose action has not run.
    pub(crate) unsafe fn run_all(mut w: *mut Work) {
        debug_assert!(!w.is_null() && w != sealed());
        loop {
            // SAFETY: `w` is live and its action unconsumed, per the loop
            // invariant and the entry contract.
            unsafe { ((*w).invoke)(w) };
            let next = unsafe { (*w).next.swap(sealed(), Ordering::AcqRel) };
            if next.is_null() {
                // Handoff: the producer that links a successor here will
                // observe the seal and inherit this node.
                break;
            }
            debug_assert_ne!(next, sealed());
            // SAFETY: observing a linked successor makes this thread the
            // node's unique owner; the successor's producer has already
            // moved on.
            unsafe {
                ptr::drop_in_place(w);
                free_slab(w as *mut u8);
            }
            w = next;
        }
    }

    /// Destroys the final, sealed node of a quiescent chain.
    ///
    /// # Safety
    ///
    /// No publication or draining may be in flight, and `this` must be the
    /// chain's tail.
    pub(crate) unsafe fn destroy_tail(this: *mut Work) {
        // SAFETY: quiescence means the executor sealed this node and no
        // producer will ever link into it.
        unsafe {
            debug_assert_eq!((*this).next.load(Ordering::Relaxed), sealed());
            ptr::drop_in_place(this);
            free_slab(this as *mut u8);
        }
    }
}
