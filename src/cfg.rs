//! Atomic primitives, switched to their loom counterparts under model tests.

pub(crate) mod atomic {
    #[cfg(not(loom))]
    pub(crate) use core::sync::atomic::{AtomicPtr, Ordering};

    #[cfg(loom)]
    pub(crate) use loom::sync::atomic::{AtomicPtr, Ordering};
}
