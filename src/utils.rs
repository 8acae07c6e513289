use core::ops::Deref;

// Cache line sizes per architecture.
// x86/x86_64: 64B, aarch64: 128B (Apple M-series / Neoverse), s390x: 256B.
// Fallback: 64B (most common).
#[cfg_attr(target_arch = "s390x", repr(align(256)))]
#[cfg_attr(target_arch = "aarch64", repr(align(128)))]
#[cfg_attr(
    not(any(target_arch = "s390x", target_arch = "aarch64")),
    repr(align(64))
)]
pub(crate) struct CacheAligned<T> {
    data: T,
}

impl<T> CacheAligned<T> {
    pub(crate) fn new(data: T) -> Self {
        Self { data }
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}
