#[cfg(loom)]
pub(crate) mod alloc {
  pub(crate) use ::loom::alloc::Layout;
  pub(crate) use ::loom::alloc::alloc;
  pub(crate) use ::loom::alloc::dealloc;
  pub(crate) use ::std::alloc::handle_alloc_error;

  /// Loom has no zeroed allocation; emulate it so the bucket array can rely
  /// on all-zero bytes meaning "every slot unoccupied" under the model too.
  pub(crate) unsafe fn alloc_zeroed(layout: Layout) -> *mut u8 {
    // SAFETY: Forwarded caller contract; `layout` has non-zero size.
    let raw: *mut u8 = unsafe { alloc(layout) };

    if !raw.is_null() {
      // SAFETY: `raw` addresses `layout.size()` bytes owned by this call.
      unsafe {
        raw.write_bytes(0, layout.size());
      }
    }

    raw
  }
}

#[cfg(not(loom))]
pub(crate) mod alloc {
  pub(crate) use ::std::alloc::Layout;
  pub(crate) use ::std::alloc::alloc_zeroed;
  pub(crate) use ::std::alloc::dealloc;
  pub(crate) use ::std::alloc::handle_alloc_error;
}

#[cfg(not(loom))]
pub(crate) mod sync {
  pub(crate) mod atomic {
    pub(crate) use ::core::sync::atomic::AtomicBool;
    pub(crate) use ::core::sync::atomic::AtomicPtr;
    pub(crate) use ::core::sync::atomic::AtomicU64;
    pub(crate) use ::core::sync::atomic::AtomicUsize;
    pub(crate) use ::core::sync::atomic::Ordering;
  }

  /// Busy-wait pause between spinlock attempts.
  #[inline]
  pub(crate) fn spin_hint() {
    ::core::hint::spin_loop();
  }
}

#[cfg(loom)]
pub(crate) mod sync {
  pub(crate) mod atomic {
    pub(crate) use ::loom::sync::atomic::AtomicBool;
    pub(crate) use ::loom::sync::atomic::AtomicPtr;
    pub(crate) use ::loom::sync::atomic::AtomicU64;
    pub(crate) use ::loom::sync::atomic::AtomicUsize;
    pub(crate) use ::loom::sync::atomic::Ordering;
  }

  /// Under loom a raw spin would starve the model scheduler, so the pause
  /// becomes an explicit yield point instead.
  #[inline]
  pub(crate) fn spin_hint() {
    ::loom::thread::yield_now();
  }
}
