/*
 * shim.rs
 *
 * The facade itself. Every operation does three things:
 *
 *   1. hand (operation, label) to the trace sink
 *   2. call the platform primitive
 *   3. return whatever the primitive returned
 *
 * No state, no validation, no retries. A null return or MAP_FAILED comes
 * back as None; everything else about a failure lives in errno.
 */

use core::ptr::NonNull;

use libc::{c_int, c_void, off_t};

use crate::trace::{StdoutTrace, TraceOp, TraceSink};

/// Named pass-through wrappers around the platform heap and mapping
/// primitives.
///
/// The shim owns nothing but its sink. Every handle it returns belongs to
/// the caller from the moment the call returns, and no reference to a
/// handle or label is retained across calls.
pub struct AllocShim<S: TraceSink> {
    sink: S,
}

impl AllocShim<StdoutTrace> {
    /// Shim wired to the standard output sink.
    #[must_use]
    pub const fn stdout() -> Self {
        Self::new(StdoutTrace)
    }
}

impl<S: TraceSink> AllocShim<S> {
    /// Shim recording through `sink`.
    #[must_use]
    pub const fn new(sink: S) -> Self {
        Self { sink }
    }

    /// The sink this shim records through.
    #[inline]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// `calloc` with a call-site label: `count * elem_size` zero-initialized
    /// bytes, or `None` if the platform cannot satisfy the request.
    ///
    /// Overflow of `count * elem_size` is calloc's own job to detect; it
    /// comes back as `None` like any other failure.
    #[must_use = "dropping the handle leaks the block"]
    pub fn alloc_zeroed(
        &self,
        count: usize,
        elem_size: usize,
        label: &str,
    ) -> Option<NonNull<c_void>> {
        self.sink.record(TraceOp::Calloc, label);
        // SAFETY: calloc accepts any count/size pair and reports failure
        // (including multiplication overflow) with a null return.
        let ptr = unsafe { libc::calloc(count, elem_size) };
        NonNull::new(ptr)
    }

    /// `malloc` with a call-site label: `size` uninitialized bytes, or
    /// `None` on failure.
    #[must_use = "dropping the handle leaks the block"]
    pub fn alloc(&self, size: usize, label: &str) -> Option<NonNull<c_void>> {
        self.sink.record(TraceOp::Malloc, label);
        // SAFETY: malloc accepts any size and reports failure with null.
        let ptr = unsafe { libc::malloc(size) };
        NonNull::new(ptr)
    }

    /// `free` with a call-site label.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a handle previously returned by
    /// [`alloc`](Self::alloc) / [`alloc_zeroed`](Self::alloc_zeroed) (any
    /// shim - the underlying heap is process-wide) that has not been
    /// released before. The handle is dead after this call.
    pub unsafe fn release(&self, ptr: *mut c_void, label: &str) {
        self.sink.record(TraceOp::Free, label);
        // SAFETY: caller guarantees ptr is null or a live heap handle.
        // free accepts null.
        unsafe { libc::free(ptr) };
    }

    /// `mmap` with a call-site label. `MAP_FAILED` comes back as `None`.
    ///
    /// `prot` and `flags` are the platform's own bit-sets (`PROT_*`,
    /// `MAP_*`), forwarded untouched. `fd` is -1 for anonymous mappings;
    /// `offset` must be page-aligned for file-backed ones.
    ///
    /// # Safety
    ///
    /// The argument set is forwarded verbatim, so the caller upholds mmap's
    /// contract for the combination it passes. In particular `MAP_FIXED`
    /// can silently replace live mappings, and a file-backed mapping is
    /// only valid while `fd`'s file stays intact.
    #[must_use = "dropping the handle leaks the mapping"]
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn map(
        &self,
        addr: *mut c_void,
        len: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: off_t,
        label: &str,
    ) -> Option<NonNull<c_void>> {
        self.sink.record(TraceOp::Mmap, label);
        // SAFETY: caller upholds the mmap contract for these arguments;
        // every failure mmap can detect is reported via MAP_FAILED.
        let ptr = unsafe { libc::mmap(addr, len, prot, flags, fd, offset) };
        if ptr == libc::MAP_FAILED {
            None
        } else {
            NonNull::new(ptr)
        }
    }

    /// `munmap` with a call-site label.
    ///
    /// The status is discarded; a failure leaves errno set (see
    /// [`last_errno`]) and nothing else to act on here.
    ///
    /// # Safety
    ///
    /// `[addr, addr + len)` must lie within a mapping previously returned
    /// by [`map`](Self::map) and not yet unmapped. The region is
    /// inaccessible after this call.
    pub unsafe fn unmap(&self, addr: *mut c_void, len: usize, label: &str) {
        self.sink.record(TraceOp::Munmap, label);
        // SAFETY: caller guarantees the range covers a live mapping.
        unsafe { libc::munmap(addr, len) };
    }
}

/* errno is thread-local; the accessor name differs per libc */

/// The calling thread's errno, as left by the last failed primitive.
#[cfg(any(target_os = "linux", target_os = "android"))]
#[inline]
#[must_use]
pub fn last_errno() -> i32 {
    // SAFETY: __errno_location always returns a valid pointer to the
    // calling thread's errno.
    unsafe { *libc::__errno_location() }
}

/// The calling thread's errno, as left by the last failed primitive.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
#[inline]
#[must_use]
pub fn last_errno() -> i32 {
    // SAFETY: __error always returns a valid pointer to the calling
    // thread's errno.
    unsafe { *libc::__error() }
}

/*
 * Tests below call the real primitives, which Miri cannot model as foreign
 * functions. Skipped there; the trace-level logic is covered by trace.rs
 * and the capture-sink assertions run everywhere else.
 */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::CaptureTrace;
    use core::ptr;
    use std::string::ToString;

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_alloc_zeroed_returns_zeroed_block() {
        let shim = AllocShim::new(CaptureTrace::new());
        let block = shim.alloc_zeroed(4, 8, "dataset").expect("calloc failed");

        // SAFETY: block points to 4 * 8 = 32 valid bytes we own.
        let bytes = unsafe { core::slice::from_raw_parts(block.as_ptr().cast::<u8>(), 32) };
        assert!(bytes.iter().all(|&b| b == 0));

        // SAFETY: block came from this shim and is released exactly once.
        unsafe { shim.release(block.as_ptr(), "dataset") };

        let records = shim.sink().take();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (TraceOp::Calloc, "dataset".to_string()));
        assert_eq!(records[1], (TraceOp::Free, "dataset".to_string()));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_alloc_block_is_writable() {
        let shim = AllocShim::new(CaptureTrace::new());
        let block = shim.alloc(64, "scratch").expect("malloc failed");
        let p = block.as_ptr().cast::<u8>();

        // SAFETY: p points to 64 valid bytes; we touch the first and last.
        #[allow(clippy::multiple_unsafe_ops_per_block)]
        unsafe {
            p.write(0xAB);
            p.add(63).write(0xCD);
            assert_eq!(p.read(), 0xAB);
            assert_eq!(p.add(63).read(), 0xCD);
        }

        // SAFETY: released exactly once.
        unsafe { shim.release(block.as_ptr(), "scratch") };

        let records = shim.sink().take();
        assert_eq!(records[0], (TraceOp::Malloc, "scratch".to_string()));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_calloc_overflow_returns_none() {
        let shim = AllocShim::new(CaptureTrace::new());
        /* count * elem_size overflows usize; calloc must refuse */
        assert!(shim.alloc_zeroed(usize::MAX, 2, "huge").is_none());
        /* the record is emitted regardless of the outcome */
        assert_eq!(shim.sink().take().len(), 1);
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_release_null_is_accepted() {
        let shim = AllocShim::new(CaptureTrace::new());
        // SAFETY: free accepts null.
        unsafe { shim.release(ptr::null_mut(), "noop") };
        let records = shim.sink().take();
        assert_eq!(records[0], (TraceOp::Free, "noop".to_string()));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_map_unmap_anonymous() {
        let shim = AllocShim::new(CaptureTrace::new());

        // SAFETY: anonymous private mapping at a kernel-chosen address.
        let region = unsafe {
            shim.map(
                ptr::null_mut(),
                4096,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
                "cache",
            )
        }
        .expect("mmap failed");

        let p = region.as_ptr().cast::<u8>();
        // SAFETY: the mapping is 4096 bytes, readable and writable.
        #[allow(clippy::multiple_unsafe_ops_per_block)]
        unsafe {
            p.write(0x5A);
            p.add(4095).write(0xA5);
            assert_eq!(p.read(), 0x5A);
            assert_eq!(p.add(4095).read(), 0xA5);
        }

        // SAFETY: the full range of the mapping just created.
        unsafe { shim.unmap(region.as_ptr(), 4096, "cache") };

        let records = shim.sink().take();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], (TraceOp::Mmap, "cache".to_string()));
        assert_eq!(records[1], (TraceOp::Munmap, "cache".to_string()));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_map_bad_descriptor_records_then_fails() {
        let shim = AllocShim::new(CaptureTrace::new());

        /* file-backed mapping with fd -1: mmap must refuse with EBADF */
        // SAFETY: an invalid descriptor cannot produce a mapping; mmap
        // reports it via MAP_FAILED.
        let region = unsafe {
            shim.map(
                ptr::null_mut(),
                4096,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                -1,
                0,
                "cache-file",
            )
        };

        assert!(region.is_none());
        assert_eq!(last_errno(), libc::EBADF);

        /* the diagnostic preceded the failing delegate call */
        let records = shim.sink().take();
        assert_eq!(records[0], (TraceOp::Mmap, "cache-file".to_string()));
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_zero_size_alloc_is_forwarded() {
        /* malloc(0) may return null or a unique pointer - both are the
         * platform's answer, not ours. Only the record is guaranteed. */
        let shim = AllocShim::new(CaptureTrace::new());
        if let Some(block) = shim.alloc(0, "empty") {
            // SAFETY: whatever malloc(0) returned is safe to free once.
            unsafe { shim.release(block.as_ptr(), "empty") };
        }
        assert_eq!(shim.sink().take()[0].0, TraceOp::Malloc);
    }
}
