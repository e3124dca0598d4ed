/*
 * global.rs
 *
 * GlobalAlloc adapter: route Rust's own heap traffic through the shim so a
 * whole program's allocations show up in the trace under one label.
 *
 * Policy is identical to plain libc malloc/free; the only addition is the
 * record per call.
 */

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use libc::c_void;

use crate::shim::AllocShim;
use crate::trace::{StdoutTrace, TraceOp, TraceSink};

/* malloc guarantees this much alignment on the supported platforms;
 * anything larger goes through posix_memalign */
const MALLOC_ALIGN: usize = 16;

/// Traced system allocator.
///
/// A `GlobalAlloc` call site has no per-call label to offer, so every
/// record carries the label the allocator was constructed with:
///
/// ```rust,ignore
/// use alloctrace::{StdoutTrace, TracedAlloc};
///
/// #[global_allocator]
/// static ALLOC: TracedAlloc<StdoutTrace> = TracedAlloc::stdout("rust-heap");
/// ```
pub struct TracedAlloc<S: TraceSink> {
    shim: AllocShim<S>,
    label: &'static str,
}

impl TracedAlloc<StdoutTrace> {
    /// Traced allocator recording to standard output.
    #[must_use]
    pub const fn stdout(label: &'static str) -> Self {
        Self::new(StdoutTrace, label)
    }
}

impl<S: TraceSink> TracedAlloc<S> {
    /// Traced allocator recording through `sink` under `label`.
    #[must_use]
    pub const fn new(sink: S, label: &'static str) -> Self {
        Self {
            shim: AllocShim::new(sink),
            label,
        }
    }
}

// SAFETY: every path delegates to libc malloc/calloc/free/posix_memalign,
// which are thread-safe and hand out aligned, non-overlapping memory or
// null on failure, as GlobalAlloc requires. The sink must be Sync to be
// shared and must not allocate (TraceSink's contract), so recording cannot
// re-enter the allocator.
unsafe impl<S: TraceSink + Sync> GlobalAlloc for TracedAlloc<S> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MALLOC_ALIGN {
            self.shim.sink().record(TraceOp::Malloc, self.label);
            let mut out: *mut c_void = ptr::null_mut();
            // SAFETY: Layout guarantees align is a power of two, and above
            // MALLOC_ALIGN it is a multiple of size_of::<*mut c_void>() as
            // posix_memalign requires. On failure out stays null.
            let rc = unsafe { libc::posix_memalign(&mut out, layout.align(), layout.size()) };
            if rc == 0 { out.cast() } else { ptr::null_mut() }
        } else {
            match self.shim.alloc(layout.size(), self.label) {
                Some(p) => p.as_ptr().cast(),
                None => ptr::null_mut(),
            }
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > MALLOC_ALIGN {
            // SAFETY: same contract as alloc; forwarded unchanged.
            let p = unsafe { self.alloc(layout) };
            if !p.is_null() {
                // SAFETY: p was just allocated with layout.size() bytes.
                unsafe { ptr::write_bytes(p, 0, layout.size()) };
            }
            p
        } else {
            match self.shim.alloc_zeroed(1, layout.size(), self.label) {
                Some(p) => p.as_ptr().cast(),
                None => ptr::null_mut(),
            }
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: caller guarantees ptr came from this allocator. free
        // accepts anything malloc or posix_memalign produced, and null.
        unsafe { self.shim.release(ptr.cast(), self.label) };
    }

    /* realloc stays the trait default (alloc + copy + dealloc): it keeps
     * every emitted record inside the five-operation vocabulary */
}
