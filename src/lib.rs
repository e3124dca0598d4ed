/*
 * lib.rs
 *
 * Five named wrappers around the platform allocation primitives, each one
 * printing a trace line before it delegates. Nothing here owns anything;
 * whatever the primitive returns goes straight back to the caller.
 */

//! # alloctrace
//!
//! Instrumented pass-through wrappers around `calloc`/`malloc`/`free` and
//! `mmap`/`munmap`. Every call emits one diagnostic record of the form
//! `STUB <OPERATION>: <label>`, then delegates to the platform primitive
//! and returns its result unchanged. Observability only - allocation policy
//! is untouched.
//!
//! ## Quick Start
//!
//! ```rust
//! use alloctrace::AllocShim;
//!
//! let shim = AllocShim::stdout();
//!
//! // prints "STUB CALLOC: dataset", returns 32 zeroed bytes
//! let block = shim.alloc_zeroed(4, 8, "dataset").expect("out of memory");
//!
//! // prints "STUB FREE: dataset"
//! // SAFETY: block came from this shim and is released exactly once.
//! unsafe { shim.release(block.as_ptr(), "dataset") };
//! ```
//!
//! Records go to a [`TraceSink`], injected per shim. [`StdoutTrace`] is the
//! production sink; swap in [`NullTrace`] to silence tracing, or your own
//! sink to redirect it.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod global;
pub mod shim;
pub mod trace;

pub use global::TracedAlloc;
pub use shim::{AllocShim, last_errno};
pub use trace::{NullTrace, StdoutTrace, TraceOp, TraceSink, write_record};
