/*
 * trace.rs
 *
 * Diagnostic record emission. One line per allocation call:
 *
 *   STUB <OPERATION>: <label>
 *
 * The production sink writes straight to fd 1 with libc::write - no
 * buffering. The record has to be out of the process before the delegated
 * primitive runs, otherwise a crash inside the allocator eats the one line
 * that says who called it.
 */

use core::fmt::{self, Write};

/// The five instrumented operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Calloc,
    Malloc,
    Free,
    Mmap,
    Munmap,
}

impl TraceOp {
    /// Tag printed in the diagnostic record.
    ///
    /// `Munmap` reports `NMAP`, not `UNMAP`. The tag predates this crate
    /// and log scrapers match on the exact string, so it stays.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Calloc => "CALLOC",
            Self::Malloc => "MALLOC",
            Self::Free => "FREE",
            Self::Mmap => "MMAP",
            Self::Munmap => "NMAP",
        }
    }
}

/// Where diagnostic records go.
///
/// A single-method collaborator injected into
/// [`AllocShim`](crate::AllocShim), so a caller can redirect or disable
/// tracing without capturing process output.
///
/// Implementations must not allocate: a sink may sit underneath a global
/// allocator, and an allocating `record` would re-enter it.
pub trait TraceSink {
    /// Emit one record for `op`, tagged with the caller-supplied `label`.
    fn record(&self, op: TraceOp, label: &str);
}

/// Write the canonical record: `STUB <TAG>: <label>` plus newline.
///
/// Public so tests and fuzz targets can exercise the format without
/// capturing the process output stream.
pub fn write_record<W: Write>(w: &mut W, op: TraceOp, label: &str) -> fmt::Result {
    writeln!(w, "STUB {}: {}", op.tag(), label)
}

/* stdout file descriptor */
const STDOUT: libc::c_int = 1;

/// Write bytes to stdout, unbuffered.
#[inline]
fn write_stdout(s: &[u8]) {
    // SAFETY: s is a valid byte slice and fd 1 is always open.
    unsafe {
        libc::write(STDOUT, s.as_ptr().cast(), s.len());
    }
}

/* real-world labels are short call-site names; anything that doesn't fit
 * here takes the chunked fallback */
const RECORD_CAP: usize = 256;

/// Fixed-capacity line buffer. `write_str` refuses anything that will not
/// fit rather than truncating mid-record.
struct RecordBuf {
    buf: [u8; RECORD_CAP],
    len: usize,
}

impl RecordBuf {
    const fn new() -> Self {
        Self {
            buf: [0; RECORD_CAP],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl Write for RecordBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let end = self.len.checked_add(bytes.len()).ok_or(fmt::Error)?;
        if end > RECORD_CAP {
            return Err(fmt::Error);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

/// Production sink: records go to the process standard output stream.
///
/// Each record is assembled on the stack and pushed out with one unbuffered
/// `write`, so records from concurrent callers do not interleave and the
/// line has left the process before the primitive runs.
pub struct StdoutTrace;

impl TraceSink for StdoutTrace {
    fn record(&self, op: TraceOp, label: &str) {
        let mut line = RecordBuf::new();
        if write_record(&mut line, op, label).is_ok() {
            write_stdout(line.as_bytes());
        } else {
            /* label longer than the stack buffer - emit in pieces */
            write_stdout(b"STUB ");
            write_stdout(op.tag().as_bytes());
            write_stdout(b": ");
            write_stdout(label.as_bytes());
            write_stdout(b"\n");
        }
    }
}

/// Sink that drops every record. Plug this in to silence tracing.
pub struct NullTrace;

impl TraceSink for NullTrace {
    fn record(&self, _op: TraceOp, _label: &str) {}
}

/* test-only sink that stores records for assertions */
#[cfg(test)]
pub(crate) struct CaptureTrace {
    records: std::sync::Mutex<std::vec::Vec<(TraceOp, std::string::String)>>,
}

#[cfg(test)]
impl CaptureTrace {
    pub(crate) fn new() -> Self {
        Self {
            records: std::sync::Mutex::new(std::vec::Vec::new()),
        }
    }

    /// Records seen so far, oldest first; clears the log.
    pub(crate) fn take(&self) -> std::vec::Vec<(TraceOp, std::string::String)> {
        core::mem::take(&mut *self.records.lock().unwrap())
    }
}

#[cfg(test)]
impl TraceSink for CaptureTrace {
    fn record(&self, op: TraceOp, label: &str) {
        use std::string::ToString;
        self.records.lock().unwrap().push((op, label.to_string()));
    }
}


/* -------------------------------------------------------------------------- */
/*                              kani proofs                                   */
/* -------------------------------------------------------------------------- */

#[cfg(kani)]
mod kani_proofs {
    use super::*;
    use core::fmt::Write;

    /*
     * verify RecordBuf never writes past its capacity, whatever chunk
     * sequence the fmt machinery feeds it.
     */
    #[kani::proof]
    #[kani::unwind(5)]
    fn verify_record_buf_stays_in_bounds() {
        let mut buf = RecordBuf::new();
        let chunk = "xxxxxxxx";
        for _ in 0..3 {
            let take: usize = kani::any();
            kani::assume(take <= chunk.len());
            let _ = buf.write_str(&chunk[..take]);
            kani::assert(buf.len <= RECORD_CAP, "len never exceeds capacity");
        }
    }
}
