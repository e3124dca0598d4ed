/*
 * fuzz_targets/trace_record.rs
 *
 * fuzz target for the record formatter. validates that write_record never
 * panics on arbitrary labels and always produces one framed line.
 *
 * edge cases: "", embedded newlines, unicode, very long labels
 */

#![no_main]

use libfuzzer_sys::fuzz_target;

use alloctrace::{TraceOp, write_record};

fuzz_target!(|data: &[u8]| {
    /* labels are &str - invalid UTF-8 never reaches the formatter */
    if let Ok(label) = core::str::from_utf8(data) {
        let mut out = String::new();
        write_record(&mut out, TraceOp::Munmap, label).expect("String accepts any length");
        assert!(out.starts_with("STUB NMAP: "));
        assert!(out.ends_with('\n'));
    }
});
