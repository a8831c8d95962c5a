//! Fuzz target for batch file decoding.
//!
//! Batch files may be truncated by a crash or tampered with on disk, so
//! decoding arbitrary bytes must end in events or an error, never a panic.

#![no_main]

use std::io::Cursor;

use evq_storage::{BlockReader, TryEventReassembler};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Keep allocations small: a header may claim up to 4 GiB.
    let reader = BlockReader::with_max_block_length(Cursor::new(data), 64 * 1024);
    for event in TryEventReassembler::new(reader) {
        if event.is_err() {
            break;
        }
    }
});
