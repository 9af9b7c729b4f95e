//! Heap snapshot output.
//!
//! The dumper walks the region in header-sized strides, independent of block
//! boundaries, and prints the raw 32-bit word found at each offset. Stale
//! tags left behind by coalescing stay visible in the dump, exactly as the
//! bytes lie in the region.

use crate::heap::{Heap, TAG_SIZE};

use std::io::{self, Write};

/// Write one line per tag-sized offset from the region base:
/// `<offset>, 0x<8 hex digits>`, the word given in uppercase hex.
pub fn write_snapshot<W: Write>(heap: &Heap, mut output: W) -> io::Result<()> {
    let mut offset = 0;
    while offset + TAG_SIZE <= heap.size() {
        writeln!(output, "{}, 0x{:08X}", offset, heap.word_at(offset))?;
        offset += TAG_SIZE;
    }
    Ok(())
}
