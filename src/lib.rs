//! Educational boundary-tag heap allocator simulator.
//!
//! This crate simulates the classic malloc-style allocator over a fixed byte
//! region: every block carries a 4-byte header in front of its payload and a
//! 4-byte footer copy behind it, so both neighbors of a block are reachable
//! in constant time. The free blocks are tracked either *implicitly* (found
//! by walking every block) or *explicitly* (a doubly linked list threaded
//! through free payloads), and a request is placed *first-fit* or *best-fit*.
//! Both axes are chosen at construction via [`Config`].
//!
//! # Block layout
//! A freshly created 4000-byte heap is one spanning free block:
//! ```text
//! hhhh 0000 .......................... hhhh
//! ^--- ^------------------------------ ^---
//! FREE payload (3992 bytes)            footer = header
//! ```
//! Allocating 16 bytes needs a 24-byte block (payload plus both tags,
//! rounded up to a multiple of 8). The spanning block is split: the front
//! becomes the allocation, the tail stays free:
//! ```text
//! aaaa 0000 0000 0000 0000 aaaa ffff .... ffff
//! ^--- ^------------------ ^--- ^--- ^--- ^---
//! USED payload (16)        ftr  FREE 3976 ftr
//! ```
//! Freeing the block fuses it with the free tail again (and with a free
//! predecessor, found through the footer in front of the header), rewriting
//! header and footer of the surviving block. No two adjacent free blocks
//! survive any operation.
//!
//! # Driving the simulator
//! The engine is usually driven by a trace of `a`/`r`/`f` records and the
//! final region is dumped word by word:
//! ```
//! use tagheap::{write_snapshot, Config, Driver, Heap};
//!
//! let mut heap = Heap::new(Config::default());
//! let mut driver = Driver::new();
//! driver.replay(&mut heap, "a 100, 0\nr 200, 0, 1\nf 1\n".as_bytes())?;
//!
//! let mut dump = Vec::new();
//! write_snapshot(&heap, &mut dump)?;
//! assert!(dump.starts_with(b"0, 0x"));
//! # Ok::<(), std::io::Error>(())
//! ```
//! Addresses handed out by the engine are byte offsets of the payloads from
//! the region base, not real pointers; the backing memory is an owned,
//! plain `Vec<u8>`. That keeps the simulator entirely in safe code and
//! allows any number of independent heaps side by side.
mod config;
mod heap;
mod snapshot;
mod trace;

pub use config::{Config, ConfigError, INITIAL_REGION_SIZE, MAXIMUM_REGION_SIZE};
pub use heap::{
    Address, FreeCollectionKind, Heap, HeapError, Placement, MIN_BLOCK_SIZE, TAG_SIZE,
};
pub use snapshot::write_snapshot;
pub use trace::{Driver, TraceCommand, TraceParseError};
