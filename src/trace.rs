//! Trace parsing and replay.
//!
//! A trace is a sequence of text records, one per line:
//!
//! ```text
//! a <size>, <ref>             allocate
//! r <size>, <ref>, <new_ref>  reallocate
//! f <ref>                     free
//! ```
//!
//! All numbers are non-negative decimals. The driver keeps a pointer table
//! mapping reference IDs to the most recent address returned for them; a
//! re-stored ID simply overwrites the old entry. Lines that do not parse are
//! skipped with a warning, recoverable engine errors are logged and replay
//! continues, so a single bad record never aborts a run.

use crate::heap::{Address, Heap};

use core::fmt;
use std::collections::HashMap;
use std::io::{self, BufRead};

use log::{debug, warn};

/// One operation decoded from a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceCommand {
    /// `a <size>, <ref>`
    Allocate { size: usize, reference: u32 },
    /// `r <size>, <ref>, <new_ref>`
    Reallocate {
        size: usize,
        reference: u32,
        new_reference: u32,
    },
    /// `f <ref>`
    Free { reference: u32 },
}
impl TraceCommand {
    /// Decode a single trace line. Blank lines decode to `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, TraceParseError> {
        let line = line.trim();
        let mut chars = line.chars();
        let Some(operation) = chars.next() else {
            return Ok(None);
        };

        let fields: Vec<&str> = chars.as_str().split(',').map(str::trim).collect();
        let command = match (operation, fields.as_slice()) {
            ('a', [size, reference]) => Self::Allocate {
                size: parse_number(size)?,
                reference: parse_number(reference)?,
            },
            ('r', [size, reference, new_reference]) => Self::Reallocate {
                size: parse_number(size)?,
                reference: parse_number(reference)?,
                new_reference: parse_number(new_reference)?,
            },
            ('f', [reference]) => Self::Free {
                reference: parse_number(reference)?,
            },
            ('a' | 'r' | 'f', _) => return Err(TraceParseError::WrongFieldCount),
            (other, _) => return Err(TraceParseError::UnknownCommand(other)),
        };
        Ok(Some(command))
    }
}

fn parse_number<T: core::str::FromStr>(field: &str) -> Result<T, TraceParseError> {
    field.parse().map_err(|_| TraceParseError::BadNumber)
}

/// A trace line that could not be decoded. The driver skips such lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceParseError {
    /// The leading operation character is not `a`, `r` or `f`.
    UnknownCommand(char),
    /// The operation has the wrong number of comma-separated fields.
    WrongFieldCount,
    /// A field is not a non-negative decimal number.
    BadNumber,
}
impl fmt::Display for TraceParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownCommand(operation) => write!(f, "unknown command '{operation}'"),
            Self::WrongFieldCount => f.write_str("wrong number of fields"),
            Self::BadNumber => f.write_str("field is not a non-negative decimal"),
        }
    }
}
impl std::error::Error for TraceParseError {}

/// Replays trace commands against a [`Heap`], owning the pointer table.
#[derive(Default)]
pub struct Driver {
    table: HashMap<u32, Address>,
}
impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The address currently stored for a reference ID, if any.
    pub fn address_of(&self, reference: u32) -> Option<Address> {
        self.table.get(&reference).copied()
    }

    /// Replay all trace lines from `input` against `heap`.
    ///
    /// Only I/O errors on the input abort the replay; bad lines and
    /// recoverable heap errors are logged and skipped.
    pub fn replay<R: BufRead>(&mut self, heap: &mut Heap, input: R) -> io::Result<()> {
        for (number, line) in input.lines().enumerate() {
            match TraceCommand::parse(&line?) {
                Ok(Some(command)) => self.apply(heap, command),
                Ok(None) => {}
                Err(error) => warn!("skipping trace line {}: {error}", number + 1),
            }
        }
        Ok(())
    }

    /// Apply a single command, updating the pointer table.
    pub fn apply(&mut self, heap: &mut Heap, command: TraceCommand) {
        match command {
            TraceCommand::Allocate { size, reference } => match heap.allocate(size) {
                Ok(address) => {
                    self.table.insert(reference, address);
                }
                Err(error) => {
                    warn!("allocate of {size} bytes for ref {reference} failed: {error}");
                    self.table.remove(&reference);
                }
            },
            TraceCommand::Reallocate {
                size,
                reference,
                new_reference,
            } => {
                let old = self.table.get(&reference).copied();
                match heap.reallocate(old, size) {
                    Ok(Some(address)) => {
                        self.table.insert(new_reference, address);
                    }
                    Ok(None) => {
                        self.table.remove(&new_reference);
                    }
                    Err(error) => {
                        warn!("reallocate of ref {reference} to {size} bytes failed: {error}");
                        self.table.remove(&new_reference);
                    }
                }
            }
            TraceCommand::Free { reference } => match self.table.get(&reference) {
                Some(address) => {
                    if let Err(error) = heap.free(*address) {
                        warn!("free of ref {reference} failed: {error}");
                    }
                }
                // the original's table is NULL-initialised, so freeing an
                // unknown ref frees NULL: a no-op
                None => debug!("free of unknown ref {reference} ignored"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Driver, TraceCommand, TraceParseError};
    use crate::config::Config;
    use crate::heap::{FreeCollectionKind, Heap, Placement};

    fn small_heap() -> Heap {
        Heap::new(Config {
            free_collection: FreeCollectionKind::Implicit,
            placement: Placement::FirstFit,
            initial_size: 64,
            maximum_size: 128,
        })
    }

    #[test]
    fn parses_the_three_commands() {
        assert_eq!(
            TraceCommand::parse("a 16, 0").unwrap(),
            Some(TraceCommand::Allocate {
                size: 16,
                reference: 0
            })
        );
        assert_eq!(
            TraceCommand::parse("r 200, 0, 1").unwrap(),
            Some(TraceCommand::Reallocate {
                size: 200,
                reference: 0,
                new_reference: 1
            })
        );
        assert_eq!(
            TraceCommand::parse("f 3").unwrap(),
            Some(TraceCommand::Free { reference: 3 })
        );
    }

    #[test]
    fn tolerates_whitespace() {
        assert_eq!(
            TraceCommand::parse("  a16,0  ").unwrap(),
            Some(TraceCommand::Allocate {
                size: 16,
                reference: 0
            })
        );
        assert_eq!(
            TraceCommand::parse("\tr  8 ,  1 , 2").unwrap(),
            Some(TraceCommand::Reallocate {
                size: 8,
                reference: 1,
                new_reference: 2
            })
        );
        assert_eq!(TraceCommand::parse("   ").unwrap(), None);
        assert_eq!(TraceCommand::parse("").unwrap(), None);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(
            TraceCommand::parse("x 1, 2"),
            Err(TraceParseError::UnknownCommand('x'))
        );
        assert_eq!(
            TraceCommand::parse("a 16"),
            Err(TraceParseError::WrongFieldCount)
        );
        assert_eq!(
            TraceCommand::parse("a 16, 0, 1"),
            Err(TraceParseError::WrongFieldCount)
        );
        assert_eq!(
            TraceCommand::parse("a -16, 0"),
            Err(TraceParseError::BadNumber)
        );
        assert_eq!(
            TraceCommand::parse("f ref"),
            Err(TraceParseError::BadNumber)
        );
    }

    #[test]
    fn pointer_table_is_last_write_wins() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        driver
            .replay(&mut heap, "a 8, 0\na 8, 0\n".as_bytes())
            .unwrap();

        // ref 0 now names the second allocation; the first block leaks
        let second = driver.address_of(0).unwrap();
        assert_eq!(second.offset(), 20);
        heap.verify().unwrap();
    }

    #[test]
    fn freeing_an_unknown_ref_is_a_no_op() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        driver.replay(&mut heap, "f 99\n".as_bytes()).unwrap();

        heap.verify().unwrap();
        heap.allocate(56).unwrap(); // the region is still one spanning block
    }

    #[test]
    fn failed_allocation_clears_the_ref() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        driver
            .replay(&mut heap, "a 8, 0\na 100, 0\nf 0\n".as_bytes())
            .unwrap();

        // the failed allocate overwrote ref 0, so the final free was a no-op
        assert_eq!(driver.address_of(0), None);
        heap.verify().unwrap();
    }

    #[test]
    fn double_free_through_the_table_is_survivable() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        driver
            .replay(&mut heap, "a 8, 0\nf 0\nf 0\na 8, 1\n".as_bytes())
            .unwrap();

        // the second free was rejected, replay carried on
        assert!(driver.address_of(1).is_some());
        heap.verify().unwrap();
    }

    #[test]
    fn garbage_lines_are_skipped() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        let trace = "x 1, 2\n\n  a 8, 1\nnot a command\nf 1\n";
        driver.replay(&mut heap, trace.as_bytes()).unwrap();

        heap.verify().unwrap();
        heap.allocate(56).unwrap(); // everything was freed again
    }

    #[test]
    fn reallocate_through_the_table() {
        let mut heap = small_heap();
        let mut driver = Driver::new();
        driver
            .replay(&mut heap, "a 8, 0\nr 24, 0, 1\nf 1\n".as_bytes())
            .unwrap();

        // ref 0 still holds the old, now dangling address
        assert_ne!(driver.address_of(0), driver.address_of(1));
        heap.verify().unwrap();
        heap.allocate(56).unwrap();
    }
}
