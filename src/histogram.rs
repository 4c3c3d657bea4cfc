//! Printable character histogram.
//!
//! Two shapes share the same domain (code points 32..=126):
//! - `Tally`: per-connection counts, built while payload bytes stream in
//! - `Histogram`: the process-wide aggregate, mutated only by `merge`
//!
//! Counters are 32-bit and wrap on overflow.

use std::fmt;
use std::io::{self, Write};

/// First printable ASCII code point (space).
pub const FIRST_PRINTABLE: u8 = 32;

/// Last printable ASCII code point (tilde).
pub const LAST_PRINTABLE: u8 = 126;

/// Number of distinct printable code points.
pub const PRINTABLE_COUNT: usize = (LAST_PRINTABLE - FIRST_PRINTABLE + 1) as usize;

/// Returns true for bytes in the inclusive range [32, 126].
#[inline]
pub fn is_printable(byte: u8) -> bool {
    (FIRST_PRINTABLE..=LAST_PRINTABLE).contains(&byte)
}

#[inline]
fn slot(byte: u8) -> usize {
    (byte - FIRST_PRINTABLE) as usize
}

/// Counts gathered from a single connection's payload.
///
/// Discarded without merging if the connection fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    counts: [u32; PRINTABLE_COUNT],
    total: u32,
}

impl Tally {
    pub fn new() -> Self {
        Self {
            counts: [0; PRINTABLE_COUNT],
            total: 0,
        }
    }

    /// Count the printable bytes of one payload chunk.
    ///
    /// Returns how many bytes of this chunk were printable.
    pub fn observe(&mut self, chunk: &[u8]) -> u32 {
        let mut seen = 0u32;
        for &byte in chunk {
            if is_printable(byte) {
                let idx = slot(byte);
                self.counts[idx] = self.counts[idx].wrapping_add(1);
                seen = seen.wrapping_add(1);
            }
        }
        self.total = self.total.wrapping_add(seen);
        seen
    }

    /// Total printable bytes observed so far. This is the value sent back
    /// in the Response Frame.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Count for a single code point. Non-printable bytes always read 0.
    pub fn get(&self, byte: u8) -> u32 {
        if is_printable(byte) {
            self.counts[slot(byte)]
        } else {
            0
        }
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new()
    }
}

/// Cumulative counts over every successfully completed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    counts: [u32; PRINTABLE_COUNT],
    connections: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            counts: [0; PRINTABLE_COUNT],
            connections: 0,
        }
    }

    /// Add a completed connection's tally, code point by code point.
    ///
    /// This is the only mutation entry point.
    pub fn merge(&mut self, tally: &Tally) {
        for (total, add) in self.counts.iter_mut().zip(tally.counts.iter()) {
            *total = total.wrapping_add(*add);
        }
        self.connections += 1;
    }

    /// Cumulative count for a single code point.
    pub fn get(&self, byte: u8) -> u32 {
        if is_printable(byte) {
            self.counts[slot(byte)]
        } else {
            0
        }
    }

    /// Number of tallies merged so far.
    pub fn connections(&self) -> u64 {
        self.connections
    }

    /// Iterate `(character, count)` in ascending code point order.
    pub fn iter(&self) -> impl Iterator<Item = (char, u32)> + '_ {
        (FIRST_PRINTABLE..=LAST_PRINTABLE).map(move |b| (b as char, self.counts[slot(b)]))
    }

    /// Write the operator report, one line per printable character.
    pub fn write_report<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{self}")?;
        out.flush()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (c, count) in self.iter() {
            writeln!(f, "char '{c}' : {count} times")?;
        }
        Ok(())
    }
}
