//! Crate-wide error taxonomy.

use std::fmt;
use thiserror::Error;

/// Up to three lines of context gathered around a rejected input line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseContext {
    pub line_no: usize,
    pub line_text: String,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub reason: String,
}

impl fmt::Display for ParseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "line {}: {}", self.line_no, self.reason)?;
        for (i, line) in self.before.iter().enumerate() {
            writeln!(f, "  {:>4} | {}", self.line_no - self.before.len() + i, line)?;
        }
        writeln!(f, "> {:>4} | {}", self.line_no, self.line_text)?;
        for (i, line) in self.after.iter().enumerate() {
            writeln!(f, "  {:>4} | {}", self.line_no + 1 + i, line)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum XdbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Parse(ParseContext),

    #[error("range start {start:08x} is greater than end {end:08x}")]
    RangeInverted { start: u32, end: u32 },

    #[error("region is empty")]
    EmptyRegion,

    #[error("discontiguous range list: previous end {prev_end:08x}, next start {next_start:08x}")]
    Discontiguous { prev_end: u32, next_start: u32 },

    #[error("region length {0} bytes exceeds the 65535 byte maximum")]
    RegionTooLong(usize),

    #[error("unsupported xdb format version {0}")]
    UnsupportedVersion(u16),

    #[error("xdb file truncated: {actual} bytes, need at least {required}")]
    TruncatedFile { actual: usize, required: usize },

    #[error("corrupt xdb: {0}")]
    CorruptXdb(String),

    #[error("no segment contains ip {0:08x}")]
    NoContainingSegment(u32),

    #[error("operation attempted on a closed handle")]
    Closed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid ipv4 address: {0:?}")]
    InvalidIp(String),

    #[error("input contains no ranges")]
    EmptyInput,
}
