//! Startup status lines.
//!
//! Orchestration scripts watch standard output for these markers to know
//! when to launch the processes on the other side of each fabric. Logging
//! goes to stderr so stdout carries nothing else.

use std::io::{self, Write};

/// Startup milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Sync service is up, first fabric about to initialize
    Starting,
    /// First fabric is complete, second about to initialize
    Half,
    /// Both fabrics are complete, relaying begins
    Go,
    /// A `tcpl` fabric is accepting connections
    Listening,
}

impl Status {
    /// Line written for this milestone, without the newline.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "TICKRELAY:STARTING",
            Self::Half => "TICKRELAY:HALF",
            Self::Go => "TICKRELAY:GO",
            Self::Listening => "TICKRELAY:LISTENING",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes status lines, flushing after each.
#[derive(Debug)]
pub struct StatusWriter<W> {
    out: W,
}

impl StatusWriter<io::Stdout> {
    /// Writer on the process's standard output.
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> StatusWriter<W> {
    /// Writer on an arbitrary sink.
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one status line and flush it.
    pub fn emit(&mut self, status: Status) -> io::Result<()> {
        writeln!(self.out, "{status}")?;
        self.out.flush()
    }

    /// Consume the writer, returning the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}
