//! Result emission.

use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

/// The exit status of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    /// The cluster matches the desired topology.
    Success,
    /// The reconciliation failed.
    Failed,
    /// The given parameters were rejected before contacting the cluster.
    InvalidInput,
}

impl ExitStatus {
    /// The process exit code of this status.
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
            Self::InvalidInput => 2,
        }
    }
}

/// Write the given value as a single line of JSON.
pub fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut out, value).context("error serializing result")?;
    writeln!(out).context("error writing result")?;
    out.flush().context("error flushing result")
}

/// Write the given value as JSON to stdout.
pub fn emit<T: Serialize>(value: &T) -> Result<()> {
    write_json(std::io::stdout().lock(), value)
}
