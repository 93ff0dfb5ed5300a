//! Failure classes the scheduler and passes discriminate on.
//!
//! Most plumbing uses `anyhow::Result`; these variants exist where a caller
//! changes behavior based on the class of failure (skip a tick, drop a
//! record, exit the process).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraconError {
    /// Fatal at startup: bad environment value, unreadable boundary file,
    /// unrecoverable schema mismatch.
    #[error("configuration error: {0}")]
    Config(String),

    /// The upstream feed could not be fetched after exhausting retries.
    /// The current tick is skipped; the scheduler continues.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A single record could not be parsed. The record is dropped and the
    /// pipeline continues.
    #[error("parse error: {0}")]
    Parse(String),

    /// Connection drop, deadlock. Retried once; on repeat failure the
    /// affected batch or record is skipped.
    #[error("transient database error: {0}")]
    DatabaseTransient(anyhow::Error),

    /// Schema missing after attempted init, persistent pool exhaustion.
    /// The process exits with code 2.
    #[error("fatal database error: {0}")]
    DatabaseFatal(String),

    /// Building one session's summary failed. Logged and skipped; the pass
    /// continues with the remaining sessions.
    #[error("summarization error for {callsign}: {cause}")]
    Summarization {
        callsign: String,
        cause: anyhow::Error,
    },
}

impl TraconError {
    pub fn parse(msg: impl Into<String>) -> Self {
        TraconError::Parse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TraconError::Config(msg.into())
    }
}
