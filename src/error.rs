use std::path::PathBuf;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::monitor::FetchError;
use crate::process::RangeOutcome;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid range format: '{0}'. Should be start-end with integers.")]
    InvalidRangeFormat(String),
    #[error("Inverted range {start}-{end}: start should be <= end.")]
    InvertedRange { start: u64, end: u64 },
    #[error("Page ranges start at 1, got: '{0}'")]
    ZeroPage(String),
    #[error("No valid ranges were supplied.")]
    NoValidRanges,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid date bounds: {0}")]
    InvalidDateBounds(String),

    #[error("Gave up on page {page} after {attempts} retries. Last error: {last}")]
    RetriesExhausted {
        page: u64,
        attempts: u32,
        last: String,
    },
    #[error("Fetch Error: {0}")]
    Fetch(#[from] FetchError),
    #[error("Monitor couldn't be built: {0}")]
    Monitor(String),

    #[error("Couldn't write backlog to {path}: {source}")]
    WriteBacklog {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
    #[error("Couldn't send a range outcome through a channel.")]
    RuntimeSendError,

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<mpsc::error::SendError<RangeOutcome>> for Error {
    fn from(_value: mpsc::error::SendError<RangeOutcome>) -> Self {
        Error::RuntimeSendError
    }
}
