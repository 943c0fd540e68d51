//! Error types for the SPE pipeline.
//!
//! Only `FirstPage` is meant to reach the user: every other failure mode
//! degrades into partial data or summary counters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeError {
    /// The upstream tabular API rejected the first page of a dataset.
    /// Aborts the cohort load; prior results stay untouched.
    #[error("upstream API returned HTTP {status} on the first page")]
    FirstPage { status: u16 },

    /// Transport-level failure talking to an upstream API.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The run was cancelled by a newer cohort selection.
    #[error("run cancelled")]
    Cancelled,

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, SpeError>;
