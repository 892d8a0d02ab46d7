//! Errors raised while parsing cgroup statistics files.
//!
//! [`StatParseError`] converts into [`std::io::Error`] with kind `InvalidData`, so the parsers can
//! keep `std::io::Result` signatures while tests still recover the structured error.
//!
//! ```rust
//! use std::io;
//! use creo_isolation::cgroup::stats::StatParseError;
//!
//! fn parse_pids(val: &str) -> io::Result<u64> {
//!     val.parse::<u64>().map_err(|source| {
//!         StatParseError::InvalidValue {
//!             value: val.to_string(),
//!             line: 1,
//!             source,
//!         }
//!         .into()
//!     })
//! }
//!
//! assert_eq!(parse_pids("max").unwrap_err().kind(), io::ErrorKind::InvalidData);
//! ```

use std::num::ParseIntError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatParseError {
    #[error("duplicate field '{field}' at line {line}")]
    DuplicateField { field: String, line: usize },

    #[error("invalid value for '{key}' at line {line}: '{value}': {source}")]
    InvalidKeyValue {
        key: String,
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid value at line {line}: '{value}': {source}")]
    InvalidValue {
        value: String,
        line: usize,
        #[source]
        source: ParseIntError,
    },

    #[error("error during I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StatParseError> for std::io::Error {
    fn from(err: StatParseError) -> Self {
        match err {
            StatParseError::Io(e) => e,
            StatParseError::InvalidKeyValue { .. }
            | StatParseError::InvalidValue { .. }
            | StatParseError::DuplicateField { .. } => {
                std::io::Error::new(std::io::ErrorKind::InvalidData, err)
            }
        }
    }
}

/// Extracts a `StatParseError` from an `std::io::Error` assuming it was wrapped.
///
/// Panics if the inner error is not a `StatParseError`. Intended for use in test assertions only.
#[cfg(test)]
pub(super) fn extract_stat_parse_error(err: &std::io::Error) -> &StatParseError {
    err.get_ref()
        .and_then(|e| e.downcast_ref::<StatParseError>())
        .unwrap()
}
