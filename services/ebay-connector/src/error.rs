//! Command-line errors

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("unknown command '{0}', expected 'serve' or 'refresh-tokens'")]
    UnknownCommand(String),

    #[error("missing value for {0}")]
    MissingValue(&'static str),
}

/// Result alias using service Error
pub type Result<T> = std::result::Result<T, Error>;
