//! Crate-wide error type.
//!
//! Mirrors the severity classes the storage core actually produces: I/O
//! failures from the pager, invariant violations from the node codec and
//! tree engine, and the two logical outcomes (`NotFound`, `DuplicateKey`)
//! the shell reports without aborting. `InvalidInput` covers shell parse
//! errors and the oversized-field rejection on update.
use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Storage(String),
    NotFound(String),
    DuplicateKey(String),
    InvalidInput(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::Storage(msg) => write!(f, "storage error: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::DuplicateKey(msg) => write!(f, "duplicate key: {}", msg),
            Error::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl Error {
    /// True for the "soft" logical errors the shell reports without aborting (§7 class 1-2).
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::DuplicateKey(_) | Error::InvalidInput(_)
        )
    }
}

/// Builds an `Error` of the named variant from a format string, the way call
/// sites across the pager/node/tree layers report invariant violations.
#[macro_export]
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {
        $crate::errors::Error::$variant(format!($($arg)*))
    };
}
