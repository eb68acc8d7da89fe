//! Counting errors.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;

/// Counting error.
#[derive(Debug)]
pub enum CountError {
    /// The header does not contain the configured key field.
    KeyFieldNotFound(String),
    /// A data row whose field count does not match the header.
    MalformedRecord {
        /// Offending row content.
        record: String,
        /// Number of fields found in the row.
        fields: usize,
        /// Number of fields declared by the header.
        expected: usize,
    },
    /// Open, seek or read failure.
    IO(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// A worker thread panicked while counting a partition.
    WorkerPanic(String),
}

impl CountError {
    /// Returns `true` if the error is caused by the input data or its header
    /// rather than by the environment.
    pub fn is_data_error(&self) -> bool {
        matches!(self, CountError::KeyFieldNotFound(_) | CountError::MalformedRecord { .. })
    }

    /// Returns `true` for I/O failures.
    pub fn is_io_error(&self) -> bool {
        matches!(self, CountError::IO(_))
    }

    pub(crate) fn malformed(record: impl Into<String>, fields: usize, expected: usize) -> Self {
        CountError::MalformedRecord {
            record: record.into(),
            fields,
            expected,
        }
    }
}

impl Error for CountError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            CountError::IO(err) => Some(err),
            CountError::ThreadPoolBuildError(err) => Some(err),
            CountError::KeyFieldNotFound(_) | CountError::MalformedRecord { .. } | CountError::WorkerPanic(_) => None,
        }
    }
}

impl Display for CountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            CountError::KeyFieldNotFound(field) => write!(f, "key field '{}' not found in header", field),
            CountError::MalformedRecord {
                record,
                fields,
                expected,
            } => write!(
                f,
                "malformed record (fields: {}, expected: {}): {:?}",
                fields, expected, record
            ),
            CountError::IO(err) => write!(f, "I/O operation failed: {}", err),
            CountError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            CountError::WorkerPanic(msg) => write!(f, "worker panicked: {}", msg),
        }
    }
}

impl From<io::Error> for CountError {
    fn from(err: io::Error) -> Self {
        CountError::IO(err)
    }
}

impl From<csv::Error> for CountError {
    fn from(err: csv::Error) -> Self {
        // records are read as raw bytes without length checks, only I/O kinds reach here
        let description = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(err) => CountError::IO(err),
            _ => CountError::IO(io::Error::new(io::ErrorKind::InvalidData, description)),
        }
    }
}
