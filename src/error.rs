use std::{fmt, io};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RleError>;

/// Why an encoded element was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
    /// element with a count of 0
    ZeroCount,
    /// a count byte with no value byte after it
    IncompleteElement,
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::ZeroCount => f.write_str("zero run count"),
            Malformed::IncompleteElement => f.write_str("count byte without a value byte"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RleError {
    #[error("malformed element at encoded offset {offset}: {kind}")]
    MalformedInput { offset: u64, kind: Malformed },

    #[error("encoded stream ended inside the element at offset {offset}")]
    TruncatedStream { offset: u64 },

    /// The sink failed. `accepted` bytes of the rejected call are already
    /// part of the encoder state and must not be written again.
    #[error("sink write failed after accepting {accepted} bytes")]
    Sink {
        accepted: usize,
        #[source]
        source: io::Error,
    },

    /// The source failed. `produced` bytes at the start of the destination
    /// are valid decoded output.
    #[error("source read failed after producing {produced} bytes")]
    Source {
        produced: usize,
        #[source]
        source: io::Error,
    },

    #[error("write after finalize")]
    StreamClosed,
}

impl RleError {
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            RleError::MalformedInput { .. } | RleError::TruncatedStream { .. }
        )
    }
}

impl From<RleError> for io::Error {
    fn from(err: RleError) -> io::Error {
        match err {
            RleError::Sink { source, .. } | RleError::Source { source, .. } => source,
            RleError::MalformedInput { .. } => io::Error::new(io::ErrorKind::InvalidData, err),
            RleError::TruncatedStream { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            RleError::StreamClosed => io::Error::new(io::ErrorKind::BrokenPipe, err),
        }
    }
}
