//! Error types shared by every module of the crate.
//!
//! Native failures keep the originating [`std::io::Error`] as their source so
//! callers can inspect the errno the kernel (or backend) reported.

use std::error::Error as StdError;
use std::fmt;
use std::io::Error as IOError;

use crate::line::LineState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Invalid construction arguments, caught before any native call.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Unable to open chip {selector}: {source}")]
    Open { selector: String, source: IOError },

    #[error("Unable to get line {offset}: {source}")]
    Acquire { offset: u32, source: IOError },

    /// The native request failed; the line has already been returned to
    /// [`LineState::Free`].
    #[error("Unable to request line {offset}: {source}")]
    Request { offset: u32, source: IOError },

    #[error("Line {offset} cannot {operation} while {state}")]
    State {
        offset: u32,
        state: LineState,
        operation: &'static str,
    },

    #[error("Line {offset} is not open")]
    NotOpen { offset: u32 },

    #[error("Line {offset} is closed")]
    Closed { offset: u32 },

    #[error("Unable to read event from line {offset}: {source}")]
    Read { offset: u32, source: IOError },

    #[error("Unknown event type: {0}")]
    Decode(u32),

    #[error(transparent)]
    Io(IOError),
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        ErrorKind::Configuration(msg.into()).into()
    }

    pub(crate) fn state(offset: u32, state: LineState, operation: &'static str) -> Self {
        ErrorKind::State {
            offset,
            state,
            operation,
        }
        .into()
    }

    pub(crate) fn not_open(offset: u32) -> Self {
        ErrorKind::NotOpen { offset }.into()
    }

    pub(crate) fn closed(offset: u32) -> Self {
        ErrorKind::Closed { offset }.into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match &self.kind {
            ErrorKind::Open { source, .. }
            | ErrorKind::Acquire { source, .. }
            | ErrorKind::Request { source, .. }
            | ErrorKind::Read { source, .. } => Some(source),
            ErrorKind::Io(err) => err.source(),
            _ => None,
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

impl From<IOError> for Error {
    fn from(err: IOError) -> Self {
        Self {
            kind: ErrorKind::Io(err),
        }
    }
}
