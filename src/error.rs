//! Error and Result types.

use std::io;

use crate::message::Notice;

/// A specialized `Result` type for pgcore.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Represents all the ways a method can fail within pgcore.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Error communicating with the database server.
    #[error("error communicating with the server: {0}")]
    Io(#[from] io::Error),

    /// Error occurred while performing the TLS upgrade.
    #[error("error during TLS upgrade: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Unexpected or invalid data was encountered while communicating with the
    /// server. This would indicate a bug in this crate or in the server.
    #[error("encountered unexpected or invalid data: {0}")]
    Protocol(String),

    /// An error was returned by the server.
    #[error("error returned from the server: {0}")]
    Database(#[source] Box<PgDatabaseError>),

    /// The operation did not complete before its deadline. The connection may
    /// be recovered with [`recover_from_timeout`][crate::PgConnection::recover_from_timeout].
    #[error("operation timed out")]
    Timeout,

    /// The connection is permanently closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// An operation was attempted while an earlier result stream was still
    /// open: it was dropped instead of closed, and the connection has not
    /// been resynchronised with
    /// [`recover_from_timeout`][crate::PgConnection::recover_from_timeout].
    #[error("connection is busy with another result stream")]
    ConnectionBusy,

    /// No row was returned by a query expected to return at least one row.
    #[error("no rows returned by a query that expected to return at least one row")]
    RowNotFound,

    /// Column was not found by name in the row.
    #[error("no column found with the name {0:?}")]
    ColumnNotFound(String),

    /// Column index was out of bounds.
    #[error("column index out of bounds: the len is {len}, but the index is {index}")]
    ColumnIndexOutOfBounds { index: usize, len: usize },

    /// The query needs a different number of arguments than were provided.
    #[error("expected {expected} arguments, {given} were given")]
    ArgumentCount { expected: usize, given: usize },

    /// A positional placeholder referenced an argument that does not exist.
    #[error("placeholder ${index} is out of range for {count} arguments")]
    ArgumentIndex { index: usize, count: usize },

    /// An argument could not be mapped to a type OID and has no textual form.
    #[error("argument {index} has no known type OID and no textual fallback")]
    UnknownArgumentType { index: usize },

    /// The configured execution mode cannot run on this connection.
    #[error("{0}")]
    UnsupportedExecMode(String),

    /// A read-write session was required, but the server is read-only
    /// (hot standby).
    #[error("server is read-only, but a read-write session was required")]
    ReadOnly,

    /// The type map failed to encode a value for the wire.
    #[error("error encoding argument {index}: {source}")]
    Encode {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The type map failed to decode a value from the wire.
    #[error("error decoding column {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[inline]
    pub(crate) fn protocol(err: impl std::fmt::Display) -> Self {
        Error::Protocol(err.to_string())
    }

    #[inline]
    pub(crate) fn tls(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Tls(err.into())
    }

    /// Returns the server error, if this is [`Error::Database`].
    pub fn as_database_error(&self) -> Option<&PgDatabaseError> {
        match self {
            Error::Database(error) => Some(error),
            _ => None,
        }
    }

    // a fatal error invalidates the connection it occurred on
    pub(crate) fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::Tls(_) | Error::Protocol(_) => true,
            Error::Database(error) => error.severity().is_fatal(),
            _ => false,
        }
    }
}

/// An error returned from the PostgreSQL server in an `ErrorResponse`.
///
/// The field set is described in
/// <https://www.postgresql.org/docs/current/protocol-error-fields.html>.
#[derive(Debug)]
pub struct PgDatabaseError(pub(crate) Notice);

impl PgDatabaseError {
    pub fn severity(&self) -> PgSeverity {
        self.0.severity()
    }

    /// The SQLSTATE code for the error.
    pub fn code(&self) -> &str {
        self.0.code()
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        self.0.message()
    }

    pub fn detail(&self) -> Option<&str> {
        self.0.detail()
    }

    pub fn hint(&self) -> Option<&str> {
        self.0.hint()
    }

    /// Error cursor position as an index into the original query string,
    /// measured in characters, starting from 1.
    pub fn position(&self) -> Option<u32> {
        self.0.position()
    }

    pub fn table(&self) -> Option<&str> {
        self.0.get(b't')
    }

    pub fn column(&self) -> Option<&str> {
        self.0.get(b'c')
    }

    pub fn constraint(&self) -> Option<&str> {
        self.0.get(b'n')
    }

    pub fn file(&self) -> Option<&str> {
        self.0.get(b'F')
    }

    pub fn line(&self) -> Option<u32> {
        self.0.get(b'L').and_then(|line| line.parse().ok())
    }

    pub fn routine(&self) -> Option<&str> {
        self.0.get(b'R')
    }
}

impl std::error::Error for PgDatabaseError {}

impl std::fmt::Display for PgDatabaseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.message())
    }
}

impl From<PgDatabaseError> for Error {
    fn from(error: PgDatabaseError) -> Self {
        Error::Database(Box::new(error))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(u8)]
pub enum PgSeverity {
    Panic,
    Fatal,
    Error,
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl PgSeverity {
    #[inline]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Panic | Self::Fatal | Self::Error)
    }

    // a FATAL or PANIC response is followed by the server closing the socket
    #[inline]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Panic | Self::Fatal)
    }
}

// Format an `Error::Protocol` in place.
macro_rules! err_protocol {
    ($expr:expr) => {
        $crate::error::Error::Protocol($expr.into())
    };

    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Protocol(format!($fmt, $($arg)*))
    };
}
