//! Filesystem and transport error types.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio_modbus::ExceptionCode;

/// Dispatcher error type.
///
/// Every variant is an ordinary result handed back to the caller of the
/// filesystem operation; nothing here is retried.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path does not name a declared slave, register or control file.
    #[error("not found: {0}")]
    NotFound(String),

    /// Open mode or operation not permitted on this file.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Slave or register already declared.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed or out-of-range write payload.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Read buffer cannot hold a rendered register value.
    #[error("read buffer of {0} bytes is too small")]
    ShortBuffer(u32),

    /// Registry growth failed to allocate.
    #[error("out of memory")]
    OutOfMemory,

    /// The Modbus transaction failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl FsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(what: impl Into<String>) -> Self {
        Self::AlreadyExists(what.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }
}

impl From<indexmap::TryReserveError> for FsError {
    fn from(_: indexmap::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Convert FsError to std::io::Error for compatibility.
impl From<FsError> for io::Error {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            FsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            FsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            FsError::InvalidArgument(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            FsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            FsError::ShortBuffer(size) => {
                io::Error::other(format!("read buffer of {size} bytes is too small"))
            }
            FsError::OutOfMemory => io::Error::new(io::ErrorKind::OutOfMemory, "out of memory"),
            FsError::Transport(err) => io::Error::other(err),
        }
    }
}

/// Dispatcher result type.
pub type FsResult<T> = Result<T, FsError>;

/// Failure of a single Modbus transaction or of establishing the link.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Protocol or framing failure reported by the Modbus client.
    #[error("modbus: {0}")]
    Modbus(#[from] tokio_modbus::Error),

    /// The slave answered with an exception response.
    #[error("modbus exception: {0:?}")]
    Exception(ExceptionCode),

    /// The slave did not answer in time.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The serial device could not be opened.
    #[error("serial port: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Socket level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Register read returned an unexpected number of words.
    #[error("expected 1 register, got {0}")]
    ShortResponse(usize),

    /// Host name did not resolve to any address.
    #[error("cannot resolve {0}")]
    Resolve(String),
}

impl From<ExceptionCode> for TransportError {
    fn from(code: ExceptionCode) -> Self {
        Self::Exception(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let e: io::Error = FsError::not_found("/17").into();
        assert_eq!(e.kind(), io::ErrorKind::NotFound);

        let e: io::Error = FsError::invalid_argument("bad").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidInput);

        let timeout = TransportError::Timeout(Duration::from_millis(5));
        let e: io::Error = FsError::Transport(timeout).into();
        assert_eq!(e.kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_display() {
        assert_eq!(FsError::already_exists("slave 17").to_string(), "already exists: slave 17");
        assert_eq!(FsError::ShortBuffer(2).to_string(), "read buffer of 2 bytes is too small");
    }
}
