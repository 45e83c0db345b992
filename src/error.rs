//! rio's error model.
//!
//! Every fallible operation in the crate returns [`Result<T>`]. The error
//! carries a portable [`ErrorKind`] classification, the originating errno
//! when there is one, and a human-readable context string. Display output
//! is a single line of the form `[<category>]: <message>`.
//!
//! Chaining uses the std `Result` vocabulary (`and_then`, `or_else`,
//! `map`, `unwrap_or`), nothing crate-specific.

use std::borrow::Cow;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Portable classification of an I/O failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  /// Transient; the caller is expected to retry.
  WouldBlock,
  /// A deadline elapsed before the operation finished.
  TimedOut,
  /// The operation was torn down by `kill` or by dropping its future.
  OperationCancelled,
  /// A signal interrupted the syscall. Never surfaced to user code; the
  /// crate retries reads, writes and accepts transparently.
  Interrupted,
  /// The peer closed or reset the connection.
  ConnectionAborted,
  NotFound,
  PermissionDenied,
  AlreadyExists,
  InvalidArgument,
  /// Out of file descriptors or out of submission slots.
  ResourceExhausted,
  /// Generic I/O failure carrying the underlying OS category.
  Io,
}

impl ErrorKind {
  pub(crate) fn from_errno(errno: i32) -> ErrorKind {
    match errno {
      libc::EAGAIN | libc::EINPROGRESS => ErrorKind::WouldBlock,
      libc::ETIMEDOUT | libc::ETIME => ErrorKind::TimedOut,
      libc::ECANCELED => ErrorKind::OperationCancelled,
      libc::EINTR => ErrorKind::Interrupted,
      libc::ECONNABORTED | libc::ECONNRESET | libc::EPIPE => {
        ErrorKind::ConnectionAborted
      }
      libc::ENOENT => ErrorKind::NotFound,
      libc::EACCES | libc::EPERM => ErrorKind::PermissionDenied,
      libc::EEXIST => ErrorKind::AlreadyExists,
      libc::EINVAL | libc::EAFNOSUPPORT | libc::EBADF => {
        ErrorKind::InvalidArgument
      }
      libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM => {
        ErrorKind::ResourceExhausted
      }
      _ => ErrorKind::Io,
    }
  }

  /// Stable snake_case name, used by `Display` on [`Error`].
  pub fn name(self) -> &'static str {
    match self {
      ErrorKind::WouldBlock => "would_block",
      ErrorKind::TimedOut => "timed_out",
      ErrorKind::OperationCancelled => "operation_cancelled",
      ErrorKind::Interrupted => "interrupted",
      ErrorKind::ConnectionAborted => "connection_aborted",
      ErrorKind::NotFound => "not_found",
      ErrorKind::PermissionDenied => "permission_denied",
      ErrorKind::AlreadyExists => "already_exists",
      ErrorKind::InvalidArgument => "invalid_argument",
      ErrorKind::ResourceExhausted => "resource_exhausted",
      ErrorKind::Io => "io",
    }
  }
}

impl std::fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Error, Debug, Clone)]
#[error("[{kind}]: {context}")]
pub struct Error {
  kind: ErrorKind,
  errno: Option<i32>,
  context: Cow<'static, str>,
}

impl Error {
  pub fn new(kind: ErrorKind, context: impl Into<Cow<'static, str>>) -> Error {
    Error { kind, errno: None, context: context.into() }
  }

  /// Classifies a positive OS error code.
  pub fn from_raw_os_error(errno: i32) -> Error {
    Error {
      kind: ErrorKind::from_errno(errno),
      errno: Some(errno),
      context: std::io::Error::from_raw_os_error(errno).to_string().into(),
    }
  }

  /// Prefixes the context with an amplification, keeping kind and errno.
  #[must_use]
  pub fn context(self, prefix: impl std::fmt::Display) -> Error {
    Error {
      kind: self.kind,
      errno: self.errno,
      context: format!("{}: {}", prefix, self.context).into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    self.kind
  }

  pub fn raw_os_error(&self) -> Option<i32> {
    self.errno
  }

  /// Representative errno for errors that did not come from the OS. Used
  /// when a failure has to travel the same completion path as a kernel
  /// result.
  pub(crate) fn to_errno(&self) -> i32 {
    self.errno.unwrap_or(match self.kind {
      ErrorKind::WouldBlock => libc::EAGAIN,
      ErrorKind::TimedOut => libc::ETIMEDOUT,
      ErrorKind::OperationCancelled => libc::ECANCELED,
      ErrorKind::Interrupted => libc::EINTR,
      ErrorKind::ConnectionAborted => libc::ECONNABORTED,
      ErrorKind::NotFound => libc::ENOENT,
      ErrorKind::PermissionDenied => libc::EACCES,
      ErrorKind::AlreadyExists => libc::EEXIST,
      ErrorKind::InvalidArgument => libc::EINVAL,
      ErrorKind::ResourceExhausted => libc::ENOBUFS,
      ErrorKind::Io => libc::EIO,
    })
  }
}

impl From<std::io::Error> for Error {
  fn from(err: std::io::Error) -> Error {
    match err.raw_os_error() {
      Some(errno) => Error::from_raw_os_error(errno),
      None => Error::new(ErrorKind::Io, err.to_string()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_is_single_line() {
    let err = Error::new(ErrorKind::TimedOut, "deadline elapsed");
    assert_eq!(err.to_string(), "[timed_out]: deadline elapsed");
  }

  #[test]
  fn errno_classification() {
    assert_eq!(
      Error::from_raw_os_error(libc::ECANCELED).kind(),
      ErrorKind::OperationCancelled
    );
    assert_eq!(
      Error::from_raw_os_error(libc::EAGAIN).kind(),
      ErrorKind::WouldBlock
    );
    assert_eq!(
      Error::from_raw_os_error(libc::ECONNRESET).kind(),
      ErrorKind::ConnectionAborted
    );
    assert_eq!(Error::from_raw_os_error(libc::EXDEV).kind(), ErrorKind::Io);
  }

  #[test]
  fn context_prefixes() {
    let err =
      Error::from_raw_os_error(libc::ENOENT).context("open /tmp/missing");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().starts_with("[not_found]: open /tmp/missing: "));
  }

  #[test]
  fn to_errno_round_trip() {
    let err = Error::new(ErrorKind::ResourceExhausted, "out of slots");
    assert_eq!(
      ErrorKind::from_errno(err.to_errno()),
      ErrorKind::ResourceExhausted
    );
  }
}
