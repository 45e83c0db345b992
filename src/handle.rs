//! Owning wrappers around raw file descriptors.
//!
//! A [`Handle`] is the fundamental resource type of rio: it owns exactly
//! one descriptor and closes it on drop. Moves transfer ownership (the
//! type is not `Clone`), so a descriptor is released exactly once.

use std::os::fd::{AsRawFd, RawFd};

/// Sentinel for "no descriptor".
const INVALID: RawFd = -1;

/// An owned OS file descriptor.
///
/// The destructor closes the descriptor only when it is valid, so a
/// disarmed handle (after [`into_raw`](Handle::into_raw)) drops without a
/// syscall. Closing is therefore idempotent at the type level.
#[derive(Debug)]
pub struct Handle {
  fd: RawFd,
}

impl Handle {
  /// Takes ownership of `fd`. The handle will close it on drop.
  pub fn from_raw(fd: RawFd) -> Handle {
    Handle { fd }
  }

  pub fn stdin() -> Handle {
    Handle::from_raw(libc::STDIN_FILENO)
  }

  pub fn stdout() -> Handle {
    Handle::from_raw(libc::STDOUT_FILENO)
  }

  pub fn stderr() -> Handle {
    Handle::from_raw(libc::STDERR_FILENO)
  }

  pub fn is_valid(&self) -> bool {
    self.fd >= 0
  }

  pub fn as_raw(&self) -> RawFd {
    self.fd
  }

  /// Releases ownership without closing and disarms the destructor.
  pub fn into_raw(mut self) -> RawFd {
    std::mem::replace(&mut self.fd, INVALID)
  }
}

impl AsRawFd for Handle {
  fn as_raw_fd(&self) -> RawFd {
    self.fd
  }
}

impl Drop for Handle {
  fn drop(&mut self) {
    if self.fd >= 0 {
      let _ = syscall!(close(self.fd));
      self.fd = INVALID;
    }
  }
}

/// Conversion into the underlying [`Handle`], consuming the wrapper.
///
/// Implemented by every owning descriptor type so `kill` and friends can
/// take any of them.
pub trait IntoHandle {
  fn into_handle(self) -> Handle;
}

impl IntoHandle for Handle {
  fn into_handle(self) -> Handle {
    self
  }
}
