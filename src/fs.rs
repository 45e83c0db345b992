//! Files and open modes.

use std::ffi::CString;
use std::ops::BitOr;
use std::os::fd::{AsRawFd, RawFd};
use std::path::Path;

use crate::error::{Error, ErrorKind, Result};
use crate::handle::{Handle, IntoHandle};

/// Open-mode bitset translated to `O_*` flags.
///
/// Modes compose with `|`: `Mode::WRITE | Mode::CREATE | Mode::TRUNCATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u32);

impl Mode {
  pub const READ: Mode = Mode(1 << 0);
  pub const WRITE: Mode = Mode(1 << 1);
  pub const CREATE: Mode = Mode(1 << 2);
  pub const TRUNCATE: Mode = Mode(1 << 3);
  pub const APPEND: Mode = Mode(1 << 4);
  pub const READ_WRITE: Mode = Mode(Mode::READ.0 | Mode::WRITE.0);

  const fn contains(self, other: Mode) -> bool {
    self.0 & other.0 == other.0
  }

  fn to_open_flags(self) -> i32 {
    let mut flags = if self.contains(Mode::READ_WRITE) {
      libc::O_RDWR
    } else if self.contains(Mode::WRITE) {
      libc::O_WRONLY
    } else {
      libc::O_RDONLY
    };
    if self.contains(Mode::CREATE) {
      flags |= libc::O_CREAT;
    }
    if self.contains(Mode::TRUNCATE) {
      flags |= libc::O_TRUNC;
    }
    if self.contains(Mode::APPEND) {
      flags |= libc::O_APPEND;
    }
    flags | libc::O_CLOEXEC
  }
}

impl BitOr for Mode {
  type Output = Mode;

  fn bitor(self, rhs: Mode) -> Mode {
    Mode(self.0 | rhs.0)
  }
}

/// An owned file descriptor with seek semantics.
#[derive(Debug)]
pub struct File {
  h: Handle,
}

impl File {
  /// Opens `path` read-only.
  pub fn open(path: impl AsRef<Path>) -> Result<File> {
    File::open_with(path, Mode::READ)
  }

  pub fn open_with(path: impl AsRef<Path>, mode: Mode) -> Result<File> {
    let path = path.as_ref();
    let cpath =
      CString::new(path.as_os_str().as_encoded_bytes()).map_err(|_| {
        Error::new(ErrorKind::InvalidArgument, "path contains a NUL byte")
      })?;

    let fd =
      syscall!(open(cpath.as_ptr(), mode.to_open_flags(), 0o644 as libc::c_uint))
        .map_err(|e| Error::from(e).context(path.display().to_string()))?;

    Ok(File { h: Handle::from_raw(fd) })
  }

  pub fn from_handle(h: Handle) -> File {
    File { h }
  }
}

impl AsRawFd for File {
  fn as_raw_fd(&self) -> RawFd {
    self.h.as_raw_fd()
  }
}

impl IntoHandle for File {
  fn into_handle(self) -> Handle {
    self.h
  }
}
