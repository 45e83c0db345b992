//! Thin blocking helpers over descriptors.
//!
//! These functions wrap the bare syscalls. They retry `EINTR`
//! transparently; `would_block` from a non-blocking descriptor is
//! surfaced to the caller (the `try_*` names exist to make that explicit
//! at the call site). None of them may run inside a reactor callback.

use std::os::fd::AsRawFd;

use crate::error::{Error, Result};
use crate::net::{sockaddr_into_std, std_into_sockaddr, AcceptResult, Address, TcpSocket};

fn ret_to_result(ret: isize) -> Result<usize> {
  if ret < 0 {
    Err(Error::from_raw_os_error(-ret as i32))
  } else {
    Ok(ret as usize)
  }
}

/// Reads into `buf`, returning the byte count. `Ok(0)` means EOF or a
/// closed peer.
pub fn read(h: &impl AsRawFd, buf: &mut [u8]) -> Result<usize> {
  loop {
    let ret = syscall_raw!(read(
      h.as_raw_fd(),
      buf.as_mut_ptr().cast::<libc::c_void>(),
      buf.len()
    ));
    if ret == -(libc::EINTR as isize) {
      continue;
    }
    return ret_to_result(ret);
  }
}

/// Single read attempt; `would_block` surfaces immediately.
pub fn try_read(h: &impl AsRawFd, buf: &mut [u8]) -> Result<usize> {
  read(h, buf)
}

/// Appends everything up to EOF to `out` and returns the bytes added.
pub fn read_str(h: &impl AsRawFd, out: &mut String) -> Result<usize> {
  let mut total = 0;
  let mut chunk = [0u8; 4096];
  loop {
    let n = read(h, &mut chunk)?;
    if n == 0 {
      return Ok(total);
    }
    out.push_str(&String::from_utf8_lossy(&chunk[..n]));
    total += n;
  }
}

/// Reads up to the next newline, excluding it. EOF ends the line early.
pub fn read_line(h: &impl AsRawFd) -> Result<String> {
  let mut line = Vec::new();
  let mut byte = [0u8; 1];
  loop {
    let n = read(h, &mut byte)?;
    if n == 0 || byte[0] == b'\n' {
      return Ok(String::from_utf8_lossy(&line).into_owned());
    }
    line.push(byte[0]);
  }
}

/// Writes `data`, returning the byte count. Short writes are possible.
pub fn write(h: &impl AsRawFd, data: &[u8]) -> Result<usize> {
  loop {
    let ret = syscall_raw!(write(
      h.as_raw_fd(),
      data.as_ptr().cast::<libc::c_void>(),
      data.len()
    ));
    if ret == -(libc::EINTR as isize) {
      continue;
    }
    return ret_to_result(ret);
  }
}

/// Single write attempt; `would_block` surfaces immediately.
pub fn try_write(h: &impl AsRawFd, data: &[u8]) -> Result<usize> {
  write(h, data)
}

/// Re-issues [`write`] until `data` is drained or an error occurs.
pub fn write_all(h: &impl AsRawFd, data: &[u8]) -> Result<()> {
  let mut rest = data;
  while !rest.is_empty() {
    let n = write(h, rest)?;
    if n == 0 {
      return Err(Error::from_raw_os_error(libc::ECONNABORTED)
        .context("write_all made no progress"));
    }
    rest = &rest[n..];
  }
  Ok(())
}

/// Accepts one connection. On a non-blocking listener with no pending
/// connections this returns `would_block`.
pub fn accept(listener: &TcpSocket) -> Result<AcceptResult> {
  // SAFETY: zeroed sockaddr_storage is a valid "empty" value for the
  // kernel to fill.
  let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
  let mut len = std::mem::size_of_val(&storage) as libc::socklen_t;

  loop {
    let ret = syscall_raw!(accept4(
      listener.as_raw_fd(),
      (&mut storage as *mut libc::sockaddr_storage).cast::<libc::sockaddr>(),
      &mut len,
      libc::SOCK_CLOEXEC
    ));
    if ret == -(libc::EINTR as isize) {
      continue;
    }
    if ret < 0 {
      return Err(Error::from_raw_os_error(-ret as i32).context("accept"));
    }
    let client =
      TcpSocket::from_handle(crate::handle::Handle::from_raw(ret as i32));
    // SAFETY: accept4 filled the storage on success.
    let address = unsafe { sockaddr_into_std(&storage) }?;
    return Ok(AcceptResult { client, address });
  }
}

/// Single accept attempt; `would_block` surfaces immediately.
pub fn try_accept(listener: &TcpSocket) -> Result<AcceptResult> {
  accept(listener)
}

pub fn bind(sock: &TcpSocket, addr: &Address) -> Result<()> {
  let (storage, len) = std_into_sockaddr(addr.socket_addr()?);
  syscall!(bind(
    sock.as_raw_fd(),
    (&storage as *const libc::sockaddr_storage).cast::<libc::sockaddr>(),
    len
  ))
  .map_err(|e| Error::from(e).context(format!("bind {}", addr)))?;
  Ok(())
}

pub fn listen(sock: &TcpSocket, backlog: i32) -> Result<()> {
  syscall!(listen(sock.as_raw_fd(), backlog))
    .map_err(|e| Error::from(e).context("listen"))?;
  Ok(())
}

pub fn connect(sock: &TcpSocket, addr: &Address) -> Result<()> {
  let (storage, len) = std_into_sockaddr(addr.socket_addr()?);
  loop {
    match syscall!(connect(
      sock.as_raw_fd(),
      (&storage as *const libc::sockaddr_storage).cast::<libc::sockaddr>(),
      len
    )) {
      Ok(_) => return Ok(()),
      Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
      Err(e) => {
        return Err(Error::from(e).context(format!("connect {}", addr)))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::handle::Handle;

  fn pipe_pair() -> (Handle, Handle) {
    let mut fds = [0; 2];
    syscall!(pipe(fds.as_mut_ptr())).unwrap();
    (Handle::from_raw(fds[0]), Handle::from_raw(fds[1]))
  }

  #[test]
  fn write_then_read_round_trips() {
    let (r, w) = pipe_pair();
    assert_eq!(write(&w, b"hi\n").unwrap(), 3);
    let mut buf = [0u8; 16];
    assert_eq!(read(&r, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"hi\n");
  }

  #[test]
  fn read_line_strips_newline() {
    let (r, w) = pipe_pair();
    write_all(&w, b"first line\nsecond").unwrap();
    assert_eq!(read_line(&r).unwrap(), "first line");
    drop(w);
    // EOF ends the next line early.
    assert_eq!(read_line(&r).unwrap(), "second");
  }

  #[test]
  fn read_str_reads_to_eof() {
    let (r, w) = pipe_pair();
    write_all(&w, b"all of it").unwrap();
    drop(w);
    let mut out = String::new();
    assert_eq!(read_str(&r, &mut out).unwrap(), 9);
    assert_eq!(out, "all of it");
  }

  #[test]
  fn read_after_writer_close_is_eof() {
    let (r, w) = pipe_pair();
    drop(w);
    let mut buf = [0u8; 8];
    assert_eq!(read(&r, &mut buf).unwrap(), 0);
  }
}
