use std::os::fd::RawFd;

use io_uring::{opcode, squeue, types::Fd};

use crate::error::{Error, Result};
use crate::net::{std_into_sockaddr, Address};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Connect a socket to a remote address.
///
/// On the readiness engine the first syscall starts the handshake
/// (`EINPROGRESS`), and the retry after write-readiness reports the
/// outcome: `EISCONN` then means "connected".
pub(crate) struct Connect {
  fd: RawFd,
  addr: libc::sockaddr_storage,
  len: libc::socklen_t,
  started: bool,
}

impl Connect {
  pub fn new(fd: RawFd, addr: &Address) -> Result<Connect> {
    let (storage, len) = std_into_sockaddr(addr.socket_addr()?);
    Ok(Connect { fd, addr: storage, len, started: false })
  }
}

impl OperationExt for Connect {
  type Output = Result<()>;
}

impl Operation for Connect {
  fn kind(&self) -> OpKind {
    OpKind::Connect
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_FD | OpMeta::FD_WRITE | OpMeta::NEEDS_RUN
  }

  fn fd(&self) -> RawFd {
    self.fd
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    opcode::Connect::new(
      Fd(self.fd),
      (&self.addr as *const libc::sockaddr_storage)
        .cast::<libc::sockaddr>(),
      self.len,
    )
    .build()
  }

  fn run_nonblocking(&mut self) -> isize {
    let ret = syscall_raw!(connect(
      self.fd,
      (&self.addr as *const libc::sockaddr_storage)
        .cast::<libc::sockaddr>(),
      self.len
    ));
    let first = !self.started;
    self.started = true;
    if ret == -(libc::EISCONN as isize) && !first {
      // The earlier EINPROGRESS handshake finished.
      return 0;
    }
    ret
  }

  fn result(&mut self, ret: isize) -> *const () {
    let out: <Connect as OperationExt>::Output = if ret < 0 {
      Err(Error::from_raw_os_error(-ret as i32).context("connect"))
    } else {
      Ok(())
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
