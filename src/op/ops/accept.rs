use std::mem;
use std::os::fd::RawFd;

use io_uring::{opcode, squeue, types::Fd};

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::net::{sockaddr_into_std, AcceptResult, TcpSocket};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Accept one connection on a listening socket.
///
/// The sockaddr storage lives inside the boxed operation so its address
/// stays stable while the kernel fills it. Accepted clients are created
/// `CLOEXEC | NONBLOCK`, ready for the reactor.
pub(crate) struct Accept {
  fd: RawFd,
  addr: libc::sockaddr_storage,
  len: libc::socklen_t,
}

impl Accept {
  pub fn new(fd: RawFd) -> Accept {
    // SAFETY: zeroed sockaddr_storage is a valid "empty" value for the
    // kernel to fill.
    let addr: libc::sockaddr_storage = unsafe { mem::zeroed() };
    Accept { fd, len: mem::size_of_val(&addr) as libc::socklen_t, addr }
  }
}

impl OperationExt for Accept {
  type Output = Result<AcceptResult>;
}

impl Operation for Accept {
  fn kind(&self) -> OpKind {
    OpKind::Accept
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_FD | OpMeta::FD_READ
  }

  fn fd(&self) -> RawFd {
    self.fd
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    opcode::Accept::new(
      Fd(self.fd),
      (&mut self.addr as *mut libc::sockaddr_storage)
        .cast::<libc::sockaddr>(),
      &mut self.len,
    )
    .flags(libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK)
    .build()
  }

  fn run_nonblocking(&mut self) -> isize {
    syscall_raw!(accept4(
      self.fd,
      (&mut self.addr as *mut libc::sockaddr_storage)
        .cast::<libc::sockaddr>(),
      &mut self.len,
      libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK
    ))
  }

  fn result(&mut self, ret: isize) -> *const () {
    let out: <Accept as OperationExt>::Output = if ret < 0 {
      Err(Error::from_raw_os_error(-ret as i32).context("accept"))
    } else {
      let client = TcpSocket::from_handle(Handle::from_raw(ret as RawFd));
      // SAFETY: the kernel filled the storage on success.
      unsafe { sockaddr_into_std(&self.addr) }
        .map(|address| AcceptResult { client, address })
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
