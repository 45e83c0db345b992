use std::os::fd::RawFd;

use io_uring::{opcode, squeue, types::Fd};

use crate::error::{Error, Result};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Read into an owned buffer. `Ok(0)` is EOF / peer close; short reads
/// are possible. The buffer travels with the operation and is handed
/// back at completion, success or not.
pub(crate) struct Read {
  fd: RawFd,
  buf: Option<Vec<u8>>,
}

impl Read {
  pub fn new(fd: RawFd, buf: Vec<u8>) -> Read {
    Read { fd, buf: Some(buf) }
  }
}

impl OperationExt for Read {
  type Output = (Result<usize>, Vec<u8>);
}

impl Operation for Read {
  fn kind(&self) -> OpKind {
    OpKind::Read
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_FD | OpMeta::FD_READ
  }

  fn fd(&self) -> RawFd {
    self.fd
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    let buf = self.buf.as_mut().expect("read buffer already taken");
    opcode::Read::new(Fd(self.fd), buf.as_mut_ptr(), buf.len() as u32)
      .offset(u64::MAX) // current file position / stream
      .build()
  }

  fn run_nonblocking(&mut self) -> isize {
    let buf = self.buf.as_mut().expect("read buffer already taken");
    syscall_raw!(read(
      self.fd,
      buf.as_mut_ptr().cast::<libc::c_void>(),
      buf.len()
    ))
  }

  fn result(&mut self, ret: isize) -> *const () {
    let buf = self.buf.take().expect("read result extracted twice");
    let out: <Read as OperationExt>::Output = if ret < 0 {
      (Err(Error::from_raw_os_error(-ret as i32)), buf)
    } else {
      (Ok(ret as usize), buf)
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
