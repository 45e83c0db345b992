use std::os::fd::RawFd;

use io_uring::{opcode, squeue, types::Fd};

use crate::error::{Error, Result};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Write from an owned buffer. Short writes are possible; the buffer is
/// handed back at completion.
pub(crate) struct Write {
  fd: RawFd,
  buf: Option<Vec<u8>>,
}

impl Write {
  pub fn new(fd: RawFd, buf: Vec<u8>) -> Write {
    Write { fd, buf: Some(buf) }
  }
}

impl OperationExt for Write {
  type Output = (Result<usize>, Vec<u8>);
}

impl Operation for Write {
  fn kind(&self) -> OpKind {
    OpKind::Write
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_FD | OpMeta::FD_WRITE
  }

  fn fd(&self) -> RawFd {
    self.fd
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    let buf = self.buf.as_ref().expect("write buffer already taken");
    opcode::Write::new(Fd(self.fd), buf.as_ptr(), buf.len() as u32)
      .offset(u64::MAX)
      .build()
  }

  fn run_nonblocking(&mut self) -> isize {
    let buf = self.buf.as_ref().expect("write buffer already taken");
    syscall_raw!(write(
      self.fd,
      buf.as_ptr().cast::<libc::c_void>(),
      buf.len()
    ))
  }

  fn result(&mut self, ret: isize) -> *const () {
    let buf = self.buf.take().expect("write result extracted twice");
    let out: <Write as OperationExt>::Output = if ret < 0 {
      (Err(Error::from_raw_os_error(-ret as i32)), buf)
    } else {
      (Ok(ret as usize), buf)
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
