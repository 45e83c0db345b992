use std::os::fd::RawFd;

use io_uring::{opcode, squeue, types::Fd};

use crate::error::{Error, Result};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Close a descriptor the reactor was handed ownership of (`kill`).
pub(crate) struct Close {
  fd: RawFd,
}

impl Close {
  pub fn new(fd: RawFd) -> Close {
    Close { fd }
  }
}

impl OperationExt for Close {
  type Output = Result<()>;
}

impl Operation for Close {
  fn kind(&self) -> OpKind {
    OpKind::Close
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_NONE
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    opcode::Close::new(Fd(self.fd)).build()
  }

  fn run_nonblocking(&mut self) -> isize {
    syscall_raw!(close(self.fd))
  }

  fn result(&mut self, ret: isize) -> *const () {
    let out: <Close as OperationExt>::Output = if ret < 0 {
      Err(Error::from_raw_os_error(-ret as i32).context("close"))
    } else {
      Ok(())
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
