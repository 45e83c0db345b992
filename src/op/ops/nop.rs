use io_uring::{opcode, squeue};

use crate::error::Result;
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// Does nothing; completes with `Ok(())` on the next tick. Useful for
/// tests and for scheduling "call me back next tick".
pub(crate) struct Nop;

impl OperationExt for Nop {
  type Output = Result<()>;
}

impl Operation for Nop {
  fn kind(&self) -> OpKind {
    OpKind::Nop
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_NONE
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    opcode::Nop::new().build()
  }

  fn run_nonblocking(&mut self) -> isize {
    0
  }

  fn result(&mut self, _ret: isize) -> *const () {
    let out: <Nop as OperationExt>::Output = Ok(());
    Box::into_raw(Box::new(out)) as *const ()
  }
}
