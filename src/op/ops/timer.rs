use std::time::Duration;

use io_uring::squeue;

use crate::error::{Error, Result};
use crate::op::{OpKind, OpMeta, Operation, OperationExt};

/// A pure reactor timer. Never reaches a backend: the reactor tracks the
/// deadline in its pending-timers structure and completes the record
/// when it expires.
pub(crate) struct Timer {
  duration: Duration,
}

impl Timer {
  pub fn new(duration: Duration) -> Timer {
    Timer { duration }
  }

  pub fn duration(&self) -> Duration {
    self.duration
  }
}

impl OperationExt for Timer {
  type Output = Result<()>;
}

impl Operation for Timer {
  fn kind(&self) -> OpKind {
    OpKind::Timer
  }

  fn meta(&self) -> OpMeta {
    OpMeta::CAP_NONE
  }

  fn uring_entry(&mut self) -> squeue::Entry {
    unreachable!("timers are fired by the reactor, not the backend")
  }

  fn run_nonblocking(&mut self) -> isize {
    0
  }

  fn result(&mut self, ret: isize) -> *const () {
    let out: <Timer as OperationExt>::Output = if ret < 0 {
      Err(Error::from_raw_os_error(-ret as i32))
    } else {
      Ok(())
    };
    Box::into_raw(Box::new(out)) as *const ()
  }
}
