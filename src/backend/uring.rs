//! The completion engine, on io_uring.
//!
//! Submissions become SQEs tagged with the store token as `user_data`;
//! completions come back as CQEs carrying the same token and the raw
//! syscall result. The kernel processes SQEs in submission order, which
//! is what gives consecutive operations on one descriptor their FIFO
//! dispatch.

use std::os::fd::RawFd;
use std::time::Duration;

use io_uring::types::{SubmitArgs, Timespec};
use io_uring::{opcode, IoUring};
use log::{debug, trace};

use crate::backend::{Completion, Engine, EngineKind, INTERNAL_TOKEN};
use crate::error::{Error, ErrorKind, Result};
use crate::op::Operation;
use crate::store::OpStore;

pub(crate) struct Uring {
  ring: IoUring,
}

impl Uring {
  pub fn new(cap: usize) -> Result<Uring> {
    let entries = (cap.max(2) as u32).next_power_of_two();
    let ring = IoUring::new(entries)
      .map_err(|e| Error::from(e).context("io_uring setup"))?;
    debug!("completion engine up, {} entries", entries);
    Ok(Uring { ring })
  }

  fn push(&mut self, entry: io_uring::squeue::Entry) -> Result<()> {
    // SAFETY: every entry is built by an Operation whose buffers live in
    // the reactor store until the completion is drained, or is an
    // engine-internal cancel with no referenced memory.
    if unsafe { self.ring.submission().push(&entry) }.is_ok() {
      return Ok(());
    }
    // Queue full: hand what we have to the kernel and retry once.
    self.submit_once()?;
    // SAFETY: as above.
    unsafe { self.ring.submission().push(&entry) }.map_err(|_| {
      Error::new(ErrorKind::ResourceExhausted, "submission queue full")
    })
  }

  fn submit_once(&mut self) -> Result<usize> {
    loop {
      match self.ring.submit() {
        Ok(n) => return Ok(n),
        Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
        // The kernel will pick the entries up once completions drain.
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => return Ok(0),
        Err(e) => return Err(Error::from(e).context("io_uring submit")),
      }
    }
  }

  fn collect(&mut self, out: &mut Vec<Completion>) {
    for cqe in self.ring.completion() {
      let token = cqe.user_data();
      if token == INTERNAL_TOKEN {
        trace!("internal completion, result {}", cqe.result());
        continue;
      }
      out.push(Completion { token, result: cqe.result() as isize });
    }
  }
}

impl Engine for Uring {
  fn kind(&self) -> EngineKind {
    EngineKind::Completion
  }

  fn submit(&mut self, token: u64, op: &mut dyn Operation) -> Result<()> {
    let entry = op.uring_entry().user_data(token);
    trace!("submit {:?} token {}", op.kind(), token);
    self.push(entry)
  }

  fn cancel(&mut self, token: u64, _fd: RawFd) {
    let entry =
      opcode::AsyncCancel::new(token).build().user_data(INTERNAL_TOKEN);
    if self.push(entry).is_err() {
      // Best effort only; the operation will complete on its own.
      debug!("could not queue cancel for token {}", token);
    }
  }

  fn flush(&mut self) -> Result<()> {
    self.submit_once().map(|_| ())
  }

  fn drain(
    &mut self,
    _store: &mut OpStore,
    timeout: Option<Duration>,
    out: &mut Vec<Completion>,
  ) -> Result<()> {
    match timeout {
      Some(d) if d.is_zero() => {
        self.submit_once()?;
      }
      Some(d) => {
        let ts = Timespec::new().sec(d.as_secs()).nsec(d.subsec_nanos());
        let args = SubmitArgs::new().timespec(&ts);
        match self.ring.submitter().submit_with_args(1, &args) {
          Ok(_) => {}
          Err(e)
            if matches!(
              e.raw_os_error(),
              Some(libc::ETIME) | Some(libc::EINTR) | Some(libc::EBUSY)
            ) => {}
          Err(e) => return Err(Error::from(e).context("io_uring wait")),
        }
      }
      None => loop {
        match self.ring.submit_and_wait(1) {
          Ok(_) => break,
          Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
          Err(e) if e.raw_os_error() == Some(libc::EBUSY) => break,
          Err(e) => return Err(Error::from(e).context("io_uring wait")),
        }
      },
    }

    self.collect(out);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::op::ops::Nop;

  #[test]
  fn nop_completes_with_zero() {
    // io_uring may be unavailable in sandboxes.
    let Ok(mut engine) = Uring::new(8) else { return };
    let mut store = OpStore::with_capacity(8);
    let mut op = Nop;

    engine.submit(41, &mut op).unwrap();
    engine.flush().unwrap();

    let mut out = Vec::new();
    engine.drain(&mut store, None, &mut out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].token, 41);
    assert_eq!(out[0].result, 0);
  }
}
