//! The readiness engine, on epoll.
//!
//! Operations queue per descriptor and per direction; epoll interest is
//! the union of the non-empty queues. When a descriptor turns ready the
//! engine drains its queue front to back by issuing the non-blocking
//! syscall, translating `would_block` into staying armed. Descriptors
//! epoll refuses (regular files) run immediately — they never block
//! meaningfully.

use std::collections::{HashMap, VecDeque};
use std::os::fd::RawFd;
use std::time::Duration;

use log::{debug, trace};

use crate::backend::{Completion, Engine, EngineKind};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::op::Operation;
use crate::store::OpStore;

#[derive(Default)]
struct FdWaiters {
  read: VecDeque<u64>,
  write: VecDeque<u64>,
}

impl FdWaiters {
  fn interest_mask(&self) -> u32 {
    let mut events = 0u32;
    if !self.read.is_empty() {
      events |= libc::EPOLLIN as u32;
    }
    if !self.write.is_empty() {
      events |= libc::EPOLLOUT as u32;
    }
    events
  }

  fn is_idle(&self) -> bool {
    self.read.is_empty() && self.write.is_empty()
  }
}

pub(crate) struct Readiness {
  epoll: Handle,
  /// Waiting operations per descriptor. Map presence implies the fd is
  /// registered with epoll.
  fds: HashMap<RawFd, FdWaiters>,
  /// Completions produced outside of epoll_wait: immediate operations,
  /// cancellations, always-ready descriptors.
  ready: VecDeque<Completion>,
  events: Vec<libc::epoll_event>,
}

/// Retries a non-blocking operation through signal interruptions.
fn run_op(op: &mut dyn Operation) -> isize {
  loop {
    let ret = op.run_nonblocking();
    if ret != -(libc::EINTR as isize) {
      return ret;
    }
  }
}

impl Readiness {
  pub fn new(cap: usize) -> Result<Readiness> {
    let fd = syscall!(epoll_create1(libc::EPOLL_CLOEXEC))
      .map_err(|e| Error::from(e).context("epoll setup"))?;
    debug!("readiness engine up");
    // SAFETY: zeroed epoll_event is a valid buffer element for the
    // kernel to fill.
    let events = vec![unsafe { std::mem::zeroed() }; cap.clamp(8, 512)];
    Ok(Readiness {
      epoll: Handle::from_raw(fd),
      fds: HashMap::new(),
      ready: VecDeque::new(),
      events,
    })
  }

  fn epoll_ctl(&self, ctl: i32, fd: RawFd, mask: u32) -> Result<()> {
    let mut event = libc::epoll_event { events: mask, u64: fd as u64 };
    let event_ptr = if ctl == libc::EPOLL_CTL_DEL {
      std::ptr::null_mut()
    } else {
      &mut event as *mut libc::epoll_event
    };
    syscall!(epoll_ctl(self.epoll.as_raw(), ctl, fd, event_ptr))
      .map_err(Error::from)?;
    Ok(())
  }

  fn enqueue(&mut self, fd: RawFd, token: u64, readable: bool) -> Result<()> {
    let fresh = !self.fds.contains_key(&fd);
    let waiters = self.fds.entry(fd).or_default();
    if readable {
      waiters.read.push_back(token);
    } else {
      waiters.write.push_back(token);
    }
    let mask = waiters.interest_mask();

    let ctl = if fresh { libc::EPOLL_CTL_ADD } else { libc::EPOLL_CTL_MOD };
    if let Err(e) = self.epoll_ctl(ctl, fd, mask) {
      let waiters = self.fds.get_mut(&fd).expect("just inserted");
      if readable {
        waiters.read.pop_back();
      } else {
        waiters.write.pop_back();
      }
      if waiters.is_idle() {
        self.fds.remove(&fd);
      }
      return Err(e.context("epoll register"));
    }
    Ok(())
  }

  /// Re-syncs epoll interest with the queues after they changed.
  fn update_interest(&mut self, fd: RawFd) {
    let Some(waiters) = self.fds.get(&fd) else { return };
    if waiters.is_idle() {
      self.fds.remove(&fd);
      let _ = self.epoll_ctl(libc::EPOLL_CTL_DEL, fd, 0);
    } else {
      let mask = waiters.interest_mask();
      let _ = self.epoll_ctl(libc::EPOLL_CTL_MOD, fd, mask);
    }
  }

  fn drain_fd(
    &mut self,
    store: &mut OpStore,
    fd: RawFd,
    readable: bool,
    writable: bool,
    out: &mut Vec<Completion>,
  ) {
    {
      let Some(waiters) = self.fds.get_mut(&fd) else { return };
      for (due, queue) in [
        (readable, &mut waiters.read),
        (writable, &mut waiters.write),
      ] {
        if !due {
          continue;
        }
        while let Some(&token) = queue.front() {
          let Some(record) = store.get_mut(token) else {
            // Stale entry; drop it.
            queue.pop_front();
            continue;
          };
          let ret = run_op(record.op.as_mut());
          if ret == -(libc::EAGAIN as isize) {
            // Not actually ready for this operation; stay armed.
            break;
          }
          queue.pop_front();
          out.push(Completion { token, result: ret });
        }
      }
    }
    self.update_interest(fd);
  }
}

impl Engine for Readiness {
  fn kind(&self) -> EngineKind {
    EngineKind::Readiness
  }

  fn submit(&mut self, token: u64, op: &mut dyn Operation) -> Result<()> {
    let meta = op.meta();
    trace!("submit {:?} token {}", op.kind(), token);

    if !meta.is_cap_fd() {
      // Cannot block: run now, deliver on the next drain.
      let result = run_op(op);
      self.ready.push_back(Completion { token, result });
      return Ok(());
    }

    if meta.needs_run_at_submit() {
      let ret = run_op(op);
      if ret != -(libc::EINPROGRESS as isize) {
        self.ready.push_back(Completion { token, result: ret });
        return Ok(());
      }
      // Handshake started; completion arrives via write readiness.
    }

    let dir_read = meta.is_fd_readable();
    debug_assert!(
      dir_read != meta.is_fd_writable(),
      "fd operations wait on exactly one direction"
    );
    match self.enqueue(op.fd(), token, dir_read) {
      Ok(()) => Ok(()),
      Err(e) if e.raw_os_error() == Some(libc::EPERM) => {
        // epoll rejects regular files; they are always ready.
        trace!("fd {} not pollable, running inline", op.fd());
        let result = run_op(op);
        self.ready.push_back(Completion { token, result });
        Ok(())
      }
      Err(e) => Err(e),
    }
  }

  fn cancel(&mut self, token: u64, fd: RawFd) {
    if let Some(waiters) = self.fds.get_mut(&fd) {
      waiters.read.retain(|&t| t != token);
      waiters.write.retain(|&t| t != token);
      self.update_interest(fd);
    }
    self
      .ready
      .push_back(Completion { token, result: -(libc::ECANCELED as isize) });
  }

  fn flush(&mut self) -> Result<()> {
    // Registrations happen at submit time; nothing to push.
    Ok(())
  }

  fn drain(
    &mut self,
    store: &mut OpStore,
    timeout: Option<Duration>,
    out: &mut Vec<Completion>,
  ) -> Result<()> {
    out.extend(self.ready.drain(..));

    let timeout_ms = if !out.is_empty() {
      0
    } else {
      match timeout {
        None => -1,
        Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
      }
    };

    let mut events = std::mem::take(&mut self.events);
    let n = loop {
      match syscall!(epoll_wait(
        self.epoll.as_raw(),
        events.as_mut_ptr(),
        events.len() as i32,
        timeout_ms
      )) {
        Ok(n) => break n as usize,
        Err(e) if e.raw_os_error() == Some(libc::EINTR) => continue,
        Err(e) => {
          self.events = events;
          return Err(Error::from(e).context("epoll wait"));
        }
      }
    };

    for event in &events[..n] {
      let fd = event.u64 as RawFd;
      let mask = event.events;
      let err = mask & (libc::EPOLLERR as u32 | libc::EPOLLHUP as u32) != 0;
      let readable = err || mask & libc::EPOLLIN as u32 != 0;
      let writable = err || mask & libc::EPOLLOUT as u32 != 0;
      self.drain_fd(store, fd, readable, writable, out);
    }
    self.events = events;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::op::ops::{Nop, Read, Write};
  use crate::record::{Dispatcher, OpRecord};

  fn record_for(op: Box<dyn Operation>) -> OpRecord {
    OpRecord::new(op, Dispatcher::new::<Nop, _>(|_ctx, _out| {}))
  }

  fn submit_stored(
    engine: &mut Readiness,
    store: &mut OpStore,
    op: Box<dyn Operation>,
  ) -> u64 {
    let token = store.insert(record_for(op)).unwrap();
    let record = store.get_mut(token).unwrap();
    engine.submit(token, record.op.as_mut()).unwrap();
    token
  }

  fn nonblocking_pipe() -> (Handle, Handle) {
    let mut fds = [0; 2];
    syscall!(pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK)).unwrap();
    (Handle::from_raw(fds[0]), Handle::from_raw(fds[1]))
  }

  #[test]
  fn immediate_op_completes_on_next_drain() {
    let mut engine = Readiness::new(8).unwrap();
    let mut store = OpStore::with_capacity(8);
    let mut op = Nop;

    engine.submit(7, &mut op).unwrap();
    let mut out = Vec::new();
    engine.drain(&mut store, Some(Duration::ZERO), &mut out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].token, 7);
    assert_eq!(out[0].result, 0);
  }

  #[test]
  fn pipe_read_waits_for_data() {
    let mut engine = Readiness::new(8).unwrap();
    let mut store = OpStore::with_capacity(8);
    let (r, w) = nonblocking_pipe();

    let token = submit_stored(
      &mut engine,
      &mut store,
      Box::new(Read::new(r.as_raw(), vec![0u8; 16])),
    );

    let mut out = Vec::new();
    engine.drain(&mut store, Some(Duration::ZERO), &mut out).unwrap();
    assert!(out.is_empty());

    crate::io::write_all(&w, b"ping").unwrap();
    engine.drain(&mut store, Some(Duration::from_secs(5)), &mut out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].token, token);
    assert_eq!(out[0].result, 4);
  }

  #[test]
  fn cancel_produces_ecanceled_completion() {
    let mut engine = Readiness::new(8).unwrap();
    let mut store = OpStore::with_capacity(8);
    let (r, _w) = nonblocking_pipe();

    let token = submit_stored(
      &mut engine,
      &mut store,
      Box::new(Read::new(r.as_raw(), vec![0u8; 16])),
    );

    engine.cancel(token, r.as_raw());
    let mut out = Vec::new();
    engine.drain(&mut store, Some(Duration::ZERO), &mut out).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].result, -(libc::ECANCELED as isize));
  }

  #[test]
  fn same_fd_writes_complete_in_submission_order() {
    let mut engine = Readiness::new(8).unwrap();
    let mut store = OpStore::with_capacity(8);
    let (_r, w) = nonblocking_pipe();

    let mut tokens = Vec::new();
    for payload in [b"a".to_vec(), b"b".to_vec()] {
      tokens.push(submit_stored(
        &mut engine,
        &mut store,
        Box::new(Write::new(w.as_raw(), payload)),
      ));
    }

    let mut out = Vec::new();
    engine.drain(&mut store, Some(Duration::from_secs(5)), &mut out).unwrap();
    let order: Vec<u64> = out.iter().map(|c| c.token).collect();
    assert_eq!(order, tokens);
  }
}
