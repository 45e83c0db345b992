//! The reactor: a single-threaded event loop over one backend engine.
//!
//! A [`Context`] owns the engine, the in-flight operation store, the
//! pending-timers structure and the deferred-deletion queue. It is a
//! cheap handle (`Clone` shares the same reactor) but not `Send`: the
//! reactor belongs to the thread that built it.
//!
//! # Dispatch ordering
//!
//! One call to [`poll`](Context::poll) is one tick:
//!
//! 1. queued submissions are flushed and ready completions dispatched in
//!    the order the backend reports them;
//! 2. expired timers fire in non-decreasing deadline order;
//! 3. woken tasks are polled;
//! 4. the deferred-deletion queue is drained, exactly once.
//!
//! User code is never re-entered mid-dispatch, and an operation
//! submitted from a callback is eligible no earlier than the next tick.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::backend::{epoll, uring, Engine, EngineKind};
use crate::error::{Error, ErrorKind, Result};
use crate::handle::IntoHandle;
use crate::op::{ops, Operation};
use crate::record::{Dispatcher, OpRecord};
use crate::store::OpStore;
use crate::task::Task;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(PartialEq, Eq)]
struct TimerEntry {
  deadline: Instant,
  token: u64,
}

impl Ord for TimerEntry {
  fn cmp(&self, other: &TimerEntry) -> std::cmp::Ordering {
    (self.deadline, self.token).cmp(&(other.deadline, other.token))
  }
}

impl PartialOrd for TimerEntry {
  fn partial_cmp(&self, other: &TimerEntry) -> Option<std::cmp::Ordering> {
    Some(self.cmp(other))
  }
}

struct Reactor {
  engine: Box<dyn Engine>,
  store: OpStore,
  timers: BinaryHeap<Reverse<TimerEntry>>,
  live_timers: usize,
  /// Deferred deletions for this tick, deduplicated by data pointer.
  doomed: Vec<Rc<dyn Any>>,
  doomed_set: HashSet<*const ()>,
  tasks: Vec<Task>,
  stop: bool,
  tick: u64,
}

impl Reactor {
  /// Picks how long the engine may block this tick. Never blocks past
  /// the next timer deadline or while a task wants polling.
  fn effective_timeout(&self, wait: Option<Duration>) -> Option<Duration> {
    if matches!(wait, Some(d) if d.is_zero()) {
      return Some(Duration::ZERO);
    }
    if self.tasks.iter().any(Task::is_woken) {
      return Some(Duration::ZERO);
    }
    let until_timer = self
      .timers
      .peek()
      .map(|Reverse(e)| e.deadline.saturating_duration_since(Instant::now()));
    let engine_ops = self.store.len() - self.live_timers;
    match (wait, until_timer) {
      (Some(d), Some(t)) => Some(d.min(t)),
      (Some(d), None) => Some(d),
      (None, Some(t)) => Some(t),
      // Nothing in the kernel and no deadline; blocking would hang.
      (None, None) if engine_ops == 0 => Some(Duration::ZERO),
      (None, None) => None,
    }
  }
}

/// Handle to a single-threaded reactor. See the module docs.
pub struct Context {
  inner: Rc<RefCell<Reactor>>,
}

impl Clone for Context {
  fn clone(&self) -> Context {
    Context { inner: Rc::clone(&self.inner) }
  }
}

impl Context {
  /// Builds a reactor on the default backend: the completion engine,
  /// falling back to the readiness engine where io_uring is unavailable.
  pub fn new() -> Result<Context> {
    Context::with_engine(EngineKind::Completion)
      .or_else(|_| Context::with_engine(EngineKind::Readiness))
  }

  pub fn with_engine(kind: EngineKind) -> Result<Context> {
    Context::with_engine_and_capacity(kind, DEFAULT_CAPACITY)
  }

  /// `cap` bounds the number of concurrent in-flight operations.
  pub fn with_engine_and_capacity(
    kind: EngineKind,
    cap: usize,
  ) -> Result<Context> {
    let engine: Box<dyn Engine> = match kind {
      EngineKind::Completion => Box::new(uring::Uring::new(cap)?),
      EngineKind::Readiness => Box::new(epoll::Readiness::new(cap)?),
    };
    Ok(Context {
      inner: Rc::new(RefCell::new(Reactor {
        engine,
        store: OpStore::with_capacity(cap),
        timers: BinaryHeap::new(),
        live_timers: 0,
        doomed: Vec::new(),
        doomed_set: HashSet::new(),
        tasks: Vec::new(),
        stop: false,
        tick: 0,
      })),
    })
  }

  pub fn engine_kind(&self) -> EngineKind {
    self.inner.borrow().engine.kind()
  }

  /// Number of in-flight operations (timers included).
  pub fn in_flight(&self) -> usize {
    self.inner.borrow().store.len()
  }

  /// Runs one reactor tick without blocking. Returns the number of
  /// completions (timers included) dispatched.
  pub fn poll(&self) -> Result<usize> {
    self.tick(Some(Duration::ZERO))
  }

  /// Loops ticks, blocking between them, until [`stop`](Context::stop)
  /// is requested or no operations, timers or tasks remain.
  pub fn run(&self) -> Result<()> {
    loop {
      {
        let r = self.inner.borrow();
        if r.stop {
          break;
        }
        if r.store.is_empty() && r.tasks.is_empty() {
          break;
        }
        let engine_ops = r.store.len() - r.live_timers;
        if engine_ops == 0
          && r.live_timers == 0
          && !r.tasks.iter().any(Task::is_woken)
        {
          // Only parked tasks remain and nothing can ever wake them.
          debug!("run: abandoning {} stuck tasks", r.tasks.len());
          break;
        }
      }
      self.tick(None)?;
    }
    Ok(())
  }

  /// Requests [`run`](Context::run) to return after the current tick.
  pub fn stop(&self) {
    self.inner.borrow_mut().stop = true;
  }

  fn tick(&self, wait: Option<Duration>) -> Result<usize> {
    // Phase 1: completions. The records leave the store before any user
    // code runs, so callbacks are free to submit, kill or defer.
    let batch: Vec<(OpRecord, isize)> = {
      let mut r = self.inner.borrow_mut();
      r.tick = r.tick.wrapping_add(1);
      let timeout = r.effective_timeout(wait);
      let r = &mut *r;
      r.engine.flush()?;
      let mut completions = Vec::new();
      r.engine.drain(&mut r.store, timeout, &mut completions)?;
      completions
        .into_iter()
        .filter_map(|c| r.store.remove(c.token).map(|rec| (rec, c.result)))
        .collect()
    };

    let mut dispatched = batch.len();
    for (mut record, ret) in batch {
      // A cancelled record reports operation_cancelled whatever errno
      // the kernel chose.
      let ret = if record.cancelled && ret < 0 {
        -(libc::ECANCELED as isize)
      } else {
        ret
      };
      trace!("dispatch {:?} ret {}", record.kind, ret);
      let dispatcher =
        record.dispatcher.take().expect("record dispatched twice");
      dispatcher.dispatch(self, record.op.as_mut(), ret);
    }

    // Phase 2: expired timers, in deadline order.
    loop {
      let due = {
        let mut r = self.inner.borrow_mut();
        let now = Instant::now();
        let expired =
          matches!(r.timers.peek(), Some(Reverse(e)) if e.deadline <= now);
        if !expired {
          None
        } else {
          let Reverse(entry) = r.timers.pop().expect("peeked entry");
          match r.store.remove(entry.token) {
            Some(record) => {
              r.live_timers -= 1;
              Some(record)
            }
            // Stale heap entry; keep scanning this tick.
            None => continue,
          }
        }
      };
      let Some(mut record) = due else { break };
      debug_assert!(record.deadline.is_some(), "timer record without deadline");
      let dispatcher =
        record.dispatcher.take().expect("record dispatched twice");
      dispatcher.dispatch(self, record.op.as_mut(), 0);
      dispatched += 1;
    }

    // Phase 3: woken tasks.
    let due_tasks: Vec<Task> = {
      let mut r = self.inner.borrow_mut();
      let mut due = Vec::new();
      let mut i = 0;
      while i < r.tasks.len() {
        if r.tasks[i].is_woken() {
          due.push(r.tasks.swap_remove(i));
        } else {
          i += 1;
        }
      }
      due
    };
    for mut task in due_tasks {
      if !task.poll_once() {
        self.inner.borrow_mut().tasks.push(task);
      }
    }

    // Phase 4: deferred deletions, after all dispatch of this tick.
    let doomed = {
      let mut r = self.inner.borrow_mut();
      r.doomed_set.clear();
      std::mem::take(&mut r.doomed)
    };
    if !doomed.is_empty() {
      trace!("dropping {} deferred states", doomed.len());
    }
    drop(doomed);

    Ok(dispatched)
  }

  /// Queues a type-erased state for destruction at the end of the
  /// current tick. Enqueueing the same allocation more than once within
  /// a tick destroys it once; whether destruction actually frees the
  /// value follows `Rc` ownership (a clone held by an in-flight
  /// operation postpones it).
  pub fn defer_delete(&self, state: Rc<dyn Any>) {
    let mut r = self.inner.borrow_mut();
    let ptr = Rc::as_ptr(&state) as *const ();
    if r.doomed_set.insert(ptr) {
      r.doomed.push(state);
    }
    // A duplicate enqueue just drops the extra clone; the queue already
    // holds the allocation.
  }

  /// Cancels every in-flight operation on the handle's descriptor and
  /// closes it. Pending operations complete with `operation_cancelled`
  /// within the next ticks.
  pub fn kill(&self, h: impl IntoHandle) {
    let handle = h.into_handle();
    let fd = handle.as_raw();
    if !handle.is_valid() {
      return;
    }

    {
      let mut r = self.inner.borrow_mut();
      let r = &mut *r;
      for token in r.store.tokens_for_fd(fd) {
        if let Some(record) = r.store.get_mut(token) {
          record.cancelled = true;
        }
        r.engine.cancel(token, fd);
      }
    }

    // The close travels the normal submission path so it lands after
    // the cancellations.
    let raw = handle.into_raw();
    debug!("kill fd {}", raw);
    let op = Box::new(ops::Close::new(raw));
    let dispatcher = Dispatcher::new::<ops::Close, _>(move |_ctx, res| {
      if let Err(e) = res {
        debug!("close of fd {} failed: {}", raw, e);
      }
    });
    if let Err((err, _record)) = self.submit_op(op, dispatcher) {
      debug!("close submission failed ({}), closing inline", err);
      let _ = syscall!(close(raw));
    }
  }

  /// Records and submits one operation. On failure the record comes
  /// back so the caller can fail its dispatcher synchronously.
  pub(crate) fn submit_op(
    &self,
    op: Box<dyn Operation>,
    dispatcher: Dispatcher,
  ) -> std::result::Result<u64, (Error, OpRecord)> {
    let mut r = self.inner.borrow_mut();
    let record = OpRecord::new(op, dispatcher);
    let token = match r.store.insert(record) {
      Ok(token) => token,
      Err(record) => {
        return Err((
          Error::new(ErrorKind::ResourceExhausted, "operation store full"),
          record,
        ))
      }
    };

    let r = &mut *r;
    let record = r.store.get_mut(token).expect("just inserted");
    match r.engine.submit(token, record.op.as_mut()) {
      Ok(()) => Ok(token),
      Err(err) => {
        let record = r.store.remove(token).expect("just inserted");
        Err((err, record))
      }
    }
  }

  /// Records a timer operation; it fires through the pending-timers
  /// structure rather than the engine.
  pub(crate) fn submit_timer(
    &self,
    duration: Duration,
    op: Box<dyn Operation>,
    dispatcher: Dispatcher,
  ) -> std::result::Result<u64, (Error, OpRecord)> {
    let mut r = self.inner.borrow_mut();
    let mut record = OpRecord::new(op, dispatcher);
    let deadline = Instant::now() + duration;
    record.deadline = Some(deadline);
    match r.store.insert(record) {
      Ok(token) => {
        r.timers.push(Reverse(TimerEntry { deadline, token }));
        r.live_timers += 1;
        Ok(token)
      }
      Err(record) => Err((
        Error::new(ErrorKind::ResourceExhausted, "operation store full"),
        record,
      )),
    }
  }

  pub(crate) fn push_task(&self, task: Task) {
    self.inner.borrow_mut().tasks.push(task);
  }
}

impl std::fmt::Debug for Context {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let r = self.inner.borrow();
    f.debug_struct("Context")
      .field("engine", &r.engine.kind())
      .field("in_flight", &r.store.len())
      .field("tick", &r.tick)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::Cell;

  fn contexts() -> Vec<Context> {
    let mut ctxs = Vec::new();
    if let Ok(ctx) = Context::with_engine(EngineKind::Completion) {
      ctxs.push(ctx);
    }
    ctxs.push(Context::with_engine(EngineKind::Readiness).unwrap());
    ctxs
  }

  #[test]
  fn timer_fires_in_deadline_order() {
    for ctx in contexts() {
      let order = Rc::new(RefCell::new(Vec::new()));

      for (label, ms) in [("late", 20u64), ("early", 5)] {
        let order = order.clone();
        let op = Box::new(ops::Timer::new(Duration::from_millis(ms)));
        let d = Dispatcher::new::<ops::Timer, _>(move |_ctx, res| {
          res.unwrap();
          order.borrow_mut().push(label);
        });
        ctx.submit_timer(Duration::from_millis(ms), op, d).unwrap();
      }

      ctx.run().unwrap();
      assert_eq!(*order.borrow(), vec!["early", "late"]);
    }
  }

  #[test]
  fn defer_delete_dedups_within_a_tick() {
    for ctx in contexts() {
      struct Probe(Rc<Cell<u32>>);
      impl Drop for Probe {
        fn drop(&mut self) {
          self.0.set(self.0.get() + 1);
        }
      }

      let drops = Rc::new(Cell::new(0));
      let state = Rc::new(Probe(drops.clone()));
      ctx.defer_delete(state.clone());
      ctx.defer_delete(state.clone());
      ctx.defer_delete(state);

      assert_eq!(drops.get(), 0);
      ctx.poll().unwrap();
      assert_eq!(drops.get(), 1);
    }
  }

  #[test]
  fn deletion_waits_for_other_holders() {
    for ctx in contexts() {
      struct Probe(Rc<Cell<u32>>);
      impl Drop for Probe {
        fn drop(&mut self) {
          self.0.set(self.0.get() + 1);
        }
      }

      let drops = Rc::new(Cell::new(0));
      let state = Rc::new(Probe(drops.clone()));
      let keeper = state.clone();

      ctx.defer_delete(state);
      ctx.poll().unwrap();
      // The queue released its hold, but `keeper` still owns the state.
      assert_eq!(drops.get(), 0);
      drop(keeper);
      assert_eq!(drops.get(), 1);
    }
  }

  #[test]
  fn run_returns_when_nothing_is_pending() {
    for ctx in contexts() {
      ctx.run().unwrap();
    }
  }

  #[test]
  fn stop_breaks_run() {
    for ctx in contexts() {
      let op = Box::new(ops::Timer::new(Duration::from_secs(60)));
      let d = Dispatcher::new::<ops::Timer, _>(|_ctx, _res| {});
      ctx.submit_timer(Duration::from_secs(60), op, d).unwrap();

      let stopper = ctx.clone();
      let op = Box::new(ops::Timer::new(Duration::from_millis(5)));
      let d = Dispatcher::new::<ops::Timer, _>(move |_ctx, _res| {
        stopper.stop();
      });
      ctx.submit_timer(Duration::from_millis(5), op, d).unwrap();

      ctx.run().unwrap();
      assert_eq!(ctx.in_flight(), 1);
    }
  }
}
