//! Per-submission bookkeeping: the operation record and the type-erased
//! dispatcher thunk.
//!
//! The submit shims in [`crate::cb`] are generic over the operation and
//! the user callback; storage in the reactor is not. [`Dispatcher`]
//! bridges the two: at submit time it packages a typed `FnOnce` behind a
//! raw pointer plus a monomorphised call thunk, and at dispatch time the
//! thunk recovers both the closure and the operation's typed output.

use std::time::Instant;

use crate::context::Context;
use crate::op::{OpKind, Operation, OperationExt};

/// Reactor-internal record for one in-flight submission.
pub(crate) struct OpRecord {
  pub kind: OpKind,
  /// Descriptor the operation targets, `-1` when none. Used by `kill`
  /// to find everything in flight on a socket.
  pub fd: i32,
  /// Deadline for timer operations; the reactor's pending-timers
  /// structure holds the matching token.
  pub deadline: Option<Instant>,
  /// Set by `kill`; a failed completion on a cancelled record is
  /// reported as `operation_cancelled` regardless of the raw errno.
  pub cancelled: bool,
  pub op: Box<dyn Operation>,
  /// Taken exactly once, at dispatch.
  pub dispatcher: Option<Dispatcher>,
}

impl std::fmt::Debug for OpRecord {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("OpRecord")
      .field("kind", &self.kind)
      .field("fd", &self.fd)
      .field("deadline", &self.deadline)
      .field("cancelled", &self.cancelled)
      .finish_non_exhaustive()
  }
}

impl OpRecord {
  pub fn new(op: Box<dyn Operation>, dispatcher: Dispatcher) -> OpRecord {
    let kind = op.kind();
    let fd = if op.meta().is_cap_fd() { op.fd() } else { -1 };
    OpRecord { kind, fd, deadline: None, cancelled: false, op, dispatcher: Some(dispatcher) }
  }
}

/// Type-erased completion continuation.
///
/// Holds the raw `Box` of the user's `FnOnce` plus two monomorphised
/// function pointers: one to call it with the typed output, one to free
/// it if the record is torn down without completing.
pub(crate) struct Dispatcher {
  data: *mut (),
  call: unsafe fn(*mut (), &Context, &mut dyn Operation, isize),
  drop_data: unsafe fn(*mut ()),
}

impl Dispatcher {
  pub fn new<O, F>(f: F) -> Dispatcher
  where
    O: OperationExt,
    F: FnOnce(&Context, O::Output) + 'static,
  {
    Dispatcher {
      data: Box::into_raw(Box::new(f)) as *mut (),
      call: call_thunk::<O, F>,
      drop_data: drop_thunk::<F>,
    }
  }

  /// Invokes the continuation with the operation's typed output for
  /// `ret`. Consumes the dispatcher; the closure runs exactly once.
  pub fn dispatch(self, ctx: &Context, op: &mut dyn Operation, ret: isize) {
    let data = self.data;
    let call = self.call;
    std::mem::forget(self);
    // SAFETY: `data` was produced by Box::into_raw in `new` for the same
    // `F` the thunk was monomorphised with, and `forget` above makes
    // this the only consumer.
    unsafe { call(data, ctx, op, ret) }
  }
}

impl Drop for Dispatcher {
  fn drop(&mut self) {
    // Reached only when a record is destroyed without dispatching
    // (context teardown). The closure is freed, never called.
    // SAFETY: same provenance argument as in `dispatch`.
    unsafe { (self.drop_data)(self.data) }
  }
}

unsafe fn call_thunk<O, F>(
  data: *mut (),
  ctx: &Context,
  op: &mut dyn Operation,
  ret: isize,
) where
  O: OperationExt,
  F: FnOnce(&Context, O::Output) + 'static,
{
  // SAFETY: caller (Dispatcher::dispatch) guarantees `data` is the
  // Box<F> created in Dispatcher::new.
  let f = unsafe { Box::from_raw(data as *mut F) };
  // SAFETY: `op` is the operation this dispatcher was registered with,
  // so Operation::result returns a Box::into_raw of O::Output.
  let out = unsafe { *Box::from_raw(op.result(ret) as *mut O::Output) };
  f(ctx, out)
}

unsafe fn drop_thunk<F>(data: *mut ()) {
  // SAFETY: caller guarantees `data` is the Box<F> from Dispatcher::new.
  drop(unsafe { Box::from_raw(data as *mut F) });
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::op::ops::Nop;
  use std::cell::Cell;
  use std::rc::Rc;

  #[test]
  fn dropped_dispatcher_frees_the_closure() {
    struct Probe(Rc<Cell<bool>>);
    impl Drop for Probe {
      fn drop(&mut self) {
        self.0.set(true);
      }
    }

    let dropped = Rc::new(Cell::new(false));
    let probe = Probe(dropped.clone());
    let d = Dispatcher::new::<Nop, _>(move |_ctx, _out| {
      let _keep = &probe;
      unreachable!("never dispatched");
    });
    drop(d);
    assert!(dropped.get());
  }
}
