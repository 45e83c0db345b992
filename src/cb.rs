//! The explicit-callback concurrency style.
//!
//! Each function records one operation with the reactor and returns; the
//! outcome arrives through the callback on a later
//! [`poll`](crate::Context::poll). The `user` value is strongly typed
//! end to end: whatever the submit site moves in, the callback gets
//! back, with the erasure and recovery handled by the dispatcher thunk.
//!
//! Submission failures (out of store slots, backend refusal) invoke the
//! callback synchronously from the submit call with the error.
//!
//! ```no_run
//! use rio::{cb, Context, SockOpt, TcpSocket};
//!
//! let ctx = Context::new().unwrap();
//! let (listener, _addr) =
//!   TcpSocket::open_and_listen_on("0.0.0.0", 8000, SockOpt::default())
//!     .unwrap();
//!
//! cb::accept(&ctx, &listener, |_ctx, res, ()| {
//!   let conn = res.unwrap();
//!   println!("new connection from {}", conn.address);
//! }, ());
//!
//! loop {
//!   ctx.poll().unwrap();
//! }
//! ```

use std::any::Any;
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::IntoHandle;
use crate::net::{AcceptResult, Address, TcpSocket};
use crate::op::{ops, OperationExt};
use crate::record::{Dispatcher, OpRecord};

fn submit<O, F>(ctx: &Context, op: O, f: F)
where
  O: OperationExt,
  F: FnOnce(&Context, O::Output) + 'static,
{
  let dispatcher = Dispatcher::new::<O, F>(f);
  if let Err((err, record)) = ctx.submit_op(Box::new(op), dispatcher) {
    fail(ctx, err, record);
  }
}

fn fail(ctx: &Context, err: Error, mut record: OpRecord) {
  let ret = -(err.to_errno() as isize);
  let dispatcher =
    record.dispatcher.take().expect("fresh record has a dispatcher");
  dispatcher.dispatch(ctx, record.op.as_mut(), ret);
}

/// Accepts one connection on `listener`.
///
/// The listener is not re-armed implicitly: to keep accepting, the
/// callback re-submits.
pub fn accept<U, F>(ctx: &Context, listener: &impl AsRawFd, cb: F, user: U)
where
  U: 'static,
  F: FnOnce(&Context, Result<AcceptResult>, U) + 'static,
{
  let op = ops::Accept::new(listener.as_raw_fd());
  submit(ctx, op, move |ctx, res| cb(ctx, res, user));
}

/// Reads into `buf`. The callback receives the byte count (`Ok(0)` is
/// peer close / EOF; short reads are possible) and the buffer back.
pub fn read<U, F>(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
  cb: F,
  user: U,
) where
  U: 'static,
  F: FnOnce(&Context, Result<usize>, Vec<u8>, U) + 'static,
{
  let op = ops::Read::new(h.as_raw_fd(), buf);
  submit(ctx, op, move |ctx, (res, buf)| cb(ctx, res, buf, user));
}

/// Writes from `buf`. Short writes are possible; the buffer comes back
/// through the callback.
pub fn write<U, F>(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
  cb: F,
  user: U,
) where
  U: 'static,
  F: FnOnce(&Context, Result<usize>, Vec<u8>, U) + 'static,
{
  let op = ops::Write::new(h.as_raw_fd(), buf);
  submit(ctx, op, move |ctx, (res, buf)| cb(ctx, res, buf, user));
}

/// Connects `sock` to `addr`.
pub fn connect<U, F>(
  ctx: &Context,
  sock: &TcpSocket,
  addr: &Address,
  cb: F,
  user: U,
) where
  U: 'static,
  F: FnOnce(&Context, Result<()>, U) + 'static,
{
  match ops::Connect::new(sock.as_raw_fd(), addr) {
    Ok(op) => submit(ctx, op, move |ctx, res| cb(ctx, res, user)),
    Err(err) => cb(ctx, Err(err), user),
  }
}

/// Fires `cb` once `duration` has elapsed, through the reactor's timer
/// structure.
pub fn timer<U, F>(ctx: &Context, duration: Duration, cb: F, user: U)
where
  U: 'static,
  F: FnOnce(&Context, Result<()>, U) + 'static,
{
  let op = ops::Timer::new(duration);
  let duration = op.duration();
  let dispatcher =
    Dispatcher::new::<ops::Timer, _>(move |ctx, res| cb(ctx, res, user));
  if let Err((err, record)) =
    ctx.submit_timer(duration, Box::new(op), dispatcher)
  {
    fail(ctx, err, record);
  }
}

/// Cancels everything in flight on the descriptor and closes it. See
/// [`Context::kill`].
pub fn kill(ctx: &Context, h: impl IntoHandle) {
  ctx.kill(h);
}

/// Queues `state` for destruction at the end of the tick. See
/// [`Context::defer_delete`].
pub fn defer_delete(ctx: &Context, state: Rc<dyn Any>) {
  ctx.defer_delete(state);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::EngineKind;
  use crate::error::ErrorKind;
  use std::cell::Cell;

  #[test]
  fn submission_failure_is_synchronous() {
    let ctx =
      Context::with_engine_and_capacity(EngineKind::Readiness, 1).unwrap();

    // Occupy the only slot.
    timer(&ctx, Duration::from_secs(60), |_ctx, _res, ()| {}, ());

    let failed = Rc::new(Cell::new(false));
    let seen = failed.clone();
    timer(
      &ctx,
      Duration::from_millis(1),
      move |_ctx, res, ()| {
        assert_eq!(res.unwrap_err().kind(), ErrorKind::ResourceExhausted);
        seen.set(true);
      },
      (),
    );
    assert!(failed.get(), "failure callback must run from the submit call");
  }
}
