//! Adapters wrapping callback-surface operations as polled futures.
//!
//! Each adapter allocates a [`State`](crate::promise::State) rendezvous
//! behind `Rc`, submits the operation with a completion thunk that
//! resolves it, and returns an [`OpFut`] whose poll consults the state.
//! The thunk's clone keeps the rendezvous alive if the future is
//! dropped mid-flight, so a late completion writes into valid memory
//! and the state is freed when the reactor releases its side.

use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::cb;
use crate::context::Context;
use crate::fut::{Fut, FuturePoll};
use crate::net::{AcceptResult, TcpSocket};
use crate::promise::State;

/// A future over one submitted operation.
pub struct OpFut<T> {
  state: Rc<State<T>>,
}

impl<T> Fut for OpFut<T> {
  type Output = T;

  fn poll(&mut self) -> FuturePoll<T> {
    self.state.poll()
  }
}

/// One accept submission as a future.
pub fn accept(ctx: &Context, listener: &TcpSocket) -> OpFut<AcceptResult> {
  let state = Rc::new(State::new());
  let resolver = state.clone();
  cb::accept(
    ctx,
    listener,
    move |_ctx, res, ()| match res {
      Ok(conn) => resolver.resolve(conn),
      Err(e) => resolver.reject(e),
    },
    (),
  );
  OpFut { state }
}

/// One read submission as a future yielding the byte count and the
/// buffer back (`0` is peer close / EOF).
pub fn read(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
) -> OpFut<(usize, Vec<u8>)> {
  let state = Rc::new(State::new());
  let resolver = state.clone();
  cb::read(
    ctx,
    h,
    buf,
    move |_ctx, res, buf, ()| match res {
      Ok(n) => resolver.resolve((n, buf)),
      Err(e) => resolver.reject(e),
    },
    (),
  );
  OpFut { state }
}

/// One write submission as a future yielding the bytes written and the
/// buffer back.
pub fn write(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
) -> OpFut<(usize, Vec<u8>)> {
  let state = Rc::new(State::new());
  let resolver = state.clone();
  cb::write(
    ctx,
    h,
    buf,
    move |_ctx, res, buf, ()| match res {
      Ok(n) => resolver.resolve((n, buf)),
      Err(e) => resolver.reject(e),
    },
    (),
  );
  OpFut { state }
}

/// A reactor timer as a future.
pub fn timer(ctx: &Context, duration: Duration) -> OpFut<()> {
  let state = Rc::new(State::new());
  let resolver = state.clone();
  cb::timer(
    ctx,
    duration,
    move |_ctx, res, ()| match res {
      Ok(()) => resolver.resolve(()),
      Err(e) => resolver.reject(e),
    },
    (),
  );
  OpFut { state }
}
