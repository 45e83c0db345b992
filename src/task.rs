//! Resumable tasks: `async` blocks driven by the reactor.
//!
//! [`spawn`] hands a `std::future::Future` to the context. The task is
//! polled once per tick whenever its waker fired; awaiting one of the
//! operation futures below parks the task until the operation's
//! completion resolves the rendezvous and wakes it.
//!
//! ```no_run
//! use rio::{task, Context, SockOpt, TcpSocket};
//!
//! let ctx = Context::new().unwrap();
//! let (listener, _addr) =
//!   TcpSocket::open_and_listen_on("0.0.0.0", 8000, SockOpt::default())
//!     .unwrap();
//!
//! let inner = ctx.clone();
//! task::spawn(&ctx, async move {
//!   loop {
//!     let conn = task::accept(&inner, &listener).await.unwrap();
//!     let (n, buf) =
//!       task::read(&inner, &conn.client, vec![0u8; 1024]).await.unwrap();
//!     task::write(&inner, &conn.client, buf[..n].to_vec()).await.unwrap();
//!   }
//! });
//!
//! ctx.run().unwrap();
//! ```

use std::os::fd::AsRawFd;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Poll, Wake, Waker};
use std::time::Duration;

use crate::cb;
use crate::context::Context;
use crate::error::Result;
use crate::fut::FuturePoll;
use crate::net::{AcceptResult, TcpSocket};
use crate::promise::State;

struct TaskFlag {
  woken: AtomicBool,
}

impl Wake for TaskFlag {
  fn wake(self: Arc<Self>) {
    self.woken.store(true, Ordering::Release);
  }

  fn wake_by_ref(self: &Arc<Self>) {
    self.woken.store(true, Ordering::Release);
  }
}

/// A spawned computation: its frame plus the wake flag the reactor
/// checks each tick.
pub(crate) struct Task {
  future: Pin<Box<dyn std::future::Future<Output = ()>>>,
  flag: Arc<TaskFlag>,
  waker: Waker,
}

impl Task {
  fn new(future: impl std::future::Future<Output = ()> + 'static) -> Task {
    // Born woken: the initial resumption happens on the next tick.
    let flag = Arc::new(TaskFlag { woken: AtomicBool::new(true) });
    let waker = Waker::from(flag.clone());
    Task { future: Box::pin(future), flag, waker }
  }

  pub(crate) fn is_woken(&self) -> bool {
    self.flag.woken.load(Ordering::Acquire)
  }

  /// Polls the task once; `true` means it finished.
  pub(crate) fn poll_once(&mut self) -> bool {
    self.flag.woken.store(false, Ordering::Release);
    let mut cx = std::task::Context::from_waker(&self.waker);
    self.future.as_mut().poll(&mut cx).is_ready()
  }
}

/// Enqueues `future` on the context; the first resumption happens on
/// the next tick.
pub fn spawn(
  ctx: &Context,
  future: impl std::future::Future<Output = ()> + 'static,
) {
  ctx.push_task(Task::new(future));
}

/// `std::future::Future` over one submitted operation's rendezvous.
pub struct OpFuture<T> {
  state: Rc<State<T>>,
}

impl<T> std::future::Future for OpFuture<T> {
  type Output = Result<T>;

  fn poll(
    self: Pin<&mut Self>,
    cx: &mut std::task::Context<'_>,
  ) -> Poll<Result<T>> {
    match self.state.poll_with_waker(cx.waker()) {
      FuturePoll::Ready(value) => Poll::Ready(Ok(value)),
      FuturePoll::Error(e) => Poll::Ready(Err(e)),
      FuturePoll::Pending => Poll::Pending,
    }
  }
}

fn op_future<T, S>(submit: S) -> OpFuture<T>
where
  S: FnOnce(Rc<State<T>>),
{
  let state = Rc::new(State::new());
  submit(state.clone());
  OpFuture { state }
}

/// Awaits any promise [`State`]: the holder of the matching
/// [`Promise`](crate::Promise) resolves or rejects it from elsewhere in
/// the program, and the awaiting task resumes.
pub fn wait<T>(state: Rc<State<T>>) -> OpFuture<T> {
  OpFuture { state }
}

/// Awaitable accept.
pub fn accept(ctx: &Context, listener: &TcpSocket) -> OpFuture<AcceptResult> {
  op_future(|resolver| {
    cb::accept(
      ctx,
      listener,
      move |_ctx, res, ()| match res {
        Ok(conn) => resolver.resolve(conn),
        Err(e) => resolver.reject(e),
      },
      (),
    )
  })
}

/// Awaitable read; yields the byte count and the buffer back.
pub fn read(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
) -> OpFuture<(usize, Vec<u8>)> {
  op_future(|resolver| {
    cb::read(
      ctx,
      h,
      buf,
      move |_ctx, res, buf, ()| match res {
        Ok(n) => resolver.resolve((n, buf)),
        Err(e) => resolver.reject(e),
      },
      (),
    )
  })
}

/// Awaitable write; yields the bytes written and the buffer back.
pub fn write(
  ctx: &Context,
  h: &impl AsRawFd,
  buf: Vec<u8>,
) -> OpFuture<(usize, Vec<u8>)> {
  op_future(|resolver| {
    cb::write(
      ctx,
      h,
      buf,
      move |_ctx, res, buf, ()| match res {
        Ok(n) => resolver.resolve((n, buf)),
        Err(e) => resolver.reject(e),
      },
      (),
    )
  })
}

/// Awaitable reactor timer.
pub fn sleep(ctx: &Context, duration: Duration) -> OpFuture<()> {
  op_future(|resolver| {
    cb::timer(
      ctx,
      duration,
      move |_ctx, res, ()| match res {
        Ok(()) => resolver.resolve(()),
        Err(e) => resolver.reject(e),
      },
      (),
    )
  })
}
