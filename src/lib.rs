#![deny(
  clippy::unnecessary_safety_comment,
  clippy::unsafe_removed_from_name,
  clippy::unnecessary_safety_doc,
  clippy::not_unsafe_ptr_arg_deref,
  clippy::undocumented_unsafe_blocks
)]

//! # rio — a single-threaded async I/O runtime for Linux
//!
//! rio is a reactor over two interchangeable backends — io_uring (the
//! completion engine, default) and epoll (the readiness engine) — with
//! three interoperable concurrency styles layered on top of it:
//!
//! - **Explicit callbacks** ([`cb`]): submit an operation with a typed
//!   callback and user state; the reactor dispatches the completion.
//! - **Polled futures** ([`fut`]): hand-rolled state machines with
//!   `then`, `timeout_with` and `loop_fn` combinators, plus adapters
//!   that wrap any callback-surface operation.
//! - **Resumable tasks** ([`task`]): ordinary `async` blocks awaiting
//!   the same operations, resumed by the reactor loop.
//!
//! All three ride a single [`Context`]: one thread, one event loop, no
//! work stealing. Blocking helpers live in [`io`] for code outside the
//! reactor.
//!
//! ### Example
//!
//! ```no_run
//! use rio::{cb, Context, SockOpt, TcpSocket};
//!
//! let ctx = Context::new().unwrap();
//! let (listener, addr) =
//!   TcpSocket::open_and_listen_on("0.0.0.0", 6969, SockOpt::default())
//!     .unwrap();
//! println!("listening on {}", addr);
//!
//! cb::accept(&ctx, &listener, |_ctx, res, ()| {
//!   match res {
//!     Ok(conn) => println!("client connected: {}", conn.address),
//!     Err(e) => eprintln!("accept failed: {}", e),
//!   }
//! }, ());
//!
//! loop {
//!   ctx.poll().unwrap();
//! }
//! ```
//!
//! Descriptors are owned: [`Handle`], [`TcpSocket`] and [`File`] close
//! on drop, exactly once. Buffers for asynchronous reads and writes are
//! owned `Vec<u8>`s moved into the submission and handed back at
//! completion, so a buffer cannot be reused or freed while the kernel
//! still references it.

#[cfg(not(target_os = "linux"))]
compile_error!("rio drives io_uring and epoll; it only builds on Linux");

#[macro_use]
mod macros;

mod backend;
mod context;
mod error;
mod fs;
mod handle;
mod net;
mod op;
mod record;
mod store;

pub mod cb;
pub mod fut;
pub mod io;
pub mod promise;
pub mod task;

pub use backend::EngineKind;
pub use context::Context;
pub use error::{Error, ErrorKind, Result};
pub use fs::{File, Mode};
pub use fut::{Fut, Future, FuturePoll};
pub use handle::{Handle, IntoHandle};
pub use net::{AcceptResult, Address, Family, SockOpt, TcpSocket};
pub use promise::{Promise, State};
