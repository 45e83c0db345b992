//! Backend engines: the OS facilities the reactor drives.
//!
//! Two engines implement the same [`Engine`] contract:
//! - [`uring::Uring`]: completion-based; operations finish in the kernel
//!   and come back as CQEs.
//! - [`epoll::Readiness`]: readiness-based; the engine parks descriptors
//!   in epoll and issues the non-blocking syscall when they become
//!   ready, re-arming on `would_block`.

pub(crate) mod epoll;
pub(crate) mod uring;

use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::Result;
use crate::op::Operation;
use crate::store::OpStore;

/// Which backend a [`Context`](crate::Context) drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
  /// io_uring submission/completion rings.
  Completion,
  /// epoll readiness polling.
  Readiness,
}

/// One finished operation: its token and the raw result
/// (non-negative success value or negated errno).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Completion {
  pub token: u64,
  pub result: isize,
}

/// Token used for engine-internal submissions (cancellations) whose
/// completions must not reach the store.
pub(crate) const INTERNAL_TOKEN: u64 = u64::MAX;

pub(crate) trait Engine {
  fn kind(&self) -> EngineKind;

  /// Hands one operation to the engine. The operation stays owned by the
  /// reactor's store; the engine may keep pointers into it until the
  /// matching completion is drained.
  fn submit(&mut self, token: u64, op: &mut dyn Operation) -> Result<()>;

  /// Best-effort cancellation of an in-flight operation. The cancelled
  /// operation still produces a completion (with `-ECANCELED` when the
  /// cancel won).
  fn cancel(&mut self, token: u64, fd: RawFd);

  /// Pushes queued submissions to the kernel.
  fn flush(&mut self) -> Result<()>;

  /// Collects finished operations into `out`.
  ///
  /// `timeout` semantics: `Some(ZERO)` never blocks, `Some(d)` waits up
  /// to `d` for the first completion, `None` waits indefinitely.
  fn drain(
    &mut self,
    store: &mut OpStore,
    timeout: Option<Duration>,
    out: &mut Vec<Completion>,
  ) -> Result<()>;
}
