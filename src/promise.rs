//! The promise/future rendezvous.
//!
//! A [`State<T>`] is a one-shot cell written by a resolver and read by a
//! poller. The writer side holds a [`Promise`]; the reader side polls
//! the same state, usually through [`fut::make`](crate::fut::make) with
//! a poll thunk of `|s| s.poll()` — or implicitly, via the operation
//! adapters in [`crate::fut`] and [`crate::task`], which allocate one of
//! these behind every in-flight submission.
//!
//! Ownership is reference-counted: both sides hold an `Rc<State<T>>`,
//! and the last holder frees it.
//!
//! ```
//! use std::rc::Rc;
//! use rio::fut::{self, Fut, FuturePoll};
//! use rio::{Promise, State};
//!
//! let state = Rc::new(State::new());
//! let promise = Promise::new(state.clone());
//! let mut future = fut::make(state, |s: &mut Rc<State<i32>>| s.poll());
//!
//! assert!(matches!(future.poll(), FuturePoll::Pending));
//! promise.resolve(7);
//! assert!(matches!(future.poll(), FuturePoll::Ready(7)));
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::task::Waker;

use crate::error::Error;
use crate::fut::FuturePoll;

enum Slot<T> {
  Empty,
  Ready(T),
  Rejected(Error),
  Taken,
}

struct Inner<T> {
  slot: Slot<T>,
  waker: Option<Waker>,
}

/// Heap-allocatable rendezvous state: `empty -> ready | rejected`, one
/// transition only. Later `resolve`/`reject` calls are a no-op in
/// release and an assertion failure in debug.
pub struct State<T> {
  inner: RefCell<Inner<T>>,
}

impl<T> State<T> {
  pub fn new() -> State<T> {
    State { inner: RefCell::new(Inner { slot: Slot::Empty, waker: None }) }
  }

  pub fn resolve(&self, value: T) {
    let mut inner = self.inner.borrow_mut();
    match inner.slot {
      Slot::Empty => inner.slot = Slot::Ready(value),
      _ => {
        debug_assert!(false, "promise state resolved twice");
        return;
      }
    }
    if let Some(waker) = inner.waker.take() {
      waker.wake();
    }
  }

  pub fn reject(&self, error: Error) {
    let mut inner = self.inner.borrow_mut();
    match inner.slot {
      Slot::Empty => inner.slot = Slot::Rejected(error),
      _ => {
        debug_assert!(false, "promise state rejected twice");
        return;
      }
    }
    if let Some(waker) = inner.waker.take() {
      waker.wake();
    }
  }

  /// Reads the rendezvous, consuming the value or error on the first
  /// non-pending read.
  ///
  /// # Panics
  ///
  /// Panics if called again after it returned `Ready` or `Error`.
  pub fn poll(&self) -> FuturePoll<T> {
    let mut inner = self.inner.borrow_mut();
    match std::mem::replace(&mut inner.slot, Slot::Taken) {
      Slot::Empty => {
        inner.slot = Slot::Empty;
        FuturePoll::Pending
      }
      Slot::Ready(value) => FuturePoll::Ready(value),
      Slot::Rejected(error) => FuturePoll::Error(error),
      Slot::Taken => panic!("promise state polled after completion"),
    }
  }

  /// Like [`poll`](State::poll), parking `waker` when still pending so a
  /// resolve/reject wakes the holder.
  pub(crate) fn poll_with_waker(&self, waker: &Waker) -> FuturePoll<T> {
    let mut inner = self.inner.borrow_mut();
    match std::mem::replace(&mut inner.slot, Slot::Taken) {
      Slot::Empty => {
        inner.slot = Slot::Empty;
        inner.waker = Some(waker.clone());
        FuturePoll::Pending
      }
      Slot::Ready(value) => FuturePoll::Ready(value),
      Slot::Rejected(error) => FuturePoll::Error(error),
      Slot::Taken => panic!("promise state polled after completion"),
    }
  }
}

impl<T> Default for State<T> {
  fn default() -> State<T> {
    State::new()
  }
}

/// The writer half: a shared reference to a [`State<T>`] exposing only
/// the one-shot transitions.
pub struct Promise<T> {
  state: Rc<State<T>>,
}

impl<T> Promise<T> {
  pub fn new(state: Rc<State<T>>) -> Promise<T> {
    Promise { state }
  }

  pub fn resolve(&self, value: T) {
    self.state.resolve(value);
  }

  pub fn reject(&self, error: Error) {
    self.state.reject(error);
  }
}

impl<T> Clone for Promise<T> {
  fn clone(&self) -> Promise<T> {
    Promise { state: Rc::clone(&self.state) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  #[test]
  fn resolve_then_poll() {
    let state = State::new();
    assert!(matches!(state.poll(), FuturePoll::Pending));
    state.resolve(42);
    assert!(matches!(state.poll(), FuturePoll::Ready(42)));
  }

  #[test]
  fn reject_then_poll() {
    let state: State<i32> = State::new();
    state.reject(Error::new(ErrorKind::Io, "boom"));
    match state.poll() {
      FuturePoll::Error(e) => assert_eq!(e.kind(), ErrorKind::Io),
      _ => panic!("expected error"),
    }
  }

  #[test]
  #[cfg(not(debug_assertions))]
  fn second_transition_is_a_noop() {
    let state = State::new();
    state.resolve(1);
    state.resolve(2);
    state.reject(Error::new(ErrorKind::Io, "late"));
    assert!(matches!(state.poll(), FuturePoll::Ready(1)));
  }

  #[test]
  #[should_panic(expected = "polled after completion")]
  fn poll_after_ready_panics() {
    let state = State::new();
    state.resolve(1);
    let _ = state.poll();
    let _ = state.poll();
  }
}
