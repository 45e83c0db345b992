//! Reactor timers through both engines, including `run()`'s blocking
//! waits being capped by the next deadline.

mod common;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rio::fut::{self, Fut, FuturePoll};
use rio::cb;

#[test]
fn run_sleeps_until_the_deadline_then_returns() {
  for ctx in common::contexts() {
    let fired = Rc::new(RefCell::new(Vec::new()));
    let sink = fired.clone();
    let start = Instant::now();

    cb::timer(
      &ctx,
      Duration::from_millis(60),
      move |_ctx, res, ()| {
        res.unwrap();
        sink.borrow_mut().push(());
      },
      (),
    );

    ctx.run().unwrap();
    assert_eq!(fired.borrow().len(), 1);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(60), "fired early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "run() overslept: {:?}", elapsed);
  }
}

#[test]
fn timers_fire_in_deadline_order_not_submission_order() {
  for ctx in common::contexts() {
    let order: Rc<RefCell<Vec<&str>>> = Rc::new(RefCell::new(Vec::new()));

    for (label, ms) in [("third", 70u64), ("first", 10), ("second", 40)] {
      let order = order.clone();
      cb::timer(
        &ctx,
        Duration::from_millis(ms),
        move |_ctx, res, ()| {
          res.unwrap();
          order.borrow_mut().push(label);
        },
        (),
      );
    }

    ctx.run().unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
  }
}

#[test]
fn fut_timer_resolves_once() {
  for ctx in common::contexts() {
    let mut timer = fut::timer(&ctx, Duration::from_millis(20));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
      match timer.poll() {
        FuturePoll::Pending => {
          assert!(Instant::now() < deadline, "timer never fired");
          ctx.poll().unwrap();
          std::thread::sleep(Duration::from_millis(1));
        }
        FuturePoll::Ready(()) => break,
        FuturePoll::Error(e) => panic!("timer failed: {}", e),
      }
    }
  }
}

#[test]
fn timer_callback_can_chain_another_timer() {
  for ctx in common::contexts() {
    let hits = Rc::new(RefCell::new(0u32));
    let sink = hits.clone();

    cb::timer(
      &ctx,
      Duration::from_millis(10),
      move |ctx, res, ()| {
        res.unwrap();
        *sink.borrow_mut() += 1;
        let sink = sink.clone();
        cb::timer(
          ctx,
          Duration::from_millis(10),
          move |_ctx, res, ()| {
            res.unwrap();
            *sink.borrow_mut() += 1;
          },
          (),
        );
      },
      (),
    );

    ctx.run().unwrap();
    assert_eq!(*hits.borrow(), 2);
  }
}
