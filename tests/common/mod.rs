#![allow(dead_code)]

use std::time::Duration;

use rio::{Context, EngineKind};

/// One context per available engine. io_uring may be unavailable in
/// sandboxes; the readiness engine always is.
pub fn contexts() -> Vec<Context> {
  let _ = env_logger::builder().is_test(true).try_init();
  let mut ctxs = Vec::new();
  if let Ok(ctx) = Context::with_engine(EngineKind::Completion) {
    ctxs.push(ctx);
  }
  ctxs.push(Context::with_engine(EngineKind::Readiness).unwrap());
  ctxs
}

/// Ticks the reactor until `done` holds, with a generous cap so a hung
/// test fails instead of wedging the suite.
pub fn pump_until(ctx: &Context, mut done: impl FnMut() -> bool) {
  for _ in 0..20_000 {
    ctx.poll().unwrap();
    if done() {
      return;
    }
    std::thread::sleep(Duration::from_micros(100));
  }
  panic!("reactor made no progress towards the condition");
}
