//! Future-based echo servers: adapters, `then`, `loop_fn` and
//! `timeout_with` against real sockets.

mod common;

use std::rc::Rc;
use std::time::Duration;

use rio::fut::{self, Fut, FuturePoll};
use rio::{io, Address, Context, Error, ErrorKind, SockOpt, TcpSocket};

/// Alternates `future.poll()` with `ctx.poll()` until the future leaves
/// `Pending`.
fn drive<F: Fut>(ctx: &Context, future: &mut F) -> FuturePoll<F::Output> {
  for _ in 0..20_000 {
    match future.poll() {
      FuturePoll::Pending => {}
      terminal => return terminal,
    }
    ctx.poll().unwrap();
    std::thread::sleep(Duration::from_micros(100));
  }
  panic!("future never left pending");
}

fn listen_and_connect(opts: SockOpt) -> (TcpSocket, TcpSocket) {
  let (listener, addr) =
    TcpSocket::open_and_listen(Address::localhost_ipv4(0), opts).unwrap();
  let client = TcpSocket::connect(addr, SockOpt::SYNC_CLIENT_V4).unwrap();
  (listener, client)
}

#[test]
fn adapter_read_then_write_echoes() {
  for ctx in common::contexts() {
    let (listener, client) = listen_and_connect(SockOpt::ASYNC_SERVER_V4);

    let mut acceptor = fut::accept(&ctx, &listener);
    let conn = drive(&ctx, &mut acceptor).unwrap();
    let sock = Rc::new(conn.client);

    io::write_all(&client, b"ping\n").unwrap();

    let echo_ctx = ctx.clone();
    let echo_sock = sock.clone();
    let mut echo = fut::read(&ctx, &*sock, vec![0u8; 1024]).then(
      move |(n, mut buf)| {
        buf.truncate(n);
        fut::write(&echo_ctx, &*echo_sock, buf)
      },
    );

    let (n, _buf) = drive(&ctx, &mut echo).unwrap();
    assert_eq!(n, 5);

    let mut back = [0u8; 16];
    assert_eq!(io::read(&client, &mut back).unwrap(), 5);
    assert_eq!(&back[..5], b"ping\n");
  }
}

#[test]
fn loop_echo_session_until_peer_disconnects() {
  for ctx in common::contexts() {
    let (listener, client) = listen_and_connect(SockOpt::ASYNC_SERVER_V4);

    let mut acceptor = fut::accept(&ctx, &listener);
    let conn = drive(&ctx, &mut acceptor).unwrap();
    let sock = Rc::new(conn.client);

    let loop_ctx = ctx.clone();
    let mut session = fut::loop_fn(sock, move |s| {
      let write_ctx = loop_ctx.clone();
      let write_sock = s.clone();
      let seed_back = s.clone();
      fut::read(&loop_ctx, &*s, vec![0u8; 1024])
        .then(move |(n, mut buf)| {
          buf.truncate(n);
          fut::write(&write_ctx, &*write_sock, buf)
        })
        .then(move |(n, _buf)| {
          fut::make(
            (n, Some(seed_back)),
            |state: &mut (usize, Option<Rc<TcpSocket>>)| {
              if state.0 == 0 {
                FuturePoll::Error(Error::new(
                  ErrorKind::ConnectionAborted,
                  "peer closed",
                ))
              } else {
                FuturePoll::Ready(
                  state.1.take().expect("future polled after completion"),
                )
              }
            },
          )
        })
    });

    for msg in [b"one\n".as_slice(), b"two!!\n".as_slice()] {
      io::write_all(&client, msg).unwrap();

      let mut got = Vec::new();
      for _ in 0..20_000 {
        assert!(session.poll().is_pending());
        ctx.poll().unwrap();
        let mut buf = [0u8; 64];
        if let Ok(n) = io::try_read(&client, &mut buf) {
          got.extend_from_slice(&buf[..n]);
        }
        if got.len() >= msg.len() {
          break;
        }
        std::thread::sleep(Duration::from_micros(100));
      }
      assert_eq!(got, msg);
    }

    drop(client);
    let err = loop {
      match session.poll() {
        FuturePoll::Pending => {
          ctx.poll().unwrap();
          std::thread::sleep(Duration::from_micros(100));
        }
        FuturePoll::Error(e) => break e,
        FuturePoll::Ready(()) => panic!("echo loop cannot finish cleanly"),
      }
    };
    assert_eq!(err.kind(), ErrorKind::ConnectionAborted);
  }
}

#[test]
fn silent_client_times_out_and_gets_the_goodbye() {
  const GOODBYE: &[u8] = b"Timeout: You were too slow! Bye!\n";

  struct ClientCtx {
    sock: TcpSocket,
    buf: Vec<u8>,
  }

  let (listener, client) = listen_and_connect(SockOpt::SYNC_SERVER_V4);
  let conn = io::accept(&listener).unwrap();
  conn.client.set_nonblocking(true).unwrap();

  let state = ClientCtx { sock: conn.client, buf: vec![0u8; 1024] };
  let mut session = fut::make(state, |c: &mut ClientCtx| {
    let ClientCtx { sock, buf } = c;
    match io::try_read(sock, buf) {
      Err(e) if e.kind() == ErrorKind::WouldBlock => FuturePoll::Pending,
      Err(e) => FuturePoll::Error(e),
      Ok(0) => FuturePoll::Error(Error::new(
        ErrorKind::ConnectionAborted,
        "peer closed",
      )),
      Ok(_) => FuturePoll::Ready(()),
    }
  })
  .timeout_with(Duration::from_millis(50), |c: ClientCtx| {
    fut::make(c, |c: &mut ClientCtx| match io::try_write(&c.sock, GOODBYE) {
      Err(e) if e.kind() == ErrorKind::WouldBlock => FuturePoll::Pending,
      _ => FuturePoll::Error(Error::new(
        ErrorKind::TimedOut,
        "client was too slow",
      )),
    })
  });

  // The client sends nothing; the session must end with timed_out.
  let err = loop {
    match session.poll() {
      FuturePoll::Pending => std::thread::sleep(Duration::from_millis(1)),
      FuturePoll::Error(e) => break e,
      FuturePoll::Ready(()) => panic!("client never sent anything"),
    }
  };
  assert_eq!(err.kind(), ErrorKind::TimedOut);

  let mut got = [0u8; 64];
  let n = io::read(&client, &mut got).unwrap();
  assert_eq!(&got[..n], GOODBYE);
}
