//! TCP sockets and their open options.

use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};
use crate::handle::{Handle, IntoHandle};
use crate::net::Address;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
  V4,
  V6,
}

/// Socket open options: address family, blocking discipline and
/// reuse-address. The presets mirror the roles servers and clients
/// actually use; `ASYNC_SERVER_V4` is the default.
#[derive(Debug, Clone, Copy)]
pub struct SockOpt {
  pub family: Family,
  pub nonblocking: bool,
  pub reuse_addr: bool,
}

impl SockOpt {
  pub const SYNC_SERVER_V4: SockOpt =
    SockOpt { family: Family::V4, nonblocking: false, reuse_addr: true };
  pub const ASYNC_SERVER_V4: SockOpt =
    SockOpt { family: Family::V4, nonblocking: true, reuse_addr: true };
  pub const SYNC_CLIENT_V4: SockOpt =
    SockOpt { family: Family::V4, nonblocking: false, reuse_addr: false };
  pub const ASYNC_CLIENT_V4: SockOpt =
    SockOpt { family: Family::V4, nonblocking: true, reuse_addr: false };
  pub const SYNC_SERVER_V6: SockOpt =
    SockOpt { family: Family::V6, nonblocking: false, reuse_addr: true };
  pub const ASYNC_SERVER_V6: SockOpt =
    SockOpt { family: Family::V6, nonblocking: true, reuse_addr: true };
}

impl Default for SockOpt {
  fn default() -> SockOpt {
    SockOpt::ASYNC_SERVER_V4
  }
}

/// What an accept hands back: the connected peer and where it came from.
#[derive(Debug)]
pub struct AcceptResult {
  pub client: TcpSocket,
  pub address: Address,
}

/// An owned TCP socket.
#[derive(Debug)]
pub struct TcpSocket {
  h: Handle,
}

impl TcpSocket {
  /// Creates an unbound socket configured per `opts`.
  pub fn open(opts: SockOpt) -> Result<TcpSocket> {
    let domain = match opts.family {
      Family::V4 => Domain::IPV4,
      Family::V6 => Domain::IPV6,
    };
    let sock = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
      .map_err(|e| Error::from(e).context("opening socket"))?;
    if opts.reuse_addr {
      sock.set_reuse_address(true)?;
    }
    if opts.nonblocking {
      sock.set_nonblocking(true)?;
    }
    Ok(TcpSocket { h: Handle::from_raw(sock.into_raw_fd()) })
  }

  /// Bind-then-listen with the default backlog of 128.
  ///
  /// Returns the socket together with the actual bound address, so
  /// listening on port 0 reports the kernel-assigned port.
  pub fn open_and_listen(
    addr: impl Into<Address>,
    opts: SockOpt,
  ) -> Result<(TcpSocket, Address)> {
    TcpSocket::open_and_listen_with(addr, opts, 128)
  }

  /// Like [`open_and_listen`](TcpSocket::open_and_listen), resolving
  /// `host` first (a literal or DNS name).
  pub fn open_and_listen_on(
    host: &str,
    port: u16,
    opts: SockOpt,
  ) -> Result<(TcpSocket, Address)> {
    TcpSocket::open_and_listen_with(Address::parse(host, port)?, opts, 128)
  }

  pub fn open_and_listen_with(
    addr: impl Into<Address>,
    opts: SockOpt,
    backlog: i32,
  ) -> Result<(TcpSocket, Address)> {
    let addr = addr.into();
    let sock = TcpSocket::open(opts)?;
    crate::io::bind(&sock, &addr)?;
    crate::io::listen(&sock, backlog)?;
    let bound = sock.local_addr()?;
    Ok((sock, bound))
  }

  /// Connects a client socket to `addr`.
  ///
  /// The connect itself is blocking; the non-blocking flag from `opts` is
  /// applied once the connection is established.
  pub fn connect(addr: impl Into<Address>, opts: SockOpt) -> Result<TcpSocket> {
    let addr = addr.into();
    let sock =
      TcpSocket::open(SockOpt { nonblocking: false, ..opts })?;
    crate::io::connect(&sock, &addr)?;
    if opts.nonblocking {
      sock.set_nonblocking(true)?;
    }
    Ok(sock)
  }

  pub fn local_addr(&self) -> Result<Address> {
    let sock = self.borrow_socket2();
    let res = sock.local_addr();
    sock.into_raw_fd();
    let addr = res.map_err(|e| Error::from(e).context("getsockname"))?;
    match addr.as_socket() {
      Some(a) => Ok(a.into()),
      None => Err(Error::from_raw_os_error(libc::EAFNOSUPPORT)),
    }
  }

  pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
    let sock = self.borrow_socket2();
    let res = sock.set_nonblocking(nonblocking);
    sock.into_raw_fd();
    res.map_err(Error::from)
  }

  pub(crate) fn from_handle(h: Handle) -> TcpSocket {
    TcpSocket { h }
  }

  // socket2 owns fds; give it a temporary view and take the fd back with
  // into_raw_fd before it drops.
  fn borrow_socket2(&self) -> Socket {
    // SAFETY: the returned Socket is never dropped with ownership: every
    // caller ends with into_raw_fd(), returning the fd to this handle.
    unsafe { Socket::from_raw_fd(self.h.as_raw()) }
  }
}

impl AsRawFd for TcpSocket {
  fn as_raw_fd(&self) -> RawFd {
    self.h.as_raw_fd()
  }
}

impl IntoHandle for TcpSocket {
  fn into_handle(self) -> Handle {
    self.h
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn listen_on_port_zero_reports_real_port() {
    let (sock, addr) =
      TcpSocket::open_and_listen(Address::localhost_ipv4(0), SockOpt::default())
        .unwrap();
    assert_ne!(addr.port(), 0);
    assert!(sock.as_raw_fd() >= 0);
  }

  #[test]
  fn connect_round_trip() {
    let (listener, addr) =
      TcpSocket::open_and_listen(Address::localhost_ipv4(0), SockOpt::SYNC_SERVER_V4)
        .unwrap();
    let client = TcpSocket::connect(addr, SockOpt::SYNC_CLIENT_V4).unwrap();
    let accepted = crate::io::accept(&listener).unwrap();
    assert!(accepted.address.is_ipv4());
    drop(client);
  }
}
