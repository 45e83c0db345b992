//! Protocol-family-tagged endpoints.

use std::mem;
use std::net::{
  Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs,
};

use crate::error::{Error, ErrorKind, Result};

/// An IPv4 or IPv6 address plus port.
///
/// Formats as `host:port` (IPv6 hosts are bracketed, the std convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub(crate) Option<SocketAddr>);

impl Address {
  /// `0.0.0.0:port`.
  pub fn any_ipv4(port: u16) -> Address {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into()
  }

  /// `127.0.0.1:port`.
  pub fn localhost_ipv4(port: u16) -> Address {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port)).into()
  }

  /// `[::]:port`.
  pub fn any_ipv6(port: u16) -> Address {
    SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)).into()
  }

  /// `[::1]:port`.
  pub fn localhost_ipv6(port: u16) -> Address {
    SocketAddr::from((Ipv6Addr::LOCALHOST, port)).into()
  }

  /// Resolves `host` (a literal or a DNS name) and takes the first result.
  pub fn parse(host: &str, port: u16) -> Result<Address> {
    let mut addrs = (host, port).to_socket_addrs().map_err(|e| {
      Error::from(e).context(format!("resolving {}:{}", host, port))
    })?;
    match addrs.next() {
      Some(addr) => Ok(addr.into()),
      None => Err(Error::new(
        ErrorKind::NotFound,
        format!("no address found for {}:{}", host, port),
      )),
    }
  }

  pub fn port(&self) -> u16 {
    self.0.map(|a| a.port()).unwrap_or(0)
  }

  pub fn is_ipv4(&self) -> bool {
    matches!(self.0, Some(SocketAddr::V4(_)))
  }

  pub(crate) fn socket_addr(&self) -> Result<SocketAddr> {
    self
      .0
      .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "empty address"))
  }
}

impl From<SocketAddr> for Address {
  fn from(addr: SocketAddr) -> Address {
    Address(Some(addr))
  }
}

impl std::fmt::Display for Address {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self.0 {
      Some(addr) => write!(f, "{}", addr),
      None => f.write_str("<unbound>"),
    }
  }
}

/// Reads a kernel-filled `sockaddr_storage` back into an [`Address`].
///
/// # Safety
///
/// `storage` must point to a `sockaddr_storage` initialised by the kernel
/// (or zeroed).
pub(crate) unsafe fn sockaddr_into_std(
  storage: *const libc::sockaddr_storage,
) -> Result<Address> {
  // SAFETY: caller guarantees the pointer is valid.
  let family = unsafe { (*storage).ss_family };

  if family == libc::AF_INET as libc::sa_family_t {
    // SAFETY: family says the bytes are a sockaddr_in.
    let v4 = unsafe { *storage.cast::<libc::sockaddr_in>() };
    let ip = Ipv4Addr::from(u32::from_be(v4.sin_addr.s_addr));
    let port = u16::from_be(v4.sin_port);
    Ok(SocketAddr::from(SocketAddrV4::new(ip, port)).into())
  } else if family == libc::AF_INET6 as libc::sa_family_t {
    // SAFETY: family says the bytes are a sockaddr_in6.
    let v6 = unsafe { *storage.cast::<libc::sockaddr_in6>() };
    let ip = Ipv6Addr::from(v6.sin6_addr.s6_addr);
    let port = u16::from_be(v6.sin6_port);
    Ok(
      SocketAddr::from(SocketAddrV6::new(
        ip,
        port,
        v6.sin6_flowinfo,
        v6.sin6_scope_id,
      ))
      .into(),
    )
  } else {
    Err(Error::from_raw_os_error(libc::EAFNOSUPPORT))
  }
}

/// Converts an [`Address`] into `(sockaddr_storage, socklen_t)` for the
/// syscalls and SQEs that want the C layout.
pub(crate) fn std_into_sockaddr(
  addr: SocketAddr,
) -> (libc::sockaddr_storage, libc::socklen_t) {
  // SAFETY: sockaddr_storage is a plain C struct; all-zero is a valid
  // initial state for every field.
  let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };

  let len = match addr {
    SocketAddr::V4(v4) => {
      let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: v4.port().to_be(),
        sin_addr: libc::in_addr { s_addr: u32::from(*v4.ip()).to_be() },
        sin_zero: [0; 8],
      };
      // SAFETY: sockaddr_in fits in sockaddr_storage by design; the
      // regions cannot overlap.
      unsafe {
        std::ptr::copy_nonoverlapping(
          (&sin as *const libc::sockaddr_in).cast::<u8>(),
          (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
          mem::size_of::<libc::sockaddr_in>(),
        );
      }
      mem::size_of::<libc::sockaddr_in>()
    }
    SocketAddr::V6(v6) => {
      let sin6 = libc::sockaddr_in6 {
        sin6_family: libc::AF_INET6 as libc::sa_family_t,
        sin6_port: v6.port().to_be(),
        sin6_flowinfo: v6.flowinfo(),
        sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
        sin6_scope_id: v6.scope_id(),
      };
      // SAFETY: as above, for sockaddr_in6.
      unsafe {
        std::ptr::copy_nonoverlapping(
          (&sin6 as *const libc::sockaddr_in6).cast::<u8>(),
          (&mut storage as *mut libc::sockaddr_storage).cast::<u8>(),
          mem::size_of::<libc::sockaddr_in6>(),
        );
      }
      mem::size_of::<libc::sockaddr_in6>()
    }
  };

  (storage, len as libc::socklen_t)
}
