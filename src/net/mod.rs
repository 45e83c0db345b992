mod addr;
mod socket;

pub use addr::Address;
pub(crate) use addr::{sockaddr_into_std, std_into_sockaddr};
pub use socket::{AcceptResult, Family, SockOpt, TcpSocket};
