//! The virtual socket manager (§4.5): a per-host table of descriptors mirroring the POSIX socket
//! API closely enough that an unmodified application linked against it cannot tell it isn't
//! talking to a real kernel. Every call here is synchronous and non-blocking at the Rust level;
//! blocking semantics are the caller's job (typically: return `EWOULDBLOCK`, then retry once an
//! epoll readiness event says to).

pub mod epoll;
pub mod errno;
pub mod manager;
pub mod tcp_socket;
pub mod udp_socket;

pub use epoll::{Epoll, EpollEvents, EpollHandle};
pub use errno::Errno;
pub use manager::{Descriptor, SocketManager, MIN_DESCRIPTOR};
pub use tcp_socket::TcpSocket;
pub use udp_socket::UdpSocket;
