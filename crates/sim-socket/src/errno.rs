/// The subset of POSIX errno values the virtual socket layer can produce. Named to match their
/// C counterparts so a guest-side strerror table needs no translation layer.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Errno {
    /// `EADDRINUSE` — the requested local address/port is already bound.
    AddrInUse,
    /// `EINPROGRESS` — a non-blocking connect was accepted but hasn't completed yet.
    InProgress,
    /// `EWOULDBLOCK` / `EAGAIN` — the operation would block and the socket is non-blocking.
    WouldBlock,
    /// `EPIPE` — write to a socket whose peer (or local half) has already closed.
    Pipe,
    /// `EBADF` — the descriptor does not name an open socket.
    BadFd,
    /// `ECONNRESET` — the peer sent `RST`.
    ConnReset,
    /// `ECONNREFUSED` — connect targeted a port with no listener.
    ConnRefused,
    /// `ENOTCONN` — an operation that requires a connected socket was attempted on one that
    /// isn't.
    NotConnected,
    /// `EISCONN` — connect was called again on an already-connected socket.
    IsConnected,
    /// `EMFILE` — the host's descriptor table has no room left.
    TooManyOpenFiles,
    /// `EINVAL` — the call's arguments don't make sense for this socket's state.
    InvalidArgument,
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Errno::AddrInUse => "EADDRINUSE",
            Errno::InProgress => "EINPROGRESS",
            Errno::WouldBlock => "EWOULDBLOCK",
            Errno::Pipe => "EPIPE",
            Errno::BadFd => "EBADF",
            Errno::ConnReset => "ECONNRESET",
            Errno::ConnRefused => "ECONNREFUSED",
            Errno::NotConnected => "ENOTCONN",
            Errno::IsConnected => "EISCONN",
            Errno::TooManyOpenFiles => "EMFILE",
            Errno::InvalidArgument => "EINVAL",
        };
        f.write_str(name)
    }
}

impl std::error::Error for Errno {}
