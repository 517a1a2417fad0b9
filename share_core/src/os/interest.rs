//! Common types shared by the readiness layer.

/// Identifier attached to a registration and echoed back by `poll`.
/// The engine uses the raw socket handle itself as the token.
pub type Token = usize;

/// What a registration wants to be woken up for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interest {
    /// Incoming connections or request bytes.
    Readable,
    /// Room in the socket send buffer.
    Writable,
    /// Request bytes to discard, or the peer shutting down its side.
    PeerClosed,
}

impl Interest {
    pub(crate) fn bits(self) -> u32 {
        match self {
            Interest::Readable => libc::EPOLLIN as u32,
            Interest::Writable => libc::EPOLLOUT as u32,
            Interest::PeerClosed => (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
        }
    }
}

/// One readiness notification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer closed its side (`EPOLLRDHUP`) or the socket hung up (`EPOLLHUP`).
    pub hangup: bool,
    pub error: bool,
}

impl Event {
    pub(crate) fn from_bits(token: Token, bits: u32) -> Self {
        Event {
            token,
            readable: bits & libc::EPOLLIN as u32 != 0,
            writable: bits & libc::EPOLLOUT as u32 != 0,
            hangup: bits & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0,
            error: bits & libc::EPOLLERR as u32 != 0,
        }
    }

    /// The connection cannot make further progress and should be retired.
    pub fn is_terminal(&self) -> bool {
        self.hangup || self.error
    }
}
