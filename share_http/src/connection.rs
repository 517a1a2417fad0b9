use std::net::TcpStream;
use std::os::fd::OwnedFd;
use std::time::Instant;

/// Where a connection is in its life. A vacant table entry is `CLOSED`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnState {
    /// Registered for write readiness, nothing sent yet.
    #[default]
    Accepted,
    /// The writer has run at least once.
    Sending,
    /// Every byte is with the kernel and the write side is shut; waiting
    /// for the peer to hang up.
    ShutdownPending,
}

/// Private pipe a pipe-broadcast connection drains into its socket.
#[derive(Debug)]
pub struct Relay {
    pub(crate) read: OwnedFd,
    pub(crate) write: OwnedFd,
    /// Bytes duplicated into the pipe but not yet spliced to the socket.
    pub(crate) pending: usize,
}

/// Per-connection transfer state, stored in the handle table.
#[derive(Debug, Default)]
pub struct Connection {
    pub(crate) stream: Option<TcpStream>,
    pub(crate) state: ConnState,
    /// Response bytes (header included) handed to the kernel.
    pub(crate) cursor: u64,
    /// Pipe segments fully relayed (pipe-broadcast only).
    pub(crate) segment: usize,
    pub(crate) relay: Option<Relay>,
    /// No relay pipe could be had; the response is copied from memory.
    pub(crate) copy_fallback: bool,
    pub(crate) last_progress: Option<Instant>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Connection {
            stream: Some(stream),
            last_progress: Some(Instant::now()),
            ..Connection::default()
        }
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn segment(&self) -> usize {
        self.segment
    }

    pub(crate) fn touch(&mut self) {
        self.last_progress = Some(Instant::now());
    }

    /// Record `n` more bytes delivered; the cursor never moves backwards
    /// nor past `total`.
    pub(crate) fn advance_cursor(&mut self, n: u64, total: u64) {
        debug_assert!(self.cursor + n <= total, "cursor overrun");
        self.cursor = (self.cursor + n).min(total);
        if n > 0 {
            self.touch();
        }
    }

    /// Idle for longer than `limit` as of `now`.
    pub(crate) fn is_stalled(&self, now: Instant, limit: std::time::Duration) -> bool {
        self.last_progress
            .is_some_and(|t| now.saturating_duration_since(t) > limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_is_zero_state() {
        let c = Connection::default();
        assert_eq!(c.state(), ConnState::Accepted);
        assert_eq!(c.cursor(), 0);
        assert_eq!(c.segment(), 0);
        assert!(c.stream.is_none() && c.relay.is_none());
        assert!(!c.copy_fallback);
    }

    #[test]
    fn cursor_is_clamped_and_monotonic() {
        let mut c = Connection::default();
        c.advance_cursor(10, 100);
        c.advance_cursor(0, 100);
        assert_eq!(c.cursor(), 10);
        c.advance_cursor(90, 100);
        assert_eq!(c.cursor(), 100);
    }

    #[test]
    fn stall_detection() {
        let mut c = Connection::default();
        let start = Instant::now();
        c.last_progress = Some(start);
        assert!(!c.is_stalled(start + Duration::from_secs(1), Duration::from_secs(5)));
        assert!(c.is_stalled(start + Duration::from_secs(6), Duration::from_secs(5)));
    }
}
