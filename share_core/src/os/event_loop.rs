use super::epoll::Epoll;
use super::interest::{Event, Interest, Token};
use std::io::Result;
use std::os::fd::{AsRawFd, RawFd};

/// epoll based event loop keyed by raw handle.
///
/// The token of every registration is the handle value itself, so the
/// caller can index its own handle table straight from an [`Event`].
pub struct EventLoop {
    ep: Epoll,
    events: Vec<Event>,
}

impl EventLoop {
    pub fn new(max_events: usize) -> Result<Self> {
        Ok(EventLoop {
            ep: Epoll::new(max_events)?,
            events: Vec::with_capacity(max_events),
        })
    }

    /// Register `io` and return its token.
    pub fn register<T: AsRawFd>(&mut self, io: &T, interest: Interest) -> Result<Token> {
        let fd = io.as_raw_fd();
        let token = fd as Token;
        self.ep.add(fd, token, interest)?;
        Ok(token)
    }

    /// Replace the interest set of an existing registration.
    pub fn reregister(&mut self, fd: RawFd, interest: Interest) -> Result<()> {
        self.ep.modify(fd, fd as Token, interest)
    }

    pub fn deregister(&mut self, fd: RawFd) -> Result<()> {
        self.ep.delete(fd)
    }

    /// Wait for a batch. `timeout_ms < 0` blocks indefinitely.
    /// Events are handed out in the order the kernel reported them.
    pub fn poll(&mut self, timeout_ms: i32) -> Result<&[Event]> {
        self.ep.wait(&mut self.events, timeout_ms)?;
        Ok(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};

    #[test]
    fn listener_becomes_readable_on_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut ev = EventLoop::new(8).unwrap();
        let token = ev.register(&listener, Interest::Readable).unwrap();
        assert_eq!(token, listener.as_raw_fd() as Token);

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let events = ev.poll(2000).unwrap();
        assert!(events.iter().any(|e| e.token == token && e.readable));
    }

    #[test]
    fn interest_switch_from_writable_to_peer_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let mut ev = EventLoop::new(8).unwrap();
        let token = ev.register(&server_side, Interest::Writable).unwrap();
        let events = ev.poll(2000).unwrap();
        assert!(events.iter().any(|e| e.token == token && e.writable));

        ev.reregister(server_side.as_raw_fd(), Interest::PeerClosed).unwrap();
        let events = ev.poll(0).unwrap();
        assert!(events.is_empty());

        drop(client);
        let events = ev.poll(2000).unwrap();
        assert!(events.iter().any(|e| e.token == token && e.hangup));

        ev.deregister(server_side.as_raw_fd()).unwrap();
    }

    #[test]
    fn request_bytes_wake_peer_closed_interest() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();

        let mut ev = EventLoop::new(8).unwrap();
        let token = ev.register(&server_side, Interest::PeerClosed).unwrap();
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
        let events = ev.poll(2000).unwrap();
        assert!(events.iter().any(|e| e.token == token && e.readable && !e.hangup));
    }
}
