//! The two zero-copy ways of getting the payload onto a socket.
//!
//! * [`DirectStream`]: `sendfile` from the source file at the connection's
//!   own offset. Used for large payloads.
//! * [`PipeBroadcast`]: the payload is gifted once into kernel pipes; each
//!   connection `tee`s a segment into a private pipe and `splice`s it out.
//!   Used for small payloads.
//!
//! Both are resumable: an `advance` that would block leaves the connection
//! where it was and the next write-readiness signal picks up from there.

mod direct;
mod pipe;
mod preload;

pub use direct::DirectStream;
pub use pipe::{PipeBroadcast, PipeSegment, SEGMENT_CAPACITY};

use crate::connection::Connection;
use crate::error::ServeError;
use crate::payload::Payload;
use std::fmt;
use std::io;
use std::net::TcpStream;

/// Outcome of one writer invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Bytes moved, more remain.
    Advanced,
    /// Nothing could be moved right now.
    Blocked,
    /// Every response byte is with the kernel.
    Complete,
}

/// Which strategy serves this process. Fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    DirectStream,
    PipeBroadcast,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Kind::DirectStream => "direct-stream (sendfile)",
            Kind::PipeBroadcast => "pipe-broadcast (tee/splice)",
        })
    }
}

impl Kind {
    /// Payloads strictly below `threshold` bytes are broadcast from pipes.
    pub fn select(total_len: u64, threshold: u64) -> Kind {
        if total_len < threshold {
            Kind::PipeBroadcast
        } else {
            Kind::DirectStream
        }
    }
}

/// Capability shared by both strategies.
pub trait Transfer {
    /// Response length in bytes, header included.
    fn total_len(&self) -> u64;

    /// Socket tuning applied once, right after acceptance.
    fn on_accept(&self, _stream: &TcpStream) -> io::Result<()> {
        Ok(())
    }

    /// Move as much of the response as the socket takes right now.
    fn advance(&self, conn: &mut Connection) -> io::Result<Progress>;

    /// Called once after [`Progress::Complete`], before the half-close.
    fn on_complete(&self, _stream: &TcpStream) -> io::Result<()> {
        Ok(())
    }
}

/// The strategy picked for this process.
pub enum Strategy {
    Direct(DirectStream),
    Pipe(PipeBroadcast),
}

impl Strategy {
    /// Build the strategy of `kind` around `payload`. For pipe-broadcast
    /// this preloads the payload into pipes and lets go of the file.
    pub fn prepare(payload: Payload, kind: Kind) -> Result<Self, ServeError> {
        match kind {
            Kind::DirectStream => {
                payload.warm_cache();
                Ok(Strategy::Direct(DirectStream::new(payload)))
            }
            Kind::PipeBroadcast => Ok(Strategy::Pipe(PipeBroadcast::preload(&payload)?)),
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Strategy::Direct(_) => Kind::DirectStream,
            Strategy::Pipe(_) => Kind::PipeBroadcast,
        }
    }

    fn inner(&self) -> &dyn Transfer {
        match self {
            Strategy::Direct(d) => d,
            Strategy::Pipe(p) => p,
        }
    }
}

impl Transfer for Strategy {
    fn total_len(&self) -> u64 {
        self.inner().total_len()
    }

    fn on_accept(&self, stream: &TcpStream) -> io::Result<()> {
        self.inner().on_accept(stream)
    }

    fn advance(&self, conn: &mut Connection) -> io::Result<Progress> {
        self.inner().advance(conn)
    }

    fn on_complete(&self, stream: &TcpStream) -> io::Result<()> {
        self.inner().on_complete(stream)
    }
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection has no socket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary() {
        assert_eq!(Kind::select(1023, 1024), Kind::PipeBroadcast);
        assert_eq!(Kind::select(1024, 1024), Kind::DirectStream);
        assert_eq!(Kind::select(1025, 1024), Kind::DirectStream);
        assert_eq!(Kind::select(0, 1), Kind::PipeBroadcast);
    }
}
