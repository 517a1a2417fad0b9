use super::preload::{self, Region};
use super::{not_connected, Progress, Transfer};
use crate::connection::{Connection, Relay};
use crate::error::{is_transient, ServeError};
use crate::payload::Payload;
use share_core::metrics;
use std::io::{self, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

/// Bytes held by one pipe segment (the default Linux pipe capacity).
pub const SEGMENT_CAPACITY: usize = 64 * 1024;

static QUOTA_WARNED: AtomicBool = AtomicBool::new(false);

/// Read end of a pipe preloaded with one slice of the response. Never
/// drained: connections only ever `tee` from it.
#[derive(Debug)]
pub struct PipeSegment {
    read: OwnedFd,
    len: usize,
}

impl PipeSegment {
    /// Gift `chunk` (page-aligned, at most one segment) into a new pipe.
    fn gift(chunk: &[u8]) -> io::Result<Self> {
        debug_assert!(chunk.len() <= SEGMENT_CAPACITY);
        let (read, write) = pipe(chunk.len())?;
        let mut off = 0;
        while off < chunk.len() {
            let iov = libc::iovec {
                iov_base: chunk[off..].as_ptr() as *mut libc::c_void,
                iov_len: chunk.len() - off,
            };
            let n = unsafe { libc::vmsplice(write.as_raw_fd(), &iov, 1, libc::SPLICE_F_GIFT) };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            if n == 0 {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "vmsplice moved nothing"));
            }
            off += n as usize;
        }
        Ok(PipeSegment { read, len: chunk.len() })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Non-blocking, close-on-exec pipe able to hold at least `min_capacity`.
fn pipe(min_capacity: usize) -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_NONBLOCK | libc::O_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded, both descriptors are fresh and ours.
    let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    let size = unsafe { libc::fcntl(write.as_raw_fd(), libc::F_GETPIPE_SZ) };
    if size < 0 || (size as usize) < min_capacity {
        // Grows only; an over-quota user gets an error instead of a short pipe.
        if unsafe { libc::fcntl(write.as_raw_fd(), libc::F_SETPIPE_SZ, min_capacity as libc::c_int) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok((read, write))
}

/// Growing a pipe failed because the user is over `pipe-user-pages-soft`.
fn is_pipe_quota(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EPERM)
}

impl Relay {
    fn open() -> io::Result<Self> {
        let (read, write) = pipe(SEGMENT_CAPACITY)?;
        Ok(Relay { read, write, pending: 0 })
    }

    /// Duplicate `seg` into this (empty) relay without consuming it.
    fn fill_from(&mut self, seg: &PipeSegment) -> io::Result<()> {
        debug_assert_eq!(self.pending, 0);
        let n = unsafe {
            libc::tee(seg.read.as_raw_fd(), self.write.as_raw_fd(), seg.len, libc::SPLICE_F_NONBLOCK)
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        // tee always starts at the head of the source, so a short duplicate
        // could never be completed.
        if n as usize != seg.len {
            return Err(io::Error::other(format!("tee duplicated {n} of {} bytes", seg.len)));
        }
        self.pending = seg.len;
        Ok(())
    }

    /// Splice pending bytes into `sock`. Returns how many moved.
    fn drain_into(&mut self, sock: RawFd, more: bool) -> io::Result<usize> {
        let mut flags = libc::SPLICE_F_MOVE | libc::SPLICE_F_NONBLOCK;
        if more {
            flags |= libc::SPLICE_F_MORE;
        }
        let n = unsafe {
            libc::splice(
                self.read.as_raw_fd(),
                std::ptr::null_mut(),
                sock,
                std::ptr::null_mut(),
                self.pending,
                flags,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "splice moved nothing"));
        }
        self.pending -= n as usize;
        Ok(n as usize)
    }
}

/// Serves the response from pipes filled once at startup; the payload is
/// never reread or recopied in user space per connection.
#[derive(Debug)]
pub struct PipeBroadcast {
    segments: Vec<PipeSegment>,
    total_len: u64,
    // Keeps the gifted pages mapped for as long as the segments live, and
    // backs connections that fall back to plain writes.
    region: Region,
}

impl PipeBroadcast {
    /// Copy header + file into anonymous memory and gift it, one
    /// [`SEGMENT_CAPACITY`] slice at a time, into a row of pipes.
    pub fn preload(payload: &Payload) -> Result<Self, ServeError> {
        let (region, total) = preload::load(payload)?;
        let segments = region.as_slice()[..total]
            .chunks(SEGMENT_CAPACITY)
            .map(PipeSegment::gift)
            .collect::<io::Result<Vec<_>>>()
            .map_err(ServeError::preload("vmsplice"))?;
        tracing::debug!(segments = segments.len(), bytes = total, "payload preloaded into pipes");
        Ok(PipeBroadcast {
            segments,
            total_len: total as u64,
            region,
        })
    }

    pub fn segments(&self) -> &[PipeSegment] {
        &self.segments
    }

    /// Write the rest of the response from the preloaded region.
    fn copy_out(&self, conn: &mut Connection) -> io::Result<Progress> {
        let stream = conn.stream.as_ref().ok_or_else(not_connected)?;
        let bytes = &self.region.as_slice()[..self.total_len as usize];
        let start = conn.cursor as usize;
        let mut at = start;
        let mut blocked = false;
        while at < bytes.len() {
            match (&*stream).write(&bytes[at..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => at += n,
                Err(e) if is_transient(&e) => {
                    blocked = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        let sent = (at - start) as u64;
        conn.advance_cursor(sent, self.total_len);
        metrics::add_bytes(sent);
        tracing::trace!(sent, cursor = conn.cursor, "copied from memory");
        conn.segment = at / SEGMENT_CAPACITY;
        if !blocked {
            conn.segment = self.segments.len();
            return Ok(Progress::Complete);
        }
        Ok(if sent == 0 { Progress::Blocked } else { Progress::Advanced })
    }
}

impl Transfer for PipeBroadcast {
    fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Cork so the preamble and the first body bytes share a packet.
    fn on_accept(&self, stream: &TcpStream) -> io::Result<()> {
        crate::accept::set_cork(stream, true)
    }

    fn advance(&self, conn: &mut Connection) -> io::Result<Progress> {
        if conn.copy_fallback {
            return self.copy_out(conn);
        }
        let sock = conn.stream.as_ref().ok_or_else(not_connected)?.as_raw_fd();
        let mut moved = false;

        while conn.segment < self.segments.len() {
            let seg = &self.segments[conn.segment];
            let more = conn.segment + 1 < self.segments.len();
            if conn.relay.is_none() {
                match Relay::open() {
                    Ok(relay) => conn.relay = Some(relay),
                    Err(e) if is_pipe_quota(&e) => {
                        if !QUOTA_WARNED.swap(true, Ordering::Relaxed) {
                            tracing::warn!(error = %e, "pipe quota reached, copying responses from memory");
                        }
                        conn.copy_fallback = true;
                        return match self.copy_out(conn)? {
                            Progress::Blocked if moved => Ok(Progress::Advanced),
                            progress => Ok(progress),
                        };
                    }
                    Err(e) => return Err(e),
                }
            }
            let Some(relay) = conn.relay.as_mut() else {
                return Err(not_connected());
            };
            let step = if relay.pending == 0 { relay.fill_from(seg) } else { Ok(()) }
                .and_then(|()| relay.drain_into(sock, more));
            let sent = match step {
                Ok(n) => n,
                Err(e) if is_transient(&e) => {
                    return Ok(if moved { Progress::Advanced } else { Progress::Blocked });
                }
                Err(e) => return Err(e),
            };
            let finished_segment = relay.pending == 0;

            moved = true;
            conn.advance_cursor(sent as u64, self.total_len);
            metrics::add_bytes(sent as u64);
            if finished_segment {
                conn.segment += 1;
            }
            tracing::trace!(fd = sock, sent, segment = conn.segment, "splice");
        }

        debug_assert_eq!(conn.cursor, self.total_len);
        conn.relay = None;
        Ok(Progress::Complete)
    }

    fn on_complete(&self, stream: &TcpStream) -> io::Result<()> {
        crate::accept::set_cork(stream, false)
    }
}
