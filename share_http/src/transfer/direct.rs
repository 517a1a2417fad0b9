use super::{not_connected, Progress, Transfer};
use crate::connection::Connection;
use crate::error::is_transient;
use crate::payload::Payload;
use share_core::metrics;
use std::io::{self, Write};
use std::os::fd::AsRawFd;

/// Largest count handed to one `sendfile` call.
const MAX_CHUNK: usize = 0x7fff_f000;

/// Streams the file straight from the page cache with `sendfile`.
///
/// The file is shared by every connection; each call passes an explicit
/// offset so the descriptor's own position is never used.
#[derive(Debug)]
pub struct DirectStream {
    payload: Payload,
}

impl DirectStream {
    pub fn new(payload: Payload) -> Self {
        DirectStream { payload }
    }
}

impl Transfer for DirectStream {
    fn total_len(&self) -> u64 {
        self.payload.total_len()
    }

    fn advance(&self, conn: &mut Connection) -> io::Result<Progress> {
        let total = self.payload.total_len();
        let head_len = self.payload.header_len();
        let mut moved = false;
        let sock = conn.stream.as_ref().ok_or_else(not_connected)?.as_raw_fd();

        if conn.cursor < head_len {
            let stream = conn.stream.as_ref().ok_or_else(not_connected)?;
            let rest = &self.payload.header()[conn.cursor as usize..];
            match (&*stream).write(rest) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    conn.advance_cursor(n as u64, total);
                    metrics::add_bytes(n as u64);
                    moved = true;
                }
                Err(e) if is_transient(&e) => return Ok(Progress::Blocked),
                Err(e) => return Err(e),
            }
            if conn.cursor < head_len {
                return Ok(Progress::Advanced);
            }
        }

        let remaining = total - conn.cursor;
        if remaining == 0 {
            return Ok(Progress::Complete);
        }
        let mut offset = (conn.cursor - head_len) as libc::off_t;
        let count = remaining.min(MAX_CHUNK as u64) as usize;
        let sent = unsafe {
            libc::sendfile(sock, self.payload.file().as_raw_fd(), &mut offset, count)
        };
        if sent < 0 {
            let err = io::Error::last_os_error();
            if is_transient(&err) {
                return Ok(if moved { Progress::Advanced } else { Progress::Blocked });
            }
            return Err(err);
        }
        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "payload file is shorter than announced",
            ));
        }
        conn.advance_cursor(sent as u64, total);
        metrics::add_bytes(sent as u64);
        tracing::trace!(fd = sock, sent, cursor = conn.cursor, total, "sendfile");

        Ok(if conn.cursor == total { Progress::Complete } else { Progress::Advanced })
    }
}
