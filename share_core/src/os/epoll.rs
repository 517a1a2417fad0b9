use super::interest::{Event, Interest, Token};
use std::io::{Error, ErrorKind, Result};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Largest batch a single `epoll_wait` is asked to fill.
pub const MAX_EVENTS_CEILING: usize = 1 << 16;

/// Thin owner of an epoll instance. Registrations are level-triggered.
pub struct Epoll {
    fd: OwnedFd,
    raw: Vec<libc::epoll_event>,
}

impl Epoll {
    /// `max_events` is clamped to `1..=MAX_EVENTS_CEILING`.
    pub fn new(max_events: usize) -> Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(Epoll {
            // SAFETY: epoll_create1 just returned a fresh descriptor we own.
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            raw: vec![
                libc::epoll_event { events: 0, u64: 0 };
                max_events.clamp(1, MAX_EVENTS_CEILING)
            ],
        })
    }

    pub fn add(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest)
    }

    pub fn modify(&self, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn delete(&self, fd: RawFd) -> Result<()> {
        let res = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if res < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Interest) -> Result<()> {
        let mut ev = libc::epoll_event {
            events: interest.bits(),
            u64: token as u64,
        };
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut ev) };
        if res < 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness and translate the raw batch into `out`.
    /// An interrupted wait (signal delivery) yields an empty batch.
    pub fn wait(&mut self, out: &mut Vec<Event>, timeout_ms: i32) -> Result<usize> {
        out.clear();
        let n = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                self.raw.as_mut_ptr(),
                self.raw.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for raw in self.raw.iter().take(n as usize) {
            // Copy out of the (packed on x86_64) struct before use.
            let (bits, token) = (raw.events, raw.u64);
            out.push(Event::from_bits(token as Token, bits));
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped() {
        assert_eq!(Epoll::new(0).unwrap().raw.len(), 1);
        assert_eq!(Epoll::new(usize::MAX).unwrap().raw.len(), MAX_EVENTS_CEILING);
    }
}
