//! Listening socket creation and connection admission.

use crate::connection::Connection;
use crate::error::{is_transient, ServeError};
use crate::table::{ConnId, HandleTable};
use crate::transfer::Transfer;
use share_core::metrics;
use share_core::os::{EventLoop, Interest};
use std::ffi::CString;
use std::io::{self, Error};
use std::mem::size_of_val;
use std::net::{TcpListener, TcpStream};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};

/// Create a non-blocking TcpListener bound to `host:port` with SO_REUSEADDR
/// and SO_REUSEPORT enabled (several workers may share the port).
pub fn create_listener(host: &str, port: u16) -> Result<TcpListener, ServeError> {
    let addr = format!("{host}:{port}");
    let resolve_err = |source: Error| ServeError::Resolve { addr: addr.clone(), source };

    let c_host = CString::new(host)
        .map_err(|_| resolve_err(Error::new(io::ErrorKind::InvalidInput, "host contains NUL")))?;
    let c_port = CString::new(port.to_string())
        .map_err(|_| resolve_err(Error::new(io::ErrorKind::InvalidInput, "bad port")))?;

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    hints.ai_family = libc::AF_UNSPEC;
    hints.ai_socktype = libc::SOCK_STREAM;
    hints.ai_flags = libc::AI_PASSIVE | libc::AI_NUMERICSERV;
    let mut res: *mut libc::addrinfo = std::ptr::null_mut();
    let gai_ret = unsafe { libc::getaddrinfo(c_host.as_ptr(), c_port.as_ptr(), &hints, &mut res) };
    if gai_ret != 0 {
        let msg = unsafe { std::ffi::CStr::from_ptr(libc::gai_strerror(gai_ret)) };
        return Err(resolve_err(Error::new(
            io::ErrorKind::InvalidInput,
            msg.to_string_lossy().into_owned(),
        )));
    }

    let mut last_err = None;
    let mut ptr = res;
    while !ptr.is_null() {
        let ai = unsafe { &*ptr };
        ptr = ai.ai_next;
        let fd = unsafe {
            libc::socket(ai.ai_family, ai.ai_socktype | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC, ai.ai_protocol)
        };
        if fd < 0 {
            last_err = Some(ServeError::Socket { addr: addr.clone(), source: Error::last_os_error() });
            continue;
        }
        // SAFETY: fd is a fresh socket; the listener owns and closes it.
        let listener = unsafe { TcpListener::from_raw_fd(fd) };
        let on: libc::c_int = 1;
        for opt in [libc::SO_REUSEADDR, libc::SO_REUSEPORT] {
            unsafe {
                libc::setsockopt(fd, libc::SOL_SOCKET, opt, &on as *const _ as _, size_of_val(&on) as _);
            }
        }
        if unsafe { libc::bind(fd, ai.ai_addr, ai.ai_addrlen) } != 0 {
            last_err = Some(ServeError::Bind { addr: addr.clone(), source: Error::last_os_error() });
            continue;
        }
        if unsafe { libc::listen(fd, libc::SOMAXCONN) } != 0 {
            last_err = Some(ServeError::Listen { addr: addr.clone(), source: Error::last_os_error() });
            continue;
        }
        unsafe { libc::freeaddrinfo(res) };
        return Ok(listener);
    }
    unsafe { libc::freeaddrinfo(res) };
    Err(last_err.unwrap_or_else(|| {
        resolve_err(Error::new(io::ErrorKind::AddrNotAvailable, "no usable address"))
    }))
}

/// Toggle TCP_CORK: while set, partial segments are held back until a full
/// one can be sent or the cork is removed.
pub fn set_cork(stream: &TcpStream, on: bool) -> io::Result<()> {
    setsockopt_int(stream.as_raw_fd(), libc::IPPROTO_TCP, libc::TCP_CORK, on as libc::c_int)
}

fn setsockopt_int(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(fd, level, name, &value as *const _ as _, size_of_val(&value) as _)
    };
    if rc < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

/// What one accept attempt produced.
#[derive(Debug, PartialEq, Eq)]
pub enum Admission {
    Admitted { handle: RawFd, id: ConnId },
    /// Nothing pending (another worker may have taken it).
    Idle,
    /// Accepted, then failed to set up; the socket was closed.
    Rejected,
}

/// Accept one client: non-blocking socket, fresh zeroed table entry,
/// registration for write readiness.
pub fn accept_one<T: Transfer>(
    listener: &TcpListener,
    table: &mut HandleTable<Connection>,
    ev: &mut EventLoop,
    transfer: &T,
) -> io::Result<Admission> {
    let (stream, peer) = match listener.accept() {
        Ok(pair) => pair,
        Err(e) if is_transient(&e) || e.kind() == io::ErrorKind::ConnectionAborted => {
            return Ok(Admission::Idle);
        }
        Err(e) => return Err(e),
    };
    let handle = stream.as_raw_fd();
    let setup = stream
        .set_nonblocking(true)
        .and_then(|()| transfer.on_accept(&stream))
        .and_then(|()| ev.register(&stream, Interest::Writable).map(drop));
    if let Err(e) = setup {
        tracing::warn!(%peer, error = %e, "dropping connection during setup");
        metrics::inc_errors();
        return Ok(Admission::Rejected);
    }

    let capacity = table.capacity();
    if table.ensure_capacity(handle as usize) {
        metrics::inc_growths();
        tracing::info!(from = capacity, to = table.capacity(), "connection table grown");
    }
    let id = table.set(handle as usize, Connection::new(stream));
    metrics::inc_accepted();
    tracing::debug!(%peer, fd = handle, conn = %id, "accepted");
    Ok(Admission::Admitted { handle, id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnState;
    use crate::transfer::Progress;

    struct Nothing;

    impl Transfer for Nothing {
        fn total_len(&self) -> u64 {
            0
        }
        fn advance(&self, _conn: &mut Connection) -> io::Result<Progress> {
            Ok(Progress::Complete)
        }
    }

    #[test]
    fn listener_binds_ephemeral_port() {
        let listener = create_listener("127.0.0.1", 0).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn host_with_nul_is_a_resolve_error() {
        let err = create_listener("127.0.0.1\0evil", 0).unwrap_err();
        assert!(matches!(err, ServeError::Resolve { .. }), "{err:?}");
    }

    #[test]
    fn accept_without_pending_client_is_idle() {
        let listener = create_listener("127.0.0.1", 0).unwrap();
        let mut table = HandleTable::with_capacity(4);
        let mut ev = EventLoop::new(8).unwrap();
        let got = accept_one(&listener, &mut table, &mut ev, &Nothing).unwrap();
        assert_eq!(got, Admission::Idle);
        assert!(table.is_empty());
    }

    #[test]
    fn accept_registers_a_zeroed_entry_and_grows_the_table() {
        let listener = create_listener("127.0.0.1", 0).unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let mut table = HandleTable::with_capacity(1);
        let mut ev = EventLoop::new(8).unwrap();

        let mut admission = Admission::Idle;
        for _ in 0..200 {
            admission = accept_one(&listener, &mut table, &mut ev, &Nothing).unwrap();
            if admission != Admission::Idle {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        let Admission::Admitted { handle, .. } = admission else {
            panic!("client was not admitted: {admission:?}");
        };
        assert!(table.capacity() > handle as usize);
        let conn = table.get(handle as usize).unwrap();
        assert_eq!(conn.state(), ConnState::Accepted);
        assert_eq!(conn.cursor(), 0);

        let events = ev.poll(2000).unwrap();
        assert!(events.iter().any(|e| e.token == handle as usize && e.writable));
    }
}
