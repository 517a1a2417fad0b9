//! Setup failures and per-connection error classification.

use std::io;
use std::path::PathBuf;

/// Fatal errors raised before the loop starts (or by the readiness wait
/// itself). Each variant names the operation that failed.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("opening payload {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("stat on payload {path}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("reading payload {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("resolving {addr}")]
    Resolve {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("creating socket for {addr}")]
    Socket {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("binding {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("listening on {addr}")]
    Listen {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("readiness monitor: {op}")]
    Poller {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("preloading payload into pipes: {op}")]
    Preload {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("waiting for readiness")]
    Wait(#[source] io::Error),
}

impl ServeError {
    pub(crate) fn poller(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| ServeError::Poller { op, source }
    }

    pub(crate) fn preload(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| ServeError::Preload { op, source }
    }
}

/// "Not ready" or "peer reset": defer to the next readiness signal.
/// A reset peer is reported as a hang-up on that next signal and retired
/// there.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

/// The process or system descriptor table is full (EMFILE, ENFILE).
pub fn is_descriptor_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
}
