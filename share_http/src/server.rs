//! Single-threaded dispatcher: waits for readiness and routes each event to
//! the acceptor, the active writer, or connection retirement.

use crate::accept::{accept_one, create_listener, Admission};
use crate::connection::{ConnState, Connection};
use crate::error::{is_descriptor_exhaustion, is_transient, ServeError};
use crate::payload::Payload;
use crate::table::HandleTable;
use crate::transfer::{Kind, Progress, Strategy, Transfer};
use share_core::config::ServeConfig;
use share_core::metrics;
use share_core::os::{Event, EventLoop, Interest, Token};
use std::fs::File;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Upper bound on one readiness wait, so the stop flag and idle sweeps are
/// looked at even when nothing happens.
const WAIT_MS: i32 = 250;
const SWEEP_EVERY: Duration = Duration::from_secs(1);
/// Reads spent discarding request bytes before a close.
const MAX_DISCARD_READS: usize = 16;
/// How long the listener stays unwatched when not even the reserve
/// descriptor could be reopened.
const ACCEPT_PAUSE: Duration = Duration::from_secs(1);
const LIMIT_WARN_EVERY: Duration = Duration::from_secs(5);

pub struct Server {
    listener: TcpListener,
    ev: EventLoop,
    table: HandleTable<Connection>,
    strategy: Strategy,
    idle_timeout: Option<Duration>,
    last_sweep: Instant,
    batch: Vec<Event>,
    /// Held open so one descriptor can be freed to turn a client away when
    /// the descriptor table is full.
    reserve: Option<File>,
    accept_paused_at: Option<Instant>,
    last_limit_warning: Option<Instant>,
}

impl Server {
    /// Open the payload, pick and prepare the strategy, bind the listener.
    pub fn from_config(cfg: &ServeConfig) -> Result<Self, ServeError> {
        let payload = Payload::open(&cfg.file, &cfg.mimetype)?;
        let kind = Kind::select(payload.total_len(), cfg.pipe_threshold);
        tracing::info!(
            file = %payload.path().display(),
            size = payload.file_len(),
            mimetype = payload.mimetype(),
            strategy = %kind,
            "serving"
        );
        let strategy = Strategy::prepare(payload, kind)?;
        Self::bind(cfg, strategy)
    }

    pub fn bind(cfg: &ServeConfig, strategy: Strategy) -> Result<Self, ServeError> {
        let listener = create_listener(&cfg.host, cfg.port)?;
        let mut ev = EventLoop::new(cfg.max_events).map_err(ServeError::poller("epoll_create1"))?;
        ev.register(&listener, Interest::Readable)
            .map_err(ServeError::poller("registering listener"))?;
        Ok(Server {
            listener,
            ev,
            table: HandleTable::new(),
            strategy,
            idle_timeout: cfg.idle_timeout(),
            last_sweep: Instant::now(),
            batch: Vec::with_capacity(cfg.max_events),
            reserve: open_reserve(),
            accept_paused_at: None,
            last_limit_warning: None,
        })
    }

    /// Start from a table of `capacity` entries instead of the default.
    pub fn with_table_capacity(mut self, capacity: usize) -> Self {
        self.table = HandleTable::with_capacity(capacity);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn kind(&self) -> Kind {
        self.strategy.kind()
    }

    pub fn table(&self) -> &HandleTable<Connection> {
        &self.table
    }

    /// Serve until `stop` is raised, then close every connection.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), ServeError> {
        while !stop.load(Ordering::SeqCst) {
            let mut batch = std::mem::take(&mut self.batch);
            batch.clear();
            batch.extend_from_slice(self.ev.poll(WAIT_MS).map_err(ServeError::Wait)?);
            for event in &batch {
                self.dispatch(*event);
            }
            self.batch = batch;
            self.sweep_idle();
            self.resume_accepting(false);
        }

        let live: Vec<usize> = self.table.handles().collect();
        for handle in live {
            self.retire(handle as RawFd, "shutdown");
        }
        tracing::info!(summary = %metrics::render(), "stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: Event) {
        if event.token == self.listener.as_raw_fd() as Token {
            self.accept();
            return;
        }
        let handle = event.token as RawFd;
        let Some(conn) = self.table.get(event.token) else {
            return;
        };
        let state = conn.state();
        if event.is_terminal() {
            self.retire(handle, if event.error { "socket error" } else { "peer hung up" });
        } else if state == ConnState::ShutdownPending {
            if event.readable {
                self.discard_request(handle);
            }
        } else if event.writable {
            self.write(handle);
        }
    }

    fn accept(&mut self) {
        match accept_one(&self.listener, &mut self.table, &mut self.ev, &self.strategy) {
            Ok(Admission::Admitted { .. } | Admission::Idle | Admission::Rejected) => {}
            Err(e) if is_descriptor_exhaustion(&e) => self.turn_away(e),
            Err(e) => {
                metrics::inc_errors();
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }

    /// Out of descriptors. The client stays in the backlog and keeps the
    /// listener readable, so spend the reserve to accept and close it.
    fn turn_away(&mut self, err: io::Error) {
        metrics::inc_errors();
        let now = Instant::now();
        if self.last_limit_warning.is_none_or(|at| now.duration_since(at) >= LIMIT_WARN_EVERY) {
            self.last_limit_warning = Some(now);
            tracing::warn!(error = %err, live = self.table.len(), "descriptor limit reached, turning clients away");
        } else {
            tracing::debug!(error = %err, "descriptor limit reached");
        }

        if self.reserve.take().is_some() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "turned away");
                    drop(stream);
                }
                Err(e) => tracing::debug!(error = %e, "accept on the reserve descriptor failed"),
            }
            self.reserve = open_reserve();
        }
        if self.reserve.is_none() {
            self.pause_accepting(now);
        }
    }

    fn pause_accepting(&mut self, now: Instant) {
        if self.accept_paused_at.is_some() {
            return;
        }
        match self.ev.deregister(self.listener.as_raw_fd()) {
            Ok(()) => {
                self.accept_paused_at = Some(now);
                tracing::debug!("listener paused");
            }
            Err(e) => tracing::warn!(error = %e, "could not pause the listener"),
        }
    }

    /// Watch the listener again once the pause is over, or right away when
    /// `freed` says a connection just gave back its descriptor.
    fn resume_accepting(&mut self, freed: bool) {
        let Some(at) = self.accept_paused_at else {
            return;
        };
        if !freed && at.elapsed() < ACCEPT_PAUSE {
            return;
        }
        if self.reserve.is_none() {
            self.reserve = open_reserve();
        }
        match self.ev.register(&self.listener, Interest::Readable) {
            Ok(_) => {
                self.accept_paused_at = None;
                tracing::debug!("listener resumed");
            }
            Err(e) => tracing::debug!(error = %e, "listener stays paused"),
        }
    }

    fn write(&mut self, handle: RawFd) {
        let Some(conn) = self.table.get_mut(handle as usize) else {
            return;
        };
        conn.state = ConnState::Sending;
        match self.strategy.advance(conn) {
            Ok(Progress::Complete) => self.finish(handle),
            Ok(Progress::Advanced | Progress::Blocked) => {}
            Err(e) => {
                metrics::inc_errors();
                tracing::warn!(fd = handle, error = %e, "transfer failed, retiring connection");
                self.retire(handle, "transfer error");
            }
        }
    }

    /// All bytes are with the kernel: half-close and wait for the peer.
    fn finish(&mut self, handle: RawFd) {
        let Some(conn) = self.table.get_mut(handle as usize) else {
            return;
        };
        conn.state = ConnState::ShutdownPending;
        metrics::inc_completed();
        let Some(stream) = conn.stream.as_ref() else {
            return;
        };
        if let Err(e) = self.strategy.on_complete(stream) {
            tracing::debug!(fd = handle, error = %e, "uncork failed");
        }
        let switched = stream
            .shutdown(Shutdown::Write)
            .and_then(|()| self.ev.reregister(handle, Interest::PeerClosed));
        match switched {
            Ok(()) => tracing::debug!(fd = handle, "response complete, write side closed"),
            Err(e) => {
                tracing::debug!(fd = handle, error = %e, "half-close failed");
                self.retire(handle, "half-close failed");
            }
        }
    }

    /// Read and drop whatever the client sent after the response.
    fn discard_request(&mut self, handle: RawFd) {
        let Some(conn) = self.table.get_mut(handle as usize) else {
            return;
        };
        let Some(stream) = conn.stream.as_ref() else {
            return;
        };
        match discard_input(stream) {
            Ok(Drained::Open(0)) => {}
            Ok(Drained::Open(_)) => conn.touch(),
            Ok(Drained::Eof) => self.retire(handle, "peer closed"),
            Err(e) => {
                tracing::debug!(fd = handle, error = %e, "reading from client failed");
                self.retire(handle, "read error");
            }
        }
    }

    /// Close the socket and reset its table entry for handle reuse.
    fn retire(&mut self, handle: RawFd, reason: &str) {
        let Some(id) = self.table.id(handle as usize) else {
            return;
        };
        let Some(conn) = self.table.remove(handle as usize) else {
            return;
        };
        if let Some(stream) = conn.stream {
            // Unread input would turn the close into a reset and could cut
            // off response bytes still queued on our side.
            let _ = discard_input(&stream);
            let _ = self.ev.deregister(handle);
            drop(stream);
        }
        metrics::inc_retired();
        tracing::debug!(fd = handle, conn = %id, cursor = conn.cursor, state = ?conn.state, reason, "retired");
        self.resume_accepting(true);
    }

    fn sweep_idle(&mut self) {
        let Some(limit) = self.idle_timeout else {
            return;
        };
        let now = Instant::now();
        if now.duration_since(self.last_sweep) < SWEEP_EVERY {
            return;
        }
        self.last_sweep = now;
        let stalled: Vec<usize> = self
            .table
            .handles()
            .filter(|&h| self.table.get(h).is_some_and(|c| c.is_stalled(now, limit)))
            .collect();
        for handle in stalled {
            self.retire(handle as RawFd, "idle timeout");
        }
    }
}

fn open_reserve() -> Option<File> {
    match File::open("/dev/null") {
        Ok(file) => Some(file),
        Err(e) => {
            tracing::debug!(error = %e, "no reserve descriptor");
            None
        }
    }
}

enum Drained {
    /// Still open; this many bytes were thrown away.
    Open(usize),
    Eof,
}

fn discard_input(stream: &TcpStream) -> io::Result<Drained> {
    let mut buf = [0u8; 4096];
    let mut total = 0;
    for _ in 0..MAX_DISCARD_READS {
        match (&*stream).read(&mut buf) {
            Ok(0) => return Ok(Drained::Eof),
            Ok(n) => total += n,
            Err(e) if is_transient(&e) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(Drained::Open(total))
}
