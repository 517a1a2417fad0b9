//! SIGINT/SIGTERM handling for graceful shutdown.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static TERMINATE: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sig(_sig: libc::c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Install SIGINT/SIGTERM handlers (idempotent).
///
/// No `SA_RESTART`: a blocked `epoll_wait` must return `EINTR` so the loop
/// notices the flag promptly.
pub fn init_term_signals() {
    INIT.call_once(|| unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_sig as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        let _ = libc::sigaction(libc::SIGINT, &action, std::ptr::null_mut());
        let _ = libc::sigaction(libc::SIGTERM, &action, std::ptr::null_mut());
    });
}

/// The flag flipped by the handlers; the server loop polls it.
pub fn stop_flag() -> &'static AtomicBool {
    &TERMINATE
}
