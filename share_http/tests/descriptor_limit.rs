//! Accepting while the process has no descriptors left.
//!
//! Lives in its own test binary: the limit applies to the whole process.

use share_core::config::ServeConfig;
use share_core::metrics;
use share_http::Server;
use std::fs::File;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

fn set_descriptor_limit(limit: libc::rlimit) {
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) }, 0);
}

fn descriptor_limit() -> libc::rlimit {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    assert_eq!(unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) }, 0);
    limit
}

/// Open `/dev/null` until the process runs out of descriptors.
fn exhaust_descriptors() -> Vec<File> {
    let mut held = Vec::new();
    loop {
        match File::open("/dev/null") {
            Ok(file) => held.push(file),
            Err(e) if e.raw_os_error() == Some(libc::EMFILE) => return held,
            Err(e) => panic!("unexpected open failure: {e}"),
        }
    }
}

#[test]
fn full_descriptor_table_turns_clients_away_without_spinning() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"hello\n").unwrap();
    file.flush().unwrap();
    let mut cfg = ServeConfig::new(file.path());
    cfg.port = 0;

    let original = descriptor_limit();
    set_descriptor_limit(libc::rlimit {
        rlim_cur: original.rlim_max.min(256),
        rlim_max: original.rlim_max,
    });

    let mut server = Server::from_config(&cfg).unwrap();
    let addr = server.local_addr().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handle = thread::spawn(move || server.run(&flag));

    let mut held = exhaust_descriptors();
    // One slot for the client's own socket; the server gets none.
    drop(held.pop());
    let errors_before = metrics::snapshot().errors;
    let mut refused = TcpStream::connect(addr).unwrap();
    refused.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut got = Vec::new();
    let _ = refused.read_to_end(&mut got);
    assert!(got.is_empty());

    thread::sleep(Duration::from_secs(1));
    let failed = metrics::snapshot().errors - errors_before;
    assert!((1..10).contains(&failed), "{failed} failed accepts in one second");

    // With descriptors back the same server answers normally.
    drop(held);
    drop(refused);
    let mut client = TcpStream::connect(addr).unwrap();
    client.set_read_timeout(Some(Duration::from_secs(20))).unwrap();
    let mut got = Vec::new();
    client.read_to_end(&mut got).unwrap();
    assert_eq!(got, b"HTTP/1.0 200 OK\nContent-Type: text/plain\nContent-Length: 6\n\nhello\n".to_vec());

    stop.store(true, Ordering::SeqCst);
    handle.join().unwrap().unwrap();
    set_descriptor_limit(original);
}
