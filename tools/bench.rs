//! Hammer a running `share` server and check every response is identical.

use clap::Parser;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::ExitCode;
use std::thread;
use std::time::Instant;

#[derive(Debug, Parser)]
#[command(name = "share-bench", about = "Concurrent fetch benchmark for share")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,
    /// Client threads
    #[arg(short, long, default_value_t = 50)]
    concurrency: usize,
    /// Requests per thread
    #[arg(short, long, default_value_t = 100)]
    requests: usize,
}

fn fetch(addr: &str) -> std::io::Result<Vec<u8>> {
    let mut s = TcpStream::connect(addr)?;
    s.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
    let mut buf = Vec::new();
    s.read_to_end(&mut buf)?;
    Ok(buf)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let reference = match fetch(&args.addr) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("cannot reach {}: {e}", args.addr);
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let handles: Vec<_> = (0..args.concurrency)
        .map(|_| {
            let addr = args.addr.clone();
            let reference = reference.clone();
            let requests = args.requests;
            thread::spawn(move || {
                let mut mismatches = 0usize;
                for _ in 0..requests {
                    match fetch(&addr) {
                        Ok(body) if body == reference => {}
                        _ => mismatches += 1,
                    }
                }
                mismatches
            })
        })
        .collect();
    let mismatches: usize = handles.into_iter().map(|h| h.join().unwrap_or(args.requests)).sum();
    let dur = start.elapsed();
    let total = args.concurrency * args.requests;
    println!(
        "{total} requests of {} bytes in {:.2?} => {:.2} req/s, {mismatches} mismatched",
        reference.len(),
        dur,
        total as f64 / dur.as_secs_f64()
    );
    if mismatches == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}
