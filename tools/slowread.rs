//! Read a response one byte at a time, to watch a stalled client by hand.

use clap::Parser;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "share-slowread", about = "Deliberately slow client for share")]
struct Args {
    /// Server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: String,
    /// Pause between bytes, in milliseconds
    #[arg(long, default_value_t = 300)]
    delay_ms: u64,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();
    let mut stream = TcpStream::connect(&args.addr)?;
    stream.write_all(b"GET / HTTP/1.0\r\n\r\n")?;
    let mut out = std::io::stdout();
    let mut byte = [0u8; 1];
    while stream.read(&mut byte)? == 1 {
        out.write_all(&byte)?;
        out.flush()?;
        thread::sleep(Duration::from_millis(args.delay_ms));
    }
    Ok(())
}
