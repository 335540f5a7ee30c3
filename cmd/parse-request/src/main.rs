//! Request parser driver
//!
//! Reads an HTTP/1.x request from stdin and feeds it to `RequestParser` in
//! fixed-size chunks, the way a socket-backed source would hand over
//! whatever `read()` returned.
//!
//! Usage:
//!     printf 'POST /x HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello' \
//!         | cargo run -p microhttp-parse-request -- [chunk_size]
//!
//! Exit status: 0 finished, 2 malformed, 3 input ended early, 1 I/O error.

use microhttp::{ParseStatus, RequestParser};
use microloop_core::env::env_get;
use microloop_core::{kdebug, kerror};

use std::io::Read;

fn main() {
    let chunk_size: usize = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| env_get("MH_CHUNK_SIZE", 16))
        .max(1);

    let mut parser = RequestParser::new();
    let mut stdin = std::io::stdin().lock();
    let mut buf = vec![0u8; chunk_size];

    while !parser.is_done() {
        let n = match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                kerror!("stdin: {}", e);
                std::process::exit(1);
            }
        };
        let status = parser.add_chunk(&buf[..n]);
        kdebug!("{} bytes -> {:?} / {:?}", n, status, parser.expected_line_type());
    }

    match parser.status() {
        ParseStatus::Finished => {
            let req = parser.request();
            println!("method:  {}", req.method());
            println!("uri:     {}", req.uri());
            println!("version: {}", req.version());
            for (name, value) in req.headers() {
                println!("header:  {}: {}", name, value);
            }
            match req.body_str() {
                Some(text) => println!("body:    {:?}", text),
                None => println!("body:    {} bytes (binary)", req.body().len()),
            }
            if !parser.leftover().is_empty() {
                println!("leftover: {} bytes", parser.leftover().len());
            }
        }
        ParseStatus::Malformed => {
            let reason = parser.error().map(ToString::to_string).unwrap_or_default();
            eprintln!("malformed request: {}", reason);
            std::process::exit(2);
        }
        status => {
            eprintln!(
                "input ended early: {:?}, expecting {:?}",
                status,
                parser.expected_line_type()
            );
            std::process::exit(3);
        }
    }
}
