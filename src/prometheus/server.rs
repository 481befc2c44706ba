//! Minimal hand-rolled HTTP server exposing `GET /metrics`. The scrape
//! body is the only contract that matters here, so this stays
//! deliberately small: no routing, no keep-alive, gzip only when the
//! client asks for it.

use std::io;

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::metrics::encode;
use crate::stats::Collector;

pub async fn serve(listen_addr: &str) -> io::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!("prometheus scrape endpoint listening on {listen_addr}");
    loop {
        let (mut stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!("prometheus accept failed: {err}");
                continue;
            }
        };
        tokio::spawn(async move {
            if let Err(err) = handle_one(&mut stream).await {
                warn!("prometheus scrape from {peer} failed: {err}");
            }
        });
    }
}

async fn handle_one(stream: &mut tokio::net::TcpStream) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);
    let wants_gzip = request
        .lines()
        .any(|l| l.to_ascii_lowercase().starts_with("accept-encoding:") && l.to_ascii_lowercase().contains("gzip"));

    let body = encode(&Collector::global().snapshot());
    let (body, content_encoding) = if wants_gzip {
        (gzip(&body), Some("gzip"))
    } else {
        (body, None)
    };

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\n",
        body.len()
    );
    if let Some(enc) = content_encoding {
        response.push_str(&format!("Content-Encoding: {enc}\r\n"));
    }
    response.push_str("Connection: close\r\n\r\n");

    stream.write_all(response.as_bytes()).await?;
    stream.write_all(&body).await?;
    stream.shutdown().await?;
    Ok(())
}

fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    std::io::Write::write_all(&mut encoder, data).expect("writing to an in-memory buffer never fails");
    encoder.finish().expect("finishing an in-memory gzip stream never fails")
}
