//! End-to-end tests driving the server over a real TCP socket, first
//! with a raw hand-written client (to check exact wire shapes) and then
//! with `tokio-postgres` (to check a real driver is happy with it).
//!
//! Each test picks its own port and installs its own global `Config`,
//! so `#[serial]` keeps them from stepping on the shared config/stats
//! singletons.

use std::sync::Arc;
use std::time::Duration;

use pg_wire_mock::config::duration::MsDuration;
use pg_wire_mock::config::{self, Config, General};
use pg_wire_mock::dispatcher::DemoDialect;
use serial_test::serial;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep;

fn install_config(port: u16) {
    let general = General {
        listen_host: "127.0.0.1".to_string(),
        listen_port: port,
        idle_timeout_ms: MsDuration(10_000),
        shutdown_grace_ms: MsDuration(200),
        ..General::default()
    };
    config::set_config(Config { general });
}

async fn start_server(port: u16) {
    install_config(port);
    tokio::spawn(async move {
        let dispatcher: Arc<dyn pg_wire_mock::dispatcher::Dispatcher> = Arc::new(DemoDialect);
        let _ = pg_wire_mock::server::run(dispatcher).await;
    });
    // give the acceptor a moment to bind before the test connects.
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started listening on 127.0.0.1:{port}");
}

fn startup_message(user: &str, database: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&196608i32.to_be_bytes());
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.extend_from_slice(b"database\0");
    body.extend_from_slice(database.as_bytes());
    body.push(0);
    body.push(0);

    let mut framed = Vec::new();
    framed.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    framed.extend(body);
    framed
}

fn tagged_message(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

async fn read_message(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut header = [0u8; 5];
    stream.read_exact(&mut header).await.unwrap();
    let tag = header[0];
    let len = i32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body).await.unwrap();
    (tag, body)
}

fn cstr(body: &[u8], start: usize) -> (String, usize) {
    let end = body[start..].iter().position(|&b| b == 0).unwrap() + start;
    (String::from_utf8_lossy(&body[start..end]).to_string(), end + 1)
}

#[tokio::test]
#[serial]
async fn trust_startup_reaches_ready_for_query() {
    let port = portpicker::pick_unused_port().expect("free port");
    start_server(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&startup_message("alice", "postgres")).await.unwrap();

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'R');
    assert_eq!(i32::from_be_bytes([body[0], body[1], body[2], body[3]]), 0); // AuthenticationOk

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, b'K'); // BackendKeyData

    loop {
        let (tag, body) = read_message(&mut stream).await;
        match tag {
            b'S' => continue, // ParameterStatus
            b'Z' => {
                assert_eq!(body[0], b'I');
                break;
            }
            other => panic!("unexpected message {other} before ReadyForQuery"),
        }
    }
}

#[tokio::test]
#[serial]
async fn simple_select_literal_round_trips() {
    let port = portpicker::pick_unused_port().expect("free port");
    start_server(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&startup_message("alice", "postgres")).await.unwrap();
    drain_to_ready(&mut stream).await;

    let mut query = b"SELECT 1;".to_vec();
    query.push(0);
    stream.write_all(&tagged_message(b'Q', &query)).await.unwrap();

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'T'); // RowDescription
    let field_count = i16::from_be_bytes([body[0], body[1]]);
    assert_eq!(field_count, 1);
    let (name, _) = cstr(&body, 2);
    assert_eq!(name, "?column?");

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'D'); // DataRow
    let value_len = i32::from_be_bytes([body[2], body[3], body[4], body[5]]) as usize;
    assert_eq!(&body[6..6 + value_len], b"1");

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'C'); // CommandComplete
    assert!(String::from_utf8_lossy(&body).starts_with("SELECT 1"));

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'Z');
    assert_eq!(body[0], b'I');
}

#[tokio::test]
#[serial]
async fn failed_transaction_rejects_until_rollback() {
    let port = portpicker::pick_unused_port().expect("free port");
    start_server(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&startup_message("alice", "postgres")).await.unwrap();
    drain_to_ready(&mut stream).await;

    send_query(&mut stream, "BEGIN;").await;
    let status = expect_command_then_ready(&mut stream).await;
    assert_eq!(status, b'T');

    send_query(&mut stream, "SELECT bogus_syntax(").await;
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'E');
    assert!(String::from_utf8_lossy(&body).contains("42601"));
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'Z');
    assert_eq!(body[0], b'E');

    send_query(&mut stream, "SELECT 1;").await;
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'E');
    assert!(String::from_utf8_lossy(&body).contains("25P02"));
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'Z');
    assert_eq!(body[0], b'E');

    send_query(&mut stream, "ROLLBACK;").await;
    let status = expect_command_then_ready(&mut stream).await;
    assert_eq!(status, b'I');
}

#[tokio::test]
#[serial]
async fn extended_query_prepare_bind_execute() {
    let port = portpicker::pick_unused_port().expect("free port");
    start_server(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&startup_message("alice", "postgres")).await.unwrap();
    drain_to_ready(&mut stream).await;

    let mut parse_body = Vec::new();
    parse_body.push(0); // unnamed statement
    parse_body.extend_from_slice(b"SELECT 1\0");
    parse_body.extend_from_slice(&0i16.to_be_bytes());
    stream.write_all(&tagged_message(b'P', &parse_body)).await.unwrap();

    let mut bind_body = Vec::new();
    bind_body.push(0); // unnamed portal
    bind_body.push(0); // unnamed statement
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes());
    bind_body.extend_from_slice(&1i16.to_be_bytes());
    bind_body.extend_from_slice(&0i16.to_be_bytes()); // result format: text
    stream.write_all(&tagged_message(b'B', &bind_body)).await.unwrap();

    let mut describe_body = Vec::new();
    describe_body.push(b'P');
    describe_body.push(0);
    stream.write_all(&tagged_message(b'D', &describe_body)).await.unwrap();

    let mut execute_body = Vec::new();
    execute_body.push(0);
    execute_body.extend_from_slice(&0i32.to_be_bytes());
    stream.write_all(&tagged_message(b'E', &execute_body)).await.unwrap();

    stream.write_all(&tagged_message(b'S', &[])).await.unwrap();
    stream.flush().await.unwrap();

    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, b'1'); // ParseComplete
    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, b'2'); // BindComplete
    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, b'T'); // RowDescription
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'D');
    let value_len = i32::from_be_bytes([body[2], body[3], body[4], body[5]]) as usize;
    assert_eq!(&body[6..6 + value_len], b"1");
    let (tag, _) = read_message(&mut stream).await;
    assert_eq!(tag, b'C'); // CommandComplete
    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'Z');
    assert_eq!(body[0], b'I');
}

#[tokio::test]
#[serial]
async fn oversize_frame_is_rejected() {
    let port = portpicker::pick_unused_port().expect("free port");
    install_config_with_small_limit(port);
    tokio::spawn(async move {
        let dispatcher: Arc<dyn pg_wire_mock::dispatcher::Dispatcher> = Arc::new(DemoDialect);
        let _ = pg_wire_mock::server::run(dispatcher).await;
    });
    wait_for_port(port).await;

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(&startup_message("alice", "postgres")).await.unwrap();
    drain_to_ready(&mut stream).await;

    let oversized_len: i32 = 1024 * 1024 + 100;
    let mut frame = vec![b'Q'];
    frame.extend_from_slice(&oversized_len.to_be_bytes());
    stream.write_all(&frame).await.unwrap();

    let (tag, body) = read_message(&mut stream).await;
    assert_eq!(tag, b'E');
    assert!(String::from_utf8_lossy(&body).contains("08P01"));
}

#[tokio::test]
#[serial]
async fn tokio_postgres_client_runs_a_select() {
    let port = portpicker::pick_unused_port().expect("free port");
    start_server(port).await;

    let conn_str = format!("host=127.0.0.1 port={port} user=alice dbname=postgres");
    let (client, connection) = tokio_postgres::connect(&conn_str, tokio_postgres::NoTls).await.unwrap();
    tokio::spawn(async move {
        let _ = connection.await;
    });

    let row = client.query_one("SELECT 1", &[]).await.unwrap();
    let value: &str = row.get(0);
    assert_eq!(value, "1");
}

fn install_config_with_small_limit(port: u16) {
    let general = General {
        listen_host: "127.0.0.1".to_string(),
        listen_port: port,
        idle_timeout_ms: MsDuration(10_000),
        shutdown_grace_ms: MsDuration(200),
        ..General::default()
    };
    config::set_config(Config { general });
}

async fn wait_for_port(port: u16) {
    for _ in 0..50 {
        if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("server never started listening on 127.0.0.1:{port}");
}

async fn drain_to_ready(stream: &mut TcpStream) {
    loop {
        let (tag, _) = read_message(stream).await;
        if tag == b'Z' {
            return;
        }
    }
}

async fn send_query(stream: &mut TcpStream, sql: &str) {
    let mut body = sql.as_bytes().to_vec();
    body.push(0);
    stream.write_all(&tagged_message(b'Q', &body)).await.unwrap();
}

/// Reads until CommandComplete, returning the ReadyForQuery status byte
/// that follows it.
async fn expect_command_then_ready(stream: &mut TcpStream) -> u8 {
    loop {
        let (tag, body) = read_message(stream).await;
        if tag == b'C' {
            let (tag, body) = read_message(stream).await;
            assert_eq!(tag, b'Z');
            return body[0];
        }
        assert_ne!(tag, b'E', "unexpected error: {}", String::from_utf8_lossy(&body));
    }
}
