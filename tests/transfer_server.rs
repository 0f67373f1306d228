use std::fs;
use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, TcpListener, TcpStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use loopshare::media::AcceptAll;
use loopshare::{ErrorKind, ServerConfig, ServerEvent, ServerState, TransferServer};

fn config(dir: &Path) -> ServerConfig {
    ServerConfig {
        bind_host: Ipv4Addr::LOCALHOST,
        preferred_port: 0,
        storage_dir: dir.to_path_buf(),
        advertise: false,
        ..ServerConfig::default()
    }
}

fn started(config: ServerConfig) -> (TransferServer, u16) {
    let mut server = TransferServer::new(config, Arc::new(AcceptAll));
    let port = server.start().unwrap();
    (server, port)
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream
}

/// Send `raw` and read until the server closes the connection.
fn exchange(port: u16, raw: &[u8]) -> String {
    let mut stream = connect(port);
    stream.write_all(raw).unwrap();
    read_response(&mut stream)
}

fn read_response(stream: &mut TcpStream) -> String {
    let mut out = Vec::new();
    stream.read_to_end(&mut out).unwrap();
    String::from_utf8_lossy(&out).into_owned()
}

fn upload_request(filename: &str, payload: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: audio/mpeg\r\n\r\n",
        filename
    )
    .into_bytes();
    body.extend_from_slice(payload);
    body.extend_from_slice(b"\r\n--XyZ--\r\n");

    let mut req = format!(
        "POST /upload HTTP/1.1\r\nHost: localhost\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    req.extend_from_slice(&body);
    req
}

fn visible_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| !n.starts_with('.'))
        .collect();
    names.sort();
    names
}

fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn serves_the_upload_page() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, port) = started(config(dir.path()));

    let resp = exchange(port, b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(resp.contains("Connection: close\r\n"));
    assert!(resp.contains("<!DOCTYPE html>"));
    assert!(resp.contains("name='file'"));
}

#[test]
fn localizes_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, port) = started(config(dir.path()));

    let resp = exchange(
        port,
        b"GET / HTTP/1.1\r\nAccept-Language: zh-TW,zh;q=0.9\r\n\r\n",
    );
    assert!(resp.contains("lang='zh-Hant'"), "{}", resp);
}

#[test]
fn unknown_path_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, port) = started(config(dir.path()));

    let resp = exchange(port, b"GET /nope HTTP/1.1\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 404 Not Found\r\n"));
    assert!(resp.ends_with("\r\n\r\nNot Found"));
}

#[test]
fn upload_is_saved_and_announced() {
    let dir = tempfile::tempdir().unwrap();
    let (server, port) = started(config(dir.path()));
    let events = server.subscribe();

    let payload = b"\x49\x44\x33\x04\x00";
    let resp = exchange(port, &upload_request("test.mp3", payload));
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert!(resp.contains("Content-Type: application/json\r\n"));
    assert!(resp.ends_with(r#"{"status":"success","message":"File uploaded successfully"}"#));

    let saved = dir.path().join("test.mp3");
    assert_eq!(fs::read(&saved).unwrap(), payload.to_vec());
    assert_eq!(visible_files(dir.path()), vec!["test.mp3"]);

    let deadline = Instant::now() + Duration::from_secs(10);
    let received = loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left).unwrap() {
            ServerEvent::FileReceived(file) => break file,
            _ => continue,
        }
    };
    assert_eq!(received.path, saved);
    assert_eq!(received.size_bytes, 5);

    let state = server.state();
    assert_eq!(state.received_file_path, Some(saved));
    assert_eq!(state.transfer_progress, 1.0);
}

#[test]
fn same_name_uploads_do_not_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, port) = started(config(dir.path()));

    for payload in [&b"one"[..], &b"two"[..]] {
        let resp = exchange(port, &upload_request("loop.wav", payload));
        assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    }
    assert_eq!(visible_files(dir.path()), vec!["loop (1).wav", "loop.wav"]);
    assert_eq!(fs::read(dir.path().join("loop (1).wav")).unwrap(), b"two".to_vec());
}

#[test]
fn oversized_upload_is_refused_before_storage() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.max_file_size = 1024;
    let (_server, port) = started(cfg);

    let resp = exchange(
        port,
        b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: 1048576\r\n\r\n",
    );
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", resp);
    assert!(resp.contains(r#""status":"error""#));
    assert!(visible_files(dir.path()).is_empty());
}

#[test]
fn upload_at_the_size_limit_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.max_file_size = 1024;
    let (_server, port) = started(cfg);

    let payload = vec![0x55u8; 1024];
    let resp = exchange(port, &upload_request("exact.wav", &payload));
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    assert_eq!(fs::read(dir.path().join("exact.wav")).unwrap(), payload);

    let resp = exchange(port, &upload_request("over.wav", &[0x55u8; 1025]));
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", resp);
    assert_eq!(visible_files(dir.path()), vec!["exact.wav"]);
}

#[test]
fn truncated_upload_is_not_saved() {
    let dir = tempfile::tempdir().unwrap();
    let (server, port) = started(config(dir.path()));

    let mut stream = connect(port);
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: 1000\r\n\r\nhello")
        .unwrap();
    stream.shutdown(Shutdown::Write).unwrap();
    let resp = read_response(&mut stream);
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{}", resp);
    assert!(visible_files(dir.path()).is_empty());
    assert_eq!(server.state().received_file_path, None);
}

#[test]
fn missing_boundary_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let (_server, port) = started(config(dir.path()));

    let resp = exchange(
        port,
        b"POST /upload HTTP/1.1\r\nContent-Type: text/plain\r\nContent-Length: 3\r\n\r\nabc",
    );
    assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(resp.ends_with(r#"{"status":"error","message":"Missing multipart boundary"}"#));
}

#[test]
fn idle_connections_time_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.idle_timeout = Duration::from_millis(300);
    let (_server, port) = started(cfg);

    let mut stream = connect(port);
    stream.write_all(b"GET / HTTP/1.1\r\n").unwrap();
    let resp = read_response(&mut stream);
    assert!(resp.starts_with("HTTP/1.1 408 Request Timeout\r\n"), "{}", resp);
}

#[test]
fn connections_over_the_limit_are_closed() {
    let dir = tempfile::tempdir().unwrap();
    let (server, port) = started(config(dir.path()));

    let held: Vec<TcpStream> = (0..5).map(|_| connect(port)).collect();
    wait_for("five active connections", || {
        server.state().active_connections.len() == 5
    });

    let mut extra = connect(port);
    let mut buf = [0u8; 16];
    match extra.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("rejected connection got {} bytes", n),
        Err(e) => assert_eq!(e.kind(), IoErrorKind::ConnectionReset),
    }
    wait_for("rejection to be counted", || {
        server.state().rejected_connections == 1
    });
    assert_eq!(server.state().active_connections.len(), 5);

    // The held connections still work.
    for mut stream in held {
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert!(read_response(&mut stream).starts_with("HTTP/1.1 200 OK\r\n"));
    }
    wait_for("connections to be released", || {
        server.state().active_connections.is_empty()
    });
}

#[test]
fn every_request_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let (server, port) = started(config(dir.path()));
    let events = server.subscribe();

    exchange(port, b"GET /missing HTTP/1.1\r\n\r\n");

    let deadline = Instant::now() + Duration::from_secs(10);
    let line = loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if let ServerEvent::Request(line) = events.recv_timeout(left).unwrap() {
            break line;
        }
    };
    assert!(line.starts_with("127.0.0.1:"));
    assert!(line.ends_with(" 404 GET  /missing"), "{:?}", line);
}

#[test]
fn stop_releases_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, port) = started(config(dir.path()));
    assert!(server.state().running);
    assert_eq!(server.url(), Some(format!("http://127.0.0.1:{}/", port)));

    server.stop();
    assert!(!server.state().running);
    assert!(server.state().active_connections.is_empty());
    assert_eq!(server.url(), None);
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();

    // Stopping twice is harmless.
    server.stop();
    assert!(!server.state().running);
}

#[test]
fn stop_closes_an_upload_in_progress() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, port) = started(config(dir.path()));

    let mut stream = connect(port);
    stream
        .write_all(b"POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XyZ\r\nContent-Length: 1000\r\n\r\n--XyZ\r\nContent-Disposition: form-data; name=\"file\"; filename=\"half.mp3\"\r\n\r\n0123456789")
        .unwrap();
    wait_for("the upload to be in progress", || {
        let state = server.state();
        state.active_connections.len() == 1 && state.transfer_progress > 0.0
    });

    server.stop();

    let mut buf = [0u8; 64];
    match stream.read(&mut buf) {
        Ok(0) => {}
        Ok(n) => panic!("stopped server sent {} bytes", n),
        Err(e) => assert_eq!(e.kind(), IoErrorKind::ConnectionReset),
    }
    assert!(visible_files(dir.path()).is_empty());
    assert!(server.state().active_connections.is_empty());
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).unwrap();
}

#[test]
fn stop_resets_the_published_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.max_connections = 1;
    let (mut server, port) = started(cfg);

    let resp = exchange(port, &upload_request("kept.mp3", b"abc"));
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{}", resp);
    wait_for("the upload connection to be released", || {
        server.state().active_connections.is_empty()
    });
    let held = connect(port);
    wait_for("the held connection", || {
        server.state().active_connections.len() == 1
    });
    let mut extra = connect(port);
    let _ = extra.read(&mut [0u8; 16]);
    wait_for("rejection to be counted", || {
        server.state().rejected_connections == 1
    });
    assert!(server.state().received_file_path.is_some());

    server.stop();
    drop(held);
    assert_eq!(server.state(), ServerState::default());

    // The saved file itself stays on disk.
    assert_eq!(visible_files(dir.path()), vec!["kept.mp3"]);
}

#[test]
fn restart_after_stop() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, _) = started(config(dir.path()));
    server.stop();
    let port = server.start().unwrap();
    let resp = exchange(port, b"GET / HTTP/1.1\r\n\r\n");
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"));
}

#[test]
fn starting_twice_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let (mut server, port) = started(config(dir.path()));
    match server.start() {
        Err(loopshare::error::ServerError::AlreadyRunning(p)) => assert_eq!(p, port),
        other => panic!("unexpected {:?}", other.map_err(|e| e.to_string())),
    }
}

#[test]
fn busy_port_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let busy = taken.local_addr().unwrap().port();
    let mut cfg = config(dir.path());
    cfg.preferred_port = busy;
    let (_server, port) = started(cfg);
    assert_ne!(port, busy);
}

#[test]
fn unusable_storage_dir_fails_start() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not-a-dir");
    fs::write(&file, b"x").unwrap();

    let mut server = TransferServer::new(config(&file), Arc::new(AcceptAll));
    let err = server.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerStartFailed);
    assert!(!server.state().running);
    assert_eq!(server.state().last_error, Some(ErrorKind::ServerStartFailed));
}

#[test]
fn subscribers_see_running_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut server = TransferServer::new(config(dir.path()), Arc::new(AcceptAll));
    let events = server.subscribe();
    let port = server.start().unwrap();

    let running = events
        .iter()
        .filter_map(|e| match e {
            ServerEvent::State(s) => Some(s),
            _ => None,
        })
        .find(|s| s.running)
        .unwrap();
    assert_eq!(running.port, port);
}
