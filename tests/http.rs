use socketeer::error::HttpClientError;
use socketeer::http::{self, Headers};

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

/// Serve exactly one connection with a canned response, returning the raw
/// request head the server saw.
fn one_shot_server(response: &'static [u8]) -> (u16, thread::JoinHandle<String>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let head = read_request_head(&mut peer);
        peer.write_all(response).unwrap();
        head
    });

    (port, handle)
}

fn read_request_head(peer: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0_u8; 1];

    while !head.ends_with(b"\r\n\r\n") {
        match peer.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => head.push(byte[0]),
            Err(e) => panic!("server read failed: {}", e),
        }
    }

    String::from_utf8(head).unwrap()
}

#[test]
fn content_length_body() {
    let (port, server) =
        one_shot_server(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello");

    let response = http::get(
        &format!("http://127.0.0.1:{}/", port),
        &Headers::new(),
        b"",
        false,
        None,
    )
    .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.status_message, "OK");
    assert_eq!(response.body, b"hello");
    assert_eq!(response.headers.get("content-length"), Some("5"));

    let head = server.join().unwrap();
    assert!(head.starts_with("GET / HTTP/1.1\r\n"));
    assert!(head.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
    // one-shot requests do not keep the connection alive
    assert!(head.contains("Connection: close\r\n"));
}

#[test]
fn request_line_carries_query_and_fragment() {
    let (port, server) =
        one_shot_server(b"HTTP/1.1 204 No Content\r\n\r\n");

    let response = http::get(
        &format!("http://127.0.0.1:{}/search?q=ferris#results", port),
        &Headers::new(),
        b"",
        false,
        None,
    )
    .unwrap();

    assert_eq!(response.status_code, 204);
    assert!(response.body.is_empty());

    let head = server.join().unwrap();
    assert!(head.starts_with("GET /search?q=ferris#results HTTP/1.1\r\n"));
}

#[test]
fn post_sends_content_length_and_body() {
    let (port, server) =
        one_shot_server(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

    let mut headers = Headers::new();
    headers.insert("Content-Type", "application/json");

    let response = http::post(
        &format!("http://127.0.0.1:{}/submit", port),
        &headers,
        b"{\"a\":1}",
        false,
        None,
    )
    .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.body, b"ok");

    let head = server.join().unwrap();
    assert!(head.starts_with("POST /submit HTTP/1.1\r\n"));
    assert!(head.contains("Content-Type: application/json\r\n"));
    assert!(head.contains("Content-Length: 7\r\n"));
}

#[test]
fn chunked_body_is_decoded() {
    let (port, server) = one_shot_server(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    );

    let response = http::get(
        &format!("http://127.0.0.1:{}/chunked", port),
        &Headers::new(),
        b"",
        false,
        None,
    )
    .unwrap();

    assert_eq!(response.status_code, 200);
    assert_eq!(response.text(), "hello world");
    server.join().unwrap();
}

#[test]
fn streaming_sends_chunks_to_the_sink() {
    let (port, server) =
        one_shot_server(b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world");

    let mut collected = Vec::new();
    let mut sink = |chunk: &[u8]| collected.extend_from_slice(chunk);

    let response = http::get(
        &format!("http://127.0.0.1:{}/stream", port),
        &Headers::new(),
        b"",
        true,
        Some(&mut sink),
    )
    .unwrap();

    assert_eq!(response.status_code, 200);
    assert!(response.body.is_empty());
    assert_eq!(collected, b"hello world");
    server.join().unwrap();
}

#[test]
fn keep_alive_reuses_one_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        // both requests must arrive on this one accepted socket
        let (mut peer, _) = listener.accept().unwrap();
        for expected in ["/first", "/second"] {
            let head = read_request_head(&mut peer);
            assert!(head.starts_with(&format!("GET {} HTTP/1.1\r\n", expected)));
            assert!(!head.contains("Connection: close"));
            peer.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
                .unwrap();
        }
    });

    let client = http::Client::new();

    let first = client
        .get(
            &format!("http://127.0.0.1:{}/first", port),
            &Headers::new(),
            b"",
            false,
            None,
        )
        .unwrap();
    assert_eq!(first.body, b"ok");

    let second = client
        .get(
            &format!("http://127.0.0.1:{}/second", port),
            &Headers::new(),
            b"",
            false,
            None,
        )
        .unwrap();
    assert_eq!(second.body, b"ok");

    server.join().unwrap();
}

#[test]
fn duplicate_headers_keep_the_first_value() {
    let (port, server) = one_shot_server(
        b"HTTP/1.1 200 OK\r\nX-Dup: one\r\nX-Dup: two\r\nContent-Length: 0\r\n\r\n",
    );

    let response = http::get(
        &format!("http://127.0.0.1:{}/", port),
        &Headers::new(),
        b"",
        false,
        None,
    )
    .unwrap();

    assert_eq!(response.headers.get("x-dup"), Some("one"));
    server.join().unwrap();
}

#[test]
fn malformed_status_line_is_an_error() {
    let (port, server) = one_shot_server(b"HTTP/1.1 abc OK\r\n\r\n");

    let result = http::get(
        &format!("http://127.0.0.1:{}/", port),
        &Headers::new(),
        b"",
        false,
        None,
    );

    assert!(matches!(
        result,
        Err(HttpClientError::Parse(_) | HttpClientError::BadStatusLine)
    ));
    server.join().unwrap();
}

#[test]
fn unsupported_scheme_is_rejected() {
    let result = http::get("ftp://example.com/", &Headers::new(), b"", false, None);

    assert!(matches!(result, Err(HttpClientError::InvalidScheme(s)) if s == "ftp"));
}
