use socketeer::error::WebSocketClientError;
use socketeer::handshake::derive_accept_key;
use socketeer::ws::{Client, Message, Opcode, Status};

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::Duration;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

const CONTINUATION: u8 = 0x0;
const TEXT: u8 = 0x1;
const CLOSE: u8 = 0x8;
const PING: u8 = 0x9;
const PONG: u8 = 0xa;

/// Accept one TCP connection and drive the server side of the websocket
/// upgrade handshake.
fn accept_websocket(listener: &TcpListener) -> TcpStream {
    let (mut peer, _) = listener.accept().unwrap();

    let mut head = Vec::new();
    let mut byte = [0_u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        assert!(peer.read(&mut byte).unwrap() > 0, "client hung up mid-handshake");
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    assert!(head.starts_with("GET "));

    let key = head
        .split("\r\n")
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("sec-websocket-key")
                .then(|| value.trim().to_owned())
        })
        .expect("client did not send a sec-websocket-key");

    let accept = derive_accept_key(key.as_bytes());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        std::str::from_utf8(&accept).unwrap()
    );
    peer.write_all(response.as_bytes()).unwrap();
    peer
}

/// Read one client frame, asserting it is masked, and return the opcode,
/// the fin flag and the unmasked payload.
fn read_frame(peer: &mut TcpStream) -> (u8, bool, Vec<u8>) {
    let mut head = [0_u8; 2];
    peer.read_exact(&mut head).unwrap();

    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0f;
    let masked = head[1] & 0x80 != 0;
    assert!(masked, "client frames must be masked");

    let mut len = (head[1] & 0x7f) as u64;
    if len == 126 {
        let mut ext = [0_u8; 2];
        peer.read_exact(&mut ext).unwrap();
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0_u8; 8];
        peer.read_exact(&mut ext).unwrap();
        len = u64::from_be_bytes(ext);
    }

    let mut key = [0_u8; 4];
    peer.read_exact(&mut key).unwrap();

    let mut payload = vec![0_u8; len as usize];
    peer.read_exact(&mut payload).unwrap();
    for (i, b) in payload.iter_mut().enumerate() {
        *b ^= key[i & 0x03];
    }

    (opcode, fin, payload)
}

/// Write one unmasked server frame.
fn write_frame(peer: &mut TcpStream, opcode: u8, fin: bool, payload: &[u8]) {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(if fin { 0x80 | opcode } else { opcode });

    if payload.len() < 126 {
        frame.push(payload.len() as u8);
    } else if payload.len() < 65536 {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }

    frame.extend_from_slice(payload);
    peer.write_all(&frame).unwrap();
}

/// Answer heartbeat pings until a frame with another opcode shows up.
fn read_data_frame(peer: &mut TcpStream) -> (u8, bool, Vec<u8>) {
    loop {
        let (opcode, fin, payload) = read_frame(peer);
        if opcode == PING {
            write_frame(peer, PONG, true, &payload);
            continue;
        }
        return (opcode, fin, payload);
    }
}

/// A client wired to a channel collecting every callback invocation.
fn channelled_client(url: &str) -> (Client, Receiver<Message>) {
    let _ = env_logger::builder().is_test(true).try_init();

    let (tx, rx) = mpsc::channel();
    let client = Client::new(url);
    client.set_automatic_reconnect(false);
    client.set_on_message(move |message| {
        let _ = tx.send(message.clone());
    });
    (client, rx)
}

#[test]
fn echo_session() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);

        let (opcode, fin, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, TEXT);
        assert!(fin);
        assert_eq!(payload, b"ping");
        write_frame(&mut peer, TEXT, true, &payload);

        // reciprocate the client's close, echoing code and reason
        let (opcode, _, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, CLOSE);
        assert_eq!(&payload[..2], &1000_u16.to_be_bytes());
        assert_eq!(&payload[2..], b"bye");
        write_frame(&mut peer, CLOSE, true, &payload);
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();

    let open = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(open.opcode, Opcode::Open);
    assert!(open.data.starts_with("Connected to: ws://"));

    assert!(client.send("ping"));

    let echoed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(echoed.opcode, Opcode::Text);
    assert_eq!(echoed.data, "ping");
    assert_eq!(echoed.code, 0);

    client.close(1000, "bye");

    let closed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(closed.opcode, Opcode::Close);
    assert_eq!(closed.data, "bye");
    assert_eq!(closed.code, 1000);

    // the close message is the last callback of the session
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(client.status(), Status::Closed);
    server.join().unwrap();
}

#[test]
fn fragmented_message_is_delivered_once() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);

        write_frame(&mut peer, TEXT, false, b"Hel");
        write_frame(&mut peer, CONTINUATION, true, b"lo");

        let (opcode, _, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, CLOSE);
        write_frame(&mut peer, CLOSE, true, &payload);
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Open);

    let message = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message.opcode, Opcode::Continuation);
    assert_eq!(message.data, "Hello");

    client.close(1000, "");

    let closed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(closed.opcode, Opcode::Close);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    server.join().unwrap();
}

#[test]
fn frame_split_across_reads_is_reassembled() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);

        // dribble one TEXT frame out a byte at a time so the client sees
        // partial heads and a leftover byte between receive calls
        let frame: &[u8] = &[0x81, 0x05, b'H', b'e', b'l', b'l', b'o'];
        for byte in frame {
            peer.write_all(&[*byte]).unwrap();
            thread::sleep(Duration::from_millis(20));
        }

        let (opcode, _, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, CLOSE);
        write_frame(&mut peer, CLOSE, true, &payload);
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Open);

    let message = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(message.opcode, Opcode::Text);
    assert_eq!(message.data, "Hello");

    client.close(1000, "");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Close);
    server.join().unwrap();
}

#[test]
fn server_ping_is_answered_with_a_pong() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);

        write_frame(&mut peer, PING, true, b"hb");

        // the pong must echo our payload; skip the client's own heartbeats
        loop {
            let (opcode, _, payload) = read_frame(&mut peer);
            match opcode {
                PING => write_frame(&mut peer, PONG, true, &payload),
                PONG => {
                    assert_eq!(payload, b"hb");
                    break;
                }
                other => panic!("unexpected opcode {}", other),
            }
        }

        let (opcode, _, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, CLOSE);
        write_frame(&mut peer, CLOSE, true, &payload);
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Open);

    let ping = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(ping.opcode, Opcode::Ping);
    assert_eq!(ping.data, "hb");

    client.close(1000, "");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Close);
    server.join().unwrap();
}

#[test]
fn server_initiated_close_reports_code_and_reason() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);

        let mut payload = 1000_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        write_frame(&mut peer, CLOSE, true, &payload);

        // the client reciprocates before tearing down; skip its heartbeats
        // without answering, since the session is already going away
        loop {
            let (opcode, _, _) = read_frame(&mut peer);
            if opcode == CLOSE {
                break;
            }
        }
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();

    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Open);

    let closed = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(closed.opcode, Opcode::Close);
    assert_eq!(closed.data, "bye");
    assert_eq!(closed.code, 1000);
    assert_eq!(client.status(), Status::Closed);
    server.join().unwrap();
}

#[test]
fn rejected_upgrade_leaves_the_client_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let (mut peer, _) = listener.accept().unwrap();
        let mut head = Vec::new();
        let mut byte = [0_u8; 1];
        while !head.ends_with(b"\r\n\r\n") {
            if peer.read(&mut byte).unwrap() == 0 {
                break;
            }
            head.push(byte[0]);
        }
        peer.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));

    // blocking start returns once the handshake is refused
    client.start().unwrap();

    assert_eq!(client.status(), Status::Closed);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    server.join().unwrap();
}

#[test]
fn non_websocket_scheme_is_refused() {
    let (client, rx) = channelled_client("http://127.0.0.1:1/");

    client.start().unwrap();

    assert_eq!(client.status(), Status::Closed);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn start_without_url_is_an_error() {
    let client = Client::new("");

    assert_eq!(client.start(), Err(WebSocketClientError::MissingUrl));
    assert_eq!(client.start_async(), Err(WebSocketClientError::MissingUrl));
}

#[test]
fn start_async_spawns_only_one_worker() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = thread::spawn(move || {
        let mut peer = accept_websocket(&listener);
        let (opcode, _, payload) = read_data_frame(&mut peer);
        assert_eq!(opcode, CLOSE);
        write_frame(&mut peer, CLOSE, true, &payload);
        // a second worker would show up as a second connection attempt
        listener
            .set_nonblocking(true)
            .expect("failed to switch the listener");
        assert!(listener.accept().is_err());
    });

    let (client, rx) = channelled_client(&format!("ws://127.0.0.1:{}/", port));
    client.start_async().unwrap();
    client.start_async().unwrap();

    let open = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(open.opcode, Opcode::Open);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    client.close(1000, "");
    assert_eq!(rx.recv_timeout(RECV_TIMEOUT).unwrap().opcode, Opcode::Close);
    server.join().unwrap();
}

#[test]
fn sending_requires_an_open_session() {
    let client = Client::new("ws://127.0.0.1:1/");
    assert!(!client.send("too early"));
}
