use super::flag::EventFlag;
use super::{Message, MessageCallback, Opcode, Status};

use crate::error::{TransportError, WebSocketClientError};
use crate::frame::{self, Fin, FrameHead, Mask, OpCode};
use crate::handshake::{derive_accept_key, new_sec_key};
use crate::http;
use crate::uri::Uri;

use log::{debug, trace, warn};

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Ping cadence while the session is open.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered pings tolerated before the session is torn down.
const MAX_MISSED_HEARTBEATS: u8 = 3;

/// How long a half-closed session waits for the server's close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Sentinel ping payload; matching pongs are consumed internally.
const HEARTBEAT_PAYLOAD: &[u8] = b"--heartbeat--";

/// Read-watcher poll bound while the close handshake is pending.
const CLOSING_POLL_MS: i32 = 50;

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
fn text_of(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Mutable per-session state, all under one lock.
#[derive(Default)]
struct Session {
    /// Bytes assembled from the continuation frames of one logical message.
    read_accumulator: Vec<u8>,
    /// At most one trailing byte carried between receive calls.
    leftover_byte: Option<u8>,
    /// Already-framed, already-masked outbound buffers.
    write_queue: VecDeque<Vec<u8>>,
    client_closed: bool,
    server_closed: bool,
    /// Close code and reason reported by the server, if any.
    close_message: Option<Message>,
    /// Instant after which a half-closed connection is abandoned.
    close_deadline: Option<Instant>,
    /// Frame bytes that arrived piggybacked on the handshake response.
    handshake_residue: Vec<u8>,
}

impl Session {
    fn reset(&mut self) {
        *self = Session::default();
    }
}

struct Shared {
    http: http::Client,
    status: AtomicU8,
    reconnect: AtomicBool,
    missed_heartbeats: AtomicU8,
    url: Mutex<String>,
    session: Mutex<Session>,
    callback: Mutex<Option<MessageCallback>>,
    /// There is work for the poller.
    activity: EventFlag,
    /// The socket is readable; cleared by the poller once drained.
    read_ready: EventFlag,
    /// A heartbeat ping is queued; cleared by the poller once on the wire.
    heartbeat_inflight: EventFlag,
    heartbeat_mtx: Mutex<()>,
    heartbeat_cv: Condvar,
}

/// A websocket client.
///
/// Construct with a `ws://` or `wss://` url, register a callback, then call
/// [`start`](Self::start) (blocking) or [`start_async`](Self::start_async).
/// Dropping the client requests a close but does not wait for the session
/// to finish.
pub struct Client {
    shared: Arc<Shared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Client {
    pub fn new(url: &str) -> Self {
        Self {
            shared: Arc::new(Shared {
                http: http::Client::new(),
                status: AtomicU8::new(Status::Closed as u8),
                reconnect: AtomicBool::new(true),
                missed_heartbeats: AtomicU8::new(0),
                url: Mutex::new(url.to_owned()),
                session: Mutex::new(Session::default()),
                callback: Mutex::new(None),
                activity: EventFlag::new(),
                read_ready: EventFlag::new(),
                heartbeat_inflight: EventFlag::new(),
                heartbeat_mtx: Mutex::new(()),
                heartbeat_cv: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn get_url(&self) -> String {
        lock(&self.shared.url).clone()
    }

    pub fn set_url(&self, url: &str) {
        *lock(&self.shared.url) = url.to_owned();
    }

    pub fn get_automatic_reconnect(&self) -> bool {
        self.shared.reconnect.load(Ordering::Acquire)
    }

    /// When enabled (the default), `start` re-enters the connect loop every
    /// time the session reaches `Closed`.
    pub fn set_automatic_reconnect(&self, reconnect: bool) {
        self.shared.reconnect.store(reconnect, Ordering::Release);
    }

    /// Replace the message callback.
    ///
    /// The callback runs on a worker thread. It may call [`send`](Self::send)
    /// and [`close`](Self::close), but must not call `set_on_message`.
    pub fn set_on_message(&self, callback: impl FnMut(&Message) + Send + 'static) {
        *lock(&self.shared.callback) = Some(Box::new(callback));
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    /// Queue a TEXT frame. Returns false unless the session is open or
    /// closing.
    pub fn send(&self, message: &str) -> bool {
        self.shared.send_data(OpCode::Text, message.as_bytes())
    }

    /// Send a CLOSE frame with `code` and `reason` and move to `Closing`.
    /// The session finishes once the server reciprocates or the close
    /// deadline passes.
    pub fn close(&self, code: u16, reason: &str) {
        self.shared.close(code, reason);
    }

    /// Connect and run the session on the calling thread, reconnecting as
    /// configured. Returns once the session ends for good.
    pub fn start(&self) -> Result<(), WebSocketClientError> {
        Shared::run(&self.shared)
    }

    /// Run [`start`](Self::start) on a dedicated thread. Only the first call
    /// spawns; later calls are no-ops.
    pub fn start_async(&self) -> Result<(), WebSocketClientError> {
        if lock(&self.shared.url).is_empty() {
            return Err(WebSocketClientError::MissingUrl);
        }

        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        *worker = Some(thread::spawn(move || {
            if let Err(e) = Shared::run(&shared) {
                warn!("websocket worker exited: {}", e);
            }
        }));
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.set_automatic_reconnect(false);
        self.close(1000, "");
    }
}

impl Shared {
    fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: Status) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// The connect-then-run loop behind `start`.
    fn run(shared: &Arc<Shared>) -> Result<(), WebSocketClientError> {
        loop {
            if !shared.connect()? {
                return Ok(());
            }

            thread::scope(|s| {
                s.spawn(|| shared.heartbeat_loop());
                s.spawn(|| shared.read_loop());

                let url = lock(&shared.url).clone();
                shared.dispatch(&Message::new(Opcode::Open, format!("Connected to: {}", url)));

                // frames that rode in behind the 101 response
                let residue = std::mem::take(&mut lock(&shared.session).handshake_residue);
                if !residue.is_empty() {
                    if let Err(e) = shared.process_data(residue) {
                        debug!("failed processing handshake residue: {}", e);
                    }
                }

                while shared.status() != Status::Closed {
                    shared.activity.wait_set();
                    shared.activity.clear();
                    shared.poll_once();
                }
            });

            if !shared.reconnect.load(Ordering::Acquire) {
                return Ok(());
            }
            debug!("reconnecting");
        }
    }

    /// Perform the upgrade handshake. True exactly when the session reached
    /// `Open`; every failure leaves it `Closed`.
    fn connect(&self) -> Result<bool, WebSocketClientError> {
        match self.status() {
            Status::Connecting | Status::Open => return Ok(false),
            _ => {}
        }

        let url = lock(&self.url).clone();
        if url.is_empty() {
            return Err(WebSocketClientError::MissingUrl);
        }

        self.set_status(Status::Connecting);

        let mut uri = Uri::parse(&url);
        if uri.scheme != "ws" && uri.scheme != "wss" {
            debug!("refusing to connect, not a websocket url: {}", url);
            self.set_status(Status::Closed);
            return Ok(false);
        }

        // the handshake itself is plain http
        uri.scheme = if uri.scheme == "ws" { "http" } else { "https" }.to_owned();

        let sec_key = new_sec_key();
        let sec_accept = derive_accept_key(&sec_key);

        let mut headers = http::Headers::new();
        headers.insert("Connection", "Upgrade");
        headers.insert("Upgrade", "websocket");
        headers.insert("Sec-WebSocket-Version", "13");
        headers.insert("Sec-WebSocket-Key", text_of(&sec_key));

        let response = match self.http.get(&uri.to_string(), &headers, b"", false, None) {
            Ok(response) => response,
            Err(e) => {
                debug!("handshake request failed: {}", e);
                self.set_status(Status::Closed);
                return Ok(false);
            }
        };

        let upgraded = response.status_code == 101
            && response
                .headers
                .get("Upgrade")
                .map(|v| v.eq_ignore_ascii_case("websocket"))
                .unwrap_or(false)
            && response
                .headers
                .get("Connection")
                .map(|v| v.eq_ignore_ascii_case("upgrade"))
                .unwrap_or(false)
            && response
                .headers
                .get("Sec-WebSocket-Accept")
                .map(|v| v.as_bytes() == &sec_accept[..])
                .unwrap_or(false);

        if !upgraded {
            debug!("handshake rejected, status {}", response.status_code);
            self.set_status(Status::Closed);
            return Ok(false);
        }

        if !response.body.is_empty() {
            lock(&self.session).handshake_residue = response.body;
        }

        self.missed_heartbeats.store(0, Ordering::Release);
        self.set_status(Status::Open);
        debug!("websocket open: {}", url);
        Ok(true)
    }

    /// Frame, mask and queue one outbound payload, then wake the poller.
    fn send_data(&self, opcode: OpCode, payload: &[u8]) -> bool {
        match self.status() {
            Status::Open | Status::Closing => {}
            _ => return false,
        }

        let framed = frame::encode_masked(Fin::Y, opcode, payload);
        lock(&self.session).write_queue.push_back(framed);
        self.activity.set();

        trace!("queued {:?} frame, {} byte payload", opcode, payload.len());
        true
    }

    fn close(&self, code: u16, reason: &str) {
        match self.status() {
            Status::Closing | Status::Closed => return,
            _ => {}
        }

        self.set_status(Status::Closing);

        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        self.send_data(OpCode::Close, &payload);
    }

    /// Immediate teardown: close the transport, clear all session state,
    /// deliver the final close message and wake every worker.
    ///
    /// Exactly one caller wins the transition to `Closed`; the final close
    /// message is delivered once per session.
    fn disconnect(&self, close_message: Message) {
        let won = [Status::Open, Status::Closing].iter().any(|&from| {
            self.status
                .compare_exchange(
                    from as u8,
                    Status::Closed as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        });
        if !won {
            return;
        }

        if let Err(e) = self.http.ssl().close() {
            warn!("error closing websocket transport: {}", e);
        }

        lock(&self.session).reset();

        debug!("disconnected: {}", close_message.data);
        self.dispatch(&close_message);

        self.activity.set();
        self.heartbeat_inflight.clear();
        self.read_ready.clear();
        self.heartbeat_cv.notify_all();
    }

    /// Hand a message to the user callback, isolating panics.
    fn dispatch(&self, message: &Message) {
        let mut guard = lock(&self.callback);
        if let Some(callback) = guard.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| callback(message))).is_err() {
                warn!("message callback panicked on {:?}", message.opcode);
            }
        }
    }

    /// One poller cycle: drain readable data, flush the write queue, then
    /// check the close conditions.
    fn poll_once(&self) {
        if self.status() == Status::Closed {
            return;
        }

        if self.read_ready.is_set() {
            match self.http.ssl().receive(crate::ssl::DEFAULT_BUFFER_SIZE) {
                Ok(data) if !data.is_empty() => {
                    if let Err(e) = self.process_data(data) {
                        debug!("frame processing stopped: {}", e);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("websocket receive failed: {}", e),
            }
        }

        self.flush_writes();

        let close_with = {
            let mut session = lock(&self.session);

            let reason = if session.client_closed && session.server_closed {
                Some("Mutual disconnection.")
            } else if session.client_closed
                && session
                    .close_deadline
                    .map(|d| Instant::now() > d)
                    .unwrap_or(false)
            {
                Some("Connection closed because server took too long to send close frame.")
            } else if !self.http.ssl().connected() {
                Some("No longer connected to the socket.")
            } else {
                None
            };

            reason.map(|reason| {
                session
                    .close_message
                    .take()
                    .unwrap_or_else(|| Message::new(Opcode::Close, reason))
            })
        };

        if let Some(message) = close_with {
            self.disconnect(message);
            return;
        }

        self.read_ready.clear();
    }

    /// Send every queued frame, oldest first. A flushed CLOSE frame marks
    /// the session half-closed, arms the close deadline and abandons
    /// everything queued behind it.
    fn flush_writes(&self) {
        loop {
            let Some(framed) = lock(&self.session).write_queue.pop_front() else {
                break;
            };

            let mut sent = 0;
            while sent < framed.len() {
                match self.http.ssl().send(&framed[sent..]) {
                    Ok(n) => sent += n,
                    Err(e) => {
                        debug!("websocket send failed: {}", e);
                        return;
                    }
                }
            }

            let opcode = framed[0] & 0x0f;
            if opcode == OpCode::Close as u8 {
                trace!("close frame on the wire");
                let mut session = lock(&self.session);
                session.client_closed = true;
                session.close_deadline = Some(Instant::now() + CLOSE_TIMEOUT);
                session.write_queue.clear();
            } else if opcode == OpCode::Ping as u8 {
                // tell the heartbeat its ping went out
                self.heartbeat_inflight.clear();
            }
        }
    }

    /// Consume every complete frame in `data`, topping the buffer up from
    /// the transport when a head or payload is split across reads.
    fn process_data(&self, mut data: Vec<u8>) -> Result<(), TransportError> {
        {
            let mut session = lock(&self.session);
            if let Some(byte) = session.leftover_byte.take() {
                data.insert(0, byte);
            }
        }

        loop {
            if data.len() < 2 {
                if data.len() == 1 {
                    lock(&self.session).leftover_byte = Some(data[0]);
                }
                return Ok(());
            }

            let head_len = FrameHead::head_len_from_flags(data[1]);
            while data.len() < head_len {
                let needed = head_len - data.len();
                self.receive_append(&mut data, needed)?;
            }

            let (head, head_n) = match FrameHead::decode(&data) {
                Ok(decoded) => decoded,
                Err(e) => {
                    // unrecoverable desync; close and surface the anomaly
                    self.close(1000, "");
                    self.dispatch(&Message::new(
                        Opcode::Bad,
                        format!("Received unknown opcode: {}", data[0] & 0x0f),
                    ));
                    debug!("dropping read buffer after frame error: {}", e);
                    return Ok(());
                }
            };

            let payload_len = head.length.to_num() as usize;
            let total = head_n + payload_len;
            while data.len() < total {
                let needed = total - data.len();
                self.receive_append(&mut data, needed)?;
            }

            let mut payload = data[head_n..total].to_vec();
            if let Mask::Key(key) = head.mask {
                frame::mask::apply_mask(key, &mut payload);
            }

            trace!(
                "received {:?} frame, fin {:?}, {} byte payload",
                head.opcode,
                head.fin,
                payload_len
            );

            let mut outgoing: Option<Message> = None;

            match head.opcode {
                OpCode::Continue | OpCode::Text | OpCode::Binary => {
                    let mut session = lock(&self.session);
                    session.read_accumulator.extend_from_slice(&payload);
                    if head.fin == Fin::Y {
                        let whole = std::mem::take(&mut session.read_accumulator);
                        outgoing = Some(Message::new(head.opcode.into(), text_of(&whole)));
                    }
                }
                OpCode::Ping => {
                    // echo the payload so the server knows we are responsive
                    self.send_data(OpCode::Pong, &payload);
                    outgoing = Some(Message::new(Opcode::Ping, text_of(&payload)));
                }
                OpCode::Pong => {
                    if payload == HEARTBEAT_PAYLOAD {
                        self.missed_heartbeats.store(0, Ordering::Release);
                    } else {
                        outgoing = Some(Message::new(Opcode::Pong, text_of(&payload)));
                    }
                }
                OpCode::Close => {
                    {
                        let mut session = lock(&self.session);
                        session.server_closed = true;
                        if payload.len() >= 2 {
                            let code = u16::from_be_bytes([payload[0], payload[1]]);
                            session.close_message = Some(Message {
                                opcode: Opcode::Close,
                                data: text_of(&payload[2..]),
                                code,
                            });
                        }
                    }
                    // reciprocate; a no-op when we initiated the close
                    self.close(1000, "");
                }
            }

            data.drain(..total);

            if data.len() == 1 {
                lock(&self.session).leftover_byte = Some(data[0]);
                data.clear();
            }

            if let Some(message) = outgoing {
                self.dispatch(&message);
            }

            if data.is_empty() {
                return Ok(());
            }
        }
    }

    /// Blockingly fetch up to `needed` further bytes of a partial frame.
    fn receive_append(&self, data: &mut Vec<u8>, needed: usize) -> Result<(), TransportError> {
        loop {
            if self.status() == Status::Closed || !self.http.ssl().connected() {
                return Err(TransportError::NotConnected);
            }

            let chunk = self.http.ssl().receive(needed)?;
            if chunk.is_empty() {
                continue;
            }

            data.extend_from_slice(&chunk);
            return Ok(());
        }
    }

    /// Heartbeat worker: ping every 30 seconds, give up after three misses.
    fn heartbeat_loop(&self) {
        while self.status() == Status::Open && self.send_data(OpCode::Ping, HEARTBEAT_PAYLOAD) {
            self.missed_heartbeats.fetch_add(1, Ordering::AcqRel);

            // wait for the poller to put our ping on the wire
            self.heartbeat_inflight.set();
            self.heartbeat_inflight.wait_clear();

            if self.status() != Status::Open {
                break;
            }

            {
                let guard = lock(&self.heartbeat_mtx);
                let _ = self
                    .heartbeat_cv
                    .wait_timeout_while(guard, HEARTBEAT_INTERVAL, |_| {
                        self.status() == Status::Open
                    })
                    .unwrap_or_else(PoisonError::into_inner);
            }

            if self.missed_heartbeats.load(Ordering::Acquire) >= MAX_MISSED_HEARTBEATS {
                self.disconnect(Message::new(Opcode::Close, "Too many missed heartbeats."));
                return;
            }
        }
    }

    /// Read watcher: block until the socket is readable, wake the poller,
    /// then wait until it has drained.
    ///
    /// Once the close handshake is pending the watch switches to a bounded
    /// poll and keeps waking the poller every round whether or not data
    /// arrived, so the close deadline is enforced against a quiet peer.
    fn read_loop(&self) {
        loop {
            match self.status() {
                Status::Closed => break,
                Status::Closing => {
                    let readable = self.http.ssl().query_timeout(true, false, CLOSING_POLL_MS);
                    if readable {
                        self.read_ready.set();
                    }
                    self.activity.set();
                    if readable {
                        self.read_ready.wait_clear();
                    }
                }
                _ => {
                    if self.http.ssl().query(true, false) {
                        self.read_ready.set();
                        self.activity.set();
                        self.read_ready.wait_clear();
                    } else {
                        break;
                    }
                }
            }
        }
    }
}
