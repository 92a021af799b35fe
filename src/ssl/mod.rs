//! Blocking-with-poll TCP/UDP client, optionally wrapped in TLS.
//!
//! The [`Client`] owns one network endpoint. Reads and writes never block the
//! calling thread directly: the socket is kept in non-blocking mode and all
//! waiting happens in `poll(2)`, bounded by the configured timeout
//! (`-1` waits until ready, `0` polls once, `> 0` waits that many
//! milliseconds). This is what lets the upper layers cheaply probe for silent
//! peer disconnection with a zero-length read.

use crate::error::TransportError;

use log::{debug, trace};
use native_tls::{HandshakeError, Protocol, TlsConnector, TlsStream};

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, SocketAddrV4, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default receive buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// How long a graceful close keeps draining before giving up on the peer.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// The endpoint, one of the three supported socket flavors.
enum NetStream {
    Tcp(TcpStream),
    Tls(TlsStream<TcpStream>),
    Udp(UdpSocket),
}

impl NetStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(s) => s.read(buf),
            NetStream::Tls(s) => s.read(buf),
            NetStream::Udp(s) => s.recv(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            NetStream::Tcp(s) => s.write(buf),
            NetStream::Tls(s) => s.write(buf),
            NetStream::Udp(s) => s.send(buf),
        }
    }

    fn raw_fd(&self) -> RawFd {
        match self {
            NetStream::Tcp(s) => s.as_raw_fd(),
            NetStream::Tls(s) => s.get_ref().as_raw_fd(),
            NetStream::Udp(s) => s.as_raw_fd(),
        }
    }
}

#[inline]
fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// One `poll(2)` round on a raw descriptor.
fn poll_fd(fd: RawFd, want_read: bool, want_write: bool, timeout_ms: i32) -> bool {
    if fd < 0 {
        return false;
    }

    let mut pfd = libc::pollfd {
        fd,
        events: 0,
        revents: 0,
    };
    if want_read {
        pfd.events |= libc::POLLIN;
    }
    if want_write {
        pfd.events |= libc::POLLOUT;
    }

    let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if ret <= 0 {
        return false;
    }

    // Readiness must match the request exactly, with no error conditions.
    (want_read == (pfd.revents & libc::POLLIN != 0))
        && (want_write == (pfd.revents & libc::POLLOUT != 0))
        && pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) == 0
}

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Open a non-blocking IPv4 socket and connect it, waiting for writability
/// with `timeout_ms` and confirming connectivity through `SO_ERROR`.
fn connect_nonblocking(addr: &SocketAddrV4, timeout_ms: i32) -> Result<TcpStream, TransportError> {
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, libc::IPPROTO_TCP) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }

    // hand the descriptor to std right away so early returns close it
    let stream = unsafe { TcpStream::from_raw_fd(fd) };
    stream.set_nonblocking(true)?;

    let sin = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    };

    let ret = unsafe {
        libc::connect(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    let mut ready = ret == 0;
    if !ready {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINPROGRESS) {
            return Err(err.into());
        }
        ready = poll_fd(fd, false, true, timeout_ms);
    }

    // writability alone is not connectivity, and a refused connect shows up
    // here rather than as writability
    let mut so_error: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut so_error as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(io::Error::last_os_error().into());
    }
    if so_error != 0 {
        return Err(io::Error::from_raw_os_error(so_error).into());
    }
    if !ready {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection attempt timed out",
        )
        .into());
    }

    Ok(stream)
}

/// A TCP or UDP client socket with optional TLS.
///
/// All methods take `&self`; the client can be shared across threads, which
/// is how the websocket runtime drives one endpoint from its poller and
/// read-watcher at the same time.
pub struct Client {
    hostname: Mutex<String>,
    port: AtomicU16,
    use_tls: AtomicBool,
    use_udp: AtomicBool,
    verify_certs: AtomicBool,
    /// -1 blocks until ready, 0 polls once, > 0 waits in milliseconds.
    timeout: AtomicI32,
    connected: AtomicBool,
    sfd: AtomicI32,
    stream: Mutex<Option<NetStream>>,
}

impl Client {
    /// Create an idle client. Nothing is resolved or opened until
    /// [`connect`](Self::connect).
    pub fn new(hostname: &str, port: u16, use_tls: bool, use_udp: bool) -> Self {
        Self {
            hostname: Mutex::new(hostname.to_owned()),
            port: AtomicU16::new(port),
            use_tls: AtomicBool::new(use_tls),
            use_udp: AtomicBool::new(use_udp),
            verify_certs: AtomicBool::new(false),
            timeout: AtomicI32::new(-1),
            connected: AtomicBool::new(false),
            sfd: AtomicI32::new(-1),
            stream: Mutex::new(None),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Raw descriptor of the current endpoint, or -1 when idle.
    pub fn socket(&self) -> RawFd {
        self.sfd.load(Ordering::Acquire)
    }

    pub fn timeout(&self) -> i32 {
        self.timeout.load(Ordering::Acquire)
    }

    pub fn set_timeout(&self, milliseconds: i32) {
        self.timeout.store(milliseconds, Ordering::Release);
    }

    /// `true` restores fully blocking waits, `false` switches to
    /// single non-blocking polls.
    pub fn set_blocking(&self, blocking: bool) {
        self.set_timeout(if blocking { -1 } else { 0 });
    }

    pub fn set_hostname(&self, hostname: &str) {
        *lock(&self.hostname) = hostname.to_owned();
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::Release);
    }

    pub fn set_use_tls(&self, use_tls: bool) {
        self.use_tls.store(use_tls, Ordering::Release);
    }

    /// Toggle certificate chain and hostname verification for future
    /// connections.
    pub fn set_verify_certs(&self, verify: bool) {
        self.verify_certs.store(verify, Ordering::Release);
    }

    /// Resolve the configured host and open the endpoint, running the TLS
    /// handshake when enabled.
    ///
    /// Returns `Ok(false)` when hostname or port are unset, or when the
    /// client is already connected.
    pub fn connect(&self) -> Result<bool, TransportError> {
        let hostname = lock(&self.hostname).clone();
        let port = self.port.load(Ordering::Acquire);

        if hostname.is_empty() || port == 0 || self.connected() {
            return Ok(false);
        }

        let use_udp = self.use_udp.load(Ordering::Acquire);
        let use_tls = self.use_tls.load(Ordering::Acquire);
        if use_udp && use_tls {
            return Err(TransportError::DtlsUnsupported);
        }

        let addr = (hostname.as_str(), port)
            .to_socket_addrs()?
            .find_map(|a| match a {
                SocketAddr::V4(v4) => Some(v4),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| TransportError::Resolve(format!("{}:{}", hostname, port)))?;

        let stream = if use_udp {
            let udp = UdpSocket::bind(("0.0.0.0", 0))?;
            udp.connect(addr)?;
            udp.set_nonblocking(true)?;
            NetStream::Udp(udp)
        } else {
            let tcp = connect_nonblocking(&addr, self.timeout.load(Ordering::Acquire))?;
            tcp.set_nodelay(true)?;

            if use_tls {
                let verify = self.verify_certs.load(Ordering::Acquire);
                let connector = TlsConnector::builder()
                    .min_protocol_version(Some(Protocol::Tlsv12))
                    .danger_accept_invalid_certs(!verify)
                    .danger_accept_invalid_hostnames(!verify)
                    .build()?;

                // the handshake runs blocking, then the socket goes back to
                // non-blocking for normal traffic
                tcp.set_nonblocking(false)?;

                let mut attempt = connector.connect(&hostname, tcp);
                let tls = loop {
                    match attempt {
                        Ok(tls) => break tls,
                        Err(HandshakeError::Failure(e)) => return Err(TransportError::Tls(e)),
                        Err(HandshakeError::WouldBlock(mid)) => attempt = mid.handshake(),
                    }
                };

                tls.get_ref().set_nonblocking(true)?;
                NetStream::Tls(tls)
            } else {
                NetStream::Tcp(tcp)
            }
        };

        self.sfd.store(stream.raw_fd(), Ordering::Release);
        *lock(&self.stream) = Some(stream);
        self.connected.store(true, Ordering::Release);

        debug!("connected to {}:{} (tls: {}, udp: {})", hostname, port, use_tls, use_udp);
        Ok(true)
    }

    /// Write as much of `message` as the socket accepts, returning the byte
    /// count. Returns `Ok(0)` when the socket did not become writable within
    /// the configured timeout.
    pub fn send(&self, message: &[u8]) -> Result<usize, TransportError> {
        if !self.connected() {
            return Err(TransportError::NotConnected);
        }
        if !self.query(false, true) {
            return Ok(0);
        }

        let mut guard = lock(&self.stream);
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match stream.write(message) {
            Ok(n) => {
                trace!("sent {} of {} bytes", n, message.len());
                Ok(n)
            }
            Err(e) if is_retryable(&e) => Ok(0),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Read up to `buf_size` bytes. An empty result means either "nothing
    /// arrived within the timeout" or "peer closed" — the two are told apart
    /// by [`connected`](Self::connected) flipping to false.
    ///
    /// `receive(0)` performs disconnect discovery: it probes the socket
    /// without consuming data, updating the connected flag.
    pub fn receive(&self, buf_size: usize) -> Result<Vec<u8>, TransportError> {
        if !self.connected() {
            return Err(TransportError::NotConnected);
        }
        if buf_size == 0 {
            self.probe();
            return Ok(Vec::new());
        }

        let mut buf = vec![0_u8; buf_size];

        // Optimistic read first: the TLS layer may hold decrypted data the
        // socket no longer shows.
        {
            let mut guard = lock(&self.stream);
            let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

            match stream.read(&mut buf) {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.connected.store(false, Ordering::Release);
                    return Ok(Vec::new());
                }
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(e) if is_retryable(&e) => {}
                Err(e) => {
                    self.connected.store(false, Ordering::Release);
                    return Err(e.into());
                }
            }
        }

        // Nothing buffered; wait for readiness without holding the stream.
        if !self.query(true, false) {
            return Ok(Vec::new());
        }

        let mut guard = lock(&self.stream);
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        match stream.read(&mut buf) {
            Ok(0) => {
                debug!("peer closed the connection");
                self.connected.store(false, Ordering::Release);
                Ok(Vec::new())
            }
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_retryable(&e) => Ok(Vec::new()),
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                Err(e.into())
            }
        }
    }

    /// Poll the socket once with the configured timeout. True only when
    /// exactly the requested readiness bits are set and no error conditions
    /// are present.
    pub fn query(&self, want_read: bool, want_write: bool) -> bool {
        poll_fd(
            self.socket(),
            want_read,
            want_write,
            self.timeout.load(Ordering::Acquire),
        )
    }

    /// [`query`](Self::query) with an explicit timeout instead of the
    /// configured one.
    pub(crate) fn query_timeout(&self, want_read: bool, want_write: bool, timeout_ms: i32) -> bool {
        poll_fd(self.socket(), want_read, want_write, timeout_ms)
    }

    /// Close the endpoint. TCP connections get a graceful shutdown: the
    /// write side is half-closed first, then reads are drained until the
    /// peer closes (bounded by a short grace period). UDP skips the drain.
    pub fn close(&self) -> Result<(), TransportError> {
        let mut guard = lock(&self.stream);

        let Some(mut stream) = guard.take() else {
            self.sfd.store(-1, Ordering::Release);
            self.connected.store(false, Ordering::Release);
            return Ok(());
        };

        if self.connected() {
            match &mut stream {
                NetStream::Tcp(tcp) => {
                    let _ = tcp.shutdown(Shutdown::Write);
                    drain(tcp);
                }
                NetStream::Tls(tls) => {
                    // best effort close_notify, then half-close and drain
                    let _ = tls.shutdown();
                    let tcp = tls.get_ref();
                    let _ = tcp.shutdown(Shutdown::Write);
                    drain(tcp);
                }
                NetStream::Udp(_) => {}
            }
        }

        drop(stream);
        self.sfd.store(-1, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        debug!("connection closed");
        Ok(())
    }

    /// Probe for a silently closed peer without consuming data.
    fn probe(&self) {
        let guard = lock(&self.stream);

        let mut tmp = [0_u8; 1];
        let result = match guard.as_ref() {
            Some(NetStream::Tcp(s)) => s.peek(&mut tmp),
            Some(NetStream::Tls(s)) => s.get_ref().peek(&mut tmp),
            Some(NetStream::Udp(_)) => return,
            None => {
                self.connected.store(false, Ordering::Release);
                return;
            }
        };

        match result {
            // EOF: the peer is gone
            Ok(0) => {
                debug!("disconnect discovered");
                self.connected.store(false, Ordering::Release);
            }
            Ok(_) => {}
            Err(e) if is_retryable(&e) => {}
            Err(_) => self.connected.store(false, Ordering::Release),
        }
    }
}

/// Drain a half-closed TCP socket until the peer closes or the grace period
/// runs out.
fn drain(tcp: &TcpStream) {
    let deadline = Instant::now() + DRAIN_GRACE;
    let fd = tcp.as_raw_fd();
    let mut buf = [0_u8; DEFAULT_BUFFER_SIZE];
    let mut reader = tcp;

    while Instant::now() < deadline {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) if is_retryable(&e) => {
                if !poll_fd(fd, true, false, 100) {
                    continue;
                }
            }
            Err(_) => break,
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.connected() {
            let _ = self.close();
        }
    }
}
