use super::{BodySink, Headers, Method, Response};

use crate::error::{HttpClientError, TransportError};
use crate::ssl;
use crate::uri::Uri;

use log::{debug, trace};

use std::sync::{Mutex, MutexGuard, PoisonError};

const HTTP_PORT: u16 = 80;
const HTTPS_PORT: u16 = 443;

/// Upper bound on response header count.
const MAX_HEADERS: usize = 64;

#[inline]
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// An HTTP/1.1 client over one owned transport.
///
/// Successive requests to the same `host:port` with `keep_alive` reuse the
/// connection; a request elsewhere closes it and reconnects.
pub struct Client {
    transport: ssl::Client,
    /// `"host:port"` of the live keep-alive connection, or empty.
    connected_to: Mutex<String>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! method_helpers {
    ($( $(#[$docs: meta])* ($name: ident => $method: ident); )+) => {
        $(
            $(#[$docs])*
            pub fn $name(
                &self,
                url: &str,
                headers: &Headers,
                body: &[u8],
                stream: bool,
                sink: Option<&mut BodySink<'_>>,
            ) -> Result<Response, HttpClientError> {
                self.request(Method::$method, url, headers, body, true, stream, sink)
            }
        )+
    };
}

impl Client {
    pub fn new() -> Self {
        Self {
            transport: ssl::Client::new("", 0, false, false),
            connected_to: Mutex::new(String::new()),
        }
    }

    /// The underlying transport.
    ///
    /// The websocket client reclaims it for frame I/O after its upgrade
    /// handshake completes.
    pub fn ssl(&self) -> &ssl::Client {
        &self.transport
    }

    method_helpers! {
        /// GET with keep-alive.
        (get => Get);

        /// POST with keep-alive.
        (post => Post);

        /// PUT with keep-alive.
        (put => Put);

        /// DELETE with keep-alive.
        (delete => Delete);

        /// HEAD with keep-alive.
        (head => Head);

        /// OPTIONS with keep-alive.
        (options => Options);

        /// CONNECT with keep-alive.
        (connect => Connect);

        /// TRACE with keep-alive.
        (trace => Trace);

        /// PATCH with keep-alive.
        (patch => Patch);
    }

    /// Perform one request and read its response.
    ///
    /// Only `http` and `https` urls are accepted; a missing scheme defaults
    /// to `http`, a missing port to 80/443, and TLS is enabled exactly when
    /// the effective port is 443. With `stream`, body chunks go to `sink` as
    /// they arrive and the returned [`Response::body`] stays empty.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        body: &[u8],
        keep_alive: bool,
        stream: bool,
        sink: Option<&mut BodySink<'_>>,
    ) -> Result<Response, HttpClientError> {
        match self.request_inner(method, url, headers, body, keep_alive, stream, sink) {
            Ok(response) => Ok(response),
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn request_inner(
        &self,
        method: Method,
        url: &str,
        headers: &Headers,
        body: &[u8],
        keep_alive: bool,
        stream: bool,
        sink: Option<&mut BodySink<'_>>,
    ) -> Result<Response, HttpClientError> {
        let mut uri = Uri::parse(url);

        if uri.scheme.is_empty() {
            uri.scheme = "http".to_owned();
        }
        if uri.scheme != "http" && uri.scheme != "https" {
            return Err(HttpClientError::InvalidScheme(uri.scheme));
        }
        let port = uri
            .port
            .unwrap_or(if uri.scheme == "http" { HTTP_PORT } else { HTTPS_PORT });

        if self.transport.connected() {
            // A quick zero-length read trips disconnect discovery, so a
            // half-dead keep-alive connection is not reused.
            self.transport.set_blocking(false);
            let _ = self.transport.receive(0);
            self.transport.set_blocking(true);
        }

        let requested = format!("{}:{}", uri.host, port);
        {
            let mut connected_to = lock(&self.connected_to);
            if *connected_to != requested || !self.transport.connected() {
                self.transport.set_hostname(&uri.host);
                self.transport.set_port(port);
                self.transport.set_use_tls(port == HTTPS_PORT);
                self.transport.close()?;
                if !self.transport.connect()? {
                    return Err(HttpClientError::Connect(requested));
                }
                *connected_to = requested.clone();
            }
        }

        let mut path = if uri.path.is_empty() {
            "/".to_owned()
        } else {
            uri.path.clone()
        };
        for (i, (key, value)) in uri.query.iter().enumerate() {
            path.push(if i == 0 { '?' } else { '&' });
            path.push_str(key);
            path.push('=');
            path.push_str(value);
        }
        if !uri.fragment.is_empty() {
            path.push('#');
            path.push_str(&uri.fragment);
        }

        let mut head = format!("{} {} HTTP/1.1\r\n", method, path);

        // the port is implied for the scheme's default
        let default_port = (uri.scheme == "http" && port == HTTP_PORT)
            || (uri.scheme == "https" && port == HTTPS_PORT);
        if default_port {
            head += &format!("Host: {}\r\n", uri.host);
        } else {
            head += &format!("Host: {}:{}\r\n", uri.host, port);
        }

        for (key, value) in headers.iter() {
            head += &format!("{}: {}\r\n", key, value);
        }

        if !keep_alive {
            head += "Connection: close\r\n";
            lock(&self.connected_to).clear();
        }
        if !body.is_empty() {
            head += &format!("Content-Length: {}\r\n", body.len());
        }
        head += "\r\n";

        let mut request = head.into_bytes();
        request.extend_from_slice(body);

        trace!("{} {} ({} byte request)", method, path, request.len());

        let mut sent = 0;
        while sent < request.len() {
            sent += self.transport.send(&request[sent..])?;
        }

        self.read_response(stream, sink)
    }

    /// Read one response off the transport.
    fn read_response(
        &self,
        stream: bool,
        mut sink: Option<&mut BodySink<'_>>,
    ) -> Result<Response, HttpClientError> {
        // accumulate until the head separator shows up
        let mut raw: Vec<u8> = Vec::new();
        let header_end = loop {
            let old_len = raw.len();
            let chunk = self.transport.receive(ssl::DEFAULT_BUFFER_SIZE)?;
            if chunk.is_empty() {
                if !self.transport.connected() {
                    return Err(TransportError::NotConnected.into());
                }
                continue;
            }
            raw.extend_from_slice(&chunk);

            let search_from = old_len.saturating_sub(3);
            if let Some(pos) = find(&raw[search_from..], b"\r\n\r\n") {
                break search_from + pos;
            }
        };

        let mut header_storage = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut parsed = httparse::Response::new(&mut header_storage);
        match parsed.parse(&raw[..header_end + 4]) {
            Ok(httparse::Status::Complete(_)) => {}
            Ok(httparse::Status::Partial) => return Err(HttpClientError::BadStatusLine),
            Err(e) => return Err(e.into()),
        }

        let status_code = parsed.code.ok_or(HttpClientError::BadStatusLine)?;
        let status_message = parsed.reason.unwrap_or("").to_owned();

        let mut headers = Headers::new();
        for header in parsed.headers.iter() {
            headers.insert(header.name, String::from_utf8_lossy(header.value).into_owned());
        }

        trace!("response: {} {}", status_code, status_message);

        // whatever rode in behind the separator is body
        let mut body = raw[header_end + 4..].to_vec();
        let mut received = body.len();

        let content_length = match headers.get("Content-Length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map_err(|_| HttpClientError::InvalidContentLength(v.to_owned()))?,
            None => 0,
        };
        let chunked = headers
            .get("Transfer-Encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("chunked"))
            .unwrap_or(false);

        if stream && !chunked && !body.is_empty() {
            if let Some(cb) = sink.as_mut() {
                cb(&body);
            }
            body.clear();
        }

        while received < content_length {
            let chunk = self.transport.receive(content_length - received)?;
            if chunk.is_empty() {
                if !self.transport.connected() {
                    return Err(TransportError::NotConnected.into());
                }
                continue;
            }
            received += chunk.len();
            if stream {
                if let Some(cb) = sink.as_mut() {
                    cb(&chunk);
                }
            } else {
                body.extend_from_slice(&chunk);
            }
        }

        if chunked {
            // keep reading until the terminal zero-size chunk is in view
            while find(&body, b"0\r\n\r\n").is_none() {
                let chunk = self.transport.receive(ssl::DEFAULT_BUFFER_SIZE)?;
                if chunk.is_empty() {
                    if !self.transport.connected() {
                        return Err(TransportError::NotConnected.into());
                    }
                    continue;
                }
                body.extend_from_slice(&chunk);
            }
            body = dechunk(&body)?;
        }

        Ok(Response {
            status_code,
            status_message,
            headers,
            body,
        })
    }

    /// Drop the connection after a failure.
    fn release(&self) {
        if let Err(e) = self.transport.close() {
            debug!("error releasing connection: {}", e);
        }
        lock(&self.connected_to).clear();
    }
}

/// Decode a chunked body: `<hex-size>\r\n<payload>\r\n` repeated until a
/// zero size.
fn dechunk(raw: &[u8]) -> Result<Vec<u8>, HttpClientError> {
    let mut out = Vec::new();
    let mut i = 0;

    loop {
        let line_end = i + find(&raw[i..], b"\r\n").ok_or(HttpClientError::InvalidChunk)?;
        let size_str =
            std::str::from_utf8(&raw[i..line_end]).map_err(|_| HttpClientError::InvalidChunk)?;
        let size = usize::from_str_radix(size_str.trim(), 16)
            .map_err(|_| HttpClientError::InvalidChunk)?;

        if size == 0 {
            break;
        }

        let data_start = line_end + 2;
        let data_end = data_start + size;
        if data_end + 2 > raw.len() {
            return Err(HttpClientError::InvalidChunk);
        }

        out.extend_from_slice(&raw[data_start..data_end]);
        i = data_end + 2;
    }

    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dechunk_simple() {
        let body = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        assert_eq!(dechunk(body).unwrap(), b"hello world");
    }

    #[test]
    fn dechunk_hex_sizes() {
        let body = b"a\r\n0123456789\r\nF\r\nabcdefghijklmno\r\n0\r\n\r\n";
        assert_eq!(dechunk(body).unwrap(), b"0123456789abcdefghijklmno");
    }

    #[test]
    fn dechunk_rejects_truncated_bodies() {
        let body = b"5\r\nhel";
        assert!(matches!(dechunk(body), Err(HttpClientError::InvalidChunk)));
    }
}
