//! Synchronous HTTP/1.1 client.
//!
//! One request/response per call, with optional keep-alive reuse of the
//! underlying transport between calls to the same `host:port`. Response
//! bodies framed by `Content-Length` or chunked transfer encoding are both
//! handled; bodies can alternatively be streamed to a caller-supplied sink.
//!
//! The free functions ([`get`], [`post`], ...) fire one-shot requests on a
//! throwaway connection; the [`Client`] helpers of the same names keep the
//! connection alive.

mod client;

pub use client::Client;

use crate::error::HttpClientError;
use crate::util::CaseInsensitiveMap;

use std::fmt::{Display, Formatter};

/// Request and response headers, keyed case-insensitively.
///
/// Duplicate header names collapse first-write-wins, both when building a
/// request and when parsing a response.
pub type Headers = CaseInsensitiveMap;

/// Sink receiving body chunks as they arrive when streaming a response.
pub type BodySink<'a> = dyn FnMut(&[u8]) + 'a;

/// The request methods of RFC 7231 (plus PATCH).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
    Patch,
}

impl Method {
    pub const fn as_str(&self) -> &'static str {
        use Method::*;
        match self {
            Get => "GET",
            Post => "POST",
            Put => "PUT",
            Delete => "DELETE",
            Head => "HEAD",
            Options => "OPTIONS",
            Connect => "CONNECT",
            Trace => "TRACE",
            Patch => "PATCH",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed HTTP response.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status_code: u16,
    pub status_message: String,
    pub headers: Headers,
    /// The response body; empty when it was streamed to a sink.
    pub body: Vec<u8>,
}

impl Response {
    /// Body interpreted as text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

macro_rules! free_functions {
    ($( $(#[$docs: meta])* ($name: ident => $method: ident); )+) => {
        $(
            $(#[$docs])*
            pub fn $name(
                url: &str,
                headers: &Headers,
                body: &[u8],
                stream: bool,
                sink: Option<&mut BodySink<'_>>,
            ) -> Result<Response, HttpClientError> {
                Client::new().request(Method::$method, url, headers, body, false, stream, sink)
            }
        )+
    };
}

free_functions! {
    /// One-shot GET on a throwaway connection.
    (get => Get);

    /// One-shot POST on a throwaway connection.
    (post => Post);

    /// One-shot PUT on a throwaway connection.
    (put => Put);

    /// One-shot DELETE on a throwaway connection.
    (delete => Delete);

    /// One-shot HEAD on a throwaway connection.
    (head => Head);

    /// One-shot OPTIONS on a throwaway connection.
    (options => Options);

    /// One-shot CONNECT on a throwaway connection.
    (connect => Connect);

    /// One-shot TRACE on a throwaway connection.
    (trace => Trace);

    /// One-shot PATCH on a throwaway connection.
    (patch => Patch);
}

/// One-shot request with an explicit method on a throwaway connection.
pub fn request(
    method: Method,
    url: &str,
    headers: &Headers,
    body: &[u8],
    stream: bool,
    sink: Option<&mut BodySink<'_>>,
) -> Result<Response, HttpClientError> {
    Client::new().request(method, url, headers, body, false, stream, sink)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn method_names() {
        assert_eq!(Method::Get.as_str(), "GET");
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert_eq!(Method::Patch.to_string(), "PATCH");
    }
}
