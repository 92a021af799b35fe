use super::TransportError;

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum HttpClientError {
    /// Request url carried a scheme other than `http` or `https`.
    InvalidScheme(String),

    /// Connection to the requested server could not be established.
    Connect(String),

    /// The status line was missing or not `HTTP/1.1 <code> <message>`.
    BadStatusLine,

    /// `Content-Length` was present but not a decimal integer.
    InvalidContentLength(String),

    /// A chunked body did not follow the `<hex-size>\r\n<payload>\r\n` shape.
    InvalidChunk,

    /// Response head failed to parse.
    Parse(httparse::Error),

    /// Failure in the underlying transport.
    Transport(TransportError),
}

impl Display for HttpClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use HttpClientError::*;
        match self {
            InvalidScheme(scheme) => write!(f, "Invalid scheme: {}", scheme),
            Connect(server) => write!(f, "Failed to connect to {}", server),
            BadStatusLine => write!(f, "Invalid status line"),
            InvalidContentLength(v) => write!(f, "Invalid content length: {}", v),
            InvalidChunk => write!(f, "Malformed chunked body"),
            Parse(e) => write!(f, "Http parse error: {}", e),
            Transport(e) => write!(f, "Transport error: {}", e),
        }
    }
}

impl From<httparse::Error> for HttpClientError {
    fn from(e: httparse::Error) -> Self {
        HttpClientError::Parse(e)
    }
}

impl From<TransportError> for HttpClientError {
    fn from(e: TransportError) -> Self {
        HttpClientError::Transport(e)
    }
}

impl std::error::Error for HttpClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HttpClientError::Parse(e) => Some(e),
            HttpClientError::Transport(e) => Some(e),
            _ => None,
        }
    }
}
