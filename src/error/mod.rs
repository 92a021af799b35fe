#![allow(missing_docs)]
//! Errors

mod frame;
mod http;
mod transport;
mod ws;

pub use frame::FrameError;
pub use http::HttpClientError;
pub use transport::TransportError;
pub use ws::WebSocketClientError;

use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum Error {
    Transport(TransportError),

    Http(HttpClientError),

    WebSocket(WebSocketClientError),

    Frame(FrameError),

    Io(std::io::Error),
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Error::Transport(e)
    }
}

impl From<HttpClientError> for Error {
    fn from(e: HttpClientError) -> Self {
        Error::Http(e)
    }
}

impl From<WebSocketClientError> for Error {
    fn from(e: WebSocketClientError) -> Self {
        Error::WebSocket(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use Error::*;
        match self {
            Transport(e) => write!(f, "Transport error: {}", e),
            Http(e) => write!(f, "Http client error: {}", e),
            WebSocket(e) => write!(f, "WebSocket client error: {}", e),
            Frame(e) => write!(f, "Frame error: {}", e),
            Io(e) => write!(f, "Io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        use Error::*;

        match self {
            Transport(e) => Some(e),
            Http(e) => Some(e),
            WebSocket(e) => Some(e),
            Frame(e) => Some(e),
            Io(e) => Some(e),
        }
    }
}
