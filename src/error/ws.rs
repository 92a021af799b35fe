use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq)]
pub enum WebSocketClientError {
    /// `start` was called before a url was set.
    MissingUrl,
}

impl Display for WebSocketClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WebSocketClientError::MissingUrl => write!(f, "URL not set"),
        }
    }
}

impl std::error::Error for WebSocketClientError {}
