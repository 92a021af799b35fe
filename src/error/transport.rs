use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TransportError {
    /// Send or receive on an endpoint that is not connected.
    NotConnected,

    /// Hostname did not resolve to a usable IPv4 address.
    Resolve(String),

    /// TLS was requested together with UDP; there is no DTLS support.
    DtlsUnsupported,

    /// TLS setup or handshake failure.
    Tls(native_tls::Error),

    /// Underlying socket failure.
    Io(std::io::Error),
}

impl Display for TransportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use TransportError::*;
        match self {
            NotConnected => write!(f, "Not connected"),
            Resolve(host) => write!(f, "Unable to resolve address: {}", host),
            DtlsUnsupported => write!(f, "TLS over UDP is not supported"),
            Tls(e) => write!(f, "Tls error: {}", e),
            Io(e) => write!(f, "Socket error: {}", e),
        }
    }
}

impl From<native_tls::Error> for TransportError {
    fn from(e: native_tls::Error) -> Self {
        TransportError::Tls(e)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Tls(e) => Some(e),
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}
