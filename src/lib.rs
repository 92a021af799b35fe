//! Client-side networking, in three layers:
//!
//! - [`ssl`]: a blocking-with-poll TCP/UDP client, optionally wrapped in TLS.
//! - [`http`]: a synchronous HTTP/1.1 client with keep-alive and body streaming.
//! - [`ws`]: a websocket client ([RFC-6455], client role) for long-lived
//!   sessions such as gateway connections.
//!
//! Each layer owns the one below it: the http client drives an [`ssl::Client`],
//! and the websocket client performs its upgrade handshake through an embedded
//! [`http::Client`], then reclaims the transport for frame I/O.
//!
//! [RFC-6455]: https://datatracker.ietf.org/doc/html/rfc6455

pub mod error;
pub mod frame;
pub mod handshake;
pub mod http;
pub mod ssl;
pub mod uri;
pub mod util;
pub mod ws;
