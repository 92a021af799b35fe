//! Websocket client ([RFC-6455], client role).
//!
//! [`Client`] performs its opening handshake through an embedded
//! [`http::Client`](crate::http::Client), keeps the transport for frame I/O,
//! and then runs the session from three cooperating workers: a poller that
//! processes frames and flushes the send queue, a heartbeat that pings every
//! 30 seconds, and a read-watcher that blocks until the socket is readable.
//!
//! Incoming traffic is delivered to a single message callback, including two
//! synthetic events: [`Opcode::Open`] once when the connection is
//! established, and a final [`Opcode::Close`] when it ends. Handlers may
//! call [`Client::send`] and [`Client::close`] from inside the callback.
//!
//! [RFC-6455]: https://datatracker.ietf.org/doc/html/rfc6455

mod client;
mod flag;

pub use client::Client;

use crate::frame;

/// Message type delivered to the callback.
///
/// The first six values mirror the frame opcodes on the wire. `Bad` and
/// `Open` never appear on the wire: they surface parse errors and the
/// connection-established event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// A malformed or unknown frame was received.
    Bad,
    /// The connection was established.
    Open,
}

impl From<frame::OpCode> for Opcode {
    fn from(opcode: frame::OpCode) -> Self {
        use frame::OpCode::*;
        match opcode {
            Continue => Opcode::Continuation,
            Text => Opcode::Text,
            Binary => Opcode::Binary,
            Close => Opcode::Close,
            Ping => Opcode::Ping,
            Pong => Opcode::Pong,
        }
    }
}

/// A message delivered to the user callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub opcode: Opcode,
    /// Payload text; the close reason when `opcode` is [`Opcode::Close`].
    pub data: String,
    /// The close code, 0 when not applicable.
    pub code: u16,
}

impl Message {
    pub fn new(opcode: Opcode, data: impl Into<String>) -> Self {
        Self {
            opcode,
            data: data.into(),
            code: 0,
        }
    }
}

/// Connection lifecycle. Transitions only move forward within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl Status {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Status::Connecting,
            1 => Status::Open,
            2 => Status::Closing,
            _ => Status::Closed,
        }
    }
}

/// The single message sink of a client.
pub type MessageCallback = Box<dyn FnMut(&Message) + Send + 'static>;
