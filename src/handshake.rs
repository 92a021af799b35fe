//! Websocket key exchange.
//!
//! [RFC-6455 Section 4.1](https://datatracker.ietf.org/doc/html/rfc6455#section-4.1)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

/// 258EAFA5-E914-47DA-95CA-C5AB0DC85B11
pub const GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Generate a new `sec-websocket-key`: 16 random bytes, base64-encoded.
#[inline]
pub fn new_sec_key() -> [u8; 24] {
    let input: [u8; 16] = rand::random();
    let mut output = [0_u8; 24];
    Engine::encode_slice(&STANDARD, input, &mut output).unwrap();
    output
}

/// Derive `sec-websocket-accept` from `sec-websocket-key`.
#[inline]
pub fn derive_accept_key(sec_key: &[u8]) -> [u8; 28] {
    let mut sha1 = Sha1::default();
    sha1.update(sec_key);
    sha1.update(GUID);
    let input = sha1.finalize();
    let mut output = [0_u8; 28];
    Engine::encode_slice(&STANDARD, input, &mut output).unwrap();
    output
}
