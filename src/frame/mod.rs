//! Websocket data frame.
//!
//! [RFC-6455 Section5](https://datatracker.ietf.org/doc/html/rfc6455#section-5)
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
//! |                     Payload Data continued ...                |
//! +---------------------------------------------------------------+
//! ```
//!

pub mod flag;
pub mod length;
pub mod mask;

pub use flag::{Fin, OpCode};
pub use length::PayloadLen;
pub use mask::Mask;

use crate::error::FrameError;

/// 2 flag bytes + 8 extended length bytes + 4 mask key bytes.
pub const MAX_HEAD_LEN: usize = 14;

/// Websocket frame head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub fin: Fin,
    pub opcode: OpCode,
    pub mask: Mask,
    pub length: PayloadLen,
}

impl FrameHead {
    /// Constructor.
    #[inline]
    pub const fn new(fin: Fin, opcode: OpCode, mask: Mask, length: PayloadLen) -> Self {
        Self {
            fin,
            opcode,
            mask,
            length,
        }
    }

    /// Total head length implied by the two flag bytes, before the
    /// extended length and mask key have necessarily arrived.
    #[inline]
    pub const fn head_len_from_flags(b2: u8) -> usize {
        2 + PayloadLen::from_flag(b2).extend_len() + Mask::from_flag(b2).key_len()
    }

    /// Encode to the end of `buf`, returns the count of written bytes.
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start = buf.len();

        // fin, opcode
        let b1 = self.fin as u8 | self.opcode as u8;

        // mask, payload length
        let b2 = self.mask.to_flag() | self.length.to_flag();

        buf.push(b1);
        buf.push(b2);

        // extended payload length
        match &self.length {
            PayloadLen::Standard(_) => {}
            PayloadLen::Extended1(v) => buf.extend_from_slice(&v.to_be_bytes()),
            PayloadLen::Extended2(v) => buf.extend_from_slice(&v.to_be_bytes()),
        };

        // mask key
        if let Mask::Key(k) = &self.mask {
            buf.extend_from_slice(k);
        }

        buf.len() - start
    }

    /// Parse from provided buffer, returns [`FrameHead`] and the count of read
    /// bytes if the parse succeeds.
    /// If there is not enough data to parse, a [`FrameError::NotEnoughData`]
    /// error will be returned.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::NotEnoughData);
        }

        // fin, opcode
        let b1 = buf[0];

        // mask, payload length
        let b2 = buf[1];

        let fin = Fin::from_flag(b1)?;
        let opcode = OpCode::from_flag(b1)?;

        let mut mask = Mask::from_flag(b2);
        let mut length = PayloadLen::from_flag(b2);

        let mut n: usize = 2;

        match length {
            PayloadLen::Standard(_) => {}
            PayloadLen::Extended1(_) => {
                if buf.len() - n < 2 {
                    return Err(FrameError::NotEnoughData);
                }
                length = PayloadLen::from_byte2([buf[2], buf[3]]);
                n += 2;
            }
            PayloadLen::Extended2(_) => {
                if buf.len() - n < 8 {
                    return Err(FrameError::NotEnoughData);
                }
                let mut bytes = [0_u8; 8];
                bytes.copy_from_slice(&buf[2..10]);
                length = PayloadLen::from_byte8(bytes);
                n += 8;
            }
        };

        if let Mask::Key(_) = mask {
            if buf.len() - n < 4 {
                return Err(FrameError::NotEnoughData);
            }
            let mut key = [0_u8; 4];
            key.copy_from_slice(&buf[n..n + 4]);
            mask = Mask::Key(key);
            n += 4;
        }

        Ok((
            FrameHead {
                fin,
                opcode,
                mask,
                length,
            },
            n,
        ))
    }
}

/// Assemble a complete client frame: head with a fresh random mask key,
/// followed by the masked payload.
pub fn encode_masked(fin: Fin, opcode: OpCode, payload: &[u8]) -> Vec<u8> {
    let key = mask::new_rand_key();
    let head = FrameHead::new(
        fin,
        opcode,
        Mask::Key(key),
        PayloadLen::from_num(payload.len() as u64),
    );

    let mut buf = Vec::with_capacity(MAX_HEAD_LEN + payload.len());
    let head_len = head.encode(&mut buf);

    buf.extend_from_slice(payload);
    mask::apply_mask(key, &mut buf[head_len..]);

    buf
}
