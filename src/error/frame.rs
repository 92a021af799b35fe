use std::fmt::{Display, Formatter};

#[derive(Debug, PartialEq, Eq)]
pub enum FrameError {
    /// Reserved bits were set in the first frame byte.
    IllegalFin,

    /// Opcode nibble outside the values of RFC-6455 section 5.2.
    IllegalOpCode(u8),

    NotEnoughData,
}

impl Display for FrameError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use FrameError::*;
        match self {
            IllegalFin => write!(f, "Illegal fin or reserved bits"),
            IllegalOpCode(v) => write!(f, "Illegal opcode value: {}", v),
            NotEnoughData => write!(f, "Not enough data to parse"),
        }
    }
}

impl std::error::Error for FrameError {}
