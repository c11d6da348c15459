//! Wire protocol: binary audio frames and the text control side channel

pub mod control;
pub mod frame;

pub use control::ControlMessage;
pub use frame::{decode, encode, Frame};

/// WebSocket close code sent to a second broadcaster for an occupied stream
pub const CLOSE_PRODUCER_CONFLICT: u16 = 4409;
