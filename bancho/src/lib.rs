pub use reader::*;
pub use types::*;
pub use writer::*;

pub mod packets;
mod reader;
mod types;
mod writer;

use thiserror::Error;

/// Errors raised while decoding a bancho frame.
///
/// A malformed payload aborts the current packet only; the surrounding
/// [`PacketStream`] already knows the declared frame length and resumes
/// at the next frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected end of frame")]
    UnexpectedEof,

    #[error("bad string marker {0:#04x}")]
    BadStringMarker(u8),

    #[error("string is not valid UTF-8")]
    BadUtf8,

    #[error("frame declares {declared} payload bytes, {remaining} remain")]
    TruncatedFrame { declared: usize, remaining: usize },

    #[error("invalid {what} value {value}")]
    BadEnum { what: &'static str, value: u8 },
}
