/// Errors that can occur while encoding or decoding MAVLink frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Neither the common set nor the registered vendor messages know this id.
    #[error("unknown message id {msgid}")]
    UnknownMessage { msgid: u32 },

    /// The payload does not fit in one frame.
    #[error("payload too large for message {msgid} ({size} bytes, max {max})")]
    PayloadTooLarge { msgid: u32, size: usize, max: usize },

    /// A typed decode was attempted on a message with a different id.
    #[error("message id mismatch (expected {expected}, got {got})")]
    MessageMismatch { expected: u32, got: u32 },

    /// The payload bytes do not form a valid message (e.g. an enum field
    /// outside its range).
    #[error("cannot decode message {msgid}: {reason}")]
    Decode { msgid: u32, reason: String },
}

pub type Result<T> = std::result::Result<T, FrameError>;
