use thiserror::Error;

/// Errors produced while encoding or decoding wire records.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed record ({} bytes): {reason}", raw.len())]
    Malformed { raw: Vec<u8>, reason: String },

    #[error("unknown command '{command}' ({} bytes)", raw.len())]
    UnknownCommand { command: String, raw: Vec<u8> },

    #[error("record of {0} bytes does not fit in a frame")]
    FrameTooLarge(usize),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Raw bytes of the offending frame, when the error came from decoding one.
    pub fn raw(&self) -> Option<&[u8]> {
        match self {
            Self::Malformed { raw, .. } | Self::UnknownCommand { raw, .. } => Some(raw),
            _ => None,
        }
    }
}
