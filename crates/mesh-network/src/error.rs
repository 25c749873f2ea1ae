use thiserror::Error;

use mesh_protocol::{PeerAddress, ProtocolError};

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to connect to {address}: {reason}")]
    Connect { address: PeerAddress, reason: String },

    #[error("failed to send to {address}: {reason}")]
    Send { address: PeerAddress, reason: String },

    #[error("no link to {0}")]
    NotConnected(PeerAddress),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
