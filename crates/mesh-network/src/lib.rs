//! Mesh Network - persistent TCP links between mesh peers
//!
//! One link per peer pair, framed with the mesh record codec. Each link has
//! a reader task that forwards decoded records to a single event channel;
//! writes happen from the owner of [`PeerLinks`]. Links know peers only by
//! the reply address carried in their records, never by socket address.

pub mod error;
pub mod links;

pub use error::NetworkError;
pub use links::{ConnectionId, LinkConfig, LinkEvent, PeerLinks};
