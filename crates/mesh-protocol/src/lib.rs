//! Mesh Protocol - Core types and wire records
//!
//! Defines the records exchanged between mesh nodes over persistent TCP
//! links, the Sudoku job payload, and the length-prefixed JSON frame codec.

pub mod codec;
pub mod constants;
pub mod error;
pub mod messages;
pub mod sudoku;
pub mod types;

pub use codec::{decode, encode, Frame, RecordCodec};
pub use constants::*;
pub use error::*;
pub use messages::*;
pub use sudoku::{Grid, Sudoku, SUDOKU_SIZE};
pub use types::*;
