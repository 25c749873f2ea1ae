//! Length-prefixed JSON framing.
//!
//! Every record travels as `[u16 big-endian length][JSON bytes]`. A frame
//! with a declared length of zero is the sender's way of saying goodbye and
//! decodes to [`Frame::Closed`] rather than to an empty record.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::constants::{LENGTH_PREFIX_BYTES, MAX_RECORD_BYTES};
use crate::error::ProtocolError;
use crate::messages::Record;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Record(Record),
    /// Zero-length frame: orderly disconnect.
    Closed,
}

/// Serialize a record into a complete frame, length prefix included.
pub fn encode(record: &Record) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(record).map_err(|e| ProtocolError::Malformed {
        raw: Vec::new(),
        reason: e.to_string(),
    })?;
    if payload.len() > MAX_RECORD_BYTES {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    buf.put_u16(payload.len() as u16);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decode the payload of one frame (length prefix already stripped).
pub fn decode(payload: &[u8]) -> Result<Record, ProtocolError> {
    serde_json::from_slice::<Record>(payload).map_err(|e| {
        // Tell an unknown command apart from a garbled body.
        let command = serde_json::from_slice::<serde_json::Value>(payload)
            .ok()
            .and_then(|v| v.get("command").and_then(|c| c.as_str()).map(str::to_string));
        match command {
            Some(command) if !Record::COMMANDS.contains(&command.as_str()) => {
                ProtocolError::UnknownCommand {
                    command,
                    raw: payload.to_vec(),
                }
            }
            _ => ProtocolError::Malformed {
                raw: payload.to_vec(),
                reason: e.to_string(),
            },
        }
    })
}

fn new_length_delimited_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(LENGTH_PREFIX_BYTES)
        .big_endian()
        .max_frame_length(MAX_RECORD_BYTES)
        .new_codec()
}

/// [`LengthDelimitedCodec`] with a 2-byte prefix and JSON record (de)serialization.
#[derive(Debug)]
pub struct RecordCodec {
    inner: LengthDelimitedCodec,
}

impl RecordCodec {
    pub fn new() -> Self {
        Self {
            inner: new_length_delimited_codec(),
        }
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RecordCodec {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        match self.inner.decode(src)? {
            None => Ok(None),
            Some(frame) if frame.is_empty() => Ok(Some(Frame::Closed)),
            Some(frame) => decode(&frame).map(|r| Some(Frame::Record(r))),
        }
    }
}

impl Encoder<&Record> for RecordCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &Record, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let frame = encode(item)?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}
