//! Data-channel wire protocol: binary event frames, chunked bulk transfer,
//! and the JSON control plane.
//!
//! Every inbound binary message on a peer link is one self-delimited frame
//! (the transport preserves message boundaries; there is no length prefix in
//! the stream). The first two bytes are a little-endian tag selecting the
//! frame kind; [`decode_frame`] dispatches on it. An unrecognised tag is a
//! typed error so the dispatcher can log and drop the frame without
//! desynchronising later frames.

pub mod chunk;
pub mod control;
pub mod event;

use thiserror::Error;

use chunk::ChunkFrame;
use event::{EventTag, InputEvent};

/// Errors that can occur while encoding or decoding wire frames.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame layout requires.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The tag at offset 0 is not a recognised frame kind.
    #[error("unknown frame tag: {0}")]
    UnknownTag(u16),

    /// The frame violates its own layout (bad ranges, length mismatch, etc.).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// One decoded inbound binary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum WireFrame {
    /// A real-time input event (tags 1–5).
    Input(InputEvent),
    /// One fragment of a bulk media transfer (tag 6).
    MediaChunk(ChunkFrame),
}

/// Decodes one binary frame, dispatching on the leading tag.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownTag`] for tags outside the defined set and
/// [`ProtocolError::InsufficientData`]/[`ProtocolError::MalformedFrame`] for
/// truncated or inconsistent frames.
pub fn decode_frame(bytes: &[u8]) -> Result<WireFrame, ProtocolError> {
    let tag_value = read_u16(bytes, 0)?;
    match EventTag::try_from(tag_value) {
        Ok(EventTag::MediaChunk) => chunk::decode_chunk(bytes).map(WireFrame::MediaChunk),
        Ok(_) => event::decode_input(bytes).map(WireFrame::Input),
        Err(()) => Err(ProtocolError::UnknownTag(tag_value)),
    }
}

// ── Little-endian read helpers shared by the frame codecs ─────────────────────

pub(crate) fn read_u16(buf: &[u8], offset: usize) -> Result<u16, ProtocolError> {
    check_len(buf, offset + 2)?;
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

pub(crate) fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    check_len(buf, offset + 4)?;
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

pub(crate) fn read_f32(buf: &[u8], offset: usize) -> Result<f32, ProtocolError> {
    check_len(buf, offset + 4)?;
    Ok(f32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

pub(crate) fn check_len(buf: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}
