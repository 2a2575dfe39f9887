//! Chunked bulk-transfer codec and reassembly.
//!
//! A single large payload (one captured media fragment) is streamed as a
//! sequence of chunk frames over a channel with a bounded message size:
//!
//! ```text
//! [tag:u16 = 6][chunk_id:u16][range_start:u32][range_end:u32]
//! [total_length:u32][duration:f32][payload: range_end - range_start bytes]
//! ```
//!
//! The ranges of one logical payload partition `[0, total_length)` exactly:
//! contiguous, non-overlapping, and complete. The receiver reassembles by
//! `chunk_id` and treats the payload as complete only when the received byte
//! total equals `total_length` from the first frame of that id.

use std::collections::HashMap;

use super::{check_len, read_f32, read_u16, read_u32, ProtocolError};
use crate::protocol::event::EventTag;

/// Fixed size of the chunk frame header: tag, chunk id, both range bounds,
/// total length, and duration.
pub const CHUNK_HEADER_LEN: usize = 20;

/// One fragment of a bulk transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkFrame {
    /// Identifies the logical payload this fragment belongs to.
    pub chunk_id: u16,
    /// First byte offset of `payload` within the logical payload.
    pub range_start: u32,
    /// One past the last byte offset covered by `payload`.
    pub range_end: u32,
    /// Total length of the logical payload in bytes.
    pub total_length: u32,
    /// Playback duration of the fragment in seconds.
    pub duration: f32,
    /// The raw bytes for `[range_start, range_end)`.
    pub payload: Vec<u8>,
}

impl ChunkFrame {
    /// Builds a frame, validating range/payload consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedFrame`] when the range is inverted,
    /// exceeds `total_length`, or does not match the payload length.
    pub fn new(
        chunk_id: u16,
        range_start: u32,
        range_end: u32,
        total_length: u32,
        duration: f32,
        payload: Vec<u8>,
    ) -> Result<Self, ProtocolError> {
        if range_start > range_end || range_end > total_length {
            return Err(ProtocolError::MalformedFrame(format!(
                "invalid range [{range_start}, {range_end}) for total length {total_length}"
            )));
        }
        let span = (range_end - range_start) as usize;
        if payload.len() != span {
            return Err(ProtocolError::MalformedFrame(format!(
                "payload length {} does not match range span {span}",
                payload.len()
            )));
        }
        Ok(Self {
            chunk_id,
            range_start,
            range_end,
            total_length,
            duration,
            payload,
        })
    }

    /// Number of payload bytes carried by this frame.
    pub fn span(&self) -> usize {
        self.payload.len()
    }
}

/// Encodes a chunk frame including its fixed-size header.
pub fn encode_chunk(frame: &ChunkFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CHUNK_HEADER_LEN + frame.payload.len());
    buf.extend_from_slice(&(EventTag::MediaChunk as u16).to_le_bytes());
    buf.extend_from_slice(&frame.chunk_id.to_le_bytes());
    buf.extend_from_slice(&frame.range_start.to_le_bytes());
    buf.extend_from_slice(&frame.range_end.to_le_bytes());
    buf.extend_from_slice(&frame.total_length.to_le_bytes());
    buf.extend_from_slice(&frame.duration.to_le_bytes());
    buf.extend_from_slice(&frame.payload);
    buf
}

/// Decodes one chunk frame.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownTag`] when the leading tag is not the
/// media-chunk tag, and [`ProtocolError::InsufficientData`]/
/// [`ProtocolError::MalformedFrame`] for truncated or inconsistent frames.
pub fn decode_chunk(bytes: &[u8]) -> Result<ChunkFrame, ProtocolError> {
    let tag = read_u16(bytes, 0)?;
    if tag != EventTag::MediaChunk as u16 {
        return Err(ProtocolError::UnknownTag(tag));
    }
    check_len(bytes, CHUNK_HEADER_LEN)?;

    let chunk_id = read_u16(bytes, 2)?;
    let range_start = read_u32(bytes, 4)?;
    let range_end = read_u32(bytes, 8)?;
    let total_length = read_u32(bytes, 12)?;
    let duration = read_f32(bytes, 16)?;

    if range_start > range_end || range_end > total_length {
        return Err(ProtocolError::MalformedFrame(format!(
            "invalid range [{range_start}, {range_end}) for total length {total_length}"
        )));
    }
    let span = (range_end - range_start) as usize;
    check_len(bytes, CHUNK_HEADER_LEN + span)?;
    if bytes.len() != CHUNK_HEADER_LEN + span {
        return Err(ProtocolError::MalformedFrame(format!(
            "frame carries {} payload bytes, range declares {span}",
            bytes.len() - CHUNK_HEADER_LEN
        )));
    }

    Ok(ChunkFrame {
        chunk_id,
        range_start,
        range_end,
        total_length,
        duration,
        payload: bytes[CHUNK_HEADER_LEN..].to_vec(),
    })
}

/// Splits `[0, total_length)` into sequential chunk ranges.
///
/// Every range spans at most `max_chunk_size` bytes, consecutive ranges are
/// contiguous, and their union is exactly `[0, total_length)` — `ceil(L / C)`
/// ranges in total.
///
/// # Examples
///
/// ```rust
/// use padlink_core::chunk_ranges;
///
/// assert_eq!(chunk_ranges(1000, 400), vec![(0, 400), (400, 800), (800, 1000)]);
/// ```
pub fn chunk_ranges(total_length: u32, max_chunk_size: u32) -> Vec<(u32, u32)> {
    assert!(max_chunk_size > 0, "max_chunk_size must be positive");

    let mut ranges = Vec::with_capacity(total_length.div_ceil(max_chunk_size) as usize);
    let mut offset = 0;
    while offset < total_length {
        let end = (offset + max_chunk_size).min(total_length);
        ranges.push((offset, end));
        offset = end;
    }
    ranges
}

/// A fully reassembled bulk payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPayload {
    pub chunk_id: u16,
    pub duration: f32,
    pub data: Vec<u8>,
}

/// Per-id state while a transfer is in flight.
#[derive(Debug)]
struct PartialTransfer {
    total_length: u32,
    duration: f32,
    received: u64,
    data: Vec<u8>,
}

/// Reassembles chunk frames into complete payloads, keyed by chunk id.
///
/// Frames may arrive for several ids concurrently; each id completes
/// independently once its received byte total reaches the `total_length`
/// announced by the first frame of that id.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    partial: HashMap<u16, PartialTransfer>,
}

impl ChunkAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts one frame, returning the reassembled payload when it was the
    /// last missing piece for its chunk id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedFrame`] when a frame disagrees with
    /// the `total_length` announced by an earlier frame of the same id.
    pub fn accept(&mut self, frame: ChunkFrame) -> Result<Option<MediaPayload>, ProtocolError> {
        let entry = self.partial.entry(frame.chunk_id).or_insert_with(|| {
            PartialTransfer {
                total_length: frame.total_length,
                duration: frame.duration,
                received: 0,
                data: vec![0; frame.total_length as usize],
            }
        });

        if entry.total_length != frame.total_length {
            let declared = entry.total_length;
            self.partial.remove(&frame.chunk_id);
            return Err(ProtocolError::MalformedFrame(format!(
                "chunk {} changed total length from {declared} to {}",
                frame.chunk_id, frame.total_length
            )));
        }

        let start = frame.range_start as usize;
        entry.data[start..start + frame.span()].copy_from_slice(&frame.payload);
        entry.received += frame.span() as u64;

        if entry.received >= u64::from(entry.total_length) {
            let done = self.partial.remove(&frame.chunk_id).unwrap();
            return Ok(Some(MediaPayload {
                chunk_id: frame.chunk_id,
                duration: done.duration,
                data: done.data,
            }));
        }
        Ok(None)
    }

    /// Number of transfers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.partial.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(chunk_id: u16, start: u32, end: u32, total: u32, fill: u8) -> ChunkFrame {
        ChunkFrame::new(
            chunk_id,
            start,
            end,
            total,
            2.0,
            vec![fill; (end - start) as usize],
        )
        .unwrap()
    }

    // ── Frame codec ──────────────────────────────────────────────────────────

    #[test]
    fn test_chunk_frame_round_trip() {
        let original = ChunkFrame::new(7, 400, 800, 1000, 4.5, vec![0xAB; 400]).unwrap();
        let decoded = decode_chunk(&encode_chunk(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_chunk_header_is_twenty_bytes() {
        let f = frame(1, 0, 0, 0, 0);
        assert_eq!(encode_chunk(&f).len(), CHUNK_HEADER_LEN);
    }

    #[test]
    fn test_chunk_frame_exact_header_layout() {
        let f = ChunkFrame::new(0x0102, 0x0A, 0x0C, 0x10, 1.0, vec![0xEE, 0xFF]).unwrap();
        let bytes = encode_chunk(&f);
        assert_eq!(&bytes[0..2], &[0x06, 0x00], "tag");
        assert_eq!(&bytes[2..4], &[0x02, 0x01], "chunk id");
        assert_eq!(&bytes[4..8], &[0x0A, 0x00, 0x00, 0x00], "range start");
        assert_eq!(&bytes[8..12], &[0x0C, 0x00, 0x00, 0x00], "range end");
        assert_eq!(&bytes[12..16], &[0x10, 0x00, 0x00, 0x00], "total length");
        assert_eq!(&bytes[16..20], &1.0f32.to_le_bytes(), "duration");
        assert_eq!(&bytes[20..], &[0xEE, 0xFF], "payload");
    }

    #[test]
    fn test_new_rejects_inverted_range() {
        let result = ChunkFrame::new(1, 10, 5, 20, 0.0, vec![]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_new_rejects_range_past_total_length() {
        let result = ChunkFrame::new(1, 0, 30, 20, 0.0, vec![0; 30]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_new_rejects_payload_length_mismatch() {
        let result = ChunkFrame::new(1, 0, 4, 8, 0.0, vec![0; 3]);
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
    }

    #[test]
    fn test_decode_rejects_wrong_tag() {
        let mut bytes = encode_chunk(&frame(1, 0, 2, 2, 0));
        bytes[0] = 0x01;
        assert_eq!(decode_chunk(&bytes), Err(ProtocolError::UnknownTag(1)));
    }

    #[test]
    fn test_decode_rejects_truncated_payload() {
        let mut bytes = encode_chunk(&frame(1, 0, 4, 4, 9));
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            decode_chunk(&bytes),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_trailing_garbage() {
        let mut bytes = encode_chunk(&frame(1, 0, 4, 4, 9));
        bytes.push(0);
        assert!(matches!(
            decode_chunk(&bytes),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    // ── Range splitting ──────────────────────────────────────────────────────

    #[test]
    fn test_chunk_ranges_thousand_bytes_by_four_hundred() {
        let ranges = chunk_ranges(1000, 400);
        assert_eq!(ranges, vec![(0, 400), (400, 800), (800, 1000)]);
    }

    #[test]
    fn test_chunk_ranges_exact_multiple_has_no_tail() {
        let ranges = chunk_ranges(800, 400);
        assert_eq!(ranges, vec![(0, 400), (400, 800)]);
    }

    #[test]
    fn test_chunk_ranges_single_chunk_when_payload_fits() {
        assert_eq!(chunk_ranges(100, 400), vec![(0, 100)]);
    }

    #[test]
    fn test_chunk_ranges_empty_payload_yields_no_ranges() {
        assert!(chunk_ranges(0, 400).is_empty());
    }

    #[test]
    fn test_chunk_ranges_partition_properties() {
        let total = 12_345;
        let size = 512;
        let ranges = chunk_ranges(total, size);

        assert_eq!(ranges.len() as u32, total.div_ceil(size));
        assert_eq!(ranges.first().unwrap().0, 0);
        assert_eq!(ranges.last().unwrap().1, total);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0, "ranges must be contiguous");
        }
        for (start, end) in &ranges {
            assert!(end - start <= size);
            assert!(start < end);
        }
    }

    // ── Reassembly ───────────────────────────────────────────────────────────

    #[test]
    fn test_assembler_completes_on_exact_byte_total() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.accept(frame(5, 0, 400, 1000, 1)).unwrap(), None);
        assert_eq!(assembler.accept(frame(5, 400, 800, 1000, 2)).unwrap(), None);

        let done = assembler
            .accept(frame(5, 800, 1000, 1000, 3))
            .unwrap()
            .expect("third frame completes the payload");
        assert_eq!(done.chunk_id, 5);
        assert_eq!(done.data.len(), 1000);
        assert_eq!(done.data[0], 1);
        assert_eq!(done.data[400], 2);
        assert_eq!(done.data[999], 3);
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn test_assembler_tolerates_out_of_order_frames() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.accept(frame(1, 400, 800, 1000, 2)).unwrap(), None);
        assert_eq!(assembler.accept(frame(1, 800, 1000, 1000, 3)).unwrap(), None);
        let done = assembler.accept(frame(1, 0, 400, 1000, 1)).unwrap().unwrap();
        assert_eq!(&done.data[..3], &[1, 1, 1]);
        assert_eq!(&done.data[400..403], &[2, 2, 2]);
    }

    #[test]
    fn test_assembler_keeps_chunk_ids_independent() {
        let mut assembler = ChunkAssembler::new();
        assert_eq!(assembler.accept(frame(1, 0, 4, 8, 1)).unwrap(), None);
        assert_eq!(assembler.accept(frame(2, 0, 4, 8, 2)).unwrap(), None);
        assert_eq!(assembler.in_flight(), 2);

        let done = assembler.accept(frame(2, 4, 8, 8, 2)).unwrap().unwrap();
        assert_eq!(done.chunk_id, 2);
        assert_eq!(assembler.in_flight(), 1);
    }

    #[test]
    fn test_assembler_single_frame_payload_completes_immediately() {
        let mut assembler = ChunkAssembler::new();
        let done = assembler.accept(frame(9, 0, 16, 16, 7)).unwrap().unwrap();
        assert_eq!(done.data, vec![7; 16]);
    }

    #[test]
    fn test_assembler_rejects_total_length_change_mid_transfer() {
        let mut assembler = ChunkAssembler::new();
        assembler.accept(frame(1, 0, 4, 12, 0)).unwrap();
        let result = assembler.accept(frame(1, 4, 8, 16, 0));
        assert!(matches!(result, Err(ProtocolError::MalformedFrame(_))));
        // The poisoned transfer is discarded rather than left half-filled.
        assert_eq!(assembler.in_flight(), 0);
    }

    #[test]
    fn test_assembler_preserves_duration_from_first_frame() {
        let mut assembler = ChunkAssembler::new();
        let first = ChunkFrame::new(4, 0, 2, 4, 6.25, vec![0, 0]).unwrap();
        let second = ChunkFrame::new(4, 2, 4, 4, 6.25, vec![0, 0]).unwrap();
        assembler.accept(first).unwrap();
        let done = assembler.accept(second).unwrap().unwrap();
        assert_eq!(done.duration, 6.25);
    }
}
