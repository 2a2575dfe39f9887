//! Integration tests for the padlink-core wire protocol.
//!
//! These tests exercise the public API the way the host uses it: frames are
//! encoded on one side, carried as opaque transport messages, and dispatched
//! through `decode_frame` on the other; chunk streams are split with
//! `chunk_ranges` and rebuilt with `ChunkAssembler`.

use padlink_core::protocol::chunk::{decode_chunk, encode_chunk};
use padlink_core::protocol::event::encode_input;
use padlink_core::{
    chunk_ranges, decode_frame, ChunkAssembler, ChunkFrame, InputEvent, ProtocolError, WireFrame,
};

/// Encodes an input event and dispatches it back through the frame decoder.
fn roundtrip_input(event: InputEvent) -> InputEvent {
    match decode_frame(&encode_input(&event)).expect("decode must succeed") {
        WireFrame::Input(decoded) => decoded,
        WireFrame::MediaChunk(_) => panic!("input event decoded as media chunk"),
    }
}

#[test]
fn test_roundtrip_every_input_event_tag() {
    let events = [
        InputEvent::TouchMove {
            x_ratio: 0.1,
            y_ratio: 0.9,
        },
        InputEvent::TouchTap {
            x_ratio: 0.5,
            y_ratio: 0.5,
        },
        InputEvent::JoystickChange {
            degree: 359.9,
            distance: 1.0,
        },
        InputEvent::PadButtonTap {
            index: 7,
            gesture: 2,
        },
        InputEvent::GyroscopeChange {
            azimuth: -179.0,
            pitch: 89.5,
            roll: 0.0,
        },
    ];

    for event in events {
        assert_eq!(roundtrip_input(event), event);
    }
}

#[test]
fn test_unknown_tag_never_panics_and_later_frames_survive() {
    // A frame with a bogus tag is rejected with a typed error...
    let bogus = [0x63u8, 0x00, 1, 2, 3, 4];
    assert_eq!(decode_frame(&bogus), Err(ProtocolError::UnknownTag(0x63)));

    // ...and the next, independently-delimited frame decodes normally.
    let next = encode_input(&InputEvent::TouchTap {
        x_ratio: 0.25,
        y_ratio: 0.25,
    });
    assert!(matches!(
        decode_frame(&next),
        Ok(WireFrame::Input(InputEvent::TouchTap { .. }))
    ));
}

#[test]
fn test_spec_scenario_thousand_byte_payload_in_three_chunks() {
    // A 1,000-byte payload with a 400-byte chunk budget yields exactly the
    // ranges [0,400) [400,800) [800,1000), one frame each, with a constant
    // chunk id and the full total length in every header.
    let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
    let ranges = chunk_ranges(payload.len() as u32, 400);
    assert_eq!(ranges, vec![(0, 400), (400, 800), (800, 1000)]);

    let frames: Vec<ChunkFrame> = ranges
        .iter()
        .map(|&(start, end)| {
            ChunkFrame::new(
                11,
                start,
                end,
                payload.len() as u32,
                5.5,
                payload[start as usize..end as usize].to_vec(),
            )
            .unwrap()
        })
        .collect();

    assert_eq!(frames.len(), 3);
    for frame in &frames {
        assert_eq!(frame.chunk_id, 11);
        assert_eq!(frame.total_length, 1000);
    }

    // The wire trip preserves each frame, and reassembly restores the payload.
    let mut assembler = ChunkAssembler::new();
    let mut completed = None;
    for frame in frames {
        let decoded = decode_chunk(&encode_chunk(&frame)).unwrap();
        if let Some(done) = assembler.accept(decoded).unwrap() {
            completed = Some(done);
        }
    }

    let done = completed.expect("stream must complete after the final chunk");
    assert_eq!(done.data, payload);
    assert_eq!(done.duration, 5.5);
}

#[test]
fn test_chunk_stream_is_complete_only_at_exact_total() {
    let payload = vec![0x5Au8; 900];
    let mut assembler = ChunkAssembler::new();

    let mut frames: Vec<ChunkFrame> = chunk_ranges(900, 256)
        .into_iter()
        .map(|(start, end)| {
            ChunkFrame::new(
                3,
                start,
                end,
                900,
                1.0,
                payload[start as usize..end as usize].to_vec(),
            )
            .unwrap()
        })
        .collect();

    let last = frames.pop().unwrap();
    for frame in frames {
        assert!(
            assembler.accept(frame).unwrap().is_none(),
            "stream must not complete before every byte arrived"
        );
    }
    assert!(assembler.accept(last).unwrap().is_some());
}

#[test]
fn test_mixed_event_and_chunk_traffic_dispatches_by_tag() {
    let event_bytes = encode_input(&InputEvent::JoystickChange {
        degree: 90.0,
        distance: 0.4,
    });
    let chunk_bytes = encode_chunk(&ChunkFrame::new(1, 0, 8, 8, 0.5, vec![1; 8]).unwrap());

    assert!(matches!(
        decode_frame(&event_bytes),
        Ok(WireFrame::Input(InputEvent::JoystickChange { .. }))
    ));
    assert!(matches!(
        decode_frame(&chunk_bytes),
        Ok(WireFrame::MediaChunk(_))
    ));
}
