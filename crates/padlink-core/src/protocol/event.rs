//! Binary codec for the real-time input event frames.
//!
//! Wire format, all multi-byte values little-endian, no padding:
//!
//! ```text
//! [tag:u16][fields...]
//!
//! tag 1  touch move        x_ratio:f32  y_ratio:f32
//! tag 2  touch tap         x_ratio:f32  y_ratio:f32
//! tag 3  joystick change   degree:f32   distance:f32
//! tag 4  pad button tap    index:u16    gesture:u16
//! tag 5  gyroscope change  azimuth:f32  pitch:f32  roll:f32
//! tag 6  media chunk       (see the chunk module)
//! ```
//!
//! Each frame is delivered as one transport message, so a bad frame never
//! corrupts the ones after it.

use serde::{Deserialize, Serialize};

use super::{check_len, read_f32, read_u16, ProtocolError};

/// Size of the leading tag in every binary frame.
pub const TAG_LEN: usize = 2;

/// Frame tags carried in the first two bytes of every binary message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum EventTag {
    TouchMove = 1,
    TouchTap = 2,
    JoystickChange = 3,
    PadButtonTap = 4,
    GyroscopeChange = 5,
    MediaChunk = 6,
}

impl TryFrom<u16> for EventTag {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(EventTag::TouchMove),
            2 => Ok(EventTag::TouchTap),
            3 => Ok(EventTag::JoystickChange),
            4 => Ok(EventTag::PadButtonTap),
            5 => Ok(EventTag::GyroscopeChange),
            6 => Ok(EventTag::MediaChunk),
            _ => Err(()),
        }
    }
}

/// A decoded real-time input event from a controller peer.
///
/// Touch coordinates are 0–1 ratios of the controller surface; the joystick
/// reports a direction in degrees and a 0–1 deflection distance; gyroscope
/// angles are degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    TouchMove { x_ratio: f32, y_ratio: f32 },
    TouchTap { x_ratio: f32, y_ratio: f32 },
    JoystickChange { degree: f32, distance: f32 },
    PadButtonTap { index: u16, gesture: u16 },
    GyroscopeChange { azimuth: f32, pitch: f32, roll: f32 },
}

impl InputEvent {
    /// Returns the wire tag for this event.
    pub fn tag(&self) -> EventTag {
        match self {
            InputEvent::TouchMove { .. } => EventTag::TouchMove,
            InputEvent::TouchTap { .. } => EventTag::TouchTap,
            InputEvent::JoystickChange { .. } => EventTag::JoystickChange,
            InputEvent::PadButtonTap { .. } => EventTag::PadButtonTap,
            InputEvent::GyroscopeChange { .. } => EventTag::GyroscopeChange,
        }
    }
}

/// Encodes an input event into one binary frame.
pub fn encode_input(event: &InputEvent) -> Vec<u8> {
    let mut buf = Vec::with_capacity(TAG_LEN + 12);
    buf.extend_from_slice(&(event.tag() as u16).to_le_bytes());
    match *event {
        InputEvent::TouchMove { x_ratio, y_ratio } | InputEvent::TouchTap { x_ratio, y_ratio } => {
            buf.extend_from_slice(&x_ratio.to_le_bytes());
            buf.extend_from_slice(&y_ratio.to_le_bytes());
        }
        InputEvent::JoystickChange { degree, distance } => {
            buf.extend_from_slice(&degree.to_le_bytes());
            buf.extend_from_slice(&distance.to_le_bytes());
        }
        InputEvent::PadButtonTap { index, gesture } => {
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&gesture.to_le_bytes());
        }
        InputEvent::GyroscopeChange {
            azimuth,
            pitch,
            roll,
        } => {
            buf.extend_from_slice(&azimuth.to_le_bytes());
            buf.extend_from_slice(&pitch.to_le_bytes());
            buf.extend_from_slice(&roll.to_le_bytes());
        }
    }
    buf
}

/// Decodes one input event frame (tags 1–5).
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownTag`] for any tag outside 1–5 (including
/// the media-chunk tag, which is not an input event) and
/// [`ProtocolError::InsufficientData`] for truncated frames.
///
/// # Examples
///
/// ```rust
/// use padlink_core::protocol::event::{decode_input, encode_input, InputEvent};
///
/// let event = InputEvent::TouchTap { x_ratio: 0.5, y_ratio: 0.5 };
/// let decoded = decode_input(&encode_input(&event)).unwrap();
/// assert_eq!(decoded, event);
/// ```
pub fn decode_input(bytes: &[u8]) -> Result<InputEvent, ProtocolError> {
    let tag_value = read_u16(bytes, 0)?;
    let tag = EventTag::try_from(tag_value).map_err(|_| ProtocolError::UnknownTag(tag_value))?;

    match tag {
        EventTag::TouchMove => {
            check_len(bytes, TAG_LEN + 8)?;
            Ok(InputEvent::TouchMove {
                x_ratio: read_f32(bytes, TAG_LEN)?,
                y_ratio: read_f32(bytes, TAG_LEN + 4)?,
            })
        }
        EventTag::TouchTap => {
            check_len(bytes, TAG_LEN + 8)?;
            Ok(InputEvent::TouchTap {
                x_ratio: read_f32(bytes, TAG_LEN)?,
                y_ratio: read_f32(bytes, TAG_LEN + 4)?,
            })
        }
        EventTag::JoystickChange => {
            check_len(bytes, TAG_LEN + 8)?;
            Ok(InputEvent::JoystickChange {
                degree: read_f32(bytes, TAG_LEN)?,
                distance: read_f32(bytes, TAG_LEN + 4)?,
            })
        }
        EventTag::PadButtonTap => {
            check_len(bytes, TAG_LEN + 4)?;
            Ok(InputEvent::PadButtonTap {
                index: read_u16(bytes, TAG_LEN)?,
                gesture: read_u16(bytes, TAG_LEN + 2)?,
            })
        }
        EventTag::GyroscopeChange => {
            check_len(bytes, TAG_LEN + 12)?;
            Ok(InputEvent::GyroscopeChange {
                azimuth: read_f32(bytes, TAG_LEN)?,
                pitch: read_f32(bytes, TAG_LEN + 4)?,
                roll: read_f32(bytes, TAG_LEN + 8)?,
            })
        }
        EventTag::MediaChunk => Err(ProtocolError::UnknownTag(tag_value)),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
