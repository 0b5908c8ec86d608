use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame delimiter.
pub const FLAG: u8 = 0x7E;

/// Escape byte announcing a transposed reserved byte.
pub const ESC: u8 = 0x7D;

/// XOR mask applied to an escaped byte.
pub const ESCAPE_MASK: u8 = 0x20;

/// Default soft limit on a received frame, in destuffed bytes.
pub const DEFAULT_MAX_FRAME_LEN: usize = 256;

/// Default time a partially received frame may stay idle.
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Returns true if `byte` must be escaped on the wire.
pub const fn needs_escape(byte: u8) -> bool {
    byte == FLAG || byte == ESC
}

/// Append `payload` to `dst` with every FLAG/ESC byte replaced by
/// `ESC, byte ^ ESCAPE_MASK`.
pub fn stuff(payload: &[u8], dst: &mut BytesMut) {
    let escapes = payload.iter().filter(|b| needs_escape(**b)).count();
    dst.reserve(payload.len() + escapes);
    for &byte in payload {
        if needs_escape(byte) {
            dst.put_u8(ESC);
            dst.put_u8(byte ^ ESCAPE_MASK);
        } else {
            dst.put_u8(byte);
        }
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────┬──────────────────────────┬──────┐
/// │ FLAG │ stuffed payload          │ FLAG │
/// │ 0x7E │ 0x7E → 0x7D 0x5E         │ 0x7E │
/// │      │ 0x7D → 0x7D 0x5D         │      │
/// └──────┴──────────────────────────┴──────┘
/// ```
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) {
    dst.reserve(payload.len() + 2);
    dst.put_u8(FLAG);
    stuff(payload, dst);
    dst.put_u8(FLAG);
}

/// Undo [`stuff`].
///
/// Unescaped FLAG bytes are not expected here and are copied through; the
/// receive state machine never hands them over.
pub fn destuff(src: &[u8]) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(src.len());
    let mut escaped = false;
    for &byte in src {
        if escaped {
            out.put_u8(byte ^ ESCAPE_MASK);
            escaped = false;
        } else if byte == ESC {
            escaped = true;
        } else {
            out.put_u8(byte);
        }
    }
    if escaped {
        return Err(FrameError::DanglingEscape);
    }
    Ok(out.freeze())
}

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Soft limit on a received frame. Longer frames are still accepted;
    /// crossing the limit is only logged.
    pub max_frame_len: usize,
    /// How long a frame in progress may go without a new byte before it is
    /// discarded.
    pub frame_timeout: Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}
