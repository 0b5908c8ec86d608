//! Error-detection layer: CRC-16 trailer on the way down, verification on the
//! way up.

use bytes::{Bytes, BytesMut};
use serlink_frame::{append_fcs, verify_fcs, FrameError};
use tracing::debug;

use crate::layer::{Context, Layer};

/// Counters kept by [`ErrorDetectionLayer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionStats {
    /// Frames whose checksum matched and went up.
    pub accepted: u64,
    /// Frames discarded: checksum mismatch or too short to carry one.
    pub rejected: u64,
}

/// Appends a frame check sequence to outgoing payloads and discards
/// incoming frames whose check sequence does not match. Nothing is reported
/// back to the sender; recovery is left to the layer above.
#[derive(Debug, Default)]
pub struct ErrorDetectionLayer {
    stats: DetectionStats,
}

impl ErrorDetectionLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DetectionStats {
        self.stats
    }
}

impl Layer for ErrorDetectionLayer {
    fn name(&self) -> &'static str {
        "error-detection"
    }

    fn send_downward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        let mut protected = BytesMut::new();
        append_fcs(&data, &mut protected);
        cx.pass_down(protected.freeze());
    }

    fn deliver_upward(&mut self, data: Bytes, cx: &mut Context<'_>) {
        match verify_fcs(&data) {
            Ok(payload) => {
                self.stats.accepted += 1;
                cx.pass_up(payload);
            }
            Err(FrameError::TooShort { len, .. }) => {
                self.stats.rejected += 1;
                debug!(len, "frame too short for a checksum, discarded");
            }
            Err(err) => {
                self.stats.rejected += 1;
                debug!(error = %err, len = data.len(), "checksum failed, frame discarded");
            }
        }
    }
}
