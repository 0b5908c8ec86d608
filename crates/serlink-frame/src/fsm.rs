//! Receive-side framing state machine.
//!
//! [`FrameFsm`] reassembles payloads from a byte stream one byte at a time.
//! It owns the receive buffer but not the frame timer: every step tells the
//! caller what to do with its timer through [`TimerAction`], and the caller
//! calls [`FrameFsm::timeout`] when that timer expires.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::codec::{DEFAULT_MAX_FRAME_LEN, ESC, ESCAPE_MASK, FLAG};

/// Receiver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    /// Waiting for an opening FLAG; everything else is line noise.
    Idle,
    /// Inside a frame, collecting payload bytes.
    Receiving,
    /// The previous byte was ESC; the next one is a transposed literal.
    Escaped,
}

/// What the caller should do with its frame timer after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Leave the timer as it is.
    Keep,
    /// Arm the timer, or move its deadline if already armed.
    Arm,
    /// Stop the timer.
    Disarm,
}

/// Result of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub timer: TimerAction,
    /// A completed, destuffed payload.
    pub frame: Option<Bytes>,
}

impl Step {
    fn timer(timer: TimerAction) -> Self {
        Self { timer, frame: None }
    }
}

#[derive(Debug)]
pub struct FrameFsm {
    state: FsmState,
    buf: BytesMut,
    max_frame_len: usize,
    oversize_reported: bool,
}

impl Default for FrameFsm {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameFsm {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            state: FsmState::Idle,
            buf: BytesMut::new(),
            max_frame_len,
            oversize_reported: false,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Payload bytes collected for the frame in progress.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Feed one byte from the line.
    pub fn input(&mut self, byte: u8) -> Step {
        trace!(byte, state = ?self.state, "fsm input");
        match self.state {
            FsmState::Idle => self.on_idle(byte),
            FsmState::Receiving => self.on_receiving(byte),
            FsmState::Escaped => self.on_escaped(byte),
        }
    }

    /// The frame timer expired: drop whatever was collected.
    pub fn timeout(&mut self) -> TimerAction {
        if self.state != FsmState::Idle {
            debug!(
                discarded = self.buf.len(),
                "frame timeout, partial frame discarded"
            );
        }
        self.reset()
    }

    /// Back to IDLE with an empty buffer.
    pub fn reset(&mut self) -> TimerAction {
        self.state = FsmState::Idle;
        self.buf = BytesMut::new();
        self.oversize_reported = false;
        TimerAction::Disarm
    }

    fn on_idle(&mut self, byte: u8) -> Step {
        if byte != FLAG {
            return Step::timer(TimerAction::Keep);
        }
        debug!("opening flag, receiving frame");
        self.buf.clear();
        self.oversize_reported = false;
        self.state = FsmState::Receiving;
        Step::timer(TimerAction::Arm)
    }

    fn on_receiving(&mut self, byte: u8) -> Step {
        match byte {
            FLAG if self.buf.is_empty() => Step::timer(TimerAction::Arm),
            FLAG => {
                let frame = std::mem::take(&mut self.buf).freeze();
                debug!(len = frame.len(), "closing flag, frame complete");
                let timer = self.reset();
                Step {
                    timer,
                    frame: Some(frame),
                }
            }
            ESC => {
                self.state = FsmState::Escaped;
                Step::timer(TimerAction::Arm)
            }
            other => {
                self.append(other);
                Step::timer(TimerAction::Arm)
            }
        }
    }

    fn on_escaped(&mut self, byte: u8) -> Step {
        self.append(byte ^ ESCAPE_MASK);
        self.state = FsmState::Receiving;
        Step::timer(TimerAction::Arm)
    }

    // Past the limit bytes are still kept; the limit is advisory.
    fn append(&mut self, byte: u8) {
        self.buf.put_u8(byte);
        if self.buf.len() > self.max_frame_len && !self.oversize_reported {
            warn!(
                max = self.max_frame_len,
                "frame exceeds configured maximum length"
            );
            self.oversize_reported = true;
        }
    }
}
