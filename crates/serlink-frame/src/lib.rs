//! Flag-delimited, byte-stuffed framing for serial links.
//!
//! Every frame on the wire is:
//! - a FLAG byte (0x7E)
//! - the payload, with FLAG and ESC (0x7D) bytes escaped as `ESC, byte ^ 0x20`
//! - a closing FLAG byte
//!
//! The receive side is a byte-at-a-time state machine ([`FrameFsm`]) whose
//! frame timer is driven by the caller. [`fcs`] adds the CRC-16 trailer used
//! for error detection.

pub mod codec;
pub mod error;
pub mod fcs;
pub mod fsm;
pub mod reader;
pub mod writer;

pub use codec::{
    destuff, encode_frame, needs_escape, stuff, FrameConfig, DEFAULT_FRAME_TIMEOUT,
    DEFAULT_MAX_FRAME_LEN, ESC, ESCAPE_MASK, FLAG,
};
pub use error::{FrameError, Result};
pub use fcs::{append_fcs, checksum, verify_fcs, FCS_LEN};
pub use fsm::{FrameFsm, FsmState, Step, TimerAction};
pub use reader::{FrameReader, ReadOutcome};
pub use writer::{write_frame, FrameWriter, OutboundBuffer};
