//! Reliable framed messaging over serial lines.
//!
//! serlink turns a raw byte stream into a sequence of verified, de-duplicated
//! messages for one point-to-point session.
//!
//! # Crate Structure
//!
//! - [`transport`]: serial device access and the single-threaded dispatcher
//! - [`frame`]: byte-stuffed flag framing and the CRC-16 trailer
//! - [`stack`]: the layer pipeline with framing, error detection and
//!   stop-and-wait ARQ (behind the `stack` feature)

/// Re-export transport types.
pub mod transport {
    pub use serlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use serlink_frame::*;
}

/// Re-export stack types (requires `stack` feature).
#[cfg(feature = "stack")]
pub mod stack {
    pub use serlink_stack::*;
}
