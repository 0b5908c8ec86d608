//! Layered data-link stack for serial byte streams.
//!
//! A stack is built top first out of [`Layer`]s:
//! - [`ArqLayer`]: stop-and-wait retransmission with an alternating bit
//! - [`ErrorDetectionLayer`]: CRC-16 trailer, corrupted frames discarded
//! - [`FramingLayer`]: byte stuffing and flag delimiting on the stream
//!
//! Everything runs on one [`serlink_transport::Poller`]; no layer blocks or
//! owns a thread.
//!
//! ```no_run
//! use bytes::Bytes;
//! use serlink_stack::{StackBuilder, StackConfig};
//! use serlink_transport::{Poller, SerialConfig, SerialPort};
//!
//! # fn main() -> serlink_stack::Result<()> {
//! let port = SerialPort::open("/dev/ttyUSB0", &SerialConfig::default())?;
//! let mut poller = Poller::new();
//! let mut stack = StackBuilder::new()
//!     .reliable(port, &StackConfig::default())
//!     .build(&mut poller)?;
//! stack.submit(Bytes::from_static(b"hello"), &mut poller);
//! # Ok(())
//! # }
//! ```

pub mod arq;
pub mod config;
pub mod detection;
pub mod error;
pub mod framing;
pub mod layer;

pub use arq::{
    ArqConfig, ArqError, ArqFrame, ArqLayer, ArqStats, SenderState, Seq, DEFAULT_ACK_TIMEOUT,
};
pub use config::StackConfig;
pub use detection::{DetectionStats, ErrorDetectionLayer};
pub use error::{Result, StackError};
pub use framing::{FramingLayer, OUTBOUND_LIMIT};
pub use layer::{Context, Direction, Layer, Stack, StackBuilder, Transfer};
