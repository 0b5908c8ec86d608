//! Serial byte transport and readiness dispatcher.
//!
//! This is the lowest layer of serlink:
//! - [`SerialPort`] opens and configures a serial device (raw mode, 8N1)
//! - [`SerialStream`] is the connected byte stream, or one end of a
//!   null-modem style socket pair
//! - [`Poller`] is the single-threaded event loop every layer registers with
//!
//! Everything else builds on the [`ByteStream`] and [`Poller`] types here.

pub mod error;
pub mod poller;
pub mod serial;
pub mod traits;

pub use error::{Result, TransportError};
pub use poller::{EventHandler, Poller, TimerHandle, Token};
pub use serial::{SerialConfig, SerialPort, DEFAULT_BAUD};
pub use traits::{ByteStream, SerialStream};
