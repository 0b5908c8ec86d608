use std::path::PathBuf;

/// Errors that can occur in serial transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the serial device.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to apply line settings to an opened device.
    #[error("failed to configure {path}: {source}")]
    Configure {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The requested baud rate has no termios equivalent.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),

    /// An I/O error occurred on the transport stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A dispatcher call referenced a token that was never registered.
    #[error("unknown registration token {0}")]
    UnknownToken(usize),

    /// A timer operation targeted a registration created without a timeout.
    #[error("registration {0} has no timeout interval")]
    NoTimeout(usize),
}

pub type Result<T> = std::result::Result<T, TransportError>;
