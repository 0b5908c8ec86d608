/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame cannot even hold the checksum trailer.
    #[error("frame too short ({len} bytes, need at least {min})")]
    TooShort { len: usize, min: usize },

    /// The trailing checksum does not match the frame contents.
    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    ChecksumMismatch { expected: u16, actual: u16 },

    /// The stuffed data ended right after an escape byte.
    #[error("stuffed data ends with a dangling escape byte")]
    DanglingEscape,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
