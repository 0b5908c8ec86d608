/// Errors that can occur while building or driving a stack.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    /// A stack needs at least one layer.
    #[error("stack has no layers")]
    Empty,

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] serlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] serlink_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, StackError>;
