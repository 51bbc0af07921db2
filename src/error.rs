use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptureError>;

/// Errors raised by capture collaborators and the session that drives them.
///
/// The hand-off primitives themselves never fail; everything here comes from
/// opening a frame source or running its worker thread.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("opening capture device failed: {0}")]
    OpenDevice(String),

    #[error("adding preview input failed")]
    AddInput,

    #[error("adding preview output failed")]
    AddOutput,

    #[error("adding preview connection failed")]
    AddConnection,

    #[error("frame buffer is {actual} bytes, expected {expected}")]
    FrameSize { expected: usize, actual: usize },

    #[error("a {width}x{height} frame is too large to address")]
    FrameTooLarge { width: u32, height: u32 },

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("capture thread panicked")]
    WorkerPanicked,

    /// Any other failure reported by a frame source.
    #[error("frame source error: {0}")]
    Source(String),
}
