/// Errors that can occur during frame encoding or payload transforms.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit the 32-bit length field.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// gzip compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(#[source] std::io::Error),

    /// Inflating would produce more than `max` bytes.
    #[error("inflated payload exceeds {max} bytes")]
    InflateLimit { max: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
