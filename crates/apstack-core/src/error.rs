use thiserror::Error;

#[derive(Error, Debug)]
pub enum StackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid geometry or parameter values.
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A shift search did not converge for the given frame. Recoverable by
    /// retrying with another alignment rectangle.
    #[error("Search failed for frame {frame}: {reason}")]
    Internal { frame: usize, reason: String },

    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Degenerate paraboloid fit during sub-pixel refinement.
    #[error("Division by zero in sub-pixel fit")]
    DivideByZero,

    #[error("Wrong call order: {0}")]
    WrongOrdering(String),

    #[error("Frame alignment failed at frame {frame} after trying {tried} alignment rectangle(s)")]
    AlignmentFailed { frame: usize, tried: usize },

    /// Estimated stacking buffers do not fit into the configured budget.
    #[error("Stacking needs about {required} bytes of buffer memory, budget is {budget} bytes")]
    MemoryBudgetExceeded { required: u64, budget: u64 },

    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    #[error("Frame index {index} out of range (total: {total})")]
    FrameIndexOutOfRange { index: usize, total: usize },

    #[error("Empty frame sequence")]
    EmptySequence,

    #[error("Operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StackError>;
