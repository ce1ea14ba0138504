use std::fmt;

/// Which frame of a factor an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRole {
    /// The target (fixed) frame.
    Target,
    /// The source (moving) frame.
    Source,
}

impl fmt::Display for FrameRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameRole::Target => write!(f, "target"),
            FrameRole::Source => write!(f, "source"),
        }
    }
}

/// Errors produced when constructing a matching cost factor.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FactorError {
    /// A required per-point attribute is missing on one of the frames.
    #[error("{frame} frame doesn't have required attribute: {attribute}")]
    MissingAttribute {
        /// The frame missing the attribute.
        frame: FrameRole,
        /// Name of the missing attribute.
        attribute: &'static str,
    },

    /// The gradient frame is not aligned with the target frame.
    #[error("gradient frame length {got} does not match target size {expected}")]
    GradientLength {
        /// Expected length (the target point count).
        expected: usize,
        /// Actual gradient frame length.
        got: usize,
    },

    /// The requested worker count is invalid.
    #[error("thread count must be > 0")]
    InvalidThreadCount,

    /// The worker thread pool failed to build.
    #[error("failed to build thread pool: {0}")]
    ThreadPool(String),
}
