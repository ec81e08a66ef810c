//! Error type shared by the conversion, configuration and lifecycle layers.

use thiserror::Error;

/// Errors reported synchronously by this crate.
///
/// Failures of a running solve are never returned from [`start_solve`](crate::SolveController::start_solve);
/// they arrive through the completion event, where [`SolveOutcome::error`](crate::SolveOutcome::error)
/// maps them back onto [`Error::EngineFailure`] or [`Error::NoSolution`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The requested bit depth has no entry in the element type table, or the
    /// source image cannot be converted into it.
    #[error("bit depth {0} is not supported")]
    UnsupportedBitDepth(i32),
    /// The planar buffer could not be allocated.
    #[error("not enough memory for image buffer, requested {0} bytes")]
    OutOfMemory(usize),
    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// The profile index lies outside the engine's catalog.
    #[error("parameter profile {0} does not exist")]
    InvalidProfile(usize),
    /// A solve parameter failed validation.
    #[error("invalid solve parameter: {0}")]
    InvalidParameter(String),
    /// The source image is malformed, e.g. its byte length does not match its dimensions.
    #[error("invalid source image: {0}")]
    InvalidImage(String),
    /// A solve was requested before any image was loaded.
    #[error("no image loaded")]
    NoImage,
    /// The engine reported a failure.
    #[error("solving engine failed: {0}")]
    EngineFailure(String),
    /// The engine finished without a usable solution.
    #[error("no solution found")]
    NoSolution,
}

/// Shorthand for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
