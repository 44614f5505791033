//! Error types for the helm binary.
//!
//! [`EngineError`] is the top-level error type that wraps all possible
//! failure modes during startup and the tick loop.

/// Top-level error for the helm binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tiller_helm::ConfigError,
    },

    /// Building the decision engine failed.
    #[error("helm error: {source}")]
    Helm {
        /// The underlying engine error.
        #[from]
        source: tiller_helm::EngineError,
    },

    /// A report could not be serialized.
    #[error("report error: {source}")]
    Report {
        /// The underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A command-line argument was malformed.
    #[error("argument error: {message}")]
    Argument {
        /// Description of the bad argument.
        message: String,
    },
}
