//! Error types for `toolbridge-template`.

use thiserror::Error;

/// Template parse/render failures.
///
/// These never cross the render boundary as `Err`: `render` converts them
/// into a failed [`crate::RenderOutcome`]. `parse` returns them directly so
/// config validation can reject bad templates up front.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Malformed template (unterminated or empty placeholder, bad path).
    #[error("Malformed template: {0}")]
    Malformed(String),

    /// A required variable was absent from the context.
    #[error("Missing required variable '{0}'")]
    MissingVariable(String),

    /// The path resolved to an object or array, which cannot be spliced
    /// into a string.
    #[error("Cannot substitute composite value for '{0}'")]
    CompositeValue(String),
}
