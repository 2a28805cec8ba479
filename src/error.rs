use crate::token::Token;
use thiserror::Error;

/// Errors that can occur while building a machine or driving one of its runs.
///
/// Cancellation is not an error: a preempted run completes with `Ok(())`.
///
/// # Non-Exhaustive
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code. When matching
/// on this error, always include a wildcard pattern:
///
/// ```
/// use ayatori::MachineError;
///
/// fn handle_error(error: MachineError) {
///     match error {
///         MachineError::ActionFailed { token, details } => {
///             eprintln!("Action {} failed: {}", token, details);
///         }
///         MachineError::UnrecognizedStackElement { found } => {
///             eprintln!("Bad step: {}", found);
///         }
///         MachineError::ActionNotFound(token) => {
///             eprintln!("No action for {}", token);
///         }
///         _ => eprintln!("Error: {}", error),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MachineError {
    /// The interpreter met a frame it cannot execute or commit.
    ///
    /// Only JSON-described steps can take this shape; it aborts the whole run.
    #[error("Unrecognized stack element: {found}")]
    UnrecognizedStackElement {
        /// Rendering of the offending element
        found: String,
    },

    /// An action or one of its producers failed.
    ///
    /// The run stops with no further commits and no recovery.
    #[error("Action failed: {token}, details: {details}")]
    ActionFailed {
        /// The action that failed
        token: Token,
        /// Details about the failure
        details: String,
    },

    /// A payload could not be merged into the state type.
    #[error("Failed to merge payload into state: {0}")]
    Merge(#[from] serde_json::Error),

    /// No action is registered under the requested token.
    #[error("Action not found: {0}")]
    ActionNotFound(Token),

    /// The machine configuration is invalid.
    #[error("Invalid machine configuration: {0}")]
    Configuration(String),
}

impl MachineError {
    /// Shorthand for [`MachineError::ActionFailed`].
    pub fn action(token: impl Into<Token>, details: impl Into<String>) -> Self {
        MachineError::ActionFailed {
            token: token.into(),
            details: details.into(),
        }
    }
}
