//! Workflow error types.

use crate::state::StateKey;
use crate::step::StepName;
use thiserror::Error;

/// A single failed call to the generation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend answered with a non-success HTTP status.
    #[error("HTTP {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason.
        message: String,
    },

    /// The request never produced a response (connection reset, DNS, timeout).
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The backend answered but the payload could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    /// Returns the HTTP status code, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Generation failed and the retry policy gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("generation failed after {attempts} attempt(s): {source}")]
pub struct GenerationError {
    /// Number of calls made, including the last one.
    pub attempts: u32,
    /// The failure returned by the last call.
    #[source]
    pub source: BackendError,
}

/// Errors that can occur while building or running a workflow.
///
/// Marked `#[non_exhaustive]`; match with a wildcard arm.
///
/// ```
/// use tsuzuri_core::WorkflowError;
///
/// fn describe(error: &WorkflowError) -> String {
///     match error {
///         WorkflowError::MissingInput { step_name, key } => {
///             format!("{} needs {}", step_name, key)
///         }
///         WorkflowError::Generation { step_name, .. } => format!("{} gave up", step_name),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WorkflowError {
    /// A declared input key was absent from the shared state.
    #[error("Step '{step_name}' is missing input '{key}'")]
    MissingInput {
        /// The step that declared the input.
        step_name: StepName,
        /// The absent key.
        key: StateKey,
    },

    /// A declared input held a value that cannot be substituted as text.
    #[error("Step '{step_name}' cannot use non-text input '{key}'")]
    NotText {
        /// The step that declared the input.
        step_name: StepName,
        /// The offending key.
        key: StateKey,
    },

    /// The workflow or one of its steps is misconfigured.
    #[error("Invalid workflow configuration: {0}")]
    Configuration(String),

    /// A tool reported failure.
    #[error("Tool failed in step '{step_name}': {message}")]
    Tool {
        /// The step that invoked the tool.
        step_name: StepName,
        /// Message returned by the tool.
        message: String,
    },

    /// The generation backend failed after the retry policy was exhausted.
    #[error("Generation failed in step '{step_name}': {source}")]
    Generation {
        /// The step that issued the prompt.
        step_name: StepName,
        /// The wrapped failure.
        #[source]
        source: GenerationError,
    },
}

impl WorkflowError {
    /// Returns the name of the step that raised the error, if any.
    pub fn step_name(&self) -> Option<&StepName> {
        match self {
            WorkflowError::MissingInput { step_name, .. }
            | WorkflowError::NotText { step_name, .. }
            | WorkflowError::Tool { step_name, .. }
            | WorkflowError::Generation { step_name, .. } => Some(step_name),
            WorkflowError::Configuration(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = WorkflowError::MissingInput {
            step_name: StepName::new("WriterAgent"),
            key: StateKey::new("outline"),
        };
        assert_eq!(
            error.to_string(),
            "Step 'WriterAgent' is missing input 'outline'"
        );

        let error = WorkflowError::Configuration("empty workflow".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid workflow configuration: empty workflow"
        );
        assert!(error.step_name().is_none());
    }

    #[test]
    fn test_generation_error_display() {
        let error = WorkflowError::Generation {
            step_name: StepName::new("critique"),
            source: GenerationError {
                attempts: 3,
                source: BackendError::Status {
                    code: 503,
                    message: "overloaded".to_string(),
                },
            },
        };
        assert_eq!(
            error.to_string(),
            "Generation failed in step 'critique': generation failed after 3 attempt(s): HTTP 503: overloaded"
        );
        assert_eq!(error.step_name().map(|s| s.as_str()), Some("critique"));
    }

    #[test]
    fn test_backend_status() {
        let error = BackendError::Status {
            code: 429,
            message: String::new(),
        };
        assert_eq!(error.status(), Some(429));
        assert_eq!(BackendError::Transport("reset".into()).status(), None);
    }
}
