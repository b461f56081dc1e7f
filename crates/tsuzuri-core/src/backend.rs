//! Interfaces to the external collaborators a step delegates to.

use crate::error::BackendError;
use crate::step::TerminationSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Debug;

/// Declaration of a function the model may call to end a refinement loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitTool {
    /// Function name exposed to the model.
    pub name: String,
    /// When the model should call it.
    pub description: String,
}

impl Default for ExitTool {
    fn default() -> Self {
        Self {
            name: "exit_loop".to_string(),
            description: "Call this function ONLY when the work is approved and needs no further changes."
                .to_string(),
        }
    }
}

/// One prompt sent to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    /// Fully substituted prompt.
    pub prompt: String,
    /// Exit function offered to the model, if the step may end a loop.
    pub exit_tool: Option<ExitTool>,
}

impl GenerateRequest {
    /// Creates a request without an exit function.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            exit_tool: None,
        }
    }

    /// Offers an exit function to the model.
    pub fn with_exit_tool(mut self, tool: ExitTool) -> Self {
        self.exit_tool = Some(tool);
        self
    }
}

/// Text returned by the generation backend.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerateResponse {
    /// Generated text, possibly empty when the model only called the exit function.
    pub text: String,
    /// Set when the model called the exit function.
    pub signal: Option<TerminationSignal>,
}

impl GenerateResponse {
    /// Creates a text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            signal: None,
        }
    }
}

/// Text-generation backend. One call is one attempt; retries are applied
/// by the caller.
#[async_trait]
pub trait Generator: Send + Sync + Debug {
    /// Sends one request.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError>;
}

/// Named arguments passed to a tool.
pub type ToolArgs = Map<String, Value>;

/// Result reported by a tool.
///
/// Serialized with a `status` tag:
/// `{"status":"success","value":...}` or `{"status":"error","message":...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolResult {
    /// The tool completed.
    Success {
        /// Tool output.
        value: Value,
    },
    /// The tool reported a failure.
    Error {
        /// Failure description.
        message: String,
    },
}

impl ToolResult {
    /// Creates a success result.
    pub fn success(value: impl Into<Value>) -> Self {
        ToolResult::Success {
            value: value.into(),
        }
    }

    /// Creates an error result.
    pub fn error(message: impl Into<String>) -> Self {
        ToolResult::Error {
            message: message.into(),
        }
    }

    /// Returns `true` for a success result.
    pub fn is_success(&self) -> bool {
        matches!(self, ToolResult::Success { .. })
    }
}

/// A deterministic external function a step may invoke.
#[async_trait]
pub trait Tool: Send + Sync + Debug {
    /// Tool name, used in logs.
    fn name(&self) -> &str;

    /// Parameter names, bound positionally to a step's input keys.
    fn parameters(&self) -> &[&'static str];

    /// Invokes the tool.
    async fn invoke(&self, args: &ToolArgs) -> ToolResult;
}
