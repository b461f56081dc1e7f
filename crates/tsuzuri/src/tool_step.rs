//! Steps that invoke a registered tool instead of the generation backend.

use crate::generate::check_unique_inputs;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use tsuzuri_core::{
    Inputs, StateKey, Step, StepName, StepOutput, Tool, ToolArgs, ToolResult, WorkflowError,
};

/// How a tool's `error` result is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolErrorMode {
    /// Fail the step with [`WorkflowError::Tool`].
    #[default]
    Fail,
    /// Write the result, serialized as JSON text, as ordinary output.
    AsData,
}

/// A step whose action is a single tool call.
///
/// Input keys are bound positionally to the tool's parameter names. Tool
/// calls are never retried.
#[derive(Debug, Clone)]
pub struct ToolStep {
    name: StepName,
    tool: Arc<dyn Tool>,
    input_keys: Vec<StateKey>,
    output_key: StateKey,
    error_mode: ToolErrorMode,
}

impl ToolStep {
    /// Creates a tool step.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the number of input keys
    /// differs from the tool's parameter count or a key is declared twice.
    pub fn new<K: Into<StateKey>>(
        name: impl Into<StepName>,
        tool: Arc<dyn Tool>,
        input_keys: impl IntoIterator<Item = K>,
        output_key: impl Into<StateKey>,
    ) -> Result<Self, WorkflowError> {
        let name = name.into();
        let input_keys: Vec<StateKey> = input_keys.into_iter().map(Into::into).collect();
        check_unique_inputs(&name, &input_keys)?;
        if input_keys.len() != tool.parameters().len() {
            return Err(WorkflowError::Configuration(format!(
                "step '{}' binds {} input(s) but tool '{}' takes {}",
                name,
                input_keys.len(),
                tool.name(),
                tool.parameters().len()
            )));
        }
        Ok(Self {
            name,
            tool,
            input_keys,
            output_key: output_key.into(),
            error_mode: ToolErrorMode::Fail,
        })
    }

    /// Sets how an `error` result is treated.
    pub fn with_error_mode(mut self, mode: ToolErrorMode) -> Self {
        self.error_mode = mode;
        self
    }

    fn arguments(&self, inputs: &Inputs) -> ToolArgs {
        self.tool
            .parameters()
            .iter()
            .zip(inputs.iter())
            .map(|(param, (_, value))| (param.to_string(), value.clone()))
            .collect()
    }
}

#[async_trait]
impl Step for ToolStep {
    fn name(&self) -> StepName {
        self.name.clone()
    }

    fn input_keys(&self) -> &[StateKey] {
        &self.input_keys
    }

    fn output_key(&self) -> &StateKey {
        &self.output_key
    }

    async fn perform(&self, inputs: &Inputs) -> Result<StepOutput, WorkflowError> {
        let args = self.arguments(inputs);
        info!("Step '{}' invoking tool '{}'", self.name, self.tool.name());

        match self.tool.invoke(&args).await {
            ToolResult::Success { value } => Ok(StepOutput::value(value)),
            ToolResult::Error { message } => match self.error_mode {
                ToolErrorMode::Fail => {
                    warn!("Tool '{}' failed: {}", self.tool.name(), message);
                    Err(WorkflowError::Tool {
                        step_name: self.name.clone(),
                        message,
                    })
                }
                ToolErrorMode::AsData => {
                    let result = ToolResult::Error { message };
                    let text = serde_json::to_string(&result).map_err(|e| WorkflowError::Tool {
                        step_name: self.name.clone(),
                        message: e.to_string(),
                    })?;
                    Ok(StepOutput::text(text))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tsuzuri_core::SharedState;

    #[derive(Debug)]
    struct LookupTool {
        result: ToolResult,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for LookupTool {
        fn name(&self) -> &str {
            "lookup"
        }

        fn parameters(&self) -> &[&'static str] {
            &["url"]
        }

        async fn invoke(&self, args: &ToolArgs) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match (&self.result, args.get("url")) {
                (ToolResult::Success { .. }, Some(url)) => ToolResult::success(json!(format!(
                    "looked up {}",
                    url.as_str().unwrap_or_default()
                ))),
                (other, _) => other.clone(),
            }
        }
    }

    fn lookup(result: ToolResult) -> Arc<LookupTool> {
        Arc::new(LookupTool {
            result,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_success_writes_value() {
        let tool = lookup(ToolResult::success("unused"));
        let step = ToolStep::new("fetch", tool.clone(), ["reference_url"], "transcript")
            .expect("valid step");

        let mut state = SharedState::new().with("reference_url", "https://youtu.be/x");
        step.execute(&mut state).await.expect("step runs");

        assert_eq!(
            state.get_text("transcript"),
            Ok("looked up https://youtu.be/x")
        );
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_fails_without_retry() {
        let tool = lookup(ToolResult::error("boom"));
        let step = ToolStep::new("fetch", tool.clone(), ["reference_url"], "transcript")
            .expect("valid step");

        let mut state = SharedState::new().with("reference_url", "u");
        let error = step.execute(&mut state).await.unwrap_err();

        match error {
            WorkflowError::Tool { step_name, message } => {
                assert_eq!(step_name, "fetch");
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert!(!state.contains_key("transcript"));
    }

    #[tokio::test]
    async fn test_error_as_data() {
        let tool = lookup(ToolResult::error("No subtitles found"));
        let step = ToolStep::new("fetch", tool, ["reference_url"], "transcript")
            .expect("valid step")
            .with_error_mode(ToolErrorMode::AsData);

        let mut state = SharedState::new().with("reference_url", "u");
        step.execute(&mut state).await.expect("error is data");

        assert_eq!(
            state.get_text("transcript"),
            Ok(r#"{"status":"error","message":"No subtitles found"}"#)
        );
    }

    #[test]
    fn test_arity_mismatch() {
        let result = ToolStep::new(
            "fetch",
            lookup(ToolResult::success("x")),
            ["a", "b"],
            "out",
        );
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }
}
