//! Steps that prompt the generation backend.

use crate::retry::generate_with_retry;
use crate::template::PromptTemplate;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use tsuzuri_core::{
    ExitTool, GenerateRequest, Generator, Inputs, RetryPolicy, StateKey, Step, StepName,
    StepOutput, TerminationSignal, WorkflowError,
};

/// A step that renders its instruction template and asks the backend for text.
///
/// Every call goes through the step's [`RetryPolicy`]. The step may end an
/// enclosing loop when the model calls the offered exit function, or when
/// the generated text equals the configured approval phrase.
#[derive(Debug, Clone)]
pub struct GenerateStep {
    name: StepName,
    input_keys: Vec<StateKey>,
    output_key: StateKey,
    template: PromptTemplate,
    generator: Arc<dyn Generator>,
    retry_policy: RetryPolicy,
    exit_tool: Option<ExitTool>,
    approval_phrase: Option<String>,
}

impl GenerateStep {
    /// Starts building a step named `name` backed by `generator`.
    pub fn builder(name: impl Into<StepName>, generator: Arc<dyn Generator>) -> GenerateStepBuilder {
        GenerateStepBuilder {
            name: name.into(),
            generator,
            instruction: None,
            input_keys: Vec::new(),
            output_key: None,
            retry_policy: RetryPolicy::default(),
            exit_tool: None,
            approval_phrase: None,
        }
    }

    /// Returns the parsed instruction template.
    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    /// Returns the retry policy applied to every call.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    fn approval(&self, text: &str) -> Option<TerminationSignal> {
        let phrase = self.approval_phrase.as_deref()?;
        (text.trim() == phrase)
            .then(|| TerminationSignal::approved(format!("{} returned '{}'", self.name, phrase)))
    }
}

#[async_trait]
impl Step for GenerateStep {
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
        let prompt = self.template.render(inputs)?;
        debug!("Step '{}' prompt has {} chars", self.name, prompt.len());

        let mut request = GenerateRequest::new(prompt);
        if let Some(tool) = &self.exit_tool {
            request = request.with_exit_tool(tool.clone());
        }

        let response = generate_with_retry(self.generator.as_ref(), &request, &self.retry_policy)
            .await
            .map_err(|source| WorkflowError::Generation {
                step_name: self.name.clone(),
                source,
            })?;

        let signal = response.signal.or_else(|| self.approval(&response.text));
        let output = StepOutput::text(response.text);
        Ok(match signal {
            Some(signal) => output.with_signal(signal),
            None => output,
        })
    }
}

/// Builder for [`GenerateStep`].
#[derive(Debug)]
pub struct GenerateStepBuilder {
    name: StepName,
    generator: Arc<dyn Generator>,
    instruction: Option<String>,
    input_keys: Vec<StateKey>,
    output_key: Option<StateKey>,
    retry_policy: RetryPolicy,
    exit_tool: Option<ExitTool>,
    approval_phrase: Option<String>,
}

impl GenerateStepBuilder {
    /// Sets the instruction template.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Declares one input key.
    pub fn input(mut self, key: impl Into<StateKey>) -> Self {
        self.input_keys.push(key.into());
        self
    }

    /// Declares several input keys, in order.
    pub fn inputs<K: Into<StateKey>>(mut self, keys: impl IntoIterator<Item = K>) -> Self {
        self.input_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Sets the output key.
    pub fn output(mut self, key: impl Into<StateKey>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Overrides the default retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Offers an exit function to the model.
    pub fn exit_tool(mut self, tool: ExitTool) -> Self {
        self.exit_tool = Some(tool);
        self
    }

    /// Emits a termination signal when the output equals `phrase` (ignoring
    /// surrounding whitespace).
    pub fn approve_when(mut self, phrase: impl Into<String>) -> Self {
        self.approval_phrase = Some(phrase.into());
        self
    }

    /// Builds the step.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if the instruction or output key
    /// is missing, an input key is declared twice, or the template does not
    /// match the declared inputs.
    pub fn build(self) -> Result<GenerateStep, WorkflowError> {
        let instruction = self.instruction.ok_or_else(|| {
            WorkflowError::Configuration(format!("step '{}' has no instruction", self.name))
        })?;
        let output_key = self.output_key.ok_or_else(|| {
            WorkflowError::Configuration(format!("step '{}' has no output key", self.name))
        })?;
        check_unique_inputs(&self.name, &self.input_keys)?;
        let template = PromptTemplate::new(&self.name, instruction, &self.input_keys)?;

        Ok(GenerateStep {
            name: self.name,
            input_keys: self.input_keys,
            output_key,
            template,
            generator: self.generator,
            retry_policy: self.retry_policy,
            exit_tool: self.exit_tool,
            approval_phrase: self.approval_phrase,
        })
    }
}

pub(crate) fn check_unique_inputs(name: &StepName, keys: &[StateKey]) -> Result<(), WorkflowError> {
    for (i, key) in keys.iter().enumerate() {
        if keys[..i].contains(key) {
            return Err(WorkflowError::Configuration(format!(
                "step '{}' declares input '{}' twice",
                name, key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tsuzuri_core::{BackendError, GenerateResponse, SharedState};

    #[derive(Debug, Default)]
    struct RecordingGenerator {
        prompts: Mutex<Vec<GenerateRequest>>,
        reply: GenerateResponse,
    }

    #[async_trait]
    impl Generator for RecordingGenerator {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(request.clone());
            }
            Ok(self.reply.clone())
        }
    }

    fn recording(reply: GenerateResponse) -> Arc<RecordingGenerator> {
        Arc::new(RecordingGenerator {
            prompts: Mutex::new(Vec::new()),
            reply,
        })
    }

    #[tokio::test]
    async fn test_prompt_substitution_and_output() {
        let generator = recording(GenerateResponse::text("A polished post"));
        let step = GenerateStep::builder("EditorAgent", generator.clone())
            .instruction("Edit this draft: {blog_draft}")
            .input("blog_draft")
            .output("final_blog")
            .build()
            .expect("valid step");

        let mut state = SharedState::new().with("blog_draft", "rough text");
        let result = step.execute(&mut state).await.expect("step runs");

        assert_eq!(result.signal, None);
        assert_eq!(state.get_text("final_blog"), Ok("A polished post"));
        let prompts = generator.prompts.lock().expect("lock");
        assert_eq!(prompts[0].prompt, "Edit this draft: rough text");
        assert_eq!(prompts[0].exit_tool, None);
    }

    #[tokio::test]
    async fn test_exit_tool_call_becomes_signal() {
        let generator = recording(GenerateResponse {
            text: String::new(),
            signal: Some(TerminationSignal::approved("Refinement complete.")),
        });
        let step = GenerateStep::builder("refiner", generator.clone())
            .instruction("Improve {final_script}")
            .input("final_script")
            .output("final_script")
            .exit_tool(ExitTool::default())
            .build()
            .expect("valid step");

        let mut state = SharedState::new().with("final_script", "the script");
        let result = step.execute(&mut state).await.expect("step runs");

        assert_eq!(
            result.signal,
            Some(TerminationSignal::approved("Refinement complete."))
        );
        assert_eq!(state.get_text("final_script"), Ok("the script"));
        let prompts = generator.prompts.lock().expect("lock");
        assert_eq!(prompts[0].exit_tool, Some(ExitTool::default()));
    }

    #[tokio::test]
    async fn test_approval_phrase() {
        let generator = recording(GenerateResponse::text("  APPROVED\n"));
        let step = GenerateStep::builder("critique", generator)
            .instruction("Review {script}")
            .input("script")
            .output("critique_feedback")
            .approve_when("APPROVED")
            .build()
            .expect("valid step");

        let mut state = SharedState::new().with("script", "s");
        let result = step.execute(&mut state).await.expect("step runs");

        assert_eq!(result.signal.map(|s| s.status), Some("approved".to_string()));
        assert_eq!(state.get_text("critique_feedback"), Ok("  APPROVED\n"));
    }

    #[test]
    fn test_builder_validation() {
        let generator: Arc<dyn Generator> = recording(GenerateResponse::default());

        let missing_output = GenerateStep::builder("a", generator.clone())
            .instruction("hi")
            .build();
        assert!(matches!(missing_output, Err(WorkflowError::Configuration(_))));

        let duplicate = GenerateStep::builder("b", generator.clone())
            .instruction("{x}")
            .inputs(["x", "x"])
            .output("y")
            .build();
        assert!(matches!(duplicate, Err(WorkflowError::Configuration(_))));

        let undeclared = GenerateStep::builder("c", generator)
            .instruction("{outline}")
            .output("y")
            .build();
        assert!(matches!(undeclared, Err(WorkflowError::Configuration(_))));
    }
}
