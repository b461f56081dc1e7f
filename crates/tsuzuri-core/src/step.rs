//! Step trait and related types.

use crate::error::WorkflowError;
use crate::state::{SharedState, StateKey, StateSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{self, Debug};

/// Type-safe step name wrapper.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StepName(String);

impl StepName {
    /// Creates a new StepName.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the step name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StepName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for StepName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for StepName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for StepName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Control result asking the enclosing loop to stop successfully.
///
/// Carried next to a step's output, never stored in the shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationSignal {
    /// Status tag, `"approved"` for the usual exit.
    pub status: String,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TerminationSignal {
    /// Creates a signal with the `approved` status.
    pub fn approved(message: impl Into<String>) -> Self {
        Self {
            status: "approved".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Input values resolved for one step execution, in declaration order.
#[derive(Debug, Clone)]
pub struct Inputs {
    step_name: StepName,
    values: Vec<(StateKey, Value)>,
}

impl Inputs {
    /// Resolves `keys` against a snapshot.
    ///
    /// The first absent key fails with [`WorkflowError::MissingInput`].
    pub fn resolve(
        step_name: &StepName,
        keys: &[StateKey],
        snapshot: &StateSnapshot,
    ) -> Result<Self, WorkflowError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = snapshot
                .get(key.as_str())
                .map_err(|_| WorkflowError::MissingInput {
                    step_name: step_name.clone(),
                    key: key.clone(),
                })?;
            values.push((key.clone(), value.clone()));
        }
        Ok(Self {
            step_name: step_name.clone(),
            values,
        })
    }

    /// Returns the name of the step these inputs belong to.
    pub fn step_name(&self) -> &StepName {
        &self.step_name
    }

    /// Returns the raw value for a declared key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .map(|(_, v)| v)
    }

    /// Returns a declared input as text.
    pub fn text(&self, key: &str) -> Result<&str, WorkflowError> {
        let value = self.get(key).ok_or_else(|| WorkflowError::MissingInput {
            step_name: self.step_name.clone(),
            key: StateKey::new(key),
        })?;
        value.as_str().ok_or_else(|| WorkflowError::NotText {
            step_name: self.step_name.clone(),
            key: StateKey::new(key),
        })
    }

    /// Iterates over `(key, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &Value)> {
        self.values.iter().map(|(k, v)| (k, v))
    }

    /// Returns the number of resolved inputs.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the step declared no inputs.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// What a step's action produced.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Value written under the step's output key.
    pub value: Value,
    /// Optional request to end the enclosing loop.
    pub signal: Option<TerminationSignal>,
}

impl StepOutput {
    /// Creates a text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            value: Value::String(text.into()),
            signal: None,
        }
    }

    /// Creates an output holding an arbitrary JSON value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            signal: None,
        }
    }

    /// Attaches a termination signal.
    pub fn with_signal(mut self, signal: TerminationSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    fn is_blank(&self) -> bool {
        match &self.value {
            Value::String(s) => s.trim().is_empty(),
            Value::Null => true,
            _ => false,
        }
    }
}

/// Outcome of a successful [`Step::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// The step that ran.
    pub step_name: StepName,
    /// The key that was written.
    pub output_key: StateKey,
    /// Termination signal emitted by the action, if any.
    pub signal: Option<TerminationSignal>,
}

/// A named unit of work that reads declared keys and writes one key.
///
/// Implementors provide [`perform`](Step::perform); the provided
/// [`execute`](Step::execute) resolves inputs, runs the action and performs
/// the single state write.
///
/// # Examples
///
/// ```
/// use tsuzuri_core::{Inputs, SharedState, StateKey, Step, StepName, StepOutput, WorkflowError};
/// use async_trait::async_trait;
///
/// #[derive(Debug)]
/// struct Shout {
///     inputs: Vec<StateKey>,
///     output: StateKey,
/// }
///
/// #[async_trait]
/// impl Step for Shout {
///     fn name(&self) -> StepName {
///         StepName::new("shout")
///     }
///
///     fn input_keys(&self) -> &[StateKey] {
///         &self.inputs
///     }
///
///     fn output_key(&self) -> &StateKey {
///         &self.output
///     }
///
///     async fn perform(&self, inputs: &Inputs) -> Result<StepOutput, WorkflowError> {
///         Ok(StepOutput::text(inputs.text("topic")?.to_uppercase()))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let step = Shout { inputs: vec!["topic".into()], output: "loud".into() };
/// let mut state = SharedState::new().with("topic", "hello");
/// step.execute(&mut state).await.expect("step runs");
/// assert_eq!(state.get_text("loud").ok(), Some("HELLO"));
/// # }
/// ```
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Returns the step name, unique within the enclosing workflow.
    fn name(&self) -> StepName;

    /// Keys read from the shared state, in order.
    fn input_keys(&self) -> &[StateKey];

    /// Key written on success.
    fn output_key(&self) -> &StateKey;

    /// Performs the delegated action on already-resolved inputs.
    async fn perform(&self, inputs: &Inputs) -> Result<StepOutput, WorkflowError>;

    /// Resolves inputs, performs the action and writes the output.
    ///
    /// A signal that arrives with blank output leaves the current value of
    /// the output key in place.
    async fn execute(&self, state: &mut SharedState) -> Result<StepResult, WorkflowError> {
        let name = self.name();
        let inputs = Inputs::resolve(&name, self.input_keys(), &state.snapshot())?;
        let output = self.perform(&inputs).await?;

        let key = self.output_key().clone();
        let keep_prior = output.signal.is_some() && output.is_blank();
        let value = match state.get(key.as_str()) {
            Ok(prior) if keep_prior => prior.clone(),
            _ => output.value,
        };
        state.set(key.clone(), value);

        Ok(StepResult {
            step_name: name,
            output_key: key,
            signal: output.signal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct EchoStep {
        inputs: Vec<StateKey>,
        output: StateKey,
        signal: Option<TerminationSignal>,
        reply: String,
        calls: AtomicUsize,
    }

    impl EchoStep {
        fn new(inputs: &[&str], output: &str, reply: &str) -> Self {
            Self {
                inputs: inputs.iter().map(|k| StateKey::new(*k)).collect(),
                output: StateKey::new(output),
                signal: None,
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Step for EchoStep {
        fn name(&self) -> StepName {
            StepName::new("echo")
        }

        fn input_keys(&self) -> &[StateKey] {
            &self.inputs
        }

        fn output_key(&self) -> &StateKey {
            &self.output
        }

        async fn perform(&self, inputs: &Inputs) -> Result<StepOutput, WorkflowError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut text = self.reply.clone();
            for (_, value) in inputs.iter() {
                if let Some(s) = value.as_str() {
                    text.push_str(s);
                }
            }
            let output = StepOutput::text(text);
            Ok(match &self.signal {
                Some(signal) => output.with_signal(signal.clone()),
                None => output,
            })
        }
    }

    #[test]
    fn test_step_name() {
        let name = StepName::new("writer");
        assert_eq!(name.as_str(), "writer");

        let name: StepName = "writer".into();
        assert_eq!(name, "writer");
    }

    #[tokio::test]
    async fn test_execute_writes_exactly_one_key() {
        let step = EchoStep::new(&["outline"], "draft", "draft of ");
        let mut state = SharedState::new().with("outline", "intro");

        let result = step.execute(&mut state).await.expect("step runs");

        assert_eq!(result.output_key.as_str(), "draft");
        assert_eq!(result.signal, None);
        assert_eq!(state.get_text("draft"), Ok("draft of intro"));
        assert_eq!(state.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_input_skips_action() {
        let step = EchoStep::new(&["outline"], "draft", "");
        let mut state = SharedState::new();

        let error = step.execute(&mut state).await.unwrap_err();
        match error {
            WorkflowError::MissingInput { step_name, key } => {
                assert_eq!(step_name, "echo");
                assert_eq!(key.as_str(), "outline");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(step.calls.load(Ordering::SeqCst), 0);
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_blank_output_with_signal_keeps_prior_value() {
        let mut step = EchoStep::new(&[], "final_script", "");
        step.signal = Some(TerminationSignal::approved("done"));
        let mut state = SharedState::new().with("final_script", "polished");

        let result = step.execute(&mut state).await.expect("step runs");

        assert_eq!(result.signal, Some(TerminationSignal::approved("done")));
        assert_eq!(state.get_text("final_script"), Ok("polished"));
    }

    #[test]
    fn test_inputs_text_rejects_records() {
        let state = SharedState::new().with("meta", serde_json::json!({ "a": 1 }));
        let inputs = Inputs::resolve(
            &StepName::new("s"),
            &[StateKey::new("meta")],
            &state.snapshot(),
        )
        .expect("resolves");

        assert!(matches!(
            inputs.text("meta"),
            Err(WorkflowError::NotText { .. })
        ));
    }

    #[test]
    fn test_signal_serialization() {
        let signal = TerminationSignal::approved("Refinement complete.");
        let json = serde_json::to_value(&signal).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({ "status": "approved", "message": "Refinement complete." })
        );
    }
}
