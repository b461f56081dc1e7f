//! Sequential workflow engine.

use crate::loop_workflow::{LoopCompletion, LoopWorkflow};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::{info, warn};
use tsuzuri_core::{SharedState, StateKey, Step, StepName, TerminationSignal, WorkflowError};

type NodeFuture<'a> = Pin<Box<dyn Future<Output = Result<NodeOutcome, WorkflowError>> + Send + 'a>>;

/// A child of a workflow: a step or a nested workflow.
#[derive(Debug)]
pub enum Node {
    /// A single step.
    Step(Box<dyn Step>),
    /// A nested sequential workflow.
    Sequential(SequentialWorkflow),
    /// A nested loop.
    Loop(LoopWorkflow),
}

/// What running a node left behind besides state writes.
#[derive(Debug, Default)]
pub(crate) struct NodeOutcome {
    /// Signals not consumed by a loop, with the step that emitted them.
    pub(crate) signals: Vec<(StepName, TerminationSignal)>,
    /// Completions of every loop run inside the node, in order.
    pub(crate) completions: Vec<LoopCompletion>,
}

impl Node {
    /// Returns the step or workflow name.
    pub fn name(&self) -> StepName {
        match self {
            Node::Step(step) => step.name(),
            Node::Sequential(workflow) => workflow.name().clone(),
            Node::Loop(workflow) => workflow.name().clone(),
        }
    }

    pub(crate) fn execute<'a>(&'a self, state: &'a mut SharedState) -> NodeFuture<'a> {
        Box::pin(async move {
            match self {
                Node::Step(step) => {
                    let result = match step.execute(state).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!("Step '{}' failed: {}", step.name(), e);
                            return Err(e);
                        }
                    };
                    info!(
                        "Step '{}' completed successfully, wrote '{}'",
                        result.step_name, result.output_key
                    );
                    Ok(NodeOutcome {
                        signals: result
                            .signal
                            .map(|signal| (result.step_name, signal))
                            .into_iter()
                            .collect(),
                        completions: Vec::new(),
                    })
                }
                Node::Sequential(workflow) => workflow.execute_children(state).await,
                Node::Loop(workflow) => {
                    let completion = workflow.execute(state).await?;
                    let mut completions = completion.nested.clone();
                    completions.push(completion);
                    Ok(NodeOutcome {
                        signals: Vec::new(),
                        completions,
                    })
                }
            }
        })
    }

    /// Walks the node as if executed once, checking every declared input is
    /// available and recording produced keys.
    pub(crate) fn check_flow(&self, available: &mut BTreeSet<StateKey>) -> Result<(), WorkflowError> {
        match self {
            Node::Step(step) => {
                if let Some(key) = step
                    .input_keys()
                    .iter()
                    .find(|k| !available.contains(*k))
                {
                    return Err(WorkflowError::MissingInput {
                        step_name: step.name(),
                        key: key.clone(),
                    });
                }
                available.insert(step.output_key().clone());
                Ok(())
            }
            Node::Sequential(workflow) => workflow
                .children
                .iter()
                .try_for_each(|child| child.check_flow(available)),
            Node::Loop(workflow) => workflow
                .children()
                .iter()
                .try_for_each(|child| child.check_flow(available)),
        }
    }

    /// Collects the names of the steps whose signals reach the enclosing
    /// loop. Nested loops are skipped.
    pub(crate) fn collect_step_names(&self, names: &mut Vec<StepName>) {
        match self {
            Node::Step(step) => names.push(step.name()),
            Node::Sequential(workflow) => workflow
                .children
                .iter()
                .for_each(|child| child.collect_step_names(names)),
            Node::Loop(_) => {}
        }
    }
}

pub(crate) fn check_children(
    kind: &str,
    name: &StepName,
    children: &[Node],
) -> Result<(), WorkflowError> {
    if children.is_empty() {
        return Err(WorkflowError::Configuration(format!(
            "{} '{}' has no children",
            kind, name
        )));
    }
    let mut seen = BTreeSet::new();
    for child in children {
        let child_name = child.name();
        if !seen.insert(child_name.as_str().to_string()) {
            return Err(WorkflowError::Configuration(format!(
                "{} '{}' has two children named '{}'",
                kind, name, child_name
            )));
        }
    }
    Ok(())
}

/// Final state and loop completions of a top-level run.
#[derive(Debug)]
pub struct RunReport {
    /// State after the last step.
    pub state: SharedState,
    /// One entry per loop execution, in the order the loops finished.
    pub completions: Vec<LoopCompletion>,
}

impl RunReport {
    /// Returns the last completion of the loop named `name`.
    pub fn completion(&self, name: &str) -> Option<&LoopCompletion> {
        self.completions
            .iter()
            .rev()
            .find(|c| c.loop_name.as_str() == name)
    }
}

/// An ordered list of children executed once each over one shared state.
///
/// # Examples
///
/// ```
/// use tsuzuri::{SequentialWorkflow, GenerateStep};
/// use tsuzuri_core::{BackendError, GenerateRequest, GenerateResponse, Generator, SharedState};
/// use async_trait::async_trait;
/// use std::sync::Arc;
///
/// #[derive(Debug)]
/// struct Echo;
///
/// #[async_trait]
/// impl Generator for Echo {
///     async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
///         Ok(GenerateResponse::text(format!("<{}>", request.prompt)))
///     }
/// }
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), tsuzuri_core::WorkflowError> {
/// let generator: Arc<dyn Generator> = Arc::new(Echo);
/// let workflow = SequentialWorkflow::builder("BlogPipeline")
///     .step(GenerateStep::builder("outline", generator.clone())
///         .instruction("Outline {topic}")
///         .input("topic")
///         .output("outline")
///         .build()?)
///     .step(GenerateStep::builder("writer", generator)
///         .instruction("Write from {outline}")
///         .input("outline")
///         .output("draft")
///         .build()?)
///     .build()?;
///
/// let report = workflow.run(Some(SharedState::new().with("topic", "tea"))).await?;
/// assert_eq!(report.state.get_text("draft").ok(), Some("<Write from <Outline tea>>"));
/// # Ok(())
/// # }
/// ```
pub struct SequentialWorkflow {
    name: StepName,
    children: Vec<Node>,
}

impl fmt::Debug for SequentialWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequentialWorkflow")
            .field("name", &self.name)
            .field(
                "children",
                &self.children.iter().map(Node::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl SequentialWorkflow {
    /// Creates a new workflow builder.
    pub fn builder(name: impl Into<StepName>) -> SequentialWorkflowBuilder {
        SequentialWorkflowBuilder::new(name)
    }

    /// Returns the workflow name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the children in execution order.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Returns the keys that must be present in the initial state.
    pub fn required_inputs(&self) -> BTreeSet<StateKey> {
        let mut required = BTreeSet::new();
        let mut available = BTreeSet::new();
        collect_required(&self.children, &mut available, &mut required);
        required
    }

    /// Checks that every declared input is produced upstream or present in
    /// `initial_keys`, without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::MissingInput`] naming the first step whose
    /// input can never be satisfied.
    pub fn validate<'k>(
        &self,
        initial_keys: impl IntoIterator<Item = &'k StateKey>,
    ) -> Result<(), WorkflowError> {
        let mut available: BTreeSet<StateKey> = initial_keys.into_iter().cloned().collect();
        self.children
            .iter()
            .try_for_each(|child| child.check_flow(&mut available))
    }

    /// Runs the workflow on a fresh state, or on `initial` when given.
    ///
    /// The data flow is validated against the initial keys before any step
    /// runs. Fails fast on the first step error.
    pub async fn run(&self, initial: Option<SharedState>) -> Result<RunReport, WorkflowError> {
        let mut state = initial.unwrap_or_default();
        self.validate(state.keys())?;

        info!("Workflow '{}' started", self.name);
        let completions = self.execute(&mut state).await?;
        info!(
            "Workflow '{}' finished in {:?}",
            self.name,
            state.elapsed()
        );

        Ok(RunReport { state, completions })
    }

    /// Runs every child once, in order, on the caller's state.
    ///
    /// Termination signals have no meaning here and are logged and dropped.
    pub async fn execute(&self, state: &mut SharedState) -> Result<Vec<LoopCompletion>, WorkflowError> {
        let outcome = self.execute_children(state).await?;
        for (step_name, signal) in outcome.signals {
            warn!(
                "Step '{}' emitted termination signal '{}' outside a loop; ignored",
                step_name, signal.status
            );
        }
        Ok(outcome.completions)
    }

    pub(crate) async fn execute_children(
        &self,
        state: &mut SharedState,
    ) -> Result<NodeOutcome, WorkflowError> {
        let mut outcome = NodeOutcome::default();
        for child in &self.children {
            let child_outcome = child.execute(state).await?;
            outcome.signals.extend(child_outcome.signals);
            outcome.completions.extend(child_outcome.completions);
        }
        Ok(outcome)
    }
}

fn collect_required(
    children: &[Node],
    available: &mut BTreeSet<StateKey>,
    required: &mut BTreeSet<StateKey>,
) {
    for child in children {
        match child {
            Node::Step(step) => {
                for key in step.input_keys() {
                    if !available.contains(key) {
                        required.insert(key.clone());
                    }
                }
                available.insert(step.output_key().clone());
            }
            Node::Sequential(workflow) => collect_required(&workflow.children, available, required),
            Node::Loop(workflow) => collect_required(workflow.children(), available, required),
        }
    }
}

/// Builder for [`SequentialWorkflow`].
#[derive(Debug)]
pub struct SequentialWorkflowBuilder {
    name: StepName,
    children: Vec<Node>,
}

impl SequentialWorkflowBuilder {
    /// Creates a new empty builder.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.children.push(Node::Step(Box::new(step)));
        self
    }

    /// Appends a nested sequential workflow.
    pub fn sequential(mut self, workflow: SequentialWorkflow) -> Self {
        self.children.push(Node::Sequential(workflow));
        self
    }

    /// Appends a loop.
    pub fn looping(mut self, workflow: LoopWorkflow) -> Self {
        self.children.push(Node::Loop(workflow));
        self
    }

    /// Appends an already-built node.
    pub fn node(mut self, node: Node) -> Self {
        self.children.push(node);
        self
    }

    /// Builds the workflow.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if there are no children or
    /// two children share a name.
    pub fn build(self) -> Result<SequentialWorkflow, WorkflowError> {
        check_children("sequential workflow", &self.name, &self.children)?;
        Ok(SequentialWorkflow {
            name: self.name,
            children: self.children,
        })
    }
}
