//! Bounded refinement loops.

use crate::workflow::{check_children, Node, SequentialWorkflow};
use std::fmt;
use tracing::{debug, info, warn};
use tsuzuri_core::{SharedState, Step, StepName, TerminationSignal, WorkflowError};

/// Why a loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The designated step emitted a termination signal.
    Approved,
    /// `max_iterations` ran without a signal.
    Exhausted,
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::Approved => write!(f, "approved"),
            CompletionReason::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// When the loop stops after its designated step signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitMode {
    /// Run the rest of the current iteration, then stop.
    #[default]
    FinishIteration,
    /// Stop right after the child that produced the signal.
    Immediate,
}

/// Result of one loop execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopCompletion {
    /// Name of the loop.
    pub loop_name: StepName,
    /// Why it stopped.
    pub reason: CompletionReason,
    /// Iterations started, including the last one.
    pub iterations: u32,
    /// The signal that ended the loop, for [`CompletionReason::Approved`].
    pub signal: Option<TerminationSignal>,
    /// Completions of loops nested in this one, in the order they finished.
    pub nested: Vec<LoopCompletion>,
}

impl LoopCompletion {
    /// Returns `true` if the loop ended with approval.
    pub fn is_approved(&self) -> bool {
        self.reason == CompletionReason::Approved
    }
}

#[derive(Debug)]
enum LoopState {
    Running(u32),
    Completed(CompletionReason),
}

/// Children repeated up to `max_iterations` times until a step signals.
pub struct LoopWorkflow {
    name: StepName,
    children: Vec<Node>,
    max_iterations: u32,
    terminator: Option<StepName>,
    exit_mode: ExitMode,
}

impl fmt::Debug for LoopWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopWorkflow")
            .field("name", &self.name)
            .field(
                "children",
                &self.children.iter().map(Node::name).collect::<Vec<_>>(),
            )
            .field("max_iterations", &self.max_iterations)
            .field("terminator", &self.terminator)
            .field("exit_mode", &self.exit_mode)
            .finish()
    }
}

impl LoopWorkflow {
    /// Creates a new loop builder.
    pub fn builder(name: impl Into<StepName>) -> LoopWorkflowBuilder {
        LoopWorkflowBuilder::new(name)
    }

    /// Returns the loop name.
    pub fn name(&self) -> &StepName {
        &self.name
    }

    /// Returns the children run in each iteration.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    /// Returns the iteration limit.
    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Returns the exit mode.
    pub fn exit_mode(&self) -> ExitMode {
        self.exit_mode
    }

    fn accepts(&self, step_name: &StepName) -> bool {
        self.terminator
            .as_ref()
            .map_or(true, |terminator| terminator == step_name)
    }

    /// Runs iterations on the caller's state until approval or exhaustion.
    ///
    /// A step error aborts the loop immediately.
    pub async fn execute(&self, state: &mut SharedState) -> Result<LoopCompletion, WorkflowError> {
        let mut current = LoopState::Running(0);
        let mut approval: Option<TerminationSignal> = None;
        let mut nested = Vec::new();
        let mut iterations = 0;

        while let LoopState::Running(iteration) = current {
            if iteration >= self.max_iterations {
                current = LoopState::Completed(CompletionReason::Exhausted);
                continue;
            }
            iterations = iteration + 1;
            info!(
                "Loop '{}' iteration {}/{}",
                self.name, iterations, self.max_iterations
            );

            for child in &self.children {
                let outcome = child.execute(state).await?;
                if !outcome.completions.is_empty() {
                    debug!(
                        "Loop '{}' ran {} nested loop(s)",
                        self.name,
                        outcome.completions.len()
                    );
                    nested.extend(outcome.completions);
                }
                for (step_name, signal) in outcome.signals {
                    if approval.is_none() && self.accepts(&step_name) {
                        info!(
                            "Loop '{}' approved by step '{}' ({})",
                            self.name, step_name, signal.status
                        );
                        approval = Some(signal);
                    } else if approval.is_none() {
                        warn!(
                            "Loop '{}' ignored signal from non-designated step '{}'",
                            self.name, step_name
                        );
                    }
                }
                if approval.is_some() && self.exit_mode == ExitMode::Immediate {
                    break;
                }
            }

            current = if approval.is_some() {
                LoopState::Completed(CompletionReason::Approved)
            } else {
                LoopState::Running(iteration + 1)
            };
        }

        let reason = match current {
            LoopState::Completed(reason) => reason,
            LoopState::Running(_) => CompletionReason::Exhausted,
        };
        info!(
            "Loop '{}' completed ({}) after {} iteration(s)",
            self.name, reason, iterations
        );
        Ok(LoopCompletion {
            loop_name: self.name.clone(),
            reason,
            iterations,
            signal: approval,
            nested,
        })
    }
}

/// Builder for [`LoopWorkflow`].
#[derive(Debug)]
pub struct LoopWorkflowBuilder {
    name: StepName,
    children: Vec<Node>,
    max_iterations: u32,
    terminator: Option<StepName>,
    exit_mode: ExitMode,
}

impl LoopWorkflowBuilder {
    /// Creates a new builder with `max_iterations = 1`.
    pub fn new(name: impl Into<StepName>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            max_iterations: 1,
            terminator: None,
            exit_mode: ExitMode::default(),
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

    /// Appends an already-built node.
    pub fn node(mut self, node: Node) -> Self {
        self.children.push(node);
        self
    }

    /// Sets the iteration limit.
    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Only signals from the step named `step_name` end the loop.
    ///
    /// Without this, a signal from any step in the loop body counts. Steps
    /// inside a nested loop cannot be named: that loop consumes their signals.
    pub fn exit_on(mut self, step_name: impl Into<StepName>) -> Self {
        self.terminator = Some(step_name.into());
        self
    }

    /// Sets the exit mode.
    pub fn exit_mode(mut self, mode: ExitMode) -> Self {
        self.exit_mode = mode;
        self
    }

    /// Builds the loop.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::Configuration`] if there are no children,
    /// two children share a name, `max_iterations` is 0, or the designated
    /// terminator is not a step of the loop body.
    pub fn build(self) -> Result<LoopWorkflow, WorkflowError> {
        check_children("loop", &self.name, &self.children)?;
        if self.max_iterations < 1 {
            return Err(WorkflowError::Configuration(format!(
                "loop '{}' needs max_iterations >= 1",
                self.name
            )));
        }
        if let Some(terminator) = &self.terminator {
            let mut names = Vec::new();
            self.children
                .iter()
                .for_each(|child| child.collect_step_names(&mut names));
            if !names.contains(terminator) {
                return Err(WorkflowError::Configuration(format!(
                    "loop '{}' exits on unknown step '{}'",
                    self.name, terminator
                )));
            }
        }

        Ok(LoopWorkflow {
            name: self.name,
            children: self.children,
            max_iterations: self.max_iterations,
            terminator: self.terminator,
            exit_mode: self.exit_mode,
        })
    }
}
