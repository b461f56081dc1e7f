//! Core traits and types for the tsuzuri pipeline engine.
//!
//! This crate holds the runtime-free pieces. Library authors implementing
//! their own steps, generators or tools depend on it directly.
//!
//! # Core Types
//!
//! - [`SharedState`] - Run-scoped key/value state threaded through every step
//! - [`Step`] - A unit of work with declared inputs and one output key
//! - [`TerminationSignal`] - Control result that ends a loop successfully
//! - [`RetryPolicy`] - Bounded exponential backoff for generation calls
//! - [`WorkflowError`] - Error types for workflow construction and execution
//!
//! # Backends
//!
//! - [`Generator`] - Text-generation backend
//! - [`Tool`] - Deterministic external function

mod backend;
mod error;
mod retry;
mod state;
mod step;

pub use backend::{
    ExitTool, GenerateRequest, GenerateResponse, Generator, Tool, ToolArgs, ToolResult,
};
pub use error::{BackendError, GenerationError, WorkflowError};
pub use retry::{RetryPolicy, RetryPolicyError};
pub use state::{SharedState, StateError, StateKey, StateSnapshot};
pub use step::{Inputs, Step, StepName, StepOutput, StepResult, TerminationSignal};
