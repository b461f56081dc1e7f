//! Sequential and looping pipelines of LLM-backed steps.
//!
//! Steps read declared keys from a run-scoped [`SharedState`] and write one
//! output key. A [`SequentialWorkflow`] runs its children once in order; a
//! [`LoopWorkflow`] repeats them until a step emits a [`TerminationSignal`]
//! or the iteration limit is reached. Generation calls go through a
//! [`RetryPolicy`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tsuzuri::{blog_pipeline, GeminiGenerator, PipelineConfig, Settings};
//! use tsuzuri::SharedState;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load()?;
//!     let generator = Arc::new(GeminiGenerator::from_settings(&settings.gemini)?);
//!     let config = PipelineConfig::from_settings(generator, &settings)?;
//!
//!     let report = blog_pipeline(&config)?
//!         .run(Some(SharedState::new().with("topic", "Ownership in Rust")))
//!         .await?;
//!     println!("{}", report.state.get_text("final_blog")?);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

mod gemini;
mod generate;
mod loop_workflow;
mod pipelines;
mod retry;
mod settings;
mod subtitles;
mod template;
mod tool_step;
mod workflow;
mod youtube;

// Re-export core types
pub use tsuzuri_core::*;

pub use gemini::GeminiGenerator;
pub use generate::{GenerateStep, GenerateStepBuilder};
pub use loop_workflow::{
    CompletionReason, ExitMode, LoopCompletion, LoopWorkflow, LoopWorkflowBuilder,
};
pub use pipelines::{
    blog_pipeline, youtube_script_lite_pipeline, youtube_script_pipeline, PipelineConfig,
};
pub use retry::generate_with_retry;
pub use settings::{GeminiSettings, PipelineSettings, RetrySettings, Settings, SettingsError};
pub use subtitles::{
    video_id, SubtitleTool, TranscriptError, TranscriptFetcher, TranscriptSnippet, NO_SUBTITLES,
};
pub use template::PromptTemplate;
pub use tool_step::{ToolErrorMode, ToolStep};
pub use workflow::{Node, RunReport, SequentialWorkflow, SequentialWorkflowBuilder};
pub use youtube::YouTubeTranscriptFetcher;
