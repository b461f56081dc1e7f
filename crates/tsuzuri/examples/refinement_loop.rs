//! Runs the YouTube script pipeline offline with canned model replies.
//!
//! ```sh
//! RUST_LOG=tsuzuri=debug cargo run --example refinement_loop
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tsuzuri::{
    youtube_script_pipeline, BackendError, GenerateRequest, GenerateResponse, Generator,
    PipelineConfig, SharedState, SubtitleTool, TerminationSignal, TranscriptError,
    TranscriptFetcher, TranscriptSnippet,
};

/// Approves on the second critique; the rewriter then calls the exit function.
#[derive(Debug, Default)]
struct CannedModel {
    critiques: AtomicUsize,
}

#[async_trait]
impl Generator for CannedModel {
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let prompt = &request.prompt;
        if prompt.starts_with("You are a script critic") {
            let text = match self.critiques.fetch_add(1, Ordering::SeqCst) {
                0 => "Open with a question to hook the viewer.",
                _ => "APPROVED",
            };
            return Ok(GenerateResponse::text(text));
        }
        if prompt.ends_with("Feedback:\nAPPROVED") && request.exit_tool.is_some() {
            return Ok(GenerateResponse {
                text: String::new(),
                signal: Some(TerminationSignal::approved("Script approved.")),
            });
        }
        let first_line = prompt.lines().next().unwrap_or_default();
        Ok(GenerateResponse::text(format!("(output for: {})", first_line)))
    }
}

#[derive(Debug)]
struct CannedTranscript;

#[async_trait]
impl TranscriptFetcher for CannedTranscript {
    async fn fetch(&self, _video_id: &str) -> Result<Vec<TranscriptSnippet>, TranscriptError> {
        Ok(vec![
            TranscriptSnippet::new("Sourdough needs a lively starter."),
            TranscriptSnippet::new("Feed it twice a day."),
        ])
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PipelineConfig::new(Arc::new(CannedModel::default()));
    let workflow = youtube_script_pipeline(&config, Arc::new(SubtitleTool::new(CannedTranscript)))?;

    let initial = SharedState::new()
        .with("request", "A five minute video on keeping a sourdough starter")
        .with("reference_url", "https://www.youtube.com/watch?v=eC8mZceIy5k&t=5");
    let report = workflow.run(Some(initial)).await?;

    if let Some(completion) = report.completion("feedback_loop") {
        println!(
            "feedback loop {} after {} iteration(s)",
            completion.reason, completion.iterations
        );
    }
    println!("{}", report.state.get_text("final_script")?);
    Ok(())
}
