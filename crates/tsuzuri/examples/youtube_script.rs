//! Writes a YouTube script with Gemini, using a reference video's captions.
//!
//! ```sh
//! GEMINI_API_KEY=... RUST_LOG=tsuzuri=info cargo run --example youtube_script -- \
//!     "A five minute video on keeping a sourdough starter" \
//!     "https://www.youtube.com/watch?v=eC8mZceIy5k"
//! ```

use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tsuzuri::{
    youtube_script_pipeline, GeminiGenerator, PipelineConfig, Settings, SharedState,
    SubtitleTool, YouTubeTranscriptFetcher,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let request = args
        .next()
        .unwrap_or_else(|| "A short explainer on Rust ownership".to_string());
    let reference_url = args
        .next()
        .unwrap_or_else(|| "https://www.youtube.com/watch?v=eC8mZceIy5k".to_string());

    let settings = Settings::load()?;
    let generator = Arc::new(GeminiGenerator::from_settings(&settings.gemini)?);
    let config = PipelineConfig::from_settings(generator, &settings)?;
    let subtitles = Arc::new(SubtitleTool::new(YouTubeTranscriptFetcher::new()));

    let initial = SharedState::new()
        .with("request", request)
        .with("reference_url", reference_url);
    let report = youtube_script_pipeline(&config, subtitles)?
        .run(Some(initial))
        .await?;

    if let Some(completion) = report.completion("feedback_loop") {
        println!(
            "feedback loop {} after {} iteration(s)\n",
            completion.reason, completion.iterations
        );
    }
    println!("{}", report.state.get_text("final_script")?);
    Ok(())
}
