//! Writes a blog post with Gemini.
//!
//! ```sh
//! GEMINI_API_KEY=... RUST_LOG=tsuzuri=info cargo run --example blog_writer -- "Async Rust"
//! ```

use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use tsuzuri::{blog_pipeline, GeminiGenerator, PipelineConfig, Settings, SharedState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Error handling in Rust".to_string());

    let settings = Settings::load()?;
    let generator = Arc::new(GeminiGenerator::from_settings(&settings.gemini)?);
    let config = PipelineConfig::from_settings(generator, &settings)?;

    let report = blog_pipeline(&config)?
        .run(Some(SharedState::new().with("topic", topic)))
        .await?;

    println!("{}", report.state.get_text("final_blog")?);
    Ok(())
}
