//! Subtitle fetching exposed as a [`Tool`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;
use tracing::{debug, warn};
use tsuzuri_core::{Tool, ToolArgs, ToolResult};

/// Returned when a video has no caption text.
pub const NO_SUBTITLES: &str = "No subtitles found";

/// One caption fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSnippet {
    /// Caption text, entities already decoded.
    pub text: String,
    /// Offset from the start of the video, in seconds.
    #[serde(default)]
    pub start: f64,
    /// How long the caption is shown, in seconds.
    #[serde(default)]
    pub duration: f64,
}

impl TranscriptSnippet {
    /// Creates an untimed snippet.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            start: 0.0,
            duration: 0.0,
        }
    }
}

/// Errors from a transcript source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// The video has no caption tracks.
    #[error("Transcripts are disabled for video '{0}'")]
    Disabled(String),

    /// The video does not exist or cannot be played.
    #[error("Video '{0}' is unavailable")]
    Unavailable(String),

    /// Captions exist, but none in an accepted language.
    #[error("No transcript for video '{video_id}' in languages: {languages}")]
    NotFound {
        /// The video that was asked for.
        video_id: String,
        /// Accepted language codes, comma separated.
        languages: String,
    },

    /// Transport failure or non-success HTTP status.
    #[error("Transcript request failed: {0}")]
    Request(String),

    /// A response did not have the expected shape.
    #[error("Unexpected transcript response: {0}")]
    Parse(String),
}

/// Source of caption snippets for a video.
#[async_trait]
pub trait TranscriptFetcher: Send + Sync + Debug {
    /// Returns the snippets of `video_id` in playback order.
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSnippet>, TranscriptError>;
}

/// Extracts the video id from a short (`youtu.be/<id>`) or long
/// (`watch?v=<id>&...`) YouTube link.
pub fn video_id(url: &str) -> Option<String> {
    let url = url.trim();
    let short = ["https://youtu.be/", "http://youtu.be/"]
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix));
    let id = match short {
        Some(path) => path.split(['/', '?', '#']).next()?,
        None => {
            let (_, rest) = url.rsplit_once("v=")?;
            rest.split(['&', '#']).next()?
        }
    };
    (!id.is_empty()).then(|| id.to_string())
}

/// Tool taking a `url` argument and returning the video's concatenated
/// subtitles.
#[derive(Debug, Clone)]
pub struct SubtitleTool<F> {
    fetcher: F,
}

impl<F: TranscriptFetcher> SubtitleTool<F> {
    /// Wraps `fetcher` as a tool.
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Fetches and joins the subtitles of the video behind `url`.
    ///
    /// Snippets are joined with single spaces. A transcript of only
    /// whitespace counts as empty.
    pub async fn subtitles(&self, url: &str) -> ToolResult {
        let Some(id) = video_id(url) else {
            return ToolResult::error(format!("Could not find a video id in '{}'", url));
        };
        debug!("Fetching subtitles for video '{}'", id);

        match self.fetcher.fetch(&id).await {
            Ok(snippets) => {
                let text = snippets
                    .iter()
                    .map(|snippet| snippet.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                if text.trim().is_empty() {
                    ToolResult::error(NO_SUBTITLES)
                } else {
                    ToolResult::success(text)
                }
            }
            Err(e) => {
                warn!("Subtitle fetch for '{}' failed: {}", id, e);
                ToolResult::error(e.to_string())
            }
        }
    }
}

#[async_trait]
impl<F: TranscriptFetcher> Tool for SubtitleTool<F> {
    fn name(&self) -> &str {
        "get_subtitles"
    }

    fn parameters(&self) -> &[&'static str] {
        &["url"]
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolResult {
        match args.get("url").and_then(|url| url.as_str()) {
            Some(url) => self.subtitles(url).await,
            None => ToolResult::error("argument 'url' must be a string"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct StaticFetcher {
        videos: HashMap<String, Vec<TranscriptSnippet>>,
    }

    impl StaticFetcher {
        fn with(mut self, id: &str, texts: &[&str]) -> Self {
            self.videos.insert(
                id.to_string(),
                texts.iter().map(|t| TranscriptSnippet::new(*t)).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl TranscriptFetcher for StaticFetcher {
        async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSnippet>, TranscriptError> {
            self.videos
                .get(video_id)
                .cloned()
                .ok_or_else(|| TranscriptError::Unavailable(video_id.to_string()))
        }
    }

    #[test]
    fn test_video_id_forms() {
        assert_eq!(
            video_id("https://youtu.be/eC8mZceIy5k").as_deref(),
            Some("eC8mZceIy5k")
        );
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=eC8mZceIy5k&t=5").as_deref(),
            Some("eC8mZceIy5k")
        );
        assert_eq!(
            video_id("https://youtu.be/eC8mZceIy5k?si=share").as_deref(),
            Some("eC8mZceIy5k")
        );
        assert_eq!(
            video_id("https://www.youtube.com/watch?v=eC8mZceIy5k&feature=youtu.be").as_deref(),
            Some("eC8mZceIy5k")
        );
        assert_eq!(
            video_id("http://youtu.be/eC8mZceIy5k").as_deref(),
            Some("eC8mZceIy5k")
        );
        assert_eq!(video_id("https://example.com/page"), None);
        assert_eq!(video_id("https://www.youtube.com/watch?v="), None);
    }

    #[test]
    fn test_joins_snippets_in_order() {
        let tool = SubtitleTool::new(StaticFetcher::default().with(
            "eC8mZceIy5k",
            &["never", "gonna", "give"],
        ));

        let result = tokio_test::block_on(tool.subtitles("https://youtu.be/eC8mZceIy5k"));

        assert_eq!(result, ToolResult::success("never gonna give"));
    }

    #[tokio::test]
    async fn test_empty_transcript() {
        let tool = SubtitleTool::new(StaticFetcher::default().with("eC8mZceIy5k", &[]));
        let mut args = ToolArgs::new();
        args.insert(
            "url".to_string(),
            json!("https://www.youtube.com/watch?v=eC8mZceIy5k&t=5"),
        );

        let result = tool.invoke(&args).await;

        assert_eq!(result, ToolResult::error(NO_SUBTITLES));
        assert_eq!(
            serde_json::to_value(&result).expect("serializes"),
            json!({"status": "error", "message": "No subtitles found"})
        );
    }

    #[tokio::test]
    async fn test_whitespace_transcript_is_empty() {
        let tool = SubtitleTool::new(StaticFetcher::default().with("eC8mZceIy5k", &["", " \n"]));

        let result = tool.subtitles("https://youtu.be/eC8mZceIy5k").await;

        assert_eq!(result, ToolResult::error(NO_SUBTITLES));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_tool_error() {
        let tool = SubtitleTool::new(StaticFetcher::default());

        let result = tool.subtitles("https://youtu.be/missing").await;

        assert_eq!(
            result,
            ToolResult::error("Video 'missing' is unavailable")
        );
    }
}
