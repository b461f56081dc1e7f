//! YouTube caption tracks fetched over HTTPS.
//!
//! The watch page yields the InnerTube API key; the InnerTube `player`
//! endpoint, called as the Android client, lists the caption tracks; the
//! chosen track is downloaded as timed-text XML.

use crate::subtitles::{TranscriptError, TranscriptFetcher, TranscriptSnippet};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, instrument};

const YOUTUBE_URL: &str = "https://www.youtube.com";
const ANDROID_CLIENT_VERSION: &str = "20.10.38";

#[allow(clippy::expect_used)]
static API_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""INNERTUBE_API_KEY":\s*"([a-zA-Z0-9_-]+)""#).expect("valid api key regex")
});

#[allow(clippy::expect_used)]
static TEXT_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<text start="([0-9.]+)"(?:\s+dur="([0-9.]+)")?[^>]*>([^<]*)</text>"#)
        .expect("valid text element regex")
});

#[allow(clippy::expect_used)]
static ENTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(amp|lt|gt|quot|apos|#[0-9]+|#x[0-9a-fA-F]+);").expect("valid entity regex")
});

#[allow(clippy::expect_used)]
static MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid markup regex"));

/// Fetches captions the way the YouTube Android app does.
///
/// Manually created tracks are preferred over generated ones, per language,
/// in the order of [`languages`](Self::with_languages).
#[derive(Debug, Clone)]
pub struct YouTubeTranscriptFetcher {
    client: Client,
    languages: Vec<String>,
    base_url: String,
}

impl Default for YouTubeTranscriptFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl YouTubeTranscriptFetcher {
    /// Creates a fetcher for English captions.
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            languages: vec!["en".to_string()],
            base_url: YOUTUBE_URL.to_string(),
        }
    }

    /// Sets the accepted language codes, most preferred first.
    pub fn with_languages<S: Into<String>>(mut self, languages: impl IntoIterator<Item = S>) -> Self {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Overrides `https://www.youtube.com`, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_text(&self, url: &str) -> Result<String, TranscriptError> {
        let response = self
            .client
            .get(url)
            .header("Accept-Language", "en-US")
            .send()
            .await
            .map_err(request_failed)?;
        checked(response)
            .await?
            .text()
            .await
            .map_err(request_failed)
    }

    async fn player(&self, video_id: &str, api_key: &str) -> Result<PlayerResponse, TranscriptError> {
        let url = format!("{}/youtubei/v1/player?key={}", self.base_url, api_key);
        let body = json!({
            "context": {
                "client": {
                    "clientName": "ANDROID",
                    "clientVersion": ANDROID_CLIENT_VERSION,
                }
            },
            "videoId": video_id,
        });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(request_failed)?;
        checked(response).await?.json().await.map_err(|e| {
            error!(error = ?e, "Failed to parse InnerTube player response");
            TranscriptError::Parse(e.to_string())
        })
    }
}

#[async_trait]
impl TranscriptFetcher for YouTubeTranscriptFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, video_id: &str) -> Result<Vec<TranscriptSnippet>, TranscriptError> {
        let html = self
            .get_text(&format!("{}/watch?v={}", self.base_url, video_id))
            .await?;
        let api_key = innertube_api_key(&html)?;

        let tracks = caption_tracks(video_id, self.player(video_id, &api_key).await?)?;
        let track = select_track(&tracks, &self.languages).ok_or_else(|| {
            TranscriptError::NotFound {
                video_id: video_id.to_string(),
                languages: self.languages.join(", "),
            }
        })?;
        debug!(
            language = %track.language_code,
            generated = track.is_generated(),
            "Downloading caption track"
        );

        let xml = self.get_text(&track.base_url.replace("&fmt=srv3", "")).await?;
        Ok(parse_transcript_xml(&xml))
    }
}

fn request_failed(e: reqwest::Error) -> TranscriptError {
    error!(error = ?e, "Transcript request failed");
    TranscriptError::Request(e.to_string())
}

async fn checked(response: Response) -> Result<Response, TranscriptError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error!(status = %status, body = %body, "YouTube returned error");
    Err(TranscriptError::Request(format!("HTTP {}", status.as_u16())))
}

fn innertube_api_key(html: &str) -> Result<String, TranscriptError> {
    API_KEY
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| {
            let reason = if html.contains("class=\"g-recaptcha\"") {
                "watch page asked for a captcha"
            } else {
                "watch page has no InnerTube API key"
            };
            TranscriptError::Parse(reason.to_string())
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    playability_status: Option<PlayabilityStatus>,
    captions: Option<Captions>,
}

#[derive(Debug, Deserialize)]
struct PlayabilityStatus {
    status: String,
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Captions {
    player_captions_tracklist_renderer: Option<TrackList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackList {
    #[serde(default)]
    caption_tracks: Vec<CaptionTrack>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CaptionTrack {
    base_url: String,
    language_code: String,
    kind: Option<String>,
}

impl CaptionTrack {
    fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }
}

fn caption_tracks(
    video_id: &str,
    player: PlayerResponse,
) -> Result<Vec<CaptionTrack>, TranscriptError> {
    if let Some(status) = player.playability_status {
        if status.status != "OK" {
            debug!(
                status = %status.status,
                reason = status.reason.as_deref().unwrap_or_default(),
                "Video is not playable"
            );
            return Err(TranscriptError::Unavailable(video_id.to_string()));
        }
    }
    player
        .captions
        .and_then(|c| c.player_captions_tracklist_renderer)
        .map(|list| list.caption_tracks)
        .filter(|tracks| !tracks.is_empty())
        .ok_or_else(|| TranscriptError::Disabled(video_id.to_string()))
}

fn select_track<'a>(tracks: &'a [CaptionTrack], languages: &[String]) -> Option<&'a CaptionTrack> {
    languages.iter().find_map(|language| {
        let mut matching = tracks.iter().filter(|t| &t.language_code == language);
        let manual = matching.clone().find(|t| !t.is_generated());
        manual.or_else(|| matching.next())
    })
}

fn parse_transcript_xml(xml: &str) -> Vec<TranscriptSnippet> {
    TEXT_ELEMENT
        .captures_iter(xml)
        .filter_map(|caps| {
            let text = caption_text(caps.get(3)?.as_str());
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSnippet {
                text,
                start: caps.get(1)?.as_str().parse().unwrap_or_default(),
                duration: caps
                    .get(2)
                    .and_then(|d| d.as_str().parse().ok())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Decodes the XML escaping, then the HTML escaping inside it, and drops
/// formatting tags.
fn caption_text(raw: &str) -> String {
    let decoded = unescape(&unescape(raw));
    MARKUP.replace_all(&decoded, "").into_owned()
}

fn unescape(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .unwrap_or_else(|| entity[1..].parse())
                    .ok()
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
