//! Google Gemini `generateContent` backend.

use crate::settings::{GeminiSettings, SettingsError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::env;
use tracing::{debug, error, instrument};
use tsuzuri_core::{
    BackendError, ExitTool, GenerateRequest, GenerateResponse, Generator, TerminationSignal,
};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini API client.
#[derive(Clone)]
pub struct GeminiGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiGenerator")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiGenerator {
    /// Creates a client for `model` (e.g. `gemini-2.0-flash`).
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_URL.to_string(),
        }
    }

    /// Creates a client from settings, reading the key from the environment
    /// variable they name.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::MissingApiKey`] if the variable is unset.
    pub fn from_settings(settings: &GeminiSettings) -> Result<Self, SettingsError> {
        let api_key = env::var(&settings.api_key_env)
            .map_err(|_| SettingsError::MissingApiKey(settings.api_key_env.clone()))?;
        let mut generator = Self::new(api_key, &settings.model);
        if let Some(base_url) = &settings.base_url {
            generator = generator.with_base_url(base_url);
        }
        Ok(generator)
    }

    /// Overrides the API root, e.g. for a proxy.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Name of the model requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    #[instrument(skip(self, request), fields(model = %self.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, BackendError> {
        let body = GeminiRequest::from_request(request);
        debug!("Sending request to Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = ?e, "Failed to send request to Gemini API");
                BackendError::Transport(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().await.unwrap_or_default();
            error!(status = %status, body = %message, "Gemini API returned error");
            return Err(BackendError::Status {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: GeminiResponse = response.json().await.map_err(|e| {
            error!(error = ?e, "Failed to parse Gemini response");
            BackendError::InvalidResponse(e.to_string())
        })?;

        parsed.into_generate_response(request.exit_tool.as_ref())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
}

impl GeminiRequest {
    fn from_request(request: &GenerateRequest) -> Self {
        let tools = request
            .exit_tool
            .iter()
            .map(|tool| ToolDeclarations {
                function_declarations: vec![FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                }],
            })
            .collect();
        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(request.prompt.clone()),
                    function_call: None,
                }],
            }],
            tools,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolDeclarations {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

impl GeminiResponse {
    fn into_generate_response(
        self,
        exit_tool: Option<&ExitTool>,
    ) -> Result<GenerateResponse, BackendError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("response has no candidates".into()))?;
        let content = candidate.content.ok_or_else(|| {
            BackendError::InvalidResponse(format!(
                "candidate has no content (finish reason {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ))
        })?;

        let mut text = String::new();
        let mut signal = None;
        for part in content.parts {
            if let Some(chunk) = part.text {
                text.push_str(&chunk);
            }
            match (part.function_call, exit_tool) {
                (Some(call), Some(tool)) if call.name == tool.name => {
                    let message = call
                        .args
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("Loop exit requested");
                    signal = Some(TerminationSignal::approved(message));
                }
                (Some(call), _) => debug!("Ignoring call to undeclared function '{}'", call.name),
                (None, _) => {}
            }
        }

        Ok(GenerateResponse { text, signal })
    }
}
