//! Completion and image generation.
//!
//! The [`Generator`] trait is the seam between the state machine and the
//! model backend. [`ArkGenerator`] talks to the real endpoints; tests use
//! [`crate::testing::MockGenerator`].

use crate::engine::StoryError;
use crate::model::{Character, EducationContent, NodeId, Perspective, StoryNode, StoryOption};
use ark::{Ark, ChatRequest, FinishReason, ImageRequest, Message};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// A backend able to complete prompts and draw illustrations.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Complete a single-user-message conversation and return the raw text.
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, StoryError>;

    /// Generate an illustration, returning its URL.
    ///
    /// Failures are never fatal and come back as `None`.
    async fn image(&self, prompt: &str) -> Option<String>;
}

/// Generator backed by the Ark API.
#[derive(Debug, Clone)]
pub struct ArkGenerator {
    client: Ark,
    max_tokens: usize,
}

impl ArkGenerator {
    pub fn new(client: Ark) -> Self {
        Self {
            client,
            max_tokens: ark::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn client(&self) -> &Ark {
        &self.client
    }
}

#[async_trait]
impl Generator for ArkGenerator {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, StoryError> {
        let request = ChatRequest::new(vec![Message::user(prompt)])
            .with_system(system)
            .with_max_tokens(self.max_tokens);

        let response = self.client.complete(request).await?;

        if response.finish_reason == Some(FinishReason::Length) {
            tracing::warn!(
                max_tokens = self.max_tokens,
                "completion stopped at the token ceiling"
            );
        }

        Ok(response.content)
    }

    async fn image(&self, prompt: &str) -> Option<String> {
        match self.client.generate_image(ImageRequest::new(prompt)).await {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed, continuing without image");
                None
            }
        }
    }
}

impl From<ark::Error> for StoryError {
    fn from(err: ark::Error) -> Self {
        match err {
            ark::Error::NoApiKey => StoryError::MissingApiKey,
            ark::Error::Config(msg) => StoryError::Config(msg),
            ark::Error::Network(msg) => StoryError::Transport(msg),
            ark::Error::Api { status, message } => StoryError::Upstream {
                status,
                body: message,
            },
            ark::Error::Parse(msg) => {
                StoryError::Transport(format!("unreadable API response: {msg}"))
            }
        }
    }
}

/// Complete a prompt and parse the answer as `T`.
pub async fn generate<T, G>(generator: &G, system: &str, prompt: &str) -> Result<T, StoryError>
where
    T: DeserializeOwned,
    G: Generator + ?Sized,
{
    let raw = generator.complete(system, prompt).await?;
    parse_generation(&raw)
}

/// Remove markdown code fences the model may wrap its JSON in.
pub fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

/// Parse model output as JSON of the expected shape.
pub fn parse_generation<T: DeserializeOwned>(raw: &str) -> Result<T, StoryError> {
    let cleaned = strip_code_fences(raw);

    let value: serde_json::Value = serde_json::from_str(&cleaned).map_err(|e| {
        tracing::debug!(error = %e, length = cleaned.len(), "model output is not JSON");
        classify_syntax_error(&e)
    })?;

    serde_json::from_value(value)
        .map_err(|e| StoryError::Malformed(format!("JSON does not match the expected shape: {e}")))
}

fn classify_syntax_error(e: &serde_json::Error) -> StoryError {
    // serde_json reports a cut-off string literal as EOF inside a string.
    if e.is_eof() && e.to_string().starts_with("EOF while parsing a string") {
        StoryError::Truncated
    } else {
        StoryError::Malformed(e.to_string())
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct CharactersPayload {
    #[serde(default)]
    pub characters: Vec<Character>,
}

/// A generated scene: story start, continuation or rewrite.
#[derive(Debug, Deserialize)]
pub(crate) struct NodePayload {
    #[serde(default)]
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub options: Vec<StoryOption>,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub education: Option<EducationContent>,
}

impl NodePayload {
    pub fn into_node(self, id: NodeId, perspective: Perspective) -> StoryNode {
        StoryNode {
            id,
            summary: self.summary,
            content: self.content,
            options: number_options(self.options),
            perspective,
            image_prompt: non_blank(self.image_prompt),
            image_url: None,
            education: self.education.filter(|e| !e.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SplitPayload {
    #[serde(default)]
    pub segments: Vec<SegmentPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SegmentPayload {
    #[serde(default)]
    pub summary: String,
    pub content: String,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub education: Option<EducationContent>,
}

impl SegmentPayload {
    pub fn into_node(self, id: NodeId, options: Vec<StoryOption>) -> StoryNode {
        StoryNode {
            id,
            summary: self.summary,
            content: self.content,
            options,
            perspective: Perspective::Reader,
            image_prompt: non_blank(self.image_prompt),
            image_url: None,
            education: self.education.filter(|e| !e.is_empty()),
        }
    }
}

/// Give options without an id a positional one.
fn number_options(options: Vec<StoryOption>) -> Vec<StoryOption> {
    options
        .into_iter()
        .enumerate()
        .map(|(i, mut option)| {
            if option.id.trim().is_empty() {
                option.id = format!("opt_{}", i + 1);
            }
            option
        })
        .collect()
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.trim().is_empty())
}
