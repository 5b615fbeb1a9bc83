//! Testing utilities for stories.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without API calls
//! - Reply builders producing the JSON the model is asked for
//! - `TestHarness` for scripted story scenarios
//! - Assertion helpers for verifying story state

use crate::completion::Generator;
use crate::engine::{StoryConfig, StoryError};
use crate::model::{CharacterId, GameState, Mode, StoryNode};
use crate::session::{SessionError, StorySession};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// A generator that returns scripted replies.
///
/// Replies are consumed in order. Once they run out, every completion
/// fails with a transport error. Images come from their own queue; when
/// it is empty a numbered placeholder URL is returned, unless images were
/// disabled with [`MockGenerator::without_images`].
#[derive(Debug, Default)]
pub struct MockGenerator {
    replies: Mutex<VecDeque<Result<String, StoryError>>>,
    images: Mutex<VecDeque<Option<String>>>,
    prompts: Mutex<Vec<String>>,
    images_served: Mutex<usize>,
    images_disabled: bool,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw completion.
    pub fn reply(self, raw: impl Into<String>) -> Self {
        self.push_reply(raw);
        self
    }

    /// Queue a failed completion.
    pub fn fail(self, error: StoryError) -> Self {
        self.push_failure(error);
        self
    }

    /// Queue an image URL.
    pub fn image_url(self, url: impl Into<String>) -> Self {
        self.push_image(Some(url.into()));
        self
    }

    /// Make every unscripted image request fail.
    pub fn without_images(mut self) -> Self {
        self.images_disabled = true;
        self
    }

    pub fn push_reply(&self, raw: impl Into<String>) {
        lock(&self.replies).push_back(Ok(raw.into()));
    }

    pub fn push_failure(&self, error: StoryError) {
        lock(&self.replies).push_back(Err(error));
    }

    /// Queue an image result; `None` simulates a failed request.
    pub fn push_image(&self, url: Option<String>) {
        lock(&self.images).push_back(url);
    }

    /// Every completion prompt received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    /// Number of scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, StoryError> {
        lock(&self.prompts).push(prompt.to_string());
        lock(&self.replies).pop_front().unwrap_or_else(|| {
            Err(StoryError::Transport(
                "mock generator has no more scripted replies".to_string(),
            ))
        })
    }

    async fn image(&self, _prompt: &str) -> Option<String> {
        if let Some(scripted) = lock(&self.images).pop_front() {
            return scripted;
        }
        if self.images_disabled {
            return None;
        }
        let mut served = lock(&self.images_served);
        *served += 1;
        Some(format!("https://images.test/{served}.png"))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Reply builders
// ============================================================================

/// A character extraction reply. Ids are `char_1`, `char_2`, ...
pub fn characters_reply(names: &[&str]) -> String {
    let characters: Vec<_> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            json!({
                "id": format!("char_{}", i + 1),
                "name": name,
                "bio": format!("{name} lives by the river."),
                "traits": ["stubborn", "kind"],
            })
        })
        .collect();
    json!({ "characters": characters }).to_string()
}

/// A scene reply with `options` options named `opt_1`, `opt_2`, ...
pub fn scene_reply(content: &str, options: usize) -> String {
    let options: Vec<_> = (1..=options)
        .map(|i| {
            json!({
                "id": format!("opt_{i}"),
                "label": format!("Choice {i}"),
                "next_action_hint": format!("take path {i}"),
            })
        })
        .collect();
    json!({
        "summary": format!("summary: {content}"),
        "content": content,
        "options": options,
        "image_prompt": format!("Cinematic style, {content}"),
    })
    .to_string()
}

/// A final scene reply without options.
pub fn ending_reply(content: &str) -> String {
    scene_reply(content, 0)
}

/// A split reply with one segment per entry.
pub fn segments_reply(contents: &[&str]) -> String {
    let segments: Vec<_> = contents
        .iter()
        .map(|content| {
            json!({
                "summary": format!("summary: {content}"),
                "content": content,
                "image_prompt": format!("Cinematic style, {content}"),
                "education": {
                    "knowledge_points": [{"question": "Where?", "answer": "By the river."}],
                    "thinking_questions": [],
                },
            })
        })
        .collect();
    json!({ "segments": segments }).to_string()
}

// ============================================================================
// Test harness
// ============================================================================

/// Test harness for running story scenarios against a [`MockGenerator`].
pub struct TestHarness {
    pub session: StorySession<MockGenerator>,
}

impl TestHarness {
    /// Create a harness for an interactive story.
    pub fn new() -> Self {
        Self::with_config(StoryConfig::default())
    }

    /// Create a harness for a reader-mode story.
    pub fn reader() -> Self {
        Self::with_config(StoryConfig::default().with_mode(Mode::Reader))
    }

    pub fn with_config(config: StoryConfig) -> Self {
        Self {
            session: StorySession::with_generator(MockGenerator::new(), config),
        }
    }

    pub fn generator(&self) -> &MockGenerator {
        self.session.generator()
    }

    /// Queue a raw completion.
    pub fn expect_reply(&mut self, raw: impl Into<String>) -> &mut Self {
        self.generator().push_reply(raw);
        self
    }

    /// Queue a failed completion.
    pub fn expect_failure(&mut self, error: StoryError) -> &mut Self {
        self.generator().push_failure(error);
        self
    }

    /// Queue an image result.
    pub fn expect_image(&mut self, url: Option<&str>) -> &mut Self {
        self.generator().push_image(url.map(str::to_owned));
        self
    }

    pub async fn start(&mut self, source_text: &str) -> Result<StoryNode, SessionError> {
        self.session.start(source_text).await.cloned()
    }

    pub async fn choose(&mut self, option_id: &str) -> Result<StoryNode, SessionError> {
        self.session.choose(option_id).await.cloned()
    }

    pub async fn switch_to(&mut self, character_id: &str) -> Result<StoryNode, SessionError> {
        self.session
            .switch_perspective(&CharacterId::new(character_id))
            .await
            .cloned()
    }

    pub async fn toggle_mode(&mut self) -> Result<StoryNode, SessionError> {
        self.session.toggle_mode().await.cloned()
    }

    pub fn state(&self) -> Option<&GameState> {
        self.session.state()
    }

    /// Number of completion calls made so far.
    pub fn completions(&self) -> usize {
        self.generator().prompts().len()
    }

    /// The most recent completion prompt.
    pub fn last_prompt(&self) -> Option<String> {
        self.generator().prompts().pop()
    }

    pub fn mode(&self) -> Option<Mode> {
        self.state().map(GameState::mode)
    }

    pub fn progress(&self) -> Option<(usize, usize)> {
        self.state().map(GameState::progress)
    }

    /// Id of the character narrating the current node.
    pub fn narrator(&self) -> Option<&str> {
        self.state()
            .and_then(|s| s.current_node().perspective.character_id())
            .map(CharacterId::as_str)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the story is in the given mode.
#[track_caller]
pub fn assert_mode(harness: &TestHarness, mode: Mode) {
    assert_eq!(
        harness.mode(),
        Some(mode),
        "Expected the story to be in {mode} mode"
    );
}

/// Assert progress is at expected values.
#[track_caller]
pub fn assert_progress(harness: &TestHarness, visited: usize, max: usize) {
    let actual = harness.progress();
    assert_eq!(
        actual,
        Some((visited, max)),
        "Expected progress {visited}/{max}, got {actual:?}"
    );
}

/// Assert the current node is terminal.
#[track_caller]
pub fn assert_terminal(harness: &TestHarness) {
    assert!(
        harness.state().is_some_and(GameState::is_terminal),
        "Expected the current node to be terminal"
    );
}

/// Assert the current node is narrated by the given character.
#[track_caller]
pub fn assert_narrator(harness: &TestHarness, character_id: &str) {
    assert_eq!(
        harness.narrator(),
        Some(character_id),
        "Expected the current node to be narrated by '{character_id}'"
    );
}
