//! StorySession - the primary public API for running a story.
//!
//! The session owns the generator, the current [`GameState`] and an
//! optional [`LocalStore`]. Every operation runs a pure transition from
//! [`crate::engine`] and only commits its result on success, saving the
//! new state right after.

use crate::completion::{ArkGenerator, Generator};
use crate::engine::{self, Action, PendingImage, StoryConfig, StoryError, Transition};
use crate::model::{CharacterId, GameState, Mode, StoryNode};
use crate::persist::{LocalStore, PersistError};
use crate::prompts::ImageStyle;
use ark::Ark;
use thiserror::Error;

/// Errors from StorySession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Story(#[from] StoryError),

    #[error("Storage error: {0}")]
    Persist(#[from] PersistError),

    #[error("No API key configured - pass --api-key, run `set-key`, or set ARK_API_KEY")]
    NoApiKey,

    #[error("No story in progress")]
    NoStory,

    #[error("A story is already in progress - reset it first")]
    AlreadyStarted,
}

impl SessionError {
    /// True when the error is a logical-state notice rather than a fault.
    pub fn is_notice(&self) -> bool {
        matches!(self, SessionError::Story(e) if !e.is_fault())
    }
}

/// Configuration for creating a story session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Settings for the story itself.
    pub story: StoryConfig,

    /// API key. Falls back to the stored key, then `ARK_API_KEY`.
    pub api_key: Option<String>,

    /// API root. Falls back to `ARK_BASE_URL`, then the client default.
    pub base_url: Option<String>,

    /// Chat model. Falls back to `ARK_CHAT_MODEL`, then the client default.
    pub chat_model: Option<String>,

    /// Image model. Falls back to `ARK_IMAGE_MODEL`, then the client default.
    pub image_model: Option<String>,

    /// Token ceiling for completions.
    pub max_tokens: Option<usize>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.story = self.story.with_mode(mode);
        self
    }

    pub fn with_character_count(mut self, count: usize) -> Self {
        self.story = self.story.with_character_count(count);
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.story = self.story.with_max_nodes(max_nodes);
        self
    }

    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.story = self.story.with_segment_count(count);
        self
    }

    pub fn with_image_style(mut self, style: ImageStyle) -> Self {
        self.story = self.story.with_image_style(style);
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.story = self.story.with_language(language);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_chat_model(mut self, model: impl Into<String>) -> Self {
        self.chat_model = Some(model.into());
        self
    }

    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self
    }
}

/// A running story.
pub struct StorySession<G: Generator = ArkGenerator> {
    generator: G,
    config: StoryConfig,
    store: Option<LocalStore>,
    state: Option<GameState>,
}

impl StorySession<ArkGenerator> {
    /// Create a session backed by the Ark API, without local storage.
    pub async fn new(config: SessionConfig) -> Result<Self, SessionError> {
        let generator = build_generator(&config, None)?;
        Ok(Self::with_generator(generator, config.story))
    }

    /// Create a session backed by the Ark API and a local store.
    ///
    /// The stored API key is used when the config carries none. The saved
    /// story is not loaded until [`StorySession::resume`] is called.
    pub async fn open(config: SessionConfig, store: LocalStore) -> Result<Self, SessionError> {
        let stored_key = store.load_api_key().await?;
        let generator = build_generator(&config, stored_key)?;
        Ok(Self::with_generator(generator, config.story).with_store(store))
    }
}

impl<G: Generator> StorySession<G> {
    /// Create a session with a custom generator.
    pub fn with_generator(generator: G, config: StoryConfig) -> Self {
        Self {
            generator,
            config,
            store: None,
            state: None,
        }
    }

    /// Save every committed state to `store`.
    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn state(&self) -> Option<&GameState> {
        self.state.as_ref()
    }

    pub fn current_node(&self) -> Option<&StoryNode> {
        self.state.as_ref().map(GameState::current_node)
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn has_story(&self) -> bool {
        self.state.is_some()
    }

    /// Load the saved story, if any. Returns whether a story was restored.
    ///
    /// A save that cannot be read back is logged and ignored.
    pub async fn resume(&mut self) -> Result<bool, SessionError> {
        let Some(store) = &self.store else {
            return Ok(false);
        };

        match store.load_state().await {
            Ok(Some(state)) => {
                tracing::info!(mode = %state.mode(), "resumed saved story");
                self.state = Some(state);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(PersistError::Io(e)) => Err(PersistError::Io(e).into()),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable saved story");
                Ok(false)
            }
        }
    }

    /// Start a story and commit its text, leaving the opening image pending.
    pub async fn begin(&mut self, source_text: &str) -> Result<Option<PendingImage>, SessionError> {
        if self.state.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        let transition = engine::start(source_text, &self.generator, &self.config).await?;
        self.commit(transition).await
    }

    /// Apply an action and commit the resulting text, leaving its image pending.
    pub async fn dispatch(&mut self, action: Action) -> Result<Option<PendingImage>, SessionError> {
        let state = self.state.as_ref().ok_or(SessionError::NoStory)?;
        let transition = engine::apply(state, action, &self.generator, &self.config).await?;
        self.commit(transition).await
    }

    /// Generate a pending image and attach it if its node is still current.
    ///
    /// Returns whether the image was attached. Image failures are never
    /// errors; only saving the patched state can fail.
    pub async fn resolve_image(&mut self, pending: PendingImage) -> Result<bool, SessionError> {
        let Some(url) = self.generator.image(&pending.prompt).await else {
            return Ok(false);
        };

        let Some(mut patched) = self.state.clone() else {
            return Ok(false);
        };
        if !patched.attach_image(&pending.node_id, url) {
            tracing::debug!(
                node = %pending.node_id,
                "dropping image for a node that is no longer current"
            );
            return Ok(false);
        }

        self.save(&patched).await?;
        self.state = Some(patched);
        Ok(true)
    }

    /// Start a story from source text, image included.
    pub async fn start(&mut self, source_text: &str) -> Result<&StoryNode, SessionError> {
        let pending = self.begin(source_text).await?;
        self.settle(pending).await
    }

    /// Follow an option of the current node.
    pub async fn choose(&mut self, option_id: &str) -> Result<&StoryNode, SessionError> {
        let pending = self.dispatch(Action::Choose(option_id.to_string())).await?;
        self.settle(pending).await
    }

    /// Retell the current node from another character's perspective.
    pub async fn switch_perspective(
        &mut self,
        character_id: &CharacterId,
    ) -> Result<&StoryNode, SessionError> {
        let pending = self
            .dispatch(Action::SwitchPerspective(character_id.clone()))
            .await?;
        self.settle(pending).await
    }

    /// Switch between reader and interactive mode.
    pub async fn toggle_mode(&mut self) -> Result<&StoryNode, SessionError> {
        let pending = self.dispatch(Action::ToggleMode).await?;
        self.settle(pending).await
    }

    /// Drop the current story and its save.
    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.state = None;
        if let Some(store) = &self.store {
            store.clear_state().await?;
        }
        tracing::info!("story reset");
        Ok(())
    }

    /// Install a transition once its state is saved. A failed save leaves
    /// the current state untouched.
    async fn commit(
        &mut self,
        transition: Transition,
    ) -> Result<Option<PendingImage>, SessionError> {
        self.save(&transition.state).await?;
        self.state = Some(transition.state);
        Ok(transition.pending_image)
    }

    async fn settle(&mut self, pending: Option<PendingImage>) -> Result<&StoryNode, SessionError> {
        if let Some(pending) = pending {
            self.resolve_image(pending).await?;
        }
        self.current_node().ok_or(SessionError::NoStory)
    }

    async fn save(&self, state: &GameState) -> Result<(), SessionError> {
        if let Some(store) = &self.store {
            store.save_state(state).await?;
        }
        Ok(())
    }
}

/// Build the Ark-backed generator, resolving the key and endpoint overrides.
fn build_generator(
    config: &SessionConfig,
    stored_key: Option<String>,
) -> Result<ArkGenerator, SessionError> {
    dotenvy::dotenv().ok();

    let api_key = resolve_api_key(config, stored_key, env_override("ARK_API_KEY"))?;

    let mut client = Ark::new(api_key).map_err(StoryError::from)?;
    if let Some(url) = config.base_url.clone().or_else(|| env_override("ARK_BASE_URL")) {
        client = client.with_base_url(url);
    }
    if let Some(model) = config.chat_model.clone().or_else(|| env_override("ARK_CHAT_MODEL")) {
        client = client.with_chat_model(model);
    }
    if let Some(model) = config.image_model.clone().or_else(|| env_override("ARK_IMAGE_MODEL")) {
        client = client.with_image_model(model);
    }

    let mut generator = ArkGenerator::new(client);
    if let Some(max_tokens) = config.max_tokens {
        generator = generator.with_max_tokens(max_tokens);
    }
    Ok(generator)
}

/// Pick the first non-blank key: explicit, then stored, then environment.
fn resolve_api_key(
    config: &SessionConfig,
    stored_key: Option<String>,
    env_key: Option<String>,
) -> Result<String, SessionError> {
    [config.api_key.clone(), stored_key, env_key]
        .into_iter()
        .flatten()
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
        .ok_or(SessionError::NoApiKey)
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Notice;
    use crate::model::fixtures::reader_state;
    use crate::model::NodeId;
    use crate::testing::{characters_reply, scene_reply, MockGenerator};
    use tempfile::TempDir;

    #[test]
    fn test_session_config() {
        let config = SessionConfig::new()
            .with_mode(Mode::Reader)
            .with_segment_count(4)
            .with_image_style(ImageStyle::Watercolor)
            .with_api_key("sk-test")
            .with_max_tokens(2048);

        assert_eq!(config.story.mode, Mode::Reader);
        assert_eq!(config.story.segment_count, 4);
        assert_eq!(config.story.image_style, ImageStyle::Watercolor);
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.max_tokens, Some(2048));
    }

    #[test]
    fn test_explicit_key_wins() {
        let config = SessionConfig::new()
            .with_api_key("sk-explicit")
            .with_base_url("http://localhost:9000/v3/")
            .with_chat_model("test-chat");

        let generator = build_generator(&config, Some("sk-stored".into())).unwrap();
        assert_eq!(generator.client().base_url(), "http://localhost:9000/v3");
        assert_eq!(generator.client().chat_model(), "test-chat");
    }

    #[test]
    fn test_missing_key_is_refused() {
        let config = SessionConfig::new();
        assert!(matches!(
            resolve_api_key(&config, None, None),
            Err(SessionError::NoApiKey)
        ));

        let blank = SessionConfig::new().with_api_key("  ");
        assert!(matches!(
            resolve_api_key(&blank, Some(String::new()), None),
            Err(SessionError::NoApiKey)
        ));
    }

    #[test]
    fn test_key_precedence() {
        let blank = SessionConfig::new().with_api_key("");
        let key = resolve_api_key(&blank, Some("sk-stored".into()), Some("sk-env".into()));
        assert_eq!(key.unwrap(), "sk-stored");

        let key = resolve_api_key(&blank, None, Some(" sk-env ".into()));
        assert_eq!(key.unwrap(), "sk-env");

        let explicit = SessionConfig::new().with_api_key("sk-explicit");
        let key = resolve_api_key(&explicit, Some("sk-stored".into()), Some("sk-env".into()));
        assert_eq!(key.unwrap(), "sk-explicit");
    }

    #[tokio::test]
    async fn test_operations_before_start() {
        let mut session =
            StorySession::with_generator(MockGenerator::new(), StoryConfig::default());

        assert!(matches!(
            session.choose("opt_1").await,
            Err(SessionError::NoStory)
        ));
        assert!(matches!(
            session.toggle_mode().await,
            Err(SessionError::NoStory)
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_refused() {
        let generator = MockGenerator::new()
            .reply(characters_reply(&["Lin"]))
            .reply(scene_reply("Lin wakes.", 2));
        let mut session = StorySession::with_generator(generator, StoryConfig::default());

        session.start("Once upon a time.").await.unwrap();
        assert!(matches!(
            session.start("Again.").await,
            Err(SessionError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn test_failed_action_keeps_state() {
        let generator = MockGenerator::new()
            .reply(characters_reply(&["Lin", "Wei"]))
            .reply(scene_reply("Lin wakes.", 2))
            .reply("not json at all");
        let mut session = StorySession::with_generator(generator, StoryConfig::default());
        session.start("Once upon a time.").await.unwrap();
        let before = session.state().cloned();

        let err = session.choose("opt_1").await.unwrap_err();
        assert!(matches!(err, SessionError::Story(StoryError::Malformed(_))));
        assert!(!err.is_notice());
        assert_eq!(session.state().cloned(), before);
    }

    #[tokio::test]
    async fn test_notice_is_flagged() {
        let mut session =
            StorySession::with_generator(MockGenerator::new(), StoryConfig::default());
        session.state = Some(reader_state());

        let err = session
            .switch_perspective(&CharacterId::new("char_1"))
            .await
            .unwrap_err();
        assert!(err.is_notice());
        assert!(matches!(
            err,
            SessionError::Story(StoryError::Notice(Notice::ReaderPerspective))
        ));
    }

    #[tokio::test]
    async fn test_stale_image_is_dropped() {
        let generator = MockGenerator::new().image_url("https://img/late.png");
        let mut session = StorySession::with_generator(generator, StoryConfig::default());
        session.state = Some(reader_state());

        let attached = session
            .resolve_image(PendingImage {
                node_id: NodeId::new("gone"),
                prompt: "a scene".into(),
            })
            .await
            .unwrap();

        assert!(!attached);
        assert_eq!(session.state().cloned(), Some(reader_state()));
    }

    #[tokio::test]
    async fn test_commits_are_saved_and_resumed() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        let generator = MockGenerator::new()
            .reply(characters_reply(&["Lin"]))
            .reply(scene_reply("Lin wakes.", 2))
            .image_url("https://img/start.png");
        let mut session = StorySession::with_generator(generator, StoryConfig::default())
            .with_store(store.clone());
        session.start("Once upon a time.").await.unwrap();

        let mut restored =
            StorySession::with_generator(MockGenerator::new(), StoryConfig::default())
                .with_store(store.clone());
        assert!(restored.resume().await.unwrap());
        assert_eq!(restored.state(), session.state());
        assert_eq!(
            restored.current_node().unwrap().image_url.as_deref(),
            Some("https://img/start.png")
        );

        restored.reset().await.unwrap();
        assert!(!restored.has_story());
        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let not_a_dir = temp_dir.path().join("occupied");
        tokio::fs::write(&not_a_dir, "a file, not a directory")
            .await
            .unwrap();

        let generator = MockGenerator::new()
            .reply(characters_reply(&["Lin", "Wei"]))
            .reply(scene_reply("Lin wakes.", 2))
            .reply(scene_reply("Lin crosses the river.", 2));
        let mut session = StorySession::with_generator(generator, StoryConfig::default());
        session.start("Once upon a time.").await.unwrap();
        let before = session.state().cloned();

        session.store = Some(LocalStore::new(&not_a_dir));
        let err = session.choose("opt_1").await.unwrap_err();

        assert!(matches!(err, SessionError::Persist(_)));
        assert_eq!(session.state().cloned(), before);
    }

    #[tokio::test]
    async fn test_failed_start_keeps_previous_save() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        let generator = MockGenerator::new()
            .reply(characters_reply(&["Lin"]))
            .reply(scene_reply("Lin wakes.", 2));
        let mut first = StorySession::with_generator(generator, StoryConfig::default())
            .with_store(store.clone());
        first.start("Once upon a time.").await.unwrap();

        let generator =
            MockGenerator::new().fail(StoryError::Transport("connection refused".into()));
        let mut second = StorySession::with_generator(generator, StoryConfig::default())
            .with_store(store.clone());
        assert!(second.start("Another story.").await.is_err());
        assert!(!second.has_story());

        assert_eq!(store.load_state().await.unwrap().as_ref(), first.state());
    }

    #[tokio::test]
    async fn test_unreadable_save_is_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        tokio::fs::write(temp_dir.path().join("story_auto_state.json"), "{broken")
            .await
            .unwrap();

        let mut session = StorySession::with_generator(MockGenerator::new(), StoryConfig::default())
            .with_store(LocalStore::new(temp_dir.path()));

        assert!(!session.resume().await.unwrap());
        assert!(!session.has_story());
    }
}
