//! Narrative state machine.
//!
//! Every transition reads the current [`GameState`] and produces a new
//! one. On any error the input state is left exactly as it was, so a
//! caller only ever commits complete transitions.
//!
//! Story text is always committed before its illustration: transitions
//! that create a node report a [`PendingImage`] for the caller to resolve
//! afterwards. Reader segments are the exception, their images are
//! resolved inside the transition because they patch the sequence.

use crate::completion::{generate, CharactersPayload, Generator, NodePayload, SplitPayload};
use crate::model::{
    Character, CharacterId, GameState, Mode, NodeId, Perspective, StoryNode, StoryOption,
    StorySequence,
};
use crate::prompts::{self, ImageStyle, DEFAULT_LANGUAGE};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

/// Errors from story transitions.
#[derive(Debug, Error)]
pub enum StoryError {
    #[error("API key not set - pass --api-key, run `set-key`, or set ARK_API_KEY")]
    MissingApiKey,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("API error: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("Generation format error (JSON parse error): {0}")]
    Malformed(String),

    #[error("Generated content was too long and got cut off (JSON parse error). Try fewer segments or a shorter source text.")]
    Truncated,

    #[error("{0}")]
    Notice(#[from] Notice),
}

impl StoryError {
    /// False for logical-state notices, which are not system faults.
    pub fn is_fault(&self) -> bool {
        !matches!(self, StoryError::Notice(_))
    }
}

/// A requested transition that has no valid target.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Notice {
    #[error("The story is complete")]
    StoryComplete,

    #[error("No characters available, cannot switch to interactive mode")]
    NoCharacters,

    #[error("This story has no source text sequence, cannot switch to reader mode")]
    NoSequence,

    #[error("Cannot find the matching source segment (the story may have left the main line)")]
    NoReaderLink,

    #[error("Unknown character: {0}")]
    UnknownCharacter(String),

    #[error("Unknown option: {0}")]
    UnknownOption(String),

    #[error("Switch to interactive mode before changing perspective")]
    ReaderPerspective,
}

/// Settings that shape every generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryConfig {
    /// Mode the story starts in.
    pub mode: Mode,

    /// How many characters to extract from the source.
    pub character_count: usize,

    /// Node budget for interactive stories.
    pub max_nodes: usize,

    /// How many segments to split the source into for reader mode.
    pub segment_count: usize,

    pub image_style: ImageStyle,

    /// Language of the story text.
    pub language: String,
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Interactive,
            character_count: 3,
            max_nodes: 10,
            segment_count: 5,
            image_style: ImageStyle::Cinematic,
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

impl StoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_character_count(mut self, count: usize) -> Self {
        self.character_count = count.max(1);
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes.max(1);
        self
    }

    pub fn with_segment_count(mut self, count: usize) -> Self {
        self.segment_count = count.max(1);
        self
    }

    pub fn with_image_style(mut self, style: ImageStyle) -> Self {
        self.image_style = style;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    fn system_prompt(&self) -> String {
        prompts::system_prompt(&self.language)
    }
}

/// A user action on a running story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Pick one of the current node's options by id.
    Choose(String),
    /// Retell the current node through another character.
    SwitchPerspective(CharacterId),
    /// Flip between reader and interactive mode.
    ToggleMode,
}

/// An illustration still to be generated for a committed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub node_id: NodeId,
    pub prompt: String,
}

/// The outcome of a successful transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: GameState,
    pub pending_image: Option<PendingImage>,
}

impl Transition {
    /// A transition with nothing left to resolve.
    fn settled(state: GameState) -> Self {
        Self {
            state,
            pending_image: None,
        }
    }

    /// A transition whose current node may still need its image.
    fn awaiting_image(state: GameState) -> Self {
        let pending_image = state.current_node.missing_image().map(|prompt| PendingImage {
            node_id: state.current_node.id.clone(),
            prompt: prompt.to_string(),
        });
        Self {
            state,
            pending_image,
        }
    }
}

// ============================================================================
// Session start
// ============================================================================

/// Create a new story from source text.
///
/// Characters are always extracted first so that either mode can later
/// switch to the other.
#[tracing::instrument(skip_all, fields(mode = %config.mode))]
pub async fn start<G>(
    source_text: &str,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let system = config.system_prompt();

    let payload: CharactersPayload = generate(
        generator,
        &system,
        &prompts::extract_characters(source_text, config.character_count),
    )
    .await?;
    let characters = normalize_characters(payload.characters)?;
    tracing::info!(count = characters.len(), "extracted characters");

    match config.mode {
        Mode::Reader => start_reader(source_text, characters, generator, config, &system).await,
        Mode::Interactive => {
            start_interactive(source_text, characters, generator, config, &system).await
        }
    }
}

async fn start_reader<G>(
    source_text: &str,
    characters: Vec<Character>,
    generator: &G,
    config: &StoryConfig,
    system: &str,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let payload: SplitPayload = generate(
        generator,
        system,
        &prompts::split_story(source_text, config.segment_count, config.image_style),
    )
    .await?;

    if payload.segments.is_empty() {
        return Err(StoryError::Malformed(
            "JSON contained no story segments".to_string(),
        ));
    }

    let batch = Uuid::new_v4().simple().to_string();
    let last = payload.segments.len() - 1;
    let segments: Vec<StoryNode> = payload
        .segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| {
            let options = if index < last {
                vec![StoryOption::continue_reading()]
            } else {
                Vec::new()
            };
            segment.into_node(NodeId::segment(&batch, index), options)
        })
        .collect();

    let mut sequence = StorySequence::new(segments);
    resolve_segment_image(&mut sequence, 0, generator).await;

    let current_node = sequence.segments()[0].clone();
    tracing::info!(segments = sequence.len(), "split source into reader sequence");

    Ok(Transition::settled(GameState {
        characters,
        history: Vec::new(),
        current_node,
        max_nodes: sequence.len(),
        mode: Mode::Reader,
        story_sequence: Some(sequence),
    }))
}

async fn start_interactive<G>(
    source_text: &str,
    characters: Vec<Character>,
    generator: &G,
    config: &StoryConfig,
    system: &str,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let narrator = characters[0].id.clone();

    let payload: NodePayload = generate(
        generator,
        system,
        &prompts::story_start(&characters, source_text, config.image_style),
    )
    .await?;

    let node = payload.into_node(NodeId::fresh(), Perspective::Character(narrator));
    require_options(&node)?;
    tracing::info!(node = %node.id, "generated opening scene");

    Ok(Transition::awaiting_image(GameState {
        characters,
        history: Vec::new(),
        current_node: node,
        max_nodes: config.max_nodes,
        mode: Mode::Interactive,
        story_sequence: None,
    }))
}

// ============================================================================
// Transitions
// ============================================================================

/// Apply a user action to the current state.
pub async fn apply<G>(
    state: &GameState,
    action: Action,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    match action {
        Action::Choose(option_id) => advance_on_option(state, &option_id, generator, config).await,
        Action::SwitchPerspective(character_id) => {
            switch_perspective(state, &character_id, generator, config).await
        }
        Action::ToggleMode => toggle_mode(state, generator, config).await,
    }
}

/// Move the story forward along the chosen option.
///
/// With a story sequence, the next segment is shown (reader mode) or
/// rewritten for the current narrator (interactive mode). Without one,
/// or when the current node is not linked to it, a continuation is
/// generated freely.
#[tracing::instrument(skip(state, generator, config), fields(mode = %state.mode))]
pub async fn advance_on_option<G>(
    state: &GameState,
    option_id: &str,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    if state.current_node.is_terminal() {
        return Err(Notice::StoryComplete.into());
    }
    let option = state
        .current_node
        .option(option_id)
        .ok_or_else(|| Notice::UnknownOption(option_id.to_string()))?;

    if let (Some(sequence), Some(position)) = (&state.story_sequence, state.sequence_position()) {
        let next = position + 1;
        if next >= sequence.len() {
            return Err(Notice::StoryComplete.into());
        }
        return match state.mode {
            Mode::Reader => Ok(advance_reader(state, sequence, next, generator).await),
            Mode::Interactive => advance_rewrite(state, sequence, next, generator, config).await,
        };
    }

    if state.story_sequence.is_some() {
        tracing::debug!("current node is not linked to the sequence, generating freely");
    }
    advance_free(state, option, generator, config).await
}

async fn advance_reader<G>(
    state: &GameState,
    sequence: &StorySequence,
    index: usize,
    generator: &G,
) -> Transition
where
    G: Generator + ?Sized,
{
    let mut sequence = sequence.clone();
    resolve_segment_image(&mut sequence, index, generator).await;

    let next_node = sequence.segments()[index].clone();
    tracing::info!(segment = index, "advanced to next segment");

    let mut next = state.clone();
    let previous = std::mem::replace(&mut next.current_node, next_node);
    next.history.push(previous);
    next.story_sequence = Some(sequence);
    Transition::settled(next)
}

async fn advance_rewrite<G>(
    state: &GameState,
    sequence: &StorySequence,
    index: usize,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let segment = &sequence.segments()[index];
    let narrator = state
        .current_character()
        .or_else(|| state.characters.first())
        .ok_or(Notice::NoCharacters)?;

    let node = rewrite_node(segment, narrator, &state.characters, generator, config).await?;
    tracing::info!(segment = index, node = %node.id, "rewrote next segment");

    let mut sequence = sequence.clone();
    sequence.link(&segment.id, &node);

    let mut next = state.clone();
    let previous = std::mem::replace(&mut next.current_node, node);
    next.history.push(previous);
    next.story_sequence = Some(sequence);
    Ok(Transition::awaiting_image(next))
}

async fn advance_free<G>(
    state: &GameState,
    option: &StoryOption,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let narrator = state
        .current_character()
        .or_else(|| state.characters.first())
        .ok_or(Notice::NoCharacters)?;
    let is_ending = state.history.len() + 1 >= state.max_nodes;
    let hint = if option.next_action_hint.trim().is_empty() {
        &option.label
    } else {
        &option.next_action_hint
    };

    let payload: NodePayload = generate(
        generator,
        &config.system_prompt(),
        &prompts::continuation(
            &state.current_node.summary,
            &state.current_node.content,
            narrator,
            hint,
            is_ending,
            config.image_style,
        ),
    )
    .await?;

    let mut node = payload.into_node(NodeId::fresh(), Perspective::Character(narrator.id.clone()));
    if is_ending {
        node.options.clear();
    } else {
        require_options(&node)?;
    }
    tracing::info!(node = %node.id, ending = is_ending, "generated continuation");

    let mut next = state.clone();
    let previous = std::mem::replace(&mut next.current_node, node);
    next.history.push(previous);
    Ok(Transition::awaiting_image(next))
}

/// Retell the current node through another character.
///
/// The replaced node is dropped, not moved into history. A node linked to
/// a segment passes that link on to its rewrite.
#[tracing::instrument(skip(state, generator, config), fields(character = %character_id))]
pub async fn switch_perspective<G>(
    state: &GameState,
    character_id: &CharacterId,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    if state.current_node.perspective.is_character(character_id) {
        return Ok(Transition::settled(state.clone()));
    }
    if state.mode == Mode::Reader {
        return Err(Notice::ReaderPerspective.into());
    }
    let character = state
        .character(character_id)
        .ok_or_else(|| Notice::UnknownCharacter(character_id.to_string()))?;

    let node = rewrite_node(
        &state.current_node,
        character,
        &state.characters,
        generator,
        config,
    )
    .await?;
    tracing::info!(node = %node.id, "rewrote current scene");

    let mut next = state.clone();
    if let Some(sequence) = next.story_sequence.as_mut() {
        let segment_id = sequence
            .reader_version_of(&state.current_node.id)
            .map(|segment| segment.id.clone());
        if let Some(segment_id) = segment_id {
            sequence.link(&segment_id, &node);
        }
    }
    next.current_node = node;
    Ok(Transition::awaiting_image(next))
}

/// Switch between reader and interactive mode.
///
/// Entering interactive mode reuses the segment's cached rewrite when one
/// exists, otherwise the first character retells the segment. Returning
/// to reader mode restores the linked segment without any generation.
#[tracing::instrument(skip_all, fields(mode = %state.mode))]
pub async fn toggle_mode<G>(
    state: &GameState,
    generator: &G,
    config: &StoryConfig,
) -> Result<Transition, StoryError>
where
    G: Generator + ?Sized,
{
    let sequence = state.story_sequence.as_ref().ok_or(Notice::NoSequence)?;

    match state.mode {
        Mode::Reader => {
            let segment = &state.current_node;

            if let Some(cached) = sequence.interactive_version_of(&segment.id) {
                tracing::info!(node = %cached.id, "reusing cached interactive rewrite");
                let mut next = state.clone();
                next.mode = Mode::Interactive;
                next.current_node = cached.clone();
                return Ok(Transition::awaiting_image(next));
            }

            let narrator = state.characters.first().ok_or(Notice::NoCharacters)?;
            let node = rewrite_node(segment, narrator, &state.characters, generator, config).await?;
            tracing::info!(node = %node.id, "entered interactive mode");

            let mut sequence = sequence.clone();
            sequence.link(&segment.id, &node);

            let mut next = state.clone();
            next.mode = Mode::Interactive;
            next.current_node = node;
            next.story_sequence = Some(sequence);
            Ok(Transition::awaiting_image(next))
        }
        Mode::Interactive => {
            let segment = sequence
                .reader_version_of(&state.current_node.id)
                .ok_or(Notice::NoReaderLink)?;
            tracing::info!(segment = %segment.id, "returned to reader mode");

            let mut next = state.clone();
            next.mode = Mode::Reader;
            next.current_node = segment.clone();
            Ok(Transition::settled(next))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

async fn rewrite_node<G>(
    source: &StoryNode,
    narrator: &Character,
    cast: &[Character],
    generator: &G,
    config: &StoryConfig,
) -> Result<StoryNode, StoryError>
where
    G: Generator + ?Sized,
{
    let payload: NodePayload = generate(
        generator,
        &config.system_prompt(),
        &prompts::rewrite(source, narrator, cast, config.image_style),
    )
    .await?;

    let mut node = payload.into_node(NodeId::fresh(), Perspective::Character(narrator.id.clone()));
    node.summary = source.summary.clone();
    if source.is_terminal() {
        node.options.clear();
    } else {
        require_options(&node)?;
    }
    Ok(node)
}

async fn resolve_segment_image<G>(sequence: &mut StorySequence, index: usize, generator: &G)
where
    G: Generator + ?Sized,
{
    let prompt = sequence
        .get(index)
        .and_then(|segment| segment.missing_image())
        .map(str::to_owned);

    if let Some(prompt) = prompt {
        if let Some(url) = generator.image(&prompt).await {
            sequence.set_segment_image(index, url);
        }
    }
}

fn require_options(node: &StoryNode) -> Result<(), StoryError> {
    if node.options.is_empty() {
        return Err(StoryError::Malformed(
            "JSON contained no options for a scene that should continue".to_string(),
        ));
    }
    Ok(())
}

/// Drop unnamed characters and make every id present and unique.
fn normalize_characters(characters: Vec<Character>) -> Result<Vec<Character>, StoryError> {
    let mut seen = HashSet::new();
    let characters: Vec<Character> = characters
        .into_iter()
        .filter(|c| !c.name.trim().is_empty())
        .enumerate()
        .map(|(i, mut character)| {
            if character.id.as_str().trim().is_empty() || seen.contains(&character.id) {
                character.id = CharacterId::new(format!("char_{}", i + 1));
            }
            seen.insert(character.id.clone());
            character
        })
        .collect();

    if characters.is_empty() {
        return Err(StoryError::Malformed(
            "JSON contained no characters".to_string(),
        ));
    }
    Ok(characters)
}
