//! Story data model.
//!
//! Contains the types for characters, story nodes, the fixed reader
//! sequence with its links to interactive rewrites, and the complete
//! game state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for story nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a new id for a generated node.
    pub fn fresh() -> Self {
        Self(format!("node_{}", Uuid::new_v4().simple()))
    }

    /// Id of the `index`-th segment of a split batch.
    pub fn segment(batch: &str, index: usize) -> Self {
        Self(format!("seg_{batch}_{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for characters.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterId(pub String);

impl CharacterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Characters and options
// ============================================================================

/// A character extracted from the source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    #[serde(default)]
    pub id: CharacterId,
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub traits: Vec<String>,
}

/// Whose eyes a node is narrated through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    /// The fixed-sequence narrator used for reader segments.
    Reader,
    /// First-person narration by one of the story's characters.
    Character(CharacterId),
}

impl Perspective {
    pub fn character_id(&self) -> Option<&CharacterId> {
        match self {
            Perspective::Reader => None,
            Perspective::Character(id) => Some(id),
        }
    }

    pub fn is_character(&self, id: &CharacterId) -> bool {
        self.character_id() == Some(id)
    }
}

/// A branch the reader can take from a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryOption {
    #[serde(default)]
    pub id: String,
    pub label: String,
    /// Fed into the next continuation prompt; never shown as a promise.
    #[serde(default)]
    pub next_action_hint: String,
}

impl StoryOption {
    /// Option id used for the single "continue" option of reader segments.
    pub const CONTINUE_ID: &'static str = "next";

    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        next_action_hint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            next_action_hint: next_action_hint.into(),
        }
    }

    /// The option every reader segment but the last carries.
    pub fn continue_reading() -> Self {
        Self::new(Self::CONTINUE_ID, "Next chapter", "Continue reading")
    }
}

// ============================================================================
// Education
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationItem {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub answer: String,
}

/// Study material attached to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EducationContent {
    #[serde(default)]
    pub knowledge_points: Vec<EducationItem>,
    #[serde(default)]
    pub thinking_questions: Vec<EducationItem>,
}

impl EducationContent {
    pub fn is_empty(&self) -> bool {
        self.knowledge_points.is_empty() && self.thinking_questions.is_empty()
    }
}

// ============================================================================
// Story nodes
// ============================================================================

/// A single rendered scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryNode {
    pub id: NodeId,
    /// Compressed context for later prompts.
    pub summary: String,
    pub content: String,
    /// Empty means the node is terminal.
    #[serde(default)]
    pub options: Vec<StoryOption>,
    pub perspective: Perspective,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<EducationContent>,
}

impl StoryNode {
    pub fn is_terminal(&self) -> bool {
        self.options.is_empty()
    }

    pub fn option(&self, id: &str) -> Option<&StoryOption> {
        self.options.iter().find(|o| o.id == id)
    }

    /// The image prompt, if the node has one but no image yet.
    pub fn missing_image(&self) -> Option<&str> {
        match (&self.image_prompt, &self.image_url) {
            (Some(prompt), None) if !prompt.trim().is_empty() => Some(prompt),
            _ => None,
        }
    }
}

// ============================================================================
// Mode
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Free branching, narrated by a character.
    #[default]
    Interactive,
    /// The source text split into a fixed sequence.
    Reader,
}

impl Mode {
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Interactive => "interactive",
            Mode::Reader => "reader",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interactive" => Ok(Mode::Interactive),
            "reader" => Ok(Mode::Reader),
            other => Err(format!("unknown mode '{other}' (expected interactive or reader)")),
        }
    }
}

// ============================================================================
// Story sequence
// ============================================================================

/// The source text split into ordered segments, plus the links between
/// segments and their interactive rewrites.
///
/// Segment order and count never change after construction. Links are
/// only created through [`StorySequence::link`], which refuses unknown
/// segments, so every recorded link resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySequence {
    segments: Vec<StoryNode>,
    /// Rewrite node id -> segment id, for every node ever linked.
    #[serde(default)]
    rewrite_of: BTreeMap<NodeId, NodeId>,
    /// Segment id -> most recent interactive rewrite of it.
    #[serde(default)]
    rewrites: BTreeMap<NodeId, StoryNode>,
}

impl StorySequence {
    pub fn new(segments: Vec<StoryNode>) -> Self {
        Self {
            segments,
            rewrite_of: BTreeMap::new(),
            rewrites: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[StoryNode] {
        &self.segments
    }

    pub fn get(&self, index: usize) -> Option<&StoryNode> {
        self.segments.get(index)
    }

    pub fn position_of(&self, segment_id: &NodeId) -> Option<usize> {
        self.segments.iter().position(|s| &s.id == segment_id)
    }

    pub fn segment(&self, segment_id: &NodeId) -> Option<&StoryNode> {
        self.segments.iter().find(|s| &s.id == segment_id)
    }

    /// The segment an interactive node was rewritten from.
    pub fn reader_version_of(&self, node_id: &NodeId) -> Option<&StoryNode> {
        self.rewrite_of
            .get(node_id)
            .and_then(|segment_id| self.segment(segment_id))
    }

    /// The latest interactive rewrite of a segment.
    pub fn interactive_version_of(&self, segment_id: &NodeId) -> Option<&StoryNode> {
        self.rewrites.get(segment_id)
    }

    /// Record `node` as the interactive counterpart of a segment.
    ///
    /// Returns false, recording nothing, if the segment is unknown.
    pub(crate) fn link(&mut self, segment_id: &NodeId, node: &StoryNode) -> bool {
        if self.position_of(segment_id).is_none() {
            return false;
        }
        self.rewrite_of.insert(node.id.clone(), segment_id.clone());
        self.rewrites.insert(segment_id.clone(), node.clone());
        true
    }

    pub(crate) fn set_segment_image(&mut self, index: usize, url: String) {
        if let Some(segment) = self.segments.get_mut(index) {
            segment.image_url = Some(url);
        }
    }

    /// Mirror an image onto whichever segment or cached rewrite has this id.
    pub(crate) fn attach_image(&mut self, node_id: &NodeId, url: &str) {
        if let Some(segment) = self.segments.iter_mut().find(|s| &s.id == node_id) {
            segment.image_url = Some(url.to_string());
        }
        if let Some(rewrite) = self.rewrites.values_mut().find(|r| &r.id == node_id) {
            rewrite.image_url = Some(url.to_string());
        }
    }

    fn validate(&self) -> Result<(), String> {
        for (rewrite, segment) in &self.rewrite_of {
            if self.position_of(segment).is_none() {
                return Err(format!("rewrite {rewrite} links to unknown segment {segment}"));
            }
        }
        for (segment, rewrite) in &self.rewrites {
            if self.rewrite_of.get(&rewrite.id) != Some(segment) {
                return Err(format!("cached rewrite {} is not linked to {segment}", rewrite.id));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Game state
// ============================================================================

/// The complete story session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameState {
    pub(crate) characters: Vec<Character>,
    /// Visited nodes, oldest first. Never contains the current node.
    pub(crate) history: Vec<StoryNode>,
    pub(crate) current_node: StoryNode,
    pub(crate) max_nodes: usize,
    pub(crate) mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) story_sequence: Option<StorySequence>,
}

impl GameState {
    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn character(&self, id: &CharacterId) -> Option<&Character> {
        self.characters.iter().find(|c| &c.id == id)
    }

    pub fn history(&self) -> &[StoryNode] {
        &self.history
    }

    pub fn current_node(&self) -> &StoryNode {
        &self.current_node
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn story_sequence(&self) -> Option<&StorySequence> {
        self.story_sequence.as_ref()
    }

    /// The character narrating the current node, if any.
    pub fn current_character(&self) -> Option<&Character> {
        self.current_node
            .perspective
            .character_id()
            .and_then(|id| self.character(id))
    }

    /// Progress as (visited nodes, node budget).
    pub fn progress(&self) -> (usize, usize) {
        (self.history.len(), self.max_nodes)
    }

    pub fn is_terminal(&self) -> bool {
        self.current_node.is_terminal()
    }

    /// Index of the segment the current node stands for, if any.
    ///
    /// In reader mode the current node is the segment itself; in
    /// interactive mode it is found through the rewrite link.
    pub fn sequence_position(&self) -> Option<usize> {
        let sequence = self.story_sequence.as_ref()?;
        match self.mode {
            Mode::Reader => sequence.position_of(&self.current_node.id),
            Mode::Interactive => sequence
                .reader_version_of(&self.current_node.id)
                .and_then(|segment| sequence.position_of(&segment.id)),
        }
    }

    /// Whether a mode switch can be attempted at all.
    pub fn can_toggle_mode(&self) -> bool {
        self.story_sequence.is_some()
    }

    /// Attach a resolved image to the current node.
    ///
    /// A no-op returning false if the current node is no longer `node_id`.
    pub fn attach_image(&mut self, node_id: &NodeId, url: impl Into<String>) -> bool {
        if &self.current_node.id != node_id {
            return false;
        }
        let url = url.into();
        if let Some(sequence) = self.story_sequence.as_mut() {
            sequence.attach_image(node_id, &url);
        }
        self.current_node.image_url = Some(url);
        true
    }

    /// Check the structural invariants, e.g. after loading from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.history.iter().any(|n| n.id == self.current_node.id) {
            return Err(format!(
                "history contains the current node {}",
                self.current_node.id
            ));
        }

        for node in self.history.iter().chain(std::iter::once(&self.current_node)) {
            if let Perspective::Character(id) = &node.perspective {
                if self.character(id).is_none() {
                    return Err(format!("node {} is narrated by unknown character {id}", node.id));
                }
            }
        }

        match (&self.mode, &self.story_sequence) {
            (Mode::Reader, None) => return Err("reader mode without a story sequence".into()),
            (Mode::Reader, Some(sequence)) => {
                if sequence.position_of(&self.current_node.id).is_none() {
                    return Err(format!(
                        "reader mode current node {} is not a segment",
                        self.current_node.id
                    ));
                }
            }
            (Mode::Interactive, _) => {
                if self.current_node.perspective == Perspective::Reader {
                    return Err("interactive node narrated by the reader".into());
                }
            }
        }

        if let Some(sequence) = &self.story_sequence {
            sequence.validate()?;
        }

        Ok(())
    }
}
