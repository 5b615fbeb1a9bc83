//! Interactive fiction engine driven by an LLM.
//!
//! This crate provides:
//! - The story data model (characters, nodes, sequences, game state)
//! - Prompt templates for every generation step
//! - A completion layer that turns model output into typed payloads
//! - The narrative state machine for reader and interactive modes
//! - Local persistence of the game state and API key
//! - `StorySession`, the high-level API tying these together
//! - Mock generator and harness for deterministic tests
//!
//! # Quick Start
//!
//! ```ignore
//! use storyloom_core::{Mode, SessionConfig, StorySession};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new()
//!         .with_mode(Mode::Reader)
//!         .with_segment_count(4);
//!
//!     let mut session = StorySession::new(config).await?;
//!     let node = session.start("Once upon a time...").await?;
//!     println!("{}", node.content);
//!
//!     session.choose("next").await?;
//!     Ok(())
//! }
//! ```

pub mod completion;
pub mod engine;
pub mod model;
pub mod persist;
pub mod prompts;
pub mod session;
pub mod testing;

// Primary public API
pub use completion::{ArkGenerator, Generator};
pub use engine::{Action, Notice, PendingImage, StoryConfig, StoryError, Transition};
pub use model::{
    Character, CharacterId, EducationContent, EducationItem, GameState, Mode, NodeId,
    Perspective, StoryNode, StoryOption, StorySequence,
};
pub use persist::{LocalStore, PersistError};
pub use prompts::ImageStyle;
pub use session::{SessionConfig, SessionError, StorySession};
pub use testing::{MockGenerator, TestHarness};
