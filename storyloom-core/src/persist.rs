//! Local persistence for the running story and the API key.
//!
//! The store is a directory holding two files under fixed names: the
//! auto-saved game state, wrapped in a versioned envelope, and the API key
//! as plain text.

use crate::model::GameState;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Saved story is inconsistent: {0}")]
    InvalidState(String),
}

/// Key of the auto-saved game state.
pub const STATE_KEY: &str = "story_auto_state";

/// Key of the saved API key.
pub const API_KEY_KEY: &str = "story_auto_apikey";

/// Current save format version.
const SAVE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    version: u32,
    /// Seconds since the Unix epoch.
    saved_at: String,
    state: GameState,
}

/// Directory-backed store for the auto-saved story and API key.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_KEY}.json"))
    }

    fn api_key_path(&self) -> PathBuf {
        self.dir.join(API_KEY_KEY)
    }

    /// Load the saved story, or `None` if nothing was saved.
    pub async fn load_state(&self) -> Result<Option<GameState>, PersistError> {
        let Some(content) = read_optional(&self.state_path()).await? else {
            return Ok(None);
        };

        #[derive(Deserialize)]
        struct Version {
            version: u32,
        }

        // Check the version before committing to the full shape.
        let Version { version } = serde_json::from_str(&content)?;
        if version != SAVE_VERSION {
            return Err(PersistError::VersionMismatch {
                expected: SAVE_VERSION,
                found: version,
            });
        }

        let saved: SavedState = serde_json::from_str(&content)?;
        saved.state.validate().map_err(PersistError::InvalidState)?;

        tracing::debug!(saved_at = %saved.saved_at, "loaded saved story");
        Ok(Some(saved.state))
    }

    /// Save the story, replacing any previous save.
    pub async fn save_state(&self, state: &GameState) -> Result<(), PersistError> {
        let saved = SavedState {
            version: SAVE_VERSION,
            saved_at: timestamp(),
            state: state.clone(),
        };
        let content = serde_json::to_string_pretty(&saved)?;

        fs::create_dir_all(&self.dir).await?;
        fs::write(self.state_path(), content).await?;
        Ok(())
    }

    /// Remove the saved story. Succeeds if there was none.
    pub async fn clear_state(&self) -> Result<(), PersistError> {
        match fs::remove_file(self.state_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Load the saved API key. A blank file counts as no key.
    pub async fn load_api_key(&self) -> Result<Option<String>, PersistError> {
        Ok(read_optional(&self.api_key_path())
            .await?
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty()))
    }

    pub async fn save_api_key(&self, key: &str) -> Result<(), PersistError> {
        fs::create_dir_all(&self.dir).await?;
        fs::write(self.api_key_path(), key.trim()).await?;
        Ok(())
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, PersistError> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::reader_state;
    use crate::model::NodeId;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_state_is_none() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        assert!(store.load_state().await.unwrap().is_none());
        assert!(store.load_api_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_save_and_load() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        // A nested directory that does not exist yet.
        let store = LocalStore::new(temp_dir.path().join("data"));

        let mut state = reader_state();
        state.attach_image(&NodeId::new("s0"), "https://img/0.png");
        store.save_state(&state).await.expect("Save should succeed");

        let loaded = store
            .load_state()
            .await
            .expect("Load should succeed")
            .expect("State should exist");
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_clear_state() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        store.clear_state().await.expect("Clearing nothing should succeed");
        store.save_state(&reader_state()).await.unwrap();
        store.clear_state().await.unwrap();

        assert!(store.load_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());
        tokio::fs::write(
            temp_dir.path().join("story_auto_state.json"),
            r#"{"version": 99, "saved_at": "0", "state": {}}"#,
        )
        .await
        .unwrap();

        match store.load_state().await {
            Err(PersistError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, SAVE_VERSION);
                assert_eq!(found, 99);
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inconsistent_state_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        let mut state = reader_state();
        state.history.push(state.current_node.clone());
        store.save_state(&state).await.unwrap();

        assert!(matches!(
            store.load_state().await,
            Err(PersistError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_state_is_json_error() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());
        tokio::fs::write(temp_dir.path().join("story_auto_state.json"), "{not json")
            .await
            .unwrap();

        assert!(matches!(store.load_state().await, Err(PersistError::Json(_))));
    }

    #[tokio::test]
    async fn test_api_key_round_trip() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStore::new(temp_dir.path());

        store.save_api_key("  sk-test-123\n").await.unwrap();
        assert_eq!(
            store.load_api_key().await.unwrap().as_deref(),
            Some("sk-test-123")
        );

        store.save_api_key("").await.unwrap();
        assert!(store.load_api_key().await.unwrap().is_none());
    }
}
