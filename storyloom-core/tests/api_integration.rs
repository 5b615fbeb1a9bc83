//! End-to-end story tests against the real Ark API.
//!
//! These tests require ARK_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p storyloom-core --test api_integration -- --ignored`

use storyloom_core::{Mode, SessionConfig, StoryOption, StorySession};

const SOURCE: &str = "At dawn the fisherman Lin found a paper boat stuck in his net. \
Written on its sail was a name he had not heard since childhood: Wei. \
He rowed upstream to the old mill, where Wei was waiting with a lantern.";

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ARK_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_reader_story_end_to_end() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ARK_API_KEY not set");
        return;
    }

    let config = SessionConfig::new()
        .with_mode(Mode::Reader)
        .with_character_count(2)
        .with_segment_count(2)
        .with_language("English");
    let mut session = StorySession::new(config).await.expect("session should build");

    let first = session.start(SOURCE).await.expect("start should succeed");
    println!("Segment 1: {}", first.content);
    assert!(!first.content.is_empty());

    let state = session.state().expect("story should exist");
    assert_eq!(state.story_sequence().map(|s| s.len()), Some(2));
    assert!(!state.characters().is_empty());

    let second = session
        .choose(StoryOption::CONTINUE_ID)
        .await
        .expect("advance should succeed");
    println!("Segment 2: {}", second.content);
    assert!(second.is_terminal());
}

#[tokio::test]
#[ignore]
async fn test_interactive_story_end_to_end() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ARK_API_KEY not set");
        return;
    }

    let config = SessionConfig::new()
        .with_character_count(2)
        .with_max_nodes(3)
        .with_language("English");
    let mut session = StorySession::new(config).await.expect("session should build");

    let opening = session.start(SOURCE).await.expect("start should succeed");
    println!("Opening: {}", opening.content);
    assert!(!opening.options.is_empty());

    let option = opening.options[0].id.clone();
    let next = session.choose(&option).await.expect("advance should succeed");
    println!("Next: {}", next.content);

    assert_eq!(session.state().map(|s| s.history().len()), Some(1));
}
