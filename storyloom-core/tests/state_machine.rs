//! Scripted story scenarios run against the mock generator.

use storyloom_core::testing::{
    assert_mode, assert_narrator, assert_progress, assert_terminal, characters_reply,
    ending_reply, scene_reply, segments_reply, TestHarness,
};
use storyloom_core::{Mode, Notice, SessionError, StoryConfig, StoryError, StoryOption};

const SOURCE: &str = "The river rose in the night. Lin and Wei carried the lanterns uphill.";

fn reader_harness() -> TestHarness {
    let mut harness = TestHarness::with_config(
        StoryConfig::default()
            .with_mode(Mode::Reader)
            .with_segment_count(3),
    );
    harness
        .expect_reply(characters_reply(&["Lin", "Wei"]))
        .expect_reply(segments_reply(&["The river rose.", "They climbed.", "Dawn came."]));
    harness
}

fn notice_of(err: SessionError) -> Notice {
    match err {
        SessionError::Story(StoryError::Notice(notice)) => notice,
        other => panic!("expected a notice, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reader_start_builds_sequence() {
    let mut harness = reader_harness();
    let first = harness.start(SOURCE).await.unwrap();

    let state = harness.state().unwrap();
    let sequence = state.story_sequence().unwrap();

    assert_eq!(sequence.len(), 3);
    assert_eq!(state.max_nodes(), 3);
    assert!(state.history().is_empty());
    assert_eq!(first.id, sequence.segments()[0].id);
    assert_mode(&harness, Mode::Reader);

    for segment in &sequence.segments()[..2] {
        assert_eq!(segment.options, vec![StoryOption::continue_reading()]);
    }
    assert!(sequence.segments()[2].options.is_empty());

    // Only the first segment is illustrated up front.
    assert!(first.image_url.is_some());
    assert!(sequence.segments()[1].image_url.is_none());
    assert!(first.education.is_some());
    assert_eq!(state.characters().len(), 2);
}

#[tokio::test]
async fn test_reader_walks_to_the_end() {
    let mut harness = reader_harness();
    harness.start(SOURCE).await.unwrap();

    harness.choose(StoryOption::CONTINUE_ID).await.unwrap();
    let last = harness.choose(StoryOption::CONTINUE_ID).await.unwrap();
    assert_eq!(last.content, "Dawn came.");
    assert_terminal(&harness);
    assert_progress(&harness, 2, 3);

    let before = harness.state().cloned();
    let err = harness.choose(StoryOption::CONTINUE_ID).await.unwrap_err();
    assert_eq!(notice_of(err), Notice::StoryComplete);
    assert_eq!(harness.state().cloned(), before);

    // Character extraction and the split only.
    assert_eq!(harness.completions(), 2);
}

#[tokio::test]
async fn test_sequence_layout_never_changes() {
    let mut harness = reader_harness();
    harness.start(SOURCE).await.unwrap();
    let ids = |h: &TestHarness| -> Vec<_> {
        h.state()
            .unwrap()
            .story_sequence()
            .unwrap()
            .segments()
            .iter()
            .map(|s| s.id.clone())
            .collect()
    };
    let original = ids(&harness);

    harness.choose(StoryOption::CONTINUE_ID).await.unwrap();
    harness.expect_reply(scene_reply("Lin climbs, breathless.", 2));
    harness.toggle_mode().await.unwrap();
    harness.expect_reply(scene_reply("Lin sees the dawn.", 2));
    harness.choose("opt_1").await.unwrap();

    assert_eq!(ids(&harness), original);
}

#[tokio::test]
async fn test_toggle_round_trip_restores_segment() {
    let mut harness = reader_harness();
    let segment = harness.start(SOURCE).await.unwrap();

    harness.expect_reply(scene_reply("I, Lin, watched the river rise.", 2));
    let rewrite = harness.toggle_mode().await.unwrap();
    assert_mode(&harness, Mode::Interactive);
    assert_narrator(&harness, "char_1");
    assert_eq!(rewrite.summary, segment.summary);
    assert!(harness.state().unwrap().history().is_empty());

    let restored = harness.toggle_mode().await.unwrap();
    assert_mode(&harness, Mode::Reader);
    assert_eq!(restored.id, segment.id);
    assert_eq!(restored.content, segment.content);
    assert_eq!(harness.completions(), 3);
}

#[tokio::test]
async fn test_interactive_advance_follows_sequence() {
    let mut harness = reader_harness();
    harness.start(SOURCE).await.unwrap();

    harness
        .expect_reply(scene_reply("I watched the river rise.", 2))
        .expect_reply(scene_reply("I climbed with Wei.", 2));
    harness.toggle_mode().await.unwrap();
    let next = harness.choose("opt_2").await.unwrap();

    assert_eq!(next.content, "I climbed with Wei.");
    assert_progress(&harness, 1, 3);
    assert!(harness.last_prompt().unwrap().contains("They climbed."));

    let segment = harness.toggle_mode().await.unwrap();
    assert_eq!(segment.content, "They climbed.");
}

#[tokio::test]
async fn test_switch_keeps_sequence_link() {
    let mut harness = reader_harness();
    harness.start(SOURCE).await.unwrap();

    harness
        .expect_reply(scene_reply("Lin: the water is rising.", 2))
        .expect_reply(scene_reply("Wei: Lin looks worried.", 2));
    harness.toggle_mode().await.unwrap();
    harness.switch_to("char_2").await.unwrap();
    assert_narrator(&harness, "char_2");
    assert!(harness.state().unwrap().history().is_empty());

    let segment = harness.toggle_mode().await.unwrap();
    assert_eq!(segment.content, "The river rose.");

    // The cached rewrite is now Wei's, and is reused without a call.
    let calls = harness.completions();
    harness.toggle_mode().await.unwrap();
    assert_narrator(&harness, "char_2");
    assert_eq!(harness.completions(), calls);
}

#[tokio::test]
async fn test_switch_to_current_character_is_identity() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin", "Wei"]))
        .expect_reply(scene_reply("Lin wakes.", 2));
    harness.start(SOURCE).await.unwrap();
    let before = harness.state().cloned();

    harness.switch_to("char_1").await.unwrap();

    assert_eq!(harness.state().cloned(), before);
    assert_eq!(harness.completions(), 2);
}

#[tokio::test]
async fn test_interactive_story_reaches_its_ending() {
    let mut harness = TestHarness::with_config(StoryConfig::default().with_max_nodes(2));
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply(scene_reply("Lin wakes.", 2))
        .expect_reply(scene_reply("Lin walks.", 2))
        .expect_reply(ending_reply("Lin rests."));

    harness.start(SOURCE).await.unwrap();
    let opening = harness.state().unwrap().current_node().clone();

    harness.choose("opt_1").await.unwrap();
    let state = harness.state().unwrap();
    assert_eq!(state.history().last(), Some(&opening));
    assert!(state.story_sequence().is_none());

    harness.choose("opt_2").await.unwrap();
    assert_terminal(&harness);
    assert_progress(&harness, 2, 2);
    assert!(harness.last_prompt().unwrap().contains("This is the ending of the story"));

    let err = harness.choose("opt_1").await.unwrap_err();
    assert_eq!(notice_of(err), Notice::StoryComplete);
}

#[tokio::test]
async fn test_interactive_story_cannot_enter_reader_mode() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply(scene_reply("Lin wakes.", 2));
    harness.start(SOURCE).await.unwrap();

    let err = harness.toggle_mode().await.unwrap_err();
    assert_eq!(notice_of(err), Notice::NoSequence);
    assert_mode(&harness, Mode::Interactive);
}

#[tokio::test]
async fn test_malformed_reply_changes_nothing() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply(scene_reply("Lin wakes.", 2))
        .expect_reply("I'm sorry, here is the story: Lin went home.");
    harness.start(SOURCE).await.unwrap();
    let before = harness.state().cloned();

    let err = harness.choose("opt_1").await.unwrap_err();

    assert!(err.to_string().contains("JSON"));
    assert!(!err.is_notice());
    assert_eq!(harness.state().cloned(), before);
}

#[tokio::test]
async fn test_truncated_reply_is_reported() {
    let mut harness = reader_harness();
    harness.start(SOURCE).await.unwrap();

    harness.expect_reply(r#"{"summary": "x", "content": "I watched the river ri"#);
    let err = harness.toggle_mode().await.unwrap_err();

    assert!(matches!(err, SessionError::Story(StoryError::Truncated)));
    assert!(err.to_string().contains("JSON"));
    assert_mode(&harness, Mode::Reader);
}

#[tokio::test]
async fn test_upstream_failure_changes_nothing() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply(scene_reply("Lin wakes.", 2))
        .expect_failure(StoryError::Upstream {
            status: 401,
            body: "{\"error\": \"invalid key\"}".into(),
        });
    harness.start(SOURCE).await.unwrap();
    let before = harness.state().cloned();

    let err = harness.choose("opt_1").await.unwrap_err();

    assert!(err.to_string().contains("401"));
    assert_eq!(harness.state().cloned(), before);
}

#[tokio::test]
async fn test_failed_start_leaves_no_story() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply("not json");

    assert!(harness.start(SOURCE).await.is_err());
    assert!(harness.state().is_none());
}

#[tokio::test]
async fn test_failed_image_keeps_text() {
    let mut harness = TestHarness::new();
    harness
        .expect_reply(characters_reply(&["Lin"]))
        .expect_reply(scene_reply("Lin wakes.", 2))
        .expect_image(None);

    let opening = harness.start(SOURCE).await.unwrap();

    assert_eq!(opening.content, "Lin wakes.");
    assert!(opening.image_url.is_none());
    assert!(opening.image_prompt.is_some());
}
