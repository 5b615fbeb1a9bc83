//! Text rendering for the headless front end.
//!
//! Everything here is a pure function from story state to the text that
//! gets printed, so the output can be tested without a terminal.

use std::fmt::Write;
use storyloom_core::{Character, EducationItem, GameState, Perspective, SessionError, StoryNode};

pub const HELP: &str = "\
[HELP]
  <number>            - Pick an option
  #switch <n|id>      - Retell the scene from another character's perspective
  #mode               - Switch between reader and interactive mode
  #status             - Show mode, narrator and progress
  #history            - Show the scenes so far
  #cast               - List the characters
  #learn              - Show study notes for this scene
  #reset              - Discard this story
  #help               - Show this help
  #quit               - Exit (the story is saved automatically)";

/// Name of whoever narrates `node`.
pub fn narrator_name<'a>(state: &'a GameState, node: &StoryNode) -> &'a str {
    match &node.perspective {
        Perspective::Reader => "Narrator",
        Perspective::Character(id) => state
            .character(id)
            .map(|c| c.name.as_str())
            .unwrap_or("Unknown"),
    }
}

/// The current scene with its options, or the end marker.
pub fn render_scene(state: &GameState) -> String {
    let node = state.current_node();
    let (visited, max) = state.progress();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "[SCENE] {} mode | {} | progress {visited}/{max}",
        state.mode(),
        narrator_name(state, node)
    );
    for para in node.content.split("\n\n") {
        let _ = writeln!(out, "{}", para.trim());
    }
    if let Some(url) = &node.image_url {
        let _ = writeln!(out, "{}", render_image(url));
    }
    out.push('\n');

    if node.is_terminal() {
        out.push_str("[THE END]\n");
    } else {
        out.push_str("[OPTIONS]\n");
        for (i, option) in node.options.iter().enumerate() {
            let _ = writeln!(out, "  {}. {}", i + 1, option.label);
        }
    }
    out
}

pub fn render_image(url: &str) -> String {
    format!("[IMAGE] {url}")
}

pub fn render_status(state: &GameState) -> String {
    let node = state.current_node();
    let (visited, max) = state.progress();
    let mut out = String::from("[STATUS]\n");

    let _ = writeln!(out, "  Mode: {}", state.mode());
    let _ = writeln!(out, "  Narrator: {}", narrator_name(state, node));
    let _ = writeln!(out, "  Progress: {visited}/{max}");
    if let Some(sequence) = state.story_sequence() {
        match state.sequence_position() {
            Some(position) => {
                let _ = writeln!(out, "  Chapter: {}/{}", position + 1, sequence.len());
            }
            None => out.push_str("  Chapter: off the original storyline\n"),
        }
    }
    let _ = writeln!(
        out,
        "  Can switch mode: {}",
        if state.can_toggle_mode() { "yes" } else { "no" }
    );
    out
}

pub fn render_history(state: &GameState) -> String {
    if state.history().is_empty() {
        return "[HISTORY] This is the first scene.\n".to_string();
    }

    let mut out = String::from("[HISTORY]\n");
    for (i, node) in state.history().iter().enumerate() {
        let summary = if node.summary.trim().is_empty() {
            &node.content
        } else {
            &node.summary
        };
        let _ = writeln!(out, "  {}. ({}) {}", i + 1, narrator_name(state, node), summary.trim());
    }
    out
}

pub fn render_cast(state: &GameState) -> String {
    let mut out = String::from("[CAST]\n");
    for (i, character) in state.characters().iter().enumerate() {
        let marker = if state.current_node().perspective.is_character(&character.id) {
            " (narrating)"
        } else {
            ""
        };
        let _ = writeln!(out, "  {}. {}{marker} [{}]", i + 1, character.name, character.id);
        if !character.bio.is_empty() {
            let _ = writeln!(out, "     {}", character.bio);
        }
        if !character.traits.is_empty() {
            let _ = writeln!(out, "     Traits: {}", character.traits.join(", "));
        }
    }
    out
}

pub fn render_education(node: &StoryNode) -> String {
    let Some(education) = node.education.as_ref().filter(|e| !e.is_empty()) else {
        return "[LEARN] No study notes for this scene.\n".to_string();
    };

    let mut out = String::from("[LEARN]\n");
    write_items(&mut out, "Knowledge points", &education.knowledge_points);
    write_items(&mut out, "Thinking questions", &education.thinking_questions);
    out
}

fn write_items(out: &mut String, title: &str, items: &[EducationItem]) {
    if items.is_empty() {
        return;
    }
    let _ = writeln!(out, "  {title}:");
    for item in items {
        let _ = writeln!(out, "  - Q: {}", item.question);
        let _ = writeln!(out, "    A: {}", item.answer);
    }
}

/// Notices read as information; everything else is an error.
pub fn render_error(err: &SessionError) -> String {
    if err.is_notice() {
        format!("[NOTICE] {err}")
    } else {
        format!("[ERROR] {err}")
    }
}

/// Resolve `#switch` arguments: a 1-based cast index or a character id.
pub fn find_character<'a>(state: &'a GameState, arg: &str) -> Option<&'a Character> {
    match arg.parse::<usize>() {
        Ok(n) => n.checked_sub(1).and_then(|i| state.characters().get(i)),
        Err(_) => state.characters().iter().find(|c| c.id.as_str() == arg),
    }
}
