//! Line-oriented front end.
//!
//! Protocol:
//! - A number picks the matching option of the current scene
//! - Lines starting with `#` are commands (see `#help`)
//! - `[PROCESSING]` is printed while a generation call is outstanding
//!
//! Input is read one line at a time and each action completes before the
//! next line is read, so two story changes never overlap.

use crate::view;
use std::io::{self, BufRead, Write};
use storyloom_core::{Action, Generator, PendingImage, SessionError, StorySession};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// 1-based option number.
    Pick(usize),
    Switch(String),
    Mode,
    Status,
    History,
    Cast,
    Learn,
    Reset,
    Help,
    Quit,
    Unknown(String),
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(command) = line.strip_prefix('#') {
        let mut parts = command.split_whitespace();
        let input = match parts.next() {
            Some("switch") => match parts.next() {
                Some(target) => Input::Switch(target.to_string()),
                None => Input::Unknown("Usage: #switch <number|id>".to_string()),
            },
            Some("mode") => Input::Mode,
            Some("status") => Input::Status,
            Some("history") => Input::History,
            Some("cast") => Input::Cast,
            Some("learn") => Input::Learn,
            Some("reset") => Input::Reset,
            Some("help") => Input::Help,
            Some("quit") | Some("exit") => Input::Quit,
            _ => Input::Unknown("Unknown command. Type #help for help.".to_string()),
        };
        return Some(input);
    }

    Some(match line.parse::<usize>() {
        Ok(n) if n > 0 => Input::Pick(n),
        _ => Input::Unknown("Enter an option number or a #command.".to_string()),
    })
}

/// Start a new story from `source_text` and play it.
///
/// The previous save is only replaced once the new opening is committed.
pub async fn run_new<G: Generator>(
    mut session: StorySession<G>,
    source_text: &str,
) -> Result<(), SessionError> {
    print_processing();
    let pending = session.begin(source_text).await;
    clear_processing();
    let pending = pending?;

    show_scene(&session);
    show_image(&mut session, pending).await;
    run_loop(session).await
}

/// Resume the saved story and play it.
pub async fn run_resume<G: Generator>(mut session: StorySession<G>) -> Result<(), SessionError> {
    if !session.resume().await? {
        println!("No saved story. Start one with `storyloom new --source <file>`.");
        return Ok(());
    }

    show_scene(&session);
    run_loop(session).await
}

async fn run_loop<G: Generator>(mut session: StorySession<G>) -> Result<(), SessionError> {
    println!("Type #help for commands.");
    println!();

    let stdin = io::stdin();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        let Some(input) = parse_input(&line) else {
            continue;
        };
        let Some(state) = session.state() else {
            break;
        };

        match input {
            Input::Pick(n) => match state.current_node().options.get(n - 1) {
                Some(option) => {
                    let action = Action::Choose(option.id.clone());
                    perform(&mut session, action).await;
                }
                None if state.is_terminal() => println!("[THE END]"),
                None => println!("[ERROR] There is no option {n}."),
            },
            Input::Switch(target) => match view::find_character(state, &target) {
                Some(character) => {
                    let action = Action::SwitchPerspective(character.id.clone());
                    perform(&mut session, action).await;
                }
                None => println!("[ERROR] Unknown character: {target}"),
            },
            Input::Mode => perform(&mut session, Action::ToggleMode).await,
            Input::Status => print!("{}", view::render_status(state)),
            Input::History => print!("{}", view::render_history(state)),
            Input::Cast => print!("{}", view::render_cast(state)),
            Input::Learn => print!("{}", view::render_education(state.current_node())),
            Input::Reset => {
                session.reset().await?;
                println!("[RESET] Story discarded. Start a new one with `storyloom new`.");
                break;
            }
            Input::Help => println!("{}", view::HELP),
            Input::Quit => {
                println!("Goodbye!");
                break;
            }
            Input::Unknown(message) => println!("[ERROR] {message}"),
        }
        io::stdout().flush().ok();
    }

    Ok(())
}

/// Run one action: commit its text, print it, then fetch its image.
async fn perform<G: Generator>(session: &mut StorySession<G>, action: Action) {
    print_processing();
    let result = session.dispatch(action).await;
    clear_processing();

    match result {
        Ok(pending) => {
            show_scene(session);
            show_image(session, pending).await;
        }
        Err(e) => println!("{}", view::render_error(&e)),
    }
}

fn show_scene<G: Generator>(session: &StorySession<G>) {
    if let Some(state) = session.state() {
        print!("{}", view::render_scene(state));
        io::stdout().flush().ok();
    }
}

async fn show_image<G: Generator>(
    session: &mut StorySession<G>,
    pending: Option<PendingImage>,
) {
    let Some(pending) = pending else {
        return;
    };

    match session.resolve_image(pending).await {
        Ok(true) => {
            if let Some(url) = session.current_node().and_then(|n| n.image_url.as_deref()) {
                println!("{}", view::render_image(url));
            }
        }
        Ok(false) => {}
        Err(e) => println!("{}", view::render_error(&e)),
    }
}

fn print_processing() {
    print!("[PROCESSING]");
    io::stdout().flush().ok();
}

fn clear_processing() {
    print!("\r            \r");
    io::stdout().flush().ok();
}
