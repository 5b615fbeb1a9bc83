//! Storyloom: interactive fiction from any source text.
//!
//! Turns a story into either a chaptered reading (reader mode) or a
//! branching first-person adventure (interactive mode), switching freely
//! between the two.
//!
//! ```bash
//! storyloom set-key <ARK_API_KEY>
//! storyloom new --source story.txt --mode reader --segments 4
//! storyloom resume
//! ```
//!
//! Logs go to stderr and are controlled with `RUST_LOG`.

mod headless;
mod view;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use storyloom_core::{ImageStyle, LocalStore, Mode, SessionConfig, StorySession};

#[derive(Parser, Debug)]
#[command(
    name = "storyloom",
    about = "Read a story, or live it from the inside",
    version,
    propagate_version = true
)]
struct Cli {
    /// Directory holding the saved story and API key
    #[arg(long, global = true, default_value = ".storyloom")]
    data_dir: PathBuf,

    /// API key (overrides the saved key)
    #[arg(long, global = true, env = "ARK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API root URL
    #[arg(long, global = true, env = "ARK_BASE_URL")]
    base_url: Option<String>,

    /// Chat model name
    #[arg(long, global = true, env = "ARK_CHAT_MODEL")]
    chat_model: Option<String>,

    /// Image model name
    #[arg(long, global = true, env = "ARK_IMAGE_MODEL")]
    image_model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new story, replacing any saved one
    New {
        /// Source text file, or `-` to read it from stdin
        #[arg(short, long)]
        source: String,

        /// interactive or reader
        #[arg(short, long, default_value = "interactive")]
        mode: Mode,

        /// Number of characters to extract
        #[arg(long, default_value_t = 3)]
        characters: usize,

        /// Scene budget for interactive stories
        #[arg(long, default_value_t = 10)]
        max_nodes: usize,

        /// Number of chapters for reader mode
        #[arg(long, default_value_t = 5)]
        segments: usize,

        /// Illustration style (e.g. cinematic, anime, watercolor)
        #[arg(long, default_value = "cinematic")]
        style: ImageStyle,

        /// Language of the story text
        #[arg(long)]
        language: Option<String>,
    },

    /// Continue the saved story
    Resume,

    /// Discard the saved story
    Reset,

    /// Save an API key for later sessions
    SetKey {
        /// The key to save
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let store = LocalStore::new(&cli.data_dir);
    tracing::debug!(data_dir = %cli.data_dir.display(), "using local store");

    match cli.command {
        Commands::New {
            ref source,
            mode,
            characters,
            max_nodes,
            segments,
            style,
            ref language,
        } => {
            let source_text = read_source(source)?;

            let mut config = session_config(&cli)
                .with_mode(mode)
                .with_character_count(characters)
                .with_max_nodes(max_nodes)
                .with_segment_count(segments)
                .with_image_style(style);
            if let Some(language) = language {
                config = config.with_language(language.clone());
            }

            let session = StorySession::open(config, store).await?;
            headless::run_new(session, &source_text).await?;
        }
        Commands::Resume => {
            let session = StorySession::open(session_config(&cli), store).await?;
            headless::run_resume(session).await?;
        }
        Commands::Reset => {
            store.clear_state().await?;
            println!("Saved story discarded.");
        }
        Commands::SetKey { ref key } => {
            if key.trim().is_empty() {
                bail!("the API key is empty");
            }
            store.save_api_key(key).await?;
            println!("API key saved to {}.", cli.data_dir.display());
        }
    }

    Ok(())
}

fn session_config(cli: &Cli) -> SessionConfig {
    let mut config = SessionConfig::new();
    if let Some(key) = &cli.api_key {
        config = config.with_api_key(key.clone());
    }
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(model) = &cli.chat_model {
        config = config.with_chat_model(model.clone());
    }
    if let Some(model) = &cli.image_model {
        config = config.with_image_model(model.clone());
    }
    config
}

fn read_source(source: &str) -> Result<String> {
    let text = if source == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read source text from stdin")?;
        text
    } else {
        std::fs::read_to_string(source)
            .with_context(|| format!("failed to read source text from {source}"))?
    };

    if text.trim().is_empty() {
        bail!("the source text is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_new() {
        let cli = Cli::try_parse_from([
            "storyloom",
            "--data-dir",
            "/tmp/story",
            "new",
            "--source",
            "story.txt",
            "--mode",
            "reader",
            "--segments",
            "4",
            "--style",
            "watercolor",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, PathBuf::from("/tmp/story"));
        match cli.command {
            Commands::New {
                source,
                mode,
                segments,
                style,
                characters,
                ..
            } => {
                assert_eq!(source, "story.txt");
                assert_eq!(mode, Mode::Reader);
                assert_eq!(segments, 4);
                assert_eq!(style, ImageStyle::Watercolor);
                assert_eq!(characters, 3);
            }
            other => panic!("expected New, got {other:?}"),
        }
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["storyloom", "new", "-s", "x.txt", "-m", "novel"]).is_err());
    }

    #[test]
    fn test_cli_set_key() {
        let cli = Cli::try_parse_from(["storyloom", "set-key", "sk-123"]).unwrap();
        assert!(matches!(cli.command, Commands::SetKey { key } if key == "sk-123"));
    }

    #[test]
    fn test_read_source_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("story.txt");
        std::fs::write(&path, "Once upon a time.").unwrap();
        assert_eq!(read_source(path.to_str().unwrap()).unwrap(), "Once upon a time.");

        std::fs::write(&path, "  \n").unwrap();
        assert!(read_source(path.to_str().unwrap()).is_err());
    }
}
