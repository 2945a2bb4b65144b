//! Application orchestration and command routing.
//!
//! Handles command-line argument parsing and delegates to appropriate command handlers.

use crate::commands::{self, practice::PracticeArgs, ContextArgs};
use crate::logging;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;
use std::process;

/// Read a story sentence aloud and get pronunciation feedback in your terminal
#[derive(Parser)]
#[command(name = "storyvoice")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(long_about = "Read a story sentence aloud and get pronunciation feedback in your terminal.\n\nDEFAULT COMMAND:\n    If no command is specified, 'practice' is used by default.\n    Practice options (--text, --script-id, ...) can be used without explicitly saying 'practice'.\n\nEXAMPLES:\n    # Practice a sentence\n    $ storyvoice --text \"The fox jumped over the fence.\" --content-id 7 --script-id 3\n\n    # Analyze an existing recording\n    $ storyvoice analyze reading.webm --content-id 7 --script-id 3 --lang en-US\n\n    # Show the latest feedback stored on the server\n    $ storyvoice latest --user-id 1 --content-id 7 --script-id 3\n\n    # Show your local feedback history\n    $ storyvoice history")]
#[command(
    after_help = "CONFIGURATION:\n    Config file:        ~/.config/storyvoice/storyvoice.toml\n    History:            ~/.local/share/storyvoice/feedback_history.db\n    Logs:               ~/.local/state/storyvoice/storyvoice.log.*"
)]
struct Cli {
    #[command(flatten)]
    practice: PracticeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Practice reading a sentence (default)
    ///
    /// Press Enter or Space to start and stop recording, r to record again,
    /// Escape/q to quit. Recording stops by itself at the configured ceiling.
    #[command(visible_alias = "p")]
    Practice(PracticeArgs),

    /// Analyze a pre-recorded webm or wav file
    #[command(visible_alias = "a")]
    Analyze {
        /// Path to the recording
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[command(flatten)]
        context: ContextArgs,

        /// Sentence the recording reads
        #[arg(long, value_name = "SENTENCE")]
        text: Option<String>,
    },

    /// Show the latest feedback stored on the server for a sentence
    Latest {
        #[command(flatten)]
        context: ContextArgs,
    },

    /// Create text-based feedback for a recording already on the server
    Feedback {
        /// User the feedback belongs to
        #[arg(long, value_name = "ID")]
        user_id: Option<i64>,

        /// Sentence that was read
        #[arg(long, value_name = "SENTENCE")]
        sentence: String,

        /// Server-side path of the recording
        #[arg(long, value_name = "PATH")]
        recorded_file: String,
    },

    /// Show the local feedback history
    #[command(visible_alias = "h")]
    History {
        /// Only entries for this user
        #[arg(long, value_name = "ID")]
        user: Option<i64>,

        /// Only entries for this content
        #[arg(long, value_name = "ID")]
        content: Option<i64>,

        /// Maximum number of entries to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Open configuration file in your preferred editor
    ///
    /// Uses $EDITOR environment variable or falls back to nano/vi.
    #[command(visible_alias = "c")]
    Config,

    /// List available audio input devices
    #[command(name = "list-devices")]
    ListDevices,

    /// Show recent log entries from the application
    Logs,

    /// Generate shell completion script
    ///
    /// Examples:
    ///   storyvoice completions bash > storyvoice.bash
    ///   storyvoice completions zsh > _storyvoice
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Runs the main application based on command-line arguments.
///
/// # Exit Codes
/// - 0: Success
/// - 1: General error
/// - 2: Usage error (invalid arguments)
///
/// # Errors
/// - If logging initialization fails
/// - If command execution fails
pub async fn run() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Commands that don't need logging
    match &cli.command {
        Some(Commands::Completions { shell }) => {
            generate(*shell, &mut Cli::command(), "storyvoice", &mut io::stdout());
            return Ok(());
        }
        Some(Commands::ListDevices) => {
            return match commands::handle_list_devices() {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            };
        }
        Some(Commands::Logs) => {
            return match commands::handle_logs() {
                Ok(()) => Ok(()),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            };
        }
        _ => {}
    }

    logging::init_logging()?;

    match cli.command {
        None => commands::handle_practice(cli.practice).await?,
        Some(Commands::Practice(args)) => commands::handle_practice(args).await?,
        Some(Commands::Analyze {
            file,
            context,
            text,
        }) => commands::handle_analyze(file, context, text).await?,
        Some(Commands::Latest { context }) => commands::handle_latest(context).await?,
        Some(Commands::Feedback {
            user_id,
            sentence,
            recorded_file,
        }) => commands::handle_feedback(user_id, sentence, recorded_file).await?,
        Some(Commands::History {
            user,
            content,
            limit,
        }) => commands::handle_history(user, content, limit).await?,
        Some(Commands::Config) => commands::handle_config()?,
        Some(Commands::Completions { .. }) | Some(Commands::ListDevices) | Some(Commands::Logs) => {
            unreachable!("These commands are handled earlier")
        }
    }

    Ok(())
}
