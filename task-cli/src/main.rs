use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use task_cli::{CommandHandler, Config, JsonStore, TaskError};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Track tasks in a local JSON file
#[derive(Parser, Debug)]
#[command(version)]
struct Cli {
    /// Task file to use instead of the configured one
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Log what the tool is doing to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        #[arg(
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        description: Vec<String>,
    },
    /// Replace a task's description
    Update {
        #[arg(allow_negative_numbers = true)]
        id: String,
        #[arg(
            required = true,
            num_args = 1..,
            trailing_var_arg = true,
            allow_hyphen_values = true
        )]
        description: Vec<String>,
    },
    /// Delete a task
    Delete {
        #[arg(allow_negative_numbers = true)]
        id: String,
    },
    /// Mark a task as in progress
    MarkInProgress {
        #[arg(allow_negative_numbers = true)]
        id: String,
    },
    /// Mark a task as done
    MarkDone {
        #[arg(allow_negative_numbers = true)]
        id: String,
    },
    /// List tasks, optionally only those with the given status (todo, in-progress, done)
    List { status: Option<String> },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    // Only the first call in a process installs a subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<(), TaskError> {
    let config = Config::from_env()?.with_file_override(cli.file);
    debug!(file = %config.file.display(), "using task file");

    let store = JsonStore::new(config.file);
    let mut handler = CommandHandler::new(&store, io::stdout().lock());

    match cli.command {
        Commands::Add { description } => handler.add(&description.join(" ")).map(|_| ()),
        Commands::Update { id, description } => handler.update(&id, &description.join(" ")),
        Commands::Delete { id } => handler.delete(&id),
        Commands::MarkInProgress { id } => handler.mark_in_progress(&id),
        Commands::MarkDone { id } => handler.mark_done(&id),
        Commands::List { status } => handler.list(status.as_deref()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
