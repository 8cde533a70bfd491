use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative infrastructure provisioning", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Desired-state document (TOML or JSON)
    #[arg(short, long, global = true, env = "KEEL_FILE", default_value = "keel.toml")]
    pub file: PathBuf,

    /// Overlay documents applied in order (override [vars] and [kinds])
    #[arg(short = 'o', long = "overlay", global = true)]
    pub overlays: Vec<PathBuf>,

    /// State directory for this stack (default: <state dir>/<stack name>)
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Parse the document and check the resource graph
    Validate,

    /// Print resources in dependency order
    Graph,

    /// Show what apply would change
    Plan {
        /// Print the change set as JSON
        #[arg(long)]
        json: bool,
    },

    /// Converge infrastructure to the document
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(ApplyArgs),

    /// Compare recorded state with live infrastructure
    Drift {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print stack outputs resolved against state
    Output {
        /// Only print this output
        name: Option<String>,

        /// Print outputs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and repair the state store
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone, Default)]
pub struct ApplyArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum parallel provider operations
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Per-operation timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Attempts per operation before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Stop starting new changes after the first failure
    #[arg(long)]
    pub halt: bool,
}

#[derive(Subcommand)]
pub enum StateCommand {
    /// Show snapshot metadata and lock status
    Show,

    /// List recorded resources
    List,

    /// Remove the state lock
    Unlock {
        /// Remove the lock even if its holder may still be running
        #[arg(long)]
        force: bool,
    },
}
