//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - session: create/edit/list/show sessions
//! - item: add, list, toggle todos, and move work items through their lifecycle
//! - agent: run the agent loop over a session

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Juggle - work items, sessions, and an autonomous agent loop
#[derive(Parser, Debug)]
#[command(name = "juggle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    pub project: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Session management
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },

    /// Work item management
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },

    /// Run the agent over a session
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommands {
    /// Create a session
    Create {
        /// Session id, also the tag that links items to it
        id: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Background handed to the agent
        #[arg(long)]
        context: Option<String>,

        /// Session acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,

        /// Preferred model size (small, medium, large)
        #[arg(long)]
        model: Option<String>,
    },

    /// Change a session's description, context, criteria or model
    Edit {
        id: String,

        #[arg(short, long)]
        description: Option<String>,

        /// Replace the background handed to the agent
        #[arg(long)]
        context: Option<String>,

        /// Add an acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,

        /// Preferred model size (small, medium, large)
        #[arg(long)]
        model: Option<String>,
    },

    /// List sessions with item counts
    List,

    /// Show a session and its items
    Show {
        id: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ItemCommands {
    /// Add a work item
    Add {
        title: String,

        /// low, medium, high or urgent
        #[arg(short, long, default_value = "medium")]
        priority: String,

        /// Session tag (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Todo entry (repeatable)
        #[arg(long = "todo")]
        todos: Vec<String>,

        /// Acceptance criterion (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,
    },

    /// List work items
    List {
        /// Only items in this session
        #[arg(short, long)]
        session: Option<String>,

        /// Only items in this state (pending, in_progress, blocked, complete)
        #[arg(long)]
        state: Option<String>,
    },

    /// Toggle a todo of an item done/undone
    Todo {
        id: String,

        /// Todo number, starting at 1
        number: usize,
    },

    /// Mark an item in progress
    Start {
        id: String,
    },

    /// Mark an item blocked
    Block {
        id: String,
        reason: String,
    },

    /// Return a blocked item to in progress
    Unblock {
        id: String,
    },

    /// Mark an item complete
    Complete {
        id: String,
        note: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum AgentCommands {
    /// Loop the agent over a session until its items settle
    Run(AgentRunArgs),
}

#[derive(Args, Debug, Clone)]
pub struct AgentRunArgs {
    /// Session to work through
    pub session: String,

    /// Maximum iterations
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Let the agent edit without asking for permission
    #[arg(long)]
    pub trust: bool,

    /// Ask the agent to explain its choices
    #[arg(long)]
    pub debug: bool,

    /// Seconds between iterations
    #[arg(long)]
    pub delay: Option<u64>,

    /// Per-iteration timeout in minutes (0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Rate-limit wait budget in minutes (0 is unbounded)
    #[arg(long)]
    pub max_wait: Option<u64>,

    /// Model alias, or small/medium/large
    #[arg(long)]
    pub model: Option<String>,
}
