use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tasktree::output::View;

#[derive(Parser)]
#[command(name = "tasktree", about = "Hierarchical task manager")]
pub struct Cli {
    /// Path to the SQLite database [default: ~/.tasktree/tasks.db]
    #[arg(long, env = "TASKTREE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Path to the config file [default: ~/.tasktree/config.toml]
    #[arg(long, env = "TASKTREE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log at info level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create database and tables (idempotent)
    Init,

    /// Add a task
    Add {
        title: String,
        /// Parent task id
        #[arg(short, long)]
        parent: Option<i64>,
        /// Position among siblings [default: last]
        #[arg(long)]
        position: Option<usize>,
        #[arg(short, long, default_value = "")]
        desc: String,
        #[command(flatten)]
        attrs: AttributeArgs,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
    },

    /// Move a task (and its subtree); omit --parent to move to root level
    Mv {
        id: i64,
        #[arg(short, long)]
        parent: Option<i64>,
        /// Position among the new siblings [default: last]
        #[arg(long)]
        position: Option<usize>,
    },

    /// Remove a task
    Rm {
        id: i64,
        /// Remove the whole subtree
        #[arg(long, conflicts_with = "keep_children")]
        cascade: bool,
        /// Promote children into the removed task's place
        #[arg(long)]
        keep_children: bool,
    },

    /// Edit task fields
    Edit {
        id: i64,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        desc: Option<String>,
        #[command(flatten)]
        attrs: AttributeArgs,
        #[arg(long, conflicts_with = "category")]
        no_category: bool,
        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,
        #[arg(long, conflicts_with = "due")]
        no_due: bool,
    },

    /// Show task details
    Show {
        id: i64,
        #[arg(long)]
        json: bool,
    },

    /// List tasks
    List {
        /// Display as tree
        #[arg(long)]
        tree: bool,
        /// Root task for subtree
        #[arg(long)]
        root: Option<i64>,
        /// Only tasks in this view: current, backlog or completed
        #[arg(long)]
        view: Option<View>,
        /// Only tasks with this status
        #[arg(short, long)]
        status: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Manage categories
    Category {
        #[command(subcommand)]
        action: AttributeAction,
    },

    /// Manage priorities
    Priority {
        #[command(subcommand)]
        action: AttributeAction,
    },

    /// Manage statuses
    Status {
        #[command(subcommand)]
        action: AttributeAction,
    },

    /// Manage a task's links
    Link {
        #[command(subcommand)]
        action: LinkAction,
    },

    /// Export all tasks as CSV
    Export {
        /// Output file [default: stdout]
        path: Option<PathBuf>,
    },

    /// Import tasks from CSV (all or nothing)
    Import { path: PathBuf },

    /// Write an example CSV file
    Template {
        /// Output file [default: stdout]
        path: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct AttributeArgs {
    /// Category name
    #[arg(short, long)]
    pub category: Option<String>,
    /// Priority name
    #[arg(long)]
    pub priority: Option<String>,
    /// Status name
    #[arg(short, long)]
    pub status: Option<String>,
}

#[derive(Subcommand)]
pub enum AttributeAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Add {
        name: String,
        #[arg(long, default_value = "#AAAAAA")]
        color: String,
    },
    Rename {
        name: String,
        new_name: String,
    },
    Color {
        name: String,
        color: String,
    },
    /// Change display order (0-based)
    Move {
        name: String,
        position: usize,
    },
    /// Make entering this status stamp the completion time (statuses only)
    Completes {
        name: String,
        #[arg(long)]
        off: bool,
    },
    /// Delete; tasks using it are re-pointed
    Rm { name: String },
}

#[derive(Subcommand)]
pub enum LinkAction {
    Add {
        task: i64,
        url: String,
        #[arg(short, long)]
        label: Option<String>,
    },
    List {
        task: i64,
    },
    Rm {
        id: i64,
    },
}
