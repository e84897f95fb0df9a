use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use promptbox_core::models::{DeviceType, Resolution};

#[derive(Parser)]
#[command(name = "promptbox")]
#[command(about = "Keep a prompt library offline and sync it across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional path to the JSON sync settings file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new prompt
    #[command(alias = "new")]
    Add {
        /// Prompt title
        #[arg(short, long)]
        title: String,
        /// Prompt content (stdin or $EDITOR when omitted)
        content: Vec<String>,
        /// Tag to attach (repeatable)
        #[arg(long = "tag", value_name = "NAME")]
        tags: Vec<String>,
        /// Pin the prompt
        #[arg(long)]
        pinned: bool,
    },
    /// List prompts
    List {
        /// Number of prompts to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter prompts by tag name
        #[arg(long)]
        tag: Option<String>,
        /// Include archived prompts
        #[arg(long)]
        archived: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one prompt
    Show {
        /// Prompt ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing prompt
    Edit {
        /// Prompt ID or unique ID prefix
        id: String,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New content (opens $EDITOR when neither title nor content is given)
        #[arg(short, long)]
        content: Option<String>,
        /// Replace the tag set (repeatable)
        #[arg(long = "tag", value_name = "NAME")]
        tags: Option<Vec<String>>,
        /// Set or clear the pinned flag
        #[arg(long)]
        pinned: Option<bool>,
    },
    /// Archive (soft delete) a prompt
    Delete {
        /// Prompt ID or unique ID prefix
        id: String,
    },
    /// List tags with prompt counts
    Tags {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push queued edits and pull remote changes
    Sync {
        /// Resolve every open conflict, including ones from earlier runs
        #[arg(long, value_enum, value_name = "STRATEGY")]
        resolve: Option<ResolutionArg>,
    },
    /// Inspect or manage the outbound sync queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Manage this device's registration
    Device {
        #[command(subcommand)]
        command: DeviceCommands,
    },
    /// Merge local prompts into an account (first sign-in)
    Migrate {
        /// Account user id
        #[arg(long, value_name = "ID")]
        user: String,
        /// Resolve every conflict found during the merge
        #[arg(long, value_enum, value_name = "STRATEGY")]
        resolve: Option<ResolutionArg>,
    },
    /// Export, restore or roll back the local dataset
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Delete prompts archived longer than the retention period
    Purge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    KeepLocal,
    KeepRemote,
    KeepBoth,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::KeepLocal => Self::KeepLocal,
            ResolutionArg::KeepRemote => Self::KeepRemote,
            ResolutionArg::KeepBoth => Self::KeepBoth,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum DeviceTypeArg {
    Desktop,
    Mobile,
    Tablet,
}

impl From<DeviceTypeArg> for DeviceType {
    fn from(value: DeviceTypeArg) -> Self {
        match value {
            DeviceTypeArg::Desktop => Self::Desktop,
            DeviceTypeArg::Mobile => Self::Mobile,
            DeviceTypeArg::Tablet => Self::Tablet,
        }
    }
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show pending, parked and dropped counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Reset parked items and flush immediately
    Retry,
    /// Discard every queued item
    Clear {
        /// Skip the typed confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
pub enum DeviceCommands {
    /// Register (or re-register) this device with the remote
    Register {
        /// Human-readable device name
        #[arg(long, value_name = "NAME")]
        name: Option<String>,
        /// Device class
        #[arg(long = "type", value_enum, default_value_t = DeviceTypeArg::Desktop)]
        device_type: DeviceTypeArg,
    },
    /// Show the local device identity
    Show,
}

#[derive(Subcommand)]
pub enum BackupCommands {
    /// Write a backup of every local prompt
    Export {
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Restore prompts from a backup file
    Restore {
        /// Backup file
        path: PathBuf,
        /// Only clear, do not import into the local store
        #[arg(long)]
        no_import: bool,
        /// Delete every local prompt before restoring
        #[arg(long)]
        clear_local: bool,
        /// Delete every remote prompt before restoring
        #[arg(long)]
        clear_remote: bool,
        /// Typed confirmation for destructive toggles
        #[arg(long, value_name = "TEXT")]
        confirm: Option<String>,
    },
    /// Replace the local dataset with a backup
    Rollback {
        /// Backup file
        path: PathBuf,
        /// Typed confirmation
        #[arg(long, value_name = "TEXT")]
        confirm: Option<String>,
    },
    /// Show the backup/restore audit log
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
