//! CLI interface for quotabar
//!
//! The CLI is a thin display layer over the manager: `status` runs one poll
//! cycle, `watch` keeps the poll service running, and the remaining commands
//! edit the configured instances and the secret store.
//!
//! # Example
//!
//! ```bash
//! # Poll every enabled instance once
//! quotabar status
//!
//! # Track a second OpenAI organization with its own admin key
//! quotabar add openai --label Work --set organizationId=org-123 --set monthlyBudget=200
//! quotabar secret set openai-1a2b3c4d.keychainKey
//!
//! # Keep polling, most available first
//! quotabar config --sort most-available-now
//! quotabar watch
//! ```

use crate::sorting::SortMode;
use clap::{Args, Parser, Subcommand};
use quotabar_core::config::ConfigValue;

/// Track quota and usage of AI coding tools
#[derive(Parser, Debug, Clone)]
#[command(name = "quotabar")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Show informational output (default is quiet mode with only warnings and errors)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Show remaining instead of used percentages
    #[arg(long, global = true)]
    pub remaining: bool,

    /// Subcommand to execute (defaults to `status`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Poll every enabled instance once and show the results
    Status {
        /// Sort order for this run (defaults to the saved mode)
        #[arg(long, value_parser = parse_sort_mode)]
        sort: Option<SortMode>,
    },

    /// Keep polling and print each completed cycle until Ctrl+C
    Watch,

    /// List the provider types quotabar knows about
    Types,

    /// List configured instances
    Instances,

    /// Add an instance of a provider type
    Add(AddArgs),

    /// Remove an instance and its stored secrets
    Remove {
        /// Instance id
        id: String,
    },

    /// Enable an instance
    Enable {
        /// Instance id
        id: String,
    },

    /// Disable an instance
    Disable {
        /// Instance id
        id: String,
    },

    /// Move instances to the front of the manual order
    Reorder {
        /// Instance ids, in the desired order
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show or change preferences
    Config(ConfigArgs),

    /// Manage stored secrets
    #[command(subcommand)]
    Secret(SecretCommand),
}

// ---------------------------------------------------------------------------
// Argument structs
// ---------------------------------------------------------------------------

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    /// Provider type id (see `quotabar types`)
    pub type_id: String,

    /// Display label
    #[arg(long)]
    pub label: Option<String>,

    /// Provider setting as KEY=VALUE (repeatable)
    #[arg(long = "set", value_parser = parse_key_value)]
    pub values: Vec<(String, ConfigValue)>,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Poll interval in seconds (minimum 30)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Sort mode for the status list
    #[arg(long, value_parser = parse_sort_mode)]
    pub sort: Option<SortMode>,

    /// Show remaining instead of used percentages by default
    #[arg(long)]
    pub show_remaining: Option<bool>,

    /// Announce restored instances in `watch`
    #[arg(long)]
    pub notify_on_restore: Option<bool>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SecretCommand {
    /// Store a secret (value read from stdin when omitted)
    Set {
        /// Secret store key, e.g. `openai.keychainKey`
        key: String,
        /// Secret value
        #[arg(long)]
        value: Option<String>,
    },
    /// Delete a secret
    Delete {
        /// Secret store key
        key: String,
    },
}

// ---------------------------------------------------------------------------
// Parsers
// ---------------------------------------------------------------------------

/// Parse a `KEY=VALUE` provider setting
pub fn parse_key_value(s: &str) -> Result<(String, ConfigValue), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected KEY=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Missing key in '{s}'"));
    }
    Ok((key.to_string(), ConfigValue::parse_input(value)))
}

pub fn parse_sort_mode(s: &str) -> Result<SortMode, String> {
    s.parse()
}
