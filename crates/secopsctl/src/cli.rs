//! Command-line argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SecOps reboot notifier control
#[derive(Parser)]
#[command(name = "secopsctl")]
#[command(about = "Inspect and steer the SecOps reboot notifier", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Secure directory holding the notifier document (overrides the OS default)
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the notifier document and daemon lock holder
    Status {
        /// Print the raw document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the daemon to start the reboot warning window now
    RebootNow,

    /// Change the reboot policy
    Policy {
        /// "Force reboot after patch deployment", "Graceful reboot",
        /// "Schedule reboot" or "No reboot"
        value: String,
    },

    /// Create the document, or bring an existing one to this version
    Init,
}
