//! secopsctl - operator CLI for the SecOps reboot notifier
//!
//! Reads and edits the same JSON document the daemon watches. Every write
//! is a read-modify-write through `ConfigStore::update`, so fields the
//! daemon or the notifier app changed in the meantime are kept.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use secops_common::{HostOs, SecurePaths};

use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match cli.dir {
        Some(dir) => SecurePaths::under(dir, HostOs::current()?),
        None => SecurePaths::resolve(),
    }
    .context("Failed to get secure path")?;

    match cli.command {
        Commands::Status { json } => commands::status(&paths, json),
        Commands::RebootNow => commands::reboot_now(&paths),
        Commands::Policy { value } => commands::policy(&paths, &value),
        Commands::Init => commands::init(&paths),
    }
}
