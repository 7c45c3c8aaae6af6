//! Subcommand implementations

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use secops_common::config_store::read_document;
use secops_common::process_lock::{is_process_alive, read_holder};
use secops_common::{ConfigPatch, ConfigStore, NotifierConfig, RebootPolicy, SecurePaths, VERSION};

const THIN_SEP: &str = "------------------------------------------------------------";

fn store(paths: &SecurePaths) -> ConfigStore {
    ConfigStore::new(paths.notifier_config(), VERSION)
}

/// Print the document summary and who holds the daemon lock
pub fn status(paths: &SecurePaths, json: bool) -> Result<()> {
    let path = paths.notifier_config();
    if !path.exists() {
        println!("No notifier document at {}", path.display());
        println!("  Use 'secopsctl init' to create one.");
        return Ok(());
    }

    let doc = read_document(&path).context("Error reading notifier document")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!();
    println!("{}", "  SecOps Reboot Notifier".bold());
    println!("{}", THIN_SEP);
    print_document(&doc);
    println!();
    print_daemon(paths);
    println!("{}", THIN_SEP);
    Ok(())
}

fn print_document(doc: &NotifierConfig) {
    println!("{}", "[DOCUMENT]".cyan());
    println!("  Policy:         {}", policy_label(&doc.reboot_config));
    println!("  Task scheduled: {}", yes_no(doc.task_scheduled));
    println!("  Reboot now:     {}", yes_no(doc.reboot_now));
    let when = if doc.scheduled_time.is_empty() {
        "n/a"
    } else {
        doc.scheduled_time.as_str()
    };
    println!("  Scheduled time: {}", when);
    println!("  Delay counter:  {}", doc.delay_counter);
    println!("  Message:        {}", doc.custom_message);
    println!("  Asset:          {} ({})", or_na(&doc.asset), or_na(&doc.asset_type));
    println!("  Backend:        {}", or_na(&doc.base_url));
    println!("  Updated:        {} (v{})", doc.last_updated, doc.version);
}

fn print_daemon(paths: &SecurePaths) {
    println!("{}", "[DAEMON]".cyan());
    match read_holder(&paths.pid_file()) {
        Ok(Some(pid)) if is_process_alive(pid) => {
            println!("  Lock holder:    pid {} {}", pid, "running".green())
        }
        Ok(Some(pid)) => println!("  Lock holder:    pid {} {}", pid, "stale".yellow()),
        Ok(None) => println!("  Lock holder:    none"),
        Err(e) => println!("  Lock holder:    {}", e.to_string().red()),
    }
}

/// Flag the document so the daemon starts the reboot warning window
pub fn reboot_now(paths: &SecurePaths) -> Result<()> {
    let store = store(paths);
    store.load().context("Error loading notifier document")?;
    store
        .update(&ConfigPatch {
            reboot_now: Some(true),
            ..Default::default()
        })
        .context("Error updating notifier document")?;
    println!("{} reboot_now set", "[OK]".green());
    Ok(())
}

/// Replace `reboot_config`; unknown values are stored as given
pub fn policy(paths: &SecurePaths, value: &str) -> Result<()> {
    let policy = RebootPolicy::from(value.trim());
    if let RebootPolicy::Other(raw) = &policy {
        println!(
            "{} {:?} is not a known policy, storing it verbatim",
            "[NOTE]".yellow(),
            raw
        );
    }

    let store = store(paths);
    store.load().context("Error loading notifier document")?;
    let doc = store
        .update(&ConfigPatch {
            reboot_config: Some(policy),
            ..Default::default()
        })
        .context("Error updating notifier document")?;
    println!("{} reboot_config = {}", "[OK]".green(), doc.reboot_config);
    Ok(())
}

pub fn init(paths: &SecurePaths) -> Result<()> {
    let doc = store(paths)
        .load()
        .context("Error loading notifier document")?;
    println!(
        "{} {} (v{})",
        "[OK]".green(),
        paths.notifier_config().display(),
        doc.version
    );
    Ok(())
}

fn policy_label(policy: &RebootPolicy) -> String {
    match policy {
        RebootPolicy::Other(raw) => format!("{} {}", raw, "(unrecognised)".yellow()),
        known => known.to_string(),
    }
}

fn yes_no(value: bool) -> String {
    if value {
        "yes".green().to_string()
    } else {
        "no".to_string()
    }
}

fn or_na(value: &str) -> &str {
    if value.is_empty() {
        "n/a"
    } else {
        value
    }
}
