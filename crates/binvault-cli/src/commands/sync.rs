//! Sync command handlers

use anyhow::{bail, Result};

use binvault_core::{Store, SyncMode};

use crate::output::{Output, OutputFormat};

const REMOTE_HINT: &str = "Enable it with:\n  \
     binvault config set remote_url https://your-server\n  \
     binvault config set remote_enabled true";

/// Check remote reachability
pub async fn probe(store: &Store, output: &Output) -> Result<()> {
    let coordinator = store.coordinator();
    if !coordinator.has_remote() {
        bail!("No remote configured. {}", REMOTE_HINT);
    }

    let mode = coordinator.probe().await;
    match output.format {
        OutputFormat::Json => println!("{}", serde_json::json!({"mode": mode})),
        OutputFormat::Quiet => println!("{}", mode),
        OutputFormat::Human => match mode {
            SyncMode::RemotePreferred => println!("✓ Remote reachable"),
            SyncMode::LocalOnly => println!("✗ Remote unreachable, working from local cache"),
        },
    }
    Ok(())
}

/// Push local collections and replay the outbox
pub async fn sync(store: &Store, output: &Output) -> Result<()> {
    let coordinator = store.coordinator();
    if !coordinator.has_remote() {
        bail!("No remote configured. {}", REMOTE_HINT);
    }

    output.message("Syncing with remote...");
    let report = coordinator.reconnect().await;
    if !report.mode.is_remote_preferred() {
        bail!("Remote unreachable; local data is unchanged and will sync later");
    }

    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "mode": report.mode,
                "synced": report.synced,
                "outbox_sent": report.drained.as_ref().map(|d| d.sent),
                "outbox_remaining": report.drained.as_ref().map(|d| d.remaining),
            })
        ),
        OutputFormat::Quiet => {}
        OutputFormat::Human => {
            match report.synced {
                Some(total) => println!("✓ Pushed {} record(s)", total),
                None => println!("✗ Push failed"),
            }
            if let Some(drained) = &report.drained {
                println!(
                    "  Outbox: {} replayed, {} remaining",
                    drained.sent, drained.remaining
                );
            }
        }
    }
    Ok(())
}
