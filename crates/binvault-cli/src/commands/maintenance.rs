//! Integrity and maintenance command handlers

use std::path::Path;

use anyhow::{bail, Context, Result};

use binvault_core::Store;

use crate::output::{Output, OutputFormat};

/// Check protected collections
pub async fn verify(store: &Store, output: &Output) -> Result<()> {
    let report = store.verify_integrity().await;

    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({"intact": report.is_intact(), "missing": report.missing})
        ),
        OutputFormat::Quiet => {
            for key in &report.missing {
                println!("{}", key);
            }
        }
        OutputFormat::Human => {
            if report.is_intact() {
                println!("✓ All protected collections present");
            } else {
                println!("✗ Missing: {}", report.missing.join(", "));
                println!("  Run `binvault recover` to restore from the snapshot");
            }
        }
    }
    Ok(())
}

/// Restore missing protected collections from this process's snapshot
pub async fn recover(store: &Store, output: &Output) -> Result<()> {
    let report = store.recover().await;

    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "restored": report.restored,
                "unrecoverable": report.unrecoverable
            })
        ),
        OutputFormat::Quiet => {
            for key in &report.restored {
                println!("{}", key);
            }
        }
        OutputFormat::Human => {
            if report.restored.is_empty() && report.unrecoverable.is_empty() {
                println!("✓ Nothing to recover");
            }
            for key in &report.restored {
                println!("✓ Restored {}", key);
            }
            for key in &report.unrecoverable {
                println!("✗ Could not restore {}", key);
            }
        }
    }
    Ok(())
}

/// Write every cached collection as JSON
pub async fn export(store: &Store, path: Option<&Path>, output: &Output) -> Result<()> {
    let export = store.export().await;
    let json = serde_json::to_string_pretty(&export).context("Failed to serialize export")?;

    match path {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {:?}", path))?;
            output.success(&format!("Exported to {}", path.display()));
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Remove every cached record
pub async fn clear(store: &Store, yes: bool, output: &Output) -> Result<()> {
    if !yes {
        bail!("This removes every cached record. Re-run with --yes to confirm.");
    }

    store.clear_all().await?;
    output.success("Cleared local cache");
    Ok(())
}
