//! Status command handler

use anyhow::Result;

use binvault_core::{format_bytes, Collection, Store};

use crate::output::{Output, OutputFormat};

/// Usage ratio above which status warns
const PRESSURE_THRESHOLD: f64 = 0.8;

/// Show status information
pub async fn show(store: &Store, output: &Output) -> Result<()> {
    let config = store.config();
    let usage = store.usage().await;
    let integrity = store.verify_integrity().await;
    let coordinator = store.coordinator();
    let mode = coordinator.mode();
    let queued = match coordinator.outbox() {
        Some(outbox) => Some(outbox.len().await),
        None => None,
    };

    let counts: Vec<(Collection, usize)> = {
        let small = store.small_store().lock().await;
        Collection::ALL
            .into_iter()
            .map(|c| (c, small.get_collection(c).len()))
            .collect()
    };

    match output.format {
        OutputFormat::Json => {
            let counts: serde_json::Map<String, serde_json::Value> = counts
                .iter()
                .map(|(c, n)| (c.key().to_string(), serde_json::json!(n)))
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "mode": mode,
                    "remote_url": config.active_remote_url(),
                    "outbox": queued,
                    "integrity": {
                        "intact": integrity.is_intact(),
                        "missing": integrity.missing
                    },
                    "usage": usage,
                    "counts": counts
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", mode);
        }
        OutputFormat::Human => {
            println!("binvault Status");
            println!("===============");
            println!();
            println!("Sync:");
            println!("  Mode:   {}", mode);
            match config.active_remote_url() {
                Some(url) => println!("  Remote: {}", url),
                None => println!("  Remote: (not configured)"),
            }
            if let Some(queued) = queued {
                println!("  Outbox: {} queued", queued);
            }
            println!();
            println!("Storage:");
            println!("  Location:    {}", config.data_dir.display());
            println!(
                "  Small store: {} of {} ({:.0}%)",
                format_bytes(usage.small_store_bytes),
                format_bytes(usage.small_store_capacity),
                usage.small_store_ratio() * 100.0
            );
            println!(
                "  Blob store:  {} of {}",
                format_bytes(usage.blob_store_bytes),
                format_bytes(usage.blob_store_capacity)
            );
            if usage.is_under_pressure(PRESSURE_THRESHOLD) {
                println!("  ! Storage is nearly full; eviction may remove cached data");
            }
            println!();
            println!("Integrity:");
            if integrity.is_intact() {
                println!("  OK");
            } else {
                println!("  Missing: {}", integrity.missing.join(", "));
            }
            println!();
            println!("Contents:");
            for (collection, count) in counts {
                println!("  {:<16} {}", collection.key(), count);
            }
        }
    }

    Ok(())
}
