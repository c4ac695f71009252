//! Attachment command handlers

use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use binvault_core::{format_bytes, Collection, Store};

use crate::output::{Output, OutputFormat};

/// Attach a file to an entity
pub async fn attach(
    store: &Store,
    collection: Collection,
    id: &str,
    file: &Path,
    field: &str,
    output: &Output,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
    let size = data.len() as u64;

    let blob_id = store
        .attachments()
        .attach(collection, id, field, data)
        .await
        .with_context(|| format!("Failed to attach {:?} to {} '{}'", file, collection, id))?;

    match output.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({"blob_id": blob_id, "size": size, "field": field})
        ),
        OutputFormat::Quiet => println!("{}", blob_id),
        OutputFormat::Human => println!(
            "✓ Attached {} ({}) as {}",
            file.display(),
            format_bytes(size),
            blob_id
        ),
    }
    Ok(())
}

/// List an entity's attachments, optionally saving them to `save_to`
pub async fn list(
    store: &Store,
    collection: Collection,
    id: &str,
    save_to: Option<&Path>,
    output: &Output,
) -> Result<()> {
    let blobs = store.attachments().list(collection, id).await?;

    if let Some(dir) = save_to {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {:?}", dir))?;
        for (blob_id, data) in &blobs {
            let path = dir.join(format!("{}.bin", blob_id));
            std::fs::write(&path, data).with_context(|| format!("Failed to write {:?}", path))?;
        }
    }

    match output.format {
        OutputFormat::Json => {
            let json: Vec<_> = blobs
                .iter()
                .map(|(blob_id, data)| {
                    serde_json::json!({
                        "id": blob_id,
                        "size": data.len(),
                        "data": STANDARD.encode(data)
                    })
                })
                .collect();
            output.print_json(&json);
        }
        OutputFormat::Quiet => {
            for (blob_id, _) in &blobs {
                println!("{}", blob_id);
            }
        }
        OutputFormat::Human => {
            if blobs.is_empty() {
                println!("No attachments on {} '{}'.", collection, id);
                return Ok(());
            }
            for (blob_id, data) in &blobs {
                println!("{} | {}", blob_id, format_bytes(data.len() as u64));
            }
            println!("\n{} attachment(s)", blobs.len());
            if let Some(dir) = save_to {
                println!("Saved to {}", dir.display());
            }
        }
    }
    Ok(())
}

/// Remove one attachment
pub async fn detach(
    store: &Store,
    collection: Collection,
    id: &str,
    blob_id: &str,
    field: &str,
    output: &Output,
) -> Result<()> {
    let existed = store
        .attachments()
        .detach(collection, id, field, blob_id)
        .await?;

    if existed {
        output.success(&format!("Removed attachment {}", blob_id));
    } else {
        output.message(&format!("Attachment {} did not exist", blob_id));
    }
    Ok(())
}

/// Reconcile attachment lists for a whole collection
pub async fn repair(
    store: &Store,
    collection: Collection,
    field: &str,
    output: &Output,
) -> Result<()> {
    let repaired = store.repair_attachments(collection, field).await?;

    match output.format {
        OutputFormat::Json => {
            let json: Vec<_> = repaired
                .iter()
                .map(|(id, result)| {
                    serde_json::json!({
                        "id": id,
                        "ids": result.ids,
                        "dropped": result.dropped,
                        "adopted": result.adopted
                    })
                })
                .collect();
            output.print_json(&json);
        }
        OutputFormat::Quiet => {
            for (id, _) in &repaired {
                println!("{}", id);
            }
        }
        OutputFormat::Human => {
            if repaired.is_empty() {
                println!("✓ All {} attachment lists match the blob store", collection);
                return Ok(());
            }
            for (id, result) in &repaired {
                println!(
                    "{}: dropped {}, adopted {}",
                    id,
                    result.dropped.len(),
                    result.adopted.len()
                );
            }
            println!("\n{} entit(ies) repaired", repaired.len());
        }
    }
    Ok(())
}
