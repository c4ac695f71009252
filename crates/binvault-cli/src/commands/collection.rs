//! Collection command handlers

use std::io::Read;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use binvault_core::{Collection, Store};

use crate::output::Output;

/// Print a collection (remote first when reachable)
pub async fn get(store: &Store, collection: Collection, output: &Output) -> Result<()> {
    let records = store.coordinator().read(collection).await;
    output.print_records(collection, &records);
    Ok(())
}

/// Replace a collection with the array in `file` (or stdin)
pub async fn set(
    store: &Store,
    collection: Collection,
    file: Option<&Path>,
    output: &Output,
) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read stdin")?;
            text
        }
    };
    let records = parse_records(&text)?;

    let outcome = store.coordinator().write(collection, &records).await;
    output.print_write_outcome(&format!("{} ({} records)", collection, records.len()), &outcome);
    if !outcome.is_persisted() {
        bail!("{} was not saved", collection);
    }
    Ok(())
}

/// Add an entity
pub async fn add(store: &Store, collection: Collection, json: &str, output: &Output) -> Result<()> {
    let entity = parse_object(json)?;
    let (created, outcome) = store
        .coordinator()
        .create(collection, entity)
        .await
        .with_context(|| format!("Failed to add to {}", collection))?;
    output.print_record(&created);
    if !outcome.is_persisted() {
        output.print_write_outcome(collection.key(), &outcome);
        bail!("{} entity was not saved locally", collection);
    }
    Ok(())
}

/// Merge fields into an entity
pub async fn update(
    store: &Store,
    collection: Collection,
    id: &str,
    json: &str,
    output: &Output,
) -> Result<()> {
    let patch = parse_object(json)?;
    let (updated, outcome) = store
        .coordinator()
        .update(collection, id, &patch)
        .await
        .with_context(|| format!("Failed to update {} '{}'", collection, id))?;
    output.print_record(&updated);
    if !outcome.is_persisted() {
        output.print_write_outcome(collection.key(), &outcome);
        bail!("{} '{}' was not saved locally", collection, id);
    }
    Ok(())
}

/// Remove an entity and its attachments
pub async fn remove(store: &Store, collection: Collection, id: &str, output: &Output) -> Result<()> {
    let removal = store.delete_entity(collection, id).await?;
    if !removal.existed {
        bail!("No {} entity with id '{}'", collection, id);
    }

    let mut message = format!("Removed {} '{}'", collection, id);
    if removal.blobs_removed > 0 {
        message.push_str(&format!(" and {} attachment(s)", removal.blobs_removed));
    }
    output.success(&message);
    Ok(())
}

/// Parse a JSON array of records
fn parse_records(text: &str) -> Result<Vec<Value>> {
    match serde_json::from_str(text).context("Input is not valid JSON")? {
        Value::Array(records) => Ok(records),
        _ => bail!("Expected a JSON array of records"),
    }
}

/// Parse a JSON object
fn parse_object(text: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(text).context("Input is not valid JSON")?;
    if !value.is_object() {
        bail!("Expected a JSON object");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records() {
        let records = parse_records(r#"[{"id": "b1"}, {"id": "b2"}]"#).unwrap();
        assert_eq!(records.len(), 2);

        assert!(parse_records(r#"{"id": "b1"}"#).is_err());
        assert!(parse_records("not json").is_err());
    }

    #[test]
    fn test_parse_object() {
        assert!(parse_object(r#"{"status": "full"}"#).is_ok());
        assert!(parse_object("[]").is_err());
    }
}
