//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;
use serde_json::Value;

use binvault_core::attachments::entity_id_of;
use binvault_core::{Collection, WriteOutcome};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) {
        println!("{}", pretty(value));
    }

    /// Print a single entity
    pub fn print_record(&self, record: &Value) {
        match self.format {
            OutputFormat::Human | OutputFormat::Json => self.print_json(record),
            OutputFormat::Quiet => {
                if let Some(id) = entity_id_of(record) {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a collection
    pub fn print_records(&self, collection: Collection, records: &[Value]) {
        match self.format {
            OutputFormat::Human => {
                if records.is_empty() {
                    println!("No {} found.", collection);
                    return;
                }
                for record in records {
                    let id = entity_id_of(record).unwrap_or_else(|| "-".to_string());
                    println!("{} | {}", truncate(&id, 36), truncate(&summary(record), 70));
                }
                println!("\n{} record(s)", records.len());
            }
            OutputFormat::Json => self.print_json(records),
            OutputFormat::Quiet => {
                for record in records {
                    if let Some(id) = entity_id_of(record) {
                        println!("{}", id);
                    }
                }
            }
        }
    }

    /// Report how a local write went
    pub fn print_write_outcome(&self, what: &str, outcome: &WriteOutcome) {
        match self.format {
            OutputFormat::Human => match outcome {
                WriteOutcome::Persisted => println!("✓ {} saved", what),
                WriteOutcome::PersistedAfterEviction { evicted } => {
                    println!("✓ {} saved (evicted {})", what, evicted.join(", "))
                }
                WriteOutcome::NotPersisted { reason } => {
                    println!("✗ {} not saved locally: {}", what, reason)
                }
            },
            OutputFormat::Json => {
                let json = match outcome {
                    WriteOutcome::Persisted => serde_json::json!({"persisted": true}),
                    WriteOutcome::PersistedAfterEviction { evicted } => {
                        serde_json::json!({"persisted": true, "evicted": evicted})
                    }
                    WriteOutcome::NotPersisted { reason } => {
                        serde_json::json!({"persisted": false, "reason": reason})
                    }
                };
                println!("{}", json);
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// One-line view of an entity without its id
fn summary(record: &Value) -> String {
    match record {
        Value::Object(fields) => fields
            .iter()
            .filter(|(key, _)| key.as_str() != "id")
            .map(|(key, value)| match value {
                Value::String(s) => format!("{}={}", key, s),
                Value::Array(items) => format!("{}=[{}]", key, items.len()),
                other => format!("{}={}", key, other),
            })
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// Truncate a string to max length, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }

    #[test]
    fn test_summary_skips_id_and_counts_arrays() {
        let record = json!({"id": "b1", "status": "full", "photos": ["a", "b"]});
        let line = summary(&record);
        assert!(line.contains("photos=[2]"));
        assert!(line.contains("status=full"));
        assert!(!line.contains("b1"));
    }
}
