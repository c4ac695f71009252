//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use binvault_core::Config;

use crate::output::{Output, OutputFormat};

fn load(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config = load(config_path)?;

    match output.format {
        OutputFormat::Json => output.print_json(&config),
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::config_file_path);
            let or_unset = |value: Option<String>| value.unwrap_or_else(|| "(not set)".to_string());

            println!("Configuration:");
            println!("  data_dir:                {}", config.data_dir.display());
            println!("  small_store_quota_bytes: {}", config.small_store_quota_bytes);
            println!("  blob_store_quota_bytes:  {}", config.blob_store_quota_bytes);
            println!("  eviction_batch_size:     {}", config.eviction_batch_size);
            println!("  remote_url:              {}", or_unset(config.remote_url.clone()));
            println!("  remote_enabled:          {}", config.remote_enabled);
            println!(
                "  remote_timeout_secs:     {}",
                or_unset(config.remote_timeout_secs.map(|s| s.to_string()))
            );
            println!(
                "  probe_interval_secs:     {}",
                or_unset(config.probe_interval_secs.map(|s| s.to_string()))
            );
            println!("  outbox_enabled:          {}", config.outbox_enabled);
            println!("  outbox_max_attempts:     {}", config.outbox_max_attempts);
            println!("  initial_retry_delay_ms:  {}", config.initial_retry_delay_ms);
            println!("  max_retry_delay_ms:      {}", config.max_retry_delay_ms);
            println!("  log_level:               {}", config.log_level);
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: &str, value: &str, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config = load(config_path)?;
    config.set_field(key, value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
