//! Config command handlers

use std::path::PathBuf;

use anyhow::Result;

use advene_core::Config;

use crate::load_config;
use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config = load_config(config_path)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "fetch_batch_size": config.fetch_batch_size,
                    "user": config.user,
                    "debug_checks": config.debug_checks,
                    "default_package": config.default_package_path(),
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:         {}", config.data_dir.display());
            println!("  fetch_batch_size: {}", config.fetch_batch_size);
            println!("  user:             {}", config.user);
            println!("  debug_checks:     {}", config.debug_checks);
            println!();
            println!(
                "Default package: {}",
                config.default_package_path().display()
            );
            println!("Config file:     {}", effective_path.display());
        }
    }

    Ok(())
}
