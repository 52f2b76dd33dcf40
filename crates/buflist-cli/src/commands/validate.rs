//! Validate command implementation.

use anyhow::{Context, Result};
use buflist_core::Config;
use std::path::Path;

/// Load and validate a configuration file, printing the effective options.
pub fn run(path: &Path) -> Result<()> {
    let config = Config::from_file(path)
        .with_context(|| format!("invalid config file {}", path.display()))?;

    let options = &config.buffer;
    println!("Configuration is valid: {}\n", path.display());
    println!("  clear_batching_size:        {}", options.clear_batching_size);
    println!("  max_size:                   {}", options.max_size);
    println!("  max_fault_size:             {}", options.max_fault_size);
    match options.idle_clear_ttl() {
        Some(ttl) => println!("  idle_clear_ttl:             {:?}", ttl),
        None => println!("  idle_clear_ttl:             disabled"),
    }
    println!(
        "  max_size_waiting_delay:     {:?}",
        options.max_size_waiting_delay()
    );
    println!("  dispose_timeout:            {:?}", options.dispose_timeout());

    Ok(())
}
