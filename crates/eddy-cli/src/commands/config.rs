//! Effective configuration command.

use anyhow::Result;
use eddy::{BufferConfig, format_bytes};

use crate::OutputFormat;
use crate::output::{self, Format};

/// Run the config command.
pub fn run(config: &BufferConfig, format: OutputFormat, quiet: bool) -> Result<()> {
    config.validate()?;

    match Format::from(format) {
        Format::Json => output::print_json(config, quiet)?,
        Format::Table => {
            let items = vec![
                ("Max Memory", format_bytes(config.max_memory_bytes)),
                ("Flush Threshold", format_bytes(config.min_flush_threshold_bytes)),
                ("Max Batch Size", format_bytes(config.max_batch_bytes)),
                ("Max Batch Records", config.max_batch_records.to_string()),
                ("Max Buffer Age", format!("{:?}", config.max_buffer_age())),
                (
                    "Diagnostics Interval",
                    config
                        .diagnostics_interval()
                        .map_or_else(|| "disabled".to_string(), |d| format!("{d:?}")),
                ),
                (
                    "Size Estimate",
                    format!(
                        "{} x payload + {} bytes",
                        config.size_multiplier, config.entry_overhead_bytes
                    ),
                ),
            ];
            output::print_key_value_table(&items, quiet);
        }
    }

    Ok(())
}
