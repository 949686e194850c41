//! CLI command implementations.

pub mod config;
pub mod simulate;

use std::path::Path;

use anyhow::{Context, Result};
use eddy::BufferConfig;

/// Loads a configuration file, or the defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<BufferConfig> {
    let Some(path) = path else {
        return Ok(BufferConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: BufferConfig = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::debug!("loaded buffer configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_path() {
        let config = load_config(None).unwrap();
        assert_eq!(config.max_batch_records, BufferConfig::default().max_batch_records);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = std::env::temp_dir().join(format!("eddy-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "max_memory_bytes": 4096, "max_batch_records": 10 }"#).unwrap();

        let config = load_config(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.max_memory_bytes, 4096);
        assert_eq!(config.max_batch_records, 10);
        assert_eq!(config.size_multiplier, 2);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_config(Some(Path::new("/nonexistent/eddy.json"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/eddy.json"));
    }
}
