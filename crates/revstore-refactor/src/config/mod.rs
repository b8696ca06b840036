//! Engine configuration: loading and validation.

mod types;
mod validation;

pub use types::{EngineConfig, MigrationScript, ProcessorConfig};
pub use validation::{validate, validate_processor};

use std::path::Path;

use crate::error::Result;

impl EngineConfig {
    /// Load and validate a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a configuration from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(raw)?;
        validate(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "store:\n  type: memory\nprocessors:\n  - type: delete-links\n    table: HAS_PARTS\n    reference: \"m:T#p\"\n"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.script.processors.len(), 1);
    }

    #[test]
    fn test_invalid_config_rejected_on_load() {
        let yaml = "store:\n  type: memory\nprocessors:\n  - type: delete-links\n    table: \"\"\n    reference: \"m:T#p\"\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }
}
