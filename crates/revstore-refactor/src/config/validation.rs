//! Configuration validation, run once after loading.

use crate::error::{MigrationError, Result};

use super::types::{EngineConfig, ProcessorConfig};

fn require(value: &str, what: &str, kind: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MigrationError::Config(format!(
            "Processor '{}': {} must not be empty",
            kind, what
        )));
    }
    Ok(())
}

fn positive(value: i64, what: &str, kind: &str) -> Result<()> {
    if value <= 0 {
        return Err(MigrationError::Config(format!(
            "Processor '{}': {} must be positive, got {}",
            kind, what, value
        )));
    }
    Ok(())
}

/// Validate one processor configuration.
pub fn validate_processor(config: &ProcessorConfig) -> Result<()> {
    let kind = config.kind();
    match config {
        ProcessorConfig::MoveObjects(c) => {
            require(&c.source_table, "source_table", kind)?;
            require(&c.target_table, "target_table", kind)?;
            if c.types.is_empty() {
                return Err(MigrationError::Config(format!(
                    "Processor '{}': at least one type is required",
                    kind
                )));
            }
            Ok(())
        }
        ProcessorConfig::MoveLinks(c) => {
            require(&c.source_table, "source_table", kind)?;
            require(&c.target_table, "target_table", kind)
        }
        ProcessorConfig::DeleteLinks(c) => require(&c.table, "table", kind),
        ProcessorConfig::InvertLinks(c) => require(&c.table, "table", kind),
        ProcessorConfig::ChangeLinkReference(c) => require(&c.table, "table", kind),
        ProcessorConfig::AlterColumn(c) => {
            require(&c.table, "table", kind)?;
            require(&c.column, "column", kind)?;
            if c.rename_to.is_none() && c.new_type.is_none() && c.mandatory.is_none() {
                return Err(MigrationError::Config(format!(
                    "Processor '{}': no change configured for '{}.{}'",
                    kind, c.table, c.column
                )));
            }
            Ok(())
        }
        ProcessorConfig::ColumnToFlex(c) => {
            require(&c.table, "table", kind)?;
            require(&c.column, "column", kind)?;
            require(&c.attribute, "attribute", kind)
        }
        ProcessorConfig::FlexToColumn(c) => {
            require(&c.table, "table", kind)?;
            require(&c.column, "column", kind)?;
            require(&c.attribute, "attribute", kind)
        }
        ProcessorConfig::InternationalizeAttribute(c) => {
            require(&c.table, "table", kind)?;
            require(&c.column, "column", kind)?;
            require(&c.target_table, "target_table", kind)?;
            require(&c.language, "language", kind)
        }
        ProcessorConfig::SynthesizeLinkOrder(c) => {
            require(&c.table, "table", kind)?;
            require(&c.order_table, "order_table", kind)?;
            require(&c.order_column, "order_column", kind)?;
            positive(c.step, "step", kind)
        }
        ProcessorConfig::SynthesizeDirectLinks(c) => require(&c.table, "table", kind),
        ProcessorConfig::RemoveDuplicateLinks(c) => require(&c.table, "table", kind),
        ProcessorConfig::CreateLinks(c) => {
            require(&c.table, "table", kind)?;
            require(&c.source_table, "source_table", kind)?;
            require(&c.dest_table, "dest_table", kind)?;
            if let Some(step) = c.order_step {
                positive(step, "order_step", kind)?;
            }
            Ok(())
        }
    }
}

/// Validate a full engine configuration.
pub fn validate(config: &EngineConfig) -> Result<()> {
    for processor in &config.script.processors {
        validate_processor(processor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::QualifiedName;
    use crate::processors::{LinkOrderConfig, MoveLinksConfig};

    #[test]
    fn test_empty_table_rejected() {
        let config = ProcessorConfig::MoveLinks(MoveLinksConfig {
            source_table: "".into(),
            target_table: "B".into(),
            reference: None,
            source_type: None,
            dest_type: None,
        });
        assert!(validate_processor(&config).is_err());
    }

    #[test]
    fn test_nonpositive_step_rejected() {
        let config = ProcessorConfig::SynthesizeLinkOrder(LinkOrderConfig {
            table: "HAS_PARTS".into(),
            reference: QualifiedName::parse("m:T#p").unwrap(),
            order_table: "ITEM".into(),
            order_column: "POSITION".into(),
            step: 0,
        });
        assert!(validate_processor(&config).is_err());
    }

    #[test]
    fn test_valid_config_accepted() {
        let config = ProcessorConfig::MoveLinks(MoveLinksConfig {
            source_table: "A".into(),
            target_table: "B".into(),
            reference: None,
            source_type: None,
            dest_type: None,
        });
        assert!(validate_processor(&config).is_ok());
    }
}
