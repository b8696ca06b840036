//! Error types for the migration engine.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Configuration error (invalid YAML, missing fields, bad processor config).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A qualified type or attribute name does not exist in the model snapshot.
    #[error("Unresolvable qualified name: {name}")]
    Unresolvable { name: String },

    /// A statement against the store failed.
    ///
    /// Identifies the table and operation so a failed processor can be
    /// located in the migration log without a stack trace.
    #[error("Store operation '{op}' failed for table {table}: {message}")]
    Sql {
        table: String,
        op: &'static str,
        message: String,
    },

    /// PostgreSQL driver error.
    #[error("Database error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context.
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// IO error (script output, config files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Create a Sql error identifying the table and operation.
    pub fn sql(table: impl Into<String>, op: &'static str, message: impl Into<String>) -> Self {
        MigrationError::Sql {
            table: table.into(),
            op,
            message: message.into(),
        }
    }

    /// Create a Pool error with context about where it occurred.
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MigrationError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create an Unresolvable error for a qualified name.
    pub fn unresolvable(name: impl Into<String>) -> Self {
        MigrationError::Unresolvable { name: name.into() }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrationError>;
