//! Move a plain attribute value into a language-keyed side table.
//!
//! The existing non-localized value becomes the single-language row for the
//! configured language; each row version's lifetime carries over unchanged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema;
use crate::core::RowValue;
use crate::error::Result;
use crate::store::batch::BatchWriter;
use crate::store::plan::{DdlOp, Filter, SelectPlan, UpdatePlan};

use super::{MigrationProcessor, ProcessorContext, ProcessorOutcome};

fn default_true() -> bool {
    true
}

/// Configuration of [`InternationalizeAttribute`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternationalizeConfig {
    /// Object table holding the attribute column.
    pub table: String,

    /// Column whose values become localized.
    pub column: String,

    /// Language-keyed side table receiving the values.
    pub target_table: String,

    /// Attribute name recorded in the side table.
    pub attribute: String,

    /// Language the existing values are recorded under.
    pub language: String,

    /// Drop the plain column afterwards; when `false` it is cleared.
    #[serde(default = "default_true")]
    pub drop_column: bool,
}

/// Converts a plain-valued attribute into a localized one.
pub struct InternationalizeAttribute {
    config: InternationalizeConfig,
}

impl InternationalizeAttribute {
    /// Create the processor from its configuration.
    pub fn new(config: InternationalizeConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MigrationProcessor for InternationalizeAttribute {
    fn name(&self) -> &'static str {
        "internationalize-attribute"
    }

    async fn run(&self, ctx: &ProcessorContext) -> Result<ProcessorOutcome> {
        let config = &self.config;
        let Some(table) = ctx.table_schema(&config.table) else {
            warn!(
                "Table '{}' does not exist; nothing to internationalize.",
                config.table
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "table '{}' not found",
                config.table
            )));
        };
        if !table.has_column(&config.column) {
            warn!(
                "Column '{}.{}' does not exist; nothing to internationalize.",
                config.table, config.column
            );
            return Ok(ProcessorOutcome::skipped(format!(
                "column '{}' not found in table '{}'",
                config.column, config.table
            )));
        }
        ctx.require_table(&config.target_table)?;

        info!(
            "Internationalizing '{}.{}' into '{}' for language '{}'.",
            config.table, config.column, config.target_table, config.language
        );

        let conn = ctx.connection();
        let rows = conn
            .select(
                &SelectPlan::new(
                    &config.table,
                    vec![
                        schema::BRANCH.to_string(),
                        schema::IDENTIFIER.to_string(),
                        schema::REV_MIN.to_string(),
                        schema::REV_MAX.to_string(),
                        config.column.clone(),
                    ],
                )
                .with_filter(Filter::NotNull(config.column.clone()))
                .ordered_by_owner(schema::IDENTIFIER),
            )
            .await?;
        let rows_read = rows.len() as u64;

        let target_columns: Vec<String> = vec![
            schema::BRANCH.to_string(),
            schema::OBJECT_ID.to_string(),
            schema::REV_MIN.to_string(),
            schema::REV_MAX.to_string(),
            schema::I18N_ATTR.to_string(),
            schema::LANG.to_string(),
            schema::I18N_VALUE.to_string(),
        ];
        let mut writer = BatchWriter::new(conn, self.name(), conn.max_batch_size());
        for row in rows {
            let [branch, id, rev_min, rev_max, value] = <[RowValue; 5]>::try_from(row)
                .map_err(|_| {
                    crate::error::MigrationError::sql(
                        &config.table,
                        "select",
                        "unexpected result arity",
                    )
                })?;
            writer
                .queue_insert(
                    &config.target_table,
                    &target_columns,
                    vec![
                        branch,
                        id,
                        rev_min,
                        rev_max,
                        RowValue::Text(config.attribute.clone()),
                        RowValue::Text(config.language.clone()),
                        value,
                    ],
                )
                .await?;
        }
        writer.flush().await?;

        if config.drop_column {
            conn.execute_ddl(&DdlOp::DropColumn {
                table: config.table.clone(),
                column: config.column.clone(),
            })
            .await?;
            ctx.update_schema(|repo| {
                if let Ok(table) = repo.require_mut(&config.table) {
                    table.columns.retain(|c| c.name != config.column);
                }
            });
        } else {
            conn.update(&UpdatePlan {
                table: config.table.clone(),
                assignments: vec![(config.column.clone(), RowValue::Null)],
                filter: Filter::NotNull(config.column.clone()),
            })
            .await?;
        }

        let mut stats = writer.finish().await?;
        stats.rows_read = rows_read;
        info!(
            "Localized {} value(s) of '{}.{}' as '{}'.",
            stats.inserted, config.table, config.column, config.language
        );
        Ok(ProcessorOutcome::applied(stats))
    }
}
