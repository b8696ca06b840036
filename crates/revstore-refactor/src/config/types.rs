//! Configuration type definitions.
//!
//! Every processor is configured declaratively; [`ProcessorConfig`] is the
//! closed set of supported rewrites, resolved to a processor instance at
//! configuration-load time rather than by reflective lookup.

use serde::{Deserialize, Serialize};

use crate::core::SchemaRepository;
use crate::processors::{
    AlterColumn, AlterColumnConfig, ChangeLinkReference, ChangeReferenceConfig, ColumnToFlex,
    ColumnToFlexConfig, CreateLinks, CreateLinksConfig, DeleteLinks, DeleteLinksConfig,
    FlexToColumn, FlexToColumnConfig, InlineLinksConfig, InternationalizeAttribute,
    InternationalizeConfig, InvertLinks, InvertLinksConfig, LinkOrderConfig, MigrationProcessor,
    MoveLinks, MoveLinksConfig, MoveObjects, MoveObjectsConfig, RemoveDuplicateLinks,
    RemoveDuplicatesConfig, SynthesizeDirectLinks, SynthesizeLinkOrder,
};
use crate::resolver::ModelIndex;
use crate::store::StoreConfig;

/// One configured migration step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProcessorConfig {
    /// Move objects of given types between tables.
    MoveObjects(MoveObjectsConfig),

    /// Move links between association tables.
    MoveLinks(MoveLinksConfig),

    /// Delete links of one reference.
    DeleteLinks(DeleteLinksConfig),

    /// Swap source and destination of links in place.
    InvertLinks(InvertLinksConfig),

    /// Relabel links from one reference to another.
    ChangeLinkReference(ChangeReferenceConfig),

    /// Rename/retype/re-constrain a column.
    AlterColumn(AlterColumnConfig),

    /// Move a column attribute into flex storage.
    ColumnToFlex(ColumnToFlexConfig),

    /// Move a flex attribute into a dedicated column.
    FlexToColumn(FlexToColumnConfig),

    /// Move a plain attribute into a language-keyed side table.
    InternationalizeAttribute(InternationalizeConfig),

    /// Derive sort orders for an unordered link table.
    SynthesizeLinkOrder(LinkOrderConfig),

    /// Collapse bridge-object paths into direct links.
    SynthesizeDirectLinks(InlineLinksConfig),

    /// Remove duplicate time-sliced assignments.
    RemoveDuplicateLinks(RemoveDuplicatesConfig),

    /// Insert links for all intersecting object pairs.
    CreateLinks(CreateLinksConfig),
}

impl ProcessorConfig {
    /// Kind tag, as spelled in configuration files.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorConfig::MoveObjects(_) => "move-objects",
            ProcessorConfig::MoveLinks(_) => "move-links",
            ProcessorConfig::DeleteLinks(_) => "delete-links",
            ProcessorConfig::InvertLinks(_) => "invert-links",
            ProcessorConfig::ChangeLinkReference(_) => "change-link-reference",
            ProcessorConfig::AlterColumn(_) => "alter-column",
            ProcessorConfig::ColumnToFlex(_) => "column-to-flex",
            ProcessorConfig::FlexToColumn(_) => "flex-to-column",
            ProcessorConfig::InternationalizeAttribute(_) => "internationalize-attribute",
            ProcessorConfig::SynthesizeLinkOrder(_) => "synthesize-link-order",
            ProcessorConfig::SynthesizeDirectLinks(_) => "synthesize-direct-links",
            ProcessorConfig::RemoveDuplicateLinks(_) => "remove-duplicate-links",
            ProcessorConfig::CreateLinks(_) => "create-links",
        }
    }

    /// Instantiate the configured processor.
    pub fn build(&self) -> Box<dyn MigrationProcessor> {
        match self.clone() {
            ProcessorConfig::MoveObjects(c) => Box::new(MoveObjects::new(c)),
            ProcessorConfig::MoveLinks(c) => Box::new(MoveLinks::new(c)),
            ProcessorConfig::DeleteLinks(c) => Box::new(DeleteLinks::new(c)),
            ProcessorConfig::InvertLinks(c) => Box::new(InvertLinks::new(c)),
            ProcessorConfig::ChangeLinkReference(c) => Box::new(ChangeLinkReference::new(c)),
            ProcessorConfig::AlterColumn(c) => Box::new(AlterColumn::new(c)),
            ProcessorConfig::ColumnToFlex(c) => Box::new(ColumnToFlex::new(c)),
            ProcessorConfig::FlexToColumn(c) => Box::new(FlexToColumn::new(c)),
            ProcessorConfig::InternationalizeAttribute(c) => {
                Box::new(InternationalizeAttribute::new(c))
            }
            ProcessorConfig::SynthesizeLinkOrder(c) => Box::new(SynthesizeLinkOrder::new(c)),
            ProcessorConfig::SynthesizeDirectLinks(c) => Box::new(SynthesizeDirectLinks::new(c)),
            ProcessorConfig::RemoveDuplicateLinks(c) => Box::new(RemoveDuplicateLinks::new(c)),
            ProcessorConfig::CreateLinks(c) => Box::new(CreateLinks::new(c)),
        }
    }
}

/// An ordered list of migration steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationScript {
    /// Keep running subsequent processors after one fails.
    #[serde(default)]
    pub continue_on_error: bool,

    /// Steps, executed strictly in order.
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

/// Root configuration: store, schema snapshot, model index and script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Store backend to run against.
    pub store: StoreConfig,

    /// Schema repository snapshot (tables and columns).
    #[serde(default)]
    pub schema: SchemaRepository,

    /// Model index (qualified name resolution).
    #[serde(default)]
    pub model: ModelIndex,

    /// The migration script.
    #[serde(flatten)]
    pub script: MigrationScript,
}
