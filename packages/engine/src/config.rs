use serde::{Deserialize, Serialize};

use crate::errors;
use crate::LixError;

pub const DEFAULT_LOGICAL_TABLE: &str = "lix_internal_state_vtable";
pub const DEFAULT_TRANSACTION_TABLE: &str = "lix_internal_transaction_state";
pub const DEFAULT_UNTRACKED_TABLE: &str = "lix_internal_state_all_untracked";
pub const DEFAULT_VERSION_DESCRIPTOR_TABLE: &str =
    "lix_internal_state_cache_v1_lix_version_descriptor";
pub const DEFAULT_WRITER_TABLE: &str = "lix_internal_state_writer";
pub const DEFAULT_CHANGE_TABLE: &str = "lix_internal_change";

/// How the planner may resolve version inheritance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InheritanceResolution {
    /// Inline when the chain is fully known, otherwise resolve at execution time.
    #[default]
    Auto,
    /// Inline or fail with a typed error.
    RequireInline,
}

/// Names of the physical relations the logical state table is projected onto,
/// plus the guards bounding the rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtableRewriteConfig {
    pub logical_table: String,
    pub transaction_table: String,
    pub untracked_table: String,
    pub version_descriptor_table: String,
    pub writer_table: String,
    pub change_table: String,
    pub max_query_depth: usize,
    pub max_inheritance_depth: usize,
    pub inheritance_resolution: InheritanceResolution,
    /// When false, references are rewritten without pushdown, pruning or
    /// inlined ancestry. Results must not change.
    pub enable_optimizations: bool,
}

impl Default for VtableRewriteConfig {
    fn default() -> Self {
        Self {
            logical_table: DEFAULT_LOGICAL_TABLE.to_string(),
            transaction_table: DEFAULT_TRANSACTION_TABLE.to_string(),
            untracked_table: DEFAULT_UNTRACKED_TABLE.to_string(),
            version_descriptor_table: DEFAULT_VERSION_DESCRIPTOR_TABLE.to_string(),
            writer_table: DEFAULT_WRITER_TABLE.to_string(),
            change_table: DEFAULT_CHANGE_TABLE.to_string(),
            max_query_depth: 64,
            max_inheritance_depth: 64,
            inheritance_resolution: InheritanceResolution::Auto,
            enable_optimizations: true,
        }
    }
}

impl VtableRewriteConfig {
    pub fn from_json_str(json: &str) -> Result<Self, LixError> {
        let config: Self = serde_json::from_str(json).map_err(errors::invalid_config_error)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LixError> {
        let relations = [
            ("logical_table", &self.logical_table),
            ("transaction_table", &self.transaction_table),
            ("untracked_table", &self.untracked_table),
            ("version_descriptor_table", &self.version_descriptor_table),
            ("writer_table", &self.writer_table),
            ("change_table", &self.change_table),
        ];
        for (field, name) in relations {
            if name.trim().is_empty() {
                return Err(errors::invalid_config_error(format!(
                    "`{field}` must name a relation"
                )));
            }
        }
        if self.max_query_depth == 0 {
            return Err(errors::invalid_config_error(
                "`max_query_depth` must be at least 1",
            ));
        }
        if self.max_inheritance_depth == 0 {
            return Err(errors::invalid_config_error(
                "`max_inheritance_depth` must be at least 1",
            ));
        }
        Ok(())
    }
}
