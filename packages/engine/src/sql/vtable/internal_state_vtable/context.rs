use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::trace::RewriteTraceSink;
use crate::{Value, VtableRewriteConfig};

/// A version and the version it inherits unstated rows from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    pub version_id: String,
    pub parent_version_id: Option<String>,
}

/// Parent link per known version. A version absent from the map is unknown;
/// a version mapped to `None` is a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritanceMap {
    parents: BTreeMap<String, Option<String>>,
}

impl InheritanceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = VersionDescriptor>) -> Self {
        let parents = descriptors
            .into_iter()
            .map(|descriptor| (descriptor.version_id, descriptor.parent_version_id))
            .collect();
        Self { parents }
    }

    pub fn insert(&mut self, version_id: impl Into<String>, parent_version_id: Option<String>) {
        self.parents.insert(version_id.into(), parent_version_id);
    }

    pub fn contains(&self, version_id: &str) -> bool {
        self.parents.contains_key(version_id)
    }

    /// `None` when the version is unknown, `Some(None)` for roots.
    pub fn parent_of(&self, version_id: &str) -> Option<Option<&str>> {
        self.parents.get(version_id).map(Option::as_deref)
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

/// Facts about the physical tiers the rewrite needs. Queried once per
/// rewrite call.
pub trait StateTierProvider {
    fn has_open_transaction(&self) -> bool;

    /// Cache relation per schema key.
    fn cache_tables(&self) -> BTreeMap<String, String>;

    /// Inheritance graph when it is known up front. `None` defers inheritance
    /// resolution to execution time.
    fn version_inheritance(&self) -> Option<InheritanceMap>;
}

/// Fixed tier facts, for callers that already hold them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateTierSnapshot {
    pub open_transaction: bool,
    pub cache_tables: BTreeMap<String, String>,
    pub inheritance: Option<InheritanceMap>,
}

impl StateTierSnapshot {
    pub fn capture(provider: &dyn StateTierProvider) -> Self {
        Self {
            open_transaction: provider.has_open_transaction(),
            cache_tables: provider.cache_tables(),
            inheritance: provider.version_inheritance(),
        }
    }

    pub fn with_cache_table(mut self, schema_key: impl Into<String>, table: impl Into<String>) -> Self {
        self.cache_tables.insert(schema_key.into(), table.into());
        self
    }
}

impl StateTierProvider for StateTierSnapshot {
    fn has_open_transaction(&self) -> bool {
        self.open_transaction
    }

    fn cache_tables(&self) -> BTreeMap<String, String> {
        self.cache_tables.clone()
    }

    fn version_inheritance(&self) -> Option<InheritanceMap> {
        self.inheritance.clone()
    }
}

/// Read-only inputs of one rewrite call.
#[derive(Clone, Copy)]
pub struct RewriteContext<'a> {
    pub params: &'a [Value],
    pub tiers: &'a dyn StateTierProvider,
    pub config: &'a VtableRewriteConfig,
    pub trace: Option<&'a dyn RewriteTraceSink>,
}

impl<'a> RewriteContext<'a> {
    pub fn new(tiers: &'a dyn StateTierProvider, config: &'a VtableRewriteConfig) -> Self {
        Self {
            params: &[],
            tiers,
            config,
            trace: None,
        }
    }

    pub fn with_params(mut self, params: &'a [Value]) -> Self {
        self.params = params;
        self
    }

    pub fn with_trace(mut self, trace: &'a dyn RewriteTraceSink) -> Self {
        self.trace = Some(trace);
        self
    }
}
