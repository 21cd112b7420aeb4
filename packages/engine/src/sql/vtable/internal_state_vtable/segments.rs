use std::collections::{BTreeMap, BTreeSet};

use super::columns::{in_canonical_order, KEY_COLUMNS, PK, PRIORITY};
use super::inheritance::InheritancePlan;
use super::predicates::PushdownFilter;
use crate::sql::escaping::{quote_ident, quote_literal_list};
use crate::VtableRewriteConfig;

pub(crate) const SEGMENT_ALIAS: &str = "s";
pub(crate) const ANCESTRY_ALIAS: &str = "va";
pub(crate) const ANCESTRY_RELATION: &str = "version_ancestry";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageTier {
    Transaction,
    Untracked,
    Cache,
}

/// A tier, optionally re-projected from ancestors onto descendant versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentSource {
    pub tier: StorageTier,
    pub inherited: bool,
}

impl SegmentSource {
    pub const fn direct(tier: StorageTier) -> Self {
        Self {
            tier,
            inherited: false,
        }
    }

    pub const fn inherited(tier: StorageTier) -> Self {
        Self {
            tier,
            inherited: true,
        }
    }

    /// Merge rank, lower wins.
    pub const fn priority(self) -> u8 {
        match (self.tier, self.inherited) {
            (StorageTier::Transaction, false) => 1,
            (StorageTier::Untracked, false) => 2,
            (StorageTier::Cache, false) => 3,
            (StorageTier::Cache, true) => 4,
            (StorageTier::Untracked, true) => 5,
            (StorageTier::Transaction, true) => 6,
        }
    }

    const fn pk_tag(self) -> &'static str {
        match (self.tier, self.inherited) {
            (StorageTier::Transaction, false) => "T",
            (StorageTier::Untracked, false) => "U",
            (StorageTier::Cache, false) => "C",
            (StorageTier::Cache, true) => "CI",
            (StorageTier::Untracked, true) => "UI",
            (StorageTier::Transaction, true) => "TI",
        }
    }
}

/// Inputs shared by every segment of one reference.
#[derive(Debug, Clone, Copy)]
pub struct SegmentRequest<'a> {
    pub config: &'a VtableRewriteConfig,
    pub filter: &'a PushdownFilter,
    /// Columns the reference exposes, in canonical order.
    pub required_columns: &'a [&'static str],
    pub plan: &'a InheritancePlan,
    pub open_transaction: bool,
    pub cache_tables: &'a BTreeMap<String, String>,
}

impl SegmentRequest<'_> {
    /// Columns every segment emits: the required ones plus what ranking and
    /// the writer/metadata lookups read.
    pub fn segment_columns(&self) -> Vec<&'static str> {
        let mut columns = self.required_columns.to_vec();
        columns.extend(KEY_COLUMNS);
        columns.extend(["created_at", "change_id", PRIORITY]);
        if self.required_columns.contains(&"writer_key") {
            columns.push("inherited_from_version_id");
        }
        in_canonical_order(columns)
    }

    /// Cache relations to scan, narrowed by the schema-key filter.
    pub fn selected_cache_tables(&self) -> Vec<&str> {
        let tables: BTreeSet<&str> = if self.filter.schema_keys.is_empty() {
            self.cache_tables.values().map(String::as_str).collect()
        } else {
            self.filter
                .schema_keys
                .iter()
                .filter_map(|schema_key| self.cache_tables.get(schema_key))
                .map(String::as_str)
                .collect()
        };
        tables.into_iter().collect()
    }
}

/// One `SELECT` per tier variant, and per cache table for cache variants.
pub fn build_segments(request: &SegmentRequest<'_>) -> Vec<String> {
    let inherited = request.plan.needs_inherited_segments();
    let cache_tables = request.selected_cache_tables();
    let mut segments = Vec::new();

    if request.open_transaction {
        segments.push(build_segment(
            SegmentSource::direct(StorageTier::Transaction),
            &request.config.transaction_table,
            request,
        ));
    }
    segments.push(build_segment(
        SegmentSource::direct(StorageTier::Untracked),
        &request.config.untracked_table,
        request,
    ));
    for table in &cache_tables {
        segments.push(build_segment(
            SegmentSource::direct(StorageTier::Cache),
            table,
            request,
        ));
    }
    if inherited {
        for table in &cache_tables {
            segments.push(build_segment(
                SegmentSource::inherited(StorageTier::Cache),
                table,
                request,
            ));
        }
        segments.push(build_segment(
            SegmentSource::inherited(StorageTier::Untracked),
            &request.config.untracked_table,
            request,
        ));
        if request.open_transaction {
            segments.push(build_segment(
                SegmentSource::inherited(StorageTier::Transaction),
                &request.config.transaction_table,
                request,
            ));
        }
    }

    tracing::trace!(
        target: "lix_state_vtable",
        segments = segments.len(),
        cache_tables = cache_tables.len(),
        inherited,
        "built state segments"
    );
    segments
}

/// `SELECT` over one physical relation projecting logical columns.
pub fn build_segment(source: SegmentSource, table: &str, request: &SegmentRequest<'_>) -> String {
    let projection = request
        .segment_columns()
        .into_iter()
        .map(|column| format!("{} AS {column}", column_expr(source, column)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {projection} FROM {} AS {SEGMENT_ALIAS}",
        quote_ident(table)
    );
    if source.inherited {
        sql.push_str(&format!(
            " JOIN {ANCESTRY_RELATION} AS {ANCESTRY_ALIAS} \
             ON {ANCESTRY_ALIAS}.ancestor_version_id = {SEGMENT_ALIAS}.version_id"
        ));
    }

    let conditions = segment_conditions(source, request.filter);
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    sql
}

fn segment_conditions(source: SegmentSource, filter: &PushdownFilter) -> Vec<String> {
    let s = SEGMENT_ALIAS;
    let mut conditions = Vec::new();
    if !filter.schema_keys.is_empty() {
        conditions.push(format!(
            "{s}.schema_key IN ({})",
            quote_literal_list(&filter.schema_keys)
        ));
    }
    if !filter.file_ids.is_empty() {
        conditions.push(format!(
            "{s}.file_id IN ({})",
            quote_literal_list(&filter.file_ids)
        ));
    }
    if !filter.version_ids.is_empty() {
        let version_alias = if source.inherited { ANCESTRY_ALIAS } else { s };
        conditions.push(format!(
            "{version_alias}.version_id IN ({})",
            quote_literal_list(&filter.version_ids)
        ));
    }
    if source.inherited {
        match source.tier {
            StorageTier::Cache => {
                conditions.push(format!("{s}.is_tombstone = 0"));
                conditions.push(format!("{s}.snapshot_content IS NOT NULL"));
                conditions.push(format!("{s}.inherited_from_version_id IS NULL"));
            }
            StorageTier::Untracked => {
                conditions.push(format!("{s}.is_tombstone = 0"));
                conditions.push(format!("{s}.snapshot_content IS NOT NULL"));
            }
            StorageTier::Transaction => {
                conditions.push(format!("{s}.snapshot_content IS NOT NULL"));
            }
        }
    }
    conditions
}

fn column_expr(source: SegmentSource, column: &str) -> String {
    let s = SEGMENT_ALIAS;
    let va = ANCESTRY_ALIAS;
    let version_expr = if source.inherited {
        format!("{va}.version_id")
    } else {
        format!("{s}.version_id")
    };
    match column {
        "version_id" => version_expr,
        "inherited_from_version_id" => match (source.inherited, source.tier) {
            (true, _) => format!("{va}.ancestor_version_id"),
            (false, StorageTier::Cache) => format!("{s}.inherited_from_version_id"),
            (false, _) => "NULL".to_string(),
        },
        "updated_at" => match source.tier {
            StorageTier::Transaction => format!("{s}.created_at"),
            _ => format!("{s}.updated_at"),
        },
        "change_id" => match source.tier {
            StorageTier::Transaction => format!("{s}.id"),
            StorageTier::Untracked => "'untracked'".to_string(),
            StorageTier::Cache => format!("{s}.change_id"),
        },
        "commit_id" => match source.tier {
            StorageTier::Transaction => "'pending'".to_string(),
            StorageTier::Untracked => "'untracked'".to_string(),
            StorageTier::Cache => format!("{s}.commit_id"),
        },
        "untracked" => match source.tier {
            StorageTier::Transaction => format!("{s}.untracked"),
            StorageTier::Untracked => "1".to_string(),
            StorageTier::Cache => "0".to_string(),
        },
        "metadata" => match source.tier {
            StorageTier::Cache => "NULL".to_string(),
            _ => format!("{s}.metadata"),
        },
        "writer_key" => match source.tier {
            StorageTier::Transaction => format!("{s}.writer_key"),
            _ => "NULL".to_string(),
        },
        PRIORITY => source.priority().to_string(),
        PK => format!(
            "'{}' || '~' || {s}.file_id || '~' || {s}.schema_key || '~' || {s}.entity_id || '~' || {version_expr}",
            source.pk_tag()
        ),
        other => format!("{s}.{other}"),
    }
}
