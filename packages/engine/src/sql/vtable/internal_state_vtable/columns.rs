/// Columns of the logical state table, in canonical order.
pub(crate) const STATE_COLUMNS: &[&str] = &[
    "entity_id",
    "schema_key",
    "file_id",
    "version_id",
    "plugin_key",
    "snapshot_content",
    "schema_version",
    "created_at",
    "updated_at",
    "inherited_from_version_id",
    "change_id",
    "untracked",
    "commit_id",
    "metadata",
    "writer_key",
];

/// Internal columns. Only emitted when a query names them.
pub(crate) const HIDDEN_COLUMNS: &[&str] = &["priority", "_pk"];

/// Group key of the ranking window.
pub(crate) const KEY_COLUMNS: &[&str] = &["file_id", "schema_key", "entity_id", "version_id"];

pub(crate) const SCHEMA_KEY: &str = "schema_key";
pub(crate) const FILE_ID: &str = "file_id";
pub(crate) const VERSION_ID: &str = "version_id";
pub(crate) const INHERITED_FROM_VERSION_ID: &str = "inherited_from_version_id";
pub(crate) const PRIORITY: &str = "priority";
pub(crate) const PK: &str = "_pk";

/// Canonical spelling of a logical column, matched case-insensitively.
pub(crate) fn canonical_column(name: &str) -> Option<&'static str> {
    STATE_COLUMNS
        .iter()
        .chain(HIDDEN_COLUMNS.iter())
        .find(|column| column.eq_ignore_ascii_case(name))
        .copied()
}

pub(crate) fn is_hidden_column(name: &str) -> bool {
    HIDDEN_COLUMNS
        .iter()
        .any(|column| column.eq_ignore_ascii_case(name))
}

/// Sorts and deduplicates logical columns into canonical order, hidden
/// columns last.
pub(crate) fn in_canonical_order<'a>(columns: impl IntoIterator<Item = &'a str>) -> Vec<&'static str> {
    let wanted = columns
        .into_iter()
        .filter_map(canonical_column)
        .collect::<Vec<_>>();
    STATE_COLUMNS
        .iter()
        .chain(HIDDEN_COLUMNS.iter())
        .filter(|column| wanted.contains(column))
        .copied()
        .collect()
}
