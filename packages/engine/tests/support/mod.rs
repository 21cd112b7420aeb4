#![allow(dead_code)]

use std::collections::BTreeMap;

use lix_state_vtable::{
    rewrite_vtable_sql, InheritanceMap, RewriteContext, StateTierSnapshot, Value,
    VtableRewriteConfig,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};

pub const KEY_VALUE_SCHEMA: &str = "lix_key_value";
pub const FILE_SCHEMA: &str = "lix_file_descriptor";

const CACHE_PREFIX: &str = "lix_internal_state_cache_v1_";

/// One physical row. Tier-specific columns are filled in by the insert
/// helpers.
#[derive(Debug, Clone)]
pub struct StateRow {
    pub entity_id: String,
    pub schema_key: String,
    pub file_id: String,
    pub version_id: String,
    pub snapshot_content: Option<String>,
    pub created_at: String,
    pub inherited_from_version_id: Option<String>,
    pub metadata: Option<String>,
}

impl StateRow {
    pub fn new(entity_id: &str, schema_key: &str, version_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            schema_key: schema_key.to_string(),
            file_id: "file-1".to_string(),
            version_id: version_id.to_string(),
            snapshot_content: Some(format!("{{\"id\":\"{entity_id}\"}}")),
            created_at: "2024-01-01T00:00:00.000Z".to_string(),
            inherited_from_version_id: None,
            metadata: None,
        }
    }

    pub fn snapshot(mut self, snapshot_content: &str) -> Self {
        self.snapshot_content = Some(snapshot_content.to_string());
        self
    }

    pub fn tombstone(mut self) -> Self {
        self.snapshot_content = None;
        self
    }

    pub fn file(mut self, file_id: &str) -> Self {
        self.file_id = file_id.to_string();
        self
    }

    pub fn created_at(mut self, created_at: &str) -> Self {
        self.created_at = created_at.to_string();
        self
    }

    pub fn metadata(mut self, metadata: &str) -> Self {
        self.metadata = Some(metadata.to_string());
        self
    }

    pub fn inherited_from(mut self, version_id: &str) -> Self {
        self.inherited_from_version_id = Some(version_id.to_string());
        self
    }
}

/// In-memory SQLite database laid out like the physical state tiers.
pub struct StateFixture {
    pub conn: Connection,
    pub config: VtableRewriteConfig,
    pub tiers: StateTierSnapshot,
    next_change: usize,
}

impl StateFixture {
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite");
        let config = VtableRewriteConfig::default();
        conn.execute_batch(&format!(
            "CREATE TABLE \"{transaction}\" (\
               id TEXT, entity_id TEXT, schema_key TEXT, schema_version TEXT, file_id TEXT, \
               plugin_key TEXT, version_id TEXT, snapshot_content TEXT, metadata TEXT, \
               created_at TEXT, untracked INTEGER NOT NULL DEFAULT 0, writer_key TEXT);\
             CREATE TABLE \"{untracked}\" (\
               entity_id TEXT, schema_key TEXT, file_id TEXT, version_id TEXT, plugin_key TEXT, \
               snapshot_content TEXT, schema_version TEXT, created_at TEXT, updated_at TEXT, \
               metadata TEXT, is_tombstone INTEGER NOT NULL DEFAULT 0);\
             CREATE TABLE \"{writer}\" (\
               file_id TEXT, version_id TEXT, entity_id TEXT, schema_key TEXT, writer_key TEXT);\
             CREATE TABLE \"{change}\" (id TEXT PRIMARY KEY, metadata TEXT);\
             CREATE TABLE files (id TEXT PRIMARY KEY);",
            transaction = config.transaction_table,
            untracked = config.untracked_table,
            writer = config.writer_table,
            change = config.change_table,
        ))
        .expect("create tier tables");
        create_cache_table(&conn, &config.version_descriptor_table);

        let mut fixture = Self {
            conn,
            config,
            tiers: StateTierSnapshot::default(),
            next_change: 0,
        };
        fixture.register_schema(KEY_VALUE_SCHEMA);
        fixture.register_schema(FILE_SCHEMA);
        fixture
    }

    pub fn register_schema(&mut self, schema_key: &str) {
        let table = format!("{CACHE_PREFIX}{schema_key}");
        create_cache_table(&self.conn, &table);
        self.tiers.cache_tables.insert(schema_key.to_string(), table);
    }

    pub fn open_transaction(&mut self) {
        self.tiers.open_transaction = true;
    }

    /// Records a version descriptor both in the descriptor cache and in the
    /// in-memory inheritance map.
    pub fn add_version(&mut self, version_id: &str, parent: Option<&str>) {
        let snapshot = match parent {
            Some(parent) => {
                format!("{{\"id\":\"{version_id}\",\"inherits_from_version_id\":\"{parent}\"}}")
            }
            None => format!("{{\"id\":\"{version_id}\",\"inherits_from_version_id\":null}}"),
        };
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (entity_id, schema_key, file_id, version_id, plugin_key, \
                     snapshot_content, schema_version, created_at, updated_at, is_tombstone, \
                     change_id, commit_id) \
                     VALUES (?1, 'lix_version_descriptor', 'lix', 'global', 'lix', ?2, '1', \
                     '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z', 0, ?3, 'commit-1')",
                    self.config.version_descriptor_table
                ),
                params![version_id, snapshot, format!("descriptor-{version_id}")],
            )
            .expect("insert version descriptor");
        self.tiers
            .inheritance
            .get_or_insert_with(InheritanceMap::new)
            .insert(version_id, parent.map(str::to_string));
    }

    pub fn insert_cache(&mut self, row: &StateRow) -> String {
        let change_id = self.next_change_id();
        let table = self
            .tiers
            .cache_tables
            .get(&row.schema_key)
            .cloned()
            .expect("schema should be registered");
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{table}\" (entity_id, schema_key, file_id, version_id, \
                     plugin_key, snapshot_content, schema_version, created_at, updated_at, \
                     inherited_from_version_id, is_tombstone, change_id, commit_id) \
                     VALUES (?1, ?2, ?3, ?4, 'lix', ?5, '1', ?6, ?6, ?7, ?8, ?9, 'commit-1')"
                ),
                params![
                    row.entity_id,
                    row.schema_key,
                    row.file_id,
                    row.version_id,
                    row.snapshot_content,
                    row.created_at,
                    row.inherited_from_version_id,
                    i64::from(row.snapshot_content.is_none()),
                    change_id,
                ],
            )
            .expect("insert cache row");
        if let Some(metadata) = &row.metadata {
            self.conn
                .execute(
                    &format!(
                        "INSERT INTO \"{}\" (id, metadata) VALUES (?1, ?2)",
                        self.config.change_table
                    ),
                    params![change_id, metadata],
                )
                .expect("insert change row");
        }
        change_id
    }

    pub fn insert_untracked(&self, row: &StateRow) {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (entity_id, schema_key, file_id, version_id, plugin_key, \
                     snapshot_content, schema_version, created_at, updated_at, metadata, \
                     is_tombstone) VALUES (?1, ?2, ?3, ?4, 'lix', ?5, '1', ?6, ?6, ?7, ?8)",
                    self.config.untracked_table
                ),
                params![
                    row.entity_id,
                    row.schema_key,
                    row.file_id,
                    row.version_id,
                    row.snapshot_content,
                    row.created_at,
                    row.metadata,
                    i64::from(row.snapshot_content.is_none()),
                ],
            )
            .expect("insert untracked row");
    }

    pub fn insert_transaction(&mut self, row: &StateRow, writer_key: Option<&str>) -> String {
        let id = self.next_change_id();
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (id, entity_id, schema_key, schema_version, file_id, \
                     plugin_key, version_id, snapshot_content, metadata, created_at, untracked, \
                     writer_key) VALUES (?1, ?2, ?3, '1', ?4, 'lix', ?5, ?6, ?7, ?8, 0, ?9)",
                    self.config.transaction_table
                ),
                params![
                    id,
                    row.entity_id,
                    row.schema_key,
                    row.file_id,
                    row.version_id,
                    row.snapshot_content,
                    row.metadata,
                    row.created_at,
                    writer_key,
                ],
            )
            .expect("insert transaction row");
        id
    }

    pub fn insert_writer(&self, row: &StateRow, writer_key: &str) {
        self.conn
            .execute(
                &format!(
                    "INSERT INTO \"{}\" (file_id, version_id, entity_id, schema_key, writer_key) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    self.config.writer_table
                ),
                params![
                    row.file_id,
                    row.version_id,
                    row.entity_id,
                    row.schema_key,
                    writer_key
                ],
            )
            .expect("insert writer row");
    }

    pub fn insert_file(&self, file_id: &str) {
        self.conn
            .execute("INSERT INTO files (id) VALUES (?1)", params![file_id])
            .expect("insert file");
    }

    pub fn rewrite(&self, sql: &str) -> String {
        self.rewrite_with(sql, &self.config, &[])
    }

    pub fn rewrite_with(&self, sql: &str, config: &VtableRewriteConfig, params: &[Value]) -> String {
        let context = RewriteContext::new(&self.tiers, config).with_params(params);
        rewrite_vtable_sql(sql, &context).expect("rewrite should succeed")
    }

    /// Rewrites and executes `sql`, returning rows as positional values.
    pub fn query(&self, sql: &str) -> Vec<Vec<SqlValue>> {
        self.query_with(sql, &self.config, &[])
    }

    pub fn query_with(
        &self,
        sql: &str,
        config: &VtableRewriteConfig,
        params: &[Value],
    ) -> Vec<Vec<SqlValue>> {
        let rewritten = self.rewrite_with(sql, config, params);
        self.execute_raw(&rewritten, params)
    }

    pub fn execute_raw(&self, sql: &str, params: &[Value]) -> Vec<Vec<SqlValue>> {
        let mut statement = self
            .conn
            .prepare(sql)
            .unwrap_or_else(|error| panic!("prepare failed: {error}\n{sql}"));
        let column_count = statement.column_count();
        let bound = params.iter().map(to_sql_value).collect::<Vec<_>>();
        let rows = statement
            .query_map(rusqlite::params_from_iter(bound.iter()), |row| {
                (0..column_count)
                    .map(|index| row.get::<_, SqlValue>(index))
                    .collect::<Result<Vec<_>, _>>()
            })
            .expect("query should run");
        rows.collect::<Result<Vec<_>, _>>()
            .expect("rows should decode")
    }

    /// Rows rendered as sorted strings, for order-insensitive comparison.
    pub fn query_sorted(&self, sql: &str, config: &VtableRewriteConfig) -> Vec<String> {
        let mut rows = self
            .query_with(sql, config, &[])
            .into_iter()
            .map(|row| format!("{row:?}"))
            .collect::<Vec<_>>();
        rows.sort();
        rows
    }

    fn next_change_id(&mut self) -> String {
        self.next_change += 1;
        format!("change-{:04}", self.next_change)
    }
}

impl Default for StateFixture {
    fn default() -> Self {
        Self::new()
    }
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

pub fn naive_config() -> VtableRewriteConfig {
    VtableRewriteConfig {
        enable_optimizations: false,
        ..VtableRewriteConfig::default()
    }
}

/// Rows keyed by the first column.
pub fn by_first_column(rows: Vec<Vec<SqlValue>>) -> BTreeMap<String, Vec<SqlValue>> {
    rows.into_iter()
        .map(|row| {
            let key = match row.first() {
                Some(SqlValue::Text(key)) => key.clone(),
                other => format!("{other:?}"),
            };
            (key, row)
        })
        .collect()
}

fn create_cache_table(conn: &Connection, table: &str) {
    conn.execute_batch(&format!(
        "CREATE TABLE \"{table}\" (\
           entity_id TEXT, schema_key TEXT, file_id TEXT, version_id TEXT, plugin_key TEXT, \
           snapshot_content TEXT, schema_version TEXT, created_at TEXT, updated_at TEXT, \
           inherited_from_version_id TEXT, is_tombstone INTEGER NOT NULL DEFAULT 0, \
           change_id TEXT, commit_id TEXT)"
    ))
    .expect("create cache table");
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Integer(value) => SqlValue::Integer(*value),
        Value::Real(value) => SqlValue::Real(*value),
        Value::Text(value) => SqlValue::Text(value.clone()),
        Value::Blob(value) => SqlValue::Blob(value.clone()),
    }
}
