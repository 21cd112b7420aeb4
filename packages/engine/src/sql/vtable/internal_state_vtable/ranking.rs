use std::collections::BTreeMap;

use super::inheritance::InheritancePlan;
use super::segments::{build_segments, SegmentRequest, ANCESTRY_RELATION};
use crate::sql::escaping::{quote_ident, quote_literal, quote_literal_list};

const RANKED_ALIAS: &str = "w";
const UNION_ALIAS: &str = "c";

/// Merges the tier segments of one reference into exactly one row per
/// `(file_id, schema_key, entity_id, version_id)`.
pub fn assemble_ranked_state(request: &SegmentRequest<'_>) -> String {
    let segments = build_segments(request);
    let segment_columns = request.segment_columns();
    let required = if request.required_columns.is_empty() {
        &["entity_id"][..]
    } else {
        request.required_columns
    };
    let needs_writer = required.contains(&"writer_key");
    let needs_metadata = required.contains(&"metadata");

    let w = RANKED_ALIAS;
    let c = UNION_ALIAS;
    let output = required
        .iter()
        .map(|column| match *column {
            "writer_key" => format!(
                "COALESCE({w}.writer_key, ws_dst.writer_key, ws_src.writer_key) AS writer_key"
            ),
            "metadata" => format!("COALESCE({w}.metadata, chg.metadata) AS metadata"),
            other => format!("{w}.{other} AS {other}"),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let ranked_columns = segment_columns
        .iter()
        .map(|column| format!("{c}.{column}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = String::new();
    if let Some(cte) = ancestry_cte(request) {
        sql.push_str(&cte);
        sql.push(' ');
    }
    sql.push_str(&format!(
        "SELECT {output} FROM (\
         SELECT {ranked_columns}, ROW_NUMBER() OVER (\
         PARTITION BY {c}.file_id, {c}.schema_key, {c}.entity_id, {c}.version_id \
         ORDER BY {c}.priority ASC, {c}.created_at DESC, \
         {c}.file_id, {c}.schema_key, {c}.entity_id, {c}.version_id, {c}.change_id\
         ) AS rn FROM ({segments}) AS {c}\
         ) AS {w}",
        segments = segments.join(" UNION ALL "),
    ));

    if needs_writer {
        let writer_table = quote_ident(&request.config.writer_table);
        for (alias, version_column) in [("ws_dst", "version_id"), ("ws_src", "inherited_from_version_id")] {
            sql.push_str(&format!(
                " LEFT JOIN {writer_table} AS {alias} \
                 ON {alias}.file_id = {w}.file_id \
                 AND {alias}.version_id = {w}.{version_column} \
                 AND {alias}.entity_id = {w}.entity_id \
                 AND {alias}.schema_key = {w}.schema_key"
            ));
        }
    }
    if needs_metadata {
        sql.push_str(&format!(
            " LEFT JOIN {} AS chg ON chg.id = {w}.change_id",
            quote_ident(&request.config.change_table)
        ));
    }
    sql.push_str(&format!(" WHERE {w}.rn = 1"));
    sql
}

/// `version_ancestry(version_id, ancestor_version_id, depth)` for plans that
/// need inherited rows.
fn ancestry_cte(request: &SegmentRequest<'_>) -> Option<String> {
    match request.plan {
        InheritancePlan::Pruned(_) => None,
        InheritancePlan::Inline { ancestor_pairs, .. } => {
            let mut depths: BTreeMap<&str, usize> = BTreeMap::new();
            let rows = ancestor_pairs
                .iter()
                .map(|(version_id, ancestor_id)| {
                    let depth = depths.entry(version_id.as_str()).or_insert(0);
                    *depth += 1;
                    format!(
                        "SELECT {}, {}, {depth}",
                        quote_literal(version_id),
                        quote_literal(ancestor_id)
                    )
                })
                .collect::<Vec<_>>()
                .join(" UNION ALL ");
            Some(format!(
                "WITH {ANCESTRY_RELATION}(version_id, ancestor_version_id, depth) AS ({rows})"
            ))
        }
        InheritancePlan::Recursive(version_ids) => {
            let seed_filter = if version_ids.is_empty() {
                String::new()
            } else {
                format!(
                    " AND vp.version_id IN ({})",
                    quote_literal_list(version_ids)
                )
            };
            Some(format!(
                "WITH RECURSIVE version_parent(version_id, parent_version_id) AS (\
                 SELECT json_extract(d.snapshot_content, '$.id'), \
                 json_extract(d.snapshot_content, '$.inherits_from_version_id') \
                 FROM {descriptor} AS d \
                 WHERE d.is_tombstone = 0 AND d.snapshot_content IS NOT NULL\
                 ), \
                 {ANCESTRY_RELATION}(version_id, ancestor_version_id, depth) AS (\
                 SELECT vp.version_id, vp.parent_version_id, 1 FROM version_parent AS vp \
                 WHERE vp.parent_version_id IS NOT NULL{seed_filter} \
                 UNION ALL \
                 SELECT va.version_id, vp.parent_version_id, va.depth + 1 \
                 FROM {ANCESTRY_RELATION} AS va \
                 JOIN version_parent AS vp ON vp.version_id = va.ancestor_version_id \
                 WHERE vp.parent_version_id IS NOT NULL AND va.depth < {max_depth}\
                 )",
                descriptor = quote_ident(&request.config.version_descriptor_table),
                max_depth = request.config.max_inheritance_depth,
            ))
        }
    }
}
