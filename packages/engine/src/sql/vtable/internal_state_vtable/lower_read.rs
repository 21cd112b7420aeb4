use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, GroupByExpr, JoinConstraint, JoinOperator, ObjectName, ObjectNamePart, OrderBy, Query,
    Select, SelectItem, SelectItemQualifiedWildcardKind, SetExpr, Statement, TableAlias,
    TableFactor, TableWithJoins, Visit, VisitMut, Visitor, VisitorMut, WildcardAdditionalOptions,
};

use super::columns::{FILE_ID, INHERITED_FROM_VERSION_ID, SCHEMA_KEY, VERSION_ID};
use super::context::{RewriteContext, StateTierSnapshot};
use super::inheritance::{plan_inheritance_with_resolution, InheritancePlan};
use super::predicates::{LiteralMatch, PredicateSummary, PushdownFilter};
use super::projection::{analyze_projection, ProjectionAnalysis};
use super::ranking::assemble_ranked_state;
use super::segments::SegmentRequest;
use super::trace::{ProjectionMode, RewriteTraceEntry, REWRITE_STEP};
use crate::errors;
use crate::sql::ast_utils::{
    default_alias, object_name_matches, parse_single_query, parse_single_statement,
    relation_alias_name,
};
use crate::sql::params::PlaceholderBindings;
use crate::LixError;

/// Rewrites every reference to the logical state table into a ranked union
/// over the physical tiers. `Ok(None)` when nothing references the table.
pub fn rewrite_vtable_selects(
    statement: &Statement,
    context: &RewriteContext<'_>,
) -> Result<Option<Statement>, LixError> {
    rewrite_statement(statement, context, None)
}

/// Rewrites only the references addressed as `alias`.
pub fn rewrite_vtable_reference(
    statement: &Statement,
    alias: &str,
    context: &RewriteContext<'_>,
) -> Result<Statement, LixError> {
    rewrite_statement(statement, context, Some(alias))?.ok_or_else(|| {
        errors::unknown_vtable_reference_error(alias, &context.config.logical_table)
    })
}

/// Parses, rewrites and renders one statement. Unchanged input is returned
/// as given.
pub fn rewrite_vtable_sql(sql: &str, context: &RewriteContext<'_>) -> Result<String, LixError> {
    let statement = parse_single_statement(sql)?;
    Ok(match rewrite_vtable_selects(&statement, context)? {
        Some(rewritten) => rewritten.to_string(),
        None => sql.to_string(),
    })
}

fn rewrite_statement(
    statement: &Statement,
    context: &RewriteContext<'_>,
    only_alias: Option<&str>,
) -> Result<Option<Statement>, LixError> {
    if !statement_mentions_relation(statement, &context.config.logical_table) {
        return Ok(None);
    }

    let mut rewriter = VtableRewriter {
        context,
        tiers: StateTierSnapshot::capture(context.tiers),
        placeholders: PlaceholderBindings::collect(statement, context.params),
        only_alias,
        selects_seen: 0,
    };
    let mut rewritten = statement.clone();
    let changed = rewriter.rewrite_nested_queries(&mut rewritten, &CteScope::default(), 0)?;
    Ok(changed.then_some(rewritten))
}

fn statement_mentions_relation(statement: &Statement, table: &str) -> bool {
    struct RelationFinder<'a> {
        table: &'a str,
    }

    impl Visitor for RelationFinder<'_> {
        type Break = ();

        fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<Self::Break> {
            if object_name_matches(relation, self.table) {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
    }

    Visit::visit(statement, &mut RelationFinder { table }).is_break()
}

/// CTE names visible at a point of the query, which shadow the logical table.
#[derive(Debug, Clone, Default)]
struct CteScope {
    names: BTreeSet<String>,
}

impl CteScope {
    fn shadow(&mut self, name: &str) {
        self.names.insert(name.to_ascii_lowercase());
    }

    fn resolves_to_logical(&self, name: &ObjectName, logical_table: &str) -> bool {
        if !object_name_matches(name, logical_table) {
            return false;
        }
        let unqualified = name.0.len() == 1;
        !(unqualified && self.names.contains(&logical_table.to_ascii_lowercase()))
    }
}

struct VtableRewriter<'c, 'a> {
    context: &'c RewriteContext<'a>,
    tiers: StateTierSnapshot,
    placeholders: PlaceholderBindings<'a>,
    only_alias: Option<&'c str>,
    selects_seen: usize,
}

/// Per-relation facts gathered from one select before it is rewritten.
struct RelationSlot {
    alias: Option<String>,
    kind: SlotKind,
    nullable: bool,
    on_predicates: Vec<Expr>,
}

enum SlotKind {
    Logical { table_name: String, alias_columns: bool },
    Derived { lateral: bool, alias_columns: bool },
    Table,
    Other,
}

enum SlotAction {
    Replace(Box<VtableFragment>),
    RewriteDerived(Option<PushdownFilter>),
    VisitNested,
    Keep,
}

/// The select a reference sits in.
#[derive(Clone, Copy)]
struct SelectSite<'s> {
    select: &'s Select,
    order_by: Option<&'s OrderBy>,
    allow_unqualified: bool,
    pushed: Option<&'s PushdownFilter>,
    location: &'s str,
}

/// Re-parsed replacement for one reference.
struct VtableFragment {
    query: Query,
    alias: TableAlias,
}

impl VtableFragment {
    fn into_table_factor(self) -> TableFactor {
        TableFactor::Derived {
            lateral: false,
            subquery: Box::new(self.query),
            alias: Some(self.alias),
        }
    }
}

struct ReferenceSummary {
    alias: String,
    projection: ProjectionAnalysis,
    schema_key: LiteralMatch,
}

impl VtableRewriter<'_, '_> {
    /// Rewrites every outermost query nested in `node`.
    fn rewrite_nested_queries<T: VisitMut>(
        &mut self,
        node: &mut T,
        scope: &CteScope,
        depth: usize,
    ) -> Result<bool, LixError> {
        let mut visitor = NestedQueryVisitor {
            rewriter: self,
            scope,
            depth,
            nesting: 0,
            changed: false,
        };
        if let ControlFlow::Break(error) = VisitMut::visit(node, &mut visitor) {
            return Err(error);
        }
        Ok(visitor.changed)
    }

    fn rewrite_query(
        &mut self,
        query: &mut Query,
        scope: &CteScope,
        pushed: Option<&PushdownFilter>,
        depth: usize,
    ) -> Result<bool, LixError> {
        let limit = self.context.config.max_query_depth;
        if depth > limit {
            return Err(errors::query_depth_exceeded_error(
                limit,
                &format!("select #{} (depth {depth})", self.selects_seen + 1),
            ));
        }

        let mut changed = false;
        let mut scope = scope.clone();
        if let Some(with) = query.with.as_mut() {
            if with.recursive {
                for cte in &with.cte_tables {
                    scope.shadow(&cte.alias.name.value);
                }
            }
            for cte in &mut with.cte_tables {
                changed |= self.rewrite_query(&mut cte.query, &scope, None, depth + 1)?;
                scope.shadow(&cte.alias.name.value);
            }
        }

        let pushed = pushed.filter(|_| {
            query.limit_clause.is_none()
                && query.fetch.is_none()
                && !query.order_by.as_ref().is_some_and(combines_rows)
        });
        changed |=
            self.rewrite_set_expr(&mut query.body, query.order_by.as_ref(), &scope, pushed, depth)?;
        changed |= self.rewrite_nested_queries(&mut query.order_by, &scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut query.limit_clause, &scope, depth)?;
        Ok(changed)
    }

    fn rewrite_set_expr(
        &mut self,
        body: &mut SetExpr,
        order_by: Option<&OrderBy>,
        scope: &CteScope,
        pushed: Option<&PushdownFilter>,
        depth: usize,
    ) -> Result<bool, LixError> {
        match body {
            SetExpr::Select(select) => self.rewrite_select(select, order_by, scope, pushed, depth),
            SetExpr::Query(query) => self.rewrite_query(query, scope, pushed, depth + 1),
            SetExpr::SetOperation { left, right, .. } => {
                let left_changed = self.rewrite_set_expr(left, None, scope, None, depth)?;
                let right_changed = self.rewrite_set_expr(right, None, scope, None, depth)?;
                Ok(left_changed || right_changed)
            }
            other => self.rewrite_nested_queries(other, scope, depth),
        }
    }

    fn rewrite_select(
        &mut self,
        select: &mut Select,
        order_by: Option<&OrderBy>,
        scope: &CteScope,
        pushed: Option<&PushdownFilter>,
        depth: usize,
    ) -> Result<bool, LixError> {
        self.selects_seen += 1;
        let location = format!("select #{}", self.selects_seen);
        let logical_table = self.context.config.logical_table.clone();

        let mut slots = Vec::new();
        for table in &select.from {
            collect_slots(table, false, scope, &logical_table, &mut slots);
        }
        let allow_unqualified = slots.len() == 1;
        let pushed_through = match pushed {
            Some(pushed) if allow_unqualified => passthrough_filter(select, pushed),
            _ => None,
        };

        let mut actions = Vec::with_capacity(slots.len());
        let mut references = Vec::new();
        for slot in &slots {
            let action = match &slot.kind {
                SlotKind::Logical {
                    table_name,
                    alias_columns,
                } => {
                    let alias = slot.alias.clone().unwrap_or_else(|| table_name.clone());
                    let selected = self
                        .only_alias
                        .map_or(true, |only| only.eq_ignore_ascii_case(&alias));
                    if selected {
                        let site = SelectSite {
                            select,
                            order_by,
                            allow_unqualified,
                            pushed: pushed_through.as_ref(),
                            location: &location,
                        };
                        let (fragment, summary) =
                            self.build_fragment(&site, slot, &alias, *alias_columns)?;
                        references.push(summary);
                        SlotAction::Replace(Box::new(fragment))
                    } else {
                        SlotAction::Keep
                    }
                }
                SlotKind::Derived {
                    lateral,
                    alias_columns,
                } => {
                    let filter = (!lateral && !alias_columns && slot.alias.is_some())
                        .then(|| {
                            self.local_filter(select, slot, allow_unqualified, pushed_through.as_ref())
                        })
                        .filter(|filter| !filter.is_empty());
                    SlotAction::RewriteDerived(filter)
                }
                SlotKind::Table => SlotAction::Keep,
                SlotKind::Other => SlotAction::VisitNested,
            };
            actions.push(action);
        }

        let mut changed = !references.is_empty();
        let mut actions = actions.into_iter();
        for table in &mut select.from {
            changed |= self.apply_actions(table, &mut actions, scope, depth)?;
        }

        changed |= self.rewrite_nested_queries(&mut select.projection, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.selection, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.prewhere, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.group_by, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.having, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.qualify, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.named_window, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.distinct, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.sort_by, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.cluster_by, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.distribute_by, scope, depth)?;
        changed |= self.rewrite_nested_queries(&mut select.connect_by, scope, depth)?;

        if !references.is_empty() {
            self.record_trace(&references);
        }
        Ok(changed)
    }

    fn build_fragment(
        &self,
        site: &SelectSite<'_>,
        slot: &RelationSlot,
        alias: &str,
        alias_columns: bool,
    ) -> Result<(VtableFragment, ReferenceSummary), LixError> {
        let SelectSite {
            select,
            order_by,
            allow_unqualified,
            pushed,
            location,
        } = *site;
        let config = self.context.config;
        let qualifiers = [alias.to_string()];
        let summary = self.predicate_summary(select, slot, &qualifiers, allow_unqualified);
        let mut filter = self.local_filter(select, slot, allow_unqualified, pushed);
        let mut projection = if alias_columns {
            ProjectionAnalysis::default()
        } else {
            analyze_projection(select, order_by, &qualifiers, allow_unqualified)
        };

        let inheritance = self.tiers.inheritance.as_ref();
        let plan = if config.enable_optimizations {
            plan_inheritance_with_resolution(
                &filter.version_ids,
                inheritance,
                filter.prune_inheritance,
                config.inheritance_resolution,
                config.max_inheritance_depth,
            )?
        } else {
            filter = PushdownFilter::default();
            projection.selected_columns = None;
            projection.support_columns.clear();
            match inheritance {
                Some(_) => InheritancePlan::Recursive(BTreeSet::new()),
                None => InheritancePlan::Pruned(BTreeSet::new()),
            }
        };

        let required_columns = projection.required_columns();
        let request = SegmentRequest {
            config,
            filter: &filter,
            required_columns: &required_columns,
            plan: &plan,
            open_transaction: self.tiers.open_transaction,
            cache_tables: &self.tiers.cache_tables,
        };
        let sql = assemble_ranked_state(&request);
        let query = parse_single_query(&sql).map_err(|error| {
            errors::invalid_sql_error(
                &format!("synthesized state fragment for `{alias}` at {location} does not parse"),
                error.message,
            )
        })?;

        let mode = if projection.is_select_all() {
            "selectAll"
        } else {
            "partial"
        };
        tracing::debug!(
            target: "lix_state_vtable",
            alias,
            location,
            projection = mode,
            plan = plan.kind(),
            schema_keys = filter.schema_keys.len(),
            "rewrote state vtable reference"
        );

        let table_alias = slot
            .alias
            .as_ref()
            .and_then(|_| original_alias(select, alias))
            .unwrap_or_else(|| TableAlias {
                explicit: true,
                ..default_alias(alias)
            });
        Ok((
            VtableFragment {
                query,
                alias: table_alias,
            },
            ReferenceSummary {
                alias: alias.to_string(),
                projection,
                schema_key: summary.schema_key,
            },
        ))
    }

    fn predicate_summary(
        &self,
        select: &Select,
        slot: &RelationSlot,
        qualifiers: &[String],
        allow_unqualified: bool,
    ) -> PredicateSummary {
        let where_summary = PredicateSummary::from_conjuncts(
            select.selection.iter(),
            qualifiers,
            &self.placeholders,
            allow_unqualified,
        );
        let on_summary = PredicateSummary::from_conjuncts(
            slot.on_predicates.iter(),
            qualifiers,
            &self.placeholders,
            allow_unqualified,
        );
        PredicateSummary {
            schema_key: where_summary.schema_key.and(on_summary.schema_key),
            file_id: where_summary.file_id.and(on_summary.file_id),
            version_id: where_summary.version_id.and(on_summary.version_id),
            inherited_is_null: where_summary.inherited_is_null || on_summary.inherited_is_null,
        }
    }

    /// Filter for one relation from WHERE, its own ON clause and whatever
    /// the enclosing query pushed through this select.
    fn local_filter(
        &self,
        select: &Select,
        slot: &RelationSlot,
        allow_unqualified: bool,
        pushed: Option<&PushdownFilter>,
    ) -> PushdownFilter {
        let Some(alias) = slot.alias.clone().or_else(|| match &slot.kind {
            SlotKind::Logical { table_name, .. } => Some(table_name.clone()),
            _ => None,
        }) else {
            return PushdownFilter::default();
        };
        let qualifiers = [alias];
        let where_filter = PredicateSummary::from_conjuncts(
            select.selection.iter(),
            &qualifiers,
            &self.placeholders,
            allow_unqualified,
        )
        .to_filter(!slot.nullable);
        let on_filter = PredicateSummary::from_conjuncts(
            slot.on_predicates.iter(),
            &qualifiers,
            &self.placeholders,
            allow_unqualified,
        )
        .to_filter(true);
        let filter = where_filter.merge(&on_filter);
        match pushed {
            Some(pushed) => filter.merge(pushed),
            None => filter,
        }
    }

    fn apply_actions(
        &mut self,
        table: &mut TableWithJoins,
        actions: &mut std::vec::IntoIter<SlotAction>,
        scope: &CteScope,
        depth: usize,
    ) -> Result<bool, LixError> {
        let mut changed = self.apply_relation(&mut table.relation, actions, scope, depth)?;
        for join in &mut table.joins {
            changed |= self.apply_relation(&mut join.relation, actions, scope, depth)?;
            changed |= self.rewrite_nested_queries(&mut join.join_operator, scope, depth)?;
        }
        Ok(changed)
    }

    fn apply_relation(
        &mut self,
        relation: &mut TableFactor,
        actions: &mut std::vec::IntoIter<SlotAction>,
        scope: &CteScope,
        depth: usize,
    ) -> Result<bool, LixError> {
        if let TableFactor::NestedJoin {
            table_with_joins, ..
        } = relation
        {
            return self.apply_actions(table_with_joins, actions, scope, depth);
        }
        match actions.next() {
            Some(SlotAction::Replace(fragment)) => {
                *relation = fragment.into_table_factor();
                Ok(true)
            }
            Some(SlotAction::RewriteDerived(filter)) => match relation {
                TableFactor::Derived { subquery, .. } => {
                    self.rewrite_query(subquery, scope, filter.as_ref(), depth + 1)
                }
                _ => Ok(false),
            },
            Some(SlotAction::VisitNested) => self.rewrite_nested_queries(relation, scope, depth),
            Some(SlotAction::Keep) | None => Ok(false),
        }
    }

    fn record_trace(&self, references: &[ReferenceSummary]) {
        let Some(sink) = self.context.trace else {
            return;
        };
        let select_all = references
            .iter()
            .any(|reference| reference.projection.is_select_all());
        let mut literals = BTreeSet::new();
        let mut predicates = 0;
        for reference in references {
            predicates += reference.schema_key.count;
            literals.extend(reference.schema_key.literals.iter().cloned());
        }
        let selected_columns = (!select_all).then(|| {
            let mut columns = Vec::new();
            for reference in references {
                for (column, _) in reference.projection.selected_columns.iter().flatten() {
                    if !columns.contains(column) {
                        columns.push(column.clone());
                    }
                }
            }
            columns
        });
        sink.record(RewriteTraceEntry {
            step: REWRITE_STEP,
            aliases: references
                .iter()
                .map(|reference| reference.alias.clone())
                .collect(),
            projection: if select_all {
                ProjectionMode::SelectAll
            } else {
                ProjectionMode::Partial
            },
            schema_key_predicates: predicates,
            schema_key_literals: literals.into_iter().collect(),
            selected_columns,
        });
    }
}

struct NestedQueryVisitor<'r, 'c, 'a> {
    rewriter: &'r mut VtableRewriter<'c, 'a>,
    scope: &'r CteScope,
    depth: usize,
    nesting: usize,
    changed: bool,
}

impl VisitorMut for NestedQueryVisitor<'_, '_, '_> {
    type Break = LixError;

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        if self.nesting == 0 {
            match self
                .rewriter
                .rewrite_query(query, self.scope, None, self.depth + 1)
            {
                Ok(changed) => self.changed |= changed,
                Err(error) => return ControlFlow::Break(error),
            }
        }
        self.nesting += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &mut Query) -> ControlFlow<Self::Break> {
        self.nesting = self.nesting.saturating_sub(1);
        ControlFlow::Continue(())
    }
}

fn collect_slots(
    table: &TableWithJoins,
    nullable: bool,
    scope: &CteScope,
    logical_table: &str,
    slots: &mut Vec<RelationSlot>,
) {
    let start = slots.len();
    collect_relation(&table.relation, nullable, Vec::new(), scope, logical_table, slots);
    for join in &table.joins {
        let (own_nullable, outer_nullable) = match &join.join_operator {
            JoinOperator::Left(_) | JoinOperator::LeftOuter(_) => (true, false),
            JoinOperator::Right(_) | JoinOperator::RightOuter(_) => (false, true),
            JoinOperator::FullOuter(_) => (true, true),
            JoinOperator::OuterApply => (true, false),
            _ => (false, false),
        };
        if outer_nullable {
            for slot in &mut slots[start..] {
                slot.nullable = true;
            }
        }
        let on_predicates = match &join.join_operator {
            JoinOperator::Join(JoinConstraint::On(expr))
            | JoinOperator::Inner(JoinConstraint::On(expr))
            | JoinOperator::Left(JoinConstraint::On(expr))
            | JoinOperator::LeftOuter(JoinConstraint::On(expr)) => vec![expr.clone()],
            _ => Vec::new(),
        };
        collect_relation(
            &join.relation,
            nullable || own_nullable,
            on_predicates,
            scope,
            logical_table,
            slots,
        );
    }
}

fn collect_relation(
    relation: &TableFactor,
    nullable: bool,
    on_predicates: Vec<Expr>,
    scope: &CteScope,
    logical_table: &str,
    slots: &mut Vec<RelationSlot>,
) {
    let kind = match relation {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_slots(table_with_joins, nullable, scope, logical_table, slots);
            return;
        }
        TableFactor::Table {
            name, args, alias, ..
        } => {
            if args.is_none() && scope.resolves_to_logical(name, logical_table) {
                SlotKind::Logical {
                    table_name: last_name_part(name).unwrap_or_else(|| logical_table.to_string()),
                    alias_columns: alias.as_ref().is_some_and(|alias| !alias.columns.is_empty()),
                }
            } else if args.is_some() {
                SlotKind::Other
            } else {
                SlotKind::Table
            }
        }
        TableFactor::Derived { lateral, alias, .. } => SlotKind::Derived {
            lateral: *lateral,
            alias_columns: alias.as_ref().is_some_and(|alias| !alias.columns.is_empty()),
        },
        _ => SlotKind::Other,
    };
    slots.push(RelationSlot {
        alias: explicit_alias(relation),
        kind,
        nullable,
        on_predicates,
    });
}

fn explicit_alias(relation: &TableFactor) -> Option<String> {
    match relation {
        TableFactor::Table { alias: None, .. } => None,
        other => relation_alias_name(other),
    }
}

fn last_name_part(name: &ObjectName) -> Option<String> {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.clone())
}

/// The alias node of the reference named `alias`, so quoting and column
/// lists survive the splice.
fn original_alias(select: &Select, alias: &str) -> Option<TableAlias> {
    fn find(table: &TableWithJoins, alias: &str) -> Option<TableAlias> {
        std::iter::once(&table.relation)
            .chain(table.joins.iter().map(|join| &join.relation))
            .find_map(|relation| match relation {
                TableFactor::Table {
                    alias: Some(found), ..
                } if found.name.value.eq_ignore_ascii_case(alias) => Some(found.clone()),
                TableFactor::NestedJoin {
                    table_with_joins, ..
                } => find(table_with_joins, alias),
                _ => None,
            })
    }
    select.from.iter().find_map(|table| find(table, alias))
}

/// Translates a filter on this select's output into a filter on its only
/// relation, keeping columns that pass through unchanged.
fn passthrough_filter(select: &Select, pushed: &PushdownFilter) -> Option<PushdownFilter> {
    if !select_is_filter_transparent(select) {
        return None;
    }
    let [table] = select.from.as_slice() else {
        return None;
    };
    if !table.joins.is_empty() {
        return None;
    }
    let relation_alias = relation_alias_name(&table.relation)?;
    let passes = |column: &str| column_passes_through(select, &relation_alias, column);

    let filter = PushdownFilter {
        schema_keys: if passes(SCHEMA_KEY) {
            pushed.schema_keys.clone()
        } else {
            BTreeSet::new()
        },
        file_ids: if passes(FILE_ID) {
            pushed.file_ids.clone()
        } else {
            BTreeSet::new()
        },
        version_ids: if passes(VERSION_ID) {
            pushed.version_ids.clone()
        } else {
            BTreeSet::new()
        },
        prune_inheritance: pushed.prune_inheritance && passes(INHERITED_FROM_VERSION_ID),
    };
    (!filter.is_empty()).then_some(filter)
}

fn select_is_filter_transparent(select: &Select) -> bool {
    let plain_group_by = matches!(
        &select.group_by,
        GroupByExpr::Expressions(exprs, modifiers) if exprs.is_empty() && modifiers.is_empty()
    );
    plain_group_by
        && select.distinct.is_none()
        && select.top.is_none()
        && select.exclude.is_none()
        && select.into.is_none()
        && select.value_table_mode.is_none()
        && select.having.is_none()
        && select.qualify.is_none()
        && select.named_window.is_empty()
        && select.lateral_views.is_empty()
        && select.prewhere.is_none()
        && select.connect_by.is_none()
        && select.sort_by.is_empty()
        && select.cluster_by.is_empty()
        && select.distribute_by.is_empty()
        && !select.projection.iter().any(combines_rows)
}

/// Aggregate functions that collapse a select without GROUP BY into one row.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "count",
    "sum",
    "total",
    "avg",
    "min",
    "max",
    "group_concat",
    "string_agg",
    "array_agg",
    "json_group_array",
    "json_group_object",
    "jsonb_group_array",
    "jsonb_group_object",
    "bool_and",
    "bool_or",
    "every",
    "median",
];

/// True when the node ranks or aggregates rows, so filtering its input is not
/// the same as filtering its output. `min`/`max` count even in their scalar
/// multi-argument form.
fn combines_rows<T: Visit>(node: &T) -> bool {
    struct CombineFinder;

    impl Visitor for CombineFinder {
        type Break = ();

        fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
            let Expr::Function(function) = expr else {
                return ControlFlow::Continue(());
            };
            let aggregate = last_name_part(&function.name).is_some_and(|name| {
                AGGREGATE_FUNCTIONS
                    .iter()
                    .any(|aggregate| aggregate.eq_ignore_ascii_case(&name))
            });
            if aggregate
                || function.over.is_some()
                || function.filter.is_some()
                || !function.within_group.is_empty()
            {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }
    }

    node.visit(&mut CombineFinder).is_break()
}

/// True when the select exposes `column` of `relation_alias` under the same
/// name, and nothing else under that name.
fn column_passes_through(select: &Select, relation_alias: &str, column: &str) -> bool {
    let mut passes = false;
    for item in &select.projection {
        let (expr, output_name) = match item {
            SelectItem::Wildcard(options) => {
                if *options != WildcardAdditionalOptions::default() {
                    return false;
                }
                passes = true;
                continue;
            }
            SelectItem::QualifiedWildcard(SelectItemQualifiedWildcardKind::ObjectName(name), options) => {
                let own = last_name_part(name)
                    .is_some_and(|name| name.eq_ignore_ascii_case(relation_alias));
                if own {
                    if *options != WildcardAdditionalOptions::default() {
                        return false;
                    }
                    passes = true;
                }
                continue;
            }
            SelectItem::QualifiedWildcard(SelectItemQualifiedWildcardKind::Expr(_), _) => {
                return false;
            }
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(alias.value.as_str())),
        };
        let source = match expr {
            Expr::Identifier(ident) => Some(ident.value.as_str()),
            Expr::CompoundIdentifier(parts)
                if parts.len() == 2 && parts[0].value.eq_ignore_ascii_case(relation_alias) =>
            {
                Some(parts[1].value.as_str())
            }
            _ => None,
        };
        let output = output_name.or(source);
        let names_column = output.is_some_and(|name| name.eq_ignore_ascii_case(column));
        if !names_column {
            continue;
        }
        if source.is_some_and(|name| name.eq_ignore_ascii_case(column)) {
            passes = true;
        } else {
            return false;
        }
    }
    passes
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::{rewrite_vtable_reference, rewrite_vtable_selects, rewrite_vtable_sql};
    use crate::errors::ErrorCode;
    use crate::sql::ast_utils::parse_single_statement;
    use crate::sql::vtable::internal_state_vtable::context::{
        InheritanceMap, RewriteContext, StateTierSnapshot,
    };
    use crate::sql::vtable::internal_state_vtable::trace::{ProjectionMode, RewriteTraceEntry};
    use crate::{Value, VtableRewriteConfig};

    fn compact_sql(sql: &str) -> String {
        sql.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn tiers() -> StateTierSnapshot {
        StateTierSnapshot {
            open_transaction: false,
            cache_tables: BTreeMap::from([
                (
                    "lix_key_value".to_string(),
                    "lix_internal_state_cache_v1_lix_key_value".to_string(),
                ),
                (
                    "lix_file_descriptor".to_string(),
                    "lix_internal_state_cache_v1_lix_file_descriptor".to_string(),
                ),
            ]),
            inheritance: None,
        }
    }

    fn rewrite_with(sql: &str, tiers: &StateTierSnapshot, params: &[Value]) -> Option<String> {
        let config = VtableRewriteConfig::default();
        let context = RewriteContext::new(tiers, &config).with_params(params);
        let statement = parse_single_statement(sql).expect("parse sql");
        rewrite_vtable_selects(&statement, &context)
            .expect("rewrite should succeed")
            .map(|statement| compact_sql(&statement.to_string()))
    }

    fn rewrite(sql: &str) -> String {
        rewrite_with(sql, &tiers(), &[]).expect("statement should be rewritten")
    }

    #[test]
    fn statements_without_references_are_unchanged() {
        assert_eq!(rewrite_with("SELECT * FROM other", &tiers(), &[]), None);
        assert_eq!(rewrite_with("SELECT 1", &tiers(), &[]), None);
    }

    #[test]
    fn rewrites_reference_with_schema_pushdown() {
        let sql = rewrite(
            "SELECT s.entity_id FROM lix_internal_state_vtable AS s WHERE s.schema_key = 'lix_key_value'",
        );
        assert!(!sql.contains("FROM lix_internal_state_vtable"));
        assert!(sql.contains("FROM \"lix_internal_state_cache_v1_lix_key_value\" AS s"));
        assert!(!sql.contains("lix_internal_state_cache_v1_lix_file_descriptor"));
        assert!(sql.contains("s.schema_key IN ('lix_key_value')"));
        assert!(sql.ends_with("AS s WHERE s.schema_key = 'lix_key_value'"));
        assert!(sql.contains("SELECT w.entity_id AS entity_id, w.schema_key AS schema_key FROM"));
    }

    #[test]
    fn unaliased_reference_keeps_table_name_as_alias() {
        let sql = rewrite("SELECT entity_id FROM lix_internal_state_vtable");
        assert!(sql.contains(") AS lix_internal_state_vtable"));
        assert!(sql.starts_with("SELECT entity_id FROM (SELECT w.entity_id AS entity_id FROM"));
    }

    #[test]
    fn rewriting_is_idempotent() {
        let once = rewrite("SELECT * FROM lix_internal_state_vtable AS s WHERE s.version_id = 'v'");
        assert_eq!(rewrite_with(&once, &tiers(), &[]), None);
    }

    #[test]
    fn cte_named_like_logical_table_shadows_it() {
        assert_eq!(
            rewrite_with(
                "WITH lix_internal_state_vtable AS (SELECT 1 AS entity_id) \
                 SELECT entity_id FROM lix_internal_state_vtable",
                &tiers(),
                &[]
            ),
            None
        );
        let sql = rewrite(
            "WITH lix_internal_state_vtable AS (SELECT 1 AS entity_id) \
             SELECT entity_id FROM main.lix_internal_state_vtable",
        );
        assert!(sql.contains("FROM (SELECT w.entity_id AS entity_id"));
    }

    #[test]
    fn rewrites_ctes_set_operations_and_subqueries() {
        let sql = rewrite(
            "WITH c AS (SELECT entity_id FROM lix_internal_state_vtable) \
             SELECT entity_id FROM c \
             WHERE entity_id IN (SELECT v.entity_id FROM lix_internal_state_vtable AS v) \
             UNION SELECT x.entity_id FROM lix_internal_state_vtable AS x",
        );
        assert!(!sql.contains("FROM lix_internal_state_vtable"));
        assert_eq!(sql.matches("ROW_NUMBER()").count(), 3);
    }

    #[test]
    fn pushes_predicates_into_transparent_derived_tables() {
        let sql = rewrite(
            "SELECT d.entity_id FROM (SELECT * FROM lix_internal_state_vtable) AS d \
             WHERE d.schema_key = 'lix_file_descriptor'",
        );
        assert!(sql.contains("s.schema_key IN ('lix_file_descriptor')"));
        assert!(!sql.contains("lix_internal_state_cache_v1_lix_key_value"));
    }

    #[test]
    fn does_not_push_through_limits_or_aggregates() {
        for sql in [
            "SELECT d.entity_id FROM (SELECT * FROM lix_internal_state_vtable LIMIT 5) AS d \
             WHERE d.schema_key = 'lix_file_descriptor'",
            "SELECT d.schema_key FROM (SELECT schema_key, count(*) AS n FROM lix_internal_state_vtable \
             GROUP BY schema_key) AS d WHERE d.schema_key = 'lix_file_descriptor'",
            "SELECT d.entity_id FROM (SELECT entity_id, file_id AS schema_key FROM lix_internal_state_vtable) AS d \
             WHERE d.schema_key = 'lix_file_descriptor'",
            "SELECT d.m, d.schema_key FROM (SELECT max(entity_id) AS m, schema_key \
             FROM lix_internal_state_vtable) AS d WHERE d.schema_key = 'lix_file_descriptor'",
            "SELECT d.n FROM (SELECT count(*) AS n, schema_key \
             FROM lix_internal_state_vtable) AS d WHERE d.schema_key = 'lix_file_descriptor'",
            "SELECT d.schema_key FROM (SELECT schema_key FROM lix_internal_state_vtable \
             ORDER BY max(entity_id)) AS d WHERE d.schema_key = 'lix_file_descriptor'",
        ] {
            let rewritten = rewrite(sql);
            assert!(
                rewritten.contains("lix_internal_state_cache_v1_lix_key_value"),
                "{sql}"
            );
        }
    }

    #[test]
    fn scalar_computed_columns_keep_pushdown() {
        let sql = rewrite(
            "SELECT d.u FROM (SELECT upper(entity_id) AS u, schema_key \
             FROM lix_internal_state_vtable) AS d WHERE d.schema_key = 'lix_file_descriptor'",
        );
        assert!(sql.contains("s.schema_key IN ('lix_file_descriptor')"));
        assert!(!sql.contains("lix_internal_state_cache_v1_lix_key_value"));
    }

    #[test]
    fn is_null_prune_skips_nullable_side() {
        let mut tiers = tiers();
        tiers.inheritance = Some(InheritanceMap::new());
        let inner = rewrite_with(
            "SELECT s.entity_id FROM lix_internal_state_vtable AS s \
             WHERE s.inherited_from_version_id IS NULL",
            &tiers,
            &[],
        )
        .expect("rewritten");
        assert!(!inner.contains("version_ancestry"));

        let outer = rewrite_with(
            "SELECT f.id, s.entity_id FROM files AS f \
             LEFT JOIN lix_internal_state_vtable AS s ON s.file_id = f.id \
             WHERE s.inherited_from_version_id IS NULL",
            &tiers,
            &[],
        )
        .expect("rewritten");
        assert!(outer.contains("version_ancestry"));
    }

    #[test]
    fn join_on_predicates_push_for_own_join_only() {
        let sql = rewrite(
            "SELECT f.id FROM files AS f \
             LEFT JOIN lix_internal_state_vtable AS s \
             ON s.file_id = f.id AND s.schema_key = 'lix_key_value'",
        );
        assert!(sql.contains("s.schema_key IN ('lix_key_value')"));

        let right = rewrite(
            "SELECT f.id FROM files AS f \
             RIGHT JOIN lix_internal_state_vtable AS s \
             ON s.schema_key = 'lix_key_value'",
        );
        assert!(right.contains("lix_internal_state_cache_v1_lix_file_descriptor"));
    }

    #[test]
    fn resolves_placeholders_for_pushdown() {
        let sql = rewrite_with(
            "SELECT s.entity_id FROM lix_internal_state_vtable AS s WHERE s.schema_key = ?",
            &tiers(),
            &[Value::Text("lix_key_value".to_string())],
        )
        .expect("rewritten");
        assert!(sql.contains("s.schema_key IN ('lix_key_value')"));
        assert!(sql.ends_with("WHERE s.schema_key = ?"));
    }

    #[test]
    fn records_trace_entries() {
        let config = VtableRewriteConfig::default();
        let tiers = tiers();
        let sink: RefCell<Vec<RewriteTraceEntry>> = RefCell::new(Vec::new());
        let context = RewriteContext::new(&tiers, &config).with_trace(&sink);
        let statement = parse_single_statement(
            "SELECT s.entity_id, s.snapshot_content FROM lix_internal_state_vtable AS s \
             WHERE s.schema_key IN ('lix_key_value', 'lix_file_descriptor')",
        )
        .expect("parse sql");
        rewrite_vtable_selects(&statement, &context).expect("rewrite should succeed");

        let entries = sink.borrow();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.aliases, vec!["s".to_string()]);
        assert_eq!(entry.projection, ProjectionMode::Partial);
        assert_eq!(entry.schema_key_predicates, 1);
        assert_eq!(
            entry.schema_key_literals,
            vec!["lix_file_descriptor".to_string(), "lix_key_value".to_string()]
        );
        assert_eq!(
            entry.selected_columns,
            Some(vec!["entity_id".to_string(), "snapshot_content".to_string()])
        );
    }

    #[test]
    fn reference_api_rejects_unknown_alias() {
        let config = VtableRewriteConfig::default();
        let tiers = tiers();
        let context = RewriteContext::new(&tiers, &config);
        let statement = parse_single_statement(
            "SELECT * FROM lix_internal_state_vtable AS a JOIN lix_internal_state_vtable AS b ON 1 = 1",
        )
        .expect("parse sql");

        let rewritten = rewrite_vtable_reference(&statement, "b", &context)
            .expect("known alias should rewrite");
        let sql = compact_sql(&rewritten.to_string());
        assert!(sql.contains("FROM lix_internal_state_vtable AS a JOIN (SELECT"));

        let error = rewrite_vtable_reference(&statement, "zzz", &context)
            .expect_err("unknown alias should fail");
        assert_eq!(error.code, ErrorCode::UnknownVtableReference);
        assert!(error.message.contains("zzz"));
    }

    #[test]
    fn nesting_beyond_limit_is_rejected() {
        let config = VtableRewriteConfig {
            max_query_depth: 2,
            ..VtableRewriteConfig::default()
        };
        let tiers = tiers();
        let context = RewriteContext::new(&tiers, &config);
        let statement = parse_single_statement(
            "SELECT * FROM (SELECT * FROM (SELECT * FROM lix_internal_state_vtable) AS a) AS b",
        )
        .expect("parse sql");
        let error = rewrite_vtable_selects(&statement, &context).expect_err("too deep");
        assert_eq!(error.code, ErrorCode::QueryDepthExceeded);
    }

    #[test]
    fn sql_api_round_trips_text() {
        let config = VtableRewriteConfig::default();
        let tiers = tiers();
        let context = RewriteContext::new(&tiers, &config);
        assert_eq!(
            rewrite_vtable_sql("SELECT 1 FROM other", &context).expect("rewrite"),
            "SELECT 1 FROM other"
        );
        let rewritten =
            rewrite_vtable_sql("SELECT * FROM lix_internal_state_vtable", &context).expect("rewrite");
        assert!(rewritten.contains("ROW_NUMBER()"));

        let error = rewrite_vtable_sql("SELEC broken", &context).expect_err("bad sql");
        assert_eq!(error.code, ErrorCode::InvalidSql);
    }
}
