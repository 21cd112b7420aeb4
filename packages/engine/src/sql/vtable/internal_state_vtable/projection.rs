use std::collections::BTreeSet;
use std::ops::ControlFlow;

use sqlparser::ast::{
    Distinct, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, Ident,
    JoinConstraint, JoinOperator, ObjectName, ObjectNamePart, OrderBy, OrderByKind, Select,
    SelectItem, SelectItemQualifiedWildcardKind, TableFactor, TableWithJoins, Visit, Visitor,
};

use super::columns::{canonical_column, in_canonical_order, is_hidden_column, STATE_COLUMNS};

/// Logical columns one reference has to supply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectionAnalysis {
    /// Projected `(column, output alias)` pairs, `None` when every column is
    /// needed.
    pub selected_columns: Option<Vec<(String, Option<String>)>>,
    /// Explicitly requested internal columns.
    pub hidden_columns: BTreeSet<String>,
    /// Columns read outside the plain projection.
    pub support_columns: BTreeSet<String>,
}

impl ProjectionAnalysis {
    pub fn is_select_all(&self) -> bool {
        self.selected_columns.is_none()
    }

    /// Columns the rewritten fragment has to expose, in canonical order.
    pub fn required_columns(&self) -> Vec<&'static str> {
        let hidden = self.hidden_columns.iter().map(String::as_str);
        match &self.selected_columns {
            None => in_canonical_order(STATE_COLUMNS.iter().copied().chain(hidden)),
            Some(selected) => in_canonical_order(
                selected
                    .iter()
                    .map(|(column, _)| column.as_str())
                    .chain(self.support_columns.iter().map(String::as_str))
                    .chain(hidden),
            ),
        }
    }
}

/// Works out which logical columns the select reads from the reference
/// addressed by `qualifiers`.
pub fn analyze_projection(
    select: &Select,
    order_by: Option<&OrderBy>,
    qualifiers: &[String],
    allow_unqualified: bool,
) -> ProjectionAnalysis {
    let mut collector = ColumnCollector::new(qualifiers, allow_unqualified);
    let mut selected: Vec<(String, Option<String>)> = Vec::new();
    let mut select_all = false;

    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) => {
                select_all = true;
            }
            SelectItem::QualifiedWildcard(kind, _) => match kind {
                SelectItemQualifiedWildcardKind::ObjectName(name) => {
                    if qualifier_name_matches(name, qualifiers) {
                        select_all = true;
                    }
                }
                SelectItemQualifiedWildcardKind::Expr(expr) => {
                    collector.scan(expr);
                    collector.unresolvable = true;
                }
            },
            SelectItem::UnnamedExpr(expr) => {
                match direct_column(expr, qualifiers, allow_unqualified) {
                    Some(column) => push_selected(&mut selected, column, None),
                    None => collector.scan(expr),
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                match direct_column(expr, qualifiers, allow_unqualified) {
                    Some(column) => push_selected(&mut selected, column, Some(alias.value.clone())),
                    None => collector.scan(expr),
                }
            }
        }
    }

    if let Some(selection) = &select.selection {
        collector.scan(selection);
    }
    if let Some(having) = &select.having {
        collector.scan(having);
    }
    if let Some(qualify) = &select.qualify {
        collector.scan(qualify);
    }
    if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
        exprs.iter().for_each(|expr| collector.scan(expr));
    }
    if let Some(Distinct::On(exprs)) = &select.distinct {
        exprs.iter().for_each(|expr| collector.scan(expr));
    }
    for expr in select
        .cluster_by
        .iter()
        .chain(select.distribute_by.iter())
    {
        collector.scan(expr);
    }
    for order in &select.sort_by {
        collector.scan(&order.expr);
    }
    for window in &select.named_window {
        let _ = window.visit(&mut collector);
    }
    if let Some(order_by) = order_by {
        if let OrderByKind::Expressions(exprs) = &order_by.kind {
            for order in exprs {
                collector.scan(&order.expr);
            }
        }
    }
    for table in &select.from {
        scan_table_with_joins(table, &mut collector);
    }

    if select.prewhere.is_some() || select.connect_by.is_some() || !select.lateral_views.is_empty()
    {
        collector.unresolvable = true;
    }

    let hidden_columns = collector
        .columns
        .iter()
        .chain(selected.iter().map(|(column, _)| column))
        .filter(|column| is_hidden_column(column))
        .cloned()
        .collect::<BTreeSet<_>>();

    if select_all || collector.unresolvable {
        return ProjectionAnalysis {
            selected_columns: None,
            hidden_columns,
            support_columns: BTreeSet::new(),
        };
    }

    let support_columns = collector
        .columns
        .into_iter()
        .filter(|column| !is_hidden_column(column))
        .collect();
    ProjectionAnalysis {
        selected_columns: Some(selected),
        hidden_columns,
        support_columns,
    }
}

fn push_selected(selected: &mut Vec<(String, Option<String>)>, column: &str, alias: Option<String>) {
    let entry = (column.to_string(), alias);
    if !selected.contains(&entry) {
        selected.push(entry);
    }
}

/// A projection item that is just a column of the reference.
fn direct_column(expr: &Expr, qualifiers: &[String], allow_unqualified: bool) -> Option<&'static str> {
    match expr {
        Expr::Identifier(ident) if allow_unqualified => canonical_column(&ident.value),
        Expr::CompoundIdentifier(parts) if parts.len() == 2 => {
            ident_matches(&parts[0], qualifiers)
                .then(|| canonical_column(&parts[1].value))
                .flatten()
        }
        Expr::Nested(inner) => direct_column(inner, qualifiers, allow_unqualified),
        _ => None,
    }
}

fn scan_table_with_joins(table: &TableWithJoins, collector: &mut ColumnCollector<'_>) {
    scan_relation(&table.relation, collector);
    for join in &table.joins {
        scan_relation(&join.relation, collector);
        let constraint = match &join.join_operator {
            JoinOperator::Join(constraint)
            | JoinOperator::Inner(constraint)
            | JoinOperator::Left(constraint)
            | JoinOperator::LeftOuter(constraint)
            | JoinOperator::Right(constraint)
            | JoinOperator::RightOuter(constraint)
            | JoinOperator::FullOuter(constraint)
            | JoinOperator::CrossJoin(constraint)
            | JoinOperator::Semi(constraint)
            | JoinOperator::LeftSemi(constraint)
            | JoinOperator::RightSemi(constraint)
            | JoinOperator::Anti(constraint)
            | JoinOperator::LeftAnti(constraint)
            | JoinOperator::RightAnti(constraint)
            | JoinOperator::StraightJoin(constraint) => Some(constraint),
            JoinOperator::AsOf {
                match_condition,
                constraint,
            } => {
                collector.scan(match_condition);
                Some(constraint)
            }
            JoinOperator::CrossApply | JoinOperator::OuterApply => {
                collector.unresolvable = true;
                None
            }
        };
        match constraint {
            Some(JoinConstraint::On(expr)) => collector.scan(expr),
            Some(JoinConstraint::Using(names)) => {
                for name in names {
                    let column = name
                        .0
                        .last()
                        .and_then(ObjectNamePart::as_ident)
                        .and_then(|ident| canonical_column(&ident.value));
                    if let Some(column) = column {
                        collector.columns.insert(column.to_string());
                    }
                }
            }
            Some(JoinConstraint::Natural) => collector.unresolvable = true,
            Some(JoinConstraint::None) | None => {}
        }
    }
}

fn scan_relation(relation: &TableFactor, collector: &mut ColumnCollector<'_>) {
    match relation {
        TableFactor::Table { args, .. } => {
            if args.is_some() {
                collector.unresolvable = true;
            }
        }
        TableFactor::Derived { lateral, .. } => {
            if *lateral {
                collector.unresolvable = true;
            }
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => scan_table_with_joins(table_with_joins, collector),
        _ => collector.unresolvable = true,
    }
}

fn ident_matches(ident: &Ident, qualifiers: &[String]) -> bool {
    qualifiers
        .iter()
        .any(|qualifier| qualifier.eq_ignore_ascii_case(&ident.value))
}

fn qualifier_name_matches(name: &ObjectName, qualifiers: &[String]) -> bool {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .is_some_and(|ident| ident_matches(ident, qualifiers))
}

/// Collects logical columns referenced in expressions. Unqualified names are
/// always collected since they may resolve to the reference.
struct ColumnCollector<'a> {
    qualifiers: &'a [String],
    /// Unqualified internal column names only resolve to a reference that is
    /// the sole relation of its select.
    allow_unqualified: bool,
    columns: BTreeSet<String>,
    unresolvable: bool,
}

impl<'a> ColumnCollector<'a> {
    fn new(qualifiers: &'a [String], allow_unqualified: bool) -> Self {
        Self {
            qualifiers,
            allow_unqualified,
            columns: BTreeSet::new(),
            unresolvable: false,
        }
    }

    fn scan(&mut self, expr: &Expr) {
        let _ = expr.visit(self);
    }

    fn insert(&mut self, name: &str) {
        if let Some(column) = canonical_column(name) {
            self.columns.insert(column.to_string());
        }
    }
}

impl Visitor for ColumnCollector<'_> {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. } => {
                self.unresolvable = true;
            }
            Expr::Identifier(ident) => {
                if self.allow_unqualified || !is_hidden_column(&ident.value) {
                    self.insert(&ident.value);
                }
            }
            Expr::CompoundIdentifier(parts) => {
                if parts.len() > 2 && ident_matches(&parts[0], self.qualifiers) {
                    self.unresolvable = true;
                } else if parts.len() >= 2
                    && ident_matches(&parts[parts.len() - 2], self.qualifiers)
                {
                    self.insert(&parts[parts.len() - 1].value);
                }
            }
            Expr::QualifiedWildcard(name, _) => {
                if qualifier_name_matches(name, self.qualifiers) {
                    self.unresolvable = true;
                }
            }
            Expr::Function(function) => {
                if let FunctionArguments::List(list) = &function.args {
                    let wildcard_on_reference = list.args.iter().any(|arg| match arg {
                        FunctionArg::Unnamed(FunctionArgExpr::QualifiedWildcard(name))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::QualifiedWildcard(name),
                            ..
                        } => qualifier_name_matches(name, self.qualifiers),
                        _ => false,
                    });
                    if wildcard_on_reference {
                        self.unresolvable = true;
                    }
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}
