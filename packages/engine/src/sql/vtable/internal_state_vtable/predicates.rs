use std::collections::BTreeSet;

use sqlparser::ast::{BinaryOperator, Expr, UnaryOperator, Value as SqlValue, ValueWithSpan};

use super::columns::{FILE_ID, INHERITED_FROM_VERSION_ID, SCHEMA_KEY, VERSION_ID};
use crate::sql::params::PlaceholderBindings;

/// Literals a predicate compares one logical column against.
///
/// `count` is the number of contributing comparisons. `exact` means every row
/// satisfying the predicate has the column in `literals`, so the set can
/// filter a tier scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralMatch {
    pub count: usize,
    pub literals: BTreeSet<String>,
    pub exact: bool,
}

impl Default for LiteralMatch {
    fn default() -> Self {
        Self {
            count: 0,
            literals: BTreeSet::new(),
            exact: true,
        }
    }
}

impl LiteralMatch {
    fn single(literal: String) -> Self {
        Self {
            count: 1,
            literals: BTreeSet::from([literal]),
            exact: true,
        }
    }

    pub fn is_match(&self) -> bool {
        self.count > 0
    }

    /// Literal set usable as an equality filter.
    pub fn filter_literals(&self) -> Option<&BTreeSet<String>> {
        (self.count > 0 && self.exact && !self.literals.is_empty()).then_some(&self.literals)
    }

    /// Both sides hold, so either exact side bounds the column on its own.
    pub fn and(self, other: Self) -> Self {
        if !self.is_match() {
            return other;
        }
        if !other.is_match() {
            return self;
        }
        let count = self.count + other.count;
        match (self.exact, other.exact) {
            (true, false) => Self { count, ..self },
            (false, true) => Self { count, ..other },
            (exact, _) => {
                let mut literals = self.literals;
                literals.extend(other.literals);
                Self {
                    count,
                    literals,
                    exact,
                }
            }
        }
    }

    /// Either side may hold; only a match on both sides bounds the column.
    pub fn or(self, other: Self) -> Self {
        if !self.is_match() || !other.is_match() {
            return Self::default();
        }
        let mut literals = self.literals;
        literals.extend(other.literals);
        Self {
            count: self.count + other.count,
            literals,
            exact: self.exact && other.exact,
        }
    }
}

/// Extracts the literals `column` is compared against, for references
/// qualified by one of `qualifiers` (or unqualified when allowed).
pub fn extract_column_literals(
    expr: &Expr,
    qualifiers: &[String],
    placeholders: &PlaceholderBindings<'_>,
    column: &str,
    allow_unqualified: bool,
) -> LiteralMatch {
    let target = ColumnTarget {
        qualifiers,
        column,
        allow_unqualified,
    };
    extract_literals(expr, &target, placeholders)
}

/// True when the predicate requires `column IS NULL` in every satisfying row.
pub fn expr_has_is_null_predicate(
    expr: &Expr,
    qualifiers: &[String],
    column: &str,
    allow_unqualified: bool,
) -> bool {
    let target = ColumnTarget {
        qualifiers,
        column,
        allow_unqualified,
    };
    has_is_null(expr, &target)
}

struct ColumnTarget<'a> {
    qualifiers: &'a [String],
    column: &'a str,
    allow_unqualified: bool,
}

impl ColumnTarget<'_> {
    fn matches(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Identifier(ident) => {
                self.allow_unqualified && ident.value.eq_ignore_ascii_case(self.column)
            }
            Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
                let qualifier = &parts[parts.len() - 2].value;
                let column = &parts[parts.len() - 1].value;
                column.eq_ignore_ascii_case(self.column)
                    && self
                        .qualifiers
                        .iter()
                        .any(|candidate| candidate.eq_ignore_ascii_case(qualifier))
            }
            Expr::Nested(inner) => self.matches(inner),
            _ => false,
        }
    }
}

fn extract_literals(
    expr: &Expr,
    target: &ColumnTarget<'_>,
    placeholders: &PlaceholderBindings<'_>,
) -> LiteralMatch {
    match expr {
        Expr::Nested(inner) => extract_literals(inner, target, placeholders),
        Expr::UnaryOp {
            op: UnaryOperator::Plus | UnaryOperator::Minus,
            expr: inner,
        } => extract_literals(inner, target, placeholders),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => extract_literals(left, target, placeholders)
            .and(extract_literals(right, target, placeholders)),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Or,
            right,
        } => extract_literals(left, target, placeholders)
            .or(extract_literals(right, target, placeholders)),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        }
        | Expr::IsNotDistinctFrom(left, right) => {
            comparison_literal(left, right, target, placeholders)
        }
        Expr::InList {
            expr: inner,
            list,
            negated: false,
        } => {
            if !target.matches(inner) {
                return LiteralMatch::default();
            }
            let mut literals = BTreeSet::new();
            for item in list {
                match literal_text(item, placeholders) {
                    Some(literal) => {
                        literals.insert(literal);
                    }
                    None => return LiteralMatch::default(),
                }
            }
            LiteralMatch {
                count: 1,
                literals,
                exact: true,
            }
        }
        Expr::Between {
            expr: inner,
            negated: false,
            low,
            high,
        } => {
            if !target.matches(inner) {
                return LiteralMatch::default();
            }
            let (Some(low), Some(high)) = (
                literal_text(low, placeholders),
                literal_text(high, placeholders),
            ) else {
                return LiteralMatch::default();
            };
            LiteralMatch {
                count: 1,
                literals: BTreeSet::from([low, high]),
                exact: false,
            }
        }
        _ => LiteralMatch::default(),
    }
}

fn comparison_literal(
    left: &Expr,
    right: &Expr,
    target: &ColumnTarget<'_>,
    placeholders: &PlaceholderBindings<'_>,
) -> LiteralMatch {
    let literal = if target.matches(left) {
        literal_text(right, placeholders)
    } else if target.matches(right) {
        literal_text(left, placeholders)
    } else {
        None
    };
    literal.map(LiteralMatch::single).unwrap_or_default()
}

fn literal_text(expr: &Expr, placeholders: &PlaceholderBindings<'_>) -> Option<String> {
    match expr {
        Expr::Nested(inner) => literal_text(inner, placeholders),
        Expr::Value(value) => value_text(value, placeholders),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            Expr::Value(ValueWithSpan {
                value: SqlValue::Number(number, _),
                ..
            }) => integer_text(format!("-{number}")),
            _ => None,
        },
        _ => None,
    }
}

fn value_text(value: &ValueWithSpan, placeholders: &PlaceholderBindings<'_>) -> Option<String> {
    match &value.value {
        SqlValue::SingleQuotedString(text) => Some(text.clone()),
        SqlValue::Number(number, _) => integer_text(number.clone()),
        SqlValue::Placeholder(_) => placeholders.key_text(value),
        _ => None,
    }
}

/// Numeric literals only push down when the stored text of the compared value
/// is the literal itself: `1.50` and `01` compare as `1.5` and `1`.
fn integer_text(number: String) -> Option<String> {
    let canonical = number.parse::<i64>().ok()?.to_string();
    (canonical == number).then_some(number)
}

fn has_is_null(expr: &Expr, target: &ColumnTarget<'_>) -> bool {
    match expr {
        Expr::IsNull(inner) => target.matches(inner),
        Expr::Nested(inner) => has_is_null(inner, target),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => has_is_null(left, target) || has_is_null(right, target),
        _ => false,
    }
}

/// Key-column literals every row of one reference must match, plus whether
/// inherited rows can be skipped. Empty sets mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushdownFilter {
    pub schema_keys: BTreeSet<String>,
    pub file_ids: BTreeSet<String>,
    pub version_ids: BTreeSet<String>,
    pub prune_inheritance: bool,
}

impl PushdownFilter {
    pub fn is_empty(&self) -> bool {
        self.schema_keys.is_empty()
            && self.file_ids.is_empty()
            && self.version_ids.is_empty()
            && !self.prune_inheritance
    }

    /// Combines filters from predicates that all hold. A side without a filter
    /// on a column defers to the other side; two filters are unioned.
    pub fn merge(mut self, other: &Self) -> Self {
        merge_literal_sets(&mut self.schema_keys, &other.schema_keys);
        merge_literal_sets(&mut self.file_ids, &other.file_ids);
        merge_literal_sets(&mut self.version_ids, &other.version_ids);
        self.prune_inheritance |= other.prune_inheritance;
        self
    }
}

fn merge_literal_sets(target: &mut BTreeSet<String>, other: &BTreeSet<String>) {
    if target.is_empty() {
        target.clone_from(other);
    } else if !other.is_empty() {
        target.extend(other.iter().cloned());
    }
}

/// What a set of conjunctive predicates says about one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateSummary {
    pub schema_key: LiteralMatch,
    pub file_id: LiteralMatch,
    pub version_id: LiteralMatch,
    pub inherited_is_null: bool,
}

impl PredicateSummary {
    pub fn from_conjuncts<'e>(
        predicates: impl IntoIterator<Item = &'e Expr>,
        qualifiers: &[String],
        placeholders: &PlaceholderBindings<'_>,
        allow_unqualified: bool,
    ) -> Self {
        let mut summary = Self::default();
        for predicate in predicates {
            let extract = |column| {
                extract_column_literals(
                    predicate,
                    qualifiers,
                    placeholders,
                    column,
                    allow_unqualified,
                )
            };
            summary.schema_key = std::mem::take(&mut summary.schema_key).and(extract(SCHEMA_KEY));
            summary.file_id = std::mem::take(&mut summary.file_id).and(extract(FILE_ID));
            summary.version_id = std::mem::take(&mut summary.version_id).and(extract(VERSION_ID));
            summary.inherited_is_null |= expr_has_is_null_predicate(
                predicate,
                qualifiers,
                INHERITED_FROM_VERSION_ID,
                allow_unqualified,
            );
        }
        summary
    }

    pub fn to_filter(&self, allow_prune: bool) -> PushdownFilter {
        let literals = |literal_match: &LiteralMatch| {
            literal_match.filter_literals().cloned().unwrap_or_default()
        };
        PushdownFilter {
            schema_keys: literals(&self.schema_key),
            file_ids: literals(&self.file_id),
            version_ids: literals(&self.version_id),
            prune_inheritance: allow_prune && self.inherited_is_null,
        }
    }
}
