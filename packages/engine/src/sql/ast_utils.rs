use sqlparser::ast::{Ident, ObjectName, ObjectNamePart, Query, Statement, TableAlias, TableFactor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::errors;
use crate::LixError;

pub(crate) fn object_name_matches(name: &ObjectName, target: &str) -> bool {
    name.0
        .last()
        .and_then(ObjectNamePart::as_ident)
        .map(|ident| ident.value.eq_ignore_ascii_case(target))
        .unwrap_or(false)
}

pub(crate) fn default_alias(name: &str) -> TableAlias {
    TableAlias {
        explicit: false,
        name: Ident::new(name),
        columns: Vec::new(),
    }
}

/// Name the relation is addressed by in the enclosing select: its alias, or
/// the unqualified table name.
pub(crate) fn relation_alias_name(relation: &TableFactor) -> Option<String> {
    match relation {
        TableFactor::Table { name, alias, .. } => match alias {
            Some(alias) => Some(alias.name.value.clone()),
            None => name
                .0
                .last()
                .and_then(ObjectNamePart::as_ident)
                .map(|ident| ident.value.clone()),
        },
        TableFactor::Derived { alias, .. }
        | TableFactor::TableFunction { alias, .. }
        | TableFactor::Function { alias, .. }
        | TableFactor::UNNEST { alias, .. }
        | TableFactor::NestedJoin { alias, .. } => {
            alias.as_ref().map(|alias| alias.name.value.clone())
        }
        _ => None,
    }
}

pub(crate) fn parse_single_statement(sql: &str) -> Result<Statement, LixError> {
    let mut statements = Parser::parse_sql(&GenericDialect {}, sql)
        .map_err(|error| errors::invalid_sql_error("failed to parse SQL", error))?;
    if statements.len() != 1 {
        return Err(errors::invalid_sql_error(
            "expected a single statement",
            format!("found {}", statements.len()),
        ));
    }
    Ok(statements.remove(0))
}

pub(crate) fn parse_single_query(sql: &str) -> Result<Query, LixError> {
    match parse_single_statement(sql)? {
        Statement::Query(query) => Ok(*query),
        other => Err(errors::invalid_sql_error(
            "expected SELECT statement",
            other.to_string(),
        )),
    }
}
