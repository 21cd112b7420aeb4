pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_sql_string(value))
}

pub(crate) fn quote_ident(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Renders `'a', 'b'` for an `IN (...)` list.
pub(crate) fn quote_literal_list<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(|value| quote_literal(value))
        .collect::<Vec<_>>()
        .join(", ")
}
