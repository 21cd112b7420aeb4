use crate::LixError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorCode {
    UnknownVtableReference,
    InheritanceCycle,
    InheritanceUnresolved,
    QueryDepthExceeded,
    InvalidSql,
    InvalidConfig,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownVtableReference => "LIX_ERROR_UNKNOWN_VTABLE_REFERENCE",
            Self::InheritanceCycle => "LIX_ERROR_INHERITANCE_CYCLE",
            Self::InheritanceUnresolved => "LIX_ERROR_INHERITANCE_UNRESOLVED",
            Self::QueryDepthExceeded => "LIX_ERROR_QUERY_DEPTH_EXCEEDED",
            Self::InvalidSql => "LIX_ERROR_INVALID_SQL",
            Self::InvalidConfig => "LIX_ERROR_INVALID_CONFIG",
        }
    }

    pub const fn all() -> &'static [Self] {
        &[
            Self::UnknownVtableReference,
            Self::InheritanceCycle,
            Self::InheritanceUnresolved,
            Self::QueryDepthExceeded,
            Self::InvalidSql,
            Self::InvalidConfig,
        ]
    }
}

pub(crate) fn unknown_vtable_reference_error(alias: &str, logical_table: &str) -> LixError {
    LixError::new(
        ErrorCode::UnknownVtableReference,
        format!(
            "`{alias}` does not reference `{logical_table}` anywhere in the statement. \
             Only relations reading `{logical_table}` can be rewritten."
        ),
    )
}

pub(crate) fn inheritance_cycle_error(version_id: &str, ancestor_id: &str) -> LixError {
    LixError::new(
        ErrorCode::InheritanceCycle,
        format!(
            "version `{version_id}` revisits ancestor `{ancestor_id}` in its inheritance chain; \
             inline inheritance resolution requires acyclic chains"
        ),
    )
}

pub(crate) fn inheritance_unresolved_error(version_id: &str, missing_id: &str) -> LixError {
    LixError::new(
        ErrorCode::InheritanceUnresolved,
        format!(
            "inheritance chain of version `{version_id}` references `{missing_id}`, \
             which is missing from the inheritance map"
        ),
    )
}

pub(crate) fn query_depth_exceeded_error(limit: usize, location: &str) -> LixError {
    LixError::new(
        ErrorCode::QueryDepthExceeded,
        format!("query nesting exceeds the limit of {limit} levels at {location}"),
    )
}

pub(crate) fn invalid_sql_error(context: &str, detail: impl std::fmt::Display) -> LixError {
    LixError::new(ErrorCode::InvalidSql, format!("{context}: {detail}"))
}

pub(crate) fn invalid_config_error(detail: impl std::fmt::Display) -> LixError {
    LixError::new(
        ErrorCode::InvalidConfig,
        format!("invalid state vtable rewrite config: {detail}"),
    )
}
