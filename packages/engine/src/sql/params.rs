use std::collections::BTreeMap;
use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Value as SqlValue, ValueWithSpan, Visit, Visitor};

use crate::errors;
use crate::{LixError, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PlaceholderState {
    next_ordinal: usize,
}

impl PlaceholderState {
    pub(crate) fn new() -> Self {
        Self { next_ordinal: 0 }
    }
}

pub(crate) fn resolve_placeholder_index(
    token: &str,
    params_len: usize,
    state: &mut PlaceholderState,
) -> Result<usize, LixError> {
    let trimmed = token.trim();

    let source_index = if trimmed.is_empty() || trimmed == "?" {
        let source_index = state.next_ordinal;
        state.next_ordinal += 1;
        source_index
    } else if let Some(numeric) = trimmed.strip_prefix('?') {
        let parsed = parse_1_based_index(trimmed, numeric)?;
        state.next_ordinal = state.next_ordinal.max(parsed);
        parsed - 1
    } else if let Some(numeric) = trimmed.strip_prefix('$') {
        let parsed = parse_1_based_index(trimmed, numeric)?;
        state.next_ordinal = state.next_ordinal.max(parsed);
        parsed - 1
    } else {
        return Err(errors::invalid_sql_error(
            "unsupported SQL placeholder format",
            trimmed,
        ));
    };

    if source_index >= params_len {
        return Err(errors::invalid_sql_error(
            "placeholder out of range",
            format!(
                "'{trimmed}' references parameter {} but only {params_len} parameters were provided",
                source_index + 1
            ),
        ));
    }

    Ok(source_index)
}

fn parse_1_based_index(token: &str, numeric: &str) -> Result<usize, LixError> {
    let parsed = numeric
        .parse::<usize>()
        .map_err(|_| errors::invalid_sql_error("invalid SQL placeholder", token))?;
    if parsed == 0 {
        return Err(errors::invalid_sql_error("invalid SQL placeholder", token));
    }
    Ok(parsed)
}

type SourceLocation = (u64, u64);

/// Positional parameters bound to the placeholders of one statement.
///
/// Anonymous `?` placeholders take their ordinal from their position in the
/// source text, so they are keyed by span. When the parser did not record
/// distinct spans the anonymous ones cannot be ordered and stay unresolved;
/// `?N` and `$N` resolve on their own.
#[derive(Debug, Clone)]
pub struct PlaceholderBindings<'a> {
    params: &'a [Value],
    by_location: BTreeMap<SourceLocation, Option<usize>>,
    spans_reliable: bool,
}

impl<'a> PlaceholderBindings<'a> {
    pub fn collect<T: Visit>(node: &T, params: &'a [Value]) -> Self {
        let mut collector = PlaceholderCollector::default();
        let _ = node.visit(&mut collector);

        let mut locations = collector.found;
        locations.sort_by(|left, right| left.0.cmp(&right.0));
        let spans_reliable = locations
            .windows(2)
            .all(|pair| pair[0].0 != pair[1].0)
            && locations.iter().all(|(location, _)| *location != (0, 0));

        let mut state = PlaceholderState::new();
        let mut by_location = BTreeMap::new();
        if spans_reliable {
            for (location, token) in locations {
                let index = resolve_placeholder_index(&token, params.len(), &mut state).ok();
                by_location.insert(location, index);
            }
        }

        Self {
            params,
            by_location,
            spans_reliable,
        }
    }

    pub fn empty(params: &'a [Value]) -> Self {
        Self {
            params,
            by_location: BTreeMap::new(),
            spans_reliable: false,
        }
    }

    /// Parameter bound to a placeholder, if it can be determined.
    pub fn value(&self, placeholder: &ValueWithSpan) -> Option<&'a Value> {
        let SqlValue::Placeholder(token) = &placeholder.value else {
            return None;
        };
        let trimmed = token.trim();
        let index = if trimmed.is_empty() || trimmed == "?" {
            if !self.spans_reliable {
                return None;
            }
            let start = placeholder.span.start;
            (*self.by_location.get(&(start.line, start.column))?)?
        } else {
            let mut state = PlaceholderState::new();
            resolve_placeholder_index(trimmed, self.params.len(), &mut state).ok()?
        };
        self.params.get(index)
    }

    /// Key-column text of the bound parameter. Only text and integer
    /// parameters compare against key columns.
    pub fn key_text(&self, placeholder: &ValueWithSpan) -> Option<String> {
        self.value(placeholder).and_then(Value::as_key_text)
    }
}

#[derive(Default)]
struct PlaceholderCollector {
    found: Vec<(SourceLocation, String)>,
}

impl Visitor for PlaceholderCollector {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if let Expr::Value(ValueWithSpan {
            value: SqlValue::Placeholder(token),
            span,
        }) = expr
        {
            self.found
                .push(((span.start.line, span.start.column), token.clone()));
        }
        ControlFlow::Continue(())
    }
}
