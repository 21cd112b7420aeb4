use std::cell::RefCell;
use std::sync::Mutex;

use serde::Serialize;

pub const REWRITE_STEP: &str = "rewrite_vtable_selects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProjectionMode {
    #[serde(rename = "selectAll")]
    SelectAll,
    #[serde(rename = "partial")]
    Partial,
}

/// One entry per rewritten select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteTraceEntry {
    pub step: &'static str,
    pub aliases: Vec<String>,
    pub projection: ProjectionMode,
    pub schema_key_predicates: usize,
    pub schema_key_literals: Vec<String>,
    pub selected_columns: Option<Vec<String>>,
}

impl RewriteTraceEntry {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Receives trace entries. Rewrites never read back from the sink.
pub trait RewriteTraceSink {
    fn record(&self, entry: RewriteTraceEntry);
}

impl RewriteTraceSink for RefCell<Vec<RewriteTraceEntry>> {
    fn record(&self, entry: RewriteTraceEntry) {
        self.borrow_mut().push(entry);
    }
}

impl RewriteTraceSink for Mutex<Vec<RewriteTraceEntry>> {
    fn record(&self, entry: RewriteTraceEntry) {
        match self.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::sync::Mutex;

    use serde_json::json;

    use super::{ProjectionMode, RewriteTraceEntry, RewriteTraceSink, REWRITE_STEP};

    fn entry(selected: Option<Vec<String>>) -> RewriteTraceEntry {
        RewriteTraceEntry {
            step: REWRITE_STEP,
            aliases: vec!["s".to_string()],
            projection: if selected.is_some() {
                ProjectionMode::Partial
            } else {
                ProjectionMode::SelectAll
            },
            schema_key_predicates: 1,
            schema_key_literals: vec!["lix_key_value".to_string()],
            selected_columns: selected,
        }
    }

    #[test]
    fn serializes_entry_shape() {
        assert_eq!(
            entry(None).to_json(),
            json!({
                "step": "rewrite_vtable_selects",
                "aliases": ["s"],
                "projection": "selectAll",
                "schema_key_predicates": 1,
                "schema_key_literals": ["lix_key_value"],
                "selected_columns": null,
            })
        );
        assert_eq!(
            entry(Some(vec!["entity_id".to_string()])).to_json()["projection"],
            json!("partial")
        );
    }

    #[test]
    fn sinks_collect_entries() {
        let cell = RefCell::new(Vec::new());
        cell.record(entry(None));
        assert_eq!(cell.borrow().len(), 1);

        let mutex = Mutex::new(Vec::new());
        mutex.record(entry(None));
        mutex.record(entry(None));
        assert_eq!(mutex.lock().map(|entries| entries.len()).unwrap_or(0), 2);
    }
}
