mod config;
mod error;
pub mod errors;
mod sql;
mod types;

pub use config::{InheritanceResolution, VtableRewriteConfig};
pub use error::LixError;
pub use errors::ErrorCode;
pub use sql::vtable::internal_state_vtable::{
    analyze_projection, assemble_ranked_state, build_segment, build_segments,
    expr_has_is_null_predicate, extract_column_literals, plan_inheritance,
    plan_inheritance_with_resolution, rewrite_vtable_reference, rewrite_vtable_selects,
    rewrite_vtable_sql, InheritanceMap, InheritancePlan, LiteralMatch, PredicateSummary,
    ProjectionAnalysis, ProjectionMode, PushdownFilter, RewriteContext, RewriteTraceEntry,
    RewriteTraceSink, SegmentRequest, SegmentSource, StateTierProvider, StateTierSnapshot,
    StorageTier, VersionDescriptor, DEFAULT_MAX_INHERITANCE_DEPTH, REWRITE_STEP,
};
pub use sql::PlaceholderBindings;
pub use types::Value;
