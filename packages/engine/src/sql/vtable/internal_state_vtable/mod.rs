mod columns;
mod context;
mod inheritance;
mod lower_read;
mod predicates;
mod projection;
mod ranking;
mod segments;
mod trace;

pub use context::{
    InheritanceMap, RewriteContext, StateTierProvider, StateTierSnapshot, VersionDescriptor,
};
pub use inheritance::{
    plan_inheritance, plan_inheritance_with_resolution, InheritancePlan,
    DEFAULT_MAX_INHERITANCE_DEPTH,
};
pub use lower_read::{rewrite_vtable_reference, rewrite_vtable_selects, rewrite_vtable_sql};
pub use predicates::{
    expr_has_is_null_predicate, extract_column_literals, LiteralMatch, PredicateSummary,
    PushdownFilter,
};
pub use projection::{analyze_projection, ProjectionAnalysis};
pub use ranking::assemble_ranked_state;
pub use segments::{build_segment, build_segments, SegmentRequest, SegmentSource, StorageTier};
pub use trace::{ProjectionMode, RewriteTraceEntry, RewriteTraceSink, REWRITE_STEP};
