use std::collections::BTreeSet;

use super::context::InheritanceMap;
use crate::errors;
use crate::{InheritanceResolution, LixError};

/// How inherited rows are resolved for one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InheritancePlan {
    /// No inherited rows are needed.
    Pruned(BTreeSet<String>),
    /// Ancestry is resolved at execution time from the version descriptors.
    Recursive(BTreeSet<String>),
    /// Ancestry is fully known and emitted as literal pairs.
    Inline {
        /// `(version, ancestor)` for every ancestor in each chain.
        ancestor_pairs: Vec<(String, String)>,
        /// `(version, parent)` for every link walked.
        parent_pairs: Vec<(String, String)>,
        /// Requested versions plus all their ancestors.
        version_ids: BTreeSet<String>,
    },
}

impl InheritancePlan {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pruned(_) => "pruned",
            Self::Recursive(_) => "recursive",
            Self::Inline { .. } => "inline",
        }
    }

    pub fn version_ids(&self) -> &BTreeSet<String> {
        match self {
            Self::Pruned(version_ids) | Self::Recursive(version_ids) => version_ids,
            Self::Inline { version_ids, .. } => version_ids,
        }
    }

    pub fn needs_inherited_segments(&self) -> bool {
        !matches!(self, Self::Pruned(_))
    }
}

pub const DEFAULT_MAX_INHERITANCE_DEPTH: usize = 64;

/// Plans inheritance, degrading to `Recursive` on broken chains.
pub fn plan_inheritance(
    requested: &BTreeSet<String>,
    map: Option<&InheritanceMap>,
    forced_prune: bool,
) -> InheritancePlan {
    match plan_inheritance_with_resolution(
        requested,
        map,
        forced_prune,
        InheritanceResolution::Auto,
        DEFAULT_MAX_INHERITANCE_DEPTH,
    ) {
        Ok(plan) => plan,
        Err(_) => InheritancePlan::Recursive(requested.clone()),
    }
}

/// Plans inheritance. Chains are followed for at most `max_depth` ancestors,
/// matching the bound of the execution-time traversal.
pub fn plan_inheritance_with_resolution(
    requested: &BTreeSet<String>,
    map: Option<&InheritanceMap>,
    forced_prune: bool,
    resolution: InheritanceResolution,
    max_depth: usize,
) -> Result<InheritancePlan, LixError> {
    if forced_prune {
        return Ok(InheritancePlan::Pruned(requested.clone()));
    }
    let Some(map) = map else {
        return Ok(InheritancePlan::Pruned(requested.clone()));
    };
    if requested.is_empty() {
        return Ok(InheritancePlan::Recursive(BTreeSet::new()));
    }

    let mut ancestor_pairs = Vec::new();
    let mut parent_pairs = Vec::new();
    let mut version_ids = requested.clone();

    for version_id in requested {
        let mut visited = BTreeSet::from([version_id.as_str()]);
        let mut current = version_id.as_str();
        let mut depth = 0;
        while depth < max_depth {
            let parent = match map.parent_of(current) {
                None => {
                    tracing::warn!(
                        target: "lix_state_vtable",
                        version_id = %version_id,
                        missing_version_id = %current,
                        "inheritance chain has a missing link; resolving at execution time"
                    );
                    return match resolution {
                        InheritanceResolution::Auto => Ok(InheritancePlan::Recursive(version_ids)),
                        InheritanceResolution::RequireInline => {
                            Err(errors::inheritance_unresolved_error(version_id, current))
                        }
                    };
                }
                Some(None) => break,
                Some(Some(parent)) => parent,
            };
            if !visited.insert(parent) {
                tracing::warn!(
                    target: "lix_state_vtable",
                    version_id = %version_id,
                    ancestor_version_id = %parent,
                    "inheritance chain has a cycle; resolving at execution time"
                );
                return match resolution {
                    InheritanceResolution::Auto => Ok(InheritancePlan::Recursive(version_ids)),
                    InheritanceResolution::RequireInline => {
                        Err(errors::inheritance_cycle_error(version_id, parent))
                    }
                };
            }
            parent_pairs.push((current.to_string(), parent.to_string()));
            ancestor_pairs.push((version_id.clone(), parent.to_string()));
            version_ids.insert(parent.to_string());
            current = parent;
            depth += 1;
        }
    }

    if ancestor_pairs.is_empty() {
        return Ok(InheritancePlan::Pruned(requested.clone()));
    }
    parent_pairs.sort();
    parent_pairs.dedup();
    Ok(InheritancePlan::Inline {
        ancestor_pairs,
        parent_pairs,
        version_ids,
    })
}
