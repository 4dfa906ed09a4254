//! Diff engine for comparing desired vs stored state.
//!
//! Each desired instance is compared with the record from the last read.
//! Computed attributes are never compared, and neither are optional
//! attributes the operator left unset when the schema has no default for
//! them.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::provider::ProviderRegistry;
use crate::resource::{DesiredResource, ResourceAddr, ResourceId};
use crate::schema::{AttributeSet, ResourceSchema, ValidAttributes};
use crate::state::ResourceRecord;

/// Engine for computing diffs between desired and stored states.
#[derive(Debug, Default)]
pub struct DiffEngine;

/// Difference for a single resource.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    /// Resource address.
    pub addr: ResourceAddr,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Identifier of the tracked instance, if any.
    pub id: Option<ResourceId>,
    /// Desired attributes; absent for deletes.
    pub desired: Option<ValidAttributes>,
    /// Changed mutable attributes with their desired values.
    pub changes: AttributeSet,
    /// Per-attribute details.
    pub details: Vec<DiffDetail>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Mutable attributes changed.
    Update,
    /// A force-new attribute changed.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Attribute that differs.
    pub field: String,
    /// Stored value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
    /// Whether this change alone forces replacement.
    pub forces_replacement: bool,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// All resource diffs.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update in place.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the diff between desired resources and stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if a desired resource has no registered kind.
    pub fn compute_diff(
        &self,
        desired: &[DesiredResource],
        records: &[Arc<ResourceRecord>],
        registry: &ProviderRegistry,
    ) -> Result<DiffResult> {
        let mut diffs = Vec::with_capacity(desired.len());
        let mut wanted: HashSet<&ResourceAddr> = HashSet::new();

        for resource in desired {
            wanted.insert(&resource.addr);
            let adapter = registry.adapter(&resource.addr.kind)?;
            let stored = records.iter().find(|r| r.addr == resource.addr);

            let diff = match stored {
                None => {
                    debug!("{} needs to be created", resource.addr);
                    ResourceDiff {
                        addr: resource.addr.clone(),
                        diff_type: DiffType::Create,
                        id: None,
                        desired: Some(resource.attributes.clone()),
                        changes: AttributeSet::new(),
                        details: Vec::new(),
                    }
                }
                Some(record) => Self::compare(adapter.schema(), resource, record),
            };
            diffs.push(diff);
        }

        for record in records {
            if !wanted.contains(&record.addr) {
                debug!("{} is no longer configured", record.addr);
                diffs.push(ResourceDiff {
                    addr: record.addr.clone(),
                    diff_type: DiffType::Delete,
                    id: Some(record.id.clone()),
                    desired: None,
                    changes: AttributeSet::new(),
                    details: Vec::new(),
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        let creates = count(DiffType::Create);
        let updates = count(DiffType::Update);
        let replaces = count(DiffType::Replace);
        let deletes = count(DiffType::Delete);
        let unchanged = count(DiffType::NoChange);

        Ok(DiffResult {
            diffs,
            creates,
            updates,
            replaces,
            deletes,
            unchanged,
        })
    }

    /// Compares one desired instance with its stored record.
    fn compare(
        schema: &ResourceSchema,
        resource: &DesiredResource,
        record: &ResourceRecord,
    ) -> ResourceDiff {
        let mut details = Vec::new();
        let mut changes = AttributeSet::new();

        for def in schema.attributes() {
            if def.is_computed() {
                continue;
            }
            let Some(wanted) = schema.effective(def.name, &resource.attributes) else {
                continue;
            };
            let current = record.attributes.get(def.name);
            if current == Some(wanted) {
                continue;
            }

            details.push(DiffDetail {
                field: def.name.to_string(),
                old_value: current.map(ToString::to_string),
                new_value: Some(wanted.to_string()),
                forces_replacement: def.is_force_new(),
            });
            if !def.is_force_new() {
                changes.insert(def.name, wanted.clone());
            }
        }

        let diff_type = if details.is_empty() {
            DiffType::NoChange
        } else if details.iter().any(|d| d.forces_replacement) {
            DiffType::Replace
        } else {
            DiffType::Update
        };
        debug!("{} diff: {diff_type}", resource.addr);

        ResourceDiff {
            addr: resource.addr.clone(),
            diff_type,
            id: Some(record.id.clone()),
            desired: Some(resource.attributes.clone()),
            changes,
            details,
        }
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.total_changes() > 0
    }

    /// Returns the total number of changes.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Filters to only diffs that require action.
    #[must_use]
    pub fn actionable_diffs(&self) -> Vec<&ResourceDiff> {
        self.diffs
            .iter()
            .filter(|d| d.diff_type != DiffType::NoChange)
            .collect()
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DiffDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} -> {}",
            self.field,
            self.old_value.as_deref().unwrap_or("(unset)"),
            self.new_value.as_deref().unwrap_or("(unset)")
        )?;
        if self.forces_replacement {
            write!(f, " (forces replacement)")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.addr, self.diff_type)?;
        if !self.details.is_empty() {
            write!(f, " (")?;
            for (i, detail) in self.details.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", detail.field)?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{api_cache_schema, ApiCacheAdapter};
    use crate::transport::InMemoryTransport;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::new().with(Arc::new(ApiCacheAdapter::new(Arc::new(
            InMemoryTransport::new(),
        ))))
    }

    fn desired(name: &str, attributes: AttributeSet) -> DesiredResource {
        DesiredResource {
            addr: ResourceAddr::new("api_cache", name),
            attributes: api_cache_schema().validate(&attributes).expect("valid"),
        }
    }

    fn base() -> AttributeSet {
        AttributeSet::new()
            .with("api_id", "api-1")
            .with("api_caching_behavior", "FULL_REQUEST_CACHING")
            .with("ttl", 300)
            .with("type", "SMALL")
    }

    fn stored(name: &str) -> Arc<ResourceRecord> {
        let attributes = base()
            .with("at_rest_encryption_enabled", false)
            .with("transit_encryption_enabled", false)
            .with("status", "AVAILABLE");
        Arc::new(ResourceRecord::new(
            ResourceAddr::new("api_cache", name),
            ResourceId::new("api-1"),
            attributes,
        ))
    }

    #[test]
    fn test_untracked_is_create() {
        let diff = DiffEngine::new()
            .compute_diff(&[desired("primary", base())], &[], &registry())
            .expect("diff");
        assert_eq!(diff.creates, 1);
        assert_eq!(diff.diffs[0].diff_type, DiffType::Create);
    }

    #[test]
    fn test_identical_is_no_change() {
        // Unset encryption flags fall back to their defaults; status is computed.
        let diff = DiffEngine::new()
            .compute_diff(&[desired("primary", base())], &[stored("primary")], &registry())
            .expect("diff");
        assert_eq!(diff.unchanged, 1);
        assert!(!diff.has_changes());
    }

    #[test]
    fn test_ttl_change_is_update_with_only_ttl() {
        let diff = DiffEngine::new()
            .compute_diff(
                &[desired("primary", base().with("ttl", 600))],
                &[stored("primary")],
                &registry(),
            )
            .expect("diff");

        let change = &diff.diffs[0];
        assert_eq!(change.diff_type, DiffType::Update);
        assert_eq!(change.changes.len(), 1);
        assert_eq!(change.changes.get_int("ttl"), Some(600));
        assert_eq!(change.id, Some(ResourceId::new("api-1")));
    }

    #[test]
    fn test_encryption_change_is_replace() {
        let diff = DiffEngine::new()
            .compute_diff(
                &[desired(
                    "primary",
                    base().with("transit_encryption_enabled", true).with("ttl", 60),
                )],
                &[stored("primary")],
                &registry(),
            )
            .expect("diff");

        let change = &diff.diffs[0];
        assert_eq!(change.diff_type, DiffType::Replace);
        assert_eq!(diff.replaces, 1);
        assert!(change
            .details
            .iter()
            .any(|d| d.field == "transit_encryption_enabled" && d.forces_replacement));
    }

    #[test]
    fn test_untracked_config_is_delete() {
        let diff = DiffEngine::new()
            .compute_diff(&[], &[stored("old")], &registry())
            .expect("diff");
        assert_eq!(diff.deletes, 1);
        assert_eq!(diff.diffs[0].id, Some(ResourceId::new("api-1")));
    }

    #[test]
    fn test_case_only_difference_is_no_change() {
        let diff = DiffEngine::new()
            .compute_diff(
                &[desired("primary", base().with("type", "small"))],
                &[stored("primary")],
                &registry(),
            )
            .expect("diff");
        assert_eq!(diff.diffs[0].diff_type, DiffType::NoChange);
    }
}
