//! Command builders: Find, Update, Delete, SoftDelete, Distinct.
//!
//! Builders are stateful, single-use values created through [`DbContext`]
//! factory methods, configured through a fluent chain, and consumed by a
//! terminal execute call. Every terminal call merges the global filter,
//! reads the context's current session, and dispatches to the store; none
//! of them retries anything. A builder is a single-owner value — sharing
//! one across tasks or executing it twice is a caller error by contract.
//!
//! [`DbContext`]: crate::context::DbContext

mod delete;
mod distinct;
mod find;
mod soft_delete;
mod update;

pub use delete::{Delete, ProjectedDelete};
pub use distinct::Distinct;
pub use find::{Find, FindCursor, ProjectedFind};
pub use soft_delete::{ProjectedSoftDelete, SoftDelete};
pub use update::{ProjectedUpdate, Update};

use bson::{Bson, Document, doc};

use crate::filter::and_also;
use crate::metadata::TypeMeta;

/// Sort direction for [`Find::sort_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl Order {
    fn key(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Outcome of an update-many dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateSummary {
    /// Documents the filter matched.
    pub matched_count: u64,
    /// Documents actually modified.
    pub modified_count: u64,
    /// Whether the store acknowledged the write.
    pub acknowledged: bool,
}

/// Outcome of a delete or soft-delete dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteSummary {
    /// Documents removed (or, for soft deletes, flagged).
    pub deleted_count: u64,
    /// Whether the store acknowledged the write.
    pub acknowledged: bool,
}

/// Collapse an ordered list of sort clauses into one sort document.
/// Later clauses act as tie-breakers for earlier ones.
pub(crate) fn combine_sorts(sorts: &[Document]) -> Document {
    let mut combined = Document::new();
    for sort in sorts {
        for (key, value) in sort {
            combined.insert(key.clone(), value.clone());
        }
    }
    combined
}

/// Collapse an ordered list of update operations into one update document,
/// merging operator sub-documents (`$set`, `$currentDate`, …) key-wise.
pub(crate) fn combine_updates(ops: &[Document]) -> Document {
    let mut combined = Document::new();
    for op in ops {
        for (key, value) in op {
            match (combined.remove(key.as_str()), value.as_document()) {
                (Some(Bson::Document(mut existing)), Some(extra)) => {
                    existing.extend(extra.clone());
                    combined.insert(key.clone(), existing);
                }
                _ => {
                    combined.insert(key.clone(), value.clone());
                }
            }
        }
    }
    combined
}

/// Narrow a filter so system-generated records are untouched, unless the
/// caller forces the operation or the type never declared the capability.
pub(crate) fn narrow_protected(filter: Document, meta: &TypeMeta, force_delete: bool) -> Document {
    if force_delete || !meta.capabilities.system_generated {
        return filter;
    }
    and_also(filter, doc! { meta.fields.system_generated.as_str(): false })
}
