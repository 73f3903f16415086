//! Filter-document construction utilities.
//!
//! Filters are plain BSON documents handed to the driver unmodified; this
//! module only helps compose them. Everything the layer itself composes —
//! protection narrowing, global-filter merging, id matching — goes through
//! [`and_also`] so caller-specified semantics are never reordered.

use bson::{Bson, Document, doc};

use crate::entity::id_to_bson;

/// Fluent builder for filter documents.
///
/// # Example
///
/// ```rust,ignore
/// use whetstone::FilterBuilder;
///
/// let filter = FilterBuilder::new()
///     .regex("title", "odd")
///     .eq("archived", false)
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    doc: Document,
}

impl FilterBuilder {
    /// Create an empty filter (matches all documents).
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing filter document.
    pub fn from_doc(doc: Document) -> Self {
        Self { doc }
    }

    /// Equality condition.
    pub fn eq(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, value.into());
        self
    }

    /// Not-equal condition.
    pub fn ne(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, doc! { "$ne": value.into() });
        self
    }

    /// Greater-than condition.
    pub fn gt(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, doc! { "$gt": value.into() });
        self
    }

    /// Greater-than-or-equal condition.
    pub fn gte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, doc! { "$gte": value.into() });
        self
    }

    /// Less-than condition.
    pub fn lt(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, doc! { "$lt": value.into() });
        self
    }

    /// Less-than-or-equal condition.
    pub fn lte(mut self, field: &str, value: impl Into<Bson>) -> Self {
        self.doc.insert(field, doc! { "$lte": value.into() });
        self
    }

    /// Membership condition (`$in`).
    pub fn in_array(mut self, field: &str, values: Vec<impl Into<Bson>>) -> Self {
        let values: Vec<Bson> = values.into_iter().map(Into::into).collect();
        self.doc.insert(field, doc! { "$in": values });
        self
    }

    /// Regular-expression condition.
    pub fn regex(mut self, field: &str, pattern: &str) -> Self {
        self.doc.insert(field, doc! { "$regex": pattern });
        self
    }

    /// Field-presence condition.
    pub fn exists(mut self, field: &str, exists: bool) -> Self {
        self.doc.insert(field, doc! { "$exists": exists });
        self
    }

    /// Identifier equality against the entity's opaque string id.
    pub fn by_id(mut self, id: &str) -> Self {
        self.doc.insert("_id", id_to_bson(id));
        self
    }

    /// Explicit `$or` over sub-filters.
    pub fn or(mut self, conditions: Vec<Document>) -> Self {
        self.doc.insert("$or", conditions);
        self
    }

    /// AND another filter onto this one.
    pub fn and_also(self, other: Document) -> Self {
        Self {
            doc: and_also(self.doc, other),
        }
    }

    /// Finish building.
    pub fn build(self) -> Document {
        self.doc
    }

    /// Check if the filter is empty.
    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }
}

impl From<FilterBuilder> for Document {
    fn from(builder: FilterBuilder) -> Self {
        builder.build()
    }
}

/// Create an identifier-equality filter.
pub fn match_id(id: &str) -> Document {
    doc! { "_id": id_to_bson(id) }
}

/// Combine two filters with logical AND.
///
/// Empty operands are identity so composed filters stay readable; neither
/// input is mutated.
pub fn and_also(base: Document, extra: Document) -> Document {
    if base.is_empty() {
        return extra;
    }
    if extra.is_empty() {
        return base;
    }
    doc! { "$and": [base, extra] }
}
