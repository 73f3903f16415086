//! Process-wide global filters, merged into every outgoing query.
//!
//! A global filter is registered once per entity type (or once per
//! capability) and silently ANDed into every subsequent query against
//! matching types. Registration is try-add: the first filter for a type
//! wins and later ones are ignored. Merging happens at execution time, so
//! a filter registered after a builder was constructed still applies to
//! that builder's terminal call.

use std::any::TypeId;
use std::collections::HashMap;

use bson::Document;
use parking_lot::RwLock;

use crate::entity::{Capabilities, Capability, Entity};
use crate::filter::and_also;

#[derive(Debug, Clone)]
struct FilterEntry {
    filter: Document,
    prepend: bool,
}

/// Registry of per-type and per-capability filter fragments.
///
/// Capability registrations cover every type whose metadata declares the
/// capability — both types already seen and types discovered later, which
/// pick the fragment up the first time their metadata is resolved.
#[derive(Debug, Default)]
pub struct GlobalFilter {
    by_type: RwLock<HashMap<TypeId, FilterEntry>>,
    by_capability: RwLock<Vec<(Capability, FilterEntry)>>,
    known: RwLock<HashMap<TypeId, Capabilities>>,
}

impl GlobalFilter {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter for one concrete entity type.
    ///
    /// With `prepend`, the registered fragment goes in front of the query's
    /// own filter in the merged conjunction; otherwise it follows it.
    pub fn set_for_type<T: Entity>(&self, filter: impl Into<Document>, prepend: bool) {
        self.try_add(
            TypeId::of::<T>(),
            FilterEntry {
                filter: filter.into(),
                prepend,
            },
        );
    }

    /// Register a filter for every entity type declaring `capability`.
    pub fn set_for_capability(
        &self,
        capability: Capability,
        filter: impl Into<Document>,
        prepend: bool,
    ) {
        let entry = FilterEntry {
            filter: filter.into(),
            prepend,
        };

        let matching: Vec<TypeId> = self
            .known
            .read()
            .iter()
            .filter(|(_, caps)| caps.has(capability))
            .map(|(id, _)| *id)
            .collect();

        for type_id in matching {
            self.try_add(type_id, entry.clone());
        }

        self.by_capability.write().push((capability, entry));
    }

    /// Record a newly resolved type and replay any matching capability
    /// registrations onto it. Called by the shared state when a type's
    /// metadata is first computed.
    pub(crate) fn note_type(&self, type_id: TypeId, capabilities: Capabilities) {
        self.known.write().insert(type_id, capabilities);

        let pending: Vec<FilterEntry> = self
            .by_capability
            .read()
            .iter()
            .filter(|(capability, _)| capabilities.has(*capability))
            .map(|(_, entry)| entry.clone())
            .collect();

        for entry in pending {
            self.try_add(type_id, entry);
        }
    }

    /// Merge the registered fragment for `type_id` into `incoming`.
    ///
    /// Pure: with no entry the incoming filter is returned unchanged, and
    /// the same registry state plus the same input always produce the same
    /// output.
    pub fn merge(&self, type_id: TypeId, incoming: Document) -> Document {
        let by_type = self.by_type.read();
        let Some(entry) = by_type.get(&type_id) else {
            return incoming;
        };

        if entry.prepend {
            and_also(entry.filter.clone(), incoming)
        } else {
            and_also(incoming, entry.filter.clone())
        }
    }

    /// Check whether a filter is registered for `type_id`.
    pub fn has_entry(&self, type_id: TypeId) -> bool {
        self.by_type.read().contains_key(&type_id)
    }

    fn try_add(&self, type_id: TypeId, entry: FilterEntry) {
        self.by_type.write().entry(type_id).or_insert(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Book {
        #[serde(rename = "_id")]
        id: String,
    }

    impl Entity for Book {
        fn capabilities() -> Capabilities {
            Capabilities::NONE.with_soft_delete()
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    fn book_id() -> TypeId {
        TypeId::of::<Book>()
    }

    #[test]
    fn test_merge_identity_without_entry() {
        let registry = GlobalFilter::new();
        let incoming = doc! { "title": "a" };
        assert_eq!(registry.merge(book_id(), incoming.clone()), incoming);
    }

    #[test]
    fn test_merge_appends_by_default() {
        let registry = GlobalFilter::new();
        registry.set_for_type::<Book>(doc! { "deleted": false }, false);

        let merged = registry.merge(book_id(), doc! { "title": "a" });
        assert_eq!(
            merged,
            doc! { "$and": [{ "title": "a" }, { "deleted": false }] }
        );
    }

    #[test]
    fn test_merge_prepends_when_asked() {
        let registry = GlobalFilter::new();
        registry.set_for_type::<Book>(doc! { "deleted": false }, true);

        let merged = registry.merge(book_id(), doc! { "title": "a" });
        assert_eq!(
            merged,
            doc! { "$and": [{ "deleted": false }, { "title": "a" }] }
        );
    }

    #[test]
    fn test_merge_does_not_mutate_registry_state() {
        let registry = GlobalFilter::new();
        registry.set_for_type::<Book>(doc! { "deleted": false }, false);

        let first = registry.merge(book_id(), doc! { "title": "a" });
        let second = registry.merge(book_id(), doc! { "title": "a" });
        assert_eq!(first, second);
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = GlobalFilter::new();
        registry.set_for_type::<Book>(doc! { "deleted": false }, false);
        registry.set_for_type::<Book>(doc! { "deleted": true }, false);

        let merged = registry.merge(book_id(), doc! {});
        assert_eq!(merged, doc! { "deleted": false });
    }

    #[test]
    fn test_capability_filter_covers_known_types() {
        let registry = GlobalFilter::new();
        registry.note_type(book_id(), Book::capabilities());
        registry.set_for_capability(Capability::SoftDelete, doc! { "deleted": false }, false);

        assert!(registry.has_entry(book_id()));
    }

    #[test]
    fn test_capability_filter_covers_types_discovered_later() {
        let registry = GlobalFilter::new();
        registry.set_for_capability(Capability::SoftDelete, doc! { "deleted": false }, false);

        assert!(!registry.has_entry(book_id()));
        registry.note_type(book_id(), Book::capabilities());
        assert!(registry.has_entry(book_id()));
    }

    #[test]
    fn test_capability_filter_skips_undeclared_types() {
        let registry = GlobalFilter::new();
        registry.note_type(book_id(), Capabilities::NONE);
        registry.set_for_capability(Capability::SoftDelete, doc! { "deleted": false }, false);

        assert!(!registry.has_entry(book_id()));
    }
}
