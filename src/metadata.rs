//! Per-type metadata: capability flags and resolved collection identity.
//!
//! Metadata is computed once per entity type on first access and cached for
//! the process lifetime. Entries are handed out as `Arc`s and never mutated
//! afterwards, so post-warm-up reads are cheap and referentially stable.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::convention::{FieldMap, FieldNaming};
use crate::entity::{Capabilities, Entity};
use crate::error::{Error, Result};

/// Character reserved for companion-collection suffixes and therefore
/// illegal inside a collection name.
const RESERVED: char = '~';

/// Immutable, process-lifetime metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMeta {
    /// Resolved collection name.
    pub collection: String,
    /// Declared optional behaviors.
    pub capabilities: Capabilities,
    /// Spellings of the fields this layer generates for the type.
    pub fields: FieldMap,
}

impl TypeMeta {
    /// Compute metadata for `T` under the sealed naming convention.
    pub fn resolve<T: Entity>(naming: FieldNaming) -> Result<Self> {
        let name = T::collection_name();
        if name.trim().is_empty() || name.contains(RESERVED) {
            return Err(Error::validation(format!(
                "'{name}' is an illegal name for a collection"
            )));
        }

        Ok(Self {
            collection: name.into_owned(),
            capabilities: T::capabilities(),
            fields: FieldMap::resolve(naming),
        })
    }

    /// Name of a companion collection, e.g. `"Book.log"` for audit copies.
    pub fn companion_collection(&self, suffix: &str) -> String {
        format!("{}.{}", self.collection, suffix)
    }
}

/// Lazily populated map from entity type to its metadata.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<TypeId, Arc<TypeMeta>>>,
}

impl MetadataRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch metadata for `T`, computing and caching it on first access.
    ///
    /// Returns the entry plus whether this call inserted it; the first
    /// writer wins and concurrent callers observe the same `Arc`.
    pub fn get_or_resolve<T: Entity>(
        &self,
        naming: FieldNaming,
    ) -> Result<(Arc<TypeMeta>, bool)> {
        let type_id = TypeId::of::<T>();

        if let Some(meta) = self.entries.read().get(&type_id) {
            return Ok((Arc::clone(meta), false));
        }

        let resolved = Arc::new(TypeMeta::resolve::<T>(naming)?);

        let mut entries = self.entries.write();
        match entries.get(&type_id) {
            Some(existing) => Ok((Arc::clone(existing), false)),
            None => {
                entries.insert(type_id, Arc::clone(&resolved));
                Ok((resolved, true))
            }
        }
    }

    /// Capabilities of every type the registry has seen so far.
    pub fn known_types(&self) -> Vec<(TypeId, Capabilities)> {
        self.entries
            .read()
            .iter()
            .map(|(id, meta)| (*id, meta.capabilities))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Book {
        #[serde(rename = "_id")]
        id: String,
    }

    impl Entity for Book {
        fn capabilities() -> Capabilities {
            Capabilities::NONE.with_modified_on().with_soft_delete()
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Shelf {
        #[serde(rename = "_id")]
        id: String,
    }

    impl Entity for Shelf {
        fn collection_name() -> std::borrow::Cow<'static, str> {
            "shelves".into()
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Broken {
        #[serde(rename = "_id")]
        id: String,
    }

    impl Entity for Broken {
        fn collection_name() -> std::borrow::Cow<'static, str> {
            "bad~name".into()
        }

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    #[test]
    fn test_resolve_flags_and_collection() {
        let meta = TypeMeta::resolve::<Book>(FieldNaming::CamelCase).unwrap();
        assert_eq!(meta.collection, "Book");
        assert!(meta.capabilities.modified_on);
        assert!(meta.capabilities.soft_delete);
        assert!(meta.capabilities.system_generated);
        assert!(!meta.capabilities.created_on);
    }

    #[test]
    fn test_explicit_collection_override() {
        let meta = TypeMeta::resolve::<Shelf>(FieldNaming::CamelCase).unwrap();
        assert_eq!(meta.collection, "shelves");
    }

    #[test]
    fn test_reserved_separator_is_rejected() {
        let err = TypeMeta::resolve::<Broken>(FieldNaming::CamelCase).unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("illegal name"));
    }

    #[test]
    fn test_companion_collection_name() {
        let meta = TypeMeta::resolve::<Shelf>(FieldNaming::CamelCase).unwrap();
        assert_eq!(meta.companion_collection("log"), "shelves.log");
    }

    #[test]
    fn test_registry_caches_first_resolution() {
        let registry = MetadataRegistry::new();

        let (first, inserted) = registry.get_or_resolve::<Book>(FieldNaming::CamelCase).unwrap();
        assert!(inserted);

        let (second, inserted) = registry.get_or_resolve::<Book>(FieldNaming::CamelCase).unwrap();
        assert!(!inserted);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_known_types_reports_capabilities() {
        let registry = MetadataRegistry::new();
        registry.get_or_resolve::<Book>(FieldNaming::CamelCase).unwrap();

        let known = registry.known_types();
        assert_eq!(known.len(), 1);
        assert!(known[0].1.soft_delete);
    }
}
