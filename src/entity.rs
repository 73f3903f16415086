//! Entity contract and capability declarations.
//!
//! An entity is any serde-mapped struct with an opaque string identifier.
//! Optional behaviors (creation/modification timestamps, system-generated
//! protection, soft deletes) are opted into through an explicit
//! [`Capabilities`] descriptor rather than discovered at call time; the
//! builders consult the descriptor through the metadata registry.
//!
//! # Example
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use whetstone::{bson_id, Capabilities, Entity};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Book {
//!     #[serde(rename = "_id", with = "bson_id")]
//!     id: String,
//!     title: String,
//!     system_generated: bool,
//! }
//!
//! impl Entity for Book {
//!     fn capabilities() -> Capabilities {
//!         Capabilities::NONE.with_system_generated()
//!     }
//!     fn id(&self) -> &str { &self.id }
//!     fn set_id(&mut self, id: String) { self.id = id; }
//! }
//! ```

use std::borrow::Cow;

use bson::Bson;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A persistable record with an opaque string identifier.
///
/// Identifiers are generated by the entity itself when absent at save time
/// and are stable once assigned. The default generator produces ObjectId
/// hex strings; override [`Entity::generate_id`] for a different scheme.
pub trait Entity: Serialize + DeserializeOwned + Unpin + Send + Sync + 'static {
    /// The collection this type lives in. Defaults to the bare type name.
    fn collection_name() -> Cow<'static, str> {
        let full = std::any::type_name::<Self>();
        Cow::Borrowed(full.rsplit("::").next().unwrap_or(full))
    }

    /// The optional behaviors this type opts into.
    fn capabilities() -> Capabilities {
        Capabilities::NONE
    }

    /// The current identifier; empty when the entity has never been saved.
    fn id(&self) -> &str;

    /// Assign an identifier. Called once by `save` for fresh entities.
    fn set_id(&mut self, id: String);

    /// Produce a fresh identifier.
    fn generate_id() -> String {
        ObjectId::new().to_hex()
    }

    /// Record the insertion timestamp. Only invoked when the descriptor
    /// declares `created_on`; the default is a no-op.
    fn touch_created_on(&mut self, at: DateTime<Utc>) {
        let _ = at;
    }

    /// Record the last-write timestamp. Only invoked when the descriptor
    /// declares `modified_on`; the default is a no-op.
    fn touch_modified_on(&mut self, at: DateTime<Utc>) {
        let _ = at;
    }
}

/// One optional behavior an entity type may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Carries an insertion timestamp.
    CreatedOn,
    /// Carries a last-write timestamp, auto-touched on update.
    ModifiedOn,
    /// Protected from casual delete/soft-delete.
    SystemGenerated,
    /// Carries the Deleted/DeletedBy/DeletedOn soft-delete fields.
    SoftDelete,
}

/// The set of optional behaviors an entity type declares.
///
/// Built with const methods so declarations read as one expression:
/// `Capabilities::NONE.with_created_on().with_soft_delete()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Insertion timestamp populated on first save.
    pub created_on: bool,
    /// Last-write timestamp touched on update and upsert.
    pub modified_on: bool,
    /// Participates in delete/soft-delete protection.
    pub system_generated: bool,
    /// Carries the soft-delete field triple.
    pub soft_delete: bool,
}

impl Capabilities {
    /// No optional behaviors.
    pub const NONE: Capabilities = Capabilities {
        created_on: false,
        modified_on: false,
        system_generated: false,
        soft_delete: false,
    };

    /// Declare an insertion timestamp.
    pub const fn with_created_on(mut self) -> Self {
        self.created_on = true;
        self
    }

    /// Declare a last-write timestamp.
    pub const fn with_modified_on(mut self) -> Self {
        self.modified_on = true;
        self
    }

    /// Declare system-generated protection.
    pub const fn with_system_generated(mut self) -> Self {
        self.system_generated = true;
        self
    }

    /// Declare soft-delete fields. Soft-deletable entities always
    /// participate in system-generated protection as well.
    pub const fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self.system_generated = true;
        self
    }

    /// Check whether one capability is declared.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::CreatedOn => self.created_on,
            Capability::ModifiedOn => self.modified_on,
            Capability::SystemGenerated => self.system_generated,
            Capability::SoftDelete => self.soft_delete,
        }
    }
}

macro_rules! actor_wrapper {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name {
            /// The actor's identifier.
            #[serde(rename = "_id", with = "bson_id")]
            pub id: String,
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self { id }
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self { id: id.to_owned() }
            }
        }

        impl From<$name> for String {
            fn from(actor: $name) -> Self {
                actor.id
            }
        }
    };
}

actor_wrapper! {
    /// Reference to the actor that created a record.
    CreatedBy
}

actor_wrapper! {
    /// Reference to the actor that last modified a record.
    ModifiedBy
}

actor_wrapper! {
    /// Reference to the actor that soft-deleted a record.
    DeletedBy
}

/// Convert an opaque string identifier to its BSON form.
///
/// Identifiers that parse as an ObjectId are stored as one; anything else
/// is stored as a plain string, so custom id schemes keep working.
pub fn id_to_bson(id: &str) -> Bson {
    if id.len() == 24 && id.bytes().all(|b| b.is_ascii_hexdigit()) {
        if let Ok(oid) = ObjectId::parse_str(id) {
            return Bson::ObjectId(oid);
        }
    }
    Bson::String(id.to_owned())
}

/// Serde bridge for string identifiers stored as ObjectIds.
///
/// Use with `#[serde(rename = "_id", with = "bson_id")]` on an entity's id
/// field: a valid ObjectId hex string round-trips through the native
/// ObjectId type, anything else stays a string, and a BSON null reads back
/// as the empty (unsaved) identifier.
pub mod bson_id {
    use bson::Bson;
    use bson::oid::ObjectId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a string id, preferring the ObjectId representation.
    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match ObjectId::parse_str(id) {
            Ok(oid) => oid.serialize(serializer),
            Err(_) => serializer.serialize_str(id),
        }
    }

    /// Deserialize a string id from an ObjectId, string, or null.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Bson::deserialize(deserializer)? {
            Bson::ObjectId(oid) => Ok(oid.to_hex()),
            Bson::String(s) => Ok(s),
            Bson::Null => Ok(String::new()),
            other => Err(serde::de::Error::custom(format!(
                "expected ObjectId, string, or null for an id field, got {:?}",
                other.element_type()
            ))),
        }
    }
}
