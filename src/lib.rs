//! # whetstone
//!
//! A fluent data-access layer on top of the official MongoDB driver.
//!
//! This crate provides:
//! - Command builders for find/update/delete/soft-delete/distinct with
//!   single-use fluent chaining
//! - Per-entity-type metadata (capabilities, collection identity) cached
//!   for the process lifetime
//! - Global filters transparently merged into every query against a type
//! - Soft-delete and system-generated-record protection
//! - Transaction sessions propagated into every command automatically
//! - Save/upsert, counting, and audit-log copies of entities
//!
//! It composes and dispatches query descriptors only: storage, indexing,
//! retries, and the wire protocol belong to the driver underneath.
//!
//! ## Example
//!
//! ```rust,ignore
//! use serde::{Deserialize, Serialize};
//! use whetstone::{bson_id, doc, Capabilities, DbFactory, Entity};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Book {
//!     #[serde(rename = "_id", with = "bson_id")]
//!     id: String,
//!     title: String,
//!     deleted: bool,
//! }
//!
//! impl Entity for Book {
//!     fn capabilities() -> Capabilities {
//!         Capabilities::NONE.with_modified_on().with_soft_delete()
//!     }
//!     fn id(&self) -> &str { &self.id }
//!     fn set_id(&mut self, id: String) { self.id = id; }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = DbFactory::new();
//!     factory.set_default_connection("mongodb://localhost:27017")?;
//!     factory.set_default_database("library")?;
//!     factory.set_global_filter::<Book>(doc! { "deleted": false }, false);
//!
//!     let ctx = factory.context().build().await?;
//!
//!     let mut book = Book { id: String::new(), title: "Dune".into(), deleted: false };
//!     ctx.save(&mut book).await?;
//!
//!     // The global filter is merged in transparently.
//!     let live = ctx.find::<Book>().execute().await?;
//!
//!     ctx.soft_delete::<Book>(doc! { "title": "Dune" })
//!         .execute_one("user-1", false)
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod builders;
pub mod context;
pub mod convention;
pub mod entity;
pub mod error;
pub mod factory;
pub mod filter;
pub mod global_filter;
pub mod metadata;
pub mod session;

pub use bson::oid::ObjectId;
pub use bson::{Bson, Document, doc};
pub use builders::{
    Delete, DeleteSummary, Distinct, Find, FindCursor, Order, ProjectedDelete, ProjectedFind,
    ProjectedSoftDelete, ProjectedUpdate, SoftDelete, Update, UpdateSummary,
};
pub use context::DbContext;
pub use convention::{ConventionSet, FieldMap, FieldNaming};
pub use entity::{
    Capabilities, Capability, CreatedBy, DeletedBy, Entity, ModifiedBy, bson_id, id_to_bson,
};
pub use error::{Error, Result};
pub use factory::{ContextBuilder, DbFactory};
pub use filter::{FilterBuilder, and_also, match_id};
pub use global_filter::GlobalFilter;
pub use metadata::{MetadataRegistry, TypeMeta};
pub use session::Transaction;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::builders::{
        Delete, DeleteSummary, Distinct, Find, FindCursor, Order, ProjectedDelete, ProjectedFind,
        ProjectedSoftDelete, ProjectedUpdate, SoftDelete, Update, UpdateSummary,
    };
    pub use crate::context::DbContext;
    pub use crate::entity::{
        Capabilities, Capability, CreatedBy, DeletedBy, Entity, ModifiedBy, bson_id,
    };
    pub use crate::error::{Error, Result};
    pub use crate::factory::{ContextBuilder, DbFactory};
    pub use crate::filter::FilterBuilder;
    pub use crate::session::Transaction;
    pub use bson::oid::ObjectId;
    pub use bson::{Bson, Document, doc};
}
