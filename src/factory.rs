//! Context factory: shared registries, defaults, and client reuse.
//!
//! One [`DbFactory`] is constructed at application startup and owns the
//! process-wide state: the metadata registry, the global filter registry,
//! and the naming conventions. Every context built from the factory shares
//! that state by handle, so a global filter registered here applies to
//! queries from every context — while each context keeps its own session
//! slot. Dropping the factory (and its contexts) tears everything down,
//! which keeps tests hermetic.

use std::collections::HashMap;
use std::sync::Arc;

use bson::Document;
use mongodb::Client;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::context::DbContext;
use crate::convention::{ConventionSet, FieldNaming};
use crate::entity::{Capability, Entity};
use crate::error::{Error, Result};
use crate::global_filter::GlobalFilter;
use crate::metadata::{MetadataRegistry, TypeMeta};

/// Registries shared by every context a factory produces.
#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub(crate) metadata: MetadataRegistry,
    pub(crate) filters: GlobalFilter,
    pub(crate) conventions: ConventionSet,
}

impl SharedState {
    /// Resolve metadata for `T`, registering the type with the global
    /// filter registry the first time it is seen.
    pub(crate) fn metadata_for<T: Entity>(&self) -> Result<Arc<TypeMeta>> {
        let (meta, inserted) = self
            .metadata
            .get_or_resolve::<T>(self.conventions.effective())?;
        if inserted {
            self.filters
                .note_type(std::any::TypeId::of::<T>(), meta.capabilities);
        }
        Ok(meta)
    }
}

#[derive(Debug, Default)]
struct Defaults {
    connection: Option<String>,
    database: Option<String>,
}

/// Factory for [`DbContext`] values.
///
/// Construct one per process, configure defaults and global filters at
/// startup, then build a fresh context per logical unit of work.
///
/// # Example
///
/// ```rust,ignore
/// use whetstone::DbFactory;
///
/// let factory = DbFactory::new();
/// factory.set_default_connection("mongodb://localhost:27017")?;
/// factory.set_default_database("library")?;
///
/// let ctx = factory.context().build().await?;
/// let books = ctx.find::<Book>().execute().await?;
/// ```
#[derive(Default)]
pub struct DbFactory {
    state: Arc<SharedState>,
    defaults: Mutex<Defaults>,
    clients: Mutex<HashMap<String, Client>>,
}

impl DbFactory {
    /// Create a factory with empty registries and the default camel-case
    /// convention pack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection string used when a context names none.
    /// Settable exactly once.
    pub fn set_default_connection(&self, connection: impl Into<String>) -> Result<()> {
        let connection = connection.into();
        if connection.is_empty() {
            return Err(Error::validation("Invalid connection string"));
        }

        let mut defaults = self.defaults.lock();
        if defaults.connection.is_some() {
            return Err(Error::invalid_operation(
                "Default connection can only be set once. Name a connection on the \
                 context builder to reach a different server.",
            ));
        }
        defaults.connection = Some(connection);
        Ok(())
    }

    /// Set the database name used when a context names none.
    /// Settable exactly once.
    pub fn set_default_database(&self, database: impl Into<String>) -> Result<()> {
        let database = database.into();
        if database.is_empty() {
            return Err(Error::validation("Invalid database name"));
        }

        let mut defaults = self.defaults.lock();
        if defaults.database.is_some() {
            return Err(Error::invalid_operation(
                "Default database can only be set once. Name a database on the \
                 context builder to reach a different one.",
            ));
        }
        defaults.database = Some(database);
        Ok(())
    }

    /// The configured default connection string, if any.
    pub fn default_connection(&self) -> Option<String> {
        self.defaults.lock().connection.clone()
    }

    /// The configured default database name, if any.
    pub fn default_database(&self) -> Option<String> {
        self.defaults.lock().database.clone()
    }

    // --- conventions -------------------------------------------------------

    /// Add a named convention pack. Only allowed before the first context
    /// is built.
    pub fn add_convention(&self, name: impl Into<String>, naming: FieldNaming) -> Result<()> {
        self.state.conventions.add(name, naming)
    }

    /// Remove a named convention pack. Only allowed before the first
    /// context is built.
    pub fn remove_convention(&self, name: &str) -> Result<()> {
        self.state.conventions.remove(name)
    }

    /// Names of the registered convention packs.
    pub fn convention_names(&self) -> Vec<String> {
        self.state.conventions.names()
    }

    // --- global filters ----------------------------------------------------

    /// Register a global filter for one entity type; first registration
    /// wins, later ones are silently ignored.
    pub fn set_global_filter<T: Entity>(&self, filter: impl Into<Document>, prepend: bool) {
        self.state.filters.set_for_type::<T>(filter, prepend);
    }

    /// Register a global filter for one entity type from a raw JSON
    /// fragment; fails when the fragment does not parse.
    pub fn set_global_filter_json<T: Entity>(&self, json: &str, prepend: bool) -> Result<()> {
        let filter: Document = serde_json::from_str(json)
            .map_err(|e| Error::validation(format!("invalid global filter JSON: {e}")))?;
        self.state.filters.set_for_type::<T>(filter, prepend);
        Ok(())
    }

    /// Register a global filter for every entity type declaring a
    /// capability, including types first used later.
    pub fn set_global_filter_for_capability(
        &self,
        capability: Capability,
        filter: impl Into<Document>,
        prepend: bool,
    ) {
        self.state
            .filters
            .set_for_capability(capability, filter, prepend);
    }

    /// The shared global filter registry.
    pub fn global_filters(&self) -> &GlobalFilter {
        &self.state.filters
    }

    // --- contexts ----------------------------------------------------------

    /// Start building a context.
    pub fn context(&self) -> ContextBuilder<'_> {
        ContextBuilder {
            factory: self,
            database: None,
            connection: None,
            ignore_global_filters: false,
        }
    }

    async fn client_for(&self, connection: &str) -> Result<Client> {
        if let Some(client) = self.clients.lock().get(connection) {
            return Ok(client.clone());
        }

        let client = Client::with_uri_str(connection).await?;
        info!(uri = %connection, "MongoDB client created");

        let mut clients = self.clients.lock();
        Ok(clients
            .entry(connection.to_owned())
            .or_insert(client)
            .clone())
    }
}

/// Builder for one [`DbContext`].
pub struct ContextBuilder<'a> {
    factory: &'a DbFactory,
    database: Option<String>,
    connection: Option<String>,
    ignore_global_filters: bool,
}

impl ContextBuilder<'_> {
    /// Use a database other than the factory default.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Use a connection other than the factory default.
    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }

    /// Build a context whose queries bypass the global filter registry.
    pub fn ignore_global_filters(mut self) -> Self {
        self.ignore_global_filters = true;
        self
    }

    /// Build the context.
    ///
    /// The first build seals the convention set; every build returns a
    /// fresh context with its own session slot, reusing one driver client
    /// per connection string.
    pub async fn build(self) -> Result<DbContext> {
        let connection = match self.connection.or_else(|| self.factory.default_connection()) {
            Some(connection) => connection,
            None => {
                return Err(Error::invalid_operation(
                    "No default connection has been setup",
                ));
            }
        };
        let database = match self.database.or_else(|| self.factory.default_database()) {
            Some(database) => database,
            None => {
                return Err(Error::invalid_operation(
                    "No default database has been setup",
                ));
            }
        };

        self.factory.state.conventions.seal();

        let client = self.factory.client_for(&connection).await?;
        let db = client.database(&database);

        debug!(database = %database, "context created");
        Ok(DbContext::new(
            client,
            db,
            self.ignore_global_filters,
            Arc::clone(&self.factory.state),
        ))
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
        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }
    }

    #[test]
    fn test_default_connection_set_once() {
        let factory = DbFactory::new();
        factory.set_default_connection("mongodb://localhost:27017").unwrap();

        let err = factory
            .set_default_connection("mongodb://elsewhere:27017")
            .unwrap_err();
        assert!(err.is_invalid_operation());
        assert_eq!(
            factory.default_connection().as_deref(),
            Some("mongodb://localhost:27017")
        );
    }

    #[test]
    fn test_empty_defaults_are_rejected() {
        let factory = DbFactory::new();
        assert!(factory.set_default_connection("").unwrap_err().is_validation());
        assert!(factory.set_default_database("").unwrap_err().is_validation());
    }

    #[test]
    fn test_default_database_set_once() {
        let factory = DbFactory::new();
        factory.set_default_database("library").unwrap();
        assert!(factory.set_default_database("other").unwrap_err().is_invalid_operation());
    }

    #[tokio::test]
    async fn test_build_without_defaults_fails() {
        let factory = DbFactory::new();
        let err = factory.context().build().await.unwrap_err();
        assert!(err.is_invalid_operation());
        assert!(err.to_string().contains("No default connection"));
    }

    #[tokio::test]
    async fn test_first_build_seals_conventions() {
        let factory = DbFactory::new();
        factory.add_convention("snake", FieldNaming::SnakeCase).unwrap();

        factory
            .context()
            .database("library")
            .connection("mongodb://localhost:27017")
            .build()
            .await
            .unwrap();

        let err = factory
            .add_convention("pascal", FieldNaming::PascalCase)
            .unwrap_err();
        assert!(err.is_invalid_operation());
    }

    #[tokio::test]
    async fn test_contexts_are_fresh_but_share_global_filters() {
        let factory = DbFactory::new();
        factory.set_global_filter::<Book>(doc! { "deleted": false }, false);

        let first = factory
            .context()
            .database("library")
            .connection("mongodb://localhost:27017")
            .build()
            .await
            .unwrap();
        let second = factory
            .context()
            .database("library")
            .connection("mongodb://localhost:27017")
            .build()
            .await
            .unwrap();

        // Both contexts see the same registry entry.
        let type_id = std::any::TypeId::of::<Book>();
        assert!(factory.global_filters().has_entry(type_id));
        drop((first, second));
    }

    #[test]
    fn test_json_filter_must_parse() {
        let factory = DbFactory::new();
        let err = factory
            .set_global_filter_json::<Book>("{ not json", false)
            .unwrap_err();
        assert!(err.is_validation());

        factory
            .set_global_filter_json::<Book>(r#"{ "deleted": false }"#, false)
            .unwrap();
        assert!(factory.global_filters().has_entry(std::any::TypeId::of::<Book>()));
    }
}
