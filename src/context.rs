//! The per-unit-of-work database handle.
//!
//! A [`DbContext`] is a cheap-clone handle over one driver client, one
//! database, and the factory's shared registries. It hands out the command
//! builders, carries the session slot transactions and builders share, and
//! hosts the entity-level operations: save, count, audit logging, and
//! database upkeep.
//!
//! Contexts are created through [`DbFactory::context`]; each call yields a
//! fresh context with its own session slot, so one logical unit of work
//! maps to one context.
//!
//! [`DbFactory::context`]: crate::factory::DbFactory::context

use std::any::TypeId;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Document, doc};
use chrono::Utc;
use mongodb::options::{InsertManyOptions, ReplaceOptions, TransactionOptions};
use mongodb::{Client, ClientSession, Collection, Database};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::builders::{
    Delete, Distinct, Find, ProjectedDelete, ProjectedFind, ProjectedSoftDelete, ProjectedUpdate,
    SoftDelete, Update,
};
use crate::entity::{Entity, id_to_bson};
use crate::error::{Error, Result};
use crate::factory::SharedState;
use crate::filter::match_id;
use crate::metadata::TypeMeta;
use crate::session::{SessionSlot, Transaction};

/// Handle for running commands against one database.
#[derive(Clone, Debug)]
pub struct DbContext {
    client: Client,
    database: Database,
    ignore_global_filters: bool,
    state: Arc<SharedState>,
    session: SessionSlot,
}

impl DbContext {
    pub(crate) fn new(
        client: Client,
        database: Database,
        ignore_global_filters: bool,
        state: Arc<SharedState>,
    ) -> Self {
        Self {
            client,
            database,
            ignore_global_filters,
            state,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// The underlying driver database.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// The underlying driver client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The typed collection an entity type resolves to.
    pub fn collection<T: Entity>(&self) -> Result<Collection<T>> {
        let meta = self.meta_of::<T>()?;
        Ok(self.typed_collection(&meta.collection))
    }

    /// The audit companion collection for an entity type.
    pub fn log_collection<T: Entity>(&self) -> Result<Collection<Document>> {
        let meta = self.meta_of::<T>()?;
        Ok(self.typed_collection(&meta.companion_collection(LOG_SUFFIX)))
    }

    pub(crate) fn meta_of<T: Entity>(&self) -> Result<Arc<TypeMeta>> {
        self.state.metadata_for::<T>()
    }

    pub(crate) fn typed_collection<C>(&self, name: &str) -> Collection<C> {
        self.database.collection(name)
    }

    pub(crate) fn merge_global_filter<T: Entity>(&self, filter: Document) -> Document {
        if self.ignore_global_filters {
            filter
        } else {
            self.state.filters.merge(TypeId::of::<T>(), filter)
        }
    }

    pub(crate) async fn lock_session(&self) -> OwnedMutexGuard<Option<ClientSession>> {
        Arc::clone(&self.session).lock_owned().await
    }

    // --- transactions ------------------------------------------------------

    /// Start a transaction on this context.
    ///
    /// Every builder executed before the returned [`Transaction`] commits
    /// or drops runs on its session. Fails when a transaction is already
    /// active on this context.
    pub async fn transaction(
        &self,
        options: impl Into<Option<TransactionOptions>>,
    ) -> Result<Transaction> {
        let options = options.into();
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Err(Error::invalid_operation("Transaction already started"));
        }

        let mut session = self.client.start_session(None).await?;
        session.start_transaction(options).await?;
        *guard = Some(session);

        debug!(database = %self.database.name(), "transaction started");
        Ok(Transaction::new(Arc::clone(&self.session)))
    }

    // --- builder factories -------------------------------------------------

    /// Find over all documents of `T`.
    pub fn find<T: Entity>(&self) -> Find<T> {
        Find::new(self.clone(), doc! {})
    }

    /// Find with a starting filter.
    pub fn find_filtered<T: Entity>(&self, filter: impl Into<Document>) -> Find<T> {
        Find::new(self.clone(), filter.into())
    }

    /// Find returning a projected shape.
    pub fn find_projected<T, P>(&self) -> ProjectedFind<T, P>
    where
        T: Entity,
        P: DeserializeOwned + Unpin + Send + Sync,
    {
        ProjectedFind::new(self.clone(), doc! {})
    }

    /// Projected find with a starting filter.
    pub fn find_projected_filtered<T, P>(&self, filter: impl Into<Document>) -> ProjectedFind<T, P>
    where
        T: Entity,
        P: DeserializeOwned + Unpin + Send + Sync,
    {
        ProjectedFind::new(self.clone(), filter.into())
    }

    /// Update all documents matching `filter`.
    pub fn update<T: Entity>(&self, filter: impl Into<Document>) -> Update<T> {
        Update::new(self.clone(), filter.into())
    }

    /// Update returning a projected shape from find-and-modify.
    pub fn update_projected<T, P>(&self, filter: impl Into<Document>) -> ProjectedUpdate<T, P>
    where
        T: Entity,
        P: DeserializeOwned + Unpin + Send + Sync,
    {
        ProjectedUpdate::new(self.clone(), filter.into())
    }

    /// Hard delete of documents matching `filter`.
    pub fn delete<T: Entity>(&self, filter: impl Into<Document>) -> Delete<T> {
        Delete::new(self.clone(), filter.into())
    }

    /// Hard delete returning a projected shape from get-and-execute.
    pub fn delete_projected<T, P>(&self, filter: impl Into<Document>) -> ProjectedDelete<T, P>
    where
        T: Entity,
        P: DeserializeOwned + Unpin + Send + Sync,
    {
        ProjectedDelete::new(self.clone(), filter.into())
    }

    /// Soft delete of documents matching `filter`.
    pub fn soft_delete<T: Entity>(&self, filter: impl Into<Document>) -> SoftDelete<T> {
        SoftDelete::new(self.clone(), filter.into())
    }

    /// Soft delete returning a projected shape from execute-and-get.
    pub fn soft_delete_projected<T, P>(
        &self,
        filter: impl Into<Document>,
    ) -> ProjectedSoftDelete<T, P>
    where
        T: Entity,
        P: DeserializeOwned + Unpin + Send + Sync,
    {
        ProjectedSoftDelete::new(self.clone(), filter.into())
    }

    /// Distinct values of one field across all documents of `T`.
    pub fn distinct<T, V>(&self) -> Distinct<T, V>
    where
        T: Entity,
        V: DeserializeOwned + Send + Sync,
    {
        Distinct::new(self.clone(), doc! {})
    }

    /// Distinct with a starting filter.
    pub fn distinct_filtered<T, V>(&self, filter: impl Into<Document>) -> Distinct<T, V>
    where
        T: Entity,
        V: DeserializeOwned + Send + Sync,
    {
        Distinct::new(self.clone(), filter.into())
    }

    // --- save --------------------------------------------------------------

    /// Persist one entity.
    ///
    /// An entity with no identifier is assigned one and inserted, with the
    /// creation timestamp populated when declared. An entity with an
    /// identifier is replaced (upsert), with the modification timestamp
    /// touched when declared; its identifier is never re-assigned.
    pub async fn save<T: Entity>(&self, entity: &mut T) -> Result<()> {
        let meta = self.meta_of::<T>()?;
        let collection = self.typed_collection::<T>(&meta.collection);
        let for_insert = prepare_for_save(entity, &meta);

        debug!(collection = %meta.collection, insert = for_insert, "saving entity");

        let mut guard = self.lock_session().await;
        match guard.take() {
            Some(mut session) => {
                let dispatched = if for_insert {
                    collection
                        .insert_one_with_session(&*entity, None, &mut session)
                        .await
                        .map(|_| ())
                } else {
                    collection
                        .replace_one_with_session(
                            match_id(entity.id()),
                            &*entity,
                            upsert_options(),
                            &mut session,
                        )
                        .await
                        .map(|_| ())
                };
                *guard = Some(session);
                dispatched?;
            }
            None => {
                drop(guard);
                if for_insert {
                    collection.insert_one(&*entity, None).await?;
                } else {
                    collection
                        .replace_one(match_id(entity.id()), &*entity, upsert_options())
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// Persist a batch of entities: fresh ones are inserted in one batch,
    /// existing ones replaced (upsert) individually.
    pub async fn save_many<T: Entity>(&self, entities: &mut [T]) -> Result<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let meta = self.meta_of::<T>()?;
        let collection = self.typed_collection::<T>(&meta.collection);

        let mut inserts = Vec::new();
        let mut replaces = Vec::new();
        for (index, entity) in entities.iter_mut().enumerate() {
            if prepare_for_save(entity, &meta) {
                inserts.push(index);
            } else {
                replaces.push(index);
            }
        }

        debug!(
            collection = %meta.collection,
            inserts = inserts.len(),
            replaces = replaces.len(),
            "saving batch"
        );

        let mut guard = self.lock_session().await;
        match guard.take() {
            Some(mut session) => {
                let mut dispatched = Ok(());
                if !inserts.is_empty() {
                    dispatched = collection
                        .insert_many_with_session(
                            inserts.iter().map(|&i| &entities[i]),
                            unordered_options(),
                            &mut session,
                        )
                        .await
                        .map(|_| ());
                }
                if dispatched.is_ok() {
                    for &index in &replaces {
                        dispatched = collection
                            .replace_one_with_session(
                                match_id(entities[index].id()),
                                &entities[index],
                                upsert_options(),
                                &mut session,
                            )
                            .await
                            .map(|_| ());
                        if dispatched.is_err() {
                            break;
                        }
                    }
                }
                *guard = Some(session);
                dispatched?;
            }
            None => {
                drop(guard);
                if !inserts.is_empty() {
                    collection
                        .insert_many(inserts.iter().map(|&i| &entities[i]), unordered_options())
                        .await?;
                }
                for &index in &replaces {
                    collection
                        .replace_one(
                            match_id(entities[index].id()),
                            &entities[index],
                            upsert_options(),
                        )
                        .await?;
                }
            }
        }
        Ok(())
    }

    // --- counting ----------------------------------------------------------

    /// Count all documents of `T`, global filter included.
    pub async fn count<T: Entity>(&self) -> Result<u64> {
        self.count_filtered::<T>(doc! {}).await
    }

    /// Count documents matching `filter`, global filter included.
    pub async fn count_filtered<T: Entity>(&self, filter: impl Into<Document>) -> Result<u64> {
        let meta = self.meta_of::<T>()?;
        let filter = self.merge_global_filter::<T>(filter.into());
        let collection = self.typed_collection::<T>(&meta.collection);

        let mut guard = self.lock_session().await;
        match guard.take() {
            Some(mut session) => {
                let dispatched = collection
                    .count_documents_with_session(filter, None, &mut session)
                    .await;
                *guard = Some(session);
                Ok(dispatched?)
            }
            None => {
                drop(guard);
                Ok(collection.count_documents(filter, None).await?)
            }
        }
    }

    /// Estimated document count from collection metadata; fast, sessionless
    /// and unfiltered.
    pub async fn count_estimated<T: Entity>(&self) -> Result<u64> {
        let meta = self.meta_of::<T>()?;
        let collection = self.typed_collection::<T>(&meta.collection);
        Ok(collection.estimated_document_count(None).await?)
    }

    // --- audit logging -----------------------------------------------------

    /// Copy one entity into its `"{collection}.log"` companion collection.
    ///
    /// The copy keeps every field, records the original identifier under
    /// `old_id`, and gets a fresh `_id` so log documents never collide.
    pub async fn log_entity<T: Entity>(&self, entity: &T) -> Result<()> {
        let docs = vec![audit_document(entity)?];
        self.log_documents::<T>(docs).await
    }

    /// Copy a batch of entities into the audit companion collection.
    pub async fn log_many<T: Entity>(&self, entities: &[T]) -> Result<()> {
        let docs: Result<Vec<Document>> = entities.iter().map(audit_document).collect();
        self.log_documents::<T>(docs?).await
    }

    /// Fetch one entity by id and copy it into the audit collection.
    pub async fn log_by_id<T: Entity>(&self, id: &str) -> Result<()> {
        let entity = self.find_filtered::<T>(match_id(id)).execute_first().await?;
        self.log_entity(&entity).await
    }

    /// Fetch all entities matching `filter` and copy them into the audit
    /// collection.
    pub async fn log_filtered<T: Entity>(&self, filter: impl Into<Document>) -> Result<()> {
        let entities = self.find_filtered::<T>(filter).execute().await?;
        self.log_many(&entities).await
    }

    async fn log_documents<T: Entity>(&self, docs: Vec<Document>) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let meta = self.meta_of::<T>()?;
        let collection =
            self.typed_collection::<Document>(&meta.companion_collection(LOG_SUFFIX));

        debug!(collection = %meta.collection, count = docs.len(), "writing audit copies");

        let mut guard = self.lock_session().await;
        match guard.take() {
            Some(mut session) => {
                let dispatched = collection
                    .insert_many_with_session(&docs, None, &mut session)
                    .await;
                *guard = Some(session);
                dispatched?;
            }
            None => {
                drop(guard);
                collection.insert_many(&docs, None).await?;
            }
        }
        Ok(())
    }

    // --- database upkeep ---------------------------------------------------

    /// Check whether this context's database exists on the server.
    pub async fn exists(&self) -> Result<bool> {
        let names = self
            .client
            .list_database_names(doc! { "name": self.database.name() }, None)
            .await?;
        Ok(!names.is_empty())
    }

    /// Drop this context's database.
    pub async fn drop_database(&self) -> Result<()> {
        debug!(database = %self.database.name(), "dropping database");
        self.database.drop(None).await?;
        Ok(())
    }
}

const LOG_SUFFIX: &str = "log";

fn upsert_options() -> ReplaceOptions {
    ReplaceOptions::builder().upsert(true).build()
}

fn unordered_options() -> InsertManyOptions {
    InsertManyOptions::builder().ordered(false).build()
}

/// Assign an id and touch timestamps as declared; true means insert,
/// false means replace-with-upsert.
fn prepare_for_save<T: Entity>(entity: &mut T, meta: &TypeMeta) -> bool {
    if entity.id().is_empty() {
        entity.set_id(T::generate_id());
        if meta.capabilities.created_on {
            entity.touch_created_on(Utc::now());
        }
        true
    } else {
        if meta.capabilities.modified_on {
            entity.touch_modified_on(Utc::now());
        }
        false
    }
}

fn audit_document<T: Entity>(entity: &T) -> Result<Document> {
    let mut doc = bson::to_document(entity)?;
    doc.insert("old_id", id_to_bson(entity.id()));
    doc.insert("_id", ObjectId::new());
    Ok(doc)
}
