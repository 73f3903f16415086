//! Update builders: update-many and atomic find-and-modify.

use std::marker::PhantomData;

use bson::{Document, doc};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::builders::{UpdateSummary, combine_updates};
use crate::context::DbContext;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::metadata::TypeMeta;

/// Append the modified-on touch for types that declare the capability.
pub(crate) fn touch_modified_on(ops: &mut Vec<Document>, meta: &TypeMeta) {
    if meta.capabilities.modified_on {
        ops.push(doc! { "$currentDate": { meta.fields.modified_on.as_str(): true } });
    }
}

fn prepared_update(ops: &[Document]) -> Result<Document> {
    if ops.is_empty() {
        return Err(Error::configuration("No update operations specified"));
    }
    Ok(combine_updates(ops))
}

/// Fluent update over all documents matching a filter.
///
/// Created by [`DbContext::update`]; single use.
pub struct Update<T: Entity> {
    ctx: DbContext,
    filter: Document,
    ops: Vec<Document>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Update<T> {
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            ops: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Append one field-mutation operation, e.g. `doc! { "$set": { … } }`.
    pub fn modify(mut self, op: Document) -> Self {
        self.ops.push(op);
        self
    }

    /// Append several field-mutation operations in order.
    pub fn modify_all(mut self, ops: impl IntoIterator<Item = Document>) -> Self {
        self.ops.extend(ops);
        self
    }

    /// Dispatch an update-many.
    pub async fn execute(mut self) -> Result<UpdateSummary> {
        let meta = self.ctx.meta_of::<T>()?;
        touch_modified_on(&mut self.ops, &meta);
        let update = prepared_update(&self.ops)?;
        let filter = self.ctx.merge_global_filter::<T>(self.filter);
        let collection = self.ctx.typed_collection::<T>(&meta.collection);

        debug!(collection = %meta.collection, "dispatching update");

        let mut guard = self.ctx.lock_session().await;
        let result = match guard.take() {
            Some(mut session) => {
                let dispatched = collection
                    .update_many_with_session(filter, update, None, &mut session)
                    .await;
                *guard = Some(session);
                dispatched?
            }
            None => {
                drop(guard);
                collection.update_many(filter, update, None).await?
            }
        };

        Ok(UpdateSummary {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            acknowledged: true,
        })
    }

    /// Dispatch an atomic find-and-modify returning the post-update
    /// document; fails with `NotFound` when nothing matched.
    pub async fn execute_and_get(mut self) -> Result<T> {
        let meta = self.ctx.meta_of::<T>()?;
        touch_modified_on(&mut self.ops, &meta);
        let update = prepared_update(&self.ops)?;
        let filter = self.ctx.merge_global_filter::<T>(self.filter);

        find_and_modify::<T, T>(&self.ctx, &meta, filter, update, None)
            .await?
            .ok_or_else(|| Error::not_found("No item updated"))
    }
}

/// Update variant returning a projected shape from find-and-modify.
#[derive(Debug)]
pub struct ProjectedUpdate<T: Entity, P> {
    ctx: DbContext,
    filter: Document,
    ops: Vec<Document>,
    projection: Option<Document>,
    _marker: PhantomData<fn() -> (T, P)>,
}

impl<T, P> ProjectedUpdate<T, P>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            ops: Vec::new(),
            projection: None,
            _marker: PhantomData,
        }
    }

    /// Append one field-mutation operation.
    pub fn modify(mut self, op: Document) -> Self {
        self.ops.push(op);
        self
    }

    /// Set the projection. Fails if one was already set.
    pub fn project(mut self, projection: Document) -> Result<Self> {
        if self.projection.is_some() {
            return Err(Error::configuration("Projection already set"));
        }
        self.projection = Some(projection);
        Ok(self)
    }

    /// Dispatch an atomic find-and-modify returning the projected
    /// post-update document.
    pub async fn execute_and_get(mut self) -> Result<P> {
        let Some(projection) = self.projection.take() else {
            return Err(Error::configuration("Projection not set"));
        };

        let meta = self.ctx.meta_of::<T>()?;
        touch_modified_on(&mut self.ops, &meta);
        let update = prepared_update(&self.ops)?;
        let filter = self.ctx.merge_global_filter::<T>(self.filter);

        find_and_modify::<T, P>(&self.ctx, &meta, filter, update, Some(projection))
            .await?
            .ok_or_else(|| Error::not_found("No item updated"))
    }
}

/// Session-aware find-one-and-update returning the post-update document.
pub(crate) async fn find_and_modify<T, P>(
    ctx: &DbContext,
    meta: &TypeMeta,
    filter: Document,
    update: Document,
    projection: Option<Document>,
) -> Result<Option<P>>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    let mut options = FindOneAndUpdateOptions::default();
    options.return_document = Some(ReturnDocument::After);
    options.projection = projection;

    let collection = ctx.typed_collection::<P>(&meta.collection);

    debug!(collection = %meta.collection, "dispatching find-and-modify");

    let mut guard = ctx.lock_session().await;
    match guard.take() {
        Some(mut session) => {
            let dispatched = collection
                .find_one_and_update_with_session(filter, update, options, &mut session)
                .await;
            *guard = Some(session);
            Ok(dispatched?)
        }
        None => {
            drop(guard);
            Ok(collection.find_one_and_update(filter, update, options).await?)
        }
    }
}
