//! Hard-delete builders.
//!
//! Unless explicitly forced, deletes never touch records flagged as
//! system-generated; the filter is silently narrowed for types declaring
//! that capability.

use std::marker::PhantomData;

use bson::Document;
use mongodb::options::FindOneAndDeleteOptions;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::builders::{DeleteSummary, narrow_protected};
use crate::context::DbContext;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::metadata::TypeMeta;

/// Fluent hard delete.
///
/// Created by [`DbContext::delete`]; single use.
pub struct Delete<T: Entity> {
    ctx: DbContext,
    filter: Document,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Delete<T> {
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            _marker: PhantomData,
        }
    }

    /// Delete every matching document.
    pub async fn execute_many(self, force_delete: bool) -> Result<DeleteSummary> {
        self.dispatch(force_delete, true).await
    }

    /// Delete at most one matching document.
    pub async fn execute_one(self, force_delete: bool) -> Result<DeleteSummary> {
        self.dispatch(force_delete, false).await
    }

    /// Atomically delete one matching document and return it.
    ///
    /// Fails with `NotFound` when nothing matched, so "nothing to delete"
    /// is never mistaken for success.
    pub async fn get_and_execute(self, force_delete: bool) -> Result<T> {
        let meta = self.ctx.meta_of::<T>()?;
        let filter = self.prepared_filter(&meta, force_delete);

        find_and_delete::<T, T>(&self.ctx, &meta, filter, None)
            .await?
            .ok_or_else(|| Error::not_found("No item deleted"))
    }

    fn prepared_filter(&self, meta: &TypeMeta, force_delete: bool) -> Document {
        let narrowed = narrow_protected(self.filter.clone(), meta, force_delete);
        self.ctx.merge_global_filter::<T>(narrowed)
    }

    async fn dispatch(self, force_delete: bool, many: bool) -> Result<DeleteSummary> {
        let meta = self.ctx.meta_of::<T>()?;
        let filter = self.prepared_filter(&meta, force_delete);
        let collection = self.ctx.typed_collection::<T>(&meta.collection);

        debug!(collection = %meta.collection, many, "dispatching delete");

        let mut guard = self.ctx.lock_session().await;
        let result = match guard.take() {
            Some(mut session) => {
                let dispatched = if many {
                    collection
                        .delete_many_with_session(filter, None, &mut session)
                        .await
                } else {
                    collection
                        .delete_one_with_session(filter, None, &mut session)
                        .await
                };
                *guard = Some(session);
                dispatched?
            }
            None => {
                drop(guard);
                if many {
                    collection.delete_many(filter, None).await?
                } else {
                    collection.delete_one(filter, None).await?
                }
            }
        };

        Ok(DeleteSummary {
            deleted_count: result.deleted_count,
            acknowledged: true,
        })
    }
}

/// Hard-delete variant returning a projected shape from get-and-execute.
#[derive(Debug)]
pub struct ProjectedDelete<T: Entity, P> {
    ctx: DbContext,
    filter: Document,
    projection: Option<Document>,
    _marker: PhantomData<fn() -> (T, P)>,
}

impl<T, P> ProjectedDelete<T, P>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            projection: None,
            _marker: PhantomData,
        }
    }

    /// Set the projection. Fails if one was already set.
    pub fn project(mut self, projection: Document) -> Result<Self> {
        if self.projection.is_some() {
            return Err(Error::configuration("Projection already set"));
        }
        self.projection = Some(projection);
        Ok(self)
    }

    /// Atomically delete one matching document and return its projection.
    pub async fn get_and_execute(mut self, force_delete: bool) -> Result<P> {
        let Some(projection) = self.projection.take() else {
            return Err(Error::configuration("Projection not set"));
        };

        let meta = self.ctx.meta_of::<T>()?;
        let narrowed = narrow_protected(self.filter.clone(), &meta, force_delete);
        let filter = self.ctx.merge_global_filter::<T>(narrowed);

        find_and_delete::<T, P>(&self.ctx, &meta, filter, Some(projection))
            .await?
            .ok_or_else(|| Error::not_found("No item deleted"))
    }
}

/// Session-aware find-one-and-delete.
async fn find_and_delete<T, P>(
    ctx: &DbContext,
    meta: &TypeMeta,
    filter: Document,
    projection: Option<Document>,
) -> Result<Option<P>>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    let mut options = FindOneAndDeleteOptions::default();
    options.projection = projection;

    let collection = ctx.typed_collection::<P>(&meta.collection);

    debug!(collection = %meta.collection, "dispatching get-and-delete");

    let mut guard = ctx.lock_session().await;
    match guard.take() {
        Some(mut session) => {
            let dispatched = collection
                .find_one_and_delete_with_session(filter, options, &mut session)
                .await;
            *guard = Some(session);
            Ok(dispatched?)
        }
        None => {
            drop(guard);
            Ok(collection.find_one_and_delete(filter, options).await?)
        }
    }
}
