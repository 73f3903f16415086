//! Soft-delete builders: update-based deletes that flag instead of remove.
//!
//! The mutation document is built fresh on every execute call — `deleted`,
//! `deleted_by`, `deleted_on`, plus the modified-on touch when declared —
//! so one builder never accumulates state across calls. The same
//! system-generated protection applies as for hard deletes.

use std::marker::PhantomData;

use bson::{Document, doc};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::builders::update::find_and_modify;
use crate::builders::{DeleteSummary, narrow_protected};
use crate::context::DbContext;
use crate::entity::{DeletedBy, Entity};
use crate::error::{Error, Result};
use crate::metadata::TypeMeta;

/// Build the soft-delete mutation document for one execute call.
pub(crate) fn soft_delete_update(
    meta: &TypeMeta,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<Document> {
    let deleted_by = bson::to_bson(&DeletedBy::from(actor_id))?;

    let mut update = doc! {
        "$set": {
            meta.fields.deleted.as_str(): true,
            meta.fields.deleted_by.as_str(): deleted_by,
            meta.fields.deleted_on.as_str(): bson::DateTime::from_chrono(now),
        },
    };
    if meta.capabilities.modified_on {
        update.insert(
            "$currentDate",
            doc! { meta.fields.modified_on.as_str(): true },
        );
    }
    Ok(update)
}

fn ensure_soft_deletable(meta: &TypeMeta) -> Result<()> {
    if !meta.capabilities.soft_delete {
        return Err(Error::validation(format!(
            "'{}' entities do not declare the soft-delete capability",
            meta.collection
        )));
    }
    Ok(())
}

/// Fluent soft delete.
///
/// Created by [`DbContext::soft_delete`]; single use. The entity type must
/// declare the soft-delete capability.
pub struct SoftDelete<T: Entity> {
    ctx: DbContext,
    filter: Document,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> SoftDelete<T> {
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            _marker: PhantomData,
        }
    }

    /// Flag every matching document as deleted.
    pub async fn execute_many(self, actor_id: &str, force_delete: bool) -> Result<DeleteSummary> {
        self.dispatch(actor_id, force_delete, true).await
    }

    /// Flag at most one matching document as deleted.
    pub async fn execute_one(self, actor_id: &str, force_delete: bool) -> Result<DeleteSummary> {
        self.dispatch(actor_id, force_delete, false).await
    }

    /// Atomically flag one matching document and return it post-mutation;
    /// `None` when nothing matched.
    pub async fn execute_and_get(
        self,
        actor_id: &str,
        force_delete: bool,
    ) -> Result<Option<T>> {
        let meta = self.ctx.meta_of::<T>()?;
        ensure_soft_deletable(&meta)?;

        let narrowed = narrow_protected(self.filter, &meta, force_delete);
        let filter = self.ctx.merge_global_filter::<T>(narrowed);
        let update = soft_delete_update(&meta, actor_id, Utc::now())?;

        find_and_modify::<T, T>(&self.ctx, &meta, filter, update, None).await
    }

    async fn dispatch(
        self,
        actor_id: &str,
        force_delete: bool,
        many: bool,
    ) -> Result<DeleteSummary> {
        let meta = self.ctx.meta_of::<T>()?;
        ensure_soft_deletable(&meta)?;

        let narrowed = narrow_protected(self.filter, &meta, force_delete);
        let filter = self.ctx.merge_global_filter::<T>(narrowed);
        let update = soft_delete_update(&meta, actor_id, Utc::now())?;
        let collection = self.ctx.typed_collection::<T>(&meta.collection);

        debug!(collection = %meta.collection, many, "dispatching soft delete");

        let mut guard = self.ctx.lock_session().await;
        let result = match guard.take() {
            Some(mut session) => {
                let dispatched = if many {
                    collection
                        .update_many_with_session(filter, update, None, &mut session)
                        .await
                } else {
                    collection
                        .update_one_with_session(filter, update, None, &mut session)
                        .await
                };
                *guard = Some(session);
                dispatched?
            }
            None => {
                drop(guard);
                if many {
                    collection.update_many(filter, update, None).await?
                } else {
                    collection.update_one(filter, update, None).await?
                }
            }
        };

        Ok(DeleteSummary {
            deleted_count: result.modified_count,
            acknowledged: true,
        })
    }
}

/// Soft-delete variant returning a projected shape from execute-and-get.
#[derive(Debug)]
pub struct ProjectedSoftDelete<T: Entity, P> {
    ctx: DbContext,
    filter: Document,
    projection: Option<Document>,
    _marker: PhantomData<fn() -> (T, P)>,
}

impl<T, P> ProjectedSoftDelete<T, P>
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

    /// Atomically flag one matching document and return its projection
    /// post-mutation; `None` when nothing matched.
    pub async fn execute_and_get(
        mut self,
        actor_id: &str,
        force_delete: bool,
    ) -> Result<Option<P>> {
        let Some(projection) = self.projection.take() else {
            return Err(Error::configuration("Projection not set"));
        };

        let meta = self.ctx.meta_of::<T>()?;
        ensure_soft_deletable(&meta)?;

        let narrowed = narrow_protected(self.filter, &meta, force_delete);
        let filter = self.ctx.merge_global_filter::<T>(narrowed);
        let update = soft_delete_update(&meta, actor_id, Utc::now())?;

        find_and_modify::<T, P>(&self.ctx, &meta, filter, update, Some(projection)).await
    }
}
