//! Distinct builder: unique values of one field across matching documents.

use std::marker::PhantomData;

use bson::Document;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::context::DbContext;
use crate::entity::Entity;
use crate::error::{Error, Result};

/// Fluent distinct over one field of `T`, deserialized as `V`.
///
/// Created by [`DbContext::distinct`]; the target field must be set
/// exactly once before execution. Result order is not guaranteed.
#[derive(Debug)]
pub struct Distinct<T: Entity, V> {
    ctx: DbContext,
    filter: Document,
    field: Option<String>,
    _marker: PhantomData<fn() -> (T, V)>,
}

impl<T, V> Distinct<T, V>
where
    T: Entity,
    V: DeserializeOwned + Send + Sync,
{
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            filter,
            field: None,
            _marker: PhantomData,
        }
    }

    /// Name the field to collect unique values from. Fails if one was
    /// already set.
    pub fn property(mut self, field: impl Into<String>) -> Result<Self> {
        if self.field.is_some() {
            return Err(Error::configuration("Property already set"));
        }
        self.field = Some(field.into());
        Ok(self)
    }

    /// Dispatch the distinct and collect the unique values.
    pub async fn execute(self) -> Result<Vec<V>> {
        let Some(field) = self.field else {
            return Err(Error::configuration(
                "Please specify what property to use for obtaining unique values",
            ));
        };

        let meta = self.ctx.meta_of::<T>()?;
        let filter = self.ctx.merge_global_filter::<T>(self.filter);
        let collection = self.ctx.typed_collection::<T>(&meta.collection);

        debug!(collection = %meta.collection, field = %field, "dispatching distinct");

        let mut guard = self.ctx.lock_session().await;
        let values = match guard.take() {
            Some(mut session) => {
                let dispatched = collection
                    .distinct_with_session(&field, filter, None, &mut session)
                    .await;
                *guard = Some(session);
                dispatched?
            }
            None => {
                drop(guard);
                collection.distinct(&field, filter, None).await?
            }
        };

        values
            .into_iter()
            .map(|value| bson::from_bson(value).map_err(Error::from))
            .collect()
    }
}
