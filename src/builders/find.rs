//! Find builders and the session-aware result cursor.

use std::marker::PhantomData;

use bson::{Document, doc};
use futures::TryStreamExt;
use mongodb::options::{Collation, FindOptions};
use mongodb::{ClientSession, Cursor, SessionCursor};
use serde::de::DeserializeOwned;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::builders::{Order, combine_sorts};
use crate::context::DbContext;
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::filter::match_id;

/// Accumulated query state, shared by both find builders.
#[derive(Debug, Clone)]
pub(crate) struct FindSpec {
    pub(crate) filter: Document,
    pub(crate) sorts: Vec<Document>,
    pub(crate) skip: Option<u64>,
    pub(crate) limit: Option<i64>,
    pub(crate) collation: Collation,
    pub(crate) projection: Option<Document>,
}

impl FindSpec {
    pub(crate) fn new(filter: Document) -> Self {
        Self {
            filter,
            sorts: Vec::new(),
            skip: None,
            limit: None,
            collation: Collation::builder().locale(String::from("en_US")).build(),
            projection: None,
        }
    }

    pub(crate) fn set_projection(&mut self, projection: Document) -> Result<()> {
        if self.projection.is_some() {
            return Err(Error::configuration("Projection already set"));
        }
        self.projection = Some(projection);
        Ok(())
    }

    pub(crate) fn to_options(&self) -> FindOptions {
        let mut options = FindOptions::default();
        if !self.sorts.is_empty() {
            options.sort = Some(combine_sorts(&self.sorts));
        }
        options.skip = self.skip;
        options.limit = self.limit;
        options.collation = Some(self.collation.clone());
        options.projection = self.projection.clone();
        options
    }
}

/// Lazy, forward-only, single-pass sequence of query results.
///
/// When the query ran on a transaction session the cursor keeps the
/// context's session locked until it is dropped; drain or drop it before
/// committing.
pub struct FindCursor<P> {
    inner: CursorInner<P>,
}

enum CursorInner<P> {
    Plain(Cursor<P>),
    Session {
        cursor: SessionCursor<P>,
        guard: OwnedMutexGuard<Option<ClientSession>>,
    },
}

impl<P> FindCursor<P>
where
    P: DeserializeOwned + Unpin + Send + Sync,
{
    fn plain(cursor: Cursor<P>) -> Self {
        Self {
            inner: CursorInner::Plain(cursor),
        }
    }

    fn with_session(cursor: SessionCursor<P>, guard: OwnedMutexGuard<Option<ClientSession>>) -> Self {
        Self {
            inner: CursorInner::Session { cursor, guard },
        }
    }

    /// Advance to the next result, or `None` once exhausted.
    pub async fn try_next(&mut self) -> Result<Option<P>> {
        match &mut self.inner {
            CursorInner::Plain(cursor) => {
                if cursor.advance().await? {
                    Ok(Some(cursor.deserialize_current()?))
                } else {
                    Ok(None)
                }
            }
            CursorInner::Session { cursor, guard } => match guard.take() {
                Some(mut session) => {
                    let advanced = cursor.advance(&mut session).await;
                    **guard = Some(session);
                    if advanced? {
                        Ok(Some(cursor.deserialize_current()?))
                    } else {
                        Ok(None)
                    }
                }
                None => Ok(None),
            },
        }
    }
}

async fn open_cursor<T, P>(ctx: &DbContext, spec: &FindSpec) -> Result<FindCursor<P>>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    let meta = ctx.meta_of::<T>()?;
    let options = spec.to_options();
    let filter = ctx.merge_global_filter::<T>(spec.filter.clone());
    let collection = ctx.typed_collection::<P>(&meta.collection);

    debug!(collection = %meta.collection, "dispatching find");

    let mut guard = ctx.lock_session().await;
    match guard.take() {
        Some(mut session) => {
            let opened = collection
                .find_with_session(filter, options, &mut session)
                .await;
            *guard = Some(session);
            Ok(FindCursor::with_session(opened?, guard))
        }
        None => {
            drop(guard);
            Ok(FindCursor::plain(collection.find(filter, options).await?))
        }
    }
}

async fn fetch_all<T, P>(ctx: &DbContext, spec: &FindSpec) -> Result<Vec<P>>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    let cursor = open_cursor::<T, P>(ctx, spec).await?;
    match cursor.inner {
        CursorInner::Plain(plain) => Ok(plain.try_collect().await?),
        inner @ CursorInner::Session { .. } => {
            let mut cursor = FindCursor { inner };
            let mut items = Vec::new();
            while let Some(item) = cursor.try_next().await? {
                items.push(item);
            }
            Ok(items)
        }
    }
}

/// Fetch with a capped server-side limit; reports whether a second result
/// exists so single-semantics never fetch unboundedly.
async fn fetch_capped<T, P>(ctx: &DbContext, spec: &mut FindSpec, cap: i64) -> Result<(Option<P>, bool)>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    spec.limit = Some(cap);
    let mut cursor = open_cursor::<T, P>(ctx, spec).await?;

    let first = cursor.try_next().await?;
    let more = if cap > 1 && first.is_some() {
        cursor.try_next().await?.is_some()
    } else {
        false
    };
    Ok((first, more))
}

async fn fetch_single<T, P>(ctx: &DbContext, spec: &mut FindSpec) -> Result<Option<P>>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    // Cap at two so "exactly one" is distinguishable from "more than one"
    // without fetching the full result set.
    let (first, more) = fetch_capped::<T, P>(ctx, spec, 2).await?;
    if more {
        return Err(Error::invalid_operation(
            "more than one document matched the filter",
        ));
    }
    Ok(first)
}

fn required<P>(found: Option<P>) -> Result<P> {
    found.ok_or_else(|| Error::not_found("no document matched the filter"))
}

macro_rules! find_terminals {
    ($output:ident) => {
        /// Execute and return a lazy cursor over the results.
        pub async fn execute_cursor(self) -> Result<FindCursor<$output>> {
            self.check_ready()?;
            open_cursor::<T, $output>(&self.ctx, &self.spec).await
        }

        /// Execute and drain all results into a list.
        pub async fn execute(self) -> Result<Vec<$output>> {
            self.check_ready()?;
            fetch_all::<T, $output>(&self.ctx, &self.spec).await
        }

        /// Execute expecting exactly one match; zero or several fail.
        pub async fn execute_single(mut self) -> Result<$output> {
            self.check_ready()?;
            required(fetch_single::<T, $output>(&self.ctx, &mut self.spec).await?)
        }

        /// Execute expecting at most one match; several fail, zero is `None`.
        pub async fn execute_single_or_default(mut self) -> Result<Option<$output>> {
            self.check_ready()?;
            fetch_single::<T, $output>(&self.ctx, &mut self.spec).await
        }

        /// Execute and return the first match; zero matches fail.
        pub async fn execute_first(mut self) -> Result<$output> {
            self.check_ready()?;
            let (first, _) = fetch_capped::<T, $output>(&self.ctx, &mut self.spec, 1).await?;
            required(first)
        }

        /// Execute and return the first match, if any.
        pub async fn execute_first_or_default(mut self) -> Result<Option<$output>> {
            self.check_ready()?;
            let (first, _) = fetch_capped::<T, $output>(&self.ctx, &mut self.spec, 1).await?;
            Ok(first)
        }

        /// Fetch the document with the given id; zero or several fail.
        pub async fn one(mut self, id: &str) -> Result<$output> {
            self.spec.filter = match_id(id);
            self.execute_single().await
        }

        /// Fetch the document with the given id, if present.
        pub async fn one_or_default(mut self, id: &str) -> Result<Option<$output>> {
            self.spec.filter = match_id(id);
            self.execute_single_or_default().await
        }

        /// Replace the filter and drain all matches.
        pub async fn many(mut self, filter: impl Into<Document>) -> Result<Vec<$output>> {
            self.spec.filter = filter.into();
            self.execute().await
        }
    };
}

/// Fluent find over full entities.
///
/// Created by [`DbContext::find`] or [`DbContext::find_filtered`]; single
/// use, consumed by any terminal call.
pub struct Find<T: Entity> {
    ctx: DbContext,
    spec: FindSpec,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Find<T> {
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            spec: FindSpec::new(filter),
            _marker: PhantomData,
        }
    }

    /// Replace the base filter.
    pub fn filter(mut self, filter: impl Into<Document>) -> Self {
        self.spec.filter = filter.into();
        self
    }

    /// Append a sort clause; later clauses break ties for earlier ones.
    pub fn sort(mut self, sort: Document) -> Self {
        self.spec.sorts.push(sort);
        self
    }

    /// Append a single-field sort clause.
    pub fn sort_by(self, field: &str, order: Order) -> Self {
        self.sort(doc! { field: order.key() })
    }

    /// Skip the first `n` results.
    pub fn skip(mut self, n: u64) -> Self {
        self.spec.skip = Some(n);
        self
    }

    /// Return at most `n` results.
    pub fn limit(mut self, n: i64) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Override the collation (default `en_US`).
    pub fn collation(mut self, collation: Collation) -> Self {
        self.spec.collation = collation;
        self
    }

    /// Execute with limit 1 and report whether anything matched.
    pub async fn any(mut self) -> Result<bool> {
        let (first, _) = fetch_capped::<T, T>(&self.ctx, &mut self.spec, 1).await?;
        Ok(first.is_some())
    }

    fn check_ready(&self) -> Result<()> {
        Ok(())
    }

    find_terminals!(T);
}

/// Fluent find returning a projected shape instead of the full entity.
///
/// The projection must be set exactly once before execution.
#[derive(Debug)]
pub struct ProjectedFind<T: Entity, P> {
    ctx: DbContext,
    spec: FindSpec,
    _marker: PhantomData<fn() -> (T, P)>,
}

impl<T, P> ProjectedFind<T, P>
where
    T: Entity,
    P: DeserializeOwned + Unpin + Send + Sync,
{
    pub(crate) fn new(ctx: DbContext, filter: Document) -> Self {
        Self {
            ctx,
            spec: FindSpec::new(filter),
            _marker: PhantomData,
        }
    }

    /// Replace the base filter.
    pub fn filter(mut self, filter: impl Into<Document>) -> Self {
        self.spec.filter = filter.into();
        self
    }

    /// Append a sort clause; later clauses break ties for earlier ones.
    pub fn sort(mut self, sort: Document) -> Self {
        self.spec.sorts.push(sort);
        self
    }

    /// Append a single-field sort clause.
    pub fn sort_by(self, field: &str, order: Order) -> Self {
        self.sort(doc! { field: order.key() })
    }

    /// Skip the first `n` results.
    pub fn skip(mut self, n: u64) -> Self {
        self.spec.skip = Some(n);
        self
    }

    /// Return at most `n` results.
    pub fn limit(mut self, n: i64) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Override the collation (default `en_US`).
    pub fn collation(mut self, collation: Collation) -> Self {
        self.spec.collation = collation;
        self
    }

    /// Set the projection. Fails if one was already set.
    pub fn project(mut self, projection: Document) -> Result<Self> {
        self.spec.set_projection(projection)?;
        Ok(self)
    }

    fn check_ready(&self) -> Result<()> {
        if self.spec.projection.is_none() {
            return Err(Error::configuration("Projection not set"));
        }
        Ok(())
    }

    find_terminals!(P);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_spec_combines_sorts_in_order() {
        let mut spec = FindSpec::new(doc! {});
        spec.sorts.push(doc! { "title": 1 });
        spec.sorts.push(doc! { "pages": -1 });

        let options = spec.to_options();
        assert_eq!(options.sort, Some(doc! { "title": 1, "pages": -1 }));
    }

    #[test]
    fn test_spec_defaults_to_en_us_collation() {
        let spec = FindSpec::new(doc! {});
        let options = spec.to_options();
        assert_eq!(options.collation.unwrap().locale, "en_US");
        assert_eq!(options.sort, None);
        assert_eq!(options.limit, None);
    }

    #[test]
    fn test_spec_rejects_second_projection() {
        let mut spec = FindSpec::new(doc! {});
        spec.set_projection(doc! { "title": 1 }).unwrap();

        let err = spec.set_projection(doc! { "pages": 1 }).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(err.to_string(), "configuration error: Projection already set");
    }

    #[test]
    fn test_required_maps_zero_to_not_found() {
        let err = required::<i32>(None).unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(required(Some(1)).unwrap(), 1);
    }
}
