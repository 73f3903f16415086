//! End-to-end tests against a live MongoDB.
//!
//! All tests are `#[ignore]`d: run them with `cargo test -- --ignored`
//! against a local server (`MONGODB_URI` overrides the default URI; the
//! transaction tests additionally need a replica set). Every test uses a
//! throwaway database and drops it on the way out; each builds its own
//! factory, so registries never leak between tests.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

use bson::doc;
use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use whetstone::{Capabilities, Capability, DbContext, DbFactory, DeletedBy, Entity, bson_id};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Book {
    #[serde(rename = "_id", with = "bson_id")]
    id: String,
    title: String,
    system_generated: bool,
    deleted: bool,
    deleted_by: Option<DeletedBy>,
    // bson::DateTime fields so driver-written dates ($currentDate, the
    // soft-delete timestamp) deserialize cleanly.
    deleted_on: Option<bson::DateTime>,
    created_on: Option<bson::DateTime>,
    modified_on: Option<bson::DateTime>,
}

impl Book {
    fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

impl Entity for Book {
    fn capabilities() -> Capabilities {
        Capabilities::NONE
            .with_created_on()
            .with_modified_on()
            .with_soft_delete()
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn touch_created_on(&mut self, at: DateTime<Utc>) {
        self.created_on = Some(bson::DateTime::from_chrono(at));
    }

    fn touch_modified_on(&mut self, at: DateTime<Utc>) {
        self.modified_on = Some(bson::DateTime::from_chrono(at));
    }
}

fn connection_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_owned())
}

async fn scratch_context(factory: &DbFactory) -> DbContext {
    factory
        .context()
        .database(format!("whetstone_live_{}", ObjectId::new().to_hex()))
        .connection(connection_uri())
        .build()
        .await
        .expect("context build")
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn save_assigns_ids_once_and_upserts_thereafter() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut book = Book::titled("Dune");
    ctx.save(&mut book).await.unwrap();

    let assigned = book.id().to_owned();
    assert!(!assigned.is_empty());
    assert!(book.created_on.is_some());

    book.title = "Dune Messiah".into();
    ctx.save(&mut book).await.unwrap();
    assert_eq!(book.id(), assigned);
    assert!(book.modified_on.is_some());

    let found = ctx.find::<Book>().one(&assigned).await.unwrap();
    assert_eq!(found.title, "Dune Messiah");
    assert_eq!(ctx.count::<Book>().await.unwrap(), 1);

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn delete_spares_system_generated_records() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    // Ten books, titles alternating odd-*/even-*, five flagged
    // system-generated at random.
    let hasher = RandomState::new();
    let mut scored: Vec<(u64, usize)> = (0..10)
        .map(|i| {
            let mut state = hasher.build_hasher();
            i.hash(&mut state);
            (state.finish(), i)
        })
        .collect();
    scored.sort_unstable();
    let flagged: Vec<usize> = scored.iter().take(5).map(|&(_, i)| i).collect();

    let mut books: Vec<Book> = (0..10)
        .map(|i| {
            let parity = if i % 2 == 1 { "odd" } else { "even" };
            let mut book = Book::titled(format!("{parity}-{i}"));
            book.system_generated = flagged.contains(&i);
            book
        })
        .collect();
    let protected_odd = books
        .iter()
        .filter(|b| b.title.contains("odd") && b.system_generated)
        .count() as u64;

    ctx.save_many(&mut books).await.unwrap();

    ctx.delete::<Book>(doc! { "title": { "$regex": "odd" } })
        .execute_many(false)
        .await
        .unwrap();

    let remaining_odd = ctx
        .count_filtered::<Book>(doc! { "title": { "$regex": "odd" } })
        .await
        .unwrap();
    assert_eq!(remaining_odd, protected_odd);

    // Forced, the protection is bypassed.
    ctx.delete::<Book>(doc! { "title": { "$regex": "odd" } })
        .execute_many(true)
        .await
        .unwrap();
    assert_eq!(
        ctx.count_filtered::<Book>(doc! { "title": { "$regex": "odd" } })
            .await
            .unwrap(),
        0
    );

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn global_capability_filter_hides_soft_deleted_documents() {
    let factory = DbFactory::new();
    factory.set_global_filter_for_capability(
        Capability::SoftDelete,
        doc! { "deleted": false },
        false,
    );
    let ctx = scratch_context(&factory).await;

    let mut books = vec![
        Book::titled("gone"),
        Book::titled("here"),
        Book::titled("also here"),
    ];
    books[0].deleted = true;
    ctx.save_many(&mut books).await.unwrap();

    let visible = ctx.find::<Book>().execute().await.unwrap();
    assert_eq!(visible.len(), 2);

    // A context built to ignore global filters sees everything.
    let unfiltered = factory
        .context()
        .database(ctx.database().name())
        .connection(connection_uri())
        .ignore_global_filters()
        .build()
        .await
        .unwrap();
    assert_eq!(unfiltered.find::<Book>().execute().await.unwrap().len(), 3);

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn single_semantics_cap_the_result_set() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut books = vec![Book::titled("twin"), Book::titled("twin")];
    ctx.save_many(&mut books).await.unwrap();

    let err = ctx
        .find_filtered::<Book>(doc! { "title": "twin" })
        .execute_single()
        .await
        .unwrap_err();
    assert!(err.is_invalid_operation());

    let none = ctx
        .find_filtered::<Book>(doc! { "title": "absent" })
        .execute_single_or_default()
        .await
        .unwrap();
    assert!(none.is_none());

    let first = ctx
        .find_filtered::<Book>(doc! { "title": "twin" })
        .execute_first()
        .await
        .unwrap();
    assert_eq!(first.title, "twin");

    assert!(ctx.find_filtered::<Book>(doc! { "title": "twin" }).any().await.unwrap());

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn update_touches_modified_on_and_reports_counts() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut books = vec![Book::titled("a"), Book::titled("b")];
    ctx.save_many(&mut books).await.unwrap();

    let summary = ctx
        .update::<Book>(doc! {})
        .modify(doc! { "$set": { "title": "renamed" } })
        .execute()
        .await
        .unwrap();
    assert_eq!(summary.matched_count, 2);
    assert_eq!(summary.modified_count, 2);
    assert!(summary.acknowledged);

    let updated = ctx
        .find_filtered::<Book>(doc! { "title": "renamed" })
        .execute()
        .await
        .unwrap();
    assert!(updated.iter().all(|b| b.modified_on.is_some()));

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn hard_delete_get_and_execute_demands_a_match() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let err = ctx
        .delete::<Book>(doc! { "title": "absent" })
        .get_and_execute(false)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "not found: No item deleted");

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn soft_delete_flags_and_returns_the_document() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut book = Book::titled("ephemeral");
    ctx.save(&mut book).await.unwrap();

    // Zero matches is an absent result, not an error.
    let missing = ctx
        .soft_delete::<Book>(doc! { "title": "absent" })
        .execute_and_get("user-1", false)
        .await
        .unwrap();
    assert!(missing.is_none());

    let flagged = ctx
        .soft_delete::<Book>(doc! { "title": "ephemeral" })
        .execute_and_get("user-1", false)
        .await
        .unwrap()
        .expect("post-mutation document");
    assert!(flagged.deleted);
    assert_eq!(flagged.deleted_by.as_ref().map(|d| d.id.as_str()), Some("user-1"));
    assert!(flagged.deleted_on.is_some());
    assert!(flagged.modified_on.is_some());

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn distinct_streams_unique_values() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut books = vec![
        Book::titled("alpha"),
        Book::titled("alpha"),
        Book::titled("beta"),
    ];
    ctx.save_many(&mut books).await.unwrap();

    let mut titles: Vec<String> = ctx
        .distinct::<Book, String>()
        .property("title")
        .unwrap()
        .execute()
        .await
        .unwrap();
    titles.sort();
    assert_eq!(titles, vec!["alpha".to_owned(), "beta".to_owned()]);

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB replica set"]
async fn transactions_propagate_and_recycle_the_context() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let tx = ctx.transaction(None).await.unwrap();

    // A second start on the same context is rejected.
    let err = ctx.transaction(None).await.unwrap_err();
    assert!(err.is_invalid_operation());
    assert_eq!(err.to_string(), "invalid operation: Transaction already started");

    let mut book = Book::titled("committed");
    ctx.save(&mut book).await.unwrap();
    tx.commit().await.unwrap();

    assert_eq!(ctx.count::<Book>().await.unwrap(), 1);

    // Commit freed the slot: the same context can start a new transaction,
    // and dropping it without committing rolls the write back.
    let tx = ctx.transaction(None).await.unwrap();
    let mut book = Book::titled("abandoned");
    ctx.save(&mut book).await.unwrap();
    drop(tx);

    assert_eq!(ctx.count::<Book>().await.unwrap(), 1);

    ctx.drop_database().await.unwrap();
}

#[tokio::test]
#[ignore = "requires a running MongoDB"]
async fn audit_log_copies_keep_the_original_id() {
    let factory = DbFactory::new();
    let ctx = scratch_context(&factory).await;

    let mut book = Book::titled("tracked");
    ctx.save(&mut book).await.unwrap();
    ctx.log_entity(&book).await.unwrap();

    let copies = ctx.log_collection::<Book>().unwrap();
    let copy = copies
        .find_one(doc! {}, None)
        .await
        .unwrap()
        .expect("one audit copy");

    assert_eq!(copy.get_object_id("old_id").unwrap().to_hex(), book.id());
    assert_ne!(copy.get_object_id("_id").unwrap().to_hex(), book.id());
    assert_eq!(copy.get_str("title").unwrap(), "tracked");

    ctx.drop_database().await.unwrap();
}
