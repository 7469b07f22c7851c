//! Repository tests against a live PostgreSQL database.
//!
//! Requires the schema from `migrations/` to be applied to `DATABASE_URL`.
//! Run with `cargo test -p dedupstore-db -- --ignored`.

use dedupstore_db::test_fixtures::test_database_url;
use dedupstore_db::{
    Database, LegacyMigrationRepository, LinkAttributes, LinkFilter, LinkRepository,
    MigrationStatus, NewLegacyMigration, NewStoredObject, ObjectRepository, OwnerRef,
    ProcessingStatus,
};
use uuid::Uuid;

async fn setup_test_db() -> Database {
    dotenvy::dotenv().ok();
    Database::connect(&test_database_url())
        .await
        .expect("Failed to connect to test database")
}

/// A 40-char hex hash unique to this test run.
fn unique_hash() -> String {
    let a = Uuid::new_v4().simple().to_string();
    let b = Uuid::new_v4().simple().to_string();
    format!("{}{}", a, &b[..8])
}

fn new_object(hash: &str) -> NewStoredObject {
    NewStoredObject {
        hash: hash.to_string(),
        md5: Some("900150983cd24fb0d6963f7d28e17f72".into()),
        filename: format!("{}.txt", hash),
        path: format!("{}/{}/{}.txt", &hash[0..2], &hash[2..4], hash),
        mime_type: "text/plain".into(),
        size: 3,
        status: ProcessingStatus::Completed,
        disk: "public".into(),
        original_name: Some("abc.txt".into()),
    }
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_concurrent_style_insert_returns_existing() {
    let db = setup_test_db().await;
    let hash = unique_hash();

    let first = db.objects.insert(new_object(&hash)).await.unwrap();
    assert!(first.was_inserted(), "first insert should create the row");

    let second = db.objects.insert(new_object(&hash)).await.unwrap();
    assert!(
        !second.was_inserted(),
        "conflicting insert must resolve to the existing row"
    );
    assert_eq!(second.into_object().hash, hash);

    db.objects.delete(&hash).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_link_upsert_is_unique_per_owner() {
    let db = setup_test_db().await;
    let hash = unique_hash();
    db.objects.insert(new_object(&hash)).await.unwrap();
    let owner = OwnerRef::new("post", Uuid::new_v4().to_string());

    let first = db
        .links
        .upsert(&hash, &owner, &LinkAttributes::default().with_original_name("a.txt"))
        .await
        .unwrap();
    assert_eq!(first.status, ProcessingStatus::Completed);

    let second = db
        .links
        .upsert(
            &hash,
            &owner,
            &LinkAttributes::default().with_status(ProcessingStatus::Processing),
        )
        .await
        .unwrap();
    assert_eq!(first.id, second.id, "re-attach must update, not duplicate");
    assert_eq!(second.status, ProcessingStatus::Processing);
    assert_eq!(second.original_name.as_deref(), Some("a.txt"));
    assert_eq!(db.links.count_for_hash(&hash).await.unwrap(), 1);

    let filtered = db
        .links
        .list_for_hash(
            &hash,
            &LinkFilter {
                owner_type: Some("post".into()),
                status: Some(ProcessingStatus::Processing),
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);

    db.links.remove_all_for_hash(&hash).await.unwrap();
    db.objects.delete(&hash).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_delete_if_unreferenced_rechecks_links() {
    let db = setup_test_db().await;
    let hash = unique_hash();
    db.objects.insert(new_object(&hash)).await.unwrap();
    let owner = OwnerRef::new("post", Uuid::new_v4().to_string());
    db.links
        .upsert(&hash, &owner, &LinkAttributes::default())
        .await
        .unwrap();

    assert!(
        db.objects
            .delete_if_unreferenced(&hash)
            .await
            .unwrap()
            .is_none(),
        "linked object must survive"
    );

    assert!(db.links.remove(&hash, &owner).await.unwrap());
    let deleted = db.objects.delete_if_unreferenced(&hash).await.unwrap();
    assert_eq!(deleted.map(|o| o.hash), Some(hash.clone()));
    assert!(!db.objects.exists(&hash).await.unwrap());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_orphaned_links_are_found_by_keyset() {
    let db = setup_test_db().await;
    let missing_hash = unique_hash();
    let owner = OwnerRef::new("post", Uuid::new_v4().to_string());
    let link = db
        .links
        .upsert(&missing_hash, &owner, &LinkAttributes::default())
        .await
        .unwrap();

    let ids = db
        .links
        .orphaned_ids_after(link.id - 1, 10)
        .await
        .unwrap();
    assert!(ids.contains(&link.id));

    assert_eq!(db.links.delete_by_ids(&[link.id]).await.unwrap(), 1);
    assert!(db.links.find(&missing_hash, &owner).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_legacy_record_lifecycle() {
    let db = setup_test_db().await;
    let dir = format!("/tmp/legacy-{}", Uuid::new_v4());
    let observed = NewLegacyMigration {
        original_dir: dir.clone(),
        original_filename: "a.txt".into(),
        hash: unique_hash(),
        size: 3,
        mime_type: Some("text/plain".into()),
        file_modified_at: None,
    };

    let record = db.legacy.upsert_observed(observed.clone()).await.unwrap();
    assert_eq!(record.status, MigrationStatus::Pending);

    db.legacy.mark_migrated(record.id, chrono::Utc::now()).await.unwrap();
    let again = db.legacy.upsert_observed(observed).await.unwrap();
    assert_eq!(again.id, record.id, "find-or-create must not duplicate");
    assert_eq!(again.status, MigrationStatus::Migrated);
    assert!(again.migrated_at.is_some());

    db.legacy.reset(record.id).await.unwrap();
    let reset = db
        .legacy
        .find_by_location(&dir, "a.txt")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reset.status, MigrationStatus::Pending);
    assert!(reset.migrated_at.is_none());
}

#[tokio::test]
#[ignore = "requires PostgreSQL (set DATABASE_URL)"]
async fn test_tables_are_ready() {
    let db = setup_test_db().await;
    db.ping().await.unwrap();
    for check in db.check_tables().await {
        assert!(check.is_ready(), "table {} not ready: {:?}", check.table, check.error);
    }
}
