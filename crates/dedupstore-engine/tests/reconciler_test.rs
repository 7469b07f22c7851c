//! Orphan sweeps over the in-memory repositories.

use std::sync::Arc;

use tempfile::TempDir;

use dedupstore_core::memory::InMemoryStore;
use dedupstore_core::{OwnerRef, StoreOptions};
use dedupstore_engine::{
    DiskRegistry, EngineOptions, FilesystemBackend, Reconciler, StorageEngine, SweepOptions,
};

struct Fixture {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    engine: Arc<StorageEngine>,
    reconciler: Reconciler,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(StorageEngine::new(
        store.clone(),
        store.clone(),
        DiskRegistry::single("public", FilesystemBackend::new(dir.path())),
        EngineOptions::default(),
    ));
    let reconciler = Reconciler::new(engine.clone());
    Fixture {
        _dir: dir,
        store,
        engine,
        reconciler,
    }
}

fn dry_run(chunk_size: i64) -> SweepOptions {
    SweepOptions {
        chunk_size,
        dry_run: true,
    }
}

fn live(chunk_size: i64) -> SweepOptions {
    SweepOptions {
        chunk_size,
        dry_run: false,
    }
}

#[tokio::test]
async fn test_orphaned_links_are_swept_in_chunks() {
    let f = fixture();
    let owner = OwnerRef::new("post", "1");
    let kept = f
        .engine
        .store_content(b"kept".to_vec(), None, &owner, &StoreOptions::default())
        .await
        .unwrap();
    for i in 0..5 {
        f.store
            .insert_raw_link(&format!("{:040x}", i), &OwnerRef::new("post", i.to_string()))
            .await;
    }

    let preview = f.reconciler.sweep_orphaned_links(&dry_run(2)).await.unwrap();
    assert_eq!(preview.affected, 5);
    assert_eq!(f.store.link_total().await, 6);

    let report = f.reconciler.sweep_orphaned_links(&live(2)).await.unwrap();
    assert_eq!(report.affected, 5);
    assert!(report.errors.is_empty());
    assert_eq!(f.store.link_total().await, 1);
    assert!(f
        .engine
        .links()
        .find(&kept.hash, &owner)
        .await
        .unwrap()
        .is_some());

    let again = f.reconciler.sweep_orphaned_links(&live(2)).await.unwrap();
    assert_eq!(again.affected, 0);
}

#[tokio::test]
async fn test_orphaned_objects_are_deleted_with_blobs() {
    let f = fixture();
    let owner = OwnerRef::new("post", "1");
    let kept = f
        .engine
        .store_content(b"kept".to_vec(), None, &owner, &StoreOptions::default())
        .await
        .unwrap();

    let mut orphans = Vec::new();
    for body in ["first orphan", "second", "third!"] {
        let link = f
            .engine
            .store_content(body.as_bytes().to_vec(), None, &owner, &StoreOptions::default())
            .await
            .unwrap();
        // Drop the link without the engine's garbage collection.
        f.engine.links().remove(&link.hash, &owner).await.unwrap();
        orphans.push(f.engine.find(&link.hash).await.unwrap().unwrap());
    }
    let orphan_bytes: u64 = orphans.iter().map(|o| o.size as u64).sum();

    let preview = f
        .reconciler
        .sweep_orphaned_objects(&dry_run(2))
        .await
        .unwrap();
    assert_eq!(preview.affected, 3);
    assert_eq!(preview.bytes_reclaimed, orphan_bytes);
    assert_eq!(f.store.object_count().await, 4);

    let report = f.reconciler.sweep_orphaned_objects(&live(2)).await.unwrap();
    assert_eq!(report.affected, 3);
    assert_eq!(report.bytes_reclaimed, orphan_bytes);
    assert!(report.errors.is_empty());

    let backend = f.engine.disks().get("public").unwrap();
    for orphan in &orphans {
        assert!(!f.engine.exists(&orphan.hash).await.unwrap());
        assert!(!backend.exists(&orphan.path).await.unwrap());
    }
    assert!(f.engine.exists(&kept.hash).await.unwrap());
}

#[tokio::test]
async fn test_orphaned_object_with_missing_blob_reclaims_nothing() {
    let f = fixture();
    let owner = OwnerRef::new("post", "1");
    let link = f
        .engine
        .store_content(b"gone".to_vec(), None, &owner, &StoreOptions::default())
        .await
        .unwrap();
    f.engine.links().remove(&link.hash, &owner).await.unwrap();
    let object = f.engine.find(&link.hash).await.unwrap().unwrap();
    f.engine
        .disks()
        .get("public")
        .unwrap()
        .delete(&object.path)
        .await
        .unwrap();

    let report = f.reconciler.sweep_orphaned_objects(&live(10)).await.unwrap();
    assert_eq!(report.affected, 1);
    assert_eq!(report.bytes_reclaimed, 0);
    assert!(!f.engine.exists(&link.hash).await.unwrap());
}
