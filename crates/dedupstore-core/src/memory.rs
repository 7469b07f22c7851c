//! In-memory repository implementations.
//!
//! `InMemoryStore` implements all three repository traits over a single
//! mutex, so each operation is atomic with respect to the others. It backs
//! engine and API tests and single-process embedding without PostgreSQL.
//!
//! ```rust,ignore
//! let store = Arc::new(InMemoryStore::new());
//! let engine = StorageEngine::new(store.clone(), store.clone(), disks, options);
//! ```

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    DiskUsage, Error, InsertOutcome, LegacyMigrationRecord, LegacyMigrationRepository, Link,
    LinkAttributes, LinkFilter, LinkRepository, MigrationStatus, MigrationStrategy,
    NewLegacyMigration, NewStoredObject, ObjectRepository, OwnerRef, ProcessingStatus, Result,
    StorageStats, StoredObject, TypeUsage,
};

#[derive(Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    links: BTreeMap<i64, Link>,
    next_link_id: i64,
    legacy: BTreeMap<i64, LegacyMigrationRecord>,
    next_legacy_id: i64,
}

impl State {
    fn link_count(&self, hash: &str) -> usize {
        self.links.values().filter(|l| l.hash == hash).count()
    }

    fn find_link_id(&self, hash: &str, owner: &OwnerRef) -> Option<i64> {
        self.links
            .values()
            .find(|l| {
                l.hash == hash && l.owner_type == owner.owner_type && l.owner_id == owner.owner_id
            })
            .map(|l| l.id)
    }

    fn legacy_mut(&mut self, id: i64) -> Result<&mut LegacyMigrationRecord> {
        self.legacy
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("legacy migration record {}", id)))
    }
}

/// Process-local store implementing every repository trait.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a link without checking that its object exists.
    ///
    /// Lets tests seed orphaned links the way a crashed writer would leave them.
    pub async fn insert_raw_link(&self, hash: &str, owner: &OwnerRef) -> Link {
        let mut state = self.state.lock().await;
        state.next_link_id += 1;
        let now = Utc::now();
        let link = Link {
            id: state.next_link_id,
            hash: hash.to_string(),
            owner_type: owner.owner_type.clone(),
            owner_id: owner.owner_id.clone(),
            status: ProcessingStatus::Completed,
            original_name: None,
            created_at: now,
            updated_at: now,
        };
        state.links.insert(link.id, link.clone());
        link
    }

    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    pub async fn link_total(&self) -> usize {
        self.state.lock().await.links.len()
    }

    pub async fn legacy_records(&self) -> Vec<LegacyMigrationRecord> {
        self.state.lock().await.legacy.values().cloned().collect()
    }
}

#[async_trait]
impl ObjectRepository for InMemoryStore {
    async fn find(&self, hash: &str) -> Result<Option<StoredObject>> {
        Ok(self.state.lock().await.objects.get(hash).cloned())
    }

    async fn exists(&self, hash: &str) -> Result<bool> {
        Ok(self.state.lock().await.objects.contains_key(hash))
    }

    async fn insert(&self, object: NewStoredObject) -> Result<InsertOutcome> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.objects.get(&object.hash) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        let now = Utc::now();
        let stored = StoredObject {
            hash: object.hash,
            md5: object.md5,
            filename: object.filename,
            path: object.path,
            mime_type: object.mime_type,
            size: object.size,
            status: object.status,
            disk: object.disk,
            original_name: object.original_name,
            created_at: now,
            updated_at: now,
        };
        state.objects.insert(stored.hash.clone(), stored.clone());
        Ok(InsertOutcome::Inserted(stored))
    }

    async fn update_status(&self, hash: &str, status: ProcessingStatus) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.objects.get_mut(hash) {
            Some(object) => {
                object.status = status;
                object.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn delete(&self, hash: &str) -> Result<bool> {
        Ok(self.state.lock().await.objects.remove(hash).is_some())
    }

    async fn delete_if_unreferenced(&self, hash: &str) -> Result<Option<StoredObject>> {
        let mut state = self.state.lock().await;
        if state.link_count(hash) > 0 {
            return Ok(None);
        }
        Ok(state.objects.remove(hash))
    }

    async fn list_unreferenced_after(
        &self,
        after: Option<&str>,
        limit: i64,
    ) -> Result<Vec<StoredObject>> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .values()
            .filter(|o| after.map_or(true, |a| o.hash.as_str() > a))
            .filter(|o| state.link_count(&o.hash) == 0)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let state = self.state.lock().await;
        let linked = state
            .objects
            .keys()
            .filter(|h| state.link_count(h) > 0)
            .count() as i64;

        let mut by_disk: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        let mut by_type: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for object in state.objects.values() {
            let disk = by_disk.entry(object.disk.clone()).or_default();
            disk.0 += 1;
            disk.1 += object.size;
            let group = object
                .mime_type
                .split('/')
                .next()
                .unwrap_or_default()
                .to_string();
            let kind = by_type.entry(group).or_default();
            kind.0 += 1;
            kind.1 += object.size;
        }

        Ok(StorageStats {
            total_objects: state.objects.len() as i64,
            total_links: state.links.len() as i64,
            linked_objects: linked,
            orphaned_objects: state.objects.len() as i64 - linked,
            total_bytes: state.objects.values().map(|o| o.size).sum(),
            by_disk: by_disk
                .into_iter()
                .map(|(disk, (objects, bytes))| DiskUsage {
                    disk,
                    objects,
                    bytes,
                })
                .collect(),
            by_type: by_type
                .into_iter()
                .map(|(mime_group, (objects, bytes))| TypeUsage {
                    mime_group,
                    objects,
                    bytes,
                })
                .collect(),
        })
    }
}

#[async_trait]
impl LinkRepository for InMemoryStore {
    async fn upsert(&self, hash: &str, owner: &OwnerRef, attrs: &LinkAttributes) -> Result<Link> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if let Some(id) = state.find_link_id(hash, owner) {
            let link = state
                .links
                .get_mut(&id)
                .ok_or_else(|| Error::Internal("link index out of sync".into()))?;
            if let Some(status) = attrs.status {
                link.status = status;
            }
            if let Some(name) = &attrs.original_name {
                link.original_name = Some(name.clone());
            }
            link.updated_at = now;
            return Ok(link.clone());
        }

        state.next_link_id += 1;
        let link = Link {
            id: state.next_link_id,
            hash: hash.to_string(),
            owner_type: owner.owner_type.clone(),
            owner_id: owner.owner_id.clone(),
            status: attrs.status.unwrap_or(ProcessingStatus::Completed),
            original_name: attrs.original_name.clone(),
            created_at: now,
            updated_at: now,
        };
        state.links.insert(link.id, link.clone());
        Ok(link)
    }

    async fn find(&self, hash: &str, owner: &OwnerRef) -> Result<Option<Link>> {
        let state = self.state.lock().await;
        Ok(state
            .find_link_id(hash, owner)
            .and_then(|id| state.links.get(&id).cloned()))
    }

    async fn update_status(
        &self,
        hash: &str,
        owner: &OwnerRef,
        status: ProcessingStatus,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(id) = state.find_link_id(hash, owner) else {
            return Ok(false);
        };
        Ok(match state.links.get_mut(&id) {
            Some(link) => {
                link.status = status;
                link.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn remove(&self, hash: &str, owner: &OwnerRef) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.find_link_id(hash, owner) {
            Some(id) => state.links.remove(&id).is_some(),
            None => false,
        })
    }

    async fn remove_all_for_hash(&self, hash: &str) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.links.len();
        state.links.retain(|_, l| l.hash != hash);
        Ok((before - state.links.len()) as u64)
    }

    async fn count_for_hash(&self, hash: &str) -> Result<i64> {
        Ok(self.state.lock().await.link_count(hash) as i64)
    }

    async fn list_for_hash(&self, hash: &str, filter: &LinkFilter) -> Result<Vec<Link>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|l| l.hash == hash && filter.matches(l))
            .cloned()
            .collect())
    }

    async fn recent_for_hash(&self, hash: &str, limit: i64) -> Result<Vec<Link>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .rev()
            .filter(|l| l.hash == hash)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn count_by_owner_type(&self, hash: &str) -> Result<Vec<(String, i64)>> {
        let state = self.state.lock().await;
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for link in state.links.values().filter(|l| l.hash == hash) {
            *counts.entry(link.owner_type.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn list_for_owner(&self, owner: &OwnerRef, filter: &LinkFilter) -> Result<Vec<Link>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .values()
            .filter(|l| {
                l.owner_type == owner.owner_type
                    && l.owner_id == owner.owner_id
                    && filter.matches(l)
            })
            .cloned()
            .collect())
    }

    async fn orphaned_ids_after(&self, after: i64, limit: i64) -> Result<Vec<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .links
            .range(after + 1..)
            .filter(|(_, l)| !state.objects.contains_key(&l.hash))
            .map(|(id, _)| *id)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[i64]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        for id in ids {
            if state.links.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl LegacyMigrationRepository for InMemoryStore {
    async fn find_by_location(
        &self,
        original_dir: &str,
        original_filename: &str,
    ) -> Result<Option<LegacyMigrationRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .legacy
            .values()
            .find(|r| r.original_dir == original_dir && r.original_filename == original_filename)
            .cloned())
    }

    async fn upsert_observed(&self, observed: NewLegacyMigration) -> Result<LegacyMigrationRecord> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let existing = state
            .legacy
            .values()
            .find(|r| {
                r.original_dir == observed.original_dir
                    && r.original_filename == observed.original_filename
            })
            .map(|r| r.id);

        if let Some(id) = existing {
            let record = state.legacy_mut(id)?;
            record.hash = observed.hash;
            record.size = observed.size;
            record.mime_type = observed.mime_type;
            record.file_modified_at = observed.file_modified_at;
            record.updated_at = now;
            return Ok(record.clone());
        }

        state.next_legacy_id += 1;
        let record = LegacyMigrationRecord {
            id: state.next_legacy_id,
            original_dir: observed.original_dir,
            original_filename: observed.original_filename,
            hash: observed.hash,
            size: observed.size,
            mime_type: observed.mime_type,
            status: MigrationStatus::Pending,
            has_duplicates: false,
            strategy: MigrationStrategy::Link,
            migrated_at: None,
            error_message: None,
            file_modified_at: observed.file_modified_at,
            created_at: now,
            updated_at: now,
        };
        state.legacy.insert(record.id, record.clone());
        Ok(record)
    }

    async fn set_status(
        &self,
        id: i64,
        status: MigrationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.legacy_mut(id)?;
        record.status = status;
        record.error_message = error_message.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_duplicate(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.legacy_mut(id)?;
        record.has_duplicates = true;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_migrated(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.legacy_mut(id)?;
        record.status = MigrationStatus::Migrated;
        record.migrated_at = Some(at);
        record.error_message = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn reset(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state.legacy_mut(id)?;
        record.status = MigrationStatus::Pending;
        record.migrated_at = None;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn count_by_status(&self) -> Result<Vec<(MigrationStatus, i64)>> {
        let state = self.state.lock().await;
        let mut counts: HashMap<String, (MigrationStatus, i64)> = HashMap::new();
        for record in state.legacy.values() {
            counts
                .entry(record.status.to_string())
                .or_insert((record.status, 0))
                .1 += 1;
        }
        // Ordered by status name, same as the SQL implementation.
        let mut counts: Vec<_> = counts.into_values().collect();
        counts.sort_by_key(|(status, _)| status.to_string());
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_object(hash: &str) -> NewStoredObject {
        NewStoredObject {
            hash: hash.to_string(),
            md5: None,
            filename: format!("{}.txt", hash),
            path: format!("{}.txt", hash),
            mime_type: "text/plain".into(),
            size: 3,
            status: ProcessingStatus::Completed,
            disk: "public".into(),
            original_name: None,
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_returns_existing() {
        let store = InMemoryStore::new();
        assert!(store.insert(new_object("aa")).await.unwrap().was_inserted());
        let second = store.insert(new_object("aa")).await.unwrap();
        assert!(!second.was_inserted());
        assert_eq!(store.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_upsert_merges_attributes() {
        let store = InMemoryStore::new();
        let owner = OwnerRef::new("post", "1");
        let first = store
            .upsert("aa", &owner, &LinkAttributes::default().with_original_name("a.txt"))
            .await
            .unwrap();
        assert_eq!(first.status, ProcessingStatus::Completed);

        let second = store
            .upsert(
                "aa",
                &owner,
                &LinkAttributes::default().with_status(ProcessingStatus::Failed),
            )
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, ProcessingStatus::Failed);
        assert_eq!(second.original_name.as_deref(), Some("a.txt"));
        assert_eq!(store.link_total().await, 1);
    }

    #[tokio::test]
    async fn test_delete_if_unreferenced_respects_links() {
        let store = InMemoryStore::new();
        store.insert(new_object("aa")).await.unwrap();
        let owner = OwnerRef::new("post", "1");
        store
            .upsert("aa", &owner, &LinkAttributes::default())
            .await
            .unwrap();

        assert!(store.delete_if_unreferenced("aa").await.unwrap().is_none());
        store.remove("aa", &owner).await.unwrap();
        assert!(store.delete_if_unreferenced("aa").await.unwrap().is_some());
        assert!(!ObjectRepository::exists(&store, "aa").await.unwrap());
    }

    #[tokio::test]
    async fn test_keyset_pages() {
        let store = InMemoryStore::new();
        for hash in ["aa", "bb", "cc"] {
            store.insert(new_object(hash)).await.unwrap();
        }
        let page = store.list_unreferenced_after(None, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        let rest = store
            .list_unreferenced_after(Some(&page[1].hash), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].hash, "cc");

        store.insert_raw_link("zz", &OwnerRef::new("post", "1")).await;
        store.insert_raw_link("aa", &OwnerRef::new("post", "2")).await;
        assert_eq!(store.orphaned_ids_after(0, 10).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_legacy_upsert_is_find_or_create() {
        let store = InMemoryStore::new();
        let observed = NewLegacyMigration {
            original_dir: "/srv".into(),
            original_filename: "a.txt".into(),
            hash: "aa".into(),
            size: 3,
            mime_type: None,
            file_modified_at: None,
        };
        let first = store.upsert_observed(observed.clone()).await.unwrap();
        store.mark_migrated(first.id, Utc::now()).await.unwrap();
        let second = store.upsert_observed(observed).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, MigrationStatus::Migrated);
        assert_eq!(store.legacy_records().await.len(), 1);
    }
}
