//! Link registry: the many-to-many relation between stored objects and owners.

use std::sync::Arc;

use dedupstore_core::{
    Link, LinkAttributes, LinkFilter, LinkRepository, OwnerRef, ProcessingStatus, Result,
};

/// Owner link operations over a [`LinkRepository`].
///
/// Links are unique per `(hash, owner)`. Creating a link that already exists
/// merges the supplied attributes onto it instead.
#[derive(Clone)]
pub struct LinkRegistry {
    repo: Arc<dyn LinkRepository>,
}

impl LinkRegistry {
    pub fn new(repo: Arc<dyn LinkRepository>) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &Arc<dyn LinkRepository> {
        &self.repo
    }

    /// Create the link with defaults (`completed`) or merge `attrs` onto the existing one.
    pub async fn create_or_update(
        &self,
        hash: &str,
        owner: &OwnerRef,
        attrs: &LinkAttributes,
    ) -> Result<Link> {
        self.repo.upsert(hash, owner, attrs).await
    }

    pub async fn find(&self, hash: &str, owner: &OwnerRef) -> Result<Option<Link>> {
        self.repo.find(hash, owner).await
    }

    /// Set the status of one link. Returns false when the link does not exist.
    pub async fn update_status(
        &self,
        hash: &str,
        owner: &OwnerRef,
        status: ProcessingStatus,
    ) -> Result<bool> {
        self.repo.update_status(hash, owner, status).await
    }

    pub async fn remove(&self, hash: &str, owner: &OwnerRef) -> Result<bool> {
        self.repo.remove(hash, owner).await
    }

    pub async fn remove_all(&self, hash: &str) -> Result<u64> {
        self.repo.remove_all_for_hash(hash).await
    }

    pub async fn count_for_hash(&self, hash: &str) -> Result<i64> {
        self.repo.count_for_hash(hash).await
    }

    pub async fn list_for_hash(&self, hash: &str) -> Result<Vec<Link>> {
        self.repo.list_for_hash(hash, &LinkFilter::default()).await
    }

    pub async fn recent_for_hash(&self, hash: &str, limit: i64) -> Result<Vec<Link>> {
        self.repo.recent_for_hash(hash, limit).await
    }

    /// Links to `hash` held by owners of one type.
    pub async fn list_for_hash_by_owner_type(
        &self,
        hash: &str,
        owner_type: &str,
    ) -> Result<Vec<Link>> {
        let filter = LinkFilter {
            owner_type: Some(owner_type.to_string()),
            status: None,
        };
        self.repo.list_for_hash(hash, &filter).await
    }

    /// Links to `hash` in one status.
    pub async fn list_for_hash_by_status(
        &self,
        hash: &str,
        status: ProcessingStatus,
    ) -> Result<Vec<Link>> {
        let filter = LinkFilter {
            owner_type: None,
            status: Some(status),
        };
        self.repo.list_for_hash(hash, &filter).await
    }

    pub async fn counts_by_owner_type(&self, hash: &str) -> Result<Vec<(String, i64)>> {
        self.repo.count_by_owner_type(hash).await
    }

    pub async fn list_for_owner(&self, owner: &OwnerRef) -> Result<Vec<Link>> {
        self.repo.list_for_owner(owner, &LinkFilter::default()).await
    }

    pub async fn list_for_owner_by_status(
        &self,
        owner: &OwnerRef,
        status: ProcessingStatus,
    ) -> Result<Vec<Link>> {
        let filter = LinkFilter {
            owner_type: None,
            status: Some(status),
        };
        self.repo.list_for_owner(owner, &filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedupstore_core::memory::InMemoryStore;

    fn registry() -> LinkRegistry {
        LinkRegistry::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_defaults_to_completed() {
        let links = registry();
        let owner = OwnerRef::new("post", "1");
        let link = links
            .create_or_update("h1", &owner, &LinkAttributes::default())
            .await
            .unwrap();
        assert_eq!(link.status, ProcessingStatus::Completed);
        assert_eq!(link.owner(), owner);
    }

    #[tokio::test]
    async fn test_filters() {
        let links = registry();
        let post = OwnerRef::new("post", "1");
        let user = OwnerRef::new("user", "9");
        links
            .create_or_update("h1", &post, &LinkAttributes::default())
            .await
            .unwrap();
        links
            .create_or_update(
                "h1",
                &user,
                &LinkAttributes::default().with_status(ProcessingStatus::Pending),
            )
            .await
            .unwrap();

        assert_eq!(links.list_for_hash("h1").await.unwrap().len(), 2);
        assert_eq!(
            links
                .list_for_hash_by_owner_type("h1", "user")
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(
            links
                .list_for_hash_by_status("h1", ProcessingStatus::Completed)
                .await
                .unwrap()[0]
                .owner(),
            post
        );
        assert_eq!(
            links.counts_by_owner_type("h1").await.unwrap(),
            vec![("post".to_string(), 1), ("user".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn test_update_status_of_missing_link() {
        let links = registry();
        let updated = links
            .update_status("nope", &OwnerRef::new("post", "1"), ProcessingStatus::Failed)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_owner_listing_by_status() {
        let links = registry();
        let owner = OwnerRef::new("post", "1");
        links
            .create_or_update("h1", &owner, &LinkAttributes::default())
            .await
            .unwrap();
        links
            .create_or_update(
                "h2",
                &owner,
                &LinkAttributes::default().with_status(ProcessingStatus::Failed),
            )
            .await
            .unwrap();

        assert_eq!(links.list_for_owner(&owner).await.unwrap().len(), 2);
        let failed = links
            .list_for_owner_by_status(&owner, ProcessingStatus::Failed)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].hash, "h2");
    }
}
