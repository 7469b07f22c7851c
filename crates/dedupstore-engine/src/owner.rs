//! Owner-scoped view of the engine.
//!
//! Any type that can name itself with an [`OwnerRef`] gets file helpers
//! through [`StorageEngine::files_of`].

use dedupstore_core::{
    FileSource, Link, LinkAttributes, OwnerRef, ProcessingStatus, Result, StoreOptions,
    StoredObject,
};

use crate::engine::StorageEngine;

/// An entity that owns stored files.
pub trait FileOwner {
    fn owner_ref(&self) -> OwnerRef;
}

impl FileOwner for OwnerRef {
    fn owner_ref(&self) -> OwnerRef {
        self.clone()
    }
}

/// Engine operations bound to one owner.
pub struct OwnerFiles<'a> {
    engine: &'a StorageEngine,
    owner: OwnerRef,
}

impl StorageEngine {
    /// File helpers scoped to `owner`.
    pub fn files_of(&self, owner: &impl FileOwner) -> OwnerFiles<'_> {
        OwnerFiles {
            engine: self,
            owner: owner.owner_ref(),
        }
    }
}

impl<'a> OwnerFiles<'a> {
    pub fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    pub async fn store(&self, source: &dyn FileSource, options: &StoreOptions) -> Result<Link> {
        self.engine.store(source, &self.owner, options).await
    }

    pub async fn attach(&self, hash: &str, attrs: &LinkAttributes) -> Result<Option<Link>> {
        self.engine.attach(hash, &self.owner, attrs).await
    }

    pub async fn detach(&self, hash: &str) -> Result<bool> {
        self.engine.detach(hash, &self.owner).await
    }

    pub async fn update_status(&self, hash: &str, status: ProcessingStatus) -> Result<bool> {
        self.engine
            .links()
            .update_status(hash, &self.owner, status)
            .await
    }

    /// Every link this owner holds.
    pub async fn files(&self) -> Result<Vec<Link>> {
        self.engine.links().list_for_owner(&self.owner).await
    }

    pub async fn files_with_status(&self, status: ProcessingStatus) -> Result<Vec<Link>> {
        self.engine
            .links()
            .list_for_owner_by_status(&self.owner, status)
            .await
    }

    pub async fn completed_files(&self) -> Result<Vec<Link>> {
        self.files_with_status(ProcessingStatus::Completed).await
    }

    pub async fn has_file(&self, hash: &str) -> Result<bool> {
        Ok(self.engine.links().find(hash, &self.owner).await?.is_some())
    }

    /// Links paired with their stored objects. Links whose object is gone are skipped.
    pub async fn objects(&self) -> Result<Vec<(Link, StoredObject)>> {
        let mut pairs = Vec::new();
        for link in self.files().await? {
            if let Some(object) = self.engine.find(&link.hash).await? {
                pairs.push((link, object));
            }
        }
        Ok(pairs)
    }
}
