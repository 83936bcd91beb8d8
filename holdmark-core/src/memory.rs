//! In-memory store
//!
//! Keeps filesystems, versions and holds in process memory. Used for tests
//! and dry runs; supports injecting failures per filesystem, snapshot or
//! destroy target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

use crate::store::{
    DatasetFilter, DatasetPath, FilesystemVersion, Result, StoreError, VersionKind, VersionStore,
};

#[derive(Debug, Default)]
struct Dataset {
    versions: Vec<FilesystemVersion>,
    /// snapshot name -> hold tags
    holds: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FailurePoint {
    ListVersions(DatasetPath),
    ListHolds(DatasetPath, String),
    /// Full path of the destroy target (`fs#bm` or `fs@snap`).
    Destroy(String),
}

#[derive(Debug, Default)]
struct Inner {
    datasets: BTreeMap<DatasetPath, Dataset>,
    failures: HashMap<FailurePoint, String>,
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    store_calls: AtomicUsize,
    destroy_calls: AtomicUsize,
}

fn creation_for(create_txg: u64) -> DateTime<Utc> {
    i64::try_from(create_txg)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_default()
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_filesystem(&self, fs: &DatasetPath) {
        self.write().datasets.entry(fs.clone()).or_default();
    }

    pub fn add_version(&self, fs: &DatasetPath, version: FilesystemVersion) {
        self.write()
            .datasets
            .entry(fs.clone())
            .or_default()
            .versions
            .push(version);
    }

    pub fn add_snapshot(&self, fs: &DatasetPath, name: &str, guid: u64, create_txg: u64) {
        self.add_version(
            fs,
            FilesystemVersion::snapshot(name, guid, create_txg, creation_for(create_txg)),
        );
    }

    pub fn add_bookmark(&self, fs: &DatasetPath, name: &str, guid: u64, create_txg: u64) {
        self.add_version(
            fs,
            FilesystemVersion::bookmark(name, guid, create_txg, creation_for(create_txg)),
        );
    }

    pub fn add_hold(&self, fs: &DatasetPath, snapshot: &str, tag: &str) {
        self.write()
            .datasets
            .entry(fs.clone())
            .or_default()
            .holds
            .entry(snapshot.to_string())
            .or_default()
            .insert(tag.to_string());
    }

    /// Make `list_filesystem_versions(fs)` fail with `msg`.
    pub fn fail_list_versions(&self, fs: &DatasetPath, msg: &str) {
        self.write()
            .failures
            .insert(FailurePoint::ListVersions(fs.clone()), msg.to_string());
    }

    /// Make `list_holds(fs, snapshot)` fail with `msg`.
    pub fn fail_list_holds(&self, fs: &DatasetPath, snapshot: &str, msg: &str) {
        self.write().failures.insert(
            FailurePoint::ListHolds(fs.clone(), snapshot.to_string()),
            msg.to_string(),
        );
    }

    /// Make destroying `full_path` fail with `msg`.
    pub fn fail_destroy(&self, full_path: &str, msg: &str) {
        self.write()
            .failures
            .insert(FailurePoint::Destroy(full_path.to_string()), msg.to_string());
    }

    /// Hold tags currently on `fs@snapshot`, sorted.
    pub fn holds(&self, fs: &DatasetPath, snapshot: &str) -> Vec<String> {
        self.read()
            .datasets
            .get(fs)
            .and_then(|d| d.holds.get(snapshot))
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Bookmark names currently on `fs`.
    pub fn bookmarks(&self, fs: &DatasetPath) -> Vec<String> {
        self.read()
            .datasets
            .get(fs)
            .map(|d| {
                d.versions
                    .iter()
                    .filter(|v| v.kind == VersionKind::Bookmark)
                    .map(|v| v.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of store calls served so far.
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Number of destroy and release calls served so far.
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    fn enter(&self, cancel: &CancellationToken, point: Option<FailurePoint>) -> Result<()> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        if let Some(point) = point {
            if let Some(msg) = self.read().failures.get(&point) {
                return Err(StoreError::Backend(msg.clone()));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VersionStore for MemoryStore {
    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
        cancel: &CancellationToken,
    ) -> Result<Vec<FilesystemVersion>> {
        self.enter(cancel, Some(FailurePoint::ListVersions(fs.clone())))?;
        self.read()
            .datasets
            .get(fs)
            .map(|d| d.versions.clone())
            .ok_or_else(|| StoreError::NotFound(fs.to_string()))
    }

    async fn list_holds(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        self.enter(
            cancel,
            Some(FailurePoint::ListHolds(fs.clone(), snapshot.to_string())),
        )?;
        let inner = self.read();
        let dataset = inner
            .datasets
            .get(fs)
            .ok_or_else(|| StoreError::NotFound(fs.to_string()))?;
        if !dataset
            .versions
            .iter()
            .any(|v| v.kind == VersionKind::Snapshot && v.name == snapshot)
        {
            return Err(StoreError::NotFound(format!("{}@{}", fs, snapshot)));
        }
        Ok(dataset
            .holds
            .get(snapshot)
            .map(|tags| tags.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn destroy_bookmark(
        &self,
        fs: &DatasetPath,
        bookmark: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(
            cancel,
            Some(FailurePoint::Destroy(format!("{}#{}", fs, bookmark))),
        )?;
        if let Some(dataset) = self.write().datasets.get_mut(fs) {
            dataset
                .versions
                .retain(|v| !(v.kind == VersionKind::Bookmark && v.name == bookmark));
        }
        Ok(())
    }

    async fn release_hold(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.enter(
            cancel,
            Some(FailurePoint::Destroy(format!("{}@{}", fs, snapshot))),
        )?;
        if let Some(tags) = self
            .write()
            .datasets
            .get_mut(fs)
            .and_then(|d| d.holds.get_mut(snapshot))
        {
            tags.remove(tag);
        }
        Ok(())
    }

    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasetPath>> {
        self.enter(cancel, None)?;
        Ok(self
            .read()
            .datasets
            .keys()
            .filter(|fs| filter.filter(fs))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SubtreeFilter;

    fn path(s: &str) -> DatasetPath {
        DatasetPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_versions_and_holds() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_snapshot(&fs, "s1", 1, 10);
        store.add_bookmark(&fs, "b1", 1, 10);
        store.add_hold(&fs, "s1", "t1");

        let cancel = CancellationToken::new();
        let versions = store.list_filesystem_versions(&fs, &cancel).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(store.list_holds(&fs, "s1", &cancel).await.unwrap(), vec!["t1"]);
        assert!(matches!(
            store.list_holds(&fs, "missing", &cancel).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_huge_create_txg_gets_epoch_creation() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_snapshot(&fs, "s1", 1, u64::MAX);
        store.add_bookmark(&fs, "b1", 1, 10);

        let versions = store
            .list_filesystem_versions(&fs, &CancellationToken::new())
            .await
            .unwrap();
        let snap = versions.iter().find(|v| v.name == "s1").unwrap();
        assert_eq!(snap.create_txg, u64::MAX);
        assert_eq!(snap.creation, DateTime::<Utc>::default());
        let bm = versions.iter().find(|v| v.name == "b1").unwrap();
        assert_eq!(bm.creation.timestamp(), 10);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_snapshot(&fs, "s1", 1, 10);
        store.fail_list_versions(&fs, "boom");
        store.fail_list_holds(&fs, "s1", "no holds for you");

        let cancel = CancellationToken::new();
        let err = store.list_filesystem_versions(&fs, &cancel).await.unwrap_err();
        assert_eq!(err.to_string(), "store backend error: boom");
        assert!(store.list_holds(&fs, "s1", &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_cancelled_calls_fail() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_filesystem(&fs);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            store.list_filesystem_versions(&fs, &cancel).await,
            Err(StoreError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_list_filesystems_applies_filter() {
        let store = MemoryStore::new();
        for fs in ["pool", "pool/a", "pool/a/b", "pool/c"] {
            store.add_filesystem(&path(fs));
        }
        let filter = SubtreeFilter::from_rules([("pool/a<", true)]).unwrap();
        let listed = store
            .list_filesystems(&filter, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(listed, vec![path("pool/a"), path("pool/a/b")]);
    }

    #[tokio::test]
    async fn test_release_and_destroy_are_idempotent() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_snapshot(&fs, "s1", 1, 10);
        let cancel = CancellationToken::new();
        store.release_hold(&fs, "s1", "absent", &cancel).await.unwrap();
        store.destroy_bookmark(&fs, "absent", &cancel).await.unwrap();
        assert_eq!(store.destroy_calls(), 2);
    }
}
