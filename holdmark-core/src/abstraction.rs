//! Abstraction model
//!
//! An [`Abstraction`] is a read-only view of one marker as the store
//! reported it during enumeration. It references store state by coordinate
//! (filesystem, version name, hold tag) and owns nothing in the store.

use serde::{Serialize, Serializer};
use std::fmt;
use tokio_util::sync::CancellationToken;

use crate::abstraction_type::AbstractionType;
use crate::job_id::JobId;
use crate::store::{DatasetPath, FilesystemVersion, VersionKind, VersionStore, cancellable};

/// A marker backed by a bookmark.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkAbstraction {
    ty: AbstractionType,
    fs: DatasetPath,
    bookmark: FilesystemVersion,
    job_id: Option<JobId>,
}

impl BookmarkAbstraction {
    pub fn new(
        ty: AbstractionType,
        fs: DatasetPath,
        bookmark: FilesystemVersion,
        job_id: Option<JobId>,
    ) -> Self {
        if bookmark.kind != VersionKind::Bookmark || ty.bookmark_extractor().is_none() {
            panic!(
                "implementation error: {} cannot be backed by {:?} {:?}",
                ty, bookmark.kind, bookmark.name
            );
        }
        Self {
            ty,
            fs,
            bookmark,
            job_id,
        }
    }
}

/// A marker backed by a hold tag on a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldAbstraction {
    ty: AbstractionType,
    fs: DatasetPath,
    snapshot: FilesystemVersion,
    tag: String,
    job_id: Option<JobId>,
}

impl HoldAbstraction {
    pub fn new(
        ty: AbstractionType,
        fs: DatasetPath,
        snapshot: FilesystemVersion,
        tag: String,
        job_id: Option<JobId>,
    ) -> Self {
        if snapshot.kind != VersionKind::Snapshot || ty.hold_extractor().is_none() {
            panic!(
                "implementation error: {} cannot be backed by {:?} {:?}",
                ty, snapshot.kind, snapshot.name
            );
        }
        Self {
            ty,
            fs,
            snapshot,
            tag,
            job_id,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// One marker: a bookmark or a hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Abstraction {
    Bookmark(BookmarkAbstraction),
    Hold(HoldAbstraction),
}

impl Abstraction {
    pub fn abstraction_type(&self) -> AbstractionType {
        match self {
            Abstraction::Bookmark(b) => b.ty,
            Abstraction::Hold(h) => h.ty,
        }
    }

    pub fn fs(&self) -> &DatasetPath {
        match self {
            Abstraction::Bookmark(b) => &b.fs,
            Abstraction::Hold(h) => &h.fs,
        }
    }

    /// Bookmark name, or the name of the held snapshot.
    pub fn name(&self) -> &str {
        &self.filesystem_version().name
    }

    /// `fs#bookmark` or `fs@snapshot`
    pub fn full_path(&self) -> String {
        self.filesystem_version().to_abs_path(self.fs())
    }

    /// `None` for markers created outside the job framework.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Abstraction::Bookmark(b) => b.job_id.as_ref(),
            Abstraction::Hold(h) => h.job_id.as_ref(),
        }
    }

    pub fn create_txg(&self) -> u64 {
        self.filesystem_version().create_txg
    }

    pub fn filesystem_version(&self) -> &FilesystemVersion {
        match self {
            Abstraction::Bookmark(b) => &b.bookmark,
            Abstraction::Hold(h) => &h.snapshot,
        }
    }

    /// Hold tag, for hold-backed abstractions.
    pub fn hold_tag(&self) -> Option<&str> {
        match self {
            Abstraction::Bookmark(_) => None,
            Abstraction::Hold(h) => Some(&h.tag),
        }
    }

    /// Release the hold or destroy the bookmark.
    pub async fn destroy(
        &self,
        store: &dyn VersionStore,
        cancel: &CancellationToken,
    ) -> crate::store::Result<()> {
        match self {
            Abstraction::Bookmark(b) => {
                cancellable(
                    cancel,
                    store.destroy_bookmark(&b.fs, &b.bookmark.name, cancel),
                )
                .await
            }
            Abstraction::Hold(h) => {
                cancellable(
                    cancel,
                    store.release_hold(&h.fs, &h.snapshot.name, &h.tag, cancel),
                )
                .await
            }
        }
    }
}

impl fmt::Display for Abstraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abstraction::Bookmark(_) => {
                write!(f, "{} {}", self.abstraction_type(), self.full_path())
            }
            Abstraction::Hold(h) => write!(
                f,
                "{} {:?} on {}",
                self.abstraction_type(),
                h.tag,
                self.full_path()
            ),
        }
    }
}

#[derive(Serialize)]
struct AbstractionJson<'a> {
    #[serde(rename = "type")]
    ty: AbstractionType,
    fs: &'a DatasetPath,
    name: &'a str,
    full_path: String,
    job_id: Option<&'a JobId>,
    create_txg: u64,
    filesystem_version: &'a FilesystemVersion,
    string: String,
}

impl Serialize for Abstraction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AbstractionJson {
            ty: self.abstraction_type(),
            fs: self.fs(),
            name: self.name(),
            full_path: self.full_path(),
            job_id: self.job_id(),
            create_txg: self.create_txg(),
            filesystem_version: self.filesystem_version(),
            string: self.to_string(),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::{step_bookmark_name, step_hold_tag};
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn fs() -> DatasetPath {
        DatasetPath::parse("pool/data").unwrap()
    }

    fn job() -> JobId {
        JobId::new("j1").unwrap()
    }

    fn step_bm(guid: u64, txg: u64) -> Abstraction {
        let v = FilesystemVersion::bookmark(step_bookmark_name(guid, &job()), guid, txg, Utc::now());
        Abstraction::Bookmark(BookmarkAbstraction::new(
            AbstractionType::StepBookmark,
            fs(),
            v,
            Some(job()),
        ))
    }

    fn step_hold(snap: &str, txg: u64) -> Abstraction {
        let v = FilesystemVersion::snapshot(snap, 1, txg, Utc::now());
        Abstraction::Hold(HoldAbstraction::new(
            AbstractionType::StepHold,
            fs(),
            v,
            step_hold_tag(&job()),
            Some(job()),
        ))
    }

    #[test]
    fn test_accessors() {
        let bm = step_bm(0x10, 7);
        assert_eq!(bm.name(), "zrepl_STEP_G_0000000000000010_J_j1");
        assert_eq!(bm.full_path(), "pool/data#zrepl_STEP_G_0000000000000010_J_j1");
        assert_eq!(bm.create_txg(), 7);
        assert!(bm.hold_tag().is_none());

        let h = step_hold("snap1", 9);
        assert_eq!(h.name(), "snap1");
        assert_eq!(h.full_path(), "pool/data@snap1");
        assert_eq!(h.hold_tag(), Some("zrepl_STEP_J_j1"));
        assert_eq!(h.job_id(), Some(&job()));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            step_hold("snap1", 9).to_string(),
            "step-hold \"zrepl_STEP_J_j1\" on pool/data@snap1"
        );
        assert!(step_bm(1, 1).to_string().starts_with("step-bookmark pool/data#"));
    }

    #[test]
    fn test_json() {
        let json = serde_json::to_value(step_hold("snap1", 9)).unwrap();
        assert_eq!(json["type"], "step-hold");
        assert_eq!(json["fs"], "pool/data");
        assert_eq!(json["name"], "snap1");
        assert_eq!(json["full_path"], "pool/data@snap1");
        assert_eq!(json["job_id"], "j1");
        assert_eq!(json["create_txg"], 9);
        assert_eq!(json["filesystem_version"]["kind"], "snapshot");
        assert_eq!(json["string"], "step-hold \"zrepl_STEP_J_j1\" on pool/data@snap1");
    }

    #[test]
    #[should_panic(expected = "implementation error")]
    fn test_hold_type_on_bookmark_panics() {
        let v = FilesystemVersion::bookmark("b", 1, 1, Utc::now());
        BookmarkAbstraction::new(AbstractionType::StepHold, fs(), v, None);
    }

    #[tokio::test]
    async fn test_destroy_releases_hold_and_bookmark() {
        let store = MemoryStore::new();
        store.add_snapshot(&fs(), "snap1", 1, 9);
        store.add_hold(&fs(), "snap1", "zrepl_STEP_J_j1");
        store.add_hold(&fs(), "snap1", "other");
        store.add_bookmark(&fs(), &step_bookmark_name(0x10, &job()), 0x10, 7);

        let cancel = CancellationToken::new();
        step_hold("snap1", 9).destroy(&store, &cancel).await.unwrap();
        step_bm(0x10, 7).destroy(&store, &cancel).await.unwrap();

        assert_eq!(store.holds(&fs(), "snap1"), vec!["other".to_string()]);
        assert!(store.bookmarks(&fs()).is_empty());
    }
}
