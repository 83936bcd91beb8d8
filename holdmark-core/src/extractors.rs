//! Marker naming scheme and the extractors that recognize it.
//!
//! Bookmark-backed kinds encode the guid of the bookmarked version and the
//! owning job in the bookmark name. Hold-backed kinds encode the job in the
//! hold tag.

use regex::Regex;
use std::sync::LazyLock;

use crate::abstraction::{Abstraction, BookmarkAbstraction, HoldAbstraction};
use crate::abstraction_type::AbstractionType;
use crate::job_id::JobId;
use crate::store::{DatasetPath, FilesystemVersion, VersionKind};

/// Name of the job-less v1 replication cursor bookmark.
pub const REPLICATION_CURSOR_V1_NAME: &str = "zrepl_replication_cursor";

static STEP_BOOKMARK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^zrepl_STEP_G_([0-9a-f]{16})_J_(.+)$").expect("static regex")
});
static CURSOR_V2_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^zrepl_CURSOR_G_([0-9a-f]{16})_J_(.+)$").expect("static regex")
});
static STEP_HOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^zrepl_STEP_J_(.+)$").expect("static regex"));
static LAST_RECEIVED_HOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^zrepl_last_received_J_(.+)$").expect("static regex"));

pub fn step_bookmark_name(guid: u64, job: &JobId) -> String {
    format!("zrepl_STEP_G_{:016x}_J_{}", guid, job)
}

pub fn replication_cursor_bookmark_name(guid: u64, job: &JobId) -> String {
    format!("zrepl_CURSOR_G_{:016x}_J_{}", guid, job)
}

pub fn step_hold_tag(job: &JobId) -> String {
    format!("zrepl_STEP_J_{}", job)
}

pub fn last_received_hold_tag(job: &JobId) -> String {
    format!("zrepl_last_received_J_{}", job)
}

/// Parse `<prefix>_G_<guid>_J_<job>` and check the guid against the version.
fn parse_guid_and_job(re: &Regex, v: &FilesystemVersion) -> Option<JobId> {
    let caps = re.captures(&v.name)?;
    let guid = u64::from_str_radix(&caps[1], 16).ok()?;
    if guid != v.guid {
        tracing::debug!(
            bookmark = %v.name,
            name_guid = guid,
            actual_guid = v.guid,
            "bookmark name guid does not match bookmark guid, ignoring"
        );
        return None;
    }
    JobId::new(&caps[2]).ok()
}

fn parse_job_from_tag(re: &Regex, tag: &str) -> Option<JobId> {
    let caps = re.captures(tag)?;
    JobId::new(&caps[1]).ok()
}

fn bookmark(
    ty: AbstractionType,
    fs: &DatasetPath,
    v: &FilesystemVersion,
    job_id: Option<JobId>,
) -> Abstraction {
    Abstraction::Bookmark(BookmarkAbstraction::new(ty, fs.clone(), v.clone(), job_id))
}

fn hold(
    ty: AbstractionType,
    fs: &DatasetPath,
    v: &FilesystemVersion,
    tag: &str,
    job_id: JobId,
) -> Abstraction {
    Abstraction::Hold(HoldAbstraction::new(
        ty,
        fs.clone(),
        v.clone(),
        tag.to_string(),
        Some(job_id),
    ))
}

fn assert_kind(v: &FilesystemVersion, kind: VersionKind) {
    if v.kind != kind {
        panic!(
            "implementation error: extractor for {:?} called on {:?} {:?}",
            kind, v.kind, v.name
        );
    }
}

pub fn step_bookmark(fs: &DatasetPath, v: &FilesystemVersion) -> Option<Abstraction> {
    assert_kind(v, VersionKind::Bookmark);
    let job = parse_guid_and_job(&STEP_BOOKMARK_RE, v)?;
    Some(bookmark(AbstractionType::StepBookmark, fs, v, Some(job)))
}

pub fn replication_cursor_v1(fs: &DatasetPath, v: &FilesystemVersion) -> Option<Abstraction> {
    assert_kind(v, VersionKind::Bookmark);
    if v.name != REPLICATION_CURSOR_V1_NAME {
        return None;
    }
    Some(bookmark(
        AbstractionType::ReplicationCursorBookmarkV1,
        fs,
        v,
        None,
    ))
}

pub fn replication_cursor_v2(fs: &DatasetPath, v: &FilesystemVersion) -> Option<Abstraction> {
    assert_kind(v, VersionKind::Bookmark);
    let job = parse_guid_and_job(&CURSOR_V2_RE, v)?;
    Some(bookmark(
        AbstractionType::ReplicationCursorBookmarkV2,
        fs,
        v,
        Some(job),
    ))
}

pub fn step_hold(fs: &DatasetPath, v: &FilesystemVersion, tag: &str) -> Option<Abstraction> {
    assert_kind(v, VersionKind::Snapshot);
    let job = parse_job_from_tag(&STEP_HOLD_RE, tag)?;
    Some(hold(AbstractionType::StepHold, fs, v, tag, job))
}

pub fn last_received_hold(
    fs: &DatasetPath,
    v: &FilesystemVersion,
    tag: &str,
) -> Option<Abstraction> {
    assert_kind(v, VersionKind::Snapshot);
    let job = parse_job_from_tag(&LAST_RECEIVED_HOLD_RE, tag)?;
    Some(hold(AbstractionType::LastReceivedHold, fs, v, tag, job))
}
