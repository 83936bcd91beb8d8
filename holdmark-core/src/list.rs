//! Concurrent enumeration of holds and bookmarks.
//!
//! One task per filesystem, at most `query.concurrency` of them talking to
//! the store at any time. Matches and per-filesystem errors are streamed on
//! two channels that close once every filesystem task has finished.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::abstraction::Abstraction;
use crate::abstraction_type::Extractor;
use crate::error::AbstractionError;
use crate::query::ListZfsHoldsAndBookmarksQuery;
use crate::store::{DatasetPath, StoreError, VersionKind, VersionStore, cancellable};

/// A failure while enumerating one filesystem.
#[derive(Debug)]
pub struct ListAbstractionsError {
    pub fs: String,
    /// Snapshot the failing call was about, if any.
    pub snap: Option<String>,
    /// What was being attempted.
    pub what: String,
    pub err: StoreError,
}

impl ListAbstractionsError {
    fn new(fs: &DatasetPath, snap: Option<&str>, what: &str, err: StoreError) -> Self {
        Self {
            fs: fs.to_string(),
            snap: snap.map(str::to_string),
            what: what.to_string(),
            err,
        }
    }
}

impl fmt::Display for ListAbstractionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fs.is_empty() {
            return write!(f, "list endpoint abstractions: {}: {}", self.what, self.err);
        }
        let target = match &self.snap {
            Some(snap) => format!("{}@{}", self.fs, snap),
            None => self.fs.clone(),
        };
        write!(
            f,
            "list endpoint abstractions on {:?}: {}: {}",
            target, self.what, self.err
        )
    }
}

impl std::error::Error for ListAbstractionsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

/// A non-empty collection of per-filesystem enumeration errors.
#[derive(Debug)]
pub struct ListAbstractionsErrors(Vec<ListAbstractionsError>);

impl ListAbstractionsErrors {
    /// `None` if `errors` is empty.
    pub fn new(errors: Vec<ListAbstractionsError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    pub fn errors(&self) -> &[ListAbstractionsError] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<ListAbstractionsError> {
        self.0
    }
}

impl fmt::Display for ListAbstractionsErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "list endpoint abstractions: {}", only);
        }
        let msgs: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(
            f,
            "list endpoint abstractions: multiple errors:\n{}",
            msgs.join("\n")
        )
    }
}

impl std::error::Error for ListAbstractionsErrors {}

/// Errors that prevent an enumeration from starting.
#[derive(Debug, thiserror::Error)]
pub enum ListStartError {
    #[error("validate query: {0}")]
    Validate(#[from] AbstractionError),

    #[error("list filesystems: {0}")]
    ListFilesystems(#[source] StoreError),
}

pub type AbstractionStreams = (
    UnboundedReceiver<Abstraction>,
    UnboundedReceiver<ListAbstractionsError>,
);

/// Start enumerating all abstractions matching `query`.
///
/// Returns the match and error channels. Both must be drained by the
/// caller; they close once every filesystem has been scanned. Validation
/// and filesystem resolution errors are returned immediately instead.
pub async fn list_abstractions_streamed(
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    query: ListZfsHoldsAndBookmarksQuery,
) -> Result<AbstractionStreams, ListStartError> {
    query.validate()?;
    for ty in query.what.iter() {
        // registry lookup panics on taxonomy drift, before any task is spawned
        ty.extractor();
    }

    let filesystems = query
        .fs
        .filesystems(store.as_ref(), &cancel)
        .await
        .map_err(ListStartError::ListFilesystems)?;
    debug!(
        filesystems = filesystems.len(),
        what = %query.what,
        range = %query.create_txg,
        concurrency = query.concurrency,
        "listing abstractions"
    );

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (err_tx, err_rx) = mpsc::unbounded_channel();
    let semaphore = Arc::new(Semaphore::new(query.concurrency));
    let query = Arc::new(query);

    let mut scans = Vec::with_capacity(filesystems.len());
    for fs in filesystems {
        let store = store.clone();
        let cancel = cancel.clone();
        let query = query.clone();
        let semaphore = semaphore.clone();
        let out_tx = out_tx.clone();
        let err_tx = err_tx.clone();
        let task_fs = fs.clone();

        let handle = tokio::spawn(async move {
            let fs = task_fs;
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report(&err_tx, ListAbstractionsError::new(&fs, None, "acquire scan slot", StoreError::Cancelled));
                    return;
                }
                permit = semaphore.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(e) => {
                        report(&err_tx, ListAbstractionsError::new(&fs, None, "acquire scan slot", StoreError::Backend(e.to_string())));
                        return;
                    }
                },
            };

            let emitter = Emitter {
                query: &query,
                out: &out_tx,
            };
            if let Err(e) = list_abstractions_fs(store.as_ref(), &cancel, &fs, &query, &emitter).await {
                report(&err_tx, e);
            }
            drop(permit);
        });
        scans.push((fs, handle));
    }
    drop(out_tx);

    // err_tx lives here until the last scan is joined
    tokio::spawn(async move {
        for (fs, handle) in scans {
            if let Err(e) = handle.await {
                report(
                    &err_tx,
                    ListAbstractionsError::new(
                        &fs,
                        None,
                        "scan filesystem",
                        StoreError::TaskFailed(e.to_string()),
                    ),
                );
            }
        }
    });

    Ok((out_rx, err_rx))
}

fn report(errs: &UnboundedSender<ListAbstractionsError>, err: ListAbstractionsError) {
    warn!(fs = %err.fs, snap = ?err.snap, what = %err.what, error = %err.err, "listing abstractions failed");
    // a dropped receiver means the caller stopped listening
    let _ = errs.send(err);
}

/// Applies the query's job and range constraints to extracted candidates.
struct Emitter<'a> {
    query: &'a ListZfsHoldsAndBookmarksQuery,
    out: &'a UnboundedSender<Abstraction>,
}

impl Emitter<'_> {
    fn emit(&self, a: Abstraction) {
        let job_matches = match (&self.query.job_id, a.job_id()) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };
        let create_txg_matches = self.query.create_txg.contains(a.create_txg());
        if job_matches && create_txg_matches {
            let _ = self.out.send(a);
        }
    }
}

/// Enumerate one filesystem. The first store failure abandons the
/// filesystem and is returned.
async fn list_abstractions_fs(
    store: &dyn VersionStore,
    cancel: &CancellationToken,
    fs: &DatasetPath,
    query: &ListZfsHoldsAndBookmarksQuery,
    emitter: &Emitter<'_>,
) -> Result<(), ListAbstractionsError> {
    if query.what.is_empty() {
        return Ok(());
    }
    debug!(fs = %fs, "scanning filesystem");

    // versions are listed once and shared by all wanted types
    let versions = cancellable(cancel, store.list_filesystem_versions(fs, cancel))
        .await
        .map_err(|e| ListAbstractionsError::new(fs, None, "list filesystem versions", e))?;

    let mut holds_by_snapshot: HashMap<&str, Vec<String>> = HashMap::new();
    for ty in query.what.iter() {
        let extractor = ty.extractor();
        for v in &versions {
            match (v.kind, extractor) {
                (VersionKind::Bookmark, Extractor::Bookmark(extract)) => {
                    if let Some(a) = extract(fs, v) {
                        emitter.emit(a);
                    }
                }
                (VersionKind::Snapshot, Extractor::Hold(extract))
                    if query.create_txg.contains(v.create_txg) =>
                {
                    if !holds_by_snapshot.contains_key(v.name.as_str()) {
                        let tags = cancellable(cancel, store.list_holds(fs, &v.name, cancel))
                            .await
                            .map_err(|e| {
                                ListAbstractionsError::new(fs, Some(&v.name), "get hold on snap", e)
                            })?;
                        holds_by_snapshot.insert(v.name.as_str(), tags);
                    }
                    for tag in &holds_by_snapshot[v.name.as_str()] {
                        if let Some(a) = extract(fs, v, tag) {
                            emitter.emit(a);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    debug!(fs = %fs, versions = versions.len(), "done scanning filesystem");
    Ok(())
}

/// Blocking form of [`list_abstractions_streamed`]: drains both channels and
/// returns all matches together with all per-filesystem errors.
pub async fn list_abstractions(
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    query: ListZfsHoldsAndBookmarksQuery,
) -> Result<(Vec<Abstraction>, Vec<ListAbstractionsError>), ListStartError> {
    let (mut out, mut errs) = list_abstractions_streamed(store, cancel, query).await?;

    let drain_out = async {
        let mut abstractions = Vec::new();
        while let Some(a) = out.recv().await {
            abstractions.push(a);
        }
        abstractions
    };
    let drain_errs = async {
        let mut errors = Vec::new();
        while let Some(e) = errs.recv().await {
            errors.push(e);
        }
        errors
    };

    Ok(tokio::join!(drain_out, drain_errs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction_type::{AbstractionType, AbstractionTypeSet};
    use crate::extractors::{last_received_hold_tag, step_bookmark_name, step_hold_tag};
    use crate::job_id::JobId;
    use crate::memory::MemoryStore;
    use crate::range::{CreateTxgRange, CreateTxgRangeBound};
    use crate::store::SubtreeFilter;

    fn err(fs: &str, snap: Option<&str>, msg: &str) -> ListAbstractionsError {
        ListAbstractionsError {
            fs: fs.to_string(),
            snap: snap.map(str::to_string),
            what: "list filesystem versions".to_string(),
            err: StoreError::Backend(msg.to_string()),
        }
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            err("pool/a", None, "boom").to_string(),
            "list endpoint abstractions on \"pool/a\": list filesystem versions: store backend error: boom"
        );
        assert_eq!(
            err("pool/a", Some("s1"), "boom").to_string(),
            "list endpoint abstractions on \"pool/a@s1\": list filesystem versions: store backend error: boom"
        );
        assert_eq!(
            err("", None, "boom").to_string(),
            "list endpoint abstractions: list filesystem versions: store backend error: boom"
        );
    }

    #[test]
    fn test_errors_display_joins_each_item() {
        assert!(ListAbstractionsErrors::new(Vec::new()).is_none());

        let single = ListAbstractionsErrors::new(vec![err("pool/a", None, "one")]).unwrap();
        assert!(single.to_string().starts_with("list endpoint abstractions: list endpoint abstractions on \"pool/a\""));

        let multi = ListAbstractionsErrors::new(vec![
            err("pool/a", None, "one"),
            err("pool/b", None, "two"),
        ])
        .unwrap();
        let msg = multi.to_string();
        let lines: Vec<&str> = msg.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "list endpoint abstractions: multiple errors:");
        assert!(lines[1].contains("pool/a") && lines[1].ends_with("one"));
        assert!(lines[2].contains("pool/b") && lines[2].ends_with("two"));
    }

    fn path(s: &str) -> DatasetPath {
        DatasetPath::parse(s).unwrap()
    }

    fn job(s: &str) -> JobId {
        JobId::new(s).unwrap()
    }

    fn sorted_strings(abstractions: &[Abstraction]) -> Vec<String> {
        let mut v: Vec<String> = abstractions.iter().map(ToString::to_string).collect();
        v.sort();
        v
    }

    /// pool/a: step bookmarks at 10 and 20 for j1, one for j2 at 30, step and
    /// last-received holds for j1 on s1 (txg 15), a user hold on s2 (txg 25).
    fn populated_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_bookmark(&fs, &step_bookmark_name(1, &job("j1")), 1, 10);
        store.add_bookmark(&fs, &step_bookmark_name(2, &job("j1")), 2, 20);
        store.add_bookmark(&fs, &step_bookmark_name(3, &job("j2")), 3, 30);
        store.add_bookmark(&fs, "manual", 4, 5);
        store.add_snapshot(&fs, "s1", 5, 15);
        store.add_snapshot(&fs, "s2", 6, 25);
        store.add_hold(&fs, "s1", &step_hold_tag(&job("j1")));
        store.add_hold(&fs, "s1", &last_received_hold_tag(&job("j1")));
        store.add_hold(&fs, "s2", "user");
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_lists_all_markers() {
        let store = populated_store();
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a");
        let (found, errs) = list_abstractions(store, CancellationToken::new(), query)
            .await
            .unwrap();
        assert!(errs.is_empty());
        assert_eq!(found.len(), 5);
        assert_eq!(
            found
                .iter()
                .filter(|a| a.abstraction_type() == AbstractionType::StepBookmark)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_one_abstraction_per_hold_tag() {
        let store = populated_store();
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a").what(
            [AbstractionType::StepHold, AbstractionType::LastReceivedHold]
                .into_iter()
                .collect(),
        );
        let (found, _) = list_abstractions(store.clone(), CancellationToken::new(), query)
            .await
            .unwrap();
        assert_eq!(
            sorted_strings(&found),
            vec![
                "last-received-hold \"zrepl_last_received_J_j1\" on pool/a@s1".to_string(),
                "step-hold \"zrepl_STEP_J_j1\" on pool/a@s1".to_string(),
            ]
        );
        // one version listing plus one holds listing per snapshot, even with
        // two hold types wanted
        assert_eq!(store.store_calls(), 3);
    }

    #[tokio::test]
    async fn test_job_and_range_filters() {
        let store = populated_store();
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a")
            .job_id(Some(job("j1")))
            .create_txg(CreateTxgRange {
                since: Some(CreateTxgRangeBound::inclusive(15)),
                until: None,
            });
        let (found, errs) = list_abstractions(store, CancellationToken::new(), query)
            .await
            .unwrap();
        assert!(errs.is_empty());
        let txgs: Vec<u64> = found.iter().map(Abstraction::create_txg).collect();
        assert!(txgs.iter().all(|&t| t >= 15));
        assert!(found.iter().all(|a| a.job_id() == Some(&job("j1"))));
        assert_eq!(found.len(), 3);
    }

    #[tokio::test]
    async fn test_jobless_markers_pass_job_filter() {
        let store = MemoryStore::new();
        let fs = path("pool/a");
        store.add_bookmark(&fs, crate::extractors::REPLICATION_CURSOR_V1_NAME, 1, 10);
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a")
            .job_id(Some(job("other")));
        let (found, _) = list_abstractions(Arc::new(store), CancellationToken::new(), query)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].job_id().is_none());
    }

    #[tokio::test]
    async fn test_empty_type_set_yields_nothing() {
        let store = populated_store();
        let query =
            ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a").what(AbstractionTypeSet::new());
        let (found, errs) = list_abstractions(store.clone(), CancellationToken::new(), query)
            .await
            .unwrap();
        assert!(found.is_empty() && errs.is_empty());
        assert_eq!(store.store_calls(), 0);
    }

    #[tokio::test]
    async fn test_holds_error_abandons_filesystem() {
        let store = populated_store();
        store.fail_list_holds(&path("pool/a"), "s1", "holds unavailable");
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a")
            .what([AbstractionType::StepHold].into_iter().collect());
        let (found, errs) = list_abstractions(store, CancellationToken::new(), query)
            .await
            .unwrap();
        assert!(found.is_empty());
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].snap.as_deref(), Some("s1"));
        assert_eq!(errs[0].what, "get hold on snap");
    }

    #[tokio::test]
    async fn test_invalid_query_fails_to_start() {
        let query = ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a").concurrency(0);
        let res = list_abstractions(populated_store(), CancellationToken::new(), query).await;
        assert!(matches!(res, Err(ListStartError::Validate(_))));
    }

    #[tokio::test]
    async fn test_filter_resolution_failure_fails_to_start() {
        let store = MemoryStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let filter = SubtreeFilter::from_rules([("<", true)]).unwrap();
        let query = ListZfsHoldsAndBookmarksQuery::for_filter(Arc::new(filter));
        let res = list_abstractions(Arc::new(store), cancel, query).await;
        assert!(matches!(
            res,
            Err(ListStartError::ListFilesystems(StoreError::Cancelled))
        ));
    }
}
