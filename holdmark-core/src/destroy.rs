//! Batch destruction of markers.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::abstraction::Abstraction;
use crate::store::{StoreError, VersionStore};

/// Outcome of destroying one marker.
#[derive(Debug)]
pub struct BatchDestroyResult {
    pub abstraction: Abstraction,
    /// `None` on success.
    pub destroy_err: Option<StoreError>,
}

impl BatchDestroyResult {
    pub fn is_ok(&self) -> bool {
        self.destroy_err.is_none()
    }
}

impl Serialize for BatchDestroyResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let err = self
            .destroy_err
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let mut s = serializer.serialize_struct("BatchDestroyResult", 2)?;
        s.serialize_field("abstraction", &self.abstraction)?;
        s.serialize_field("destroy_err", &err)?;
        s.end()
    }
}

/// Destroy `abstractions` one after another on a background task.
///
/// Every item is attempted exactly once, regardless of earlier failures.
/// The returned channel carries one result per item and closes when the
/// batch is done. Must be called from within a tokio runtime.
pub fn batch_destroy(
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    abstractions: Vec<Abstraction>,
) -> mpsc::Receiver<BatchDestroyResult> {
    let (tx, rx) = mpsc::channel(abstractions.len().max(1));

    tokio::spawn(async move {
        for abstraction in abstractions {
            let destroy_err = abstraction.destroy(store.as_ref(), &cancel).await.err();
            match &destroy_err {
                None => info!(abstraction = %abstraction, "destroyed"),
                Some(err) => warn!(abstraction = %abstraction, error = %err, "destroy failed"),
            }
            let result = BatchDestroyResult {
                abstraction,
                destroy_err,
            };
            // remaining items are still attempted if the receiver is gone
            let _ = tx.send(result).await;
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction_type::AbstractionTypeSet;
    use crate::extractors::{step_bookmark_name, step_hold_tag};
    use crate::job_id::JobId;
    use crate::list::list_abstractions;
    use crate::memory::MemoryStore;
    use crate::query::ListZfsHoldsAndBookmarksQuery;
    use crate::store::DatasetPath;

    fn fs() -> DatasetPath {
        DatasetPath::parse("pool/a").unwrap()
    }

    async fn enumerate(store: Arc<MemoryStore>) -> Vec<Abstraction> {
        let query =
            ListZfsHoldsAndBookmarksQuery::for_filesystem("pool/a").what(AbstractionTypeSet::all());
        let (found, errs) = list_abstractions(store, CancellationToken::new(), query)
            .await
            .unwrap();
        assert!(errs.is_empty());
        found
    }

    async fn collect(mut rx: mpsc::Receiver<BatchDestroyResult>) -> Vec<BatchDestroyResult> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_batch() {
        let job = JobId::new("j").unwrap();
        let store = MemoryStore::new();
        store.add_bookmark(&fs(), &step_bookmark_name(1, &job), 1, 10);
        store.add_bookmark(&fs(), &step_bookmark_name(2, &job), 2, 20);
        store.add_snapshot(&fs(), "s1", 3, 30);
        store.add_hold(&fs(), "s1", &step_hold_tag(&job));
        let failing = format!("pool/a#{}", step_bookmark_name(1, &job));
        store.fail_destroy(&failing, "dataset is busy");
        let store = Arc::new(store);

        let items = enumerate(store.clone()).await;
        assert_eq!(items.len(), 3);

        let results = collect(batch_destroy(store.clone(), CancellationToken::new(), items)).await;
        assert_eq!(results.len(), 3);
        assert_eq!(store.destroy_calls(), 3);

        let failed: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].abstraction.full_path(), failing);

        assert_eq!(store.bookmarks(&fs()), vec![step_bookmark_name(1, &job)]);
        assert!(store.holds(&fs(), "s1").is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_closes_channel() {
        let results = collect(batch_destroy(
            Arc::new(MemoryStore::new()),
            CancellationToken::new(),
            Vec::new(),
        ))
        .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_result_json() {
        let job = JobId::new("j").unwrap();
        let store = MemoryStore::new();
        store.add_bookmark(&fs(), &step_bookmark_name(1, &job), 1, 10);
        let store = Arc::new(store);
        let items = enumerate(store.clone()).await;
        let results = collect(batch_destroy(store, CancellationToken::new(), items)).await;

        let json = serde_json::to_value(&results[0]).unwrap();
        assert_eq!(json["destroy_err"], "");
        assert_eq!(json["abstraction"]["type"], "step-bookmark");
    }
}
