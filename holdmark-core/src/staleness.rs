//! Live/stale classification of enumerated markers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::abstraction::Abstraction;
use crate::abstraction_type::AbstractionType;
use crate::job_id::JobId;
use crate::list::{ListAbstractionsErrors, ListStartError, list_abstractions};
use crate::query::ListZfsHoldsAndBookmarksQuery;
use crate::range::CreateTxgRange;
use crate::store::{DatasetPath, VersionStore};

/// Point-in-time partition of a set of markers. `all` is the disjoint
/// union of `live` and `stale`.
#[derive(Debug, Clone, Serialize)]
pub struct StalenessInfo {
    /// The query the candidates were enumerated with, if any.
    #[serde(skip)]
    pub constructed_with_query: Option<ListZfsHoldsAndBookmarksQuery>,
    pub all: Vec<Abstraction>,
    pub live: Vec<Abstraction>,
    pub stale: Vec<Abstraction>,
}

#[derive(Debug, thiserror::Error)]
pub enum ListStaleError {
    #[error(
        "query range {0} must not have an upper bound: the most recent markers must be visible"
    )]
    BoundedRange(CreateTxgRange),

    #[error("{0}")]
    Start(#[from] ListStartError),

    /// An error might hide the most recent marker of a group.
    #[error("{0}")]
    Enumeration(#[from] ListAbstractionsErrors),
}

/// Enumerate with `query` and classify the result.
///
/// Refuses a query with an upper CreateTXG bound, and refuses to classify
/// if any filesystem failed to enumerate.
pub async fn list_stale(
    store: Arc<dyn VersionStore>,
    cancel: CancellationToken,
    query: ListZfsHoldsAndBookmarksQuery,
) -> Result<StalenessInfo, ListStaleError> {
    if query.create_txg.until.is_some() {
        return Err(ListStaleError::BoundedRange(query.create_txg));
    }

    let (abstractions, errors) = list_abstractions(store, cancel, query.clone()).await?;
    if let Some(errors) = ListAbstractionsErrors::new(errors) {
        return Err(errors.into());
    }

    let mut info = list_stale_filtering(abstractions);
    info.constructed_with_query = Some(query);
    Ok(info)
}

type GroupKey = (DatasetPath, JobId, AbstractionType);

/// Partition `abstractions` into live and stale.
///
/// Markers without a job are always live. The rest are grouped by
/// (filesystem, job, type); within a group the `quota` entries with the
/// highest CreateTXG are live. Order among equal CreateTXGs is unspecified.
pub fn list_stale_filtering(abstractions: Vec<Abstraction>) -> StalenessInfo {
    let mut live = Vec::new();
    let mut groups: BTreeMap<GroupKey, Vec<Abstraction>> = BTreeMap::new();

    for a in &abstractions {
        match a.job_id() {
            None => live.push(a.clone()),
            Some(job) => groups
                .entry((a.fs().clone(), job.clone(), a.abstraction_type()))
                .or_default()
                .push(a.clone()),
        }
    }

    let mut stale = Vec::new();
    for ((fs, job, ty), mut group) in groups {
        group.sort_by(|a, b| b.create_txg().cmp(&a.create_txg()));
        let keep = ty.live_quota().unwrap_or(group.len()).min(group.len());
        let expired = group.split_off(keep);
        debug!(
            fs = %fs,
            job = %job,
            ty = %ty,
            live = group.len(),
            stale = expired.len(),
            "classified group"
        );
        live.extend(group);
        stale.extend(expired);
    }

    StalenessInfo {
        constructed_with_query: None,
        all: abstractions,
        live,
        stale,
    }
}
