//! Declarative queries over holds and bookmarks.

use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::abstraction_type::AbstractionTypeSet;
use crate::error::AbstractionError;
use crate::job_id::JobId;
use crate::range::CreateTxgRange;
use crate::store::{self, DatasetFilter, DatasetPath, VersionStore, cancellable};

/// Which filesystems a query covers: one literal filesystem, or every
/// filesystem accepted by a filter.
#[derive(Clone)]
pub enum FilesystemSelector {
    Filesystem(String),
    Filter(Arc<dyn DatasetFilter>),
}

impl fmt::Debug for FilesystemSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilesystemSelector::Filesystem(fs) => f.debug_tuple("Filesystem").field(fs).finish(),
            FilesystemSelector::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
        }
    }
}

impl FilesystemSelector {
    pub fn validate(&self) -> Result<(), AbstractionError> {
        match self {
            FilesystemSelector::Filesystem(fs) => DatasetPath::parse(fs).map(|_| ()),
            FilesystemSelector::Filter(_) => Ok(()),
        }
    }

    /// Resolve the selector to filesystem paths.
    ///
    /// Panics if the selector is invalid; validate first.
    pub async fn filesystems(
        &self,
        store: &dyn VersionStore,
        cancel: &CancellationToken,
    ) -> store::Result<Vec<DatasetPath>> {
        match self {
            FilesystemSelector::Filesystem(fs) => match DatasetPath::parse(fs) {
                Ok(fs) => Ok(vec![fs]),
                Err(err) => panic!("filesystem selector used without validation: {}", err),
            },
            FilesystemSelector::Filter(filter) => {
                cancellable(cancel, store.list_filesystems(filter.as_ref(), cancel)).await
            }
        }
    }
}

/// Query for holds and bookmarks. A marker matches if it satisfies all
/// fields.
#[derive(Debug, Clone)]
pub struct ListZfsHoldsAndBookmarksQuery {
    pub fs: FilesystemSelector,
    /// Wanted abstraction types (any of them).
    pub what: AbstractionTypeSet,
    /// If set, the marker's job must be equal. Markers without a job always
    /// pass this check.
    pub job_id: Option<JobId>,
    /// The hold's snapshot or the bookmark's CreateTXG must lie in this range.
    pub create_txg: CreateTxgRange,
    /// Number of filesystems scanned concurrently. Must be >= 1.
    pub concurrency: usize,
}

impl ListZfsHoldsAndBookmarksQuery {
    /// Query all types on a single filesystem, no job or range constraint.
    pub fn for_filesystem(fs: impl Into<String>) -> Self {
        Self::with_selector(FilesystemSelector::Filesystem(fs.into()))
    }

    /// Query all types on every filesystem `filter` accepts.
    pub fn for_filter(filter: Arc<dyn DatasetFilter>) -> Self {
        Self::with_selector(FilesystemSelector::Filter(filter))
    }

    fn with_selector(fs: FilesystemSelector) -> Self {
        Self {
            fs,
            what: AbstractionTypeSet::all(),
            job_id: None,
            create_txg: CreateTxgRange::unbounded(),
            concurrency: 1,
        }
    }

    pub fn what(mut self, what: AbstractionTypeSet) -> Self {
        self.what = what;
        self
    }

    pub fn job_id(mut self, job_id: Option<JobId>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn create_txg(mut self, range: CreateTxgRange) -> Self {
        self.create_txg = range;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn validate(&self) -> Result<(), AbstractionError> {
        self.fs.validate()?;
        if let Some(job_id) = &self.job_id {
            job_id.validate()?;
        }
        self.create_txg.validate()?;
        if self.concurrency < 1 || self.concurrency > Semaphore::MAX_PERMITS {
            return Err(AbstractionError::InvalidConcurrency {
                got: self.concurrency,
                max: Semaphore::MAX_PERMITS,
            });
        }
        Ok(())
    }
}
