//! Holdmark Core Library
//!
//! Lifecycle tracking for the bookmarks and holds a snapshot replication
//! tool leaves on its source datasets:
//! - CreateTXG range arithmetic
//! - Marker taxonomy, naming scheme and extractors
//! - Concurrent enumeration across a dataset tree
//! - Live/stale classification per (filesystem, job, type)
//! - Batch destruction with per-item outcomes
//! - Store interface with in-memory and `zfs(8)` drivers

pub mod abstraction;
pub mod abstraction_type;
pub mod config;
pub mod destroy;
pub mod error;
pub mod extractors;
pub mod job_id;
pub mod list;
pub mod memory;
pub mod query;
pub mod range;
pub mod staleness;
pub mod store;
pub mod zfs;

pub use abstraction::{Abstraction, BookmarkAbstraction, HoldAbstraction};
pub use abstraction_type::{AbstractionType, AbstractionTypeSet, check_registry};
pub use config::Config;
pub use destroy::{BatchDestroyResult, batch_destroy};
pub use error::AbstractionError;
pub use job_id::JobId;
pub use list::{
    ListAbstractionsError, ListAbstractionsErrors, ListStartError, list_abstractions,
    list_abstractions_streamed,
};
pub use memory::MemoryStore;
pub use query::{FilesystemSelector, ListZfsHoldsAndBookmarksQuery};
pub use range::{CreateTxgRange, CreateTxgRangeBound};
pub use staleness::{ListStaleError, StalenessInfo, list_stale, list_stale_filtering};
pub use store::{
    DatasetFilter, DatasetPath, FilesystemVersion, StoreError, SubtreeFilter, VersionKind,
    VersionStore,
};
pub use zfs::ZfsCli;
