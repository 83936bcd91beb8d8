//! Store interface
//!
//! The store is the source of truth for every marker this crate reasons
//! about. Drivers implement [`VersionStore`]; this module also holds the
//! value types the store hands back (dataset paths, filesystem versions)
//! and the filesystem filter predicate used to select datasets.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::error::AbstractionError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("dataset does not exist: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("cannot parse store output: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("store backend error: {0}")]
    Backend(String),

    /// A scan task died before reporting a result.
    #[error("scan task failed: {0}")]
    TaskFailed(String),
}

/// Maximum length of a dataset name, including the pool name.
pub const MAX_DATASET_NAME_LEN: usize = 255;

/// A validated filesystem (or volume) path such as `pool/data/home`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetPath(String);

impl DatasetPath {
    pub fn parse(name: &str) -> std::result::Result<Self, AbstractionError> {
        let invalid = |reason: String| AbstractionError::InvalidFilesystem {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("must not be empty".into()));
        }
        if name.len() > MAX_DATASET_NAME_LEN {
            return Err(invalid(format!(
                "longer than {} bytes",
                MAX_DATASET_NAME_LEN
            )));
        }
        for component in name.split('/') {
            if component.is_empty() {
                return Err(invalid("empty path component".into()));
            }
            // zfs allows spaces in dataset names, but not in job ids
            if let Some(c) = component.chars().find(|c| !is_name_char(*c) && *c != ' ') {
                return Err(invalid(format!("invalid character {:?}", c)));
            }
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components, pool first.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// True if `self` is `prefix` or lies below it.
    pub fn has_prefix(&self, prefix: &DatasetPath) -> bool {
        self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0.as_bytes()[prefix.0.len()] == b'/')
    }
}

/// Characters allowed in a dataset path component, job ids and marker names.
pub(crate) fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')
}

impl fmt::Display for DatasetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DatasetPath {
    type Err = AbstractionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DatasetPath {
    type Error = AbstractionError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DatasetPath> for String {
    fn from(p: DatasetPath) -> Self {
        p.0
    }
}

/// Kind of a filesystem version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionKind {
    Snapshot,
    Bookmark,
}

impl VersionKind {
    /// Separator between dataset path and version name.
    pub fn delimiter(self) -> char {
        match self {
            VersionKind::Snapshot => '@',
            VersionKind::Bookmark => '#',
        }
    }
}

/// A snapshot or bookmark as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemVersion {
    pub kind: VersionKind,
    /// Name without the dataset path and without the `@` / `#` delimiter.
    pub name: String,
    pub guid: u64,
    /// Transaction group the version was created in.
    pub create_txg: u64,
    pub creation: DateTime<Utc>,
}

impl FilesystemVersion {
    pub fn snapshot(name: impl Into<String>, guid: u64, create_txg: u64, creation: DateTime<Utc>) -> Self {
        Self {
            kind: VersionKind::Snapshot,
            name: name.into(),
            guid,
            create_txg,
            creation,
        }
    }

    pub fn bookmark(name: impl Into<String>, guid: u64, create_txg: u64, creation: DateTime<Utc>) -> Self {
        Self {
            kind: VersionKind::Bookmark,
            name: name.into(),
            guid,
            create_txg,
            creation,
        }
    }

    /// `@name` or `#name`
    pub fn relative_name(&self) -> String {
        format!("{}{}", self.kind.delimiter(), self.name)
    }

    /// `fs@name` or `fs#name`
    pub fn to_abs_path(&self, fs: &DatasetPath) -> String {
        format!("{}{}{}", fs, self.kind.delimiter(), self.name)
    }
}

/// Predicate over the filesystem tree, used to select which datasets a
/// query covers.
pub trait DatasetFilter: fmt::Debug + Send + Sync {
    fn filter(&self, path: &DatasetPath) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct FilterRule {
    /// `None` matches every dataset (the `<` rule).
    path: Option<DatasetPath>,
    subtree: bool,
    include: bool,
}

impl FilterRule {
    fn matches(&self, candidate: &DatasetPath) -> bool {
        match (&self.path, self.subtree) {
            (None, _) => true,
            (Some(p), true) => candidate.has_prefix(p),
            (Some(p), false) => candidate == p,
        }
    }

    /// Higher is more specific. Exact rules beat subtree rules on the same path.
    fn specificity(&self) -> (usize, bool) {
        let depth = self.path.as_ref().map_or(0, |p| p.components().count());
        (depth, !self.subtree)
    }
}

/// Filesystem filter built from path rules.
///
/// Rule syntax:
/// - `pool/a` matches exactly `pool/a`
/// - `pool/a<` matches `pool/a` and everything below it
/// - `<` matches every dataset
///
/// The most specific matching rule decides. Datasets that no rule matches
/// are excluded.
#[derive(Debug, Clone, Default)]
pub struct SubtreeFilter {
    rules: Vec<FilterRule>,
}

impl SubtreeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules<I, S>(rules: I) -> std::result::Result<Self, AbstractionError>
    where
        I: IntoIterator<Item = (S, bool)>,
        S: AsRef<str>,
    {
        let mut filter = Self::new();
        for (pattern, include) in rules {
            filter.add(pattern.as_ref(), include)?;
        }
        Ok(filter)
    }

    /// Parse a rule in command-line form: a pattern, optionally prefixed
    /// with `!` to exclude.
    pub fn add_rule_str(&mut self, rule: &str) -> std::result::Result<(), AbstractionError> {
        match rule.strip_prefix('!') {
            Some(pattern) => self.add(pattern, false),
            None => self.add(rule, true),
        }
    }

    pub fn add(&mut self, pattern: &str, include: bool) -> std::result::Result<(), AbstractionError> {
        let invalid = |reason: String| AbstractionError::InvalidFilterRule {
            rule: pattern.to_string(),
            reason,
        };

        let (name, subtree) = match pattern.strip_suffix('<') {
            Some(name) => (name, true),
            None => (pattern, false),
        };
        let path = if name.is_empty() {
            if !subtree {
                return Err(invalid("empty pattern".into()));
            }
            None
        } else {
            Some(DatasetPath::parse(name).map_err(|e| invalid(e.to_string()))?)
        };

        let rule = FilterRule {
            path,
            subtree,
            include,
        };
        if self
            .rules
            .iter()
            .any(|r| r.path == rule.path && r.subtree == rule.subtree)
        {
            return Err(invalid("duplicate pattern".into()));
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl DatasetFilter for SubtreeFilter {
    fn filter(&self, path: &DatasetPath) -> bool {
        self.rules
            .iter()
            .filter(|r| r.matches(path))
            .max_by_key(|r| r.specificity())
            .is_some_and(|r| r.include)
    }
}

/// Operations the abstraction subsystem needs from the underlying store.
///
/// Every call receives the caller's cancellation token. Drivers should
/// observe it, but callers in this crate also race each call against it.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// List all snapshots and bookmarks of `fs` (not of its children).
    async fn list_filesystem_versions(
        &self,
        fs: &DatasetPath,
        cancel: &CancellationToken,
    ) -> Result<Vec<FilesystemVersion>>;

    /// List the hold tags present on `fs@snapshot`.
    async fn list_holds(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    /// Destroy `fs#bookmark`. Destroying a bookmark that is already gone succeeds.
    async fn destroy_bookmark(
        &self,
        fs: &DatasetPath,
        bookmark: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Release `tag` from `fs@snapshot`. Releasing an absent tag succeeds.
    async fn release_hold(
        &self,
        fs: &DatasetPath,
        snapshot: &str,
        tag: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// List all filesystems and volumes accepted by `filter`.
    async fn list_filesystems(
        &self,
        filter: &dyn DatasetFilter,
        cancel: &CancellationToken,
    ) -> Result<Vec<DatasetPath>>;
}

/// Run a store call, failing with [`StoreError::Cancelled`] as soon as
/// `cancel` fires.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        res = fut => res,
    }
}
