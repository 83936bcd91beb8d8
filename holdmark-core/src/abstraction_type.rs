//! Abstraction taxonomy
//!
//! The set of marker kinds is closed. Every kind has exactly one entry in
//! [`REGISTRY_ENTRIES`], which carries its name, its live quota per
//! (filesystem, job) and the extractor that recognizes it in store output.
//! Adding a kind means adding a variant and a registry entry; the registry
//! check panics at first use if the two ever disagree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::abstraction::Abstraction;
use crate::error::AbstractionError;
use crate::extractors;
use crate::store::{DatasetPath, FilesystemVersion};

/// Marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AbstractionType {
    #[serde(rename = "step-bookmark")]
    StepBookmark,
    #[serde(rename = "step-hold")]
    StepHold,
    #[serde(rename = "last-received-hold")]
    LastReceivedHold,
    #[serde(rename = "replication-cursor-bookmark-v1")]
    ReplicationCursorBookmarkV1,
    #[serde(rename = "replication-cursor-bookmark-v2")]
    ReplicationCursorBookmarkV2,
}

/// Recognizes a bookmark-backed abstraction. Returns `None` if the bookmark
/// is not of this kind.
pub type BookmarkExtractor = fn(&DatasetPath, &FilesystemVersion) -> Option<Abstraction>;

/// Recognizes a hold-backed abstraction from a snapshot and one of its hold
/// tags. Returns `None` if the tag is not of this kind.
pub type HoldExtractor = fn(&DatasetPath, &FilesystemVersion, &str) -> Option<Abstraction>;

/// How an abstraction kind is found in the store.
#[derive(Clone, Copy)]
pub enum Extractor {
    Bookmark(BookmarkExtractor),
    Hold(HoldExtractor),
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Bookmark(_) => f.write_str("Extractor::Bookmark"),
            Extractor::Hold(_) => f.write_str("Extractor::Hold"),
        }
    }
}

/// Quota value meaning "every instance is live".
pub const UNBOUNDED_LIVE: i64 = -1;

/// Registry entry for one abstraction kind.
#[derive(Debug, Clone, Copy)]
pub struct TypeInfo {
    pub ty: AbstractionType,
    pub name: &'static str,
    /// Instances live per (filesystem, job); [`UNBOUNDED_LIVE`] for no limit.
    pub live_per_fs_and_job: i64,
    pub extractor: Extractor,
}

pub static REGISTRY_ENTRIES: [TypeInfo; 5] = [
    TypeInfo {
        ty: AbstractionType::StepBookmark,
        name: "step-bookmark",
        live_per_fs_and_job: 2,
        extractor: Extractor::Bookmark(extractors::step_bookmark),
    },
    TypeInfo {
        ty: AbstractionType::StepHold,
        name: "step-hold",
        live_per_fs_and_job: 2,
        extractor: Extractor::Hold(extractors::step_hold),
    },
    TypeInfo {
        ty: AbstractionType::LastReceivedHold,
        name: "last-received-hold",
        live_per_fs_and_job: 1,
        extractor: Extractor::Hold(extractors::last_received_hold),
    },
    TypeInfo {
        ty: AbstractionType::ReplicationCursorBookmarkV1,
        name: "replication-cursor-bookmark-v1",
        live_per_fs_and_job: UNBOUNDED_LIVE,
        extractor: Extractor::Bookmark(extractors::replication_cursor_v1),
    },
    TypeInfo {
        ty: AbstractionType::ReplicationCursorBookmarkV2,
        name: "replication-cursor-bookmark-v2",
        live_per_fs_and_job: 1,
        extractor: Extractor::Bookmark(extractors::replication_cursor_v2),
    },
];

static REGISTRY: LazyLock<BTreeMap<AbstractionType, &'static TypeInfo>> =
    LazyLock::new(build_registry);

fn build_registry() -> BTreeMap<AbstractionType, &'static TypeInfo> {
    let mut registry = BTreeMap::new();
    for info in &REGISTRY_ENTRIES {
        if registry.insert(info.ty, info).is_some() {
            panic!("implementation error: duplicate registry entry for {:?}", info.ty);
        }
        if info.live_per_fs_and_job != UNBOUNDED_LIVE && info.live_per_fs_and_job < 1 {
            panic!(
                "implementation error: invalid live quota {} for {:?}",
                info.live_per_fs_and_job, info.ty
            );
        }
    }
    for ty in AbstractionType::ALL {
        if !registry.contains_key(&ty) {
            panic!("implementation error: no registry entry for {:?}", ty);
        }
    }
    let mut names = BTreeSet::new();
    for info in &REGISTRY_ENTRIES {
        if !names.insert(info.name) {
            panic!("implementation error: duplicate type name {:?}", info.name);
        }
    }
    registry
}

/// Force the registry consistency check. Call once at startup so a drift
/// between types and registry entries fails before any store I/O.
pub fn check_registry() {
    LazyLock::force(&REGISTRY);
}

impl AbstractionType {
    pub const ALL: [AbstractionType; 5] = [
        AbstractionType::StepBookmark,
        AbstractionType::StepHold,
        AbstractionType::LastReceivedHold,
        AbstractionType::ReplicationCursorBookmarkV1,
        AbstractionType::ReplicationCursorBookmarkV2,
    ];

    fn info(self) -> &'static TypeInfo {
        match REGISTRY.get(&self) {
            Some(info) => info,
            None => panic!("implementation error: no registry entry for {:?}", self),
        }
    }

    pub fn as_str(self) -> &'static str {
        self.info().name
    }

    /// Number of instances of this type that are live (not stale) per
    /// (filesystem, job). [`UNBOUNDED_LIVE`] means all of them.
    pub fn num_live_per_fs_and_job(self) -> i64 {
        self.info().live_per_fs_and_job
    }

    /// Quota as a count, `None` if unbounded.
    pub(crate) fn live_quota(self) -> Option<usize> {
        match self.num_live_per_fs_and_job() {
            UNBOUNDED_LIVE => None,
            n => Some(n as usize),
        }
    }

    pub fn extractor(self) -> Extractor {
        self.info().extractor
    }

    /// `None` if this type is not bookmark-backed.
    pub fn bookmark_extractor(self) -> Option<BookmarkExtractor> {
        match self.extractor() {
            Extractor::Bookmark(e) => Some(e),
            Extractor::Hold(_) => None,
        }
    }

    /// `None` if this type is not hold-backed.
    pub fn hold_extractor(self) -> Option<HoldExtractor> {
        match self.extractor() {
            Extractor::Hold(e) => Some(e),
            Extractor::Bookmark(_) => None,
        }
    }
}

impl fmt::Display for AbstractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbstractionType {
    type Err = AbstractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        REGISTRY_ENTRIES
            .iter()
            .find(|info| info.name == s)
            .map(|info| info.ty)
            .ok_or_else(|| AbstractionError::UnknownType(s.to_string()))
    }
}

/// Set of wanted abstraction types
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbstractionTypeSet(BTreeSet<AbstractionType>);

impl AbstractionTypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        AbstractionType::ALL.into_iter().collect()
    }

    /// Parse type names, e.g. from command-line arguments.
    pub fn from_strings<I, S>(names: I) -> Result<Self, AbstractionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for (i, name) in names.into_iter().enumerate() {
            let name = name.as_ref();
            let ty = name
                .parse()
                .map_err(|_| AbstractionError::InvalidTypeInList {
                    index: i + 1,
                    value: name.to_string(),
                })?;
            set.insert(ty);
        }
        Ok(set)
    }

    pub fn insert(&mut self, ty: AbstractionType) -> bool {
        self.0.insert(ty)
    }

    pub fn contains(&self, ty: AbstractionType) -> bool {
        self.0.contains(&ty)
    }

    pub fn iter(&self) -> impl Iterator<Item = AbstractionType> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<AbstractionType> for AbstractionTypeSet {
    fn from_iter<T: IntoIterator<Item = AbstractionType>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for AbstractionTypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.iter().map(AbstractionType::as_str).collect();
        names.sort_unstable();
        f.write_str(&names.join(","))
    }
}
