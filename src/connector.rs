//! SVN client boundary
//!
//! The cache never talks to a repository or working copy itself. Everything
//! it needs from the backend goes through the [`Connector`] trait, using the
//! raw types defined here.

use bitflags::bitflags;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::repository::{Revision, INVALID_REVISION};
use crate::status::record::TreeConflict;

/// Node kind as reported by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    None,
    File,
    Dir,
    Symlink,
    Unknown,
}

impl NodeKind {
    /// Persisted numeric id
    pub fn id(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::File => 1,
            Self::Dir => 2,
            Self::Unknown => 3,
            Self::Symlink => 4,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            1 => Self::File,
            2 => Self::Dir,
            3 => Self::Unknown,
            4 => Self::Symlink,
            _ => Self::None,
        }
    }
}

/// Raw entry status reported for text or properties
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
    None,
    Unversioned,
    Normal,
    Added,
    Missing,
    Deleted,
    Replaced,
    Modified,
    Merged,
    Conflicted,
    Ignored,
    Obstructed,
    External,
    Incomplete,
}

/// Depth of a backend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SvnDepth {
    Empty,
    Files,
    Immediates,
    Infinity,
}

bitflags! {
    /// Options of a status request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusOptions: u32 {
        const INCLUDE_UNCHANGED = 0x01;
        const INCLUDE_IGNORED = 0x02;
        const SERVER_SIDE = 0x04;
    }
}

/// A working copy lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    pub owner: String,
    pub token: String,
    pub comment: Option<String>,
    pub creation_date: i64,
}

/// One entry of a status report
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatus {
    /// Absolute filesystem path
    pub path: PathBuf,
    /// Repository URL, possibly percent-encoded
    pub url: Option<String>,
    pub node_kind: NodeKind,
    pub revision: i64,
    pub last_changed_revision: i64,
    pub last_changed_date: i64,
    pub last_commit_author: Option<String>,
    pub text_status: EntryStatus,
    pub prop_status: EntryStatus,
    pub is_copied: bool,
    pub is_switched: bool,
    pub is_file_external: bool,
    pub has_conflict: bool,
    pub tree_conflicts: Option<Vec<TreeConflict>>,
    pub wc_lock: Option<Lock>,
}

impl RawStatus {
    /// An entry with no provenance and the given kind and text status
    pub fn new(path: impl Into<PathBuf>, node_kind: NodeKind, text_status: EntryStatus) -> Self {
        Self {
            path: path.into(),
            url: None,
            node_kind,
            revision: INVALID_REVISION,
            last_changed_revision: INVALID_REVISION,
            last_changed_date: 0,
            last_commit_author: None,
            text_status,
            prop_status: EntryStatus::None,
            is_copied: false,
            is_switched: false,
            is_file_external: false,
            has_conflict: false,
            tree_conflicts: None,
            wc_lock: None,
        }
    }

    /// Entry used when the working copy is locked and needs cleanup
    pub fn cleanup_placeholder(path: impl Into<PathBuf>) -> Self {
        let mut st = Self::new(path, NodeKind::Dir, EntryStatus::Modified);
        st.prop_status = EntryStatus::Normal;
        st.revision = 0;
        st.last_changed_revision = 0;
        st
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_revision(mut self, revision: i64, last_changed: i64) -> Self {
        self.revision = revision;
        self.last_changed_revision = last_changed;
        self
    }

    pub fn with_commit(mut self, author: impl Into<String>, date: i64) -> Self {
        self.last_commit_author = Some(author.into());
        self.last_changed_date = date;
        self
    }

    pub fn with_prop_status(mut self, prop_status: EntryStatus) -> Self {
        self.prop_status = prop_status;
        self
    }

    /// First tree conflict descriptor, if any
    pub fn tree_conflict(&self) -> Option<&TreeConflict> {
        self.tree_conflicts.as_ref().and_then(|c| c.first())
    }
}

/// Entry metadata returned by `info`
#[derive(Debug, Clone, PartialEq)]
pub struct EntryInfo {
    pub path: PathBuf,
    pub url: Option<String>,
    pub kind: NodeKind,
    pub revision: i64,
    pub last_changed_revision: i64,
    pub last_changed_author: Option<String>,
    pub last_changed_date: i64,
    pub lock: Option<Lock>,
    pub tree_conflicts: Option<Vec<TreeConflict>>,
}

impl EntryInfo {
    pub fn new(path: impl Into<PathBuf>, kind: NodeKind) -> Self {
        Self {
            path: path.into(),
            url: None,
            kind,
            revision: INVALID_REVISION,
            last_changed_revision: INVALID_REVISION,
            last_changed_author: None,
            last_changed_date: 0,
            lock: None,
            tree_conflicts: None,
        }
    }
}

/// Target of an `info` request: a working copy path or a URL, with revisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReference {
    pub path: String,
    pub peg_revision: Option<Revision>,
    pub revision: Option<Revision>,
}

impl EntryReference {
    pub fn path(path: &Path) -> Self {
        Self {
            path: path.to_string_lossy().into_owned(),
            peg_revision: None,
            revision: None,
        }
    }

    pub fn url(url: impl Into<String>, peg_revision: Revision, revision: Revision) -> Self {
        Self {
            path: url.into(),
            peg_revision: Some(peg_revision),
            revision: Some(revision),
        }
    }
}

/// Backend failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("Working copy at {path} is locked and needs cleanup")]
    CleanupRequired { path: PathBuf },

    #[error("{path} is not a working copy directory")]
    NotWorkingCopy { path: PathBuf },

    #[error("Path not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Operation cancelled by the connector")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl ConnectorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// The SVN client operations used by the cache
///
/// Calls block for one backend round-trip; the cache never holds its
/// internal lock while calling into the connector.
pub trait Connector: Send + Sync {
    /// Status entries under `path`, including the path itself
    fn status(
        &self,
        path: &Path,
        depth: SvnDepth,
        options: StatusOptions,
    ) -> Result<Vec<RawStatus>, ConnectorError>;

    /// Entry metadata for a working copy path or repository URL
    fn info(&self, reference: &EntryReference, depth: SvnDepth)
        -> Result<Vec<EntryInfo>, ConnectorError>;

    /// Streaming variant of `info`, used to fetch tree conflict descriptors
    fn get_info(
        &self,
        reference: &EntryReference,
        depth: SvnDepth,
        on_entry: &mut dyn FnMut(&EntryInfo),
    ) -> Result<(), ConnectorError> {
        for entry in self.info(reference, depth)? {
            on_entry(&entry);
        }
        Ok(())
    }
}

/// Sort entries so that parents precede their children
pub fn reorder(statuses: &mut [RawStatus]) {
    statuses.sort_by(|a, b| a.path.cmp(&b.path));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_puts_parents_first() {
        let mut st = vec![
            RawStatus::new("/wc/a/b", NodeKind::File, EntryStatus::Normal),
            RawStatus::new("/wc", NodeKind::Dir, EntryStatus::Normal),
            RawStatus::new("/wc/a", NodeKind::Dir, EntryStatus::Normal),
        ];
        reorder(&mut st);
        let paths: Vec<_> = st.iter().map(|s| s.path.to_string_lossy().into_owned()).collect();
        assert_eq!(paths, vec!["/wc", "/wc/a", "/wc/a/b"]);
    }

    #[test]
    fn node_kind_ids_round_trip() {
        for kind in [NodeKind::None, NodeKind::File, NodeKind::Dir, NodeKind::Unknown, NodeKind::Symlink] {
            assert_eq!(NodeKind::from_id(kind.id()), kind);
        }
    }

    #[test]
    fn cleanup_placeholder_is_modified_dir() {
        let st = RawStatus::cleanup_placeholder("/wc");
        assert_eq!(st.node_kind, NodeKind::Dir);
        assert_eq!(st.text_status, EntryStatus::Modified);
        assert!(st.url.is_none());
    }
}
