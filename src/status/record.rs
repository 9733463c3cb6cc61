//! Per-resource status records

use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;

use crate::connector::NodeKind;
use crate::error::SvnCacheError;
use crate::repository::INVALID_REVISION;
use crate::resource::Resource;

/// Canonical text or property status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextStatus {
    Normal,
    New,
    Added,
    Deleted,
    Missing,
    Conflicting,
    Modified,
    Ignored,
    Obstructed,
    Replaced,
    PreReplaced,
    NotExists,
    Linked,
    InternalInvalid,
}

impl TextStatus {
    /// Persisted code; `NotExists` is stored as `null`
    pub fn code(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::New => "New",
            Self::Added => "Added",
            Self::Deleted => "Deleted",
            Self::Missing => "Missing",
            Self::Conflicting => "Conflicting",
            Self::Modified => "Modified",
            Self::Ignored => "Ignored",
            Self::Obstructed => "Obstructed",
            Self::Replaced => "Replaced",
            Self::PreReplaced => "Prereplaced",
            Self::NotExists => "null",
            Self::Linked => "Linked",
            Self::InternalInvalid => "InternalInvalid",
        }
    }

    /// Not under version control (or scheduled to leave it)
    pub fn is_unversioned(&self) -> bool {
        matches!(
            self,
            Self::PreReplaced | Self::New | Self::Ignored | Self::NotExists
        )
    }

    /// Statuses of nodes the cache treats as outside SVN control
    pub fn is_non_svn(&self) -> bool {
        matches!(
            self,
            Self::PreReplaced
                | Self::New
                | Self::Ignored
                | Self::NotExists
                | Self::Linked
                | Self::Obstructed
        )
    }

    /// Statuses for which revision, author and date carry no meaning
    pub fn has_no_provenance(&self) -> bool {
        matches!(self, Self::New | Self::Ignored | Self::NotExists | Self::Linked)
    }
}

impl fmt::Display for TextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotExists => f.write_str("NotExists"),
            other => f.write_str(other.code()),
        }
    }
}

impl FromStr for TextStatus {
    type Err = SvnCacheError;

    /// Parse a persisted code; an unknown code means the store is corrupted
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "null" => Self::NotExists,
            "Normal" => Self::Normal,
            "New" => Self::New,
            "Added" => Self::Added,
            "Deleted" => Self::Deleted,
            "Missing" => Self::Missing,
            "Conflicting" => Self::Conflicting,
            "Modified" => Self::Modified,
            "Ignored" => Self::Ignored,
            "Obstructed" => Self::Obstructed,
            "Replaced" => Self::Replaced,
            "Prereplaced" => Self::PreReplaced,
            "Linked" => Self::Linked,
            _ => return Err(SvnCacheError::UnknownStatus(s.to_string())),
        };
        Ok(status)
    }
}

bitflags! {
    /// Independent flags layered on top of the text status
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeMask: u32 {
        const TEXT_MODIFIED = 0x0001;
        const PROP_MODIFIED = 0x0002;
        const COPIED = 0x0004;
        const SWITCHED = 0x0008;
        const LOCKED = 0x0010;
        const SVN_EXTERNALS = 0x0020;
        const FORBIDDEN = 0x0040;
        const SYMLINK = 0x0080;
        const TREE_CONFLICT_UNKNOWN_NODE_KIND = 0x0100;
    }
}

/// What the incoming change tried to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictAction {
    Modify,
    Add,
    Delete,
    Replace,
}

impl ConflictAction {
    pub fn id(&self) -> i32 {
        match self {
            Self::Modify => 0,
            Self::Add => 1,
            Self::Delete => 2,
            Self::Replace => 3,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            1 => Self::Add,
            2 => Self::Delete,
            3 => Self::Replace,
            _ => Self::Modify,
        }
    }
}

/// Local state that made the change conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictReason {
    Modified,
    Obstructed,
    Deleted,
    Missing,
    Unversioned,
    Added,
    Replaced,
    MovedAway,
    MovedHere,
}

impl ConflictReason {
    pub fn id(&self) -> i32 {
        match self {
            Self::Modified => 0,
            Self::Obstructed => 1,
            Self::Deleted => 2,
            Self::Missing => 3,
            Self::Unversioned => 4,
            Self::Added => 5,
            Self::Replaced => 6,
            Self::MovedAway => 7,
            Self::MovedHere => 8,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            1 => Self::Obstructed,
            2 => Self::Deleted,
            3 => Self::Missing,
            4 => Self::Unversioned,
            5 => Self::Added,
            6 => Self::Replaced,
            7 => Self::MovedAway,
            8 => Self::MovedHere,
            _ => Self::Modified,
        }
    }
}

/// Operation during which the conflict was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictOperation {
    None,
    Update,
    Switch,
    Merge,
}

impl ConflictOperation {
    pub fn id(&self) -> i32 {
        match self {
            Self::None => 0,
            Self::Update => 1,
            Self::Switch => 2,
            Self::Merge => 3,
        }
    }

    pub fn from_id(id: i32) -> Self {
        match id {
            1 => Self::Update,
            2 => Self::Switch,
            3 => Self::Merge,
            _ => Self::None,
        }
    }
}

/// One side of a tree conflict
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConflictVersion {
    pub node_kind: NodeKind,
    pub repository_url: Option<String>,
    pub path_in_repository: Option<String>,
    pub peg_revision: i64,
}

/// Structural conflict descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeConflict {
    pub action: ConflictAction,
    pub reason: ConflictReason,
    pub operation: ConflictOperation,
    pub left: Option<ConflictVersion>,
    pub right: Option<ConflictVersion>,
}

/// Cached status of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub resource: Resource,
    pub text_status: TextStatus,
    pub prop_status: TextStatus,
    pub change_mask: ChangeMask,
    pub revision: i64,
    pub base_revision: i64,
    pub author: Option<String>,
    /// Epoch milliseconds, 0 when unknown
    pub last_commit_date: i64,
    pub tree_conflict: Option<TreeConflict>,
}

impl StatusRecord {
    /// A record carrying no provenance
    pub fn unversioned(resource: Resource, text_status: TextStatus, change_mask: ChangeMask) -> Self {
        Self {
            resource,
            text_status,
            prop_status: TextStatus::Normal,
            change_mask,
            revision: INVALID_REVISION,
            base_revision: INVALID_REVISION,
            author: None,
            last_commit_date: 0,
            tree_conflict: None,
        }
    }

    /// The placeholder returned for resources the cache cannot reason about
    pub fn internal_invalid(resource: Resource) -> Self {
        Self::unversioned(resource, TextStatus::InternalInvalid, ChangeMask::empty())
    }

    /// Text and property status folded into one
    pub fn status(&self) -> TextStatus {
        super::classify::compound_status(self.text_status, self.prop_status)
    }

    pub fn is_internal_invalid(&self) -> bool {
        self.text_status == TextStatus::InternalInvalid
    }

    pub fn is_copied(&self) -> bool {
        self.change_mask.contains(ChangeMask::COPIED)
    }

    pub fn is_switched(&self) -> bool {
        self.change_mask.contains(ChangeMask::SWITCHED)
    }

    pub fn has_tree_conflict(&self) -> bool {
        self.tree_conflict.is_some()
    }

    /// Ignored because it is mounted by an external definition
    pub fn is_unversioned_external(&self) -> bool {
        self.text_status == TextStatus::Ignored && self.change_mask.contains(ChangeMask::SVN_EXTERNALS)
    }

    /// Ignored by rule rather than by an opaque parent
    pub fn is_ignored_not_forbidden(&self) -> bool {
        self.text_status == TextStatus::Ignored && !self.change_mask.contains(ChangeMask::FORBIDDEN)
    }

    /// Subtree below this node must not be classified individually
    pub fn is_opaque(&self) -> bool {
        self.change_mask
            .intersects(ChangeMask::SYMLINK | ChangeMask::FORBIDDEN)
    }
}
