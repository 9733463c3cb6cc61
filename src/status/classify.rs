//! Mapping from raw backend codes to the canonical status model
//!
//! Everything here is pure. Flags that depend on context the backend entry
//! does not carry (locks, symlinks, forbidden parents, unknown-kind tree
//! conflicts) are added by the reconciler.

use crate::connector::EntryStatus;
use crate::status::record::{ChangeMask, TextStatus};

/// Text status of an entry
///
/// `is_remote` selects the interpretation used for incoming (repository side)
/// changes, where an unversioned node does not exist and a conflict is just a
/// modification.
pub fn text_status_of(prop_kind: EntryStatus, text_kind: EntryStatus, is_remote: bool) -> TextStatus {
    match text_kind {
        EntryStatus::Ignored => TextStatus::Ignored,
        EntryStatus::Unversioned if is_remote => TextStatus::NotExists,
        EntryStatus::Unversioned => TextStatus::New,
        EntryStatus::Added => TextStatus::Added,
        EntryStatus::Deleted => TextStatus::Deleted,
        EntryStatus::Missing => TextStatus::Missing,
        EntryStatus::Conflicted if is_remote => TextStatus::Modified,
        EntryStatus::Conflicted => TextStatus::Conflicting,
        EntryStatus::Merged | EntryStatus::Modified => TextStatus::Modified,
        EntryStatus::Obstructed => TextStatus::Obstructed,
        EntryStatus::Replaced => TextStatus::Replaced,
        EntryStatus::None if !is_remote && prop_kind == EntryStatus::None => TextStatus::NotExists,
        EntryStatus::None
        | EntryStatus::Normal
        | EntryStatus::External
        | EntryStatus::Incomplete => TextStatus::Normal,
    }
}

/// Property status of an entry
pub fn prop_status_of(prop_kind: EntryStatus) -> TextStatus {
    match prop_kind {
        EntryStatus::Conflicted => TextStatus::Conflicting,
        EntryStatus::Modified => TextStatus::Modified,
        _ => TextStatus::Normal,
    }
}

/// Fold text and property status into the status shown for a resource
///
/// A property conflict dominates; clean text with modified properties still
/// reads as modified.
pub fn compound_status(text: TextStatus, prop: TextStatus) -> TextStatus {
    match (text, prop) {
        (_, TextStatus::Conflicting) => TextStatus::Conflicting,
        (TextStatus::Normal, TextStatus::Modified) => TextStatus::Modified,
        (text, _) => text,
    }
}

/// Compound status straight from raw codes
pub fn compound_status_of(prop_kind: EntryStatus, text_kind: EntryStatus, is_remote: bool) -> TextStatus {
    compound_status(
        text_status_of(prop_kind, text_kind, is_remote),
        prop_status_of(prop_kind),
    )
}

/// Flags derivable from the entry alone
pub fn change_mask(is_copied: bool, is_switched: bool, is_external: bool) -> ChangeMask {
    let mut mask = ChangeMask::empty();
    mask.set(ChangeMask::COPIED, is_copied);
    mask.set(ChangeMask::SWITCHED, is_switched);
    mask.set(ChangeMask::SVN_EXTERNALS, is_external);
    mask
}
