//! Persisted record formats
//!
//! Both formats are `;`-separated text. Free-form values (paths, URLs,
//! comments, nested records) are base64 encoded so they cannot contain the
//! separator. Resource-change records written by older versions stop after
//! the change mask; readers must accept them.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::connector::NodeKind;
use crate::error::{SvnCacheError, SvnCacheResult};
use crate::repository::{RepositoryResource, Revision, RevisionKind, RootKind, INVALID_REVISION};
use crate::resource::Resource;
use crate::status::{
    ChangeMask, ConflictAction, ConflictOperation, ConflictReason, ConflictVersion, StatusRecord, TextStatus,
    TreeConflict,
};

const NULL: &str = "null";

/// Fields of a full resource-change record
const FULL_FIELDS: usize = 23;

/// Fields every resource-change record has
const LEGACY_FIELDS: usize = 11;

/// A status record as reported for a change, with its commit context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceChange {
    pub record: StatusRecord,
    /// `None` means the change's own revision
    pub peg_revision: Option<Revision>,
    pub comment: Option<String>,
    /// Repository node the change came from
    pub originator: Option<RepositoryResource>,
}

impl ResourceChange {
    pub fn new(record: StatusRecord) -> Self {
        Self {
            record,
            peg_revision: None,
            comment: None,
            originator: None,
        }
    }

    /// Peg revision as persisted
    pub fn effective_peg(&self) -> Revision {
        self.peg_revision
            .unwrap_or(Revision::Number(self.record.revision))
    }
}

/// Repository resource fields before the location is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryResourceRecord {
    pub is_folder: bool,
    pub location_id: String,
    /// Absolute URL, or a path relative to `root_kind`'s prefix
    pub url: String,
    pub root_kind: RootKind,
    pub selected_revision: Revision,
    pub peg_revision: Option<Revision>,
}

fn b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

fn unb64(field: &str) -> SvnCacheResult<Vec<u8>> {
    STANDARD
        .decode(field)
        .map_err(|e| SvnCacheError::malformed(format!("bad base64 field {:?}: {}", field, e)))
}

fn unb64_string(field: &str) -> SvnCacheResult<String> {
    String::from_utf8(unb64(field)?).map_err(|_| SvnCacheError::malformed("field is not UTF-8"))
}

fn nullable(value: Option<String>) -> String {
    value.unwrap_or_else(|| NULL.to_string())
}

fn revision_value(revision: &Revision) -> String {
    match revision {
        Revision::Number(n) | Revision::Date(n) => n.to_string(),
        _ => "0".to_string(),
    }
}

/// Revision kind of a persisted record
///
/// Old writers could store garbage here; such records are read as a number
/// revision when the stored value is positive and HEAD otherwise.
fn revision_kind(field: &str, value: i64) -> RevisionKind {
    match field.parse::<i32>().ok().and_then(RevisionKind::from_id) {
        Some(kind) => kind,
        None if value > 0 => RevisionKind::Number,
        None => RevisionKind::Head,
    }
}

fn to_revision(kind: RevisionKind, value: i64) -> Option<Revision> {
    match kind {
        RevisionKind::Number if value == INVALID_REVISION => None,
        RevisionKind::Number => Some(Revision::Number(value)),
        RevisionKind::Date => Some(Revision::Date(value)),
        other => Some(Revision::from_kind(other)),
    }
}

fn parse_split(bytes: &[u8]) -> SvnCacheResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| SvnCacheError::malformed("record is not UTF-8"))
}

fn conflict_version_fields(version: Option<&ConflictVersion>) -> [String; 4] {
    match version {
        None => [NULL.to_string(), NULL.to_string(), NULL.to_string(), NULL.to_string()],
        Some(v) => [
            v.node_kind.id().to_string(),
            nullable(v.path_in_repository.as_deref().map(|p| b64(p.as_bytes()))),
            v.peg_revision.to_string(),
            nullable(v.repository_url.as_deref().map(|u| b64(u.as_bytes()))),
        ],
    }
}

fn conflict_version(fields: &[&str]) -> SvnCacheResult<Option<ConflictVersion>> {
    if fields.iter().all(|f| *f == NULL) {
        return Ok(None);
    }
    let optional = |field: &str| -> SvnCacheResult<Option<String>> {
        if field == NULL {
            Ok(None)
        } else {
            unb64_string(field).map(Some)
        }
    };
    Ok(Some(ConflictVersion {
        node_kind: NodeKind::from_id(fields[0].parse().unwrap_or(0)),
        path_in_repository: optional(fields[1])?,
        peg_revision: fields[2].parse().unwrap_or(0),
        repository_url: optional(fields[3])?,
    }))
}

fn tree_conflict(data: &[&str]) -> SvnCacheResult<Option<TreeConflict>> {
    if data.len() < FULL_FIELDS || data[11] == NULL {
        return Ok(None);
    }
    let id = |field: &str| field.parse::<i32>().unwrap_or(-1);
    Ok(Some(TreeConflict {
        action: ConflictAction::from_id(id(data[11])),
        reason: ConflictReason::from_id(id(data[12])),
        operation: ConflictOperation::from_id(id(data[13])),
        left: conflict_version(&data[14..18])?,
        right: conflict_version(&data[18..22])?,
    }))
}

/// Serialise a change; `local_path` is the filesystem path of its resource
///
/// The author is written verbatim, as earlier versions did. An author
/// containing `;` shifts every later field, and an author named `null` reads
/// back as no author; neither round-trips.
pub fn encode_resource_change(change: &ResourceChange, local_path: &Path, originator: Option<&[u8]>) -> Vec<u8> {
    let record = &change.record;
    let peg = change.effective_peg();
    let mut fields = vec![
        record.resource.is_container().to_string(),
        b64(local_path.to_string_lossy().as_bytes()),
        record.revision.to_string(),
        record.text_status.code().to_string(),
        nullable(record.author.clone()),
        if record.last_commit_date == 0 {
            NULL.to_string()
        } else {
            record.last_commit_date.to_string()
        },
        peg.kind().id().to_string(),
        match peg {
            Revision::Number(n) | Revision::Date(n) => n.to_string(),
            other => other.kind().id().to_string(),
        },
        nullable(originator.map(b64)),
        nullable(change.comment.as_deref().map(|c| b64(c.as_bytes()))),
        record.change_mask.bits().to_string(),
    ];
    match &record.tree_conflict {
        Some(conflict) => {
            fields.push(conflict.action.id().to_string());
            fields.push(conflict.reason.id().to_string());
            fields.push(conflict.operation.id().to_string());
        }
        None => fields.extend([NULL, NULL, NULL].map(String::from)),
    }
    let conflict = record.tree_conflict.as_ref();
    fields.extend(conflict_version_fields(conflict.and_then(|c| c.left.as_ref())));
    fields.extend(conflict_version_fields(conflict.and_then(|c| c.right.as_ref())));
    fields.push(record.prop_status.code().to_string());
    fields.join(";").into_bytes()
}

/// Parse a change record
///
/// `resolve` maps the stored filesystem path (and whether it names a folder)
/// to a resource. The originator, if stored, is returned as raw bytes for
/// the caller to decode against its known locations.
pub fn decode_resource_change(
    bytes: &[u8],
    resolve: impl FnOnce(&Path, bool) -> Option<Resource>,
) -> SvnCacheResult<(ResourceChange, Option<Vec<u8>>)> {
    let text = parse_split(bytes)?;
    let data: Vec<&str> = text.split(';').collect();
    if data.len() < LEGACY_FIELDS {
        return Err(SvnCacheError::malformed(format!(
            "resource change has {} fields, expected at least {}",
            data.len(),
            LEGACY_FIELDS
        )));
    }

    let is_folder = data[0] == "true";
    let path = PathBuf::from(unb64_string(data[1])?);
    let revision = data[2].parse().unwrap_or(INVALID_REVISION);
    let mut text_status: TextStatus = data[3].parse()?;
    let author = (data[4] != NULL).then(|| data[4].to_string());
    let last_commit_date = if data[5] == NULL {
        0
    } else {
        data[5].parse().unwrap_or(0)
    };

    let peg_value = data[7].parse::<i64>().ok();
    let peg_revision = match revision_kind(data[6], revision) {
        RevisionKind::Number => {
            let peg = peg_value.unwrap_or(revision);
            (peg != revision && revision != INVALID_REVISION).then_some(Revision::Number(peg))
        }
        RevisionKind::Date => Some(Revision::Date(peg_value.unwrap_or(0))),
        other => Some(Revision::from_kind(other)),
    };

    let originator = if data[8] == NULL {
        None
    } else {
        Some(unb64(data[8])?)
    };
    let comment = if data[9] == NULL {
        None
    } else {
        Some(unb64_string(data[9])?)
    };
    let change_mask = data[10]
        .parse::<u32>()
        .map(ChangeMask::from_bits_truncate)
        .unwrap_or_default();

    let prop_status = if data.len() >= FULL_FIELDS {
        data[22].parse()?
    } else if change_mask.contains(ChangeMask::PROP_MODIFIED) {
        if !change_mask.contains(ChangeMask::TEXT_MODIFIED) {
            text_status = TextStatus::Normal;
        }
        TextStatus::Modified
    } else {
        TextStatus::Normal
    };

    let tree_conflict = tree_conflict(&data)?;
    let resource = resolve(&path, is_folder)
        .ok_or_else(|| SvnCacheError::malformed(format!("no resource at {}", path.display())))?;

    let record = StatusRecord {
        resource,
        text_status,
        prop_status,
        change_mask,
        revision,
        base_revision: revision,
        author,
        last_commit_date,
        tree_conflict,
    };
    Ok((
        ResourceChange {
            record,
            peg_revision,
            comment,
            originator: None,
        },
        originator,
    ))
}

/// Serialise a repository resource
pub fn encode_repository_resource(resource: &RepositoryResource) -> Vec<u8> {
    let selected = resource.selected_revision;
    let peg = resource.peg_revision;
    [
        b64(resource.is_container.to_string().as_bytes()),
        resource.location.id.clone(),
        b64(resource.url.as_bytes()),
        selected.kind().id().to_string(),
        revision_value(&selected),
        RootKind::RepositoryRoot.id().to_string(),
        peg.kind().id().to_string(),
        revision_value(&peg),
    ]
    .join(";")
    .into_bytes()
}

/// Parse a repository resource record
///
/// Records with a base64 folder flag carry a base64 URL. Older writers stored
/// both in plain text and may have left the URL relative to the root named
/// by field 5. Unparseable revision values fall back like malformed kinds.
pub fn decode_repository_resource(bytes: &[u8]) -> SvnCacheResult<RepositoryResourceRecord> {
    let text = parse_split(bytes)?;
    let data: Vec<&str> = text.split(';').collect();
    if data.len() < 5 {
        return Err(SvnCacheError::malformed(format!(
            "repository resource has {} fields, expected at least 5",
            data.len()
        )));
    }

    let (is_folder, encoded) = match data[0] {
        "true" => (true, false),
        "false" => (false, false),
        flag => (unb64_string(flag)? == "true", true),
    };
    let url = if encoded {
        unb64_string(data[2])?
    } else {
        data[2].to_string()
    };
    let root_kind = data
        .get(5)
        .and_then(|f| f.parse::<i32>().ok())
        .and_then(RootKind::from_id)
        .unwrap_or(RootKind::RepositoryRoot);

    let selected_value: i64 = data[4].parse().unwrap_or(INVALID_REVISION);
    let selected_revision =
        to_revision(revision_kind(data[3], selected_value), selected_value).unwrap_or(Revision::Head);

    let peg_revision = if data.len() > 7 {
        let peg_value: i64 = data[7].parse().unwrap_or(INVALID_REVISION);
        to_revision(revision_kind(data[6], peg_value), peg_value)
    } else {
        None
    };

    Ok(RepositoryResourceRecord {
        is_folder,
        location_id: data[1].to_string(),
        url,
        root_kind,
        selected_revision,
        peg_revision,
    })
}
