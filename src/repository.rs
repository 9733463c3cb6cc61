//! Repository-side identities
//!
//! Revisions, repository locations and the repository resources the cache
//! derives for working-copy resources.

use std::fmt;

/// Revision number meaning "invalid or unknown"
pub const INVALID_REVISION: i64 = -1;

/// Ways a revision can be designated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevisionKind {
    Start,
    Number,
    Date,
    Committed,
    Previous,
    Base,
    Working,
    Head,
}

impl RevisionKind {
    /// Persisted numeric id
    pub fn id(&self) -> i32 {
        match self {
            Self::Start => 0,
            Self::Number => 1,
            Self::Date => 2,
            Self::Committed => 3,
            Self::Previous => 4,
            Self::Base => 5,
            Self::Working => 6,
            Self::Head => 7,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Start),
            1 => Some(Self::Number),
            2 => Some(Self::Date),
            3 => Some(Self::Committed),
            4 => Some(Self::Previous),
            5 => Some(Self::Base),
            6 => Some(Self::Working),
            7 => Some(Self::Head),
            _ => None,
        }
    }
}

/// A revision designation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    Number(i64),
    /// Epoch milliseconds
    Date(i64),
    Start,
    Committed,
    Previous,
    Base,
    Working,
    Head,
}

impl Revision {
    pub fn kind(&self) -> RevisionKind {
        match self {
            Self::Number(_) => RevisionKind::Number,
            Self::Date(_) => RevisionKind::Date,
            Self::Start => RevisionKind::Start,
            Self::Committed => RevisionKind::Committed,
            Self::Previous => RevisionKind::Previous,
            Self::Base => RevisionKind::Base,
            Self::Working => RevisionKind::Working,
            Self::Head => RevisionKind::Head,
        }
    }

    /// Revision for a kind that carries no value
    ///
    /// Number and date kinds fall back to HEAD since their value is missing.
    pub fn from_kind(kind: RevisionKind) -> Self {
        match kind {
            RevisionKind::Start => Self::Start,
            RevisionKind::Committed => Self::Committed,
            RevisionKind::Previous => Self::Previous,
            RevisionKind::Base => Self::Base,
            RevisionKind::Working => Self::Working,
            RevisionKind::Number | RevisionKind::Date | RevisionKind::Head => Self::Head,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Date(d) => write!(f, "{{{}}}", d),
            Self::Start => f.write_str("START"),
            Self::Committed => f.write_str("COMMITTED"),
            Self::Previous => f.write_str("PREV"),
            Self::Base => f.write_str("BASE"),
            Self::Working => f.write_str("WORKING"),
            Self::Head => f.write_str("HEAD"),
        }
    }
}

/// Base that a persisted scheme-less URL was written relative to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootKind {
    RepositoryRoot,
    LocationRoot,
    Trunk,
    Branches,
    Tags,
}

impl RootKind {
    pub fn id(&self) -> i32 {
        match self {
            Self::RepositoryRoot => 0,
            Self::LocationRoot => 1,
            Self::Trunk => 2,
            Self::Branches => 3,
            Self::Tags => 4,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::RepositoryRoot),
            1 => Some(Self::LocationRoot),
            2 => Some(Self::Trunk),
            3 => Some(Self::Branches),
            4 => Some(Self::Tags),
            _ => None,
        }
    }

    /// URL a relative path of this kind hangs off
    ///
    /// Locations carry no trunk/branches/tags layout, so those kinds resolve
    /// against the location URL.
    pub fn prefix<'l>(&self, location: &'l RepositoryLocation) -> &'l str {
        match self {
            Self::RepositoryRoot if !location.root_url.is_empty() => &location.root_url,
            _ => &location.url,
        }
    }
}

/// A repository location as configured by the user, or a wrapper created
/// for URLs that live outside the configured repository root
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryLocation {
    /// Stable identifier; wrappers carry their base location's id
    pub id: String,
    /// Location URL
    pub url: String,
    /// Repository root URL
    pub root_url: String,
    /// Whether this location wraps a foreign root (externals, relocated nodes)
    pub wrapped: bool,
}

impl RepositoryLocation {
    pub fn new(id: impl Into<String>, url: impl Into<String>, root_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            root_url: root_url.into(),
            wrapped: false,
        }
    }

    /// Wrap `self` so that its URL and root become `url`
    pub fn wrap(&self, url: &str) -> Self {
        Self {
            id: self.id.clone(),
            url: url.to_string(),
            root_url: url.to_string(),
            wrapped: true,
        }
    }

    /// Whether `url` lives under this location's repository root
    pub fn contains_url(&self, url: &str) -> bool {
        let root = if self.root_url.is_empty() {
            &self.url
        } else {
            &self.root_url
        };
        !root.is_empty() && is_url_prefix(root, url)
    }

    pub fn as_container(&self, url: impl Into<String>) -> RepositoryResource {
        RepositoryResource::new(self.clone(), url, true)
    }

    pub fn as_file(&self, url: impl Into<String>) -> RepositoryResource {
        RepositoryResource::new(self.clone(), url, false)
    }
}

/// A node in a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryResource {
    pub location: RepositoryLocation,
    pub url: String,
    pub is_container: bool,
    pub peg_revision: Revision,
    pub selected_revision: Revision,
}

impl RepositoryResource {
    pub fn new(location: RepositoryLocation, url: impl Into<String>, is_container: bool) -> Self {
        Self {
            location,
            url: url.into(),
            is_container,
            peg_revision: Revision::Head,
            selected_revision: Revision::Head,
        }
    }

    /// Last URL segment
    pub fn name(&self) -> &str {
        self.url.trim_end_matches('/').rsplit('/').next().unwrap_or("")
    }
}

/// Whether `prefix` is a segment-wise prefix of `url`
///
/// Trailing slashes are ignored and the comparison stops at segment
/// boundaries, so `http://h/repo` is not a prefix of `http://h/repository`.
pub fn is_url_prefix(prefix: &str, url: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    let url = url.trim_end_matches('/');
    url == prefix || (url.starts_with(prefix) && url.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Join a relative path onto a URL
pub fn append_url(base: &str, relative: &str) -> String {
    let relative = relative.trim_matches('/');
    if relative.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), relative)
    }
}

/// Decode `%XX` escapes in a URL reported by the backend
///
/// Malformed escapes are kept verbatim.
pub fn decode_url(url: &str) -> String {
    let bytes = url.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
