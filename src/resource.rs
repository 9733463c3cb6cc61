//! Host resource model
//!
//! Resources are identified by their workspace path (`/project/dir/file`)
//! plus their kind, so a file and a folder at the same path are different
//! resources. The host side (existence, filesystem locations, links) is
//! reached through the [`Workspace`] trait.

use crate::repository::RepositoryResource;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Kind of a workspace resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    File,
    Folder,
    Project,
    Root,
}

impl ResourceKind {
    /// Whether resources of this kind can have children
    pub fn is_container(&self) -> bool {
        !matches!(self, Self::File)
    }
}

/// Traversal depth for lookups and refreshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// The resource itself
    Zero,
    /// The resource and its immediate children
    One,
    /// The whole subtree
    Infinite,
}

/// Identity of a file, folder, project or the workspace root
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Resource {
    path: Arc<str>,
    kind: ResourceKind,
}

impl Resource {
    /// The workspace root
    pub fn root() -> Self {
        Self {
            path: Arc::from("/"),
            kind: ResourceKind::Root,
        }
    }

    /// A project directly under the workspace root
    pub fn project(name: &str) -> Self {
        Self {
            path: Arc::from(format!("/{}", name.trim_matches('/'))),
            kind: ResourceKind::Project,
        }
    }

    /// A folder at the given workspace path
    pub fn folder(path: &str) -> Self {
        Self::at(path, ResourceKind::Folder)
    }

    /// A file at the given workspace path
    pub fn file(path: &str) -> Self {
        Self::at(path, ResourceKind::File)
    }

    /// A resource of the given kind, normalising the path
    ///
    /// Single-segment container paths always denote projects.
    pub fn at(path: &str, kind: ResourceKind) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Self::root();
        }
        let kind = match (segments.len(), kind) {
            (1, k) if k.is_container() => ResourceKind::Project,
            (_, ResourceKind::Project | ResourceKind::Root) => ResourceKind::Folder,
            (_, k) => k,
        };
        Self {
            path: Arc::from(format!("/{}", segments.join("/"))),
            kind,
        }
    }

    /// Workspace path, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_container(&self) -> bool {
        self.kind.is_container()
    }

    /// Last path segment (empty for the root)
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or("")
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|s| !s.is_empty())
    }

    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// Parent container; `None` only for the root
    pub fn parent(&self) -> Option<Resource> {
        match self.kind {
            ResourceKind::Root => None,
            ResourceKind::Project => Some(Self::root()),
            _ => {
                let idx = self.path.rfind('/').unwrap_or(0);
                Some(Self::at(&self.path[..idx], ResourceKind::Folder))
            }
        }
    }

    /// Owning project; `None` for the root
    pub fn project_of(&self) -> Option<Resource> {
        self.segments().next().map(Self::project)
    }

    /// Path relative to the owning project (empty for the project itself)
    pub fn project_relative_path(&self) -> String {
        self.segments().skip(1).collect::<Vec<_>>().join("/")
    }

    /// Whether `self` is a strict ancestor of `other`
    pub fn is_ancestor_of(&self, other: &Resource) -> bool {
        if self.kind == ResourceKind::Root {
            return other.kind != ResourceKind::Root;
        }
        other.path.len() > self.path.len()
            && other.path.starts_with(&*self.path)
            && other.path.as_bytes()[self.path.len()] == b'/'
    }

    /// Path of `self` below `ancestor`, without a leading slash
    pub fn relative_to(&self, ancestor: &Resource) -> Option<String> {
        if self == ancestor || self.path == ancestor.path {
            return Some(String::new());
        }
        if !ancestor.is_ancestor_of(self) {
            return None;
        }
        Some(self.segments().skip(ancestor.segment_count()).collect::<Vec<_>>().join("/"))
    }

    /// A descendant folder of this container
    pub fn folder_at(&self, relative: &str) -> Resource {
        if relative.trim_matches('/').is_empty() {
            return self.clone();
        }
        Self::at(&format!("{}/{}", self.path, relative), ResourceKind::Folder)
    }

    /// A descendant file of this container
    pub fn file_at(&self, relative: &str) -> Resource {
        Self::at(&format!("{}/{}", self.path, relative), ResourceKind::File)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.path)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Remove every resource that has an ancestor in the same set
pub fn shrink_child_nodes(resources: &[Resource]) -> Vec<Resource> {
    let mut roots: Vec<Resource> = Vec::new();
    for resource in resources {
        if roots.contains(resource) {
            continue;
        }
        if resources.iter().any(|other| other.is_ancestor_of(resource)) {
            continue;
        }
        roots.push(resource.clone());
    }
    roots
}

/// How a project is attached to its repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectBinding {
    /// Working copy root on disk
    pub location: PathBuf,
    /// Repository resource the project is checked out from
    pub repository: RepositoryResource,
}

/// Host resource model consumed by the cache
///
/// Implementations must be cheap to call: the reconciler asks these
/// questions once per status entry.
pub trait Workspace: Send + Sync {
    /// Repository binding of a project; `None` when the project is not shared
    fn project_binding(&self, project: &Resource) -> Option<ProjectBinding>;

    /// Whether the project is open and its content can be read
    fn is_accessible(&self, project: &Resource) -> bool;

    /// Whether the resource exists on disk
    fn exists(&self, resource: &Resource) -> bool;

    /// Filesystem location of a resource
    fn location(&self, resource: &Resource) -> Option<PathBuf>;

    /// Existing member of a project at a project-relative path, with its real kind
    fn find_member(&self, project: &Resource, relative: &str) -> Option<Resource>;

    /// Existing children of a container
    fn members(&self, container: &Resource) -> Vec<Resource>;

    /// Resource that owns a filesystem location
    fn resource_for_location(&self, location: &std::path::Path, is_folder: bool)
        -> Option<Resource>;

    /// Whether the resource is a filesystem symlink
    fn is_symlink(&self, resource: &Resource) -> bool;

    /// Whether the resource is linked into the workspace from elsewhere
    fn is_linked(&self, resource: &Resource) -> bool;

    /// Whether the resource lives inside working copy metadata
    fn is_svn_internals(&self, resource: &Resource) -> bool;

    /// Whether the resource matches ignore rules
    fn is_ignored(&self, resource: &Resource) -> bool;

    /// Whether the resource is a build output folder
    fn is_build_output(&self, resource: &Resource) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_container_is_project() {
        let r = Resource::folder("/proj/");
        assert_eq!(r.kind(), ResourceKind::Project);
        assert_eq!(r.path(), "/proj");
    }

    #[test]
    fn parent_chain_reaches_root() {
        let file = Resource::file("/proj/a/b.txt");
        let dir = file.parent().unwrap();
        assert_eq!(dir, Resource::folder("/proj/a"));
        let project = dir.parent().unwrap();
        assert_eq!(project, Resource::project("proj"));
        assert_eq!(project.parent(), Some(Resource::root()));
        assert_eq!(Resource::root().parent(), None);
    }

    #[test]
    fn file_and_folder_at_same_path_differ() {
        assert_ne!(Resource::file("/p/x"), Resource::folder("/p/x"));
    }

    #[test]
    fn ancestor_requires_segment_boundary() {
        let a = Resource::folder("/p/a");
        assert!(a.is_ancestor_of(&Resource::file("/p/a/b")));
        assert!(!a.is_ancestor_of(&Resource::file("/p/ab")));
        assert!(!a.is_ancestor_of(&a));
        assert!(Resource::root().is_ancestor_of(&a));
    }

    #[test]
    fn relative_paths() {
        let p = Resource::project("p");
        let f = Resource::file("/p/a/b.txt");
        assert_eq!(f.relative_to(&p).as_deref(), Some("a/b.txt"));
        assert_eq!(f.project_relative_path(), "a/b.txt");
        assert_eq!(p.folder_at("a"), Resource::folder("/p/a"));
        assert_eq!(p.folder_at(""), p);
        assert_eq!(f.project_of(), Some(p));
    }

    #[test]
    fn shrink_removes_descendants() {
        let input = vec![
            Resource::file("/p/a/b.txt"),
            Resource::folder("/p/a"),
            Resource::folder("/q/c"),
            Resource::folder("/p/a"),
        ];
        let shrunk = shrink_child_nodes(&input);
        assert_eq!(shrunk, vec![Resource::folder("/p/a"), Resource::folder("/q/c")]);
    }
}
