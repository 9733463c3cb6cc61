//! Filesystem-backed workspace
//!
//! Projects are directories registered by name. Resource existence, kinds
//! and children come straight from disk; ignore rules are glob patterns
//! matched against the resource name and its project-relative path.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::config::WorkspaceConfig;
use crate::error::{SvnCacheError, SvnCacheResult};
use crate::repository::RepositoryResource;
use crate::resource::{ProjectBinding, Resource, ResourceKind, Workspace};

#[derive(Debug, Clone)]
struct ProjectEntry {
    location: PathBuf,
    repository: Option<RepositoryResource>,
    open: bool,
}

/// Workspace over plain directories
pub struct FsWorkspace {
    projects: RwLock<HashMap<String, ProjectEntry>>,
    links: RwLock<HashMap<Resource, PathBuf>>,
    metadata_dir: String,
    ignore: GlobSet,
    output_folders: Vec<String>,
}

impl FsWorkspace {
    pub fn new(config: &WorkspaceConfig) -> SvnCacheResult<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in &config.ignore {
            let glob = Glob::new(pattern).map_err(|e| SvnCacheError::IgnorePattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| SvnCacheError::IgnorePattern {
            pattern: config.ignore.join(", "),
            reason: e.to_string(),
        })?;

        Ok(Self {
            projects: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            metadata_dir: config.metadata_dir.clone(),
            ignore,
            output_folders: config
                .output_folders
                .iter()
                .map(|f| f.trim_matches('/').to_string())
                .collect(),
        })
    }

    /// Register a project rooted at `location`
    ///
    /// Projects without a repository are known to the workspace but not
    /// shared, so the cache reports them as invalid.
    pub fn add_project(
        &self,
        name: &str,
        location: impl Into<PathBuf>,
        repository: Option<RepositoryResource>,
    ) -> Resource {
        let location = location.into();
        debug!("Adding project {} at {}", name, location.display());
        if let Ok(mut projects) = self.projects.write() {
            projects.insert(
                name.to_string(),
                ProjectEntry {
                    location,
                    repository,
                    open: true,
                },
            );
        }
        Resource::project(name)
    }

    pub fn remove_project(&self, project: &Resource) {
        if let Ok(mut projects) = self.projects.write() {
            projects.remove(project.name());
        }
        if let Ok(mut links) = self.links.write() {
            links.retain(|r, _| r != project && !project.is_ancestor_of(r));
        }
    }

    /// Open or close a project; closed projects are inaccessible
    pub fn set_open(&self, project: &Resource, open: bool) {
        if let Ok(mut projects) = self.projects.write() {
            if let Some(entry) = projects.get_mut(project.name()) {
                entry.open = open;
            }
        }
    }

    /// Map a resource onto a directory outside its project
    pub fn link(&self, resource: &Resource, target: impl Into<PathBuf>) {
        if let Ok(mut links) = self.links.write() {
            links.insert(resource.clone(), target.into());
        }
    }

    pub fn metadata_dir(&self) -> &str {
        &self.metadata_dir
    }

    fn project_entry(&self, project: &Resource) -> Option<ProjectEntry> {
        let projects = self.projects.read().ok()?;
        projects.get(project.name()).cloned()
    }

    fn linked_ancestor(&self, resource: &Resource) -> Option<(Resource, PathBuf)> {
        let links = self.links.read().ok()?;
        let mut current = Some(resource.clone());
        while let Some(r) = current {
            if let Some(target) = links.get(&r) {
                return Some((r, target.clone()));
            }
            current = r.parent();
        }
        None
    }

    fn kind_matches(kind: ResourceKind, path: &Path) -> bool {
        match fs::metadata(path) {
            Ok(meta) if kind.is_container() => meta.is_dir(),
            Ok(meta) => !meta.is_dir(),
            Err(_) => false,
        }
    }
}

impl Workspace for FsWorkspace {
    fn project_binding(&self, project: &Resource) -> Option<ProjectBinding> {
        let entry = self.project_entry(project)?;
        Some(ProjectBinding {
            location: entry.location,
            repository: entry.repository?,
        })
    }

    fn is_accessible(&self, project: &Resource) -> bool {
        self.project_entry(project)
            .map(|e| e.open && e.location.is_dir())
            .unwrap_or(false)
    }

    fn exists(&self, resource: &Resource) -> bool {
        match resource.kind() {
            ResourceKind::Root => true,
            kind => self
                .location(resource)
                .map(|path| Self::kind_matches(kind, &path))
                .unwrap_or(false),
        }
    }

    fn location(&self, resource: &Resource) -> Option<PathBuf> {
        if let Some((linked, target)) = self.linked_ancestor(resource) {
            let relative = resource.relative_to(&linked)?;
            return Some(if relative.is_empty() {
                target
            } else {
                target.join(relative)
            });
        }
        let project = resource.project_of()?;
        let entry = self.project_entry(&project)?;
        let relative = resource.project_relative_path();
        Some(if relative.is_empty() {
            entry.location
        } else {
            entry.location.join(relative)
        })
    }

    fn find_member(&self, project: &Resource, relative: &str) -> Option<Resource> {
        let relative = relative.trim_matches('/');
        if relative.is_empty() {
            return self.project_entry(project).map(|_| project.clone());
        }
        let folder = project.folder_at(relative);
        let path = self.location(&folder)?;
        let meta = fs::metadata(&path).ok()?;
        Some(if meta.is_dir() {
            folder
        } else {
            project.file_at(relative)
        })
    }

    fn members(&self, container: &Resource) -> Vec<Resource> {
        if container.kind() == ResourceKind::Root {
            let Ok(projects) = self.projects.read() else {
                return Vec::new();
            };
            let mut members: Vec<Resource> = projects.keys().map(|n| Resource::project(n)).collect();
            members.sort();
            return members;
        }
        let Some(path) = self.location(container) else {
            return Vec::new();
        };
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) => {
                if path.exists() {
                    warn!("Failed to list {}: {}", path.display(), e);
                }
                return Vec::new();
            }
        };
        let mut members: Vec<Resource> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != self.metadata_dir.as_str())
            .map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                let is_dir = fs::metadata(e.path()).map(|m| m.is_dir()).unwrap_or(false);
                if is_dir {
                    container.folder_at(&name)
                } else {
                    container.file_at(&name)
                }
            })
            .collect();
        members.sort();
        members
    }

    fn resource_for_location(&self, location: &Path, is_folder: bool) -> Option<Resource> {
        let projects = self.projects.read().ok()?;
        let (name, entry) = projects
            .iter()
            .filter(|(_, e)| location.starts_with(&e.location))
            .max_by_key(|(_, e)| e.location.components().count())?;
        let project = Resource::project(name);
        let relative = location.strip_prefix(&entry.location).ok()?;
        let relative = relative.to_string_lossy().replace('\\', "/");
        if relative.is_empty() {
            return Some(project);
        }
        Some(if is_folder {
            project.folder_at(&relative)
        } else {
            project.file_at(&relative)
        })
    }

    fn is_symlink(&self, resource: &Resource) -> bool {
        self.location(resource)
            .and_then(|p| fs::symlink_metadata(p).ok())
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false)
    }

    fn is_linked(&self, resource: &Resource) -> bool {
        self.linked_ancestor(resource).is_some()
    }

    fn is_svn_internals(&self, resource: &Resource) -> bool {
        resource.segments().any(|s| s == self.metadata_dir)
    }

    fn is_ignored(&self, resource: &Resource) -> bool {
        self.ignore.is_match(resource.name())
            || self.ignore.is_match(resource.project_relative_path())
    }

    fn is_build_output(&self, resource: &Resource) -> bool {
        if !resource.is_container() {
            return false;
        }
        let relative = resource.project_relative_path();
        self.output_folders.iter().any(|f| *f == relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RepositoryLocation;
    use tempfile::TempDir;

    fn workspace() -> FsWorkspace {
        FsWorkspace::new(&WorkspaceConfig::default()).unwrap()
    }

    fn repo() -> RepositoryResource {
        RepositoryLocation::new("main", "http://h/r", "http://h/r").as_container("http://h/r/trunk")
    }

    #[test]
    fn rejects_bad_glob() {
        let config = WorkspaceConfig {
            ignore: vec!["[".to_string()],
            ..WorkspaceConfig::default()
        };
        assert!(matches!(
            FsWorkspace::new(&config),
            Err(SvnCacheError::IgnorePattern { .. })
        ));
    }

    #[test]
    fn resolves_members_from_disk() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("src")).unwrap();
        fs::create_dir_all(temp.path().join(".svn")).unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();

        let ws = workspace();
        let project = ws.add_project("p", temp.path(), Some(repo()));
        assert!(ws.is_accessible(&project));
        assert_eq!(
            ws.members(&project),
            vec![Resource::file("/p/a.txt"), Resource::folder("/p/src")]
        );
        assert_eq!(ws.find_member(&project, "src"), Some(Resource::folder("/p/src")));
        assert_eq!(ws.find_member(&project, "a.txt"), Some(Resource::file("/p/a.txt")));
        assert_eq!(ws.find_member(&project, "missing"), None);
        assert!(ws.exists(&Resource::file("/p/a.txt")));
        assert!(!ws.exists(&Resource::folder("/p/a.txt")));
    }

    #[test]
    fn unshared_project_has_no_binding() {
        let temp = TempDir::new().unwrap();
        let ws = workspace();
        let project = ws.add_project("p", temp.path(), None);
        assert!(ws.project_binding(&project).is_none());
        ws.set_open(&project, false);
        assert!(!ws.is_accessible(&project));
    }

    #[test]
    fn location_round_trips() {
        let temp = TempDir::new().unwrap();
        let ws = workspace();
        ws.add_project("p", temp.path(), Some(repo()));
        let loc = temp.path().join("x").join("y");
        let res = ws.resource_for_location(&loc, true).unwrap();
        assert_eq!(res, Resource::folder("/p/x/y"));
        assert_eq!(ws.location(&res), Some(loc));
    }

    #[test]
    fn links_redirect_locations() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let ws = workspace();
        ws.add_project("p", temp.path(), Some(repo()));
        let linked = Resource::folder("/p/lib");
        ws.link(&linked, outside.path());
        assert!(ws.is_linked(&Resource::file("/p/lib/a.c")));
        assert_eq!(
            ws.location(&Resource::file("/p/lib/a.c")),
            Some(outside.path().join("a.c"))
        );
        assert!(!ws.is_linked(&Resource::folder("/p/src")));
    }

    #[test]
    fn predicates() {
        let ws = workspace();
        assert!(ws.is_svn_internals(&Resource::file("/p/.svn/wc.db")));
        assert!(ws.is_ignored(&Resource::file("/p/src/main.o")));
        assert!(!ws.is_ignored(&Resource::file("/p/src/main.c")));
        assert!(ws.is_build_output(&Resource::folder("/p/target")));
        assert!(!ws.is_build_output(&Resource::file("/p/target")));
    }
}
