//! Switched subtree URLs

use std::collections::BTreeMap;

use crate::repository::{append_url, is_url_prefix};
use crate::resource::Resource;

/// Resource path to the repository URL its subtree is switched to
#[derive(Debug, Default)]
pub struct SwitchedIndex {
    urls: BTreeMap<String, String>,
}

impl SwitchedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource: &Resource, url: impl Into<String>) {
        self.urls.insert(resource.path().to_string(), url.into());
    }

    pub fn remove(&mut self, resource: &Resource) {
        self.urls.remove(resource.path());
    }

    pub fn get(&self, resource: &Resource) -> Option<&str> {
        self.urls.get(resource.path()).map(String::as_str)
    }

    /// URL of `resource` derived from its nearest switched ancestor
    ///
    /// An exact entry wins; otherwise the longest switched ancestor path
    /// is extended by the relative suffix.
    pub fn resolve(&self, resource: &Resource) -> Option<String> {
        if let Some(url) = self.get(resource) {
            return Some(url.to_string());
        }
        let mut current = resource.parent();
        while let Some(ancestor) = current {
            if let Some(url) = self.urls.get(ancestor.path()) {
                let relative = resource.relative_to(&ancestor)?;
                return Some(append_url(url, &relative));
            }
            current = ancestor.parent();
        }
        None
    }

    /// Workspace path of the node switched to `url`, if any switched
    /// subtree covers it
    pub fn local_path_for_url(&self, url: &str) -> Option<String> {
        self.urls
            .iter()
            .filter(|(_, switched)| is_url_prefix(switched, url))
            .max_by_key(|(_, switched)| switched.len())
            .map(|(path, switched)| {
                let suffix = url[switched.trim_end_matches('/').len().min(url.len())..]
                    .trim_matches('/');
                if suffix.is_empty() {
                    path.clone()
                } else {
                    format!("{}/{}", path, suffix)
                }
            })
    }

    /// Drop every entry inside a project
    pub fn forget_project(&mut self, project: &Resource) {
        self.urls.retain(|path, _| {
            path != project.path() && !path.starts_with(&format!("{}/", project.path()))
        });
    }

    pub fn clear(&mut self) {
        self.urls.clear();
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
