//! Status records grouped by parent container

use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::resource::{Depth, Resource};
use crate::status::StatusRecord;

/// Arena of records plus a children index keyed by parent
///
/// A parent with a bucket has been reconciled. An empty bucket means the
/// container is known to have no children; a missing bucket means it was
/// never loaded.
#[derive(Debug, Default)]
pub struct HierarchicalCache {
    records: HashMap<Resource, StatusRecord>,
    children: HashMap<Resource, HashSet<Resource>>,
}

impl HierarchicalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record of a resource, if its parent bucket holds it
    pub fn get(&self, resource: &Resource) -> Option<&StatusRecord> {
        let parent = resource.parent()?;
        let bucket = self.children.get(&parent)?;
        if !bucket.contains(resource) {
            return None;
        }
        self.records.get(resource)
    }

    /// Insert or overwrite a record in its parent's bucket
    pub fn put(&mut self, record: StatusRecord) {
        let Some(parent) = record.resource.parent() else {
            return;
        };
        trace!("cache put {} = {}", record.resource, record.text_status);
        self.children
            .entry(parent)
            .or_default()
            .insert(record.resource.clone());
        self.records.insert(record.resource.clone(), record);
    }

    /// Closest ancestor with a cached record
    pub fn nearest_cached_ancestor(&self, resource: &Resource) -> Option<&StatusRecord> {
        let mut current = resource.parent();
        while let Some(ancestor) = current {
            if let Some(record) = self.get(&ancestor) {
                return Some(record);
            }
            current = ancestor.parent();
        }
        None
    }

    pub fn has_bucket(&self, container: &Resource) -> bool {
        self.children.contains_key(container)
    }

    /// Mark a container as loaded even when it has no children
    pub fn ensure_bucket(&mut self, container: &Resource) {
        self.children.entry(container.clone()).or_default();
    }

    /// Drop the bucket of a container and the records it holds
    ///
    /// Buckets of the removed children are kept. Returns the removed children.
    pub fn remove_bucket(&mut self, container: &Resource) -> Vec<Resource> {
        let Some(bucket) = self.children.remove(container) else {
            return Vec::new();
        };
        for child in &bucket {
            self.records.remove(child);
        }
        bucket.into_iter().collect()
    }

    /// Records cached directly below a container; `None` when never loaded
    pub fn children(&self, container: &Resource) -> Option<Vec<&StatusRecord>> {
        let bucket = self.children.get(container)?;
        Some(bucket.iter().filter_map(|r| self.records.get(r)).collect())
    }

    /// Remove the bucket of `resource`, descending into child buckets
    ///
    /// `Depth::One` drops the direct child buckets too; `Depth::Infinite`
    /// drops the whole subtree. Returns every container whose bucket was
    /// visited, so callers can clean their own indices.
    pub fn invalidate(&mut self, resource: &Resource, depth: Depth) -> Vec<Resource> {
        let mut visited = Vec::new();
        self.invalidate_into(resource, depth, &mut visited);
        visited
    }

    fn invalidate_into(&mut self, resource: &Resource, depth: Depth, visited: &mut Vec<Resource>) {
        visited.push(resource.clone());
        if !resource.is_container() {
            return;
        }
        if depth != Depth::Zero {
            let next = match depth {
                Depth::One => Depth::Zero,
                other => other,
            };
            let children: Vec<Resource> = self
                .children
                .get(resource)
                .map(|b| b.iter().cloned().collect())
                .unwrap_or_default();
            for child in children {
                self.invalidate_into(&child, next, visited);
            }
        }
        self.remove_bucket(resource);
    }

    /// Drop every record and bucket of a project, including its own record
    pub fn forget_project(&mut self, project: &Resource) {
        self.records
            .retain(|r, _| r != project && !project.is_ancestor_of(r));
        self.children
            .retain(|r, _| r != project && !project.is_ancestor_of(r));
        if let Some(bucket) = self.children.get_mut(&Resource::root()) {
            bucket.remove(project);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
