//! Wrapped repository locations for URLs outside a location's root

use std::collections::HashMap;

use tracing::debug;

use crate::repository::{is_url_prefix, RepositoryLocation};

/// Base location id to the wrappers created for it
#[derive(Debug, Default)]
pub struct ExternalsIndex {
    wrappers: HashMap<String, Vec<RepositoryLocation>>,
}

impl ExternalsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Location to use for `url`
    ///
    /// URLs inside the base root use the base location itself. Foreign URLs
    /// reuse a wrapper whose URL is a prefix of (or prefixed by) `url`, or get
    /// a new wrapper rooted at `url` (its parent when `url` names a file).
    pub fn wrap_if_required(
        &mut self,
        location: &RepositoryLocation,
        url: &str,
        is_file: bool,
    ) -> RepositoryLocation {
        if location.contains_url(url) {
            return location.clone();
        }
        let wrappers = self.wrappers.entry(location.id.clone()).or_default();
        if let Some(found) = wrappers
            .iter()
            .find(|w| is_url_prefix(&w.url, url) || is_url_prefix(url, &w.url))
        {
            return found.clone();
        }
        let root = if is_file {
            url.rsplit_once('/').map(|(parent, _)| parent).unwrap_or(url)
        } else {
            url
        };
        let wrapper = location.wrap(root);
        debug!("Wrapped location {} for foreign root {}", location.id, root);
        wrappers.push(wrapper.clone());
        wrapper
    }

    pub fn wrappers(&self, location_id: &str) -> &[RepositoryLocation] {
        self.wrappers
            .get(location_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Drop the wrappers of a location that is no longer known
    pub fn forget_location(&mut self, location_id: &str) {
        self.wrappers.remove(location_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RepositoryLocation {
        RepositoryLocation::new("main", "http://h/r/trunk", "http://h/r")
    }

    #[test]
    fn inside_root_is_not_wrapped() {
        let mut idx = ExternalsIndex::new();
        let loc = idx.wrap_if_required(&base(), "http://h/r/trunk/a", false);
        assert!(!loc.wrapped);
        assert!(idx.wrappers("main").is_empty());
    }

    #[test]
    fn wrappers_are_created_once_and_reused() {
        let mut idx = ExternalsIndex::new();
        let first = idx.wrap_if_required(&base(), "http://ext/lib", false);
        assert!(first.wrapped);
        assert_eq!(first.root_url, "http://ext/lib");
        let second = idx.wrap_if_required(&base(), "http://ext/lib/src/a.c", true);
        assert_eq!(second, first);
        assert_eq!(idx.wrappers("main").len(), 1);
    }

    #[test]
    fn file_urls_wrap_their_parent() {
        let mut idx = ExternalsIndex::new();
        let loc = idx.wrap_if_required(&base(), "http://ext/dir/file.txt", true);
        assert_eq!(loc.url, "http://ext/dir");
    }

    #[test]
    fn forget_location_drops_wrappers() {
        let mut idx = ExternalsIndex::new();
        idx.wrap_if_required(&base(), "http://ext/lib", false);
        idx.forget_location("main");
        assert!(idx.wrappers("main").is_empty());
    }
}
