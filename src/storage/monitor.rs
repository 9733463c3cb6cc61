//! Out-of-band change detection
//!
//! Other SVN clients write the working copy database directly. Comparing its
//! modification time against the last check is enough to know a project's
//! cached statuses may be stale.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::resource::Resource;

#[derive(Debug)]
pub struct ChangeMonitor {
    databases: HashMap<Resource, PathBuf>,
    last_check: DateTime<Utc>,
}

impl Default for ChangeMonitor {
    fn default() -> Self {
        Self {
            databases: HashMap::new(),
            last_check: Utc::now(),
        }
    }
}

impl ChangeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching the database of a project; the first path wins
    pub fn watch(&mut self, project: &Resource, database: PathBuf) {
        self.databases.entry(project.clone()).or_insert(database);
    }

    pub fn contains(&self, project: &Resource) -> bool {
        self.databases.contains_key(project)
    }

    pub fn forget(&mut self, project: &Resource) {
        self.databases.remove(project);
    }

    /// Watched projects with their database paths
    pub fn watched(&self) -> Vec<(Resource, PathBuf)> {
        self.databases
            .iter()
            .map(|(project, db)| (project.clone(), db.clone()))
            .collect()
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        self.last_check
    }

    /// Start a new observation window
    pub fn reset(&mut self) {
        self.reset_to(Utc::now());
    }

    /// Start the next window at `at`, usually the moment a scan began
    pub fn reset_to(&mut self, at: DateTime<Utc>) {
        self.last_check = at;
    }
}

/// Modification time of a file, `None` when it cannot be read
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// Projects whose database changed after `since`
///
/// Reads file metadata, so call it without holding the cache lock.
pub fn changed_since(watched: &[(Resource, PathBuf)], since: DateTime<Utc>) -> Vec<Resource> {
    watched
        .iter()
        .filter(|(_, db)| modified_at(db).is_some_and(|at| at > since))
        .map(|(project, _)| project.clone())
        .collect()
}
