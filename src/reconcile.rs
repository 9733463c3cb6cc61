//! Reconciliation of backend status reports into cached records
//!
//! A [`Reconciler`] lives for one synchronous lookup or one background job.
//! It reads and writes the shared [`State`] under its mutex, but every
//! connector round-trip happens with the lock released. Folder batches that
//! still need a deeper pass are collected as [`FetchJob`]s; the caller hands
//! them to the fetch queue once the lookup is done.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::connector::{
    reorder, Connector, ConnectorError, EntryInfo, EntryReference, EntryStatus, NodeKind, RawStatus,
    StatusOptions, SvnDepth,
};
use crate::error::{SvnCacheError, SvnCacheResult};
use crate::queue::QueuedItem;
use crate::repository::{append_url, decode_url, is_url_prefix, INVALID_REVISION};
use crate::resource::{Depth, ProjectBinding, Resource, ResourceKind, Workspace};
use crate::status::{
    change_mask, prop_status_of, text_status_of, ChangeMask, StatusRecord, TextStatus, TreeConflict,
};
use crate::storage::State;
use crate::wc;

/// Deferred reconciliation of the folders found below `target`
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    pub target: Resource,
    pub statuses: Vec<RawStatus>,
}

impl QueuedItem for FetchJob {
    fn can_merge(&self, other: &Self) -> bool {
        self.target == other.target
    }

    fn merge(&mut self, other: Self) {
        self.statuses.extend(other.statuses);
    }
}

/// Switches read once per lookup
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub cache_enabled: bool,
    pub verify_external_roots: bool,
    pub metadata_dir: String,
}

/// One status batch as returned by the backend
#[derive(Debug, Clone, Copy)]
pub struct Batch<'b> {
    /// Resource the lookup was made for
    pub resource: &'b Resource,
    /// Container the status request was issued for
    pub target: &'b Resource,
    pub statuses: &'b [RawStatus],
    /// URL `target` has when nothing below the project is switched
    pub desired_url: &'b str,
    /// Working copy root of the project
    pub wc_path: &'b Path,
    /// Filesystem path of `resource`
    pub requested_path: &'b Path,
}

pub struct Reconciler<'a> {
    connector: &'a dyn Connector,
    workspace: &'a dyn Workspace,
    state: &'a Mutex<State>,
    options: &'a ReconcileOptions,
    jobs: Vec<FetchJob>,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        connector: &'a dyn Connector,
        workspace: &'a dyn Workspace,
        state: &'a Mutex<State>,
        options: &'a ReconcileOptions,
    ) -> Self {
        Self {
            connector,
            workspace,
            state,
            options,
            jobs: Vec::new(),
        }
    }

    /// Deferred work collected so far
    pub fn into_jobs(self) -> Vec<FetchJob> {
        self.jobs
    }

    fn lock(&self) -> SvnCacheResult<MutexGuard<'a, State>> {
        self.state
            .lock()
            .map_err(|_| SvnCacheError::Internal("status cache lock poisoned".to_string()))
    }

    fn cached(&self, resource: &Resource) -> SvnCacheResult<Option<StatusRecord>> {
        Ok(self.lock()?.cache.get(resource).cloned())
    }

    fn nearest_cached_ancestor(&self, resource: &Resource) -> SvnCacheResult<Option<StatusRecord>> {
        Ok(self.lock()?.cache.nearest_cached_ancestor(resource).cloned())
    }

    /// Record of `resource`, reconciling on a cache miss
    ///
    /// Connector failures degrade to an `InternalInvalid` record;
    /// cancellation is passed through.
    pub fn lookup(&mut self, resource: &Resource, depth: Depth) -> SvnCacheResult<StatusRecord> {
        if self.options.cache_enabled && self.is_accessible(resource) {
            if let Some(record) = self.cached(resource)? {
                return Ok(record);
            }
        }
        self.reload(resource, depth)
    }

    /// Reconcile `resource` and its children to `depth`, even when cached
    pub fn reload(&mut self, resource: &Resource, depth: Depth) -> SvnCacheResult<StatusRecord> {
        if !self.is_accessible(resource) {
            return Ok(StatusRecord::internal_invalid(resource.clone()));
        }
        match self.load_subtree(resource, depth) {
            Ok(record) => Ok(record),
            Err(e) if e.is_cancelled() => Err(e),
            Err(SvnCacheError::Connector(e)) => {
                warn!("Status of {} is unavailable: {}", resource, e);
                Ok(StatusRecord::internal_invalid(resource.clone()))
            }
            Err(e) => Err(e),
        }
    }

    fn is_accessible(&self, resource: &Resource) -> bool {
        resource
            .project_of()
            .is_some_and(|project| self.workspace.is_accessible(&project))
    }

    fn load_subtree(&mut self, resource: &Resource, depth: Depth) -> SvnCacheResult<StatusRecord> {
        let binding = resource
            .project_of()
            .and_then(|project| self.workspace.project_binding(&project));
        let Some(binding) = binding else {
            return Ok(StatusRecord::internal_invalid(resource.clone()));
        };
        if self.workspace.is_svn_internals(resource) {
            return Ok(StatusRecord::internal_invalid(resource.clone()));
        }

        let depth = if self.options.cache_enabled {
            depth
        } else {
            self.lock()?.cache.clear();
            Depth::Zero
        };

        let is_linked = self.workspace.is_linked(resource);
        let parent = resource.parent().unwrap_or_else(Resource::root);
        let parent_is_root = parent.kind() == ResourceKind::Root;
        let parent_exists = parent_is_root || self.workspace.exists(&parent);

        let mut record = None;
        if parent_exists && !is_linked {
            let parent_record = if parent_is_root {
                None
            } else {
                Some(self.lookup(&parent, Depth::One)?)
            };
            let versioned_parent = match &parent_record {
                None => true,
                Some(p) => !p.status().is_non_svn() || p.is_unversioned_external(),
            };
            if versioned_parent {
                record = self.load_svn(resource, &binding, depth)?;
            }
        }

        match record {
            Some(r) if !(r.text_status.is_unversioned() && r.text_status != TextStatus::Ignored) => Ok(r),
            _ => self.load_unversioned_subtree(resource, is_linked, depth),
        }
    }

    fn load_svn(
        &mut self,
        resource: &Resource,
        binding: &ProjectBinding,
        depth: Depth,
    ) -> SvnCacheResult<Option<StatusRecord>> {
        let target = if resource.is_container() {
            resource.clone()
        } else {
            match resource.parent() {
                Some(parent) => parent,
                None => return Ok(None),
            }
        };
        let (Some(target_path), Some(requested_path)) =
            (self.workspace.location(&target), self.workspace.location(resource))
        else {
            return Ok(None);
        };

        let offset = target_path.components().count() as i64
            - binding.location.components().count() as i64;
        let svn_depth = if offset < 1 || !self.options.cache_enabled {
            SvnDepth::Immediates
        } else {
            match depth {
                Depth::Zero if resource.is_container() => SvnDepth::Empty,
                Depth::Zero | Depth::One => SvnDepth::Immediates,
                Depth::Infinite => SvnDepth::Infinity,
            }
        };

        debug!("Loading statuses of {} ({:?})", target, svn_depth);
        let statuses = self.get_statuses(&target_path, svn_depth)?;
        let desired_url = append_url(&binding.repository.url, &target.project_relative_path());
        let batch = Batch {
            resource,
            target: &target,
            statuses: &statuses,
            desired_url: &desired_url,
            wc_path: &binding.location,
            requested_path: &requested_path,
        };
        let (record, deferred) = self.fill_cache(&batch)?;

        if statuses.len() == 1 && target.is_container() {
            self.lock()?.cache.ensure_bucket(&target);
        }

        if record.is_some() && deferred.len() > 1 && depth != Depth::Zero && self.options.cache_enabled {
            trace!("Deferring {} folders below {}", deferred.len(), target);
            self.jobs.push(FetchJob {
                target,
                statuses: deferred,
            });
        }
        Ok(record)
    }

    fn get_statuses(&self, path: &Path, depth: SvnDepth) -> SvnCacheResult<Vec<RawStatus>> {
        let options = StatusOptions::INCLUDE_UNCHANGED | StatusOptions::INCLUDE_IGNORED;
        match self.connector.status(path, depth, options) {
            Ok(mut statuses) => {
                reorder(&mut statuses);
                Ok(statuses)
            }
            Err(ConnectorError::CleanupRequired { .. }) => {
                warn!("Working copy at {} needs cleanup", path.display());
                Ok(vec![RawStatus::cleanup_placeholder(path)])
            }
            Err(ConnectorError::NotWorkingCopy { .. } | ConnectorError::PathNotFound { .. }) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Turn a status batch into cached records
    ///
    /// Returns the record of the requested resource, if the batch produced
    /// one, and the folder entries that still need a deeper pass. The batch
    /// itself is left untouched.
    pub fn fill_cache(&mut self, batch: &Batch<'_>) -> SvnCacheResult<(Option<StatusRecord>, Vec<RawStatus>)> {
        let Some(project) = batch.resource.project_of() else {
            return Ok((None, Vec::new()));
        };
        let mut result = None;
        let mut load_targets: BTreeMap<Resource, RawStatus> = BTreeMap::new();

        for (i, raw) in batch.statuses.iter().enumerate() {
            let mut st = raw.clone();
            if st.tree_conflicts.as_ref().is_some_and(Vec::is_empty) {
                st.tree_conflicts = None;
            }

            let mut kind = disk_node_kind(&st.path, st.node_kind);
            if st.tree_conflicts.is_none() && (st.has_conflict || kind == NodeKind::None) {
                st.tree_conflicts = self.fetch_tree_conflicts(&st.path)?;
            }
            if kind == NodeKind::None && st.tree_conflicts.is_none() {
                continue;
            }

            let relative = st
                .path
                .strip_prefix(batch.wc_path)
                .map(|r| r.to_string_lossy().replace('\\', "/"))
                .unwrap_or_default();
            if i > 0 && relative.is_empty() {
                continue;
            }

            let member = self.workspace.find_member(&project, &relative);
            if let Some(m) = &member {
                if !kind_matches(m.kind(), kind) && self.workspace.is_symlink(m) {
                    kind = NodeKind::Symlink;
                }
            }
            let is_symlink = kind == NodeKind::Symlink;
            let mut t_res = member.unwrap_or_else(|| {
                if kind == NodeKind::Dir {
                    project.folder_at(&relative)
                } else {
                    project.file_at(&relative)
                }
            });
            if is_symlink {
                kind = if t_res.is_container() {
                    NodeKind::Dir
                } else {
                    NodeKind::File
                };
            }
            if st.path == batch.requested_path
                && (matches!(batch.resource.kind(), ResourceKind::Project | ResourceKind::Root)
                    || kind_matches(batch.resource.kind(), kind))
            {
                t_res = batch.resource.clone();
            }
            let t_desired = append_url(
                batch.desired_url,
                &t_res.relative_to(batch.target).unwrap_or_default(),
            );

            let local = match self.cached(&t_res)? {
                Some(local) => local,
                None => {
                    if kind == NodeKind::Dir {
                        load_targets.insert(t_res.clone(), st.clone());
                    }
                    if let Some(parent) = t_res.parent() {
                        load_targets.remove(&parent);
                    }

                    let parent = self.nearest_cached_ancestor(&t_res)?;
                    if parent.as_ref().is_some_and(StatusRecord::is_opaque) {
                        self.register(StatusRecord::unversioned(t_res, TextStatus::Ignored, ChangeMask::FORBIDDEN))?;
                        continue;
                    }

                    let mut is_external = false;
                    if st.text_status == EntryStatus::External {
                        is_external = true;
                        match self.query_external(&st.path)? {
                            Some(fresh) => st = fresh,
                            None => {
                                let local = self.register(StatusRecord::unversioned(
                                    t_res.clone(),
                                    TextStatus::Ignored,
                                    ChangeMask::SVN_EXTERNALS,
                                ))?;
                                if t_res == *batch.resource {
                                    result = Some(local);
                                }
                                continue;
                            }
                        }
                    } else if i == 0
                        && self.options.verify_external_roots
                        && st
                            .url
                            .as_deref()
                            .is_some_and(|url| !is_url_prefix(&t_desired, &decode_url(url)))
                    {
                        if let Some(parent_res) = t_res.parent().filter(|p| p.kind() != ResourceKind::Root) {
                            let parent_switched = self.cached(&parent_res)?.is_some_and(|p| p.is_switched());
                            if !parent_switched {
                                is_external = self.is_external_of(&parent_res, &st.path)?;
                            }
                        }
                    }

                    let force_copied = parent.as_ref().is_some_and(StatusRecord::is_copied);
                    let mut mask = change_mask(force_copied || st.is_copied, st.is_switched, is_external);
                    if is_symlink {
                        mask |= ChangeMask::SYMLINK;
                    }
                    if st.wc_lock.is_some() {
                        mask |= ChangeMask::LOCKED;
                    }
                    if kind == NodeKind::None && st.tree_conflicts.is_some() {
                        mask |= ChangeMask::TREE_CONFLICT_UNKNOWN_NODE_KIND;
                    }
                    if st.is_file_external {
                        mask |= ChangeMask::SWITCHED;
                    }

                    let mut text = if st.tree_conflicts.is_some() {
                        TextStatus::Conflicting
                    } else {
                        text_status_of(st.prop_status, st.text_status, false)
                    };
                    let prop = prop_status_of(st.prop_status);

                    if text == TextStatus::New && kind == NodeKind::Dir {
                        let own_meta = self
                            .workspace
                            .location(&t_res)
                            .is_some_and(|l| wc::has_svn_meta(&l, &self.options.metadata_dir));
                        if own_meta {
                            continue;
                        }
                        if self.contains_meta_in_children(&t_res) {
                            self.register(StatusRecord::unversioned(
                                t_res,
                                TextStatus::Ignored,
                                ChangeMask::SVN_EXTERNALS,
                            ))?;
                            continue;
                        }
                    }

                    let url = st.url.as_deref().map(decode_url);
                    if !st.is_switched && url.as_deref().is_some_and(|u| !is_url_prefix(&t_desired, u)) {
                        mask |= ChangeMask::SWITCHED;
                    }
                    if mask.contains(ChangeMask::SWITCHED) {
                        match url {
                            Some(url) => self.lock()?.switched.insert(&t_res, url),
                            None => mask.remove(ChangeMask::SWITCHED),
                        }
                    }

                    if text == TextStatus::Deleted && wc::file_exists(&st.path) {
                        text = TextStatus::PreReplaced;
                    }
                    if self.workspace.is_linked(&t_res) {
                        text = TextStatus::Linked;
                    } else if text != TextStatus::Obstructed && st.text_status == EntryStatus::Unversioned {
                        text = self.delegated_status(&t_res, TextStatus::New)?;
                    }
                    if text == TextStatus::New
                        && kind == NodeKind::Dir
                        && wc::has_svn_meta(&st.path, &self.options.metadata_dir)
                    {
                        text = TextStatus::Obstructed;
                    }

                    let revision = if st.last_changed_revision == INVALID_REVISION && mask.contains(ChangeMask::COPIED) {
                        st.revision
                    } else {
                        st.last_changed_revision
                    };
                    let tree_conflict = st.tree_conflict().cloned();
                    self.register(StatusRecord {
                        resource: t_res.clone(),
                        text_status: text,
                        prop_status: prop,
                        change_mask: mask,
                        revision,
                        base_revision: st.revision,
                        author: st.last_commit_author,
                        last_commit_date: st.last_changed_date,
                        tree_conflict,
                    })?
                }
            };

            if t_res == *batch.resource {
                result = Some(local);
            }
        }

        Ok((result, load_targets.into_values().collect()))
    }

    fn fetch_tree_conflicts(&self, path: &Path) -> SvnCacheResult<Option<Vec<TreeConflict>>> {
        let mut found = None;
        let outcome = self.connector.get_info(
            &EntryReference::path(path),
            SvnDepth::Empty,
            &mut |info: &EntryInfo| found = info.tree_conflicts.clone(),
        );
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e.into()),
            Err(e) => trace!("No conflict info for {}: {}", path.display(), e),
        }
        Ok(found.filter(|c| !c.is_empty()))
    }

    /// Real status of an external definition's root
    fn query_external(&self, path: &Path) -> SvnCacheResult<Option<RawStatus>> {
        match self
            .connector
            .status(path, SvnDepth::Immediates, StatusOptions::INCLUDE_UNCHANGED)
        {
            Ok(mut statuses) => {
                reorder(&mut statuses);
                Ok(statuses.into_iter().next().filter(|s| s.url.is_some()))
            }
            Err(e) if e.is_cancelled() => Err(e.into()),
            Err(e) => {
                debug!("External at {} did not answer: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Whether `parent` reports the node at `path` as an external mount
    fn is_external_of(&self, parent: &Resource, path: &Path) -> SvnCacheResult<bool> {
        let Some(parent_path) = self.workspace.location(parent) else {
            return Ok(false);
        };
        match self
            .connector
            .status(&parent_path, SvnDepth::Immediates, StatusOptions::INCLUDE_UNCHANGED)
        {
            Ok(statuses) => Ok(statuses
                .iter()
                .find(|s| s.path == path)
                .is_some_and(|s| s.text_status == EntryStatus::External)),
            Err(e) if e.is_cancelled() => Err(e.into()),
            Err(_) => Ok(false),
        }
    }

    fn contains_meta_in_children(&self, resource: &Resource) -> bool {
        if resource.kind() != ResourceKind::Folder || self.workspace.is_ignored(resource) {
            return false;
        }
        self.workspace
            .location(resource)
            .is_some_and(|l| wc::contains_svn_meta_in_children(&l, &self.options.metadata_dir))
    }

    /// Final status of an unversioned node, inheriting from opaque ancestors
    pub fn delegated_status(&self, resource: &Resource, status: TextStatus) -> SvnCacheResult<TextStatus> {
        if status == TextStatus::Linked || self.workspace.is_linked(resource) {
            return Ok(TextStatus::Linked);
        }
        if matches!(status, TextStatus::Obstructed | TextStatus::Ignored) {
            return Ok(status);
        }
        self.top_level_status(resource, status)
    }

    fn top_level_status(&self, resource: &Resource, status: TextStatus) -> SvnCacheResult<TextStatus> {
        let inherited = self
            .nearest_cached_ancestor(resource)?
            .map(|ancestor| ancestor.status())
            .filter(|s| matches!(s, TextStatus::Obstructed | TextStatus::Linked | TextStatus::Ignored));
        Ok(inherited.unwrap_or(status))
    }

    fn unversioned_status(&self, resource: &Resource, is_linked: bool) -> SvnCacheResult<TextStatus> {
        if is_linked {
            return Ok(TextStatus::Linked);
        }
        let on_disk = self
            .workspace
            .location(resource)
            .is_some_and(|l| wc::file_exists(&l));
        if !on_disk {
            return Ok(TextStatus::NotExists);
        }
        if self.workspace.is_ignored(resource) {
            return Ok(TextStatus::Ignored);
        }
        if let Some(record) = self.cached(resource)? {
            return Ok(record.status());
        }
        self.top_level_status(resource, TextStatus::New)
    }

    /// Register the host subtree of a node the backend knows nothing about
    fn load_unversioned_subtree(
        &mut self,
        resource: &Resource,
        is_linked: bool,
        depth: Depth,
    ) -> SvnCacheResult<StatusRecord> {
        let mut first = None;
        let mut external_parent = false;
        let mut pending = vec![(resource.clone(), depth)];

        while let Some((child, depth)) = pending.pop() {
            if self.workspace.is_svn_internals(&child) || self.has_own_meta(&child) {
                continue;
            }
            let parent = self.nearest_cached_ancestor(&child)?;
            let parent_is_symlink = parent
                .as_ref()
                .is_some_and(|p| p.change_mask.contains(ChangeMask::SYMLINK));
            let mut mask = parent
                .as_ref()
                .map(|p| p.change_mask & (ChangeMask::SWITCHED | ChangeMask::FORBIDDEN))
                .unwrap_or_default();
            if parent_is_symlink {
                mask |= ChangeMask::FORBIDDEN;
            }
            // a rescan must not forget that the node is an externals mount
            if child == *resource {
                if let Some(known) = self.cached(&child)? {
                    mask |= known.change_mask & ChangeMask::SVN_EXTERNALS;
                }
            }

            let inherited = if parent_is_symlink {
                TextStatus::Ignored
            } else {
                self.unversioned_status(resource, is_linked)?
            };
            let text = if child == *resource {
                inherited
            } else {
                self.delegated_status(&child, inherited)?
            };
            if text == TextStatus::New && child.kind() == ResourceKind::Folder && self.workspace.is_symlink(&child) {
                mask |= ChangeMask::SYMLINK;
            }

            let parent_ignored_by_rule = parent.as_ref().is_some_and(StatusRecord::is_ignored_not_forbidden);
            if !parent_ignored_by_rule && text == TextStatus::Ignored && !mask.contains(ChangeMask::FORBIDDEN) {
                if external_parent || self.contains_meta_in_children(resource) {
                    mask |= ChangeMask::FORBIDDEN;
                    if child == *resource {
                        external_parent = true;
                    }
                }
            }

            let record = self.register(StatusRecord::unversioned(child.clone(), text, mask))?;
            if first.is_none() {
                first = Some(record);
            }

            if child.is_container() && depth != Depth::Zero {
                let next = match depth {
                    Depth::One => Depth::Zero,
                    other => other,
                };
                let mut members = self.workspace.members(&child);
                members.reverse();
                pending.extend(members.into_iter().map(|m| (m, next)));
            }
        }

        Ok(first.unwrap_or_else(|| StatusRecord::internal_invalid(resource.clone())))
    }

    fn has_own_meta(&self, resource: &Resource) -> bool {
        resource.is_container()
            && self
                .workspace
                .location(resource)
                .is_some_and(|l| wc::has_svn_meta(&l, &self.options.metadata_dir))
    }

    /// Commit a record into the cache
    fn register(&self, mut record: StatusRecord) -> SvnCacheResult<StatusRecord> {
        if record.text_status == TextStatus::Obstructed && self.workspace.is_build_output(&record.resource) {
            let on_disk = self
                .workspace
                .location(&record.resource)
                .is_some_and(|l| l.exists());
            record.text_status = if on_disk {
                TextStatus::Ignored
            } else {
                TextStatus::NotExists
            };
        }
        if record.text_status.has_no_provenance() {
            record.revision = INVALID_REVISION;
            record.author = None;
            record.last_commit_date = 0;
        }

        let wc_db = if record.resource.kind() == ResourceKind::Project
            && !self.lock()?.monitor.contains(&record.resource)
        {
            self.workspace
                .location(&record.resource)
                .and_then(|l| wc::find_wc_db(&l, &self.options.metadata_dir))
        } else {
            None
        };

        let mut state = self.lock()?;
        if let Some(db) = wc_db {
            state.monitor.watch(&record.resource, db);
        }
        state.cache.put(record.clone());
        Ok(record)
    }
}

/// Backend node kind, corrected from disk when the backend is unsure
fn disk_node_kind(path: &Path, reported: NodeKind) -> NodeKind {
    if !matches!(reported, NodeKind::None | NodeKind::Unknown) {
        return reported;
    }
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => NodeKind::Symlink,
        Ok(meta) if meta.is_dir() => NodeKind::Dir,
        Ok(_) => NodeKind::File,
        Err(_) => NodeKind::None,
    }
}

fn kind_matches(kind: ResourceKind, node: NodeKind) -> bool {
    match node {
        NodeKind::File => kind == ResourceKind::File,
        NodeKind::Dir => kind.is_container(),
        _ => false,
    }
}
