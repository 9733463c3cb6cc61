//! Status storage facade
//!
//! [`StatusStorage`] owns the status cache, its indices, the two background
//! queues and the listener registries. It is constructed explicitly and
//! shared as an `Arc`; the fetch queue keeps only a weak reference back to
//! it, so dropping the last handle stops both workers.
//!
//! Synchronous lookups reconcile on the caller's thread and hand deeper
//! folder batches to the fetch queue. Listener fan-out for resource and
//! project state changes runs on the event queue.

pub mod codec;
pub mod monitor;

pub use codec::{RepositoryResourceRecord, ResourceChange};
pub use monitor::ChangeMonitor;

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ExternalsIndex, HierarchicalCache, SwitchedIndex};
use crate::config::{Config, ConfigManager};
use crate::connector::{Connector, EntryReference, EntryStatus, NodeKind, SvnDepth};
use crate::error::{SvnCacheError, SvnCacheResult};
use crate::events::{
    Listeners, ProjectStatesChangedEvent, ProjectStatesListener, RepositoriesStateChangedEvent,
    RepositoriesStateListener, RepositoryAction, ResourceStatesChangedEvent, ResourceStatesListener,
    RevisionPropertyChangeEvent, RevisionPropertyListener, StateEvent,
};
use crate::logging;
use crate::queue::CoalescingQueue;
use crate::reconcile::{FetchJob, ReconcileOptions, Reconciler};
use crate::repository::{
    append_url, is_url_prefix, RepositoryLocation, RepositoryResource, Revision, INVALID_REVISION,
};
use crate::resource::{shrink_child_nodes, Depth, Resource, ResourceKind, Workspace};
use crate::status::{
    change_mask, prop_status_of, text_status_of, ChangeMask, StatusRecord, TextStatus, TreeConflict,
};
use crate::workspace::FsWorkspace;

/// Everything guarded by the storage lock
#[derive(Debug, Default)]
pub struct State {
    pub cache: HierarchicalCache,
    pub switched: SwitchedIndex,
    pub externals: ExternalsIndex,
    pub monitor: ChangeMonitor,
}

/// A change an SVN operation reported for a working copy path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeState {
    pub local_path: PathBuf,
    pub node_kind: NodeKind,
    pub text_kind: EntryStatus,
    pub prop_kind: EntryStatus,
    pub is_copied: bool,
    pub is_switched: bool,
    /// Revision of the change, when the backend knows it
    pub change_revision: Option<i64>,
    pub author: Option<String>,
    pub date: i64,
    pub tree_conflict: Option<TreeConflict>,
    pub comment: Option<String>,
}

impl ChangeState {
    pub fn new(local_path: impl Into<PathBuf>, node_kind: NodeKind, text_kind: EntryStatus) -> Self {
        Self {
            local_path: local_path.into(),
            node_kind,
            text_kind,
            prop_kind: EntryStatus::None,
            is_copied: false,
            is_switched: false,
            change_revision: None,
            author: None,
            date: 0,
            tree_conflict: None,
            comment: None,
        }
    }
}

pub struct StatusStorage {
    connector: Arc<dyn Connector>,
    workspace: Arc<dyn Workspace>,
    state: Mutex<State>,
    locations: RwLock<HashMap<String, RepositoryLocation>>,
    /// Depth used on a cache miss; remembered from the last refresh
    suggested_depth: RwLock<Depth>,
    cache_enabled: AtomicBool,
    verify_external_roots: bool,
    metadata_dir: String,
    listeners: Arc<Listeners>,
    fetch_queue: CoalescingQueue<FetchJob>,
    event_queue: CoalescingQueue<StateEvent>,
}

impl StatusStorage {
    /// Create a storage on the current tokio runtime
    pub fn new(
        config: &Config,
        connector: Arc<dyn Connector>,
        workspace: Arc<dyn Workspace>,
    ) -> SvnCacheResult<Arc<Self>> {
        let handle = Handle::try_current()
            .map_err(|e| SvnCacheError::Internal(format!("no tokio runtime for status storage: {}", e)))?;
        Ok(Self::with_handle(config, connector, workspace, &handle))
    }

    /// Load the config file, install logging and start a storage over a
    /// filesystem workspace
    ///
    /// Projects are registered on the returned workspace.
    pub async fn open(
        manager: &ConfigManager,
        connector: Arc<dyn Connector>,
    ) -> SvnCacheResult<(Arc<Self>, Arc<FsWorkspace>)> {
        let config = manager.load().await?;
        logging::init(&config.general);
        let workspace = Arc::new(FsWorkspace::new(&config.workspace)?);
        let storage = Self::new(&config, connector, workspace.clone())?;
        info!("Status storage ready (config {})", manager.path().display());
        Ok((storage, workspace))
    }

    /// Create a storage whose queues run on `handle`
    pub fn with_handle(
        config: &Config,
        connector: Arc<dyn Connector>,
        workspace: Arc<dyn Workspace>,
        handle: &Handle,
    ) -> Arc<Self> {
        let listeners = Arc::new(Listeners::new());
        let storage = Arc::new_cyclic(|weak: &Weak<Self>| {
            let weak = weak.clone();
            let fetch_queue = CoalescingQueue::with_handle(
                config.cache.fetch_queue_name.clone(),
                handle,
                move |job: FetchJob, cancel: &CancellationToken| match weak.upgrade() {
                    Some(storage) => storage.process_fetch_job(job, cancel),
                    None => Ok(()),
                },
            );

            let dispatch = Arc::clone(&listeners);
            let event_queue = CoalescingQueue::with_handle(
                config.cache.event_queue_name.clone(),
                handle,
                move |event: StateEvent, cancel: &CancellationToken| {
                    dispatch.dispatch(&event, cancel);
                    Ok(())
                },
            );

            Self {
                connector,
                workspace,
                state: Mutex::new(State::default()),
                locations: RwLock::new(HashMap::new()),
                suggested_depth: RwLock::new(Depth::One),
                cache_enabled: AtomicBool::new(config.cache.enabled),
                verify_external_roots: config.cache.verify_external_roots,
                metadata_dir: config.workspace.metadata_dir.clone(),
                listeners,
                fetch_queue,
                event_queue,
            }
        });
        info!(
            "Status storage started (cache {})",
            if config.cache.enabled { "enabled" } else { "disabled" }
        );
        storage
    }

    fn lock(&self) -> SvnCacheResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| SvnCacheError::Internal("status cache lock poisoned".to_string()))
    }

    fn options(&self) -> ReconcileOptions {
        ReconcileOptions {
            cache_enabled: self.is_cache_enabled(),
            verify_external_roots: self.verify_external_roots,
            metadata_dir: self.metadata_dir.clone(),
        }
    }

    fn suggested_depth(&self) -> Depth {
        self.suggested_depth
            .read()
            .map(|d| *d)
            .unwrap_or(Depth::One)
    }

    fn set_suggested_depth(&self, depth: Depth) {
        if let Ok(mut current) = self.suggested_depth.write() {
            *current = depth;
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Acquire)
    }

    /// Switch caching on or off at runtime
    pub fn set_cache_enabled(&self, enabled: bool) {
        let previous = self.cache_enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!("Status cache {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    fn run_reconciler<F>(&self, f: F) -> SvnCacheResult<StatusRecord>
    where
        F: FnOnce(&mut Reconciler<'_>) -> SvnCacheResult<StatusRecord>,
    {
        let options = self.options();
        let mut reconciler = Reconciler::new(&*self.connector, &*self.workspace, &self.state, &options);
        let record = f(&mut reconciler)?;
        for job in reconciler.into_jobs() {
            self.fetch_queue.push(job);
        }
        Ok(record)
    }

    /// Status of a resource, reconciling on a cache miss
    pub fn as_local_resource(&self, resource: &Resource) -> SvnCacheResult<StatusRecord> {
        let depth = self.suggested_depth();
        self.run_reconciler(|r| r.lookup(resource, depth))
    }

    /// Cached status only; a miss reports `NotExists`
    ///
    /// The placeholder keeps the SWITCHED flag of its nearest cached
    /// ancestor. With caching disabled this is a regular lookup.
    pub fn as_local_resource_dirty(&self, resource: &Resource) -> SvnCacheResult<StatusRecord> {
        if !self.is_cache_enabled() {
            return self.as_local_resource(resource);
        }
        let accessible = resource
            .project_of()
            .is_some_and(|project| self.workspace.is_accessible(&project));
        if !accessible {
            return Ok(StatusRecord::internal_invalid(resource.clone()));
        }
        let state = self.lock()?;
        if let Some(record) = state.cache.get(resource) {
            return Ok(record.clone());
        }
        let mask = state
            .cache
            .nearest_cached_ancestor(resource)
            .map(|p| p.change_mask & ChangeMask::SWITCHED)
            .unwrap_or_default();
        Ok(StatusRecord::unversioned(resource.clone(), TextStatus::NotExists, mask))
    }

    /// Like [`as_local_resource`](Self::as_local_resource), but an invalid
    /// result is an error
    pub fn as_local_resource_accessible(&self, resource: &Resource) -> SvnCacheResult<StatusRecord> {
        let record = self.as_local_resource(resource)?;
        if record.is_internal_invalid() {
            let path = self
                .workspace
                .location(resource)
                .map(|l| l.display().to_string())
                .unwrap_or_else(|| resource.path().to_string());
            return Err(SvnCacheError::InaccessibleResource(path));
        }
        Ok(record)
    }

    /// Drop cached statuses so the next lookup reconciles again
    ///
    /// A deep refresh first drops resources already covered by an ancestor in
    /// the input, and makes later cache misses load whole subtrees.
    pub fn refresh_local_resources(&self, resources: &[Resource], depth: Depth) -> SvnCacheResult<()> {
        let roots = if depth == Depth::Infinite {
            self.set_suggested_depth(Depth::Infinite);
            shrink_child_nodes(resources)
        } else {
            self.set_suggested_depth(Depth::One);
            resources.to_vec()
        };

        let mut state = self.lock()?;
        for resource in &roots {
            for visited in state.cache.invalidate(resource, depth) {
                state.switched.remove(&visited);
            }
            if let Some(parent) = resource.parent() {
                state.cache.remove_bucket(&parent);
            }
        }
        debug!("Refreshed {} resources ({:?})", roots.len(), depth);
        Ok(())
    }

    /// Children of a container: workspace members plus versioned nodes the
    /// backend still knows about (deleted or missing ones included)
    pub fn registered_children(&self, container: &Resource) -> SvnCacheResult<Vec<Resource>> {
        if container.project_of().is_none() {
            return Ok(Vec::new());
        }
        let members = self.workspace.members(container);

        let loaded = self.lock()?.cache.has_bucket(container);
        if !loaded {
            self.run_reconciler(|r| r.reload(container, Depth::One))?;
        }

        let state = self.lock()?;
        let Some(children) = state.cache.children(container) else {
            return Ok(members);
        };
        let mut all: BTreeSet<Resource> = members.into_iter().collect();
        all.extend(
            children
                .into_iter()
                .filter(|r| r.status() != TextStatus::NotExists)
                .map(|r| r.resource.clone()),
        );
        Ok(all.into_iter().collect())
    }

    fn process_fetch_job(&self, job: FetchJob, cancel: &CancellationToken) -> SvnCacheResult<()> {
        let Some(project) = job.target.project_of() else {
            return Ok(());
        };
        let Some(root) = self.workspace.location(&project) else {
            return Ok(());
        };
        debug!("Fetching {} folders below {}", job.statuses.len(), job.target);

        for status in &job.statuses {
            if cancel.is_cancelled() {
                return Err(SvnCacheError::Cancelled);
            }
            if status.node_kind != NodeKind::Dir && !status.path.is_dir() {
                continue;
            }
            let Ok(relative) = status.path.strip_prefix(&root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if relative.is_empty() {
                continue;
            }
            let folder = project.folder_at(&relative);
            let local = self.as_local_resource(&folder)?;
            if !local.is_internal_invalid() {
                self.registered_children(&folder)?;
            }
        }
        Ok(())
    }

    /// Repository node a workspace resource corresponds to
    ///
    /// Switched subtrees resolve through the switched-URL index; everything
    /// else is the project's repository URL plus the relative path.
    pub fn as_repository_resource(&self, resource: &Resource) -> SvnCacheResult<RepositoryResource> {
        let project = resource
            .project_of()
            .ok_or_else(|| SvnCacheError::NotConnected(resource.path().to_string()))?;
        let binding = self
            .workspace
            .project_binding(&project)
            .ok_or_else(|| SvnCacheError::NotConnected(project.name().to_string()))?;
        let base = binding.repository;
        if *resource == project {
            return Ok(base);
        }

        let mut state = self.lock()?;
        let switched = match state.switched.get(resource) {
            Some(url) => Some(url.to_string()),
            None => {
                let parent_switched = state
                    .cache
                    .nearest_cached_ancestor(resource)
                    .is_some_and(StatusRecord::is_switched);
                if parent_switched {
                    state.switched.resolve(resource)
                } else {
                    None
                }
            }
        };

        let mut location = base.location.clone();
        let url = match switched {
            Some(url) => {
                if !location.contains_url(&url) {
                    location = state
                        .externals
                        .wrap_if_required(&location, &url, !resource.is_container());
                }
                url
            }
            None => append_url(&base.url, &resource.project_relative_path()),
        };
        Ok(RepositoryResource::new(location, url, resource.is_container()))
    }

    /// Status of the resource of `project` that maps to a repository URL
    pub fn local_resource_for_url(
        &self,
        project: &Resource,
        url: &str,
        kind: ResourceKind,
    ) -> SvnCacheResult<StatusRecord> {
        let at = |relative: &str| {
            if relative.is_empty() {
                project.clone()
            } else if kind.is_container() {
                project.folder_at(relative)
            } else {
                project.file_at(relative)
            }
        };

        let switched_path = self.lock()?.switched.local_path_for_url(url);
        if let Some(path) = switched_path {
            let relative = Resource::at(&path, ResourceKind::Folder).project_relative_path();
            return self.as_local_resource(&at(&relative));
        }

        let project_url = self.as_repository_resource(project)?.url;
        if !is_url_prefix(&project_url, url) {
            return Ok(StatusRecord::internal_invalid(project.clone()));
        }
        let relative = url
            .trim_end_matches('/')
            .get(project_url.trim_end_matches('/').len()..)
            .unwrap_or("")
            .trim_matches('/');
        self.as_local_resource(&at(relative))
    }

    /// Repository resource for a URL, wrapping foreign roots
    pub fn repository_resource_for_url(
        &self,
        location: &RepositoryLocation,
        url: &str,
        is_file: bool,
    ) -> SvnCacheResult<RepositoryResource> {
        let location = self.lock()?.externals.wrap_if_required(location, url, is_file);
        Ok(RepositoryResource::new(location, url, !is_file))
    }

    /// Repository resource for a URL, asking the backend for its kind
    ///
    /// Missing revisions default to HEAD. Returns `None` when the node is
    /// neither a file nor a directory.
    pub fn resolve_repository_resource(
        &self,
        location: &RepositoryLocation,
        url: &str,
        peg_revision: Option<Revision>,
        revision: Option<Revision>,
    ) -> SvnCacheResult<Option<RepositoryResource>> {
        let location = self.lock()?.externals.wrap_if_required(location, url, false);
        let reference = EntryReference::url(
            url,
            peg_revision.unwrap_or(Revision::Head),
            revision.unwrap_or(Revision::Head),
        );
        let infos = self.connector.info(&reference, SvnDepth::Empty)?;
        Ok(infos.first().and_then(|info| match info.kind {
            NodeKind::File => Some(location.as_file(url)),
            NodeKind::Dir => Some(location.as_container(url)),
            _ => None,
        }))
    }

    /// Change record for an operation's report on a local path
    ///
    /// `update` classifies the report as an incoming (remote) change.
    /// Returns `None` when no workspace resource owns the path.
    pub fn as_resource_change(&self, change: &ChangeState, update: bool) -> Option<ResourceChange> {
        let is_folder = change.node_kind == NodeKind::Dir;
        let resource = self
            .workspace
            .resource_for_location(&change.local_path, is_folder)?;
        let text_status = text_status_of(change.prop_kind, change.text_kind, update);
        let prop_status = prop_status_of(change.prop_kind);
        let mut record = StatusRecord {
            resource,
            text_status,
            prop_status,
            change_mask: change_mask(change.is_copied, change.is_switched, false),
            revision: change.change_revision.unwrap_or(INVALID_REVISION),
            base_revision: change.change_revision.unwrap_or(INVALID_REVISION),
            author: change.author.clone(),
            last_commit_date: change.date,
            tree_conflict: change.tree_conflict.clone(),
        };
        if record.status() == TextStatus::NotExists {
            record.revision = INVALID_REVISION;
            record.base_revision = INVALID_REVISION;
        }
        Some(ResourceChange {
            comment: change.comment.clone(),
            ..ResourceChange::new(record)
        })
    }

    pub fn resource_change_as_bytes(&self, change: &ResourceChange) -> Vec<u8> {
        let path = self
            .workspace
            .location(&change.record.resource)
            .unwrap_or_else(|| PathBuf::from(change.record.resource.path()));
        let originator = change.originator.as_ref().map(codec::encode_repository_resource);
        codec::encode_resource_change(change, &path, originator.as_deref())
    }

    pub fn resource_change_from_bytes(&self, bytes: &[u8]) -> SvnCacheResult<ResourceChange> {
        let (mut change, originator) = codec::decode_resource_change(bytes, |path, is_folder| {
            self.workspace.resource_for_location(path, is_folder)
        })?;
        if let Some(data) = originator {
            change.originator = match self.repository_resource_from_bytes(&data) {
                Ok(resource) => resource,
                Err(SvnCacheError::MalformedRecord(reason)) => {
                    warn!("Dropping unreadable originator of {}: {}", change.record.resource, reason);
                    None
                }
                Err(e) => return Err(e),
            };
        }
        Ok(change)
    }

    pub fn repository_resource_as_bytes(&self, resource: &RepositoryResource) -> Vec<u8> {
        codec::encode_repository_resource(resource)
    }

    /// Decode a repository resource; `None` when its location is unknown
    pub fn repository_resource_from_bytes(&self, bytes: &[u8]) -> SvnCacheResult<Option<RepositoryResource>> {
        let record = codec::decode_repository_resource(bytes)?;
        let Some(location) = self.location(&record.location_id) else {
            debug!("Unknown repository location {}", record.location_id);
            return Ok(None);
        };
        let url = if record.url.contains("://") {
            record.url
        } else {
            append_url(record.root_kind.prefix(&location), &record.url)
        };
        let location = self
            .lock()?
            .externals
            .wrap_if_required(&location, &url, !record.is_folder);
        let mut resource = RepositoryResource::new(location, url, record.is_folder);
        resource.selected_revision = record.selected_revision;
        resource.peg_revision = record.peg_revision.unwrap_or(Revision::Head);
        Ok(Some(resource))
    }

    /// Register or replace a repository location
    pub fn add_location(&self, location: RepositoryLocation) {
        let previous = match self.locations.write() {
            Ok(mut locations) => locations.insert(location.id.clone(), location.clone()),
            Err(_) => return,
        };
        let action = if previous.is_some() {
            RepositoryAction::Changed
        } else {
            RepositoryAction::Added
        };
        debug!("Repository location {} {:?}", location.id, action);
        self.fire_repositories_state_changed(&RepositoriesStateChangedEvent { location, action });
    }

    pub fn location(&self, id: &str) -> Option<RepositoryLocation> {
        self.locations.read().ok()?.get(id).cloned()
    }

    /// Drop a location together with its wrapped foreign roots
    pub fn forget_location(&self, id: &str) -> SvnCacheResult<Option<RepositoryLocation>> {
        let removed = self.locations.write().ok().and_then(|mut l| l.remove(id));
        self.lock()?.externals.forget_location(id);
        if let Some(location) = &removed {
            self.fire_repositories_state_changed(&RepositoriesStateChangedEvent {
                location: location.clone(),
                action: RepositoryAction::Removed,
            });
        }
        Ok(removed)
    }

    /// Drop every cached record of a project
    pub fn forget_project(&self, project: &Resource) -> SvnCacheResult<()> {
        let mut state = self.lock()?;
        state.cache.forget_project(project);
        state.switched.forget_project(project);
        state.monitor.forget(project);
        debug!("Forgot project {}", project);
        Ok(())
    }

    /// Refresh projects whose working copy database changed behind our back
    ///
    /// Returns the refreshed projects.
    pub fn check_for_external_changes(&self) -> SvnCacheResult<Vec<Resource>> {
        let (watched, since) = {
            let state = self.lock()?;
            (state.monitor.watched(), state.monitor.last_check())
        };
        let scan_started = Utc::now();
        let changed = monitor::changed_since(&watched, since);
        if !changed.is_empty() {
            info!("{} projects changed outside the cache", changed.len());
            self.refresh_local_resources(&changed, Depth::Infinite)?;
            self.fire_resource_states_changed(ResourceStatesChangedEvent::changed(
                changed.clone(),
                Depth::Infinite,
            ));
        }
        self.lock()?.monitor.reset_to(scan_started);
        Ok(changed)
    }

    pub fn reset_external_changes_monitor(&self) -> SvnCacheResult<()> {
        self.lock()?.monitor.reset();
        Ok(())
    }

    pub fn add_resource_states_listener(&self, listener: Arc<dyn ResourceStatesListener>) {
        self.listeners.resource_states.add(listener);
    }

    pub fn remove_resource_states_listener(&self, listener: &Arc<dyn ResourceStatesListener>) {
        self.listeners.resource_states.remove(listener);
    }

    pub fn add_project_states_listener(&self, listener: Arc<dyn ProjectStatesListener>) {
        self.listeners.project_states.add(listener);
    }

    pub fn remove_project_states_listener(&self, listener: &Arc<dyn ProjectStatesListener>) {
        self.listeners.project_states.remove(listener);
    }

    pub fn add_repositories_state_listener(&self, listener: Arc<dyn RepositoriesStateListener>) {
        self.listeners.repositories.add(listener);
    }

    pub fn remove_repositories_state_listener(&self, listener: &Arc<dyn RepositoriesStateListener>) {
        self.listeners.repositories.remove(listener);
    }

    pub fn add_revision_property_listener(&self, listener: Arc<dyn RevisionPropertyListener>) {
        self.listeners.revision_properties.add(listener);
    }

    pub fn remove_revision_property_listener(&self, listener: &Arc<dyn RevisionPropertyListener>) {
        self.listeners.revision_properties.remove(listener);
    }

    /// Queue a resource-state event; empty or unobserved events are dropped
    pub fn fire_resource_states_changed(&self, event: ResourceStatesChangedEvent) {
        self.queue_event(StateEvent::Resources(event));
    }

    pub fn fire_project_state_changed(&self, event: ProjectStatesChangedEvent) {
        self.queue_event(StateEvent::Project(event));
    }

    fn queue_event(&self, event: StateEvent) {
        if self.listeners.wants(&event) {
            self.event_queue.push(event);
        }
    }

    /// Delivered on the caller's thread
    pub fn fire_repositories_state_changed(&self, event: &RepositoriesStateChangedEvent) {
        self.listeners.fire_repositories_state_changed(event);
    }

    /// Delivered on the caller's thread
    pub fn fire_revision_property_changed(&self, event: &RevisionPropertyChangeEvent) {
        self.listeners.fire_revision_property_changed(event);
    }

    /// Resolve once both queues have drained
    pub async fn wait_idle(&self) {
        self.fetch_queue.wait_idle().await;
        self.event_queue.wait_idle().await;
    }

    /// Cancel background work and stop both queues
    pub fn shutdown(&self) {
        self.fetch_queue.shutdown();
        self.event_queue.shutdown();
        info!("Status storage stopped");
    }
}
