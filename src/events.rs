//! Change notifications
//!
//! Four typed channels, each with its own listener list. Resource and project
//! state events are fanned out from the event queue; repository and revision
//! property events are delivered on the caller's thread.

use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::queue::QueuedItem;
use crate::repository::RepositoryLocation;
use crate::resource::{Depth, Resource};

/// What a resource-state event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStateKind {
    /// The statuses of the resources changed
    ChangedNodes,
    /// Only the ancestors of the resources need repainting
    PathNodes,
}

/// Resources whose cached status changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceStatesChangedEvent {
    pub resources: Vec<Resource>,
    pub depth: Depth,
    pub kind: ResourceStateKind,
}

impl ResourceStatesChangedEvent {
    pub fn new(resources: Vec<Resource>, depth: Depth, kind: ResourceStateKind) -> Self {
        Self {
            resources,
            depth,
            kind,
        }
    }

    pub fn changed(resources: Vec<Resource>, depth: Depth) -> Self {
        Self::new(resources, depth, ResourceStateKind::ChangedNodes)
    }

    pub fn size(&self) -> usize {
        self.resources.len()
    }

    /// Whether the event covers `resource` at its depth
    pub fn contains(&self, resource: &Resource) -> bool {
        self.resources.iter().any(|r| {
            r == resource
                || match self.depth {
                    Depth::Zero => false,
                    Depth::One => resource.parent().as_ref() == Some(r),
                    Depth::Infinite => r.is_ancestor_of(resource),
                }
        })
    }
}

/// Lifecycle change of a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectState {
    Opened,
    Closed,
    Deleted,
    Shared,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectStatesChangedEvent {
    pub project: Resource,
    pub state: ProjectState,
}

/// Change to the set of known repository locations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryAction {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoriesStateChangedEvent {
    pub location: RepositoryLocation,
    pub action: RepositoryAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionPropertyChangeEvent {
    pub location: RepositoryLocation,
    pub revision: i64,
    pub name: String,
    /// `None` when the property was deleted
    pub value: Option<String>,
}

pub trait ResourceStatesListener: Send + Sync {
    fn resources_state_changed(&self, event: &ResourceStatesChangedEvent);
}

pub trait ProjectStatesListener: Send + Sync {
    fn project_state_changed(&self, event: &ProjectStatesChangedEvent);
}

pub trait RepositoriesStateListener: Send + Sync {
    fn repositories_state_changed(&self, event: &RepositoriesStateChangedEvent);
}

pub trait RevisionPropertyListener: Send + Sync {
    fn revision_property_changed(&self, event: &RevisionPropertyChangeEvent);
}

/// Listeners of one channel
///
/// Identity is the `Arc` allocation, so adding the same listener twice is a
/// no-op. Dispatch works on a snapshot, which lets a listener remove itself
/// from inside its callback.
pub struct ListenerList<L: ?Sized> {
    listeners: Mutex<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for ListenerList<L> {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> ListenerList<L> {
    pub fn new() -> Self {
        Self::default()
    }

    fn same(a: &Arc<L>, b: &Arc<L>) -> bool {
        std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
    }

    pub fn add(&self, listener: Arc<L>) {
        let Ok(mut listeners) = self.listeners.lock() else {
            warn!("Listener list lock poisoned");
            return;
        };
        if !listeners.iter().any(|l| Self::same(l, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &Arc<L>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|l| !Self::same(l, listener));
        }
    }

    pub fn snapshot(&self) -> Vec<Arc<L>> {
        self.listeners
            .lock()
            .map(|l| l.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All listener channels of a storage instance
#[derive(Default)]
pub struct Listeners {
    pub resource_states: ListenerList<dyn ResourceStatesListener>,
    pub project_states: ListenerList<dyn ProjectStatesListener>,
    pub repositories: ListenerList<dyn RepositoriesStateListener>,
    pub revision_properties: ListenerList<dyn RevisionPropertyListener>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a queued event would reach anybody
    pub fn wants(&self, event: &StateEvent) -> bool {
        match event {
            StateEvent::Resources(e) => e.size() > 0 && !self.resource_states.is_empty(),
            StateEvent::Project(_) => !self.project_states.is_empty(),
        }
    }

    /// Deliver a queued event, checking for cancellation between listeners
    pub fn dispatch(&self, event: &StateEvent, cancel: &CancellationToken) {
        match event {
            StateEvent::Resources(e) => {
                for listener in self.resource_states.snapshot() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    listener.resources_state_changed(e);
                }
            }
            StateEvent::Project(e) => {
                for listener in self.project_states.snapshot() {
                    if cancel.is_cancelled() {
                        return;
                    }
                    listener.project_state_changed(e);
                }
            }
        }
    }

    pub fn fire_repositories_state_changed(&self, event: &RepositoriesStateChangedEvent) {
        for listener in self.repositories.snapshot() {
            listener.repositories_state_changed(event);
        }
    }

    pub fn fire_revision_property_changed(&self, event: &RevisionPropertyChangeEvent) {
        for listener in self.revision_properties.snapshot() {
            listener.revision_property_changed(event);
        }
    }
}

/// Item of the event queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent {
    Resources(ResourceStatesChangedEvent),
    Project(ProjectStatesChangedEvent),
}

impl QueuedItem for StateEvent {
    fn can_skip(&self) -> bool {
        true
    }

    fn can_merge(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Resources(a), Self::Resources(b)) => a.kind == b.kind && a.depth == b.depth,
            _ => false,
        }
    }

    fn merge(&mut self, other: Self) {
        if let (Self::Resources(a), Self::Resources(b)) = (self, other) {
            for resource in b.resources {
                if !a.resources.contains(&resource) {
                    a.resources.push(resource);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl ResourceStatesListener for Counting {
        fn resources_state_changed(&self, _: &ResourceStatesChangedEvent) {
            self.calls.fetch_add(1, Ordering::AcqRel);
        }
    }

    struct SelfRemoving {
        list: Arc<ListenerList<dyn ResourceStatesListener>>,
        me: Mutex<Option<Arc<dyn ResourceStatesListener>>>,
    }

    impl ResourceStatesListener for SelfRemoving {
        fn resources_state_changed(&self, _: &ResourceStatesChangedEvent) {
            if let Some(me) = self.me.lock().unwrap().take() {
                self.list.remove(&me);
            }
        }
    }

    fn event(paths: &[&str]) -> ResourceStatesChangedEvent {
        ResourceStatesChangedEvent::changed(
            paths.iter().map(|p| Resource::file(p)).collect(),
            Depth::Zero,
        )
    }

    #[test]
    fn add_is_deduplicated_by_identity() {
        let list: ListenerList<dyn ResourceStatesListener> = ListenerList::new();
        let listener: Arc<dyn ResourceStatesListener> = Arc::new(Counting::default());
        list.add(Arc::clone(&listener));
        list.add(Arc::clone(&listener));
        list.add(Arc::new(Counting::default()));
        assert_eq!(list.len(), 2);
        list.remove(&listener);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn listener_can_remove_itself_during_dispatch() {
        let listeners = Listeners::new();
        let list = Arc::new(ListenerList::<dyn ResourceStatesListener>::new());
        let remover = Arc::new(SelfRemoving {
            list: Arc::clone(&list),
            me: Mutex::new(None),
        });
        let as_dyn: Arc<dyn ResourceStatesListener> = remover.clone();
        *remover.me.lock().unwrap() = Some(Arc::clone(&as_dyn));
        list.add(as_dyn);

        for l in list.snapshot() {
            l.resources_state_changed(&event(&["/p/a"]));
        }
        assert!(list.is_empty());
        assert!(!listeners.wants(&StateEvent::Resources(event(&["/p/a"]))));
    }

    #[test]
    fn empty_events_are_not_wanted() {
        let listeners = Listeners::new();
        listeners
            .resource_states
            .add(Arc::new(Counting::default()));
        assert!(!listeners.wants(&StateEvent::Resources(event(&[]))));
        assert!(listeners.wants(&StateEvent::Resources(event(&["/p/a"]))));
        let project = StateEvent::Project(ProjectStatesChangedEvent {
            project: Resource::project("p"),
            state: ProjectState::Closed,
        });
        assert!(!listeners.wants(&project));
    }

    #[test]
    fn events_merge_into_union() {
        let mut a = StateEvent::Resources(event(&["/p/a", "/p/b"]));
        let b = StateEvent::Resources(event(&["/p/b", "/p/c"]));
        assert!(a.can_merge(&b));
        a.merge(b);
        let StateEvent::Resources(merged) = a else {
            panic!("variant changed");
        };
        assert_eq!(merged.size(), 3);

        let deep = StateEvent::Resources(ResourceStatesChangedEvent::changed(
            vec![Resource::file("/p/a")],
            Depth::Infinite,
        ));
        assert!(!StateEvent::Resources(event(&["/p/a"])).can_merge(&deep));
    }

    #[test]
    fn contains_respects_depth() {
        let deep = ResourceStatesChangedEvent::changed(vec![Resource::folder("/p/a")], Depth::Infinite);
        assert!(deep.contains(&Resource::file("/p/a/b/c")));
        let shallow = ResourceStatesChangedEvent::changed(vec![Resource::folder("/p/a")], Depth::One);
        assert!(shallow.contains(&Resource::file("/p/a/b")));
        assert!(!shallow.contains(&Resource::file("/p/a/b/c")));
    }
}
