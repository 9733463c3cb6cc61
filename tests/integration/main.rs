//! Integration tests for svncache

mod support {
    use std::collections::HashSet;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use svncache::config::{Config, WorkspaceConfig};
    use svncache::connector::{EntryInfo, EntryReference, NodeKind, RawStatus, StatusOptions, SvnDepth};
    use svncache::repository::RepositoryLocation;
    use svncache::{Connector, ConnectorError, FsWorkspace, StatusStorage};
    use tempfile::TempDir;

    /// Connector that answers from a fixed table of working copy entries
    #[derive(Default)]
    pub struct Scripted {
        entries: Mutex<Vec<RawStatus>>,
        unreachable: Mutex<HashSet<PathBuf>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        pub fn set(&self, entries: Vec<RawStatus>) {
            *self.entries.lock().unwrap() = entries;
        }

        pub fn replace(&self, entry: RawStatus) {
            let mut entries = self.entries.lock().unwrap();
            entries.retain(|e| e.path != entry.path);
            entries.push(entry);
        }

        pub fn unreachable(&self, path: impl Into<PathBuf>) {
            self.unreachable.lock().unwrap().insert(path.into());
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Connector for Scripted {
        fn status(
            &self,
            path: &Path,
            depth: SvnDepth,
            _: StatusOptions,
        ) -> Result<Vec<RawStatus>, ConnectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.unreachable.lock().unwrap().contains(path) {
                return Err(ConnectorError::Failed("connection refused".to_string()));
            }
            let entries = self.entries.lock().unwrap();
            let found: Vec<RawStatus> = entries
                .iter()
                .filter(|e| {
                    let child = e.path.parent() == Some(path);
                    match depth {
                        SvnDepth::Empty => e.path == path,
                        SvnDepth::Files => e.path == path || (child && e.node_kind == NodeKind::File),
                        SvnDepth::Immediates => e.path == path || child,
                        SvnDepth::Infinity => e.path.starts_with(path),
                    }
                })
                .cloned()
                .collect();
            if found.is_empty() {
                return Err(ConnectorError::NotWorkingCopy {
                    path: path.to_path_buf(),
                });
            }
            Ok(found)
        }

        fn info(&self, _: &EntryReference, _: SvnDepth) -> Result<Vec<EntryInfo>, ConnectorError> {
            Ok(Vec::new())
        }
    }

    pub struct Fixture {
        pub temp: TempDir,
        pub connector: Arc<Scripted>,
        pub storage: Arc<StatusStorage>,
    }

    impl Fixture {
        pub fn path(&self, relative: &str) -> PathBuf {
            if relative.is_empty() {
                self.temp.path().to_path_buf()
            } else {
                self.temp.path().join(relative)
            }
        }

        pub fn mkdir(&self, relative: &str) {
            fs::create_dir_all(self.path(relative)).unwrap();
        }

        pub fn touch(&self, relative: &str) {
            fs::write(self.path(relative), b"content").unwrap();
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            self.storage.shutdown();
        }
    }

    pub fn url(relative: &str) -> String {
        if relative.is_empty() {
            "http://h/r/trunk".to_string()
        } else {
            format!("http://h/r/trunk/{}", relative)
        }
    }

    /// Project "proj" checked out from http://h/r/trunk into a temp dir
    pub fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(".svn")).unwrap();

        let location = RepositoryLocation::new("main", "http://h/r", "http://h/r");
        let workspace = FsWorkspace::new(&WorkspaceConfig::default()).unwrap();
        workspace.add_project("proj", temp.path(), Some(location.as_container(url(""))));

        let connector = Arc::new(Scripted::default());
        let storage = StatusStorage::new(&Config::default(), connector.clone(), Arc::new(workspace)).unwrap();
        storage.add_location(location);
        Fixture {
            temp,
            connector,
            storage,
        }
    }
}

mod lookup_tests {
    use svncache::connector::{EntryStatus, NodeKind, RawStatus};
    use svncache::{ChangeMask, Depth, Resource, TextStatus};

    use crate::support::{fixture, url, Fixture};

    fn entry(fx: &Fixture, relative: &str, kind: NodeKind, status: EntryStatus) -> RawStatus {
        RawStatus::new(fx.path(relative), kind, status)
            .with_url(url(relative))
            .with_revision(5, 4)
    }

    fn modified_file_fixture() -> Fixture {
        let fx = fixture();
        fx.mkdir("a");
        fx.touch("a/b.txt");
        fx.connector.set(vec![
            entry(&fx, "", NodeKind::Dir, EntryStatus::Normal),
            entry(&fx, "a", NodeKind::Dir, EntryStatus::Normal),
            entry(&fx, "a/b.txt", NodeKind::File, EntryStatus::Modified),
        ]);
        fx
    }

    #[tokio::test]
    async fn children_are_served_from_cache_after_folder_lookup() {
        let fx = modified_file_fixture();
        fx.storage
            .refresh_local_resources(&[Resource::folder("/proj/a")], Depth::One)
            .unwrap();

        let folder = fx.storage.as_local_resource(&Resource::folder("/proj/a")).unwrap();
        assert_eq!(folder.status(), TextStatus::Normal);
        let calls = fx.connector.calls();

        let file = fx.storage.as_local_resource(&Resource::file("/proj/a/b.txt")).unwrap();
        assert_eq!(file.status(), TextStatus::Modified);
        assert_eq!(file.revision, 4);
        assert_eq!(fx.connector.calls(), calls);

        let dirty = fx
            .storage
            .as_local_resource_dirty(&Resource::file("/proj/a/b.txt"))
            .unwrap();
        assert_eq!(dirty, file);
    }

    #[tokio::test]
    async fn deep_refresh_reconciles_again() {
        let fx = modified_file_fixture();
        let file = Resource::file("/proj/a/b.txt");
        assert_eq!(fx.storage.as_local_resource(&file).unwrap().status(), TextStatus::Modified);

        fx.connector.replace(entry(&fx, "a/b.txt", NodeKind::File, EntryStatus::Normal));
        // Still cached
        assert_eq!(fx.storage.as_local_resource(&file).unwrap().status(), TextStatus::Modified);

        fx.storage
            .refresh_local_resources(&[Resource::folder("/proj/a"), file.clone()], Depth::Infinite)
            .unwrap();
        let calls = fx.connector.calls();
        assert_eq!(fx.storage.as_local_resource(&file).unwrap().status(), TextStatus::Normal);
        assert!(fx.connector.calls() > calls);
        fx.storage.wait_idle().await;
    }

    #[tokio::test]
    async fn dirty_lookup_of_unknown_resource_is_not_exists() {
        let fx = modified_file_fixture();
        let record = fx
            .storage
            .as_local_resource_dirty(&Resource::file("/proj/a/b.txt"))
            .unwrap();
        assert_eq!(record.status(), TextStatus::NotExists);
        assert_eq!(fx.connector.calls(), 0);
    }

    #[tokio::test]
    async fn unreachable_external_is_ignored() {
        let fx = fixture();
        fx.mkdir("ext");
        fx.connector.set(vec![
            entry(&fx, "", NodeKind::Dir, EntryStatus::Normal),
            RawStatus::new(fx.path("ext"), NodeKind::Dir, EntryStatus::External),
        ]);
        fx.connector.unreachable(fx.path("ext"));

        let project = fx.storage.as_local_resource(&Resource::project("proj")).unwrap();
        assert_eq!(project.status(), TextStatus::Normal);
        fx.storage.wait_idle().await;

        let ext = fx.storage.as_local_resource(&Resource::folder("/proj/ext")).unwrap();
        assert_eq!(ext.status(), TextStatus::Ignored);
        assert!(ext.change_mask.contains(ChangeMask::SVN_EXTERNALS));
        assert_eq!(ext.revision, -1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_subtree_is_not_queried() {
        let fx = fixture();
        let outside = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(outside.path().join("sub")).unwrap();
        std::fs::write(outside.path().join("sub/x.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), fx.path("link")).unwrap();
        fx.connector.set(vec![
            entry(&fx, "", NodeKind::Dir, EntryStatus::Normal),
            RawStatus::new(fx.path("link"), NodeKind::Unknown, EntryStatus::Unversioned),
        ]);

        fx.storage.as_local_resource(&Resource::project("proj")).unwrap();
        let link = fx.storage.as_local_resource(&Resource::folder("/proj/link")).unwrap();
        assert_eq!(link.status(), TextStatus::New);
        assert!(link.change_mask.contains(ChangeMask::SYMLINK));
        let calls = fx.connector.calls();

        let file = fx
            .storage
            .as_local_resource(&Resource::file("/proj/link/sub/x.txt"))
            .unwrap();
        assert_eq!(file.status(), TextStatus::Ignored);
        assert!(file.change_mask.contains(ChangeMask::FORBIDDEN));
        assert_eq!(fx.connector.calls(), calls);
    }

    #[tokio::test]
    async fn registered_children_include_missing_nodes() {
        let fx = fixture();
        fx.mkdir("a");
        fx.connector.set(vec![
            entry(&fx, "", NodeKind::Dir, EntryStatus::Normal),
            entry(&fx, "a", NodeKind::Dir, EntryStatus::Normal),
            entry(&fx, "gone.txt", NodeKind::File, EntryStatus::Missing),
        ]);

        let children = fx.storage.registered_children(&Resource::project("proj")).unwrap();
        assert!(children.contains(&Resource::folder("/proj/a")));
        assert!(children.contains(&Resource::file("/proj/gone.txt")));
        assert_eq!(
            fx.storage
                .as_local_resource_dirty(&Resource::file("/proj/gone.txt"))
                .unwrap()
                .status(),
            TextStatus::Missing
        );
        fx.storage.wait_idle().await;
    }

    #[tokio::test]
    async fn unknown_project_is_inaccessible() {
        let fx = fixture();
        let err = fx
            .storage
            .as_local_resource_accessible(&Resource::folder("/nowhere/a"))
            .unwrap_err();
        assert!(err.is_unreportable());
        assert_eq!(fx.connector.calls(), 0);
    }

    #[tokio::test]
    async fn disabled_cache_reconciles_every_lookup() {
        let fx = modified_file_fixture();
        fx.storage.set_cache_enabled(false);
        let file = Resource::file("/proj/a/b.txt");

        assert_eq!(fx.storage.as_local_resource(&file).unwrap().status(), TextStatus::Modified);
        let calls = fx.connector.calls();
        assert_eq!(fx.storage.as_local_resource(&file).unwrap().status(), TextStatus::Modified);
        assert!(fx.connector.calls() > calls);
    }
}

mod event_tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use svncache::connector::{EntryStatus, NodeKind, RawStatus};
    use svncache::events::{ResourceStatesChangedEvent, ResourceStatesListener};
    use svncache::{Depth, Resource};

    use crate::support::{fixture, url};

    /// Records events; blocks on the first event for `/proj/blocker` until opened
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ResourceStatesChangedEvent>>,
        open: AtomicBool,
    }

    impl ResourceStatesListener for Recorder {
        fn resources_state_changed(&self, event: &ResourceStatesChangedEvent) {
            self.events.lock().unwrap().push(event.clone());
            if event.resources.contains(&Resource::folder("/proj/blocker")) {
                for _ in 0..400 {
                    if self.open.load(Ordering::SeqCst) {
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn queued_events_merge_into_one_dispatch() {
        let fx = fixture();
        let recorder = Arc::new(Recorder::default());
        fx.storage.add_resource_states_listener(recorder.clone());

        fx.storage
            .fire_resource_states_changed(ResourceStatesChangedEvent::changed(vec![Resource::folder("/proj/blocker")], Depth::Zero));
        tokio::time::sleep(Duration::from_millis(50)).await;

        fx.storage
            .fire_resource_states_changed(ResourceStatesChangedEvent::changed(vec![Resource::folder("/proj/a")], Depth::One));
        fx.storage
            .fire_resource_states_changed(ResourceStatesChangedEvent::changed(vec![Resource::folder("/proj/b")], Depth::One));
        recorder.open.store(true, Ordering::SeqCst);
        fx.storage.wait_idle().await;

        let events = recorder.events.lock().unwrap();
        let merged: Vec<_> = events
            .iter()
            .filter(|e| e.resources.contains(&Resource::folder("/proj/a")))
            .collect();
        assert_eq!(merged.len(), 1);
        assert!(merged[0].resources.contains(&Resource::folder("/proj/b")));
    }

    #[tokio::test]
    async fn events_without_listeners_are_dropped() {
        let fx = fixture();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn ResourceStatesListener> = recorder.clone();
        fx.storage.add_resource_states_listener(listener.clone());
        fx.storage.remove_resource_states_listener(&listener);

        fx.storage
            .fire_resource_states_changed(ResourceStatesChangedEvent::changed(vec![Resource::folder("/proj/a")], Depth::Zero));
        fx.storage.wait_idle().await;
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn database_change_triggers_refresh() {
        let fx = fixture();
        fx.connector
            .set(vec![RawStatus::new(fx.path(""), NodeKind::Dir, EntryStatus::Normal).with_url(url(""))]);
        std::fs::write(fx.path(".svn/wc.db"), b"sqlite").unwrap();

        fx.storage.as_local_resource(&Resource::project("proj")).unwrap();
        fx.storage.reset_external_changes_monitor().unwrap();
        assert!(fx.storage.check_for_external_changes().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(fx.path(".svn/wc.db"), b"sqlite, again").unwrap();
        let changed = fx.storage.check_for_external_changes().unwrap();
        assert_eq!(changed, vec![Resource::project("proj")]);

        let calls = fx.connector.calls();
        fx.storage.as_local_resource(&Resource::project("proj")).unwrap();
        assert!(fx.connector.calls() > calls);
    }
}

mod persistence_tests {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use svncache::repository::{RepositoryLocation, Revision};
    use svncache::connector::{EntryStatus, NodeKind};
    use svncache::storage::ChangeState;
    use svncache::{ChangeMask, Resource, TextStatus};

    use crate::support::{fixture, url};

    #[tokio::test]
    async fn legacy_change_record_is_read() {
        let fx = fixture();
        let path = fx.path("a.txt");
        let mask = ChangeMask::PROP_MODIFIED.bits();
        let record = format!(
            "false;{};12;Modified;carol;1000;1;12;null;null;{}",
            STANDARD.encode(path.to_string_lossy().as_bytes()),
            mask
        );

        let change = fx.storage.resource_change_from_bytes(record.as_bytes()).unwrap();
        assert_eq!(change.record.resource, Resource::file("/proj/a.txt"));
        assert_eq!(change.record.text_status, TextStatus::Normal);
        assert_eq!(change.record.prop_status, TextStatus::Modified);
        assert_eq!(change.record.author.as_deref(), Some("carol"));
        assert_eq!(change.originator, None);
    }

    #[tokio::test]
    async fn change_survives_storage_round_trip() {
        let fx = fixture();
        let mut state = ChangeState::new(fx.path("a.txt"), NodeKind::File, EntryStatus::Modified);
        state.change_revision = Some(9);
        state.author = Some("dave".to_string());
        state.comment = Some("fix; then test".to_string());
        let mut change = fx.storage.as_resource_change(&state, false).unwrap();
        change.peg_revision = Some(Revision::Number(7));
        change.originator = Some(
            RepositoryLocation::new("main", "http://h/r", "http://h/r").as_file(url("a.txt")),
        );

        let bytes = fx.storage.resource_change_as_bytes(&change);
        let decoded = fx.storage.resource_change_from_bytes(&bytes).unwrap();
        assert_eq!(decoded.record.resource, change.record.resource);
        assert_eq!(decoded.record.text_status, TextStatus::Modified);
        assert_eq!(decoded.comment.as_deref(), Some("fix; then test"));
        assert_eq!(decoded.effective_peg(), Revision::Number(7));
        assert_eq!(decoded.originator.map(|o| o.url), Some(url("a.txt")));
    }

    #[tokio::test]
    async fn originator_of_unknown_location_is_dropped() {
        let fx = fixture();
        let foreign = RepositoryLocation::new("elsewhere", "svn://x/y", "svn://x");
        let bytes = fx.storage.repository_resource_as_bytes(&foreign.as_container("svn://x/y/z"));
        assert_eq!(fx.storage.repository_resource_from_bytes(&bytes).unwrap(), None);

        fx.storage.add_location(foreign);
        let resource = fx.storage.repository_resource_from_bytes(&bytes).unwrap().unwrap();
        assert_eq!(resource.url, "svn://x/y/z");
        assert!(resource.is_container);
    }
}

mod open_tests {
    use std::sync::Arc;

    use svncache::config::ConfigManager;
    use svncache::connector::{EntryStatus, NodeKind, RawStatus};
    use svncache::repository::RepositoryLocation;
    use svncache::{Resource, StatusStorage, SvnCacheError, TextStatus};
    use tempfile::TempDir;

    use crate::support::{url, Scripted};

    #[tokio::test]
    async fn open_applies_config_file() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        tokio::fs::write(&config_path, "[cache]\nenabled = false\n").await.unwrap();
        let wc = temp.path().join("wc");
        std::fs::create_dir_all(wc.join(".svn")).unwrap();

        let connector = Arc::new(Scripted::default());
        connector.set(vec![RawStatus::new(&wc, NodeKind::Dir, EntryStatus::Added).with_url(url(""))]);
        let (storage, workspace) = StatusStorage::open(&ConfigManager::with_path(config_path), connector.clone())
            .await
            .unwrap();
        assert!(!storage.is_cache_enabled());

        let location = RepositoryLocation::new("main", "http://h/r", "http://h/r");
        workspace.add_project("proj", &wc, Some(location.as_container(url(""))));
        let record = storage.as_local_resource(&Resource::project("proj")).unwrap();
        assert_eq!(record.status(), TextStatus::Added);
        storage.shutdown();
    }

    #[tokio::test]
    async fn open_rejects_invalid_config() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        tokio::fs::write(&config_path, "[general]\nlog_format = \"xml\"\n").await.unwrap();

        let result = StatusStorage::open(&ConfigManager::with_path(config_path), Arc::new(Scripted::default())).await;
        assert!(matches!(result, Err(SvnCacheError::ConfigInvalid { .. })));
    }
}
