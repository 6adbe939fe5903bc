//! Per-application update state machine.
//!
//! An `--UPDATE--` manifest opens (or replaces) a pending update for an
//! app. Each matching file frame unpacks one package and crosses it off
//! the manifest; when nothing is left the completion is handed to the
//! main context together with the still-held guard, which is released
//! there once the host has been told.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use devlink_protocol::constants::RELOAD_NOTICE;
use devlink_protocol::{EnvVersion, FileHeader, LaunchOptions, PackageKind, UpdateManifest};

use crate::layout::PackageLayout;
use crate::types::{ClientEvent, Notice};
use crate::unpack::overlay_unpack;
use crate::versions::VersionStore;

/// Pending manifests keyed by app id.
pub(crate) type PendingUpdates = HashMap<String, UpdateManifest>;

/// Work the receive context hands to the main context.
pub(crate) enum MainCall {
    Notify(Notice),
    Complete(Completion),
}

/// A finished update waiting for the main context.
///
/// Owns the pending-updates guard; file frames for any app wait until
/// [`Completion::finish`] has run.
pub(crate) struct Completion {
    pending: OwnedMutexGuard<PendingUpdates>,
    app_id: String,
    launch_options: Option<LaunchOptions>,
}

impl Completion {
    /// Announces the update, clears the pending entry and releases the guard.
    ///
    /// `AppUpdated` waits for room in the event queue instead of being
    /// dropped; it is only lost once the host has stopped listening.
    pub(crate) async fn finish(mut self, events: &mpsc::Sender<ClientEvent>) {
        emit(events, ClientEvent::Notice(Notice::success(RELOAD_NOTICE)));
        self.pending.remove(&self.app_id);
        info!(app = %self.app_id, "app update complete");
        let updated = ClientEvent::AppUpdated {
            app_id: self.app_id.clone(),
            launch_options: self.launch_options.take(),
        };
        if events.send(updated).await.is_err() {
            warn!(app = %self.app_id, "host stopped listening before the update was announced");
        }
    }

    /// Clears the pending entry without telling anyone. Used when the
    /// main context is gone.
    fn abandon(mut self) {
        self.pending.remove(&self.app_id);
    }
}

pub(crate) fn emit(events: &mpsc::Sender<ClientEvent>, event: ClientEvent) {
    if let Err(e) = events.try_send(event) {
        warn!("failed to deliver client event: {e}");
    }
}

/// Result of installing one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum InstallOutcome {
    /// Unpacked; this many packages are still owed.
    Pending { remaining: usize },
    /// Unpacked and the manifest is now empty.
    Completed,
    /// Unpacked, but the manifest was replaced or removed meanwhile.
    Stale,
    /// Unpack failed; the manifest is untouched.
    Failed,
}

/// The update state machine shared by the receive context and the
/// file-install tasks.
#[derive(Clone)]
pub(crate) struct Updater {
    pending: Arc<Mutex<PendingUpdates>>,
    layout: Arc<PackageLayout>,
    versions: Arc<dyn VersionStore>,
    main_tx: mpsc::Sender<MainCall>,
}

impl Updater {
    pub(crate) fn new(
        layout: PackageLayout,
        versions: Arc<dyn VersionStore>,
        main_tx: mpsc::Sender<MainCall>,
    ) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            layout: Arc::new(layout),
            versions,
            main_tx,
        }
    }

    /// The recorded development version of an app, empty if unknown.
    pub(crate) fn local_version(&self, app_id: &str) -> String {
        self.versions
            .local_version(app_id, EnvVersion::Develop)
            .unwrap_or_default()
    }

    /// Records the manifest's version and makes it the pending update for
    /// its app, replacing any earlier one.
    pub(crate) async fn apply_manifest(&self, manifest: UpdateManifest) {
        let versions = Arc::clone(&self.versions);
        let app_id = manifest.app_id.clone();
        let version = manifest.version.clone();
        let recorded = tokio::task::spawn_blocking(move || {
            versions.set_local_version(&app_id, EnvVersion::Develop, &version)
        })
        .await;
        match recorded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(app = %manifest.app_id, "failed to record version: {e}"),
            Err(e) => warn!(app = %manifest.app_id, "version store task failed: {e}"),
        }

        info!(
            app = %manifest.app_id,
            version = %manifest.version,
            files = ?manifest.files,
            "update announced"
        );
        let mut pending = self.pending.lock().await;
        if pending.insert(manifest.app_id.clone(), manifest).is_some() {
            debug!("replaced previous pending manifest");
        }
    }

    /// Checks a file frame against the pending manifest.
    ///
    /// Returns `None` for unsolicited, stale or unknown-package frames;
    /// these are dropped without telling the user.
    pub(crate) async fn accept_file(&self, header: FileHeader, body: &[u8]) -> Option<FileJob> {
        let pending = self.pending.lock().await;
        let Some(manifest) = pending.get(&header.app_id) else {
            debug!(app = %header.app_id, "no pending update, dropping file frame");
            return None;
        };
        if manifest.version != header.version {
            debug!(
                app = %header.app_id,
                expected = %manifest.version,
                got = %header.version,
                "stale file frame"
            );
            return None;
        }
        let Some(kind) = PackageKind::parse(&header.package) else {
            debug!(package = %header.package, "unknown package kind");
            return None;
        };
        let Some(dest) = self.layout.destination(kind, &header.app_id) else {
            debug!(app = %header.app_id, "app id is not a valid directory name");
            return None;
        };
        drop(pending);

        Some(FileJob {
            updater: self.clone(),
            header,
            kind,
            dest,
            body: body.to_vec(),
        })
    }

    pub(crate) async fn pending(&self, app_id: &str) -> Option<UpdateManifest> {
        self.pending.lock().await.get(app_id).cloned()
    }

    pub(crate) async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn notify(&self, notice: Notice) {
        if self.main_tx.send(MainCall::Notify(notice)).await.is_err() {
            warn!("main context gone, notice dropped");
        }
    }
}

/// One accepted package waiting to be unpacked.
pub(crate) struct FileJob {
    updater: Updater,
    header: FileHeader,
    kind: PackageKind,
    dest: PathBuf,
    body: Vec<u8>,
}

impl FileJob {
    /// Unpacks the package and advances the manifest.
    ///
    /// The guard is not held during the unpack, so packages for different
    /// apps install concurrently.
    pub(crate) async fn run(self) -> InstallOutcome {
        let FileJob {
            updater,
            header,
            kind,
            dest,
            body,
        } = self;

        debug!(
            app = %header.app_id,
            package = %kind,
            dest = %dest.display(),
            bytes = body.len(),
            "installing package"
        );
        let worker_dest = dest.clone();
        let result = tokio::task::spawn_blocking(move || overlay_unpack(&body, &worker_dest))
            .await
            .map_err(crate::UpdateError::from)
            .and_then(|r| r);

        if let Err(e) = result {
            warn!(app = %header.app_id, package = %kind, "install failed: {e}");
            updater.notify(Notice::failure(e.to_string())).await;
            return InstallOutcome::Failed;
        }

        let mut pending = Arc::clone(&updater.pending).lock_owned().await;
        let Some(manifest) = pending.get_mut(&header.app_id) else {
            debug!(app = %header.app_id, "update finished or withdrawn during install");
            return InstallOutcome::Stale;
        };
        if manifest.version != header.version {
            debug!(app = %header.app_id, "manifest replaced during install");
            return InstallOutcome::Stale;
        }

        if !manifest.consume(&header.package) || !manifest.is_complete() {
            let remaining = manifest.files.len();
            debug!(app = %header.app_id, package = %kind, remaining, "package installed");
            return InstallOutcome::Pending { remaining };
        }

        let launch_options = manifest.launch_options.clone();
        let completion = Completion {
            pending,
            app_id: header.app_id,
            launch_options,
        };
        if let Err(mpsc::error::SendError(call)) =
            updater.main_tx.send(MainCall::Complete(completion)).await
        {
            warn!("main context gone, completing without notification");
            if let MainCall::Complete(completion) = call {
                completion.abandon();
            }
        }
        InstallOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::types::{ConnectionState, NoticeKind};
    use crate::unpack::zip_archive;
    use crate::versions::MemoryVersionStore;

    struct Fixture {
        updater: Updater,
        main_rx: mpsc::Receiver<MainCall>,
        versions: Arc<MemoryVersionStore>,
        _root: tempfile::TempDir,
        layout: PackageLayout,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let layout = PackageLayout::new(root.path().join("sdk"), root.path().join("apps"));
        let versions = Arc::new(MemoryVersionStore::new());
        let (main_tx, main_rx) = mpsc::channel(16);
        let updater = Updater::new(layout.clone(), versions.clone(), main_tx);
        Fixture {
            updater,
            main_rx,
            versions,
            _root: root,
            layout,
        }
    }

    fn manifest(app_id: &str, version: &str, files: &[&str]) -> UpdateManifest {
        UpdateManifest {
            app_id: app_id.into(),
            files: files.iter().map(|f| f.to_string()).collect(),
            version: version.into(),
            launch_options: None,
        }
    }

    fn file(app_id: &str, version: &str, package: &str) -> FileHeader {
        FileHeader {
            app_id: app_id.into(),
            version: version.into(),
            package: package.into(),
        }
    }

    fn archive(name: &str, content: &str) -> Vec<u8> {
        zip_archive(&[(name, content)])
    }

    async fn install(f: &Fixture, header: FileHeader, body: &[u8]) -> Option<InstallOutcome> {
        let job = f.updater.accept_file(header, body).await?;
        Some(job.run().await)
    }

    #[tokio::test]
    async fn manifest_records_version_and_replaces() {
        let f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        f.updater
            .apply_manifest(manifest("a1", "v2", &["app", "sdk"]))
            .await;

        let pending = f.updater.pending("a1").await.unwrap();
        assert_eq!(pending.version, "v2");
        assert_eq!(pending.files, vec!["app", "sdk"]);
        assert_eq!(f.updater.pending_count().await, 1);
        assert_eq!(
            f.versions.local_version("a1", EnvVersion::Develop).as_deref(),
            Some("v2")
        );
        assert_eq!(f.updater.local_version("a1"), "v2");
        assert_eq!(f.updater.local_version("unknown"), "");
    }

    #[tokio::test]
    async fn unwritable_version_record_still_opens_the_update() {
        let root = tempfile::tempdir().unwrap();
        let state = root.path().join("state");
        let versions = Arc::new(
            crate::versions::JsonVersionStore::open(state.join("versions.json")).unwrap(),
        );
        std::fs::write(&state, "blocked").unwrap();

        let layout = PackageLayout::new(root.path().join("sdk"), root.path().join("apps"));
        let (main_tx, _main_rx) = mpsc::channel(16);
        let updater = Updater::new(layout, versions, main_tx);
        updater.apply_manifest(manifest("a1", "v1", &["app"])).await;

        assert_eq!(updater.pending("a1").await.unwrap().version, "v1");
        assert_eq!(updater.local_version("a1"), "");
    }

    #[tokio::test]
    async fn first_package_leaves_update_pending() {
        let mut f = fixture();
        f.updater
            .apply_manifest(manifest("a1", "v1", &["app", "sdk"]))
            .await;

        let outcome = install(&f, file("a1", "v1", "app"), &archive("index.js", "x")).await;
        assert_eq!(outcome, Some(InstallOutcome::Pending { remaining: 1 }));
        assert_eq!(f.updater.pending("a1").await.unwrap().files, vec!["sdk"]);
        assert!(f.main_rx.try_recv().is_err(), "no completion yet");

        let app_dir = f.layout.destination(PackageKind::App, "a1").unwrap();
        assert_eq!(
            std::fs::read_to_string(app_dir.join("index.js")).unwrap(),
            "x"
        );
    }

    #[tokio::test]
    async fn last_package_completes_exactly_once() {
        let mut f = fixture();
        let mut m = manifest("a1", "v1", &["app", "sdk"]);
        m.launch_options = Some(LaunchOptions {
            page: Some("pages/home".into()),
            ..LaunchOptions::default()
        });
        f.updater.apply_manifest(m).await;

        install(&f, file("a1", "v1", "app"), &archive("index.js", "x")).await;
        let outcome = install(&f, file("a1", "v1", "sdk"), &archive("sdk.js", "y")).await;
        assert_eq!(outcome, Some(InstallOutcome::Completed));

        let sdk_dir = f.layout.destination(PackageKind::Sdk, "a1").unwrap();
        assert!(sdk_dir.join("sdk.js").exists());

        let (events_tx, mut events_rx) = mpsc::channel(8);
        match f.main_rx.recv().await.unwrap() {
            MainCall::Complete(completion) => completion.finish(&events_tx).await,
            MainCall::Notify(n) => panic!("unexpected notice {n:?}"),
        }

        assert_eq!(
            events_rx.recv().await.unwrap(),
            ClientEvent::Notice(Notice::success("DEV_RELOAD"))
        );
        match events_rx.recv().await.unwrap() {
            ClientEvent::AppUpdated {
                app_id,
                launch_options,
            } => {
                assert_eq!(app_id, "a1");
                assert_eq!(launch_options.unwrap().page.as_deref(), Some("pages/home"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(events_rx.try_recv().is_err());
        assert!(f.updater.pending("a1").await.is_none());

        // A late duplicate finds nothing pending.
        assert_eq!(
            install(&f, file("a1", "v1", "sdk"), &archive("sdk.js", "y")).await,
            None
        );
        assert!(f.main_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn guard_held_until_main_context_finishes() {
        let mut f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        install(&f, file("a1", "v1", "app"), &archive("index.js", "x")).await;

        let call = f.main_rx.recv().await.unwrap();

        // The completion still owns the guard.
        let updater = f.updater.clone();
        let waiting = tokio::spawn(async move { updater.pending_count().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        let (events_tx, _events_rx) = mpsc::channel(8);
        match call {
            MainCall::Complete(completion) => completion.finish(&events_tx).await,
            MainCall::Notify(_) => panic!("expected completion"),
        }
        assert_eq!(waiting.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn app_updated_survives_a_full_event_queue() {
        let mut f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        install(&f, file("a1", "v1", "app"), &archive("index.js", "x")).await;
        let completion = match f.main_rx.recv().await.unwrap() {
            MainCall::Complete(completion) => completion,
            MainCall::Notify(n) => panic!("unexpected notice {n:?}"),
        };

        // The host has not read anything yet and the queue is full.
        let (events_tx, mut events_rx) = mpsc::channel(1);
        events_tx
            .try_send(ClientEvent::StateChanged(ConnectionState::Open))
            .unwrap();
        let finishing = tokio::spawn(async move { completion.finish(&events_tx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!finishing.is_finished(), "must wait for room, not drop");

        let drained = async {
            loop {
                if let ClientEvent::AppUpdated { app_id, .. } = events_rx.recv().await.unwrap() {
                    return app_id;
                }
            }
        };
        let app_id = tokio::time::timeout(Duration::from_secs(2), drained)
            .await
            .expect("AppUpdated must be delivered");
        assert_eq!(app_id, "a1");
        finishing.await.unwrap();
        assert!(f.updater.pending("a1").await.is_none());
    }

    #[tokio::test]
    async fn finish_without_listener_still_clears_pending() {
        let mut f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        install(&f, file("a1", "v1", "app"), &archive("index.js", "x")).await;

        let (events_tx, events_rx) = mpsc::channel(1);
        drop(events_rx);
        match f.main_rx.recv().await.unwrap() {
            MainCall::Complete(completion) => completion.finish(&events_tx).await,
            MainCall::Notify(n) => panic!("unexpected notice {n:?}"),
        }
        assert_eq!(f.updater.pending_count().await, 0);
    }

    #[tokio::test]
    async fn wrong_version_is_dropped_without_io() {
        let f = fixture();
        f.updater
            .apply_manifest(manifest("a1", "v1", &["app", "sdk"]))
            .await;

        let outcome = install(&f, file("a1", "v0", "app"), &archive("index.js", "x")).await;
        assert_eq!(outcome, None);
        assert_eq!(
            f.updater.pending("a1").await.unwrap().files,
            vec!["app", "sdk"]
        );
        let app_dir = f.layout.destination(PackageKind::App, "a1").unwrap();
        assert!(!app_dir.exists());
    }

    #[tokio::test]
    async fn unsolicited_and_unknown_packages_are_dropped() {
        let f = fixture();
        assert_eq!(
            install(&f, file("a1", "v1", "app"), &archive("a", "b")).await,
            None
        );

        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        assert_eq!(
            install(&f, file("a1", "v1", "assets"), &archive("a", "b")).await,
            None
        );
        assert_eq!(f.updater.pending("a1").await.unwrap().files, vec!["app"]);
    }

    #[tokio::test]
    async fn path_like_app_id_is_dropped() {
        let f = fixture();
        f.updater
            .apply_manifest(manifest("../escape", "v1", &["app"]))
            .await;
        assert_eq!(
            install(&f, file("../escape", "v1", "app"), &archive("a", "b")).await,
            None
        );
    }

    #[tokio::test]
    async fn duplicate_entries_consumed_one_per_frame() {
        let f = fixture();
        f.updater
            .apply_manifest(manifest("a1", "v1", &["app", "app"]))
            .await;

        let first = install(&f, file("a1", "v1", "app"), &archive("a", "1")).await;
        assert_eq!(first, Some(InstallOutcome::Pending { remaining: 1 }));
        let second = install(&f, file("a1", "v1", "app"), &archive("a", "2")).await;
        assert_eq!(second, Some(InstallOutcome::Completed));
    }

    #[tokio::test]
    async fn unlisted_package_installs_without_advancing() {
        let f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;

        let outcome = install(&f, file("a1", "v1", "sdk"), &archive("sdk.js", "y")).await;
        assert_eq!(outcome, Some(InstallOutcome::Pending { remaining: 1 }));
    }

    #[tokio::test]
    async fn unpack_failure_notifies_and_stays_pending() {
        let root = tempfile::tempdir().unwrap();
        let apps_root = root.path().join("apps");
        std::fs::write(&apps_root, "not a directory").unwrap();
        let layout = PackageLayout::new(root.path().join("sdk"), apps_root);
        let (main_tx, mut main_rx) = mpsc::channel(16);
        let updater = Updater::new(layout, Arc::new(MemoryVersionStore::new()), main_tx);

        updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        let job = updater
            .accept_file(file("a1", "v1", "app"), &archive("a", "b"))
            .await
            .unwrap();
        assert_eq!(job.run().await, InstallOutcome::Failed);

        match main_rx.recv().await.unwrap() {
            MainCall::Notify(notice) => {
                assert_eq!(notice.kind, NoticeKind::Failure);
                assert!(!notice.message.is_empty());
            }
            MainCall::Complete(_) => panic!("must not complete"),
        }
        assert_eq!(updater.pending("a1").await.unwrap().files, vec!["app"]);
    }

    #[tokio::test]
    async fn manifest_replaced_during_install_is_stale() {
        let f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        let job = f
            .updater
            .accept_file(file("a1", "v1", "app"), &archive("a", "b"))
            .await
            .unwrap();

        f.updater.apply_manifest(manifest("a1", "v2", &["app"])).await;
        assert_eq!(job.run().await, InstallOutcome::Stale);
        assert_eq!(f.updater.pending("a1").await.unwrap().version, "v2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn different_apps_install_concurrently() {
        let mut f = fixture();
        f.updater.apply_manifest(manifest("a1", "v1", &["app"])).await;
        f.updater.apply_manifest(manifest("a2", "v1", &["app"])).await;

        let job1 = f
            .updater
            .accept_file(file("a1", "v1", "app"), &archive("a", "1"))
            .await
            .unwrap();
        let job2 = f
            .updater
            .accept_file(file("a2", "v1", "app"), &archive("a", "2"))
            .await
            .unwrap();

        // Holding the guard must not stop either unpack; only the final
        // bookkeeping waits for it.
        let guard = f.updater.pending.lock().await;
        let h1 = tokio::spawn(job1.run());
        let h2 = tokio::spawn(job2.run());

        let a1 = f.layout.destination(PackageKind::App, "a1").unwrap().join("a");
        let a2 = f.layout.destination(PackageKind::App, "a2").unwrap().join("a");
        let unpacked = async {
            while !(a1.exists() && a2.exists()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), unpacked)
            .await
            .expect("both unpacks should finish while the guard is held");
        drop(guard);

        let (events_tx, _events_rx) = mpsc::channel(8);
        for _ in 0..2 {
            match f.main_rx.recv().await.unwrap() {
                MainCall::Complete(completion) => completion.finish(&events_tx).await,
                MainCall::Notify(n) => panic!("unexpected notice {n:?}"),
            }
        }
        assert_eq!(h1.await.unwrap(), InstallOutcome::Completed);
        assert_eq!(h2.await.unwrap(), InstallOutcome::Completed);
    }
}
