//! Loopback tests: a transfer server pushing updates to an update client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use devlink_protocol::{EnvVersion, LaunchOptions, PackageKind, UpdateManifest};
use devlink_transfer_server::{
    ClientHandle as ServerClient, Handler, HandlerFuture, ServerConfig, TransferServer,
    pack_directory,
};
use devlink_update_client::{
    ClientConfig, ClientEvent, ConnectionState, MemoryVersionStore, NoticeKind, PackageLayout,
    UpdateClient, VersionStore,
};

/// Pushes one prepared update whenever a client reports a different version.
struct Pusher {
    app_id: String,
    version: String,
    app_payload: Vec<u8>,
    sdk_payload: Vec<u8>,
    replies: mpsc::UnboundedSender<String>,
}

impl Handler for Pusher {
    fn on_client_connected(&self, client: ServerClient) -> HandlerFuture<'_> {
        Box::pin(async move {
            client.send_version_check(&self.app_id).unwrap();
        })
    }

    fn on_version_reply(&self, client: ServerClient, version: String) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = self.replies.send(version.clone());
            if version == self.version {
                return;
            }
            let manifest = UpdateManifest {
                app_id: self.app_id.clone(),
                files: vec!["app".into(), "sdk".into()],
                version: self.version.clone(),
                launch_options: Some(LaunchOptions {
                    page: Some("pages/index".into()),
                    ..LaunchOptions::default()
                }),
            };
            client.send_manifest(&manifest).unwrap();
            client
                .send_file_payload(&self.app_id, &self.version, PackageKind::App, &self.app_payload)
                .unwrap();
            client
                .send_file_payload(&self.app_id, &self.version, PackageKind::Sdk, &self.sdk_payload)
                .unwrap();
        })
    }
}

fn bundle(dir: &Path, files: &[(&str, &str)]) -> Vec<u8> {
    for (path, content) in files {
        let path = dir.join(path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
    pack_directory(dir).unwrap()
}

struct Harness {
    server: Arc<TransferServer<Pusher>>,
    replies: mpsc::UnboundedReceiver<String>,
    port: u16,
    root: tempfile::TempDir,
}

async fn start_server(version: &str) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let app_payload = bundle(
        &root.path().join("src-app"),
        &[("app.js", "App()"), ("pages/index.js", "Page()")],
    );
    let sdk_payload = bundle(&root.path().join("src-sdk"), &[("runtime.js", "rt")]);

    let (replies_tx, replies) = mpsc::unbounded_channel();
    let server = TransferServer::new(
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
        },
        Pusher {
            app_id: "a1".into(),
            version: version.into(),
            app_payload,
            sdk_payload,
            replies: replies_tx,
        },
    );
    let runner = Arc::clone(&server);
    tokio::spawn(async move {
        runner.run().await.unwrap();
    });

    let mut port = 0;
    for _ in 0..100 {
        port = server.port().await;
        if port != 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_ne!(port, 0, "server did not bind");

    Harness {
        server,
        replies,
        port,
        root,
    }
}

/// A store that already holds the version the server pushes, so the
/// server only ever sees version replies.
fn up_to_date_store() -> Arc<MemoryVersionStore> {
    let versions = Arc::new(MemoryVersionStore::new());
    versions
        .set_local_version("a1", EnvVersion::Develop, "v1")
        .unwrap();
    versions
}

fn client_config(port: u16) -> ClientConfig {
    ClientConfig {
        use_dev_server: true,
        port,
        reconnect_step: Duration::from_millis(20),
        ..ClientConfig::default()
    }
}

async fn wait_for<F>(events: &mut mpsc::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    let wait = async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if pred(&event) {
                return event;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

#[tokio::test]
async fn outdated_client_receives_and_installs_update() {
    let mut h = start_server("v2").await;
    let versions = Arc::new(MemoryVersionStore::new());
    versions
        .set_local_version("a1", EnvVersion::Develop, "v1")
        .unwrap();

    let device = h.root.path().join("device");
    let layout = PackageLayout::new(device.join("sdk"), device.join("apps"));
    let (client, handle, mut events) =
        UpdateClient::new(client_config(h.port), layout, versions.clone());
    tokio::spawn(client.run());
    handle.connect().await;

    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));

    let reload = wait_for(&mut events, |e| matches!(e, ClientEvent::Notice(_))).await;
    match reload {
        ClientEvent::Notice(notice) => {
            assert_eq!(notice.kind, NoticeKind::Success);
            assert_eq!(notice.message, "DEV_RELOAD");
        }
        other => panic!("unexpected event {other:?}"),
    }
    match wait_for(&mut events, |e| matches!(e, ClientEvent::AppUpdated { .. })).await {
        ClientEvent::AppUpdated {
            app_id,
            launch_options,
        } => {
            assert_eq!(app_id, "a1");
            assert_eq!(launch_options.unwrap().page.as_deref(), Some("pages/index"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    let app_dir = device.join("apps/a1/develop");
    assert_eq!(
        std::fs::read_to_string(app_dir.join("pages/index.js")).unwrap(),
        "Page()"
    );
    assert_eq!(
        std::fs::read_to_string(device.join("sdk/dev/runtime.js")).unwrap(),
        "rt"
    );
    assert_eq!(
        versions.local_version("a1", EnvVersion::Develop).as_deref(),
        Some("v2")
    );
    assert_eq!(handle.pending_count().await, 0);

    handle.shutdown().await;
    h.server.shutdown();
}

#[tokio::test]
async fn current_client_only_answers_version_check() {
    let mut h = start_server("v1").await;
    let versions = Arc::new(MemoryVersionStore::new());
    versions
        .set_local_version("a1", EnvVersion::Develop, "v1")
        .unwrap();

    let device = h.root.path().join("device");
    let layout = PackageLayout::new(device.join("sdk"), device.join("apps"));
    let (client, handle, mut events) = UpdateClient::new(client_config(h.port), layout, versions);
    tokio::spawn(client.run());
    handle.connect().await;

    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    let reply = tokio::time::timeout(Duration::from_secs(5), h.replies.recv())
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("v1"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.pending_count().await, 0);
    assert!(!device.join("apps").exists());

    handle.shutdown().await;
    h.server.shutdown();
}

#[tokio::test]
async fn reconnects_after_server_drops_the_connection() {
    let mut h = start_server("v1").await;
    let device = h.root.path().join("device");
    let layout = PackageLayout::new(device.join("sdk"), device.join("apps"));
    let (client, handle, mut events) =
        UpdateClient::new(client_config(h.port), layout, up_to_date_store());
    tokio::spawn(client.run());
    handle.connect().await;

    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));

    let first = h.server.clients().await;
    assert_eq!(first.len(), 1);
    assert!(h.server.disconnect(first[0].id()).await);

    match wait_for(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await {
        ClientEvent::Reconnecting { attempt, delay } => {
            assert_eq!(attempt, 1);
            assert_eq!(delay, Duration::ZERO);
        }
        other => panic!("unexpected event {other:?}"),
    }
    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;

    // The new connection gets its own version check.
    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));

    handle.shutdown().await;
    h.server.shutdown();
}

#[tokio::test]
async fn resume_reopens_an_open_connection() {
    let mut h = start_server("v1").await;
    let device = h.root.path().join("device");
    let layout = PackageLayout::new(device.join("sdk"), device.join("apps"));
    let (client, handle, mut events) =
        UpdateClient::new(client_config(h.port), layout, up_to_date_store());
    tokio::spawn(client.run());
    handle.connect().await;

    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));

    handle.resume().await;
    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Connecting)
    })
    .await;
    wait_for(&mut events, |e| {
        *e == ClientEvent::StateChanged(ConnectionState::Open)
    })
    .await;
    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));
    assert_eq!(handle.pending_count().await, 0);

    handle.shutdown().await;
    h.server.shutdown();
}

#[tokio::test]
async fn installed_version_is_reported_after_reconnect() {
    let mut h = start_server("v1").await;
    let device = h.root.path().join("device");
    let layout = PackageLayout::new(device.join("sdk"), device.join("apps"));
    let (client, handle, mut events) = UpdateClient::new(
        client_config(h.port),
        layout,
        Arc::new(MemoryVersionStore::new()),
    );
    tokio::spawn(client.run());
    handle.connect().await;

    assert_eq!(h.replies.recv().await.as_deref(), Some(""));
    wait_for(&mut events, |e| matches!(e, ClientEvent::AppUpdated { .. })).await;

    let first = h.server.clients().await;
    assert!(h.server.disconnect(first[0].id()).await);

    assert_eq!(h.replies.recv().await.as_deref(), Some("v1"));

    handle.shutdown().await;
    h.server.shutdown();
}
