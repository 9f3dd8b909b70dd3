//! End-to-end tests of the remote-write protocol over a real gRPC server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio_stream::wrappers::TcpListenerStream;

use slipstream_core::{
    Column, ColumnKind, Compression, FileType, LocalSlice, Slice, SliceId, SliceKey, SyncConfig,
    SyncMode, VolumeId,
};
use slipstream_metadata::MemoryRegistry;
use slipstream_proto::slicefile::slice_file_client::SliceFileClient;
use slipstream_proto::slicefile::{SyncRequest, WriteRequest};
use slipstream_remote::{
    ConnectionManager, NetworkFileServer, RemoteSliceFile, ServerConfig, SliceMirror,
};
use slipstream_storage::{VolumeConfig, Volumes};

struct TestCluster {
    volumes: Arc<Volumes>,
    registry: Arc<MemoryRegistry>,
    server: Arc<NetworkFileServer>,
    manager: Arc<ConnectionManager>,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    serve_task: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl TestCluster {
    async fn start(server_config: ServerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let volume_dir = dir.path().join("hdd").join("1");
        tokio::fs::create_dir_all(&volume_dir).await.unwrap();
        tokio::fs::write(volume_dir.join(slipstream_storage::ID_FILE), "VOL_1")
            .await
            .unwrap();

        let volumes = Arc::new(
            Volumes::open(dir.path(), VolumeConfig::default())
                .await
                .unwrap(),
        );

        let registry = Arc::new(MemoryRegistry::new());
        let mirror = SliceMirror::start(
            registry.clone(),
            volumes.ids(),
        )
        .await
        .unwrap();

        let server = NetworkFileServer::new(volumes.clone(), mirror, server_config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let service = server.into_service();
        let serve_task = tokio::spawn(async move {
            tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        let manager = Arc::new(ConnectionManager::new("source-node-1"));
        manager.register_volume(VolumeId("VOL_1".to_string()), format!("http://{addr}"));

        Self {
            volumes,
            registry,
            server,
            manager,
            shutdown: Some(shutdown),
            serve_task,
            _dir: dir,
        }
    }

    fn register_slice(&self, hour: u32) -> Slice {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, hour, 0, 0).unwrap();
        let key = SliceKey {
            source_id: "my-source".into(),
            sink_id: "my-sink".into(),
            file_id: SliceId(at),
            volume_id: "VOL_1".into(),
            slice_id: SliceId(at),
        };
        let sync = SyncConfig {
            mode: SyncMode::Disk,
            wait: false,
            check_interval: Duration::from_millis(1),
            count_trigger: 10_000,
            bytes_trigger: 1024 * 1024,
            interval_trigger: Duration::from_secs(3600),
        };
        let slice = Slice {
            local: LocalSlice::for_key(&key, Compression::None, sync),
            key,
            file_type: FileType::Csv,
            columns: vec![Column::new("body", ColumnKind::Body)],
        };
        self.registry.put(slice.clone());
        slice
    }

    async fn stop(mut self) {
        self.server.terminate().await;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.serve_task.await;
        let _ = self.volumes.close().await;
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn remote_client_writes_into_the_local_file() {
    let cluster = TestCluster::start(ServerConfig::default()).await;
    let slice = cluster.register_slice(1);
    settle().await;

    let file = RemoteSliceFile::open(
        cluster.manager.clone(),
        slice.key.clone(),
        Some(Duration::from_secs(5)),
    )
    .await
    .unwrap();
    assert!(file.is_ready());

    assert_eq!(file.write(b"foo\n".to_vec()).await.unwrap(), 4);
    assert_eq!(file.write(b"bar\n".to_vec()).await.unwrap(), 4);
    file.sync().await.unwrap();

    // The bytes are durable on the serving node.
    let volume = cluster
        .volumes
        .volume(&VolumeId("VOL_1".to_string()))
        .unwrap();
    let file_path = volume
        .path()
        .join(&slice.local.dir)
        .join(&slice.local.filename);
    let content = tokio::fs::read_to_string(&file_path).await.unwrap();
    assert_eq!(content, "foo\nbar\n");

    file.close().await.unwrap();
    assert_eq!(cluster.server.open_handles(), 0);

    // The verbs refuse a closed file.
    assert!(file.write(b"late\n".to_vec()).await.is_err());
    assert!(matches!(
        file.close().await.unwrap_err(),
        slipstream_remote::Error::AlreadyClosed
    ));
    assert!(!file.is_ready());

    cluster.stop().await;
}

#[tokio::test]
async fn unknown_handle_is_a_per_call_error() {
    let cluster = TestCluster::start(ServerConfig::default()).await;
    cluster.register_slice(1);
    settle().await;

    let channel = cluster
        .manager
        .channel(&VolumeId("VOL_1".to_string()))
        .await
        .unwrap();
    let mut raw = SliceFileClient::new(channel);

    let status = raw
        .write(WriteRequest {
            file_id: 9999,
            data: b"x".to_vec(),
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);
    assert!(status.message().contains("disk writer 9999 not found"));

    let status = raw.sync(SyncRequest { file_id: 9999 }).await.unwrap_err();
    assert_eq!(status.code(), tonic::Code::NotFound);

    // The server is still healthy afterwards.
    let slice = cluster.register_slice(2);
    settle().await;
    let file = RemoteSliceFile::open(cluster.manager.clone(), slice.key.clone(), None)
        .await
        .unwrap();
    file.close().await.unwrap();

    cluster.stop().await;
}

#[tokio::test]
async fn open_of_an_unknown_slice_fails() {
    let cluster = TestCluster::start(ServerConfig::default()).await;

    let at = Utc.with_ymd_and_hms(2000, 1, 1, 1, 0, 0).unwrap();
    let key = SliceKey {
        source_id: "ghost".into(),
        sink_id: "ghost".into(),
        file_id: SliceId(at),
        volume_id: "VOL_1".into(),
        slice_id: SliceId(at),
    };

    let err = RemoteSliceFile::open(cluster.manager.clone(), key, None)
        .await
        .unwrap_err();
    let slipstream_remote::Error::Rpc { status, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(status.code(), tonic::Code::NotFound);

    cluster.stop().await;
}

#[tokio::test]
async fn duplicate_remote_open_is_rejected() {
    let cluster = TestCluster::start(ServerConfig::default()).await;
    let slice = cluster.register_slice(1);
    settle().await;

    let first = RemoteSliceFile::open(cluster.manager.clone(), slice.key.clone(), None)
        .await
        .unwrap();

    let err = RemoteSliceFile::open(cluster.manager.clone(), slice.key.clone(), None)
        .await
        .unwrap_err();
    let slipstream_remote::Error::Rpc { status, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(status.code(), tonic::Code::AlreadyExists);

    first.close().await.unwrap();
    cluster.stop().await;
}

#[tokio::test]
async fn terminate_force_closes_abandoned_handles() {
    let config = ServerConfig {
        shutdown_grace: Duration::from_millis(100),
        shutdown_poll: Duration::from_millis(10),
    };
    let cluster = TestCluster::start(config).await;
    let slice = cluster.register_slice(1);
    settle().await;

    let file = RemoteSliceFile::open(cluster.manager.clone(), slice.key.clone(), None)
        .await
        .unwrap();
    assert_eq!(cluster.server.open_handles(), 1);

    // The client never closes; the grace period expires and the server
    // force-closes the writer.
    cluster.server.terminate().await;
    assert_eq!(cluster.server.open_handles(), 0);

    let volume = cluster
        .volumes
        .volume(&VolumeId("VOL_1".to_string()))
        .unwrap();
    assert!(volume.writers().is_empty());

    // New opens are refused while terminating.
    let err = RemoteSliceFile::open(cluster.manager.clone(), slice.key.clone(), None)
        .await
        .unwrap_err();
    let slipstream_remote::Error::Rpc { status, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(status.code(), tonic::Code::Unavailable);

    drop(file);
    cluster.stop().await;
}
