//! Volume-level integration tests over real files.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use slipstream_core::{
    Column, ColumnKind, Compression, FileType, LocalSlice, Slice, SliceId, SliceKey, SyncConfig,
    SyncMode,
};
use slipstream_storage::volume::{Volume, VolumeSpec, DRAIN_FILE, LOCK_FILE};
use slipstream_storage::{Error, VolumeConfig, COMPLETED_COUNT_FILE};

fn slice_for_volume(volume_id: &str, opened_at_hour: u32) -> Slice {
    let at = Utc.with_ymd_and_hms(2000, 1, 1, opened_at_hour, 0, 0).unwrap();
    let key = SliceKey {
        source_id: "my-source".into(),
        sink_id: "my-sink".into(),
        file_id: SliceId(at),
        volume_id: volume_id.into(),
        slice_id: SliceId(at),
    };
    let sync = SyncConfig {
        mode: SyncMode::Disk,
        wait: false,
        check_interval: Duration::from_millis(1),
        count_trigger: 100,
        bytes_trigger: 1024 * 1024,
        interval_trigger: Duration::from_millis(20),
    };
    Slice {
        local: LocalSlice::for_key(&key, Compression::None, sync),
        key,
        file_type: FileType::Csv,
        columns: vec![
            Column::new("id", ColumnKind::Id),
            Column::new("body", ColumnKind::Body),
        ],
    }
}

async fn open_test_volume(dir: &std::path::Path) -> Arc<Volume> {
    let spec = VolumeSpec {
        path: dir.to_path_buf(),
        kind: "hdd".to_string(),
        label: "1".to_string(),
    };
    let events = slipstream_storage::Events::new();
    Volume::open(spec, VolumeConfig::default(), &events)
        .await
        .unwrap()
}

#[tokio::test]
async fn write_records_to_a_real_slice_file() {
    let dir = tempfile::tempdir().unwrap();
    let volume = open_test_volume(dir.path()).await;

    let slice = slice_for_volume(volume.id().as_str(), 1);
    let writer = volume.open_writer(&slice).await.unwrap();

    writer
        .write_record(Utc::now(), &[json!("1"), json!("first")])
        .await
        .unwrap();
    writer
        .write_record(Utc::now(), &[json!("2"), json!("second")])
        .await
        .unwrap();
    writer.close().await.unwrap();

    let content = std::fs::read_to_string(writer.file_path()).unwrap();
    assert_eq!(content, "1,first\n2,second\n");

    // Auxiliary backups sit next to the data file.
    let backup = std::fs::read_to_string(writer.dir_path().join(COMPLETED_COUNT_FILE)).unwrap();
    assert!(backup.starts_with("2,"));

    volume.close().await.unwrap();
}

#[tokio::test]
async fn duplicate_writer_for_the_same_slice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let volume = open_test_volume(dir.path()).await;
    let slice = slice_for_volume(volume.id().as_str(), 1);

    // Concurrent opens: exactly one may win the key.
    let (a, b) = tokio::join!(volume.open_writer(&slice), volume.open_writer(&slice));
    let (winner, loser_err) = match (a, b) {
        (Ok(winner), Err(err)) => (winner, err),
        (Err(err), Ok(winner)) => (winner, err),
        (Ok(_), Ok(_)) => panic!("both writers were opened for one slice"),
        (Err(a), Err(b)) => panic!("both opens failed: {a}; {b}"),
    };
    assert!(matches!(loser_err, Error::WriterAlreadyExists));

    // Closing the winner frees the key for a new writer.
    winner.close().await.unwrap();
    let reopened = volume.open_writer(&slice).await.unwrap();
    reopened.close().await.unwrap();

    volume.close().await.unwrap();
}

#[tokio::test]
async fn volume_close_closes_writers_and_releases_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let volume = open_test_volume(dir.path()).await;

    let writer_a = volume
        .open_writer(&slice_for_volume(volume.id().as_str(), 1))
        .await
        .unwrap();
    let writer_b = volume
        .open_writer(&slice_for_volume(volume.id().as_str(), 2))
        .await
        .unwrap();
    assert_eq!(volume.writers().len(), 2);

    writer_a
        .write_record(Utc::now(), &[json!("1"), json!("x")])
        .await
        .unwrap();

    assert!(dir.path().join(LOCK_FILE).exists());
    volume.close().await.unwrap();

    assert!(writer_a.is_closed());
    assert!(writer_b.is_closed());
    assert!(!dir.path().join(LOCK_FILE).exists());

    // The volume refuses new writers after close.
    let err = volume
        .open_writer(&slice_for_volume(volume.id().as_str(), 3))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VolumeClosed(_)));
}

#[tokio::test]
async fn second_process_cannot_claim_a_locked_volume() {
    let dir = tempfile::tempdir().unwrap();
    let volume = open_test_volume(dir.path()).await;

    let spec = VolumeSpec {
        path: dir.path().to_path_buf(),
        kind: "hdd".to_string(),
        label: "1".to_string(),
    };
    let events = slipstream_storage::Events::new();
    let err = Volume::open(spec, VolumeConfig::default(), &events)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already locked"), "{err}");

    volume.close().await.unwrap();
}

#[tokio::test]
async fn drain_marker_blocks_open_and_flips_the_live_flag() {
    let dir = tempfile::tempdir().unwrap();

    // A present drain marker refuses the open outright.
    std::fs::write(dir.path().join(DRAIN_FILE), b"").unwrap();
    let spec = VolumeSpec {
        path: dir.path().to_path_buf(),
        kind: "hdd".to_string(),
        label: "1".to_string(),
    };
    let events = slipstream_storage::Events::new();
    let err = Volume::open(spec, VolumeConfig::default(), &events)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::VolumeDrained(_)));
    std::fs::remove_file(dir.path().join(DRAIN_FILE)).unwrap();

    // Open with a fast drain poll; the flag follows the marker.
    let spec = VolumeSpec {
        path: dir.path().to_path_buf(),
        kind: "hdd".to_string(),
        label: "1".to_string(),
    };
    let config = VolumeConfig {
        drain_poll_interval: Duration::from_millis(10),
        ..VolumeConfig::default()
    };
    let events = slipstream_storage::Events::new();
    let volume = Volume::open(spec, config, &events).await.unwrap();
    assert!(!volume.drained());

    std::fs::write(dir.path().join(DRAIN_FILE), b"").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(volume.drained());

    std::fs::remove_file(dir.path().join(DRAIN_FILE)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!volume.drained());

    volume.close().await.unwrap();
}

#[tokio::test]
async fn closed_writer_is_removed_from_the_volume_set() {
    let dir = tempfile::tempdir().unwrap();
    let volume = open_test_volume(dir.path()).await;

    let writer = volume
        .open_writer(&slice_for_volume(volume.id().as_str(), 1))
        .await
        .unwrap();
    assert_eq!(volume.writers().len(), 1);

    writer.close().await.unwrap();
    assert_eq!(volume.writers().len(), 0);

    volume.close().await.unwrap();
}

#[tokio::test]
async fn pre_allocation_failure_is_not_fatal() {
    struct FailingAllocator;

    impl slipstream_storage::alloc::Allocator for FailingAllocator {
        fn allocate(
            &self,
            _file: &dyn slipstream_storage::ChainFile,
            _size: u64,
        ) -> std::io::Result<bool> {
            Err(std::io::Error::other("allocation refused"))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let spec = VolumeSpec {
        path: dir.path().to_path_buf(),
        kind: "hdd".to_string(),
        label: "1".to_string(),
    };
    let config = VolumeConfig {
        allocator: Arc::new(FailingAllocator),
        ..VolumeConfig::default()
    };
    let events = slipstream_storage::Events::new();
    let volume = Volume::open(spec, config, &events).await.unwrap();

    let mut slice = slice_for_volume(volume.id().as_str(), 1);
    slice.local.allocate_space = 1024 * 1024;

    // The writer opens and works although allocation failed.
    let writer = volume.open_writer(&slice).await.unwrap();
    writer
        .write_record(Utc::now(), &[json!("1"), json!("ok")])
        .await
        .unwrap();
    writer.close().await.unwrap();

    let content = std::fs::read_to_string(writer.file_path()).unwrap();
    assert_eq!(content, "1,ok\n");

    volume.close().await.unwrap();
}
