//! Remote-Write Client
//!
//! Client proxy for a slice hosted on another node. The verbs mirror the
//! server 1:1 and any server-side error is surfaced to the caller unchanged
//! inside the status. One multiplexed channel per remote volume is shared by
//! all slices opened on it; each RPC is its own logical stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Channel;
use tonic::Code;

use slipstream_core::{SliceKey, VolumeId};
use slipstream_proto::slicefile::slice_file_client::SliceFileClient;
use slipstream_proto::slicefile::{CloseRequest, OpenRequest, SyncRequest, WriteRequest};

use crate::connection::ConnectionManager;
use crate::convert::key_to_pb;
use crate::error::{Error, Result};

/// A slice file on a remote volume, writable as if it were local.
#[derive(Debug)]
pub struct RemoteSliceFile {
    manager: Arc<ConnectionManager>,
    client: SliceFileClient<Channel>,
    volume_id: VolumeId,
    key: SliceKey,
    file_id: u64,
    closed: AtomicBool,
}

impl RemoteSliceFile {
    /// Open the slice on the remote node. `open_timeout` becomes the RPC
    /// deadline, so a dead remote fails the open instead of hanging.
    pub async fn open(
        manager: Arc<ConnectionManager>,
        key: SliceKey,
        open_timeout: Option<Duration>,
    ) -> Result<Self> {
        let volume_id = key.volume_id.clone();
        let channel = manager.channel(&volume_id).await?;
        let mut client = SliceFileClient::new(channel);

        let mut request = tonic::Request::new(OpenRequest {
            source_node_id: manager.node_id().to_string(),
            key: Some(key_to_pb(&key)),
        });
        if let Some(timeout) = open_timeout {
            request.set_timeout(timeout);
        }

        let response = client.open(request).await.map_err(|status| {
            if is_transport_failure(&status) {
                manager.mark_disconnected(&volume_id);
            }
            Error::Rpc {
                op: "open",
                status,
            }
        })?;

        Ok(Self {
            file_id: response.into_inner().file_id,
            manager,
            client,
            volume_id,
            key,
            closed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &SliceKey {
        &self.key
    }

    /// Opaque server-side handle of this file.
    pub fn file_id(&self) -> u64 {
        self.file_id
    }

    /// True while the file is open and the underlying connection is healthy,
    /// so a dead remote is detectable before attempting a write.
    pub fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.manager.is_connected(&self.volume_id)
    }

    /// Write bytes to the remote file; returns the byte count written.
    pub async fn write(&self, data: Vec<u8>) -> Result<usize> {
        self.check_open()?;

        let mut client = self.client.clone();
        let response = client
            .write(WriteRequest {
                file_id: self.file_id,
                data,
            })
            .await
            .map_err(|status| self.rpc_error("write", status))?;

        Ok(response.into_inner().n as usize)
    }

    /// Force a sync on the remote writer and wait for it.
    pub async fn sync(&self) -> Result<()> {
        self.check_open()?;

        let mut client = self.client.clone();
        client
            .sync(SyncRequest {
                file_id: self.file_id,
            })
            .await
            .map_err(|status| self.rpc_error("sync", status))?;

        Ok(())
    }

    /// Close the remote writer and release the handle.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyClosed);
        }

        let mut client = self.client.clone();
        client
            .close(CloseRequest {
                file_id: self.file_id,
            })
            .await
            .map_err(|status| self.rpc_error("close", status))?;

        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn rpc_error(&self, op: &'static str, status: tonic::Status) -> Error {
        if is_transport_failure(&status) {
            self.manager.mark_disconnected(&self.volume_id);
        }
        Error::Rpc { op, status }
    }
}

fn is_transport_failure(status: &tonic::Status) -> bool {
    matches!(status.code(), Code::Unavailable | Code::DeadlineExceeded)
}
