//! Remote-Write Server
//!
//! The tonic service exposed by a node that owns volumes. `Open` resolves
//! the target volume and the slice's layout from the in-memory mirror, opens
//! a local writer and hands back an opaque numeric handle; `Write`, `Sync`
//! and `Close` look the handle up. Handle IDs are allocated monotonically
//! and never reused for a different slice.
//!
//! On shutdown the server refuses new opens, waits a bounded grace period
//! for clients to close their handles, then force-closes whatever is left -
//! concurrently - before the listener is torn down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tonic::{Request, Response, Status};
use tracing::{error, info};

use slipstream_proto::slicefile::slice_file_server::{SliceFile, SliceFileServer};
use slipstream_proto::slicefile::{
    CloseRequest, CloseResponse, OpenRequest, OpenResponse, SyncRequest, SyncResponse,
    WriteRequest, WriteResponse,
};
use slipstream_storage::writer::SliceWriter;
use slipstream_storage::Volumes;

use crate::convert::key_from_pb;
use crate::mirror::SliceMirror;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long to wait for clients to close their handles on shutdown.
    pub shutdown_grace: Duration,
    /// How often the remaining-handle count is polled during the grace wait.
    pub shutdown_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(30),
            shutdown_poll: Duration::from_millis(50),
        }
    }
}

struct Handles {
    next_id: u64,
    writers: HashMap<u64, SliceWriter>,
}

pub struct NetworkFileServer {
    volumes: Arc<Volumes>,
    mirror: Arc<SliceMirror>,
    config: ServerConfig,
    handles: Mutex<Handles>,
    terminating: AtomicBool,
}

impl NetworkFileServer {
    pub fn new(volumes: Arc<Volumes>, mirror: Arc<SliceMirror>, config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            volumes,
            mirror,
            config,
            handles: Mutex::new(Handles {
                next_id: 0,
                writers: HashMap::new(),
            }),
            terminating: AtomicBool::new(false),
        })
    }

    /// The tonic service wrapper; add it to a `tonic::transport::Server`.
    pub fn into_service(self: &Arc<Self>) -> SliceFileServer<ServiceHandle> {
        SliceFileServer::new(ServiceHandle(self.clone()))
    }

    /// Count of currently open handles.
    pub fn open_handles(&self) -> usize {
        self.handles
            .lock()
            .expect("server handles lock poisoned")
            .writers
            .len()
    }

    /// Graceful shutdown of the writer surface: stop the mirror, refuse new
    /// opens, give clients the grace period, then force-close the rest.
    /// Call before tearing down the listener.
    pub async fn terminate(&self) {
        info!("closing network file server");

        self.terminating.store(true, Ordering::Release);
        self.mirror.stop().await;

        info!(
            open = self.open_handles(),
            "waiting for disk writers to be closed by source nodes"
        );
        self.wait_for_handles().await;

        // Force close whatever the clients left behind.
        let remaining: Vec<(u64, SliceWriter)> = {
            let mut handles = self.handles.lock().expect("server handles lock poisoned");
            handles.writers.drain().collect()
        };
        if !remaining.is_empty() {
            error!(count = remaining.len(), "force closing disk writers");
            futures::future::join_all(remaining.into_iter().map(|(id, writer)| async move {
                if let Err(err) = writer.close().await {
                    error!(handle = id, slice = %writer.key(), "cannot close disk writer: {err}");
                }
            }))
            .await;
        }

        info!("closed network file server");
    }

    async fn wait_for_handles(&self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        loop {
            if self.open_handles() == 0 {
                info!("all disk writers have been gracefully closed");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(self.config.shutdown_poll).await;
        }
    }

    fn writer(&self, id: u64) -> Result<SliceWriter, Status> {
        let handles = self.handles.lock().expect("server handles lock poisoned");
        handles
            .writers
            .get(&id)
            .cloned()
            .ok_or_else(|| Status::not_found(format!("disk writer {id} not found")))
    }

    async fn handle_open(&self, req: OpenRequest) -> Result<OpenResponse, Status> {
        if self.terminating.load(Ordering::Acquire) {
            return Err(Status::unavailable("disk writer node is terminating"));
        }

        let key = req
            .key
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("missing slice key"))
            .and_then(|pb| {
                key_from_pb(pb).map_err(|err| Status::invalid_argument(err.to_string()))
            })?;

        // Layout comes from the local mirror, no metadata round trip.
        let slice = self
            .mirror
            .get(&key)
            .ok_or_else(|| Status::not_found(format!("slice \"{}\" not found", key.path())))?;

        let volume = self
            .volumes
            .volume(&key.volume_id)
            .map_err(|err| Status::not_found(err.to_string()))?;

        let writer = volume.open_writer(&slice).await.map_err(|err| match err {
            slipstream_storage::Error::WriterAlreadyExists => {
                Status::already_exists(err.to_string())
            }
            other => Status::internal(other.to_string()),
        })?;

        let file_id = {
            let mut handles = self.handles.lock().expect("server handles lock poisoned");
            handles.next_id += 1;
            let file_id = handles.next_id;
            handles.writers.insert(file_id, writer);
            file_id
        };

        info!(handle = file_id, slice = %key, source_node = %req.source_node_id, "opened remote writer");
        Ok(OpenResponse { file_id })
    }
}

/// Cloneable service facade handed to tonic.
#[derive(Clone)]
pub struct ServiceHandle(Arc<NetworkFileServer>);

#[tonic::async_trait]
impl SliceFile for ServiceHandle {
    async fn open(&self, request: Request<OpenRequest>) -> Result<Response<OpenResponse>, Status> {
        let response = self.0.handle_open(request.into_inner()).await?;
        Ok(Response::new(response))
    }

    async fn write(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let req = request.into_inner();
        let writer = self.0.writer(req.file_id)?;

        let n = writer
            .write_bytes(Utc::now(), &req.data)
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        Ok(Response::new(WriteResponse { n: n as i64 }))
    }

    async fn sync(&self, request: Request<SyncRequest>) -> Result<Response<SyncResponse>, Status> {
        let req = request.into_inner();
        let writer = self.0.writer(req.file_id)?;

        writer
            .sync()
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        Ok(Response::new(SyncResponse {}))
    }

    async fn close(
        &self,
        request: Request<CloseRequest>,
    ) -> Result<Response<CloseResponse>, Status> {
        let req = request.into_inner();
        let writer = self.0.writer(req.file_id)?;

        // Release the handle first; the ID is never reused either way.
        {
            let mut handles = self.0.handles.lock().expect("server handles lock poisoned");
            handles.writers.remove(&req.file_id);
        }

        writer
            .close()
            .await
            .map_err(|err| Status::internal(err.to_string()))?;

        Ok(Response::new(CloseResponse {}))
    }
}
