//! Per-Volume Connections
//!
//! One multiplexed gRPC channel per remote volume, shared by every slice
//! opened on it. Channels are established lazily on first use; a transport
//! failure marks the channel dead so readiness checks catch a broken remote
//! before the next write attempt.

use std::collections::HashMap;
use std::sync::RwLock;

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

use slipstream_core::VolumeId;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct ConnectionManager {
    node_id: String,
    /// Volume → remote address (`http://host:port`), from the cluster
    /// directory, which is an external collaborator.
    addrs: RwLock<HashMap<VolumeId, String>>,
    channels: RwLock<HashMap<VolumeId, Channel>>,
}

impl ConnectionManager {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            addrs: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// This node's identity, sent with every `Open`.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register where a remote volume lives.
    pub fn register_volume(&self, volume_id: VolumeId, addr: impl Into<String>) {
        self.addrs
            .write()
            .expect("connection addrs lock poisoned")
            .insert(volume_id, addr.into());
    }

    /// Channel to the node hosting `volume_id`, connecting on first use.
    pub async fn channel(&self, volume_id: &VolumeId) -> Result<Channel> {
        if let Some(channel) = self
            .channels
            .read()
            .expect("connection channels lock poisoned")
            .get(volume_id)
        {
            return Ok(channel.clone());
        }

        let addr = self
            .addrs
            .read()
            .expect("connection addrs lock poisoned")
            .get(volume_id)
            .cloned()
            .ok_or_else(|| Error::NoConnection(volume_id.to_string()))?;

        debug!(volume_id = %volume_id, addr = %addr, "connecting to volume");
        let channel = Endpoint::from_shared(addr)
            .map_err(Error::Transport)?
            .connect()
            .await
            .map_err(Error::Transport)?;

        self.channels
            .write()
            .expect("connection channels lock poisoned")
            .insert(volume_id.clone(), channel.clone());

        Ok(channel)
    }

    /// Whether a live channel to the volume exists.
    pub fn is_connected(&self, volume_id: &VolumeId) -> bool {
        self.channels
            .read()
            .expect("connection channels lock poisoned")
            .contains_key(volume_id)
    }

    /// Drop a channel after a transport failure; the next use reconnects.
    pub fn mark_disconnected(&self, volume_id: &VolumeId) {
        let removed = self
            .channels
            .write()
            .expect("connection channels lock poisoned")
            .remove(volume_id);
        if removed.is_some() {
            warn!(volume_id = %volume_id, "connection to volume marked dead");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_volume_has_no_connection() {
        let manager = ConnectionManager::new("source-node-1");
        let volume = VolumeId("vol-1".to_string());

        assert!(!manager.is_connected(&volume));
        let err = manager.channel(&volume).await.unwrap_err();
        assert!(matches!(err, Error::NoConnection(_)));
    }
}
