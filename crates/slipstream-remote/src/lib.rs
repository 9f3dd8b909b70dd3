//! Slipstream Remote-Write Protocol
//!
//! Lets a node without direct disk access write into a slice hosted on the
//! volume-owning node:
//!
//! ```text
//! source node                               disk writer node
//! ┌──────────────────┐   Open/Write/Sync/   ┌─────────────────────────┐
//! │ RemoteSliceFile  │──────Close (gRPC)───▶│ NetworkFileServer       │
//! │ ConnectionManager│  one channel per     │  handle table           │
//! └──────────────────┘  remote volume       │  SliceMirror (layouts)  │
//!                                           │  Volumes → SliceWriter  │
//!                                           └─────────────────────────┘
//! ```
//!
//! The server resolves slice layouts from a filtered in-memory mirror of
//! slice metadata, so `Open` needs no metadata-store round trip. The client
//! keeps one multiplexed connection per remote volume and proxies the four
//! verbs 1:1, surfacing server errors unchanged.

pub mod client;
pub mod connection;
pub mod convert;
pub mod error;
pub mod mirror;
pub mod server;

pub use client::RemoteSliceFile;
pub use connection::ConnectionManager;
pub use error::{Error, Result};
pub use mirror::SliceMirror;
pub use server::{NetworkFileServer, ServerConfig};
