//! Slipstream Protocol Buffer Definitions
//!
//! gRPC service and message types for the remote-write protocol - the four
//! verbs (Open, Write, Sync, Close) a writer-less node uses to stream bytes
//! into a slice hosted on the volume-owning node.
//!
//! ## Usage
//!
//! Server side:
//!
//! ```ignore
//! use slipstream_proto::slicefile::slice_file_server::{SliceFile, SliceFileServer};
//! ```
//!
//! Client side:
//!
//! ```ignore
//! use slipstream_proto::slicefile::slice_file_client::SliceFileClient;
//! ```

/// Remote-write protocol (`proto/slicefile.proto`).
pub mod slicefile {
    tonic::include_proto!("slicefile");
}
