//! Chunked transfer engine
//!
//! Uploads are split into fixed-size chunks, pushed to a remote store and
//! tracked in the metadata store; downloads stream the chunks back in order
//! with per-chunk integrity checks.

mod orchestrator;
mod reconstructor;
mod retry;
mod service;
mod source;
mod splitter;
mod tracker;
mod types;

pub use orchestrator::{UploadOrchestrator, UploadSettings};
pub use reconstructor::{ByteStream, DownloadReconstructor, DownloadSnapshot};
pub use retry::RetryPolicy;
pub use service::{DeleteReport, TransferService};
pub use source::{stage_body, UploadSource};
pub use splitter::{compute_hash, verify_hash, Chunk, ChunkSplitter};
pub use tracker::StatusTracker;
pub use types::*;
