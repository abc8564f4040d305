//! Chunkvault
//!
//! Chunked file transfer engine: uploads are split into fixed-size chunks,
//! pushed to S3-compatible storage and tracked in SQLite; downloads are
//! rebuilt from the chunks and streamed with per-chunk integrity checks.
//!
//! # Modules
//!
//! - `transfer`: splitter, upload orchestrator, status tracker, download reconstructor
//! - `storage`: remote chunk stores (S3, local filesystem, memory)
//! - `db`: metadata store for file records and chunk references
//! - `client`: status polling client
//! - `routes`: HTTP API

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod transfer;

#[cfg(test)]
mod test_utils;
