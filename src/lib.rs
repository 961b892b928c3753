//! # httpfs-core
//!
//! Mounts HTTP(S)-addressable files, registered at runtime over a control
//! channel, as entries in a read-only, single-directory FUSE filesystem.
//!
//! Reading a file issues byte-range `GET` requests against its registered
//! URL. Results land in a chunk-aligned, bounded LRU cache shared across all
//! registered files; concurrent reads of the same chunk are coalesced so
//! only one request per chunk is ever outstanding, and a background
//! prefetcher keeps reading ahead of sequential access.
//!
//! ## Layout
//!
//! - [`cache`] — the bounded LRU block cache
//! - [`inflight`] — single-flight fetch coalescing
//! - [`client`] — HTTP session pool and redirect resolution
//! - [`fetcher`] — range-request chunk fetches
//! - [`prefetch`] — background read-ahead
//! - [`assembler`] — turns a byte range into chunk fetches and stitches the
//!   result back together
//! - [`registry`] — the `filename -> URL` table and per-file metadata
//! - [`context`] — the process-wide state bundle threading the above together
//! - [`fusefs`] — the `fuser::Filesystem` implementation
//! - [`control`] — the registration control channel
//!
//! None of this is exposed for out-of-process use as a generic "open this
//! URL as a file" library; the binary entry point (`httpfs-mount`) is the
//! intended way to run it.

pub mod assembler;
pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod control;
pub mod error;
pub mod fetcher;
pub mod fusefs;
pub mod inflight;
pub mod prefetch;
pub mod registry;
