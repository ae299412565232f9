#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

//! Shared fixtures for module tests across the workspace: a default
//! [`torrentd_config::DaemonSettings`], a `StubEngine` handle, a sample
//! `TorrentRecord`, and a tempfile-backed [`torrentd_store::TorrentStore`].

/// Settings, engine, record, and store fixture builders.
pub mod fixtures;

pub use fixtures::{TempStore, sample_settings, sample_torrent_record, stub_engine};
