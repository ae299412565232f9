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
#![allow(clippy::module_name_repetitions)]
#![allow(unexpected_cfgs)]
#![allow(clippy::multiple_crate_versions)]

//! Torrent engine interface consumed by the session supervisor, plus an
//! in-memory stub implementation used for tests and engine-less builds.

pub mod error;
pub mod session;
pub mod stub;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use session::{Alert, AlertNotify, EngineSession, EngineTorrentHandle};
pub use stub::StubEngine;
pub use types::{
    FileEntry, InfoHash, Priority, SaveResumeFlags, TorrentClientData, TorrentFlags, TorrentParams,
    TorrentStatus,
};
