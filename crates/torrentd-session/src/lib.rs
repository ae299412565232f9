//! Session supervisor: the daemon's bridge between the BitTorrent engine,
//! its persisted resume records, and the rest of the process's event bus.

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
#![allow(clippy::multiple_crate_versions)]

mod callbacks;
mod mediainfo;
pub mod error;
pub mod supervisor;

pub use error::{SessionError, SessionResult};
pub use supervisor::SessionSupervisor;
