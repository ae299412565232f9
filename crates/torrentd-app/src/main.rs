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

//! Binary entrypoint that wires the persistence store, session supervisor,
//! event bus, and workflow runner together and owns the event loop task.

use torrentd_app::run_app;

/// Bootstraps the daemon and blocks until shutdown.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    run_app().await
}
