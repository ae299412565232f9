//! Workflow documents, the expression renderer they use for templated
//! conditions and step parameters, and the sequential runner that executes
//! them against a growing context tree.

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

pub mod document;
pub mod error;
pub mod renderer;
pub mod runner;

pub use document::{Step, WorkflowDocument};
pub use error::{WorkflowError, WorkflowResult};
pub use renderer::{ContextProvider, RenderContext, StepsProvider, ValueProvider};
pub use runner::{execute, should_execute, Action, ActionFactory, ActionParams};
