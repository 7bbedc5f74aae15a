#![doc = include_str!("../README.md")]
#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod error;
pub use error::{LsError, LsIoError, Result};

pub mod ast;

pub mod config;
pub use config::{Config, Environment, InitializeOptions};

pub mod graph;
pub use graph::DependencyGraph;

pub mod cjo;
pub use cjo::{CjoCache, CjoSnapshot, CjoStatus};

pub mod cache;
pub use cache::{ArtifactLru, CacheManager, PackageArtifact};

pub mod frontend;
pub use frontend::{Frontend, PackageInput};

pub mod index;
pub use index::{IndexShard, Symbol, SymbolId, SymbolIndex};

pub mod pool;
pub use pool::TaskPool;

pub mod diagnostics;
pub use diagnostics::DiagnosticsObserver;

pub mod project;
pub use project::Project;

pub mod completion;
pub mod worker;
pub use worker::{Callbacks, DocumentWorker, NeedDiagnostics};

pub mod utils;

/// Utilities for creating and testing temporary workspaces.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use std::sync::Arc;

/// One language-server session: the orchestrator plus its document worker.
///
/// The transport layer constructs a `Server` per workspace, forwards document
/// events into [`DocumentWorker`] and reads query results back through
/// [`Project`].
pub struct Server<F: Frontend> {
    pub project: Arc<Project<F>>,
    pub worker: DocumentWorker<F>,
}

impl<F: Frontend> Server<F> {
    /// Builds the session, runs workspace discovery and the initial full
    /// compilation.
    pub fn start(
        config: Config,
        frontend: F,
        callbacks: Arc<dyn Callbacks>,
        diags: Arc<DiagnosticsObserver>,
        use_db: bool,
    ) -> Result<Self> {
        let project = Arc::new(Project::new(config, frontend, diags, use_db)?);
        project.initialize()?;
        if let Err(err) = project.full_compilation() {
            // a cyclic workspace still serves requests; the cycles are
            // reported as diagnostics
            warn!("initial compilation incomplete: {err}");
            project.report_cycles();
        }
        let worker = DocumentWorker::new(Arc::clone(&project), callbacks);
        Ok(Self { project, worker })
    }

    /// Stops the worker, persists caches, and waits for the pool to drain.
    pub fn shutdown(&self) {
        self.worker.stop();
        self.project.pool.wait_until_all_complete();
        self.project.store_all_packages_cache();
    }
}
