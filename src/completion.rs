//! The completion-specialized compilation path.
//!
//! A completion or signature-help request is "very local": instead of
//! touching the main artifact LRU, the path builds a lightweight partial
//! typed AST for the requesting file only. The previous completion compiler
//! is reused while the cursor stays in the same package; a package switch
//! rebuilds it against a fresh interface snapshot. The snapshot is read-only:
//! the completion lane can never write interface bytes back.

use crate::{
    ast::TypedAst,
    frontend::{CursorRequest, Frontend, PackageInput, PartialStage},
    project::Project,
};
use lsp_types::Position;
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// The bundle delivered to a completion action. Scoped to one request and
/// never merged back into the main LRU.
pub struct PartialArtifact {
    pub package: String,
    pub file: PathBuf,
    pub typed: Arc<TypedAst>,
    /// Export path of the typed receiver under the cursor, when the request
    /// sits on a member access.
    pub receiver: Option<String>,
    /// A nested macro at the cursor needs a full compile to expand; the
    /// client is told to wait.
    pub needs_full_expand: bool,
    /// The full artifact of the same package, when resident, for
    /// receiver-member resolution.
    pub sema_cache: Option<Arc<TypedAst>>,
}

struct Session {
    package: String,
    input: PackageInput,
}

/// Reusable compiler state of the completion lane.
pub struct CompletionCompiler<F: Frontend> {
    project: Arc<Project<F>>,
    last: Mutex<Option<Session>>,
}

impl<F: Frontend> CompletionCompiler<F> {
    pub fn new(project: Arc<Project<F>>) -> Self {
        Self { project, last: Mutex::new(None) }
    }

    /// Runs the cursor-scoped pipeline for one request.
    ///
    /// Signature help stops after parse, condition compile and imports;
    /// completion additionally expands macros around the cursor.
    pub fn partial_compile(
        self: &Arc<Self>,
        file: &Path,
        contents: &str,
        position: Position,
        stage: PartialStage,
    ) -> Option<PartialArtifact> {
        let package = self.project.package_of_file(file)?;

        // dot completion resolves receiver members against the package's full
        // artifact; rebuild it when it fell out of the LRU
        if !self.project.lru.has(&package) {
            self.project.rehydrate_package(&package);
        }

        let mut last = self.last.lock().unwrap();
        let mut session = match last.take() {
            Some(mut session) if session.package == package => {
                trace!("reusing completion compiler for \"{package}\"");
                session.input.set_buffer(file, contents.to_string());
                session
            }
            _ => {
                trace!("fresh completion compiler for \"{package}\"");
                let entry = self.project.package_entry(&package)?;
                let mut input = entry.input.lock().unwrap().clone();
                input.set_buffer(file, contents.to_string());
                Session { package: package.clone(), input }
            }
        };

        let parsed = self.project.frontend.parse(&session.input);
        // interfaces are imported in topological order, through a snapshot
        // the partial compile cannot write back into
        let deps = self.project.interface_snapshot(&package, &parsed);
        let cursor =
            CursorRequest { file: file.to_path_buf(), position, stage };
        let partial =
            self.project.frontend.check_to_cursor(&session.input, &parsed, &deps, &cursor);

        session.input.settle();
        *last = Some(session);

        let sema_cache = self.project.lru.get(&package).map(|artifact| Arc::clone(&artifact.typed));
        Some(PartialArtifact {
            package,
            file: file.to_path_buf(),
            typed: Arc::new(partial.typed),
            receiver: partial.receiver,
            needs_full_expand: partial.needs_full_expand,
            sema_cache,
        })
    }

    /// Drops the cached compiler, e.g. when its package was retired.
    pub fn clear(&self) {
        *self.last.lock().unwrap() = None;
    }
}
