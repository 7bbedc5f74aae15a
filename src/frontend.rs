//! The boundary to the Conjure compiler front-end.
//!
//! The core never looks inside the front-end; it drives the pipeline through
//! [`Frontend`] one package at a time and treats the produced interface bytes
//! as opaque. Implementations must be `Send + Sync`: package tasks run the
//! pipeline from pool workers concurrently.

use crate::{
    ast::TypedAst,
    cjo::CjoSnapshot,
    diagnostics::FileDiagnostic,
    utils,
};
use lsp_types::Position;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Editor-visible change state of one buffered file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChangeState {
    #[default]
    Unchanged,
    Added,
    Changed,
    Deleted,
}

/// One file of a package: the current editor contents, or the on-disk
/// contents when no editor buffer exists.
#[derive(Clone, Debug, Default)]
pub struct Buffer {
    pub contents: String,
    pub state: ChangeState,
}

/// Compiler-invocation options of one package.
#[derive(Clone, Debug, Default)]
pub struct InvocationOptions {
    /// Effective condition-compile key/value set.
    pub condition: BTreeMap<String, String>,
    /// Extra search paths for condition-compile configuration.
    pub cfg_paths: Vec<PathBuf>,
    /// Macro libraries loaded during expansion.
    pub macro_libs: Vec<PathBuf>,
}

/// Everything the front-end needs to compile one package.
#[derive(Clone, Debug, Default)]
pub struct PackageInput {
    /// Full package name, including a source-set prefix where applicable.
    pub name: String,
    /// Directory the package's files live in.
    pub root: PathBuf,
    /// Owning module name; empty for non-source packages.
    pub module: String,
    pub options: InvocationOptions,
    pub buffers: BTreeMap<PathBuf, Buffer>,
}

impl PackageInput {
    /// Refreshes one buffer, recording the change state.
    pub fn set_buffer(&mut self, file: &Path, contents: String) {
        match self.buffers.get_mut(file) {
            Some(buffer) => {
                if buffer.contents != contents {
                    buffer.contents = contents;
                    buffer.state = ChangeState::Changed;
                }
            }
            None => {
                self.buffers.insert(
                    file.to_path_buf(),
                    Buffer { contents, state: ChangeState::Added },
                );
            }
        }
    }

    /// Drops one buffer; returns whether the package still has files.
    pub fn remove_buffer(&mut self, file: &Path) -> bool {
        self.buffers.remove(file);
        !self.buffers.is_empty()
    }

    /// Reads all source files of `root` from disk, skipping macro-only files.
    pub fn read_from_disk(&mut self) {
        for file in utils::source_files_iter(&self.root) {
            if file.parent() != Some(self.root.as_path()) {
                continue;
            }
            if let Ok(contents) = std::fs::read_to_string(&file) {
                self.buffers.insert(file, Buffer { contents, state: ChangeState::Unchanged });
            }
        }
    }

    /// Marks every buffer clean again after a successful compile.
    pub fn settle(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.state = ChangeState::Unchanged;
        }
    }
}

/// An import recorded while parsing, labeled with its visibility.
#[derive(Clone, Debug)]
pub struct ImportDecl {
    /// Full package name of the import target.
    pub target: String,
    pub visibility: crate::ast::Visibility,
    pub location: crate::ast::Location,
}

/// One parsed file of a package.
#[derive(Clone, Debug)]
pub struct ParsedFile {
    pub path: PathBuf,
    /// The `package` header: declared name, its modifier and position.
    pub package_decl: Option<(String, crate::ast::Visibility, crate::ast::Location)>,
    pub imports: Vec<ImportDecl>,
}

/// Output of the parse step: syntax only, no types.
#[derive(Clone, Debug, Default)]
pub struct ParsedPackage {
    /// Declared package name from the primary file, if any file declares one.
    pub declared_name: Option<String>,
    /// Package modifier from the primary file's header.
    pub package_visibility: crate::ast::Visibility,
    pub files: Vec<ParsedFile>,
    pub diagnostics: Vec<FileDiagnostic>,
}

impl ParsedPackage {
    /// Direct upstream packages with the weakest visibility used per target.
    pub fn upstream_edges(&self) -> BTreeMap<String, crate::ast::Visibility> {
        let mut edges: BTreeMap<String, crate::ast::Visibility> = BTreeMap::new();
        for file in &self.files {
            for import in &file.imports {
                edges
                    .entry(import.target.clone())
                    .and_modify(|vis| *vis = (*vis).min(import.visibility))
                    .or_insert(import.visibility);
            }
        }
        edges
    }
}

/// Output of the full pipeline for one package.
#[derive(Clone, Debug, Default)]
pub struct CheckedPackage {
    pub typed: TypedAst,
    pub diagnostics: Vec<FileDiagnostic>,
    pub error_count: usize,
    /// Whether macro expansion succeeded; gates cache persistence on
    /// non-platform hosts.
    pub macro_expand_ok: bool,
}

/// How far the cursor-scoped pipeline runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialStage {
    /// Parse, condition compile and import resolution only (signature help).
    Imports,
    /// Additionally run macro expansion around the cursor (completion).
    MacroExpand,
}

/// A completion-scoped compile request.
#[derive(Clone, Debug)]
pub struct CursorRequest {
    pub file: PathBuf,
    pub position: Position,
    pub stage: PartialStage,
}

/// Output of the cursor-scoped pipeline: a partially typed AST that is valid
/// only around the requesting position.
#[derive(Clone, Debug, Default)]
pub struct PartialPackage {
    pub typed: TypedAst,
    /// Export path of the typed receiver under the cursor, when the request
    /// sits on a member access.
    pub receiver: Option<String>,
    /// Whether a nested macro at the cursor could not be expanded without a
    /// full compile.
    pub needs_full_expand: bool,
}

/// The compiler front-end as consumed by the orchestrator.
pub trait Frontend: Send + Sync + 'static {
    /// Parses all buffers of one package. Never fails: syntax errors are
    /// diagnostics on the parsed result.
    fn parse(&self, input: &PackageInput) -> ParsedPackage;

    /// Runs condition compile, macro expansion and the semantic pass over a
    /// parsed package, resolving imports against the interface snapshot.
    fn check(
        &self,
        input: &PackageInput,
        parsed: &ParsedPackage,
        deps: &CjoSnapshot,
    ) -> CheckedPackage;

    /// Serializes the externally visible declarations. Two byte-equal
    /// interfaces are semantically interchangeable.
    fn export_interface(&self, checked: &CheckedPackage) -> Vec<u8>;

    /// Builds an index shard from loaded interface bytes, for packages that
    /// are never compiled in-process (standard library, external modules).
    fn interface_shard(&self, package: &str, bytes: &[u8]) -> crate::index::IndexShard;

    /// Cursor-scoped pipeline for the completion lane; stops as soon as the
    /// cursor's enclosing context has been typed. Must not write through the
    /// snapshot.
    fn check_to_cursor(
        &self,
        input: &PackageInput,
        parsed: &ParsedPackage,
        deps: &CjoSnapshot,
        cursor: &CursorRequest,
    ) -> PartialPackage;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Visibility;

    #[test]
    fn buffer_updates_track_change_state() {
        let mut input = PackageInput::default();
        let file = Path::new("/ws/app/src/net/client.cj");
        input.set_buffer(file, "package app.net".into());
        assert_eq!(input.buffers[file].state, ChangeState::Added);
        input.settle();
        input.set_buffer(file, "package app.net\n".into());
        assert_eq!(input.buffers[file].state, ChangeState::Changed);
        input.set_buffer(file, "package app.net\n".into());
        assert_eq!(input.buffers[file].state, ChangeState::Changed);
    }

    #[test]
    fn upstream_edges_keep_weakest_visibility() {
        let loc = crate::ast::Location::default();
        let parsed = ParsedPackage {
            files: vec![
                ParsedFile {
                    path: "/a.cj".into(),
                    package_decl: None,
                    imports: vec![
                        ImportDecl {
                            target: "base.io".into(),
                            visibility: Visibility::Public,
                            location: loc.clone(),
                        },
                        ImportDecl {
                            target: "base.io".into(),
                            visibility: Visibility::Private,
                            location: loc.clone(),
                        },
                    ],
                },
            ],
            ..Default::default()
        };
        assert_eq!(parsed.upstream_edges()["base.io"], Visibility::Private);
    }
}
