//! Collection and delivery of compile diagnostics.
//!
//! Diagnostics are collected per package and per file. Every compile first
//! clears its package's set, then the front-end pushes fresh tokens; the
//! worker publishes a file's current set through the transport callback
//! together with the document version, so the client can drop stale
//! publishes.

use lsp_types::Diagnostic;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// A diagnostic attached to its file, as produced by the front-end.
#[derive(Clone, Debug)]
pub struct FileDiagnostic {
    pub file: PathBuf,
    pub diagnostic: Diagnostic,
}

impl FileDiagnostic {
    pub fn new(file: impl Into<PathBuf>, diagnostic: Diagnostic) -> Self {
        Self { file: file.into(), diagnostic }
    }
}

/// Callback publishing a file's diagnostics to the client.
pub type PublishFn = Box<dyn Fn(&Path, Option<i32>, Vec<Diagnostic>) + Send + Sync>;

/// Callback for out-of-band notices (the completion-tip notification).
pub type NoticeFn = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct ObserverState {
    /// package -> file -> diagnostics
    by_package: HashMap<String, HashMap<PathBuf, Vec<Diagnostic>>>,
    versions: HashMap<PathBuf, i32>,
}

pub struct DiagnosticsObserver {
    state: Mutex<ObserverState>,
    publish: PublishFn,
    notice: NoticeFn,
}

impl std::fmt::Debug for DiagnosticsObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsObserver").finish_non_exhaustive()
    }
}

impl DiagnosticsObserver {
    pub fn new(publish: PublishFn, notice: NoticeFn) -> Self {
        Self { state: Mutex::new(ObserverState::default()), publish, notice }
    }

    /// An observer that drops everything, for tools and tests that do not
    /// talk to a client.
    pub fn noop() -> Self {
        Self::new(Box::new(|_, _, _| {}), Box::new(|_| {}))
    }

    /// Clears the package's set before a recompile fills it again.
    pub fn clear_package(&self, package: &str) {
        let mut state = self.state.lock().unwrap();
        state.by_package.remove(package);
    }

    /// Moves a package's collected diagnostics under a new name.
    pub fn rename_package(&self, old: &str, new: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.by_package.remove(old) {
            state.by_package.insert(new.to_string(), entry);
        }
    }

    /// Records one diagnostic token pushed by the front-end.
    pub fn push(&self, package: &str, diagnostic: FileDiagnostic) {
        let mut state = self.state.lock().unwrap();
        state
            .by_package
            .entry(package.to_string())
            .or_default()
            .entry(diagnostic.file)
            .or_default()
            .push(diagnostic.diagnostic);
    }

    /// Records a whole compile's diagnostics at once.
    pub fn extend(&self, package: &str, diagnostics: impl IntoIterator<Item = FileDiagnostic>) {
        for diagnostic in diagnostics {
            self.push(package, diagnostic);
        }
    }

    /// Tracks the client's document version for publishes of this file.
    pub fn set_version(&self, file: &Path, version: i32) {
        let mut state = self.state.lock().unwrap();
        state.versions.insert(file.to_path_buf(), version);
    }

    /// The diagnostics currently collected for one file, across packages.
    pub fn diags_of_file(&self, file: &Path) -> Vec<Diagnostic> {
        let state = self.state.lock().unwrap();
        let mut out = Vec::new();
        for files in state.by_package.values() {
            if let Some(diags) = files.get(file) {
                out.extend(diags.iter().cloned());
            }
        }
        out
    }

    /// Publishes the current diagnostics of `file` through the callback.
    pub fn emit_diags_of_file(&self, file: &Path) {
        let (version, diags) = {
            let state = self.state.lock().unwrap();
            let version = state.versions.get(file).copied();
            let mut out = Vec::new();
            for files in state.by_package.values() {
                if let Some(diags) = files.get(file) {
                    out.extend(diags.iter().cloned());
                }
            }
            (version, out)
        };
        (self.publish)(file, version, diags);
    }

    /// Publishes an explicit empty set, clearing the client's markers.
    pub fn emit_empty(&self, file: &Path, version: Option<i32>) {
        (self.publish)(file, version, Vec::new());
    }

    /// Drops a retired file from every package's set.
    pub fn remove_doc_by_file(&self, file: &Path) {
        let mut state = self.state.lock().unwrap();
        for files in state.by_package.values_mut() {
            files.remove(file);
        }
        state.versions.remove(file);
    }

    /// Sends the completion-tip notice ("waiting macro expand...").
    pub fn send_notice(&self, message: &str) {
        (self.notice)(message);
    }
}
