//! The per-document request worker.
//!
//! A single worker thread consumes a deque of requests guarded by a mutex
//! and condition variable. Requests for one document are serialized behind
//! their compilation prerequisites; superseded updates are elided by the
//! skipping policy; a separate completion lane runs at most one completion
//! concurrently and lets a newer completion displace a waiting one.

use crate::{
    ast::TypedAst,
    completion::{CompletionCompiler, PartialArtifact},
    frontend::{Frontend, PartialStage},
    project::{FileKind, Project},
};
use lsp_types::Position;
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard},
    thread,
};

/// Requests against library sources only support this feature subset.
const LIBRARY_FEATURES: &[&str] = &["semanticTokens", "definition"];

/// Hierarchy requests never trigger freshness compiles; they are served from
/// the index alone.
const HIERARCHY_REQUESTS: &[&str] =
    &["subTypes", "superTypes", "onIncomingCalls", "onOutgoingCalls"];

/// Whether a request's diagnostics might be used, driving the skipping
/// policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NeedDiagnostics {
    Yes,
    No,
    Auto,
}

/// Document state the worker needs from the (external) text-document store.
pub trait Callbacks: Send + Sync + 'static {
    fn contents_of(&self, file: &Path) -> Option<String>;
    fn version_of(&self, file: &Path) -> Option<i32>;
    /// Whether the stored document is newer than the last compile of it.
    fn needs_reparse(&self, file: &Path) -> bool;
    fn set_needs_reparse(&self, file: &Path, needs: bool);
}

/// The bundle handed to AST request actions.
pub struct InputsAndAst {
    pub file: PathBuf,
    pub contents: String,
    pub version: Option<i32>,
    pub ast: Option<Arc<TypedAst>>,
    /// The file currently under edit, as a ranking hint.
    pub on_edit_file: Option<PathBuf>,
    /// Whether the action is served from a cached AST without recompiling.
    pub used_cached_ast: bool,
}

struct Request {
    name: String,
    file: PathBuf,
    update_type: NeedDiagnostics,
    action: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct Queue {
    requests: VecDeque<Request>,
    done: bool,
}

struct WorkerShared {
    queue: Mutex<Queue>,
    cv: Condvar,
}

/// One compiler invocation at a time for the main lane.
#[derive(Default)]
pub struct LspSemaphore {
    inner: Mutex<()>,
}

impl LspSemaphore {
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner.lock().unwrap()
    }
}

#[derive(Default)]
struct LaneState {
    running: bool,
    waiting: Option<Box<dyn FnOnce() + Send>>,
}

/// The completion lane: at most one running completion; an incoming request
/// displaces the one still waiting.
struct CompletionLane {
    state: Mutex<LaneState>,
}

impl CompletionLane {
    fn submit(self: &Arc<Self>, task: Box<dyn FnOnce() + Send>) {
        let mut state = self.state.lock().unwrap();
        if state.running {
            if state.waiting.is_some() {
                trace!("displacing waiting completion");
            }
            state.waiting = Some(task);
            return;
        }
        state.running = true;
        drop(state);
        self.spawn(task);
    }

    fn spawn(self: &Arc<Self>, task: Box<dyn FnOnce() + Send>) {
        let lane = Arc::clone(self);
        thread::Builder::new()
            .name("conjure-completion".into())
            .spawn(move || {
                let mut current = task;
                loop {
                    current();
                    let mut state = lane.state.lock().unwrap();
                    match state.waiting.take() {
                        // a displacing completion arrived; run it on this
                        // same thread
                        Some(next) => current = next,
                        None => {
                            state.running = false;
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn completion thread");
    }
}

/// The per-server document worker.
pub struct DocumentWorker<F: Frontend> {
    project: Arc<Project<F>>,
    callbacks: Arc<dyn Callbacks>,
    completion: Arc<CompletionCompiler<F>>,
    shared: Arc<WorkerShared>,
    lane: Arc<CompletionLane>,
    semaphore: Arc<LspSemaphore>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    on_edit: Arc<Mutex<Option<PathBuf>>>,
    /// Pending rename transaction: the defining file compiles before the
    /// requesting file inside the next AST request.
    rename_defining_file: Arc<Mutex<Option<PathBuf>>>,
}

impl<F: Frontend> DocumentWorker<F> {
    pub fn new(project: Arc<Project<F>>, callbacks: Arc<dyn Callbacks>) -> Self {
        let shared =
            Arc::new(WorkerShared { queue: Mutex::new(Queue::default()), cv: Condvar::new() });
        let worker_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("conjure-ast-worker".into())
            .spawn(move || run_worker(worker_shared))
            .expect("failed to spawn document worker");
        Self {
            completion: Arc::new(CompletionCompiler::new(Arc::clone(&project))),
            project,
            callbacks,
            shared,
            lane: Arc::new(CompletionLane { state: Mutex::new(LaneState::default()) }),
            semaphore: Arc::new(LspSemaphore::default()),
            thread: Mutex::new(Some(thread)),
            on_edit: Arc::new(Mutex::new(None)),
            rename_defining_file: Arc::new(Mutex::new(None)),
        }
    }

    /// Drains the queue after the current request and stops the thread.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.done = true;
        }
        self.shared.cv.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Opens a rename transaction spanning the defining file and subsequent
    /// requests.
    pub fn begin_rename_transaction(&self, defining_file: &Path) {
        *self.rename_defining_file.lock().unwrap() = Some(defining_file.to_path_buf());
    }

    fn enqueue(&self, request: Request) {
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.done {
                return;
            }
            // a newer request with the same key replaces the older one
            queue
                .requests
                .retain(|r| !(r.name == request.name && r.file == request.file));
            queue.requests.push_back(request);
        }
        self.shared.cv.notify_all();
    }

    /// Schedules an incremental recompile of the edited document and streams
    /// its diagnostics back under `version`.
    pub fn update(&self, file: &Path, version: i32, update_type: NeedDiagnostics) {
        let project = Arc::clone(&self.project);
        let callbacks = Arc::clone(&self.callbacks);
        let semaphore = Arc::clone(&self.semaphore);
        let on_edit = Arc::clone(&self.on_edit);
        let file_owned = file.to_path_buf();

        self.enqueue(Request {
            name: "update".into(),
            file: file.to_path_buf(),
            update_type,
            action: Box::new(move || {
                let _guard = semaphore.acquire();
                if project.file_kind(&file_owned).0 == FileKind::Missing {
                    return;
                }
                *on_edit.lock().unwrap() = Some(file_owned.clone());
                let contents = callbacks.contents_of(&file_owned).unwrap_or_default();
                // the compile publishes exactly one diagnostics set under
                // this version
                project.diags.set_version(&file_owned, version);
                project.increment_one_pkg_compile(&file_owned, contents);
                callbacks.set_needs_reparse(&file_owned, false);
            }),
        });
    }

    /// Runs `action` once the latest typed AST for the file is available.
    pub fn run_with_ast(
        &self,
        name: &str,
        file: &Path,
        update_type: NeedDiagnostics,
        action: impl FnOnce(InputsAndAst) + Send + 'static,
    ) {
        if self.project.config.is_in_std_lib(file) && !LIBRARY_FEATURES.contains(&name) {
            return;
        }

        let project = Arc::clone(&self.project);
        let callbacks = Arc::clone(&self.callbacks);
        let semaphore = Arc::clone(&self.semaphore);
        let on_edit = Arc::clone(&self.on_edit);
        let rename_txn = Arc::clone(&self.rename_defining_file);
        let file_owned = file.to_path_buf();
        let name_owned = name.to_string();

        self.enqueue(Request {
            name: name.to_string(),
            file: file.to_path_buf(),
            update_type,
            action: Box::new(move || {
                let _guard = semaphore.acquire();
                let version = callbacks.version_of(&file_owned);
                let contents = callbacks.contents_of(&file_owned).unwrap_or_default();
                let mut used_cached_ast = true;

                // an open rename transaction compiles the defining file first
                let defining = rename_txn.lock().unwrap().take();
                if let Some(defining) = defining {
                    if defining != file_owned && callbacks.needs_reparse(&defining) {
                        let def_contents = callbacks.contents_of(&defining).unwrap_or_default();
                        project.increment_one_pkg_compile(&defining, def_contents);
                        callbacks.set_needs_reparse(&defining, false);
                    }
                }

                if callbacks.needs_reparse(&file_owned) {
                    if let Some(version) = version {
                        project.diags.set_version(&file_owned, version);
                    }
                    project.increment_one_pkg_compile(&file_owned, contents.clone());
                    callbacks.set_needs_reparse(&file_owned, false);
                    used_cached_ast = false;
                }

                let hierarchy = HIERARCHY_REQUESTS.contains(&name_owned.as_str());
                if !hierarchy
                    && (!project.file_has_sema_cache(&file_owned)
                        || project.check_need_compile(&file_owned))
                {
                    project.rehydrate_package_of(&file_owned);
                    project.diags.emit_diags_of_file(&file_owned);
                    used_cached_ast = false;
                }

                let ast = project.file_ast(&file_owned);
                let on_edit_file = on_edit.lock().unwrap().clone();
                action(InputsAndAst {
                    file: file_owned,
                    contents,
                    version,
                    ast,
                    on_edit_file,
                    used_cached_ast,
                });
            }),
        });
    }

    /// Completion variant: a partial compile on the completion lane. A newer
    /// completion displaces one that is still waiting; under the `test` flag
    /// the task runs synchronously on the caller.
    pub fn run_with_ast_cache(
        &self,
        name: &str,
        file: &Path,
        position: Position,
        action: impl FnOnce(PartialArtifact) + Send + 'static,
    ) {
        if self.project.config.is_in_std_lib(file) {
            return;
        }
        let stage = if name == "signatureHelp" {
            PartialStage::Imports
        } else {
            PartialStage::MacroExpand
        };

        let project = Arc::clone(&self.project);
        let callbacks = Arc::clone(&self.callbacks);
        let completion = Arc::clone(&self.completion);
        let file_owned = file.to_path_buf();

        let task: Box<dyn FnOnce() + Send> = Box::new(move || {
            let contents = callbacks.contents_of(&file_owned).unwrap_or_default();
            if let Some(partial) = completion.partial_compile(&file_owned, &contents, position, stage)
            {
                if partial.needs_full_expand {
                    project.diags.send_notice("waiting macro expand...");
                }
                action(partial);
            }
        });

        if self.project.config.options.test {
            task();
        } else {
            self.lane.submit(task);
        }
    }
}

impl<F: Frontend> Drop for DocumentWorker<F> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Head elision: a head whose diagnostics might never be used is dropped when
/// a later AUTO entry for the same file exists. YES heads always run.
fn should_skip_head(queue: &Queue) -> bool {
    let Some(head) = queue.requests.front() else {
        return false;
    };
    match head.update_type {
        NeedDiagnostics::Yes => false,
        NeedDiagnostics::No | NeedDiagnostics::Auto => queue
            .requests
            .iter()
            .skip(1)
            .any(|r| r.file == head.file && r.update_type == NeedDiagnostics::Auto),
    }
}

fn run_worker(shared: Arc<WorkerShared>) {
    loop {
        let request = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                while should_skip_head(&queue) {
                    if let Some(skipped) = queue.requests.pop_front() {
                        debug!("worker skipping \"{}\" for {}", skipped.name, skipped.file.display());
                    }
                }
                if let Some(request) = queue.requests.pop_front() {
                    break request;
                }
                if queue.done {
                    return;
                }
                queue = shared.cv.wait(queue).unwrap();
            }
        };
        (request.action)();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, file: &str, update_type: NeedDiagnostics) -> Request {
        Request {
            name: name.into(),
            file: PathBuf::from(file),
            update_type,
            action: Box::new(|| {}),
        }
    }

    #[test]
    fn auto_head_is_skipped_for_later_auto_on_same_file() {
        let mut queue = Queue::default();
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Auto));
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Auto));
        assert!(should_skip_head(&queue));
    }

    #[test]
    fn yes_head_is_never_skipped() {
        let mut queue = Queue::default();
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Yes));
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Auto));
        assert!(!should_skip_head(&queue));
    }

    #[test]
    fn other_files_do_not_supersede() {
        let mut queue = Queue::default();
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Auto));
        queue.requests.push_back(request("update", "/b.cj", NeedDiagnostics::Auto));
        assert!(!should_skip_head(&queue));
    }

    #[test]
    fn no_head_is_dead_once_a_later_auto_arrives() {
        let mut queue = Queue::default();
        queue.requests.push_back(request("hover", "/a.cj", NeedDiagnostics::No));
        queue.requests.push_back(request("update", "/a.cj", NeedDiagnostics::Auto));
        assert!(should_skip_head(&queue));
    }
}
