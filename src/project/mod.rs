//! The project orchestrator.
//!
//! Owns the dependency graph, the interface cache, the artifact caches, the
//! symbol index and the task pool, and drives the initial full compilation
//! plus every incremental edit. Compilation of a workspace is performed in
//! several steps:
//!
//! 1. The workspace descriptor is parsed into modules and every package is
//!    enumerated, its buffers read from disk.
//! 2. Every package is parsed (no type check yet) and its imports become
//!    labeled edges of the dependency graph.
//! 3. The index is seeded from the loaded `.cjo` interfaces, on-disk caches
//!    short-circuit packages whose sources did not move, and the remaining
//!    packages are submitted to the pool with their transitive upstreams as
//!    prerequisites.
//!
//! Afterwards every edit recompiles only the affected packages, gated by the
//! interface-status transitions of [`crate::cjo`].

pub mod incremental;
pub mod modules;

use crate::{
    ast::{Location, Visibility},
    cache::{ArtifactLru, CacheManager, PackageArtifact},
    cjo::{CjoCache, CjoSnapshot, CjoStatus},
    config::Config,
    diagnostics::{DiagnosticsObserver, FileDiagnostic},
    error::{LsError, Result},
    frontend::{Frontend, PackageInput, ParsedPackage},
    graph::DependencyGraph,
    index::{
        background::FileRow, BackgroundIndex, IndexShard, MemIndex, SymbolCollector, SymbolIndex,
    },
    pool::{task_id, TaskPool},
    utils,
};
use lsp_types::{Diagnostic, DiagnosticSeverity};
use modules::ModuleManager;
use rayon::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, RwLock},
};

/// Classification of a file path against the workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Belongs to an already known package.
    InOldPackage,
    /// Lies in a module source root but its directory has no package yet.
    InNewPackage,
    /// Inside the workspace but outside every module's source tree.
    InProjectNotInSource,
    /// Unknown to the workspace.
    Missing,
}

/// One known package: its compilation input plus bookkeeping.
#[derive(Debug)]
pub struct PackageEntry {
    pub input: Mutex<PackageInput>,
    /// Owning module name; empty for non-source packages.
    pub module: String,
    /// Whether the package lives in a module source root.
    pub in_source: bool,
    pub source_set: Option<String>,
    /// The package collided with an existing full name and is parked: its
    /// buffers are kept but never type-checked.
    pub redefined: std::sync::atomic::AtomicBool,
}

impl PackageEntry {
    fn new(input: PackageInput, module: String, in_source: bool, source_set: Option<String>) -> Self {
        Self {
            input: Mutex::new(input),
            module,
            in_source,
            source_set,
            redefined: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn is_redefined(&self) -> bool {
        self.redefined.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub(crate) struct ProjectState {
    pub packages: HashMap<String, Arc<PackageEntry>>,
    pub path_to_package: HashMap<PathBuf, String>,
    pub package_to_path: HashMap<String, PathBuf>,
    /// Latest parse result per package, consumed by compiles.
    pub parsed: HashMap<String, ParsedPackage>,
    /// Modifier of each package's `package` header.
    pub pkg_modifier: HashMap<String, Visibility>,
    /// Per-file typed-AST handles for definition/hover/semantic tokens.
    pub file_asts: HashMap<PathBuf, Arc<crate::ast::TypedAst>>,
}

enum IndexBackend {
    Memory(MemIndex),
    Background(BackgroundIndex),
}

/// The language server's view of one workspace.
pub struct Project<F: Frontend> {
    pub(crate) frontend: F,
    pub config: Config,
    pub(crate) modules: ModuleManager,
    pub graph: DependencyGraph,
    pub cjo: CjoCache,
    pub lru: ArtifactLru,
    pub(crate) disk: Option<CacheManager>,
    index: IndexBackend,
    pub pool: TaskPool,
    pub diags: Arc<DiagnosticsObserver>,
    pub(crate) state: RwLock<ProjectState>,
}

impl<F: Frontend> Project<F> {
    /// Builds the orchestrator. `use_db` selects the background index.
    pub fn new(
        config: Config,
        frontend: F,
        diags: Arc<DiagnosticsObserver>,
        use_db: bool,
    ) -> Result<Self> {
        let modules = ModuleManager::from_config(&config)?;
        let disk = CacheManager::new(config.cache_root());
        let index = if use_db {
            let root = disk.as_ref().map(|d| d.root().join("index"));
            IndexBackend::Background(BackgroundIndex::open(root))
        } else {
            IndexBackend::Memory(MemIndex::new())
        };
        Ok(Self {
            pool: TaskPool::new(config.pool_size()),
            lru: ArtifactLru::new(config.lru_capacity()),
            graph: DependencyGraph::new(),
            cjo: CjoCache::new(),
            frontend,
            modules,
            disk,
            index,
            diags,
            state: RwLock::new(ProjectState::default()),
            config,
        })
    }

    /// The unified query surface over whichever backend is active.
    pub fn index(&self) -> &dyn SymbolIndex {
        match &self.index {
            IndexBackend::Memory(index) => index,
            IndexBackend::Background(index) => index,
        }
    }

    pub(crate) fn memory_index(&self) -> Option<&MemIndex> {
        match &self.index {
            IndexBackend::Memory(index) => Some(index),
            IndexBackend::Background(_) => None,
        }
    }

    pub(crate) fn background_index(&self) -> Option<&BackgroundIndex> {
        match &self.index {
            IndexBackend::Memory(_) => None,
            IndexBackend::Background(index) => Some(index),
        }
    }

    /// Publishes a package's shard to the active backend.
    pub(crate) fn publish_shard(&self, package: &str, shard: IndexShard, inputs: &PackageInput) {
        match &self.index {
            IndexBackend::Memory(index) => index.insert_shard(package, shard),
            IndexBackend::Background(index) => {
                let rows = inputs.buffers.iter().map(|(path, buffer)| {
                    (
                        path.clone(),
                        FileRow {
                            package: package.to_string(),
                            module: inputs.module.clone(),
                            digest: utils::digest(&buffer.contents),
                        },
                    )
                });
                index.delete_files(inputs.buffers.keys().map(PathBuf::as_path));
                index.update(package, shard);
                index.update_files(rows);
            }
        }
    }

    pub(crate) fn retire_shard(&self, package: &str) {
        match &self.index {
            IndexBackend::Memory(index) => index.remove_shard(package),
            IndexBackend::Background(index) => index.remove_package(package),
        }
    }

    // ------------------------------------------------------------------
    // workspace discovery
    // ------------------------------------------------------------------

    /// Discovers packages, loads external interfaces and parses everything
    /// once, recording graph edges and package-name diagnostics.
    pub fn initialize(&self) -> Result<()> {
        self.load_external_interfaces();
        self.enumerate_module_packages();
        self.enumerate_non_source_packages();
        self.parse_all_packages();
        Ok(())
    }

    fn load_external_interfaces(&self) {
        let modules_home = self.config.modules_home();
        if modules_home.exists() {
            self.cjo.load_external_dir(&modules_home);
        }
        if let Some(std_lib) = &self.config.options.std_lib_path {
            if std_lib.exists() {
                self.cjo.load_external_dir(std_lib);
            }
        }
    }

    /// One package per directory, subpackages by subdirectory; common and
    /// specific source sets register distinct entries sharing one real name.
    fn enumerate_module_packages(&self) {
        for info in self.modules.modules() {
            for root in &info.roots {
                if !root.path.exists() {
                    continue;
                }
                for dir in utils::package_dirs_iter(&root.path) {
                    let has_sources = utils::source_files_iter(&dir)
                        .any(|f| f.parent() == Some(dir.as_path()));
                    if !has_sources {
                        continue;
                    }
                    let Some((full_name, _)) = self.modules.expected_package_name(&dir) else {
                        continue;
                    };
                    self.register_package(
                        &full_name,
                        &dir,
                        info.name.clone(),
                        true,
                        root.source_set.clone(),
                    );
                }
            }
        }
    }

    /// Directories holding sources outside every module's source tree become
    /// synthetic packages keyed by their path.
    fn enumerate_non_source_packages(&self) {
        let workspace = self.config.workspace.clone();
        if !workspace.exists() {
            return;
        }
        let mut dirs: HashSet<PathBuf> = HashSet::new();
        for file in utils::source_files_iter(&workspace) {
            if self.modules.in_any_module(&file) || self.config.is_in_std_lib(&file) {
                continue;
            }
            if let Some(dir) = file.parent() {
                dirs.insert(dir.to_path_buf());
            }
        }
        for dir in dirs {
            let name = utils::normalize_path(&dir).to_string_lossy().into_owned();
            self.register_package(&name, &dir, String::new(), false, None);
        }
    }

    pub(crate) fn register_package(
        &self,
        full_name: &str,
        dir: &Path,
        module: String,
        in_source: bool,
        source_set: Option<String>,
    ) -> Arc<PackageEntry> {
        trace!("registering package \"{full_name}\" at \"{}\"", dir.display());
        let mut input = PackageInput {
            name: full_name.to_string(),
            root: dir.to_path_buf(),
            module: module.clone(),
            options: crate::frontend::InvocationOptions {
                condition: self
                    .config
                    .options
                    .condition_compile(full_name, &module)
                    .into_iter()
                    .collect(),
                cfg_paths: self.config.options.passed_when_cfg_paths.clone(),
                macro_libs: self
                    .config
                    .options
                    .target_lib
                    .clone()
                    .into_iter()
                    .collect(),
            },
            buffers: Default::default(),
        };
        input.read_from_disk();

        let entry = Arc::new(PackageEntry::new(input, module, in_source, source_set));
        let mut state = self.state.write().unwrap();
        state.packages.insert(full_name.to_string(), Arc::clone(&entry));
        state.path_to_package.insert(dir.to_path_buf(), full_name.to_string());
        state.package_to_path.insert(full_name.to_string(), dir.to_path_buf());
        drop(state);
        self.cjo.register(full_name);
        entry
    }

    /// Parses every registered package, recording edges and header checks.
    fn parse_all_packages(&self) {
        let packages: Vec<(String, Arc<PackageEntry>)> = {
            let state = self.state.read().unwrap();
            state.packages.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let parsed: Vec<(String, ParsedPackage)> = packages
            .par_iter()
            .map(|(name, entry)| {
                let input = entry.input.lock().unwrap();
                (name.clone(), self.frontend.parse(&input))
            })
            .collect();

        for (name, parse) in parsed {
            self.record_parse(&name, parse);
        }
    }

    /// Stores a parse result: graph edges, header modifier, name diagnostics.
    pub(crate) fn record_parse(&self, package: &str, parsed: ParsedPackage) {
        let known: HashSet<String> = {
            let state = self.state.read().unwrap();
            state.packages.keys().cloned().collect()
        };
        let edges = parsed
            .upstream_edges()
            .into_iter()
            .filter(|(target, _)| known.contains(target) && target != package)
            .collect();
        self.graph.update_dependencies(package, edges);

        let mut state = self.state.write().unwrap();
        state.pkg_modifier.insert(package.to_string(), parsed.package_visibility);
        state.parsed.insert(package.to_string(), parsed);
    }

    /// Declared-vs-derived name checks plus the package-modifier rule: a
    /// subpackage must not be more visible than its parent.
    fn check_package_headers(&self, package: &str, parsed: &ParsedPackage) {
        let entry = self.package_entry(package);
        let Some(entry) = entry else {
            return;
        };
        if !entry.in_source {
            return;
        }
        let expected = utils::real_package_name(package);

        for file in &parsed.files {
            let Some((declared, _, location)) = &file.package_decl else {
                continue;
            };
            if declared != expected {
                self.diags.push(
                    package,
                    diagnostic_error(
                        location,
                        format!(
                            "declared package \"{declared}\" does not match expected \"{expected}\""
                        ),
                    ),
                );
            }
        }

        if let Some(parent) = expected.rsplit_once('.').map(|(parent, _)| parent) {
            let state = self.state.read().unwrap();
            let parent_vis = entry
                .source_set
                .as_ref()
                .map(|set| format!("{set}-{parent}"))
                .and_then(|full| state.pkg_modifier.get(&full).copied())
                .or_else(|| state.pkg_modifier.get(parent).copied());
            drop(state);
            if let Some(parent_vis) = parent_vis {
                if parsed.package_visibility > parent_vis {
                    for file in &parsed.files {
                        if let Some((_, _, location)) = &file.package_decl {
                            self.diags.push(
                                package,
                                diagnostic_error(
                                    location,
                                    format!(
                                        "package \"{expected}\" is more visible than its parent \"{parent}\""
                                    ),
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // full compilation
    // ------------------------------------------------------------------

    /// Drives the initial build: seed the index from interfaces, reuse disk
    /// caches whose digests match, recompile the rest in dependency order and
    /// finally populate the per-file AST caches.
    pub fn full_compilation(self: &Arc<Self>) -> Result<()> {
        let build_cjo_id = task_id("build-cjo-index");
        {
            let project = Arc::clone(self);
            self.pool.add_task(build_cjo_id, [], move |done| {
                project.build_index_from_interfaces();
                done.task_completed(build_cjo_id);
            });
        }

        let order = self
            .graph
            .topological_sort(false)
            .ok_or_else(|| LsError::CyclicDependency(self.graph.find_cycles()))?;

        // disk caches first: a matching digest skips the recompile entirely;
        // the manifest short-circuits validation when shards went missing
        let cache_usable = !self.config.options.test
            && self.disk.as_ref().map(|d| d.validate_manifest()).unwrap_or(false);
        if cache_usable {
            for package in &order {
                if self.load_ast_cache(package) {
                    self.build_index_from_cache(package);
                }
            }
        }

        for package in &order {
            let id = task_id(package);
            let prerequisites: Vec<u64> = {
                let mut deps: Vec<String> =
                    self.graph.all_dependencies(package).into_iter().collect();
                deps.sort();
                let mut ids: Vec<u64> = deps.iter().map(|d| task_id(d)).collect();
                ids.push(build_cjo_id);
                ids
            };
            let project = Arc::clone(self);
            let package = package.clone();
            self.pool.add_task(id, prerequisites, move |done| {
                if project.cjo.status(&package) != Some(CjoStatus::Stale) {
                    project.cjo.set_status([package.as_str()], CjoStatus::Fresh);
                    done.task_completed(id);
                    return;
                }
                project.compile_package(&package, false);
                done.task_completed(id);
            });
        }
        self.pool.wait_until_all_complete();
        trace!("all tasks are completed in full compilation");

        if let Some(disk) = &self.disk {
            let _ = disk.write_manifest();
        }
        self.populate_file_asts();
        self.report_cycles();
        Ok(())
    }

    /// Seeds index shards from the loaded external interfaces.
    fn build_index_from_interfaces(&self) {
        let packages = self.cjo.external_packages();
        let shards: Vec<(String, IndexShard)> = packages
            .par_iter()
            .filter_map(|package| {
                let bytes = self.cjo.data(package)?;
                let shard = self.frontend.interface_shard(package, &bytes);
                (!shard.is_empty()).then(|| (package.clone(), shard))
            })
            .collect();
        match &self.index {
            IndexBackend::Memory(index) => {
                for (package, shard) in shards {
                    index.insert_shard(&package, shard);
                }
            }
            IndexBackend::Background(index) => {
                for (package, shard) in shards {
                    index.update(&package, shard);
                }
            }
        }
    }

    /// Loads the interface of one package from the disk cache when its source
    /// digest matches; returns whether the package can skip recompilation.
    pub(crate) fn load_ast_cache(&self, package: &str) -> bool {
        let Some(disk) = &self.disk else {
            return false;
        };
        let Some(path) = self.path_of_package(package) else {
            return false;
        };
        let digest = utils::digest(&path.to_string_lossy());
        if disk.is_stale(package, &digest) {
            return false;
        }
        match disk.load(&digest) {
            Some(bytes) => {
                self.cjo.set_data(package, bytes);
                self.cjo.set_status([package], CjoStatus::Fresh);
                true
            }
            None => false,
        }
    }

    /// Restores the cached index shard of one package (memory backend only;
    /// the background index persists its own shards).
    fn build_index_from_cache(&self, package: &str) {
        let Some(index) = self.memory_index() else {
            return;
        };
        let (Some(disk), Some(path)) = (&self.disk, self.path_of_package(package)) else {
            return;
        };
        let digest = utils::digest(&path.to_string_lossy());
        if let Some(shard) = disk.load_shard(&digest) {
            index.insert_shard(package, shard);
        }
    }

    // ------------------------------------------------------------------
    // one package compile
    // ------------------------------------------------------------------

    /// Runs the full pipeline for one package and publishes every artifact.
    /// Background (prerequisite) compiles refresh the LRU only when the
    /// package is already resident, so they cannot displace the package under
    /// edit. Returns whether the interface bytes moved.
    pub(crate) fn compile_package(&self, package: &str, background: bool) -> bool {
        let Some(entry) = self.package_entry(package) else {
            return false;
        };
        if entry.is_redefined() {
            trace!("skipping redefined package \"{package}\"");
            return false;
        }

        self.diags.clear_package(package);

        let (input, parsed) = {
            let input = entry.input.lock().unwrap().clone();
            let parsed = {
                let state = self.state.read().unwrap();
                state.parsed.get(package).cloned()
            };
            let parsed = parsed.unwrap_or_else(|| self.frontend.parse(&input));
            (input, parsed)
        };

        // header checks run on every compile; the clear above wiped the
        // previous round
        self.check_package_headers(package, &parsed);

        let deps = self.interface_snapshot(package, &parsed);
        let checked = self.frontend.check(&input, &parsed, &deps);
        let bytes = self.frontend.export_interface(&checked);

        let changed = self.cjo.check_changed(package, &bytes);
        self.cjo.set_data(package, bytes);
        self.cjo.set_status([package], CjoStatus::Fresh);
        if changed {
            trace!("interface of \"{package}\" changed, updating downstream status");
            self.cjo.update_downstream_packages(package, &self.graph);
        }

        self.diags.extend(package, parsed.diagnostics.iter().cloned());
        self.diags.extend(package, checked.diagnostics.iter().cloned());

        let module = utils::module_of(package).to_string();
        let package_visibility = {
            let state = self.state.read().unwrap();
            state.pkg_modifier.get(package).copied().unwrap_or_default()
        };
        let shard = SymbolCollector::new(&checked.typed, module, package_visibility).build();
        self.publish_shard(package, shard, &input);

        let artifact = PackageArtifact::new(package, checked.typed, checked.error_count);
        let evicted = if background {
            self.lru.set_if_exists(package, artifact)
        } else {
            self.lru.set(package, artifact)
        };
        if let Some((victim, artifact)) = evicted {
            self.drop_file_asts(&victim, artifact.files());
        }

        let persist = if self.config.options.is_deveco {
            checked.error_count == 0
        } else {
            checked.macro_expand_ok
        };
        if persist {
            self.store_package_cache(package);
        }

        {
            let mut entry_input = entry.input.lock().unwrap();
            entry_input.settle();
        }
        changed
    }

    /// Interface bytes of every upstream the compile may import, project
    /// packages in topological order with external interfaces appended.
    pub(crate) fn interface_snapshot(&self, package: &str, parsed: &ParsedPackage) -> CjoSnapshot {
        let deps = self.graph.all_dependencies(package);
        let ordered = self.graph.partial_topological_sort(&deps, false);
        let mut names: Vec<String> = ordered;
        for (target, _) in parsed.upstream_edges() {
            if !deps.contains(&target) && target != package {
                names.push(target);
            }
        }
        self.cjo.snapshot(names.iter().map(String::as_str))
    }

    /// Persists the interface bytes and current shard of one package.
    pub(crate) fn store_package_cache(&self, package: &str) {
        let Some(disk) = &self.disk else {
            return;
        };
        let Some(path) = self.path_of_package(package) else {
            return;
        };
        let Some(bytes) = self.cjo.data(package) else {
            return;
        };
        let digest = utils::digest(&path.to_string_lossy());
        let shard = match &self.index {
            IndexBackend::Memory(index) => index.shard(package).unwrap_or_default(),
            // the background index already persisted its shard
            IndexBackend::Background(_) => IndexShard::default(),
        };
        if let Err(err) = disk.store(package, &digest, &bytes, &shard) {
            warn!("failed to store cache of \"{package}\": {err}");
        }
    }

    /// Persists every package, then refreshes the cache manifest.
    pub fn store_all_packages_cache(&self) {
        let packages: Vec<String> = {
            let state = self.state.read().unwrap();
            state.packages.keys().cloned().collect()
        };
        for package in packages {
            self.store_package_cache(&package);
        }
        if let Some(disk) = &self.disk {
            let _ = disk.write_manifest();
        }
    }

    /// Walks the LRU in insertion order and fills the per-file AST caches
    /// used by definitions, hover and semantic tokens.
    pub(crate) fn populate_file_asts(&self) {
        for (_, artifact) in self.lru.snapshot_in_order() {
            let mut state = self.state.write().unwrap();
            for file in artifact.files() {
                state.file_asts.insert(file.clone(), Arc::clone(&artifact.typed));
            }
        }
    }

    pub(crate) fn drop_file_asts(&self, package: &str, files: &[PathBuf]) {
        trace!("dropping file ASTs of evicted package \"{package}\"");
        let mut state = self.state.write().unwrap();
        for file in files {
            state.file_asts.remove(file);
        }
        drop(state);
        utils::trim_allocator();
    }

    // ------------------------------------------------------------------
    // lookups
    // ------------------------------------------------------------------

    pub(crate) fn package_entry(&self, package: &str) -> Option<Arc<PackageEntry>> {
        let state = self.state.read().unwrap();
        state.packages.get(package).cloned()
    }

    pub fn path_of_package(&self, package: &str) -> Option<PathBuf> {
        let state = self.state.read().unwrap();
        state.package_to_path.get(package).cloned()
    }

    /// The full package name owning `file`, by directory.
    pub fn package_of_file(&self, file: &Path) -> Option<String> {
        let dir = file.parent()?;
        let state = self.state.read().unwrap();
        state.path_to_package.get(dir).cloned()
    }

    /// Classifies a path against the workspace.
    pub fn file_kind(&self, file: &Path) -> (FileKind, Option<String>) {
        if let Some(package) = self.package_of_file(file) {
            let module = self.package_entry(&package).map(|e| e.module.clone());
            return (FileKind::InOldPackage, module);
        }
        if let Some((info, _)) = self.modules.root_of(file) {
            return (FileKind::InNewPackage, Some(info.name.clone()));
        }
        if file.starts_with(&self.config.workspace) {
            return (FileKind::InProjectNotInSource, None);
        }
        (FileKind::Missing, None)
    }

    /// Editor contents of a file as currently buffered.
    pub fn contents_of_file(&self, file: &Path) -> Option<String> {
        let package = self.package_of_file(file)?;
        let entry = self.package_entry(&package)?;
        let input = entry.input.lock().unwrap();
        input.buffers.get(file).map(|b| b.contents.clone())
    }

    /// The typed AST covering `file`, when its package is resident.
    pub fn file_ast(&self, file: &Path) -> Option<Arc<crate::ast::TypedAst>> {
        let state = self.state.read().unwrap();
        state.file_asts.get(file).cloned()
    }

    /// Whether a request on `file` can run without recompiling.
    pub fn file_has_sema_cache(&self, file: &Path) -> bool {
        self.package_of_file(file).map(|pkg| self.lru.has(&pkg)).unwrap_or(false)
    }

    /// Whether the file's package must be recompiled before serving AST
    /// requests.
    pub fn check_need_compile(&self, file: &Path) -> bool {
        match self.package_of_file(file) {
            Some(package) => self.cjo.status(&package) != Some(CjoStatus::Fresh),
            None => false,
        }
    }

    /// Direct dependency modules of the package's module, for completion
    /// filtering.
    pub fn module_deps_of_package(&self, package: &str) -> HashSet<String> {
        let module = utils::module_of(package);
        self.modules.direct_deps(module)
    }

    /// Combined-module root packages suppressed from completion.
    pub fn suppressed_packages(&self, package: &str) -> HashSet<String> {
        let module = utils::module_of(package);
        self.modules.suppressed_packages(module)
    }

    // ------------------------------------------------------------------
    // cycles
    // ------------------------------------------------------------------

    /// Re-reports circular-dependency diagnostics on every file of every
    /// cycle member, plus combined-cycle warnings.
    pub fn report_cycles(&self) {
        let cycles = self.graph.find_cycles();
        for cycle in &cycles {
            let display = cycle.join(" -> ");
            for package in cycle {
                let Some(entry) = self.package_entry(package) else {
                    continue;
                };
                let input = entry.input.lock().unwrap();
                for file in input.buffers.keys() {
                    self.diags.push(
                        package,
                        diagnostic_error(
                            &Location::new(file.clone(), Default::default()),
                            format!("circular dependencies: {display}"),
                        ),
                    );
                }
            }
        }
        self.report_combined_cycles();
    }

    /// A combined module importing its own root package is flagged as a
    /// warning.
    fn report_combined_cycles(&self) {
        for info in self.modules.modules() {
            if !info.combined {
                continue;
            }
            let root_pkg = info.name.clone();
            for dependent in self.graph.dependents(&root_pkg) {
                if utils::module_of(&dependent) != info.name || dependent == root_pkg {
                    continue;
                }
                let Some(entry) = self.package_entry(&dependent) else {
                    continue;
                };
                let input = entry.input.lock().unwrap();
                for file in input.buffers.keys() {
                    let mut diag = diagnostic_error(
                        &Location::new(file.clone(), Default::default()),
                        format!(
                            "combined module \"{}\" imports its own root package",
                            info.name
                        ),
                    );
                    diag.diagnostic.severity = Some(DiagnosticSeverity::WARNING);
                    self.diags.push(&dependent, diag);
                }
            }
        }
    }

    /// Number of packages known to the workspace.
    pub fn package_count(&self) -> usize {
        self.state.read().unwrap().packages.len()
    }

    /// All known package names.
    pub fn package_names(&self) -> Vec<String> {
        self.state.read().unwrap().packages.keys().cloned().collect()
    }
}

pub(crate) fn diagnostic_error(location: &Location, message: String) -> FileDiagnostic {
    FileDiagnostic::new(
        location.file.clone(),
        Diagnostic::new(
            location.range,
            Some(DiagnosticSeverity::ERROR),
            None,
            None,
            message,
            None,
            None,
        ),
    )
}
