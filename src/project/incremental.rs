//! Incremental compilation on edits, deletions and renames.

use super::{FileKind, Project};
use crate::{
    cjo::CjoStatus,
    frontend::{Frontend, ParsedPackage},
    pool::task_id,
    utils,
};
use std::{
    collections::HashSet,
    path::Path,
    sync::Arc,
};

impl<F: Frontend> Project<F> {
    /// Entry point for a single file edit: updates the buffer cache and
    /// recompiles the owning package together with its stale prerequisites.
    pub fn increment_one_pkg_compile(self: &Arc<Self>, file: &Path, contents: String) {
        let (kind, module) = self.file_kind(file);
        match kind {
            FileKind::Missing => {
                trace!("ignoring edit outside the workspace: \"{}\"", file.display());
            }
            FileKind::InNewPackage => {
                let Some(module) = module else {
                    return;
                };
                if let Some(package) = self.handle_new_package(file, &contents, &module) {
                    self.update_buffer(&package, file, contents);
                    self.incremental_compile(&package, file, false);
                }
            }
            FileKind::InOldPackage | FileKind::InProjectNotInSource => {
                let Some(package) = self.package_of_file(file) else {
                    return;
                };
                self.update_buffer(&package, file, contents);
                self.incremental_compile(&package, file, false);
            }
        }
    }

    /// Drops a deleted file from its package and recompiles; an emptied
    /// package is retired from every component.
    pub fn increment_for_file_delete(self: &Arc<Self>, file: &Path) {
        let Some(package) = self.package_of_file(file) else {
            return;
        };
        let Some(entry) = self.package_entry(&package) else {
            return;
        };
        let still_populated = {
            let mut input = entry.input.lock().unwrap();
            input.remove_buffer(file)
        };
        self.diags.remove_doc_by_file(file);
        if let Some(index) = self.background_index() {
            index.delete_files([file]);
        }

        if still_populated {
            self.incremental_compile(&package, file, true);
        } else {
            self.retire_package(&package);
        }
    }

    /// A watched file changed on disk without an open buffer: refresh the
    /// buffer cache from disk and mark the package stale.
    pub fn update_on_disk(&self, file: &Path) {
        let Some(package) = self.package_of_file(file) else {
            return;
        };
        let Some(entry) = self.package_entry(&package) else {
            return;
        };
        if let Ok(contents) = std::fs::read_to_string(file) {
            let mut input = entry.input.lock().unwrap();
            input.set_buffer(file, contents);
        }
        self.cjo.set_status([package.as_str()], CjoStatus::Stale);
    }

    /// Recompiles the package owning `file` when its artifact was evicted or
    /// its interface went stale, so AST-level requests see fresh state.
    pub fn rehydrate_package_of(self: &Arc<Self>, file: &Path) {
        if let Some(package) = self.package_of_file(file) {
            self.rehydrate_package(&package);
        }
    }

    /// Recompiles a package whose artifact was evicted or whose interface is
    /// no longer fresh. Index queries never need this.
    pub fn rehydrate_package(self: &Arc<Self>, package: &str) {
        if self.lru.has(package) && self.cjo.status(package) == Some(CjoStatus::Fresh) {
            return;
        }
        trace!("rehydrating package \"{package}\"");
        let deps = self.graph.all_dependencies(package);
        let pending = self.cjo.pending(deps.iter().map(String::as_str));
        self.submit_tasks_to_pool(pending);
        self.compile_package(package, false);
        self.populate_file_asts();
    }

    fn update_buffer(&self, package: &str, file: &Path, contents: String) {
        if utils::has_extension(file, utils::MACRO_EXTENSION) {
            return;
        }
        let Some(entry) = self.package_entry(package) else {
            return;
        };
        let mut input = entry.input.lock().unwrap();
        input.set_buffer(file, contents);
    }

    /// Parse, reconcile identity, resolve prerequisites, compile, publish.
    fn incremental_compile(self: &Arc<Self>, package: &str, file: &Path, is_delete: bool) {
        trace!("start incremental compilation for \"{package}\"");
        let Some(entry) = self.package_entry(package) else {
            return;
        };

        let input = entry.input.lock().unwrap().clone();
        let parsed = self.frontend.parse(&input);

        // identity first: the declared header may rename the package
        let package = self.reconcile_package_identity(package, &parsed);
        self.diags.clear_package(&package);
        self.record_parse(&package, parsed);
        self.cjo.set_status([package.as_str()], CjoStatus::Stale);

        let cycles = self.graph.find_cycles();
        let in_cycle = cycles.iter().any(|cycle| cycle.contains(&package));

        if !in_cycle {
            let upstream = self.graph.all_dependencies(&package);
            let pending = self.cjo.pending(upstream.iter().map(String::as_str));
            self.submit_tasks_to_pool(pending);
            let changed = self.compile_package(&package, false);
            if changed {
                // downstream recompiles complete before the next idle so
                // their diagnostics reach the client without a new request
                let downstream = self.graph.all_dependents(&package);
                let pending = self.cjo.pending(downstream.iter().map(String::as_str));
                self.submit_tasks_to_pool(pending);
            }
            self.populate_file_asts();
        }

        self.report_cycles();
        if is_delete {
            self.diags.remove_doc_by_file(file);
        } else {
            self.diags.emit_diags_of_file(file);
        }
        trace!("finish incremental compilation for \"{package}\"");
    }

    /// Creates the package record for a file that appeared in a directory no
    /// package occupies yet, first reconciling against an existing entry the
    /// file may have moved out of: when the file still declares an existing
    /// package's name, that entry is renamed to the new derived name instead
    /// of being recreated, preserving every downstream edge. The common
    /// source-set counterpart, if any, turns stale so its next compile sees
    /// the new package.
    fn handle_new_package(&self, file: &Path, contents: &str, _module: &str) -> Option<String> {
        let dir = file.parent()?;
        let (full_name, info) = self.modules.expected_package_name(dir)?;
        let module_name = info.name.clone();
        let source_set = self
            .modules
            .root_of(dir)
            .and_then(|(_, root)| root.source_set.clone());

        if let Some(moved) = self.find_moved_package(file, contents, &full_name, &source_set) {
            self.rename_moved_package(&moved, &full_name, dir);
            return Some(full_name);
        }

        self.register_package(&full_name, dir, module_name, true, source_set.clone());

        if let Some(set) = source_set {
            if set != "common" {
                let common = format!("common-{}", utils::real_package_name(&full_name));
                self.cjo.set_status([common.as_str()], CjoStatus::Stale);
            }
        }
        Some(full_name)
    }

    /// An existing entry whose declared name the moved file still carries.
    fn find_moved_package(
        &self,
        file: &Path,
        contents: &str,
        new_full_name: &str,
        source_set: &Option<String>,
    ) -> Option<String> {
        let mut probe = crate::frontend::PackageInput::default();
        probe.set_buffer(file, contents.to_string());
        let declared = self.frontend.parse(&probe).declared_name?;

        let candidate = match source_set {
            Some(set) => format!("{set}-{declared}"),
            None => declared,
        };
        if candidate == new_full_name {
            return None;
        }
        let state = self.state.read().unwrap();
        (state.packages.contains_key(&candidate) && !state.packages.contains_key(new_full_name))
            .then_some(candidate)
    }

    /// Moves a package entry to a new name and directory, keeping downstream
    /// edges intact and invalidating its stale on-disk shard.
    fn rename_moved_package(&self, old: &str, new: &str, new_dir: &Path) {
        trace!("package \"{old}\" moved, renaming to \"{new}\"");
        let old_path = self.path_of_package(old);
        {
            let mut state = self.state.write().unwrap();
            if let Some(entry) = state.packages.remove(old) {
                {
                    let mut input = entry.input.lock().unwrap();
                    input.name = new.to_string();
                    input.root = new_dir.to_path_buf();
                    // buffers that left the old directory are gone from disk
                    input.buffers.retain(|path, _| path.exists());
                }
                state.packages.insert(new.to_string(), entry);
            }
            if let Some(path) = state.package_to_path.remove(old) {
                state.path_to_package.remove(&path);
            }
            state.package_to_path.insert(new.to_string(), new_dir.to_path_buf());
            state.path_to_package.insert(new_dir.to_path_buf(), new.to_string());
            state.parsed.remove(old);
            if let Some(modifier) = state.pkg_modifier.remove(old) {
                state.pkg_modifier.insert(new.to_string(), modifier);
            }
        }
        self.graph.rename_package(old, new);
        self.cjo.remove(old);
        self.cjo.register(new);
        self.lru.remove(old);
        self.retire_shard(old);
        self.diags.rename_package(old, new);
        if let (Some(disk), Some(path)) = (&self.disk, old_path) {
            disk.invalidate(&utils::digest(&path.to_string_lossy()));
        }
    }

    /// When a package's registration no longer matches the full
    /// name its directory derives, rename the entry in place; when the
    /// derived name is occupied by another entry, park the package as
    /// redefined: its buffers are kept but never type-checked, and the
    /// diagnostics point at the duplicate. Declared-name mismatches on file
    /// headers stay diagnostics and never rename anything.
    pub(crate) fn reconcile_package_identity(
        &self,
        package: &str,
        parsed: &ParsedPackage,
    ) -> String {
        let Some(entry) = self.package_entry(package) else {
            return package.to_string();
        };
        if !entry.in_source {
            return package.to_string();
        }
        let Some(dir) = self.path_of_package(package) else {
            return package.to_string();
        };
        let Some((derived, _)) = self.modules.expected_package_name(&dir) else {
            return package.to_string();
        };
        if derived == package {
            entry.redefined.store(false, std::sync::atomic::Ordering::SeqCst);
            return package.to_string();
        }

        let occupied = {
            let state = self.state.read().unwrap();
            state.packages.contains_key(&derived)
        };
        if occupied {
            warn!("package \"{derived}\" is already defined, parking \"{package}\"");
            entry.redefined.store(true, std::sync::atomic::Ordering::SeqCst);
            if let Some(other) = self.path_of_package(&derived) {
                for parsed_file in &parsed.files {
                    if let Some((_, _, location)) = &parsed_file.package_decl {
                        self.diags.push(
                            package,
                            super::diagnostic_error(
                                location,
                                format!(
                                    "package \"{}\" is already defined in \"{}\"",
                                    utils::real_package_name(&derived),
                                    other.display()
                                ),
                            ),
                        );
                    }
                }
            }
            return package.to_string();
        }

        self.rename_moved_package(package, &derived, &dir);
        derived
    }

    /// Clears an emptied or deleted package from every component.
    pub(crate) fn retire_package(&self, package: &str) {
        trace!("retiring package \"{package}\"");
        let dependents = self.graph.dependents(package);
        self.cjo
            .set_status(dependents.iter().map(String::as_str), CjoStatus::Stale);

        let path = self.path_of_package(package);
        let files: Vec<std::path::PathBuf> = {
            let state = self.state.read().unwrap();
            state
                .packages
                .get(package)
                .map(|entry| entry.input.lock().unwrap().buffers.keys().cloned().collect())
                .unwrap_or_default()
        };
        {
            let mut state = self.state.write().unwrap();
            state.packages.remove(package);
            if let Some(path) = state.package_to_path.remove(package) {
                state.path_to_package.remove(&path);
            }
            state.parsed.remove(package);
            state.pkg_modifier.remove(package);
            for file in &files {
                state.file_asts.remove(file);
            }
        }
        self.graph.remove_package(package);
        self.cjo.remove(package);
        self.lru.remove(package);
        self.retire_shard(package);
        self.diags.clear_package(package);
        if let (Some(disk), Some(path)) = (&self.disk, path) {
            disk.invalidate(&utils::digest(&path.to_string_lossy()));
        }
    }

    /// Submits a wave of prerequisite recompiles, in dependency order, and
    /// blocks until the pool is quiescent. Packages that turn out FRESH (or
    /// resolve their WEAKSTALE) complete without compiling.
    pub(crate) fn submit_tasks_to_pool(self: &Arc<Self>, tasks: HashSet<String>) {
        if tasks.is_empty() {
            return;
        }
        let mut all_tasks = tasks.clone();
        let mut outside = HashSet::new();
        for package in &tasks {
            let deps = self.graph.all_dependencies(package);
            for dep in self.cjo.pending(deps.iter().map(String::as_str)) {
                if !tasks.contains(&dep) {
                    outside.insert(dep);
                }
            }
        }
        all_tasks.extend(outside);

        let sorted = self.graph.partial_topological_sort(&all_tasks, false);
        for package in sorted {
            let id = task_id(&package);
            let prerequisites: Vec<u64> = {
                let deps = self.graph.all_dependencies(&package);
                let mut pending: Vec<String> = self
                    .cjo
                    .pending(deps.iter().map(String::as_str))
                    .into_iter()
                    .collect();
                pending.sort();
                pending.iter().map(|d| task_id(d)).collect()
            };
            let project = Arc::clone(self);
            self.pool.add_task(id, prerequisites, move |done| {
                trace!("start execute task \"{package}\"");
                if project.cjo.status(&package) != Some(CjoStatus::Stale) {
                    trace!("no recompile needed for \"{package}\"");
                    project.cjo.set_status([package.as_str()], CjoStatus::Fresh);
                    done.task_completed(id);
                    return;
                }
                project.compile_package(&package, true);
                done.task_completed(id);
                trace!("finish execute task \"{package}\"");
            });
        }
        self.pool.wait_until_all_complete();
    }
}
