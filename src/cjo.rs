//! Cache of serialized `.cjo` package interfaces.
//!
//! The orchestrator treats interface bytes as opaque; the single equivalence
//! test is a byte-level compare. Each project package carries a freshness
//! status that gates recompilation:
//!
//! ```text
//! FRESH  --edit in pkg-->                      STALE
//! FRESH  --upstream STALE-->                   WEAKSTALE
//! STALE  --compile done, bytes unchanged-->    FRESH (downstream untouched)
//! STALE  --compile done, bytes changed-->      FRESH, may-dependents STALE,
//!                                              other dependents WEAKSTALE
//! WEAKSTALE --upstreams FRESH, unchanged-->    FRESH (no recompile)
//! WEAKSTALE --upstream changed-->              STALE
//! ```
//!
//! Interfaces of the standard library and external modules live in a
//! read-only side table that edits never invalidate.

use crate::{graph::DependencyGraph, utils};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex, RwLock},
};

/// Freshness of one package's serialized interface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CjoStatus {
    Fresh,
    #[default]
    Stale,
    WeakStale,
}

#[derive(Debug, Default)]
struct CjoEntry {
    status: CjoStatus,
    data: Option<Arc<Vec<u8>>>,
}

/// Project-package interface cache plus the read-only external table.
#[derive(Debug, Default)]
pub struct CjoCache {
    entries: Mutex<HashMap<String, CjoEntry>>,
    external: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl CjoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a project package; new packages start STALE.
    pub fn register(&self, package: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(package.to_string()).or_default();
    }

    /// Drops a package's entry entirely.
    pub fn remove(&self, package: &str) {
        self.entries.lock().unwrap().remove(package);
    }

    /// Moves an entry under a new package name.
    pub fn rename(&self, old: &str, new: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.remove(old) {
            entries.insert(new.to_string(), entry);
        }
    }

    pub fn status(&self, package: &str) -> Option<CjoStatus> {
        self.entries.lock().unwrap().get(package).map(|e| e.status)
    }

    /// Sets the status of every named package. Unknown packages are ignored.
    pub fn set_status<'a>(&self, packages: impl IntoIterator<Item = &'a str>, status: CjoStatus) {
        let mut entries = self.entries.lock().unwrap();
        for package in packages {
            if let Some(entry) = entries.get_mut(package) {
                entry.status = status;
            }
        }
    }

    /// The subset of `packages` whose interface is STALE.
    pub fn check_status<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a str>,
    ) -> HashSet<String> {
        let entries = self.entries.lock().unwrap();
        packages
            .into_iter()
            .filter(|p| entries.get(*p).map(|e| e.status == CjoStatus::Stale).unwrap_or(false))
            .map(str::to_string)
            .collect()
    }

    /// The subset of `packages` that is not FRESH. These are the packages a
    /// recompile wave must visit: STALE ones compile, WEAKSTALE ones resolve
    /// to FRESH once their prerequisites finish without changing bytes.
    pub fn pending<'a>(&self, packages: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
        let entries = self.entries.lock().unwrap();
        packages
            .into_iter()
            .filter(|p| entries.get(*p).map(|e| e.status != CjoStatus::Fresh).unwrap_or(false))
            .map(str::to_string)
            .collect()
    }

    /// The stored interface bytes, consulting the external table for packages
    /// the project does not own.
    pub fn data(&self, package: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(entry) = self.entries.lock().unwrap().get(package) {
            if let Some(data) = &entry.data {
                return Some(Arc::clone(data));
            }
        }
        self.external.read().unwrap().get(package).cloned()
    }

    /// Stores freshly exported interface bytes.
    pub fn set_data(&self, package: &str, bytes: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(package.to_string()).or_default().data = Some(Arc::new(bytes));
    }

    /// Whether `new_bytes` differ from the stored interface. A package with
    /// no stored interface counts as changed.
    pub fn check_changed(&self, package: &str, new_bytes: &[u8]) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(package).and_then(|e| e.data.as_deref()) {
            Some(old) => old.as_slice() != new_bytes,
            None => true,
        }
    }

    /// Propagates a changed interface: every may-dependent (reachable while
    /// edges stay non-private, plus the direct dependents themselves) must
    /// recompile and turns STALE; the remaining transitive dependents turn
    /// WEAKSTALE unless already STALE.
    pub fn update_downstream_packages(&self, package: &str, graph: &DependencyGraph) {
        let must_recompile = graph.may_dependents(package);
        let all = graph.all_dependents(package);

        let mut entries = self.entries.lock().unwrap();
        for dependent in &must_recompile {
            if let Some(entry) = entries.get_mut(dependent) {
                entry.status = CjoStatus::Stale;
            }
        }
        for dependent in all.difference(&must_recompile) {
            if let Some(entry) = entries.get_mut(dependent) {
                if entry.status == CjoStatus::Fresh {
                    entry.status = CjoStatus::WeakStale;
                }
            }
        }
    }

    /// Loads every `.cjo` under `dir` into the read-only external table,
    /// keyed by file stem (the full package name).
    pub fn load_external_dir(&self, dir: &Path) -> usize {
        let mut loaded = 0;
        let mut external = self.external.write().unwrap();
        for entry in walkdir::WalkDir::new(dir).follow_links(true).into_iter().flatten() {
            let path = entry.path();
            if !entry.file_type().is_file() || !utils::has_extension(path, utils::INTERFACE_EXTENSION)
            {
                continue;
            }
            let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };
            match std::fs::read(path) {
                Ok(bytes) => {
                    external.insert(stem, Arc::new(bytes));
                    loaded += 1;
                }
                Err(err) => {
                    warn!("failed to read interface \"{}\": {err}", path.display());
                }
            }
        }
        trace!("loaded {loaded} external interfaces from \"{}\"", dir.display());
        loaded
    }

    /// Registers one external interface directly.
    pub fn insert_external(&self, package: &str, bytes: Vec<u8>) {
        self.external.write().unwrap().insert(package.to_string(), Arc::new(bytes));
    }

    /// Names of all external interfaces.
    pub fn external_packages(&self) -> Vec<String> {
        self.external.read().unwrap().keys().cloned().collect()
    }

    /// A read-only snapshot of the interfaces of `packages`, in the given
    /// (topological) order. The completion lane compiles against snapshots
    /// exclusively so it can never write back into this cache.
    pub fn snapshot<'a>(&self, packages: impl IntoIterator<Item = &'a str>) -> CjoSnapshot {
        let mut snapshot = CjoSnapshot::default();
        for package in packages {
            if let Some(data) = self.data(package) {
                snapshot.order.push(package.to_string());
                snapshot.interfaces.insert(package.to_string(), data);
            }
        }
        snapshot
    }
}

/// An immutable set of interface bytes handed to one front-end invocation.
#[derive(Clone, Debug, Default)]
pub struct CjoSnapshot {
    order: Vec<String>,
    interfaces: BTreeMap<String, Arc<Vec<u8>>>,
}

impl CjoSnapshot {
    pub fn get(&self, package: &str) -> Option<&[u8]> {
        self.interfaces.get(package).map(|b| b.as_slice())
    }

    /// Interfaces in import order, upstream first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.order.iter().filter_map(|name| {
            self.interfaces.get(name).map(|bytes| (name.as_str(), bytes.as_slice()))
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
