//! Database-backed background index.
//!
//! Shards are persisted one file per package under the index database root
//! and mirrored in memory for queries. A file table records, per source file,
//! the owning package and the content digest it was indexed at; rows whose
//! digest no longer matches mark their shard obsolete and the orchestrator
//! reindexes the package.

use super::{
    CompletionSnippet, CrossSymbol, ExtendSymsRequest, FileRefsRequest, FuzzyFindRequest,
    ImportSymsRequest, IndexShard, LookupRequest, MemIndex, QuickFixImportRequest, Ref,
    RefsRequest, Relation, RelationsRequest, Symbol, SymbolId, SymbolIndex,
};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// One row of the file table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FileRow {
    pub package: String,
    pub module: String,
    /// Digest of the file contents at index time.
    pub digest: String,
}

const FILE_TABLE_NAME: &str = "files.json";

#[derive(Debug)]
pub struct BackgroundIndex {
    /// Query cache; always consistent with the persisted shards.
    cache: MemIndex,
    root: Option<PathBuf>,
    files: Mutex<HashMap<PathBuf, FileRow>>,
}

impl BackgroundIndex {
    /// Opens the database under `root`, loading every persisted shard and the
    /// file table. A `None` root keeps the index memory-only.
    pub fn open(root: Option<PathBuf>) -> Self {
        if let Some(root) = &root {
            if let Err(err) = fs::create_dir_all(root) {
                warn!("failed to create index database dir \"{}\": {err}", root.display());
            }
        }
        let index = Self { cache: MemIndex::new(), root, files: Mutex::new(HashMap::new()) };
        index.load_all();
        index
    }

    fn shard_path(&self, package: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(format!("{}.shard", utils::digest(package))))
    }

    fn packages_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join("packages.json"))
    }

    fn file_table_path(&self) -> Option<PathBuf> {
        self.root.as_ref().map(|root| root.join(FILE_TABLE_NAME))
    }

    fn load_all(&self) {
        let Some(path) = self.packages_path() else {
            return;
        };
        let packages: Vec<String> = match utils::read_json_file(&path) {
            Ok(packages) => packages,
            Err(_) => return,
        };
        let mut loaded = 0;
        for package in packages {
            if let Some(shard_path) = self.shard_path(&package) {
                if let Ok(shard) = utils::read_json_file::<IndexShard>(&shard_path) {
                    self.cache.insert_shard(&package, shard);
                    loaded += 1;
                }
            }
        }
        if let Some(path) = self.file_table_path() {
            if let Ok(rows) = utils::read_json_file::<HashMap<PathBuf, FileRow>>(&path) {
                *self.files.lock().unwrap() = rows;
            }
        }
        debug!("background index loaded {loaded} shards");
    }

    fn persist_meta(&self) {
        let Some(path) = self.packages_path() else {
            return;
        };
        let mut packages = self.cache.packages();
        packages.sort();
        if let Err(err) = utils::write_json_file(&packages, &path) {
            warn!("failed to persist index package list: {err}");
        }
        if let Some(path) = self.file_table_path() {
            let rows = self.files.lock().unwrap();
            if let Err(err) = utils::write_json_file(&*rows, &path) {
                warn!("failed to persist index file table: {err}");
            }
        }
    }

    /// Publishes one package's shard and persists it.
    pub fn update(&self, package: &str, shard: IndexShard) {
        if let Some(path) = self.shard_path(package) {
            if let Some(parent) = path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(err) = utils::write_json_file(&shard, &path) {
                warn!("failed to persist shard of \"{package}\": {err}");
            }
        }
        self.cache.insert_shard(package, shard);
        self.persist_meta();
    }

    /// Records file rows for a just-indexed package.
    pub fn update_files(&self, rows: impl IntoIterator<Item = (PathBuf, FileRow)>) {
        {
            let mut files = self.files.lock().unwrap();
            for (path, row) in rows {
                files.insert(path, row);
            }
        }
        self.persist_meta();
    }

    /// Drops the rows of deleted or re-indexed files.
    pub fn delete_files<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) {
        {
            let mut files = self.files.lock().unwrap();
            for path in paths {
                files.remove(path);
            }
        }
        self.persist_meta();
    }

    /// Removes a package's shard from the cache and the database.
    pub fn remove_package(&self, package: &str) {
        self.cache.remove_shard(package);
        if let Some(path) = self.shard_path(package) {
            let _ = fs::remove_file(path);
        }
        let mut files = self.files.lock().unwrap();
        files.retain(|_, row| row.package != package);
        drop(files);
        self.persist_meta();
    }

    /// `true` when the file was indexed at a different content digest and its
    /// package's shard is obsolete.
    pub fn is_obsolete(&self, file: &Path, digest: &str) -> bool {
        let files = self.files.lock().unwrap();
        match files.get(file) {
            Some(row) => row.digest != digest,
            None => true,
        }
    }

    pub fn has_shard(&self, package: &str) -> bool {
        self.cache.has_shard(package)
    }
}

impl SymbolIndex for BackgroundIndex {
    fn fuzzy_find(&self, req: &FuzzyFindRequest, cb: &mut dyn FnMut(&Symbol)) {
        self.cache.fuzzy_find(req, cb)
    }

    fn lookup(&self, req: &LookupRequest, cb: &mut dyn FnMut(&Symbol)) {
        self.cache.lookup(req, cb)
    }

    fn refs(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref)) {
        self.cache.refs(req, cb)
    }

    fn file_refs(&self, req: &FileRefsRequest, cb: &mut dyn FnMut(&Ref, SymbolId)) {
        self.cache.file_refs(req, cb)
    }

    fn refs_find_reference(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref)) -> Option<Ref> {
        self.cache.refs_find_reference(req, cb)
    }

    fn relations(&self, req: &RelationsRequest, cb: &mut dyn FnMut(&Relation)) {
        self.cache.relations(req, cb)
    }

    fn package_symbols(&self, package: &str, cb: &mut dyn FnMut(&Symbol)) {
        self.cache.package_symbols(package, cb)
    }

    fn callees(&self, package: &str, decl: SymbolId, cb: &mut dyn FnMut(SymbolId, &Ref)) {
        self.cache.callees(package, decl, cb)
    }

    fn find_import_syms_on_completion(
        &self,
        req: &ImportSymsRequest,
        cb: &mut dyn FnMut(&str, &Symbol, &CompletionSnippet),
    ) {
        self.cache.find_import_syms_on_completion(req, cb)
    }

    fn find_extend_syms_on_completion(
        &self,
        req: &ExtendSymsRequest,
        cb: &mut dyn FnMut(&str, Option<&str>, &Symbol, &CompletionSnippet),
    ) {
        self.cache.find_extend_syms_on_completion(req, cb)
    }

    fn find_import_syms_on_quick_fix(
        &self,
        req: &QuickFixImportRequest,
        cb: &mut dyn FnMut(&str, &Symbol),
    ) {
        self.cache.find_import_syms_on_quick_fix(req, cb)
    }

    fn find_cross_symbols(
        &self,
        package: &str,
        name: &str,
        combined: bool,
        cb: &mut dyn FnMut(&CrossSymbol),
    ) {
        self.cache.find_cross_symbols(package, name, combined, cb)
    }
}
