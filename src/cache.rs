//! Support for caching typed package artifacts.
//!
//! Two collaborating pieces: a small in-memory LRU of typed packages that
//! bounds peak heap, and an on-disk store of interface bytes and index shards
//! that lets a restart skip recompiling packages whose sources did not move.

use crate::{
    ast::TypedAst,
    error::{LsError, Result},
    index::IndexShard,
    utils,
};
use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// LRU capacity of typed package artifacts.
pub const LRU_SIZE: usize = 3;
/// LRU capacity under the `test` platform flag.
pub const TEST_LRU_SIZE: usize = 8;

/// The file recording the manifest of known shard file names.
pub const VALID_FILE_NAME: &str = "valid.txt";

/// Full compile output of one package kept in memory.
#[derive(Clone, Debug, Default)]
pub struct PackageArtifact {
    /// Full package name.
    pub name: String,
    pub typed: Arc<TypedAst>,
    /// Error count of the producing compile.
    pub error_count: usize,
}

impl PackageArtifact {
    pub fn new(name: impl Into<String>, typed: TypedAst, error_count: usize) -> Self {
        Self { name: name.into(), typed: Arc::new(typed), error_count }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.typed.files
    }
}

#[derive(Debug, Default)]
struct LruInner {
    map: HashMap<String, Arc<PackageArtifact>>,
    /// Recency order, least recently used first.
    order: VecDeque<String>,
}

/// Fixed-capacity LRU of [`PackageArtifact`]s.
///
/// `get` hands out an `Arc` lease: eviction removes the cache's reference,
/// but an artifact stays alive while any request still borrows it, so typed
/// ASTs handed to request actions can never dangle.
#[derive(Debug)]
pub struct ArtifactLru {
    capacity: usize,
    inner: Mutex<LruInner>,
}

impl ArtifactLru {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(LruInner::default()) }
    }

    /// Inserts or refreshes an artifact; returns the evicted entry, if any.
    pub fn set(
        &self,
        package: &str,
        artifact: PackageArtifact,
    ) -> Option<(String, Arc<PackageArtifact>)> {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|name| name != package);
        inner.order.push_back(package.to_string());
        inner.map.insert(package.to_string(), Arc::new(artifact));

        if inner.map.len() > self.capacity {
            if let Some(victim) = inner.order.pop_front() {
                trace!("evicting package artifact \"{victim}\"");
                let evicted = inner.map.remove(&victim);
                return evicted.map(|a| (victim, a));
            }
        }
        None
    }

    /// Replaces an artifact only when the package is already cached; a miss
    /// does not disturb the working set of the package under edit.
    pub fn set_if_exists(
        &self,
        package: &str,
        artifact: PackageArtifact,
    ) -> Option<(String, Arc<PackageArtifact>)> {
        {
            let inner = self.inner.lock().unwrap();
            if !inner.map.contains_key(package) {
                return None;
            }
        }
        self.set(package, artifact)
    }

    /// Fetches an artifact lease and refreshes its recency.
    pub fn get(&self, package: &str) -> Option<Arc<PackageArtifact>> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.map.contains_key(package) {
            return None;
        }
        inner.order.retain(|name| name != package);
        inner.order.push_back(package.to_string());
        inner.map.get(package).cloned()
    }

    pub fn has(&self, package: &str) -> bool {
        self.inner.lock().unwrap().map.contains_key(package)
    }

    /// Drops an artifact explicitly (package deletion or rename).
    pub fn remove(&self, package: &str) -> Option<Arc<PackageArtifact>> {
        let mut inner = self.inner.lock().unwrap();
        inner.order.retain(|name| name != package);
        inner.map.remove(package)
    }

    /// The resident artifacts, least recently used first.
    pub fn snapshot_in_order(&self) -> Vec<(String, Arc<PackageArtifact>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|name| inner.map.get(name).map(|a| (name.clone(), Arc::clone(a))))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// On-disk store of interface bytes and index shards under
/// `cachePath/.cache/`, one `<digest>.cjo` and one `<digest>.shard` per
/// package, where the digest hashes the package's source root.
#[derive(Debug)]
pub struct CacheManager {
    root: PathBuf,
}

impl CacheManager {
    /// Opens (and creates) the cache directory. Returns `None` when the
    /// client configured no cache path; all operations then short-circuit.
    pub fn new(root: Option<PathBuf>) -> Option<Self> {
        let root = root?;
        if let Err(err) = fs::create_dir_all(&root) {
            warn!("failed to create cache dir \"{}\": {err}", root.display());
            return None;
        }
        Some(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn interface_path(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{digest}.{}", utils::INTERFACE_EXTENSION))
    }

    fn shard_path(&self, digest: &str) -> PathBuf {
        self.root.join(format!("{digest}.shard"))
    }

    /// Persists the interface bytes and index shard of one package.
    pub fn store(&self, package: &str, digest: &str, bytes: &[u8], shard: &IndexShard) -> Result<()> {
        trace!("storing cache for \"{package}\" under digest {digest}");
        let interface = self.interface_path(digest);
        utils::create_parent_dir_all(&interface)?;
        fs::write(&interface, bytes).map_err(|err| LsError::io(err, &interface))?;
        utils::write_json_file(shard, &self.shard_path(digest))?;
        Ok(())
    }

    /// `true` when no cache entry exists for the digest and the package must
    /// be recompiled.
    pub fn is_stale(&self, _package: &str, digest: &str) -> bool {
        !self.interface_path(digest).exists()
    }

    /// Loads the cached interface bytes for the digest.
    pub fn load(&self, digest: &str) -> Option<Vec<u8>> {
        fs::read(self.interface_path(digest)).ok()
    }

    /// Loads the cached index shard for the digest.
    pub fn load_shard(&self, digest: &str) -> Option<IndexShard> {
        utils::read_json_file(&self.shard_path(digest)).ok()
    }

    /// Deletes the entries stored under the digest.
    pub fn invalidate(&self, digest: &str) {
        let _ = fs::remove_file(self.interface_path(digest));
        let _ = fs::remove_file(self.shard_path(digest));
    }

    /// The shard file names currently on disk, sorted.
    fn shard_file_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.ends_with(".shard").then_some(name)
            })
            .collect();
        names.sort();
        names
    }

    /// Records the manifest hash of the known shard file names so the next
    /// start can short-circuit cache validation.
    pub fn write_manifest(&self) -> Result<()> {
        let digest = utils::digest(&self.shard_file_names().join("\n"));
        let path = self.root.join(VALID_FILE_NAME);
        fs::write(&path, digest).map_err(|err| LsError::io(err, &path))?;
        Ok(())
    }

    /// `true` when the manifest matches the shard files on disk. A mismatch
    /// is treated as stale, never as an error.
    pub fn validate_manifest(&self) -> bool {
        let path = self.root.join(VALID_FILE_NAME);
        let Ok(recorded) = fs::read_to_string(&path) else {
            return false;
        };
        recorded.trim() == utils::digest(&self.shard_file_names().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> PackageArtifact {
        let typed = TypedAst { package: name.to_string(), ..Default::default() };
        PackageArtifact::new(name, typed, 0)
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let lru = ArtifactLru::new(3);
        assert!(lru.set("a", artifact("a")).is_none());
        assert!(lru.set("b", artifact("b")).is_none());
        assert!(lru.set("c", artifact("c")).is_none());

        // touch a so b becomes the victim
        assert!(lru.get("a").is_some());
        let (victim, _) = lru.set("d", artifact("d")).unwrap();
        assert_eq!(victim, "b");
        assert!(lru.has("a") && lru.has("c") && lru.has("d"));
        assert_eq!(lru.len(), 3);
    }

    #[test]
    fn set_if_exists_does_not_insert() {
        let lru = ArtifactLru::new(3);
        lru.set("a", artifact("a"));
        assert!(lru.set_if_exists("b", artifact("b")).is_none());
        assert!(!lru.has("b"));
        lru.set_if_exists("a", artifact("a"));
        assert!(lru.has("a"));
    }

    #[test]
    fn leases_outlive_eviction() {
        let lru = ArtifactLru::new(1);
        lru.set("a", artifact("a"));
        let lease = lru.get("a").unwrap();
        lru.set("b", artifact("b"));
        assert!(!lru.has("a"));
        // the borrowed artifact is still alive
        assert_eq!(lease.typed.package, "a");
    }

    #[test]
    fn snapshot_preserves_recency_order() {
        let lru = ArtifactLru::new(3);
        lru.set("a", artifact("a"));
        lru.set("b", artifact("b"));
        lru.get("a");
        let names: Vec<String> = lru.snapshot_in_order().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn disk_cache_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(Some(dir.path().join(".cache"))).unwrap();

        let digest = utils::digest("/ws/app/src/net");
        assert!(cache.is_stale("app.net", &digest));

        let shard = IndexShard::default();
        cache.store("app.net", &digest, b"iface", &shard).unwrap();
        assert!(!cache.is_stale("app.net", &digest));
        assert_eq!(cache.load(&digest).unwrap(), b"iface");
        assert!(cache.load_shard(&digest).is_some());

        cache.invalidate(&digest);
        assert!(cache.is_stale("app.net", &digest));
    }

    #[test]
    fn manifest_detects_shard_changes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(Some(dir.path().join(".cache"))).unwrap();
        let digest = utils::digest("/ws/app/src/net");
        cache.store("app.net", &digest, b"iface", &IndexShard::default()).unwrap();

        cache.write_manifest().unwrap();
        assert!(cache.validate_manifest());

        cache.invalidate(&digest);
        assert!(!cache.validate_manifest());
    }
}
