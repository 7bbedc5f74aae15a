//! Utility functions

use crate::error::{LsError, Result};
use md5::Digest;
use once_cell::sync::Lazy;
use path_slash::PathExt;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Extension of a Conjure source file.
pub const SOURCE_EXTENSION: &str = "cj";

/// Extension of a macro-definition source file. Macro sources are expanded by
/// the front-end out of band and never enter a package's buffer cache.
pub const MACRO_EXTENSION: &str = "cjm";

/// Extension of a serialized binary interface.
pub const INTERFACE_EXTENSION: &str = "cjo";

/// A regex that matches a legal dot-separated full package name.
pub static RE_PACKAGE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap());

/// Returns `true` if `path` has the given file extension.
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map(|e| e == ext).unwrap_or(false)
}

/// Returns `true` if the file takes part in a package's buffer cache.
pub fn is_source_file(path: &Path) -> bool {
    has_extension(path, SOURCE_EXTENSION)
}

/// Returns an iterator over all Conjure source files under `root`, or `root`
/// itself if it is a source file. Follows symlinks.
pub fn source_files_iter(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_source_file(e.path()))
        .map(|e| e.path().to_path_buf())
}

/// Returns an iterator over the package directories under a source root: the
/// root itself plus every subdirectory, one package per directory.
pub fn package_dirs_iter(root: &Path) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.path().to_path_buf())
}

/// Canonicalize `path` without UNC prefixes on windows, falling back to the
/// input when the file does not exist yet.
pub fn canonicalize(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Normalizes a path for use as a map key: canonical, `/`-separated.
pub fn normalize_path(path: &Path) -> PathBuf {
    PathBuf::from(canonicalize(path).to_slash_lossy().as_ref())
}

/// Derives the dot-separated package suffix of `dir` relative to `root`.
/// Returns `None` when `dir` is not under `root`.
pub fn package_suffix(root: &Path, dir: &Path) -> Option<String> {
    let rel = dir.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for comp in rel.components() {
        segments.push(comp.as_os_str().to_string_lossy().into_owned());
    }
    Some(segments.join("."))
}

/// Joins a module name and a package suffix into a full package name.
pub fn join_package_name(module: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        module.to_string()
    } else {
        format!("{module}.{suffix}")
    }
}

/// The module (first) segment of a full package name. Source-set prefixes
/// (`specific-foo.bar`) are stripped first.
pub fn module_of(full_pkg_name: &str) -> &str {
    let real = real_package_name(full_pkg_name);
    real.split('.').next().unwrap_or(real)
}

/// Strips the source-set prefix from a full package name, yielding the real
/// package name shared by all source sets.
pub fn real_package_name(full_pkg_name: &str) -> &str {
    match full_pkg_name.split_once('-') {
        Some((_, real)) => real,
        None => full_pkg_name,
    }
}

/// The source-set prefix of a full package name, if any.
pub fn source_set_of(full_pkg_name: &str) -> Option<&str> {
    full_pkg_name.split_once('-').map(|(set, _)| set)
}

/// MD5 digest of a string, hex encoded. Digests key the on-disk cache files.
pub fn digest(input: &str) -> String {
    hex::encode(md5::Md5::digest(input.as_bytes()))
}

/// MD5 digest of a file's contents, hex encoded.
pub fn digest_bytes(input: &[u8]) -> String {
    hex::encode(md5::Md5::digest(input))
}

/// Stable 64-bit FNV-1a hash used for task ids and symbol ids.
pub fn fnv1a(input: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in input {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x1_0000_01b3);
    }
    hash
}

/// Reads the json file and deserializes it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).map_err(|err| LsError::io(err, path))?;
    let file = std::io::BufReader::new(file);
    let val: T = serde_json::from_reader(file)?;
    Ok(val)
}

/// Writes serializes the given value to json into the file.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = fs::File::create(path).map_err(|err| LsError::io(err, path))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush().map_err(|err| LsError::io(err, path))?;
    Ok(())
}

/// Creates the parent directory of the given file.
pub fn create_parent_dir_all(file: &Path) -> Result<()> {
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            LsError::msg(format!(
                "Failed to create artifact parent folder \"{}\": {}",
                parent.display(),
                err
            ))
        })?;
    }
    Ok(())
}

/// Release heap back to the platform allocator after a large eviction. A
/// no-op outside glibc targets.
pub fn trim_allocator() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    unsafe {
        extern "C" {
            fn malloc_trim(pad: usize) -> i32;
        }
        malloc_trim(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_derive_package_suffix() {
        let root = Path::new("/ws/app/src");
        assert_eq!(package_suffix(root, Path::new("/ws/app/src")).unwrap(), "");
        assert_eq!(package_suffix(root, Path::new("/ws/app/src/net/http")).unwrap(), "net.http");
        assert!(package_suffix(root, Path::new("/ws/other")).is_none());
    }

    #[test]
    fn source_set_names_split() {
        assert_eq!(real_package_name("specific-app.net"), "app.net");
        assert_eq!(source_set_of("specific-app.net"), Some("specific"));
        assert_eq!(real_package_name("app.net"), "app.net");
        assert_eq!(module_of("common-app.net.http"), "app");
    }

    #[test]
    fn package_name_regex() {
        assert!(RE_PACKAGE_NAME.is_match("app.net.http2"));
        assert!(!RE_PACKAGE_NAME.is_match("app..net"));
        assert!(!RE_PACKAGE_NAME.is_match("1app"));
    }

    #[test]
    fn fnv_is_stable() {
        assert_eq!(fnv1a(b"app.net"), fnv1a(b"app.net"));
        assert_ne!(fnv1a(b"app.net"), fnv1a(b"app.nets"));
    }
}
