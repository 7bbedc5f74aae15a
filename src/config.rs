//! Configuration recognized at initialization.
//!
//! The transport layer hands the raw `initializationOptions` json to
//! [`InitializeOptions::from_json`]; environment lookups are collected into an
//! [`Environment`] once at startup so the rest of the core never reads
//! process state directly.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
};

/// Options passed by the client with the `initialize` request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeOptions {
    /// Directory containing the module binary-interface trees.
    pub modules_home: Option<PathBuf>,
    /// Standard-library source root.
    pub std_lib_path: Option<PathBuf>,
    /// On-disk cache root for indices and interfaces.
    pub cache_path: Option<PathBuf>,
    /// Module descriptors keyed by module URI.
    pub multi_module: HashMap<String, ModuleDescriptor>,
    /// Override for the macro library search path.
    pub target_lib: Option<PathBuf>,
    /// Whether the platform host drives this server.
    pub is_deveco: bool,
    /// Serializes the task pool and disables the completion lane.
    pub test: bool,
    /// Suppresses auto-import completion candidates.
    pub disable_auto_import: bool,
    /// Global condition-compile key/value set.
    pub passed_when_key_value: HashMap<String, String>,
    /// Per-module condition-compile key/value sets, keyed by module name.
    pub module_condition: HashMap<String, HashMap<String, String>>,
    /// Per-package condition-compile key/value sets, keyed by full package
    /// name.
    pub single_package_condition: HashMap<String, HashMap<String, String>>,
    /// Extra search paths for condition-compile configuration.
    pub passed_when_cfg_paths: Vec<PathBuf>,
}

impl InitializeOptions {
    /// Parses the raw `initializationOptions` payload.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// The effective condition-compile set for one package: global values
    /// overridden by the module's, overridden by the package's own.
    pub fn condition_compile(&self, full_pkg_name: &str, module: &str) -> HashMap<String, String> {
        if let Some(single) = self.single_package_condition.get(full_pkg_name) {
            return single.clone();
        }
        let mut merged = self.passed_when_key_value.clone();
        if let Some(per_module) = self.module_condition.get(module) {
            merged.extend(per_module.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        merged
    }
}

/// One entry of the `multiModule` mapping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleDescriptor {
    pub name: String,
    /// Plain source root. Mutually exclusive with `common_specific_paths`.
    pub src_path: Option<PathBuf>,
    /// Source-set layout: a shared `common` root plus per-target overlays.
    pub common_specific_paths: Option<CommonSpecificPaths>,
    /// Whether the module's root-package symbols are suppressed from
    /// cross-package completion.
    pub combined: bool,
    /// Names of the modules this module requires.
    pub requires: Vec<String>,
    /// Required external packages keyed by the providing module.
    pub packages_requires: HashMap<String, Vec<String>>,
}

/// A `common` source root overlaid by one or more `specific` roots.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonSpecificPaths {
    pub common: PathBuf,
    pub specific: Vec<PathBuf>,
}

/// Process environment relevant to the server.
#[derive(Clone, Debug, Default)]
pub struct Environment {
    /// Dynamic loader configuration for macro expansion.
    pub runtime_path: Option<PathBuf>,
    /// Root of the toolchain installation.
    pub conjure_home: Option<PathBuf>,
    /// Explicit compiler binary location, overriding `conjure_home`.
    pub conjure_path: Option<PathBuf>,
}

impl Environment {
    pub fn from_process() -> Self {
        Self {
            runtime_path: env::var_os("runtimePath").map(PathBuf::from),
            conjure_home: env::var_os("cangjieHome").map(PathBuf::from),
            conjure_path: env::var_os("cangjiePath").map(PathBuf::from),
        }
    }
}

/// Fully resolved configuration the orchestrator runs with.
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// Workspace root directory.
    pub workspace: PathBuf,
    pub options: InitializeOptions,
    pub environment: Environment,
}

impl Config {
    pub fn new(workspace: impl Into<PathBuf>, options: InitializeOptions) -> Self {
        Self { workspace: workspace.into(), options, environment: Environment::default() }
    }

    /// The module binary-interface tree, defaulting to
    /// `$conjure_home/modules` and falling back to the user's home directory.
    pub fn modules_home(&self) -> PathBuf {
        if let Some(home) = &self.options.modules_home {
            return home.clone();
        }
        if let Some(home) = &self.environment.conjure_home {
            return home.join("modules");
        }
        dirs::home_dir().unwrap_or_default().join(".conjure").join("modules")
    }

    /// The on-disk cache root; caching is disabled when the client did not
    /// send a `cachePath`.
    pub fn cache_root(&self) -> Option<PathBuf> {
        self.options.cache_path.as_ref().map(|p| p.join(".cache"))
    }

    /// Whether `path` lies inside the standard library tree.
    pub fn is_in_std_lib(&self, path: &Path) -> bool {
        self.options.std_lib_path.as_ref().map(|std| path.starts_with(std)).unwrap_or(false)
    }

    /// LRU capacity for typed package artifacts.
    pub fn lru_capacity(&self) -> usize {
        if self.options.test {
            crate::cache::TEST_LRU_SIZE
        } else {
            crate::cache::LRU_SIZE
        }
    }

    /// Worker count for the recompilation task pool, leaving headroom for the
    /// message and main threads.
    pub fn pool_size(&self) -> usize {
        if self.options.test {
            1
        } else {
            std::cmp::max(1, (num_cpus::get() / 2).saturating_sub(3))
        }
    }
}
