//! Workspace descriptor handling: modules, source sets and require
//! relations.

use crate::{
    config::{CommonSpecificPaths, Config, ModuleDescriptor},
    error::{LsError, Result},
    utils,
};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

/// One source root of a module. Common/specific modules carry several roots,
/// each contributing packages under a source-set prefix.
#[derive(Clone, Debug)]
pub struct SourceRoot {
    pub path: PathBuf,
    /// `None` for plain modules; `Some("common")` / `Some("linux")` for
    /// source-set roots.
    pub source_set: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ModuleInfo {
    pub name: String,
    /// Module root directory, resolved from the descriptor URI.
    pub path: PathBuf,
    pub roots: Vec<SourceRoot>,
    pub combined: bool,
    pub requires: HashSet<String>,
    /// Required external packages keyed by providing module.
    pub packages_requires: HashMap<String, Vec<String>>,
}

impl ModuleInfo {
    pub fn is_common_specific(&self) -> bool {
        self.roots.iter().any(|r| r.source_set.is_some())
    }
}

/// Parsed workspace descriptor plus the resolved require closure.
#[derive(Debug, Default)]
pub struct ModuleManager {
    pub root: PathBuf,
    modules: Vec<ModuleInfo>,
    by_name: HashMap<String, usize>,
    /// module -> direct requires (the module itself included)
    require_packages: HashMap<String, HashSet<String>>,
    /// module -> transitive closure of requires
    require_all_packages: HashMap<String, HashSet<String>>,
    /// module name -> module paths sharing that name
    duplicates: HashMap<String, Vec<PathBuf>>,
}

fn uri_to_path(uri: &str) -> PathBuf {
    let stripped = uri.strip_prefix("file://").unwrap_or(uri);
    PathBuf::from(stripped)
}

impl ModuleManager {
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut manager = ModuleManager { root: config.workspace.clone(), ..Default::default() };

        let mut entries: Vec<(&String, &ModuleDescriptor)> =
            config.options.multi_module.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (uri, descriptor) in entries {
            if descriptor.name.is_empty() {
                return Err(LsError::InvalidDescriptor(format!("module at {uri} has no name")));
            }
            let path = utils::normalize_path(&uri_to_path(uri));
            let roots = Self::resolve_roots(&path, descriptor);
            let info = ModuleInfo {
                name: descriptor.name.clone(),
                path: path.clone(),
                roots,
                combined: descriptor.combined,
                requires: descriptor.requires.iter().cloned().collect(),
                packages_requires: descriptor.packages_requires.clone(),
            };

            manager.duplicates.entry(info.name.clone()).or_default().push(path);
            if manager.by_name.contains_key(&info.name) {
                warn!("duplicate module name \"{}\"", info.name);
            } else {
                manager.by_name.insert(info.name.clone(), manager.modules.len());
            }
            manager.modules.push(info);
        }

        manager.resolve_requires();
        Ok(manager)
    }

    fn resolve_roots(module_path: &Path, descriptor: &ModuleDescriptor) -> Vec<SourceRoot> {
        if let Some(CommonSpecificPaths { common, specific }) = &descriptor.common_specific_paths {
            let mut roots =
                vec![SourceRoot { path: utils::normalize_path(common), source_set: Some("common".into()) }];
            for path in specific {
                let set = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "specific".into());
                roots.push(SourceRoot { path: utils::normalize_path(path), source_set: Some(set) });
            }
            return roots;
        }
        let src = descriptor
            .src_path
            .clone()
            .unwrap_or_else(|| module_path.join("src"));
        vec![SourceRoot { path: utils::normalize_path(&src), source_set: None }]
    }

    /// Resolves per-module require relations and their transitive closure.
    fn resolve_requires(&mut self) {
        for info in &self.modules {
            let mut direct: HashSet<String> = info.requires.clone();
            direct.extend(info.packages_requires.keys().cloned());
            direct.insert(info.name.clone());
            self.require_packages.insert(info.name.clone(), direct);
        }

        for info in &self.modules {
            let mut all = HashSet::new();
            let mut stack = vec![info.name.clone()];
            while let Some(cur) = stack.pop() {
                if !all.insert(cur.clone()) {
                    continue;
                }
                if let Some(direct) = self.require_packages.get(&cur) {
                    for next in direct {
                        if !all.contains(next) {
                            stack.push(next.clone());
                        }
                    }
                }
            }
            self.require_all_packages.insert(info.name.clone(), all);
        }
    }

    pub fn modules(&self) -> &[ModuleInfo] {
        &self.modules
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.by_name.get(name).map(|i| &self.modules[*i])
    }

    /// Module names that appear on more than one descriptor.
    pub fn duplicate_names(&self) -> Vec<&str> {
        self.duplicates
            .iter()
            .filter(|(_, paths)| paths.len() > 1)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The source root containing `path`, with its module. Prefers the
    /// deepest match so nested specific roots win over the module dir.
    pub fn root_of(&self, path: &Path) -> Option<(&ModuleInfo, &SourceRoot)> {
        let mut best: Option<(&ModuleInfo, &SourceRoot)> = None;
        for info in &self.modules {
            for root in &info.roots {
                if path.starts_with(&root.path) {
                    let better = match best {
                        Some((_, prev)) => {
                            root.path.components().count() > prev.path.components().count()
                        }
                        None => true,
                    };
                    if better {
                        best = Some((info, root));
                    }
                }
            }
        }
        best
    }

    /// Whether `path` lies inside any module's roots.
    pub fn in_any_module(&self, path: &Path) -> bool {
        self.root_of(path).is_some()
    }

    /// The full package name a file at `path` is expected to declare, derived
    /// from its directory, with the module prefix and source-set prefix
    /// applied.
    pub fn expected_package_name(&self, path: &Path) -> Option<(String, &ModuleInfo)> {
        let (info, root) = self.root_of(path)?;
        let dir = if utils::is_source_file(path) { path.parent()? } else { path };
        let suffix = utils::package_suffix(&root.path, dir)?;
        let real = utils::join_package_name(&info.name, &suffix);
        let full = match &root.source_set {
            Some(set) => format!("{set}-{real}"),
            None => real,
        };
        Some((full, info))
    }

    /// Whether the file belongs to a common/specific module.
    pub fn is_common_specific(&self, path: &Path) -> bool {
        self.root_of(path).map(|(info, _)| info.is_common_specific()).unwrap_or(false)
    }

    /// Direct dependency set of one module, the module itself included.
    pub fn direct_deps(&self, module: &str) -> HashSet<String> {
        self.require_packages.get(module).cloned().unwrap_or_else(|| {
            let mut set = HashSet::new();
            set.insert(module.to_string());
            set
        })
    }

    /// Transitive require closure of one module.
    pub fn all_deps(&self, module: &str) -> HashSet<String> {
        self.require_all_packages.get(module).cloned().unwrap_or_default()
    }

    pub fn is_combined(&self, module: &str) -> bool {
        self.module(module).map(|m| m.combined).unwrap_or(false)
    }

    /// Whether the symbol-owning package must be suppressed from completion
    /// in `cur_module`: root packages of combined modules are hidden from
    /// other modules.
    pub fn is_combined_sym(&self, cur_module: &str, sym_package: &str) -> bool {
        let owner = utils::module_of(sym_package);
        owner != cur_module && self.is_combined(owner) && sym_package == owner
    }

    /// All root packages hidden from completion in `cur_module`.
    pub fn suppressed_packages(&self, cur_module: &str) -> HashSet<String> {
        self.modules
            .iter()
            .filter(|m| m.combined && m.name != cur_module)
            .map(|m| m.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitializeOptions;
    use serde_json::json;

    fn config() -> Config {
        let options = InitializeOptions::from_json(json!({
            "multiModule": {
                "file:///ws/app": { "name": "app", "srcPath": "/ws/app/src", "requires": ["base"] },
                "file:///ws/base": { "name": "base", "srcPath": "/ws/base/src" },
                "file:///ws/ui": {
                    "name": "ui",
                    "commonSpecificPaths": { "common": "/ws/ui/common", "specific": ["/ws/ui/linux"] },
                    "combined": true,
                    "requires": ["app"],
                },
            },
        }))
        .unwrap();
        Config::new("/ws", options)
    }

    #[test]
    fn expected_names_carry_module_and_source_set_prefixes() {
        let manager = ModuleManager::from_config(&config()).unwrap();
        let (name, info) =
            manager.expected_package_name(Path::new("/ws/app/src/net/client.cj")).unwrap();
        assert_eq!(name, "app.net");
        assert_eq!(info.name, "app");

        let (name, _) =
            manager.expected_package_name(Path::new("/ws/ui/common/widgets/button.cj")).unwrap();
        assert_eq!(name, "common-ui.widgets");
        let (name, _) =
            manager.expected_package_name(Path::new("/ws/ui/linux/widgets/button.cj")).unwrap();
        assert_eq!(name, "linux-ui.widgets");
    }

    #[test]
    fn requires_closure_is_transitive() {
        let manager = ModuleManager::from_config(&config()).unwrap();
        let all = manager.all_deps("ui");
        assert!(all.contains("ui") && all.contains("app") && all.contains("base"));
        let direct = manager.direct_deps("ui");
        assert!(direct.contains("app") && !direct.contains("base"));
    }

    #[test]
    fn combined_roots_are_suppressed_for_other_modules() {
        let manager = ModuleManager::from_config(&config()).unwrap();
        assert!(manager.is_combined_sym("app", "ui"));
        assert!(!manager.is_combined_sym("ui", "ui"));
        assert!(!manager.is_combined_sym("app", "ui.widgets"));
        assert!(manager.suppressed_packages("app").contains("ui"));
    }

    #[test]
    fn files_outside_all_roots_have_no_module() {
        let manager = ModuleManager::from_config(&config()).unwrap();
        assert!(manager.expected_package_name(Path::new("/ws/tools/gen.cj")).is_none());
        assert!(!manager.in_any_module(Path::new("/elsewhere/x.cj")));
    }
}
