//! Process-resident index backend.
//!
//! Shards live in one map keyed by full package name; every query walks the
//! shards under a single lock. Publication replaces a package's shard
//! wholesale, so removed shards can never leak references.

use super::{
    accessible, fuzzy_score, package_relation, CompletionSnippet, CrossSymbol, ExtendSymsRequest,
    FileRefsRequest, FuzzyFindRequest, ImportSymsRequest, IndexShard, LookupRequest,
    QuickFixImportRequest, Ref, RefKind, RefsRequest, Relation, RelationsRequest, Symbol,
    SymbolId, SymbolIndex,
};
use std::{
    collections::HashMap,
    sync::Mutex,
};

#[derive(Debug, Default)]
pub struct MemIndex {
    shards: Mutex<HashMap<String, IndexShard>>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes (replaces) the shard of one package.
    pub fn insert_shard(&self, package: &str, shard: IndexShard) {
        self.shards.lock().unwrap().insert(package.to_string(), shard);
    }

    pub fn remove_shard(&self, package: &str) {
        self.shards.lock().unwrap().remove(package);
    }

    pub fn rename_shard(&self, old: &str, new: &str) {
        let mut shards = self.shards.lock().unwrap();
        if let Some(shard) = shards.remove(old) {
            shards.insert(new.to_string(), shard);
        }
    }

    pub fn has_shard(&self, package: &str) -> bool {
        self.shards.lock().unwrap().contains_key(package)
    }

    pub fn packages(&self) -> Vec<String> {
        self.shards.lock().unwrap().keys().cloned().collect()
    }

    /// Snapshot of one shard, for persistence.
    pub fn shard(&self, package: &str) -> Option<IndexShard> {
        self.shards.lock().unwrap().get(package).cloned()
    }

    fn scope_allowed(req: &FuzzyFindRequest, symbol: &Symbol) -> bool {
        if req.any_scope {
            return true;
        }
        if req.scopes.is_empty() {
            return symbol.scope.is_empty();
        }
        req.scopes.iter().any(|scope| symbol.scope == *scope)
    }
}

impl SymbolIndex for MemIndex {
    fn fuzzy_find(&self, req: &FuzzyFindRequest, cb: &mut dyn FnMut(&Symbol)) {
        let shards = self.shards.lock().unwrap();
        let mut matches: Vec<(u32, &Symbol)> = Vec::new();
        for shard in shards.values() {
            for symbol in &shard.symbols {
                if req.restrict_for_completion && symbol.not_for_completion {
                    continue;
                }
                if !Self::scope_allowed(req, symbol) {
                    continue;
                }
                if let Some(score) = fuzzy_score(&req.query, &symbol.name) {
                    matches.push((score, symbol));
                }
            }
        }
        matches.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        let limit = req.limit.unwrap_or(usize::MAX);
        for (_, symbol) in matches.into_iter().take(limit) {
            cb(symbol);
        }
    }

    fn lookup(&self, req: &LookupRequest, cb: &mut dyn FnMut(&Symbol)) {
        let shards = self.shards.lock().unwrap();
        for id in &req.ids {
            'found: for shard in shards.values() {
                for symbol in &shard.symbols {
                    if symbol.id == *id {
                        cb(symbol);
                        break 'found;
                    }
                }
            }
        }
    }

    fn refs(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref)) {
        let shards = self.shards.lock().unwrap();
        for id in &req.ids {
            for shard in shards.values() {
                let Some(refs) = shard.refs.get(id) else {
                    continue;
                };
                for reference in refs {
                    if !req.filter.allows(reference.kind) || reference.is_super {
                        continue;
                    }
                    cb(reference);
                }
            }
        }
    }

    fn file_refs(&self, req: &FileRefsRequest, cb: &mut dyn FnMut(&Ref, SymbolId)) {
        let shards = self.shards.lock().unwrap();
        for shard in shards.values() {
            for (id, refs) in &shard.refs {
                for reference in refs {
                    if !req.filter.allows(reference.kind) || reference.location.file != req.file {
                        continue;
                    }
                    cb(reference, *id);
                }
            }
        }
    }

    fn refs_find_reference(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref)) -> Option<Ref> {
        let shards = self.shards.lock().unwrap();
        let mut definition = None;
        for id in &req.ids {
            for shard in shards.values() {
                let Some(refs) = shard.refs.get(id) else {
                    continue;
                };
                for reference in refs {
                    if reference.kind == RefKind::Definition {
                        definition = Some(reference.clone());
                    }
                    if !req.filter.allows(reference.kind) {
                        continue;
                    }
                    cb(reference);
                }
            }
        }
        definition
    }

    fn relations(&self, req: &RelationsRequest, cb: &mut dyn FnMut(&Relation)) {
        let shards = self.shards.lock().unwrap();
        for shard in shards.values() {
            for relation in &shard.relations {
                if relation.predicate != req.predicate {
                    continue;
                }
                if relation.subject == req.id || relation.object == req.id {
                    cb(relation);
                }
            }
        }
    }

    fn package_symbols(&self, package: &str, cb: &mut dyn FnMut(&Symbol)) {
        let shards = self.shards.lock().unwrap();
        if let Some(shard) = shards.get(package) {
            for symbol in &shard.symbols {
                cb(symbol);
            }
        }
    }

    fn callees(&self, package: &str, decl: SymbolId, cb: &mut dyn FnMut(SymbolId, &Ref)) {
        let shards = self.shards.lock().unwrap();
        let Some(shard) = shards.get(package) else {
            return;
        };
        for (callee, refs) in &shard.refs {
            for reference in refs {
                if reference.container == decl {
                    cb(*callee, reference);
                }
            }
        }
    }

    fn find_import_syms_on_completion(
        &self,
        req: &ImportSymsRequest,
        cb: &mut dyn FnMut(&str, &Symbol, &CompletionSnippet),
    ) {
        let shards = self.shards.lock().unwrap();
        for (package, shard) in shards.iter() {
            if *package == req.current_package || req.suppressed_packages.contains(package) {
                continue;
            }
            let relation = package_relation(&req.current_package, package);
            for symbol in &shard.symbols {
                // the package header gates every symbol of the shard at once
                if !accessible(relation, symbol.package_visibility) {
                    break;
                }
                if !symbol.is_cjo_sym && !req.module_deps.contains(&symbol.module) {
                    continue;
                }
                if req.already_visible.contains(&symbol.id) || req.imported.contains(&symbol.id) {
                    continue;
                }
                if !symbol.scope.is_empty() || symbol.not_for_completion {
                    continue;
                }
                if fuzzy_score(&req.prefix, &symbol.name).is_none() {
                    continue;
                }
                if !accessible(relation, symbol.visibility) {
                    continue;
                }
                for item in &symbol.completion_items {
                    cb(package, symbol, item);
                }
            }
        }
    }

    fn find_extend_syms_on_completion(
        &self,
        req: &ExtendSymsRequest,
        cb: &mut dyn FnMut(&str, Option<&str>, &Symbol, &CompletionSnippet),
    ) {
        let shards = self.shards.lock().unwrap();
        for (package, shard) in shards.iter() {
            if *package == req.current_package || req.suppressed_packages.contains(package) {
                continue;
            }
            let relation = package_relation(&req.current_package, package);
            let Some(extensions) = shard.extensions.get(&req.extended) else {
                continue;
            };
            let by_id: HashMap<SymbolId, &Symbol> =
                shard.symbols.iter().map(|s| (s.id, s)).collect();
            for extension in extensions {
                if req.visible_members.contains(&extension.member) {
                    continue;
                }
                let Some(symbol) = by_id.get(&extension.member) else {
                    continue;
                };
                if !symbol.is_cjo_sym && !req.module_deps.contains(&symbol.module) {
                    continue;
                }
                if !accessible(relation, extension.visibility)
                    || !accessible(relation, symbol.visibility)
                {
                    continue;
                }
                for item in &symbol.completion_items {
                    cb(package, extension.interface.as_deref(), symbol, item);
                }
            }
        }
    }

    fn find_import_syms_on_quick_fix(
        &self,
        req: &QuickFixImportRequest,
        cb: &mut dyn FnMut(&str, &Symbol),
    ) {
        let shards = self.shards.lock().unwrap();
        for (package, shard) in shards.iter() {
            if *package == req.current_package || req.suppressed_packages.contains(package) {
                continue;
            }
            let relation = package_relation(&req.current_package, package);
            for symbol in &shard.symbols {
                if !accessible(relation, symbol.package_visibility) {
                    break;
                }
                if symbol.name != req.identifier {
                    continue;
                }
                if !symbol.is_cjo_sym && !req.module_deps.contains(&symbol.module) {
                    continue;
                }
                if req.imported.contains(&symbol.id) || !symbol.scope.is_empty() {
                    continue;
                }
                if accessible(relation, symbol.visibility) {
                    cb(package, symbol);
                }
            }
        }
    }

    fn find_cross_symbols(
        &self,
        package: &str,
        name: &str,
        combined: bool,
        cb: &mut dyn FnMut(&CrossSymbol),
    ) {
        let shards = self.shards.lock().unwrap();
        let mut targets: Vec<&String> = Vec::new();
        for candidate in shards.keys() {
            if candidate == package || (combined && candidate.starts_with(package)) {
                targets.push(candidate);
            }
        }
        targets.sort();
        for target in targets {
            if let Some(shard) = shards.get(target) {
                for cross in &shard.cross_symbols {
                    if cross.name == name {
                        cb(cross);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::RefFilter;
    use crate::ast::{Location, Visibility};

    fn symbol(package: &str, name: &str, visibility: Visibility) -> Symbol {
        Symbol {
            id: SymbolId::of(&format!("{package}.{name}")),
            name: name.to_string(),
            visibility,
            package_visibility: Visibility::Public,
            module: package.split('.').next().unwrap_or(package).to_string(),
            completion_items: vec![CompletionSnippet {
                label: name.to_string(),
                insert_text: name.to_string(),
            }],
            ..Default::default()
        }
    }

    fn shard_with(symbols: Vec<Symbol>) -> IndexShard {
        IndexShard { symbols, ..Default::default() }
    }

    #[test]
    fn lookup_returns_at_most_one_symbol_per_id() {
        let index = MemIndex::new();
        index.insert_shard("app.net", shard_with(vec![symbol("app.net", "Client", Visibility::Public)]));
        let id = SymbolId::of("app.net.Client");
        let mut seen = 0;
        index.lookup(&LookupRequest { ids: vec![id] }, &mut |_| seen += 1);
        assert_eq!(seen, 1);
    }

    #[test]
    fn removed_shards_stop_answering() {
        let index = MemIndex::new();
        let mut shard = shard_with(vec![symbol("app.net", "Client", Visibility::Public)]);
        shard.refs.insert(
            SymbolId::of("app.net.Client"),
            vec![Ref {
                location: Location::default(),
                kind: RefKind::Reference,
                container: SymbolId::default(),
                is_super: false,
            }],
        );
        index.insert_shard("app.net", shard);
        index.remove_shard("app.net");

        let mut hits = 0;
        index.refs(
            &RefsRequest { ids: vec![SymbolId::of("app.net.Client")], filter: RefFilter::ALL },
            &mut |_| hits += 1,
        );
        assert_eq!(hits, 0);
    }

    #[test]
    fn refs_find_reference_returns_definition() {
        let index = MemIndex::new();
        let id = SymbolId::of("app.net.Client");
        let mut shard = shard_with(vec![symbol("app.net", "Client", Visibility::Public)]);
        shard.refs.insert(
            id,
            vec![
                Ref {
                    location: Location::new("/ws/a.cj", Default::default()),
                    kind: RefKind::Definition,
                    container: SymbolId::default(),
                    is_super: false,
                },
                Ref {
                    location: Location::new("/ws/b.cj", Default::default()),
                    kind: RefKind::Reference,
                    container: SymbolId::default(),
                    is_super: false,
                },
            ],
        );
        index.insert_shard("app.net", shard);

        let mut streamed = 0;
        let definition = index.refs_find_reference(
            &RefsRequest { ids: vec![id], filter: RefFilter::REFERENCE },
            &mut |_| streamed += 1,
        );
        assert_eq!(streamed, 1);
        assert_eq!(definition.unwrap().location.file, std::path::PathBuf::from("/ws/a.cj"));
    }

    #[test]
    fn import_candidates_respect_module_deps_and_visibility() {
        let index = MemIndex::new();
        index.insert_shard(
            "base.io",
            shard_with(vec![
                symbol("base.io", "Reader", Visibility::Public),
                symbol("base.io", "Secret", Visibility::Internal),
            ]),
        );
        index.insert_shard("orphan.pkg", shard_with(vec![symbol("orphan.pkg", "Lost", Visibility::Public)]));

        let req = ImportSymsRequest {
            current_package: "app.net".into(),
            current_module: "app".into(),
            prefix: String::new(),
            module_deps: ["base".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let mut names = Vec::new();
        index.find_import_syms_on_completion(&req, &mut |pkg, sym, _| {
            names.push(format!("{pkg}.{}", sym.name));
        });
        assert_eq!(names, vec!["base.io.Reader"]);
    }

    #[test]
    fn already_visible_symbols_are_not_duplicated() {
        let index = MemIndex::new();
        index.insert_shard("base.io", shard_with(vec![symbol("base.io", "Reader", Visibility::Public)]));
        let req = ImportSymsRequest {
            current_package: "app.net".into(),
            current_module: "app".into(),
            already_visible: [SymbolId::of("base.io.Reader")].into_iter().collect(),
            module_deps: ["base".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let mut hits = 0;
        index.find_import_syms_on_completion(&req, &mut |_, _, _| hits += 1);
        assert_eq!(hits, 0);
    }

    #[test]
    fn quick_fix_matches_exact_identifier() {
        let index = MemIndex::new();
        index.insert_shard(
            "base.io",
            shard_with(vec![
                symbol("base.io", "Reader", Visibility::Public),
                symbol("base.io", "ReaderExt", Visibility::Public),
            ]),
        );
        let req = QuickFixImportRequest {
            current_package: "app.net".into(),
            current_module: "app".into(),
            identifier: "Reader".into(),
            module_deps: ["base".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let mut names = Vec::new();
        index.find_import_syms_on_quick_fix(&req, &mut |_, sym| names.push(sym.name.clone()));
        assert_eq!(names, vec!["Reader"]);
    }
}
