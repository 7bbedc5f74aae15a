//! The multi-shard symbol index.
//!
//! Each package contributes one append-only shard of symbols, references,
//! relations, extensions and cross-language symbols. Two backends answer the
//! same [`SymbolIndex`] query surface: a process-resident memory index and a
//! database-backed background index that survives restarts. Backends apply
//! every filter themselves; callers never re-filter.

pub mod background;
pub mod collect;
pub mod memory;

pub use background::BackgroundIndex;
pub use collect::SymbolCollector;
pub use memory::MemIndex;

use crate::ast::{Location, Visibility};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashSet},
    path::PathBuf,
};

/// Stable identity of a symbol: a 64-bit hash of its export path. Identity is
/// preserved across edits that do not move the fully-qualified path.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SymbolId(pub u64);

impl SymbolId {
    pub fn of(export_path: &str) -> Self {
        Self(crate::utils::fnv1a(export_path.as_bytes()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolKind {
    Class,
    Interface,
    Struct,
    Enum,
    EnumCtor,
    Function,
    Variable,
    Param,
    TypeAlias,
    Macro,
    #[default]
    Unknown,
}

impl From<crate::ast::DeclKind> for SymbolKind {
    fn from(kind: crate::ast::DeclKind) -> Self {
        use crate::ast::DeclKind as D;
        match kind {
            D::Class => SymbolKind::Class,
            D::Interface => SymbolKind::Interface,
            D::Struct => SymbolKind::Struct,
            D::Enum => SymbolKind::Enum,
            D::EnumCtor => SymbolKind::EnumCtor,
            D::Function => SymbolKind::Function,
            D::Variable => SymbolKind::Variable,
            D::Param => SymbolKind::Param,
            D::TypeAlias => SymbolKind::TypeAlias,
            D::Macro => SymbolKind::Macro,
            D::Extend => SymbolKind::Unknown,
        }
    }
}

/// A pre-rendered completion item of one symbol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSnippet {
    pub label: String,
    pub insert_text: String,
}

/// One indexed declaration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    pub kind: SymbolKind,
    /// Declaration site.
    pub location: Location,
    /// Containing scope: empty at top level, `Type:` chains below.
    pub scope: String,
    /// Declared modifier of the symbol.
    pub visibility: Visibility,
    /// Modifier of the declaring package's `package` header.
    pub package_visibility: Visibility,
    pub deprecated: bool,
    pub doc: Option<String>,
    /// Owning module; empty for interface-loaded symbols.
    pub module: String,
    /// Loaded from a binary interface rather than project sources.
    pub is_cjo_sym: bool,
    /// Hidden from completion at index time.
    pub not_for_completion: bool,
    pub signature: Option<String>,
    pub completion_items: Vec<CompletionSnippet>,
}

impl Symbol {
    /// Doc comment lines for hover.
    pub fn comments(&self) -> Vec<String> {
        self.doc.as_deref().map(|d| d.lines().map(str::to_string).collect()).unwrap_or_default()
    }
}

/// Why a name occurs at a location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Definition,
    Reference,
    Import,
}

impl From<crate::ast::NameRefKind> for RefKind {
    fn from(kind: crate::ast::NameRefKind) -> Self {
        match kind {
            crate::ast::NameRefKind::Definition => RefKind::Definition,
            crate::ast::NameRefKind::Reference => RefKind::Reference,
            crate::ast::NameRefKind::Import => RefKind::Import,
        }
    }
}

/// Bit-set filter over [`RefKind`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefFilter(u8);

impl RefFilter {
    pub const DEFINITION: Self = Self(1);
    pub const REFERENCE: Self = Self(1 << 1);
    pub const IMPORT: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn allows(self, kind: RefKind) -> bool {
        let bit = match kind {
            RefKind::Definition => Self::DEFINITION.0,
            RefKind::Reference => Self::REFERENCE.0,
            RefKind::Import => Self::IMPORT.0,
        };
        self.0 & bit != 0
    }
}

/// One occurrence of a symbol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ref {
    pub location: Location,
    pub kind: RefKind,
    /// Enclosing declaration of the use site.
    pub container: SymbolId,
    /// Implicit occurrence through a `super` call; hidden from queries.
    pub is_super: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    BaseOf,
    Extend,
    ContainedBy,
    RiddenBy,
}

/// A `(subject, predicate, object)` triple over symbol ids.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub subject: SymbolId,
    pub predicate: RelationKind,
    pub object: SymbolId,
}

/// One extension member provided for an extended type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Extension {
    pub member: SymbolId,
    pub visibility: Visibility,
    /// Interface the extension implements, when it is an interface extension.
    pub interface: Option<String>,
}

/// A symbol surfaced from another language's binary surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrossSymbol {
    pub name: String,
    pub package: String,
    pub location: Location,
    pub language: String,
}

/// The per-package portion of the index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IndexShard {
    pub symbols: Vec<Symbol>,
    pub refs: BTreeMap<SymbolId, Vec<Ref>>,
    pub relations: Vec<Relation>,
    pub extensions: BTreeMap<SymbolId, Vec<Extension>>,
    pub cross_symbols: Vec<CrossSymbol>,
}

impl IndexShard {
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
            && self.refs.is_empty()
            && self.relations.is_empty()
            && self.extensions.is_empty()
            && self.cross_symbols.is_empty()
    }
}

/// How the querying package relates to the package that owns a symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageRelation {
    /// The querying package is a subpackage of the target.
    Child,
    /// The querying package is an ancestor of the target.
    Parent,
    SameModule,
    None,
}

/// Classifies two dotted package names against each other.
pub fn package_relation(src: &str, target: &str) -> PackageRelation {
    if src.len() > target.len()
        && src.starts_with(target)
        && src.as_bytes()[target.len()] == b'.'
    {
        return PackageRelation::Child;
    }
    if src.len() < target.len()
        && target.starts_with(src)
        && target.as_bytes()[src.len()] == b'.'
    {
        return PackageRelation::Parent;
    }
    let src_root = src.split('.').next().unwrap_or(src);
    let target_root = target.split('.').next().unwrap_or(target);
    if src_root == target_root {
        PackageRelation::SameModule
    } else {
        PackageRelation::None
    }
}

/// Whether a modifier is visible from a package with the given relation to
/// the declaring one.
pub fn accessible(relation: PackageRelation, visibility: Visibility) -> bool {
    visibility == Visibility::Public
        || (relation == PackageRelation::Child
            && (visibility == Visibility::Internal || visibility == Visibility::Protected))
        || (relation == PackageRelation::SameModule && visibility == Visibility::Protected)
        || (relation == PackageRelation::Parent && visibility == Visibility::Protected)
}

/// Prefix-or-subsequence match used by fuzzy find and completion queries.
/// Returns a score; higher is better, `None` is no match.
pub fn fuzzy_score(query: &str, name: &str) -> Option<u32> {
    if query.is_empty() {
        return Some(1);
    }
    let query_lower = query.to_lowercase();
    let name_lower = name.to_lowercase();
    if name_lower.starts_with(&query_lower) {
        return Some(1000 - name.len().min(900) as u32);
    }
    let mut chars = name_lower.chars();
    for qc in query_lower.chars() {
        if !chars.any(|nc| nc == qc) {
            return None;
        }
    }
    Some(100 - name.len().min(90) as u32)
}

/// Streams symbols matching a query by prefix or fuzzy score.
#[derive(Clone, Debug, Default)]
pub struct FuzzyFindRequest {
    pub query: String,
    /// Scope strings to restrict to; empty means top level only unless
    /// `any_scope` is set.
    pub scopes: Vec<String>,
    pub limit: Option<usize>,
    pub any_scope: bool,
    /// Hide symbols marked not-for-completion at index time.
    pub restrict_for_completion: bool,
}

#[derive(Clone, Debug, Default)]
pub struct LookupRequest {
    pub ids: Vec<SymbolId>,
}

#[derive(Clone, Debug)]
pub struct RefsRequest {
    pub ids: Vec<SymbolId>,
    pub filter: RefFilter,
}

#[derive(Clone, Debug)]
pub struct FileRefsRequest {
    pub file: PathBuf,
    pub filter: RefFilter,
}

#[derive(Clone, Debug)]
pub struct RelationsRequest {
    pub id: SymbolId,
    pub predicate: RelationKind,
}

/// Context for the auto-import completion query. The orchestrator resolves
/// module dependencies and combined-module suppression up front so backends
/// stay free of project state.
#[derive(Clone, Debug, Default)]
pub struct ImportSymsRequest {
    pub current_package: String,
    pub current_module: String,
    pub prefix: String,
    /// Symbols the normal completion pass already surfaced.
    pub already_visible: HashSet<SymbolId>,
    /// Symbols imported by existing import declarations.
    pub imported: HashSet<SymbolId>,
    /// Direct dependencies of the current module.
    pub module_deps: HashSet<String>,
    /// Packages suppressed by combined-module visibility rules.
    pub suppressed_packages: HashSet<String>,
}

/// Context for the extension-member completion query.
#[derive(Clone, Debug, Default)]
pub struct ExtendSymsRequest {
    /// Id of the extended type under the cursor.
    pub extended: SymbolId,
    /// Members already visible on the receiver.
    pub visible_members: HashSet<SymbolId>,
    pub current_package: String,
    pub current_module: String,
    pub module_deps: HashSet<String>,
    pub suppressed_packages: HashSet<String>,
}

/// Context for the missing-symbol quick fix: exact-name auto-import.
#[derive(Clone, Debug, Default)]
pub struct QuickFixImportRequest {
    pub current_package: String,
    pub current_module: String,
    pub identifier: String,
    pub imported: HashSet<SymbolId>,
    pub module_deps: HashSet<String>,
    pub suppressed_packages: HashSet<String>,
}

/// Unified query surface of both index backends.
///
/// A reference is never delivered for a symbol whose shard has been removed;
/// filters are applied by the backend.
pub trait SymbolIndex: Send + Sync {
    fn fuzzy_find(&self, req: &FuzzyFindRequest, cb: &mut dyn FnMut(&Symbol));

    fn lookup(&self, req: &LookupRequest, cb: &mut dyn FnMut(&Symbol));

    fn refs(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref));

    fn file_refs(&self, req: &FileRefsRequest, cb: &mut dyn FnMut(&Ref, SymbolId));

    /// Streams the references of `req.ids` and returns the definition, when
    /// one is indexed.
    fn refs_find_reference(&self, req: &RefsRequest, cb: &mut dyn FnMut(&Ref)) -> Option<Ref>;

    fn relations(&self, req: &RelationsRequest, cb: &mut dyn FnMut(&Relation));

    fn package_symbols(&self, package: &str, cb: &mut dyn FnMut(&Symbol));

    /// Streams `(callee, ref)` pairs for call sites whose container is
    /// `decl`.
    fn callees(&self, package: &str, decl: SymbolId, cb: &mut dyn FnMut(SymbolId, &Ref));

    /// Auto-import completion candidates from other packages, filtered by
    /// module dependency, visibility and combined-module rules.
    fn find_import_syms_on_completion(
        &self,
        req: &ImportSymsRequest,
        cb: &mut dyn FnMut(&str, &Symbol, &CompletionSnippet),
    );

    /// Extension members provided by not-yet-imported packages for the
    /// extended type.
    fn find_extend_syms_on_completion(
        &self,
        req: &ExtendSymsRequest,
        cb: &mut dyn FnMut(&str, Option<&str>, &Symbol, &CompletionSnippet),
    );

    /// Exact-name auto-import candidates for the quick fix.
    fn find_import_syms_on_quick_fix(
        &self,
        req: &QuickFixImportRequest,
        cb: &mut dyn FnMut(&str, &Symbol),
    );

    /// Cross-language symbols by name, widening to subpackages when the
    /// module is combined.
    fn find_cross_symbols(
        &self,
        package: &str,
        name: &str,
        combined: bool,
        cb: &mut dyn FnMut(&CrossSymbol),
    );
}
