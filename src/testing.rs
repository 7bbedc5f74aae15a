//! Deterministic front-end and workspace helpers for tests.
//!
//! [`MockFrontend`] implements [`Frontend`] over a miniature line-oriented
//! dialect that is just rich enough to exercise every orchestrator path:
//! imports with visibility, declaration modifiers, inheritance with generic
//! arguments, named parameters, macro invocations, doc comments and
//! deliberate type errors. One declaration per line; members are indented
//! under their container.
//!
//! ```text
//! package app.net public
//! import public base.io
//! /// Reads things.
//! public class Client : base.io.Reader
//!   public func send(data: std.String) -> std.Int
//! public func connect(host: std.String) -> app.net.Client
//! check base.io.read -> std.Int
//! ```

use crate::{
    ast::{
        Decl, DeclId, DeclKind, Expr, ExprKind, Location, NameRef, NameRefKind, Param, Signature,
        TypeNode, TypeRef, TypedAst, Visibility,
    },
    cjo::CjoSnapshot,
    config::{Config, InitializeOptions},
    diagnostics::FileDiagnostic,
    frontend::{
        CursorRequest, Frontend, ImportDecl, PackageInput, ParsedFile, ParsedPackage,
        PartialPackage, PartialStage,
    },
    index::{CompletionSnippet, IndexShard, Symbol, SymbolId, SymbolKind},
    worker::Callbacks,
};
use lsp_types::{Diagnostic, DiagnosticSeverity, Position, Range};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Mutex,
};

fn line_location(file: &Path, line: usize, len: usize) -> Location {
    Location::new(
        file,
        Range {
            start: Position { line: line as u32, character: 0 },
            end: Position { line: line as u32, character: len as u32 },
        },
    )
}

fn error_at(file: &Path, line: usize, len: usize, message: impl Into<String>) -> FileDiagnostic {
    FileDiagnostic::new(
        file,
        Diagnostic::new(
            line_location(file, line, len).range,
            Some(DiagnosticSeverity::ERROR),
            None,
            None,
            message.into(),
            None,
            None,
        ),
    )
}

fn parse_visibility(token: &str) -> Option<Visibility> {
    match token {
        "public" => Some(Visibility::Public),
        "protected" => Some(Visibility::Protected),
        "internal" => Some(Visibility::Internal),
        "private" => Some(Visibility::Private),
        _ => None,
    }
}

fn parse_decl_kind(token: &str) -> Option<DeclKind> {
    match token {
        "class" => Some(DeclKind::Class),
        "interface" => Some(DeclKind::Interface),
        "struct" => Some(DeclKind::Struct),
        "enum" => Some(DeclKind::Enum),
        "func" => Some(DeclKind::Function),
        "let" => Some(DeclKind::Variable),
        "typealias" => Some(DeclKind::TypeAlias),
        "extend" => Some(DeclKind::Extend),
        "macro" => Some(DeclKind::Macro),
        _ => None,
    }
}

/// Parses `Name<T, U>` into the name and its generic parameters.
fn parse_generic_name(text: &str) -> (String, Vec<String>) {
    match text.split_once('<') {
        Some((name, rest)) => {
            let params = rest
                .trim_end_matches('>')
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            (name.to_string(), params)
        }
        None => (text.to_string(), Vec::new()),
    }
}

/// Parses a type text: `std.Int`, `List<std.String>`, `(T) -> std.Unit`.
fn parse_type(text: &str) -> TypeNode {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('(') {
        if let Some((params, ret)) = rest.split_once(") ->") {
            let params = params
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(parse_type)
                .collect();
            return TypeNode::Function { params, ret: Box::new(parse_type(ret)) };
        }
    }
    if let Some((name, args)) = text.split_once('<') {
        let args = args
            .trim_end_matches('>')
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(parse_type)
            .collect();
        return TypeNode::Named(TypeRef { path: name.trim().to_string(), args });
    }
    if text.is_empty() {
        TypeNode::Unknown
    } else {
        TypeNode::named(text)
    }
}

fn parse_type_ref(text: &str) -> TypeRef {
    match parse_type(text) {
        TypeNode::Named(r) => r,
        other => TypeRef { path: other.render(), args: Vec::new() },
    }
}

/// Splits `(a: T, b!: U)` into parameters; `!` marks a named parameter.
fn parse_params(text: &str, file: &Path, line: usize) -> Vec<Param> {
    text.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| {
            let (name, ty) = p.split_once(':')?;
            let name = name.trim();
            let (name, named) = match name.strip_suffix('!') {
                Some(stripped) => (stripped, true),
                None => (name, false),
            };
            Some(Param {
                name: name.to_string(),
                ty: parse_type(ty),
                named,
                location: line_location(file, line, p.len()),
            })
        })
        .collect()
}

/// One exported declaration line of a serialized mock interface.
#[derive(Clone, Debug)]
struct InterfaceEntry {
    visibility: Visibility,
    kind: DeclKind,
    /// `Name` or `Container.Name` for exported members.
    path: String,
    signature: Option<String>,
    /// Rendered return type, for `check` assertions.
    ret: Option<String>,
}

fn parse_interface(bytes: &[u8]) -> Vec<InterfaceEntry> {
    let Ok(text) = std::str::from_utf8(bytes) else {
        return Vec::new();
    };
    text.lines()
        .filter_map(|line| {
            let mut parts = line.splitn(5, '\t');
            let visibility = parse_visibility(parts.next()?)?;
            let kind = parse_decl_kind(parts.next()?)?;
            let path = parts.next()?.to_string();
            let signature = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            let ret = parts.next().filter(|s| !s.is_empty()).map(str::to_string);
            Some(InterfaceEntry { visibility, kind, path, signature, ret })
        })
        .collect()
}

/// A deterministic, in-process stand-in for the Conjure compiler front-end.
#[derive(Debug, Default)]
pub struct MockFrontend;

impl MockFrontend {
    fn sorted_buffers(input: &PackageInput) -> Vec<(&PathBuf, &str)> {
        input.buffers.iter().map(|(path, buffer)| (path, buffer.contents.as_str())).collect()
    }

    /// Builds the declaration arena of one package from its buffers.
    fn build_decls(input: &PackageInput) -> (TypedAst, Vec<FileDiagnostic>, Vec<BodyStmt>) {
        let mut ast = TypedAst { package: input.name.clone(), ..Default::default() };
        let mut diagnostics = Vec::new();
        let mut statements = Vec::new();

        for (path, contents) in Self::sorted_buffers(input) {
            ast.files.push(path.clone());
            let mut doc: Option<String> = None;
            let mut container_stack: Vec<DeclId> = Vec::new();

            for (line_no, raw) in contents.lines().enumerate() {
                let indent = raw.len() - raw.trim_start().len();
                let line = raw.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(text) = line.strip_prefix("///") {
                    let entry = doc.get_or_insert_with(String::new);
                    if !entry.is_empty() {
                        entry.push('\n');
                    }
                    entry.push_str(text.trim());
                    continue;
                }
                if line.starts_with("//") {
                    continue;
                }
                if line.starts_with("package ") || line.starts_with("import ") {
                    continue;
                }

                let mut tokens = line.split_whitespace().peekable();
                let first = *tokens.peek().unwrap_or(&"");
                if matches!(first, "call" | "use" | "check" | "expand") {
                    statements.push(BodyStmt {
                        file: path.clone(),
                        line: line_no,
                        text: line.to_string(),
                        container: container_stack.last().copied(),
                    });
                    continue;
                }

                // declaration line
                let mut visibility = Visibility::Private;
                let mut deprecated = false;
                let mut kind = None;
                for token in tokens.by_ref() {
                    if let Some(vis) = parse_visibility(token) {
                        visibility = vis;
                        continue;
                    }
                    if token == "deprecated" {
                        deprecated = true;
                        continue;
                    }
                    if let Some(parsed) = parse_decl_kind(token) {
                        kind = Some(parsed);
                        break;
                    }
                    diagnostics.push(error_at(
                        path,
                        line_no,
                        raw.len(),
                        format!("unexpected token \"{token}\""),
                    ));
                    break;
                }
                let Some(kind) = kind else {
                    doc = None;
                    continue;
                };
                let rest: String = tokens.collect::<Vec<_>>().join(" ");
                let decl = Self::build_decl(
                    kind,
                    visibility,
                    deprecated,
                    doc.take(),
                    &rest,
                    path,
                    line_no,
                    raw.len(),
                    &mut ast,
                );

                // indentation decides the container
                while !container_stack.is_empty() && indent == 0 {
                    container_stack.pop();
                }
                let id = decl;
                if indent > 0 {
                    if let Some(container) = container_stack.last().copied() {
                        ast.decls[id.index()].container = Some(container);
                        ast.decls[container.index()].members.push(id);
                    }
                } else {
                    container_stack.clear();
                    container_stack.push(id);
                }
            }
        }
        (ast, diagnostics, statements)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_decl(
        kind: DeclKind,
        visibility: Visibility,
        deprecated: bool,
        doc: Option<String>,
        rest: &str,
        file: &Path,
        line: usize,
        len: usize,
        ast: &mut TypedAst,
    ) -> DeclId {
        // shape: Name<T> [: Base1, Base2] [(params)] [-> Ret]
        let (head, ret) = match rest.split_once("->") {
            Some((head, ret)) => (head.trim(), Some(parse_type(ret))),
            None => (rest.trim(), None),
        };
        let (head, params) = match head.split_once('(') {
            Some((name, params)) => {
                (name.trim(), Some(parse_params(params.trim_end_matches(')'), file, line)))
            }
            None => (head, None),
        };
        let (name_part, bases) = match head.split_once(':') {
            Some((name, bases)) => (
                name.trim(),
                bases.split(',').map(str::trim).filter(|b| !b.is_empty()).map(parse_type_ref).collect(),
            ),
            None => (head, Vec::new()),
        };
        let (name, generic_params) = parse_generic_name(name_part);

        let id = DeclId(ast.decls.len() as u32);
        let signature = params.map(|params| Signature { params, ret: ret.clone() });
        let (extends, inherits, extend_interface) = if kind == DeclKind::Extend {
            let interface = bases.first().map(|b| b.path.clone());
            (Some(TypeRef::new(name.clone())), bases, interface)
        } else {
            (None, bases, None)
        };

        ast.decls.push(Decl {
            id,
            name: if kind == DeclKind::Extend { format!("extend_{name}") } else { name },
            kind,
            visibility,
            deprecated,
            doc,
            location: line_location(file, line, len),
            container: None,
            members: Vec::new(),
            generic_params,
            signature,
            inherits,
            extends,
            extend_interface,
            body: Vec::new(),
            not_for_completion: false,
        });

        // parameters join the arena as their own declarations
        let param_list: Vec<Param> = ast.decls[id.index()]
            .signature
            .as_ref()
            .map(|s| s.params.clone())
            .unwrap_or_default();
        for param in param_list {
            let param_id = DeclId(ast.decls.len() as u32);
            ast.decls.push(Decl {
                id: param_id,
                name: param.name.clone(),
                kind: DeclKind::Param,
                visibility: Visibility::Private,
                deprecated: false,
                doc: None,
                location: param.location.clone(),
                container: Some(id),
                members: Vec::new(),
                generic_params: Vec::new(),
                signature: None,
                inherits: Vec::new(),
                extends: None,
                extend_interface: None,
                body: Vec::new(),
                not_for_completion: true,
            });
            ast.decls[id.index()].members.push(param_id);
        }
        id
    }
}

/// A body statement collected during declaration building, resolved later.
struct BodyStmt {
    file: PathBuf,
    line: usize,
    text: String,
    container: Option<DeclId>,
}

/// Everything resolution can see: own declarations plus dep interfaces.
struct ResolveScope<'a> {
    package: &'a str,
    own: HashMap<String, usize>,
    imported: HashSet<String>,
    deps: HashMap<&'a str, Vec<InterfaceEntry>>,
}

impl<'a> ResolveScope<'a> {
    fn new(package: &'a str, ast: &TypedAst, imports: &[ImportDecl], deps: &'a CjoSnapshot) -> Self {
        let mut own = HashMap::new();
        for (i, decl) in ast.decls.iter().enumerate() {
            own.insert(ast.export_path(decl), i);
        }
        Self {
            package,
            own,
            imported: imports.iter().map(|i| i.target.clone()).collect(),
            deps: deps.iter().map(|(name, bytes)| (name, parse_interface(bytes))).collect(),
        }
    }

    /// Resolves a dotted path to an export path, or explains the failure.
    fn resolve(&self, path: &str) -> std::result::Result<ResolvedTarget, String> {
        // fully qualified against own package first
        let own_candidate = if path.contains('.') {
            path.to_string()
        } else {
            format!("{}.{path}", self.package)
        };
        if self.own.contains_key(&own_candidate) {
            return Ok(ResolvedTarget { export_path: own_candidate, ret: None });
        }

        // longest matching imported (or snapshotted) package prefix
        let mut best: Option<(&str, &str)> = None;
        for package in self.imported.iter().map(String::as_str).chain(self.deps.keys().copied()) {
            if path.starts_with(package)
                && path.len() > package.len()
                && path.as_bytes()[package.len()] == b'.'
            {
                let better = best.map(|(prev, _)| package.len() > prev.len()).unwrap_or(true);
                if better {
                    best = Some((package, &path[package.len() + 1..]));
                }
            }
        }
        let Some((package, member)) = best else {
            return Err(format!("unresolved reference \"{path}\""));
        };
        let Some(entries) = self.deps.get(package) else {
            return Err(format!("package \"{package}\" is not imported"));
        };
        let top = member.split('.').next().unwrap_or(member);
        let entry = entries
            .iter()
            .find(|e| e.path == member || e.path == top)
            .ok_or_else(|| format!("\"{member}\" not found in package \"{package}\""))?;
        Ok(ResolvedTarget { export_path: format!("{package}.{member}"), ret: entry.ret.clone() })
    }
}

struct ResolvedTarget {
    export_path: String,
    ret: Option<String>,
}

impl Frontend for MockFrontend {
    fn parse(&self, input: &PackageInput) -> ParsedPackage {
        let mut parsed = ParsedPackage::default();

        for (path, contents) in Self::sorted_buffers(input) {
            let mut file = ParsedFile {
                path: path.clone(),
                package_decl: None,
                imports: Vec::new(),
            };
            for (line_no, raw) in contents.lines().enumerate() {
                let line = raw.trim();
                if let Some(rest) = line.strip_prefix("package ") {
                    let mut tokens = rest.split_whitespace();
                    let name = tokens.next().unwrap_or("").to_string();
                    let visibility =
                        tokens.next().and_then(parse_visibility).unwrap_or(Visibility::Public);
                    file.package_decl =
                        Some((name, visibility, line_location(path, line_no, raw.len())));
                } else if let Some(rest) = line.strip_prefix("import ") {
                    let mut tokens = rest.split_whitespace().peekable();
                    let mut visibility = Visibility::Private;
                    if let Some(vis) = tokens.peek().and_then(|t| parse_visibility(t)) {
                        visibility = vis;
                        tokens.next();
                    }
                    let Some(target) = tokens.next() else {
                        parsed.diagnostics.push(error_at(
                            path,
                            line_no,
                            raw.len(),
                            "import without a target",
                        ));
                        continue;
                    };
                    let target = target.trim_end_matches(".*").trim_end_matches('.');
                    file.imports.push(ImportDecl {
                        target: target.to_string(),
                        visibility,
                        location: line_location(path, line_no, raw.len()),
                    });
                }
            }
            if parsed.declared_name.is_none() {
                if let Some((name, visibility, _)) = &file.package_decl {
                    parsed.declared_name = Some(name.clone());
                    parsed.package_visibility = *visibility;
                }
            }
            parsed.files.push(file);
        }
        parsed
    }

    fn check(
        &self,
        input: &PackageInput,
        parsed: &ParsedPackage,
        deps: &CjoSnapshot,
    ) -> crate::frontend::CheckedPackage {
        let (mut ast, mut diagnostics, statements) = Self::build_decls(input);
        let imports: Vec<ImportDecl> =
            parsed.files.iter().flat_map(|f| f.imports.iter().cloned()).collect();
        let scope = ResolveScope::new(&input.name, &ast, &imports, deps);
        let mut macro_expand_ok = true;

        // import lines are references of kind import
        for import in &imports {
            ast.refs.push(NameRef {
                target: import.target.clone(),
                kind: NameRefKind::Import,
                location: import.location.clone(),
                container: None,
                is_super: false,
            });
        }

        for stmt in &statements {
            let mut tokens = stmt.text.split_whitespace();
            let keyword = tokens.next().unwrap_or("");
            let Some(target) = tokens.next() else {
                diagnostics.push(error_at(
                    &stmt.file,
                    stmt.line,
                    stmt.text.len(),
                    format!("\"{keyword}\" without a target"),
                ));
                continue;
            };
            match scope.resolve(target) {
                Ok(resolved) => {
                    ast.refs.push(NameRef {
                        target: resolved.export_path.clone(),
                        kind: NameRefKind::Reference,
                        location: line_location(&stmt.file, stmt.line, stmt.text.len()),
                        container: stmt.container,
                        is_super: false,
                    });
                    match keyword {
                        "check" => {
                            // `check pkg.f -> Type` asserts the callee's
                            // declared return type
                            let expected = stmt
                                .text
                                .split_once("->")
                                .map(|(_, t)| t.trim().to_string())
                                .unwrap_or_default();
                            let actual = resolved.ret.clone().or_else(|| {
                                scope.own.get(&resolved.export_path).and_then(|i| {
                                    ast.decls[*i]
                                        .signature
                                        .as_ref()
                                        .and_then(|s| s.ret.as_ref())
                                        .map(TypeNode::render)
                                })
                            });
                            if let Some(actual) = actual {
                                if !expected.is_empty() && actual != expected {
                                    diagnostics.push(error_at(
                                        &stmt.file,
                                        stmt.line,
                                        stmt.text.len(),
                                        format!(
                                            "mismatched types: \"{target}\" returns {actual}, expected {expected}"
                                        ),
                                    ));
                                }
                            }
                        }
                        "expand" => {
                            if let Some(container) = stmt.container {
                                ast.decls[container.index()].body.push(Expr {
                                    kind: ExprKind::MacroInvoke {
                                        target: resolved.export_path,
                                        body: Vec::new(),
                                    },
                                    location: line_location(
                                        &stmt.file,
                                        stmt.line,
                                        stmt.text.len(),
                                    ),
                                });
                            }
                        }
                        _ => {
                            if let Some(container) = stmt.container {
                                ast.decls[container.index()].body.push(Expr {
                                    kind: ExprKind::Call {
                                        target: resolved.export_path,
                                        args: Vec::new(),
                                    },
                                    location: line_location(
                                        &stmt.file,
                                        stmt.line,
                                        stmt.text.len(),
                                    ),
                                });
                            }
                        }
                    }
                }
                Err(message) => {
                    if keyword == "expand" {
                        macro_expand_ok = false;
                    }
                    diagnostics.push(error_at(&stmt.file, stmt.line, stmt.text.len(), message));
                }
            }
        }

        let error_count = diagnostics.len();
        crate::frontend::CheckedPackage { typed: ast, diagnostics, error_count, macro_expand_ok }
    }

    fn export_interface(&self, checked: &crate::frontend::CheckedPackage) -> Vec<u8> {
        let ast = &checked.typed;
        let mut lines = Vec::new();
        for decl in ast.decls.iter() {
            if decl.visibility == Visibility::Private || decl.kind == DeclKind::Param {
                continue;
            }
            let path = {
                let full = ast.export_path(decl);
                full.strip_prefix(&format!("{}.", ast.package)).unwrap_or(&full).to_string()
            };
            let visibility = match decl.visibility {
                Visibility::Public => "public",
                Visibility::Protected => "protected",
                Visibility::Internal => "internal",
                Visibility::Private => unreachable!(),
            };
            let kind = match decl.kind {
                DeclKind::Class => "class",
                DeclKind::Interface => "interface",
                DeclKind::Struct => "struct",
                DeclKind::Enum => "enum",
                DeclKind::EnumCtor => "enum",
                DeclKind::Function => "func",
                DeclKind::Variable => "let",
                DeclKind::TypeAlias => "typealias",
                DeclKind::Extend => "extend",
                DeclKind::Macro => "macro",
                DeclKind::Param => unreachable!(),
            };
            let signature = decl.signature.as_ref().map(|s| s.render()).unwrap_or_default();
            let ret = decl
                .signature
                .as_ref()
                .and_then(|s| s.ret.as_ref())
                .map(TypeNode::render)
                .unwrap_or_default();
            lines.push(format!("{visibility}\t{kind}\t{path}\t{signature}\t{ret}"));
        }
        lines.sort();
        lines.join("\n").into_bytes()
    }

    fn interface_shard(&self, package: &str, bytes: &[u8]) -> IndexShard {
        let mut shard = IndexShard::default();
        for entry in parse_interface(bytes) {
            // members keep their container as the scope
            let (scope, name) = match entry.path.rsplit_once('.') {
                Some((container, name)) => (format!("{container}:"), name.to_string()),
                None => (String::new(), entry.path.clone()),
            };
            shard.symbols.push(Symbol {
                id: SymbolId::of(&format!("{package}.{}", entry.path)),
                name: name.clone(),
                kind: match entry.kind {
                    DeclKind::Class => SymbolKind::Class,
                    DeclKind::Interface => SymbolKind::Interface,
                    DeclKind::Struct => SymbolKind::Struct,
                    DeclKind::Enum => SymbolKind::Enum,
                    DeclKind::Function => SymbolKind::Function,
                    DeclKind::Variable => SymbolKind::Variable,
                    DeclKind::TypeAlias => SymbolKind::TypeAlias,
                    DeclKind::Macro => SymbolKind::Macro,
                    _ => SymbolKind::Unknown,
                },
                location: Location::default(),
                scope,
                visibility: entry.visibility,
                package_visibility: Visibility::Public,
                deprecated: false,
                doc: None,
                module: String::new(),
                is_cjo_sym: true,
                not_for_completion: false,
                signature: entry.signature.clone(),
                completion_items: vec![CompletionSnippet {
                    label: name.clone(),
                    insert_text: name,
                }],
            });
        }
        shard
    }

    fn check_to_cursor(
        &self,
        input: &PackageInput,
        parsed: &ParsedPackage,
        deps: &CjoSnapshot,
        cursor: &CursorRequest,
    ) -> PartialPackage {
        let (mut ast, _, _) = Self::build_decls(input);
        let cutoff = cursor.position.line;

        let imports: Vec<ImportDecl> =
            parsed.files.iter().flat_map(|f| f.imports.iter().cloned()).collect();
        let scope = ResolveScope::new(&input.name, &ast, &imports, deps);

        // cursor-scoped: declarations past the cursor line are never typed.
        // Truncation keeps arena ids valid; members pointing past the cut
        // resolve to None.
        if let Some(cut) = ast
            .decls
            .iter()
            .position(|d| d.location.file == cursor.file && d.location.range.start.line > cutoff)
        {
            ast.decls.truncate(cut);
        }

        let line_text = input
            .buffers
            .get(&cursor.file)
            .and_then(|buffer| buffer.contents.lines().nth(cutoff as usize))
            .unwrap_or_default();
        let prefix = &line_text[..line_text.len().min(cursor.position.character as usize)];

        // the receiver is the dotted path ending right before the cursor
        let receiver = prefix.strip_suffix('.').and_then(|head| {
            let start = head
                .rfind(|c: char| !(c.is_alphanumeric() || c == '.' || c == '_'))
                .map(|i| i + 1)
                .unwrap_or(0);
            let path = &head[start..];
            (!path.is_empty())
                .then(|| scope.resolve(path).map(|r| r.export_path).unwrap_or_else(|_| path.to_string()))
        });

        let needs_full_expand = cursor.stage == PartialStage::MacroExpand
            && prefix.matches("expand").count() >= 2;

        PartialPackage { typed: ast, receiver, needs_full_expand }
    }
}

// ---------------------------------------------------------------------------
// workspace scaffolding
// ---------------------------------------------------------------------------

/// A temporary multi-module workspace on disk.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
    modules: Vec<(String, bool, Vec<String>)>,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("tempdir"), modules: Vec::new() }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Registers a module with plain `src` layout.
    pub fn module(&mut self, name: &str, requires: &[&str]) -> &mut Self {
        self.modules.push((
            name.to_string(),
            false,
            requires.iter().map(|r| r.to_string()).collect(),
        ));
        std::fs::create_dir_all(self.dir.path().join(name).join("src")).unwrap();
        self
    }

    /// Registers a combined module.
    pub fn combined_module(&mut self, name: &str, requires: &[&str]) -> &mut Self {
        self.modules.push((
            name.to_string(),
            true,
            requires.iter().map(|r| r.to_string()).collect(),
        ));
        std::fs::create_dir_all(self.dir.path().join(name).join("src")).unwrap();
        self
    }

    /// Writes a source file at `module/src/<rel>` and returns its path.
    pub fn file(&self, module: &str, rel: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(module).join("src").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        crate::utils::normalize_path(&path)
    }

    /// The directory of a package inside a module.
    pub fn package_dir(&self, module: &str, rel: &str) -> PathBuf {
        crate::utils::normalize_path(&self.dir.path().join(module).join("src").join(rel))
    }

    /// A `Config` with the `test` platform flag set and caching enabled.
    pub fn config(&self) -> Config {
        let mut options = InitializeOptions {
            cache_path: Some(self.dir.path().join(".lsp")),
            test: true,
            ..Default::default()
        };
        for (name, combined, requires) in &self.modules {
            let path = self.dir.path().join(name);
            options.multi_module.insert(
                format!("file://{}", crate::utils::normalize_path(&path).display()),
                crate::config::ModuleDescriptor {
                    name: name.clone(),
                    src_path: Some(crate::utils::normalize_path(&path.join("src"))),
                    combined: *combined,
                    requires: requires.clone(),
                    ..Default::default()
                },
            );
        }
        Config::new(crate::utils::normalize_path(self.dir.path()), options)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal text-document store implementing [`Callbacks`].
#[derive(Default)]
pub struct DocStore {
    docs: Mutex<HashMap<PathBuf, DocState>>,
}

#[derive(Clone, Debug, Default)]
struct DocState {
    contents: String,
    version: i32,
    needs_reparse: bool,
}

impl DocStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, file: &Path, contents: &str, version: i32) {
        let mut docs = self.docs.lock().unwrap();
        docs.insert(
            file.to_path_buf(),
            DocState { contents: contents.to_string(), version, needs_reparse: false },
        );
    }

    /// Applies an edit, marking the document dirty.
    pub fn edit(&self, file: &Path, contents: &str, version: i32) {
        let mut docs = self.docs.lock().unwrap();
        docs.insert(
            file.to_path_buf(),
            DocState { contents: contents.to_string(), version, needs_reparse: true },
        );
    }
}

impl Callbacks for DocStore {
    fn contents_of(&self, file: &Path) -> Option<String> {
        self.docs.lock().unwrap().get(file).map(|d| d.contents.clone())
    }

    fn version_of(&self, file: &Path) -> Option<i32> {
        self.docs.lock().unwrap().get(file).map(|d| d.version)
    }

    fn needs_reparse(&self, file: &Path) -> bool {
        self.docs.lock().unwrap().get(file).map(|d| d.needs_reparse).unwrap_or(false)
    }

    fn set_needs_reparse(&self, file: &Path, needs: bool) {
        if let Some(doc) = self.docs.lock().unwrap().get_mut(file) {
            doc.needs_reparse = needs;
        }
    }
}

/// One captured publish-diagnostics call.
#[derive(Clone, Debug)]
pub struct Publish {
    pub file: PathBuf,
    pub version: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
}

/// An observer that records every publish and notice for assertions.
pub fn recording_observer() -> (
    std::sync::Arc<crate::diagnostics::DiagnosticsObserver>,
    std::sync::Arc<Mutex<Vec<Publish>>>,
    std::sync::Arc<Mutex<Vec<String>>>,
) {
    let publishes = std::sync::Arc::new(Mutex::new(Vec::new()));
    let notices = std::sync::Arc::new(Mutex::new(Vec::new()));
    let publish_sink = std::sync::Arc::clone(&publishes);
    let notice_sink = std::sync::Arc::clone(&notices);
    let observer = crate::diagnostics::DiagnosticsObserver::new(
        Box::new(move |file, version, diagnostics| {
            publish_sink.lock().unwrap().push(Publish {
                file: file.to_path_buf(),
                version,
                diagnostics,
            });
        }),
        Box::new(move |message| {
            notice_sink.lock().unwrap().push(message.to_string());
        }),
    );
    (std::sync::Arc::new(observer), publishes, notices)
}
