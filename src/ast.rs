//! Typed-AST model shared between the front-end boundary and the core.
//!
//! Node hierarchies are tagged unions per role (declarations, expressions,
//! patterns, types) with stable arena ids; cross-references between packages
//! use export paths, never pointers. [`Visit`] is the traversal seam used by
//! the index builder.

use lsp_types::Range;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Import or declaration visibility, ordered weakest to strongest.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Internal,
    Protected,
    Public,
}

/// A source position span attached to every node and index entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: PathBuf,
    pub range: Range,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>, range: Range) -> Self {
        Self { file: file.into(), range }
    }
}

/// Index of a declaration in its package's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeclId(pub u32);

impl DeclId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Role union for declarations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeclKind {
    Class,
    Interface,
    Struct,
    Enum,
    EnumCtor,
    Function,
    Variable,
    Param,
    TypeAlias,
    Extend,
    Macro,
}

impl DeclKind {
    /// Whether members of the declaration can be inherited or overridden.
    pub fn is_inheritable(self) -> bool {
        matches!(self, DeclKind::Class | DeclKind::Interface)
    }
}

/// A reference to a (possibly generic) named type by export path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    /// Export path of the referent, e.g. `base.collections.List`.
    pub path: String,
    pub args: Vec<TypeNode>,
}

impl TypeRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), args: Vec::new() }
    }

    /// Substitutes generic parameters by name, mapping a member signature into
    /// the scope of a parent instantiation.
    pub fn substitute(&self, mapping: &std::collections::HashMap<String, TypeNode>) -> TypeNode {
        if self.args.is_empty() {
            if let Some(replacement) = mapping.get(&self.path) {
                return replacement.clone();
            }
        }
        TypeNode::Named(TypeRef {
            path: self.path.clone(),
            args: self.args.iter().map(|a| a.substitute(mapping)).collect(),
        })
    }
}

/// Role union for type positions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeNode {
    Named(TypeRef),
    Function { params: Vec<TypeNode>, ret: Box<TypeNode> },
    Tuple(Vec<TypeNode>),
    /// The front-end could not type this position.
    Unknown,
}

impl TypeNode {
    pub fn named(path: impl Into<String>) -> Self {
        TypeNode::Named(TypeRef::new(path))
    }

    pub fn substitute(&self, mapping: &std::collections::HashMap<String, TypeNode>) -> TypeNode {
        match self {
            TypeNode::Named(r) => r.substitute(mapping),
            TypeNode::Function { params, ret } => TypeNode::Function {
                params: params.iter().map(|p| p.substitute(mapping)).collect(),
                ret: Box::new(ret.substitute(mapping)),
            },
            TypeNode::Tuple(items) => {
                TypeNode::Tuple(items.iter().map(|i| i.substitute(mapping)).collect())
            }
            TypeNode::Unknown => TypeNode::Unknown,
        }
    }

    /// Render for signature display and byte-level interface comparison.
    pub fn render(&self) -> String {
        match self {
            TypeNode::Named(r) => {
                if r.args.is_empty() {
                    r.path.clone()
                } else {
                    let args = r.args.iter().map(TypeNode::render).collect::<Vec<_>>().join(", ");
                    format!("{}<{args}>", r.path)
                }
            }
            TypeNode::Function { params, ret } => {
                let params = params.iter().map(TypeNode::render).collect::<Vec<_>>().join(", ");
                format!("({params}) -> {}", ret.render())
            }
            TypeNode::Tuple(items) => {
                let items = items.iter().map(TypeNode::render).collect::<Vec<_>>().join(", ");
                format!("({items})")
            }
            TypeNode::Unknown => "_".into(),
        }
    }
}

/// Role union for patterns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternKind {
    Wildcard,
    Binding(String),
    Tuple(Vec<PatternKind>),
    EnumCase { ctor: String, fields: Vec<PatternKind> },
}

/// Role union for expressions. Only the shapes the core inspects are
/// distinguished; everything else is `Opaque`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    /// A resolved name use; `target` is the referent's export path.
    Name { target: String },
    /// A call whose callee resolved to `target`.
    Call { target: String, args: Vec<Expr> },
    /// A macro invocation site; `target` is the macro's export path.
    MacroInvoke { target: String, body: Vec<Expr> },
    Match { scrutinee: Box<Expr>, arms: Vec<(PatternKind, Vec<Expr>)> },
    Block(Vec<Expr>),
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub location: Location,
}

/// A function parameter. Named parameters take part in override relations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeNode,
    pub named: bool,
    pub location: Location,
}

/// A function signature.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<Param>,
    pub ret: Option<TypeNode>,
}

impl Signature {
    /// Render for completion labels and interface bytes.
    pub fn render(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty.render()))
            .collect::<Vec<_>>()
            .join(", ");
        match &self.ret {
            Some(ret) => format!("({params}) -> {}", ret.render()),
            None => format!("({params})"),
        }
    }
}

/// One declaration in the typed AST arena.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decl {
    pub id: DeclId,
    pub name: String,
    pub kind: DeclKind,
    pub visibility: Visibility,
    pub deprecated: bool,
    pub doc: Option<String>,
    pub location: Location,
    /// Containing declaration, `None` for top-level decls.
    pub container: Option<DeclId>,
    pub members: Vec<DeclId>,
    pub generic_params: Vec<String>,
    pub signature: Option<Signature>,
    /// Super types of a class/interface, or the extended type of an extend
    /// declaration.
    pub inherits: Vec<TypeRef>,
    pub extends: Option<TypeRef>,
    /// Interface the extension comes from, for extend declarations.
    pub extend_interface: Option<String>,
    pub body: Vec<Expr>,
    /// Hidden from completion at index time (e.g. compiler-synthesized).
    pub not_for_completion: bool,
}

/// Why a name occurs at a location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameRefKind {
    Definition,
    Reference,
    Import,
}

/// A resolved name use recorded by the front-end's semantic pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NameRef {
    /// Export path of the referent.
    pub target: String,
    pub kind: NameRefKind,
    pub location: Location,
    /// Enclosing declaration of the use site.
    pub container: Option<DeclId>,
    /// Implicit reference through a `super` call; hidden from find-references.
    pub is_super: bool,
}

/// The typed AST of one package: an arena of declarations plus the resolved
/// name uses of the semantic pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TypedAst {
    /// Full package name the AST was produced for.
    pub package: String,
    pub decls: Vec<Decl>,
    pub refs: Vec<NameRef>,
    pub files: Vec<PathBuf>,
}

impl TypedAst {
    pub fn decl(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(id.index())
    }

    /// Top-level declarations in arena order.
    pub fn top_level(&self) -> impl Iterator<Item = &Decl> {
        self.decls.iter().filter(|d| d.container.is_none())
    }

    /// Export path of a declaration: package, containers, then the name.
    pub fn export_path(&self, decl: &Decl) -> String {
        let mut segments = vec![decl.name.clone()];
        let mut cur = decl.container;
        while let Some(id) = cur {
            match self.decl(id) {
                Some(parent) => {
                    segments.push(parent.name.clone());
                    cur = parent.container;
                }
                None => break,
            }
        }
        segments.push(self.package.clone());
        segments.reverse();
        segments.join(".")
    }

    /// The scope string of a declaration: empty for top-level, otherwise the
    /// container chain joined by `:`.
    pub fn scope_of(&self, decl: &Decl) -> String {
        let mut segments = Vec::new();
        let mut cur = decl.container;
        while let Some(id) = cur {
            match self.decl(id) {
                Some(parent) => {
                    segments.push(parent.name.clone());
                    cur = parent.container;
                }
                None => break,
            }
        }
        segments.reverse();
        if segments.is_empty() {
            String::new()
        } else {
            format!("{}:", segments.join(":"))
        }
    }
}

/// Read-only traversal over the role unions. Implementors override what they
/// care about; `walk_*` drives the recursion.
pub trait Visit {
    fn visit_decl(&mut self, ast: &TypedAst, decl: &Decl) {
        walk_decl(self, ast, decl);
    }

    fn visit_expr(&mut self, ast: &TypedAst, expr: &Expr) {
        walk_expr(self, ast, expr);
    }

    fn visit_pattern(&mut self, _ast: &TypedAst, _pattern: &PatternKind) {}
}

pub fn walk_decl<V: Visit + ?Sized>(visitor: &mut V, ast: &TypedAst, decl: &Decl) {
    for expr in &decl.body {
        visitor.visit_expr(ast, expr);
    }
    for member in &decl.members {
        if let Some(child) = ast.decl(*member) {
            visitor.visit_decl(ast, child);
        }
    }
}

pub fn walk_expr<V: Visit + ?Sized>(visitor: &mut V, ast: &TypedAst, expr: &Expr) {
    match &expr.kind {
        ExprKind::Call { args, .. } => {
            for arg in args {
                visitor.visit_expr(ast, arg);
            }
        }
        ExprKind::MacroInvoke { body, .. } => {
            for inner in body {
                visitor.visit_expr(ast, inner);
            }
        }
        ExprKind::Match { scrutinee, arms } => {
            visitor.visit_expr(ast, scrutinee);
            for (pattern, exprs) in arms {
                visitor.visit_pattern(ast, pattern);
                for inner in exprs {
                    visitor.visit_expr(ast, inner);
                }
            }
        }
        ExprKind::Block(body) => {
            for inner in body {
                visitor.visit_expr(ast, inner);
            }
        }
        ExprKind::Name { .. } | ExprKind::Opaque => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_orders_weakest_first() {
        assert!(Visibility::Private < Visibility::Internal);
        assert!(Visibility::Internal < Visibility::Protected);
        assert!(Visibility::Protected < Visibility::Public);
    }

    #[test]
    fn substitution_maps_generic_params() {
        let mut mapping = std::collections::HashMap::new();
        mapping.insert("T".to_string(), TypeNode::named("base.String"));
        let generic = TypeRef {
            path: "base.collections.List".into(),
            args: vec![TypeNode::named("T")],
        };
        let node = TypeNode::Named(generic).substitute(&mapping);
        assert_eq!(node.render(), "base.collections.List<base.String>");
    }

    #[test]
    fn export_path_walks_containers() {
        let mut ast = TypedAst { package: "app.net".into(), ..Default::default() };
        ast.decls.push(Decl {
            id: DeclId(0),
            name: "Client".into(),
            kind: DeclKind::Class,
            visibility: Visibility::Public,
            deprecated: false,
            doc: None,
            location: Location::default(),
            container: None,
            members: vec![DeclId(1)],
            generic_params: vec![],
            signature: None,
            inherits: vec![],
            extends: None,
            extend_interface: None,
            body: vec![],
            not_for_completion: false,
        });
        ast.decls.push(Decl {
            id: DeclId(1),
            name: "send".into(),
            kind: DeclKind::Function,
            visibility: Visibility::Public,
            deprecated: false,
            doc: None,
            location: Location::default(),
            container: Some(DeclId(0)),
            members: vec![],
            generic_params: vec![],
            signature: Some(Signature::default()),
            inherits: vec![],
            extends: None,
            extend_interface: None,
            body: vec![],
            not_for_completion: false,
        });
        let send = ast.decl(DeclId(1)).unwrap();
        assert_eq!(ast.export_path(send), "app.net.Client.send");
        assert_eq!(ast.scope_of(send), "Client:");
    }
}
