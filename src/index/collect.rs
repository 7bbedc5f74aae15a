//! Builds one package's index shard from its typed AST.
//!
//! Walks every declaration (parameters included) into a symbol, every
//! resolved name use into a reference, and inheritance, containment,
//! extension and override structure into relations. Overridden parents are
//! located through generic-parameter substitution so `List<T>.get` and
//! `IntList.get` pair up.

use super::{
    CompletionSnippet, Extension, IndexShard, Ref, RefKind, Relation, RelationKind, Symbol,
    SymbolId, SymbolKind,
};
use crate::ast::{
    Decl, DeclKind, ExprKind, TypeNode, TypedAst, Visibility, Visit,
};
use std::collections::HashMap;

pub struct SymbolCollector<'a> {
    ast: &'a TypedAst,
    module: String,
    package_visibility: Visibility,
    shard: IndexShard,
}

impl<'a> SymbolCollector<'a> {
    pub fn new(ast: &'a TypedAst, module: impl Into<String>, package_visibility: Visibility) -> Self {
        Self { ast, module: module.into(), package_visibility, shard: IndexShard::default() }
    }

    /// Walks the package and produces its shard.
    pub fn build(mut self) -> IndexShard {
        for decl in self.ast.decls.iter() {
            self.collect_symbol(decl);
        }
        for decl in self.ast.top_level() {
            self.collect_relations(decl);
        }
        self.collect_refs();
        self.collect_overrides();
        self.collect_macro_uses();
        self.shard
    }

    fn symbol_id(&self, decl: &Decl) -> SymbolId {
        SymbolId::of(&self.ast.export_path(decl))
    }

    fn container_id(&self, decl: &Decl) -> SymbolId {
        decl.container
            .and_then(|id| self.ast.decl(id))
            .map(|parent| self.symbol_id(parent))
            .unwrap_or_default()
    }

    fn collect_symbol(&mut self, decl: &Decl) {
        let id = self.symbol_id(decl);
        let mut symbol = Symbol {
            id,
            name: decl.name.clone(),
            kind: SymbolKind::from(decl.kind),
            location: decl.location.clone(),
            scope: self.ast.scope_of(decl),
            visibility: decl.visibility,
            package_visibility: self.package_visibility,
            deprecated: decl.deprecated,
            doc: decl.doc.clone(),
            module: self.module.clone(),
            is_cjo_sym: false,
            not_for_completion: decl.not_for_completion || decl.kind == DeclKind::Param,
            signature: decl.signature.as_ref().map(|s| s.render()),
            completion_items: Vec::new(),
        };
        symbol.completion_items = completion_items(decl);
        self.shard.symbols.push(symbol);

        // the declaration site is itself a reference of kind definition
        let container = self.container_id(decl);
        self.shard.refs.entry(id).or_default().push(Ref {
            location: decl.location.clone(),
            kind: RefKind::Definition,
            container,
            is_super: false,
        });
    }

    fn collect_relations(&mut self, decl: &Decl) {
        let id = self.symbol_id(decl);

        for base in &decl.inherits {
            let predicate = if decl.kind == DeclKind::Extend {
                RelationKind::Extend
            } else {
                RelationKind::BaseOf
            };
            self.shard.relations.push(Relation {
                subject: SymbolId::of(&base.path),
                predicate,
                object: id,
            });
        }

        if decl.kind == DeclKind::Extend {
            if let Some(extended) = &decl.extends {
                let extended_id = SymbolId::of(&extended.path);
                for member in &decl.members {
                    let Some(member_decl) = self.ast.decl(*member) else {
                        continue;
                    };
                    let member_id = self.symbol_id(member_decl);
                    self.shard.extensions.entry(extended_id).or_default().push(Extension {
                        member: member_id,
                        visibility: member_decl.visibility,
                        interface: decl.extend_interface.clone(),
                    });
                }
            }
        }

        for member in &decl.members {
            let Some(member_decl) = self.ast.decl(*member) else {
                continue;
            };
            self.shard.relations.push(Relation {
                subject: self.symbol_id(member_decl),
                predicate: RelationKind::ContainedBy,
                object: id,
            });
            self.collect_relations(member_decl);
        }
    }

    fn collect_refs(&mut self) {
        for name_ref in &self.ast.refs {
            let id = SymbolId::of(&name_ref.target);
            let container = name_ref
                .container
                .and_then(|decl_id| self.ast.decl(decl_id))
                .map(|decl| self.symbol_id(decl))
                .unwrap_or_default();
            self.shard.refs.entry(id).or_default().push(Ref {
                location: name_ref.location.clone(),
                kind: RefKind::from(name_ref.kind),
                container,
                is_super: name_ref.is_super,
            });
        }
    }

    /// Pairs each member of an inheritable declaration with the member it
    /// overrides in a parent, mapping the child's generic arguments into the
    /// parent's scope first.
    fn collect_overrides(&mut self) {
        let mut relations = Vec::new();
        for decl in self.ast.decls.iter() {
            if !decl.kind.is_inheritable() || decl.inherits.is_empty() {
                continue;
            }
            for base in &decl.inherits {
                let parent = self.ast.decls.iter().find(|candidate| {
                    candidate.kind.is_inheritable()
                        && self.ast.export_path(candidate) == base.path
                });

                for member_id in &decl.members {
                    let Some(member) = self.ast.decl(*member_id) else {
                        continue;
                    };
                    if member.kind != DeclKind::Function {
                        continue;
                    }

                    match parent {
                        Some(parent_decl) => {
                            let mapping = generic_mapping(parent_decl, base);
                            let Some(parent_member) = parent_decl
                                .members
                                .iter()
                                .filter_map(|id| self.ast.decl(*id))
                                .find(|pm| overrides(pm, member, &mapping))
                            else {
                                continue;
                            };
                            self.push_override(parent_member, member, &mut relations);
                        }
                        None => {
                            // parent lives in another package: pair by name
                            // against its exported path
                            let parent_member_path = format!("{}.{}", base.path, member.name);
                            relations.push(Relation {
                                subject: SymbolId::of(&parent_member_path),
                                predicate: RelationKind::RiddenBy,
                                object: self.symbol_id(member),
                            });
                        }
                    }
                }
            }
        }
        self.shard.relations.extend(relations);
    }

    fn push_override(&self, parent: &Decl, child: &Decl, out: &mut Vec<Relation>) {
        out.push(Relation {
            subject: self.symbol_id(parent),
            predicate: RelationKind::RiddenBy,
            object: self.symbol_id(child),
        });

        // named parameters override pairwise as well
        let named = |decl: &Decl| -> Vec<(String, SymbolId)> {
            decl.signature
                .as_ref()
                .map(|sig| {
                    sig.params
                        .iter()
                        .filter(|p| p.named)
                        .map(|p| {
                            let path =
                                format!("{}.{}", self.ast.export_path(decl), p.name);
                            (p.name.clone(), SymbolId::of(&path))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        let parent_params: HashMap<String, SymbolId> = named(parent).into_iter().collect();
        for (name, child_id) in named(child) {
            if let Some(parent_id) = parent_params.get(&name) {
                out.push(Relation {
                    subject: *parent_id,
                    predicate: RelationKind::RiddenBy,
                    object: child_id,
                });
            }
        }
    }

    fn collect_macro_uses(&mut self) {
        struct MacroVisitor {
            uses: Vec<(String, crate::ast::Location, SymbolId)>,
            container: SymbolId,
        }
        impl Visit for MacroVisitor {
            fn visit_expr(&mut self, ast: &TypedAst, expr: &crate::ast::Expr) {
                if let ExprKind::MacroInvoke { target, .. } = &expr.kind {
                    self.uses.push((target.clone(), expr.location.clone(), self.container));
                }
                crate::ast::walk_expr(self, ast, expr);
            }
        }

        let mut all_uses = Vec::new();
        for decl in self.ast.top_level() {
            let mut visitor =
                MacroVisitor { uses: Vec::new(), container: self.symbol_id(decl) };
            visitor.visit_decl(self.ast, decl);
            all_uses.extend(visitor.uses);
        }
        for (target, location, container) in all_uses {
            self.shard.refs.entry(SymbolId::of(&target)).or_default().push(Ref {
                location,
                kind: RefKind::Reference,
                container,
                is_super: false,
            });
        }
    }
}

/// Maps the parent's generic parameter names to the arguments the child
/// instantiated them with.
fn generic_mapping(parent: &Decl, base: &crate::ast::TypeRef) -> HashMap<String, TypeNode> {
    parent
        .generic_params
        .iter()
        .cloned()
        .zip(base.args.iter().cloned())
        .collect()
}

/// Whether `child` overrides `parent_member` once the parent's generics are
/// substituted.
fn overrides(parent_member: &Decl, child: &Decl, mapping: &HashMap<String, TypeNode>) -> bool {
    if parent_member.kind != DeclKind::Function || parent_member.name != child.name {
        return false;
    }
    let (Some(parent_sig), Some(child_sig)) = (&parent_member.signature, &child.signature) else {
        return parent_member.signature.is_none() && child.signature.is_none();
    };
    if parent_sig.params.len() != child_sig.params.len() {
        return false;
    }
    parent_sig
        .params
        .iter()
        .zip(child_sig.params.iter())
        .all(|(p, c)| p.ty.substitute(mapping).render() == c.ty.render())
}

/// Pre-renders the completion items of one declaration: the plain label, a
/// parameter-list variant for callables, and a follow-lambda variant when the
/// trailing parameter is a function.
fn completion_items(decl: &Decl) -> Vec<CompletionSnippet> {
    let mut items = vec![CompletionSnippet {
        label: decl.name.clone(),
        insert_text: decl.name.clone(),
    }];
    let Some(signature) = &decl.signature else {
        return items;
    };
    if decl.kind != DeclKind::Function && decl.kind != DeclKind::Macro {
        return items;
    }

    let params =
        signature.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", ");
    items.push(CompletionSnippet {
        label: format!("{}{}", decl.name, signature.render()),
        insert_text: format!("{}({params})", decl.name),
    });

    if let Some(last) = signature.params.last() {
        if matches!(last.ty, TypeNode::Function { .. }) {
            let leading = signature.params[..signature.params.len() - 1]
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let insert_text = if leading.is_empty() {
                format!("{} {{ }}", decl.name)
            } else {
                format!("{}({leading}) {{ }}", decl.name)
            };
            items.push(CompletionSnippet { label: format!("{} {{ ... }}", decl.name), insert_text });
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Location, NameRef, NameRefKind, Param, Signature, TypeRef};

    fn decl(id: u32, name: &str, kind: DeclKind) -> Decl {
        Decl {
            id: crate::ast::DeclId(id),
            name: name.into(),
            kind,
            visibility: Visibility::Public,
            deprecated: false,
            doc: None,
            location: Location::default(),
            container: None,
            members: vec![],
            generic_params: vec![],
            signature: None,
            inherits: vec![],
            extends: None,
            extend_interface: None,
            body: vec![],
            not_for_completion: false,
        }
    }

    fn function(id: u32, name: &str, params: &[(&str, TypeNode, bool)], ret: TypeNode) -> Decl {
        let mut d = decl(id, name, DeclKind::Function);
        d.signature = Some(Signature {
            params: params
                .iter()
                .map(|(n, ty, named)| Param {
                    name: (*n).into(),
                    ty: ty.clone(),
                    named: *named,
                    location: Location::default(),
                })
                .collect(),
            ret: Some(ret),
        });
        d
    }

    /// interface Seq<T> { func get(i: Int) -> T }
    /// class Ints : Seq<Int> { func get(i: Int) -> Int }
    fn inheritance_ast() -> TypedAst {
        let mut ast = TypedAst { package: "app".into(), ..Default::default() };

        let mut seq = decl(0, "Seq", DeclKind::Interface);
        seq.generic_params = vec!["T".into()];
        seq.members = vec![crate::ast::DeclId(1)];
        let mut seq_get =
            function(1, "get", &[("i", TypeNode::named("std.Int"), false)], TypeNode::named("T"));
        seq_get.container = Some(crate::ast::DeclId(0));

        let mut ints = decl(2, "Ints", DeclKind::Class);
        ints.inherits = vec![TypeRef {
            path: "app.Seq".into(),
            args: vec![TypeNode::named("std.Int")],
        }];
        ints.members = vec![crate::ast::DeclId(3)];
        let mut ints_get = function(
            3,
            "get",
            &[("i", TypeNode::named("std.Int"), false)],
            TypeNode::named("std.Int"),
        );
        ints_get.container = Some(crate::ast::DeclId(2));

        ast.decls = vec![seq, seq_get, ints, ints_get];
        ast
    }

    #[test]
    fn emits_one_symbol_per_declaration() {
        let ast = inheritance_ast();
        let shard = SymbolCollector::new(&ast, "app", Visibility::Public).build();
        assert_eq!(shard.symbols.len(), 4);
        assert!(shard.symbols.iter().any(|s| s.name == "Seq" && s.scope.is_empty()));
        assert!(shard.symbols.iter().any(|s| s.name == "get" && s.scope == "Seq:"));
    }

    #[test]
    fn override_pairs_through_generic_substitution() {
        let ast = inheritance_ast();
        let shard = SymbolCollector::new(&ast, "app", Visibility::Public).build();
        let parent = SymbolId::of("app.Seq.get");
        let child = SymbolId::of("app.Ints.get");
        assert!(shard.relations.iter().any(|r| r.subject == parent
            && r.predicate == RelationKind::RiddenBy
            && r.object == child));
    }

    #[test]
    fn containment_and_base_relations() {
        let ast = inheritance_ast();
        let shard = SymbolCollector::new(&ast, "app", Visibility::Public).build();
        assert!(shard.relations.iter().any(|r| r.subject == SymbolId::of("app.Seq.get")
            && r.predicate == RelationKind::ContainedBy
            && r.object == SymbolId::of("app.Seq")));
        assert!(shard.relations.iter().any(|r| r.subject == SymbolId::of("app.Seq")
            && r.predicate == RelationKind::BaseOf
            && r.object == SymbolId::of("app.Ints")));
    }

    #[test]
    fn references_carry_their_container() {
        let mut ast = inheritance_ast();
        ast.refs.push(NameRef {
            target: "app.Seq".into(),
            kind: NameRefKind::Reference,
            location: Location::default(),
            container: Some(crate::ast::DeclId(2)),
            is_super: false,
        });
        let shard = SymbolCollector::new(&ast, "app", Visibility::Public).build();
        let refs = &shard.refs[&SymbolId::of("app.Seq")];
        let use_site = refs.iter().find(|r| r.kind == RefKind::Reference).unwrap();
        assert_eq!(use_site.container, SymbolId::of("app.Ints"));
    }

    #[test]
    fn completion_items_cover_callable_variants() {
        let lambda_fn = function(
            0,
            "each",
            &[(
                "f",
                TypeNode::Function {
                    params: vec![TypeNode::named("T")],
                    ret: Box::new(TypeNode::named("std.Unit")),
                },
                false,
            )],
            TypeNode::named("std.Unit"),
        );
        let items = completion_items(&lambda_fn);
        assert_eq!(items.len(), 3);
        assert!(items.iter().any(|i| i.insert_text == "each { }"));
    }

    #[test]
    fn extension_members_are_grouped_by_extended_type() {
        let mut ast = TypedAst { package: "ext".into(), ..Default::default() };
        let mut extend = decl(0, "extend_List", DeclKind::Extend);
        extend.extends = Some(TypeRef::new("base.collections.List"));
        extend.extend_interface = Some("base.Printable".into());
        extend.members = vec![crate::ast::DeclId(1)];
        let mut print = function(1, "print", &[], TypeNode::named("std.Unit"));
        print.container = Some(crate::ast::DeclId(0));
        ast.decls = vec![extend, print];

        let shard = SymbolCollector::new(&ast, "ext", Visibility::Public).build();
        let extended = SymbolId::of("base.collections.List");
        let members = &shard.extensions[&extended];
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].interface.as_deref(), Some("base.Printable"));
    }
}
