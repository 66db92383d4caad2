//! Name resolution: the first pass over the extended AST.
//!
//! For every declaring node the resolver allocates (or adopts) a scope and
//! records the declaration; for every identifier use it attaches a
//! `(scope_distance, offsets)` access pattern. Every node is annotated
//! with the name and type scope in which it is checked, so later passes
//! read scope state off the nodes instead of re-deriving it.
//!
//! Declaration is two-phase: an assignment declares its left-hand side
//! before resolving the right-hand side and defines it only afterwards,
//! so a reference to the binding from inside its own initializer fails
//! instead of resolving outward to a shadowed name.

use std::fmt;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::scope::{ScopeId, VarResolution};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolveError {
    pub message: String,
}

impl ResolveError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resolution error: {}", self.message)
    }
}

impl std::error::Error for ResolveError {}

/// Resolves the whole arena starting from the root node.
pub fn resolve(ast: &mut Ast) -> Result<(), ResolveError> {
    let root = ast.root_id();
    let ns = ast
        .get_node(root)
        .name_scope
        .ok_or_else(|| ResolveError::new("root node carries no name scope"))?;
    let ts = ast
        .get_node(root)
        .type_scope
        .ok_or_else(|| ResolveError::new("root node carries no type scope"))?;
    let mut resolver = Resolver { ast };
    // The root block owns the root scopes rather than pushing new ones.
    resolver.resolve_block_in(root, ns, ts)
}

struct Resolver<'a> {
    ast: &'a mut Ast,
}

impl Resolver<'_> {
    fn annotate(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) {
        let n = self.ast.get_node_mut(node);
        n.name_scope = Some(ns);
        n.type_scope = Some(ts);
    }

    /// Pushes child scopes for `node`, or adopts previously annotated ones
    /// so a second resolution run reproduces identical annotations.
    fn push_scopes(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> (ScopeId, ScopeId) {
        let existing = {
            let n = self.ast.get_node(node);
            match (n.name_scope, n.type_scope) {
                (Some(a), Some(b)) if a != ns || b != ts => Some((a, b)),
                _ => None,
            }
        };
        match existing {
            Some(pair) => pair,
            None => {
                let inner_ns = self.ast.create_name_scope(Some(ns));
                let inner_ts = self.ast.create_type_scope(Some(ts));
                self.annotate(node, inner_ns, inner_ts);
                (inner_ns, inner_ts)
            }
        }
    }

    fn resolve_node(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        let kind = self.ast.get_node(node).kind;
        match kind {
            NodeKind::Block => {
                let (inner_ns, inner_ts) = self.push_scopes(node, ns, ts);
                self.resolve_block_in(node, inner_ns, inner_ts)
            }
            NodeKind::BlockResult => {
                self.annotate(node, ns, ts);
                self.resolve_children(node, ns, ts)
            }
            NodeKind::Assignment => self.resolve_assignment(node, ns, ts),
            NodeKind::Declaration => self.resolve_declaration(node, ns, ts),
            NodeKind::Function => self.resolve_function(node, ns, ts),
            NodeKind::FunctionCall => self.resolve_call(node, ns, ts),
            NodeKind::IfStatement => self.resolve_if(node, ns, ts),
            NodeKind::Match => self.resolve_match(node, ns, ts),
            NodeKind::MatchBranch => {
                let (inner_ns, inner_ts) = self.push_scopes(node, ns, ts);
                self.resolve_children(node, inner_ns, inner_ts)
            }
            NodeKind::WhileLoop => self.resolve_while(node, ns, ts),
            NodeKind::Identifier => {
                self.annotate(node, ns, ts);
                self.resolve_identifier_use(node, ns)
            }
            NodeKind::TypeDefinition => self.resolve_type_definition(node, ns, ts),
            NodeKind::ExportStmt => self.resolve_export(node, ns, ts),
            NodeKind::ModuleDeclaration | NodeKind::ImportDeclaration => {
                // Handled by the driver; nothing to resolve inside.
                self.annotate(node, ns, ts);
                self.annotate_subtree(node, ns, ts);
                Ok(())
            }
            NodeKind::Tuple
            | NodeKind::ArrayValue
            | NodeKind::ArrayIndex
            | NodeKind::Reference => {
                self.annotate(node, ns, ts);
                self.resolve_children(node, ns, ts)
            }
            NodeKind::String | NodeKind::Boolean | NodeKind::Number => {
                self.annotate(node, ns, ts);
                Ok(())
            }
            NodeKind::TypeAtom
            | NodeKind::TypeTuple
            | NodeKind::FunctionType
            | NodeKind::ReferenceType
            | NodeKind::ArrayType
            | NodeKind::Record
            | NodeKind::RecordElement
            | NodeKind::IdentifierTuple => {
                // Type expressions resolve against the type environment in
                // the checker; identifier tuples are declared by their
                // assignment.
                self.annotate(node, ns, ts);
                self.annotate_subtree(node, ns, ts);
                Ok(())
            }
            _ if kind.is_binary_op() => {
                self.annotate(node, ns, ts);
                self.resolve_children(node, ns, ts)
            }
            _ => Err(ResolveError::new(format!(
                "unsupported node kind {kind:?} during resolution"
            ))),
        }
    }

    /// Resolves the children of `node` using the given scopes, annotating
    /// the node itself with the same pair.
    fn resolve_block_in(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        self.resolve_children(node, ns, ts)
    }

    fn resolve_children(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        let children = self.ast.get_node(node).children.clone();
        for child in children {
            self.resolve_node(child, ns, ts)?;
        }
        Ok(())
    }

    /// Annotates a subtree without resolving uses (type expressions,
    /// import lists).
    fn annotate_subtree(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) {
        let children = self.ast.get_node(node).children.clone();
        for child in children {
            self.annotate(child, ns, ts);
            self.annotate_subtree(child, ns, ts);
        }
    }

    fn resolve_assignment(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let (lhs, type_expr, rhs) = match children.as_slice() {
            [lhs, rhs] => (*lhs, None, *rhs),
            [lhs, ty, rhs] => (*lhs, Some(*ty), *rhs),
            _ => {
                return Err(ResolveError::new(
                    "assignment expects a target, an optional type, and a value",
                ))
            }
        };

        self.declare_target(lhs, node, ns, ts)?;
        if let Some(ty) = type_expr {
            self.annotate(ty, ns, ts);
            self.annotate_subtree(ty, ns, ts);
        }
        self.resolve_node(rhs, ns, ts)?;
        self.define_target(lhs, ns)?;
        Ok(())
    }

    /// Declares every identifier under an assignment target, without
    /// defining it yet.
    fn declare_target(&mut self, lhs: NodeId, decl: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(lhs, ns, ts);
        match self.ast.get_node(lhs).kind {
            NodeKind::Identifier => {
                let name = self.ast.identifier(lhs).full();
                self.ast
                    .get_name_scope_mut(ns)
                    .declare_variable(&name, decl)
                    .map_err(ResolveError::new)
            }
            NodeKind::IdentifierTuple => {
                let parts = self.ast.get_node(lhs).children.clone();
                for part in parts {
                    self.declare_target(part, decl, ns, ts)?;
                }
                Ok(())
            }
            other => Err(ResolveError::new(format!(
                "invalid assignment target {other:?}"
            ))),
        }
    }

    fn define_target(&mut self, lhs: NodeId, ns: ScopeId) -> Result<(), ResolveError> {
        match self.ast.get_node(lhs).kind {
            NodeKind::Identifier => {
                let name = self.ast.identifier(lhs).full();
                self.ast
                    .get_name_scope_mut(ns)
                    .define_variable(&name)
                    .map_err(ResolveError::new)
            }
            NodeKind::IdentifierTuple => {
                let parts = self.ast.get_node(lhs).children.clone();
                for part in parts {
                    self.define_target(part, ns)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn resolve_declaration(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let [id, type_expr] = children.as_slice() else {
            return Err(ResolveError::new("declaration expects a name and a type"));
        };
        let (id, type_expr) = (*id, *type_expr);
        self.annotate(id, ns, ts);
        let name = self.ast.identifier(id).full();
        let scope = self.ast.get_name_scope_mut(ns);
        scope.declare_variable(&name, node).map_err(ResolveError::new)?;
        scope.define_variable(&name).map_err(ResolveError::new)?;
        self.annotate(type_expr, ns, ts);
        self.annotate_subtree(type_expr, ns, ts);
        Ok(())
    }

    fn resolve_function(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let (name_node, from, to, body) = match children.as_slice() {
            [name, from, to, body] => (Some(*name), *from, *to, *body),
            [from, to, body] => (None, *from, *to, *body),
            _ => {
                return Err(ResolveError::new(
                    "function expects an optional name, parameter and return types, and a body",
                ))
            }
        };

        // Declare the function's own name before descending so the body
        // can call it.
        if let Some(name_node) = name_node {
            self.annotate(name_node, ns, ts);
            let name = self.ast.identifier(name_node).full();
            let scope = self.ast.get_name_scope_mut(ns);
            scope.declare_variable(&name, node).map_err(ResolveError::new)?;
            scope.define_variable(&name).map_err(ResolveError::new)?;
        }

        let (fn_ns, fn_ts) = self.push_scopes(node, ns, ts);
        self.resolve_params(from, fn_ns, fn_ts)?;
        self.annotate(to, fn_ns, fn_ts);
        self.annotate_subtree(to, fn_ns, fn_ts);

        // The body block adopts the function scope: parameters resolve at
        // scope distance zero inside the body.
        if self.ast.get_node(body).kind == NodeKind::Block {
            self.resolve_block_in(body, fn_ns, fn_ts)
        } else {
            self.resolve_node(body, fn_ns, fn_ts)
        }
    }

    fn resolve_params(&mut self, from: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(from, ns, ts);
        match self.ast.get_node(from).kind {
            NodeKind::Declaration => self.resolve_declaration(from, ns, ts),
            NodeKind::Tuple | NodeKind::TypeTuple => {
                let params = self.ast.get_node(from).children.clone();
                for param in params {
                    if self.ast.get_node(param).kind != NodeKind::Declaration {
                        return Err(ResolveError::new(
                            "function parameters must be name/type declarations",
                        ));
                    }
                    self.resolve_declaration(param, ns, ts)?;
                }
                Ok(())
            }
            other => Err(ResolveError::new(format!(
                "invalid function parameter list {other:?}"
            ))),
        }
    }

    fn resolve_call(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let [callee, args] = children.as_slice() else {
            return Err(ResolveError::new(
                "function call expects a callee and an argument tuple",
            ));
        };
        let (callee, args) = (*callee, *args);
        self.annotate(callee, ns, ts);

        if self.resolve_identifier_use(callee, ns).is_err() {
            // A qualified or plain name that is not a variable may still
            // be a constructor: fall back to the type namespace.
            let ident = self.ast.identifier(callee).clone();
            let lookup = if ident.is_simple() {
                self.ast.resolve_type_name(ns, ident.head())
            } else {
                let (path, name) = ident.segments.split_at(ident.segments.len() - 1);
                self.ast.resolve_qualified_type_name(ns, path, &name[0])
            };
            match lookup {
                Some(lookup) => {
                    let data = self.ast.identifier_mut(callee);
                    data.scope_distance = Some(lookup.scope_distance);
                    data.offsets = Some(Vec::new());
                }
                None => {
                    return Err(ResolveError::new(format!(
                        "cannot resolve function call name `{}`",
                        ident.full()
                    )))
                }
            }
        }

        self.resolve_node(args, ns, ts)
    }

    fn resolve_if(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let mut rest = children.as_slice();
        // Children alternate test/arm; a trailing arm without a test is
        // the else branch.
        while let [test, arm, tail @ ..] = rest {
            self.resolve_node(*test, ns, ts)?;
            self.resolve_node(*arm, ns, ts)?;
            rest = tail;
        }
        if let [else_arm] = rest {
            self.resolve_node(*else_arm, ns, ts)?;
        }
        Ok(())
    }

    fn resolve_match(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let Some((&scrutinee, branches)) = children.split_first() else {
            return Err(ResolveError::new("match expects a scrutinee"));
        };
        self.resolve_node(scrutinee, ns, ts)?;
        for &branch in branches {
            if self.ast.get_node(branch).kind != NodeKind::MatchBranch {
                return Err(ResolveError::new("match arms must be match branches"));
            }
            self.resolve_node(branch, ns, ts)?;
        }
        Ok(())
    }

    fn resolve_while(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let [test, body] = children.as_slice() else {
            return Err(ResolveError::new("while expects a test and a body"));
        };
        let (test, body) = (*test, *body);
        // The test gets a scope of its own; a block test owns the pushed
        // scope itself, anything else resolves inside it.
        let (test_ns, test_ts) = self.push_scopes(test, ns, ts);
        if self.ast.get_node(test).kind == NodeKind::Block {
            self.resolve_block_in(test, test_ns, test_ts)?;
        } else {
            self.resolve_node(test, test_ns, test_ts)?;
        }
        self.resolve_node(body, ns, ts)
    }

    fn resolve_type_definition(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let children = self.ast.get_node(node).children.clone();
        let [id, type_expr] = children.as_slice() else {
            return Err(ResolveError::new("type definition expects a name and a type"));
        };
        let (id, type_expr) = (*id, *type_expr);
        self.annotate(id, ns, ts);
        let name = self.ast.identifier(id).full();
        self.ast
            .get_name_scope_mut(ns)
            .define_type(&name, node)
            .map_err(ResolveError::new)?;
        self.annotate(type_expr, ns, ts);
        self.annotate_subtree(type_expr, ns, ts);
        Ok(())
    }

    fn resolve_export(&mut self, node: NodeId, ns: ScopeId, ts: ScopeId) -> Result<(), ResolveError> {
        self.annotate(node, ns, ts);
        let names = self.ast.get_node(node).children.clone();
        for id in names {
            self.annotate(id, ns, ts);
            let name = self.ast.identifier(id).full();
            let as_var = self.ast.resolve_variable(ns, &name);
            if matches!(as_var, VarResolution::Found(_)) {
                continue;
            }
            if self.ast.resolve_type_name(ns, &name).is_some() {
                continue;
            }
            return Err(ResolveError::new(format!(
                "export of unresolved name `{name}`"
            )));
        }
        Ok(())
    }

    /// Resolves an identifier use, attaching its access pattern.
    fn resolve_identifier_use(&mut self, node: NodeId, ns: ScopeId) -> Result<(), ResolveError> {
        let ident = self.ast.identifier(node).clone();
        if ident.segments.is_empty() {
            return Err(ResolveError::new("empty identifier"));
        }

        // Plain name, or head variable with field projections.
        match self.ast.resolve_variable(ns, ident.head()) {
            VarResolution::Found(lookup) => {
                let offsets = if ident.is_simple() {
                    Vec::new()
                } else {
                    self.projection_offsets(
                        lookup.declaration_node,
                        &ident.segments[1..],
                        ns,
                        &ident,
                    )?
                };
                let data = self.ast.identifier_mut(node);
                data.scope_distance = Some(lookup.scope_distance);
                data.offsets = Some(offsets);
                return Ok(());
            }
            VarResolution::UseBeforeDefine => {
                return Err(ResolveError::new(format!(
                    "use of `{}` before its definition",
                    ident.head()
                )))
            }
            VarResolution::Unknown => {}
        }

        // Module-qualified name: longest module prefix wins; the tail is
        // looked up non-recursively in the module scope.
        if !ident.is_simple() {
            for split in (1..ident.segments.len()).rev() {
                let (path, tail) = ident.segments.split_at(split);
                if tail.len() != 1 {
                    continue;
                }
                match self.ast.resolve_qualified_variable(ns, path, &tail[0]) {
                    VarResolution::Found(lookup) => {
                        let data = self.ast.identifier_mut(node);
                        data.scope_distance = Some(lookup.scope_distance);
                        data.offsets = Some(Vec::new());
                        return Ok(());
                    }
                    VarResolution::UseBeforeDefine => {
                        return Err(ResolveError::new(format!(
                            "use of `{}` before its definition",
                            ident.full()
                        )))
                    }
                    VarResolution::Unknown => {}
                }
            }
        }

        Err(ResolveError::new(format!(
            "cannot resolve name `{}`",
            ident.full()
        )))
    }

    /// Positional offsets for a field path through a product-typed
    /// binding: for `a.b.c` the offsets are the index of `b` in `a`'s
    /// record, then of `c` in `b`'s.
    fn projection_offsets(
        &self,
        decl: NodeId,
        fields: &[String],
        ns: ScopeId,
        ident: &crate::ast::Identifier,
    ) -> Result<Vec<u32>, ResolveError> {
        let mut structure = self.declared_structure(decl, ns).ok_or_else(|| {
            ResolveError::new(format!(
                "`{}` has no record structure to project into",
                ident.head()
            ))
        })?;

        let mut offsets = Vec::with_capacity(fields.len());
        for field in fields {
            structure = self.record_structure(structure, ns)?;
            let elements = self.ast.get_node(structure).children.clone();
            let mut found = None;
            for (index, element) in elements.iter().enumerate() {
                if self.ast.get_node(*element).kind != NodeKind::RecordElement {
                    return Err(ResolveError::new("malformed record type"));
                }
                let name_node = self.ast.get_node(*element).children[0];
                if self.ast.identifier(name_node).full() == *field {
                    found = Some((index as u32, self.ast.get_node(*element).children[1]));
                    break;
                }
            }
            match found {
                Some((index, next)) => {
                    offsets.push(index);
                    structure = next;
                }
                None => {
                    return Err(ResolveError::new(format!(
                        "unknown field `{field}` in `{}`",
                        ident.full()
                    )))
                }
            }
        }
        Ok(offsets)
    }

    /// The type-expression node describing `decl`'s structure: an explicit
    /// annotation when present, otherwise the constructor named by the
    /// initializer.
    fn declared_structure(&self, decl: NodeId, ns: ScopeId) -> Option<NodeId> {
        let node = self.ast.get_node(decl);
        match node.kind {
            NodeKind::Declaration => node.children.get(1).copied(),
            NodeKind::Assignment => {
                if node.children.len() == 3 {
                    return Some(node.children[1]);
                }
                let rhs = *node.children.last()?;
                let rhs_node = self.ast.get_node(rhs);
                if rhs_node.kind != NodeKind::FunctionCall {
                    return None;
                }
                let callee = *rhs_node.children.first()?;
                let name = self.ast.identifier(callee).clone();
                let lookup = if name.is_simple() {
                    self.ast.resolve_type_name(ns, name.head())
                } else {
                    let (path, tail) = name.segments.split_at(name.segments.len() - 1);
                    self.ast.resolve_qualified_type_name(ns, path, &tail[0])
                }?;
                let def = self.ast.get_node(lookup.declaration_node);
                def.children.get(1).copied()
            }
            _ => None,
        }
    }

    /// Follows a type expression to the record node it denotes.
    fn record_structure(&self, type_expr: NodeId, ns: ScopeId) -> Result<NodeId, ResolveError> {
        let node = self.ast.get_node(type_expr);
        match node.kind {
            NodeKind::Record => Ok(type_expr),
            NodeKind::TypeAtom => {
                let id = node.children.first().copied().ok_or_else(|| {
                    ResolveError::new("malformed type atom")
                })?;
                let name = self.ast.identifier(id).clone();
                let lookup = if name.is_simple() {
                    self.ast.resolve_type_name(ns, name.head())
                } else {
                    let (path, tail) = name.segments.split_at(name.segments.len() - 1);
                    self.ast.resolve_qualified_type_name(ns, path, &tail[0])
                };
                let lookup = lookup.ok_or_else(|| {
                    ResolveError::new(format!("unknown type `{}`", name.full()))
                })?;
                let def = self.ast.get_node(lookup.declaration_node);
                let inner = def.children.get(1).copied().ok_or_else(|| {
                    ResolveError::new(format!("type `{}` has no structure", name.full()))
                })?;
                self.record_structure(inner, ns)
            }
            _ => Err(ResolveError::new(
                "field projection requires a record type",
            )),
        }
    }
}
