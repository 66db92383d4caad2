//! The extended AST: an arena owning nodes, scopes, and per-kind leaf data.
//!
//! The parser (an external collaborator) builds this tree setting only
//! `kind`, children, and leaf data; the resolver and type checker annotate
//! scopes, access patterns, and elaborated types in place. All
//! cross-references are stable integer ids, never addresses.

use std::fmt;

use aster_core::types::{IntKind, Type};

use crate::scope::{NameScope, ScopeId, TypeScope};

/// A stable node index into the AST arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

/// An index into one of the per-kind leaf data stores.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DataId(pub u32);

/// The node kind tags delivered by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    ModuleDeclaration,
    ImportDeclaration,
    ExportStmt,

    Block,
    BlockResult,

    Assignment,
    Declaration,
    IdentifierTuple,

    Function,
    FunctionCall,

    IfStatement,
    Match,
    MatchBranch,
    WhileLoop,

    Identifier,
    Tuple,
    ArrayValue,
    ArrayIndex,
    Reference,

    // Literals
    String,
    Boolean,
    Number,

    // Type declarations
    TypeDefinition,
    Record,
    RecordElement,

    // Type expressions
    TypeAtom,
    TypeTuple,
    FunctionType,
    ReferenceType,
    ArrayType,

    // Binary operators
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    Equality,
    GreaterThan,
    GreaterOrEq,
    LessThan,
    LessOrEq,
}

impl NodeKind {
    pub fn is_binary_op(self) -> bool {
        self.binary_op().is_some()
    }

    pub fn binary_op(self) -> Option<aster_core::BinOp> {
        use aster_core::BinOp;
        match self {
            NodeKind::Addition => Some(BinOp::Add),
            NodeKind::Subtraction => Some(BinOp::Sub),
            NodeKind::Multiplication => Some(BinOp::Mul),
            NodeKind::Division => Some(BinOp::Div),
            NodeKind::Modulo => Some(BinOp::Mod),
            NodeKind::Equality => Some(BinOp::Eq),
            NodeKind::GreaterThan => Some(BinOp::Gt),
            NodeKind::GreaterOrEq => Some(BinOp::Gte),
            NodeKind::LessThan => Some(BinOp::Lt),
            NodeKind::LessOrEq => Some(BinOp::Lte),
            _ => None,
        }
    }

    /// Kinds that introduce a name binding.
    pub fn is_declaring(self) -> bool {
        matches!(
            self,
            NodeKind::Assignment
                | NodeKind::Declaration
                | NodeKind::Function
                | NodeKind::TypeDefinition
        )
    }
}

/// A dot-segmented identifier plus the access pattern attached by the
/// resolver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identifier {
    pub segments: Vec<String>,
    pub scope_distance: Option<u32>,
    pub offsets: Option<Vec<u32>>,
}

impl Identifier {
    pub fn from_dotted(name: &str) -> Identifier {
        Identifier {
            segments: name.split('.').map(str::to_string).collect(),
            scope_distance: None,
            offsets: None,
        }
    }

    pub fn full(&self) -> String {
        self.segments.join(".")
    }

    /// Leading segment: the variable or module head.
    pub fn head(&self) -> &str {
        self.segments.first().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn is_simple(&self) -> bool {
        self.segments.len() == 1
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full())
    }
}

/// A number literal: value plus the width its suffix declared, if any.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Number {
    pub value: i64,
    pub declared: Option<IntKind>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringData(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Boolean(pub bool);

/// One extended-AST node. Leaf payloads live in side tables addressed by
/// `data`; scope and type annotations are filled by the passes.
#[derive(Clone, Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub id: NodeId,
    pub children: Vec<NodeId>,
    pub parent: Option<NodeId>,
    pub data: Option<DataId>,
    pub ty: Option<Type>,
    pub name_scope: Option<ScopeId>,
    pub type_scope: Option<ScopeId>,
}

impl Node {
    fn new(id: NodeId, kind: NodeKind) -> Node {
        Node {
            kind,
            id,
            children: Vec::new(),
            parent: None,
            data: None,
            ty: None,
            name_scope: None,
            type_scope: None,
        }
    }
}

/// The AST arena: exclusive owner of all nodes, scopes, and leaf data for
/// one compilation.
#[derive(Clone, Debug)]
pub struct Ast {
    nodes: Vec<Node>,
    name_scopes: Vec<NameScope>,
    type_scopes: Vec<TypeScope>,

    identifiers: Vec<Identifier>,
    numbers: Vec<Number>,
    strings: Vec<StringData>,
    booleans: Vec<Boolean>,

    root: NodeId,
}

impl Ast {
    /// Creates an arena whose root node carries fresh root scopes.
    pub fn new(kind: NodeKind) -> Ast {
        let mut ast = Ast {
            nodes: Vec::new(),
            name_scopes: Vec::new(),
            type_scopes: Vec::new(),
            identifiers: Vec::new(),
            numbers: Vec::new(),
            strings: Vec::new(),
            booleans: Vec::new(),
            root: NodeId(0),
        };
        let root = ast.create_node(kind);
        let name_scope = ast.create_name_scope(None);
        let type_scope = ast.create_type_scope(None);
        let root_node = ast.get_node_mut(root);
        root_node.name_scope = Some(name_scope);
        root_node.type_scope = Some(type_scope);
        ast.root = root;
        ast
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn create_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut node = Node::new(id, kind);
        node.data = self.create_node_data(kind);
        self.nodes.push(node);
        id
    }

    pub fn get_node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn get_node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn contains(&self, id: NodeId) -> bool {
        (id.0 as usize) < self.nodes.len()
    }

    /// Appends `child` to `parent`, recording the back-link.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.get_node_mut(parent).children.push(child);
        self.get_node_mut(child).parent = Some(parent);
    }

    // Scopes

    pub fn create_name_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.name_scopes.len() as u32);
        let mut scope = NameScope::default();
        if let Some(parent) = parent {
            scope.set_parent(parent);
        }
        self.name_scopes.push(scope);
        id
    }

    pub fn get_name_scope(&self, id: ScopeId) -> &NameScope {
        &self.name_scopes[id.0 as usize]
    }

    pub fn get_name_scope_mut(&mut self, id: ScopeId) -> &mut NameScope {
        &mut self.name_scopes[id.0 as usize]
    }

    pub fn create_type_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.type_scopes.len() as u32);
        let mut scope = TypeScope::default();
        if let Some(parent) = parent {
            scope.set_parent(parent);
        }
        self.type_scopes.push(scope);
        id
    }

    pub fn get_type_scope(&self, id: ScopeId) -> &TypeScope {
        &self.type_scopes[id.0 as usize]
    }

    pub fn get_type_scope_mut(&mut self, id: ScopeId) -> &mut TypeScope {
        &mut self.type_scopes[id.0 as usize]
    }

    /// Resolves a simple variable name starting at `scope`, walking parent
    /// links through the arena.
    pub fn resolve_variable(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> crate::scope::VarResolution {
        self.get_name_scope(scope)
            .resolve_variable(name, &|id| self.get_name_scope(id))
    }

    /// Module-qualified variable lookup starting at `scope`.
    pub fn resolve_qualified_variable(
        &self,
        scope: ScopeId,
        path: &[String],
        name: &str,
    ) -> crate::scope::VarResolution {
        self.get_name_scope(scope)
            .resolve_qualified_variable(path, name, &|id| self.get_name_scope(id))
    }

    /// Type-name lookup in the name environment starting at `scope`.
    pub fn resolve_type_name(
        &self,
        scope: ScopeId,
        name: &str,
    ) -> Option<crate::scope::TypeLookup> {
        self.get_name_scope(scope)
            .resolve_type(name, &|id| self.get_name_scope(id))
    }

    pub fn resolve_qualified_type_name(
        &self,
        scope: ScopeId,
        path: &[String],
        name: &str,
    ) -> Option<crate::scope::TypeLookup> {
        self.get_name_scope(scope)
            .resolve_qualified_type(path, name, &|id| self.get_name_scope(id))
    }

    /// The elaborated type of a term binding, walking parent type scopes.
    pub fn type_of_variable(&self, scope: ScopeId, name: &str) -> Option<(u32, Type)> {
        self.get_type_scope(scope)
            .type_of(name, &|id| self.get_type_scope(id))
    }

    pub fn qualified_type_of_variable(
        &self,
        scope: ScopeId,
        path: &[String],
        name: &str,
    ) -> Option<(u32, Type)> {
        self.get_type_scope(scope)
            .qualified_type_of(path, name, &|id| self.get_type_scope(id))
    }

    /// A named type definition, walking parent type scopes.
    pub fn lookup_type(&self, scope: ScopeId, name: &str) -> Option<Type> {
        self.get_type_scope(scope)
            .resolve_type(name, &|id| self.get_type_scope(id))
    }

    pub fn lookup_qualified_type(
        &self,
        scope: ScopeId,
        path: &[String],
        name: &str,
    ) -> Option<Type> {
        self.get_type_scope(scope)
            .resolve_qualified_type(path, name, &|id| self.get_type_scope(id))
    }

    // Leaf data

    pub fn identifier(&self, node: NodeId) -> &Identifier {
        let data = self.data_of(node);
        &self.identifiers[data.0 as usize]
    }

    pub fn identifier_mut(&mut self, node: NodeId) -> &mut Identifier {
        let data = self.data_of(node);
        &mut self.identifiers[data.0 as usize]
    }

    pub fn number(&self, node: NodeId) -> &Number {
        let data = self.data_of(node);
        &self.numbers[data.0 as usize]
    }

    pub fn number_mut(&mut self, node: NodeId) -> &mut Number {
        let data = self.data_of(node);
        &mut self.numbers[data.0 as usize]
    }

    pub fn string(&self, node: NodeId) -> &StringData {
        let data = self.data_of(node);
        &self.strings[data.0 as usize]
    }

    pub fn string_mut(&mut self, node: NodeId) -> &mut StringData {
        let data = self.data_of(node);
        &mut self.strings[data.0 as usize]
    }

    pub fn boolean(&self, node: NodeId) -> &Boolean {
        let data = self.data_of(node);
        &self.booleans[data.0 as usize]
    }

    pub fn boolean_mut(&mut self, node: NodeId) -> &mut Boolean {
        let data = self.data_of(node);
        &mut self.booleans[data.0 as usize]
    }

    /// The declared module path, when a `module` declaration is present.
    pub fn module_name(&self) -> Option<Vec<String>> {
        let decl = self.find_node(NodeKind::ModuleDeclaration)?;
        let id_node = *self.get_node(decl).children.first()?;
        Some(self.identifier(id_node).segments.clone())
    }

    /// All imported module paths, in declaration order.
    pub fn imports(&self) -> Vec<Vec<String>> {
        let mut paths = Vec::new();
        for node in &self.nodes {
            if node.kind == NodeKind::ImportDeclaration {
                for &child in &node.children {
                    paths.push(self.identifier(child).segments.clone());
                }
            }
        }
        paths
    }

    fn data_of(&self, node: NodeId) -> DataId {
        self.get_node(node)
            .data
            .unwrap_or_else(|| panic!("node {:?} carries no leaf data", self.get_node(node).kind))
    }

    fn create_node_data(&mut self, kind: NodeKind) -> Option<DataId> {
        match kind {
            NodeKind::Identifier => {
                self.identifiers.push(Identifier::default());
                Some(DataId((self.identifiers.len() - 1) as u32))
            }
            NodeKind::Number => {
                self.numbers.push(Number::default());
                Some(DataId((self.numbers.len() - 1) as u32))
            }
            NodeKind::String => {
                self.strings.push(StringData::default());
                Some(DataId((self.strings.len() - 1) as u32))
            }
            NodeKind::Boolean => {
                self.booleans.push(Boolean::default());
                Some(DataId((self.booleans.len() - 1) as u32))
            }
            _ => None,
        }
    }

    fn find_node(&self, kind: NodeKind) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.kind == kind).map(|n| n.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_stable() {
        let mut ast = Ast::new(NodeKind::Block);
        let a = ast.create_node(NodeKind::Number);
        let b = ast.create_node(NodeKind::Identifier);
        ast.add_child(ast.root_id(), a);
        ast.add_child(ast.root_id(), b);
        assert_eq!(ast.get_node(a).kind, NodeKind::Number);
        assert_eq!(ast.get_node(b).parent, Some(ast.root_id()));
        assert_eq!(ast.get_node(ast.root_id()).children, vec![a, b]);
    }

    #[test]
    fn leaf_data_round_trips() {
        let mut ast = Ast::new(NodeKind::Block);
        let num = ast.create_node(NodeKind::Number);
        ast.number_mut(num).value = 42;
        ast.number_mut(num).declared = Some(IntKind::Ui64);
        assert_eq!(ast.number(num).value, 42);

        let id = ast.create_node(NodeKind::Identifier);
        *ast.identifier_mut(id) = Identifier::from_dotted("std.io.println");
        assert_eq!(ast.identifier(id).segments.len(), 3);
        assert_eq!(ast.identifier(id).head(), "std");
        assert!(!ast.identifier(id).is_simple());
    }

    #[test]
    fn root_node_owns_root_scopes() {
        let ast = Ast::new(NodeKind::Block);
        let root = ast.get_node(ast.root_id());
        assert!(root.name_scope.is_some());
        assert!(root.type_scope.is_some());
    }
}
