//! Name and type scopes, arranged in a tree over the AST arena.
//!
//! Scopes hold only ids; walking the parent chain goes through a
//! `get_scope` callback so the lookup algorithms never hold a reference
//! into the arena they are traversing. Lookup ascends one parent link per
//! hop, counting the hops as the `scope_distance` of the result.

use std::collections::HashMap;

use aster_core::types::Type;

use crate::ast::NodeId;

/// Scope dereference callbacks: lookups cross arena boundaries (a scope
/// in an imported module's subtree) without embedding a reference to the
/// arena itself.
pub type GetNameScope<'a> = &'a dyn Fn(ScopeId) -> &'a NameScope;
pub type GetTypeScope<'a> = &'a dyn Fn(ScopeId) -> &'a TypeScope;

/// A stable scope index. Name scopes and type scopes are stored in
/// separate tables; an id is only meaningful for the table it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

/// Resolution result for a variable name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarLookup {
    pub scope_distance: u32,
    pub declaration_node: NodeId,
}

/// Resolution result for a type name in the name scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeLookup {
    pub scope_distance: u32,
    pub declaration_node: NodeId,
}

/// Outcome of a variable lookup. A name that is declared but not yet
/// defined is distinct from an unknown name: the former is a
/// use-before-define error at the use site and must not fall through to
/// an outer shadowed binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarResolution {
    Found(VarLookup),
    UseBeforeDefine,
    Unknown,
}

impl VarResolution {
    pub fn found(self) -> Option<VarLookup> {
        match self {
            VarResolution::Found(lookup) => Some(lookup),
            _ => None,
        }
    }
}

/// A scope in the name environment: variables with their declaration
/// site and defined flag, type declarations, and module bindings.
#[derive(Clone, Debug, Default)]
pub struct NameScope {
    variables: HashMap<String, (NodeId, bool)>,
    types: HashMap<String, NodeId>,
    modules: HashMap<Vec<String>, ScopeId>,
    parent: Option<ScopeId>,
}

impl NameScope {
    pub fn set_parent(&mut self, parent: ScopeId) {
        self.parent = Some(parent);
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    /// Number of parent links above this scope.
    pub fn depth(&self, get_scope: GetNameScope<'_>) -> u32 {
        match self.parent {
            Some(parent) => 1 + get_scope(parent).depth(get_scope),
            None => 0,
        }
    }

    /// Declares `name` in this scope. Re-declaring the same declaration
    /// node is a no-op so the pass can be re-run over the same arena;
    /// declaring a different node under an existing name is an error.
    pub fn declare_variable(&mut self, name: &str, decl: NodeId) -> Result<(), String> {
        match self.variables.get(name) {
            Some((existing, _)) if *existing != decl => Err(format!(
                "name `{name}` is already declared in this scope"
            )),
            _ => {
                self.variables.entry(name.to_string()).or_insert((decl, false));
                Ok(())
            }
        }
    }

    /// Marks a declared name resolvable. Must follow `declare_variable`
    /// in the same scope.
    pub fn define_variable(&mut self, name: &str) -> Result<(), String> {
        match self.variables.get_mut(name) {
            Some(entry) => {
                entry.1 = true;
                Ok(())
            }
            None => Err(format!("cannot define undeclared name `{name}`")),
        }
    }

    /// Binds a type declaration node under `name`. Single definition per
    /// name per scope; re-defining the same node is a no-op.
    pub fn define_type(&mut self, name: &str, decl: NodeId) -> Result<(), String> {
        match self.types.get(name) {
            Some(existing) if *existing != decl => Err(format!(
                "type `{name}` is already defined in this scope"
            )),
            _ => {
                self.types.insert(name.to_string(), decl);
                Ok(())
            }
        }
    }

    /// Associates a module path with another scope subtree.
    pub fn add_module(&mut self, path: Vec<String>, scope: ScopeId) {
        self.modules.insert(path, scope);
    }

    pub fn module(&self, path: &[String]) -> Option<ScopeId> {
        self.modules.get(path).copied()
    }

    pub fn resolve_variable(
        &self,
        name: &str,
        get_scope: GetNameScope<'_>,
    ) -> VarResolution {
        match self.variables.get(name) {
            Some((decl, true)) => VarResolution::Found(VarLookup {
                scope_distance: 0,
                declaration_node: *decl,
            }),
            Some((_, false)) => VarResolution::UseBeforeDefine,
            None => match self.parent {
                Some(parent) => match get_scope(parent).resolve_variable(name, get_scope) {
                    VarResolution::Found(mut lookup) => {
                        lookup.scope_distance += 1;
                        VarResolution::Found(lookup)
                    }
                    other => other,
                },
                None => VarResolution::Unknown,
            },
        }
    }

    /// Module-qualified variable lookup: resolve `path` to a module scope
    /// in this scope or an ancestor, then look the tail name up
    /// non-recursively in the target scope.
    pub fn resolve_qualified_variable(
        &self,
        path: &[String],
        name: &str,
        get_scope: GetNameScope<'_>,
    ) -> VarResolution {
        if let Some(target) = self.modules.get(path) {
            return match get_scope(*target).variables.get(name) {
                Some((decl, true)) => VarResolution::Found(VarLookup {
                    scope_distance: 0,
                    declaration_node: *decl,
                }),
                Some((_, false)) => VarResolution::UseBeforeDefine,
                None => VarResolution::Unknown,
            };
        }
        match self.parent {
            Some(parent) => {
                match get_scope(parent).resolve_qualified_variable(path, name, get_scope) {
                    VarResolution::Found(mut lookup) => {
                        lookup.scope_distance += 1;
                        VarResolution::Found(lookup)
                    }
                    other => other,
                }
            }
            None => VarResolution::Unknown,
        }
    }

    pub fn resolve_type(
        &self,
        name: &str,
        get_scope: GetNameScope<'_>,
    ) -> Option<TypeLookup> {
        if let Some(decl) = self.types.get(name) {
            return Some(TypeLookup {
                scope_distance: 0,
                declaration_node: *decl,
            });
        }
        let parent = self.parent?;
        let mut lookup = get_scope(parent).resolve_type(name, get_scope)?;
        lookup.scope_distance += 1;
        Some(lookup)
    }

    pub fn resolve_qualified_type(
        &self,
        path: &[String],
        name: &str,
        get_scope: GetNameScope<'_>,
    ) -> Option<TypeLookup> {
        if let Some(target) = self.modules.get(path) {
            return get_scope(*target).types.get(name).map(|decl| TypeLookup {
                scope_distance: 0,
                declaration_node: *decl,
            });
        }
        let parent = self.parent?;
        let mut lookup = get_scope(parent).resolve_qualified_type(path, name, get_scope)?;
        lookup.scope_distance += 1;
        Some(lookup)
    }

    /// Inserts every variable, type, and module of `other` into this
    /// scope, returning the simple names that collided. Whether a
    /// collision is an error is the caller's decision.
    pub fn merge(&mut self, other: &NameScope) -> Vec<String> {
        let mut collisions = Vec::new();
        for (name, entry) in &other.variables {
            if self.variables.contains_key(name) {
                collisions.push(name.clone());
            } else {
                self.variables.insert(name.clone(), *entry);
            }
        }
        for (name, decl) in &other.types {
            if self.types.contains_key(name) {
                collisions.push(name.clone());
            } else {
                self.types.insert(name.clone(), *decl);
            }
        }
        for (path, scope) in &other.modules {
            self.modules.insert(path.clone(), *scope);
        }
        collisions
    }
}

/// A scope in the type environment: the elaborated type of each term
/// binding, named type definitions, and module bindings.
#[derive(Clone, Debug, Default)]
pub struct TypeScope {
    variables: HashMap<String, Type>,
    types: HashMap<String, Type>,
    modules: HashMap<Vec<String>, ScopeId>,
    parent: Option<ScopeId>,
}

impl TypeScope {
    pub fn set_parent(&mut self, parent: ScopeId) {
        self.parent = Some(parent);
    }

    pub fn parent(&self) -> Option<ScopeId> {
        self.parent
    }

    pub fn depth(&self, get_scope: GetTypeScope<'_>) -> u32 {
        match self.parent {
            Some(parent) => 1 + get_scope(parent).depth(get_scope),
            None => 0,
        }
    }

    /// Binds the type of a term-level name. Later bindings overwrite, so
    /// re-running the checker over the same arena is harmless.
    pub fn set_type(&mut self, name: &str, ty: Type) {
        self.variables.insert(name.to_string(), ty);
    }

    /// Binds a named type definition.
    pub fn define_type(&mut self, name: &str, ty: Type) {
        self.types.insert(name.to_string(), ty);
    }

    pub fn add_module(&mut self, path: Vec<String>, scope: ScopeId) {
        self.modules.insert(path, scope);
    }

    pub fn module(&self, path: &[String]) -> Option<ScopeId> {
        self.modules.get(path).copied()
    }

    /// The type of a term binding, with the scope distance of the hit.
    pub fn type_of(
        &self,
        name: &str,
        get_scope: GetTypeScope<'_>,
    ) -> Option<(u32, Type)> {
        if let Some(ty) = self.variables.get(name) {
            return Some((0, ty.clone()));
        }
        let parent = self.parent?;
        let (distance, ty) = get_scope(parent).type_of(name, get_scope)?;
        Some((distance + 1, ty))
    }

    pub fn qualified_type_of(
        &self,
        path: &[String],
        name: &str,
        get_scope: GetTypeScope<'_>,
    ) -> Option<(u32, Type)> {
        if let Some(target) = self.modules.get(path) {
            return get_scope(*target).variables.get(name).map(|ty| (0, ty.clone()));
        }
        let parent = self.parent?;
        let (distance, ty) = get_scope(parent).qualified_type_of(path, name, get_scope)?;
        Some((distance + 1, ty))
    }

    pub fn resolve_type(
        &self,
        name: &str,
        get_scope: GetTypeScope<'_>,
    ) -> Option<Type> {
        if let Some(ty) = self.types.get(name) {
            return Some(ty.clone());
        }
        get_scope(self.parent?).resolve_type(name, get_scope)
    }

    pub fn resolve_qualified_type(
        &self,
        path: &[String],
        name: &str,
        get_scope: GetTypeScope<'_>,
    ) -> Option<Type> {
        if let Some(target) = self.modules.get(path) {
            return get_scope(*target).types.get(name).cloned();
        }
        get_scope(self.parent?).resolve_qualified_type(path, name, get_scope)
    }

    pub fn merge(&mut self, other: &TypeScope) -> Vec<String> {
        let mut collisions = Vec::new();
        for (name, ty) in &other.variables {
            if self.variables.contains_key(name) {
                collisions.push(name.clone());
            } else {
                self.variables.insert(name.clone(), ty.clone());
            }
        }
        for (name, ty) in &other.types {
            if self.types.contains_key(name) {
                collisions.push(name.clone());
            } else {
                self.types.insert(name.clone(), ty.clone());
            }
        }
        for (path, scope) in &other.modules {
            self.modules.insert(path.clone(), *scope);
        }
        collisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aster_core::types::IntKind;

    #[test]
    fn lookup_counts_parent_hops() {
        let mut store: Vec<NameScope> = Vec::new();
        store.push(NameScope::default()); // 0: root
        let mut mid = NameScope::default();
        mid.set_parent(ScopeId(0));
        store.push(mid); // 1
        let mut leaf = NameScope::default();
        leaf.set_parent(ScopeId(1));
        store.push(leaf); // 2

        store[0].declare_variable("x", NodeId(7)).unwrap();
        store[0].define_variable("x").unwrap();

        let get = |id: ScopeId| &store[id.0 as usize];
        let lookup = store[2].resolve_variable("x", &get).found().unwrap();
        assert_eq!(lookup.scope_distance, 2);
        assert_eq!(lookup.declaration_node, NodeId(7));
        assert_eq!(store[2].depth(&get), 2);
    }

    #[test]
    fn declared_but_undefined_does_not_fall_through() {
        let mut store: Vec<NameScope> = Vec::new();
        store.push(NameScope::default());
        let mut inner = NameScope::default();
        inner.set_parent(ScopeId(0));
        store.push(inner);

        store[0].declare_variable("x", NodeId(1)).unwrap();
        store[0].define_variable("x").unwrap();
        // Shadowing declaration, not yet defined.
        store[1].declare_variable("x", NodeId(2)).unwrap();

        {
            let get = |id: ScopeId| &store[id.0 as usize];
            assert_eq!(
                store[1].resolve_variable("x", &get),
                VarResolution::UseBeforeDefine
            );
        }

        store[1].define_variable("x").unwrap();
        let get = |id: ScopeId| &store[id.0 as usize];
        let lookup = store[1].resolve_variable("x", &get).found().unwrap();
        assert_eq!(lookup.scope_distance, 0);
        assert_eq!(lookup.declaration_node, NodeId(2));
    }

    #[test]
    fn duplicate_declaration_in_scope_fails() {
        let mut scope = NameScope::default();
        scope.declare_variable("x", NodeId(1)).unwrap();
        // Same declaration node again: tolerated for re-runs.
        scope.declare_variable("x", NodeId(1)).unwrap();
        assert!(scope.declare_variable("x", NodeId(2)).is_err());
    }

    #[test]
    fn qualified_lookup_is_non_recursive_in_target() {
        let mut store: Vec<NameScope> = Vec::new();
        store.push(NameScope::default()); // 0: root
        let mut module = NameScope::default();
        // The module scope has the root as parent, but qualified lookup
        // must not ascend out of it.
        module.set_parent(ScopeId(0));
        module.declare_variable("println", NodeId(3)).unwrap();
        module.define_variable("println").unwrap();
        store.push(module); // 1

        store[0].declare_variable("stray", NodeId(9)).unwrap();
        store[0].define_variable("stray").unwrap();
        let path = vec!["std".to_string(), "io".to_string()];
        store[0].add_module(path.clone(), ScopeId(1));

        let get = |id: ScopeId| &store[id.0 as usize];
        let hit = store[0]
            .resolve_qualified_variable(&path, "println", &get)
            .found()
            .unwrap();
        assert_eq!(hit.declaration_node, NodeId(3));
        assert_eq!(
            store[0].resolve_qualified_variable(&path, "stray", &get),
            VarResolution::Unknown
        );
    }

    #[test]
    fn merge_reports_collisions() {
        let mut a = TypeScope::default();
        a.set_type("x", Type::Int(IntKind::I32));
        let mut b = TypeScope::default();
        b.set_type("x", Type::Str);
        b.set_type("y", Type::Bool);

        let collisions = a.merge(&b);
        assert_eq!(collisions, vec!["x".to_string()]);
        // The receiver's binding wins; merge only inserts.
        let get = |_: ScopeId| -> &TypeScope { unreachable!() };
        assert_eq!(a.type_of("x", &get).unwrap().1, Type::Int(IntKind::I32));
        assert_eq!(a.type_of("y", &get).unwrap().1, Type::Bool);
    }
}
