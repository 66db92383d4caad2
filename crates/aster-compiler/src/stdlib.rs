//! The standard prelude: loadable library modules and their installation
//! into a compilation's scope tree.
//!
//! `std` provides the primitive type aliases; `std.io` provides the two
//! native printing functions. Installation creates real scopes and
//! declaration nodes inside the target arena so resolution and type
//! checking treat prelude names exactly like user code.

use std::collections::BTreeMap;

use aster_core::types::{IntKind, Type};
use aster_core::NativeOp;

use crate::ast::{Ast, Identifier, NodeKind};

/// A native function provided by the VM.
#[derive(Clone, Debug)]
pub struct NativeDef {
    /// Module-local name, e.g. `println`.
    pub name: String,
    pub op: NativeOp,
    pub ty: Type,
}

/// A loadable library module.
#[derive(Clone, Debug)]
pub struct ModuleDef {
    pub path: Vec<String>,
    /// Named types the module exports.
    pub types: Vec<(String, Type)>,
    pub natives: Vec<NativeDef>,
}

impl ModuleDef {
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }
}

/// The set of library modules available to a compilation.
#[derive(Clone, Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<ModuleDef>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard prelude.
    pub fn with_std() -> Self {
        let mut registry = Self::new();
        registry.register(std_types());
        registry.register(std_io());
        registry
    }

    pub fn register(&mut self, def: ModuleDef) {
        self.modules.push(def);
    }

    pub fn get(&self, path: &[String]) -> Option<&ModuleDef> {
        self.modules.iter().find(|m| m.path == path)
    }

    pub fn modules(&self) -> &[ModuleDef] {
        &self.modules
    }

    /// Fully-qualified native name to VM op, for the bytecode generator.
    pub fn native_table(&self) -> BTreeMap<String, NativeOp> {
        let mut table = BTreeMap::new();
        for module in &self.modules {
            for native in &module.natives {
                table.insert(
                    format!("{}.{}", module.dotted_path(), native.name),
                    native.op,
                );
            }
        }
        table
    }

    /// All native functions as `(fully-qualified name, op, signature)`.
    pub fn native_functions(&self) -> Vec<(String, NativeOp, Type)> {
        let mut natives = Vec::new();
        for module in &self.modules {
            for native in &module.natives {
                natives.push((
                    format!("{}.{}", module.dotted_path(), native.name),
                    native.op,
                    native.ty.clone(),
                ));
            }
        }
        natives
    }
}

/// The `std` module: primitive type aliases.
pub fn std_types() -> ModuleDef {
    let ints = [
        ("i8", IntKind::I8),
        ("ui8", IntKind::Ui8),
        ("i16", IntKind::I16),
        ("ui16", IntKind::Ui16),
        ("i32", IntKind::I32),
        ("ui32", IntKind::Ui32),
        ("i64", IntKind::I64),
        ("ui64", IntKind::Ui64),
    ];
    let mut types: Vec<(String, Type)> = ints
        .iter()
        .map(|(name, kind)| (name.to_string(), Type::Int(*kind)))
        .collect();
    types.push(("str".to_string(), Type::Str));
    types.push(("bool".to_string(), Type::Bool));

    ModuleDef {
        path: vec!["std".to_string()],
        types,
        natives: Vec::new(),
    }
}

/// The `std.io` module: `print` and `println` over a `ui64` payload.
pub fn std_io() -> ModuleDef {
    let sig = Type::function(Type::Int(IntKind::Ui64), Type::Void);
    ModuleDef {
        path: vec!["std".to_string(), "io".to_string()],
        types: Vec::new(),
        natives: vec![
            NativeDef {
                name: "print".to_string(),
                op: NativeOp::Print,
                ty: sig.clone(),
            },
            NativeDef {
                name: "println".to_string(),
                op: NativeOp::Println,
                ty: sig,
            },
        ],
    }
}

/// Installs every registry module into the arena and makes the `std`
/// type aliases visible unqualified. Installing twice is a no-op.
pub fn install_prelude(ast: &mut Ast, registry: &ModuleRegistry) {
    let std_path = vec!["std".to_string()];
    let root = ast.root_id();
    let root_ns = ast.get_node(root).name_scope.expect("root has scopes");
    let installed = ast.get_name_scope(root_ns).module(&std_path).is_some();

    for def in registry.modules() {
        install_module(ast, def);
    }
    if installed {
        return;
    }

    // The primitive aliases resolve without qualification.
    if let Some(std) = registry.get(&std_path) {
        let root = ast.root_id();
        let root_ns = ast.get_node(root).name_scope.expect("root has scopes");
        let root_ts = ast.get_node(root).type_scope.expect("root has scopes");
        for (name, ty) in &std.types {
            let decl = make_type_decl_node(ast, name);
            // An existing user definition of the same simple name wins.
            let _ = ast.get_name_scope_mut(root_ns).define_type(name, decl);
            if ast.lookup_type(root_ts, name).is_none() {
                ast.get_type_scope_mut(root_ts).define_type(name, ty.clone());
            }
        }
    }
}

/// Installs one module: builds its scopes inside the arena and binds the
/// module path on the root scopes.
pub fn install_module(ast: &mut Ast, def: &ModuleDef) {
    let root = ast.root_id();
    let root_ns = ast.get_node(root).name_scope.expect("root has scopes");
    let root_ts = ast.get_node(root).type_scope.expect("root has scopes");

    if ast.get_name_scope(root_ns).module(&def.path).is_some() {
        return;
    }

    let module_ns = ast.create_name_scope(None);
    let module_ts = ast.create_type_scope(None);

    for (name, ty) in &def.types {
        let decl = make_type_decl_node(ast, name);
        let _ = ast.get_name_scope_mut(module_ns).define_type(name, decl);
        ast.get_type_scope_mut(module_ts).define_type(name, ty.clone());
    }

    for native in &def.natives {
        let fq = format!("{}.{}", def.dotted_path(), native.name);
        let decl = make_native_decl_node(ast, &fq);
        let scope = ast.get_name_scope_mut(module_ns);
        let _ = scope.declare_variable(&native.name, decl);
        let _ = scope.define_variable(&native.name);
        ast.get_type_scope_mut(module_ts)
            .set_type(&native.name, native.ty.clone());
    }

    ast.get_name_scope_mut(root_ns)
        .add_module(def.path.clone(), module_ns);
    ast.get_type_scope_mut(root_ts)
        .add_module(def.path.clone(), module_ts);
}

/// A synthetic declaration node standing in for a library type.
fn make_type_decl_node(ast: &mut Ast, name: &str) -> crate::ast::NodeId {
    let def = ast.create_node(NodeKind::TypeDefinition);
    let id = ast.create_node(NodeKind::Identifier);
    *ast.identifier_mut(id) = Identifier::from_dotted(name);
    ast.add_child(def, id);
    def
}

/// A synthetic declaration node standing in for a native function. Its
/// identifier carries the fully-qualified name the generator targets.
fn make_native_decl_node(ast: &mut Ast, fq_name: &str) -> crate::ast::NodeId {
    let decl = ast.create_node(NodeKind::Declaration);
    let id = ast.create_node(NodeKind::Identifier);
    *ast.identifier_mut(id) = Identifier::from_dotted(fq_name);
    ast.add_child(decl, id);
    decl
}
