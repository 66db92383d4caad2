#![forbid(unsafe_code)]

//! Aster: a compiler middle-end and backend for a small statically-typed
//! expression language, targeting a stack-register virtual machine.
//!
//! The pipeline runs over an extended AST delivered by the parser (an
//! external collaborator):
//!
//! ```text
//! extended AST -> resolve -> typecheck -> lower -> generate -> optimize -> link
//! ```
//!
//! [`Pipeline`] chains the passes; each is also callable on its own. Any
//! pass error aborts the compilation and surfaces as one
//! [`CompileError`].

use std::fmt;

pub use aster_bytecode::{
    disassemble, ByteFunction, Chunk, Executable, FarLbl, GenError, LinkError, OpKind, OptError,
    OptLevel, Program,
};
pub use aster_compiler::{
    Ast, Identifier, LowerError, ModuleRegistry, NodeId, NodeKind, ResolveError, TypeError,
};
pub use aster_core::types::{IntKind, Type};
pub use aster_core::Module;

/// Any pass failure, labelled by its stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompileError {
    Resolve(ResolveError),
    Type(TypeError),
    Lower(LowerError),
    Gen(GenError),
    Opt(OptError),
    Link(LinkError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Resolve(e) => write!(f, "{e}"),
            CompileError::Type(e) => write!(f, "{e}"),
            CompileError::Lower(e) => write!(f, "{e}"),
            CompileError::Gen(e) => write!(f, "{e}"),
            CompileError::Opt(e) => write!(f, "{e}"),
            CompileError::Link(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<ResolveError> for CompileError {
    fn from(e: ResolveError) -> Self {
        CompileError::Resolve(e)
    }
}

impl From<TypeError> for CompileError {
    fn from(e: TypeError) -> Self {
        CompileError::Type(e)
    }
}

impl From<LowerError> for CompileError {
    fn from(e: LowerError) -> Self {
        CompileError::Lower(e)
    }
}

impl From<GenError> for CompileError {
    fn from(e: GenError) -> Self {
        CompileError::Gen(e)
    }
}

impl From<OptError> for CompileError {
    fn from(e: OptError) -> Self {
        CompileError::Opt(e)
    }
}

impl From<LinkError> for CompileError {
    fn from(e: LinkError) -> Self {
        CompileError::Link(e)
    }
}

/// The pass driver: owns the module registry and the optimization
/// settings.
#[derive(Clone, Debug)]
pub struct Pipeline {
    registry: ModuleRegistry,
    opt_level: OptLevel,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// A pipeline with the standard prelude registered.
    pub fn new() -> Pipeline {
        Pipeline {
            registry: ModuleRegistry::with_std(),
            opt_level: OptLevel::default(),
        }
    }

    pub fn with_registry(registry: ModuleRegistry) -> Pipeline {
        Pipeline {
            registry,
            opt_level: OptLevel::default(),
        }
    }

    pub fn opt_level(mut self, level: OptLevel) -> Pipeline {
        self.opt_level = level;
        self
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Installs library modules, resolves names, and typechecks, all in
    /// place on the arena.
    pub fn typecheck(&self, ast: &mut Ast) -> Result<(), CompileError> {
        self.prepare(ast)?;
        aster_compiler::resolve(ast)?;
        aster_compiler::typecheck(ast)?;
        Ok(())
    }

    /// Lowers a typechecked arena into a core module.
    pub fn lower(&self, ast: &Ast) -> Result<Module, CompileError> {
        Ok(aster_compiler::lower(ast)?)
    }

    /// Generates an unlinked program from a core module.
    pub fn generate(&self, module: &Module) -> Result<Program, CompileError> {
        Ok(aster_bytecode::generate(
            module,
            &self.registry.native_functions(),
        )?)
    }

    /// Runs the settings-driven optimization pass over a program.
    pub fn optimize(&self, program: &mut Program) -> Result<(), CompileError> {
        Ok(aster_bytecode::optimize_program(program, self.opt_level)?)
    }

    pub fn link(&self, program: Program) -> Result<Executable, CompileError> {
        Ok(aster_bytecode::link(program)?)
    }

    /// The whole pipeline: typecheck through link.
    pub fn process(&self, ast: &mut Ast) -> Result<Executable, CompileError> {
        self.typecheck(ast)?;
        let module = self.lower(ast)?;
        let mut program = self.generate(&module)?;
        self.optimize(&mut program)?;
        self.link(program)
    }

    /// Renders the textual bytecode dump.
    pub fn print_bytecode(&self, executable: &Executable) -> String {
        disassemble(executable)
    }

    fn prepare(&self, ast: &mut Ast) -> Result<(), CompileError> {
        aster_compiler::install_prelude(ast, &self.registry);
        for import in ast.imports() {
            if self.registry.get(&import).is_none() {
                return Err(CompileError::Resolve(ResolveError {
                    message: format!("import of unknown module `{}`", import.join(".")),
                }));
            }
        }
        Ok(())
    }
}

/// Serialization failure for the core-module byte form.
#[cfg(feature = "serde")]
#[derive(Debug)]
pub struct SaveError(bitcode::Error);

#[cfg(feature = "serde")]
impl fmt::Display for SaveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to save module: {}", self.0)
    }
}

#[cfg(feature = "serde")]
impl std::error::Error for SaveError {}

/// Serializes a core module for a build cache or debugging snapshot.
#[cfg(feature = "serde")]
pub fn to_bytes(module: &Module) -> Result<Vec<u8>, SaveError> {
    bitcode::serialize(module).map_err(SaveError)
}

#[cfg(feature = "serde")]
pub fn from_bytes(bytes: &[u8]) -> Result<Module, SaveError> {
    bitcode::deserialize(bytes).map_err(SaveError)
}
