//! Shared helpers for the pipeline tests: programmatic extended-AST
//! construction (standing in for the external parser) and bytecode
//! inspection utilities.
#![allow(dead_code)]

use aster::{Ast, ByteFunction, Chunk, Executable, Identifier, NodeId, NodeKind, OpKind, Pipeline};

pub fn new_unit() -> Ast {
    Ast::new(NodeKind::Block)
}

pub fn ident(ast: &mut Ast, name: &str) -> NodeId {
    let node = ast.create_node(NodeKind::Identifier);
    *ast.identifier_mut(node) = Identifier::from_dotted(name);
    node
}

pub fn number(ast: &mut Ast, value: i64) -> NodeId {
    let node = ast.create_node(NodeKind::Number);
    ast.number_mut(node).value = value;
    node
}

pub fn boolean(ast: &mut Ast, value: bool) -> NodeId {
    let node = ast.create_node(NodeKind::Boolean);
    ast.boolean_mut(node).0 = value;
    node
}

pub fn string_lit(ast: &mut Ast, value: &str) -> NodeId {
    let node = ast.create_node(NodeKind::String);
    ast.string_mut(node).0 = value.to_string();
    node
}

pub fn with_children(ast: &mut Ast, kind: NodeKind, children: &[NodeId]) -> NodeId {
    let node = ast.create_node(kind);
    for &child in children {
        ast.add_child(node, child);
    }
    node
}

pub fn binary(ast: &mut Ast, kind: NodeKind, lhs: NodeId, rhs: NodeId) -> NodeId {
    with_children(ast, kind, &[lhs, rhs])
}

pub fn tuple(ast: &mut Ast, items: &[NodeId]) -> NodeId {
    with_children(ast, NodeKind::Tuple, items)
}

pub fn block(ast: &mut Ast, children: &[NodeId]) -> NodeId {
    with_children(ast, NodeKind::Block, children)
}

pub fn block_result(ast: &mut Ast, expr: NodeId) -> NodeId {
    with_children(ast, NodeKind::BlockResult, &[expr])
}

/// A block whose value is `expr`.
pub fn value_block(ast: &mut Ast, expr: NodeId) -> NodeId {
    let result = block_result(ast, expr);
    block(ast, &[result])
}

pub fn type_atom(ast: &mut Ast, name: &str) -> NodeId {
    let id = ident(ast, name);
    with_children(ast, NodeKind::TypeAtom, &[id])
}

pub fn declaration(ast: &mut Ast, name: &str, ty: NodeId) -> NodeId {
    let id = ident(ast, name);
    with_children(ast, NodeKind::Declaration, &[id, ty])
}

/// `var <name> = <rhs>;`
pub fn assign(ast: &mut Ast, name: &str, rhs: NodeId) -> NodeId {
    let id = ident(ast, name);
    with_children(ast, NodeKind::Assignment, &[id, rhs])
}

/// `var <name>: <ty> = <rhs>;`
pub fn assign_typed(ast: &mut Ast, name: &str, ty: NodeId, rhs: NodeId) -> NodeId {
    let id = ident(ast, name);
    with_children(ast, NodeKind::Assignment, &[id, ty, rhs])
}

/// `fn <name>(<params>) -> <ret> { body }` with `i32`-style named types.
pub fn function(
    ast: &mut Ast,
    name: &str,
    params: &[(&str, &str)],
    ret: &str,
    body: NodeId,
) -> NodeId {
    let name_node = ident(ast, name);
    let decls: Vec<NodeId> = params
        .iter()
        .map(|(param, ty)| {
            let ty = type_atom(ast, ty);
            declaration(ast, param, ty)
        })
        .collect();
    let from = tuple(ast, &decls);
    let to = type_atom(ast, ret);
    with_children(ast, NodeKind::Function, &[name_node, from, to, body])
}

pub fn call(ast: &mut Ast, callee: &str, args: &[NodeId]) -> NodeId {
    let callee = ident(ast, callee);
    let args = tuple(ast, args);
    with_children(ast, NodeKind::FunctionCall, &[callee, args])
}

/// `if (test) { then } else { otherwise }`.
pub fn if_else(ast: &mut Ast, test: NodeId, then: NodeId, otherwise: NodeId) -> NodeId {
    with_children(ast, NodeKind::IfStatement, &[test, then, otherwise])
}

pub fn while_loop(ast: &mut Ast, test: NodeId, body: NodeId) -> NodeId {
    with_children(ast, NodeKind::WhileLoop, &[test, body])
}

pub fn import(ast: &mut Ast, path: &str) -> NodeId {
    let id = ident(ast, path);
    with_children(ast, NodeKind::ImportDeclaration, &[id])
}

/// Appends statements to the compilation unit's root block.
pub fn attach(ast: &mut Ast, children: &[NodeId]) {
    let root = ast.root_id();
    for &child in children {
        ast.add_child(root, child);
    }
}

pub fn compile(ast: &mut Ast) -> Executable {
    Pipeline::new().process(ast).expect("pipeline")
}

/// The bytecode chunk with the given name.
pub fn chunk<'a>(exe: &'a Executable, name: &str) -> &'a ByteFunction {
    match exe.chunk(name) {
        Some(Chunk::Bytes(func)) => func,
        other => panic!("no bytecode chunk `{name}`: {other:?}"),
    }
}

pub fn chunk_index(exe: &Executable, name: &str) -> u32 {
    exe.chunks
        .iter()
        .position(|c| c.name() == name)
        .unwrap_or_else(|| panic!("no chunk `{name}`")) as u32
}

/// Decodes `(op, ip)` pairs for a chunk's code.
pub fn ops(code: &[u8]) -> Vec<(OpKind, usize)> {
    let mut out = Vec::new();
    let mut ip = 0;
    while ip < code.len() {
        let op = OpKind::from_byte(code[ip])
            .unwrap_or_else(|| panic!("invalid opcode 0x{:02x} at {ip}", code[ip]));
        out.push((op, ip));
        ip += op.size();
    }
    out
}

pub fn count_ops(code: &[u8], kind: OpKind) -> usize {
    ops(code).iter().filter(|(op, _)| *op == kind).count()
}

pub fn find_op(code: &[u8], kind: OpKind) -> Option<usize> {
    ops(code)
        .into_iter()
        .find(|(op, _)| *op == kind)
        .map(|(_, ip)| ip)
}
