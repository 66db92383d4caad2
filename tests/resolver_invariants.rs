//! Structural invariants over the annotated arena: access patterns point
//! at real declarations, lookups agree with manual parent walks, and
//! re-running the passes reproduces identical annotations.

mod common;

use aster::{NodeId, NodeKind, Pipeline, Type};
use common::*;

/// A program with nesting, functions, and shadowing-free reuse.
fn sample_unit() -> aster::Ast {
    let mut ast = new_unit();

    let a = ident(&mut ast, "a");
    let b = ident(&mut ast, "b");
    let sum = binary(&mut ast, NodeKind::Addition, a, b);
    let body = value_block(&mut ast, sum);
    let add = function(&mut ast, "add", &[("a", "i32"), ("b", "i32")], "i32", body);

    let three = number(&mut ast, 3);
    let four = number(&mut ast, 4);
    let call_node = call(&mut ast, "add", &[three, four]);
    let stmt = assign(&mut ast, "z", call_node);

    let z1 = ident(&mut ast, "z");
    let zero = number(&mut ast, 0);
    let test = binary(&mut ast, NodeKind::GreaterThan, z1, zero);
    let z2 = ident(&mut ast, "z");
    let one = number(&mut ast, 1);
    let diff = binary(&mut ast, NodeKind::Subtraction, z2, one);
    let inner = assign(&mut ast, "w", diff);
    let loop_body = block(&mut ast, &[inner]);
    let loop_node = while_loop(&mut ast, test, loop_body);

    attach(&mut ast, &[add, stmt, loop_node]);
    ast
}

#[test]
fn every_use_points_at_a_declaring_node() {
    let mut ast = sample_unit();
    Pipeline::new().typecheck(&mut ast).unwrap();

    let mut uses = 0;
    for index in 0..ast.node_count() as u32 {
        let node = ast.get_node(NodeId(index));
        if node.kind != NodeKind::Identifier {
            continue;
        }
        let ident = ast.identifier(NodeId(index));
        let Some(_distance) = ident.scope_distance else {
            continue;
        };
        uses += 1;

        // Walking the annotated scope must reach a declaring node.
        let ns = node.name_scope.expect("annotated use");
        if let Some(lookup) = ast.resolve_variable(ns, ident.head()).found() {
            assert!(ast.contains(lookup.declaration_node));
            assert!(
                ast.get_node(lookup.declaration_node).kind.is_declaring(),
                "declaration of `{}` has kind {:?}",
                ident.head(),
                ast.get_node(lookup.declaration_node).kind
            );
            assert_eq!(lookup.scope_distance, ident.scope_distance.unwrap());
        }
    }
    assert!(uses >= 4, "expected several resolved uses, saw {uses}");
}

#[test]
fn every_expression_node_is_typed() {
    let mut ast = sample_unit();
    Pipeline::new().typecheck(&mut ast).unwrap();

    for index in 0..ast.node_count() as u32 {
        let node = ast.get_node(NodeId(index));
        let expression = matches!(
            node.kind,
            NodeKind::Number
                | NodeKind::Boolean
                | NodeKind::String
                | NodeKind::FunctionCall
                | NodeKind::Tuple
                | NodeKind::ArrayValue
        ) || node.kind.is_binary_op();
        if !expression {
            continue;
        }
        // Synthetic prelude nodes are never visited by the checker.
        let Some(ty) = &node.ty else {
            assert!(node.name_scope.is_none(), "unannotated visited node");
            continue;
        };
        assert_ne!(*ty, Type::Unset, "expression left unset: {:?}", node.kind);
    }
}

#[test]
fn scope_distance_equals_manual_parent_walk() {
    let mut ast = sample_unit();
    Pipeline::new().typecheck(&mut ast).unwrap();

    for index in 0..ast.node_count() as u32 {
        let node = ast.get_node(NodeId(index));
        if node.kind != NodeKind::Identifier {
            continue;
        }
        let ident = ast.identifier(NodeId(index)).clone();
        let (Some(ns), Some(distance)) = (node.name_scope, ident.scope_distance) else {
            continue;
        };
        if ident.segments.len() > 1 {
            continue;
        }
        let Some(lookup) = ast.resolve_variable(ns, ident.head()).found() else {
            continue;
        };

        // Ascend exactly `distance` parent links, then look up without
        // recursing.
        let mut scope = ns;
        for _ in 0..distance {
            scope = ast.get_name_scope(scope).parent().expect("parent link");
        }
        let local = ast.resolve_variable(scope, ident.head()).found().unwrap();
        assert_eq!(local.scope_distance, 0);
        assert_eq!(local.declaration_node, lookup.declaration_node);
    }
}

#[test]
fn passes_are_idempotent_over_one_arena() {
    let mut ast = sample_unit();
    let pipeline = Pipeline::new();
    pipeline.typecheck(&mut ast).unwrap();

    let snapshot: Vec<_> = (0..ast.node_count() as u32)
        .map(|index| {
            let node = ast.get_node(NodeId(index));
            let ident = (node.kind == NodeKind::Identifier)
                .then(|| ast.identifier(NodeId(index)).clone());
            (
                node.kind,
                node.ty.clone(),
                node.name_scope,
                node.type_scope,
                ident,
            )
        })
        .collect();

    // A second run over the same arena must reproduce identical
    // annotations.
    pipeline.typecheck(&mut ast).unwrap();

    for (index, before) in snapshot.iter().enumerate() {
        let node = ast.get_node(NodeId(index as u32));
        let ident = (node.kind == NodeKind::Identifier)
            .then(|| ast.identifier(NodeId(index as u32)).clone());
        assert_eq!(
            (
                node.kind,
                node.ty.clone(),
                node.name_scope,
                node.type_scope,
                ident,
            ),
            *before,
            "node {index} changed between runs"
        );
    }
}
