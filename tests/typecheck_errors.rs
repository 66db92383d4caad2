//! Error paths: type mismatches, bad tests, arity errors, and
//! use-before-define, each surfacing one message and no bytecode.

mod common;

use aster::{CompileError, NodeKind, Pipeline};
use common::*;

fn expect_type_error(ast: &mut aster::Ast) -> String {
    match Pipeline::new().process(ast).unwrap_err() {
        CompileError::Type(e) => e.message,
        other => panic!("expected a typecheck error, got {other}"),
    }
}

fn expect_resolve_error(ast: &mut aster::Ast) -> String {
    match Pipeline::new().process(ast).unwrap_err() {
        CompileError::Resolve(e) => e.message,
        other => panic!("expected a resolution error, got {other}"),
    }
}

#[test]
fn annotated_assignment_mismatch_names_both_types() {
    // var x: i32 = "hello";
    let mut ast = new_unit();
    let ty = type_atom(&mut ast, "i32");
    let hello = string_lit(&mut ast, "hello");
    let stmt = assign_typed(&mut ast, "x", ty, hello);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("std.i32"), "message: {message}");
    assert!(message.contains("std.str"), "message: {message}");
}

#[test]
fn if_test_must_be_boolean() {
    let mut ast = new_unit();
    let test = number(&mut ast, 1);
    let one = number(&mut ast, 1);
    let then = value_block(&mut ast, one);
    let two = number(&mut ast, 2);
    let otherwise = value_block(&mut ast, two);
    let if_node = if_else(&mut ast, test, then, otherwise);
    let stmt = assign(&mut ast, "x", if_node);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("boolean"), "message: {message}");
}

#[test]
fn branches_must_share_a_type() {
    let mut ast = new_unit();
    let test = boolean(&mut ast, true);
    let one = number(&mut ast, 1);
    let then = value_block(&mut ast, one);
    let hello = string_lit(&mut ast, "two");
    let otherwise = value_block(&mut ast, hello);
    let if_node = if_else(&mut ast, test, then, otherwise);
    let stmt = assign(&mut ast, "x", if_node);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("share one type"), "message: {message}");
}

#[test]
fn call_arity_mismatch_is_rejected() {
    // fn add(a: i32, b: i32) -> i32 { a + b }; var z = add(3);
    let mut ast = new_unit();
    let a = ident(&mut ast, "a");
    let b = ident(&mut ast, "b");
    let sum = binary(&mut ast, NodeKind::Addition, a, b);
    let body = value_block(&mut ast, sum);
    let add = function(&mut ast, "add", &[("a", "i32"), ("b", "i32")], "i32", body);

    let three = number(&mut ast, 3);
    let call_node = call(&mut ast, "add", &[three]);
    let stmt = assign(&mut ast, "z", call_node);
    attach(&mut ast, &[add, stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("does not match parameters"), "message: {message}");
}

#[test]
fn calling_a_non_function_fails() {
    // var x = 1; var y = x(2);
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let first = assign(&mut ast, "x", one);
    let two = number(&mut ast, 2);
    let call_node = call(&mut ast, "x", &[two]);
    let second = assign(&mut ast, "y", call_node);
    attach(&mut ast, &[first, second]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("cannot be called"), "message: {message}");
}

#[test]
fn operands_must_share_an_integer_primitive() {
    // var x = 1 + true;
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let t = boolean(&mut ast, true);
    let sum = binary(&mut ast, NodeKind::Addition, one, t);
    let stmt = assign(&mut ast, "x", sum);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("integer"), "message: {message}");
}

#[test]
fn array_elements_must_agree() {
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let hello = string_lit(&mut ast, "x");
    let array = with_children(&mut ast, NodeKind::ArrayValue, &[one, hello]);
    let stmt = assign(&mut ast, "a", array);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("array"), "message: {message}");
}

#[test]
fn while_test_must_be_boolean() {
    let mut ast = new_unit();
    let test = number(&mut ast, 1);
    let body = block(&mut ast, &[]);
    let loop_node = while_loop(&mut ast, test, body);
    attach(&mut ast, &[loop_node]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("while test"), "message: {message}");
}

#[test]
fn undeclared_name_is_a_resolution_error() {
    let mut ast = new_unit();
    let ghost = ident(&mut ast, "ghost");
    let stmt = assign(&mut ast, "x", ghost);
    attach(&mut ast, &[stmt]);

    let message = expect_resolve_error(&mut ast);
    assert!(message.contains("cannot resolve name `ghost`"), "message: {message}");
}

#[test]
fn initializer_may_not_reference_its_own_binding() {
    // var x = x + 1; must fail even though nothing shadows x.
    let mut ast = new_unit();
    let x_use = ident(&mut ast, "x");
    let one = number(&mut ast, 1);
    let sum = binary(&mut ast, NodeKind::Addition, x_use, one);
    let stmt = assign(&mut ast, "x", sum);
    attach(&mut ast, &[stmt]);

    let message = expect_resolve_error(&mut ast);
    assert!(message.contains("before its definition"), "message: {message}");
}

#[test]
fn shadowing_initializer_still_fails() {
    // var x = 1; { var x = x + 1; } the inner use must not escape to the
    // outer binding.
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let outer = assign(&mut ast, "x", one);

    let x_use = ident(&mut ast, "x");
    let one_again = number(&mut ast, 1);
    let sum = binary(&mut ast, NodeKind::Addition, x_use, one_again);
    let inner = assign(&mut ast, "x", sum);
    let inner_block = block(&mut ast, &[inner]);
    attach(&mut ast, &[outer, inner_block]);

    let message = expect_resolve_error(&mut ast);
    assert!(message.contains("before its definition"), "message: {message}");
}

#[test]
fn duplicate_declaration_in_one_scope_fails() {
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let first = assign(&mut ast, "x", one);
    let two = number(&mut ast, 2);
    let second = assign(&mut ast, "x", two);
    attach(&mut ast, &[first, second]);

    let message = expect_resolve_error(&mut ast);
    assert!(message.contains("already declared"), "message: {message}");
}

#[test]
fn function_body_must_match_return_type() {
    // fn wrong() -> i32 { true }
    let mut ast = new_unit();
    let t = boolean(&mut ast, true);
    let body = value_block(&mut ast, t);
    let name_node = ident(&mut ast, "wrong");
    let from = tuple(&mut ast, &[]);
    let to = type_atom(&mut ast, "i32");
    let func = with_children(&mut ast, NodeKind::Function, &[name_node, from, to, body]);
    attach(&mut ast, &[func]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("return type"), "message: {message}");
}

#[test]
fn unknown_type_name_fails() {
    let mut ast = new_unit();
    let ty = type_atom(&mut ast, "Ghost");
    let one = number(&mut ast, 1);
    let stmt = assign_typed(&mut ast, "x", ty, one);
    attach(&mut ast, &[stmt]);

    let message = expect_type_error(&mut ast);
    assert!(message.contains("unknown type `Ghost`"), "message: {message}");
}
