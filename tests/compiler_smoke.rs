//! End-to-end pipeline scenarios: arithmetic, branching, functions, and
//! self-recursion, checked down to the emitted instructions.

mod common;

use aster::{FarLbl, IntKind, NodeKind, OpKind, Pipeline, Type};
use common::*;

fn read_i32_at(code: &[u8], at: usize) -> i32 {
    aster_bytecode::read_i32(code, at).expect("operand in range")
}

#[test]
fn arithmetic_assignment() {
    // var x = 1 + 2;
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let two = number(&mut ast, 2);
    let sum = binary(&mut ast, NodeKind::Addition, one, two);
    let stmt = assign(&mut ast, "x", sum);
    attach(&mut ast, &[stmt]);

    let pipeline = Pipeline::new();
    pipeline.typecheck(&mut ast).unwrap();

    // x is bound to std.i32.
    let x_node = ast.get_node(stmt).children[0];
    assert_eq!(ast.get_node(x_node).ty, Some(Type::Int(IntKind::I32)));
    assert_eq!(ast.get_node(sum).ty, Some(Type::Int(IntKind::I32)));

    let module = pipeline.lower(&ast).unwrap();
    let mut program = pipeline.generate(&module).unwrap();
    pipeline.optimize(&mut program).unwrap();
    let exe = pipeline.link(program).unwrap();

    let main = chunk(&exe, "main");
    let kinds: Vec<OpKind> = ops(&main.code).iter().map(|(op, _)| *op).collect();
    assert_eq!(
        &kinds[..4],
        &[
            OpKind::MvRegUi32,
            OpKind::MvRegUi32,
            OpKind::AddRegRegReg,
            OpKind::Mv32RegReg,
        ]
    );
    // MV_REG_UI32 r0,1; MV_REG_UI32 r1,2; ADD r2,r0,r1; the store reads r2.
    assert_eq!(main.code[1], 0);
    assert_eq!(main.code[7], 1);
    assert_eq!(&main.code[13..16], &[2, 0, 1]);
    assert_eq!(main.code[18], 2);
}

#[test]
fn if_expression_branches_once() {
    // var y = if (true) { 1 } else { 2 };
    let mut ast = new_unit();
    let test = boolean(&mut ast, true);
    let one = number(&mut ast, 1);
    let then = value_block(&mut ast, one);
    let two = number(&mut ast, 2);
    let otherwise = value_block(&mut ast, two);
    let if_node = if_else(&mut ast, test, then, otherwise);
    let stmt = assign(&mut ast, "y", if_node);
    attach(&mut ast, &[stmt]);

    let pipeline = Pipeline::new();
    pipeline.typecheck(&mut ast).unwrap();
    let y_node = ast.get_node(stmt).children[0];
    assert_eq!(ast.get_node(y_node).ty, Some(Type::Int(IntKind::I32)));

    let module = pipeline.lower(&ast).unwrap();
    let mut program = pipeline.generate(&module).unwrap();
    pipeline.optimize(&mut program).unwrap();
    let exe = pipeline.link(program).unwrap();

    let main = chunk(&exe, "main");
    assert_eq!(count_ops(&main.code, OpKind::JrzRegI32), 1);

    // The conditional jump lands exactly at the start of the else arm:
    // the erased label that precedes the load of 2.
    let jrz_ip = find_op(&main.code, OpKind::JrzRegI32).unwrap();
    let offset = read_i32_at(&main.code, jrz_ip + 2);
    let target = (jrz_ip as i32 + offset) as usize;
    let all = ops(&main.code);
    assert!(all.iter().any(|(_, ip)| *ip == target), "target on boundary");
    let else_load = all
        .iter()
        .find(|(op, ip)| *ip >= target && *op == OpKind::MvRegUi32)
        .map(|(_, ip)| *ip)
        .expect("else arm load");
    assert_eq!(aster_bytecode::read_u32(&main.code, else_load + 2), Some(2));
}

#[test]
fn function_definition_and_call() {
    // fn add(a: i32, b: i32) -> i32 { a + b };  var z = add(3, 4);
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
    attach(&mut ast, &[add, stmt]);

    let pipeline = Pipeline::new();
    pipeline.typecheck(&mut ast).unwrap();

    // The use of `add` resolves in the enclosing scope at distance 0; the
    // use of `a` in the body resolves to the parameter declaration.
    let callee = ast.get_node(call_node).children[0];
    assert_eq!(ast.identifier(callee).scope_distance, Some(0));
    let a_use = ast.identifier(a).clone();
    assert_eq!(a_use.scope_distance, Some(0));

    let from = ast.get_node(add).children[1];
    let a_decl = ast.get_node(from).children[0];
    let root_ns = ast.get_node(body).name_scope.unwrap();
    let lookup = ast.resolve_variable(root_ns, "a").found().unwrap();
    assert_eq!(lookup.declaration_node, a_decl);

    let module = pipeline.lower(&ast).unwrap();
    let mut program = pipeline.generate(&module).unwrap();
    pipeline.optimize(&mut program).unwrap();
    let exe = pipeline.link(program).unwrap();

    let main = chunk(&exe, "main");
    let call_ip = find_op(&main.code, OpKind::CallUi64).expect("call emitted");
    let packed = aster_bytecode::read_u64(&main.code, call_ip + 2).unwrap();
    assert_eq!(
        FarLbl::unpack(packed),
        FarLbl::new(chunk_index(&exe, "add"), 0)
    );
}

#[test]
fn self_recursion_links_to_itself() {
    // fn fact(n: i32) -> i32 { if (n == 0) { 1 } else { n * fact(n - 1) } }
    let mut ast = new_unit();
    let n1 = ident(&mut ast, "n");
    let zero = number(&mut ast, 0);
    let test = binary(&mut ast, NodeKind::Equality, n1, zero);

    let one = number(&mut ast, 1);
    let base = value_block(&mut ast, one);

    let n2 = ident(&mut ast, "n");
    let n3 = ident(&mut ast, "n");
    let one_again = number(&mut ast, 1);
    let minus = binary(&mut ast, NodeKind::Subtraction, n3, one_again);
    let rec = call(&mut ast, "fact", &[minus]);
    let product = binary(&mut ast, NodeKind::Multiplication, n2, rec);
    let step = value_block(&mut ast, product);

    let if_node = if_else(&mut ast, test, base, step);
    let body = value_block(&mut ast, if_node);
    let fact = function(&mut ast, "fact", &[("n", "i32")], "i32", body);
    attach(&mut ast, &[fact]);

    let mut exe_ast = ast;
    let exe = compile(&mut exe_ast);

    let fact_chunk = chunk(&exe, "fact");
    assert_eq!(count_ops(&fact_chunk.code, OpKind::CallUi64), 1);
    let call_ip = find_op(&fact_chunk.code, OpKind::CallUi64).unwrap();
    let packed = aster_bytecode::read_u64(&fact_chunk.code, call_ip + 2).unwrap();
    assert_eq!(
        FarLbl::unpack(packed),
        FarLbl::new(chunk_index(&exe, "fact"), 0)
    );
}

#[test]
fn while_loop_jumps_backwards() {
    // var n = 10; while (n > 0) { var m = n - 1; }
    let mut ast = new_unit();
    let ten = number(&mut ast, 10);
    let init = assign(&mut ast, "n", ten);

    let n_use = ident(&mut ast, "n");
    let zero = number(&mut ast, 0);
    let test = binary(&mut ast, NodeKind::GreaterThan, n_use, zero);

    let n_again = ident(&mut ast, "n");
    let one = number(&mut ast, 1);
    let minus = binary(&mut ast, NodeKind::Subtraction, n_again, one);
    let step = assign(&mut ast, "m", minus);
    let body = block(&mut ast, &[step]);

    let loop_node = while_loop(&mut ast, test, body);
    attach(&mut ast, &[init, loop_node]);

    let mut unit = ast;
    let exe = compile(&mut unit);

    let main = chunk(&exe, "main");
    let jump_ip = find_op(&main.code, OpKind::JmprI32).expect("loop back-edge");
    assert!(read_i32_at(&main.code, jump_ip + 1) < 0);
    assert_eq!(count_ops(&main.code, OpKind::JrzRegI32), 1);
}

#[test]
fn block_value_becomes_function_result() {
    // fn five() -> i32 { 5 }  var x = five();
    let mut ast = new_unit();
    let five_lit = number(&mut ast, 5);
    let body = value_block(&mut ast, five_lit);
    let five = {
        // A zero-parameter function still carries a (empty) parameter tuple.
        let name_node = ident(&mut ast, "five");
        let from = tuple(&mut ast, &[]);
        let to = type_atom(&mut ast, "i32");
        with_children(&mut ast, NodeKind::Function, &[name_node, from, to, body])
    };
    let call_node = call(&mut ast, "five", &[]);
    let stmt = assign(&mut ast, "x", call_node);
    attach(&mut ast, &[five, stmt]);

    let mut unit = ast;
    let exe = compile(&mut unit);
    let five_chunk = chunk(&exe, "five");
    let kinds: Vec<OpKind> = ops(&five_chunk.code).iter().map(|(op, _)| *op).collect();
    // The literal lands directly in the return register; no move needed.
    assert_eq!(kinds, vec![OpKind::MvRegUi32, OpKind::RetUi8]);
    assert_eq!(five_chunk.code.last(), Some(&1));
}
