//! Post-link bytecode properties: relative jump operands, call
//! relocations, label erasure, the textual dump, and the binary image
//! round trip.

mod common;

use aster::{disassemble, FarLbl, NodeKind, OpKind, Pipeline};
use aster_bytecode::{decode_executable, encode_executable, read_i32, read_u64};
use common::*;

/// A unit exercising branches, loops, calls, and a native call.
fn build_exe() -> aster::Executable {
    // import std;
    // fn dec(n: i32) -> i32 { n - 1 }
    // var n = 3;
    // while (n > 0) { var m = dec(n); }
    // std.io.println(9);
    let mut ast = new_unit();
    let std_import = import(&mut ast, "std");

    let n_param = ident(&mut ast, "n");
    let one = number(&mut ast, 1);
    let diff = binary(&mut ast, NodeKind::Subtraction, n_param, one);
    let body = value_block(&mut ast, diff);
    let dec = function(&mut ast, "dec", &[("n", "i32")], "i32", body);

    let three = number(&mut ast, 3);
    let init = assign(&mut ast, "n", three);

    let n_use = ident(&mut ast, "n");
    let zero = number(&mut ast, 0);
    let test = binary(&mut ast, NodeKind::GreaterThan, n_use, zero);
    let n_arg = ident(&mut ast, "n");
    let call_dec = call(&mut ast, "dec", &[n_arg]);
    let step = assign(&mut ast, "m", call_dec);
    let loop_body = block(&mut ast, &[step]);
    let loop_node = while_loop(&mut ast, test, loop_body);

    let nine = number(&mut ast, 9);
    let print_call = call(&mut ast, "std.io.println", &[nine]);

    attach(&mut ast, &[std_import, dec, init, loop_node, print_call]);
    compile(&mut ast)
}

#[test]
fn jump_operands_equal_target_minus_source() {
    let exe = build_exe();
    let main = chunk(&exe, "main");
    let boundaries: Vec<usize> = ops(&main.code).iter().map(|(_, ip)| *ip).collect();

    let mut jumps = 0;
    for (op, ip) in ops(&main.code) {
        let operand_at = match op {
            OpKind::JmprI32 => ip + 1,
            OpKind::JrzRegI32 | OpKind::JrnzRegI32 => ip + 2,
            _ => continue,
        };
        jumps += 1;
        let offset = read_i32(&main.code, operand_at).unwrap();
        let target = ip as i64 + i64::from(offset);
        assert!(
            boundaries.contains(&(target as usize)),
            "jump at {ip} lands inside an instruction"
        );
    }
    assert!(jumps >= 2, "expected a loop back-edge and an exit branch");
}

#[test]
fn labels_are_erased_to_nops() {
    let exe = build_exe();
    for chunk in &exe.chunks {
        for (op, _) in ops(chunk.code()) {
            assert_ne!(op, OpKind::LblUi32, "label survived linking");
        }
    }
}

#[test]
fn call_operands_pack_chunk_index_and_zero_ip() {
    let exe = build_exe();
    let main = chunk(&exe, "main");
    let call_ip = find_op(&main.code, OpKind::CallUi64).expect("call to dec");
    let far = FarLbl::unpack(read_u64(&main.code, call_ip + 2).unwrap());
    assert_eq!(far.chunk, chunk_index(&exe, "dec"));
    assert_eq!(far.ip, 0);
}

#[test]
fn dump_prints_one_instruction_per_line() {
    let exe = build_exe();
    let text = disassemble(&exe);

    // Chunk headers for natives and bytecode functions.
    assert!(text.contains("fn std.io.println [native PRINTLN : std.ui64 -> void]"));
    assert!(text.contains("fn main\n"));
    assert!(text.contains("fn dec\n"));

    // Operand rendering: mnemonic then decoded operands.
    assert!(text.contains("MV_REG_UI32 r"));
    assert!(text.contains("PRINTLN r"));
    assert!(text.contains("RET_UI8 1"));

    // Every body line follows "  nnnn  MNEMONIC".
    for line in text.lines().filter(|l| l.starts_with("  ")) {
        let rest = line.trim_start();
        let (offset, instr) = rest.split_once("  ").expect("offset column");
        assert!(offset.chars().all(|c| c.is_ascii_digit()));
        assert!(instr.chars().next().unwrap().is_ascii_uppercase());
    }
}

#[test]
fn image_round_trip_is_byte_identical() {
    let exe = build_exe();
    let bytes = encode_executable(&exe).unwrap();
    let decoded = decode_executable(&bytes).unwrap();
    assert_eq!(decoded, exe);
    assert_eq!(encode_executable(&decoded).unwrap(), bytes);
    assert!(decoded.byte_length() > 0);
}

#[test]
fn references_copy_registers_not_immediates() {
    // var x = 1; var r = &x;
    let mut ast = new_unit();
    let one = number(&mut ast, 1);
    let first = assign(&mut ast, "x", one);
    let x_use = ident(&mut ast, "x");
    let reference = with_children(&mut ast, NodeKind::Reference, &[x_use]);
    let second = assign(&mut ast, "r", reference);
    attach(&mut ast, &[first, second]);

    let exe = compile(&mut ast);
    let main = chunk(&exe, "main");

    // The reference is a register-to-register move; nothing may encode
    // a register index as an immediate byte.
    assert!(count_ops(&main.code, OpKind::Mv64RegReg) >= 1);
    assert_eq!(count_ops(&main.code, OpKind::MvRegUi8), 0);
}

#[test]
fn optimizer_is_transparent_to_linking() {
    // The same unit, unoptimized: linking must still succeed and the
    // optimized form must be no larger.
    let mut ast = new_unit();
    let three = number(&mut ast, 3);
    let init = assign(&mut ast, "n", three);
    attach(&mut ast, &[init]);

    let pipeline = Pipeline::new().opt_level(aster::OptLevel::O0);
    let exe_raw = pipeline.process(&mut ast).unwrap();

    let mut ast2 = new_unit();
    let three2 = number(&mut ast2, 3);
    let init2 = assign(&mut ast2, "n", three2);
    attach(&mut ast2, &[init2]);
    let exe_opt = Pipeline::new().process(&mut ast2).unwrap();

    assert!(exe_opt.byte_length() <= exe_raw.byte_length());
    assert_eq!(exe_opt.chunks.len(), exe_raw.chunks.len());
}
