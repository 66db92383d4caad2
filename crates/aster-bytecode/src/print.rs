//! Textual bytecode dump: one instruction per line, mnemonic followed by
//! decoded operands. Intended for debugging; undecodable bytes render as
//! `??` instead of failing.

extern crate alloc;

use alloc::format;
use alloc::string::String;

use crate::{read_i32, read_u16, read_u32, read_u64, Chunk, Executable, OpKind};

/// Renders every chunk of an executable.
pub fn disassemble(executable: &Executable) -> String {
    let mut out = String::new();
    for chunk in &executable.chunks {
        match chunk {
            Chunk::Native(native) => {
                out.push_str(&format!(
                    "fn {} [native {} : {}]\n",
                    native.name,
                    OpKind::from_native(native.op).mnemonic(),
                    native.ty
                ));
            }
            Chunk::Bytes(func) => {
                out.push_str(&format!("fn {}\n", func.name));
                disassemble_code(&func.code, &mut out);
            }
        }
    }
    out
}

fn disassemble_code(code: &[u8], out: &mut String) {
    let mut ip = 0usize;
    while ip < code.len() {
        let Some(op) = OpKind::from_byte(code[ip]) else {
            out.push_str(&format!("  {ip:04}  ?? 0x{byte:02x}\n", byte = code[ip]));
            ip += 1;
            continue;
        };
        if ip + op.size() > code.len() {
            out.push_str(&format!("  {ip:04}  {} <truncated>\n", op.mnemonic()));
            return;
        }
        out.push_str(&format!("  {ip:04}  {}\n", render(op, code, ip)));
        ip += op.size();
    }
}

fn render(op: OpKind, code: &[u8], ip: usize) -> String {
    use OpKind::*;
    let m = op.mnemonic();
    let reg = |at: usize| format!("r{}", code[at]);
    match op {
        Nop => m.into(),
        LblUi32 => format!("{m} {}", read_u32(code, ip + 1).unwrap_or(0)),
        Mv8RegReg | Mv16RegReg | Mv32RegReg | Mv64RegReg => {
            format!("{m} {}, {}", reg(ip + 1), reg(ip + 2))
        }
        MvRegUi8 => format!("{m} {}, {}", reg(ip + 1), code[ip + 2]),
        MvRegUi16 => format!("{m} {}, {}", reg(ip + 1), read_u16(code, ip + 2).unwrap_or(0)),
        MvRegUi32 => format!("{m} {}, {}", reg(ip + 1), read_u32(code, ip + 2).unwrap_or(0)),
        MvRegUi64 => format!("{m} {}, {}", reg(ip + 1), read_u64(code, ip + 2).unwrap_or(0)),
        AddRegRegReg | SubRegRegReg | MulRegRegReg | DivRegRegReg | ModRegRegReg
        | EqRegRegReg | GtRegRegReg | GteRegRegReg | LtRegRegReg | LteRegRegReg => format!(
            "{m} {}, {}, {}",
            reg(ip + 1),
            reg(ip + 2),
            reg(ip + 3)
        ),
        JmprI32 => format!("{m} {}", read_i32(code, ip + 1).unwrap_or(0)),
        JrzRegI32 | JrnzRegI32 => {
            format!("{m} {}, {}", reg(ip + 1), read_i32(code, ip + 2).unwrap_or(0))
        }
        CallUi64 => format!(
            "{m} {}, 0x{:016x}",
            reg(ip + 1),
            read_u64(code, ip + 2).unwrap_or(0)
        ),
        RetUi8 => format!("{m} {}", code[ip + 1]),
        Print | Println => format!("{m} {}", reg(ip + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{write_u32, ByteFunction, NativeFunction};
    use alloc::collections::BTreeMap;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn one_instruction_per_line() {
        let mut code = vec![OpKind::MvRegUi32.to_byte(), 0];
        write_u32(&mut code, 1);
        code.push(OpKind::RetUi8.to_byte());
        code.push(0);

        let exe = Executable {
            chunks: vec![
                Chunk::Native(NativeFunction {
                    name: "std.io.println".to_string(),
                    op: aster_core::NativeOp::Println,
                    ty: aster_core::types::Type::function(
                        aster_core::types::Type::Int(aster_core::types::IntKind::Ui64),
                        aster_core::types::Type::Void,
                    ),
                }),
                Chunk::Bytes(ByteFunction {
                    name: "main".to_string(),
                    code,
                    symbols: BTreeMap::new(),
                }),
            ],
        };

        let text = disassemble(&exe);
        let lines: alloc::vec::Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "fn std.io.println [native PRINTLN : std.ui64 -> void]"
        );
        assert_eq!(lines[1], "fn main");
        assert_eq!(lines[2], "  0000  MV_REG_UI32 r0, 1");
        assert_eq!(lines[3], "  0006  RET_UI8 0");
    }
}
