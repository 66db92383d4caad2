//! Peephole optimization over unlinked programs.
//!
//! Runs before linking: jump operands are still label ids, so deleting
//! instructions needs no relocation. The only rewrite is dropping
//! self-moves (`MV*_REG_REG` with equal source and destination), which
//! the generator emits when a value is already in place.

extern crate alloc;

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use crate::{Chunk, OpKind, Program};

/// Optimization settings for the optional program pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    /// Leave the program untouched.
    O0,
    /// Peephole rewrites that preserve label positions' meaning.
    #[default]
    O1,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OptError {
    pub message: String,
}

impl OptError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for OptError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "bytecode opt error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for OptError {}

/// Applies the configured rewrites to every non-native chunk. Must run
/// before [`crate::link`].
pub fn optimize_program(program: &mut Program, level: OptLevel) -> Result<(), OptError> {
    if level == OptLevel::O0 {
        return Ok(());
    }
    for chunk in &mut program.chunks {
        let Chunk::Bytes(func) = chunk else {
            continue;
        };
        func.code = strip_self_moves(&func.code, &func.name)?;
    }
    Ok(())
}

fn strip_self_moves(code: &[u8], chunk: &str) -> Result<Vec<u8>, OptError> {
    let mut out = Vec::with_capacity(code.len());
    let mut ip = 0usize;
    while ip < code.len() {
        let byte = code[ip];
        let op = OpKind::from_byte(byte).ok_or_else(|| {
            OptError::new(format!("unknown opcode 0x{byte:02x} at {ip} in `{chunk}`"))
        })?;
        let size = op.size();
        if ip + size > code.len() {
            return Err(OptError::new(format!(
                "truncated {} at {ip} in `{chunk}`",
                op.mnemonic()
            )));
        }

        let is_self_move = matches!(
            op,
            OpKind::Mv8RegReg | OpKind::Mv16RegReg | OpKind::Mv32RegReg | OpKind::Mv64RegReg
        ) && code[ip + 1] == code[ip + 2];
        if !is_self_move {
            out.extend_from_slice(&code[ip..ip + size]);
        }
        ip += size;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{write_u32, ByteFunction};
    use alloc::collections::BTreeMap;
    use alloc::string::ToString;
    use alloc::vec;

    fn program(code: Vec<u8>) -> Program {
        Program {
            chunks: vec![Chunk::Bytes(ByteFunction {
                name: "f".to_string(),
                code,
                symbols: BTreeMap::new(),
            })],
        }
    }

    #[test]
    fn self_moves_are_removed() {
        let code = vec![
            OpKind::Mv64RegReg.to_byte(),
            3,
            3, // self-move, dropped
            OpKind::Mv64RegReg.to_byte(),
            4,
            3, // real move, kept
            OpKind::RetUi8.to_byte(),
            0,
        ];
        let mut p = program(code);
        optimize_program(&mut p, OptLevel::O1).unwrap();
        assert_eq!(
            p.chunks[0].code(),
            &[OpKind::Mv64RegReg.to_byte(), 4, 3, OpKind::RetUi8.to_byte(), 0]
        );
    }

    #[test]
    fn o0_is_identity() {
        let code = vec![OpKind::Mv8RegReg.to_byte(), 1, 1];
        let mut p = program(code.clone());
        optimize_program(&mut p, OptLevel::O0).unwrap();
        assert_eq!(p.chunks[0].code(), code.as_slice());
    }

    #[test]
    fn labels_survive_optimization() {
        let mut code = Vec::new();
        code.push(OpKind::Mv32RegReg.to_byte());
        code.push(7);
        code.push(7);
        code.push(OpKind::LblUi32.to_byte());
        write_u32(&mut code, 42);
        code.push(OpKind::JmprI32.to_byte());
        write_u32(&mut code, 42);

        let mut p = program(code);
        optimize_program(&mut p, OptLevel::O1).unwrap();
        // The self-move is gone, the label and its jump remain intact.
        let linked = crate::link(p).unwrap();
        let code = linked.chunks[0].code();
        assert_eq!(crate::read_i32(code, 6), Some(-5));
    }
}
