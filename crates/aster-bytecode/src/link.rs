//! Linking: resolve labels into relative jumps and call symbols into
//! absolute far labels.
//!
//! Two scans per non-native chunk. The first records every `LBL_UI32`
//! position and overwrites it with `NOP`s, since labels have no runtime
//! semantics. The second rewrites operands: relative jumps become
//! `target_ip - current_ip` byte offsets within the chunk, and each
//! `CALL_UI64` symbol resolves through the chunk's symbol table to a
//! chunk index, packed as a far label with entry ip 0.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};

use crate::{
    patch_i32, patch_u64, read_u32, Chunk, Executable, FarLbl, OpKind, Program,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkError {
    pub message: String,
}

impl LinkError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for LinkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "link error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

/// Links a program into an executable.
pub fn link(program: Program) -> Result<Executable, LinkError> {
    let mut chunks = program.chunks;

    let mut function_locations: BTreeMap<String, u32> = BTreeMap::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let previous = function_locations.insert(chunk.name().to_string(), index as u32);
        if previous.is_some() {
            return Err(LinkError::new(format!(
                "duplicate function `{}`",
                chunk.name()
            )));
        }
    }

    for chunk in chunks.iter_mut() {
        let Chunk::Bytes(func) = chunk else {
            continue;
        };
        let name = func.name.clone();
        let code = &mut func.code;

        // First scan: collect label positions, erase labels to NOPs.
        let mut label_locations: BTreeMap<u32, u32> = BTreeMap::new();
        let mut ip = 0usize;
        while ip < code.len() {
            let op = opcode_at(code, ip, &name)?;
            if op == OpKind::LblUi32 {
                let id = operand_u32(code, ip + 1, &name)?;
                if label_locations.insert(id, ip as u32).is_some() {
                    return Err(LinkError::new(format!(
                        "duplicate label {id} in `{name}`"
                    )));
                }
                for offset in 0..op.size() {
                    code[ip + offset] = OpKind::Nop.to_byte();
                }
            }
            ip += op.size();
        }

        // Second scan: rewrite jump and call operands.
        let mut ip = 0usize;
        while ip < code.len() {
            let op = opcode_at(code, ip, &name)?;
            match op {
                OpKind::JmprI32 => {
                    let target = label_target(&label_locations, code, ip + 1, &name)?;
                    patch_i32(code, ip + 1, target - ip as i32);
                }
                OpKind::JrzRegI32 | OpKind::JrnzRegI32 => {
                    let target = label_target(&label_locations, code, ip + 2, &name)?;
                    patch_i32(code, ip + 2, target - ip as i32);
                }
                OpKind::CallUi64 => {
                    // The pre-link operand keeps the symbol id in its low
                    // 32 bits.
                    let symbol = operand_u32(code, ip + 2, &name)?;
                    let callee = func
                        .symbols
                        .get(&symbol)
                        .ok_or_else(|| {
                            LinkError::new(format!(
                                "call in `{name}` references unknown symbol {symbol}"
                            ))
                        })?
                        .clone();
                    let location = *function_locations.get(&callee).ok_or_else(|| {
                        LinkError::new(format!("unknown call target `{callee}`"))
                    })?;
                    let far = FarLbl::new(location, 0);
                    patch_u64(code, ip + 2, far.pack());
                }
                _ => {}
            }
            ip += op.size();
        }
    }

    Ok(Executable { chunks })
}

fn opcode_at(code: &[u8], ip: usize, chunk: &str) -> Result<OpKind, LinkError> {
    let byte = code[ip];
    let op = OpKind::from_byte(byte).ok_or_else(|| {
        LinkError::new(format!("unknown opcode 0x{byte:02x} at {ip} in `{chunk}`"))
    })?;
    if ip + op.size() > code.len() {
        return Err(LinkError::new(format!(
            "truncated {} at {ip} in `{chunk}`",
            op.mnemonic()
        )));
    }
    Ok(op)
}

fn operand_u32(code: &[u8], at: usize, chunk: &str) -> Result<u32, LinkError> {
    read_u32(code, at)
        .ok_or_else(|| LinkError::new(format!("truncated operand at {at} in `{chunk}`")))
}

fn label_target(
    labels: &BTreeMap<u32, u32>,
    code: &[u8],
    operand_at: usize,
    chunk: &str,
) -> Result<i32, LinkError> {
    let id = operand_u32(code, operand_at, chunk)?;
    let target = labels
        .get(&id)
        .ok_or_else(|| LinkError::new(format!("undefined label {id} in `{chunk}`")))?;
    Ok(*target as i32)
}
