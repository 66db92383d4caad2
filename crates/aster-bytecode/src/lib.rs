#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! The Aster bytecode layer: instruction set, function chunks, the
//! generator from the core AST, the linker, a peephole optimizer, and
//! textual/binary output forms.
//!
//! Instructions are byte-encoded with little-endian fixed-width operands;
//! every op's size derives from its kind, so instruction streams can be
//! walked without decoding operands. Before linking, jump operands hold
//! label ids and call operands hold chunk-local symbol ids; the linker
//! rewrites both (see [`link`]).

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

pub mod gen;
pub mod image;
pub mod link;
pub mod opt;
pub mod print;

pub use gen::{generate, GenError};
pub use image::{decode_executable, encode_executable, DecodeError, EncodeError};
pub use link::{link, LinkError};
pub use opt::{optimize_program, OptError, OptLevel};
pub use print::disassemble;

use aster_core::types::Type;
use aster_core::NativeOp;

/// A register index within a function's window.
pub type Reg = u8;

/// The instruction kinds. The discriminant is the encoded opcode byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum OpKind {
    Nop = 0x00,
    /// Label placeholder, erased by the linker.
    LblUi32 = 0x01,

    Mv8RegReg = 0x10,
    Mv16RegReg = 0x11,
    Mv32RegReg = 0x12,
    Mv64RegReg = 0x13,
    MvRegUi8 = 0x14,
    MvRegUi16 = 0x15,
    MvRegUi32 = 0x16,
    MvRegUi64 = 0x17,

    AddRegRegReg = 0x20,
    SubRegRegReg = 0x21,
    MulRegRegReg = 0x22,
    DivRegRegReg = 0x23,
    ModRegRegReg = 0x24,

    EqRegRegReg = 0x30,
    GtRegRegReg = 0x31,
    GteRegRegReg = 0x32,
    LtRegRegReg = 0x33,
    LteRegRegReg = 0x34,

    /// Relative jump to a label in the same chunk.
    JmprI32 = 0x40,
    /// Jump when the register is zero.
    JrzRegI32 = 0x41,
    /// Jump when the register is non-zero.
    JrnzRegI32 = 0x42,

    /// Call: window base register plus a 64-bit operand. Pre-link the
    /// low 32 bits hold a symbol id; post-link the operand is a packed
    /// far label.
    CallUi64 = 0x50,
    /// Return with an `n`-register result at the window base.
    RetUi8 = 0x51,

    Print = 0x60,
    Println = 0x61,
}

impl OpKind {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<OpKind> {
        use OpKind::*;
        Some(match byte {
            0x00 => Nop,
            0x01 => LblUi32,
            0x10 => Mv8RegReg,
            0x11 => Mv16RegReg,
            0x12 => Mv32RegReg,
            0x13 => Mv64RegReg,
            0x14 => MvRegUi8,
            0x15 => MvRegUi16,
            0x16 => MvRegUi32,
            0x17 => MvRegUi64,
            0x20 => AddRegRegReg,
            0x21 => SubRegRegReg,
            0x22 => MulRegRegReg,
            0x23 => DivRegRegReg,
            0x24 => ModRegRegReg,
            0x30 => EqRegRegReg,
            0x31 => GtRegRegReg,
            0x32 => GteRegRegReg,
            0x33 => LtRegRegReg,
            0x34 => LteRegRegReg,
            0x40 => JmprI32,
            0x41 => JrzRegI32,
            0x42 => JrnzRegI32,
            0x50 => CallUi64,
            0x51 => RetUi8,
            0x60 => Print,
            0x61 => Println,
            _ => return None,
        })
    }

    /// Total encoded size of an instruction of this kind, opcode byte
    /// included.
    pub fn size(self) -> usize {
        use OpKind::*;
        match self {
            Nop => 1,
            LblUi32 => 1 + 4,
            Mv8RegReg | Mv16RegReg | Mv32RegReg | Mv64RegReg => 1 + 2,
            MvRegUi8 => 1 + 1 + 1,
            MvRegUi16 => 1 + 1 + 2,
            MvRegUi32 => 1 + 1 + 4,
            MvRegUi64 => 1 + 1 + 8,
            AddRegRegReg | SubRegRegReg | MulRegRegReg | DivRegRegReg | ModRegRegReg => 1 + 3,
            EqRegRegReg | GtRegRegReg | GteRegRegReg | LtRegRegReg | LteRegRegReg => 1 + 3,
            JmprI32 => 1 + 4,
            JrzRegI32 | JrnzRegI32 => 1 + 1 + 4,
            CallUi64 => 1 + 1 + 8,
            RetUi8 => 1 + 1,
            Print | Println => 1 + 1,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        use OpKind::*;
        match self {
            Nop => "NOP",
            LblUi32 => "LBL_UI32",
            Mv8RegReg => "MV8_REG_REG",
            Mv16RegReg => "MV16_REG_REG",
            Mv32RegReg => "MV32_REG_REG",
            Mv64RegReg => "MV64_REG_REG",
            MvRegUi8 => "MV_REG_UI8",
            MvRegUi16 => "MV_REG_UI16",
            MvRegUi32 => "MV_REG_UI32",
            MvRegUi64 => "MV_REG_UI64",
            AddRegRegReg => "ADD_REG_REG_REG",
            SubRegRegReg => "SUB_REG_REG_REG",
            MulRegRegReg => "MUL_REG_REG_REG",
            DivRegRegReg => "DIV_REG_REG_REG",
            ModRegRegReg => "MOD_REG_REG_REG",
            EqRegRegReg => "EQ_REG_REG_REG",
            GtRegRegReg => "GT_REG_REG_REG",
            GteRegRegReg => "GTE_REG_REG_REG",
            LtRegRegReg => "LT_REG_REG_REG",
            LteRegRegReg => "LTE_REG_REG_REG",
            JmprI32 => "JMPR_I32",
            JrzRegI32 => "JRZ_REG_I32",
            JrnzRegI32 => "JRNZ_REG_I32",
            CallUi64 => "CALL_UI64",
            RetUi8 => "RET_UI8",
            Print => "PRINT",
            Println => "PRINTLN",
        }
    }

    /// The native op a chunk-level native function encodes as.
    pub fn from_native(op: NativeOp) -> OpKind {
        match op {
            NativeOp::Print => OpKind::Print,
            NativeOp::Println => OpKind::Println,
        }
    }
}

/// A packed absolute code address: upper 32 bits are the chunk index,
/// lower 32 bits the instruction offset inside it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FarLbl {
    pub chunk: u32,
    pub ip: u32,
}

impl FarLbl {
    pub fn new(chunk: u32, ip: u32) -> FarLbl {
        FarLbl { chunk, ip }
    }

    pub fn pack(self) -> u64 {
        (u64::from(self.chunk) << 32) | u64::from(self.ip)
    }

    pub fn unpack(value: u64) -> FarLbl {
        FarLbl {
            chunk: (value >> 32) as u32,
            ip: value as u32,
        }
    }
}

// Little-endian operand helpers.

pub fn write_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn write_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

pub fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let slice = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

pub fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let slice = bytes.get(at..at + 4)?;
    Some(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

pub fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let slice = bytes.get(at..at + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(slice);
    Some(u64::from_le_bytes(raw))
}

pub fn read_i32(bytes: &[u8], at: usize) -> Option<i32> {
    read_u32(bytes, at).map(|v| v as i32)
}

pub fn patch_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn patch_i32(bytes: &mut [u8], at: usize, value: i32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn patch_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// A compiled function chunk: name, bytecode, and the symbol table used
/// by the linker to resolve call targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ByteFunction {
    pub name: String,
    pub code: Vec<u8>,
    /// `symbol_id -> fully-qualified callee name`.
    pub symbols: BTreeMap<u32, String>,
}

/// A VM-provided function: an op kind plus its signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeFunction {
    pub name: String,
    pub op: NativeOp,
    pub ty: Type,
}

/// One function of a program: native or bytecode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Chunk {
    Bytes(ByteFunction),
    Native(NativeFunction),
}

impl Chunk {
    pub fn name(&self) -> &str {
        match self {
            Chunk::Bytes(f) => &f.name,
            Chunk::Native(f) => &f.name,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Chunk::Native(_))
    }

    pub fn code(&self) -> &[u8] {
        match self {
            Chunk::Bytes(f) => &f.code,
            Chunk::Native(_) => &[],
        }
    }
}

/// An unlinked program: ordered chunks with symbolic jump and call
/// operands.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub chunks: Vec<Chunk>,
}

impl Program {
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name() == name)
    }
}

/// The post-link form: jump operands are byte offsets, call operands are
/// packed far labels.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Executable {
    pub chunks: Vec<Chunk>,
}

impl Executable {
    pub fn chunk(&self, name: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.name() == name)
    }

    /// Total bytecode length across chunks.
    pub fn byte_length(&self) -> usize {
        self.chunks.iter().map(|c| c.code().len()).sum()
    }
}
