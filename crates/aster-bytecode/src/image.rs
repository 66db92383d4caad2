//! Stable binary serialization for linked executables.
//!
//! Goals: explicit little-endian fixed-width encoding, no dependence on
//! in-memory layout, and canonical output so `encode -> decode -> encode`
//! is byte-identical. File I/O itself stays with the driver; this module
//! only maps executables to and from byte vectors.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use aster_core::types::{IntKind, Type};
use aster_core::NativeOp;

use crate::{ByteFunction, Chunk, Executable, NativeFunction};

const MAGIC: &[u8; 8] = b"ASTRBC0\0";
const VERSION_MAJOR: u16 = 0;
const VERSION_MINOR: u16 = 1;

const CHUNK_BYTES: u8 = 0;
const CHUNK_NATIVE: u8 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeError {
    pub message: String,
}

impl core::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "encode error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    pub message: String,
    pub offset: usize,
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "decode error at {}: {}", self.offset, self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

pub fn encode_executable(executable: &Executable) -> Result<Vec<u8>, EncodeError> {
    let mut enc = Encoder { buf: Vec::new() };
    enc.bytes(MAGIC);
    enc.u16(VERSION_MAJOR);
    enc.u16(VERSION_MINOR);
    enc.len(executable.chunks.len())?;
    for chunk in &executable.chunks {
        enc.chunk(chunk)?;
    }
    Ok(enc.buf)
}

pub fn decode_executable(bytes: &[u8]) -> Result<Executable, DecodeError> {
    let mut dec = Decoder { bytes, at: 0 };
    dec.expect(MAGIC)?;
    let major = dec.u16()?;
    let minor = dec.u16()?;
    if major != VERSION_MAJOR || minor != VERSION_MINOR {
        return Err(dec.err(format!(
            "unsupported image version {major}.{minor} (expected {VERSION_MAJOR}.{VERSION_MINOR})"
        )));
    }

    let count = dec.len()?;
    let mut chunks = Vec::with_capacity(count);
    for _ in 0..count {
        chunks.push(dec.chunk()?);
    }
    if dec.at != dec.bytes.len() {
        return Err(dec.err("trailing bytes".to_string()));
    }
    Ok(Executable { chunks })
}

struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn len(&mut self, len: usize) -> Result<(), EncodeError> {
        let len: u32 = len.try_into().map_err(|_| EncodeError {
            message: "length overflow".to_string(),
        })?;
        self.u32(len);
        Ok(())
    }

    fn string(&mut self, s: &str) -> Result<(), EncodeError> {
        self.len(s.len())?;
        self.bytes(s.as_bytes());
        Ok(())
    }

    fn chunk(&mut self, chunk: &Chunk) -> Result<(), EncodeError> {
        match chunk {
            Chunk::Bytes(func) => {
                self.u8(CHUNK_BYTES);
                self.string(&func.name)?;
                self.len(func.code.len())?;
                self.bytes(&func.code);
                self.len(func.symbols.len())?;
                for (id, name) in &func.symbols {
                    self.u32(*id);
                    self.string(name)?;
                }
            }
            Chunk::Native(native) => {
                self.u8(CHUNK_NATIVE);
                self.string(&native.name)?;
                self.u8(native_tag(native.op));
                self.ty(&native.ty)?;
            }
        }
        Ok(())
    }

    fn ty(&mut self, ty: &Type) -> Result<(), EncodeError> {
        match ty {
            Type::Int(kind) => {
                self.u8(0);
                self.u8(int_kind_tag(*kind));
            }
            Type::Str => self.u8(1),
            Type::Bool => self.u8(2),
            Type::Void => self.u8(3),
            Type::Unset => self.u8(4),
            Type::Product(elems) => {
                self.u8(5);
                self.len(elems.len())?;
                for elem in elems {
                    self.ty(elem)?;
                }
            }
            Type::Sum(members) => {
                self.u8(6);
                self.len(members.len())?;
                for member in members {
                    self.ty(member)?;
                }
            }
            Type::Function { from, to } => {
                self.u8(7);
                self.ty(from)?;
                self.ty(to)?;
            }
            Type::Array { elem, count } => {
                self.u8(8);
                self.ty(elem)?;
                self.u64(*count as u64);
            }
            Type::Reference(inner) => {
                self.u8(9);
                self.ty(inner)?;
            }
            Type::Nominal { name, inner } => {
                self.u8(10);
                self.string(name)?;
                self.ty(inner)?;
            }
        }
        Ok(())
    }
}

struct Decoder<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl Decoder<'_> {
    fn err(&self, message: String) -> DecodeError {
        DecodeError {
            message,
            offset: self.at,
        }
    }

    fn take(&mut self, n: usize) -> Result<&[u8], DecodeError> {
        let slice = self
            .bytes
            .get(self.at..self.at + n)
            .ok_or_else(|| self.err("unexpected end of input".to_string()))?;
        self.at += n;
        Ok(slice)
    }

    fn expect(&mut self, expected: &[u8]) -> Result<(), DecodeError> {
        let got = self.take(expected.len())?;
        if got != expected {
            let at = self.at;
            return Err(DecodeError {
                message: "bad magic".to_string(),
                offset: at,
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn len(&mut self) -> Result<usize, DecodeError> {
        Ok(self.u32()? as usize)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let len = self.len()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.err("invalid utf-8".to_string()))
    }

    fn chunk(&mut self) -> Result<Chunk, DecodeError> {
        match self.u8()? {
            CHUNK_BYTES => {
                let name = self.string()?;
                let code_len = self.len()?;
                let code = self.take(code_len)?.to_vec();
                let symbol_count = self.len()?;
                let mut symbols = BTreeMap::new();
                for _ in 0..symbol_count {
                    let id = self.u32()?;
                    let name = self.string()?;
                    if symbols.insert(id, name).is_some() {
                        return Err(self.err(format!("duplicate symbol id {id}")));
                    }
                }
                Ok(Chunk::Bytes(ByteFunction {
                    name,
                    code,
                    symbols,
                }))
            }
            CHUNK_NATIVE => {
                let name = self.string()?;
                let op = self.native_op()?;
                let ty = self.ty()?;
                Ok(Chunk::Native(NativeFunction { name, op, ty }))
            }
            tag => Err(self.err(format!("unknown chunk tag {tag}"))),
        }
    }

    fn native_op(&mut self) -> Result<NativeOp, DecodeError> {
        match self.u8()? {
            0 => Ok(NativeOp::Print),
            1 => Ok(NativeOp::Println),
            tag => Err(self.err(format!("unknown native op tag {tag}"))),
        }
    }

    fn ty(&mut self) -> Result<Type, DecodeError> {
        Ok(match self.u8()? {
            0 => Type::Int(self.int_kind()?),
            1 => Type::Str,
            2 => Type::Bool,
            3 => Type::Void,
            4 => Type::Unset,
            5 => {
                let count = self.len()?;
                let mut elems = Vec::with_capacity(count);
                for _ in 0..count {
                    elems.push(self.ty()?);
                }
                Type::Product(elems)
            }
            6 => {
                let count = self.len()?;
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    members.push(self.ty()?);
                }
                Type::Sum(members)
            }
            7 => {
                let from = self.ty()?;
                let to = self.ty()?;
                Type::function(from, to)
            }
            8 => {
                let elem = self.ty()?;
                let count = self.u64()? as usize;
                Type::array(elem, count)
            }
            9 => Type::Reference(alloc::boxed::Box::new(self.ty()?)),
            10 => {
                let name = self.string()?;
                let inner = self.ty()?;
                Type::nominal(name, inner)
            }
            tag => return Err(self.err(format!("unknown type tag {tag}"))),
        })
    }

    fn int_kind(&mut self) -> Result<IntKind, DecodeError> {
        Ok(match self.u8()? {
            0 => IntKind::I8,
            1 => IntKind::Ui8,
            2 => IntKind::I16,
            3 => IntKind::Ui16,
            4 => IntKind::I32,
            5 => IntKind::Ui32,
            6 => IntKind::I64,
            7 => IntKind::Ui64,
            tag => return Err(self.err(format!("unknown integer width tag {tag}"))),
        })
    }
}

fn native_tag(op: NativeOp) -> u8 {
    match op {
        NativeOp::Print => 0,
        NativeOp::Println => 1,
    }
}

fn int_kind_tag(kind: IntKind) -> u8 {
    match kind {
        IntKind::I8 => 0,
        IntKind::Ui8 => 1,
        IntKind::I16 => 2,
        IntKind::Ui16 => 3,
        IntKind::I32 => 4,
        IntKind::Ui32 => 5,
        IntKind::I64 => 6,
        IntKind::Ui64 => 7,
    }
}
