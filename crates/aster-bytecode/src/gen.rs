//! Bytecode generation: one chunk per lowered function.
//!
//! Registers are allocated monotonically per function. A binding's
//! storage is assigned at its first store, above whatever temporaries the
//! initializer used; block frames release their registers when they pop.
//! Calls place the argument tuple at a fresh window base and receive the
//! result at the same base; calls to native functions emit the native op
//! directly instead of a call relocation.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use aster_core::types::Type;
use aster_core::{Access, BinOp, Block, Expr, Function, Lit, Module, NativeOp, Stmt};

use crate::{write_u32, write_u64, ByteFunction, Chunk, NativeFunction, OpKind, Program};

/// The register window holds 256 slots.
const WINDOW: u16 = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenError {
    pub message: String,
}

impl GenError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl core::fmt::Display for GenError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "bytecode generation error: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for GenError {}

/// Generates an unlinked program: native chunks first, then one bytecode
/// chunk per module function in order.
pub fn generate(
    module: &Module,
    natives: &[(String, NativeOp, Type)],
) -> Result<Program, GenError> {
    let native_ops: BTreeMap<&str, NativeOp> = natives
        .iter()
        .map(|(name, op, _)| (name.as_str(), *op))
        .collect();

    let mut chunks = Vec::new();
    for (name, op, ty) in natives {
        chunks.push(Chunk::Native(NativeFunction {
            name: name.clone(),
            op: *op,
            ty: ty.clone(),
        }));
    }
    for func in &module.functions {
        chunks.push(Chunk::Bytes(gen_function(func, &native_ops)?));
    }
    Ok(Program { chunks })
}

struct Var {
    name: String,
    ty: Type,
    /// Assigned at the first store.
    base: Option<u16>,
}

struct Frame {
    vars: Vec<Var>,
    reset_point: u16,
}

struct FnGen<'a> {
    natives: &'a BTreeMap<&'a str, NativeOp>,
    code: Vec<u8>,
    symbols: BTreeMap<u32, String>,
    symbol_ids: BTreeMap<String, u32>,
    frames: Vec<Frame>,
    next: u16,
}

fn gen_function(
    func: &Function,
    natives: &BTreeMap<&str, NativeOp>,
) -> Result<ByteFunction, GenError> {
    let mut g = FnGen {
        natives,
        code: Vec::new(),
        symbols: BTreeMap::new(),
        symbol_ids: BTreeMap::new(),
        frames: Vec::new(),
        next: 0,
    };

    // The function frame holds the parameters at the window base.
    g.push_frame();
    for param in &func.params {
        let slots = param.ty.slot_count();
        let base = g.alloc(slots)?;
        g.frames
            .last_mut()
            .expect("function frame")
            .vars
            .push(Var {
                name: param.name.clone(),
                ty: param.ty.clone(),
                base: Some(base),
            });
    }

    let (base, slots, ty) = g.gen_block_body(&func.body)?;
    let ret_slots = func.ret.slot_count();
    if ret_slots > 0 {
        if slots < ret_slots {
            return Err(GenError::new(format!(
                "function `{}` produces no value for its return type",
                func.name
            )));
        }
        g.mv_slots(0, base, &ty)?;
    }
    g.emit_reg(OpKind::RetUi8, ret_slots as u8);

    Ok(ByteFunction {
        name: func.name.clone(),
        code: g.code,
        symbols: g.symbols,
    })
}

impl FnGen<'_> {
    fn push_frame(&mut self) {
        self.frames.push(Frame {
            vars: Vec::new(),
            reset_point: self.next,
        });
    }

    fn pop_frame(&mut self) {
        let frame = self.frames.pop().expect("frame underflow");
        self.next = frame.reset_point;
    }

    fn alloc(&mut self, slots: usize) -> Result<u16, GenError> {
        let base = self.next;
        let end = base as usize + slots;
        if end > WINDOW as usize {
            return Err(GenError::new("register window exhausted"));
        }
        self.next = end as u16;
        Ok(base)
    }

    fn symbol_id(&mut self, name: &str) -> u32 {
        if let Some(id) = self.symbol_ids.get(name) {
            return *id;
        }
        let id = self.symbol_ids.len() as u32;
        self.symbol_ids.insert(name.to_string(), id);
        self.symbols.insert(id, name.to_string());
        id
    }

    // Emission helpers.

    fn emit_reg(&mut self, op: OpKind, reg: u8) {
        self.code.push(op.to_byte());
        self.code.push(reg);
    }

    fn emit_reg_reg(&mut self, op: OpKind, a: u8, b: u8) {
        self.code.push(op.to_byte());
        self.code.push(a);
        self.code.push(b);
    }

    fn emit_reg_reg_reg(&mut self, op: OpKind, a: u8, b: u8, c: u8) {
        self.code.push(op.to_byte());
        self.code.push(a);
        self.code.push(b);
        self.code.push(c);
    }

    fn emit_label(&mut self, op: OpKind, label: u32) {
        self.code.push(op.to_byte());
        write_u32(&mut self.code, label);
    }

    fn emit_reg_label(&mut self, op: OpKind, reg: u8, label: u32) {
        self.code.push(op.to_byte());
        self.code.push(reg);
        write_u32(&mut self.code, label);
    }

    /// Width-matched register-to-register moves for a whole value.
    fn mv_slots(&mut self, dst: u16, src: u16, ty: &Type) -> Result<(), GenError> {
        if dst == src {
            return Ok(());
        }
        let mut widths = Vec::new();
        slot_widths(ty, &mut widths);
        for (index, bits) in widths.iter().enumerate() {
            let op = match bits {
                8 => OpKind::Mv8RegReg,
                16 => OpKind::Mv16RegReg,
                32 => OpKind::Mv32RegReg,
                _ => OpKind::Mv64RegReg,
            };
            self.emit_reg_reg(op, (dst as usize + index) as u8, (src as usize + index) as u8);
        }
        Ok(())
    }

    fn gen_block_body(&mut self, block: &Block) -> Result<(u16, usize, Type), GenError> {
        for stmt in &block.stmts {
            self.gen_stmt(stmt)?;
        }
        match &block.result {
            Some(result) => {
                let (base, slots) = self.gen_expr(result)?;
                Ok((base, slots, result.ty()))
            }
            None => Ok((0, 0, Type::Void)),
        }
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), GenError> {
        match stmt {
            Stmt::Declare { name, ty } => {
                self.frames
                    .last_mut()
                    .expect("statement outside any frame")
                    .vars
                    .push(Var {
                        name: name.clone(),
                        ty: ty.clone(),
                        base: None,
                    });
                Ok(())
            }
            Stmt::Set {
                target,
                name,
                value,
            } => self.gen_set(target, name, value),
            Stmt::Branch { cond, on_zero } => {
                let (reg, slots) = self.gen_expr(cond)?;
                if slots != 1 {
                    return Err(GenError::new("branch condition must be single-register"));
                }
                self.emit_reg_label(OpKind::JrzRegI32, reg as u8, on_zero.0);
                Ok(())
            }
            Stmt::Jump(label) => {
                self.emit_label(OpKind::JmprI32, label.0);
                Ok(())
            }
            Stmt::Mark(label) => {
                self.emit_label(OpKind::LblUi32, label.0);
                Ok(())
            }
            Stmt::Eval(expr) => {
                self.gen_expr(expr)?;
                Ok(())
            }
        }
    }

    fn gen_set(&mut self, target: &Access, name: &str, value: &Expr) -> Result<(), GenError> {
        let (vbase, _) = self.gen_expr(value)?;
        let value_ty = value.ty();

        let frame_index = self
            .frames
            .len()
            .checked_sub(1 + target.distance as usize)
            .ok_or_else(|| {
                GenError::new(format!("`{name}` resolves outside the current function frame"))
            })?;
        let var_index = self.frames[frame_index]
            .vars
            .iter()
            .rposition(|v| v.name == name)
            .ok_or_else(|| GenError::new(format!("store to unknown binding `{name}`")))?;

        let (var_ty, var_base) = {
            let var = &self.frames[frame_index].vars[var_index];
            (var.ty.clone(), var.base)
        };
        let var_base = match var_base {
            Some(base) => base,
            None => {
                if target.distance != 0 {
                    return Err(GenError::new(format!(
                        "binding `{name}` is stored before its declaring frame assigned it"
                    )));
                }
                let base = self.alloc(var_ty.slot_count())?;
                self.frames[frame_index].vars[var_index].base = Some(base);
                base
            }
        };

        let (slot_offset, _elem_ty) = project_slots(&var_ty, &target.offsets, name)?;
        self.mv_slots(var_base + slot_offset as u16, vbase, &value_ty)?;
        Ok(())
    }

    /// Reads a variable's registers in place.
    fn gen_var(&self, access: &Access, name: &str) -> Result<(u16, usize), GenError> {
        let frame_index = self
            .frames
            .len()
            .checked_sub(1 + access.distance as usize)
            .ok_or_else(|| {
                GenError::new(format!(
                    "`{name}` resolves outside the current function frame; \
                     cross-frame access is not supported"
                ))
            })?;
        let var = self.frames[frame_index]
            .vars
            .iter()
            .rev()
            .find(|v| v.name == name)
            .ok_or_else(|| GenError::new(format!("read of unknown binding `{name}`")))?;
        let base = var
            .base
            .ok_or_else(|| GenError::new(format!("read of `{name}` before its first store")))?;
        let (slot_offset, elem_ty) = project_slots(&var.ty, &access.offsets, name)?;
        Ok((base + slot_offset as u16, elem_ty.slot_count()))
    }

    fn gen_expr(&mut self, expr: &Expr) -> Result<(u16, usize), GenError> {
        match expr {
            Expr::Var { access, name, .. } => self.gen_var(access, name),
            Expr::Lit(lit) => self.gen_lit(lit),
            Expr::Binary { op, lhs, rhs, .. } => {
                let (a, _) = self.gen_expr(lhs)?;
                let (b, _) = self.gen_expr(rhs)?;
                let dst = self.alloc(1)?;
                self.emit_reg_reg_reg(binop_kind(*op), dst as u8, a as u8, b as u8);
                Ok((dst, 1))
            }
            Expr::Call {
                callee,
                arg,
                arg_ty,
                ret_ty,
            } => self.gen_call(callee, arg, arg_ty, ret_ty),
            Expr::Tuple { items, ty } => {
                let total = ty.slot_count();
                let dst = self.alloc(total)?;
                let mut offset = 0usize;
                for item in items {
                    let item_ty = item.ty();
                    let (src, slots) = self.gen_expr(item)?;
                    self.mv_slots(dst + offset as u16, src, &item_ty)?;
                    offset += slots.max(item_ty.slot_count());
                }
                Ok((dst, total))
            }
            Expr::ArrayValue { items, elem_ty } => {
                let elem_slots = elem_ty.slot_count();
                let dst = self.alloc(elem_slots * items.len())?;
                for (index, item) in items.iter().enumerate() {
                    let (src, _) = self.gen_expr(item)?;
                    self.mv_slots(dst + (index * elem_slots) as u16, src, elem_ty)?;
                }
                Ok((dst, elem_slots * items.len()))
            }
            Expr::ArrayIndex {
                base,
                index,
                elem_ty,
            } => {
                let (b, _) = self.gen_expr(base)?;
                let offset = *index as usize * elem_ty.slot_count();
                Ok((b + offset as u16, elem_ty.slot_count()))
            }
            Expr::Reference { inner } => {
                // References are pointer-width single-slot values; copy
                // with a register-to-register move.
                let (r, _) = self.gen_expr(inner)?;
                let dst = self.alloc(1)?;
                self.emit_reg_reg(OpKind::Mv64RegReg, dst as u8, r as u8);
                Ok((dst, 1))
            }
            Expr::Block(block) => {
                self.push_frame();
                let (base, slots, ty) = self.gen_block_body(block)?;
                self.pop_frame();
                if slots == 0 {
                    return Ok((base, 0));
                }
                let dst = self.alloc(slots)?;
                self.mv_slots(dst, base, &ty)?;
                Ok((dst, slots))
            }
        }
    }

    fn gen_lit(&mut self, lit: &Lit) -> Result<(u16, usize), GenError> {
        match lit {
            Lit::Int { value, kind } => {
                let dst = self.alloc(1)?;
                match kind.bits() {
                    8 => {
                        self.code.push(OpKind::MvRegUi8.to_byte());
                        self.code.push(dst as u8);
                        self.code.push(*value as u8);
                    }
                    16 => {
                        self.code.push(OpKind::MvRegUi16.to_byte());
                        self.code.push(dst as u8);
                        crate::write_u16(&mut self.code, *value as u16);
                    }
                    32 => {
                        self.code.push(OpKind::MvRegUi32.to_byte());
                        self.code.push(dst as u8);
                        write_u32(&mut self.code, *value as u32);
                    }
                    _ => {
                        self.code.push(OpKind::MvRegUi64.to_byte());
                        self.code.push(dst as u8);
                        write_u64(&mut self.code, *value as u64);
                    }
                }
                Ok((dst, 1))
            }
            Lit::Bool(value) => {
                let dst = self.alloc(1)?;
                self.code.push(OpKind::MvRegUi8.to_byte());
                self.code.push(dst as u8);
                self.code.push(u8::from(*value));
                Ok((dst, 1))
            }
            Lit::Str(_) => Err(GenError::new(
                "string values have no representation in this instruction set",
            )),
        }
    }

    fn gen_call(
        &mut self,
        callee: &str,
        arg: &Expr,
        arg_ty: &Type,
        ret_ty: &Type,
    ) -> Result<(u16, usize), GenError> {
        if let Some(op) = self.natives.get(callee) {
            let op = *op;
            let (abase, slots) = self.gen_expr(arg)?;
            if slots != 1 {
                return Err(GenError::new(format!(
                    "native `{callee}` takes a single-register argument"
                )));
            }
            self.emit_reg(OpKind::from_native(op), abase as u8);
            return Ok((abase, ret_ty.slot_count()));
        }

        let arg_slots = arg_ty.slot_count();
        let ret_slots = ret_ty.slot_count();
        let window = arg_slots.max(ret_slots).max(1);

        let (vbase, _) = self.gen_expr(arg)?;
        let base = self.alloc(window)?;
        self.mv_slots(base, vbase, arg_ty)?;

        let symbol = self.symbol_id(callee);
        self.code.push(OpKind::CallUi64.to_byte());
        self.code.push(base as u8);
        write_u64(&mut self.code, u64::from(symbol));
        Ok((base, ret_slots))
    }
}

fn binop_kind(op: BinOp) -> OpKind {
    match op {
        BinOp::Add => OpKind::AddRegRegReg,
        BinOp::Sub => OpKind::SubRegRegReg,
        BinOp::Mul => OpKind::MulRegRegReg,
        BinOp::Div => OpKind::DivRegRegReg,
        BinOp::Mod => OpKind::ModRegRegReg,
        BinOp::Eq => OpKind::EqRegRegReg,
        BinOp::Gt => OpKind::GtRegRegReg,
        BinOp::Gte => OpKind::GteRegRegReg,
        BinOp::Lt => OpKind::LtRegRegReg,
        BinOp::Lte => OpKind::LteRegRegReg,
    }
}

/// Per-slot move widths for a value of `ty`.
fn slot_widths(ty: &Type, out: &mut Vec<u32>) {
    match ty {
        Type::Int(kind) => out.push(kind.bits()),
        Type::Bool => out.push(8),
        Type::Str | Type::Reference(_) | Type::Function { .. } => out.push(64),
        Type::Void | Type::Unset => {}
        Type::Product(elems) => {
            for elem in elems {
                slot_widths(elem, out);
            }
        }
        Type::Sum(_) => {
            for _ in 0..ty.slot_count() {
                out.push(64);
            }
        }
        Type::Array { elem, count } => {
            for _ in 0..*count {
                slot_widths(elem, out);
            }
        }
        Type::Nominal { inner, .. } => slot_widths(inner, out),
    }
}

/// Register offset and projected type for a positional offsets list.
fn project_slots(ty: &Type, offsets: &[u32], name: &str) -> Result<(usize, Type), GenError> {
    let mut current = ty.clone();
    let mut slot_offset = 0usize;
    for &index in offsets {
        let (offset, elem) = current.project(index as usize).ok_or_else(|| {
            GenError::new(format!("`{name}` projects into a non-product type"))
        })?;
        slot_offset += offset;
        current = elem.clone();
    }
    Ok((slot_offset, current))
}
