// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! `demo16`: a synthetic word-aligned 16-bit backend.
//!
//! This backend models no historical instruction set. It exists to
//! exercise the backend contract end to end: instructions are 2-byte
//! aligned, data is little-endian, and `bra` picks a short (2-byte) or
//! long (4-byte) encoding depending on the distance to its target, which
//! is what drives the resolution engine through multiple passes.
//!
//! Instruction forms:
//!   nop           00 00
//!   halt          00 ff
//!   ldi  <expr>   10 00 <lo> <hi>
//!   jmp  <expr>   20 00 <lo> <hi>
//!   bra  <expr>   30 <rel8>            same-section target in range
//!                 31 00 <lo> <hi>      otherwise

use std::any::Any;

use crate::core::atom::{DataBlock, DataDef};
use crate::core::cpu::{AsmCtx, CpuBackend, CpuPayload, EncodeError};
use crate::core::error::AsmErrorKind;
use crate::core::expr::{BaseSym, Expr, ExprBase};
use crate::core::reloc::{Reloc, RelocKind};

#[derive(Debug, Clone)]
enum Op {
    Nop,
    Halt,
    Ldi(Expr),
    Jmp(Expr),
    Bra(Expr),
}

#[derive(Debug, Clone)]
struct DemoInst {
    op: Op,
}

impl CpuPayload for DemoInst {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn CpuPayload> {
        Box::new(self.clone())
    }
    fn describe(&self) -> String {
        match &self.op {
            Op::Nop => "nop".to_string(),
            Op::Halt => "halt".to_string(),
            Op::Ldi(_) => "ldi <expr>".to_string(),
            Op::Jmp(_) => "jmp <expr>".to_string(),
            Op::Bra(_) => "bra <expr>".to_string(),
        }
    }
}

/// Backend option marker: toggles branch optimization.
#[derive(Debug, Clone)]
struct DemoOpts {
    branch_opt: bool,
}

impl CpuPayload for DemoOpts {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn CpuPayload> {
        Box::new(self.clone())
    }
    fn describe(&self) -> String {
        format!("opt branch={}", if self.branch_opt { "on" } else { "off" })
    }
}

pub struct DemoCpu {
    branch_opt: bool,
}

impl DemoCpu {
    pub fn new() -> Self {
        Self { branch_opt: true }
    }

    /// Build the option marker payload for `.opt branch,on|off`.
    pub fn branch_opt_marker(on: bool) -> Box<dyn CpuPayload> {
        Box::new(DemoOpts { branch_opt: on })
    }

    fn branch_size(&self, target: &Expr, ctx: &mut AsmCtx) -> i64 {
        if !self.branch_opt || ctx.near_ceiling() {
            // Frozen on the conservative form so the encoding cannot
            // oscillate between passes.
            return 4;
        }
        let v = ctx.eval(target);
        match ctx.find_base(target) {
            ExprBase::Direct(base) if base.section(ctx).is_some() && base.section(ctx) == ctx.sec => {
                let dist = v.value - (ctx.pc + 2);
                if (-0x80..=0x7f).contains(&dist) {
                    2
                } else {
                    4
                }
            }
            _ => 4,
        }
    }

    /// Opcode word followed by a 16-bit absolute value, relocated when the
    /// expression does not evaluate to a constant.
    fn encode_abs16(&self, opcode: u8, value: &Expr, ctx: &mut AsmCtx) -> DataBlock {
        let mut db = DataBlock::from_bytes(vec![opcode, 0x00, 0, 0]);
        let v = ctx.eval(value);
        if !v.constant {
            match ctx.find_base(value) {
                ExprBase::Direct(BaseSym::Sym(sym)) => {
                    db.relocs.push(Reloc::new(RelocKind::Abs, sym, v.value, 16, 16));
                }
                ExprBase::PcRel(BaseSym::Sym(sym)) => {
                    db.relocs.push(Reloc::new(RelocKind::Pc, sym, v.value, 16, 16));
                }
                ExprBase::Direct(BaseSym::CurPc) => {
                    // The pc itself is final here; the value stands.
                }
                _ => ctx.error(AsmErrorKind::Reloc, "illegal relocation", None),
            }
        }
        check_range(v.value, 16, ctx);
        db.data[2] = (v.value & 0xff) as u8;
        db.data[3] = ((v.value >> 8) & 0xff) as u8;
        db
    }

    fn encode_branch(&self, target: &Expr, ctx: &mut AsmCtx) -> DataBlock {
        if self.branch_size(target, ctx) == 2 {
            let v = ctx.eval(target);
            let dist = v.value - (ctx.pc + 2);
            // Relative branch within the section requires no relocation.
            DataBlock::from_bytes(vec![0x30, (dist & 0xff) as u8])
        } else {
            self.encode_abs16(0x31, target, ctx)
        }
    }
}

impl Default for DemoCpu {
    fn default() -> Self {
        Self::new()
    }
}

fn check_range(val: i64, bits: u32, ctx: &mut AsmCtx) {
    let (lo, hi) = match bits {
        8 => (-0x80, 0xff),
        16 => (-0x8000, 0xffff),
        _ => return,
    };
    if val < lo || val > hi {
        ctx.error(
            AsmErrorKind::Instruction,
            &format!("operand doesn't fit into {bits} bits"),
            None,
        );
    }
}

fn downcast(inst: &dyn CpuPayload) -> &DemoInst {
    inst.as_any()
        .downcast_ref::<DemoInst>()
        .unwrap_or_else(|| panic!("foreign payload handed to demo16 backend"))
}

impl CpuBackend for DemoCpu {
    fn name(&self) -> &'static str {
        "demo16"
    }

    fn inst_align(&self) -> u32 {
        2
    }

    fn data_align(&self, bitsize: u32) -> u32 {
        if bitsize >= 16 {
            2
        } else {
            1
        }
    }

    fn parse_instruction(
        &mut self,
        mnemonic: &str,
        mut operands: Vec<Expr>,
    ) -> Result<Box<dyn CpuPayload>, EncodeError> {
        let lower = mnemonic.to_ascii_lowercase();
        let op = match lower.as_str() {
            "nop" | "halt" => {
                if !operands.is_empty() {
                    return Err(EncodeError::new(format!("{lower} takes no operand")));
                }
                if lower == "nop" {
                    Op::Nop
                } else {
                    Op::Halt
                }
            }
            "ldi" | "jmp" | "bra" => {
                if operands.len() != 1 {
                    return Err(EncodeError::new(format!("{lower} takes one operand")));
                }
                let e = operands.remove(0);
                match lower.as_str() {
                    "ldi" => Op::Ldi(e),
                    "jmp" => Op::Jmp(e),
                    _ => Op::Bra(e),
                }
            }
            _ => {
                return Err(EncodeError::new(format!("unknown mnemonic: {mnemonic}")));
            }
        };
        Ok(Box::new(DemoInst { op }))
    }

    fn instruction_size(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> i64 {
        match &downcast(inst).op {
            Op::Nop | Op::Halt => 2,
            Op::Ldi(_) | Op::Jmp(_) => 4,
            Op::Bra(target) => self.branch_size(target, ctx),
        }
    }

    fn encode_instruction(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> DataBlock {
        match &downcast(inst).op {
            Op::Nop => DataBlock::from_bytes(vec![0x00, 0x00]),
            Op::Halt => DataBlock::from_bytes(vec![0x00, 0xff]),
            Op::Ldi(e) => self.encode_abs16(0x10, e, ctx),
            Op::Jmp(e) => self.encode_abs16(0x20, e, ctx),
            Op::Bra(e) => self.encode_branch(e, ctx),
        }
    }

    fn eval_data(&mut self, def: &DataDef, ctx: &mut AsmCtx) -> DataBlock {
        let bytes = (def.bitsize as usize + 7) / 8;
        let mut db = DataBlock::from_bytes(vec![0; bytes]);
        if !matches!(def.bitsize, 8 | 16 | 32) {
            ctx.error(
                AsmErrorKind::Instruction,
                &format!("data size {} not supported", def.bitsize),
                None,
            );
            return db;
        }
        let v = ctx.eval(&def.value);
        if !v.constant {
            match ctx.find_base(&def.value) {
                ExprBase::Direct(BaseSym::Sym(sym)) => {
                    db.relocs
                        .push(Reloc::new(RelocKind::Abs, sym, v.value, def.bitsize, 0));
                }
                ExprBase::PcRel(BaseSym::Sym(sym)) => {
                    db.relocs
                        .push(Reloc::new(RelocKind::Pc, sym, v.value, def.bitsize, 0));
                }
                _ => ctx.error(AsmErrorKind::Reloc, "illegal relocation", None),
            }
        }
        check_range(v.value, def.bitsize, ctx);
        for (i, byte) in db.data.iter_mut().enumerate() {
            *byte = ((v.value >> (8 * i)) & 0xff) as u8;
        }
        db
    }

    fn parse_option(&mut self, text: &str) -> Option<Box<dyn CpuPayload>> {
        let mut parts = text.split(',').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some(value), None) if name.eq_ignore_ascii_case("branch") => {
                if value.eq_ignore_ascii_case("on") {
                    Some(DemoCpu::branch_opt_marker(true))
                } else if value.eq_ignore_ascii_case("off") {
                    Some(DemoCpu::branch_opt_marker(false))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn apply_options(&mut self, opts: &dyn CpuPayload) {
        if let Some(opts) = opts.as_any().downcast_ref::<DemoOpts>() {
            self.branch_opt = opts.branch_opt;
        }
    }
}
