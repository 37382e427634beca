// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Atoms: the units of the intermediate representation.
//!
//! Every atom carries an alignment and the source line that produced it.
//! Instruction and DataDef atoms are converted to Data atoms exactly once,
//! by the terminal pass; the conversion replaces the variant and drops the
//! old payload with it.

use crate::core::cpu::{AsmCtx, CpuBackend, CpuPayload};
use crate::core::error::AsmErrorKind;
use crate::core::expr::{BaseSym, Expr, ExprBase};
use crate::core::reloc::{Reloc, RelocKind};
use crate::core::symbol::SymbolId;

/// Maximum element size of a space fill pattern, in bytes.
pub const SPACE_FILL_MAX: usize = 8;

/// Concrete bytes plus the relocations patching them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataBlock {
    pub data: Vec<u8>,
    pub relocs: Vec<Reloc>,
}

impl DataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            relocs: Vec::new(),
        }
    }

    pub fn size(&self) -> i64 {
        self.data.len() as i64
    }
}

/// Reserved space: `count` elements of `elem_size` bytes, optionally
/// filled with an evaluated pattern.
#[derive(Debug, Clone)]
pub struct SpaceBlock {
    pub count: Expr,
    /// Cached element count from the last evaluation.
    pub space: i64,
    pub elem_size: u32,
    pub fill: Option<Expr>,
    pub fill_bytes: [u8; SPACE_FILL_MAX],
    pub relocs: Vec<Reloc>,
}

impl SpaceBlock {
    pub fn new(count: Expr, elem_size: u32, fill: Option<Expr>) -> Self {
        Self {
            count,
            space: 0,
            elem_size: elem_size.max(1),
            fill,
            fill_bytes: [0; SPACE_FILL_MAX],
            relocs: Vec::new(),
        }
    }

    pub fn total_bytes(&self) -> i64 {
        self.space * self.elem_size as i64
    }
}

/// One typed data operand not yet evaluated to bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DataDef {
    pub bitsize: u32,
    pub value: Expr,
}

/// A compile-time assertion checked with final addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct Assertion {
    pub expr: Expr,
    /// The literal source text of the expression, echoed on failure.
    pub text: String,
    pub msg: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AtomKind {
    /// Names a symbol at the current address.
    Label(SymbolId),
    /// Finished bytes plus relocations.
    Data(DataBlock),
    /// Opaque backend payload, not yet encoded.
    Instruction(Box<dyn CpuPayload>),
    Space(SpaceBlock),
    DataDef(DataDef),
    /// Marks the original source line for debug output.
    SourceLine(u32),
    /// Backend option toggle, replayed in every pass.
    Options(Box<dyn CpuPayload>),
    PrintText(String),
    PrintExpr(Expr),
    /// Start of a region whose addresses are computed relative to a
    /// different base than the section layout.
    RorgStart(i64),
    RorgEnd,
    Assert(Assertion),
}

#[derive(Debug, Clone)]
pub struct Atom {
    pub kind: AtomKind,
    /// Alignment requirement in address units.
    pub align: u32,
    /// Source line for diagnostics.
    pub line: u32,
    /// Size measured by the previous pass, for change detection.
    pub last_size: i64,
}

impl Atom {
    fn new(kind: AtomKind, align: u32) -> Self {
        Self {
            kind,
            align: align.max(1),
            line: 0,
            last_size: 0,
        }
    }

    pub fn new_label(sym: SymbolId) -> Self {
        Self::new(AtomKind::Label(sym), 1)
    }

    pub fn new_data(db: DataBlock, align: u32) -> Self {
        Self::new(AtomKind::Data(db), align)
    }

    pub fn new_instruction(payload: Box<dyn CpuPayload>, align: u32) -> Self {
        Self::new(AtomKind::Instruction(payload), align)
    }

    pub fn new_space(count: Expr, elem_size: u32, fill: Option<Expr>) -> Self {
        Self::new(AtomKind::Space(SpaceBlock::new(count, elem_size, fill)), 1)
    }

    pub fn new_datadef(bitsize: u32, value: Expr, align: u32) -> Self {
        Self::new(AtomKind::DataDef(DataDef { bitsize, value }), align)
    }

    pub fn new_srcline(line: u32) -> Self {
        Self::new(AtomKind::SourceLine(line), 1)
    }

    pub fn new_options(payload: Box<dyn CpuPayload>) -> Self {
        Self::new(AtomKind::Options(payload), 1)
    }

    pub fn new_text(text: &str) -> Self {
        Self::new(AtomKind::PrintText(text.to_string()), 1)
    }

    pub fn new_print_expr(e: Expr) -> Self {
        Self::new(AtomKind::PrintExpr(e), 1)
    }

    pub fn new_rorg(addr: i64) -> Self {
        Self::new(AtomKind::RorgStart(addr), 1)
    }

    pub fn new_rorg_end() -> Self {
        Self::new(AtomKind::RorgEnd, 1)
    }

    pub fn new_assert(expr: Expr, text: &str, msg: Option<String>) -> Self {
        Self::new(
            AtomKind::Assert(Assertion {
                expr,
                text: text.to_string(),
                msg,
            }),
            1,
        )
    }

    /// Alignment-only atom (zero bytes).
    pub fn new_align(align: u32) -> Self {
        Self::new(AtomKind::Space(SpaceBlock::new(Expr::Num(0), 1, None)), align)
    }

    /// True for the variants that can follow a same-line label and force
    /// its alignment.
    pub fn forces_label_alignment(&self) -> bool {
        matches!(
            self.kind,
            AtomKind::Instruction(_) | AtomKind::DataDef(_) | AtomKind::Space(_)
        )
    }
}

/// The current size of an atom at `ctx.pc`, in bytes.
///
/// Marker atoms are zero-sized. Instruction sizing is delegated to the
/// backend; space sizing evaluates the count (and, in the terminal pass,
/// the fill pattern including its relocations).
pub fn atom_size(atom: &mut Atom, backend: &mut dyn CpuBackend, ctx: &mut AsmCtx) -> i64 {
    match &mut atom.kind {
        AtomKind::Label(_)
        | AtomKind::SourceLine(_)
        | AtomKind::Options(_)
        | AtomKind::PrintText(_)
        | AtomKind::PrintExpr(_)
        | AtomKind::RorgStart(_)
        | AtomKind::RorgEnd
        | AtomKind::Assert(_) => 0,
        AtomKind::Data(db) => db.size(),
        AtomKind::Instruction(payload) => backend.instruction_size(payload.as_ref(), ctx),
        AtomKind::Space(sb) => space_size(sb, backend, ctx),
        AtomKind::DataDef(def) => (def.bitsize as i64 + 7) / 8,
    }
}

fn space_size(sb: &mut SpaceBlock, backend: &mut dyn CpuBackend, ctx: &mut AsmCtx) -> i64 {
    let count = ctx.eval(&sb.count);
    if count.constant || !ctx.final_pass {
        sb.space = count.value;
    } else {
        ctx.error(AsmErrorKind::Expression, "expression must be constant", None);
    }

    if ctx.final_pass {
        if let Some(fill) = sb.fill.clone() {
            if sb.elem_size as usize <= SPACE_FILL_MAX {
                let fv = ctx.eval(&fill);
                let mut base: Option<SymbolId> = None;
                if !fv.constant {
                    match ctx.find_base(&fill) {
                        ExprBase::Direct(BaseSym::Sym(sym)) => base = Some(sym),
                        _ => ctx.error(AsmErrorKind::Reloc, "illegal relocation", None),
                    }
                }
                copy_fill_value(
                    &mut sb.fill_bytes,
                    fv.value,
                    sb.elem_size as usize,
                    backend.is_little_endian(),
                );
                if let Some(sym) = base {
                    if sb.relocs.is_empty() {
                        // The base is found once; each repetition gets its
                        // own record at the stepped offset.
                        let bits = sb.elem_size * 8;
                        for i in 0..sb.space {
                            sb.relocs.push(Reloc::new(
                                RelocKind::Abs,
                                sym,
                                fv.value,
                                bits,
                                i as u32 * bits,
                            ));
                        }
                    }
                }
            } else {
                ctx.error(AsmErrorKind::Expression, "expression must be constant", None);
            }
        }
    }

    sb.total_bytes()
}

fn copy_fill_value(dest: &mut [u8; SPACE_FILL_MAX], val: i64, bytes: usize, little_endian: bool) {
    let le = val.to_le_bytes();
    for i in 0..bytes.min(SPACE_FILL_MAX) {
        dest[i] = if little_endian {
            le[i]
        } else {
            le[bytes.min(SPACE_FILL_MAX) - 1 - i]
        };
    }
}
