// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The CPU backend contract and the context handed to backends.
//!
//! A backend provides a size query and an encode operation for opaque
//! instruction payloads, plus a data-evaluation operation for typed plain
//! values. The size query must be repeatable for the same inputs, up to
//! internally cached optimization state that eventually stabilizes; the
//! encode operation runs exactly once per atom in the terminal pass and
//! must reproduce the size most recently reported by the query.

use std::any::Any;
use std::fmt;

use crate::core::atom::{DataBlock, DataDef};
use crate::core::error::{AsmErrorKind, Reporter};
use crate::core::expr::{self, EvalValue, Expr, ExprBase};
use crate::core::section::{Section, SectionId};
use crate::core::symbol::{SymbolId, SymbolTable};

/// Type-erased backend payload: instruction contents and backend option
/// markers. Concrete types are private to their backend, which recovers
/// them via `Any` downcasting.
pub trait CpuPayload: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn clone_box(&self) -> Box<dyn CpuPayload>;
    /// Short human-readable form for dumps.
    fn describe(&self) -> String;
}

impl Clone for Box<dyn CpuPayload> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl fmt::Debug for Box<dyn CpuPayload> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

/// Error returned by instruction parsing or encoding.
#[derive(Debug, Clone)]
pub struct EncodeError {
    pub message: String,
}

impl EncodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EncodeError {}

/// Evaluation context for one point in one section walk.
///
/// Borrows the session's symbol table, section list, and reporter; carries
/// the current section, program counter, source line, and whether this is
/// the terminal pass.
pub struct AsmCtx<'a> {
    pub symbols: &'a SymbolTable,
    pub sections: &'a [Section],
    pub reporter: &'a mut Reporter,
    pub sec: Option<SectionId>,
    pub pc: i64,
    pub line: u32,
    pub final_pass: bool,
    /// Equates currently being evaluated, for cycle detection.
    pub(crate) visiting: Vec<SymbolId>,
}

impl<'a> AsmCtx<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbols: &'a SymbolTable,
        sections: &'a [Section],
        reporter: &'a mut Reporter,
        sec: Option<SectionId>,
        pc: i64,
        line: u32,
        final_pass: bool,
    ) -> Self {
        Self {
            symbols,
            sections,
            reporter,
            sec,
            pc,
            line,
            final_pass,
            visiting: Vec::new(),
        }
    }

    pub fn eval(&mut self, e: &Expr) -> EvalValue {
        expr::eval_expr(e, self)
    }

    pub fn find_base(&mut self, e: &Expr) -> ExprBase {
        expr::find_base(e, self)
    }

    /// Whether the current section was flagged near the pass ceiling.
    /// Backends should then freeze on conservative encodings.
    pub fn near_ceiling(&self) -> bool {
        self.sec
            .map(|s| self.sections[s.index()].flags.near_ceiling)
            .unwrap_or(false)
    }

    pub fn error(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.reporter.error(self.line, kind, msg, param);
    }

    pub fn warn(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.reporter.warn(self.line, kind, msg, param);
    }
}

/// Contract every CPU backend implements.
pub trait CpuBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Alignment of instruction atoms, in address units.
    fn inst_align(&self) -> u32 {
        1
    }

    /// Alignment of data definitions of the given bit width.
    fn data_align(&self, _bitsize: u32) -> u32 {
        1
    }

    fn is_little_endian(&self) -> bool {
        true
    }

    /// Parse a mnemonic plus already-parsed operand expressions into an
    /// opaque instruction payload.
    fn parse_instruction(
        &mut self,
        mnemonic: &str,
        operands: Vec<Expr>,
    ) -> Result<Box<dyn CpuPayload>, EncodeError>;

    /// Size in bytes the instruction occupies at `ctx.pc`. Called in every
    /// resolution pass; results for unchanged inputs must stabilize.
    fn instruction_size(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> i64;

    /// Produce the final bytes and relocations. Called exactly once per
    /// instruction atom, in the terminal pass, and must produce exactly
    /// `instruction_size` bytes for the same position.
    fn encode_instruction(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> DataBlock;

    /// Evaluate a typed data operand (byte/word/long definitions) into
    /// bytes plus relocations. Mirrors the instruction contract for plain
    /// values.
    fn eval_data(&mut self, def: &DataDef, ctx: &mut AsmCtx) -> DataBlock;

    /// Parse the argument of a backend option directive into an option
    /// marker payload, or `None` when the option is not recognized.
    fn parse_option(&mut self, _text: &str) -> Option<Box<dyn CpuPayload>> {
        None
    }

    /// Replay a backend option marker. Invoked for every Options atom in
    /// every pass, so toggles stay positionally correct.
    fn apply_options(&mut self, _opts: &dyn CpuPayload) {}
}
