// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The assembly session: one in-memory program being assembled.
//!
//! The session owns the section list, the symbol table, the reporter, and
//! the active CPU backend. The front end drives it through the atom and
//! symbol construction entry points; [`AssemblySession::resolve`] and
//! [`AssemblySession::finalize`] then run the fixed-point loop and the
//! terminal encoding pass.

mod finalize;
mod resolve;
pub mod cli;
pub mod output;

pub use resolve::{ResolutionState, DEFAULT_PASS_LIMIT};

use crate::core::atom::{atom_size, Atom, AtomKind};
use crate::core::cpu::{AsmCtx, CpuBackend};
use crate::core::error::{AsmErrorKind, Reporter};
use crate::core::expr::Expr;
use crate::core::section::{align_up, Section, SectionId};
use crate::core::symbol::{make_local_label, SymbolId, SymbolTable};

pub struct AssemblySession {
    pub(crate) sections: Vec<Section>,
    pub(crate) symbols: SymbolTable,
    pub(crate) reporter: Reporter,
    pub(crate) backend: Box<dyn CpuBackend>,
    current: Option<SectionId>,
    cur_line: u32,
    pub(crate) pass_limit: u32,
    pub(crate) state: ResolutionState,
    pub(crate) prints: Vec<String>,
    pub(crate) finalized: bool,
    offset_section_count: u32,
}

impl AssemblySession {
    pub fn new(backend: Box<dyn CpuBackend>) -> Self {
        Self {
            sections: Vec::new(),
            symbols: SymbolTable::new(),
            reporter: Reporter::new(),
            backend,
            current: None,
            cur_line: 0,
            pass_limit: DEFAULT_PASS_LIMIT,
            state: ResolutionState::Converging,
            prints: Vec::new(),
            finalized: false,
            offset_section_count: 0,
        }
    }

    /// Set the source line attributed to subsequently constructed atoms
    /// and diagnostics.
    pub fn set_line(&mut self, line: u32) {
        self.cur_line = line;
    }

    pub fn line(&self) -> u32 {
        self.cur_line
    }

    pub fn set_pass_limit(&mut self, limit: u32) {
        self.pass_limit = limit.max(2);
    }

    pub fn set_max_errors(&mut self, max: u32) {
        self.reporter.set_max_errors(max);
    }

    pub fn state(&self) -> ResolutionState {
        self.state
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter {
        &mut self.reporter
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn inst_align(&self) -> u32 {
        self.backend.inst_align()
    }

    pub fn data_align(&self, bitsize: u32) -> u32 {
        self.backend.data_align(bitsize)
    }

    /// Parse a mnemonic and operand expressions through the backend.
    pub fn parse_instruction(
        &mut self,
        mnemonic: &str,
        operands: Vec<Expr>,
    ) -> Result<Box<dyn crate::core::cpu::CpuPayload>, crate::core::cpu::EncodeError> {
        self.backend.parse_instruction(mnemonic, operands)
    }

    /// Parse a backend option directive argument.
    pub fn backend_option(
        &mut self,
        text: &str,
    ) -> Option<Box<dyn crate::core::cpu::CpuPayload>> {
        self.backend.parse_option(text)
    }

    /// Messages produced by print atoms during finalization.
    pub fn take_prints(&mut self) -> Vec<String> {
        std::mem::take(&mut self.prints)
    }

    /// The finished graph plus the reporter, split-borrowed for output
    /// writers.
    pub fn graph_mut(&mut self) -> (&mut [Section], &SymbolTable, &mut Reporter) {
        (&mut self.sections, &self.symbols, &mut self.reporter)
    }

    pub fn error(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.reporter.error(self.cur_line, kind, msg, param);
    }

    pub fn warn(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.reporter.warn(self.cur_line, kind, msg, param);
    }

    // --- sections -------------------------------------------------------

    pub fn find_section(&self, name: &str) -> Option<SectionId> {
        self.sections
            .iter()
            .position(|s| s.name == name)
            .map(|i| SectionId(i as u32))
    }

    /// Find or create a section. Does not switch to it.
    pub fn new_section(&mut self, name: &str, attr: &str, align: u32) -> SectionId {
        if let Some(id) = self.find_section(name) {
            return id;
        }
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section::new(name, attr, align));
        id
    }

    pub fn switch_section(&mut self, name: &str, attr: &str, align: u32) -> SectionId {
        let id = self.new_section(name, attr, align);
        self.current = Some(id);
        id
    }

    pub fn switch_to(&mut self, id: SectionId) {
        self.current = Some(id);
    }

    /// Open a fresh anonymous code section starting at `org` and switch to
    /// it, as an `org` directive does.
    pub fn new_org(&mut self, org: i64) -> SectionId {
        let name = format!("seg{org:x}");
        let id = self.new_section(&name, "acrwx", 1);
        let sec = &mut self.sections[id.index()];
        sec.org = org;
        sec.pc = org;
        self.current = Some(id);
        id
    }

    /// Switch to an unallocated offset section, creating it on demand.
    /// Anonymous offset sections get a unique generated name.
    pub fn switch_offset_section(&mut self, name: Option<&str>, offset: Option<i64>) -> SectionId {
        let generated;
        let name = match name {
            Some(n) => n,
            None => {
                if offset.is_some() {
                    self.offset_section_count += 1;
                }
                generated = format!("OFFSET{:06}", self.offset_section_count);
                &generated
            }
        };
        let id = self.new_section(name, "u", 1);
        let sec = &mut self.sections[id.index()];
        sec.flags.unallocated = true;
        if let Some(offset) = offset {
            sec.org = offset;
            sec.pc = offset;
        }
        self.current = Some(id);
        id
    }

    pub fn current_section(&self) -> Option<SectionId> {
        self.current
    }

    /// The current section, creating the default code section when no
    /// section has been opened yet.
    pub fn default_section(&mut self) -> SectionId {
        match self.current {
            Some(id) => id,
            None => self.switch_section("text", "acrwx", 1),
        }
    }

    pub fn current_pc(&mut self) -> i64 {
        let id = self.default_section();
        self.sections[id.index()].pc
    }

    // --- symbols --------------------------------------------------------

    /// Create-or-fetch a symbol as an import.
    pub fn import(&mut self, name: &str) -> SymbolId {
        self.symbols.import(name)
    }

    /// Define `name` as a label at the current section and pc. A
    /// conflicting definition is reported and the existing symbol
    /// returned.
    pub fn define_label(&mut self, name: &str) -> SymbolId {
        let sec = self.default_section();
        let section = &mut self.sections[sec.index()];
        section.flags.has_symbols = true;
        let mangled;
        let name = if section.flags.labels_are_local {
            mangled = make_local_label(&section.name, name);
            &mangled
        } else {
            name
        };
        let pc = section.pc;
        match self.symbols.define_label(name, sec, pc) {
            Ok(id) => id,
            Err(err) => {
                self.error(AsmErrorKind::Symbol, "symbol redefined", Some(&err.name));
                self.symbols.lookup(name).unwrap_or_else(|| self.symbols.import(name))
            }
        }
    }

    /// Define `name` as an expression-valued symbol. The tree is folded
    /// first so constant equates stay cheap to re-evaluate.
    pub fn define_equate(&mut self, name: &str, mut expr: Expr) -> SymbolId {
        expr.simplify(&self.symbols, &mut self.reporter, self.cur_line);
        match self.symbols.define_equate(name, expr) {
            Ok(id) => id,
            Err(err) => {
                self.error(AsmErrorKind::Symbol, "symbol redefined", Some(&err.name));
                self.symbols.lookup(name).unwrap_or_else(|| self.symbols.import(name))
            }
        }
    }

    /// Fold an expression in place against the current symbol table.
    pub fn simplify_expr(&mut self, e: &mut Expr) {
        e.simplify(&self.symbols, &mut self.reporter, self.cur_line);
    }

    /// Evaluate an expression at the current section and pc.
    pub fn eval_expr(&mut self, e: &Expr) -> crate::core::expr::EvalValue {
        let sec = self.current;
        let pc = sec.map(|s| self.sections[s.index()].pc).unwrap_or(0);
        let mut ctx = AsmCtx::new(
            &self.symbols,
            &self.sections,
            &mut self.reporter,
            sec,
            pc,
            self.cur_line,
            false,
        );
        ctx.eval(e)
    }

    /// A fresh internal label at the current section and pc.
    pub fn temp_label(&mut self) -> SymbolId {
        let sec = self.default_section();
        let pc = self.sections[sec.index()].pc;
        self.sections[sec.index()].flags.has_symbols = true;
        self.symbols.temp_label(sec, pc)
    }

    pub fn mark_exported(&mut self, name: &str) {
        let id = self.import(name);
        self.symbols.get_mut(id).flags.exported = true;
    }

    pub fn mark_weak(&mut self, name: &str) {
        let id = self.import(name);
        self.symbols.get_mut(id).flags.weak = true;
    }

    // --- atoms ----------------------------------------------------------

    /// Append an atom to `sec` (default: the current section).
    ///
    /// A Label atom at the tail that came from the same source line as an
    /// incoming Instruction/DataDef/Space atom inherits the new atom's
    /// alignment, so the label reports the post-alignment address. The
    /// section pc is advanced by the atom's currently-known size after
    /// alignment; unresolved expressions are not an error here.
    pub fn add_atom(&mut self, sec: Option<SectionId>, mut atom: Atom) {
        let si = match sec.or(self.current) {
            Some(id) => id,
            None => self.default_section(),
        };
        atom.line = self.cur_line;

        if atom.forces_label_alignment() {
            if let Some(prev) = self.sections[si.index()].atoms.last_mut() {
                if matches!(prev.kind, AtomKind::Label(_)) && prev.line == atom.line {
                    prev.align = atom.align;
                }
            }
        }

        let pc = align_up(self.sections[si.index()].pc, atom.align);
        let size = {
            let mut ctx = AsmCtx::new(
                &self.symbols,
                &self.sections,
                &mut self.reporter,
                Some(si),
                pc,
                atom.line,
                false,
            );
            atom_size(&mut atom, self.backend.as_mut(), &mut ctx)
        };
        atom.last_size = size;

        let section = &mut self.sections[si.index()];
        section.pc = pc + size;
        if atom.align > section.align {
            section.align = atom.align;
        }
        section.atoms.push(atom);
    }
}
