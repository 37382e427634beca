// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The terminal pass: one authoritative walk that encodes instructions and
//! data definitions into concrete bytes and relocations.
//!
//! Runs exactly once, after resolution has converged. Unallocated offset
//! sections are dropped first; their labels become constant equates so
//! later references still resolve. Every section's final program counter
//! must reproduce the address the resolution engine computed - a
//! disagreement is an internal fault, never silently patched.

use crate::core::atom::{atom_size, AtomKind, DataBlock};
use crate::core::cpu::AsmCtx;
use crate::core::error::{AsmError, AsmErrorKind, Diagnostic, FatalError, Severity};
use crate::core::expr::{BaseSym, Expr, ExprBase};
use crate::core::section::{align_up, SectionId};
use crate::core::symbol::SymbolKind;

use super::{AssemblySession, ResolutionState};

impl AssemblySession {
    /// Encode every allocated section. See the module docs.
    pub fn finalize(&mut self) -> Result<(), FatalError> {
        if self.state != ResolutionState::Converged {
            return Err(FatalError::new(
                AsmErrorKind::Internal,
                "finalize requires converged resolution",
                None,
            ));
        }
        if self.finalized {
            return Err(FatalError::new(
                AsmErrorKind::Internal,
                "finalize ran twice",
                None,
            ));
        }
        self.finalized = true;

        self.remove_unallocated_sections();
        for si in 0..self.sections.len() {
            self.finalize_section(SectionId(si as u32))?;
            self.reporter.check_overflow()?;
        }
        self.label_expressions();
        Ok(())
    }

    /// Drop offset sections and turn their labels into plain constants.
    /// Remaining sections are compacted, so every stored `SectionId` is
    /// remapped.
    fn remove_unallocated_sections(&mut self) {
        let mut remap: Vec<Option<SectionId>> = Vec::with_capacity(self.sections.len());
        let mut next: u32 = 0;
        for sec in &self.sections {
            if sec.flags.unallocated {
                remap.push(None);
            } else {
                remap.push(Some(SectionId(next)));
                next += 1;
            }
        }

        for i in 0..self.symbols.len() {
            let id = crate::core::symbol::SymbolId(i as u32);
            let sym = self.symbols.get_mut(id);
            if let SymbolKind::Label { section, value } = sym.kind {
                match remap[section.index()] {
                    Some(new) => sym.kind = SymbolKind::Label { section: new, value },
                    None => sym.kind = SymbolKind::Equate(Expr::Num(value)),
                }
            }
        }

        self.current = self
            .current
            .and_then(|id| remap[id.index()]);
        let mut keep = remap.iter();
        self.sections.retain(|_| keep.next().unwrap().is_some());
    }

    fn finalize_section(&mut self, si: SectionId) -> Result<(), FatalError> {
        let is_bss = self.sections[si.index()].is_bss();
        let mut atoms = std::mem::take(&mut self.sections[si.index()].atoms);
        let mut pc = self.sections[si.index()].org;
        let mut rorg: Option<(i64, i64)> = None;
        let mut last_bss_warn: Option<u32> = None;
        let mut fault: Option<FatalError> = None;

        for atom in &mut atoms {
            let oldpc = pc;
            pc = align_up(pc, atom.align);

            match &mut atom.kind {
                AtomKind::RorgStart(target) => {
                    if rorg.is_none() {
                        rorg = Some((pc, *target));
                        pc = *target;
                    }
                }
                AtomKind::RorgEnd => match rorg.take() {
                    Some((real, target)) => pc = real + (pc - target),
                    None => {
                        self.reporter.error(
                            atom.line,
                            AsmErrorKind::Directive,
                            "reloc org was not set",
                            None,
                        );
                    }
                },
                AtomKind::Instruction(payload) => {
                    if pc != oldpc {
                        // Own code so the dedup cannot swallow a later
                        // instruction error on the same line.
                        self.reporter.report(
                            Diagnostic::new(
                                atom.line,
                                Severity::Warning,
                                AsmError::new(
                                    AsmErrorKind::Instruction,
                                    "instruction has been auto-aligned",
                                    None,
                                ),
                            )
                            .with_code("afg452"),
                        );
                    }
                    let db = {
                        let mut ctx = AsmCtx::new(
                            &self.symbols,
                            &self.sections,
                            &mut self.reporter,
                            Some(si),
                            pc,
                            atom.line,
                            true,
                        );
                        self.backend.encode_instruction(payload.as_ref(), &mut ctx)
                    };
                    if db.size() != atom.last_size {
                        fault = Some(FatalError::new(
                            AsmErrorKind::Internal,
                            "encoded instruction size differs from size query",
                            None,
                        ));
                        break;
                    }
                    atom.kind = AtomKind::Data(db);
                }
                AtomKind::DataDef(def) => {
                    let db = {
                        let mut ctx = AsmCtx::new(
                            &self.symbols,
                            &self.sections,
                            &mut self.reporter,
                            Some(si),
                            pc,
                            atom.line,
                            true,
                        );
                        self.backend.eval_data(def, &mut ctx)
                    };
                    if db.size() != atom.last_size {
                        fault = Some(FatalError::new(
                            AsmErrorKind::Internal,
                            "evaluated data size differs from size query",
                            None,
                        ));
                        break;
                    }
                    atom.kind = AtomKind::Data(db);
                }
                AtomKind::Data(_) => {}
                AtomKind::PrintText(text) => {
                    self.prints.push(text.clone());
                }
                AtomKind::PrintExpr(e) => {
                    let e = e.clone();
                    let v = {
                        let mut ctx = AsmCtx::new(
                            &self.symbols,
                            &self.sections,
                            &mut self.reporter,
                            Some(si),
                            pc,
                            atom.line,
                            true,
                        );
                        ctx.eval(&e).value
                    };
                    self.prints.push(format!("{v} (0x{v:x})"));
                }
                AtomKind::Assert(assertion) => {
                    let expr = assertion.expr.clone();
                    let text = assertion.text.clone();
                    let msg = assertion.msg.clone().unwrap_or_default();
                    let v = {
                        let mut ctx = AsmCtx::new(
                            &self.symbols,
                            &self.sections,
                            &mut self.reporter,
                            Some(si),
                            pc,
                            atom.line,
                            true,
                        );
                        ctx.eval(&expr).value
                    };
                    if v == 0 {
                        self.reporter.error(
                            atom.line,
                            AsmErrorKind::Directive,
                            &format!("assertion \"{text}\" failed"),
                            if msg.is_empty() { None } else { Some(&msg) },
                        );
                    }
                }
                AtomKind::Options(opts) => self.backend.apply_options(opts.as_ref()),
                AtomKind::Label(_) | AtomKind::SourceLine(_) | AtomKind::Space(_) => {}
            }

            // Both pre-existing and freshly converted data blocks get the
            // relocation bounds check and the bss audit.
            if let AtomKind::Data(db) = &atom.kind {
                self.check_reloc_bounds(db, atom.line);
                if is_bss
                    && (db.data.iter().any(|&b| b != 0) || !db.relocs.is_empty())
                    && last_bss_warn != Some(atom.line)
                {
                    self.reporter.warn(
                        atom.line,
                        AsmErrorKind::Section,
                        "initialized data in bss",
                        None,
                    );
                    last_bss_warn = Some(atom.line);
                }
            }

            let size = {
                let mut ctx = AsmCtx::new(
                    &self.symbols,
                    &self.sections,
                    &mut self.reporter,
                    Some(si),
                    pc,
                    atom.line,
                    true,
                );
                atom_size(atom, self.backend.as_mut(), &mut ctx)
            };
            pc += size;
        }

        let section = &mut self.sections[si.index()];
        section.atoms = atoms;
        section.pc = pc;
        if let Some(fault) = fault {
            return Err(fault);
        }
        if pc != section.resolved_end {
            let name = section.name.clone();
            return Err(FatalError::new(
                AsmErrorKind::Internal,
                "section end address differs from resolved layout",
                Some(&name),
            ));
        }
        Ok(())
    }

    fn check_reloc_bounds(&mut self, db: &DataBlock, line: u32) {
        for reloc in &db.relocs {
            if !reloc.fits(db.data.len()) {
                self.reporter.error(
                    line,
                    AsmErrorKind::Reloc,
                    "relocation field exceeds data block",
                    None,
                );
            }
        }
    }

    /// Turn equates that reduce to a label base into labels of that base's
    /// section, so writers see them as addresses. Non-relocatable equates
    /// that are not plain constants are reported.
    fn label_expressions(&mut self) {
        let mut updates: Vec<(crate::core::symbol::SymbolId, SymbolKind)> = Vec::new();
        let mut bad: Vec<String> = Vec::new();
        {
            let mut ctx = AsmCtx::new(
                &self.symbols,
                &self.sections,
                &mut self.reporter,
                None,
                0,
                0,
                true,
            );
            for (id, sym) in ctx.symbols.iter() {
                let expr = match &sym.kind {
                    SymbolKind::Equate(e) => e.clone(),
                    _ => continue,
                };
                let v = ctx.eval(&expr);
                if v.constant {
                    continue;
                }
                match ctx.find_base(&expr) {
                    ExprBase::Direct(BaseSym::Sym(base)) => {
                        match ctx.symbols.get(base).section() {
                            Some(section) => updates.push((
                                id,
                                SymbolKind::Label {
                                    section,
                                    value: v.value,
                                },
                            )),
                            // Import-based equates stay symbolic for the
                            // output writer.
                            None => {}
                        }
                    }
                    ExprBase::Direct(BaseSym::CurPc) | ExprBase::PcRel(_) | ExprBase::None => {
                        bad.push(sym.name.clone());
                    }
                }
            }
        }
        for (id, kind) in updates {
            self.symbols.get_mut(id).kind = kind;
        }
        for name in bad {
            self.reporter.error(
                0,
                AsmErrorKind::Symbol,
                "non-relocatable expression in equate",
                Some(&name),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::atom::Atom;
    use crate::core::expr::BinaryOp;
    use crate::cpus::demo::DemoCpu;

    fn session() -> AssemblySession {
        AssemblySession::new(Box::new(DemoCpu::new()))
    }

    fn data(bytes: &[u8]) -> Atom {
        Atom::new_data(DataBlock::from_bytes(bytes.to_vec()), 1)
    }

    #[test]
    fn finalize_requires_convergence() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, data(&[1]));
        assert!(s.finalize().is_err());
    }

    #[test]
    fn finalize_runs_only_once() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, data(&[1]));
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert!(s.finalize().is_err());
    }

    #[test]
    fn offset_section_labels_become_constants() {
        let mut s = session();
        s.switch_offset_section(None, Some(0));
        s.add_atom(None, Atom::new_space(Expr::Num(2), 1, None));
        let field = s.define_label("field2");
        s.add_atom(None, Atom::new_label(field));
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, data(&[0xaa]));
        s.resolve().unwrap();
        s.finalize().unwrap();
        // The offset section is gone; the label survives as a constant.
        assert_eq!(s.sections().len(), 1);
        assert_eq!(s.sections()[0].name, "text");
        match &s.symbols().get(field).kind {
            SymbolKind::Equate(Expr::Num(2)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn section_ids_are_remapped_after_removal() {
        let mut s = session();
        s.switch_offset_section(None, Some(0));
        s.switch_section("text", "acrwx", 1);
        let lab = s.define_label("start");
        s.add_atom(None, Atom::new_label(lab));
        s.add_atom(None, data(&[1, 2]));
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert_eq!(
            s.symbols().get(lab).section(),
            Some(SectionId(0)),
            "label must point at the compacted section index"
        );
    }

    #[test]
    fn assertion_failure_is_recoverable_error_with_text() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, data(&[1]));
        s.set_line(3);
        s.add_atom(
            None,
            Atom::new_assert(
                Expr::binary(BinaryOp::Eq, Expr::Num(1), Expr::Num(2)),
                "1=2",
                Some("sizes must match".to_string()),
            ),
        );
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert_eq!(s.reporter().error_count(), 1);
        let diag = &s.reporter().diagnostics()[0];
        assert!(diag.message().contains("assertion \"1=2\" failed"));
        assert!(diag.message().contains("sizes must match"));
    }

    #[test]
    fn passing_assertion_stays_silent() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, data(&[1]));
        s.add_atom(
            None,
            Atom::new_assert(Expr::binary(BinaryOp::Eq, Expr::Num(1), Expr::Num(1)), "1=1", None),
        );
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert_eq!(s.reporter().error_count(), 0);
    }

    #[test]
    fn initialized_data_in_bss_warns_once_per_line() {
        let mut s = session();
        s.switch_section("bss", "aurw", 1);
        s.set_line(4);
        s.add_atom(None, data(&[0xff]));
        s.add_atom(None, data(&[0x01]));
        s.set_line(5);
        s.add_atom(None, data(&[0, 0]));
        s.resolve().unwrap();
        s.finalize().unwrap();
        // Two initialized atoms on line 4 warn once; zero bytes never warn.
        assert_eq!(s.reporter().warning_count(), 1);
        assert_eq!(s.reporter().error_count(), 0);
    }

    #[test]
    fn print_atoms_collect_messages() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, Atom::new_text("hello"));
        s.add_atom(None, Atom::new_print_expr(Expr::Num(255)));
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert_eq!(s.take_prints(), vec!["hello".to_string(), "255 (0xff)".to_string()]);
    }

    #[test]
    fn unmatched_rorg_end_reports_error() {
        let mut s = session();
        s.switch_section("text", "acrwx", 1);
        s.add_atom(None, Atom::new_rorg_end());
        s.resolve().unwrap();
        s.finalize().unwrap();
        assert_eq!(s.reporter().error_count(), 1);
    }
}
