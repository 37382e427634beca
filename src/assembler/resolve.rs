// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! The fixed-point resolution engine.
//!
//! Instruction sizes can depend on the distance to a label, which depends
//! on sizes computed earlier in the same pass. The engine iterates whole
//! program walks until an entire pass changes no label address and no atom
//! size. A change in any section re-walks the whole program: an address
//! discovered late in one section may shift distances in another.

use crate::core::atom::{atom_size, AtomKind};
use crate::core::cpu::AsmCtx;
use crate::core::error::{AsmErrorKind, FatalError};
use crate::core::section::{align_up, SectionId};
use crate::core::symbol::SymbolKind;

use super::AssemblySession;

/// Hard ceiling on whole-program passes before resolution fails.
pub const DEFAULT_PASS_LIMIT: u32 = 1000;

/// Where the resolution engine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    /// Still iterating, below the soft threshold.
    Converging,
    /// More than half the pass budget is spent; sections are flagged so
    /// backends freeze on conservative encodings.
    NearCeiling,
    /// A full pass made no change.
    Converged,
    /// The ceiling was reached without a fixed point.
    Failed,
}

impl AssemblySession {
    /// Iterate to the fixed point. Returns the number of passes used.
    ///
    /// Non-convergence within the pass limit is fatal: an oscillating
    /// construct (e.g. a branch whose optimal encoding flips every pass)
    /// must be reported, never silently sized.
    pub fn resolve(&mut self) -> Result<u32, FatalError> {
        self.state = ResolutionState::Converging;
        let mut pass: u32 = 0;
        let mut last_changed: Option<String> = None;

        loop {
            pass += 1;
            if pass >= self.pass_limit {
                self.state = ResolutionState::Failed;
                let name = last_changed.as_deref().unwrap_or("");
                return Err(FatalError::new(
                    AsmErrorKind::Resolve,
                    "cannot resolve section, maximum number of passes reached",
                    Some(name),
                ));
            }
            if pass >= self.pass_limit / 2 && self.state == ResolutionState::Converging {
                self.state = ResolutionState::NearCeiling;
                for sec in &mut self.sections {
                    sec.flags.near_ceiling = true;
                }
            }

            let mut changed = false;
            for si in 0..self.sections.len() {
                if self.resolve_section_pass(SectionId(si as u32))? {
                    changed = true;
                    last_changed = Some(self.sections[si].name.clone());
                }
                self.reporter.check_overflow()?;
            }

            if self.reporter.error_count() > 0 {
                // Output is suppressed anyway; iterating over broken
                // expressions cannot converge to anything meaningful.
                break;
            }
            if !changed {
                self.state = ResolutionState::Converged;
                break;
            }
        }
        Ok(pass)
    }

    /// One walk over one section. Returns whether anything changed.
    fn resolve_section_pass(&mut self, si: SectionId) -> Result<bool, FatalError> {
        let mut changed = false;
        let mut atoms = std::mem::take(&mut self.sections[si.index()].atoms);
        let mut pc = self.sections[si.index()].org;
        // (real pc, relocation target) while inside a rorg bracket.
        let mut rorg: Option<(i64, i64)> = None;
        let mut fault: Option<FatalError> = None;

        for atom in &mut atoms {
            pc = align_up(pc, atom.align);

            match &atom.kind {
                AtomKind::Options(opts) => self.backend.apply_options(opts.as_ref()),
                AtomKind::RorgStart(target) => {
                    if rorg.is_some() {
                        fault = Some(FatalError::new(
                            AsmErrorKind::Directive,
                            "reloc org is already set",
                            None,
                        ));
                        break;
                    }
                    rorg = Some((pc, *target));
                    pc = *target;
                }
                AtomKind::RorgEnd => {
                    if let Some((real, target)) = rorg.take() {
                        pc = real + (pc - target);
                    }
                }
                AtomKind::Label(sym) => match &mut self.symbols.get_mut(*sym).kind {
                    SymbolKind::Label { value, .. } => {
                        if *value != pc {
                            *value = pc;
                            changed = true;
                        }
                    }
                    _ => {
                        fault = Some(FatalError::new(
                            AsmErrorKind::Internal,
                            "label atom names a non-label symbol",
                            None,
                        ));
                        break;
                    }
                },
                _ => {}
            }

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
                atom_size(atom, self.backend.as_mut(), &mut ctx)
            };
            if size != atom.last_size {
                atom.last_size = size;
                changed = true;
            }
            pc += size;
        }

        let section = &mut self.sections[si.index()];
        section.atoms = atoms;
        section.pc = pc;
        section.resolved_end = pc;
        if let Some(fault) = fault {
            return Err(fault);
        }
        Ok(changed)
    }
}
