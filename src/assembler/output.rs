// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Output writers: consumers of the finalized section/symbol graph.
//!
//! A writer receives the ordered allocated sections and the full symbol
//! table after the terminal pass. Each writer decides which relocation
//! kinds it can represent; anything else is a write-time error, reported
//! through the shared reporter.

use std::io::{self, Write};

use crate::core::atom::{Atom, AtomKind};
use crate::core::error::{AsmErrorKind, Reporter};
use crate::core::reloc::Reloc;
use crate::core::section::{align_up, Section};
use crate::core::symbol::{SymbolKind, SymbolTable, SymbolType};

pub trait OutputWriter {
    fn name(&self) -> &'static str;

    fn write(
        &mut self,
        out: &mut dyn Write,
        sections: &[Section],
        symbols: &SymbolTable,
        reporter: &mut Reporter,
    ) -> io::Result<()>;
}

/// Look up a writer by CLI name.
pub fn writer_by_name(name: &str) -> Option<Box<dyn OutputWriter>> {
    match name.to_ascii_lowercase().as_str() {
        "bin" => Some(Box::new(BinWriter)),
        "dump" => Some(Box::new(DumpWriter)),
        _ => None,
    }
}

pub fn writer_names() -> &'static [&'static str] {
    &["bin", "dump"]
}

/// Bytes a finalized atom contributes to the image.
fn final_atom_size(atom: &Atom) -> i64 {
    match &atom.kind {
        AtomKind::Data(db) => db.size(),
        AtomKind::Space(sb) => sb.total_bytes(),
        _ => 0,
    }
}

/// Flat binary image. Gaps between sections and alignment padding are
/// filled with zeros. Absolute and pc-relative relocations are acceptable
/// because their placeholder bytes already carry the final values; every
/// other kind cannot be represented in a raw image.
pub struct BinWriter;

impl BinWriter {
    fn check_relocs(&self, relocs: &[Reloc], line: u32, symbols: &SymbolTable, rep: &mut Reporter) {
        use crate::core::reloc::RelocKind::{Abs, None as RNone, Pc};
        for r in relocs {
            if !matches!(r.kind, Abs | Pc | RNone) {
                let name = &symbols.get(r.sym).name;
                rep.error(
                    line,
                    AsmErrorKind::Output,
                    &format!("relocation type <{}> not supported", r.kind.name()),
                    Some(name),
                );
            }
        }
    }
}

impl OutputWriter for BinWriter {
    fn name(&self) -> &'static str {
        "bin"
    }

    fn write(
        &mut self,
        out: &mut dyn Write,
        sections: &[Section],
        symbols: &SymbolTable,
        reporter: &mut Reporter,
    ) -> io::Result<()> {
        for id in symbols.undefined_imports() {
            let name = &symbols.get(id).name;
            reporter.error(0, AsmErrorKind::Output, "undefined symbol", Some(name));
        }

        let mut order: Vec<&Section> = sections.iter().collect();
        order.sort_by_key(|s| s.org);
        for pair in order.windows(2) {
            if pair[1].org < pair[0].pc {
                reporter.error(
                    0,
                    AsmErrorKind::Output,
                    "sections overlap",
                    Some(&pair[1].name),
                );
            }
        }
        if reporter.error_count() > 0 {
            return Ok(());
        }

        let mut image_pc = order.first().map(|s| s.org).unwrap_or(0);
        for sec in order {
            for _ in image_pc..sec.org {
                out.write_all(&[0])?;
            }
            let mut pc = sec.org;
            for atom in &sec.atoms {
                let npc = align_up(pc, atom.align);
                for _ in pc..npc {
                    out.write_all(&[0])?;
                }
                match &atom.kind {
                    AtomKind::Data(db) => {
                        self.check_relocs(&db.relocs, atom.line, symbols, reporter);
                        out.write_all(&db.data)?;
                    }
                    AtomKind::Space(sb) => {
                        self.check_relocs(&sb.relocs, atom.line, symbols, reporter);
                        let fill = &sb.fill_bytes[..sb.elem_size as usize];
                        for _ in 0..sb.space {
                            out.write_all(fill)?;
                        }
                    }
                    _ => {}
                }
                pc = npc + final_atom_size(atom);
            }
            image_pc = pc;
        }
        Ok(())
    }
}

/// Human-readable dump of sections, atoms, relocations, and symbols.
pub struct DumpWriter;

impl DumpWriter {
    fn write_relocs(&self, out: &mut dyn Write, relocs: &[Reloc], symbols: &SymbolTable) -> io::Result<()> {
        for r in relocs {
            writeln!(
                out,
                "        r{}(offset={},size={},mask={:#x},addend={:#x}) {}",
                r.kind.name(),
                r.offset,
                r.size,
                r.mask,
                r.addend,
                symbols.get(r.sym).name,
            )?;
        }
        Ok(())
    }
}

impl OutputWriter for DumpWriter {
    fn name(&self) -> &'static str {
        "dump"
    }

    fn write(
        &mut self,
        out: &mut dyn Write,
        sections: &[Section],
        symbols: &SymbolTable,
        reporter: &mut Reporter,
    ) -> io::Result<()> {
        let _ = reporter;
        for sec in sections {
            writeln!(
                out,
                "section {} (attr=<{}> align={} size={}):",
                sec.name,
                sec.attr,
                sec.align,
                sec.size(),
            )?;
            let mut pc = sec.org;
            for atom in &sec.atoms {
                pc = align_up(pc, atom.align);
                write!(out, "{pc:8x}: ")?;
                match &atom.kind {
                    AtomKind::Label(sym) => {
                        writeln!(out, "label: {}", symbols.get(*sym).name)?;
                    }
                    AtomKind::Data(db) => {
                        write!(out, "data({}):", db.size())?;
                        for b in &db.data {
                            write!(out, " {b:02x}")?;
                        }
                        writeln!(out)?;
                        self.write_relocs(out, &db.relocs, symbols)?;
                    }
                    AtomKind::Instruction(payload) => {
                        writeln!(out, "inst: {}", payload.describe())?;
                    }
                    AtomKind::Space(sb) => {
                        write!(out, "space({},fill=", sb.total_bytes())?;
                        for i in 0..sb.elem_size as usize {
                            write!(out, "{:02x}", sb.fill_bytes[i])?;
                        }
                        writeln!(out, ")")?;
                        self.write_relocs(out, &sb.relocs, symbols)?;
                    }
                    AtomKind::DataDef(def) => {
                        writeln!(out, "datadef({} bits)", def.bitsize)?;
                    }
                    AtomKind::SourceLine(l) => writeln!(out, "line: {l}")?,
                    AtomKind::Options(payload) => writeln!(out, "opts: {}", payload.describe())?,
                    AtomKind::PrintText(t) => writeln!(out, "text: \"{t}\"")?,
                    AtomKind::PrintExpr(_) => writeln!(out, "expr")?,
                    AtomKind::RorgStart(a) => writeln!(out, "rorg: relocate to {a:#x}")?,
                    AtomKind::RorgEnd => writeln!(out, "rorg end")?,
                    AtomKind::Assert(a) => writeln!(out, "assert: {}", a.text)?,
                }
                pc += final_atom_size(atom);
            }
        }

        writeln!(out, "\nsymbols:")?;
        for (_, sym) in symbols.iter() {
            if sym.flags.intern {
                continue;
            }
            write!(out, "  {} ", sym.name)?;
            match &sym.kind {
                SymbolKind::Label { section, value } => write!(
                    out,
                    "LAB ({value:#x}) sec={}",
                    sections
                        .get(section.index())
                        .map(|s| s.name.as_str())
                        .unwrap_or("?"),
                )?,
                SymbolKind::Import => write!(out, "IMP")?,
                SymbolKind::Equate(e) => match e.as_num() {
                    Some(v) => write!(out, "EXPR({v:#x})")?,
                    None => write!(out, "EXPR(complex)")?,
                },
            }
            if sym.flags.exported {
                write!(out, " EXPORT")?;
            }
            if sym.flags.weak {
                write!(out, " WEAK")?;
            }
            if sym.flags.common {
                write!(out, " COMMON")?;
            }
            match sym.ty {
                SymbolType::Unknown => {}
                SymbolType::Object => write!(out, " type=obj")?,
                SymbolType::Function => write!(out, " type=func")?,
                SymbolType::Section => write!(out, " type=sect")?,
                SymbolType::File => write!(out, " type=file")?,
            }
            if let Some(size) = &sym.size {
                match size.as_num() {
                    Some(v) => write!(out, " size={v}")?,
                    None => write!(out, " size=<expr>")?,
                }
            }
            if sym.align > 1 {
                write!(out, " align={}", sym.align)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
