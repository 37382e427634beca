// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Minimal line-oriented front end.
//!
//! One statement per line: an optional label in the first column, then a
//! directive or mnemonic with comma-separated operands, then an optional
//! `;` comment. No macros, conditionals, or include files - the front end
//! exists to drive the core through its public construction API.
//!
//! Labels starting with `.` are local to the most recent global label.
//! Directives may be written with or without the leading dot.

mod expr;

use crate::assembler::AssemblySession;
use crate::core::atom::{Atom, DataBlock};
use crate::core::error::AsmErrorKind;
use crate::core::expr::Expr;
use crate::core::symbol::make_local_label;

use expr::{parse_const_expr, parse_expr, Cursor, ExprEnv};

/// Parse `source` into the session. Diagnostics land in the session's
/// reporter; the return value is the number of lines consumed.
pub fn assemble_source(session: &mut AssemblySession, source: &str) -> u32 {
    let mut frontend = Frontend {
        session,
        last_global: String::new(),
    };
    let mut count = 0;
    for (idx, raw) in source.lines().enumerate() {
        frontend.session.set_line(idx as u32 + 1);
        frontend.process_line(raw);
        count = idx as u32 + 1;
    }
    count
}

struct Frontend<'a> {
    session: &'a mut AssemblySession,
    last_global: String,
}

const DIRECTIVES: &[&str] = &[
    "align", "assert", "byte", "db", "dl", "ds", "dw", "equ", "global", "line", "long", "offset",
    "opt", "org", "print", "printv", "rend", "rorg", "section", "space", "weak", "word",
];

impl Frontend<'_> {
    fn process_line(&mut self, raw: &str) {
        let line = strip_comment(raw);
        if line.trim().is_empty() {
            return;
        }

        let mut rest = line;
        // A non-blank first column starts a label, unless it is a known
        // dot-directive written without indentation.
        if line.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_' || c == '.') {
            let end = line
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(line.len());
            let name = &line[..end];
            let mut after = &line[end..];
            let had_colon = after.starts_with(':');
            if had_colon {
                after = &after[1..];
            }
            let directive_at_col1 = !had_colon
                && name
                    .strip_prefix('.')
                    .map(|n| DIRECTIVES.contains(&n.to_ascii_lowercase().as_str()))
                    .unwrap_or(false);
            if !directive_at_col1 {
                let trimmed = after.trim_start();
                if let Some(arg) = trimmed.strip_prefix('=') {
                    self.define_equate(name, arg);
                    return;
                }
                if let Some(word) = first_word(trimmed) {
                    if word.eq_ignore_ascii_case("equ") {
                        self.define_equate(name, trimmed[word.len()..].trim_start());
                        return;
                    }
                }
                self.define_label(name);
                rest = after;
            }
        }

        let rest = rest.trim();
        if rest.is_empty() {
            return;
        }
        let (word, args) = match first_word(rest) {
            Some(word) => (word, rest[word.len()..].trim_start()),
            None => {
                self.session
                    .error(AsmErrorKind::Parser, "statement expected", None);
                return;
            }
        };

        if let Some(name) = word.strip_prefix('.') {
            self.directive(&name.to_ascii_lowercase(), args);
        } else {
            let lower = word.to_ascii_lowercase();
            if DIRECTIVES.contains(&lower.as_str()) {
                self.directive(&lower, args);
            } else {
                self.instruction(word, args);
            }
        }
    }

    fn define_label(&mut self, name: &str) {
        let mangled;
        let name = if let Some(local) = name.strip_prefix('.') {
            mangled = make_local_label(&self.last_global, &format!(".{local}"));
            &mangled
        } else {
            self.last_global = name.to_string();
            name
        };
        let sym = self.session.define_label(name);
        self.session.add_atom(None, Atom::new_label(sym));
    }

    fn define_equate(&mut self, name: &str, arg: &str) {
        if let Some((e, _)) = self.parse_operand_expr(arg, false) {
            self.session.define_equate(name, e);
        }
    }

    fn instruction(&mut self, mnemonic: &str, args: &str) {
        let mut operands = Vec::new();
        for field in split_operands(args) {
            match self.parse_operand_expr(field, false) {
                Some((e, _)) => operands.push(e),
                None => return,
            }
        }
        let align = self.session.inst_align();
        match self.session.parse_instruction(mnemonic, operands) {
            Ok(payload) => {
                self.session
                    .add_atom(None, Atom::new_instruction(payload, align));
            }
            Err(err) => {
                self.session
                    .error(AsmErrorKind::Instruction, &err.message, None);
            }
        }
    }

    fn directive(&mut self, name: &str, args: &str) {
        match name {
            "org" => {
                if let Some(v) = self.parse_const(args) {
                    self.session.new_org(v);
                }
            }
            "section" => {
                let mut fields = split_operands(args);
                let name = fields.next().map(str::trim).unwrap_or("");
                if name.is_empty() {
                    self.session
                        .error(AsmErrorKind::Directive, "section name expected", None);
                    return;
                }
                let attr = match fields.next().map(str::trim) {
                    Some(attr) => match parse_quoted(attr) {
                        Some(text) => text,
                        None => attr.to_string(),
                    },
                    None => "acrwx".to_string(),
                };
                self.session.switch_section(name, &attr, 1);
            }
            "offset" => {
                let offset = if args.trim().is_empty() {
                    None
                } else {
                    self.parse_const(args)
                };
                self.session.switch_offset_section(None, offset);
            }
            "align" => {
                if let Some(v) = self.parse_const(args) {
                    if v <= 0 || (v & (v - 1)) != 0 {
                        self.session.error(
                            AsmErrorKind::Directive,
                            "alignment must be a power of two",
                            None,
                        );
                    } else {
                        self.session.add_atom(None, Atom::new_align(v as u32));
                    }
                }
            }
            "byte" | "db" => self.data_directive(args, 8),
            "word" | "dw" => self.data_directive(args, 16),
            "long" | "dl" => self.data_directive(args, 32),
            "space" | "ds" => {
                let mut fields = split_operands(args);
                let count = match fields.next() {
                    Some(field) => match self.parse_operand_expr(field, false) {
                        Some((e, _)) => e,
                        None => return,
                    },
                    None => {
                        self.session
                            .error(AsmErrorKind::Directive, "space count expected", None);
                        return;
                    }
                };
                let fill = match fields.next() {
                    Some(field) => match self.parse_operand_expr(field, true) {
                        Some((e, _)) => Some(e),
                        None => return,
                    },
                    None => None,
                };
                self.session.add_atom(None, Atom::new_space(count, 1, fill));
            }
            "rorg" => {
                if let Some(v) = self.parse_const(args) {
                    self.session.add_atom(None, Atom::new_rorg(v));
                }
            }
            "rend" => {
                self.session.add_atom(None, Atom::new_rorg_end());
            }
            "assert" => {
                let mut fields = split_operands(args);
                let (e, text) = match fields.next() {
                    Some(field) => match self.parse_operand_expr(field, false) {
                        Some(parsed) => parsed,
                        None => return,
                    },
                    None => {
                        self.session
                            .error(AsmErrorKind::Directive, "assertion expected", None);
                        return;
                    }
                };
                let msg = fields
                    .next()
                    .and_then(|field| parse_quoted(field.trim()));
                self.session
                    .add_atom(None, Atom::new_assert(e, text.trim(), msg));
            }
            "print" => match parse_quoted(args.trim()) {
                Some(text) => self.session.add_atom(None, Atom::new_text(&text)),
                None => {
                    self.session
                        .error(AsmErrorKind::Directive, "string expected", None);
                }
            },
            "printv" => {
                if let Some((e, _)) = self.parse_operand_expr(args, false) {
                    self.session.add_atom(None, Atom::new_print_expr(e));
                }
            }
            "opt" => match self.session.backend_option(args.trim()) {
                Some(payload) => self.session.add_atom(None, Atom::new_options(payload)),
                None => {
                    self.session
                        .error(AsmErrorKind::Directive, "unknown option", Some(args.trim()));
                }
            },
            "global" => {
                for field in split_operands(args) {
                    self.session.mark_exported(field.trim());
                }
            }
            "weak" => {
                for field in split_operands(args) {
                    self.session.mark_weak(field.trim());
                }
            }
            "line" => {
                if let Some(v) = self.parse_const(args) {
                    self.session.add_atom(None, Atom::new_srcline(v as u32));
                }
            }
            "equ" => {
                self.session
                    .error(AsmErrorKind::Directive, "equ requires a label", None);
            }
            _ => {
                self.session
                    .error(AsmErrorKind::Directive, "unknown directive", Some(name));
            }
        }
    }

    fn data_directive(&mut self, args: &str, bitsize: u32) {
        let align = self.session.data_align(bitsize);
        for field in split_operands(args) {
            let trimmed = field.trim();
            if bitsize == 8 && trimmed.starts_with('"') {
                match parse_quoted(trimmed) {
                    Some(text) => {
                        let db = DataBlock::from_bytes(text.into_bytes());
                        self.session.add_atom(None, Atom::new_data(db, 1));
                    }
                    None => {
                        self.session
                            .error(AsmErrorKind::Parser, "unterminated string", None);
                        return;
                    }
                }
                continue;
            }
            match self.parse_operand_expr(field, true) {
                Some((e, _)) => {
                    self.session
                        .add_atom(None, Atom::new_datadef(bitsize, e, align));
                }
                None => return,
            }
        }
    }

    /// Parse one operand field. Returns the tree plus the consumed text
    /// (used as assertion source text). `tmplab` materializes `$` as a
    /// temporary label for data contexts.
    fn parse_operand_expr(&mut self, field: &str, tmplab: bool) -> Option<(Expr, String)> {
        let mut cur = Cursor::new(field);
        let mut env = ExprEnv {
            session: &mut *self.session,
            last_global: &self.last_global,
            make_tmp_lab: tmplab,
        };
        match parse_expr(&mut cur, &mut env) {
            Ok(e) => {
                let text = field[..cur.pos()].to_string();
                cur.skip_ws();
                if !cur.at_end() {
                    self.session.error(
                        AsmErrorKind::Parser,
                        "trailing garbage after expression",
                        Some(cur.rest()),
                    );
                    return None;
                }
                Some((e, text))
            }
            Err(err) => {
                self.session.error(AsmErrorKind::Parser, &err.message, None);
                None
            }
        }
    }

    fn parse_const(&mut self, args: &str) -> Option<i64> {
        let mut cur = Cursor::new(args);
        let mut env = ExprEnv {
            session: &mut *self.session,
            last_global: &self.last_global,
            make_tmp_lab: false,
        };
        match parse_const_expr(&mut cur, &mut env) {
            Ok(v) => Some(v),
            Err(err) => {
                self.session
                    .error(AsmErrorKind::Expression, &err.message, None);
                None
            }
        }
    }
}

fn first_word(text: &str) -> Option<&str> {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
        .unwrap_or(text.len());
    if end == 0 {
        None
    } else {
        Some(&text[..end])
    }
}

/// Cut a `;` comment, ignoring semicolons inside string or character
/// literals.
fn strip_comment(line: &str) -> &str {
    let mut in_str = false;
    let mut in_char = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' if !in_char => in_str = !in_str,
            '\'' if !in_str => in_char = !in_char,
            ';' if !in_str && !in_char => return &line[..i],
            _ => {}
        }
    }
    line
}

/// Split an operand list at top-level commas (outside parentheses and
/// string/character literals).
fn split_operands(text: &str) -> impl Iterator<Item = &str> {
    let mut fields = Vec::new();
    if !text.trim().is_empty() {
        let mut depth = 0i32;
        let mut in_str = false;
        let mut in_char = false;
        let mut start = 0;
        for (i, c) in text.char_indices() {
            match c {
                '"' if !in_char => in_str = !in_str,
                '\'' if !in_str => in_char = !in_char,
                '(' if !in_str && !in_char => depth += 1,
                ')' if !in_str && !in_char => depth -= 1,
                ',' if depth == 0 && !in_str && !in_char => {
                    fields.push(&text[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        fields.push(&text[start..]);
    }
    fields.into_iter()
}

/// Parse a double-quoted string with the usual escapes.
fn parse_quoted(text: &str) -> Option<String> {
    let inner = text.strip_prefix('"')?;
    let mut out = String::new();
    let mut chars = inner.chars();
    loop {
        match chars.next()? {
            '"' => break,
            '\\' => match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                c => out.push(c),
            },
            c => out.push(c),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::atom::AtomKind;
    use crate::cpus::demo::DemoCpu;

    fn assemble(source: &str) -> AssemblySession {
        let mut s = AssemblySession::new(Box::new(DemoCpu::new()));
        assemble_source(&mut s, source);
        s
    }

    #[test]
    fn strip_comment_ignores_quoted_semicolons() {
        assert_eq!(strip_comment("  .print \"a;b\" ; note"), "  .print \"a;b\" ");
        assert_eq!(strip_comment("nop ; trailing"), "nop ");
        assert_eq!(strip_comment("'"), "'");
    }

    #[test]
    fn split_operands_honors_parens_and_strings() {
        let fields: Vec<&str> = split_operands("1, (2,3), \"a,b\"").collect();
        assert_eq!(fields, vec!["1", " (2,3)", " \"a,b\""]);
        assert_eq!(split_operands("").count(), 0);
    }

    #[test]
    fn label_and_instruction_on_one_line() {
        let s = assemble("start:  nop\n");
        let atoms = &s.sections()[0].atoms;
        assert_eq!(atoms.len(), 2);
        assert!(matches!(atoms[0].kind, AtomKind::Label(_)));
        assert!(matches!(atoms[1].kind, AtomKind::Instruction(_)));
        assert!(s.symbols().lookup("start").is_some());
    }

    #[test]
    fn equate_lines_define_symbols_without_atoms() {
        let s = assemble("width = 32\ndepth equ width*2\n");
        assert_eq!(s.reporter().error_count(), 0);
        assert!(s.sections().is_empty());
        let id = s.symbols().lookup("depth").unwrap();
        match &s.symbols().get(id).kind {
            crate::core::symbol::SymbolKind::Equate(Expr::Num(64)) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn data_directives_emit_datadefs_and_strings() {
        let s = assemble("  .byte 1, 2, \"ab\"\n  .word $1234\n");
        let atoms = &s.sections()[0].atoms;
        assert_eq!(atoms.len(), 4);
        assert!(matches!(
            atoms[0].kind,
            AtomKind::DataDef(ref d) if d.bitsize == 8
        ));
        assert!(matches!(atoms[2].kind, AtomKind::Data(_)));
        assert!(matches!(
            atoms[3].kind,
            AtomKind::DataDef(ref d) if d.bitsize == 16
        ));
    }

    #[test]
    fn word_directive_is_backend_aligned() {
        let s = assemble("  .byte 1\n  .word 2\n");
        // demo16 aligns 16-bit data to 2; the byte at 0 forces a pad.
        assert_eq!(s.sections()[0].pc, 4);
    }

    #[test]
    fn org_opens_segment_section() {
        let s = assemble("  .org $8000\n  .byte 0\n");
        assert_eq!(s.sections()[0].name, "seg8000");
        assert_eq!(s.sections()[0].org, 0x8000);
    }

    #[test]
    fn local_labels_attach_to_last_global() {
        let s = assemble("main:\n.loop:\n  bra .loop\nnext:\n.loop:\n  nop\n");
        assert_eq!(s.reporter().error_count(), 0, "distinct local scopes");
        assert!(s.symbols().lookup(" main .loop").is_some());
        assert!(s.symbols().lookup(" next .loop").is_some());
    }

    #[test]
    fn offset_directive_switches_to_unallocated_section() {
        let s = assemble("  .offset 0\nfield:\n  .space 4\n");
        assert!(s.sections()[0].flags.unallocated);
    }

    #[test]
    fn unknown_directive_and_mnemonic_are_reported() {
        let s = assemble("  .frobnicate 1\n  mul 2\n");
        assert_eq!(s.reporter().error_count(), 2);
    }

    #[test]
    fn opt_directive_builds_option_atom() {
        let s = assemble("  .opt branch,off\n");
        assert!(matches!(s.sections()[0].atoms[0].kind, AtomKind::Options(_)));
        let s = assemble("  .opt branch,sideways\n");
        assert_eq!(s.reporter().error_count(), 1);
    }

    #[test]
    fn assert_directive_captures_source_text() {
        let s = assemble("  .assert 1=1, \"must hold\"\n");
        match &s.sections()[0].atoms[0].kind {
            AtomKind::Assert(a) => {
                assert_eq!(a.text, "1=1");
                assert_eq!(a.msg.as_deref(), Some("must hold"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn global_marks_symbol_exported() {
        let s = assemble("  .global entry\nentry:\n  nop\n");
        let id = s.symbols().lookup("entry").unwrap();
        assert!(s.symbols().get(id).flags.exported);
        assert!(s.symbols().get(id).is_label());
    }
}
