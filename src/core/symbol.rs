// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbols and the symbol table.
//!
//! A symbol is created on first reference (as an import) or first
//! definition (as a label or equate) and is never removed afterwards, only
//! reclassified. The allowed reclassifications are import→label and
//! import→equate; an equate may also be re-equated (`set`-style). Anything
//! else is a redefinition error.

use std::collections::HashMap;

use crate::core::expr::Expr;
use crate::core::section::SectionId;

/// Index of a symbol within the table's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a symbol currently is.
#[derive(Debug, Clone)]
pub enum SymbolKind {
    /// Referenced but not yet defined; may be external.
    Import,
    /// Bound to an address within a section. The value is an absolute
    /// address and may still move between resolution passes.
    Label { section: SectionId, value: i64 },
    /// Bound to an expression tree.
    Equate(Expr),
}

/// ELF-style type tag, usable by output writers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SymbolType {
    #[default]
    Unknown,
    Object,
    Function,
    Section,
    File,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolFlags {
    pub exported: bool,
    pub weak: bool,
    pub common: bool,
    /// Internal symbol created by the assembler itself.
    pub intern: bool,
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub flags: SymbolFlags,
    pub ty: SymbolType,
    /// Optional size expression (e.g. for object symbols).
    pub size: Option<Expr>,
    pub align: u32,
}

impl Symbol {
    fn new(name: &str, kind: SymbolKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            flags: SymbolFlags::default(),
            ty: SymbolType::default(),
            size: None,
            align: 1,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(self.kind, SymbolKind::Import)
    }

    pub fn is_label(&self) -> bool {
        matches!(self.kind, SymbolKind::Label { .. })
    }

    /// The section a label symbol belongs to.
    pub fn section(&self) -> Option<SectionId> {
        match self.kind {
            SymbolKind::Label { section, .. } => Some(section),
            _ => None,
        }
    }

    /// The resolved address of a label symbol.
    pub fn value(&self) -> Option<i64> {
        match self.kind {
            SymbolKind::Label { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// Attempted definition of a name already bound to an incompatible kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedefinitionError {
    pub name: String,
}

/// Arena-backed symbol table with by-name lookup.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>,
    tmp_count: u32,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    fn insert(&mut self, sym: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.by_name.insert(sym.name.clone(), id);
        self.symbols.push(sym);
        id
    }

    /// Create-or-fetch an import. Repeated lookups of the same name are
    /// idempotent and return the existing symbol whatever its kind.
    pub fn import(&mut self, name: &str) -> SymbolId {
        if let Some(id) = self.lookup(name) {
            return id;
        }
        self.insert(Symbol::new(name, SymbolKind::Import))
    }

    /// Define `name` as a label at `value` within `section`.
    pub fn define_label(
        &mut self,
        name: &str,
        section: SectionId,
        value: i64,
    ) -> Result<SymbolId, RedefinitionError> {
        if let Some(id) = self.lookup(name) {
            let sym = self.get_mut(id);
            if !sym.is_import() {
                return Err(RedefinitionError {
                    name: name.to_string(),
                });
            }
            sym.kind = SymbolKind::Label { section, value };
            return Ok(id);
        }
        Ok(self.insert(Symbol::new(name, SymbolKind::Label { section, value })))
    }

    /// Define `name` as an expression-valued symbol. Imports are promoted;
    /// equates may be re-equated; labels may not be redefined.
    pub fn define_equate(&mut self, name: &str, expr: Expr) -> Result<SymbolId, RedefinitionError> {
        if let Some(id) = self.lookup(name) {
            let sym = self.get_mut(id);
            match sym.kind {
                SymbolKind::Import | SymbolKind::Equate(_) => {
                    sym.kind = SymbolKind::Equate(expr);
                    return Ok(id);
                }
                SymbolKind::Label { .. } => {
                    return Err(RedefinitionError {
                        name: name.to_string(),
                    })
                }
            }
        }
        Ok(self.insert(Symbol::new(name, SymbolKind::Equate(expr))))
    }

    /// Create a fresh assembler-internal label. The generated name cannot
    /// collide with user symbols.
    pub fn temp_label(&mut self, section: SectionId, value: i64) -> SymbolId {
        let name = format!(" *tmp{:09}*", self.tmp_count);
        self.tmp_count += 1;
        let mut sym = Symbol::new(&name, SymbolKind::Label { section, value });
        sym.flags.intern = true;
        self.insert(sym)
    }

    /// Imports that never received a definition and are not declared
    /// external-ish (exported, common, weak).
    pub fn undefined_imports(&self) -> Vec<SymbolId> {
        self.iter()
            .filter(|(_, s)| {
                s.is_import() && !(s.flags.exported || s.flags.common || s.flags.weak)
            })
            .map(|(id, _)| id)
            .collect()
    }
}

/// Construct a section-local label name: `" " + scope + " " + name`.
/// The leading blank keeps mangled names out of the user namespace.
pub fn make_local_label(scope: &str, name: &str) -> String {
    format!(" {scope} {name}")
}
