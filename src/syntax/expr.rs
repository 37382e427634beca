// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Textual expression parsing for the minimal front end.
//!
//! Precedence, loosest first: `||`, `&&`, equality (`=` `==` `!=` `<>`),
//! relational (`<` `>` `<=` `>=`), additive (`+` `-`), `|`, `^`, `&`,
//! multiplicative (`*` `/` `%`), shifts (`<<` `>>`), unary (`+` `-` `!`
//! `~`), primary. Equate symbols are inlined by cloning their trees, so a
//! later re-equation does not rewrite earlier uses.

use crate::assembler::AssemblySession;
use crate::core::atom::Atom;
use crate::core::expr::{BinaryOp, Expr, UnaryOp};
use crate::core::symbol::{make_local_label, SymbolKind};

/// Character cursor over one operand field.
pub(crate) struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub fn peek2(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    pub fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    pub fn at_end(&self) -> bool {
        self.rest().is_empty()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Shared state for one expression parse.
pub(crate) struct ExprEnv<'a> {
    pub session: &'a mut AssemblySession,
    pub last_global: &'a str,
    /// Materialize `$` as a temporary label atom instead of the bare
    /// current-pc marker (used in data contexts, so relocations get a real
    /// symbol to target).
    pub make_tmp_lab: bool,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// Parse one full expression and fold its constant parts.
pub(crate) fn parse_expr(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut e = logical_or(cur, env)?;
    env.session.simplify_expr(&mut e);
    Ok(e)
}

/// Parse an expression that must reduce to a constant right now.
pub(crate) fn parse_const_expr(cur: &mut Cursor, env: &mut ExprEnv) -> Result<i64, ParseError> {
    let e = parse_expr(cur, env)?;
    match e.as_num() {
        Some(v) => Ok(v),
        None => Err(ParseError::new("expression must be constant")),
    }
}

fn logical_or(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = logical_and(cur, env)?;
    cur.skip_ws();
    while cur.peek() == Some('|') && cur.peek2() == Some('|') {
        cur.bump();
        cur.bump();
        cur.skip_ws();
        let right = logical_and(cur, env)?;
        left = Expr::binary(BinaryOp::LogOr, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn logical_and(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = equality(cur, env)?;
    cur.skip_ws();
    while cur.peek() == Some('&') && cur.peek2() == Some('&') {
        cur.bump();
        cur.bump();
        cur.skip_ws();
        let right = equality(cur, env)?;
        left = Expr::binary(BinaryOp::LogAnd, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn equality(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = relational(cur, env)?;
    cur.skip_ws();
    loop {
        let op = if cur.peek() == Some('=') {
            cur.bump();
            cur.eat('=');
            BinaryOp::Eq
        } else if cur.peek() == Some('!') && cur.peek2() == Some('=') {
            cur.bump();
            cur.bump();
            BinaryOp::Ne
        } else if cur.peek() == Some('<') && cur.peek2() == Some('>') {
            cur.bump();
            cur.bump();
            BinaryOp::Ne
        } else {
            break;
        };
        cur.skip_ws();
        let right = relational(cur, env)?;
        left = Expr::binary(op, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn relational(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = additive(cur, env)?;
    cur.skip_ws();
    loop {
        let op = match (cur.peek(), cur.peek2()) {
            (Some('<'), Some('<')) | (Some('<'), Some('>')) => break,
            (Some('>'), Some('>')) => break,
            (Some('<'), Some('=')) => {
                cur.bump();
                cur.bump();
                BinaryOp::Le
            }
            (Some('>'), Some('=')) => {
                cur.bump();
                cur.bump();
                BinaryOp::Ge
            }
            (Some('<'), _) => {
                cur.bump();
                BinaryOp::Lt
            }
            (Some('>'), _) => {
                cur.bump();
                BinaryOp::Gt
            }
            _ => break,
        };
        cur.skip_ws();
        let right = additive(cur, env)?;
        left = Expr::binary(op, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn additive(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = bit_or(cur, env)?;
    cur.skip_ws();
    while let Some(c @ ('+' | '-')) = cur.peek() {
        cur.bump();
        cur.skip_ws();
        let right = bit_or(cur, env)?;
        let op = if c == '+' { BinaryOp::Add } else { BinaryOp::Sub };
        left = Expr::binary(op, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn bit_or(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = bit_xor(cur, env)?;
    cur.skip_ws();
    while cur.peek() == Some('|') && cur.peek2() != Some('|') {
        cur.bump();
        cur.skip_ws();
        let right = bit_xor(cur, env)?;
        left = Expr::binary(BinaryOp::BitOr, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn bit_xor(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = bit_and(cur, env)?;
    cur.skip_ws();
    while cur.peek() == Some('^') {
        cur.bump();
        cur.skip_ws();
        let right = bit_and(cur, env)?;
        left = Expr::binary(BinaryOp::BitXor, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn bit_and(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = multiplicative(cur, env)?;
    cur.skip_ws();
    while cur.peek() == Some('&') && cur.peek2() != Some('&') {
        cur.bump();
        cur.skip_ws();
        let right = multiplicative(cur, env)?;
        left = Expr::binary(BinaryOp::BitAnd, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn multiplicative(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = shift(cur, env)?;
    cur.skip_ws();
    while let Some(c @ ('*' | '/' | '%')) = cur.peek() {
        cur.bump();
        let op = match c {
            '*' => BinaryOp::Mul,
            '/' => {
                if cur.eat('/') {
                    BinaryOp::Mod
                } else {
                    BinaryOp::Div
                }
            }
            _ => BinaryOp::Mod,
        };
        cur.skip_ws();
        let right = shift(cur, env)?;
        left = Expr::binary(op, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn shift(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    let mut left = unary(cur, env)?;
    cur.skip_ws();
    while let (Some(c @ ('<' | '>')), p2) = (cur.peek(), cur.peek2()) {
        if p2 != Some(c) {
            break;
        }
        cur.bump();
        cur.bump();
        cur.skip_ws();
        let right = unary(cur, env)?;
        let op = if c == '<' { BinaryOp::Shl } else { BinaryOp::Shr };
        left = Expr::binary(op, left, right);
        cur.skip_ws();
    }
    Ok(left)
}

fn unary(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    cur.skip_ws();
    match cur.peek() {
        Some('+') => {
            cur.bump();
            primary(cur, env)
        }
        Some('-') => {
            cur.bump();
            Ok(Expr::unary(UnaryOp::Neg, primary(cur, env)?))
        }
        Some('~') => {
            cur.bump();
            Ok(Expr::unary(UnaryOp::Cpl, primary(cur, env)?))
        }
        Some('!') if cur.peek2() != Some('=') => {
            cur.bump();
            Ok(Expr::unary(UnaryOp::Not, primary(cur, env)?))
        }
        _ => primary(cur, env),
    }
}

fn primary(cur: &mut Cursor, env: &mut ExprEnv) -> Result<Expr, ParseError> {
    cur.skip_ws();
    match cur.peek() {
        Some('(') => {
            cur.bump();
            let e = logical_or(cur, env)?;
            cur.skip_ws();
            if !cur.eat(')') {
                return Err(ParseError::new(") expected"));
            }
            Ok(e)
        }
        Some('$') => {
            if cur.peek2().map(|c| c.is_ascii_hexdigit()).unwrap_or(false) {
                cur.bump();
                parse_radix(cur, 16)
            } else {
                cur.bump();
                Ok(current_pc(env))
            }
        }
        Some('%') => {
            cur.bump();
            parse_radix(cur, 2)
        }
        Some('0') if matches!(cur.peek2(), Some('x') | Some('X')) => {
            cur.bump();
            cur.bump();
            parse_radix(cur, 16)
        }
        Some(c) if c.is_ascii_digit() => parse_radix(cur, 10),
        Some('\'') => {
            cur.bump();
            let c = cur
                .bump()
                .ok_or_else(|| ParseError::new("unterminated character constant"))?;
            if !cur.eat('\'') {
                return Err(ParseError::new("character constant too long"));
            }
            Ok(Expr::Num(c as i64))
        }
        Some(c) if is_ident_start(c) => {
            let name = parse_identifier(cur);
            Ok(symbol_ref(&name, env))
        }
        _ => Err(ParseError::new("number or identifier expected")),
    }
}

fn parse_radix(cur: &mut Cursor, radix: u32) -> Result<Expr, ParseError> {
    let start = cur.pos();
    while let Some(c) = cur.peek() {
        if c.is_digit(radix) || c == '_' {
            cur.bump();
        } else {
            break;
        }
    }
    let digits: String = cur.text[start..cur.pos()]
        .chars()
        .filter(|&c| c != '_')
        .collect();
    if digits.is_empty() {
        return Err(ParseError::new("number or identifier expected"));
    }
    i64::from_str_radix(&digits, radix)
        .map(Expr::Num)
        .map_err(|_| ParseError::new(format!("invalid number: {digits}")))
}

fn parse_identifier(cur: &mut Cursor) -> String {
    let start = cur.pos();
    while let Some(c) = cur.peek() {
        if is_ident_char(c) {
            cur.bump();
        } else {
            break;
        }
    }
    cur.text[start..cur.pos()].to_string()
}

fn current_pc(env: &mut ExprEnv) -> Expr {
    if env.make_tmp_lab {
        let sym = env.session.temp_label();
        env.session.add_atom(None, Atom::new_label(sym));
        Expr::Sym(sym)
    } else {
        Expr::CurPc
    }
}

fn symbol_ref(name: &str, env: &mut ExprEnv) -> Expr {
    let mangled;
    let name = if name.starts_with('.') {
        mangled = make_local_label(env.last_global, name);
        &mangled
    } else {
        name
    };
    let id = env.session.import(name);
    // Equate trees are inlined by copy, so the reference captures the
    // equation as it stands on this line.
    if let SymbolKind::Equate(tree) = &env.session.symbols().get(id).kind {
        return tree.clone();
    }
    Expr::Sym(id)
}
