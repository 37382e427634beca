// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! atomforge: a retargetable assembler core.
//!
//! The crate is organized around an atom-based intermediate
//! representation: the front end appends atoms to sections, the
//! resolution engine iterates label addresses and atom sizes to a fixed
//! point, and a single terminal pass encodes everything into bytes and
//! relocations for a pluggable output writer.

pub mod assembler;
pub mod core;
pub mod cpus;
pub mod syntax;
