// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface and the assembly run driver.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::assembler::output::{writer_by_name, writer_names};
use crate::assembler::AssemblySession;
use crate::core::error::{AsmError, AsmErrorKind, Diagnostic, Reporter, Severity};
use crate::cpus::{backend_by_name, backend_names};
use crate::syntax::assemble_source;

use super::DEFAULT_PASS_LIMIT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiagnosticsFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "atomforge", version, about = "Retargetable assembler")]
pub struct Cli {
    /// Input source file.
    pub input: Option<PathBuf>,

    /// Output file (default: a.out; dump output goes to stdout).
    #[arg(short = 'o', long = "out")]
    pub outfile: Option<PathBuf>,

    /// Output format.
    #[arg(short = 'F', long = "output-format", default_value = "bin")]
    pub format: String,

    /// CPU backend.
    #[arg(long = "cpu", default_value = "demo16")]
    pub cpu: String,

    /// Predefine an expression symbol, name[=value].
    #[arg(short = 'D', long = "define")]
    pub defines: Vec<String>,

    /// Abort after this many errors (0 disables the ceiling).
    #[arg(long = "max-errors", default_value_t = Reporter::DEFAULT_MAX_ERRORS)]
    pub max_errors: u32,

    /// Resolution pass ceiling.
    #[arg(long = "max-passes", default_value_t = DEFAULT_PASS_LIMIT)]
    pub max_passes: u32,

    /// Suppress warnings.
    #[arg(short = 'w', long = "no-warn")]
    pub no_warn: bool,

    /// Suppress statistics and print output.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Diagnostics output format.
    #[arg(long = "diag", value_enum, default_value_t = DiagnosticsFormat::Text)]
    pub diag_format: DiagnosticsFormat,
}

/// Validated run parameters, independent of the filesystem.
pub struct RunConfig {
    pub cpu: String,
    pub format: String,
    pub defines: Vec<String>,
    pub max_errors: u32,
    pub max_passes: u32,
    pub no_warn: bool,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, AsmError> {
        if backend_by_name(&cli.cpu).is_none() {
            let known = backend_names().join(", ");
            return Err(AsmError::new(
                AsmErrorKind::Cli,
                &format!("unknown CPU (known: {known})"),
                Some(&cli.cpu),
            ));
        }
        if writer_by_name(&cli.format).is_none() {
            let known = writer_names().join(", ");
            return Err(AsmError::new(
                AsmErrorKind::Cli,
                &format!("unknown output format (known: {known})"),
                Some(&cli.format),
            ));
        }
        Ok(Self {
            cpu: cli.cpu.clone(),
            format: cli.format.clone(),
            defines: cli.defines.clone(),
            max_errors: cli.max_errors,
            max_passes: cli.max_passes,
            no_warn: cli.no_warn,
        })
    }
}

/// Result of one assembly run.
pub struct RunOutcome {
    pub diagnostics: Vec<Diagnostic>,
    pub prints: Vec<String>,
    /// The serialized output; `None` when errors suppressed it.
    pub image: Option<Vec<u8>>,
    /// (name, size) of every emitted section.
    pub section_sizes: Vec<(String, i64)>,
}

fn failed_outcome(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> RunOutcome {
    RunOutcome {
        diagnostics: vec![Diagnostic::new(
            0,
            Severity::Error,
            AsmError::new(kind, msg, param),
        )],
        prints: Vec::new(),
        image: None,
        section_sizes: Vec::new(),
    }
}

impl RunOutcome {
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count()
    }

    pub fn succeeded(&self) -> bool {
        self.image.is_some()
    }
}

/// Assemble `source` under `config`. Filesystem-free so the driver can be
/// exercised directly.
pub fn run_source(config: &RunConfig, source: &str) -> RunOutcome {
    let backend = match backend_by_name(&config.cpu) {
        Some(backend) => backend,
        None => return failed_outcome(AsmErrorKind::Cli, "unknown CPU", Some(&config.cpu)),
    };
    let mut writer = match writer_by_name(&config.format) {
        Some(writer) => writer,
        None => {
            return failed_outcome(AsmErrorKind::Cli, "unknown output format", Some(&config.format))
        }
    };
    let mut session = AssemblySession::new(backend);
    session.set_max_errors(config.max_errors);
    session.set_pass_limit(config.max_passes);
    session.reporter_mut().set_no_warn(config.no_warn);

    for define in &config.defines {
        let (name, value) = match define.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (define.trim(), "1"),
        };
        assemble_source(&mut session, &format!("{name} = {value}"));
    }

    assemble_source(&mut session, source);

    let mut fatal = None;
    if session.reporter().error_count() == 0 {
        if let Err(err) = session.resolve() {
            fatal = Some(err);
        }
    }
    if fatal.is_none() && session.reporter().error_count() == 0 {
        if let Err(err) = session.finalize() {
            fatal = Some(err);
        }
    }

    let mut image = None;
    if fatal.is_none() && session.reporter().error_count() == 0 {
        let mut buf = Vec::new();
        let (sections, symbols, reporter) = session.graph_mut();
        let io_result = writer.write(&mut buf, sections, symbols, reporter);
        if io_result.is_ok() && session.reporter().error_count() == 0 {
            image = Some(buf);
        }
    }

    let section_sizes = session
        .sections()
        .iter()
        .map(|s| (s.name.clone(), s.size()))
        .collect();
    let prints = session.take_prints();
    let mut diagnostics = session.reporter_mut().take_diagnostics();
    if let Some(fatal) = fatal {
        diagnostics.push(Diagnostic::new(
            0,
            Severity::Error,
            AsmError::new(fatal.kind(), fatal.message(), None),
        ));
    }

    RunOutcome {
        diagnostics,
        prints,
        image,
        section_sizes,
    }
}
