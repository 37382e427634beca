// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for atomforge.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::json;

use atomforge::assembler::cli::{run_source, Cli, DiagnosticsFormat, RunConfig, RunOutcome};
use atomforge::core::error::{Diagnostic, Severity};

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(diag: &Diagnostic, format: DiagnosticsFormat) -> String {
    match format {
        DiagnosticsFormat::Json => json!({
            "code": diag.code(),
            "severity": severity_to_str(diag.severity()),
            "message": diag.message(),
            "line": diag.line(),
        })
        .to_string(),
        DiagnosticsFormat::Text => diag.format(),
    }
}

fn emit_diagnostics(outcome: &RunOutcome, format: DiagnosticsFormat) {
    for diag in &outcome.diagnostics {
        eprintln!("{}", format_diagnostic_line(diag, format));
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let input = match &cli.input {
        Some(path) => path.clone(),
        None => {
            eprintln!("no input file specified");
            return ExitCode::FAILURE;
        }
    };
    let source = match std::fs::read_to_string(&input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("could not open {} for input: {err}", input.display());
            return ExitCode::FAILURE;
        }
    };

    let outcome = run_source(&config, &source);
    emit_diagnostics(&outcome, cli.diag_format);
    if !cli.quiet {
        for line in &outcome.prints {
            println!("{line}");
        }
    }

    let image = match outcome.image {
        Some(image) => image,
        None => {
            eprintln!("errors detected, no output written");
            return ExitCode::FAILURE;
        }
    };

    let dump_to_stdout = cli.format.eq_ignore_ascii_case("dump") && cli.outfile.is_none();
    if dump_to_stdout {
        print!("{}", String::from_utf8_lossy(&image));
    } else {
        let outfile = cli.outfile.clone().unwrap_or_else(|| PathBuf::from("a.out"));
        if let Err(err) = std::fs::write(&outfile, &image) {
            eprintln!("could not open {} for output: {err}", outfile.display());
            return ExitCode::FAILURE;
        }
    }

    if !cli.quiet {
        for (name, size) in &outcome.section_sizes {
            println!("{name}:\t{size} byte{}", if *size == 1 { "" } else { "s" });
        }
    }
    ExitCode::SUCCESS
}
