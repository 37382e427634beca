// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! End-to-end assembly: source text through resolution, finalization, and
//! the output writers.

use atomforge::assembler::output::{BinWriter, DumpWriter, OutputWriter};
use atomforge::assembler::{AssemblySession, ResolutionState};
use atomforge::core::atom::{Atom, AtomKind, DataBlock};
use atomforge::core::error::Severity;
use atomforge::core::reloc::{Reloc, RelocKind};
use atomforge::cpus::demo::DemoCpu;
use atomforge::syntax::assemble_source;

fn session() -> AssemblySession {
    AssemblySession::new(Box::new(DemoCpu::new()))
}

fn assemble(source: &str) -> AssemblySession {
    let mut s = session();
    assemble_source(&mut s, source);
    s
}

fn assemble_ok(source: &str) -> AssemblySession {
    let mut s = assemble(source);
    assert_eq!(
        s.reporter().error_count(),
        0,
        "unexpected parse errors: {:?}",
        s.reporter().diagnostics().iter().map(|d| d.format()).collect::<Vec<_>>()
    );
    s.resolve().expect("resolution converges");
    s.finalize().expect("finalization succeeds");
    s
}

fn bin_image(s: &mut AssemblySession) -> Vec<u8> {
    let mut out = Vec::new();
    let (sections, symbols, reporter) = s.graph_mut();
    BinWriter
        .write(&mut out, sections, symbols, reporter)
        .expect("io");
    assert_eq!(s.reporter().error_count(), 0, "writer reported errors");
    out
}

#[test]
fn space_with_fill_emits_repeated_bytes_without_relocs() {
    let mut s = assemble_ok("  .space 10, $ff\n");
    let sec = &s.sections()[0];
    assert_eq!(sec.atoms.len(), 1);
    match &sec.atoms[0].kind {
        AtomKind::Space(sb) => {
            assert_eq!(sb.total_bytes(), 10);
            assert!(sb.relocs.is_empty());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(bin_image(&mut s), vec![0xff; 10]);
}

#[test]
fn symbolic_space_fill_gets_one_reloc_per_repetition() {
    let mut s = assemble("  .space 2, ext\n");
    s.resolve().expect("resolves");
    s.finalize().expect("finalizes");
    assert_eq!(s.reporter().error_count(), 0);
    let ext = s.symbols().lookup("ext").unwrap();
    match &s.sections()[0].atoms[0].kind {
        AtomKind::Space(sb) => {
            assert_eq!(sb.relocs.len(), 2);
            assert_eq!(sb.relocs[0].sym, ext);
            assert_eq!(sb.relocs[0].offset, 0);
            assert_eq!(sb.relocs[1].offset, 8);
            assert_eq!(sb.relocs[0].kind, RelocKind::Abs);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn non_constant_space_count_fails_at_finalize() {
    let mut s = assemble("  .space ext\n");
    s.resolve().expect("resolves");
    s.finalize().expect("finalize completes");
    assert_eq!(s.reporter().error_count(), 1);
    assert!(s.reporter().diagnostics()[0]
        .message()
        .contains("must be constant"));
}

#[test]
fn branch_growth_scenario_places_label_at_four() {
    // The branch references the label before it is defined. The first
    // pass assumes the short form, placing the label at 2; resizing to
    // the long form moves it to 4, and the next pass confirms.
    let mut s = assemble_ok("  bra l2+$80\nl2:\n  halt\n");
    let l2 = s.symbols().lookup("l2").expect("label exists");
    assert_eq!(s.symbols().get(l2).value(), Some(4));
    assert_eq!(s.sections()[0].atoms[0].last_size, 4);
    let image = bin_image(&mut s);
    assert_eq!(image.len(), 6);
    assert_eq!(image[0], 0x31, "long branch opcode");
}

#[test]
fn division_by_zero_reports_once_and_continues() {
    let mut s = assemble("  .byte 1/0\n  .byte bogus&\n");
    if s.reporter().error_count() == 0 {
        s.resolve().unwrap();
    }
    let errors: Vec<_> = s
        .reporter()
        .diagnostics()
        .iter()
        .filter(|d| d.severity() == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 2, "both independent errors surface");
    assert!(errors.iter().any(|d| d.message().contains("division by zero")));
}

#[test]
fn same_line_label_gets_the_instruction_address() {
    let mut s = assemble_ok("  .byte 1\nentry: nop\n  halt\n");
    let entry = s.symbols().lookup("entry").unwrap();
    // nop is word-aligned, so it sits at 2, not 1 - and so does the label.
    assert_eq!(s.symbols().get(entry).value(), Some(2));
    let image = bin_image(&mut s);
    assert_eq!(image, vec![1, 0, 0x00, 0x00, 0x00, 0xff]);
}

#[test]
fn auto_aligned_instruction_warns() {
    let s = assemble_ok("  .byte 1\n  nop\n");
    assert_eq!(s.reporter().warning_count(), 1);
    assert!(s
        .reporter()
        .diagnostics()
        .iter()
        .any(|d| d.message().contains("auto-aligned")));
}

#[test]
fn symbol_plus_constant_round_trips_through_reloc() {
    let mut s = assemble_ok("  .word ext+4\n");
    let ext = s.symbols().lookup("ext").unwrap();
    match &s.sections()[0].atoms[0].kind {
        AtomKind::Data(db) => {
            assert_eq!(db.relocs.len(), 1);
            let r = &db.relocs[0];
            assert_eq!(r.kind, RelocKind::Abs);
            assert_eq!(r.sym, ext);
            assert_eq!(r.addend, 4);
        }
        other => panic!("unexpected {other:?}"),
    }
    // ext is undefined, so the bin writer must refuse.
    let mut out = Vec::new();
    let (sections, symbols, reporter) = s.graph_mut();
    BinWriter.write(&mut out, sections, symbols, reporter).unwrap();
    assert!(s.reporter().error_count() > 0);
}

#[test]
fn same_section_label_difference_needs_no_reloc() {
    let mut s = assemble_ok("a:\n  .word 1\nb:\n  .word b-a\n");
    match &s.sections()[0].atoms[3].kind {
        AtomKind::Data(db) => {
            assert!(db.relocs.is_empty(), "constant difference, no reloc");
            assert_eq!(db.data, vec![2, 0]);
        }
        other => panic!("unexpected {other:?}"),
    }
    let _ = bin_image(&mut s);
}

#[test]
fn offset_section_defines_pure_constants() {
    let mut s = assemble_ok(
        "  .offset 0\nfld_a:\n  .space 2\nfld_b:\n  .space 4\nfld_size:\n  .section text\n  ldi fld_b\n",
    );
    assert_eq!(s.sections().len(), 1, "offset section dropped");
    let image = bin_image(&mut s);
    // fld_b is the plain constant 2, no relocation.
    assert_eq!(image, vec![0x10, 0x00, 0x02, 0x00]);
}

#[test]
fn rorg_region_uses_relocated_addresses() {
    let mut s =
        assemble_ok("  .byte 1\n  .rorg $100\nin:\n  .byte $aa, $bb\n  .rend\nafter:\n  .byte 2\n");
    let inside = s.symbols().lookup("in").unwrap();
    let after = s.symbols().lookup("after").unwrap();
    // Addresses inside the bracket are computed against the relocation
    // base; the real counter resumes where the region physically ends.
    assert_eq!(s.symbols().get(inside).value(), Some(0x100));
    assert_eq!(s.symbols().get(after).value(), Some(3));
    let image = bin_image(&mut s);
    assert_eq!(image, vec![1, 0xaa, 0xbb, 2]);
}

#[test]
fn failed_assert_reports_with_message() {
    let mut s = assemble("size equ 3\n  .assert size=4, \"size must be 4\"\n  .byte 0\n");
    s.resolve().unwrap();
    s.finalize().unwrap();
    assert_eq!(s.reporter().error_count(), 1);
    let diag = &s.reporter().diagnostics()[0];
    assert!(diag.message().contains("size=4"));
    assert!(diag.message().contains("size must be 4"));
    assert_eq!(diag.line(), 2);
}

#[test]
fn initialized_bss_warns_but_still_writes() {
    let mut s = assemble_ok("  .section zeroed,\"aurw\"\n  .byte 7\n");
    assert_eq!(s.reporter().warning_count(), 1);
    assert_eq!(bin_image(&mut s), vec![7]);
}

#[test]
fn reloc_bounds_violation_is_reported_at_finalize() {
    let mut s = session();
    s.switch_section("text", "acrwx", 1);
    let ext = s.import("ext");
    let mut db = DataBlock::from_bytes(vec![0, 0]);
    // 16 bits at bit offset 8 exceeds the 2-byte block.
    db.relocs.push(Reloc::new(RelocKind::Abs, ext, 0, 16, 8));
    s.add_atom(None, Atom::new_data(db, 1));
    s.resolve().unwrap();
    s.finalize().unwrap();
    assert_eq!(s.reporter().error_count(), 1);
    assert!(s.reporter().diagnostics()[0]
        .message()
        .contains("exceeds data block"));
}

#[test]
fn branch_opt_off_produces_long_branch() {
    let mut s = assemble_ok("  .opt branch,off\n  bra next\nnext:\n");
    assert_eq!(s.sections()[0].atoms[1].last_size, 4);
    let image = bin_image(&mut s);
    assert_eq!(image[0], 0x31);
}

#[test]
fn short_branch_stays_short() {
    let mut s = assemble_ok("loop:\n  nop\n  bra loop\n");
    assert_eq!(s.sections()[0].atoms[2].last_size, 2);
    let image = bin_image(&mut s);
    assert_eq!(image, vec![0x00, 0x00, 0x30, 0xfc]);
}

#[test]
fn dump_writer_renders_the_finished_graph() {
    let mut s = assemble_ok("start:\n  ldi start\n  .space 2, $aa\n");
    let mut out = Vec::new();
    let (sections, symbols, reporter) = s.graph_mut();
    DumpWriter.write(&mut out, sections, symbols, reporter).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("section text"));
    assert!(text.contains("space(2,fill=aa)"));
    assert!(text.contains("start LAB"));
}

#[test]
fn resolution_state_is_visible_after_success() {
    let mut s = assemble("  nop\n");
    s.resolve().unwrap();
    assert_eq!(s.state(), ResolutionState::Converged);
}

#[test]
fn exported_labels_survive_to_the_symbol_table() {
    let s = assemble_ok("  .global entry\nentry:\n  halt\n  .weak maybe\n");
    let entry = s.symbols().lookup("entry").unwrap();
    assert!(s.symbols().get(entry).flags.exported);
    let maybe = s.symbols().lookup("maybe").unwrap();
    assert!(s.symbols().get(maybe).flags.weak);
}
