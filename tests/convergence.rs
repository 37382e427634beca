// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Resolution state machine behavior under hostile sizing functions,
//! driven through the public backend contract.

use std::any::Any;

use atomforge::assembler::{AssemblySession, ResolutionState};
use atomforge::core::atom::{Atom, DataBlock, DataDef};
use atomforge::core::cpu::{AsmCtx, CpuBackend, CpuPayload, EncodeError};
use atomforge::core::error::AsmErrorKind;
use atomforge::core::expr::Expr;

/// Payload whose size depends on the referenced label's address.
#[derive(Clone)]
struct SizeProbe {
    target: Expr,
}

impl CpuPayload for SizeProbe {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn clone_box(&self) -> Box<dyn CpuPayload> {
        Box::new(self.clone())
    }
    fn describe(&self) -> String {
        "probe".to_string()
    }
}

/// A sizing rule with no fixed point: the atom is small exactly when the
/// label it pushes forward sits far, and large when it sits near.
struct ContradictoryCpu {
    /// When set, honor the near-ceiling flag by freezing on the large
    /// form.
    freezes: bool,
}

impl CpuBackend for ContradictoryCpu {
    fn name(&self) -> &'static str {
        "contradictory"
    }

    fn parse_instruction(
        &mut self,
        _mnemonic: &str,
        mut operands: Vec<Expr>,
    ) -> Result<Box<dyn CpuPayload>, EncodeError> {
        Ok(Box::new(SizeProbe {
            target: operands.remove(0),
        }))
    }

    fn instruction_size(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> i64 {
        if self.freezes && ctx.near_ceiling() {
            return 4;
        }
        let probe = inst.as_any().downcast_ref::<SizeProbe>().expect("probe");
        let target = ctx.eval(&probe.target).value;
        if target > 2 {
            2
        } else {
            4
        }
    }

    fn encode_instruction(&mut self, inst: &dyn CpuPayload, ctx: &mut AsmCtx) -> DataBlock {
        let size = self.instruction_size(inst, ctx);
        DataBlock::from_bytes(vec![0; size as usize])
    }

    fn eval_data(&mut self, _def: &DataDef, _ctx: &mut AsmCtx) -> DataBlock {
        DataBlock::new()
    }
}

fn oscillating_session(freezes: bool) -> AssemblySession {
    let mut s = AssemblySession::new(Box::new(ContradictoryCpu { freezes }));
    s.switch_section("text", "acrwx", 1);
    let target = s.import("after");
    let payload = s
        .parse_instruction("probe", vec![Expr::Sym(target)])
        .expect("parses");
    s.add_atom(None, Atom::new_instruction(payload, 1));
    let lab = s.define_label("after");
    s.add_atom(None, Atom::new_label(lab));
    s
}

#[test]
fn contradictory_sizing_fails_within_the_ceiling() {
    let mut s = oscillating_session(false);
    s.set_pass_limit(40);
    let err = s.resolve().expect_err("must not converge");
    assert_eq!(s.state(), ResolutionState::Failed);
    assert_eq!(err.kind(), AsmErrorKind::Resolve);
    assert!(err.message().contains("maximum number of passes"));
    // The failing section is named.
    assert!(err.message().contains("text"));
}

#[test]
fn near_ceiling_flag_lets_a_freezing_backend_converge() {
    let mut s = oscillating_session(true);
    s.set_pass_limit(40);
    let passes = s.resolve().expect("freezing backend settles");
    assert_eq!(s.state(), ResolutionState::Converged);
    assert!(
        passes > 20,
        "convergence only after the soft threshold, got {passes}"
    );
    assert!(s.sections()[0].flags.near_ceiling);
    // Frozen on the conservative encoding.
    assert_eq!(s.sections()[0].atoms[0].last_size, 4);
}

#[test]
fn failed_resolution_reports_fatal_not_infinite_loop() {
    let mut s = oscillating_session(false);
    s.set_pass_limit(1000);
    // Even at the default-sized ceiling this returns promptly.
    assert!(s.resolve().is_err());
}

#[test]
fn converged_state_survives_a_repeat_resolution() {
    let mut s = oscillating_session(true);
    s.set_pass_limit(40);
    s.resolve().expect("converges");
    let passes = s.resolve().expect("idempotent");
    assert_eq!(passes, 1);
    assert_eq!(s.state(), ResolutionState::Converged);
}
