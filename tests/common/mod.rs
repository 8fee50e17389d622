// Copyright (c) 2017-2021 Fabian Schuiki

//! Shared helpers for the integration tests: a reference interpreter used to
//! check behavioral equivalence, and shortcuts to drive the passes.

#![allow(dead_code)]

use ssapre::ir::prelude::*;
use ssapre::ir::InstData;
use ssapre::opt::prelude::*;
use ssapre::pass::{PartialRedundancyElim, SplitCriticalEdges};
use ssapre::{int_ty, IntValue};
use std::collections::HashMap;

/// Initialize logging for a test run.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The outcome of interpreting a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// The returned value, if the function returned one.
    pub result: Option<IntValue>,
    /// The number of computations executed, i.e. instructions that are
    /// neither constants, phis, nor terminators.
    pub computations: usize,
}

/// Interpret a function on concrete arguments.
///
/// Runs at most `fuel` instructions; exceeding it is a test failure.
pub fn interpret(func: &Function, args: &[IntValue], mut fuel: usize) -> Evaluation {
    let mut values: HashMap<Value, IntValue> = func
        .args()
        .zip(args.iter().cloned())
        .collect();
    let mut block = func.entry();
    let mut prev: Option<Block> = None;
    let mut computations = 0;

    loop {
        // Evaluate the phis as a parallel copy before the block body.
        let mut phi_updates = Vec::new();
        for inst in func.layout().insts(block) {
            let data = &func.dfg()[inst];
            if !data.opcode().is_phi() {
                break;
            }
            let pred = prev.expect("phi in entry block");
            let incoming = func
                .dfg()
                .phi_value_for_block(inst, pred)
                .expect("phi has no entry for predecessor");
            let value = values
                .get(&incoming)
                .expect("phi operand not evaluated")
                .clone();
            phi_updates.push((func.dfg().inst_result(inst), value));
        }
        for (value, imm) in phi_updates {
            values.insert(value, imm);
        }

        let mut next = None;
        for inst in func.layout().insts(block) {
            assert!(fuel > 0, "interpreter ran out of fuel");
            fuel -= 1;

            let data = &func.dfg()[inst];
            let opcode = data.opcode();
            if opcode.is_phi() {
                continue;
            }

            let arg = |i: usize| -> &IntValue { &values[&data.args()[i]] };
            let result = match data {
                InstData::ConstInt { imm, .. } => Some(imm.clone()),
                InstData::Unary { .. } if opcode == Opcode::RetValue => {
                    return Evaluation {
                        result: Some(arg(0).clone()),
                        computations,
                    };
                }
                InstData::Nullary { .. } if opcode == Opcode::Ret => {
                    return Evaluation {
                        result: None,
                        computations,
                    };
                }
                InstData::Unary { .. } => {
                    computations += 1;
                    match IntValue::try_unary_op(opcode, arg(0)) {
                        Some(v) => Some(v),
                        None => return Evaluation { result: None, computations },
                    }
                }
                InstData::Binary { .. } => {
                    computations += 1;
                    let folded = IntValue::try_binary_op(opcode, arg(0), arg(1))
                        .or_else(|| IntValue::try_compare_op(opcode, arg(0), arg(1)));
                    match folded {
                        Some(v) => Some(v),
                        // Traps, e.g. division by zero, end the evaluation.
                        None => return Evaluation { result: None, computations },
                    }
                }
                InstData::Ternary { .. } if opcode == Opcode::Sel => {
                    computations += 1;
                    if arg(0).is_zero() {
                        Some(arg(2).clone())
                    } else {
                        Some(arg(1).clone())
                    }
                }
                InstData::Jump { bbs, .. } => {
                    next = Some(bbs[0]);
                    None
                }
                InstData::Branch { bbs, .. } => {
                    next = Some(if arg(0).is_zero() { bbs[1] } else { bbs[0] });
                    None
                }
                _ => panic!("cannot interpret {}", inst.dump(func)),
            };

            if let Some(imm) = result {
                values.insert(func.dfg().inst_result(inst), imm);
            }
        }

        let next = next.expect("block without branch");
        prev = Some(block);
        block = next;
    }
}

/// Split critical edges, run PRE, and verify the result.
pub fn run_pre(func: &mut Function) -> (bool, PassContext) {
    let ctx = PassContext::new();
    SplitCriticalEdges::run_on_function(&ctx, func);
    let changed = PartialRedundancyElim::run_on_function(&ctx, func);
    ssapre::verifier::verify(func);
    (changed, ctx)
}

/// Run PRE a second time; nothing may change.
pub fn assert_idempotent(func: &mut Function) {
    let ctx = PassContext::new();
    let changed = PartialRedundancyElim::run_on_function(&ctx, func);
    ssapre::verifier::verify(func);
    assert!(!changed, "second run of the pass changed the function");
}

/// Check behavioral equivalence of two functions on a set of inputs, and that
/// the optimized one never executes more computations.
pub fn assert_equivalent(before: &Function, after: &Function, inputs: &[Vec<IntValue>]) {
    for input in inputs {
        let b = interpret(before, input, 10_000);
        let a = interpret(after, input, 10_000);
        assert_eq!(b.result, a.result, "behavior differs on input {:?}", input);
        assert!(
            a.computations <= b.computations,
            "optimized function computes more on input {:?}: {} > {}",
            input,
            a.computations,
            b.computations
        );
    }
}

/// Count the instructions with a given opcode.
pub fn count_opcode(func: &Function, opcode: Opcode) -> usize {
    func.layout()
        .blocks()
        .flat_map(|bb| func.layout().insts(bb))
        .filter(|&inst| func.dfg()[inst].opcode() == opcode)
        .count()
}

/// Count all instructions.
pub fn count_insts(func: &Function) -> usize {
    func.layout()
        .blocks()
        .flat_map(|bb| func.layout().insts(bb))
        .count()
}

/// Shortcut to produce a signature of `n` i32 inputs returning i32.
pub fn sig_i32(n: usize) -> Signature {
    let mut sig = Signature::new();
    for _ in 0..n {
        sig.add_input(int_ty(32));
    }
    sig.set_return_type(int_ty(32));
    sig
}

/// Shortcut for 32-bit constants in interpreter inputs.
pub fn i32v(v: isize) -> IntValue {
    IntValue::from_isize(32, v)
}

/// Shortcut for single-bit constants in interpreter inputs.
pub fn i1v(v: usize) -> IntValue {
    IntValue::from_usize(1, v)
}
