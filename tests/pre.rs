// Copyright (c) 2017-2021 Fabian Schuiki

//! End-to-end scenarios for partial redundancy elimination.

mod common;

use common::*;
use ssapre::ir::prelude::*;
use ssapre::opt::Stats;

/// Straight line: `t1 = a+b; t2 = a+b` collapses into one computation.
fn build_straight_line() -> Function {
    let mut func = Function::new("straight", sig_i32(2));
    let a = func.arg(0);
    let b = func.arg(1);
    let mut builder = FunctionBuilder::new(&mut func);
    let bb = builder.named_block("entry");
    builder.append_to(bb);
    let t1 = builder.ins().name("t1").add(a, b);
    let t2 = builder.ins().name("t2").add(a, b);
    let u1 = builder.ins().xor(t1, a);
    let u2 = builder.ins().xor(t2, b);
    let r = builder.ins().or(u1, u2);
    builder.ins().ret_value(r);
    func
}

#[test]
fn s1_straight_line_cse() {
    init_logging();
    let before = build_straight_line();
    let mut func = build_straight_line();

    let (changed, ctx) = run_pre(&mut func);
    assert!(changed);
    assert_eq!(count_opcode(&func, Opcode::Add), 1, "{}", func);
    assert_eq!(Stats::get(&ctx.stats.insts_substituted), 1);
    assert_eq!(Stats::get(&ctx.stats.insts_killed), 1);

    assert_equivalent(
        &before,
        &func,
        &[vec![i32v(1), i32v(2)], vec![i32v(-7), i32v(13)], vec![i32v(0), i32v(0)]],
    );
    assert_idempotent(&mut func);
}

/// Diamond: the left leg computes `a+b`, the join computes it again. The
/// computation moves onto the right leg and a phi merges the two.
fn build_diamond() -> Function {
    let mut sig = Signature::new();
    sig.add_input(ssapre::int_ty(1));
    sig.add_input(ssapre::int_ty(32));
    sig.add_input(ssapre::int_ty(32));
    sig.set_return_type(ssapre::int_ty(32));
    let mut func = Function::new("diamond", sig);
    let p = func.arg(0);
    let a = func.arg(1);
    let b = func.arg(2);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let left = builder.named_block("left");
    let right = builder.named_block("right");
    let join = builder.named_block("join");
    builder.append_to(entry);
    builder.ins().br_cond(p, left, right);
    builder.append_to(left);
    let x = builder.ins().name("x").add(a, b);
    let u = builder.ins().name("u").xor(x, a);
    builder.ins().br(join);
    builder.append_to(right);
    builder.ins().br(join);
    builder.append_to(join);
    let w = builder.ins().name("w").phi(vec![u, a], vec![left, right]);
    let y = builder.ins().name("y").add(a, b);
    let r = builder.ins().or(y, w);
    builder.ins().ret_value(r);
    func
}

#[test]
fn s2_diamond_partial_redundancy() {
    init_logging();
    let before = build_diamond();
    let mut func = build_diamond();

    let (changed, ctx) = run_pre(&mut func);
    assert!(changed);
    // One `add` per leg, the join only merges.
    assert_eq!(count_opcode(&func, Opcode::Add), 2, "{}", func);
    // The value phi that was already there, plus the merge of the two adds.
    assert_eq!(count_opcode(&func, Opcode::Phi), 2, "{}", func);
    assert_eq!(Stats::get(&ctx.stats.insts_inserted), 1);
    assert_eq!(Stats::get(&ctx.stats.phis_inserted), 1);
    assert_eq!(Stats::get(&ctx.stats.insts_substituted), 1);

    assert_equivalent(
        &before,
        &func,
        &[
            vec![i1v(0), i32v(3), i32v(4)],
            vec![i1v(1), i32v(3), i32v(4)],
            vec![i1v(1), i32v(-5), i32v(5)],
        ],
    );
    assert_idempotent(&mut func);
}

/// A loop whose body computes a loop-invariant expression; the computation is
/// hoisted into the preheader through the cycled factor.
fn build_loop_invariant() -> Function {
    let mut func = Function::new("loop_invariant", sig_i32(3));
    let a = func.arg(0);
    let b = func.arg(1);
    let n = func.arg(2);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let header = builder.named_block("header");
    let body = builder.named_block("body");
    let exit = builder.named_block("exit");

    builder.append_to(entry);
    let zero = builder.ins().const_int((32usize, 0usize));
    let one = builder.ins().const_int((32usize, 1usize));
    builder.ins().br(header);

    // The back-edge operands of the phis exist only once the body is built;
    // placeholders bridge the gap.
    builder.append_to(header);
    let ph_i = builder.dfg_mut().add_placeholder(ssapre::int_ty(32));
    let ph_acc = builder.dfg_mut().add_placeholder(ssapre::int_ty(32));
    let i = builder.ins().name("i").phi(vec![zero, ph_i], vec![entry, body]);
    let acc = builder.ins().name("acc").phi(vec![zero, ph_acc], vec![entry, body]);
    let cond = builder.ins().ult(i, n);
    builder.ins().br_cond(cond, body, exit);

    builder.append_to(body);
    let x = builder.ins().name("x").add(a, b);
    let s = builder.ins().name("s").add(acc, x);
    let i1 = builder.ins().name("i1").add(i, one);
    builder.ins().br(header);

    builder.append_to(exit);
    builder.ins().ret_value(acc);

    // Patch the back-edge phi operands.
    let i_inst = builder.dfg().value_inst(i);
    let acc_inst = builder.dfg().value_inst(acc);
    builder.dfg_mut().replace_value_within_inst(ph_i, i1, i_inst);
    builder.dfg_mut().replace_value_within_inst(ph_acc, s, acc_inst);
    builder.dfg_mut().remove_placeholder(ph_i);
    builder.dfg_mut().remove_placeholder(ph_acc);
    func
}

#[test]
fn s3_loop_invariant_hoist() {
    init_logging();
    let before = build_loop_invariant();
    let mut func = build_loop_invariant();

    let (changed, ctx) = run_pre(&mut func);
    assert!(changed, "{}", func);
    assert_eq!(Stats::get(&ctx.stats.insts_inserted), 1, "{}", func);

    // The invariant `a+b` now lives in the entry block.
    let entry = func.entry();
    let entry_adds = func
        .layout()
        .insts(entry)
        .filter(|&inst| func.dfg()[inst].opcode() == Opcode::Add)
        .count();
    assert_eq!(entry_adds, 1, "{}", func);

    // Inputs run the loop at least once; hoisting is speculative on the
    // zero-trip path.
    assert_equivalent(
        &before,
        &func,
        &[
            vec![i32v(3), i32v(4), i32v(1)],
            vec![i32v(3), i32v(4), i32v(5)],
            vec![i32v(-2), i32v(9), i32v(3)],
        ],
    );
    assert_idempotent(&mut func);
}

/// An induction step must stay where it is.
fn build_induction() -> Function {
    let mut func = Function::new("induction", sig_i32(1));
    let n = func.arg(0);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let header = builder.named_block("header");
    let body = builder.named_block("body");
    let exit = builder.named_block("exit");

    builder.append_to(entry);
    let zero = builder.ins().const_int((32usize, 0usize));
    let one = builder.ins().const_int((32usize, 1usize));
    builder.ins().br(header);

    builder.append_to(header);
    let ph = builder.dfg_mut().add_placeholder(ssapre::int_ty(32));
    let i = builder.ins().name("i").phi(vec![zero, ph], vec![entry, body]);
    let cond = builder.ins().ult(i, n);
    builder.ins().br_cond(cond, body, exit);

    builder.append_to(body);
    let t = builder.ins().name("t").add(i, one);
    builder.ins().br(header);

    builder.append_to(exit);
    builder.ins().ret_value(i);

    let i_inst = builder.dfg().value_inst(i);
    builder.dfg_mut().replace_value_within_inst(ph, t, i_inst);
    builder.dfg_mut().remove_placeholder(ph);
    func
}

#[test]
fn s4_induction_suppression() {
    init_logging();
    let before = build_induction();
    let mut func = build_induction();

    let (_, ctx) = run_pre(&mut func);
    // No hoist: the entry block holds only the constants and the branch.
    assert_eq!(Stats::get(&ctx.stats.insts_inserted), 0, "{}", func);
    // The induction step is still in the body.
    assert_eq!(count_opcode(&func, Opcode::Add), 1, "{}", func);

    assert_equivalent(
        &before,
        &func,
        &[vec![i32v(0)], vec![i32v(1)], vec![i32v(7)]],
    );
    assert_idempotent(&mut func);
}

/// A value computed on one leg and needed nowhere gets deleted.
fn build_non_downsafe() -> Function {
    let mut sig = Signature::new();
    sig.add_input(ssapre::int_ty(1));
    sig.add_input(ssapre::int_ty(32));
    sig.add_input(ssapre::int_ty(32));
    sig.set_return_type(ssapre::int_ty(32));
    let mut func = Function::new("non_downsafe", sig);
    let p = func.arg(0);
    let a = func.arg(1);
    let b = func.arg(2);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let left = builder.named_block("left");
    let right = builder.named_block("right");
    let exit = builder.named_block("exit");
    builder.append_to(entry);
    builder.ins().br_cond(p, left, right);
    builder.append_to(left);
    builder.ins().name("x").add(a, b);
    builder.ins().br(exit);
    builder.append_to(right);
    builder.ins().br(exit);
    builder.append_to(exit);
    builder.ins().ret_value(a);
    func
}

#[test]
fn s5_non_downsafe_deletion() {
    init_logging();
    let before = build_non_downsafe();
    let mut func = build_non_downsafe();

    let (changed, ctx) = run_pre(&mut func);
    assert!(changed, "{}", func);
    assert_eq!(count_opcode(&func, Opcode::Add), 0, "{}", func);
    assert_eq!(Stats::get(&ctx.stats.insts_killed), 1);
    assert_eq!(Stats::get(&ctx.stats.insts_inserted), 0);

    assert_equivalent(
        &before,
        &func,
        &[
            vec![i1v(0), i32v(3), i32v(4)],
            vec![i1v(1), i32v(3), i32v(4)],
        ],
    );
    assert_idempotent(&mut func);
}

/// Commutative operands canonicalize, so `a+b` and `b+a` are one class.
fn build_commutative() -> Function {
    let mut func = Function::new("commutative", sig_i32(2));
    let a = func.arg(0);
    let b = func.arg(1);
    let mut builder = FunctionBuilder::new(&mut func);
    let bb = builder.named_block("entry");
    builder.append_to(bb);
    let t1 = builder.ins().name("t1").add(a, b);
    let t2 = builder.ins().name("t2").add(b, a);
    let r = builder.ins().xor(t1, t2);
    builder.ins().ret_value(r);
    func
}

#[test]
fn s6_commutative_canonicalization() {
    init_logging();
    let before = build_commutative();
    let mut func = build_commutative();

    let (changed, ctx) = run_pre(&mut func);
    assert!(changed, "{}", func);
    assert_eq!(count_opcode(&func, Opcode::Add), 1, "{}", func);
    assert_eq!(Stats::get(&ctx.stats.insts_substituted), 1);
    assert_eq!(Stats::get(&ctx.stats.insts_killed), 1);

    assert_equivalent(
        &before,
        &func,
        &[vec![i32v(3), i32v(4)], vec![i32v(-3), i32v(3)]],
    );
    assert_idempotent(&mut func);
}

/// Swapped comparison predicates canonicalize as well: `a < b` and `b > a`
/// are one class.
fn build_swapped_compare() -> Function {
    let mut func = Function::new("swapped_compare", sig_i32(2));
    let a = func.arg(0);
    let b = func.arg(1);
    let mut builder = FunctionBuilder::new(&mut func);
    let bb = builder.named_block("entry");
    builder.append_to(bb);
    let c1 = builder.ins().slt(a, b);
    let c2 = builder.ins().sgt(b, a);
    let r = builder.ins().and(c1, c2);
    let ext = builder.ins().sel(r, a, b);
    builder.ins().ret_value(ext);
    func
}

#[test]
fn swapped_compare_cse() {
    init_logging();
    let before = build_swapped_compare();
    let mut func = build_swapped_compare();

    let (changed, _) = run_pre(&mut func);
    assert!(changed, "{}", func);
    let compares = count_opcode(&func, Opcode::Slt) + count_opcode(&func, Opcode::Sgt);
    assert_eq!(compares, 1, "{}", func);

    assert_equivalent(
        &before,
        &func,
        &[vec![i32v(1), i32v(2)], vec![i32v(2), i32v(1)], vec![i32v(2), i32v(2)]],
    );
}

/// Fully redundant computations collapse to a single evaluation on the path
/// (the strict reduction property).
#[test]
fn p5_full_redundancy_single_evaluation() {
    init_logging();
    let mut func = build_straight_line();
    run_pre(&mut func);
    let eval = interpret(&func, &[i32v(2), i32v(5)], 1_000);
    // xor, xor, or, and exactly one add.
    assert_eq!(eval.computations, 4, "{}", func);
}

/// A computation sunk behind a branch never executes on the other leg.
#[test]
fn p4_no_computation_added_on_any_path() {
    init_logging();
    let before = build_diamond();
    let mut func = build_diamond();
    run_pre(&mut func);

    for p in &[0, 1] {
        let input = vec![i1v(*p), i32v(10), i32v(20)];
        let b = interpret(&before, &input, 1_000);
        let a = interpret(&func, &input, 1_000);
        assert!(a.computations <= b.computations);
    }
}

/// Simplified computations fold away entirely.
#[test]
fn simplification_folds_to_operand() {
    init_logging();
    let build = || {
        let mut func = Function::new("simplify", sig_i32(2));
        let a = func.arg(0);
        let b = func.arg(1);
        let mut builder = FunctionBuilder::new(&mut func);
        let bb = builder.named_block("entry");
        builder.append_to(bb);
        let zero = builder.ins().const_int((32usize, 0usize));
        let t = builder.ins().name("t").add(a, zero);
        let r = builder.ins().name("r").add(t, b);
        builder.ins().ret_value(r);
        func
    };
    let before = build();
    let mut func = build();

    let (changed, _) = run_pre(&mut func);
    assert!(changed, "{}", func);
    // `a + 0` disappears; `r` computes on `a` directly.
    assert_eq!(count_opcode(&func, Opcode::Add), 1, "{}", func);

    assert_equivalent(
        &before,
        &func,
        &[vec![i32v(3), i32v(4)], vec![i32v(-1), i32v(1)]],
    );
}

/// Redundancy across constants in distinct blocks: equal constants intern to
/// one class, so the computations unify.
#[test]
fn interned_constants_share_versions() {
    init_logging();
    let build = || {
        let mut func = Function::new("consts", sig_i32(1));
        let a = func.arg(0);
        let mut builder = FunctionBuilder::new(&mut func);
        let bb = builder.named_block("entry");
        builder.append_to(bb);
        let c1 = builder.ins().const_int((32usize, 7usize));
        let t1 = builder.ins().name("t1").add(a, c1);
        let c2 = builder.ins().const_int((32usize, 7usize));
        let t2 = builder.ins().name("t2").add(a, c2);
        let r = builder.ins().xor(t1, t2);
        builder.ins().ret_value(r);
        func
    };
    let before = build();
    let mut func = build();

    let (changed, _) = run_pre(&mut func);
    assert!(changed, "{}", func);
    assert_eq!(count_opcode(&func, Opcode::Add), 1, "{}", func);

    assert_equivalent(&before, &func, &[vec![i32v(1)], vec![i32v(-7)]]);
}
