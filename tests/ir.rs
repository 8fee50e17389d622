// Copyright (c) 2017-2021 Fabian Schuiki

//! Construction and integrity of the intermediate representation.

mod common;

use common::*;
use ssapre::analysis::{DominatorTree, PredecessorTable};
use ssapre::ir::prelude::*;
use ssapre::opt::prelude::*;
use ssapre::pass::SplitCriticalEdges;

/// Create a function populated by a callback. Useful to act as a simple
/// container to collect instructions.
fn within_func(f: impl FnOnce(&mut FunctionBuilder)) -> Function {
    let mut func = Function::new("test", sig_i32(2));
    let mut builder = FunctionBuilder::new(&mut func);
    let bb = builder.named_block("entry");
    builder.append_to(bb);
    f(&mut builder);
    func
}

#[test]
fn build_and_dump() {
    let func = within_func(|builder| {
        let a = builder.func().arg(0);
        let b = builder.func().arg(1);
        let x = builder.ins().name("x").add(a, b);
        let y = builder.ins().smul(x, b);
        builder.ins().ret_value(y);
    });
    ssapre::verifier::verify(&func);
    let dump = format!("{}", func);
    assert!(dump.contains("add"));
    assert!(dump.contains("smul"));
}

#[test]
fn uses_are_tracked() {
    let mut func = Function::new("uses", sig_i32(2));
    let a = func.arg(0);
    let b = func.arg(1);
    let mut builder = FunctionBuilder::new(&mut func);
    let bb = builder.named_block("entry");
    builder.append_to(bb);
    let x = builder.ins().add(a, b);
    let y = builder.ins().sub(x, a);
    builder.ins().ret_value(y);

    assert!(builder.dfg().has_uses(x));
    assert_eq!(builder.dfg().uses(x).count(), 1);
    builder.replace_use(x, a);
    assert!(!builder.dfg().has_uses(x));
    let x_inst = builder.dfg().value_inst(x);
    assert!(builder.prune_if_unused(x_inst));
}

#[test]
fn dominator_tree_queries() {
    let mut func = Function::new("doms", sig_i32(2));
    let a = func.arg(0);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let left = builder.named_block("left");
    let right = builder.named_block("right");
    let join = builder.named_block("join");
    builder.append_to(entry);
    let zero = builder.ins().const_int((32usize, 0usize));
    let c = builder.ins().neq(a, zero);
    builder.ins().br_cond(c, left, right);
    builder.append_to(left);
    builder.ins().br(join);
    builder.append_to(right);
    builder.ins().br(join);
    builder.append_to(join);
    builder.ins().ret_value(a);

    let pt = PredecessorTable::new(&func);
    let dt = DominatorTree::new(&func, &pt);
    assert!(dt.dominates(entry, join));
    assert!(dt.dominates(entry, left));
    assert!(!dt.dominates(left, join));
    assert_eq!(dt.dominator(join), entry);
    assert_eq!(dt.dominator(left), entry);

    // The join's dominance frontier membership drives phi placement.
    let idf = dt.iterated_dominance_frontier(&pt, vec![left]);
    assert_eq!(idf, vec![join]);
}

#[test]
fn split_critical_edges() {
    let mut func = Function::new("critical", sig_i32(2));
    let a = func.arg(0);
    let b = func.arg(1);
    let mut builder = FunctionBuilder::new(&mut func);
    let entry = builder.named_block("entry");
    let side = builder.named_block("side");
    let join = builder.named_block("join");
    builder.append_to(entry);
    let zero = builder.ins().const_int((32usize, 0usize));
    let c = builder.ins().neq(a, zero);
    // The edge entry -> join is critical: entry has two successors and join
    // has two predecessors.
    builder.ins().br_cond(c, side, join);
    builder.append_to(side);
    let x = builder.ins().add(a, b);
    builder.ins().br(join);
    builder.append_to(join);
    let y = builder.ins().phi(vec![a, x], vec![entry, side]);
    builder.ins().ret_value(y);

    let before_blocks = func.layout().blocks().count();
    let ctx = PassContext::new();
    let modified = SplitCriticalEdges::run_on_function(&ctx, &mut func);
    assert!(modified);
    assert_eq!(func.layout().blocks().count(), before_blocks + 1);
    ssapre::verifier::verify(&func);

    // No critical edge is left behind.
    let pt = PredecessorTable::new(&func);
    for bb in func.layout().blocks() {
        let term = func.terminator(bb);
        let succs = func.dfg()[term].blocks();
        if succs.len() < 2 {
            continue;
        }
        for &succ in succs {
            assert!(pt.num_preds(succ) < 2, "critical edge into {}", succ.dump(&func));
        }
    }

    // Behavior is untouched.
    let eval = interpret(&func, &[i32v(0), i32v(5)], 100);
    assert_eq!(eval.result, Some(i32v(0)));
    let eval = interpret(&func, &[i32v(2), i32v(5)], 100);
    assert_eq!(eval.result, Some(i32v(7)));
}

#[test]
fn interpreter_loops() {
    // Sum the numbers below the argument.
    let mut func = Function::new("sum", sig_i32(1));
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
    let ph_i = builder.dfg_mut().add_placeholder(ssapre::int_ty(32));
    let ph_s = builder.dfg_mut().add_placeholder(ssapre::int_ty(32));
    let i = builder.ins().phi(vec![zero, ph_i], vec![entry, body]);
    let s = builder.ins().phi(vec![zero, ph_s], vec![entry, body]);
    let c = builder.ins().ult(i, n);
    builder.ins().br_cond(c, body, exit);
    builder.append_to(body);
    let s1 = builder.ins().add(s, i);
    let i1 = builder.ins().add(i, one);
    builder.ins().br(header);
    builder.append_to(exit);
    builder.ins().ret_value(s);
    let i_inst = builder.dfg().value_inst(i);
    let s_inst = builder.dfg().value_inst(s);
    builder.dfg_mut().replace_value_within_inst(ph_i, i1, i_inst);
    builder.dfg_mut().replace_value_within_inst(ph_s, s1, s_inst);
    builder.dfg_mut().remove_placeholder(ph_i);
    builder.dfg_mut().remove_placeholder(ph_s);

    ssapre::verifier::verify(&func);
    let eval = interpret(&func, &[i32v(5)], 1_000);
    assert_eq!(eval.result, Some(i32v(10)));
}
