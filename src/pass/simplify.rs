// Copyright (c) 2017-2021 Fabian Schuiki

//! Instruction simplification and constant folding.
//!
//! The helpers in this module put computations into a canonical form without
//! touching the IR. They either point at an existing value that already
//! carries the result, or fold the computation into a constant. Callers decide
//! what to do with the outcome.

use crate::ir::{DataFlowGraph, Opcode, Value};
use crate::value::IntValue;

/// The outcome of a successful simplification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simplified {
    /// The computation is equivalent to an existing value.
    Value(Value),
    /// The computation folds to a constant.
    Const(IntValue),
}

/// Try to simplify an instruction given its opcode and arguments.
pub fn simplify_inst(dfg: &DataFlowGraph, opcode: Opcode, args: &[Value]) -> Option<Simplified> {
    match args.len() {
        1 => simplify_unary(dfg, opcode, args[0]),
        2 => simplify_binary(dfg, opcode, args[0], args[1]),
        3 if opcode == Opcode::Sel => simplify_sel(dfg, args[0], args[1], args[2]),
        _ => None,
    }
}

/// Try to simplify a unary instruction.
pub fn simplify_unary(dfg: &DataFlowGraph, opcode: Opcode, arg: Value) -> Option<Simplified> {
    let imm = dfg.get_const_int(arg)?;
    IntValue::try_unary_op(opcode, imm).map(Simplified::Const)
}

/// Try to simplify a binary instruction.
pub fn simplify_binary(
    dfg: &DataFlowGraph,
    opcode: Opcode,
    lhs: Value,
    rhs: Value,
) -> Option<Simplified> {
    let lk = dfg.get_const_int(lhs);
    let rk = dfg.get_const_int(rhs);

    // Fold entirely constant computations.
    if let (Some(lk), Some(rk)) = (lk, rk) {
        let folded = IntValue::try_binary_op(opcode, lk, rk)
            .or_else(|| IntValue::try_compare_op(opcode, lk, rk));
        if let Some(folded) = folded {
            return Some(Simplified::Const(folded));
        }
    }

    let width = || dfg.value_type(lhs).unwrap_int();

    // Identities on equal operands.
    if lhs == rhs {
        match opcode {
            Opcode::And | Opcode::Or => return Some(Simplified::Value(lhs)),
            Opcode::Sub | Opcode::Xor => return Some(Simplified::Const(IntValue::zero(width()))),
            Opcode::Eq | Opcode::Sle | Opcode::Sge | Opcode::Ule | Opcode::Uge => {
                return Some(Simplified::Const(IntValue::from_usize(1, 1)))
            }
            Opcode::Neq | Opcode::Slt | Opcode::Sgt | Opcode::Ult | Opcode::Ugt => {
                return Some(Simplified::Const(IntValue::zero(1)))
            }
            _ => (),
        }
    }

    // Identities on a constant right operand.
    if let Some(rk) = rk {
        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Or | Opcode::Xor if rk.is_zero() => {
                return Some(Simplified::Value(lhs))
            }
            Opcode::Shl | Opcode::Shr | Opcode::Ashr if rk.is_zero() => {
                return Some(Simplified::Value(lhs))
            }
            Opcode::Smul | Opcode::Umul if rk.is_one() => return Some(Simplified::Value(lhs)),
            Opcode::Smul | Opcode::Umul if rk.is_zero() => {
                return Some(Simplified::Const(IntValue::zero(width())))
            }
            Opcode::Sdiv | Opcode::Udiv if rk.is_one() => return Some(Simplified::Value(lhs)),
            Opcode::And if rk.is_all_ones() => return Some(Simplified::Value(lhs)),
            Opcode::And if rk.is_zero() => {
                return Some(Simplified::Const(IntValue::zero(width())))
            }
            Opcode::Or if rk.is_all_ones() => {
                return Some(Simplified::Const(IntValue::all_ones(width())))
            }
            _ => (),
        }
    }

    // Identities on a constant left operand of a commutative instruction.
    if let Some(lk) = lk {
        if opcode.is_commutative() {
            match opcode {
                Opcode::Add | Opcode::Or | Opcode::Xor if lk.is_zero() => {
                    return Some(Simplified::Value(rhs))
                }
                Opcode::Smul | Opcode::Umul if lk.is_one() => return Some(Simplified::Value(rhs)),
                Opcode::Smul | Opcode::Umul if lk.is_zero() => {
                    return Some(Simplified::Const(IntValue::zero(width())))
                }
                Opcode::And if lk.is_all_ones() => return Some(Simplified::Value(rhs)),
                Opcode::And if lk.is_zero() => {
                    return Some(Simplified::Const(IntValue::zero(width())))
                }
                _ => (),
            }
        }
    }

    None
}

/// Try to simplify a select instruction.
pub fn simplify_sel(
    dfg: &DataFlowGraph,
    cond: Value,
    then: Value,
    other: Value,
) -> Option<Simplified> {
    if then == other {
        return Some(Simplified::Value(then));
    }
    if let Some(c) = dfg.get_const_int(cond) {
        return Some(Simplified::Value(if c.is_zero() { other } else { then }));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::prelude::*;
    use crate::{int_ty, void_ty};

    #[test]
    fn identities() {
        let mut sig = Signature::new();
        sig.add_input(int_ty(32));
        sig.set_return_type(void_ty());
        let mut func = Function::new("test", sig);
        let a = func.arg(0);
        let mut builder = FunctionBuilder::new(&mut func);
        let bb = builder.block();
        builder.append_to(bb);
        let zero = builder.ins().const_int((32usize, 0usize));
        let one = builder.ins().const_int((32usize, 1usize));

        assert_eq!(
            simplify_binary(func.dfg(), Opcode::Add, a, zero),
            Some(Simplified::Value(a))
        );
        assert_eq!(
            simplify_binary(func.dfg(), Opcode::Umul, one, a),
            Some(Simplified::Value(a))
        );
        assert_eq!(
            simplify_binary(func.dfg(), Opcode::Sub, a, a),
            Some(Simplified::Const(IntValue::zero(32)))
        );
        assert_eq!(
            simplify_binary(func.dfg(), Opcode::Add, zero, one),
            Some(Simplified::Const(IntValue::from_usize(32, 1)))
        );
        assert_eq!(simplify_binary(func.dfg(), Opcode::Add, a, a), None);
    }
}
