// Copyright (c) 2017-2021 Fabian Schuiki

//! Re-exports of commonly used IR items.

pub use crate::ir::{
    Arg, Block, ControlFlowGraph, DataFlowGraph, Func, Function, FunctionBuilder, FunctionLayout,
    Inst, InstBuilder, InstData, Module, Opcode, Signature, Value, ValueData,
};
