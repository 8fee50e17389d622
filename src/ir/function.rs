// Copyright (c) 2017-2021 Fabian Schuiki

//! Representation of functions and the builder used to populate them.

use crate::{
    ir::{
        Arg, Block, ControlFlowGraph, DataFlowGraph, FunctionLayout, Inst, InstBuilder, InstData,
        Signature, Value,
    },
    ty::Type,
};
use serde::{Deserialize, Serialize};

/// A function.
#[derive(Serialize, Deserialize)]
pub struct Function {
    pub(crate) name: String,
    pub(crate) sig: Signature,
    pub(crate) dfg: DataFlowGraph,
    pub(crate) cfg: ControlFlowGraph,
    pub(crate) layout: FunctionLayout,
}

impl Function {
    /// Create a new function.
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        let mut dfg = DataFlowGraph::new();
        dfg.make_args_for_signature(&sig);
        Self {
            name: name.into(),
            sig,
            dfg,
            cfg: ControlFlowGraph::new(),
            layout: FunctionLayout::new(),
        }
    }

    /// Get the name of the function.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the signature of the function.
    pub fn sig(&self) -> &Signature {
        &self.sig
    }

    /// Get the DFG of the function.
    pub fn dfg(&self) -> &DataFlowGraph {
        &self.dfg
    }

    /// Get the mutable DFG of the function.
    pub fn dfg_mut(&mut self) -> &mut DataFlowGraph {
        &mut self.dfg
    }

    /// Get the CFG of the function.
    pub fn cfg(&self) -> &ControlFlowGraph {
        &self.cfg
    }

    /// Get the mutable CFG of the function.
    pub fn cfg_mut(&mut self) -> &mut ControlFlowGraph {
        &mut self.cfg
    }

    /// Get the layout of the function.
    pub fn layout(&self) -> &FunctionLayout {
        &self.layout
    }

    /// Get the mutable layout of the function.
    pub fn layout_mut(&mut self) -> &mut FunctionLayout {
        &mut self.layout
    }

    /// Returns the value of an argument.
    pub fn arg_value(&self, arg: Arg) -> Value {
        self.dfg.arg_value(arg)
    }

    /// Return an iterator over the function's argument values.
    pub fn args<'a>(&'a self) -> impl Iterator<Item = Value> + 'a {
        self.sig.args().map(move |arg| self.dfg.arg_value(arg))
    }

    /// Get the argument value at position `pos`.
    pub fn arg(&self, pos: usize) -> Value {
        self.arg_value(
            self.sig
                .args()
                .nth(pos)
                .expect("argument position out of bounds"),
        )
    }

    /// Returns the type of a value.
    pub fn value_type(&self, value: Value) -> Type {
        self.dfg.value_type(value)
    }

    /// Get the entry block of the function.
    pub fn entry(&self) -> Block {
        self.layout.entry()
    }

    /// Get the first non-phi instruction in a block.
    pub fn first_non_phi(&self, bb: Block) -> Option<Inst> {
        self.layout
            .insts(bb)
            .find(|&inst| !self.dfg[inst].opcode().is_phi())
    }

    /// Get the terminator instruction of a block.
    pub fn terminator(&self, bb: Block) -> Inst {
        self.layout.terminator(bb)
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "func @{} {} {{", self.name, self.sig)?;
        for bb in self.layout.blocks() {
            writeln!(f)?;
            write!(f, "{}:", bb.dump(self))?;
            for inst in self.layout.insts(bb) {
                writeln!(f)?;
                write!(f, "    {}", inst.dump(self))?;
            }
        }
        writeln!(f)?;
        write!(f, "}}")
    }
}

impl Value {
    /// Dump the value in human readable form.
    pub fn dump(self, func: &Function) -> ValueDumper {
        ValueDumper(self, func)
    }
}

/// Temporary object to dump a `Value` in human-readable form for debugging.
pub struct ValueDumper<'a>(Value, &'a Function);

impl std::fmt::Display for ValueDumper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.0 == Value::invalid() {
            return write!(f, "%<invalid>");
        }
        if let Some(name) = self.1.dfg().get_name(self.0) {
            write!(f, "%{}", name)
        } else {
            write!(f, "%{}", self.0)
        }
    }
}

impl Block {
    /// Dump the block in human readable form.
    pub fn dump(self, func: &Function) -> BlockDumper {
        BlockDumper(self, func)
    }
}

/// Temporary object to dump a `Block` in human-readable form for debugging.
pub struct BlockDumper<'a>(Block, &'a Function);

impl std::fmt::Display for BlockDumper<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if let Some(name) = self.1.cfg().get_name(self.0) {
            write!(f, "{}", name)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// The position where new instructions will be inserted into a `Function`.
#[derive(Clone, Copy)]
enum InsertPos {
    None,
    Append(Block),
    Prepend(Block),
    After(Inst),
    Before(Inst),
}

/// A temporary object used to populate a `Function`.
pub struct FunctionBuilder<'a> {
    func: &'a mut Function,
    pos: InsertPos,
}

impl<'a> FunctionBuilder<'a> {
    /// Create a new builder for a function.
    pub fn new(func: &'a mut Function) -> Self {
        Self {
            func,
            pos: InsertPos::None,
        }
    }

    /// Return the function being built.
    pub fn func(&self) -> &Function {
        self.func
    }

    /// Return the mutable function being built.
    pub fn func_mut(&mut self) -> &mut Function {
        self.func
    }

    /// Get the DFG of the function being built.
    pub fn dfg(&self) -> &DataFlowGraph {
        &self.func.dfg
    }

    /// Get the mutable DFG of the function being built.
    pub fn dfg_mut(&mut self) -> &mut DataFlowGraph {
        &mut self.func.dfg
    }

    /// Get the layout of the function being built.
    pub fn layout(&self) -> &FunctionLayout {
        &self.func.layout
    }

    /// Get the mutable layout of the function being built.
    pub fn layout_mut(&mut self) -> &mut FunctionLayout {
        &mut self.func.layout
    }

    /// Add a new instruction using an `InstBuilder`.
    pub fn ins(&mut self) -> InstBuilder<'a, '_> {
        InstBuilder::new(self)
    }

    /// Add a new instruction at the current insertion position.
    pub fn build_inst(&mut self, data: InstData, ty: Type) -> Inst {
        let inst = self.func.dfg.add_inst(data, ty);
        match self.pos {
            InsertPos::None => panic!("no insertion position set"),
            InsertPos::Append(bb) => self.func.layout.append_inst(inst, bb),
            InsertPos::Prepend(bb) => {
                self.func.layout.prepend_inst(inst, bb);
                self.pos = InsertPos::After(inst);
            }
            InsertPos::After(other) => {
                self.func.layout.insert_inst_after(inst, other);
                self.pos = InsertPos::After(inst);
            }
            InsertPos::Before(other) => self.func.layout.insert_inst_before(inst, other),
        }
        inst
    }

    /// Remove an instruction.
    pub fn remove_inst(&mut self, inst: Inst) {
        // Move the insertion position out of the way if it is anchored here.
        self.pos = match self.pos {
            InsertPos::After(i) if i == inst => match self.func.layout.prev_inst(inst) {
                Some(prev) => InsertPos::After(prev),
                None => InsertPos::Prepend(self.func.layout.inst_block(inst).unwrap()),
            },
            InsertPos::Before(i) if i == inst => match self.func.layout.next_inst(inst) {
                Some(next) => InsertPos::Before(next),
                None => InsertPos::Append(self.func.layout.inst_block(inst).unwrap()),
            },
            pos => pos,
        };
        self.func.layout.remove_inst(inst);
        self.func.dfg.remove_inst(inst);
    }

    /// Create a new BB.
    pub fn block(&mut self) -> Block {
        let bb = self.func.cfg.add_block();
        self.func.layout.append_block(bb);
        bb
    }

    /// Create a new named BB.
    pub fn named_block(&mut self, name: impl Into<String>) -> Block {
        let bb = self.block();
        self.func.cfg.set_name(bb, name.into());
        bb
    }

    /// Remove a BB.
    ///
    /// The block must be empty.
    pub fn remove_block(&mut self, bb: Block) {
        assert!(
            self.func.layout.first_inst(bb).is_none(),
            "removed block must be empty"
        );
        self.func.layout.remove_block(bb);
        self.func.cfg.remove_block(bb);
    }

    /// Append all following instructions to the end of `bb`.
    pub fn append_to(&mut self, bb: Block) {
        self.pos = InsertPos::Append(bb);
    }

    /// Prepend all following instructions to the beginning of `bb`.
    pub fn prepend_to(&mut self, bb: Block) {
        self.pos = InsertPos::Prepend(bb);
    }

    /// Insert all following instructions after `inst`.
    pub fn insert_after(&mut self, inst: Inst) {
        self.pos = InsertPos::After(inst);
    }

    /// Insert all following instructions before `inst`.
    pub fn insert_before(&mut self, inst: Inst) {
        self.pos = InsertPos::Before(inst);
    }

    /// Set the name of a value.
    pub fn set_name(&mut self, value: Value, name: impl Into<String>) {
        self.func.dfg.set_name(value, name.into())
    }

    /// Replace all uses of a value with another.
    pub fn replace_use(&mut self, from: Value, to: Value) -> usize {
        self.func.dfg.replace_use(from, to)
    }

    /// Remove an instruction if its value is not being read.
    ///
    /// Returns true if the instruction was removed.
    pub fn prune_if_unused(&mut self, inst: Inst) -> bool {
        if self.func.dfg.has_result(inst) && !self.func.dfg.has_uses(self.func.dfg.inst_result(inst))
        {
            let inst_args: Vec<_> = self.func.dfg[inst]
                .args()
                .iter()
                .cloned()
                .flat_map(|arg| self.func.dfg.get_value_inst(arg))
                .collect();
            self.remove_inst(inst);
            for inst in inst_args {
                self.prune_if_unused(inst);
            }
            true
        } else {
            false
        }
    }
}
