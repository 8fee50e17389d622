// Copyright (c) 2017-2021 Fabian Schuiki

//! Representation of the data flow in a `Function`.
//!
//! Each function has an associated `DataFlowGraph` which contains all the
//! values, instructions, arguments, and links between them.

use crate::{
    impl_table_indexing,
    ir::{Arg, Block, Inst, InstData, Signature, Value, ValueData},
    table::{PrimaryTable, SecondaryTable},
    ty::{void_ty, Type},
    value::IntValue,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A data flow graph.
///
/// This is the main container for instructions, values, and the relationship
/// between them. Every `Function` has an associated data flow graph.
#[derive(Default, Serialize, Deserialize)]
pub struct DataFlowGraph {
    /// The instructions in the graph.
    pub(crate) insts: PrimaryTable<Inst, InstData>,
    /// The result values produced by instructions.
    pub(crate) results: SecondaryTable<Inst, Value>,
    /// The values in the graph.
    pub(crate) values: PrimaryTable<Value, ValueData>,
    /// The argument values.
    pub(crate) args: SecondaryTable<Arg, Value>,
    /// The names assigned to values.
    pub(crate) names: HashMap<Value, String>,
    /// The instructions using each value.
    pub(crate) value_uses: HashMap<Value, HashSet<Inst>>,
}

impl_table_indexing!(DataFlowGraph, insts, Inst, InstData);
impl_table_indexing!(DataFlowGraph, values, Value, ValueData);

impl DataFlowGraph {
    /// Create a new data flow graph.
    pub fn new() -> Self {
        Default::default()
    }

    /// Add a placeholder value.
    ///
    /// This function is intended to be used when constructing PHI nodes.
    pub fn add_placeholder(&mut self, ty: Type) -> Value {
        self.values.add(ValueData::Placeholder { ty })
    }

    /// Remove a placeholder value.
    pub fn remove_placeholder(&mut self, value: Value) {
        assert!(!self.has_uses(value));
        assert!(self[value].is_placeholder());
        self.values.remove(value);
    }

    /// Check if a value is a placeholder.
    pub fn is_placeholder(&self, value: Value) -> bool {
        self[value].is_placeholder()
    }

    /// Add an instruction.
    pub fn add_inst(&mut self, data: InstData, ty: Type) -> Inst {
        let inst = self.insts.add(data);
        if !ty.is_void() {
            let result = self.values.add(ValueData::Inst { ty, inst });
            self.results.add(inst, result);
        }
        for arg in self[inst].args().to_vec() {
            if arg != Value::invalid() {
                self.value_uses.entry(arg).or_default().insert(inst);
            }
        }
        inst
    }

    /// Remove an instruction.
    ///
    /// The instruction's result must be unused.
    pub fn remove_inst(&mut self, inst: Inst) {
        if self.has_result(inst) {
            let value = self.inst_result(inst);
            assert!(!self.has_uses(value), "removed inst has uses");
            self.values.remove(value);
            self.value_uses.remove(&value);
        }
        for arg in self[inst].args().to_vec() {
            if let Some(uses) = self.value_uses.get_mut(&arg) {
                uses.remove(&inst);
            }
        }
        self.insts.remove(inst);
        self.results.remove(inst);
    }

    /// Drop all value references an instruction holds.
    ///
    /// Replaces every argument with an invalid value placeholder. Used when
    /// tearing down instructions in an arbitrary order.
    pub fn drop_inst_references(&mut self, inst: Inst) {
        for arg in self[inst].args().to_vec() {
            if let Some(uses) = self.value_uses.get_mut(&arg) {
                uses.remove(&inst);
            }
        }
        for arg in self[inst].args_mut() {
            *arg = Value::invalid();
        }
    }

    /// Returns whether an instruction produces a result.
    pub fn has_result(&self, inst: Inst) -> bool {
        self.results.contains(inst)
    }

    /// Returns the result of an instruction.
    pub fn inst_result(&self, inst: Inst) -> Value {
        self.results[inst]
    }

    /// Returns the result of an instruction, if there is one.
    pub fn get_inst_result(&self, inst: Inst) -> Option<Value> {
        self.results.get(inst).cloned()
    }

    /// Returns the value of an argument.
    pub fn arg_value(&self, arg: Arg) -> Value {
        self.args[arg]
    }

    /// Create values for the arguments in a signature.
    pub(crate) fn make_args_for_signature(&mut self, sig: &Signature) {
        for arg in sig.args() {
            let value = self.values.add(ValueData::Arg {
                ty: sig.arg_type(arg),
                arg,
            });
            self.args.add(arg, value);
        }
    }

    /// Returns the type of a value.
    pub fn value_type(&self, value: Value) -> Type {
        match &self[value] {
            ValueData::Inst { ty, .. } => ty.clone(),
            ValueData::Arg { ty, .. } => ty.clone(),
            ValueData::Placeholder { ty, .. } => ty.clone(),
        }
    }

    /// Returns the type of an instruction.
    pub fn inst_type(&self, inst: Inst) -> Type {
        if self.has_result(inst) {
            self.value_type(self.inst_result(inst))
        } else {
            void_ty()
        }
    }

    /// Return the instruction that produces `value`.
    pub fn get_value_inst(&self, value: Value) -> Option<Inst> {
        match self[value] {
            ValueData::Inst { inst, .. } => Some(inst),
            _ => None,
        }
    }

    /// Return the instruction that produces `value`, or panic.
    pub fn value_inst(&self, value: Value) -> Inst {
        match self.get_value_inst(value) {
            Some(inst) => inst,
            None => panic!("value {} not the result of an instruction", value),
        }
    }

    /// Return the argument that produces `value`.
    pub fn get_value_arg(&self, value: Value) -> Option<Arg> {
        match self[value] {
            ValueData::Arg { arg, .. } => Some(arg),
            _ => None,
        }
    }

    /// Return the name of a value.
    pub fn get_name(&self, value: Value) -> Option<&str> {
        self.names.get(&value).map(AsRef::as_ref)
    }

    /// Set the name of a value.
    pub fn set_name(&mut self, value: Value, name: String) {
        self.names.insert(value, name);
    }

    /// Clear the name of a value.
    pub fn clear_name(&mut self, value: Value) -> Option<String> {
        self.names.remove(&value)
    }

    /// Replace all uses of a value with another.
    ///
    /// Returns how many uses were replaced.
    pub fn replace_use(&mut self, from: Value, to: Value) -> usize {
        let users: Vec<_> = self.uses(from).collect();
        let mut count = 0;
        for inst in users {
            count += self.replace_value_within_inst(from, to, inst);
        }
        count
    }

    /// Replace the uses of a value with another, in a single instruction.
    ///
    /// Returns how many uses were replaced.
    pub fn replace_value_within_inst(&mut self, from: Value, to: Value, inst: Inst) -> usize {
        let count = self[inst].replace_value(from, to);
        if count > 0 {
            if let Some(uses) = self.value_uses.get_mut(&from) {
                uses.remove(&inst);
            }
            self.value_uses.entry(to).or_default().insert(inst);
        }
        count
    }

    /// Iterate over the instructions using a value.
    pub fn uses(&self, value: Value) -> impl Iterator<Item = Inst> + '_ {
        self.value_uses.get(&value).into_iter().flatten().cloned()
    }

    /// Check if a value is used.
    pub fn has_uses(&self, value: Value) -> bool {
        self.value_uses
            .get(&value)
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Check if a value has exactly one use.
    pub fn has_one_use(&self, value: Value) -> bool {
        self.uses(value).count() == 1
    }

    /// Replace all uses of a block with another, in a single instruction.
    ///
    /// Returns how many blocks were replaced.
    pub fn replace_block_within_inst(
        &mut self,
        from: Block,
        to: Block,
        inst: Inst,
    ) -> usize {
        self[inst].replace_block(from, to)
    }

    /// Add an incoming edge to a phi instruction.
    pub fn add_phi_incoming(&mut self, inst: Inst, value: Value, block: Block) {
        match &mut self[inst] {
            InstData::Phi { args, bbs, .. } => {
                args.push(value);
                bbs.push(block);
            }
            _ => panic!("add_phi_incoming called on non-phi"),
        }
        self.value_uses.entry(value).or_default().insert(inst);
    }

    /// Get the incoming value of a phi instruction for a given block.
    pub fn phi_value_for_block(&self, inst: Inst, block: Block) -> Option<Value> {
        match &self[inst] {
            InstData::Phi { args, bbs, .. } => bbs
                .iter()
                .position(|&bb| bb == block)
                .map(|idx| args[idx]),
            _ => None,
        }
    }

    /// Resolve a constant integer value.
    ///
    /// Returns `None` if the value is not constant. Note that this *does not*
    /// perform constant folding. Rather, the value must resolve to an
    /// instruction which produces a constant value.
    pub fn get_const_int(&self, value: Value) -> Option<&IntValue> {
        let inst = self.get_value_inst(value)?;
        self[inst].get_const_int()
    }
}
