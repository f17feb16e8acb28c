// This module holds the in-memory parsed program the compiler is handed by the model
// loading layer. A ProgramDesc is a flat, ordered list of operator descriptors (OpDesc:
// operator type, named input/output slots each listing argument names, and typed
// attributes) plus the declared variables (VarDesc: name and whether it is a persistable
// weight). Program pairs a ProgramDesc with the execution scope allocated by the loader.
// The compiler never reads or writes files; deserialisation of a persisted model lives
// outside this crate. The feed_fetch submodule derives the ordered external input and
// output names from the `feed`/`fetch` marker operators.

//! Parsed program model consumed by the optimizer.

pub mod feed_fetch;

pub use feed_fetch::FeedFetch;

use crate::core::Scope;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Operator attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Attribute::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Attribute::Float(v) => Some(*v),
            Attribute::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Attribute::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Attribute::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Attribute::Ints(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", item)?;
            }
            write!(f, "]")
        }

        match self {
            Attribute::Int(v) => write!(f, "{}", v),
            Attribute::Float(v) => write!(f, "{:?}", v),
            Attribute::Bool(v) => write!(f, "{}", v),
            Attribute::Str(v) => write!(f, "\"{}\"", v),
            Attribute::Ints(v) => list(f, v),
            Attribute::Floats(v) => list(f, v),
        }
    }
}

/// One operator of the parsed program.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpDesc {
    op_type: String,
    inputs: BTreeMap<String, Vec<String>>,
    outputs: BTreeMap<String, Vec<String>>,
    attrs: BTreeMap<String, Attribute>,
}

impl OpDesc {
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            op_type: op_type.into(),
            ..Self::default()
        }
    }

    pub fn with_input<S: Into<String>>(mut self, slot: &str, args: impl IntoIterator<Item = S>) -> Self {
        self.set_input(slot, args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_output<S: Into<String>>(mut self, slot: &str, args: impl IntoIterator<Item = S>) -> Self {
        self.set_output(slot, args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_attr(mut self, name: &str, value: Attribute) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn set_op_type(&mut self, op_type: impl Into<String>) {
        self.op_type = op_type.into();
    }

    pub fn set_input(&mut self, slot: &str, args: Vec<String>) {
        self.inputs.insert(slot.to_string(), args);
    }

    pub fn set_output(&mut self, slot: &str, args: Vec<String>) {
        self.outputs.insert(slot.to_string(), args);
    }

    pub fn remove_input(&mut self, slot: &str) -> Option<Vec<String>> {
        self.inputs.remove(slot)
    }

    pub fn set_attr(&mut self, name: &str, value: Attribute) {
        self.attrs.insert(name.to_string(), value);
    }

    /// Argument names bound to an input slot; empty if the slot is absent.
    pub fn input(&self, slot: &str) -> &[String] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn output(&self, slot: &str) -> &[String] {
        self.outputs.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn inputs(&self) -> &BTreeMap<String, Vec<String>> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeMap<String, Vec<String>> {
        &self.outputs
    }

    pub fn attrs(&self) -> &BTreeMap<String, Attribute> {
        &self.attrs
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    /// All input argument names in slot order.
    pub fn input_arg_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inputs.values().flatten().map(String::as_str)
    }

    pub fn output_arg_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.outputs.values().flatten().map(String::as_str)
    }

    /// Slot an input argument is bound to.
    pub fn input_slot_of(&self, arg: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(_, args)| args.iter().any(|a| a == arg))
            .map(|(slot, _)| slot.as_str())
    }

    pub fn output_slot_of(&self, arg: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(_, args)| args.iter().any(|a| a == arg))
            .map(|(slot, _)| slot.as_str())
    }

    /// Replace every input reference to `from` with `to`. Returns whether anything changed.
    pub fn rename_input(&mut self, from: &str, to: &str) -> bool {
        rename_in(&mut self.inputs, from, to)
    }

    pub fn rename_output(&mut self, from: &str, to: &str) -> bool {
        rename_in(&mut self.outputs, from, to)
    }
}

fn rename_in(slots: &mut BTreeMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut changed = false;
    for name in slots.values_mut().flatten() {
        if name == from {
            *name = to.to_string();
            changed = true;
        }
    }
    changed
}

impl fmt::Display for OpDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn slots(f: &mut fmt::Formatter<'_>, map: &BTreeMap<String, Vec<String>>) -> fmt::Result {
            write!(f, "(")?;
            for (i, (slot, args)) in map.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}={}", slot, args.join("|"))?;
            }
            write!(f, ")")
        }

        write!(f, "{}", self.op_type)?;
        slots(f, &self.inputs)?;
        write!(f, " -> ")?;
        slots(f, &self.outputs)
    }
}

/// A declared variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDesc {
    pub name: String,
    pub persistable: bool,
}

impl VarDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistable: false,
        }
    }

    pub fn persistable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistable: true,
        }
    }
}

/// Flat operator list plus declared variables.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProgramDesc {
    pub ops: Vec<OpDesc>,
    pub vars: Vec<VarDesc>,
}

impl ProgramDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_var(&mut self, var: VarDesc) -> &mut Self {
        self.vars.push(var);
        self
    }

    pub fn add_op(&mut self, op: OpDesc) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|v| v.name == name)
    }
}

/// A parsed program together with the loader-owned execution scope.
#[derive(Debug, Clone)]
pub struct Program {
    desc: ProgramDesc,
    exec_scope: Arc<Scope>,
}

impl Program {
    pub fn new(desc: ProgramDesc, exec_scope: Arc<Scope>) -> Self {
        Self { desc, exec_scope }
    }

    pub fn desc(&self) -> &ProgramDesc {
        &self.desc
    }

    pub fn exec_scope(&self) -> &Arc<Scope> {
        &self.exec_scope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_desc_slots() {
        let mut op = OpDesc::new("conv2d")
            .with_input("Input", ["x"])
            .with_input("Filter", ["w"])
            .with_output("Output", ["y"])
            .with_attr("groups", Attribute::Int(1));

        assert_eq!(op.input("Input"), ["x".to_string()]);
        assert!(op.input("Bias").is_empty());
        assert_eq!(op.input_slot_of("w"), Some("Filter"));
        assert_eq!(op.output_slot_of("y"), Some("Output"));
        assert_eq!(op.attr("groups").and_then(Attribute::as_int), Some(1));

        let names: Vec<_> = op.input_arg_names().collect();
        assert_eq!(names, vec!["w", "x"]);

        assert!(op.rename_input("x", "x/trans"));
        assert!(!op.rename_input("missing", "other"));
        assert_eq!(op.input("Input"), ["x/trans".to_string()]);
        assert_eq!(op.to_string(), "conv2d(Filter=w, Input=x/trans) -> (Output=y)");
    }

    #[test]
    fn test_attribute_accessors() {
        assert_eq!(Attribute::Int(3).as_float(), Some(3.0));
        assert_eq!(Attribute::Str("relu".into()).as_str(), Some("relu"));
        assert_eq!(Attribute::Ints(vec![0, 2, 1]).as_ints(), Some(&[0, 2, 1][..]));
        assert_eq!(Attribute::Bool(true).as_int(), None);
        assert_eq!(Attribute::Floats(vec![0.5]).to_string(), "[0.5]");
    }
}
