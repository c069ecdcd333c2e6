//! Program representation
//!
//! A compiled rule is a contiguous opcode sequence evaluated by the VM in
//! `vm.rs`. Every opcode carries explicit pass/fail jump targets; `-1`
//! terminates the program. The sequence is immutable after compilation
//! and may be read by any number of iterators concurrently.

use std::fmt::Write as _;

use crate::ids::Id;
use crate::rule::pair::{Pair, PairSlot};
use crate::rule::vars::{VarId, VarKind, Variable};

/// What an opcode does when dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    /// Program entry: true on first evaluation, false on redo.
    Input,
    /// Enumerate the table set matching the filter.
    Select,
    /// Check the input table/entity against the filter's table set.
    With,
    /// Enumerate descendants of an entity along a relation (tables).
    SubSet,
    /// Enumerate ancestors of an entity along a relation (entities).
    SuperSet,
    /// Write a literal or copied entity into a register, once.
    Store,
    /// Forward each entity of a table register into an entity register.
    Each,
    /// Arm a jump label: pass target first, fail target on redo.
    SetJmp,
    /// Transfer to the label armed by the SetJmp at `on_pass`.
    Jump,
    /// Publish the current frame to the caller.
    Yield,
}

impl OpKind {
    /// Control-flow opcodes get no register frame of their own.
    pub fn is_control_flow(self) -> bool {
        matches!(self, OpKind::SetJmp | OpKind::Jump)
    }

    fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Input => "input",
            OpKind::Select => "select",
            OpKind::With => "with",
            OpKind::SubSet => "subset",
            OpKind::SuperSet => "superset",
            OpKind::Store => "store",
            OpKind::Each => "each",
            OpKind::SetJmp => "setjmp",
            OpKind::Jump => "jump",
            OpKind::Yield => "yield",
        }
    }

    fn has_filter(self) -> bool {
        matches!(
            self,
            OpKind::Select | OpKind::With | OpKind::SubSet | OpKind::SuperSet
        )
    }
}

/// A register operand: absent, a variable's register, or a literal id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpArg {
    None,
    Var(VarId),
    Literal(Id),
}

impl OpArg {
    pub fn var(self) -> Option<VarId> {
        match self {
            OpArg::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// One operation of a compiled program.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Op {
    pub kind: OpKind,
    /// Filter parameter; `None` for opcodes that do not filter.
    pub param: Option<Pair>,
    /// Jump target when the operation matches.
    pub on_pass: i32,
    /// Jump target when it does not; `-1` terminates.
    pub on_fail: i32,
    /// Source term index this operation satisfies, or `-1`.
    pub term: i32,
    pub r_in: OpArg,
    pub r_out: OpArg,
}

impl Op {
    pub fn new(kind: OpKind) -> Op {
        Op {
            kind,
            param: None,
            on_pass: -1,
            on_fail: -1,
            term: -1,
            r_in: OpArg::None,
            r_out: OpArg::None,
        }
    }
}

fn write_reg(out: &mut String, label: char, arg: OpArg, vars: &[Variable]) {
    match arg {
        OpArg::None => {}
        OpArg::Var(v) => {
            let var = &vars[v as usize];
            let prefix = if var.kind == VarKind::Table { "t" } else { "" };
            let _ = write!(out, "{}:{}{} ", label, prefix, var.name);
        }
        OpArg::Literal(id) => {
            let _ = write!(out, "{}:{} ", label, id);
        }
    }
}

fn slot_str(slot: PairSlot, vars: &[Variable]) -> String {
    match slot {
        PairSlot::Var(v) => vars[v as usize].name.clone(),
        PairSlot::Literal(id) => id.to_string(),
    }
}

/// Render a program one opcode per line:
/// `idx: [P:pass, F:fail] mnemonic I:in O:out F:(pred[,obj])`.
/// The Input prologue is omitted, it carries no information.
pub(crate) fn disassemble(ops: &[Op], vars: &[Variable]) -> String {
    let mut out = String::new();
    for (i, op) in ops.iter().enumerate().skip(1) {
        let _ = write!(
            out,
            "{:2}: [P:{:2}, F:{:2}] {:<8} ",
            i, op.on_pass, op.on_fail, op.kind.mnemonic()
        );
        write_reg(&mut out, 'I', op.r_in, vars);
        write_reg(&mut out, 'O', op.r_out, vars);
        if op.kind.has_filter() {
            if let Some(pair) = &op.param {
                match pair.obj {
                    Some(obj) => {
                        let _ = write!(
                            out,
                            "F:({}, {})",
                            slot_str(pair.pred, vars),
                            slot_str(obj, vars)
                        );
                    }
                    None => {
                        let _ = write!(out, "F:({})", slot_str(pair.pred, vars));
                    }
                }
            }
        }
        while out.ends_with(' ') {
            out.pop();
        }
        out.push('\n');
    }
    out
}
