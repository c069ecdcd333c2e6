//! Rule compilation and iteration
//!
//! A [`Rule`] is the compiled form of a query expression: an immutable
//! opcode program plus its variable table. Compiling consults the store
//! only for id metadata; all data access happens during iteration, so a
//! rule can outlive any particular store state and be shared freely
//! between iterators.
//!
//! ```ignore
//! let rule = Rule::new(&store, &terms)?;
//! let mut it = rule.iter(&store);
//! while it.next() {
//!     // it.entities(), it.columns(), it.variable(..)
//! }
//! ```

mod compile;
mod pair;
mod program;
mod vars;
mod vm;

use std::fmt;

use crate::ids::Id;
use crate::store::Store;
use crate::term::Term;

use program::Op;
use vars::{VarKind, VarTable};

pub use vm::RuleIter;

/// Errors surfaced while compiling an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// A term carried more than two arguments.
    TooManyTermArguments { term: usize },
    /// The expression needs more variables than a register index can
    /// address.
    TooManyVariables,
    /// A variable is unreachable from the root and would never be bound.
    UnconstrainedVariable { name: String },
    /// A literal that must be stored into a table register has no
    /// storage record.
    NoBackingTable { id: Id },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooManyTermArguments { term } => {
                write!(f, "too many arguments for term {}", term)
            }
            Self::TooManyVariables => write!(f, "too many variables (max 256)"),
            Self::UnconstrainedVariable { name } => {
                write!(f, "unconstrained variable '{}'", name)
            }
            Self::NoBackingTable { id } => {
                write!(f, "cannot store entity {}, it has no table", id)
            }
        }
    }
}

impl std::error::Error for RuleError {}

/// Result type for rule compilation.
pub type RuleResult<T> = Result<T, RuleError>;

/// A compiled query program.
pub struct Rule {
    ops: Vec<Op>,
    vars: VarTable,
    term_count: usize,
}

impl Rule {
    /// Compile `terms` against `store` metadata.
    pub fn new<S: Store + ?Sized>(store: &S, terms: &[Term]) -> RuleResult<Rule> {
        let (ops, vars) = compile::compile(store, terms)?;
        Ok(Rule { ops, vars, term_count: terms.len() })
    }

    /// Start iterating matches against `store`. The store must be the
    /// one the rule was compiled for, or at least agree with it on id
    /// metadata.
    pub fn iter<'a>(&'a self, store: &'a dyn Store) -> RuleIter<'a> {
        RuleIter::new(self, store)
    }

    /// Number of terms in the source expression.
    pub fn term_count(&self) -> usize {
        self.term_count
    }

    /// Number of variables, counting table/entity twins separately.
    pub fn variable_count(&self) -> usize {
        self.vars.vars.len()
    }

    /// Find a variable by name. Prefers the entity form, which is the
    /// one whose value [`RuleIter::variable`] can report.
    pub fn find_variable(&self, name: &str) -> Option<usize> {
        self.vars
            .find(VarKind::Entity, name)
            .or_else(|| self.vars.find(VarKind::Table, name))
    }

    pub fn variable_name(&self, var: usize) -> &str {
        &self.vars.vars[var].name
    }

    /// Whether the variable holds single entities rather than tables.
    pub fn variable_is_entity(&self, var: usize) -> bool {
        self.vars.vars[var].kind == VarKind::Entity
    }

    /// Human-readable listing of the compiled program, one opcode per
    /// line.
    pub fn disassemble(&self) -> String {
        program::disassemble(&self.ops, &self.vars.vars)
    }

    pub(crate) fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub(crate) fn vars(&self) -> &VarTable {
        &self.vars
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("ops", &self.ops.len())
            .field("variables", &self.vars.vars.len())
            .field("terms", &self.term_count)
            .finish()
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}
