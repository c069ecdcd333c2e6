//! Parsed query expressions
//!
//! A query is a list of [`Term`]s. Each term applies a predicate to a
//! subject and optionally an object; any of the three slots can be a
//! literal id, a named variable, or the implicit subject `This`. Parsing
//! query text into terms is the host's job; this module only defines the
//! shape the compiler consumes.

use crate::ids::Id;

/// One slot of a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TermArg {
    /// A concrete identifier.
    Literal(Id),
    /// A named variable to be solved for.
    Var(String),
    /// The implicit subject of the query.
    This,
}

impl TermArg {
    pub fn var(name: impl Into<String>) -> Self {
        TermArg::Var(name.into())
    }

    /// The variable name this slot resolves under, if it is variable-like.
    /// `This` participates in variable resolution under the name `.`.
    pub(crate) fn var_name(&self) -> Option<&str> {
        match self {
            TermArg::Var(name) => Some(name),
            TermArg::This => Some("."),
            TermArg::Literal(_) => None,
        }
    }
}

impl From<Id> for TermArg {
    fn from(id: Id) -> Self {
        TermArg::Literal(id)
    }
}

/// One predicate application within a query.
///
/// `args[0]` is the subject and `args[1]` the object. A term constructed
/// without arguments gets `This` as its implicit subject. More than two
/// arguments is rejected at compile time, not here, so that the error can
/// name the offending term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub pred: TermArg,
    pub args: Vec<TermArg>,
}

impl Term {
    /// A term with the implicit `This` subject: `pred(.)`.
    pub fn new(pred: impl Into<TermArg>) -> Self {
        Term { pred: pred.into(), args: vec![TermArg::This] }
    }

    /// A one-argument term: `pred(subject)`.
    pub fn with_subject(pred: impl Into<TermArg>, subject: impl Into<TermArg>) -> Self {
        Term { pred: pred.into(), args: vec![subject.into()] }
    }

    /// A two-argument term: `pred(subject, object)`.
    pub fn with_pair(
        pred: impl Into<TermArg>,
        subject: impl Into<TermArg>,
        object: impl Into<TermArg>,
    ) -> Self {
        Term {
            pred: pred.into(),
            args: vec![subject.into(), object.into()],
        }
    }

    /// Append another argument. Used to build malformed terms in tests as
    /// well as by hosts that lower parsed expressions mechanically.
    pub fn arg(mut self, arg: impl Into<TermArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn subject(&self) -> &TermArg {
        &self.args[0]
    }

    pub(crate) fn object(&self) -> Option<&TermArg> {
        self.args.get(1)
    }
}
