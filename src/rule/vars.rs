//! Variable discovery and ordering
//!
//! Before any opcode is emitted the planner scans the expression, creates
//! one variable per distinct name and role, elects a root, and orders the
//! variables by their dependency distance from that root. The resulting
//! order decides which terms are compiled first, which is what keeps the
//! emitted program cheap: variables close to the root narrow the search
//! before the distant ones are enumerated.
//!
//! Subject variables are table-valued (a subject can match a whole table
//! at once); predicate and object variables are entity-valued. The same
//! name can exist in both forms when a table match later needs per-entity
//! iteration.

use tracing::debug;

use crate::rule::RuleError;
use crate::term::Term;

/// Index of a variable in the rule's variable array.
pub(crate) type VarId = u16;

/// Hard cap on variables per rule. Keeps register indices in the envelope
/// the frame layout assumes.
pub(crate) const MAX_VARIABLES: usize = 256;

/// Depth sentinel: not yet reached from the root.
pub(crate) const DEPTH_UNSET: i32 = u8::MAX as i32;

/// Name under which the implicit subject participates in resolution.
pub(crate) const THIS_NAME: &str = ".";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum VarKind {
    /// Holds a table span. Must sort before Entity.
    Table,
    /// Holds a single entity id.
    Entity,
    /// Kind not yet decided during scanning.
    Unknown,
}

#[derive(Debug, Clone)]
pub(crate) struct Variable {
    pub kind: VarKind,
    pub name: String,
    pub occurs: i32,
    pub depth: i32,
    marked: bool,
}

/// The planner's output: variables in emission order plus the subject
/// count and the elected root's name.
#[derive(Debug, Default)]
pub(crate) struct VarTable {
    pub vars: Vec<Variable>,
    pub subject_count: usize,
    pub root: Option<String>,
}

impl VarTable {
    /// Find a variable by name and kind. `Unknown` matches either kind;
    /// the first variable created under the name wins, which resolves a
    /// twinned name to its table form.
    pub fn find(&self, kind: VarKind, name: &str) -> Option<usize> {
        self.vars.iter().position(|v| {
            v.name == name && (kind == VarKind::Unknown || v.kind == kind)
        })
    }

    pub fn create(&mut self, kind: VarKind, name: &str) -> Result<usize, RuleError> {
        if self.vars.len() >= MAX_VARIABLES {
            return Err(RuleError::TooManyVariables);
        }
        self.vars.push(Variable {
            kind,
            name: name.to_string(),
            occurs: 0,
            depth: DEPTH_UNSET,
            marked: false,
        });
        Ok(self.vars.len() - 1)
    }

    /// Create an unnamed variable. The name records the creation index so
    /// disassembly stays readable.
    pub fn create_anonymous(&mut self, kind: VarKind) -> Result<usize, RuleError> {
        let name = format!("_{}", self.vars.len());
        self.create(kind, &name)
    }

    fn ensure(&mut self, kind: VarKind, name: &str) -> Result<usize, RuleError> {
        match self.find(kind, name) {
            Some(i) => {
                if self.vars[i].kind == VarKind::Unknown {
                    self.vars[i].kind = kind;
                }
                Ok(i)
            }
            None => self.create(kind, name),
        }
    }

    fn is_subject(&self, var: usize) -> bool {
        var < self.subject_count
    }
}

/// Resolve the three slots of a term to variable indices. Literal slots
/// resolve to `None`.
pub(crate) fn term_vars(
    vars: &VarTable,
    term: &Term,
) -> (Option<usize>, Option<usize>, Option<usize>) {
    let lookup = |name: Option<&str>| name.and_then(|n| vars.find(VarKind::Unknown, n));
    (
        lookup(term.pred.var_name()),
        lookup(term.subject().var_name()),
        lookup(term.object().and_then(|o| o.var_name())),
    )
}

/// Scan terms for variables, elect the root, compute dependency depths,
/// reject unconstrained variables and sort into emission order.
pub(crate) fn scan_variables(terms: &[Term]) -> Result<VarTable, RuleError> {
    let mut table = VarTable::default();

    let mut max_occur = 0;
    let mut max_occur_var: Option<usize> = None;
    let mut has_this = false;

    // Find all possible roots: every variable-valued subject becomes a
    // table variable.
    for (i, term) in terms.iter().enumerate() {
        if term.args.len() > 2 {
            return Err(RuleError::TooManyTermArguments { term: i });
        }

        if let Some(name) = term.subject().var_name() {
            let subj = match table.find(VarKind::Table, name) {
                Some(v) => v,
                None => table.create(VarKind::Table, name)?,
            };
            has_this |= name == THIS_NAME;
            table.vars[subj].occurs += 1;
            if table.vars[subj].occurs > max_occur {
                max_occur = table.vars[subj].occurs;
                max_occur_var = Some(subj);
            }
        }
    }

    table.subject_count = table.vars.len();

    ensure_all_variables(&mut table, terms)?;

    // Elect the root: This always wins, otherwise the subject with the
    // most occurrences. Without subject variables the expression checks a
    // fixed set of entities and needs no ordering at all.
    let root = if has_this {
        table.find(VarKind::Table, THIS_NAME)
    } else {
        max_occur_var
    };
    let Some(root) = root else {
        return Ok(table);
    };

    let depth = variable_depth(&mut table, terms, root, root);
    table.vars[root].depth = depth;

    for v in 0..table.subject_count {
        if table.vars[v].depth == DEPTH_UNSET {
            return Err(RuleError::UnconstrainedVariable {
                name: table.vars[v].name.clone(),
            });
        }
    }

    table.root = Some(table.vars[root].name.clone());

    // Emission order: tables before entities, near the root before far
    // from it, frequent before rare. The sort is stable, so equally
    // ranked variables keep creation order.
    table
        .vars
        .sort_by(|a, b| a.kind.cmp(&b.kind).then(a.depth.cmp(&b.depth)).then(b.occurs.cmp(&a.occurs)));

    debug!(
        variables = table.vars.len(),
        subjects = table.subject_count,
        root = table.root.as_deref().unwrap_or(""),
        "variables ordered"
    );

    Ok(table)
}

/// Every predicate/object variable (and every named subject) must also
/// exist in entity form before emission starts, so the variable array
/// stays stable while opcodes are generated.
fn ensure_all_variables(table: &mut VarTable, terms: &[Term]) -> Result<(), RuleError> {
    for term in terms {
        if let Some(name) = term.pred.var_name() {
            table.ensure(VarKind::Entity, name)?;
        }
        // This is excluded: its entity form is created lazily when a
        // term actually needs per-entity iteration.
        if let crate::term::TermArg::Var(name) = term.subject() {
            table.ensure(VarKind::Entity, name)?;
        }
        if let Some(name) = term.object().and_then(|o| o.var_name()) {
            table.ensure(VarKind::Entity, name)?;
        }
    }
    Ok(())
}

/// Depth of `var`'s dependency tree below the root. Marks the variable
/// while it is being evaluated so cycles terminate instead of recursing.
fn variable_depth(table: &mut VarTable, terms: &[Term], var: usize, root: usize) -> i32 {
    table.vars[var].marked = true;

    let mut result = DEPTH_UNSET;
    for term in terms {
        let (pred, subj, obj) = term_vars(table, term);
        if subj != Some(var) {
            continue;
        }

        // Only subject variables carry depth information.
        let pred = pred.filter(|&p| table.is_subject(p));
        let obj = obj.filter(|&o| table.is_subject(o));

        let depth = depth_from_term(table, terms, var, pred, obj, root);
        if depth < result {
            result = depth;
        }
    }

    if result == DEPTH_UNSET {
        result = 0;
    }
    table.vars[var].depth = result;

    // Depths flow from subject to predicate/object. Subjects related only
    // through a shared predicate or object are still reachable, so crawl
    // the co-occurring variables of every term this subject appears in.
    for t in 0..terms.len() {
        let (pred, subj, obj) = term_vars(table, &terms[t]);
        if subj != Some(var) {
            continue;
        }
        crawl_variable(table, terms, var, root);
        if let Some(p) = pred.filter(|&p| p != var) {
            crawl_variable(table, terms, p, root);
        }
        if let Some(o) = obj.filter(|&o| o != var) {
            crawl_variable(table, terms, o, root);
        }
    }

    table.vars[var].depth
}

/// Visit every unmarked variable that shares a term with `var`.
fn crawl_variable(table: &mut VarTable, terms: &[Term], var: usize, root: usize) {
    for t in 0..terms.len() {
        let (pred, subj, obj) = term_vars(table, &terms[t]);
        let slots = [pred, subj, obj];
        if !slots.contains(&Some(var)) {
            continue;
        }
        for slot in slots.into_iter().flatten() {
            if slot != var && !table.vars[slot].marked {
                variable_depth(table, terms, slot, root);
            }
        }
    }
}

fn depth_from_var(table: &mut VarTable, terms: &[Term], var: usize, root: usize) -> i32 {
    if var == root || table.vars[var].depth != DEPTH_UNSET {
        return table.vars[var].depth + 1;
    }
    // Already being evaluated: a cycle, which contributes nothing new.
    if table.vars[var].marked {
        return 0;
    }
    let depth = variable_depth(table, terms, var, root);
    if depth == DEPTH_UNSET {
        depth
    } else {
        depth + 1
    }
}

fn depth_from_term(
    table: &mut VarTable,
    terms: &[Term],
    cur: usize,
    pred: Option<usize>,
    obj: Option<usize>,
    root: usize,
) -> i32 {
    // A term whose other slots are all literals anchors its subject at
    // depth zero.
    if pred.is_none() && obj.is_none() {
        return 0;
    }

    let mut result = DEPTH_UNSET;
    for other in [pred, obj].into_iter().flatten() {
        if other == cur {
            continue;
        }
        let depth = depth_from_var(table, terms, other, root);
        if depth == DEPTH_UNSET {
            return DEPTH_UNSET;
        }
        if depth < result {
            result = depth;
        }
    }
    result
}
