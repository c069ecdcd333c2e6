//! Opcode emission
//!
//! Lowers a scanned expression into the linear program the VM evaluates.
//! Emission happens in three phases: an Input prologue, the body (terms
//! with literal subjects first, then every term of each subject variable
//! in planner order), and an epilogue that forwards table matches into
//! entity registers before the final Yield.
//!
//! Every opcode gets `on_pass` pointing at the next slot and `on_fail` at
//! the previous one, so a failing opcode resumes its predecessor. The
//! only exception is the inclusive-set block, which wires its own
//! targets.

use tracing::debug;

use crate::ids::{Id, ISA};
use crate::rule::pair::{Pair, PairSlot};
use crate::rule::program::{Op, OpArg, OpKind};
use crate::rule::vars::{scan_variables, term_vars, VarId, VarKind, VarTable};
use crate::rule::RuleError;
use crate::store::{Role, Store};
use crate::term::{Term, TermArg};

/// Compile an expression against `store` metadata.
pub(crate) fn compile<S: Store + ?Sized>(
    store: &S,
    terms: &[Term],
) -> Result<(Vec<Op>, VarTable), RuleError> {
    let vars = scan_variables(terms)?;
    let written = vec![false; vars.vars.len()];
    let mut compiler = Compiler { store, terms, vars, ops: Vec::new(), written };

    compiler.push_op(OpKind::Input);

    // Terms with a literal subject iterate one known entity's type and
    // are the cheapest way to narrow the search, so they go first.
    for t in 0..terms.len() {
        let (_, subj, _) = term_vars(&compiler.vars, &terms[t]);
        if subj.is_none() {
            compiler.insert_term(t)?;
        }
    }

    // Then every term of each subject variable, in planner order.
    for v in 0..compiler.vars.subject_count {
        for t in 0..terms.len() {
            let (_, subj, _) = term_vars(&compiler.vars, &terms[t]);
            if subj == Some(v) {
                compiler.insert_term(t)?;
            }
        }
    }

    // Entity variables that only ever appeared as a predicate or object
    // of a resolved table still need their values forwarded.
    for v in compiler.vars.subject_count..compiler.vars.vars.len() {
        if compiler.written[v] {
            continue;
        }
        debug_assert_eq!(compiler.vars.vars[v].kind, VarKind::Entity);
        let name = compiler.vars.vars[v].name.clone();
        let table_var = compiler
            .vars
            .find(VarKind::Table, &name)
            .unwrap_or_else(|| unreachable!("unwritten variable {name} has no table form"));
        let each = compiler.push_op(OpKind::Each);
        compiler.ops[each].r_in = OpArg::Var(table_var as VarId);
        compiler.ops[each].r_out = OpArg::Var(v as VarId);
        compiler.written[v] = true;
    }

    compiler.insert_yield();

    debug!(
        ops = compiler.ops.len(),
        variables = compiler.vars.vars.len(),
        terms = terms.len(),
        "program compiled"
    );

    Ok((compiler.ops, compiler.vars))
}

struct Compiler<'a, S: Store + ?Sized> {
    store: &'a S,
    terms: &'a [Term],
    vars: VarTable,
    ops: Vec<Op>,
    written: Vec<bool>,
}

fn literal_id(arg: &TermArg) -> Id {
    match arg {
        TermArg::Literal(id) => *id,
        _ => Id(0),
    }
}

impl<S: Store + ?Sized> Compiler<'_, S> {
    /// Append an opcode with the default control flow: pass to the next
    /// slot, fail to the previous one.
    fn push_op(&mut self, kind: OpKind) -> usize {
        let idx = self.ops.len();
        let mut op = Op::new(kind);
        op.on_pass = idx as i32 + 1;
        op.on_fail = idx as i32 - 1;
        self.ops.push(op);
        idx
    }

    fn entity_var(&self, name: &str) -> usize {
        self.vars
            .find(VarKind::Entity, name)
            .unwrap_or_else(|| unreachable!("variable {name} was registered during scanning"))
    }

    /// Encode a term's (predicate, object) into a pair, resolving
    /// variable slots to their entity forms and pulling transitivity and
    /// finality off the predicate's metadata.
    fn term_pair(&self, term: &Term) -> Pair {
        let mut pair = match term.pred.var_name() {
            Some(name) => {
                let mut p = Pair::new(PairSlot::Var(self.entity_var(name) as VarId));
                // A variable predicate matches concrete ids; no subset
                // expansion applies.
                p.final_pred = true;
                p
            }
            None => {
                let pred_id = literal_id(&term.pred);
                let mut p = Pair::new(PairSlot::Literal(pred_id));
                // Transitivity only means something with an object.
                p.transitive = term.object().is_some()
                    && self.store.has_role(pred_id, Role::Transitive);
                p.final_pred = self.store.has_role(pred_id, Role::Final);
                p
            }
        };

        if let Some(obj) = term.object() {
            pair.obj = Some(match obj.var_name() {
                Some(name) => PairSlot::Var(self.entity_var(name) as VarId),
                None => PairSlot::Literal(literal_id(obj)),
            });
        }

        pair
    }

    fn to_entity(&self, var: usize) -> Option<usize> {
        if self.vars.vars[var].kind == VarKind::Table {
            self.vars.find(VarKind::Entity, &self.vars.vars[var].name)
        } else {
            Some(var)
        }
    }

    /// The most specific resolved form of a variable. If its table form
    /// has been written but its entity form has not, an Each is emitted
    /// here so downstream operations see single entities.
    fn most_specific(&mut self, var: usize) -> usize {
        let Some(evar) = self.to_entity(var) else {
            return var;
        };
        let tvar = if self.vars.vars[var].kind == VarKind::Table {
            Some(var)
        } else {
            self.vars.find(VarKind::Table, &self.vars.vars[var].name)
        };

        if let Some(t) = tvar.filter(|&t| self.written[t]) {
            if !self.written[evar] {
                let each = self.push_op(OpKind::Each);
                self.ops[each].r_in = OpArg::Var(t as VarId);
                self.ops[each].r_out = OpArg::Var(evar as VarId);
                self.written[evar] = true;
            }
            evar
        } else if self.written[evar] {
            evar
        } else {
            var
        }
    }

    /// Promote a pair's variable slots so they reference resolved entity
    /// registers wherever the table form is already known.
    fn promoted_pair(&mut self, term: usize) -> Pair {
        let mut pair = self.term_pair(&self.terms[term]);
        if let PairSlot::Var(p) = pair.pred {
            pair.pred = PairSlot::Var(self.most_specific(p as usize) as VarId);
        }
        if let Some(PairSlot::Var(o)) = pair.obj {
            pair.obj = Some(PairSlot::Var(self.most_specific(o as usize) as VarId));
        }
        pair
    }

    fn insert_term(&mut self, t: usize) -> Result<(), RuleError> {
        match self.terms[t].object() {
            None => self.insert_term_1(t),
            Some(_) => self.insert_term_2(t),
        }
    }

    fn insert_term_1(&mut self, t: usize) -> Result<(), RuleError> {
        let (pred, subj, _) = term_vars(&self.vars, &self.terms[t]);
        let pair = self.term_pair(&self.terms[t]);
        let subj = subj.map(|s| self.most_specific(s));

        if pred.is_some() || pair.final_pred {
            let pair = self.promoted_pair(t);
            self.select_or_with(t as i32, pair, subj);
            Ok(())
        } else {
            self.insert_nonfinal(t, subj)
        }
    }

    fn insert_term_2(&mut self, t: usize) -> Result<(), RuleError> {
        let (pred, subj, obj) = term_vars(&self.vars, &self.terms[t]);
        let pair = self.term_pair(&self.terms[t]);
        let subj = subj.map(|s| self.most_specific(s));

        if pred.is_some() || (pair.final_pred && !pair.transitive) {
            let pair = self.promoted_pair(t);
            self.select_or_with(t as i32, pair, subj);
            return Ok(());
        }
        if !pair.final_pred {
            return self.insert_nonfinal(t, subj);
        }

        // Transitive predicate: expand through sub/supersets depending on
        // which ends are already bound.
        let subj_known = subj.map_or(true, |s| self.written[s]);
        let obj_known = obj.map_or(true, |o| self.written[o]);
        let subject_literal = literal_id(self.terms[t].subject());
        let object_literal = self.terms[t].object().map(literal_id).unwrap_or(Id(0));

        if subj_known {
            if obj_known {
                // Both ends bound: every subset of the object is a valid
                // object, checked with a With against the subject.
                let obj_subsets =
                    self.store_inclusive_set(OpKind::SubSet, pair.pred, obj, object_literal)?;

                let subj = subj.map(|s| {
                    if self.vars.vars[s].kind == VarKind::Table {
                        self.most_specific(s)
                    } else {
                        s
                    }
                });

                let mut wpair = self.promoted_pair(t);
                wpair.obj = Some(PairSlot::Var(obj_subsets as VarId));
                let idx = self.push_op(OpKind::With);
                self.ops[idx].param = Some(wpair);
                self.ops[idx].term = t as i32;
                self.ops[idx].r_in = match subj {
                    Some(s) => OpArg::Var(s as VarId),
                    None => OpArg::Literal(subject_literal),
                };
            } else {
                // Subject bound, object free: walk the subject's ancestor
                // chain, starting with the subject itself.
                let obj_entity = obj.and_then(|o| self.to_entity(o)).unwrap_or_else(|| {
                    unreachable!("free transitive object resolves to an entity variable")
                });
                self.insert_inclusive_set(
                    OpKind::SuperSet,
                    obj_entity,
                    pair.pred,
                    subj,
                    subject_literal,
                    t as i32,
                )?;
            }
        } else if obj_known {
            // Object bound, subject free: the subject is the object
            // itself plus every table beneath it.
            let obj = obj.map(|o| self.most_specific(o));
            let subj = subj.unwrap_or_else(|| {
                unreachable!("free transitive subject is a variable")
            });
            self.insert_inclusive_set(
                OpKind::SubSet,
                subj,
                pair.pred,
                obj,
                object_literal,
                t as i32,
            )?;
        } else {
            // Neither end bound: find any (subject, object) edge, then
            // expand the object's supersets. The reflexive (v, v) row is
            // not produced for the anonymous subject.
            let av = self.vars.create_anonymous(VarKind::Entity)?;
            self.written.resize(self.vars.vars.len(), false);

            let subj = subj.unwrap_or_else(|| {
                unreachable!("free transitive subject is a variable")
            });
            let mut spair = pair;
            spair.obj = Some(PairSlot::Var(av as VarId));

            let select = self.push_op(OpKind::Select);
            self.ops[select].param = Some(spair);
            self.ops[select].r_out = OpArg::Var(subj as VarId);
            self.written[subj] = true;
            self.written[av] = true;

            let obj_entity = obj.and_then(|o| self.to_entity(o)).unwrap_or_else(|| {
                unreachable!("free transitive object resolves to an entity variable")
            });
            self.insert_inclusive_set(
                OpKind::SuperSet,
                obj_entity,
                spair.pred,
                Some(av),
                Id(0),
                t as i32,
            )?;
        }
        Ok(())
    }

    /// Decide between Select (subject unknown: enumerate tables) and With
    /// (subject known: membership check), wire the registers, and mark
    /// everything the operation binds as written.
    fn select_or_with(&mut self, term: i32, pair: Pair, subj: Option<usize>) {
        let idx = self.push_op(OpKind::With);
        self.ops[idx].param = Some(pair);
        self.ops[idx].term = term;

        match subj {
            None => {
                self.ops[idx].r_in =
                    OpArg::Literal(literal_id(self.terms[term as usize].subject()));
            }
            Some(s) => {
                let evar = self.to_entity(s);
                let tvar = (self.vars.vars[s].kind == VarKind::Table).then_some(s);
                let known = evar.is_some_and(|e| self.written[e])
                    || tvar.is_some_and(|t| self.written[t]);
                if known {
                    self.ops[idx].r_in = OpArg::Var(s as VarId);
                } else {
                    self.ops[idx].kind = OpKind::Select;
                    self.ops[idx].r_out = OpArg::Var(s as VarId);
                    self.written[s] = true;
                }
            }
        }

        if let PairSlot::Var(p) = pair.pred {
            self.written[p as usize] = true;
        }
        if let Some(PairSlot::Var(o)) = pair.obj {
            self.written[o as usize] = true;
        }
    }

    /// Expand a non-final predicate: enumerate its subtypes through an
    /// inclusive subset of the subtype relation, then select/with against
    /// the subtype variable.
    fn insert_nonfinal(&mut self, t: usize, subj: Option<usize>) -> Result<(), RuleError> {
        let pair = self.term_pair(&self.terms[t]);
        let PairSlot::Literal(pred_id) = pair.pred else {
            unreachable!("non-final predicates are literals");
        };

        let pred_subsets =
            self.store_inclusive_set(OpKind::SubSet, PairSlot::Literal(ISA), None, pred_id)?;

        // Use the most specific form of the object before emitting.
        if let Some(PairSlot::Var(o)) = pair.obj {
            self.most_specific(o as usize);
        }

        let op_pair = Pair {
            pred: PairSlot::Var(pred_subsets as VarId),
            obj: pair.obj,
            transitive: false,
            final_pred: false,
        };
        self.select_or_with(t as i32, op_pair, subj);
        Ok(())
    }

    /// Emit the four-opcode inclusive-set idiom. `SetJmp` first routes to
    /// `Store`, which yields the root itself exactly once; on redo it
    /// routes to the Sub/SuperSet expansion. The trailing `Jump` reads
    /// the armed label so the block's failures escape upward correctly.
    fn insert_inclusive_set(
        &mut self,
        kind: OpKind,
        out: usize,
        pred: PairSlot,
        root: Option<usize>,
        root_entity: Id,
        term: i32,
    ) -> Result<(), RuleError> {
        debug_assert!(
            kind != OpKind::SuperSet || self.vars.vars[out].kind == VarKind::Entity
        );

        // The Store below writes the root into a table register; an
        // entity with no storage location can never satisfy that.
        if root.is_none()
            && self.vars.vars[out].kind == VarKind::Table
            && self.store.record_of(root_entity).is_none()
        {
            return Err(RuleError::NoBackingTable { id: root_entity });
        }

        let setjmp_lbl = self.ops.len() as i32;
        let store_lbl = setjmp_lbl + 1;
        let set_lbl = setjmp_lbl + 2;
        let next_op = setjmp_lbl + 4;
        let prev_op = setjmp_lbl - 1;

        let root_slot = match root {
            Some(r) => PairSlot::Var(r as VarId),
            None => PairSlot::Literal(root_entity),
        };
        let block_pair = Pair {
            pred,
            obj: Some(root_slot),
            transitive: false,
            final_pred: false,
        };

        let setjmp = self.push_op(OpKind::SetJmp);
        self.ops[setjmp].on_pass = store_lbl;
        self.ops[setjmp].on_fail = set_lbl;

        let store = self.push_op(OpKind::Store);
        self.ops[store].param = Some(block_pair);
        self.ops[store].on_pass = next_op;
        self.ops[store].on_fail = setjmp_lbl;
        self.ops[store].r_out = OpArg::Var(out as VarId);
        self.ops[store].term = term;
        self.ops[store].r_in = match root {
            Some(r) => OpArg::Var(r as VarId),
            None => OpArg::Literal(root_entity),
        };

        let set = self.push_op(kind);
        self.ops[set].param = Some(block_pair);
        self.ops[set].on_pass = next_op;
        self.ops[set].on_fail = prev_op;
        self.ops[set].r_out = OpArg::Var(out as VarId);
        self.ops[set].term = term;

        let jump = self.push_op(OpKind::Jump);
        self.ops[jump].on_pass = setjmp_lbl;
        self.ops[jump].on_fail = -1;

        self.written[out] = true;
        Ok(())
    }

    /// Emit an inclusive set into a fresh anonymous variable and return
    /// its entity form, forwarded through an Each where necessary.
    fn store_inclusive_set(
        &mut self,
        kind: OpKind,
        pred: PairSlot,
        root: Option<usize>,
        root_entity: Id,
    ) -> Result<usize, RuleError> {
        let var_kind = if kind == OpKind::SuperSet {
            VarKind::Entity
        } else {
            // Subset expansion produces whole tables.
            VarKind::Table
        };

        let av = self.vars.create_anonymous(var_kind)?;
        if var_kind == VarKind::Table {
            let name = self.vars.vars[av].name.clone();
            self.vars.create(VarKind::Entity, &name)?;
        }
        self.written.resize(self.vars.vars.len(), false);

        let root = root.map(|r| self.most_specific(r));
        self.insert_inclusive_set(kind, av, pred, root, root_entity, -1)?;

        let evar = self.most_specific(av);
        debug_assert_eq!(self.vars.vars[evar].kind, VarKind::Entity);
        debug_assert!(self.written[evar]);
        Ok(evar)
    }

    fn insert_yield(&mut self) {
        // Yield publishes the implicit subject when the expression names
        // one anywhere, else the elected root. Either way the entity
        // form wins over the table form: when per-entity iteration was
        // required, single entities are what the caller expects.
        let this = crate::rule::vars::THIS_NAME.to_string();
        let name = if self.vars.find(VarKind::Unknown, &this).is_some() {
            Some(this)
        } else {
            self.vars.root.clone()
        };
        let r_in = name
            .and_then(|name| {
                self.vars
                    .find(VarKind::Entity, &name)
                    .or_else(|| self.vars.find(VarKind::Table, &name))
            })
            .map(|v| OpArg::Var(v as VarId))
            .unwrap_or(OpArg::None);

        let idx = self.push_op(OpKind::Yield);
        self.ops[idx].r_in = r_in;
    }
}
