//! Backtracking virtual machine
//!
//! Evaluates a compiled program against a store. Every opcode handler is
//! re-entrant: called with `redo = false` it starts a fresh search from
//! its inputs, called with `redo = true` it produces its next match. The
//! dispatcher turns the handler's boolean into control flow — pass moves
//! forward, fail rewinds — and copies the register frame forward on every
//! advance, which is what makes rewinding see the same inputs an opcode
//! saw the first time.
//!
//! Iterator state is owned exclusively by the iterator: register frames,
//! the per-term column frames, and one context slot per opcode for
//! iteration cursors and the sub/superset stacks. Dropping the iterator
//! at any point is safe; suspension happens only at Yield.

use smallvec::SmallVec;
use tracing::trace;

use crate::ids::{Id, THIS, WILDCARD};
use crate::rule::pair::{Filter, Pair, PairSlot};
use crate::rule::program::{Op, OpArg, OpKind};
use crate::rule::vars::{VarId, VarKind};
use crate::rule::Rule;
use crate::store::{Store, TableId, TableRecord, TableSet};

/// A register value. Entity registers that have not been reified read as
/// the wildcard, so filters built from them stay permissive.
#[derive(Debug, Clone, Copy, Default)]
enum Reg {
    #[default]
    Unbound,
    Entity(Id),
    Table(TableSpan),
}

/// A table register: the table plus the row range that matched. A zero
/// count means the whole table.
#[derive(Debug, Clone, Copy)]
struct TableSpan {
    table: TableId,
    offset: usize,
    count: usize,
}

impl TableSpan {
    fn whole(table: TableId) -> TableSpan {
        TableSpan { table, offset: 0, count: 0 }
    }
}

/// Cursor state shared by Select and With.
#[derive(Debug, Clone, Copy)]
struct WithCtx<'a> {
    table_set: Option<&'a TableSet>,
    /// Position in the table set's registration order.
    table_index: i32,
    /// Last matched column, for wildcard rescans within one table.
    column: i32,
}

#[derive(Debug)]
struct SubSetFrame<'a> {
    table_set: &'a TableSet,
    table_index: i32,
    table: TableId,
    row: usize,
    column: usize,
}

#[derive(Debug)]
struct SuperSetFrame {
    table: TableId,
    column: i32,
}

/// Per-opcode iteration state. Stacks start with inline storage so
/// shallow type hierarchies never allocate.
#[derive(Debug, Default)]
enum OpState<'a> {
    #[default]
    Empty,
    With(WithCtx<'a>),
    SubSet(SmallVec<[SubSetFrame<'a>; 16]>),
    SuperSet(SmallVec<[SuperSetFrame; 16]>),
    Each {
        row: usize,
    },
    SetJmp {
        label: i32,
    },
}

#[derive(Debug, Default)]
struct OpCtx<'a> {
    state: OpState<'a>,
    /// Index of the last non-control-flow opcode executed before this
    /// one; its frame holds this opcode's inputs.
    last_op: usize,
}

/// Find the next non-empty table in a set whose type matches the filter,
/// starting after `cursor`.
fn find_next_table(
    store: &dyn Store,
    set: &TableSet,
    filter: &Filter,
    cursor: &mut i32,
) -> Option<TableRecord> {
    loop {
        *cursor += 1;
        let rec = *set.get(*cursor as usize)?;
        if store.table_row_count(rec.table) == 0 {
            continue;
        }
        if let Some(column) = filter.next_match(store.table_type(rec.table), rec.column) {
            return Some(TableRecord { table: rec.table, column });
        }
    }
}

/// A streaming iterator over a rule's matches.
///
/// `next` runs the program until the next Yield and publishes the match:
/// the entities slice, the 1-based column per term, the id that satisfied
/// each term, and every variable's reified value.
pub struct RuleIter<'a> {
    rule: &'a Rule,
    store: &'a dyn Store,
    registers: Vec<Reg>,
    columns: Vec<i32>,
    op_ctx: Vec<OpCtx<'a>>,
    op: i32,
    redo: bool,
    done: bool,
    entities: &'a [Id],
    out_columns: Vec<i32>,
    term_ids: Vec<Id>,
}

impl<'a> RuleIter<'a> {
    pub(crate) fn new(rule: &'a Rule, store: &'a dyn Store) -> RuleIter<'a> {
        let op_count = rule.ops().len();
        let var_count = rule.vars().vars.len();
        let term_count = rule.term_count();
        RuleIter {
            rule,
            store,
            registers: vec![Reg::Unbound; op_count * var_count],
            columns: vec![-1; op_count * term_count],
            op_ctx: (0..op_count).map(|_| OpCtx::default()).collect(),
            op: 0,
            redo: false,
            done: false,
            entities: &[],
            out_columns: vec![0; term_count],
            term_ids: vec![Id(0); term_count],
        }
    }

    /// Advance to the next match. Returns false once the program is
    /// exhausted; the iterator stays exhausted afterwards.
    pub fn next(&mut self) -> bool {
        if self.done {
            return false;
        }

        let mut redo = self.redo;
        let mut last = 0usize;

        loop {
            let op_index = self.op as usize;
            let op = self.rule.ops()[op_index];

            // Advancing into a non-control-flow opcode snapshots the
            // frame it will run on. Rewinding later re-enters it with
            // exactly these inputs.
            if !redo && op_index != 0 && !op.kind.is_control_flow() {
                self.push_frame(last, op_index);
            }

            trace!(op = op_index, kind = ?op.kind, redo, "dispatch");
            let result = self.eval_op(op, op_index, redo);
            self.op = if result { op.on_pass } else { op.on_fail };
            redo = !result;

            match op.kind {
                OpKind::Yield => {
                    self.populate(op_index, op);
                    self.redo = true;
                    return true;
                }
                OpKind::Jump => {
                    // The SetJmp this jump belongs to armed the label.
                    let label = match &self.op_ctx[op.on_pass as usize].state {
                        OpState::SetJmp { label } => *label,
                        _ => unreachable!("jump target is not an armed setjmp"),
                    };
                    self.op = label;
                }
                OpKind::SetJmp => {
                    // First evaluation of whichever branch was chosen.
                    redo = false;
                }
                _ => {
                    last = op_index;
                }
            }

            if self.op == -1 {
                break;
            }
        }

        self.done = true;
        false
    }

    /// Entities of the current match. A whole table for table-valued
    /// results, a single entity otherwise, empty for pure fact checks.
    pub fn entities(&self) -> &[Id] {
        self.entities
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    /// For each term, the 1-based column index in the yielded table's
    /// type where the term was satisfied; 0 when the term was not
    /// satisfied from this table.
    pub fn columns(&self) -> &[i32] {
        &self.out_columns
    }

    /// The concrete id that satisfied a term in the current match.
    pub fn term_id(&self, term: usize) -> Id {
        self.term_ids[term]
    }

    /// Reified value of an entity variable in the current match. Table
    /// variables report zero.
    pub fn variable(&self, var: usize) -> Id {
        if self.rule.vars().vars[var].kind != VarKind::Entity {
            return Id(0);
        }
        self.entity_reg(self.rule.ops().len() - 1, var as VarId)
    }

    // ---- frames and registers ----

    fn var_count(&self) -> usize {
        self.rule.vars().vars.len()
    }

    fn frame(&self, op: usize) -> &[Reg] {
        let nv = self.var_count();
        &self.registers[op * nv..(op + 1) * nv]
    }

    fn push_frame(&mut self, from: usize, to: usize) {
        let nv = self.var_count();
        if nv != 0 {
            self.registers.copy_within(from * nv..(from + 1) * nv, to * nv);
        }
        let nt = self.rule.term_count();
        if nt != 0 {
            self.columns.copy_within(from * nt..(from + 1) * nt, to * nt);
        }
        self.op_ctx[to].last_op = from;
    }

    fn entity_reg(&self, frame: usize, var: VarId) -> Id {
        match self.frame(frame)[var as usize] {
            Reg::Entity(e) => e,
            Reg::Unbound => WILDCARD,
            Reg::Table(_) => unreachable!("entity read from a table register"),
        }
    }

    fn set_entity_reg(&mut self, frame: usize, var: VarId, entity: Id) {
        debug_assert_eq!(self.rule.vars().vars[var as usize].kind, VarKind::Entity);
        let nv = self.var_count();
        self.registers[frame * nv + var as usize] = Reg::Entity(entity);
    }

    fn set_table_reg(&mut self, frame: usize, var: VarId, span: TableSpan) {
        debug_assert_eq!(self.rule.vars().vars[var as usize].kind, VarKind::Table);
        let nv = self.var_count();
        self.registers[frame * nv + var as usize] = Reg::Table(span);
    }

    /// Read an operand as a single entity.
    fn reg_get_entity(&self, frame: usize, arg: OpArg) -> Id {
        match arg {
            OpArg::Literal(e) => e,
            OpArg::Var(v) => match self.rule.vars().vars[v as usize].kind {
                VarKind::Entity => self.entity_reg(frame, v),
                _ => match self.frame(frame)[v as usize] {
                    Reg::Table(span) => {
                        debug_assert_eq!(span.count, 1);
                        self.store.table_entities(span.table)[span.offset]
                    }
                    _ => unreachable!("entity read from an unbound table register"),
                },
            },
            OpArg::None => unreachable!("operand carries no entity"),
        }
    }

    /// Read an operand as a table, through the entity index if needed.
    fn reg_get_table(&self, frame: usize, arg: OpArg) -> Option<TableId> {
        match arg {
            OpArg::Literal(e) => self.store.table_of(e),
            OpArg::Var(v) => match self.rule.vars().vars[v as usize].kind {
                VarKind::Table => match self.frame(frame)[v as usize] {
                    Reg::Table(span) => Some(span.table),
                    _ => None,
                },
                _ => self.store.table_of(self.entity_reg(frame, v)),
            },
            OpArg::None => None,
        }
    }

    /// Write an entity into a register of either kind. Writing into a
    /// table register resolves the entity's storage location; an entity
    /// with no table fails the branch.
    fn set_entity_any(&mut self, frame: usize, var: VarId, entity: Id) -> bool {
        if self.rule.vars().vars[var as usize].kind == VarKind::Table {
            match self.store.record_of(entity) {
                Some(rec) => {
                    self.set_table_reg(
                        frame,
                        var,
                        TableSpan { table: rec.table, offset: rec.row, count: 1 },
                    );
                    true
                }
                None => false,
            }
        } else {
            self.set_entity_reg(frame, var, entity);
            true
        }
    }

    /// Materialize an opcode's pair against its *input* frame — the one
    /// snapshotted before this opcode ran, so redo never observes its own
    /// previous reifications.
    fn materialize(&self, op_index: usize, pair: &Pair) -> Filter {
        let input = self.op_ctx[op_index].last_op;
        Filter::materialize(pair, |v| self.entity_reg(input, v))
    }

    /// Fill still-wildcard variables from the id that matched.
    fn reify(&mut self, op_index: usize, filter: &Filter, id: Id) {
        if let Some(lo) = filter.lo_var {
            self.set_entity_reg(op_index, lo, id.lo());
        }
        if let Some(hi) = filter.hi_var {
            self.set_entity_reg(op_index, hi, id.hi());
        }
    }

    fn write_column(&mut self, op_index: usize, op: &Op, column: usize) {
        if op.term >= 0 {
            let nt = self.rule.term_count();
            self.columns[op_index * nt + op.term as usize] = column as i32;
        }
    }

    fn publish_term_id(&mut self, op: &Op, id: Id) {
        if op.term >= 0 {
            self.term_ids[op.term as usize] = id;
        }
    }

    // ---- handlers ----

    fn eval_op(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        match op.kind {
            OpKind::Input => !redo,
            OpKind::Select => self.eval_select(op, op_index, redo),
            OpKind::With => self.eval_with(op, op_index, redo),
            OpKind::SubSet => self.eval_subset(op, op_index, redo),
            OpKind::SuperSet => self.eval_superset(op, op_index, redo),
            OpKind::Store => self.eval_store(op, op_index, redo),
            OpKind::Each => self.eval_each(op, op_index, redo),
            OpKind::SetJmp => self.eval_setjmp(op, op_index, redo),
            OpKind::Jump => !redo,
            OpKind::Yield => false,
        }
    }

    /// Enumerate the table set matching the filter, one table per
    /// advance; wildcard filters additionally advance through matching
    /// columns within each table.
    fn eval_select(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let store = self.store;
        let r = op.r_out.var().unwrap_or_else(|| unreachable!("select writes a register"));
        let pair = op.param.unwrap_or_else(|| unreachable!("select has a filter"));
        let filter = self.materialize(op_index, &pair);

        if !redo {
            // The set is looked up fresh on every (re)start: variables
            // may have been rebound since the last time this opcode ran.
            self.op_ctx[op_index].state = OpState::With(WithCtx {
                table_set: store.table_set_for(filter.mask),
                table_index: -1,
                column: -1,
            });
        }

        let mut ctx = match &self.op_ctx[op_index].state {
            OpState::With(c) => *c,
            _ => unreachable!("select context"),
        };
        let Some(set) = ctx.table_set else {
            return false;
        };

        let mut found: Option<(TableId, usize)> = None;

        if !redo {
            if let Some(rec) = find_next_table(store, set, &filter, &mut ctx.table_index) {
                self.set_table_reg(op_index, r, TableSpan::whole(rec.table));
                found = Some((rec.table, rec.column));
            }
        } else {
            // Wildcard filters first look for further matches in the
            // current table.
            if filter.wildcard {
                if let Reg::Table(span) = self.frame(op_index)[r as usize] {
                    let ty = store.table_type(span.table);
                    if let Some(c) = filter.next_match(ty, (ctx.column + 1) as usize) {
                        found = Some((span.table, c));
                    }
                }
            }
            if found.is_none() {
                if let Some(rec) = find_next_table(store, set, &filter, &mut ctx.table_index) {
                    self.set_table_reg(op_index, r, TableSpan::whole(rec.table));
                    found = Some((rec.table, rec.column));
                }
            }
        }

        let Some((table, column)) = found else {
            return false;
        };
        ctx.column = column as i32;
        self.op_ctx[op_index].state = OpState::With(ctx);

        let matched = store.table_type(table)[column];
        if filter.wildcard {
            self.reify(op_index, &filter, matched);
        }
        self.write_column(op_index, &op, column);
        self.publish_term_id(&op, matched);
        true
    }

    /// Check the input table against the filter's table set. Transitive
    /// predicates match immediately when subject and object coincide.
    fn eval_with(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let store = self.store;
        let pair = op.param.unwrap_or_else(|| unreachable!("with has a filter"));
        let filter = self.materialize(op_index, &pair);

        // A fully concrete filter matches at most once per input.
        if redo && !filter.wildcard {
            return false;
        }

        if !redo {
            if pair.transitive {
                let subj = match op.r_in {
                    OpArg::Literal(e) => e,
                    OpArg::Var(v)
                        if self.rule.vars().vars[v as usize].kind == VarKind::Entity =>
                    {
                        self.entity_reg(op_index, v)
                    }
                    _ => Id(0),
                };
                if !subj.is_zero() && !filter.obj_wildcard && subj == filter.mask.lo() {
                    self.publish_term_id(&op, filter.mask);
                    return true;
                }
            }
            self.op_ctx[op_index].state = OpState::With(WithCtx {
                table_set: store.table_set_for(filter.mask),
                table_index: -1,
                column: -1,
            });
        }

        let (set, prev_column) = match &self.op_ctx[op_index].state {
            OpState::With(c) => (c.table_set, c.column),
            _ => unreachable!("with context"),
        };
        let Some(set) = set else {
            return false;
        };

        let Some(table) = self.reg_get_table(op_index, op.r_in) else {
            return false;
        };
        let ty = store.table_type(table);

        let column = if !redo {
            // O(1) membership probe: if the table is in the set at all,
            // the record already names the first matching column.
            let Some(rec) = set.find(table) else {
                return false;
            };
            filter.next_match(ty, rec.column)
        } else {
            filter.next_match(ty, (prev_column + 1) as usize)
        };
        let Some(column) = column else {
            return false;
        };

        if let OpState::With(c) = &mut self.op_ctx[op_index].state {
            c.column = column as i32;
        }
        if filter.wildcard {
            self.reify(op_index, &filter, ty[column]);
        }
        self.write_column(op_index, &op, column);
        self.publish_term_id(&op, ty[column]);
        true
    }

    /// Depth-first walk over everything beneath the filter's object
    /// along the relation, producing whole tables.
    fn eval_subset(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let store = self.store;
        let r = op.r_out.var().unwrap_or_else(|| unreachable!("subset writes a register"));
        let pair = op.param.unwrap_or_else(|| unreachable!("subset has a filter"));
        let filter = self.materialize(op_index, &pair);

        if !redo {
            let Some(set) = store.table_set_for(filter.mask) else {
                return false;
            };
            let mut cursor = -1;
            let Some(rec) = find_next_table(store, set, &filter, &mut cursor) else {
                return false;
            };
            let mut stack: SmallVec<[SubSetFrame<'a>; 16]> = SmallVec::new();
            stack.push(SubSetFrame {
                table_set: set,
                table_index: cursor,
                table: rec.table,
                row: 0,
                column: rec.column,
            });
            self.set_table_reg(op_index, r, TableSpan::whole(rec.table));
            self.publish_term_id(&op, store.table_type(rec.table)[rec.column]);
            self.op_ctx[op_index].state = OpState::SubSet(stack);
            return true;
        }

        let OpState::SubSet(mut stack) = std::mem::take(&mut self.op_ctx[op_index].state)
        else {
            unreachable!("subset context");
        };

        let found = 'search: loop {
            // Advance past exhausted rows: next table in the current
            // frame's set, or pop back to the parent's next row.
            loop {
                let top = stack.len() - 1;
                if stack[top].row < store.table_row_count(stack[top].table) {
                    break;
                }
                let frame = &mut stack[top];
                if let Some(rec) =
                    find_next_table(store, frame.table_set, &filter, &mut frame.table_index)
                {
                    frame.table = rec.table;
                    frame.row = 0;
                    frame.column = rec.column;
                    break 'search Some((rec.table, rec.column));
                }
                stack.pop();
                let Some(parent) = stack.last_mut() else {
                    break 'search None;
                };
                parent.row += 1;
            }

            // Expand the entity at the current row: its own subset set,
            // if any table in it is non-empty, becomes a new frame.
            let top = stack.len() - 1;
            let table = stack[top].table;
            let row_count = store.table_row_count(table);
            let entities = store.table_entities(table);

            loop {
                let entity = entities[stack[top].row];
                let mut sub = pair;
                sub.obj = Some(PairSlot::Literal(entity));
                let sub_filter = self.materialize(op_index, &sub);

                let pushed = store.table_set_for(sub_filter.mask).and_then(|sub_set| {
                    let mut cursor = -1;
                    find_next_table(store, sub_set, &sub_filter, &mut cursor)
                        .map(|rec| (sub_set, cursor, rec))
                });
                if let Some((sub_set, cursor, rec)) = pushed {
                    stack.push(SubSetFrame {
                        table_set: sub_set,
                        table_index: cursor,
                        table: rec.table,
                        row: 0,
                        column: rec.column,
                    });
                    break 'search Some((rec.table, rec.column));
                }

                stack[top].row += 1;
                if stack[top].row >= row_count {
                    // Every entity expanded; the outer loop pops or
                    // advances the table.
                    break;
                }
            }
        };

        let result = match found {
            Some((table, column)) => {
                self.set_table_reg(op_index, r, TableSpan::whole(table));
                self.publish_term_id(&op, store.table_type(table)[column]);
                true
            }
            None => false,
        };
        self.op_ctx[op_index].state = OpState::SubSet(stack);
        result
    }

    /// Walk the ancestor chain of the filter's object along the
    /// relation, producing entities. Siblings at each level are exhausted
    /// before popping.
    fn eval_superset(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let store = self.store;
        let r = op.r_out.var().unwrap_or_else(|| unreachable!("superset writes a register"));
        let pair = op.param.unwrap_or_else(|| unreachable!("superset has a filter"));
        let filter = self.materialize(op_index, &pair);

        let PairSlot::Literal(pred) = pair.pred else {
            unreachable!("superset predicates are literals");
        };
        // Ancestors are found through (predicate, *) links in the
        // object's own type.
        let up_filter = Filter::for_mask(Id::pair(pred, WILDCARD));

        if !redo {
            // Without a table set for the relation there is nothing to
            // walk anywhere in the store.
            if store.table_set_for(Id::pair(pred, WILDCARD)).is_none() {
                return false;
            }

            let obj = filter.mask.lo();
            debug_assert_ne!(obj, WILDCARD);
            let Some(table) = store.table_of(obj) else {
                return false;
            };
            let ty = store.table_type(table);
            let Some(column) = up_filter.next_match(ty, 0) else {
                return false;
            };

            self.set_entity_reg(op_index, r, ty[column].lo());
            self.publish_term_id(&op, ty[column]);
            let mut stack: SmallVec<[SuperSetFrame; 16]> = SmallVec::new();
            stack.push(SuperSetFrame { table, column: column as i32 });
            self.op_ctx[op_index].state = OpState::SuperSet(stack);
            return true;
        }

        let OpState::SuperSet(mut stack) = std::mem::take(&mut self.op_ctx[op_index].state)
        else {
            unreachable!("superset context");
        };

        // Try one level further up from the last yielded ancestor.
        let last_parent = stack
            .last()
            .map(|top| store.table_type(top.table)[top.column as usize].lo());
        if let Some(next_table) = last_parent.and_then(|parent| store.table_of(parent)) {
            stack.push(SuperSetFrame { table: next_table, column: -1 });
        }

        let found = loop {
            let Some(frame) = stack.last_mut() else {
                break None;
            };
            let ty = store.table_type(frame.table);
            match up_filter.next_match(ty, (frame.column + 1) as usize) {
                Some(column) => {
                    frame.column = column as i32;
                    break Some(ty[column]);
                }
                None => {
                    stack.pop();
                }
            }
        };

        let result = match found {
            Some(id) => {
                self.set_entity_reg(op_index, r, id.lo());
                self.publish_term_id(&op, id);
                true
            }
            None => false,
        };
        self.op_ctx[op_index].state = OpState::SuperSet(stack);
        result
    }

    /// Write a literal or copied entity into the output register,
    /// succeeding exactly once per entry.
    fn eval_store(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        if redo {
            return false;
        }

        let r = op.r_out.var().unwrap_or_else(|| unreachable!("store writes a register"));
        let entity = self.reg_get_entity(op_index, op.r_in);
        if !self.set_entity_any(op_index, r, entity) {
            return false;
        }

        if op.term >= 0 {
            let pair = op.param.unwrap_or_else(|| unreachable!("store has a pair"));
            let filter = self.materialize(op_index, &pair);
            self.term_ids[op.term as usize] = filter.mask;
        }
        true
    }

    /// Forward each entity of the input table into the output register,
    /// one per advance. Reserved ids never escape into variables.
    fn eval_each(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let store = self.store;
        let r_in = op.r_in.var().unwrap_or_else(|| unreachable!("each reads a register"));
        let r_out = op.r_out.var().unwrap_or_else(|| unreachable!("each writes a register"));

        let Reg::Table(span) = self.frame(op_index)[r_in as usize] else {
            unreachable!("each input is a resolved table");
        };
        let end = if span.count != 0 {
            span.offset + span.count
        } else {
            store.table_row_count(span.table)
        };

        let mut row = if !redo {
            span.offset
        } else {
            match self.op_ctx[op_index].state {
                OpState::Each { row } => row + 1,
                _ => unreachable!("each context"),
            }
        };

        let entities = store.table_entities(span.table);
        while row < end && (entities[row] == WILDCARD || entities[row] == THIS) {
            row += 1;
        }
        if row >= end {
            return false;
        }

        self.op_ctx[op_index].state = OpState::Each { row };
        self.set_entity_reg(op_index, r_out, entities[row]);
        true
    }

    fn eval_setjmp(&mut self, op: Op, op_index: usize, redo: bool) -> bool {
        let label = if !redo { op.on_pass } else { op.on_fail };
        self.op_ctx[op_index].state = OpState::SetJmp { label };
        !redo
    }

    // ---- output ----

    /// Publish the Yield frame: entity slice, per-term columns (1-based),
    /// leaving the per-term matched ids as the ops recorded them.
    fn populate(&mut self, op_index: usize, op: Op) {
        let store = self.store;
        let nt = self.rule.term_count();
        for t in 0..nt {
            self.out_columns[t] = self.columns[op_index * nt + t] + 1;
        }

        let OpArg::Var(r) = op.r_in else {
            // No root variable: the rule is a fact check and yields no
            // entities, just success.
            self.entities = &[];
            return;
        };

        match self.rule.vars().vars[r as usize].kind {
            VarKind::Table => {
                let Reg::Table(span) = self.frame(op_index)[r as usize] else {
                    unreachable!("yield input is a resolved table");
                };
                let all = store.table_entities(span.table);
                let len = if span.count != 0 {
                    span.count
                } else {
                    store.table_row_count(span.table)
                };
                self.entities = &all[span.offset..span.offset + len];
            }
            _ => {
                let entity = self.entity_reg(op_index, r);
                self.entities = match store.record_of(entity) {
                    Some(rec) => {
                        let all = store.table_entities(rec.table);
                        &all[rec.row..rec.row + 1]
                    }
                    None => &[],
                };
            }
        }
    }
}
