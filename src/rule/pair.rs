//! Pair encoding and run-time filters
//!
//! A [`Pair`] is the compiled form of a term's (predicate, object)
//! portion: each slot is either a literal id or a variable reference,
//! plus the predicate's transitivity/finality pulled from store metadata.
//! Pairs are immutable once compiled.
//!
//! At run time a pair is materialized into a [`Filter`] by substituting
//! the registers that have been reified so far. Slots that still hold the
//! wildcard are remembered (`lo_var`/`hi_var`) so a match can fill them
//! in, and the filter carries an AND-mask/compare pair for scanning table
//! types without decoding every id.

use crate::ids::{Id, WILDCARD};
use crate::rule::vars::VarId;

/// One slot of a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairSlot {
    Literal(Id),
    Var(VarId),
}

impl PairSlot {
    pub fn as_var(self) -> Option<VarId> {
        match self {
            PairSlot::Var(v) => Some(v),
            PairSlot::Literal(_) => None,
        }
    }
}

/// Compiled (predicate, object) portion of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Pair {
    pub pred: PairSlot,
    pub obj: Option<PairSlot>,
    /// The predicate relation is transitive. Only set for two-argument
    /// terms; transitivity is meaningless without an object.
    pub transitive: bool,
    /// The predicate has no subtypes, or is a variable (variables match
    /// concrete ids, which need no subset expansion).
    pub final_pred: bool,
}

impl Pair {
    pub fn new(pred: PairSlot) -> Self {
        Pair { pred, obj: None, transitive: false, final_pred: false }
    }
}

/// A pair with its variables substituted from a register frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Filter {
    /// The substituted id, wildcard halves still in place.
    pub mask: Id,
    /// AND-mask passing through the non-wildcard parts of an id.
    expr_mask: u64,
    /// Expected value of `id & expr_mask` for a match.
    expr_match: u64,
    pub wildcard: bool,
    pub pred_wildcard: bool,
    pub obj_wildcard: bool,
    /// Predicate and object are the same still-unbound variable; only
    /// ids whose halves are equal may match.
    pub same_var: bool,
    /// Variable to reify from the low half of a matched id.
    pub lo_var: Option<VarId>,
    /// Variable to reify from the high half of a matched id.
    pub hi_var: Option<VarId>,
}

impl Filter {
    /// Substitute `pair`'s variable slots from `resolve` (the caller maps
    /// a variable to its current register value; unbound registers read
    /// as the wildcard).
    pub fn materialize(pair: &Pair, mut resolve: impl FnMut(VarId) -> Id) -> Filter {
        let mut filter = Filter {
            mask: Id(0),
            expr_mask: 0,
            expr_match: 0,
            wildcard: false,
            pred_wildcard: false,
            obj_wildcard: false,
            same_var: false,
            lo_var: None,
            hi_var: None,
        };

        let obj = pair.obj.map(|slot| match slot {
            PairSlot::Literal(id) => id,
            PairSlot::Var(v) => {
                let value = resolve(v);
                if value == WILDCARD {
                    filter.wildcard = true;
                    filter.obj_wildcard = true;
                    filter.lo_var = Some(v);
                }
                value
            }
        });

        let pred = match pair.pred {
            PairSlot::Literal(id) => id,
            PairSlot::Var(v) => {
                let value = resolve(v);
                if value == WILDCARD {
                    if filter.wildcard {
                        filter.same_var = pair.obj.and_then(PairSlot::as_var) == Some(v);
                    }
                    filter.wildcard = true;
                    filter.pred_wildcard = true;
                    if obj.is_some() {
                        filter.hi_var = Some(v);
                    } else {
                        filter.lo_var = Some(v);
                    }
                }
                value
            }
        };

        filter.mask = match obj {
            Some(obj) => Id::pair(pred, obj),
            None => pred,
        };

        if filter.wildcard {
            filter.set_expr_mask(filter.mask);
        }

        filter
    }

    /// A filter matching `mask` exactly where its halves are concrete and
    /// anything where they are the wildcard. Used by the superset walk,
    /// which scans for `(predicate, *)` links.
    pub fn for_mask(mask: Id) -> Filter {
        let mut filter = Filter {
            mask,
            expr_mask: 0,
            expr_match: 0,
            wildcard: true,
            pred_wildcard: mask.hi() == WILDCARD,
            obj_wildcard: mask.lo() == WILDCARD,
            same_var: false,
            lo_var: None,
            hi_var: None,
        };
        filter.set_expr_mask(mask);
        filter
    }

    /// Derive `expr_mask`/`expr_match` so that `(id & expr_mask) ==
    /// expr_match` iff `id` matches. Role bits always take part; wildcard
    /// halves become don't-cares.
    fn set_expr_mask(&mut self, mask: Id) {
        let lo = mask.lo();
        let hi = mask.hi();

        self.expr_mask = mask.role();
        self.expr_match = mask.role();

        if lo != WILDCARD {
            self.expr_mask |= 0xFFFF_FFFF;
            self.expr_match |= lo.0;
        }
        if hi != WILDCARD {
            self.expr_mask |= 0xFFFF_FFFF << 32;
            self.expr_match |= hi.0 << 32;
        }
    }

    fn matches(&self, id: Id) -> bool {
        if id.0 & self.expr_mask != self.expr_match {
            return false;
        }
        // A pair built from the same variable twice only matches ids
        // whose halves agree.
        if self.same_var && id.lo() != id.hi() {
            return false;
        }
        true
    }

    /// Find the next matching column in a table type at or after `from`.
    ///
    /// Types are sorted with the predicate in the high bits, so when the
    /// predicate is concrete a scan that starts mid-type only needs to
    /// look at the next element: either it continues the predicate's run
    /// or the run is over.
    pub fn next_match(&self, ty: &[Id], from: usize) -> Option<usize> {
        let mut count = ty.len();
        if !self.pred_wildcard && from != 0 && from < count {
            count = from + 1;
        }
        (from..count).find(|&i| self.matches(ty[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PAIR;

    fn entity_filter(id: Id) -> Filter {
        Filter::materialize(&Pair::new(PairSlot::Literal(id)), |_| unreachable!())
    }

    #[test]
    fn literal_pair_filter_is_exact() {
        let pair = Pair {
            pred: PairSlot::Literal(Id(40)),
            obj: Some(PairSlot::Literal(Id(77))),
            transitive: false,
            final_pred: false,
        };
        let filter = Filter::materialize(&pair, |_| unreachable!());
        assert!(!filter.wildcard);
        assert_eq!(filter.mask, Id::pair(Id(40), Id(77)));
    }

    #[test]
    fn unbound_object_reifies_from_low_half() {
        let pair = Pair {
            pred: PairSlot::Literal(Id(40)),
            obj: Some(PairSlot::Var(3)),
            transitive: false,
            final_pred: false,
        };
        let filter = Filter::materialize(&pair, |_| WILDCARD);
        assert!(filter.wildcard && filter.obj_wildcard);
        assert_eq!(filter.lo_var, Some(3));
        assert_eq!(filter.hi_var, None);

        let ty = [Id(5), Id::pair(Id(39), Id(1)), Id::pair(Id(40), Id(7))];
        assert_eq!(filter.next_match(&ty, 0), Some(2));
    }

    #[test]
    fn bound_object_narrows_the_filter() {
        let pair = Pair {
            pred: PairSlot::Literal(Id(40)),
            obj: Some(PairSlot::Var(3)),
            transitive: false,
            final_pred: false,
        };
        let filter = Filter::materialize(&pair, |_| Id(9));
        assert!(!filter.wildcard);
        assert_eq!(filter.mask, Id::pair(Id(40), Id(9)));
    }

    #[test]
    fn same_variable_twice_requires_equal_halves() {
        let pair = Pair {
            pred: PairSlot::Var(2),
            obj: Some(PairSlot::Var(2)),
            transitive: false,
            final_pred: true,
        };
        let filter = Filter::materialize(&pair, |_| WILDCARD);
        assert!(filter.same_var);

        let ty = [Id::pair(Id(7), Id(8)), Id::pair(Id(9), Id(9))];
        assert_eq!(filter.next_match(&ty, 0), Some(1));
    }

    #[test]
    fn wildcard_predicate_without_object_matches_plain_ids_only() {
        let pair = Pair {
            pred: PairSlot::Var(0),
            obj: None,
            transitive: false,
            final_pred: true,
        };
        let filter = Filter::materialize(&pair, |_| WILDCARD);
        assert_eq!(filter.lo_var, Some(0));

        let ty = [Id(5), Id(9), Id(PAIR | (4 << 32) | 5)];
        assert_eq!(filter.next_match(&ty, 0), Some(0));
        assert_eq!(filter.next_match(&ty, 1), Some(1));
        assert_eq!(filter.next_match(&ty, 2), None);
    }

    #[test]
    fn concrete_predicate_stops_scanning_past_its_run() {
        let filter = Filter::for_mask(Id::pair(Id(40), WILDCARD));
        let ty = [
            Id::pair(Id(40), Id(1)),
            Id::pair(Id(40), Id(2)),
            Id::pair(Id(41), Id(3)),
        ];
        assert_eq!(filter.next_match(&ty, 0), Some(0));
        assert_eq!(filter.next_match(&ty, 1), Some(1));
        assert_eq!(filter.next_match(&ty, 2), None);
    }

    #[test]
    fn plain_entity_filter_matches_itself() {
        let filter = entity_filter(Id(42));
        assert_eq!(filter.mask, Id(42));
        assert!(!filter.wildcard);
    }
}
