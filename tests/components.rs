//! Plain component queries: the subject variable matches whole tables,
//! so entities sharing a component set come back batched — one yield per
//! table, every row of the table in the same yield. A second term on the
//! same subject filters tables, it does not break up the batches.

mod common;

use common::{star_wars, World};
use quarry::{Rule, Term, TermArg};

/// Three entities sharing one component set, a fourth with an extra
/// component so it lands in its own table.
fn positioned_world() -> World {
    let mut w = World::new();
    for e in ["E1", "E2", "E3", "E4"] {
        w.fact("Position", e);
    }
    w.fact("Velocity", "E4");
    w.build();
    w
}

#[test]
fn component_query_batches_table_rows() {
    let w = positioned_world();
    let rule = Rule::new(&w, &[Term::new(w.id("Position"))]).unwrap();

    let mut it = rule.iter(&w);

    // E1..E3 share a table and arrive in a single yield.
    assert!(it.next());
    assert_eq!(it.count(), 3);
    assert_eq!(it.entities(), &[w.id("E1"), w.id("E2"), w.id("E3")]);
    assert_eq!(it.term_id(0), w.id("Position"));
    assert!(it.columns()[0] >= 1);

    // E4 carries Velocity too, so its table is yielded separately.
    assert!(it.next());
    assert_eq!(it.count(), 1);
    assert_eq!(it.entities(), &[w.id("E4")]);

    assert!(!it.next());
}

#[test]
fn component_query_batches_with_explicit_subject() {
    let w = positioned_world();
    let terms = [Term::with_subject(w.id("Position"), TermArg::This)];
    let rule = Rule::new(&w, &terms).unwrap();

    let mut it = rule.iter(&w);

    assert!(it.next());
    assert_eq!(it.count(), 3);
    assert_eq!(it.entities(), &[w.id("E1"), w.id("E2"), w.id("E3")]);

    assert!(it.next());
    assert_eq!(it.count(), 1);
    assert_eq!(it.entities(), &[w.id("E4")]);

    assert!(!it.next());
}

#[test]
fn two_component_query_batches_table_rows() {
    let mut w = World::new();
    for e in ["E1", "E2", "E3", "E4"] {
        w.fact("Position", e);
        w.fact("Velocity", e);
    }
    w.fact("Mass", "E4");
    w.build();

    let terms = [Term::new(w.id("Position")), Term::new(w.id("Velocity"))];
    let rule = Rule::new(&w, &terms).unwrap();

    let mut it = rule.iter(&w);

    // The second term narrows which tables match; rows of a matching
    // table still arrive together.
    assert!(it.next());
    assert_eq!(it.count(), 3);
    assert_eq!(it.entities(), &[w.id("E1"), w.id("E2"), w.id("E3")]);
    assert_eq!(it.term_id(0), w.id("Position"));
    assert_eq!(it.term_id(1), w.id("Velocity"));
    assert!(it.columns()[0] >= 1);
    assert!(it.columns()[1] >= 1);

    assert!(it.next());
    assert_eq!(it.count(), 1);
    assert_eq!(it.entities(), &[w.id("E4")]);

    assert!(!it.next());
}

#[test]
fn fixture_droids_batch_by_table() {
    let w = star_wars();
    let rule = Rule::new(&w, &[Term::new(w.id("Droid"))]).unwrap();

    let mut it = rule.iter(&w);

    // R2D2 and C3PO are both exactly {Ident, Droid} and share a table;
    // BB8's home-planet pair gives it a type of its own.
    assert!(it.next());
    assert_eq!(it.count(), 2);
    assert_eq!(it.entities(), &[w.id("R2D2"), w.id("C3PO")]);

    assert!(it.next());
    assert_eq!(it.count(), 1);
    assert_eq!(it.entities(), &[w.id("BB8")]);

    assert!(!it.next());
}
