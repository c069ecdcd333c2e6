//! quarry — a declarative query core for entity/table stores
//!
//! Given a textual query already parsed into predicate terms with
//! variables, quarry returns every assignment of those variables that
//! satisfies the expression against the current contents of a store. The
//! store itself is an external collaborator: quarry consumes it through
//! the read-only [`store::Store`] oracle and owns no data.
//!
//! # Architecture
//!
//! Evaluation is a two-stage pipeline:
//!
//! 1. **Compilation** (`rule::vars`, `rule::compile`) — the term list is
//!    scanned for variables, a root variable is elected, dependency
//!    depths are computed (with cycle detection), and the expression is
//!    lowered into a linear program of small opcodes with explicit
//!    pass/fail jump targets.
//! 2. **Execution** (`rule::vm`) — a backtracking virtual machine walks
//!    the program. Each opcode is re-entrant (asked again, it produces
//!    its next match) and stateful (it keeps per-iterator cursors).
//!    Register frames are copied forward on every advance, so rewinding
//!    an opcode re-runs it on exactly the inputs it saw before.
//!
//! Results stream out of [`RuleIter::next`]: a table (or single entity)
//! of matched subjects, the column each term matched at, and the reified
//! value of every variable.
//!
//! # Example
//!
//! ```ignore
//! use quarry::{Rule, Term, TermArg};
//!
//! // Likes(., X), Likes(X, .) — mutual likes.
//! let terms = vec![
//!     Term::with_pair(likes, TermArg::This, TermArg::var("X")),
//!     Term::with_pair(likes, TermArg::var("X"), TermArg::This),
//! ];
//! let rule = Rule::new(&store, &terms)?;
//! let x = rule.find_variable("X").unwrap();
//!
//! let mut it = rule.iter(&store);
//! while it.next() {
//!     for &subject in it.entities() {
//!         println!("{} likes {}", subject, it.variable(x));
//!     }
//! }
//! ```
//!
//! # Concurrency
//!
//! A compiled [`Rule`] is immutable and can be shared by any number of
//! iterators. Each iterator owns its frames and per-opcode state
//! exclusively and holds the store immutably; iterators may run in
//! parallel as long as nothing mutates the store underneath them.

pub mod ids;
pub mod rule;
pub mod store;
pub mod term;

pub use ids::{Id, ISA, THIS, WILDCARD};
pub use rule::{Rule, RuleError, RuleIter, RuleResult};
pub use store::{Role, StorageRecord, Store, TableId, TableRecord, TableSet};
pub use term::{Term, TermArg};
