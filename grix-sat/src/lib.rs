//! The grix CDCL(T) SAT engine.
//!
//! Owns the trail, clause database, and search loop; theory plugins are
//! driven through the [`TheoryHost`] boundary implemented by the
//! coordination layer in `grix-solver`.

#![warn(missing_docs)]

pub mod clause;
pub mod heap;
pub mod simplify;
pub mod solver;
pub mod varmap;

pub use clause::{CRef, Clause, ClauseDb, Watcher};
pub use simplify::{Simplifier, SimplifyConfig, SimplifyStats};
pub use solver::{NoTheories, Reason, SatSolver, SolveResult, SolverStats, TheoryHost};
pub use varmap::VarMap;
