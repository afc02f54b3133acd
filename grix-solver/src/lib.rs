//! The grix SMT solver: CDCL(T) over graph, bitvector, pseudo-Boolean,
//! at-most-one, and finite-state-machine theories.
//!
//! This crate is the coordination layer: it wires the SAT engine from
//! `grix-sat` to the plugins in `grix-theories` behind a handle-based
//! [`Solver`] API, drives optimization objectives, and reads/writes GNF
//! traces.
//!
//! ```
//! use grix_solver::{Solver, SolveResult};
//!
//! let mut s = Solver::new();
//! let g = s.new_graph();
//! for _ in 0..3 {
//!     s.new_node(g).unwrap();
//! }
//! let e0 = s.new_edge(g, 0, 1, 1).unwrap();
//! let e1 = s.new_edge(g, 1, 2, 1).unwrap();
//! let r = s.reach(g, 0, 2).unwrap();
//! s.add_unit(r);
//! assert_eq!(s.solve(), SolveResult::Sat);
//! assert!(s.model_value(e0).is_true());
//! assert!(s.model_value(e1).is_true());
//! ```

#![warn(missing_docs)]

pub mod optimize;
pub mod registry;
pub mod replay;
pub mod solver;
pub mod trace;

pub use grix_core::{
    CoreError, InterruptFlag, LBool, Lit, SolverOptions, Var, interrupt_all,
};
pub use grix_core::error::TheoryError;
pub use grix_sat::SolveResult;
pub use grix_theories::bv::{BvId, CmpOp};
pub use grix_theories::PbOp;
pub use replay::{ReplayError, replay};
pub use solver::{FsmId, GraphId, RouterId, Solver, StringId};
