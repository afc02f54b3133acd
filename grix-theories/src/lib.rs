//! Theory plugins for the grix SMT solver.
//!
//! The graph plugin is the centerpiece: an edge-literal multigraph with
//! lazy detectors for reachability, distance, max-flow, spanning trees,
//! and acyclicity. The bitvector plugin does word-level interval
//! propagation with optional bit-blasting. AMO, PB, FSM, and the flow
//! router round out the set.

#![warn(missing_docs)]

pub mod amo;
pub mod bv;
pub mod fsm;
pub mod graph;
pub mod pb;
pub mod router;

pub use amo::AmoTheory;
pub use bv::{BvCore, BvHandle, BvId, BvOp, BvTheory, CmpOp, CmpRhs};
pub use fsm::FsmTheory;
pub use graph::{Bound, DetectorKey, GraphTheory};
pub use pb::{PbOp, PbTheory};
pub use router::FlowRouter;
