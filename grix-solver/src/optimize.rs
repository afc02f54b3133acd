//! Optimization driver: lexicographic binary search over bitvector
//! objectives.
//!
//! Each objective is decided by repeated `solve_assumptions` calls with
//! fresh comparison literals narrowing the objective's bitvector.
//! Earlier objectives stay pinned by their optimum's comparison literal
//! while later ones run. Literal-set objectives are compiled to
//! popcount / weighted-sum bitvectors when posted, so only bitvector
//! objectives reach this driver.

use grix_core::Lit;
use grix_sat::SolveResult;
use grix_theories::bv::{BvId, CmpOp};
use tracing::debug;

use crate::solver::Solver;

/// One posted objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Objective {
    /// Drive the bitvector as low as possible.
    MinimizeBv(BvId),
    /// Drive the bitvector as high as possible.
    MaximizeBv(BvId),
}

/// Optimize all objectives in order. Returns the final solve result
/// and whether every objective was proven optimal.
pub fn solve_lexicographic(
    solver: &mut Solver,
    assumptions: &[Lit],
    objectives: &[Objective],
) -> (SolveResult, bool) {
    let mut assumptions: Vec<Lit> = assumptions.to_vec();
    let first = solver.engine.solve_with(&mut solver.registry, &assumptions);
    if first != SolveResult::Sat {
        return (first, false);
    }
    let mut all_optimal = true;
    for &objective in objectives {
        let (pin, optimal) = match objective {
            Objective::MinimizeBv(bv) => optimize_bv(solver, &mut assumptions, bv, true),
            Objective::MaximizeBv(bv) => optimize_bv(solver, &mut assumptions, bv, false),
        };
        all_optimal &= optimal;
        if let Some(l) = pin {
            assumptions.push(l);
        }
    }
    // Leave the engine holding the optimal model.
    let final_result = solver.engine.solve_with(&mut solver.registry, &assumptions);
    (final_result, all_optimal)
}

/// Binary search one bitvector objective. Returns the comparison
/// literal pinning the optimum (for later objectives) and whether the
/// optimum was proven.
fn optimize_bv(
    solver: &mut Solver,
    assumptions: &mut Vec<Lit>,
    bv: BvId,
    minimize: bool,
) -> (Option<Lit>, bool) {
    let Ok(mut best) = solver.model_bv(bv, false) else {
        return (None, false);
    };
    let width = solver.bv_width(bv).unwrap_or(64);
    let mut optimal = true;
    let (mut lo, mut hi) = if minimize {
        (0u64, best)
    } else {
        (best, grix_theories::bv::mask(width))
    };
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        // Try to push the objective past the midpoint.
        let probe = if minimize {
            solver.bv_cmp_const(CmpOp::Leq, bv, mid)
        } else {
            solver.bv_cmp_const(CmpOp::Geq, bv, mid + 1)
        };
        let Ok(probe) = probe else {
            optimal = false;
            break;
        };
        let mut trial = assumptions.clone();
        trial.push(probe);
        match solver.engine.solve_with(&mut solver.registry, &trial) {
            SolveResult::Sat => {
                best = solver.model_bv(bv, false).unwrap_or(best);
                if minimize {
                    hi = best.min(mid);
                } else {
                    lo = best.max(mid + 1);
                }
            }
            SolveResult::Unsat => {
                if minimize {
                    lo = mid + 1;
                } else {
                    hi = mid;
                }
            }
            SolveResult::Unknown => {
                optimal = false;
                break;
            }
        }
    }
    let target = if minimize { hi } else { lo };
    debug!(bv = bv.0, target, minimize, optimal, "objective settled");
    let pin = if minimize {
        solver.bv_cmp_const(CmpOp::Leq, bv, target).ok()
    } else {
        solver.bv_cmp_const(CmpOp::Geq, bv, target).ok()
    };
    (pin, optimal)
}
