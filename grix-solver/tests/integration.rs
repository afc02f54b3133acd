//! End-to-end scenarios over the full solver stack.

use grix_solver::{CmpOp, LBool, SolveResult, Solver};

/// Reach toggle: breaking the middle edge of a chain makes the reach
/// assumption conflict, with exactly those two assumptions in the core.
#[test]
fn reach_toggle_unsat_core() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    let _e1 = s.new_edge(g, 0, 1, 1).unwrap();
    let e2 = s.new_edge(g, 1, 2, 1).unwrap();
    let _e3 = s.new_edge(g, 2, 3, 1).unwrap();
    let r = s.reach(g, 0, 3).unwrap();

    assert_eq!(s.solve_assumptions(&[r, !e2]), SolveResult::Unsat);
    let core = s.unsat_core();
    assert!(core.contains(&r));
    assert!(core.contains(&!e2));
    assert_eq!(core.len(), 2);

    // Minimization cannot shrink it further.
    let minimized = s.minimize_unsat_core(&[r, !e2]);
    assert_eq!(minimized.len(), 2);
    assert!(minimized.contains(&r));
    assert!(minimized.contains(&!e2));

    // Without the toggle the reach constraint is satisfiable.
    assert_eq!(s.solve_assumptions(&[r]), SolveResult::Sat);
    let path = s.model_path_nodes(g, r).unwrap().expect("witness path");
    assert_eq!(path.first(), Some(&0));
    assert_eq!(path.last(), Some(&3));
}

/// Max-flow threshold on K2,2: cutting one crossing edge still leaves
/// a flow of two through the remaining cover.
#[test]
fn maxflow_threshold_with_disabled_edge() {
    let mut s = Solver::new();
    let g = s.new_graph();
    // s=0, l1=1, l2=2, r1=3, r2=4, t=5.
    for _ in 0..6 {
        s.new_node(g).unwrap();
    }
    // Fixed source/sink plumbing.
    for (u, v) in [(0, 1), (0, 2), (3, 5), (4, 5)] {
        let e = s.new_edge(g, u, v, 1).unwrap();
        s.add_unit(e);
    }
    // The K2,2 crossing edges.
    let a = s.new_edge(g, 1, 3, 1).unwrap();
    let b = s.new_edge(g, 1, 4, 1).unwrap();
    let c = s.new_edge(g, 2, 3, 1).unwrap();
    let d = s.new_edge(g, 2, 4, 1).unwrap();
    let mf = s.maxflow_geq(g, 0, 5, 2).unwrap();

    assert_eq!(s.solve_assumptions(&[mf, !a]), SolveResult::Sat);
    assert!(s.model_value(b).is_true());
    assert!(s.model_value(c).is_true());
    let _ = d;
    let flow = s.model_maxflow(g, mf).unwrap().expect("flow value");
    assert!(flow >= 2);
    // Per-edge flows decompose the total.
    let fb = s.model_edge_flow(g, mf, b).unwrap().unwrap();
    let fc = s.model_edge_flow(g, mf, c).unwrap().unwrap();
    assert_eq!(fb, 1);
    assert_eq!(fc, 1);
}

/// Weighted shortest path with a bitvector edge: the 10-weight detour
/// exceeds the bound, so the bitvector edge must carry the path.
#[test]
fn shortest_path_bound_with_bv_edge() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..3 {
        s.new_node(g).unwrap();
    }
    let e01 = s.new_edge(g, 0, 1, 5).unwrap();
    let e12 = s.new_edge(g, 1, 2, 5).unwrap();
    let w = s.new_bv_anon(4).unwrap();
    let e02 = s.new_edge_bv(g, 0, 2, w).unwrap();
    s.add_unit(e01);
    s.add_unit(e12);
    s.add_unit(e02);
    // Keep the direct edge no better than the bound requires.
    let bounded = s.bv_cmp_const(CmpOp::Leq, w, 9).unwrap();
    let dist = s.weighted_distance_leq(g, 0, 2, 9).unwrap();

    assert_eq!(s.solve_assumptions(&[dist, bounded]), SolveResult::Sat);
    assert!(s.model_bv(w, false).unwrap() <= 9);
    let path = s.model_path_nodes(g, dist).unwrap().expect("witness path");
    assert_eq!(path.first(), Some(&0));
    assert_eq!(path.last(), Some(&2));
}

/// Interval arithmetic end to end: a + b with both lower bounds
/// asserted wraps into [44, 254] at width 8.
#[test]
fn bv_interval_addition_wraps() {
    let mut s = Solver::new();
    let a = s.new_bv_anon(8).unwrap();
    let b = s.new_bv_anon(8).unwrap();
    let c = s.new_bv_anon(8).unwrap();
    s.bv_add(c, a, b).unwrap();
    let ga = s.bv_cmp_const(CmpOp::Geq, a, 200).unwrap();
    let gb = s.bv_cmp_const(CmpOp::Geq, b, 100).unwrap();
    s.add_unit(ga);
    s.add_unit(gb);
    assert_eq!(s.solve(), SolveResult::Sat);
    assert_eq!(s.model_bv(c, false).unwrap(), 44);
    assert_eq!(s.model_bv(c, true).unwrap(), 254);
}

/// Acyclicity and reachability together: the solver must break both
/// cycles while keeping a path from 0 to 3.
#[test]
fn acyclic_and_reach_together() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    // Two overlapping cycles: 0→1→2→0 and 1→2→3→1.
    let e01 = s.new_edge(g, 0, 1, 1).unwrap();
    let e12 = s.new_edge(g, 1, 2, 1).unwrap();
    let e20 = s.new_edge(g, 2, 0, 1).unwrap();
    let e23 = s.new_edge(g, 2, 3, 1).unwrap();
    let e31 = s.new_edge(g, 3, 1, 1).unwrap();
    let acyc = s.acyclic_directed(g).unwrap();
    let r = s.reach(g, 0, 3).unwrap();

    assert_eq!(s.solve_assumptions(&[acyc, r]), SolveResult::Sat);
    // The witness path exists over true edges.
    let path = s.model_path_nodes(g, r).unwrap().expect("witness path");
    assert_eq!(path.first(), Some(&0));
    assert_eq!(path.last(), Some(&3));
    // The enabled subgraph is a DAG: both cycles are broken.
    let cycle1 = [e01, e12, e20];
    let cycle2 = [e12, e23, e31];
    assert!(cycle1.iter().any(|&e| !s.model_value(e).is_true()));
    assert!(cycle2.iter().any(|&e| !s.model_value(e).is_true()));
}

/// Core minimization drops an irrelevant assumption and the minimized
/// core stays unsatisfiable.
#[test]
fn assumption_core_stability() {
    let mut s = Solver::new();
    let x = grix_solver::Lit::pos(s.new_var());
    let y = grix_solver::Lit::pos(s.new_var());
    let z = grix_solver::Lit::pos(s.new_var());
    s.add_clause(&[!x, !z]);
    let core = s.minimize_unsat_core(&[x, y, z]);
    assert_eq!(core.len(), 2);
    assert!(core.contains(&x));
    assert!(core.contains(&z));
    assert!(!core.contains(&y));
    assert_eq!(s.solve_assumptions(&core), SolveResult::Unsat);
    // And the full problem remains satisfiable without assumptions.
    assert_eq!(s.solve(), SolveResult::Sat);
}

/// MST weight predicate over a triangle.
#[test]
fn mst_weight_bound() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..3 {
        s.new_node(g).unwrap();
    }
    let e01 = s.new_edge(g, 0, 1, 1).unwrap();
    let e12 = s.new_edge(g, 1, 2, 2).unwrap();
    let e02 = s.new_edge(g, 0, 2, 10).unwrap();
    s.add_unit(e01);
    s.add_unit(e12);
    s.add_unit(e02);
    let mst3 = s.mst_weight_leq(g, 3).unwrap();
    assert_eq!(s.solve_assumptions(&[mst3]), SolveResult::Sat);
    assert_eq!(s.model_mst_weight(g, mst3).unwrap(), Some(3));
    // A bound of 2 cannot span three nodes with these weights.
    let mst2 = s.mst_weight_leq(g, 2).unwrap();
    assert_eq!(s.solve_assumptions(&[mst2]), SolveResult::Unsat);
}

/// On-path membership: with the only 0→3 route through node 1, the
/// predicate is forced; node 2 lies off every route once its edge is
/// disabled.
#[test]
fn on_path_predicate() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    let e01 = s.new_edge(g, 0, 1, 1).unwrap();
    let e13 = s.new_edge(g, 1, 3, 1).unwrap();
    let e02 = s.new_edge(g, 0, 2, 1).unwrap();
    let e23 = s.new_edge(g, 2, 3, 1).unwrap();
    let on1 = s.on_path(g, 1, 0, 3).unwrap();
    assert_eq!(
        s.solve_assumptions(&[on1, e01, e13, !e02, !e23]),
        SolveResult::Sat
    );
    // Node 2's route is fully disabled: on_path(2) must be false.
    let on2 = s.on_path(g, 2, 0, 3).unwrap();
    assert_eq!(
        s.solve_assumptions(&[on2, !e02, !e23]),
        SolveResult::Unsat
    );
}

/// Hop-bounded distance distinguishes short and long routes.
#[test]
fn hop_bounded_distance() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    // Long route 0→1→2→3 and a shortcut 0→3.
    let e01 = s.new_edge(g, 0, 1, 1).unwrap();
    let e12 = s.new_edge(g, 1, 2, 1).unwrap();
    let e23 = s.new_edge(g, 2, 3, 1).unwrap();
    let short = s.new_edge(g, 0, 3, 1).unwrap();
    let d1 = s.distance_leq(g, 0, 3, 1).unwrap();
    assert_eq!(s.solve_assumptions(&[d1, !short]), SolveResult::Unsat);
    assert_eq!(
        s.solve_assumptions(&[d1, e01, e12, e23]),
        SolveResult::Sat
    );
    assert!(s.model_value(short).is_true());
}

/// AMO plugin end to end.
#[test]
fn at_most_one_constraint() {
    let mut s = Solver::new();
    let vars: Vec<_> = (0..4).map(|_| s.new_var()).collect();
    let lits: Vec<_> = vars.iter().map(|&v| grix_solver::Lit::pos(v)).collect();
    s.at_most_one(&vars);
    s.add_clause(&lits);
    assert_eq!(s.solve(), SolveResult::Sat);
    let true_count = lits
        .iter()
        .filter(|&&l| s.model_value(l) == LBool::True)
        .count();
    assert_eq!(true_count, 1);
    // Forcing two distinct members is unsatisfiable.
    assert_eq!(
        s.solve_assumptions(&[lits[0], lits[1]]),
        SolveResult::Unsat
    );
}

/// PB plugin end to end: 2a + 2b + 3c ≤ 4.
#[test]
fn pseudo_boolean_budget() {
    let mut s = Solver::new();
    let lits: Vec<_> = (0..3)
        .map(|_| grix_solver::Lit::pos(s.new_var()))
        .collect();
    s.assert_pb(&lits, &[2, 2, 3], 4, grix_solver::PbOp::Leq)
        .unwrap();
    assert_eq!(
        s.solve_assumptions(&[lits[0], lits[1]]),
        SolveResult::Sat
    );
    assert!(s.model_value(lits[2]).is_false());
    assert_eq!(
        s.solve_assumptions(&[lits[0], lits[2]]),
        SolveResult::Unsat
    );
}

/// FSM acceptance end to end.
#[test]
fn fsm_acceptance() {
    let mut s = Solver::new();
    let m = s.new_fsm();
    let s0 = s.new_fsm_state(m).unwrap();
    let s1 = s.new_fsm_state(m).unwrap();
    let t_ab = s.new_transition(m, s0, s1, 1, 0).unwrap();
    let t_ba = s.new_transition(m, s1, s0, 2, 0).unwrap();
    let w = s.new_string(&[1, 2]).unwrap();
    let acc = s.fsm_accepts(m, s0, s0, w).unwrap();
    assert_eq!(s.solve_assumptions(&[acc]), SolveResult::Sat);
    assert!(s.model_value(t_ab).is_true());
    assert!(s.model_value(t_ba).is_true());
    // Rejecting while both transitions are forced is unsatisfiable.
    assert_eq!(
        s.solve_assumptions(&[!acc, t_ab, t_ba]),
        SolveResult::Unsat
    );
}

/// Optimization: minimize a bitvector under a lower bound.
#[test]
fn minimize_bv_objective() {
    let mut s = Solver::new();
    let a = s.new_bv_anon(8).unwrap();
    let lb = s.bv_cmp_const(CmpOp::Geq, a, 17).unwrap();
    s.add_unit(lb);
    s.minimize_bv(a).unwrap();
    assert_eq!(s.solve(), SolveResult::Sat);
    assert_eq!(s.model_bv(a, false).unwrap(), 17);
    assert!(s.last_solution_was_optimal());
}

/// Optimization: maximize the number of satisfied literals under an
/// at-most-one side constraint.
#[test]
fn maximize_lits_objective() {
    let mut s = Solver::new();
    let x = grix_solver::Lit::pos(s.new_var());
    let y = grix_solver::Lit::pos(s.new_var());
    let z = grix_solver::Lit::pos(s.new_var());
    // x and y are exclusive; z is free.
    s.add_clause(&[!x, !y]);
    s.maximize_lits(&[x, y, z]).unwrap();
    assert_eq!(s.solve(), SolveResult::Sat);
    let count = [x, y, z]
        .iter()
        .filter(|&&l| s.model_value(l).is_true())
        .count();
    assert_eq!(count, 2);
}

/// Budget exhaustion leaves the solver usable.
#[test]
fn budget_returns_unknown_then_recovers() {
    let mut s = Solver::new();
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    let mut edges = Vec::new();
    for u in 0..4 {
        for v in 0..4 {
            if u != v {
                edges.push(s.new_edge(g, u, v, 1).unwrap());
            }
        }
    }
    let acyc = s.acyclic_directed(g).unwrap();
    let r = s.reach(g, 0, 3).unwrap();
    s.set_conflict_limit(1);
    let first = s.solve_assumptions(&[acyc, r]);
    assert_ne!(first, SolveResult::Unsat);
    // Budgets are one-shot; the follow-up solve completes.
    assert_eq!(s.solve_assumptions(&[acyc, r]), SolveResult::Sat);
}

/// Bit-blasting preserves the interval semantics of an addition cone.
#[test]
fn bitblast_addition_cone() {
    let mut s = Solver::new();
    let a = s.new_bv_anon(4).unwrap();
    let b = s.new_bv_const(4, 3).unwrap();
    let c = s.new_bv_anon(4).unwrap();
    s.bv_add(c, a, b).unwrap();
    let a_is_5 = s.bv_cmp_const(CmpOp::Geq, a, 5).unwrap();
    let a_leq_5 = s.bv_cmp_const(CmpOp::Leq, a, 5).unwrap();
    s.add_unit(a_is_5);
    s.add_unit(a_leq_5);
    let c_geq_9 = s.bv_cmp_const(CmpOp::Geq, c, 9).unwrap();
    s.bv_bitblast(c).unwrap();
    // a = 5, b = 3 ⇒ c = 8, so c ≥ 9 is unsatisfiable.
    assert_eq!(s.solve_assumptions(&[c_geq_9]), SolveResult::Unsat);
    let c_eq_8 = s.bv_eq_const(c, 8).unwrap();
    assert_eq!(s.solve_assumptions(&[c_eq_8]), SolveResult::Sat);
}

/// Named entities are unique and enumerable.
#[test]
fn names_and_lookup() {
    let mut s = Solver::new();
    let v = s.new_named_var("start").unwrap();
    assert_eq!(s.var_by_name("start"), Some(v));
    assert!(s.new_named_var("start").is_err());
    assert_eq!(s.named_var_count(), 1);

    let bv = s.new_bv_anon(8).unwrap();
    s.set_bv_name(bv, "capacity").unwrap();
    assert_eq!(s.bv_by_name("capacity"), Some(bv));
    let bv2 = s.new_bv_anon(8).unwrap();
    assert!(s.set_bv_name(bv2, "capacity").is_err());
    assert_eq!(s.named_bv_count(), 1);
    assert_eq!(s.named_bv_at(0), Some(bv));

    let g = s.new_graph_named("net", 8).unwrap();
    let n = s.new_node_named(g, "source").unwrap();
    assert_eq!(s.node_by_name(g, "source").unwrap(), Some(n));
    assert!(s.new_node_named(g, "source").is_err());
}
