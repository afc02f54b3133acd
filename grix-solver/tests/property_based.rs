//! Property tests: graph reachability against brute force, and
//! sandwich-view consistency under random forced edges.

use grix_solver::{SolveResult, Solver};
use proptest::prelude::*;

const N_NODES: usize = 5;

/// Edge descriptor: endpoints plus 0 = forced off, 1 = forced on,
/// 2 = free.
fn edges_strategy() -> impl Strategy<Value = Vec<(usize, usize, u8)>> {
    proptest::collection::vec((0..N_NODES, 0..N_NODES, 0u8..3), 1..14)
}

/// Reachability over the edges that are not forced off: the best any
/// assignment of the free edges can do.
fn bruteforce_reachable(edges: &[(usize, usize, u8)], from: usize, to: usize) -> bool {
    let mut reach = vec![false; N_NODES];
    reach[from] = true;
    let mut changed = true;
    while changed {
        changed = false;
        for &(u, v, mode) in edges {
            if mode != 0 && reach[u] && !reach[v] {
                reach[v] = true;
                changed = true;
            }
        }
    }
    reach[to]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn reach_matches_bruteforce(edges in edges_strategy()) {
        let mut s = Solver::new();
        let g = s.new_graph();
        for _ in 0..N_NODES {
            s.new_node(g).unwrap();
        }
        for &(u, v, mode) in &edges {
            let e = s.new_edge(g, u, v, 1).unwrap();
            match mode {
                0 => {
                    s.add_unit(!e);
                }
                1 => {
                    s.add_unit(e);
                }
                _ => {}
            }
        }
        let r = s.reach(g, 0, N_NODES - 1).unwrap();
        let result = s.solve_assumptions(&[r]);
        let expected = bruteforce_reachable(&edges, 0, N_NODES - 1);
        prop_assert_eq!(result == SolveResult::Sat, expected);
        if expected {
            // The witness path runs over true edges only.
            let path = s.model_path_nodes(g, r).unwrap();
            let path = path.expect("satisfied reach literal has a witness");
            prop_assert_eq!(*path.first().unwrap(), 0);
            prop_assert_eq!(*path.last().unwrap(), N_NODES - 1);
        }
    }

    #[test]
    fn forced_off_reach_is_stable_after_resolve(edges in edges_strategy()) {
        // Solving twice gives the same verdict (state is restored at
        // level 0 between solves).
        let mut s = Solver::new();
        let g = s.new_graph();
        for _ in 0..N_NODES {
            s.new_node(g).unwrap();
        }
        for &(u, v, mode) in &edges {
            let e = s.new_edge(g, u, v, 1).unwrap();
            if mode == 0 {
                s.add_unit(!e);
            }
        }
        let r = s.reach(g, 0, N_NODES - 1).unwrap();
        let first = s.solve_assumptions(&[r]);
        let second = s.solve_assumptions(&[r]);
        prop_assert_eq!(first, second);
    }
}
