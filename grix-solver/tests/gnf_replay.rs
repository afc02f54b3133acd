//! GNF trace round-trip: writing a session and replaying it into a
//! fresh solver yields the same verdicts for every intermediate solve.

use grix_solver::{CmpOp, SolveResult, Solver, replay};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// A trace sink the test can read back.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).expect("trace is ASCII")
    }
}

#[test]
fn boolean_session_round_trips() {
    let buf = SharedBuf::default();
    let mut s = Solver::new();
    s.set_output(Box::new(buf.clone()));
    let a = grix_solver::Lit::pos(s.new_var());
    let b = grix_solver::Lit::pos(s.new_var());
    s.add_clause(&[a, b]);
    let r1 = s.solve();
    s.add_clause(&[!a]);
    s.add_clause(&[!b]);
    let r2 = s.solve();
    assert_eq!(r1, SolveResult::Sat);
    assert_eq!(r2, SolveResult::Unsat);

    let (_, results) = replay(&buf.contents()).expect("replay parses");
    assert_eq!(results, vec![r1, r2]);
}

#[test]
fn graph_session_round_trips() {
    let buf = SharedBuf::default();
    let mut s = Solver::new();
    s.set_output(Box::new(buf.clone()));
    let g = s.new_graph();
    for _ in 0..4 {
        s.new_node(g).unwrap();
    }
    let e1 = s.new_edge(g, 0, 1, 2).unwrap();
    let e2 = s.new_edge(g, 1, 2, 2).unwrap();
    let e3 = s.new_edge(g, 2, 3, 2).unwrap();
    let r = s.reach(g, 0, 3).unwrap();
    s.add_unit(r);
    let verdict_open = s.solve();
    s.add_unit(!e2);
    let verdict_cut = s.solve();
    assert_eq!(verdict_open, SolveResult::Sat);
    assert_eq!(verdict_cut, SolveResult::Unsat);
    let _ = (e1, e3);

    let text = buf.contents();
    // The trace carries the directives verbatim.
    assert!(text.lines().any(|l| l.starts_with("digraph ")));
    assert!(text.lines().any(|l| l.starts_with("edge ")));
    assert!(text.lines().any(|l| l.starts_with("reach ")));

    let (_, results) = replay(&text).expect("replay parses");
    assert_eq!(results, vec![verdict_open, verdict_cut]);
}

#[test]
fn bv_session_round_trips() {
    let buf = SharedBuf::default();
    let mut s = Solver::new();
    s.set_output(Box::new(buf.clone()));
    let a = s.new_bv_anon(8).unwrap();
    let b = s.new_bv_const(8, 100).unwrap();
    let c = s.new_bv_anon(8).unwrap();
    s.bv_add(c, a, b).unwrap();
    let lo = s.bv_cmp_const(CmpOp::Geq, a, 200).unwrap();
    s.add_unit(lo);
    let cap = s.bv_cmp_const(CmpOp::Leq, c, 50).unwrap();
    let r1 = s.solve_assumptions(&[cap]);
    let r2 = s.solve_assumptions(&[!cap]);
    assert_eq!(r1, SolveResult::Sat);
    assert_eq!(r2, SolveResult::Sat);

    let (mut replayed, results) = replay(&buf.contents()).expect("replay parses");
    assert_eq!(results, vec![r1, r2]);
    // The replayed solver has the same bitvector state.
    assert_eq!(replayed.n_bvs(), 3);
    assert_eq!(replayed.bv_width(grix_solver::BvId(2)).unwrap(), 8);
}

#[test]
fn mixed_session_with_amo_and_pb() {
    let buf = SharedBuf::default();
    let mut s = Solver::new();
    s.set_output(Box::new(buf.clone()));
    let vars: Vec<_> = (0..3).map(|_| s.new_var()).collect();
    let lits: Vec<_> = vars.iter().map(|&v| grix_solver::Lit::pos(v)).collect();
    s.at_most_one(&vars);
    s.add_clause(&lits);
    s.assert_pb(&lits, &[1, 1, 1], 1, grix_solver::PbOp::Leq)
        .unwrap();
    let r1 = s.solve();
    let r2 = s.solve_assumptions(&[lits[0], lits[1]]);
    assert_eq!(r1, SolveResult::Sat);
    assert_eq!(r2, SolveResult::Unsat);

    let (_, results) = replay(&buf.contents()).expect("replay parses");
    assert_eq!(results, vec![r1, r2]);
}
