//! GNF replay: rebuilding a solver session from its trace.
//!
//! The reader consumes the line-oriented GNF superset of DIMACS emitted
//! by the trace writer, re-issues every directive against a fresh
//! solver, and runs each `solve` line, collecting the verdicts. Ids in
//! the file (bitvectors, graphs, automata, strings) are mapped to the
//! ids the fresh solver hands out, and literals are bound exactly as
//! recorded.

use grix_core::error::TheoryError;
use grix_core::{Lit, SolverOptions, Var};
use grix_sat::SolveResult;
use grix_theories::bv::{BvId, CmpOp};
use grix_theories::graph::{Bound, DetectorKey};
use grix_theories::PbOp;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::solver::Solver;

/// A replay failure, with the offending line number.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The line did not parse.
    #[error("line {line}: malformed directive: {text}")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        text: String,
    },
    /// The directive referenced an unknown id.
    #[error("line {line}: {source}")]
    Theory {
        /// 1-based line number.
        line: usize,
        /// Underlying theory error.
        #[source]
        source: TheoryError,
    },
}

/// Replay a GNF document into a fresh solver.
///
/// Returns the solver in its final state together with the result of
/// every `solve` directive, in order.
pub fn replay(input: &str) -> Result<(Solver, Vec<SolveResult>), ReplayError> {
    let mut solver: Option<Solver> = None;
    let mut results = Vec::new();
    let mut bvs: FxHashMap<u32, BvId> = FxHashMap::default();
    let mut graphs: FxHashMap<usize, usize> = FxHashMap::default();
    let mut fsms: FxHashMap<usize, usize> = FxHashMap::default();
    let mut strings: FxHashMap<usize, usize> = FxHashMap::default();
    let mut routers: FxHashMap<usize, usize> = FxHashMap::default();

    for (ln, raw) in input.lines().enumerate() {
        let line_no = ln + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        // Option comments configure the solver; everything else in a
        // comment is ignored.
        if let Some(rest) = line.strip_prefix("c monosat") {
            if solver.is_none() {
                let args: Vec<&str> = rest.split_whitespace().collect();
                solver = Some(Solver::from_args(&args).map_err(|e| ReplayError::Theory {
                    line: line_no,
                    source: TheoryError::Core(e),
                })?);
            }
            continue;
        }
        if line == "c" || line.starts_with("c ") {
            continue;
        }
        let s = solver.get_or_insert_with(|| Solver::with_options(SolverOptions::default()));
        let toks: Vec<&str> = line.split_whitespace().collect();
        let mal = || ReplayError::Malformed {
            line: line_no,
            text: line.to_string(),
        };
        let theory = |source| ReplayError::Theory {
            line: line_no,
            source,
        };
        match toks[0] {
            "p" => {
                // Header: pre-allocate the declared variables.
                let n: u32 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                if n > 0 {
                    s.ensure_var(Var(n - 1));
                }
            }
            "solve" => {
                let mut assumptions = Vec::new();
                for t in &toks[1..] {
                    assumptions.push(parse_lit(s, t).ok_or_else(mal)?);
                }
                results.push(s.solve_assumptions(&assumptions));
            }
            "digraph" => {
                // digraph 0 0 <gid> <weightBits> [name]
                let gid: usize = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let bits: u32 = toks.get(4).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let real = match toks.get(5) {
                    Some(name) => s.new_graph_named(name, bits).map_err(theory)?,
                    None => s.new_graph(),
                };
                graphs.insert(gid, real);
            }
            "node" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                match toks.get(3) {
                    Some(name) => {
                        s.new_node_named(g, name).map_err(theory)?;
                    }
                    None => {
                        s.new_node(g).map_err(theory)?;
                    }
                }
            }
            "edge" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let weight: i64 = toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                s.edge_with_lit(g, from, to, weight, lit).map_err(theory)?;
            }
            "edge_bv" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let bv = *bvs
                    .get(&(parse_at(&toks, 5).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                s.edge_bv_with_lit(g, from, to, bv, lit).map_err(theory)?;
            }
            "reach" | "distance_leq" | "distance_lt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let steps = match toks[0] {
                    "reach" => -1,
                    "distance_leq" => toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?,
                    _ => {
                        let st: i64 =
                            toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                        st - 1
                    }
                };
                s.predicate_with_lit(g, DetectorKey::Reach { from, to, steps }, lit)
                    .map_err(theory)?;
            }
            "weighted_distance_leq" | "weighted_distance_lt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let dist: i64 = toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let inclusive = toks[0] == "weighted_distance_leq";
                s.predicate_with_lit(
                    g,
                    DetectorKey::Dist {
                        from,
                        to,
                        bound: Bound::Const(dist),
                        inclusive,
                    },
                    lit,
                )
                .map_err(theory)?;
            }
            "weighted_distance_bv_leq" | "weighted_distance_bv_lt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let bv = *bvs
                    .get(&(parse_at(&toks, 5).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                let inclusive = toks[0] == "weighted_distance_bv_leq";
                s.predicate_with_lit(
                    g,
                    DetectorKey::Dist {
                        from,
                        to,
                        bound: Bound::Bv(bv),
                        inclusive,
                    },
                    lit,
                )
                .map_err(theory)?;
            }
            "maximum_flow_geq" | "maximum_flow_gt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let source = parse_at(&toks, 2).ok_or_else(mal)?;
                let sink = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let k: i64 = toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let inclusive = toks[0] == "maximum_flow_geq";
                s.predicate_with_lit(
                    g,
                    DetectorKey::Flow {
                        source,
                        sink,
                        bound: Bound::Const(k),
                        inclusive,
                    },
                    lit,
                )
                .map_err(theory)?;
            }
            "maximum_flow_bv_geq" | "maximum_flow_bv_gt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let source = parse_at(&toks, 2).ok_or_else(mal)?;
                let sink = parse_at(&toks, 3).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(4).ok_or_else(mal)?).ok_or_else(mal)?;
                let bv = *bvs
                    .get(&(parse_at(&toks, 5).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                let inclusive = toks[0] == "maximum_flow_bv_geq";
                s.predicate_with_lit(
                    g,
                    DetectorKey::Flow {
                        source,
                        sink,
                        bound: Bound::Bv(bv),
                        inclusive,
                    },
                    lit,
                )
                .map_err(theory)?;
            }
            "mst_weight_leq" | "mst_weight_lt" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(2).ok_or_else(mal)?).ok_or_else(mal)?;
                let k: i64 = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let inclusive = toks[0] == "mst_weight_leq";
                s.predicate_with_lit(
                    g,
                    DetectorKey::Mst {
                        bound: k,
                        inclusive,
                    },
                    lit,
                )
                .map_err(theory)?;
            }
            "acyclic" | "forest" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(2).ok_or_else(mal)?).ok_or_else(mal)?;
                let directed = toks[0] == "acyclic";
                s.predicate_with_lit(g, DetectorKey::Acyclic { directed }, lit)
                    .map_err(theory)?;
            }
            "on_path" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let node = parse_at(&toks, 2).ok_or_else(mal)?;
                let from = parse_at(&toks, 3).ok_or_else(mal)?;
                let to = parse_at(&toks, 4).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(5).ok_or_else(mal)?).ok_or_else(mal)?;
                s.predicate_with_lit(g, DetectorKey::OnPath { node, from, to }, lit)
                    .map_err(theory)?;
            }
            "edge_set" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let n: usize = parse_at(&toks, 2).ok_or_else(mal)?;
                let mut edges = Vec::with_capacity(n);
                for t in toks.iter().skip(3).take(n) {
                    edges.push(parse_lit(s, t).ok_or_else(mal)?);
                }
                s.new_edge_set(g, &edges, true).map_err(theory)?;
            }
            "graph_assign_edges_to_weight" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let w: i64 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                s.set_assign_edges_to_weight(g, w).map_err(theory)?;
            }
            "f_router" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let rid = parse_at(&toks, 2).ok_or_else(mal)?;
                let source = parse_at(&toks, 3).ok_or_else(mal)?;
                let dest = parse_at(&toks, 4).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(5).ok_or_else(mal)?).ok_or_else(mal)?;
                let real = s.new_flow_router(g, source, dest, lit).map_err(theory)?;
                routers.insert(rid, real);
            }
            "f_router_net" => {
                let g = *graphs
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let r = *routers
                    .get(&parse_at(&toks, 2).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let disabled = parse_lit(s, toks.get(3).ok_or_else(mal)?).ok_or_else(mal)?;
                let n: usize = parse_at(&toks, 4).ok_or_else(mal)?;
                let mut members = Vec::with_capacity(n);
                for i in 0..n {
                    let e = parse_lit(s, toks.get(5 + 2 * i).ok_or_else(mal)?).ok_or_else(mal)?;
                    let re =
                        parse_lit(s, toks.get(6 + 2 * i).ok_or_else(mal)?).ok_or_else(mal)?;
                    members.push((e, re));
                }
                s.add_routing_net(g, r, disabled, &members).map_err(theory)?;
            }
            "amo" => {
                let mut vars = Vec::new();
                for t in &toks[1..] {
                    if *t == "0" {
                        break;
                    }
                    vars.push(parse_lit(s, t).ok_or_else(mal)?.var());
                }
                s.at_most_one(&vars);
            }
            "pb" => {
                // pb <op> <rhs> <n> <lits> <n> <coefs>
                let op = match *toks.get(1).ok_or_else(mal)? {
                    "<" => PbOp::Lt,
                    "<=" => PbOp::Leq,
                    "==" => PbOp::Eq,
                    ">=" => PbOp::Geq,
                    ">" => PbOp::Gt,
                    _ => return Err(mal()),
                };
                let rhs: i64 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let n: usize = parse_at(&toks, 3).ok_or_else(mal)?;
                let mut lits = Vec::with_capacity(n);
                for t in toks.iter().skip(4).take(n) {
                    lits.push(parse_lit(s, t).ok_or_else(mal)?);
                }
                let mut coefs = Vec::with_capacity(n);
                for t in toks.iter().skip(5 + n).take(n) {
                    coefs.push(t.parse().map_err(|_| mal())?);
                }
                s.assert_pb(&lits, &coefs, rhs, op).map_err(theory)?;
            }
            "fsm" => {
                let fid = parse_at(&toks, 1).ok_or_else(mal)?;
                let real = s.new_fsm();
                fsms.insert(fid, real);
            }
            "transition" => {
                let f = *fsms
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let from = parse_at(&toks, 2).ok_or_else(mal)?;
                let to = parse_at(&toks, 3).ok_or_else(mal)?;
                let input: u32 = toks.get(4).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let output: u32 = toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(6).ok_or_else(mal)?).ok_or_else(mal)?;
                // States are created on demand up to the endpoints.
                while s.n_fsm_states(f).map_err(theory)? <= from.max(to) {
                    s.new_fsm_state(f).map_err(theory)?;
                }
                s.transition_with_lit(f, from, to, input, output, lit)
                    .map_err(theory)?;
            }
            "str" => {
                let sid = parse_at(&toks, 1).ok_or_else(mal)?;
                let mut labels = Vec::new();
                for t in &toks[2..] {
                    labels.push(t.parse().map_err(|_| mal())?);
                }
                let real = s.new_string(&labels).map_err(theory)?;
                strings.insert(sid, real);
            }
            "accepts" => {
                let f = *fsms
                    .get(&parse_at(&toks, 1).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let start = parse_at(&toks, 2).ok_or_else(mal)?;
                let accept = parse_at(&toks, 3).ok_or_else(mal)?;
                let sid = *strings
                    .get(&parse_at(&toks, 4).ok_or_else(mal)?)
                    .ok_or_else(mal)?;
                let lit = parse_lit(s, toks.get(5).ok_or_else(mal)?).ok_or_else(mal)?;
                s.accept_with_lit(f, start, accept, sid, lit).map_err(theory)?;
            }
            "bv" => replay_bv(s, &toks, &mut bvs, line_no, line)?,
            "bv_ite" => {
                let cond = parse_lit(s, toks.get(1).ok_or_else(mal)?).ok_or_else(mal)?;
                let then_bv = *bvs
                    .get(&(parse_at(&toks, 2).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                let else_bv = *bvs
                    .get(&(parse_at(&toks, 3).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                let out = *bvs
                    .get(&(parse_at(&toks, 4).ok_or_else(mal)? as u32))
                    .ok_or_else(mal)?;
                s.ensure_var(cond.var());
                s.bv_ite(cond, then_bv, else_bv, out).map_err(theory)?;
            }
            "symbol" => {
                let v: u32 = toks.get(1).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let name = toks.get(2).ok_or_else(mal)?;
                s.ensure_var(Var(v - 1));
                s.set_var_name(Var(v - 1), name)
                    .map_err(|e| theory(TheoryError::Core(e)))?;
            }
            "decision" => {
                let v: u32 = toks.get(1).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let d: u32 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                s.ensure_var(Var(v - 1));
                s.set_decision_var(Var(v - 1), d != 0);
            }
            "priority" => {
                let v: u32 = toks.get(1).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                let p: i64 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                s.ensure_var(Var(v - 1));
                s.set_decision_priority(Var(v - 1), p);
            }
            "minimize" | "maximize" => {
                replay_objective(s, &toks, &bvs, line_no, line)?;
            }
            "minimize_core" => {
                let mut assumptions = Vec::new();
                for t in &toks[1..] {
                    assumptions.push(parse_lit(s, t).ok_or_else(mal)?);
                }
                s.minimize_unsat_core(&assumptions);
            }
            "clear_opt" => s.clear_optimization_objectives(),
            _ => {
                // A clause line: DIMACS literals terminated by 0.
                let mut lits = Vec::new();
                for t in &toks {
                    let d: i64 = t.parse().map_err(|_| mal())?;
                    if d == 0 {
                        break;
                    }
                    lits.push(parse_lit(s, t).ok_or_else(mal)?);
                }
                s.add_clause(&lits);
            }
        }
    }
    let solver = solver.unwrap_or_default();
    Ok((solver, results))
}

fn replay_bv(
    s: &mut Solver,
    toks: &[&str],
    bvs: &mut FxHashMap<u32, BvId>,
    line_no: usize,
    line: &str,
) -> Result<(), ReplayError> {
    let mal = || ReplayError::Malformed {
        line: line_no,
        text: line.to_string(),
    };
    let theory = |source| ReplayError::Theory {
        line: line_no,
        source,
    };
    let get =
        |bvs: &FxHashMap<u32, BvId>, tok: Option<&&str>| -> Option<BvId> {
            bvs.get(&tok?.parse::<u32>().ok()?).copied()
        };
    match *toks.get(1).ok_or_else(mal)? {
        "anon" => {
            let fid: u32 = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let w: u32 = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let real = s.new_bv_anon(w).map_err(theory)?;
            bvs.insert(fid, real);
        }
        "const" => {
            // Either a definition `bv const <id> <w> <val>` or a
            // comparison `bv const <op> <lit> <bv> <k>`.
            match *toks.get(2).ok_or_else(mal)? {
                op @ ("<" | "<=" | ">" | ">=") => {
                    let lit = parse_lit(s, toks.get(3).ok_or_else(mal)?).ok_or_else(mal)?;
                    let bv = get(bvs, toks.get(4)).ok_or_else(mal)?;
                    let k: u64 = toks.get(5).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                    let op = parse_cmp(op).ok_or_else(mal)?;
                    s.bv_cmp_const_with_lit(op, bv, k, lit).map_err(theory)?;
                }
                _ => {
                    let fid: u32 =
                        toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                    let w: u32 = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                    let val: u64 =
                        toks.get(4).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
                    let real = s.new_bv_const(w, val).map_err(theory)?;
                    bvs.insert(fid, real);
                }
            }
        }
        op @ ("<" | "<=" | ">" | ">=") => {
            let lit = parse_lit(s, toks.get(2).ok_or_else(mal)?).ok_or_else(mal)?;
            let a = get(bvs, toks.get(3)).ok_or_else(mal)?;
            let b = get(bvs, toks.get(4)).ok_or_else(mal)?;
            let op = parse_cmp(op).ok_or_else(mal)?;
            s.bv_cmp_with_lit(op, a, b, lit).map_err(theory)?;
        }
        sym @ ("+" | "-" | "*" | "/" | "and" | "or" | "xor" | "nand" | "nor" | "xnor"
        | "concat") => {
            let out = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let a = get(bvs, toks.get(3)).ok_or_else(mal)?;
            let b = get(bvs, toks.get(4)).ok_or_else(mal)?;
            match sym {
                "+" => s.bv_add(out, a, b),
                "-" => s.bv_sub(out, a, b),
                "*" => s.bv_mul(out, a, b),
                "/" => s.bv_div(out, a, b),
                "and" => s.bv_and(out, a, b),
                "or" => s.bv_or(out, a, b),
                "xor" => s.bv_xor(out, a, b),
                "nand" => s.bv_nand(out, a, b),
                "nor" => s.bv_nor(out, a, b),
                "xnor" => s.bv_xnor(out, a, b),
                _ => s.bv_concat(out, a, b),
            }
            .map_err(theory)?;
        }
        "not" => {
            let a = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let out = get(bvs, toks.get(3)).ok_or_else(mal)?;
            s.bv_not(a, out).map_err(theory)?;
        }
        "slice" => {
            let a = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let lo: u32 = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let hi: u32 = toks.get(4).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let out = get(bvs, toks.get(5)).ok_or_else(mal)?;
            s.bv_slice(a, lo, hi, out).map_err(theory)?;
        }
        kind @ ("min" | "max") => {
            let out = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let n: usize = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let mut args = Vec::with_capacity(n);
            for t in toks.iter().skip(4).take(n) {
                args.push(get(bvs, Some(t)).ok_or_else(mal)?);
            }
            if kind == "min" {
                s.bv_min(out, &args).map_err(theory)?;
            } else {
                s.bv_max(out, &args).map_err(theory)?;
            }
        }
        kind @ ("popcount" | "unary") => {
            let out = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let n: usize = toks.get(3).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let mut lits = Vec::with_capacity(n);
            for t in toks.iter().skip(4).take(n) {
                let l = parse_lit(s, t).ok_or_else(mal)?;
                lits.push(l);
            }
            if kind == "popcount" {
                s.bv_popcount(out, &lits).map_err(theory)?;
            } else {
                s.bv_unary(out, &lits).map_err(theory)?;
            }
        }
        "bitblast" => {
            let bv = get(bvs, toks.get(2)).ok_or_else(mal)?;
            s.bv_bitblast(bv).map_err(theory)?;
        }
        "symbol" => {
            let bv = get(bvs, toks.get(2)).ok_or_else(mal)?;
            let name = toks.get(3).ok_or_else(mal)?;
            s.set_bv_name(bv, name).map_err(theory)?;
        }
        _ => {
            // `bv <id> <n> <bit lits>`: explicit bits.
            let fid: u32 = toks.get(1).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let n: usize = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let mut bits = Vec::with_capacity(n);
            for t in toks.iter().skip(3).take(n) {
                bits.push(parse_lit(s, t).ok_or_else(mal)?);
            }
            let real = s.new_bv(&bits).map_err(theory)?;
            bvs.insert(fid, real);
        }
    }
    Ok(())
}

fn replay_objective(
    s: &mut Solver,
    toks: &[&str],
    bvs: &FxHashMap<u32, BvId>,
    line_no: usize,
    line: &str,
) -> Result<(), ReplayError> {
    let mal = || ReplayError::Malformed {
        line: line_no,
        text: line.to_string(),
    };
    let theory = |source| ReplayError::Theory {
        line: line_no,
        source,
    };
    let minimize = toks[0] == "minimize";
    match *toks.get(1).ok_or_else(mal)? {
        "bv" => {
            let bv = *bvs
                .get(&toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?)
                .ok_or_else(mal)?;
            if minimize {
                s.minimize_bv(bv).map_err(theory)?;
            } else {
                s.maximize_bv(bv).map_err(theory)?;
            }
        }
        "lits" => {
            let n: usize = toks.get(2).and_then(|t| t.parse().ok()).ok_or_else(mal)?;
            let mut lits = Vec::with_capacity(n);
            for t in toks.iter().skip(3).take(n) {
                lits.push(parse_lit(s, t).ok_or_else(mal)?);
            }
            // Optional weight tail, "0"-terminated.
            let mut weights = Vec::new();
            for t in toks.iter().skip(3 + n) {
                let w: i64 = t.parse().map_err(|_| mal())?;
                if w == 0 {
                    break;
                }
                weights.push(w);
            }
            match (minimize, weights.is_empty()) {
                (true, true) => s.minimize_lits(&lits).map_err(theory)?,
                (false, true) => s.maximize_lits(&lits).map_err(theory)?,
                (true, false) => s.minimize_weighted_lits(&lits, &weights).map_err(theory)?,
                (false, false) => s.maximize_weighted_lits(&lits, &weights).map_err(theory)?,
            }
        }
        _ => return Err(mal()),
    }
    Ok(())
}

fn parse_cmp(sym: &str) -> Option<CmpOp> {
    match sym {
        "<" => Some(CmpOp::Lt),
        "<=" => Some(CmpOp::Leq),
        ">" => Some(CmpOp::Gt),
        ">=" => Some(CmpOp::Geq),
        _ => None,
    }
}

fn parse_at(toks: &[&str], at: usize) -> Option<usize> {
    toks.get(at)?.parse().ok()
}

/// Parse a DIMACS literal, allocating its variable if needed.
fn parse_lit(solver: &mut Solver, tok: &str) -> Option<Lit> {
    let d: i64 = tok.parse().ok()?;
    if d == 0 {
        return None;
    }
    let lit = Lit::from_dimacs(d);
    solver.ensure_var(lit.var());
    Some(lit)
}
