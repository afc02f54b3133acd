//! Graph theory plugin.
//!
//! Maintains a labeled multigraph whose edges are enabled by Boolean
//! literals, and decides posted predicates (reachability, bounded
//! distance, max-flow thresholds, spanning-tree weight, acyclicity,
//! on-path membership) lazily against the under/over sandwich of the
//! current assignment.
//!
//! Every implied predicate literal carries a lazy reason token; the
//! stored reason is built from the witness (a path, a flow, a tree, a
//! cycle) or from a cut of disabled edges, optionally minimized to an
//! s–t min cut.

pub mod cycle;
pub mod dyn_graph;
pub mod flow;
pub mod mst;

pub use dyn_graph::{DynGraph, Edge, View, Weight};

use grix_core::error::TheoryError;
use grix_core::{
    LBool, LazyReason, Lit, ReachAlg, SolverOptions, Theory, TheoryConflict, TheoryId, TheoryView,
    Var,
};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::bv::BvHandle;
use flow::{FlowNetwork, FlowResult};

/// A predicate bound: a constant or a bitvector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bound {
    /// Constant bound.
    Const(i64),
    /// Bitvector bound, read from the shared bitvector store.
    Bv(crate::bv::BvId),
}

/// Hash-consing key of a detector: `(kind, args)`.
///
/// Reach keys include the hop cap, with `-1` meaning "any length", so
/// an unbounded and a bounded reach query over the same endpoints get
/// distinct detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKey {
    /// `∃ path from ⇝ to`, with at most `steps` hops (`-1`: unbounded).
    Reach {
        /// Source node.
        from: usize,
        /// Target node.
        to: usize,
        /// Hop cap, `-1` for unbounded.
        steps: i64,
    },
    /// Weighted distance `from ⇝ to` ≤ bound (or < with
    /// `inclusive = false`).
    Dist {
        /// Source node.
        from: usize,
        /// Target node.
        to: usize,
        /// Distance bound.
        bound: Bound,
        /// `≤` when true, `<` when false.
        inclusive: bool,
    },
    /// `maxflow(source, sink)` ≥ bound (or > with `inclusive = false`).
    Flow {
        /// Flow source.
        source: usize,
        /// Flow sink.
        sink: usize,
        /// Flow bound.
        bound: Bound,
        /// `≥` when true, `>` when false.
        inclusive: bool,
    },
    /// Minimum-spanning-tree weight ≤ bound (or <).
    Mst {
        /// Weight bound.
        bound: i64,
        /// `≤` when true, `<` when false.
        inclusive: bool,
    },
    /// The graph is acyclic (directed or undirected).
    Acyclic {
        /// Directed cycles when true; undirected ("forest") when false.
        directed: bool,
    },
    /// `node` lies on some path `from ⇝ to`.
    OnPath {
        /// The node that must be on the path.
        node: usize,
        /// Path source.
        from: usize,
        /// Path target.
        to: usize,
    },
}

#[derive(Debug, Clone)]
struct Detector {
    key: DetectorKey,
    lit: Lit,
}

#[derive(Debug)]
struct ReasonEntry {
    level: u32,
    clause: Vec<Lit>,
}

/// The graph theory plugin.
pub struct GraphTheory {
    id: TheoryId,
    graph_id: u32,
    name: Option<String>,
    weight_bits: u32,
    graph: DynGraph,
    edge_for_var: FxHashMap<Var, usize>,
    pred_for_var: FxHashMap<Var, usize>,
    detectors: Vec<Detector>,
    hashcons: FxHashMap<DetectorKey, usize>,
    assign_log: Vec<(usize, u32)>,
    reasons: Vec<ReasonEntry>,
    bv: Option<BvHandle>,
    options: SolverOptions,
    assign_weight: Option<i64>,
    node_names: FxHashMap<String, usize>,
    name_of_node: FxHashMap<usize, String>,
    dirty: bool,
    uses_bv: bool,
}

impl GraphTheory {
    /// Create an empty graph plugin.
    #[must_use]
    pub fn new(
        id: TheoryId,
        graph_id: u32,
        weight_bits: u32,
        options: SolverOptions,
        bv: Option<BvHandle>,
    ) -> Self {
        Self {
            id,
            graph_id,
            name: None,
            weight_bits,
            graph: DynGraph::new(),
            edge_for_var: FxHashMap::default(),
            pred_for_var: FxHashMap::default(),
            detectors: Vec::new(),
            hashcons: FxHashMap::default(),
            assign_log: Vec::new(),
            reasons: Vec::new(),
            bv,
            options,
            assign_weight: None,
            node_names: FxHashMap::default(),
            name_of_node: FxHashMap::default(),
            dirty: false,
            uses_bv: false,
        }
    }

    /// The graph's id within its solver.
    #[must_use]
    pub fn graph_id(&self) -> u32 {
        self.graph_id
    }

    /// Bit width used for edge weights in the trace format.
    #[must_use]
    pub fn weight_bits(&self) -> u32 {
        self.weight_bits
    }

    /// Attach the shared bitvector store (no-op once attached). Graphs
    /// created before the bitvector theory get the handle on first
    /// bitvector-flavored use.
    pub fn attach_bv(&mut self, bv: BvHandle) {
        if self.bv.is_none() {
            self.bv = Some(bv);
        }
    }

    /// Name this graph.
    pub fn set_graph_name(&mut self, name: &str) -> Result<(), TheoryError> {
        grix_core::validate_name(name)?;
        self.name = Some(name.to_string());
        Ok(())
    }

    /// The graph's name, if any.
    #[must_use]
    pub fn graph_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Add a node.
    pub fn new_node(&mut self) -> usize {
        self.graph.add_node()
    }

    /// Add a named node; names are unique within the graph.
    pub fn new_node_named(&mut self, name: &str) -> Result<usize, TheoryError> {
        grix_core::validate_name(name)?;
        if self.node_names.contains_key(name) {
            return Err(TheoryError::Core(grix_core::CoreError::BadName {
                name: name.to_string(),
                reason: "node name already in use",
            }));
        }
        let n = self.graph.add_node();
        self.node_names.insert(name.to_string(), n);
        self.name_of_node.insert(n, name.to_string());
        Ok(n)
    }

    /// Look up a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<usize> {
        self.node_names.get(name).copied()
    }

    /// The name of a node, if any.
    #[must_use]
    pub fn node_name(&self, node: usize) -> Option<&str> {
        self.name_of_node.get(&node).map(String::as_str)
    }

    /// Number of nodes.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.graph.n_nodes()
    }

    /// Number of edges.
    #[must_use]
    pub fn n_edges(&self) -> usize {
        self.graph.n_edges()
    }

    fn check_node(&self, node: usize) -> Result<(), TheoryError> {
        if node >= self.graph.n_nodes() {
            return Err(TheoryError::UnknownNode {
                graph: self.graph_id,
                node,
            });
        }
        Ok(())
    }

    /// Add a constant-weight edge enabled by `lit`.
    pub fn new_edge(
        &mut self,
        from: usize,
        to: usize,
        weight: i64,
        lit: Lit,
    ) -> Result<usize, TheoryError> {
        self.check_node(from)?;
        self.check_node(to)?;
        let id = self
            .graph
            .add_edge(from, to, Weight::Const(weight.max(0)), lit);
        self.edge_for_var.insert(lit.var(), id);
        self.dirty = true;
        Ok(id)
    }

    /// Add an edge whose weight is a bitvector.
    pub fn new_edge_bv(
        &mut self,
        from: usize,
        to: usize,
        bv: crate::bv::BvId,
        lit: Lit,
    ) -> Result<usize, TheoryError> {
        self.check_node(from)?;
        self.check_node(to)?;
        let handle = self
            .bv
            .as_ref()
            .ok_or(TheoryError::UnknownBitvector { bv: bv.0 })?;
        handle.borrow().check_bv(bv)?;
        let id = self.graph.add_edge(from, to, Weight::Bv(bv), lit);
        self.edge_for_var.insert(lit.var(), id);
        self.uses_bv = true;
        self.dirty = true;
        Ok(id)
    }

    /// The edge id enabled by `var`, if any.
    #[must_use]
    pub fn edge_of_var(&self, var: Var) -> Option<usize> {
        self.edge_for_var.get(&var).copied()
    }

    /// The enabling literal of an edge.
    #[must_use]
    pub fn edge_lit(&self, eid: usize) -> Lit {
        self.graph.edge(eid).lit
    }

    /// Force every selected edge's weight to this constant when
    /// otherwise unconstrained (a modeling convenience; enforced at the
    /// coordination layer for bitvector weights).
    pub fn set_assign_edges_to_weight(&mut self, weight: i64) {
        self.assign_weight = Some(weight.max(0));
    }

    /// The assign-edges-to-weight constant, if set.
    #[must_use]
    pub fn assign_edges_to_weight(&self) -> Option<i64> {
        self.assign_weight
    }

    /// An already-posted detector for this key.
    #[must_use]
    pub fn find_predicate(&self, key: &DetectorKey) -> Option<Lit> {
        self.hashcons.get(key).map(|&di| self.detectors[di].lit)
    }

    /// Post a predicate literal for a detector key.
    pub fn post_predicate(&mut self, key: DetectorKey, lit: Lit) -> Result<(), TheoryError> {
        match &key {
            DetectorKey::Reach { from, to, .. } | DetectorKey::OnPath { from, to, .. } => {
                self.check_node(*from)?;
                self.check_node(*to)?;
                if let DetectorKey::OnPath { node, .. } = &key {
                    self.check_node(*node)?;
                }
            }
            DetectorKey::Dist {
                from, to, bound, ..
            } => {
                self.check_node(*from)?;
                self.check_node(*to)?;
                self.check_bound(*bound)?;
            }
            DetectorKey::Flow {
                source,
                sink,
                bound,
                ..
            } => {
                self.check_node(*source)?;
                self.check_node(*sink)?;
                self.check_bound(*bound)?;
            }
            DetectorKey::Mst { .. } | DetectorKey::Acyclic { .. } => {}
        }
        let di = self.detectors.len();
        self.detectors.push(Detector { key, lit });
        self.hashcons.insert(key, di);
        self.pred_for_var.insert(lit.var(), di);
        self.dirty = true;
        debug!(graph = self.graph_id, ?key, %lit, "detector posted");
        Ok(())
    }

    fn check_bound(&mut self, bound: Bound) -> Result<(), TheoryError> {
        if let Bound::Bv(bv) = bound {
            let handle = self
                .bv
                .as_ref()
                .ok_or(TheoryError::UnknownBitvector { bv: bv.0 })?;
            handle.borrow().check_bv(bv)?;
            self.uses_bv = true;
        }
        Ok(())
    }

    /// Resolve an edge weight to its smallest possible value.
    fn weight_lo(&self, eid: usize) -> i64 {
        match self.graph.edge(eid).weight {
            Weight::Const(w) => w,
            Weight::Bv(bv) => clamp_u64(
                self.bv
                    .as_ref()
                    .map_or(0, |h| h.borrow().interval(bv).lo),
            ),
        }
    }

    /// Resolve an edge weight to its largest possible value.
    fn weight_hi(&self, eid: usize) -> i64 {
        match self.graph.edge(eid).weight {
            Weight::Const(w) => w,
            Weight::Bv(bv) => clamp_u64(
                self.bv
                    .as_ref()
                    .map_or(u64::MAX, |h| h.borrow().interval(bv).hi),
            ),
        }
    }

    /// Edge weight under the model approximation (bitvector weights
    /// read the snapshot taken at the last successful final check).
    fn model_weight(&self, eid: usize) -> i64 {
        match self.graph.edge(eid).weight {
            Weight::Const(w) => w,
            Weight::Bv(bv) => clamp_u64(
                self.bv
                    .as_ref()
                    .map_or(0, |h| h.borrow().model_interval(bv).lo),
            ),
        }
    }

    fn bound_range(&self, bound: Bound) -> (i64, i64) {
        match bound {
            Bound::Const(k) => (k, k),
            Bound::Bv(bv) => self.bv.as_ref().map_or((0, i64::MAX), |h| {
                let iv = h.borrow().interval(bv);
                (clamp_u64(iv.lo), clamp_u64(iv.hi))
            }),
        }
    }

    /// Assigned literals justifying the current bounds of a bitvector.
    fn bv_support(&self, bv: crate::bv::BvId, view: &dyn TheoryView, out: &mut Vec<Lit>) {
        if let Some(handle) = &self.bv {
            out.extend(handle.borrow().explain_bounds(bv, view));
        }
    }

    /// Justification literals for every bitvector weight used by edges
    /// in `edges`, plus the bound itself.
    fn weight_support(
        &self,
        edges: &[usize],
        bound: Option<Bound>,
        view: &dyn TheoryView,
        out: &mut Vec<Lit>,
    ) {
        for &eid in edges {
            if let Weight::Bv(bv) = self.graph.edge(eid).weight {
                self.bv_support(bv, view, out);
            }
        }
        if let Some(Bound::Bv(bv)) = bound {
            self.bv_support(bv, view, out);
        }
    }

    fn imply(&mut self, lit: Lit, justification: Vec<Lit>, view: &mut dyn TheoryView) {
        let mut clause = vec![lit];
        clause.extend(justification.iter().map(|&l| !l));
        dedup_clause(&mut clause);
        let token = self.reasons.len() as u32;
        self.reasons.push(ReasonEntry {
            level: view.decision_level(),
            clause,
        });
        trace!(graph = self.graph_id, %lit, "graph implication");
        view.enqueue(
            lit,
            LazyReason {
                theory: self.id,
                token,
            },
        );
    }

    fn conflict(&self, lit: Lit, justification: Vec<Lit>) -> TheoryConflict {
        let mut clause = vec![lit];
        clause.extend(justification.iter().map(|&l| !l));
        dedup_clause(&mut clause);
        TheoryConflict::new(clause)
    }

    /// Evaluate one detector and push its consequence.
    fn check_detector(
        &mut self,
        det: &Detector,
        view: &mut dyn TheoryView,
    ) -> Result<(), TheoryConflict> {
        let value = view.value(det.lit);
        let (under_holds, over_holds) = self.evaluate(&det.key);
        match value {
            LBool::Undef => {
                if under_holds {
                    let just = self.justify_holds(&det.key, view);
                    self.imply(det.lit, just, view);
                } else if !over_holds {
                    let just = self.justify_refuted(&det.key, view);
                    self.imply(!det.lit, just, view);
                }
            }
            LBool::True => {
                if !over_holds {
                    let just = self.justify_refuted(&det.key, view);
                    return Err(self.conflict(!det.lit, just));
                }
            }
            LBool::False => {
                if under_holds {
                    let just = self.justify_holds(&det.key, view);
                    return Err(self.conflict(det.lit, just));
                }
            }
        }
        Ok(())
    }

    /// `(forced_true, still_possible)` for a detector key.
    fn evaluate(&self, key: &DetectorKey) -> (bool, bool) {
        match *key {
            DetectorKey::Reach { from, to, steps } => {
                let cap = hop_cap(steps);
                let under = self.reach_search(View::Under, from, cap);
                let over = self.graph.bfs(View::Over, from, cap);
                (under.visited[to], over.visited[to])
            }
            DetectorKey::Dist {
                from,
                to,
                bound,
                inclusive,
            } => {
                let (bound_lo, bound_hi) = self.bound_range(bound);
                let wl: &dyn Fn(usize) -> i64 = &|e| self.weight_lo(e);
                let wh: &dyn Fn(usize) -> i64 = &|e| self.weight_hi(e);
                let under = self.graph.dijkstra(View::Under, from, wh).dist[to];
                let over = self.graph.dijkstra(View::Over, from, wl).dist[to];
                let holds = if inclusive {
                    under <= bound_lo
                } else {
                    under < bound_lo
                };
                let possible = if inclusive {
                    over <= bound_hi
                } else {
                    over < bound_hi
                };
                (holds, possible)
            }
            DetectorKey::Flow {
                source,
                sink,
                bound,
                inclusive,
            } => {
                let (bound_lo, bound_hi) = self.bound_range(bound);
                let target = if inclusive {
                    bound_hi
                } else {
                    bound_hi.saturating_add(1)
                };
                let under = self.run_flow(View::Under, source, sink, Some(target)).result;
                let over = self.run_flow(View::Over, source, sink, None).result;
                let holds = if inclusive {
                    under.value >= bound_hi
                } else {
                    under.value > bound_hi
                };
                let possible = if inclusive {
                    over.value >= bound_lo
                } else {
                    over.value > bound_lo
                };
                (holds, possible)
            }
            DetectorKey::Mst { bound, inclusive } => {
                let wl: &dyn Fn(usize) -> i64 = &|e| self.weight_lo(e);
                let wh: &dyn Fn(usize) -> i64 = &|e| self.weight_hi(e);
                let under =
                    mst::minimum_spanning_tree(&self.graph, View::Under, wh, self.options.mst_alg);
                let over =
                    mst::minimum_spanning_tree(&self.graph, View::Over, wl, self.options.mst_alg);
                let holds = under.spans
                    && if inclusive {
                        under.weight <= bound
                    } else {
                        under.weight < bound
                    };
                let possible = over.spans
                    && if inclusive {
                        over.weight <= bound
                    } else {
                        over.weight < bound
                    };
                (holds, possible)
            }
            DetectorKey::Acyclic { directed } => {
                let under_cycle = self.find_cycle(View::Under, directed);
                let over_cycle = self.find_cycle(View::Over, directed);
                // Over acyclic forces the predicate; an under cycle
                // refutes it.
                (over_cycle.is_none(), under_cycle.is_none())
            }
            DetectorKey::OnPath { node, from, to } => {
                let under_a = self.graph.bfs(View::Under, from, None).visited[node];
                let under_b = self.graph.bfs(View::Under, node, None).visited[to];
                let over_a = self.graph.bfs(View::Over, from, None).visited[node];
                let over_b = self.graph.bfs(View::Over, node, None).visited[to];
                (under_a && under_b, over_a && over_b)
            }
        }
    }

    fn reach_search(&self, view: View, from: usize, cap: Option<u32>) -> dyn_graph::Search {
        // Hop caps need BFS for minimal depth; otherwise honor the
        // configured algorithm.
        if cap.is_some() {
            return self.graph.bfs(view, from, cap);
        }
        match self.options.reach_alg {
            ReachAlg::Dfs => self.graph.dfs(view, from),
            _ => self.graph.bfs(view, from, None),
        }
    }

    fn run_flow(&self, view: View, source: usize, sink: usize, limit: Option<i64>) -> FlowRun {
        let mut net = FlowNetwork::new(self.graph.n_nodes());
        let mut net_edge_for: Vec<Option<usize>> = vec![None; self.graph.n_edges()];
        for eid in 0..self.graph.n_edges() {
            if !self.graph.in_view(eid, view) {
                continue;
            }
            let e = self.graph.edge(eid);
            let cap = match view {
                View::Under => self.weight_lo(eid),
                View::Over => self.weight_hi(eid),
            };
            net_edge_for[eid] = Some(net.add_edge(e.from, e.to, cap));
        }
        let result = flow::maxflow(&net, source, sink, limit, self.options.maxflow_alg);
        FlowRun {
            result,
            net_edge_for,
        }
    }

    fn find_cycle(&self, view: View, directed: bool) -> Option<Vec<usize>> {
        if directed {
            cycle::directed_cycle(&self.graph, view, self.options.cycle_alg)
        } else {
            cycle::undirected_cycle(&self.graph, view)
        }
    }

    /// Justification (currently-true literals) for "the predicate
    /// holds in every completion".
    fn justify_holds(&self, key: &DetectorKey, view: &dyn TheoryView) -> Vec<Lit> {
        let mut just = Vec::new();
        match *key {
            DetectorKey::Reach { from, to, steps } => {
                let under = self.graph.bfs(View::Under, from, hop_cap(steps));
                if let Some(path) = self.graph.path_to(&under.parent_edge, from, to) {
                    just.extend(path.iter().map(|&e| self.graph.edge(e).lit));
                }
            }
            DetectorKey::Dist {
                from, to, bound, ..
            } => {
                let wh: &dyn Fn(usize) -> i64 = &|e| self.weight_hi(e);
                let under = self.graph.dijkstra(View::Under, from, wh);
                if let Some(path) = self.graph.path_to(&under.parent_edge, from, to) {
                    just.extend(path.iter().map(|&e| self.graph.edge(e).lit));
                    self.weight_support(&path, Some(bound), view, &mut just);
                }
            }
            DetectorKey::Flow { source, sink, bound, .. } => {
                let run = self.run_flow(View::Under, source, sink, None);
                let mut flow_edges = Vec::new();
                for eid in 0..self.graph.n_edges() {
                    if let Some(k) = run.net_edge_for[eid]
                        && run.result.flow[k] > 0
                    {
                        flow_edges.push(eid);
                        just.push(self.graph.edge(eid).lit);
                    }
                }
                self.weight_support(&flow_edges, Some(bound), view, &mut just);
            }
            DetectorKey::Mst { .. } => {
                let wh: &dyn Fn(usize) -> i64 = &|e| self.weight_hi(e);
                let under =
                    mst::minimum_spanning_tree(&self.graph, View::Under, wh, self.options.mst_alg);
                just.extend(under.tree_edges.iter().map(|&e| self.graph.edge(e).lit));
                self.weight_support(&under.tree_edges, None, view, &mut just);
            }
            DetectorKey::Acyclic { directed } => {
                // Over view acyclic: the disabled edges that would
                // close a cycle justify it.
                just.extend(
                    self.cycle_closing_false_edges(directed)
                        .iter()
                        .map(|&e| !self.graph.edge(e).lit),
                );
            }
            DetectorKey::OnPath { node, from, to } => {
                let a = self.graph.bfs(View::Under, from, None);
                if let Some(path) = self.graph.path_to(&a.parent_edge, from, node) {
                    just.extend(path.iter().map(|&e| self.graph.edge(e).lit));
                }
                let b = self.graph.bfs(View::Under, node, None);
                if let Some(path) = self.graph.path_to(&b.parent_edge, node, to) {
                    just.extend(path.iter().map(|&e| self.graph.edge(e).lit));
                }
            }
        }
        just
    }

    /// Justification for "the predicate fails in every completion".
    fn justify_refuted(&self, key: &DetectorKey, view: &dyn TheoryView) -> Vec<Lit> {
        let mut just = Vec::new();
        match *key {
            DetectorKey::Reach { from, to, steps } => {
                let cut = self.reach_cut(from, to, hop_cap(steps));
                just.extend(cut.iter().map(|&e| !self.graph.edge(e).lit));
            }
            DetectorKey::Dist { from, bound, .. } => {
                // Any disabled edge reachable from the source could
                // shorten the distance; weights justify the rest.
                let over = self.graph.bfs(View::Over, from, None);
                for eid in 0..self.graph.n_edges() {
                    let e = self.graph.edge(eid);
                    if self.graph.state(eid).is_false() && over.visited[e.from] {
                        just.push(!e.lit);
                    }
                }
                let in_view: Vec<usize> = (0..self.graph.n_edges())
                    .filter(|&e| self.graph.in_view(e, View::Over))
                    .collect();
                self.weight_support(&in_view, Some(bound), view, &mut just);
            }
            DetectorKey::Flow { source, sink, bound, .. } => {
                let run = self.run_flow(View::Over, source, sink, None);
                let src_side = &run.result.src_side;
                let mut crossing_enabled = Vec::new();
                for eid in 0..self.graph.n_edges() {
                    let e = self.graph.edge(eid);
                    if src_side[e.from] && !src_side[e.to] {
                        if self.graph.state(eid).is_false() {
                            just.push(!e.lit);
                        } else if self.options.maxflow_conflict_min_cut {
                            crossing_enabled.push(eid);
                        }
                    }
                }
                if !self.options.maxflow_conflict_min_cut {
                    // Coarser reason: every edge in the over view.
                    crossing_enabled = (0..self.graph.n_edges())
                        .filter(|&e| self.graph.in_view(e, View::Over))
                        .collect();
                }
                self.weight_support(&crossing_enabled, Some(bound), view, &mut just);
            }
            DetectorKey::Mst { .. } => {
                // Any disabled edge could lower the tree weight or
                // reconnect the graph.
                for eid in 0..self.graph.n_edges() {
                    if self.graph.state(eid).is_false() {
                        just.push(!self.graph.edge(eid).lit);
                    }
                }
                let in_view: Vec<usize> = (0..self.graph.n_edges())
                    .filter(|&e| self.graph.in_view(e, View::Over))
                    .collect();
                self.weight_support(&in_view, None, view, &mut just);
            }
            DetectorKey::Acyclic { directed } => {
                if let Some(cyc) = self.find_cycle(View::Under, directed) {
                    just.extend(cyc.iter().map(|&e| self.graph.edge(e).lit));
                }
            }
            DetectorKey::OnPath { node, from, to } => {
                let over_a = self.graph.bfs(View::Over, from, None);
                if !over_a.visited[node] {
                    let cut = self.graph.frontier_cut(&over_a.visited);
                    just.extend(cut.iter().map(|&e| !self.graph.edge(e).lit));
                } else {
                    let over_b = self.graph.bfs(View::Over, node, None);
                    let cut = self.graph.frontier_cut(&over_b.visited);
                    just.extend(cut.iter().map(|&e| !self.graph.edge(e).lit));
                }
            }
        }
        just
    }

    /// Disabled edges that must stay disabled for the over view to be
    /// acyclic.
    fn cycle_closing_false_edges(&self, directed: bool) -> Vec<usize> {
        let mut closing = Vec::new();
        for eid in 0..self.graph.n_edges() {
            if !self.graph.state(eid).is_false() {
                continue;
            }
            let e = self.graph.edge(eid);
            if directed {
                // u → v closes a cycle iff v already reaches u.
                if self.graph.bfs(View::Over, e.to, None).visited[e.from] {
                    closing.push(eid);
                }
            } else if e.from == e.to
                || undirected_connected(&self.graph, e.from, e.to)
            {
                closing.push(eid);
            }
        }
        closing
    }

    /// Cut of disabled edges separating `to` from `from` in the over
    /// view, preferring the min cut closest to the source.
    fn reach_cut(&self, from: usize, to: usize, cap: Option<u32>) -> Vec<usize> {
        let over = self.graph.bfs(View::Over, from, cap);
        if let Some(cap_hops) = cap {
            // Hop-bounded: every disabled edge whose tail is reachable
            // within the cap could open a short-enough path.
            return (0..self.graph.n_edges())
                .filter(|&e| {
                    let edge = self.graph.edge(e);
                    self.graph.state(e).is_false()
                        && over.visited[edge.from]
                        && over.depth[edge.from] < cap_hops
                })
                .collect();
        }
        if !self.options.conflict_min_cut {
            return self.graph.frontier_cut(&over.visited);
        }
        // Min cut over disabled edges: enabled edges are
        // uncuttable (huge capacity), disabled edges cost one.
        const HUGE: i64 = i64::MAX / 4;
        let mut net = FlowNetwork::new(self.graph.n_nodes());
        let mut net_edge_for: Vec<Option<usize>> = vec![None; self.graph.n_edges()];
        for eid in 0..self.graph.n_edges() {
            let e = self.graph.edge(eid);
            let cap_cost = if self.graph.state(eid).is_false() {
                1
            } else {
                HUGE
            };
            net_edge_for[eid] = Some(net.add_edge(e.from, e.to, cap_cost));
        }
        let r = flow::maxflow(&net, from, to, None, self.options.maxflow_alg);
        (0..self.graph.n_edges())
            .filter(|&e| {
                let edge = self.graph.edge(e);
                self.graph.state(e).is_false()
                    && r.src_side[edge.from]
                    && !r.src_side[edge.to]
            })
            .collect()
    }

    /// Materialize a stored reason.
    #[must_use]
    pub fn explain_token(&self, token: u32) -> Vec<Lit> {
        self.reasons[token as usize].clause.clone()
    }

    // --- model extraction -------------------------------------------------

    /// Witness path for a satisfied reach/distance/on-path literal, as
    /// `(nodes, edge literals)`.
    #[must_use]
    pub fn model_path(
        &self,
        pred: Var,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<(Vec<usize>, Vec<Lit>)> {
        let det = &self.detectors[*self.pred_for_var.get(&pred)?];
        if !model(det.lit).is_true() {
            return None;
        }
        let (from, to, cap) = match det.key {
            DetectorKey::Reach { from, to, steps } => (from, to, hop_cap(steps)),
            DetectorKey::Dist { from, to, .. } => {
                // Weighted witness: the shortest path over model-true
                // edges.
                return self.model_dijkstra_path(from, to, model);
            }
            DetectorKey::OnPath { node, from, to } => {
                // Concatenate the two legs.
                let (na, ea) = self.model_bfs_path(from, node, None, model)?;
                let (nb, eb) = self.model_bfs_path(node, to, None, model)?;
                let mut nodes = na;
                nodes.extend(nb.into_iter().skip(1));
                let mut edges = ea;
                edges.extend(eb);
                return Some((nodes, edges));
            }
            _ => return None,
        };
        self.model_bfs_path(from, to, cap, model)
    }

    fn model_dijkstra_path(
        &self,
        from: usize,
        to: usize,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<(Vec<usize>, Vec<Lit>)> {
        let mut dist = vec![i64::MAX; self.graph.n_nodes()];
        let mut parent: Vec<Option<usize>> = vec![None; self.graph.n_nodes()];
        let mut heap = std::collections::BinaryHeap::new();
        dist[from] = 0;
        heap.push(std::cmp::Reverse((0i64, from)));
        while let Some(std::cmp::Reverse((d, u))) = heap.pop() {
            if d > dist[u] {
                continue;
            }
            for &eid in self.graph.out_edges(u) {
                if !model(self.graph.edge(eid).lit).is_true() {
                    continue;
                }
                let v = self.graph.edge(eid).to;
                let nd = d.saturating_add(self.model_weight(eid).max(0));
                if nd < dist[v] {
                    dist[v] = nd;
                    parent[v] = Some(eid);
                    heap.push(std::cmp::Reverse((nd, v)));
                }
            }
        }
        let edges = self.graph.path_to(&parent, from, to)?;
        let mut nodes = vec![from];
        let mut lits = Vec::new();
        for &eid in &edges {
            nodes.push(self.graph.edge(eid).to);
            lits.push(self.graph.edge(eid).lit);
        }
        Some((nodes, lits))
    }

    fn model_bfs_path(
        &self,
        from: usize,
        to: usize,
        cap: Option<u32>,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<(Vec<usize>, Vec<Lit>)> {
        // BFS restricted to edges true in the model.
        let mut visited = vec![false; self.graph.n_nodes()];
        let mut parent: Vec<Option<usize>> = vec![None; self.graph.n_nodes()];
        let mut depth = vec![0u32; self.graph.n_nodes()];
        let mut queue = std::collections::VecDeque::new();
        visited[from] = true;
        queue.push_back(from);
        while let Some(u) = queue.pop_front() {
            if let Some(c) = cap
                && depth[u] >= c
            {
                continue;
            }
            for &eid in self.graph.out_edges(u) {
                if !model(self.graph.edge(eid).lit).is_true() {
                    continue;
                }
                let v = self.graph.edge(eid).to;
                if !visited[v] {
                    visited[v] = true;
                    parent[v] = Some(eid);
                    depth[v] = depth[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        let edges = self.graph.path_to(&parent, from, to)?;
        let mut nodes = vec![from];
        let mut lits = Vec::new();
        for &eid in &edges {
            nodes.push(self.graph.edge(eid).to);
            lits.push(self.graph.edge(eid).lit);
        }
        Some((nodes, lits))
    }

    /// Max-flow value for a satisfied flow literal under the model.
    #[must_use]
    pub fn model_maxflow(&self, pred: Var, model: &dyn Fn(Lit) -> LBool) -> Option<i64> {
        self.model_flow_run(pred, model).map(|(r, _)| r.value)
    }

    /// Flow through one edge in the model's max-flow labeling.
    #[must_use]
    pub fn model_edge_flow(
        &self,
        pred: Var,
        edge_var: Var,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<i64> {
        let eid = self.edge_of_var(edge_var)?;
        let (result, net_edge_for) = self.model_flow_run(pred, model)?;
        Some(net_edge_for[eid].map_or(0, |k| result.flow[k]))
    }

    /// Flow through one edge after cancelling all flow cycles.
    #[must_use]
    pub fn model_acyclic_edge_flow(
        &self,
        pred: Var,
        edge_var: Var,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<i64> {
        let eid = self.edge_of_var(edge_var)?;
        let (result, net_edge_for) = self.model_flow_run(pred, model)?;
        let mut flows: Vec<i64> = vec![0; self.graph.n_edges()];
        for e in 0..self.graph.n_edges() {
            if let Some(k) = net_edge_for[e] {
                flows[e] = result.flow[k];
            }
        }
        self.cancel_flow_cycles(&mut flows);
        Some(flows[eid])
    }

    fn model_flow_run(
        &self,
        pred: Var,
        model: &dyn Fn(Lit) -> LBool,
    ) -> Option<(FlowResult, Vec<Option<usize>>)> {
        let det = &self.detectors[*self.pred_for_var.get(&pred)?];
        let (source, sink) = match det.key {
            DetectorKey::Flow { source, sink, .. } => (source, sink),
            _ => return None,
        };
        let mut net = FlowNetwork::new(self.graph.n_nodes());
        let mut net_edge_for: Vec<Option<usize>> = vec![None; self.graph.n_edges()];
        for eid in 0..self.graph.n_edges() {
            let e = self.graph.edge(eid);
            if model(e.lit).is_true() {
                net_edge_for[eid] = Some(net.add_edge(e.from, e.to, self.model_weight(eid)));
            }
        }
        let result = flow::maxflow(&net, source, sink, None, self.options.maxflow_alg);
        Some((result, net_edge_for))
    }

    /// Remove flow cycles by repeatedly cancelling the bottleneck of a
    /// positive-flow cycle; preserves net flow through every cut.
    fn cancel_flow_cycles(&self, flows: &mut [i64]) {
        loop {
            let Some(cycle) = self.positive_flow_cycle(flows) else {
                break;
            };
            let bottleneck = cycle.iter().map(|&e| flows[e]).min().unwrap_or(0);
            if bottleneck <= 0 {
                break;
            }
            for &e in &cycle {
                flows[e] -= bottleneck;
            }
        }
    }

    fn positive_flow_cycle(&self, flows: &[i64]) -> Option<Vec<usize>> {
        // DFS over edges with positive flow.
        let n = self.graph.n_nodes();
        let mut color = vec![0u8; n];
        let mut entered_by: Vec<Option<usize>> = vec![None; n];
        for root in 0..n {
            if color[root] != 0 {
                continue;
            }
            let mut stack = vec![(root, 0usize)];
            color[root] = 1;
            while let Some(&(u, _)) = stack.last() {
                let out = self.graph.out_edges(u);
                let mut advanced = false;
                loop {
                    let pos = stack.last().expect("stack non-empty").1;
                    if pos >= out.len() {
                        break;
                    }
                    stack.last_mut().expect("stack non-empty").1 += 1;
                    let eid = out[pos];
                    if flows[eid] <= 0 {
                        continue;
                    }
                    let v = self.graph.edge(eid).to;
                    match color[v] {
                        0 => {
                            color[v] = 1;
                            entered_by[v] = Some(eid);
                            stack.push((v, 0));
                            advanced = true;
                            break;
                        }
                        1 => {
                            let mut cycle = vec![eid];
                            let mut cur = u;
                            while cur != v {
                                let back = entered_by[cur]?;
                                cycle.push(back);
                                cur = self.graph.edge(back).from;
                            }
                            return Some(cycle);
                        }
                        _ => {}
                    }
                }
                if !advanced {
                    color[u] = 2;
                    stack.pop();
                }
            }
        }
        None
    }

    /// Tree weight for a satisfied MST literal under the model.
    #[must_use]
    pub fn model_mst_weight(&self, pred: Var, model: &dyn Fn(Lit) -> LBool) -> Option<i64> {
        let det = &self.detectors[*self.pred_for_var.get(&pred)?];
        if !matches!(det.key, DetectorKey::Mst { .. }) {
            return None;
        }
        // Kruskal over the model's true edges.
        let mut order: Vec<usize> = (0..self.graph.n_edges())
            .filter(|&e| model(self.graph.edge(e).lit).is_true())
            .collect();
        order.sort_by_key(|&e| self.model_weight(e));
        let mut uf = mst::UnionFind::new(self.graph.n_nodes());
        let mut weight = 0i64;
        for eid in order {
            let e = self.graph.edge(eid);
            if uf.union(e.from, e.to) {
                weight += self.model_weight(eid);
            }
        }
        Some(weight)
    }
}

struct FlowRun {
    result: FlowResult,
    net_edge_for: Vec<Option<usize>>,
}

impl Theory for GraphTheory {
    fn id(&self) -> TheoryId {
        self.id
    }

    fn name(&self) -> &str {
        "graph"
    }

    fn owns_var(&self, var: Var) -> bool {
        self.edge_for_var.contains_key(&var) || self.pred_for_var.contains_key(&var)
    }

    fn enqueue_theory(&mut self, lit: Lit, level: u32) {
        if let Some(&eid) = self.edge_for_var.get(&lit.var()) {
            let enabled = lit == self.graph.edge(eid).lit;
            self.graph.set_state(eid, LBool::from_bool(enabled));
            self.assign_log.push((eid, level));
        }
        self.dirty = true;
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        if !self.dirty && !self.uses_bv {
            return Ok(());
        }
        self.dirty = false;
        for di in 0..self.detectors.len() {
            let det = self.detectors[di].clone();
            self.check_detector(&det, view)?;
        }
        Ok(())
    }

    fn explain(&mut self, token: u32) -> Vec<Lit> {
        self.explain_token(token)
    }

    fn backtrack(&mut self, level: u32) {
        while let Some(&(eid, lvl)) = self.assign_log.last() {
            if lvl <= level {
                break;
            }
            self.graph.set_state(eid, LBool::Undef);
            self.assign_log.pop();
        }
        // Reason levels are non-decreasing; drop the suffix.
        while self.reasons.last().is_some_and(|r| r.level > level) {
            self.reasons.pop();
        }
        self.dirty = true;
    }

    fn check_satisfied(&mut self, view: &mut dyn TheoryView) -> bool {
        for det in &self.detectors {
            let (under_holds, over_holds) = self.evaluate(&det.key);
            let value = view.value(det.lit);
            if (value.is_true() && !over_holds) || (value.is_false() && under_holds) {
                self.dirty = true;
                return false;
            }
        }
        true
    }
}

fn hop_cap(steps: i64) -> Option<u32> {
    if steps < 0 {
        None
    } else {
        Some(steps.min(i64::from(u32::MAX)) as u32)
    }
}

fn clamp_u64(v: u64) -> i64 {
    v.min(i64::MAX as u64) as i64
}

fn undirected_connected(graph: &DynGraph, a: usize, b: usize) -> bool {
    // Union-find over the over view, ignoring direction.
    let mut uf = mst::UnionFind::new(graph.n_nodes());
    for (eid, e) in graph.edges().iter().enumerate() {
        if graph.in_view(eid, View::Over) {
            uf.union(e.from, e.to);
        }
    }
    uf.find(a) == uf.find(b)
}

fn dedup_clause(clause: &mut Vec<Lit>) {
    let first = clause[0];
    clause.sort_unstable_by_key(|arg0: &Lit| Lit::code(*arg0));
    clause.dedup();
    // Keep the implied literal first.
    if let Some(pos) = clause.iter().position(|&l| l == first) {
        clause.swap(0, pos);
    }
}
