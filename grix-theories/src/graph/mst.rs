//! Minimum spanning tree over a sandwich view.
//!
//! Kruskal with a union-find forest is the default; Prim is available
//! through the selector. Edge directions are ignored (a spanning tree
//! is an undirected notion). A graph that does not span all nodes has
//! infinite tree weight.

use grix_core::MstAlg;
use tracing::warn;

use super::dyn_graph::{DynGraph, View};

/// Union-find over node ids.
#[derive(Debug)]
pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
    components: usize,
}

impl UnionFind {
    /// A forest of `n` singletons.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
            components: n,
        }
    }

    /// Representative of `x`'s component.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while self.parent[cur] != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Merge the components of `a` and `b`; false if already joined.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        let (hi, lo) = if self.rank[ra] >= self.rank[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[lo] = hi;
        if self.rank[hi] == self.rank[lo] {
            self.rank[hi] += 1;
        }
        self.components -= 1;
        true
    }

    /// Number of components.
    #[must_use]
    pub fn components(&self) -> usize {
        self.components
    }
}

/// Result of a spanning-tree computation.
#[derive(Debug)]
pub struct MstResult {
    /// Whether every node is in one component.
    pub spans: bool,
    /// Total tree weight (meaningless unless `spans`).
    pub weight: i64,
    /// Edge ids of the tree.
    pub tree_edges: Vec<usize>,
}

/// Minimum spanning tree of a view.
#[must_use]
pub fn minimum_spanning_tree(
    graph: &DynGraph,
    view: View,
    weight_of: &dyn Fn(usize) -> i64,
    alg: MstAlg,
) -> MstResult {
    match alg {
        MstAlg::Kruskal => kruskal(graph, view, weight_of),
        MstAlg::Prim => prim(graph, view, weight_of),
        MstAlg::SpiraPan => {
            warn!("falling back to kruskal");
            kruskal(graph, view, weight_of)
        }
    }
}

fn kruskal(graph: &DynGraph, view: View, weight_of: &dyn Fn(usize) -> i64) -> MstResult {
    let mut order: Vec<usize> = (0..graph.n_edges())
        .filter(|&e| graph.in_view(e, view))
        .collect();
    order.sort_by_key(|&e| weight_of(e));
    let mut uf = UnionFind::new(graph.n_nodes());
    let mut weight = 0i64;
    let mut tree_edges = Vec::new();
    for eid in order {
        let e = graph.edge(eid);
        if uf.union(e.from, e.to) {
            weight += weight_of(eid);
            tree_edges.push(eid);
        }
    }
    MstResult {
        spans: uf.components() <= 1,
        weight,
        tree_edges,
    }
}

fn prim(graph: &DynGraph, view: View, weight_of: &dyn Fn(usize) -> i64) -> MstResult {
    let n = graph.n_nodes();
    if n == 0 {
        return MstResult {
            spans: true,
            weight: 0,
            tree_edges: Vec::new(),
        };
    }
    // Undirected adjacency: an edge joins both endpoints.
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (eid, e) in graph.edges().iter().enumerate() {
        if graph.in_view(eid, view) {
            adj[e.from].push(eid);
            adj[e.to].push(eid);
        }
    }
    let mut in_tree = vec![false; n];
    let mut tree_edges = Vec::new();
    let mut weight = 0i64;
    let mut heap = std::collections::BinaryHeap::new();
    in_tree[0] = true;
    for &eid in &adj[0] {
        heap.push(std::cmp::Reverse((weight_of(eid), eid, 0usize)));
    }
    let mut joined = 1;
    while let Some(std::cmp::Reverse((w, eid, _))) = heap.pop() {
        let e = graph.edge(eid);
        let next = if !in_tree[e.from] {
            e.from
        } else if !in_tree[e.to] {
            e.to
        } else {
            continue;
        };
        in_tree[next] = true;
        joined += 1;
        weight += w;
        tree_edges.push(eid);
        for &ne in &adj[next] {
            heap.push(std::cmp::Reverse((weight_of(ne), ne, next)));
        }
    }
    MstResult {
        spans: joined == n,
        weight,
        tree_edges,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::dyn_graph::Weight;
    use grix_core::{LBool, Lit, Var};

    fn triangle() -> DynGraph {
        let mut g = DynGraph::new();
        for _ in 0..3 {
            g.add_node();
        }
        g.add_edge(0, 1, Weight::Const(1), Lit::pos(Var(0)));
        g.add_edge(1, 2, Weight::Const(2), Lit::pos(Var(1)));
        g.add_edge(0, 2, Weight::Const(10), Lit::pos(Var(2)));
        g
    }

    fn const_weight(g: &DynGraph) -> impl Fn(usize) -> i64 + '_ {
        |eid| match g.edge(eid).weight {
            Weight::Const(w) => w,
            Weight::Bv(_) => unreachable!(),
        }
    }

    #[test]
    fn test_kruskal_picks_light_edges() {
        let g = triangle();
        let w = const_weight(&g);
        let r = kruskal(&g, View::Over, &w);
        assert!(r.spans);
        assert_eq!(r.weight, 3);
        assert_eq!(r.tree_edges.len(), 2);
    }

    #[test]
    fn test_prim_agrees_with_kruskal() {
        let g = triangle();
        let w = const_weight(&g);
        let k = kruskal(&g, View::Over, &w);
        let p = prim(&g, View::Over, &w);
        assert_eq!(k.spans, p.spans);
        assert_eq!(k.weight, p.weight);
    }

    #[test]
    fn test_disconnected_does_not_span() {
        let mut g = triangle();
        g.set_state(1, LBool::False);
        g.set_state(2, LBool::False);
        let w = const_weight(&g);
        let r = kruskal(&g, View::Over, &w);
        assert!(!r.spans);
    }

    #[test]
    fn test_union_find_components() {
        let mut uf = UnionFind::new(4);
        assert_eq!(uf.components(), 4);
        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 0));
        assert!(uf.union(2, 3));
        assert_eq!(uf.components(), 2);
        assert_eq!(uf.find(1), uf.find(0));
    }
}
