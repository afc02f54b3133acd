//! Max-flow / min-cut over a residual network.
//!
//! Two algorithms share the residual representation: Edmonds–Karp (BFS
//! augmenting paths) and Dinitz (level graph + blocking flow). Both
//! return the flow value, the per-edge flow labeling, and the source
//! side of a minimum cut: the set of nodes reachable from the source in
//! the final residual graph, which is the min cut closest to the
//! source.

use grix_core::MaxflowAlg;
use std::collections::VecDeque;
use tracing::warn;

/// A flow network under construction.
#[derive(Debug, Default)]
pub struct FlowNetwork {
    n: usize,
    // Forward/backward residual arcs in pairs: arc 2k is the k-th
    // forward edge, arc 2k+1 its reverse.
    to: Vec<usize>,
    cap: Vec<i64>,
    adj: Vec<Vec<usize>>,
}

impl FlowNetwork {
    /// Create a network with `n` nodes.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            n,
            to: Vec::new(),
            cap: Vec::new(),
            adj: vec![Vec::new(); n],
        }
    }

    /// Add a directed edge with a capacity; returns its index (dense,
    /// in insertion order).
    pub fn add_edge(&mut self, from: usize, to: usize, cap: i64) -> usize {
        let idx = self.to.len() / 2;
        self.adj[from].push(self.to.len());
        self.to.push(to);
        self.cap.push(cap.max(0));
        self.adj[to].push(self.to.len());
        self.to.push(from);
        self.cap.push(0);
        idx
    }

    /// Number of forward edges.
    #[must_use]
    pub fn n_edges(&self) -> usize {
        self.to.len() / 2
    }
}

/// Result of a max-flow computation.
#[derive(Debug)]
pub struct FlowResult {
    /// Total flow from source to sink.
    pub value: i64,
    /// Flow on each forward edge, in insertion order.
    pub flow: Vec<i64>,
    /// Nodes on the source side of the min cut (reachable in the final
    /// residual graph).
    pub src_side: Vec<bool>,
}

/// Run the selected algorithm. `limit` stops early once the flow
/// reaches it (enough for threshold predicates).
#[must_use]
pub fn maxflow(
    net: &FlowNetwork,
    source: usize,
    sink: usize,
    limit: Option<i64>,
    alg: MaxflowAlg,
) -> FlowResult {
    match alg {
        MaxflowAlg::EdmondsKarp | MaxflowAlg::EdmondsKarpAdj | MaxflowAlg::EdmondsKarpDynamic => {
            edmonds_karp(net, source, sink, limit)
        }
        MaxflowAlg::Dinitz => dinitz(net, source, sink, limit),
        MaxflowAlg::DinitzLinkCut | MaxflowAlg::KohliTorr => {
            warn!(?alg, "falling back to dinitz");
            dinitz(net, source, sink, limit)
        }
    }
}

/// Edmonds–Karp: repeated BFS augmenting paths.
#[must_use]
pub fn edmonds_karp(
    net: &FlowNetwork,
    source: usize,
    sink: usize,
    limit: Option<i64>,
) -> FlowResult {
    let mut cap = net.cap.clone();
    let mut value: i64 = 0;
    loop {
        if let Some(lim) = limit
            && value >= lim
        {
            break;
        }
        // BFS for a shortest augmenting path.
        let mut parent_arc = vec![usize::MAX; net.n];
        let mut visited = vec![false; net.n];
        visited[source] = true;
        let mut queue = VecDeque::new();
        queue.push_back(source);
        'bfs: while let Some(u) = queue.pop_front() {
            for &arc in &net.adj[u] {
                let v = net.to[arc];
                if !visited[v] && cap[arc] > 0 {
                    visited[v] = true;
                    parent_arc[v] = arc;
                    if v == sink {
                        break 'bfs;
                    }
                    queue.push_back(v);
                }
            }
        }
        if !visited[sink] {
            break;
        }
        // Bottleneck and augment.
        let mut bottleneck = i64::MAX;
        let mut v = sink;
        while v != source {
            let arc = parent_arc[v];
            bottleneck = bottleneck.min(cap[arc]);
            v = net.to[arc ^ 1];
        }
        let mut v = sink;
        while v != source {
            let arc = parent_arc[v];
            cap[arc] -= bottleneck;
            cap[arc ^ 1] += bottleneck;
            v = net.to[arc ^ 1];
        }
        value += bottleneck;
    }
    finish(net, &cap, source, value)
}

/// Dinitz: level graph plus blocking flow.
#[must_use]
pub fn dinitz(net: &FlowNetwork, source: usize, sink: usize, limit: Option<i64>) -> FlowResult {
    let mut cap = net.cap.clone();
    let mut value: i64 = 0;
    loop {
        if let Some(lim) = limit
            && value >= lim
        {
            break;
        }
        // Build the level graph.
        let mut level = vec![u32::MAX; net.n];
        level[source] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for &arc in &net.adj[u] {
                let v = net.to[arc];
                if cap[arc] > 0 && level[v] == u32::MAX {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        if level[sink] == u32::MAX {
            break;
        }
        // Blocking flow by iterative DFS with arc pointers.
        let mut next: Vec<usize> = vec![0; net.n];
        loop {
            let pushed = dinitz_push(
                net,
                &mut cap,
                &level,
                &mut next,
                source,
                sink,
                i64::MAX,
            );
            if pushed == 0 {
                break;
            }
            value += pushed;
            if let Some(lim) = limit
                && value >= lim
            {
                break;
            }
        }
    }
    finish(net, &cap, source, value)
}

fn dinitz_push(
    net: &FlowNetwork,
    cap: &mut [i64],
    level: &[u32],
    next: &mut [usize],
    u: usize,
    sink: usize,
    budget: i64,
) -> i64 {
    if u == sink {
        return budget;
    }
    while next[u] < net.adj[u].len() {
        let arc = net.adj[u][next[u]];
        let v = net.to[arc];
        if cap[arc] > 0 && level[v] == level[u] + 1 {
            let pushed = dinitz_push(net, cap, level, next, v, sink, budget.min(cap[arc]));
            if pushed > 0 {
                cap[arc] -= pushed;
                cap[arc ^ 1] += pushed;
                return pushed;
            }
        }
        next[u] += 1;
    }
    0
}

fn finish(net: &FlowNetwork, cap: &[i64], source: usize, value: i64) -> FlowResult {
    // Per-edge flow: original capacity minus residual.
    let flow: Vec<i64> = (0..net.n_edges())
        .map(|k| net.cap[2 * k] - cap[2 * k])
        .collect();
    // Source side of the min cut: residual reachability.
    let mut src_side = vec![false; net.n];
    src_side[source] = true;
    let mut queue = VecDeque::new();
    queue.push_back(source);
    while let Some(u) = queue.pop_front() {
        for &arc in &net.adj[u] {
            let v = net.to[arc];
            if cap[arc] > 0 && !src_side[v] {
                src_side[v] = true;
                queue.push_back(v);
            }
        }
    }
    FlowResult {
        value,
        flow,
        src_side,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bipartite() -> FlowNetwork {
        // s=0, a=1, b=2, t=3; unit capacities, two disjoint paths.
        let mut net = FlowNetwork::new(4);
        net.add_edge(0, 1, 1);
        net.add_edge(0, 2, 1);
        net.add_edge(1, 3, 1);
        net.add_edge(2, 3, 1);
        net
    }

    #[test]
    fn test_edmonds_karp_value() {
        let net = bipartite();
        let r = edmonds_karp(&net, 0, 3, None);
        assert_eq!(r.value, 2);
        assert_eq!(r.flow, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_dinitz_agrees_with_edmonds_karp() {
        let mut net = FlowNetwork::new(6);
        net.add_edge(0, 1, 10);
        net.add_edge(0, 2, 10);
        net.add_edge(1, 2, 2);
        net.add_edge(1, 3, 4);
        net.add_edge(1, 4, 8);
        net.add_edge(2, 4, 9);
        net.add_edge(3, 5, 10);
        net.add_edge(4, 3, 6);
        net.add_edge(4, 5, 10);
        let ek = edmonds_karp(&net, 0, 5, None);
        let di = dinitz(&net, 0, 5, None);
        assert_eq!(ek.value, 19);
        assert_eq!(di.value, ek.value);
    }

    #[test]
    fn test_min_cut_is_closest_to_source() {
        // s → a (cap 1) → t (cap 10): the only min cut is {s}.
        let mut net = FlowNetwork::new(3);
        net.add_edge(0, 1, 1);
        net.add_edge(1, 2, 10);
        let r = edmonds_karp(&net, 0, 2, None);
        assert_eq!(r.value, 1);
        assert_eq!(r.src_side, vec![true, false, false]);
    }

    #[test]
    fn test_limit_stops_early() {
        let net = bipartite();
        let r = edmonds_karp(&net, 0, 3, Some(1));
        assert!(r.value >= 1);
    }

    #[test]
    fn test_disconnected_has_zero_flow() {
        let net = FlowNetwork::new(2);
        let r = dinitz(&net, 0, 1, None);
        assert_eq!(r.value, 0);
        assert!(r.src_side[0]);
        assert!(!r.src_side[1]);
    }
}
