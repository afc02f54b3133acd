//! Flow-router decision heuristic.
//!
//! Groups edge/reach literal pairs into routing nets under a max-flow
//! predicate and steers the engine's branching so each net picks a
//! member edge early, instead of thrashing through assignments that
//! cannot route every net. Purely heuristic: the routing semantics
//! themselves are enforced by the clauses and predicates the client
//! posted.

use grix_core::{Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};

/// One routing net: a disable switch and member (edge, reach) pairs.
#[derive(Debug, Clone)]
pub struct RoutingNet {
    /// When true, the net is not routed.
    pub disabled: Lit,
    /// Candidate member edges with their reach predicates.
    pub members: Vec<(Lit, Lit)>,
}

/// The router plugin.
pub struct FlowRouter {
    id: TheoryId,
    router_id: u32,
    source: usize,
    dest: usize,
    maxflow_lit: Lit,
    nets: Vec<RoutingNet>,
}

impl FlowRouter {
    /// Create a router for a max-flow predicate between two nodes.
    #[must_use]
    pub fn new(id: TheoryId, router_id: u32, source: usize, dest: usize, maxflow_lit: Lit) -> Self {
        Self {
            id,
            router_id,
            source,
            dest,
            maxflow_lit,
            nets: Vec::new(),
        }
    }

    /// The router's id within its solver.
    #[must_use]
    pub fn router_id(&self) -> u32 {
        self.router_id
    }

    /// The routed source node.
    #[must_use]
    pub fn source(&self) -> usize {
        self.source
    }

    /// The routed destination node.
    #[must_use]
    pub fn dest(&self) -> usize {
        self.dest
    }

    /// Add a routing net.
    pub fn add_net(&mut self, disabled: Lit, members: Vec<(Lit, Lit)>) {
        self.nets.push(RoutingNet { disabled, members });
    }

    /// Number of nets.
    #[must_use]
    pub fn n_nets(&self) -> usize {
        self.nets.len()
    }
}

impl Theory for FlowRouter {
    fn id(&self) -> TheoryId {
        self.id
    }

    fn name(&self) -> &str {
        "router"
    }

    fn owns_var(&self, _var: Var) -> bool {
        false
    }

    fn enqueue_theory(&mut self, _lit: Lit, _level: u32) {}

    fn propagate(&mut self, _view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        Ok(())
    }

    fn explain(&mut self, _token: u32) -> Vec<Lit> {
        unreachable!("the router never enqueues literals")
    }

    fn backtrack(&mut self, _level: u32) {}

    fn check_satisfied(&mut self, _view: &mut dyn TheoryView) -> bool {
        true
    }

    fn decide(&mut self, view: &mut dyn TheoryView) -> Option<Lit> {
        if !view.value(self.maxflow_lit).is_true() {
            return None;
        }
        for net in &self.nets {
            if view.value(net.disabled).is_true() {
                continue;
            }
            if net.members.iter().any(|&(edge, _)| view.value(edge).is_true()) {
                continue;
            }
            // Unrouted net: branch on a member edge whose reach
            // predicate is still achievable.
            for &(edge, reach) in &net.members {
                if view.value(edge).is_undef() && !view.value(reach).is_false() {
                    return Some(edge);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grix_core::{LBool, LazyReason};

    struct TestView {
        values: Vec<LBool>,
    }

    impl TheoryView for TestView {
        fn value(&self, lit: Lit) -> LBool {
            self.values[lit.var().index()].xor(lit.sign())
        }

        fn decision_level(&self) -> u32 {
            1
        }

        fn enqueue(&mut self, _lit: Lit, _reason: LazyReason) {
            unreachable!("the router never enqueues");
        }
    }

    #[test]
    fn test_suggests_edge_for_unrouted_net() {
        let mf = Lit::pos(Var(0));
        let disabled = Lit::pos(Var(1));
        let edge = Lit::pos(Var(2));
        let reach = Lit::pos(Var(3));
        let mut router = FlowRouter::new(TheoryId(0), 0, 0, 1, mf);
        router.add_net(disabled, vec![(edge, reach)]);
        let mut view = TestView {
            values: vec![LBool::True, LBool::Undef, LBool::Undef, LBool::Undef],
        };
        assert_eq!(router.decide(&mut view), Some(edge));
        // Routed net: no suggestion.
        view.values[2] = LBool::True;
        assert_eq!(router.decide(&mut view), None);
    }

    #[test]
    fn test_inactive_when_flow_lit_unset() {
        let mf = Lit::pos(Var(0));
        let mut router = FlowRouter::new(TheoryId(0), 0, 0, 1, mf);
        router.add_net(Lit::pos(Var(1)), vec![(Lit::pos(Var(2)), Lit::pos(Var(3)))]);
        let mut view = TestView {
            values: vec![LBool::Undef; 4],
        };
        assert_eq!(router.decide(&mut view), None);
    }
}
