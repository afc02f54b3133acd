//! Finite-state-machine theory plugin.
//!
//! Each automaton's transitions carry enabling literals, like graph
//! edges. An `accepts(start, accept, string)` predicate is decided by
//! reachability in the product of the automaton with the string's
//! positions: the under view (true transitions) forces acceptance, the
//! over view (non-false transitions) refutes it. Label 0 is epsilon.

use grix_core::error::TheoryError;
use grix_core::{LBool, LazyReason, Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct Transition {
    from: usize,
    to: usize,
    input: u32,
    #[allow(dead_code)]
    output: u32,
    lit: Lit,
}

#[derive(Debug, Default)]
struct Fsm {
    n_states: usize,
    transitions: Vec<Transition>,
    out_adj: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, Copy)]
struct AcceptPred {
    fsm: usize,
    start: usize,
    accept: usize,
    string: usize,
    lit: Lit,
}

/// Which sandwich view a product search walks.
#[derive(Clone, Copy, PartialEq, Eq)]
enum FsmView {
    Under,
    Over,
}

/// The FSM theory plugin.
pub struct FsmTheory {
    id: TheoryId,
    fsms: Vec<Fsm>,
    strings: Vec<Vec<u32>>,
    accepts: Vec<AcceptPred>,
    transition_for_var: FxHashMap<Var, (usize, usize)>,
    pred_for_var: FxHashMap<Var, usize>,
    state: Vec<Vec<LBool>>,
    assign_log: Vec<(usize, usize, u32)>,
    reasons: Vec<(u32, Vec<Lit>)>,
    dirty: bool,
}

impl FsmTheory {
    /// Create an empty plugin.
    #[must_use]
    pub fn new(id: TheoryId) -> Self {
        Self {
            id,
            fsms: Vec::new(),
            strings: Vec::new(),
            accepts: Vec::new(),
            transition_for_var: FxHashMap::default(),
            pred_for_var: FxHashMap::default(),
            state: Vec::new(),
            assign_log: Vec::new(),
            reasons: Vec::new(),
            dirty: false,
        }
    }

    /// Create an automaton, returning its id.
    pub fn new_fsm(&mut self) -> usize {
        self.fsms.push(Fsm::default());
        self.state.push(Vec::new());
        self.fsms.len() - 1
    }

    /// Add a state to an automaton.
    pub fn new_state(&mut self, fsm: usize) -> Result<usize, TheoryError> {
        let f = self
            .fsms
            .get_mut(fsm)
            .ok_or(TheoryError::UnknownFsm { fsm })?;
        let s = f.n_states;
        f.n_states += 1;
        f.out_adj.push(Vec::new());
        Ok(s)
    }

    /// Number of states in an automaton.
    pub fn n_states(&self, fsm: usize) -> Result<usize, TheoryError> {
        self.fsms
            .get(fsm)
            .map(|f| f.n_states)
            .ok_or(TheoryError::UnknownFsm { fsm })
    }

    /// Add a transition enabled by `lit`. Input label 0 is epsilon.
    pub fn new_transition(
        &mut self,
        fsm: usize,
        from: usize,
        to: usize,
        input: u32,
        output: u32,
        lit: Lit,
    ) -> Result<usize, TheoryError> {
        let f = self
            .fsms
            .get_mut(fsm)
            .ok_or(TheoryError::UnknownFsm { fsm })?;
        if from >= f.n_states || to >= f.n_states {
            return Err(TheoryError::UnknownNode {
                graph: fsm as u32,
                node: from.max(to),
            });
        }
        let t = f.transitions.len();
        f.transitions.push(Transition {
            from,
            to,
            input,
            output,
            lit,
        });
        f.out_adj[from].push(t);
        self.state[fsm].push(LBool::Undef);
        self.transition_for_var.insert(lit.var(), (fsm, t));
        self.dirty = true;
        Ok(t)
    }

    /// Register a string of positive labels, returning its id.
    pub fn new_string(&mut self, labels: Vec<u32>) -> Result<usize, TheoryError> {
        if labels.iter().any(|&l| l == 0) {
            return Err(TheoryError::Unsupported {
                what: "string labels must be positive",
            });
        }
        self.strings.push(labels);
        Ok(self.strings.len() - 1)
    }

    /// Post an acceptance predicate literal.
    pub fn add_accept(
        &mut self,
        fsm: usize,
        start: usize,
        accept: usize,
        string: usize,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let f = self
            .fsms
            .get(fsm)
            .ok_or(TheoryError::UnknownFsm { fsm })?;
        if start >= f.n_states || accept >= f.n_states {
            return Err(TheoryError::UnknownNode {
                graph: fsm as u32,
                node: start.max(accept),
            });
        }
        if string >= self.strings.len() {
            return Err(TheoryError::UnknownString { string });
        }
        let pi = self.accepts.len();
        self.accepts.push(AcceptPred {
            fsm,
            start,
            accept,
            string,
            lit,
        });
        self.pred_for_var.insert(lit.var(), pi);
        self.dirty = true;
        Ok(())
    }

    /// Product reachability: can `accept` be reached after consuming
    /// the whole string? Returns the transitions used by one accepting
    /// run when it can.
    fn accepts_in_view(&self, pred: &AcceptPred, view: FsmView) -> Option<Vec<usize>> {
        let f = &self.fsms[pred.fsm];
        let string = &self.strings[pred.string];
        let n = f.n_states;
        let positions = string.len() + 1;
        let idx = |state: usize, pos: usize| pos * n + state;
        let mut parent: Vec<Option<(usize, usize)>> = vec![None; n * positions];
        let mut visited = vec![false; n * positions];
        let start = idx(pred.start, 0);
        visited[start] = true;
        let mut queue = VecDeque::new();
        queue.push_back((pred.start, 0usize));
        while let Some((s, pos)) = queue.pop_front() {
            if s == pred.accept && pos == string.len() {
                // Reconstruct the run.
                let mut run = Vec::new();
                let mut cur = idx(s, pos);
                while let Some((prev, t)) = parent[cur] {
                    run.push(t);
                    cur = prev;
                }
                run.reverse();
                return Some(run);
            }
            for &ti in &f.out_adj[s] {
                let t = &f.transitions[ti];
                let present = match view {
                    FsmView::Under => self.state[pred.fsm][ti].is_true(),
                    FsmView::Over => !self.state[pred.fsm][ti].is_false(),
                };
                if !present {
                    continue;
                }
                let next_pos = if t.input == 0 {
                    Some(pos)
                } else if pos < string.len() && string[pos] == t.input {
                    Some(pos + 1)
                } else {
                    None
                };
                if let Some(np) = next_pos {
                    let ni = idx(t.to, np);
                    if !visited[ni] {
                        visited[ni] = true;
                        parent[ni] = Some((idx(s, pos), ti));
                        queue.push_back((t.to, np));
                    }
                }
            }
        }
        None
    }

    fn justify_rejected(&self, pred: &AcceptPred) -> Vec<Lit> {
        // Coarse but sound: acceptance can only appear by enabling one
        // of the automaton's disabled transitions.
        let f = &self.fsms[pred.fsm];
        f.transitions
            .iter()
            .enumerate()
            .filter(|&(ti, _)| self.state[pred.fsm][ti].is_false())
            .map(|(_, t)| !t.lit)
            .collect()
    }
}

impl Theory for FsmTheory {
    fn id(&self) -> TheoryId {
        self.id
    }

    fn name(&self) -> &str {
        "fsm"
    }

    fn owns_var(&self, var: Var) -> bool {
        self.transition_for_var.contains_key(&var) || self.pred_for_var.contains_key(&var)
    }

    fn enqueue_theory(&mut self, lit: Lit, level: u32) {
        if let Some(&(fsm, ti)) = self.transition_for_var.get(&lit.var()) {
            let enabled = lit == self.fsms[fsm].transitions[ti].lit;
            self.state[fsm][ti] = LBool::from_bool(enabled);
            self.assign_log.push((fsm, ti, level));
        }
        self.dirty = true;
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        if !self.dirty {
            return Ok(());
        }
        self.dirty = false;
        for pi in 0..self.accepts.len() {
            let pred = self.accepts[pi];
            let under_run = self.accepts_in_view(&pred, FsmView::Under);
            let over_run = self.accepts_in_view(&pred, FsmView::Over);
            let value = view.value(pred.lit);
            match value {
                LBool::Undef => {
                    if let Some(run) = under_run {
                        let mut clause = vec![pred.lit];
                        clause.extend(
                            run.iter()
                                .map(|&t| !self.fsms[pred.fsm].transitions[t].lit),
                        );
                        let token = self.reasons.len() as u32;
                        self.reasons.push((view.decision_level(), clause));
                        view.enqueue(
                            pred.lit,
                            LazyReason {
                                theory: self.id,
                                token,
                            },
                        );
                    } else if over_run.is_none() {
                        let mut clause = vec![!pred.lit];
                        clause.extend(self.justify_rejected(&pred).iter().map(|&l| !l));
                        let token = self.reasons.len() as u32;
                        self.reasons.push((view.decision_level(), clause));
                        view.enqueue(
                            !pred.lit,
                            LazyReason {
                                theory: self.id,
                                token,
                            },
                        );
                    }
                }
                LBool::True => {
                    if over_run.is_none() {
                        let mut clause = vec![!pred.lit];
                        clause.extend(self.justify_rejected(&pred).iter().map(|&l| !l));
                        return Err(TheoryConflict::new(clause));
                    }
                }
                LBool::False => {
                    if let Some(run) = under_run {
                        let mut clause = vec![pred.lit];
                        clause.extend(
                            run.iter()
                                .map(|&t| !self.fsms[pred.fsm].transitions[t].lit),
                        );
                        return Err(TheoryConflict::new(clause));
                    }
                }
            }
        }
        Ok(())
    }

    fn explain(&mut self, token: u32) -> Vec<Lit> {
        self.reasons[token as usize].1.clone()
    }

    fn backtrack(&mut self, level: u32) {
        while let Some(&(fsm, ti, lvl)) = self.assign_log.last() {
            if lvl <= level {
                break;
            }
            self.state[fsm][ti] = LBool::Undef;
            self.assign_log.pop();
        }
        while self.reasons.last().is_some_and(|r| r.0 > level) {
            self.reasons.pop();
        }
        self.dirty = true;
    }

    fn check_satisfied(&mut self, view: &mut dyn TheoryView) -> bool {
        for pred in &self.accepts {
            let actual = self.accepts_in_view(pred, FsmView::Under).is_some();
            let claimed = view.value(pred.lit);
            if (claimed.is_true() && !actual) || (claimed.is_false() && actual) {
                self.dirty = true;
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestView {
        values: Vec<LBool>,
        enqueued: Vec<Lit>,
    }

    impl TheoryView for TestView {
        fn value(&self, lit: Lit) -> LBool {
            self.values[lit.var().index()].xor(lit.sign())
        }

        fn decision_level(&self) -> u32 {
            1
        }

        fn enqueue(&mut self, lit: Lit, _reason: LazyReason) {
            self.enqueued.push(lit);
        }
    }

    /// Two-state automaton accepting "ab" via 0 →a→ 1 →b→ 0.
    fn ab_machine() -> (FsmTheory, usize, Lit, Lit, Lit) {
        let mut fsm = FsmTheory::new(TheoryId(0));
        let m = fsm.new_fsm();
        let s0 = fsm.new_state(m).unwrap();
        let s1 = fsm.new_state(m).unwrap();
        let t0 = Lit::pos(Var(0));
        let t1 = Lit::pos(Var(1));
        let acc = Lit::pos(Var(2));
        fsm.new_transition(m, s0, s1, 1, 0, t0).unwrap();
        fsm.new_transition(m, s1, s0, 2, 0, t1).unwrap();
        let s = fsm.new_string(vec![1, 2]).unwrap();
        fsm.add_accept(m, s0, s0, s, acc).unwrap();
        (fsm, m, t0, t1, acc)
    }

    #[test]
    fn test_under_run_implies_accept() {
        let (mut fsm, _, t0, t1, acc) = ab_machine();
        let mut view = TestView {
            values: vec![LBool::True, LBool::True, LBool::Undef],
            enqueued: Vec::new(),
        };
        fsm.enqueue_theory(t0, 1);
        fsm.enqueue_theory(t1, 1);
        fsm.propagate(&mut view).unwrap();
        assert_eq!(view.enqueued, vec![acc]);
    }

    #[test]
    fn test_over_rejection_implies_not_accept() {
        let (mut fsm, _, t0, _, acc) = ab_machine();
        let mut view = TestView {
            values: vec![LBool::False, LBool::Undef, LBool::Undef],
            enqueued: Vec::new(),
        };
        fsm.enqueue_theory(!t0, 1);
        fsm.propagate(&mut view).unwrap();
        assert_eq!(view.enqueued, vec![!acc]);
    }

    #[test]
    fn test_conflict_on_contradiction() {
        let (mut fsm, _, t0, t1, acc) = ab_machine();
        let mut view = TestView {
            values: vec![LBool::True, LBool::True, LBool::False],
            enqueued: Vec::new(),
        };
        fsm.enqueue_theory(t0, 1);
        fsm.enqueue_theory(t1, 1);
        let conflict = fsm.propagate(&mut view).unwrap_err();
        assert!(conflict.clause.contains(&acc));
    }

    #[test]
    fn test_epsilon_transitions() {
        let mut fsm = FsmTheory::new(TheoryId(0));
        let m = fsm.new_fsm();
        let s0 = fsm.new_state(m).unwrap();
        let s1 = fsm.new_state(m).unwrap();
        let t = Lit::pos(Var(0));
        let acc = Lit::pos(Var(1));
        fsm.new_transition(m, s0, s1, 0, 0, t).unwrap();
        let s = fsm.new_string(vec![]).unwrap();
        fsm.add_accept(m, s0, s1, s, acc).unwrap();
        let mut view = TestView {
            values: vec![LBool::True, LBool::Undef],
            enqueued: Vec::new(),
        };
        fsm.enqueue_theory(t, 1);
        fsm.propagate(&mut view).unwrap();
        assert_eq!(view.enqueued, vec![acc]);
    }
}
