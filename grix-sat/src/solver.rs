//! The CDCL(T) engine.
//!
//! A two-watched-literal CDCL solver in the MiniSat lineage, extended
//! with theory hooks: every assignment of a theory-owned literal is
//! routed to the owning plugin, plugins enqueue implied literals with
//! lazy reasons, and conflict analysis materializes those reasons on
//! demand through [`TheoryHost::explain`].
//!
//! The engine never owns the plugins; all entry points that can assign
//! or backtrack take a [`TheoryHost`], implemented by the coordination
//! layer.

use grix_core::{InterruptFlag, LBool, LazyReason, Lit, SolverOptions, TheoryConflict, TheoryView, Var};
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use crate::clause::{CRef, Clause, ClauseDb, Watcher};
use crate::heap::VarOrder;

/// Tri-state result of a `solve` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveResult {
    /// A model was found.
    Sat,
    /// The formula (under the given assumptions) is unsatisfiable.
    Unsat,
    /// A budget or interrupt stopped the search.
    Unknown,
}

impl SolveResult {
    /// Conventional process exit code: `SAT=10`, `UNSAT=20`, `UNKNOWN=0`.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            SolveResult::Sat => 10,
            SolveResult::Unsat => 20,
            SolveResult::Unknown => 0,
        }
    }
}

/// Why a variable is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reason {
    /// Decision, assumption, or unassigned.
    #[default]
    None,
    /// Propagated by a clause.
    Clause(CRef),
    /// Propagated by a theory plugin; materialized on demand.
    Theory(LazyReason),
}

/// The coordination layer's side of the engine/theory boundary.
pub trait TheoryHost {
    /// A theory-owned literal was assigned at `level`.
    fn notify_assign(&mut self, lit: Lit, level: u32);

    /// Run one theory propagation round (round-robin over plugins,
    /// stopping at the first plugin that enqueues).
    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict>;

    /// Materialize a lazy reason into a full clause (implied literal
    /// first).
    fn explain(&mut self, reason: LazyReason) -> Vec<Lit>;

    /// Broadcast a backtrack to every plugin.
    fn backtrack(&mut self, level: u32);

    /// Final consistency check at a full assignment.
    fn final_check(&mut self, view: &mut dyn TheoryView) -> bool;

    /// Ask plugins for a branching suggestion.
    fn decide(&mut self, view: &mut dyn TheoryView) -> Option<Lit>;

    /// Whether any plugin owns `var` (used to freeze it against
    /// preprocessing).
    fn owns_var(&self, var: Var) -> bool;
}

/// A host with no registered theories; turns the engine into a plain
/// CDCL SAT solver.
#[derive(Debug, Default)]
pub struct NoTheories;

impl TheoryHost for NoTheories {
    fn notify_assign(&mut self, _lit: Lit, _level: u32) {}

    fn propagate(&mut self, _view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        Ok(())
    }

    fn explain(&mut self, _reason: LazyReason) -> Vec<Lit> {
        unreachable!("no theory ever enqueued a literal")
    }

    fn backtrack(&mut self, _level: u32) {}

    fn final_check(&mut self, _view: &mut dyn TheoryView) -> bool {
        true
    }

    fn decide(&mut self, _view: &mut dyn TheoryView) -> Option<Lit> {
        None
    }

    fn owns_var(&self, _var: Var) -> bool {
        false
    }
}

/// The window handed to plugins during propagation.
struct EngineView<'a> {
    assigns: &'a [LBool],
    level: u32,
    queue: &'a mut Vec<(Lit, LazyReason)>,
}

impl TheoryView for EngineView<'_> {
    fn value(&self, lit: Lit) -> LBool {
        self.assigns[lit.var().index()].xor(lit.sign())
    }

    fn decision_level(&self) -> u32 {
        self.level
    }

    fn enqueue(&mut self, lit: Lit, reason: LazyReason) {
        self.queue.push((lit, reason));
    }
}

/// Search statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverStats {
    /// Decisions made.
    pub decisions: u64,
    /// Unit propagations performed.
    pub propagations: u64,
    /// Conflicts analyzed.
    pub conflicts: u64,
    /// Restarts performed.
    pub restarts: u64,
    /// Learned clauses deleted by database reduction.
    pub reduced: u64,
}

enum Confl {
    Clause(CRef),
    Lits(Vec<Lit>),
}

/// The CDCL(T) SAT engine.
pub struct SatSolver {
    /// Solver options (decay factors, restart base, toggles).
    pub options: SolverOptions,
    /// Clause arena.
    pub clauses: ClauseDb,
    watches: Vec<Vec<Watcher>>,

    assigns: Vec<LBool>,
    levels: Vec<u32>,
    reasons: Vec<Reason>,
    trail: Vec<Lit>,
    trail_lim: Vec<usize>,
    qhead: usize,
    theory_qhead: usize,

    order: VarOrder,
    activity: Vec<f64>,
    var_inc: f64,
    polarity: Vec<bool>,
    user_pol: Vec<Option<bool>>,
    decision: Vec<bool>,
    priority: Vec<i64>,

    /// Variables the preprocessor must not touch.
    pub frozen: Vec<bool>,
    /// Variables eliminated by the preprocessor.
    pub eliminated: Vec<bool>,

    cla_inc: f64,
    max_learnts: f64,

    ok: bool,
    conflict: Vec<Lit>,
    model: Vec<LBool>,
    has_model: bool,

    conf_budget: i64,
    prop_budget: i64,
    /// Cooperative stop signal; also settable via the global registry.
    pub interrupt: InterruptFlag,

    /// Search statistics.
    pub stats: SolverStats,

    seen: Vec<bool>,
    analyze_toclear: Vec<Var>,
    theory_queue: Vec<(Lit, LazyReason)>,
}

impl SatSolver {
    /// Create an engine with the given options.
    #[must_use]
    pub fn new(options: SolverOptions) -> Self {
        Self {
            options,
            clauses: ClauseDb::new(),
            watches: Vec::new(),
            assigns: Vec::new(),
            levels: Vec::new(),
            reasons: Vec::new(),
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            theory_qhead: 0,
            order: VarOrder::new(),
            activity: Vec::new(),
            var_inc: 1.0,
            polarity: Vec::new(),
            user_pol: Vec::new(),
            decision: Vec::new(),
            priority: Vec::new(),
            frozen: Vec::new(),
            eliminated: Vec::new(),
            cla_inc: 1.0,
            max_learnts: 0.0,
            ok: true,
            conflict: Vec::new(),
            model: Vec::new(),
            has_model: false,
            conf_budget: -1,
            prop_budget: -1,
            interrupt: InterruptFlag::new(),
            stats: SolverStats::default(),
            seen: Vec::new(),
            analyze_toclear: Vec::new(),
            theory_queue: Vec::new(),
        }
    }

    /// Allocate a fresh variable.
    pub fn new_var(&mut self) -> Var {
        let v = Var(self.assigns.len() as u32);
        self.assigns.push(LBool::Undef);
        self.levels.push(0);
        self.reasons.push(Reason::None);
        self.activity.push(0.0);
        self.polarity.push(true);
        self.user_pol.push(None);
        self.decision.push(true);
        self.priority.push(0);
        self.frozen.push(false);
        self.eliminated.push(false);
        self.seen.push(false);
        self.watches.push(Vec::new());
        self.watches.push(Vec::new());
        self.order.reserve(v);
        self.insert_var_order(v);
        v
    }

    /// Number of allocated variables.
    #[must_use]
    pub fn n_vars(&self) -> usize {
        self.assigns.len()
    }

    /// Number of live problem clauses.
    #[must_use]
    pub fn n_clauses(&self) -> usize {
        self.clauses.num_problem
    }

    /// Whether the solver is still consistent at the root.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.ok
    }

    /// Current decision level.
    #[must_use]
    pub fn decision_level(&self) -> u32 {
        self.trail_lim.len() as u32
    }

    /// Current value of a literal.
    #[must_use]
    pub fn value(&self, lit: Lit) -> LBool {
        self.assigns[lit.var().index()].xor(lit.sign())
    }

    /// Current value of a variable.
    #[must_use]
    pub fn var_value(&self, var: Var) -> LBool {
        self.assigns[var.index()]
    }

    /// Assignment level of a variable (meaningless if unassigned).
    #[must_use]
    pub fn var_level(&self, var: Var) -> u32 {
        self.levels[var.index()]
    }

    /// Reason of a variable's assignment.
    #[must_use]
    pub fn var_reason(&self, var: Var) -> Reason {
        self.reasons[var.index()]
    }

    /// Whether a variable is assigned at level 0.
    #[must_use]
    pub fn is_constant(&self, var: Var) -> bool {
        !self.assigns[var.index()].is_undef() && self.levels[var.index()] == 0
    }

    /// Value of a literal in the last model (after a SAT answer).
    #[must_use]
    pub fn model_value(&self, lit: Lit) -> LBool {
        if !self.has_model {
            return LBool::Undef;
        }
        self.model
            .get(lit.var().index())
            .copied()
            .unwrap_or(LBool::Undef)
            .xor(lit.sign())
    }

    /// Whether the last solve produced a model.
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.has_model
    }

    /// Overwrite a model value (used by model reconstruction).
    pub fn set_model_value(&mut self, var: Var, value: LBool) {
        if var.index() < self.model.len() {
            self.model[var.index()] = value;
        }
    }

    /// The conflict clause of the last UNSAT-under-assumptions answer:
    /// negations of the participating assumptions.
    #[must_use]
    pub fn conflict_clause(&self) -> &[Lit] {
        &self.conflict
    }

    /// Mark whether a variable may be picked as a decision.
    pub fn set_decision_var(&mut self, var: Var, decidable: bool) {
        self.decision[var.index()] = decidable;
        if decidable {
            self.insert_var_order(var);
        }
    }

    /// Whether a variable may be picked as a decision.
    #[must_use]
    pub fn is_decision_var(&self, var: Var) -> bool {
        self.decision[var.index()]
    }

    /// Set a decision priority; higher-priority variables are always
    /// branched before lower-priority ones, overriding activity.
    pub fn set_decision_priority(&mut self, var: Var, priority: i64) {
        self.priority[var.index()] = priority;
        let (priority_ref, activity) = (&self.priority, &self.activity);
        self.order.decrease(var, |a, b| {
            order_gt(priority_ref, activity, a, b)
        });
    }

    /// Read a variable's decision priority.
    #[must_use]
    pub fn decision_priority(&self, var: Var) -> i64 {
        self.priority[var.index()]
    }

    /// Force the branching polarity of a variable.
    pub fn set_decision_polarity(&mut self, var: Var, value: bool) {
        self.user_pol[var.index()] = Some(value);
    }

    /// Read the forced branching polarity, if any.
    #[must_use]
    pub fn decision_polarity(&self, var: Var) -> Option<bool> {
        self.user_pol[var.index()]
    }

    /// Protect a variable from preprocessing.
    pub fn freeze(&mut self, var: Var) {
        self.frozen[var.index()] = true;
    }

    /// Limit the number of conflicts for subsequent solves (-1 = off).
    pub fn set_conf_budget(&mut self, budget: i64) {
        self.conf_budget = budget;
    }

    /// Limit the number of propagations for subsequent solves (-1 = off).
    pub fn set_prop_budget(&mut self, budget: i64) {
        self.prop_budget = budget;
    }

    /// Add a clause at the root level.
    ///
    /// Returns `false` iff the solver became (or already was)
    /// trivially unsatisfiable.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        debug_assert_eq!(self.decision_level(), 0);
        if !self.ok {
            return false;
        }
        let mut ps: SmallVec<[Lit; 4]> = lits.iter().copied().collect();
        ps.sort_unstable();
        ps.dedup();
        let mut j = 0;
        for i in 0..ps.len() {
            let l = ps[i];
            if self.value(l).is_true() || (i + 1 < ps.len() && ps[i + 1] == !l) {
                return true; // satisfied at root or tautology
            }
            if !self.value(l).is_false() {
                ps[j] = l;
                j += 1;
            }
        }
        ps.truncate(j);
        match ps.len() {
            0 => {
                self.ok = false;
                false
            }
            1 => {
                self.unchecked_enqueue(ps[0], Reason::None);
                // Defer full propagation to the next solve; a direct
                // contradiction with another unit still surfaces here.
                if self.propagate_bool().is_some() {
                    self.ok = false;
                }
                self.ok
            }
            _ => {
                let cref = self.clauses.alloc(Clause::new(ps, false));
                self.attach_clause(cref);
                true
            }
        }
    }

    /// Attach a clause to the watch lists.
    pub fn attach_clause(&mut self, cref: CRef) {
        let c = self.clauses.get(cref);
        debug_assert!(c.len() >= 2);
        let (l0, l1) = (c.lits[0], c.lits[1]);
        self.watches[(!l0).index()].push(Watcher { cref, blocker: l1 });
        self.watches[(!l1).index()].push(Watcher { cref, blocker: l0 });
    }

    /// Rebuild every watch list from the live clauses.
    pub fn rebuild_watches(&mut self) {
        for w in &mut self.watches {
            w.clear();
        }
        let crefs: Vec<CRef> = self.clauses.iter_refs().collect();
        for cref in crefs {
            if self.clauses.get(cref).len() >= 2 {
                self.attach_clause(cref);
            }
        }
    }

    fn insert_var_order(&mut self, var: Var) {
        if self.decision[var.index()]
            && !self.eliminated[var.index()]
            && self.assigns[var.index()].is_undef()
        {
            let (priority, activity) = (&self.priority, &self.activity);
            self.order
                .insert(var, |a, b| order_gt(priority, activity, a, b));
        }
    }

    fn var_bump_activity(&mut self, var: Var) {
        self.activity[var.index()] += self.var_inc;
        if self.activity[var.index()] > 1e100 {
            for a in &mut self.activity {
                *a *= 1e-100;
            }
            self.var_inc *= 1e-100;
        }
        let (priority, activity) = (&self.priority, &self.activity);
        self.order
            .decrease(var, |a, b| order_gt(priority, activity, a, b));
    }

    fn var_decay_activity(&mut self) {
        self.var_inc /= self.options.var_decay;
    }

    fn cla_bump_activity(&mut self, cref: CRef) {
        let inc = self.cla_inc as f32;
        let c = self.clauses.get_mut(cref);
        c.activity += inc;
        if c.activity > 1e20 {
            let refs: Vec<CRef> = self.clauses.iter_refs().collect();
            for r in refs {
                self.clauses.get_mut(r).activity *= 1e-20;
            }
            self.cla_inc *= 1e-20;
        }
    }

    fn cla_decay_activity(&mut self) {
        self.cla_inc /= self.options.clause_decay;
    }

    /// Assign a literal that is known not to be false.
    pub fn unchecked_enqueue(&mut self, lit: Lit, reason: Reason) {
        debug_assert!(self.value(lit).is_undef());
        let v = lit.var();
        self.assigns[v.index()] = LBool::from_bool(!lit.sign());
        self.levels[v.index()] = self.decision_level();
        self.reasons[v.index()] = reason;
        self.trail.push(lit);
    }

    /// Open a new decision level.
    pub fn new_decision_level(&mut self) {
        self.trail_lim.push(self.trail.len());
    }

    /// Boolean constraint propagation to fixed point.
    ///
    /// Returns the conflicting clause, if any.
    fn propagate_bool(&mut self) -> Option<CRef> {
        let mut confl = None;
        while self.qhead < self.trail.len() {
            let p = self.trail[self.qhead];
            self.qhead += 1;
            self.stats.propagations += 1;
            if self.prop_budget > 0 {
                self.prop_budget -= 1;
            }
            let mut ws = std::mem::take(&mut self.watches[p.index()]);
            let mut i = 0;
            let mut j = 0;
            'watchers: while i < ws.len() {
                let w = ws[i];
                i += 1;
                if self.clauses.get(w.cref).deleted {
                    continue; // dropped lazily
                }
                if self.value(w.blocker).is_true() {
                    ws[j] = w;
                    j += 1;
                    continue;
                }
                let cref = w.cref;
                // Make sure the false literal is at position 1.
                let first = {
                    let c = self.clauses.get_mut(cref);
                    if c.lits[0] == !p {
                        c.lits.swap(0, 1);
                    }
                    debug_assert_eq!(c.lits[1], !p);
                    c.lits[0]
                };
                if first != w.blocker && self.value(first).is_true() {
                    ws[j] = Watcher {
                        cref,
                        blocker: first,
                    };
                    j += 1;
                    continue;
                }
                // Look for a new literal to watch.
                let len = self.clauses.get(cref).len();
                for k in 2..len {
                    let lk = self.clauses.get(cref).lits[k];
                    if !self.value(lk).is_false() {
                        let c = self.clauses.get_mut(cref);
                        c.lits.swap(1, k);
                        self.watches[(!lk).index()].push(Watcher {
                            cref,
                            blocker: first,
                        });
                        continue 'watchers;
                    }
                }
                // Unit or conflicting.
                ws[j] = Watcher {
                    cref,
                    blocker: first,
                };
                j += 1;
                if self.value(first).is_false() {
                    confl = Some(cref);
                    self.qhead = self.trail.len();
                    while i < ws.len() {
                        ws[j] = ws[i];
                        j += 1;
                        i += 1;
                    }
                } else {
                    self.unchecked_enqueue(first, Reason::Clause(cref));
                }
            }
            ws.truncate(j);
            self.watches[p.index()] = ws;
            if confl.is_some() {
                break;
            }
        }
        confl
    }

    /// BCP plus theory propagation rounds, to a full fixed point.
    fn propagate_all(&mut self, host: &mut dyn TheoryHost) -> Option<Confl> {
        loop {
            if let Some(cref) = self.propagate_bool() {
                return Some(Confl::Clause(cref));
            }
            // Route fresh assignments of theory-owned literals.
            while self.theory_qhead < self.trail.len() {
                let l = self.trail[self.theory_qhead];
                self.theory_qhead += 1;
                host.notify_assign(l, self.levels[l.var().index()]);
            }
            let mut queue = std::mem::take(&mut self.theory_queue);
            queue.clear();
            let level = self.decision_level();
            let result = {
                let mut view = EngineView {
                    assigns: &self.assigns,
                    level,
                    queue: &mut queue,
                };
                host.propagate(&mut view)
            };
            if let Err(conflict) = result {
                self.theory_queue = queue;
                trace!(size = conflict.clause.len(), "theory conflict");
                return Some(Confl::Lits(conflict.clause));
            }
            let mut progress = false;
            let mut pending_conflict = None;
            for (lit, reason) in queue.drain(..) {
                match self.value(lit) {
                    LBool::True => {}
                    LBool::False => {
                        // The implied literal is already false: the
                        // materialized reason is the conflict clause.
                        pending_conflict = Some(host.explain(reason));
                        break;
                    }
                    LBool::Undef => {
                        self.unchecked_enqueue(lit, Reason::Theory(reason));
                        progress = true;
                    }
                }
            }
            self.theory_queue = queue;
            if let Some(clause) = pending_conflict {
                return Some(Confl::Lits(clause));
            }
            if !progress {
                return None;
            }
        }
    }

    /// Undo the trail down to `level` and broadcast to the plugins.
    pub fn cancel_until(&mut self, level: u32, host: &mut dyn TheoryHost) {
        if self.decision_level() <= level {
            return;
        }
        let bound = self.trail_lim[level as usize];
        for i in (bound..self.trail.len()).rev() {
            let l = self.trail[i];
            let v = l.var();
            self.assigns[v.index()] = LBool::Undef;
            self.reasons[v.index()] = Reason::None;
            self.polarity[v.index()] = !l.sign();
            self.insert_var_order(v);
        }
        self.trail.truncate(bound);
        self.trail_lim.truncate(level as usize);
        self.qhead = self.trail.len().min(self.qhead).min(bound);
        self.theory_qhead = self.theory_qhead.min(bound);
        host.backtrack(level);
    }

    fn reason_lits(&mut self, var: Var, host: &mut dyn TheoryHost) -> Option<Vec<Lit>> {
        match self.reasons[var.index()] {
            Reason::None => None,
            Reason::Clause(cref) => Some(self.clauses.get(cref).lits.to_vec()),
            Reason::Theory(lazy) => Some(host.explain(lazy)),
        }
    }

    /// 1-UIP conflict analysis.
    ///
    /// Returns the learned clause (asserting literal first) and the
    /// backjump level.
    fn analyze(&mut self, conflict: Confl, host: &mut dyn TheoryHost) -> (Vec<Lit>, u32) {
        let mut learnt: Vec<Lit> = Vec::new();
        learnt.push(Lit::pos(Var(0))); // placeholder for the UIP
        let mut path_c: u32 = 0;
        let mut p: Option<Lit> = None;
        let mut index = self.trail.len();

        let mut cur: Vec<Lit> = match conflict {
            Confl::Clause(cref) => {
                if self.clauses.get(cref).learnt {
                    self.cla_bump_activity(cref);
                }
                self.clauses.get(cref).lits.to_vec()
            }
            Confl::Lits(lits) => lits,
        };

        loop {
            let skip = usize::from(p.is_some());
            for &q in cur.iter().skip(skip) {
                let v = q.var();
                if !self.seen[v.index()] && self.levels[v.index()] > 0 {
                    self.var_bump_activity(v);
                    self.seen[v.index()] = true;
                    self.analyze_toclear.push(v);
                    if self.levels[v.index()] >= self.decision_level() {
                        path_c += 1;
                    } else {
                        learnt.push(q);
                    }
                }
            }
            // Next literal to expand.
            while !self.seen[self.trail[index - 1].var().index()] {
                index -= 1;
            }
            index -= 1;
            let l = self.trail[index];
            p = Some(l);
            self.seen[l.var().index()] = false;
            path_c -= 1;
            if path_c == 0 {
                break;
            }
            cur = self
                .reason_lits(l.var(), host)
                .expect("non-decision literal on conflict path has a reason");
            if let Some(cr) = match self.reasons[l.var().index()] {
                Reason::Clause(c) if self.clauses.get(c).learnt => Some(c),
                _ => None,
            } {
                self.cla_bump_activity(cr);
            }
        }
        learnt[0] = !p.expect("conflict at level > 0 has a UIP");

        // Cheap clause minimization: drop a literal whose clause reason
        // is entirely subsumed by the rest of the learnt clause.
        let mut j = 1;
        for i in 1..learnt.len() {
            let l = learnt[i];
            let redundant = match self.reasons[l.var().index()] {
                Reason::Clause(cref) => self
                    .clauses
                    .get(cref)
                    .lits
                    .iter()
                    .skip(1)
                    .all(|&q| self.seen[q.var().index()] || self.levels[q.var().index()] == 0),
                _ => false,
            };
            if !redundant {
                learnt[j] = l;
                j += 1;
            }
        }
        learnt.truncate(j);

        for v in self.analyze_toclear.drain(..) {
            self.seen[v.index()] = false;
        }

        // Backjump to the second-highest level in the clause.
        let bt_level = if learnt.len() == 1 {
            0
        } else {
            let mut max_i = 1;
            for i in 2..learnt.len() {
                if self.levels[learnt[i].var().index()] > self.levels[learnt[max_i].var().index()]
                {
                    max_i = i;
                }
            }
            learnt.swap(1, max_i);
            self.levels[learnt[1].var().index()]
        };
        (learnt, bt_level)
    }

    /// Collect the subset of assumptions implying the failed literal
    /// `p` (which is false under the current assignment).
    fn analyze_final(&mut self, p: Lit, host: &mut dyn TheoryHost) {
        self.conflict.clear();
        self.conflict.push(p);
        if self.decision_level() == 0 {
            return;
        }
        self.seen[p.var().index()] = true;
        let root = self.trail_lim[0];
        for i in (root..self.trail.len()).rev() {
            let v = self.trail[i].var();
            if !self.seen[v.index()] {
                continue;
            }
            match self.reasons[v.index()] {
                Reason::None => {
                    debug_assert!(self.levels[v.index()] > 0);
                    self.conflict.push(!self.trail[i]);
                }
                _ => {
                    let lits = self
                        .reason_lits(v, host)
                        .expect("reason exists for propagated literal");
                    for &q in lits.iter().skip(1) {
                        if self.levels[q.var().index()] > 0 {
                            self.seen[q.var().index()] = true;
                        }
                    }
                }
            }
            self.seen[v.index()] = false;
        }
        self.seen[p.var().index()] = false;
    }

    fn pick_branch_lit(&mut self) -> Option<Lit> {
        let (priority, activity) = (&self.priority, &self.activity);
        loop {
            let v = self
                .order
                .pop(|a, b| order_gt(priority, activity, a, b))?;
            if self.assigns[v.index()].is_undef()
                && self.decision[v.index()]
                && !self.eliminated[v.index()]
            {
                let phase = self.user_pol[v.index()].unwrap_or(self.polarity[v.index()]);
                return Some(Lit::new(v, !phase));
            }
        }
    }

    fn reduce_db(&mut self) {
        let mut learnts: Vec<CRef> = self
            .clauses
            .iter_refs()
            .filter(|&c| self.clauses.get(c).learnt)
            .collect();
        learnts.sort_by(|&a, &b| {
            self.clauses
                .get(a)
                .activity
                .partial_cmp(&self.clauses.get(b).activity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let lim = self.cla_inc / learnts.len().max(1) as f64;
        let half = learnts.len() / 2;
        for (i, &cref) in learnts.iter().enumerate() {
            let c = self.clauses.get(cref);
            if c.len() > 2
                && !self.is_reason(cref)
                && (i < half || f64::from(c.activity) < lim)
            {
                self.clauses.free(cref);
                self.stats.reduced += 1;
            }
        }
    }

    fn is_reason(&self, cref: CRef) -> bool {
        let c = self.clauses.get(cref);
        if c.is_empty() {
            return false;
        }
        let v = c.lits[0].var();
        matches!(self.reasons[v.index()], Reason::Clause(r) if r == cref)
            && !self.assigns[v.index()].is_undef()
    }

    fn budget_exhausted(&self) -> bool {
        self.interrupt.is_set()
            || self.conf_budget == 0
            || self.prop_budget == 0
    }

    /// Search until a restart, an answer, or budget exhaustion.
    fn search(
        &mut self,
        nof_conflicts: u64,
        assumptions: &[Lit],
        host: &mut dyn TheoryHost,
    ) -> Option<SolveResult> {
        let mut conflicts_here: u64 = 0;
        let mut stuck_final_checks: u32 = 0;
        loop {
            let confl = self.propagate_all(host);
            if let Some(confl) = confl {
                self.stats.conflicts += 1;
                conflicts_here += 1;
                if self.conf_budget > 0 {
                    self.conf_budget -= 1;
                }
                // A theory conflict may live entirely below the current
                // decision level; drop down to its highest level before
                // analyzing so the 1-UIP walk is well-founded.
                if let Confl::Lits(ref lits) = confl {
                    let max_level = lits
                        .iter()
                        .map(|l| self.levels[l.var().index()])
                        .max()
                        .unwrap_or(0);
                    if max_level < self.decision_level() {
                        self.cancel_until(max_level, host);
                    }
                    if max_level == 0 {
                        self.ok = false;
                        return Some(SolveResult::Unsat);
                    }
                }
                if self.decision_level() == 0 {
                    self.ok = false;
                    return Some(SolveResult::Unsat);
                }
                let (learnt, bt_level) = self.analyze(confl, host);
                self.cancel_until(bt_level, host);
                debug!(
                    size = learnt.len(),
                    bt = bt_level,
                    conflicts = self.stats.conflicts,
                    "learned clause"
                );
                if learnt.len() == 1 {
                    self.unchecked_enqueue(learnt[0], Reason::None);
                } else {
                    let cref = self.clauses.alloc(Clause::new(
                        SmallVec::from_vec(learnt.clone()),
                        true,
                    ));
                    self.attach_clause(cref);
                    self.cla_bump_activity(cref);
                    self.unchecked_enqueue(learnt[0], Reason::Clause(cref));
                }
                self.var_decay_activity();
                self.cla_decay_activity();
                if self.budget_exhausted() {
                    self.cancel_until(0, host);
                    return Some(SolveResult::Unknown);
                }
                if conflicts_here >= nof_conflicts {
                    // Restart.
                    self.cancel_until(0, host);
                    return None;
                }
                continue;
            }

            if f64::from(self.clauses.num_learnt as u32) >= self.max_learnts {
                self.reduce_db();
                self.max_learnts *= 1.1;
            }

            // Assumptions come first, as forced decisions.
            let mut next = None;
            while (self.decision_level() as usize) < assumptions.len() {
                let p = assumptions[self.decision_level() as usize];
                if self.value(p).is_true() {
                    self.new_decision_level();
                } else if self.value(p).is_false() {
                    self.analyze_final(!p, host);
                    return Some(SolveResult::Unsat);
                } else {
                    next = Some(p);
                    break;
                }
            }

            if next.is_none() && self.options.theory_decisions {
                let mut queue = std::mem::take(&mut self.theory_queue);
                queue.clear();
                let level = self.decision_level();
                let mut view = EngineView {
                    assigns: &self.assigns,
                    level,
                    queue: &mut queue,
                };
                next = host.decide(&mut view);
                self.theory_queue = queue;
                if let Some(l) = next
                    && !self.value(l).is_undef()
                {
                    next = None;
                }
            }

            if next.is_none() {
                next = self.pick_branch_lit();
            }

            match next {
                None => {
                    // Full assignment: ask the theories to sign off.
                    let trail_before = self.trail.len();
                    let ok = {
                        let mut queue = std::mem::take(&mut self.theory_queue);
                        queue.clear();
                        let level = self.decision_level();
                        let mut view = EngineView {
                            assigns: &self.assigns,
                            level,
                            queue: &mut queue,
                        };
                        let ok = host.final_check(&mut view);
                        self.theory_queue = queue;
                        ok
                    };
                    if ok {
                        self.model = self.assigns.clone();
                        self.has_model = true;
                        return Some(SolveResult::Sat);
                    }
                    // The failing plugin must now conflict or enqueue.
                    if self.trail.len() == trail_before {
                        stuck_final_checks += 1;
                        if stuck_final_checks > 1 {
                            warn!("theory failed final check without producing a conflict");
                            self.cancel_until(0, host);
                            return Some(SolveResult::Unknown);
                        }
                    }
                }
                Some(l) => {
                    stuck_final_checks = 0;
                    self.stats.decisions += 1;
                    self.new_decision_level();
                    self.unchecked_enqueue(l, Reason::None);
                }
            }
            if self.budget_exhausted() {
                self.cancel_until(0, host);
                return Some(SolveResult::Unknown);
            }
        }
    }

    /// Solve under assumptions, with theory plugins behind `host`.
    pub fn solve_with(&mut self, host: &mut dyn TheoryHost, assumptions: &[Lit]) -> SolveResult {
        self.conflict.clear();
        self.has_model = false;
        if !self.ok {
            return SolveResult::Unsat;
        }
        for &a in assumptions {
            if self.eliminated[a.var().index()] {
                warn!(lit = %a, "assumption on an eliminated variable");
                self.conflict = vec![!a];
                return SolveResult::Unsat;
            }
        }
        self.max_learnts = (self.clauses.num_problem as f64 / 3.0).max(100.0);
        let mut curr_restarts: u64 = 0;
        let result = loop {
            let budget = u64::from(self.options.restart_first) * luby(2.0, curr_restarts);
            match self.search(budget, assumptions, host) {
                Some(r) => break r,
                None => {
                    curr_restarts += 1;
                    self.stats.restarts += 1;
                }
            }
        };
        if result == SolveResult::Unsat && self.conflict.is_empty() && !self.ok {
            debug!("root-level unsatisfiability");
        }
        self.cancel_until(0, host);
        // Budgets are one-shot.
        self.conf_budget = -1;
        self.prop_budget = -1;
        result
    }

    /// The trail as (literal, level) pairs, for invariant checking.
    #[must_use]
    pub fn trail_snapshot(&self) -> Vec<(Lit, u32)> {
        self.trail
            .iter()
            .map(|&l| (l, self.levels[l.var().index()]))
            .collect()
    }
}

fn order_gt(priority: &[i64], activity: &[f64], a: Var, b: Var) -> bool {
    let (pa, pb) = (priority[a.index()], priority[b.index()]);
    if pa != pb {
        return pa > pb;
    }
    let (aa, ab) = (activity[a.index()], activity[b.index()]);
    if aa != ab {
        return aa > ab;
    }
    a.0 < b.0
}

/// The Luby restart sequence (1, 1, 2, 1, 1, 2, 4, ...), scaled.
fn luby(y: f64, mut x: u64) -> u64 {
    let mut size: u64 = 1;
    let mut seq: u32 = 0;
    while size < x + 1 {
        seq += 1;
        size = 2 * size + 1;
    }
    while size - 1 != x {
        size = (size - 1) / 2;
        seq -= 1;
        x %= size;
    }
    y.powi(seq as i32) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(v: u32) -> Lit {
        Lit::pos(Var(v))
    }

    #[test]
    fn test_trivial_sat() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        let b = s.new_var();
        assert!(s.add_clause(&[Lit::pos(a), Lit::pos(b)]));
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
        assert!(
            s.model_value(Lit::pos(a)).is_true() || s.model_value(Lit::pos(b)).is_true()
        );
    }

    #[test]
    fn test_trivial_unsat() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        assert!(s.add_clause(&[Lit::pos(a)]));
        assert!(!s.add_clause(&[Lit::neg(a)]));
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Unsat);
        assert!(!s.is_ok());
    }

    #[test]
    fn test_unsat_after_not_ok_is_permanent() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        s.add_clause(&[Lit::pos(a)]);
        s.add_clause(&[Lit::neg(a)]);
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Unsat);
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Unsat);
    }

    #[test]
    fn test_pigeonhole_2_into_1() {
        // Two pigeons, one hole.
        let mut s = SatSolver::new(SolverOptions::default());
        let p1 = s.new_var();
        let p2 = s.new_var();
        assert!(s.add_clause(&[Lit::pos(p1)]));
        assert!(s.add_clause(&[Lit::pos(p2)]));
        assert!(!s.add_clause(&[Lit::neg(p1), Lit::neg(p2)]) || {
            s.solve_with(&mut NoTheories, &[]) == SolveResult::Unsat
        });
    }

    #[test]
    fn test_three_sat_instance() {
        // (a ∨ b ∨ c) ∧ (¬a ∨ b) ∧ (¬b ∨ c) ∧ (¬c ∨ a) is satisfiable
        // by a=b=c=true.
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        let b = s.new_var();
        let c = s.new_var();
        s.add_clause(&[Lit::pos(a), Lit::pos(b), Lit::pos(c)]);
        s.add_clause(&[Lit::neg(a), Lit::pos(b)]);
        s.add_clause(&[Lit::neg(b), Lit::pos(c)]);
        s.add_clause(&[Lit::neg(c), Lit::pos(a)]);
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
    }

    #[test]
    fn test_assumption_core() {
        // x ∧ z is unsat (via x→¬z); y is irrelevant.
        let mut s = SatSolver::new(SolverOptions::default());
        let x = s.new_var();
        let y = s.new_var();
        let z = s.new_var();
        s.add_clause(&[Lit::neg(x), Lit::neg(z)]);
        let assumptions = [Lit::pos(x), Lit::pos(y), Lit::pos(z)];
        assert_eq!(
            s.solve_with(&mut NoTheories, &assumptions),
            SolveResult::Unsat
        );
        let core: Vec<Lit> = s.conflict_clause().to_vec();
        // Core is a subset of the negated assumptions, not mentioning y.
        assert!(!core.is_empty());
        for l in &core {
            assert!(assumptions.contains(&!*l));
            assert_ne!(l.var(), y);
        }
        // Re-solving under the core subset stays UNSAT.
        let sub: Vec<Lit> = core.iter().map(|&l| !l).collect();
        assert_eq!(s.solve_with(&mut NoTheories, &sub), SolveResult::Unsat);
        // And the full problem is SAT without assumptions.
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
    }

    #[test]
    fn test_conflict_budget_yields_unknown() {
        let mut s = SatSolver::new(SolverOptions::default());
        // A moderately hard pigeonhole instance: 4 pigeons, 3 holes.
        let n_p = 4;
        let n_h = 3;
        let mut vars = Vec::new();
        for _ in 0..n_p * n_h {
            vars.push(s.new_var());
        }
        let at = |p: usize, h: usize| Lit::pos(vars[p * n_h + h]);
        for p in 0..n_p {
            let clause: Vec<Lit> = (0..n_h).map(|h| at(p, h)).collect();
            s.add_clause(&clause);
        }
        for h in 0..n_h {
            for p1 in 0..n_p {
                for p2 in (p1 + 1)..n_p {
                    s.add_clause(&[!at(p1, h), !at(p2, h)]);
                }
            }
        }
        s.set_conf_budget(1);
        let r = s.solve_with(&mut NoTheories, &[]);
        assert_ne!(r, SolveResult::Sat);
        assert_eq!(s.decision_level(), 0);
        // Without a budget the answer is UNSAT.
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Unsat);
    }

    #[test]
    fn test_interrupt_yields_unknown() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        s.add_clause(&[Lit::pos(a)]);
        s.interrupt.interrupt();
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Unknown);
        s.interrupt.clear();
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
    }

    #[test]
    fn test_priority_overrides_activity() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        let b = s.new_var();
        s.add_clause(&[Lit::pos(a), Lit::pos(b)]);
        s.set_decision_priority(b, 10);
        s.set_decision_polarity(b, true);
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
        assert!(s.model_value(Lit::pos(b)).is_true());
    }

    #[test]
    fn test_trail_reasons_invariant() {
        // Every propagated literal's clause reason has all other
        // literals false at lower-or-equal levels.
        let mut s = SatSolver::new(SolverOptions::default());
        let vs: Vec<Var> = (0..6).map(|_| s.new_var()).collect();
        s.add_clause(&[Lit::neg(vs[0]), Lit::pos(vs[1])]);
        s.add_clause(&[Lit::neg(vs[1]), Lit::pos(vs[2])]);
        s.add_clause(&[Lit::neg(vs[2]), Lit::pos(vs[3]), Lit::pos(vs[4])]);
        s.add_clause(&[Lit::pos(vs[0]), Lit::pos(vs[5])]);
        assert_eq!(s.solve_with(&mut NoTheories, &[]), SolveResult::Sat);
        for (l, level) in s.trail_snapshot() {
            if let Reason::Clause(cref) = s.var_reason(l.var()) {
                let c = s.clauses.get(cref);
                assert_eq!(c.lits[0], l);
                for &q in c.lits.iter().skip(1) {
                    assert!(s.value(q).is_false());
                    assert!(s.var_level(q.var()) <= level);
                }
            }
        }
    }

    #[test]
    fn test_luby_sequence() {
        let seq: Vec<u64> = (0..7).map(|i| luby(2.0, i)).collect();
        assert_eq!(seq, vec![1, 1, 2, 1, 1, 2, 4]);
    }

    #[test]
    fn test_value_undef_before_solve() {
        let mut s = SatSolver::new(SolverOptions::default());
        let a = s.new_var();
        assert!(s.value(lit(a.0)).is_undef());
        assert!(s.model_value(lit(a.0)).is_undef());
    }
}
