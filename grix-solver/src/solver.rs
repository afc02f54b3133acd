//! The grix solver facade.
//!
//! Handle-based public API over the engine, the var map, the
//! preprocessor, and the theory plugins: clients allocate variables and
//! bitvector/graph/fsm handles, post predicate literals, solve under
//! assumptions, and query models and witnesses. Every state-mutating
//! call emits its GNF trace line when an output sink is set.

use grix_core::error::TheoryError;
use grix_core::{
    CoreError, InterruptFlag, LBool, Lit, SolverOptions, Var, VarAlloc,
};
use grix_sat::{SatSolver, Simplifier, SolveResult, VarMap};
use grix_theories::bv::{self, BvCore, BvHandle, BvId, BvOp, CmpOp, CmpRhs};
use grix_theories::graph::{Bound, DetectorKey, GraphTheory};
use grix_theories::{AmoTheory, BvTheory, FlowRouter, FsmTheory, PbOp, PbTheory};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::debug;

use crate::optimize::{self, Objective};
use crate::registry::TheoryRegistry;
use crate::trace::{Trace, dimacs_seq};

/// Handle to a graph owned by a solver.
pub type GraphId = usize;
/// Handle to a flow router.
pub type RouterId = usize;
/// Handle to an FSM-theory string.
pub type StringId = usize;
/// Handle to an automaton.
pub type FsmId = usize;

/// The solver: SAT engine, theory plugins, and trace plumbing behind a
/// single handle-based API.
pub struct Solver {
    pub(crate) engine: SatSolver,
    pub(crate) registry: TheoryRegistry,
    varmap: VarMap,
    simplifier: Simplifier,
    bv: Option<BvHandle>,
    graphs: Vec<Rc<RefCell<GraphTheory>>>,
    fsm: Option<Rc<RefCell<FsmTheory>>>,
    routers: Vec<Rc<RefCell<FlowRouter>>>,
    pb: Option<Rc<RefCell<PbTheory>>>,
    pub(crate) trace: Trace,
    options: SolverOptions,
    args_line: Option<String>,
    true_lit: Option<Lit>,
    pub(crate) objectives: Vec<Objective>,
    last_optimal: bool,
    preprocessed: bool,
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl Solver {
    /// Create a solver with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(SolverOptions::default())
    }

    /// Create a solver with the given options.
    #[must_use]
    pub fn with_options(options: SolverOptions) -> Self {
        Self {
            engine: SatSolver::new(options.clone()),
            registry: TheoryRegistry::new(),
            varmap: VarMap::new(),
            simplifier: Simplifier::default(),
            bv: None,
            graphs: Vec::new(),
            fsm: None,
            routers: Vec::new(),
            pb: None,
            trace: Trace::new(),
            options,
            args_line: None,
            true_lit: None,
            objectives: Vec::new(),
            last_optimal: false,
            preprocessed: false,
        }
    }

    /// Create a solver from `-opt_...=value` argument strings.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self, CoreError> {
        let options = SolverOptions::parse_args(args)?;
        let mut solver = Self::with_options(options);
        solver.args_line = Some(
            args.iter()
                .map(|s| s.as_ref().to_string())
                .collect::<Vec<_>>()
                .join(" "),
        );
        Ok(solver)
    }

    /// The options this solver runs with.
    #[must_use]
    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Install a GNF trace sink; subsequent mutating calls are echoed.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.trace.set_output(out);
        if let Some(args) = &self.args_line {
            let line = format!("c monosat {args}");
            self.trace.line(&line);
        }
    }

    /// Whether the solver is still consistent at the root.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.engine.is_ok()
    }

    /// Number of variables.
    #[must_use]
    pub fn n_vars(&self) -> usize {
        self.engine.n_vars()
    }

    /// Number of problem clauses.
    #[must_use]
    pub fn n_clauses(&self) -> usize {
        self.engine.n_clauses()
    }

    /// A shareable interrupt flag for this solver.
    #[must_use]
    pub fn interrupt_flag(&self) -> InterruptFlag {
        self.engine.interrupt.clone()
    }

    /// Request a cooperative stop of the current or next solve.
    pub fn interrupt(&self) {
        self.engine.interrupt.interrupt();
    }

    // --- variables --------------------------------------------------------

    pub(crate) fn alloc_var(&mut self) -> Var {
        let internal = self.engine.new_var();
        self.varmap.alloc(internal)
    }

    /// Allocate a fresh variable.
    pub fn new_var(&mut self) -> Var {
        self.alloc_var()
    }

    /// Allocate a fresh named variable.
    pub fn new_named_var(&mut self, name: &str) -> Result<Var, CoreError> {
        let v = self.alloc_var();
        self.set_var_name(v, name)?;
        Ok(v)
    }

    /// Name an existing variable.
    pub fn set_var_name(&mut self, var: Var, name: &str) -> Result<(), CoreError> {
        self.varmap.set_name(var, name)?;
        if self.trace.enabled() {
            let line = format!("symbol {} {name}", var.0 + 1);
            self.trace.line(&line);
        }
        Ok(())
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn var_by_name(&self, name: &str) -> Option<Var> {
        self.varmap.var_by_name(name)
    }

    /// The name of a variable, if any.
    #[must_use]
    pub fn var_name(&self, var: Var) -> Option<&str> {
        self.varmap.name_of(var)
    }

    /// Number of named variables.
    #[must_use]
    pub fn named_var_count(&self) -> usize {
        self.varmap.named_count()
    }

    /// The n-th named variable, in naming order.
    #[must_use]
    pub fn named_var_at(&self, n: usize) -> Option<Var> {
        self.varmap.named_at(n)
    }

    /// A literal true in every model (allocated on first use).
    pub fn true_lit(&mut self) -> Lit {
        if let Some(l) = self.true_lit {
            return l;
        }
        let l = Lit::pos(self.alloc_var());
        self.engine.add_clause(&[l]);
        if self.trace.enabled() {
            let line = format!("{} 0", l.dimacs());
            self.trace.line(&line);
        }
        self.true_lit = Some(l);
        l
    }

    /// Mark whether a variable may be picked as a decision.
    pub fn set_decision_var(&mut self, var: Var, decidable: bool) {
        self.engine.set_decision_var(var, decidable);
        if self.trace.enabled() {
            let line = format!("decision {} {}", var.0 + 1, i32::from(decidable));
            self.trace.line(&line);
        }
    }

    /// Whether a variable may be picked as a decision.
    #[must_use]
    pub fn is_decision_var(&self, var: Var) -> bool {
        self.engine.is_decision_var(var)
    }

    /// Set a decision priority (overrides activity ordering).
    pub fn set_decision_priority(&mut self, var: Var, priority: i64) {
        self.engine.set_decision_priority(var, priority);
        if self.trace.enabled() {
            let line = format!("priority {} {priority}", var.0 + 1);
            self.trace.line(&line);
        }
    }

    /// Read a decision priority.
    #[must_use]
    pub fn decision_priority(&self, var: Var) -> i64 {
        self.engine.decision_priority(var)
    }

    /// Force a branching polarity.
    pub fn set_decision_polarity(&mut self, var: Var, value: bool) {
        self.engine.set_decision_polarity(var, value);
    }

    /// Read the forced branching polarity.
    #[must_use]
    pub fn decision_polarity(&self, var: Var) -> Option<bool> {
        self.engine.decision_polarity(var)
    }

    /// Protect a literal's variable from preprocessing.
    pub fn disallow_simplification(&mut self, lit: Lit) {
        self.engine.freeze(lit.var());
    }

    /// Disable root-level preprocessing entirely.
    pub fn disable_preprocessing(&mut self) {
        self.options.preprocessing = false;
    }

    /// Limit conflicts for the next solve (-1 = off).
    pub fn set_conflict_limit(&mut self, limit: i64) {
        self.engine.set_conf_budget(limit);
    }

    /// Limit propagations for the next solve (-1 = off).
    pub fn set_propagation_limit(&mut self, limit: i64) {
        self.engine.set_prop_budget(limit);
    }

    // --- clauses ----------------------------------------------------------

    /// Add a clause; false iff the solver became trivially unsat.
    pub fn add_clause(&mut self, lits: &[Lit]) -> bool {
        if self.trace.enabled() {
            let line = format!("{} 0", dimacs_seq(lits));
            self.trace.line(&line);
        }
        self.engine.add_clause(lits)
    }

    /// Add a unit clause.
    pub fn add_unit(&mut self, l: Lit) -> bool {
        self.add_clause(&[l])
    }

    /// Add a binary clause.
    pub fn add_binary(&mut self, a: Lit, b: Lit) -> bool {
        self.add_clause(&[a, b])
    }

    /// Add a ternary clause.
    pub fn add_ternary(&mut self, a: Lit, b: Lit, c: Lit) -> bool {
        self.add_clause(&[a, b, c])
    }

    // --- solving ----------------------------------------------------------

    /// Solve with no assumptions.
    pub fn solve(&mut self) -> SolveResult {
        self.solve_assumptions(&[])
    }

    /// Solve under assumptions.
    pub fn solve_assumptions(&mut self, assumptions: &[Lit]) -> SolveResult {
        if self.trace.enabled() {
            let line = if assumptions.is_empty() {
                "solve".to_string()
            } else {
                format!("solve {}", dimacs_seq(assumptions))
            };
            self.trace.line(&line);
        }
        for &a in assumptions {
            self.engine.freeze(a.var());
        }
        if self.options.preprocessing && !self.preprocessed {
            self.freeze_theory_vars();
            if !self.simplifier.simplify(&mut self.engine) {
                return SolveResult::Unsat;
            }
            self.preprocessed = true;
        }
        let result = if self.objectives.is_empty() {
            self.engine.solve_with(&mut self.registry, assumptions)
        } else {
            let objectives = self.objectives.clone();
            let (result, optimal) = optimize::solve_lexicographic(self, assumptions, &objectives);
            self.last_optimal = optimal;
            result
        };
        if result == SolveResult::Sat {
            self.simplifier.extend_model(&mut self.engine);
        }
        debug!(?result, "solve finished");
        result
    }

    /// Solve under assumptions with the configured budgets; identical
    /// to [`Self::solve_assumptions`] but named for clients that expect
    /// the limited entry point.
    pub fn solve_limited(&mut self, assumptions: &[Lit]) -> SolveResult {
        self.solve_assumptions(assumptions)
    }

    fn freeze_theory_vars(&mut self) {
        for i in 0..self.engine.n_vars() {
            let v = Var(i as u32);
            if grix_sat::TheoryHost::owns_var(&self.registry, v) {
                self.engine.freeze(v);
            }
        }
    }

    /// Current (search-time) value of a literal.
    #[must_use]
    pub fn value(&self, lit: Lit) -> LBool {
        self.engine.value(lit)
    }

    /// Value of a literal in the last model.
    #[must_use]
    pub fn model_value(&self, lit: Lit) -> LBool {
        self.engine.model_value(lit)
    }

    /// Whether the last solve produced a model.
    #[must_use]
    pub fn has_model(&self) -> bool {
        self.engine.has_model()
    }

    /// Whether a literal is fixed at level 0.
    #[must_use]
    pub fn is_constant(&self, lit: Lit) -> bool {
        self.engine.is_constant(lit.var())
    }

    /// After UNSAT under assumptions: the participating assumption
    /// subset (the unsat core).
    #[must_use]
    pub fn unsat_core(&self) -> Vec<Lit> {
        self.engine.conflict_clause().iter().map(|&l| !l).collect()
    }

    /// Shrink an unsat core by deletion-based re-solving.
    ///
    /// Returns the minimized core; the formula stays UNSAT under it.
    pub fn minimize_unsat_core(&mut self, assumptions: &[Lit]) -> Vec<Lit> {
        if self.trace.enabled() {
            let line = format!("minimize_core {}", dimacs_seq(assumptions));
            self.trace.line(&line);
        }
        if self.solve_assumptions_untraced(assumptions) != SolveResult::Unsat {
            return Vec::new();
        }
        let mut core = self.unsat_core();
        let mut i = 0;
        while i < core.len() {
            let mut candidate = core.clone();
            candidate.remove(i);
            if self.solve_assumptions_untraced(&candidate) == SolveResult::Unsat {
                // Prefer the engine's (possibly smaller) new core.
                let newc = self.unsat_core();
                core = if newc.len() < candidate.len() { newc } else { candidate };
                i = 0;
            } else {
                i += 1;
            }
        }
        // Leave the engine in the UNSAT-under-core state.
        let _ = self.solve_assumptions_untraced(&core);
        core
    }

    fn solve_assumptions_untraced(&mut self, assumptions: &[Lit]) -> SolveResult {
        for &a in assumptions {
            self.engine.freeze(a.var());
        }
        self.engine.solve_with(&mut self.registry, assumptions)
    }

    // --- bitvectors -------------------------------------------------------

    /// Initialize the bitvector theory (implicit on first use).
    pub fn init_bv_theory(&mut self) {
        let _ = self.bv_handle();
    }

    pub(crate) fn bv_handle(&mut self) -> BvHandle {
        if let Some(h) = &self.bv {
            return Rc::clone(h);
        }
        let id = self.registry.next_id();
        let core = Rc::new(RefCell::new(BvCore::new(id)));
        let theory = BvTheory::new(Rc::clone(&core));
        self.registry.register(Rc::new(RefCell::new(theory)));
        self.bv = Some(Rc::clone(&core));
        core
    }

    /// Number of bitvectors.
    #[must_use]
    pub fn n_bvs(&self) -> usize {
        self.bv.as_ref().map_or(0, |h| h.borrow().len())
    }

    /// Create an anonymous bitvector.
    pub fn new_bv_anon(&mut self, width: u32) -> Result<BvId, TheoryError> {
        let h = self.bv_handle();
        let id = h.borrow_mut().new_anon(width)?;
        if self.trace.enabled() {
            let line = format!("bv anon {} {width}", id.0);
            self.trace.line(&line);
        }
        Ok(id)
    }

    /// Create a constant bitvector.
    pub fn new_bv_const(&mut self, width: u32, value: u64) -> Result<BvId, TheoryError> {
        let h = self.bv_handle();
        let id = h.borrow_mut().new_const(width, value)?;
        if self.trace.enabled() {
            let line = format!("bv const {} {width} {value}", id.0);
            self.trace.line(&line);
        }
        Ok(id)
    }

    /// Create a bitvector over explicit bit literals (LSB first).
    pub fn new_bv(&mut self, bits: &[Lit]) -> Result<BvId, TheoryError> {
        let h = self.bv_handle();
        for &b in bits {
            self.engine.freeze(b.var());
        }
        let id = h.borrow_mut().new_bits(bits.to_vec())?;
        if self.trace.enabled() {
            let line = format!("bv {} {} {}", id.0, bits.len(), dimacs_seq(bits));
            self.trace.line(&line);
        }
        Ok(id)
    }

    /// Name a bitvector.
    pub fn set_bv_name(&mut self, bv: BvId, name: &str) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        h.borrow_mut().set_name(bv, name)?;
        if self.trace.enabled() {
            let line = format!("bv symbol {} {name}", bv.0);
            self.trace.line(&line);
        }
        Ok(())
    }

    /// Look up a bitvector by name.
    #[must_use]
    pub fn bv_by_name(&self, name: &str) -> Option<BvId> {
        self.bv.as_ref().and_then(|h| h.borrow().by_name(name))
    }

    /// The name of a bitvector, if any.
    #[must_use]
    pub fn bv_name(&self, bv: BvId) -> Option<String> {
        self.bv
            .as_ref()
            .and_then(|h| h.borrow().name_of(bv).map(String::from))
    }

    /// Number of named bitvectors.
    #[must_use]
    pub fn named_bv_count(&self) -> usize {
        self.bv.as_ref().map_or(0, |h| h.borrow().named_count())
    }

    /// The n-th named bitvector.
    #[must_use]
    pub fn named_bv_at(&self, n: usize) -> Option<BvId> {
        self.bv.as_ref().and_then(|h| h.borrow().named_at(n))
    }

    /// Width of a bitvector.
    pub fn bv_width(&mut self, bv: BvId) -> Result<u32, TheoryError> {
        self.bv_handle().borrow().width(bv)
    }

    /// The i-th bit literal of a bitvector with explicit bits.
    pub fn bv_bit(&mut self, bv: BvId, bit: u32) -> Result<Lit, TheoryError> {
        let h = self.bv_handle();
        let core = h.borrow();
        let bits = core.bits(bv)?;
        bits.get(bit as usize)
            .copied()
            .ok_or(TheoryError::WidthOutOfRange { width: bit })
    }

    /// Model value of a bitvector (under-approximation, or the
    /// over-approximation when `maximum` is set).
    pub fn model_bv(&mut self, bv: BvId, maximum: bool) -> Result<u64, TheoryError> {
        let h = self.bv_handle();
        let core = h.borrow();
        core.check_bv(bv)?;
        Ok(core.model_value(bv, maximum))
    }

    fn cmp_symbol(op: CmpOp) -> &'static str {
        match op {
            CmpOp::Lt => "<",
            CmpOp::Leq => "<=",
            CmpOp::Gt => ">",
            CmpOp::Geq => ">=",
        }
    }

    /// A literal equivalent to `bv ⋈ constant`.
    pub fn bv_cmp_const(&mut self, op: CmpOp, bv: BvId, value: u64) -> Result<Lit, TheoryError> {
        let h = self.bv_handle();
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        h.borrow_mut()
            .add_comparison(op, bv, CmpRhs::Const(value), lit)?;
        if self.trace.enabled() {
            let line = format!(
                "bv const {} {} {} {value}",
                Self::cmp_symbol(op),
                lit.dimacs(),
                bv.0
            );
            self.trace.line(&line);
        }
        // A comparison posted after the bitvector was blasted must be
        // compiled right away; the interval propagator no longer sees
        // this bitvector.
        if h.borrow().is_bitblasted(bv) {
            self.encode_blasted_comparison(op, bv, CmpRhs::Const(value), lit)?;
        }
        Ok(lit)
    }

    /// A literal equivalent to `a ⋈ b` over two bitvectors.
    pub fn bv_cmp(&mut self, op: CmpOp, a: BvId, b: BvId) -> Result<Lit, TheoryError> {
        let h = self.bv_handle();
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        h.borrow_mut().add_comparison(op, a, CmpRhs::Bv(b), lit)?;
        if self.trace.enabled() {
            let line = format!(
                "bv {} {} {} {}",
                Self::cmp_symbol(op),
                lit.dimacs(),
                a.0,
                b.0
            );
            self.trace.line(&line);
        }
        if h.borrow().is_bitblasted(a) || h.borrow().is_bitblasted(b) {
            // Pull both sides into CNF before encoding the comparator.
            self.bv_bitblast_untraced(a)?;
            self.bv_bitblast_untraced(b)?;
            self.encode_blasted_comparison(op, a, CmpRhs::Bv(b), lit)?;
        }
        Ok(lit)
    }

    fn encode_blasted_comparison(
        &mut self,
        op: CmpOp,
        bv: BvId,
        rhs: CmpRhs,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        let core = h.borrow();
        let mut alloc = EngineAlloc {
            engine: &mut self.engine,
            varmap: &mut self.varmap,
        };
        bv::encode_comparison_now(&core, &mut alloc, op, bv, rhs, lit)
    }

    fn bv_bitblast_untraced(&mut self, bv: BvId) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        let mut core = h.borrow_mut();
        let mut alloc = EngineAlloc {
            engine: &mut self.engine,
            varmap: &mut self.varmap,
        };
        bv::bitblast(&mut core, &mut alloc, bv)
    }

    /// A literal equivalent to `bv = constant` (decomposed into
    /// `≥ ∧ ≤`).
    pub fn bv_eq_const(&mut self, bv: BvId, value: u64) -> Result<Lit, TheoryError> {
        let geq = self.bv_cmp_const(CmpOp::Geq, bv, value)?;
        let leq = self.bv_cmp_const(CmpOp::Leq, bv, value)?;
        let eq = Lit::pos(self.alloc_var());
        self.add_binary(!eq, geq);
        self.add_binary(!eq, leq);
        self.add_ternary(!geq, !leq, eq);
        Ok(eq)
    }

    /// A literal equivalent to `bv ≠ constant`.
    pub fn bv_neq_const(&mut self, bv: BvId, value: u64) -> Result<Lit, TheoryError> {
        Ok(!self.bv_eq_const(bv, value)?)
    }

    /// A literal equivalent to `a = b`, with a bit-equality
    /// strengthening clause when both sides carry explicit bits of
    /// equal width.
    pub fn bv_eq(&mut self, a: BvId, b: BvId) -> Result<Lit, TheoryError> {
        let geq = self.bv_cmp(CmpOp::Geq, a, b)?;
        let leq = self.bv_cmp(CmpOp::Leq, a, b)?;
        let eq = Lit::pos(self.alloc_var());
        self.add_binary(!eq, geq);
        self.add_binary(!eq, leq);
        self.add_ternary(!geq, !leq, eq);
        let h = self.bv_handle();
        let (bits_a, bits_b) = {
            let core = h.borrow();
            (core.bits(a)?.to_vec(), core.bits(b)?.to_vec())
        };
        if !bits_a.is_empty() && bits_a.len() == bits_b.len() {
            for (&ba, &bb) in bits_a.iter().zip(&bits_b) {
                self.add_ternary(!eq, !ba, bb);
                self.add_ternary(!eq, ba, !bb);
            }
        }
        Ok(eq)
    }

    /// A literal equivalent to `a ≠ b`.
    pub fn bv_neq(&mut self, a: BvId, b: BvId) -> Result<Lit, TheoryError> {
        Ok(!self.bv_eq(a, b)?)
    }

    fn bv_binop(
        &mut self,
        symbol: &str,
        out: BvId,
        op: BvOp,
    ) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        let (a, b) = match &op {
            BvOp::Add(a, b)
            | BvOp::Sub(a, b)
            | BvOp::Mul(a, b)
            | BvOp::Div(a, b)
            | BvOp::And(a, b)
            | BvOp::Or(a, b)
            | BvOp::Xor(a, b)
            | BvOp::Nand(a, b)
            | BvOp::Nor(a, b)
            | BvOp::Xnor(a, b)
            | BvOp::Concat(a, b) => (a.0, b.0),
            _ => unreachable!("bv_binop is only called with binary operators"),
        };
        h.borrow_mut().define(out, op)?;
        if self.trace.enabled() {
            let line = format!("bv {symbol} {} {a} {b}", out.0);
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = a + b` (modular).
    pub fn bv_add(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("+", out, BvOp::Add(a, b))
    }

    /// `out = a - b` (modular).
    pub fn bv_sub(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("-", out, BvOp::Sub(a, b))
    }

    /// `out = a · b` (modular).
    pub fn bv_mul(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("*", out, BvOp::Mul(a, b))
    }

    /// `out = a / b` (unsigned; division by zero is unconstrained).
    pub fn bv_div(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("/", out, BvOp::Div(a, b))
    }

    /// `out = a ∧ b` bitwise.
    pub fn bv_and(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("and", out, BvOp::And(a, b))
    }

    /// `out = a ∨ b` bitwise.
    pub fn bv_or(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("or", out, BvOp::Or(a, b))
    }

    /// `out = a ⊕ b` bitwise.
    pub fn bv_xor(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("xor", out, BvOp::Xor(a, b))
    }

    /// `out = ¬(a ∧ b)` bitwise.
    pub fn bv_nand(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("nand", out, BvOp::Nand(a, b))
    }

    /// `out = ¬(a ∨ b)` bitwise.
    pub fn bv_nor(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("nor", out, BvOp::Nor(a, b))
    }

    /// `out = ¬(a ⊕ b)` bitwise.
    pub fn bv_xnor(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("xnor", out, BvOp::Xnor(a, b))
    }

    /// `out = ¬a` bitwise (unary).
    pub fn bv_not(&mut self, a: BvId, out: BvId) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        h.borrow_mut().define(out, BvOp::Not(a))?;
        if self.trace.enabled() {
            let line = format!("bv not {} {}", a.0, out.0);
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = a ++ b` (a becomes the high bits).
    pub fn bv_concat(&mut self, out: BvId, a: BvId, b: BvId) -> Result<(), TheoryError> {
        self.bv_binop("concat", out, BvOp::Concat(a, b))
    }

    /// `out = a[lo..=hi]`.
    pub fn bv_slice(&mut self, a: BvId, lo: u32, hi: u32, out: BvId) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        h.borrow_mut().define(out, BvOp::Slice { arg: a, lo, hi })?;
        if self.trace.enabled() {
            let line = format!("bv slice {} {lo} {hi} {}", a.0, out.0);
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = min(args)`.
    pub fn bv_min(&mut self, out: BvId, args: &[BvId]) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        h.borrow_mut()
            .define(out, BvOp::Min(args.iter().copied().collect()))?;
        if self.trace.enabled() {
            let ids: Vec<String> = args.iter().map(|b| b.0.to_string()).collect();
            let line = format!("bv min {} {} {}", out.0, args.len(), ids.join(" "));
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = max(args)`.
    pub fn bv_max(&mut self, out: BvId, args: &[BvId]) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        h.borrow_mut()
            .define(out, BvOp::Max(args.iter().copied().collect()))?;
        if self.trace.enabled() {
            let ids: Vec<String> = args.iter().map(|b| b.0.to_string()).collect();
            let line = format!("bv max {} {} {}", out.0, args.len(), ids.join(" "));
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = popcount(lits)`.
    pub fn bv_popcount(&mut self, out: BvId, lits: &[Lit]) -> Result<(), TheoryError> {
        if lits.iter().any(|arg0: &Lit| Lit::sign(*arg0)) {
            return Err(TheoryError::Unsupported {
                what: "popcount over negative literals",
            });
        }
        let h = self.bv_handle();
        for &l in lits {
            self.engine.freeze(l.var());
        }
        h.borrow_mut().define(out, BvOp::Popcount(lits.to_vec()))?;
        if self.trace.enabled() {
            let line = format!(
                "bv popcount {} {} {}",
                out.0,
                lits.len(),
                dimacs_seq(lits)
            );
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = ` number of leading true literals of a unary counter;
    /// ordering clauses `bit[i+1] → bit[i]` keep the chain monotone.
    /// The counter bits must be positive literals of sequential
    /// variables.
    pub fn bv_unary(&mut self, out: BvId, lits: &[Lit]) -> Result<(), TheoryError> {
        if lits.iter().any(|arg0: &Lit| Lit::sign(*arg0))
            || lits.windows(2).any(|w| w[1].var().0 != w[0].var().0 + 1)
        {
            return Err(TheoryError::Unsupported {
                what: "unary counter bits must be sequential positive variables",
            });
        }
        let h = self.bv_handle();
        for &l in lits {
            self.engine.freeze(l.var());
        }
        for w in lits.windows(2) {
            self.engine.add_clause(&[!w[1], w[0]]);
        }
        h.borrow_mut().define(out, BvOp::Unary(lits.to_vec()))?;
        if self.trace.enabled() {
            let line = format!("bv unary {} {} {}", out.0, lits.len(), dimacs_seq(lits));
            self.trace.line(&line);
        }
        Ok(())
    }

    /// `out = cond ? then_bv : else_bv`.
    pub fn bv_ite(
        &mut self,
        cond: Lit,
        then_bv: BvId,
        else_bv: BvId,
        out: BvId,
    ) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        self.engine.freeze(cond.var());
        h.borrow_mut().define(
            out,
            BvOp::Ite {
                cond,
                then_bv,
                else_bv,
            },
        )?;
        if self.trace.enabled() {
            let line = format!(
                "bv_ite {} {} {} {}",
                cond.dimacs(),
                then_bv.0,
                else_bv.0,
                out.0
            );
            self.trace.line(&line);
        }
        Ok(())
    }

    /// Compile a bitvector's cone to CNF; the interval propagator is
    /// disabled for the blasted bitvectors.
    pub fn bv_bitblast(&mut self, bv: BvId) -> Result<(), TheoryError> {
        if self.trace.enabled() {
            let line = format!("bv bitblast {}", bv.0);
            self.trace.line(&line);
        }
        self.bv_bitblast_untraced(bv)
    }
}

impl Solver {
    // --- graphs -----------------------------------------------------------

    /// Create a graph, returning its handle.
    pub fn new_graph(&mut self) -> GraphId {
        self.new_graph_inner(None, 64)
    }

    /// Create a named graph with an edge-weight bit width.
    pub fn new_graph_named(&mut self, name: &str, weight_bits: u32) -> Result<GraphId, TheoryError> {
        grix_core::validate_name(name)?;
        if self
            .graphs
            .iter()
            .any(|g| g.borrow().graph_name() == Some(name))
        {
            return Err(TheoryError::Core(CoreError::BadName {
                name: name.to_string(),
                reason: "graph name already in use",
            }));
        }
        Ok(self.new_graph_inner(Some(name), weight_bits))
    }

    fn new_graph_inner(&mut self, name: Option<&str>, weight_bits: u32) -> GraphId {
        let bv = self.bv.clone();
        let id = self.registry.next_id();
        let graph_id = self.graphs.len() as u32;
        let mut theory = GraphTheory::new(id, graph_id, weight_bits, self.options.clone(), bv);
        if let Some(n) = name {
            theory
                .set_graph_name(n)
                .expect("name validated by the caller");
        }
        let graph = Rc::new(RefCell::new(theory));
        self.registry.register(Rc::clone(&graph) as Rc<RefCell<dyn grix_core::Theory>>);
        self.graphs.push(graph);
        if self.trace.enabled() {
            let line = match name {
                Some(n) => format!("digraph 0 0 {graph_id} {weight_bits} {n}"),
                None => format!("digraph 0 0 {graph_id} {weight_bits}"),
            };
            self.trace.line(&line);
        }
        graph_id as GraphId
    }

    fn graph(&self, g: GraphId) -> Result<Rc<RefCell<GraphTheory>>, TheoryError> {
        self.graphs
            .get(g)
            .cloned()
            .ok_or(TheoryError::UnknownGraph { graph: g })
    }

    /// Hand the shared bitvector store to a graph created before the
    /// bitvector theory existed.
    fn attach_bv_to(&mut self, graph: &Rc<RefCell<GraphTheory>>) {
        let h = self.bv_handle();
        graph.borrow_mut().attach_bv(h);
    }

    /// Look up a graph by name.
    #[must_use]
    pub fn graph_by_name(&self, name: &str) -> Option<GraphId> {
        self.graphs
            .iter()
            .position(|g| g.borrow().graph_name() == Some(name))
    }

    /// The name of a graph, if any.
    pub fn graph_name(&self, g: GraphId) -> Result<Option<String>, TheoryError> {
        Ok(self.graph(g)?.borrow().graph_name().map(String::from))
    }

    /// Number of graphs.
    #[must_use]
    pub fn n_graphs(&self) -> usize {
        self.graphs.len()
    }

    /// Add a node to a graph.
    pub fn new_node(&mut self, g: GraphId) -> Result<usize, TheoryError> {
        let graph = self.graph(g)?;
        let n = graph.borrow_mut().new_node();
        if self.trace.enabled() {
            let line = format!("node {g} {n}");
            self.trace.line(&line);
        }
        Ok(n)
    }

    /// Add a named node.
    pub fn new_node_named(&mut self, g: GraphId, name: &str) -> Result<usize, TheoryError> {
        let graph = self.graph(g)?;
        let n = graph.borrow_mut().new_node_named(name)?;
        if self.trace.enabled() {
            let line = format!("node {g} {n} {name}");
            self.trace.line(&line);
        }
        Ok(n)
    }

    /// Look up a node by name.
    pub fn node_by_name(&self, g: GraphId, name: &str) -> Result<Option<usize>, TheoryError> {
        Ok(self.graph(g)?.borrow().node_by_name(name))
    }

    /// Number of nodes in a graph.
    pub fn n_nodes(&self, g: GraphId) -> Result<usize, TheoryError> {
        Ok(self.graph(g)?.borrow().n_nodes())
    }

    /// Number of edges in a graph.
    pub fn n_edges(&self, g: GraphId) -> Result<usize, TheoryError> {
        Ok(self.graph(g)?.borrow().n_edges())
    }

    /// Add a constant-weight edge; returns its fresh enabling literal.
    pub fn new_edge(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        weight: i64,
    ) -> Result<Lit, TheoryError> {
        let graph = self.graph(g)?;
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        graph.borrow_mut().new_edge(from, to, weight, lit)?;
        if self.trace.enabled() {
            let line = format!("edge {g} {from} {to} {} {weight}", lit.dimacs());
            self.trace.line(&line);
        }
        Ok(lit)
    }

    /// Add an edge whose weight is a bitvector; returns its enabling
    /// literal. In assign-edges-to-weight mode, enabling the edge pins
    /// its weight to the configured constant.
    pub fn new_edge_bv(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        bv: BvId,
    ) -> Result<Lit, TheoryError> {
        let graph = self.graph(g)?;
        self.attach_bv_to(&graph);
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        graph.borrow_mut().new_edge_bv(from, to, bv, lit)?;
        if self.trace.enabled() {
            let line = format!("edge_bv {g} {from} {to} {} {}", lit.dimacs(), bv.0);
            self.trace.line(&line);
        }
        if let Some(w) = graph.borrow().assign_edges_to_weight() {
            let leq = self.bv_cmp_const(CmpOp::Leq, bv, w as u64)?;
            let geq = self.bv_cmp_const(CmpOp::Geq, bv, w as u64)?;
            self.add_binary(!lit, leq);
            self.add_binary(!lit, geq);
        }
        Ok(lit)
    }

    /// Pin the weight of subsequently created enabled bitvector edges.
    pub fn set_assign_edges_to_weight(&mut self, g: GraphId, weight: i64) -> Result<(), TheoryError> {
        let graph = self.graph(g)?;
        graph.borrow_mut().set_assign_edges_to_weight(weight);
        if self.trace.enabled() {
            let line = format!("graph_assign_edges_to_weight {g} {weight}");
            self.trace.line(&line);
        }
        Ok(())
    }

    /// Group edges into a set; with `enforce`, exactly one member must
    /// be enabled (a covering clause plus an at-most-one plugin).
    pub fn new_edge_set(
        &mut self,
        g: GraphId,
        edges: &[Lit],
        enforce: bool,
    ) -> Result<(), TheoryError> {
        let graph = self.graph(g)?;
        for &e in edges {
            if graph.borrow().edge_of_var(e.var()).is_none() {
                return Err(TheoryError::NotOwned {
                    var: e.var().0,
                    theory: g as u32,
                });
            }
        }
        if self.trace.enabled() {
            let line = format!("edge_set {g} {} {}", edges.len(), dimacs_seq(edges));
            self.trace.line(&line);
        }
        if enforce {
            self.engine.add_clause(edges);
            let id = self.registry.next_id();
            let mut amo = AmoTheory::new(id);
            for &e in edges {
                amo.add_var(e.var());
            }
            self.registry.register(Rc::new(RefCell::new(amo)));
        }
        Ok(())
    }

    fn post_graph_predicate(
        &mut self,
        g: GraphId,
        key: DetectorKey,
        trace_line: impl FnOnce(Lit) -> String,
    ) -> Result<Lit, TheoryError> {
        let graph = self.graph(g)?;
        if matches!(
            key,
            DetectorKey::Dist { bound: Bound::Bv(_), .. }
                | DetectorKey::Flow { bound: Bound::Bv(_), .. }
        ) {
            self.attach_bv_to(&graph);
        }
        if let Some(l) = graph.borrow().find_predicate(&key) {
            return Ok(l);
        }
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        graph.borrow_mut().post_predicate(key, lit)?;
        if self.trace.enabled() {
            let line = trace_line(lit);
            self.trace.line(&line);
        }
        Ok(lit)
    }

    /// Predicate literal: `to` is reachable from `from`.
    pub fn reach(&mut self, g: GraphId, from: usize, to: usize) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Reach {
                from,
                to,
                steps: -1,
            },
            |l| format!("reach {g} {from} {to} {}", l.dimacs()),
        )
    }

    /// Predicate literal: reachable within at most `steps` hops.
    pub fn distance_leq(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        steps: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Reach { from, to, steps },
            |l| format!("distance_leq {g} {from} {to} {} {steps}", l.dimacs()),
        )
    }

    /// Predicate literal: reachable in fewer than `steps` hops.
    pub fn distance_lt(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        steps: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Reach {
                from,
                to,
                steps: steps - 1,
            },
            |l| format!("distance_lt {g} {from} {to} {} {steps}", l.dimacs()),
        )
    }

    /// Predicate literal: weighted distance ≤ `dist`.
    pub fn weighted_distance_leq(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        dist: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Dist {
                from,
                to,
                bound: Bound::Const(dist),
                inclusive: true,
            },
            |l| format!("weighted_distance_leq {g} {from} {to} {} {dist}", l.dimacs()),
        )
    }

    /// Predicate literal: weighted distance < `dist`.
    pub fn weighted_distance_lt(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        dist: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Dist {
                from,
                to,
                bound: Bound::Const(dist),
                inclusive: false,
            },
            |l| format!("weighted_distance_lt {g} {from} {to} {} {dist}", l.dimacs()),
        )
    }

    /// Predicate literal: weighted distance ≤ a bitvector bound.
    pub fn weighted_distance_bv_leq(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        bv: BvId,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Dist {
                from,
                to,
                bound: Bound::Bv(bv),
                inclusive: true,
            },
            |l| format!("weighted_distance_bv_leq {g} {from} {to} {} {}", l.dimacs(), bv.0),
        )
    }

    /// Predicate literal: weighted distance < a bitvector bound.
    pub fn weighted_distance_bv_lt(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        bv: BvId,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Dist {
                from,
                to,
                bound: Bound::Bv(bv),
                inclusive: false,
            },
            |l| format!("weighted_distance_bv_lt {g} {from} {to} {} {}", l.dimacs(), bv.0),
        )
    }

    /// Predicate literal: `maxflow(source, sink) ≥ k`.
    pub fn maxflow_geq(
        &mut self,
        g: GraphId,
        source: usize,
        sink: usize,
        k: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Flow {
                source,
                sink,
                bound: Bound::Const(k),
                inclusive: true,
            },
            |l| format!("maximum_flow_geq {g} {source} {sink} {} {k}", l.dimacs()),
        )
    }

    /// Predicate literal: `maxflow(source, sink) > k`.
    pub fn maxflow_gt(
        &mut self,
        g: GraphId,
        source: usize,
        sink: usize,
        k: i64,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Flow {
                source,
                sink,
                bound: Bound::Const(k),
                inclusive: false,
            },
            |l| format!("maximum_flow_gt {g} {source} {sink} {} {k}", l.dimacs()),
        )
    }

    /// Predicate literal: `maxflow(source, sink) ≥ bv`.
    pub fn maxflow_bv_geq(
        &mut self,
        g: GraphId,
        source: usize,
        sink: usize,
        bv: BvId,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Flow {
                source,
                sink,
                bound: Bound::Bv(bv),
                inclusive: true,
            },
            |l| format!("maximum_flow_bv_geq {g} {source} {sink} {} {}", l.dimacs(), bv.0),
        )
    }

    /// Predicate literal: `maxflow(source, sink) > bv`.
    pub fn maxflow_bv_gt(
        &mut self,
        g: GraphId,
        source: usize,
        sink: usize,
        bv: BvId,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Flow {
                source,
                sink,
                bound: Bound::Bv(bv),
                inclusive: false,
            },
            |l| format!("maximum_flow_bv_gt {g} {source} {sink} {} {}", l.dimacs(), bv.0),
        )
    }

    /// Predicate literal: MST weight ≤ k (infinite if disconnected).
    pub fn mst_weight_leq(&mut self, g: GraphId, k: i64) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Mst {
                bound: k,
                inclusive: true,
            },
            |l| format!("mst_weight_leq {g} {} {k}", l.dimacs()),
        )
    }

    /// Predicate literal: MST weight < k.
    pub fn mst_weight_lt(&mut self, g: GraphId, k: i64) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Mst {
                bound: k,
                inclusive: false,
            },
            |l| format!("mst_weight_lt {g} {} {k}", l.dimacs()),
        )
    }

    /// Predicate literal: the graph has no directed cycle.
    pub fn acyclic_directed(&mut self, g: GraphId) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Acyclic { directed: true },
            |l| format!("acyclic {g} {}", l.dimacs()),
        )
    }

    /// Predicate literal: the graph is a forest (no undirected cycle).
    pub fn acyclic_undirected(&mut self, g: GraphId) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::Acyclic { directed: false },
            |l| format!("forest {g} {}", l.dimacs()),
        )
    }

    /// Predicate literal: `node` lies on some path `from ⇝ to`.
    pub fn on_path(
        &mut self,
        g: GraphId,
        node: usize,
        from: usize,
        to: usize,
    ) -> Result<Lit, TheoryError> {
        self.post_graph_predicate(
            g,
            DetectorKey::OnPath { node, from, to },
            |l| format!("on_path {g} {node} {from} {to} {}", l.dimacs()),
        )
    }

    // --- graph model queries ----------------------------------------------

    /// Witness path nodes for a satisfied reach/distance literal.
    pub fn model_path_nodes(&self, g: GraphId, lit: Lit) -> Result<Option<Vec<usize>>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph
            .borrow()
            .model_path(lit.var(), &model)
            .map(|(nodes, _)| nodes))
    }

    /// Witness path edge literals for a satisfied reach/distance
    /// literal.
    pub fn model_path_edge_lits(
        &self,
        g: GraphId,
        lit: Lit,
    ) -> Result<Option<Vec<Lit>>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph
            .borrow()
            .model_path(lit.var(), &model)
            .map(|(_, lits)| lits))
    }

    /// Max-flow value achieved by the model for a flow literal.
    pub fn model_maxflow(&self, g: GraphId, lit: Lit) -> Result<Option<i64>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph.borrow().model_maxflow(lit.var(), &model))
    }

    /// Flow assigned to one edge in the model's max-flow labeling.
    pub fn model_edge_flow(
        &self,
        g: GraphId,
        flow_lit: Lit,
        edge_lit: Lit,
    ) -> Result<Option<i64>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph
            .borrow()
            .model_edge_flow(flow_lit.var(), edge_lit.var(), &model))
    }

    /// Flow through one edge after cancelling flow cycles.
    pub fn model_acyclic_edge_flow(
        &self,
        g: GraphId,
        flow_lit: Lit,
        edge_lit: Lit,
    ) -> Result<Option<i64>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph
            .borrow()
            .model_acyclic_edge_flow(flow_lit.var(), edge_lit.var(), &model))
    }

    /// Spanning-tree weight of the model for an MST literal.
    pub fn model_mst_weight(&self, g: GraphId, lit: Lit) -> Result<Option<i64>, TheoryError> {
        let graph = self.graph(g)?;
        let model = |l: Lit| self.engine.model_value(l);
        Ok(graph.borrow().model_mst_weight(lit.var(), &model))
    }

    // --- at-most-one and pseudo-Boolean -----------------------------------

    /// Assert that at most one of `vars` is true.
    pub fn at_most_one(&mut self, vars: &[Var]) {
        if vars.len() <= 1 {
            return;
        }
        if self.trace.enabled() {
            let lits: Vec<Lit> = vars.iter().map(|&v| Lit::pos(v)).collect();
            let line = format!("amo {} 0", dimacs_seq(&lits));
            self.trace.line(&line);
        }
        let id = self.registry.next_id();
        let mut amo = AmoTheory::new(id);
        for &v in vars {
            self.engine.freeze(v);
            amo.add_var(v);
        }
        self.registry.register(Rc::new(RefCell::new(amo)));
    }

    /// Assert `Σ coefficients·lits ⋈ rhs`.
    pub fn assert_pb(
        &mut self,
        lits: &[Lit],
        coefficients: &[i64],
        rhs: i64,
        op: PbOp,
    ) -> Result<(), TheoryError> {
        if lits.is_empty() {
            return Ok(());
        }
        if self.trace.enabled() {
            let sym = match op {
                PbOp::Lt => "<",
                PbOp::Leq => "<=",
                PbOp::Eq => "==",
                PbOp::Geq => ">=",
                PbOp::Gt => ">",
            };
            let coefs: Vec<String> = coefficients.iter().map(ToString::to_string).collect();
            let line = format!(
                "pb {sym} {rhs} {} {} {} {}",
                lits.len(),
                dimacs_seq(lits),
                coefficients.len(),
                coefs.join(" ")
            );
            self.trace.line(&line);
        }
        let pb = match &self.pb {
            Some(p) => Rc::clone(p),
            None => {
                let id = self.registry.next_id();
                let p = Rc::new(RefCell::new(PbTheory::new(id)));
                self.registry
                    .register(Rc::clone(&p) as Rc<RefCell<dyn grix_core::Theory>>);
                self.pb = Some(Rc::clone(&p));
                p
            }
        };
        for &l in lits {
            self.engine.freeze(l.var());
        }
        pb.borrow_mut().add_constraint(lits, coefficients, rhs, op)
    }

    // --- finite state machines --------------------------------------------

    fn fsm_theory(&mut self) -> Rc<RefCell<FsmTheory>> {
        if let Some(f) = &self.fsm {
            return Rc::clone(f);
        }
        let id = self.registry.next_id();
        let f = Rc::new(RefCell::new(FsmTheory::new(id)));
        self.registry
            .register(Rc::clone(&f) as Rc<RefCell<dyn grix_core::Theory>>);
        self.fsm = Some(Rc::clone(&f));
        f
    }

    /// Initialize the FSM theory (implicit on first use).
    pub fn init_fsm_theory(&mut self) {
        let _ = self.fsm_theory();
    }

    /// Create an automaton.
    pub fn new_fsm(&mut self) -> FsmId {
        let f = self.fsm_theory();
        let id = f.borrow_mut().new_fsm();
        if self.trace.enabled() {
            let line = format!("fsm {id} 0 0");
            self.trace.line(&line);
        }
        id
    }

    /// Add a state to an automaton.
    pub fn new_fsm_state(&mut self, fsm: FsmId) -> Result<usize, TheoryError> {
        self.fsm_theory().borrow_mut().new_state(fsm)
    }

    /// Number of states in an automaton.
    pub fn n_fsm_states(&mut self, fsm: FsmId) -> Result<usize, TheoryError> {
        self.fsm_theory().borrow().n_states(fsm)
    }

    /// Add a transition; returns its fresh enabling literal. Label 0 is
    /// epsilon.
    pub fn new_transition(
        &mut self,
        fsm: FsmId,
        from: usize,
        to: usize,
        input: u32,
        output: u32,
    ) -> Result<Lit, TheoryError> {
        let f = self.fsm_theory();
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        f.borrow_mut()
            .new_transition(fsm, from, to, input, output, lit)?;
        if self.trace.enabled() {
            let line = format!("transition {fsm} {from} {to} {input} {output} {}", lit.dimacs());
            self.trace.line(&line);
        }
        Ok(lit)
    }

    /// Register a string of positive labels.
    pub fn new_string(&mut self, labels: &[u32]) -> Result<StringId, TheoryError> {
        let f = self.fsm_theory();
        let id = f.borrow_mut().new_string(labels.to_vec())?;
        if self.trace.enabled() {
            let labels_str: Vec<String> = labels.iter().map(ToString::to_string).collect();
            let line = if labels.is_empty() {
                format!("str {id}")
            } else {
                format!("str {id} {}", labels_str.join(" "))
            };
            self.trace.line(&line);
        }
        Ok(id)
    }

    /// Predicate literal: the automaton accepts `string` from `start`
    /// at `accept`.
    pub fn fsm_accepts(
        &mut self,
        fsm: FsmId,
        start: usize,
        accept: usize,
        string: StringId,
    ) -> Result<Lit, TheoryError> {
        let f = self.fsm_theory();
        let v = self.alloc_var();
        self.engine.freeze(v);
        let lit = Lit::pos(v);
        f.borrow_mut().add_accept(fsm, start, accept, string, lit)?;
        if self.trace.enabled() {
            let line = format!("accepts {fsm} {start} {accept} {string} {}", lit.dimacs());
            self.trace.line(&line);
        }
        Ok(lit)
    }

    // --- flow routing -----------------------------------------------------

    /// Create a flow router steering decisions for a max-flow
    /// predicate.
    pub fn new_flow_router(
        &mut self,
        g: GraphId,
        source: usize,
        dest: usize,
        maxflow_lit: Lit,
    ) -> Result<RouterId, TheoryError> {
        self.graph(g)?;
        let id = self.registry.next_id();
        let router_id = self.routers.len();
        let router = Rc::new(RefCell::new(FlowRouter::new(
            id,
            router_id as u32,
            source,
            dest,
            maxflow_lit,
        )));
        self.registry
            .register(Rc::clone(&router) as Rc<RefCell<dyn grix_core::Theory>>);
        self.routers.push(router);
        if self.trace.enabled() {
            let line = format!("f_router {g} {router_id} {source} {dest} {}", maxflow_lit.dimacs());
            self.trace.line(&line);
        }
        Ok(router_id)
    }

    /// Add a routing net of `(edge, reach)` literal pairs.
    pub fn add_routing_net(
        &mut self,
        g: GraphId,
        router: RouterId,
        disabled: Lit,
        members: &[(Lit, Lit)],
    ) -> Result<(), TheoryError> {
        self.graph(g)?;
        let r = self
            .routers
            .get(router)
            .cloned()
            .ok_or(TheoryError::UnknownRouter { router })?;
        r.borrow_mut().add_net(disabled, members.to_vec());
        if self.trace.enabled() {
            let pairs: Vec<String> = members
                .iter()
                .map(|(e, re)| format!("{} {}", e.dimacs(), re.dimacs()))
                .collect();
            let line = format!(
                "f_router_net {g} {router} {} {} {}",
                disabled.dimacs(),
                members.len(),
                pairs.join(" ")
            );
            self.trace.line(&line);
        }
        Ok(())
    }

    // --- optimization objectives ------------------------------------------

    /// Minimize a bitvector (lexicographically after earlier
    /// objectives).
    pub fn minimize_bv(&mut self, bv: BvId) -> Result<(), TheoryError> {
        self.bv_handle().borrow().check_bv(bv)?;
        if self.trace.enabled() {
            let line = format!("minimize bv {}", bv.0);
            self.trace.line(&line);
        }
        self.objectives.push(Objective::MinimizeBv(bv));
        Ok(())
    }

    /// Maximize a bitvector.
    pub fn maximize_bv(&mut self, bv: BvId) -> Result<(), TheoryError> {
        self.bv_handle().borrow().check_bv(bv)?;
        if self.trace.enabled() {
            let line = format!("maximize bv {}", bv.0);
            self.trace.line(&line);
        }
        self.objectives.push(Objective::MaximizeBv(bv));
        Ok(())
    }

    /// Minimize the number of true literals in a set.
    pub fn minimize_lits(&mut self, lits: &[Lit]) -> Result<(), TheoryError> {
        if self.trace.enabled() {
            let line = format!("minimize lits {} {}", lits.len(), dimacs_seq(lits));
            self.trace.line(&line);
        }
        let bv = self.count_bv(lits, None)?;
        self.objectives.push(Objective::MinimizeBv(bv));
        Ok(())
    }

    /// Maximize the number of true literals in a set.
    pub fn maximize_lits(&mut self, lits: &[Lit]) -> Result<(), TheoryError> {
        if self.trace.enabled() {
            let line = format!("maximize lits {} {}", lits.len(), dimacs_seq(lits));
            self.trace.line(&line);
        }
        let bv = self.count_bv(lits, None)?;
        self.objectives.push(Objective::MaximizeBv(bv));
        Ok(())
    }

    /// Minimize a weighted sum of literals.
    pub fn minimize_weighted_lits(
        &mut self,
        lits: &[Lit],
        weights: &[i64],
    ) -> Result<(), TheoryError> {
        if self.trace.enabled() {
            let ws: Vec<String> = weights.iter().map(ToString::to_string).collect();
            let line = format!(
                "minimize lits {} {} {} 0",
                lits.len(),
                dimacs_seq(lits),
                ws.join(" ")
            );
            self.trace.line(&line);
        }
        let bv = self.count_bv(lits, Some(weights))?;
        self.objectives.push(Objective::MinimizeBv(bv));
        Ok(())
    }

    /// Maximize a weighted sum of literals.
    pub fn maximize_weighted_lits(
        &mut self,
        lits: &[Lit],
        weights: &[i64],
    ) -> Result<(), TheoryError> {
        if self.trace.enabled() {
            let ws: Vec<String> = weights.iter().map(ToString::to_string).collect();
            let line = format!(
                "maximize lits {} {} {} 0",
                lits.len(),
                dimacs_seq(lits),
                ws.join(" ")
            );
            self.trace.line(&line);
        }
        let bv = self.count_bv(lits, Some(weights))?;
        self.objectives.push(Objective::MaximizeBv(bv));
        Ok(())
    }

    /// Build a bitvector counting (or weighting) the true literals.
    fn count_bv(&mut self, lits: &[Lit], weights: Option<&[i64]>) -> Result<BvId, TheoryError> {
        let total: i64 = match weights {
            Some(ws) => {
                let mut t: i64 = 0;
                for &w in ws {
                    if w < 0 {
                        return Err(TheoryError::PbOverflow);
                    }
                    t = t.checked_add(w).ok_or(TheoryError::PbOverflow)?;
                }
                t
            }
            None => lits.len() as i64,
        };
        let width = (64 - (total.max(1) as u64).leading_zeros()).max(1);
        match weights {
            None => {
                // Unweighted: one popcount node. Popcount inputs must
                // be positive, so negated literals go through an alias.
                let mut plits = Vec::with_capacity(lits.len());
                for &l in lits {
                    if l.sign() {
                        let alias = Lit::pos(self.alloc_var());
                        self.engine.add_clause(&[!alias, l]);
                        self.engine.add_clause(&[alias, !l]);
                        plits.push(alias);
                    } else {
                        plits.push(l);
                    }
                }
                let out = self.new_bv_anon(width)?;
                self.bv_popcount(out, &plits)?;
                Ok(out)
            }
            Some(ws) => {
                // Σ ite(l, w, 0), built by chained additions.
                let zero = self.new_bv_const(width, 0)?;
                let mut acc = zero;
                for (&l, &w) in lits.iter().zip(ws) {
                    let wc = self.new_bv_const(width, w as u64)?;
                    let term = self.new_bv_anon(width)?;
                    self.bv_ite(l, wc, zero, term)?;
                    let next = self.new_bv_anon(width)?;
                    self.bv_add(next, acc, term)?;
                    acc = next;
                }
                Ok(acc)
            }
        }
    }

    // --- replay support ---------------------------------------------------
    //
    // GNF replay must bind the exact literals recorded in the file, so
    // these variants take the literal instead of allocating one. They
    // do not write trace lines; the replayer is not a recorder.

    pub(crate) fn ensure_var(&mut self, var: Var) {
        while self.engine.n_vars() <= var.index() {
            self.alloc_var();
        }
    }

    pub(crate) fn edge_with_lit(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        weight: i64,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let graph = self.graph(g)?;
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        graph.borrow_mut().new_edge(from, to, weight, lit)?;
        Ok(())
    }

    pub(crate) fn edge_bv_with_lit(
        &mut self,
        g: GraphId,
        from: usize,
        to: usize,
        bv: BvId,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let graph = self.graph(g)?;
        self.attach_bv_to(&graph);
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        graph.borrow_mut().new_edge_bv(from, to, bv, lit)?;
        if let Some(w) = graph.borrow().assign_edges_to_weight() {
            let leq = self.bv_cmp_const(CmpOp::Leq, bv, w as u64)?;
            let geq = self.bv_cmp_const(CmpOp::Geq, bv, w as u64)?;
            self.engine.add_clause(&[!lit, leq]);
            self.engine.add_clause(&[!lit, geq]);
        }
        Ok(())
    }

    pub(crate) fn predicate_with_lit(
        &mut self,
        g: GraphId,
        key: DetectorKey,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let graph = self.graph(g)?;
        if matches!(
            key,
            DetectorKey::Dist { bound: Bound::Bv(_), .. }
                | DetectorKey::Flow { bound: Bound::Bv(_), .. }
        ) {
            self.attach_bv_to(&graph);
        }
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        if graph.borrow().find_predicate(&key).is_some() {
            return Ok(());
        }
        graph.borrow_mut().post_predicate(key, lit)
    }

    pub(crate) fn bv_cmp_const_with_lit(
        &mut self,
        op: CmpOp,
        bv: BvId,
        value: u64,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        h.borrow_mut()
            .add_comparison(op, bv, CmpRhs::Const(value), lit)?;
        if h.borrow().is_bitblasted(bv) {
            self.encode_blasted_comparison(op, bv, CmpRhs::Const(value), lit)?;
        }
        Ok(())
    }

    pub(crate) fn bv_cmp_with_lit(
        &mut self,
        op: CmpOp,
        a: BvId,
        b: BvId,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let h = self.bv_handle();
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        h.borrow_mut().add_comparison(op, a, CmpRhs::Bv(b), lit)?;
        if h.borrow().is_bitblasted(a) || h.borrow().is_bitblasted(b) {
            self.bv_bitblast_untraced(a)?;
            self.bv_bitblast_untraced(b)?;
            self.encode_blasted_comparison(op, a, CmpRhs::Bv(b), lit)?;
        }
        Ok(())
    }

    pub(crate) fn transition_with_lit(
        &mut self,
        fsm: FsmId,
        from: usize,
        to: usize,
        input: u32,
        output: u32,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let f = self.fsm_theory();
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        f.borrow_mut()
            .new_transition(fsm, from, to, input, output, lit)?;
        Ok(())
    }

    pub(crate) fn accept_with_lit(
        &mut self,
        fsm: FsmId,
        start: usize,
        accept: usize,
        string: StringId,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let f = self.fsm_theory();
        self.ensure_var(lit.var());
        self.engine.freeze(lit.var());
        f.borrow_mut().add_accept(fsm, start, accept, string, lit)
    }

    /// Drop all optimization objectives.
    pub fn clear_optimization_objectives(&mut self) {
        if self.trace.enabled() {
            self.trace.line("clear_opt");
        }
        self.objectives.clear();
    }

    /// Whether the last SAT answer was proven optimal for every
    /// objective.
    #[must_use]
    pub fn last_solution_was_optimal(&self) -> bool {
        self.objectives.is_empty() || self.last_optimal
    }
}

/// Fresh-variable allocation for plugins compiling to CNF.
pub(crate) struct EngineAlloc<'a> {
    pub engine: &'a mut SatSolver,
    pub varmap: &'a mut VarMap,
}

impl VarAlloc for EngineAlloc<'_> {
    fn new_var(&mut self) -> Var {
        let internal = self.engine.new_var();
        self.varmap.alloc(internal)
    }

    fn add_clause(&mut self, lits: &[Lit]) -> bool {
        self.engine.add_clause(lits)
    }
}
