//! Word-level bitvector reasoning: intervals, comparisons, and the
//! operator DAG.
//!
//! Every bitvector carries an interval `[lo, hi] ⊆ [0, 2^w)`. Assigning
//! a comparison or bit literal tightens the interval of the bitvector it
//! constrains; tightenings flow forward through operator nodes on a
//! work queue until a fixed point. An empty interval is a theory
//! conflict; the supporting literals of every tightening are logged so
//! conflicts and implications can be explained.

use grix_core::{LBool, LazyReason, Lit, TheoryConflict, TheoryId, TheoryView, Var};
use grix_core::error::TheoryError;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::trace;

/// Identifier of a bitvector within the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BvId(pub u32);

impl BvId {
    /// Dense index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A closed interval of bitvector values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Smallest possible value.
    pub lo: u64,
    /// Largest possible value.
    pub hi: u64,
}

impl Interval {
    /// The full range of a `width`-bit vector.
    #[must_use]
    pub fn full(width: u32) -> Self {
        Self {
            lo: 0,
            hi: mask(width),
        }
    }

    /// A single value.
    #[must_use]
    pub const fn point(value: u64) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    /// Whether the interval contains no values.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.lo > self.hi
    }

    /// Whether the interval is a single value.
    #[must_use]
    pub const fn is_point(self) -> bool {
        self.lo == self.hi
    }

    /// Intersection.
    #[must_use]
    pub fn meet(self, other: Self) -> Self {
        Self {
            lo: self.lo.max(other.lo),
            hi: self.hi.min(other.hi),
        }
    }
}

/// All-ones mask for a width (width 64 included).
#[must_use]
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Comparison operator of a comparison literal.
///
/// Equality and disequality are decomposed into `≥ ∧ ≤` at the API
/// layer, so only the four order relations reach the plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Strictly less than.
    Lt,
    /// Less than or equal.
    Leq,
    /// Strictly greater than.
    Gt,
    /// Greater than or equal.
    Geq,
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpRhs {
    /// A constant.
    Const(u64),
    /// Another bitvector.
    Bv(BvId),
}

#[derive(Debug, Clone)]
struct Comparison {
    op: CmpOp,
    bv: BvId,
    rhs: CmpRhs,
    lit: Lit,
}

/// An operator node of the bitvector DAG.
#[derive(Debug, Clone)]
pub enum BvOp {
    /// Modular addition.
    Add(BvId, BvId),
    /// Modular subtraction.
    Sub(BvId, BvId),
    /// Modular multiplication.
    Mul(BvId, BvId),
    /// Unsigned division (x/0 is unconstrained).
    Div(BvId, BvId),
    /// Bitwise and.
    And(BvId, BvId),
    /// Bitwise or.
    Or(BvId, BvId),
    /// Bitwise xor.
    Xor(BvId, BvId),
    /// Bitwise nand.
    Nand(BvId, BvId),
    /// Bitwise nor.
    Nor(BvId, BvId),
    /// Bitwise xnor.
    Xnor(BvId, BvId),
    /// Bitwise complement.
    Not(BvId),
    /// Concatenation (first argument becomes the high bits).
    Concat(BvId, BvId),
    /// Bit slice `[lo..=hi]` of the argument.
    Slice {
        /// Sliced bitvector.
        arg: BvId,
        /// Lowest bit index.
        lo: u32,
        /// Highest bit index.
        hi: u32,
    },
    /// Minimum of the arguments.
    Min(SmallVec<[BvId; 4]>),
    /// Maximum of the arguments.
    Max(SmallVec<[BvId; 4]>),
    /// Number of true literals.
    Popcount(Vec<Lit>),
    /// Unary counter (a popcount whose bits are kept in order by
    /// clauses added at construction).
    Unary(Vec<Lit>),
    /// If-then-else on a condition literal.
    Ite {
        /// Condition literal.
        cond: Lit,
        /// Value when the condition is true.
        then_bv: BvId,
        /// Value when the condition is false.
        else_bv: BvId,
    },
}

#[derive(Debug, Clone)]
struct OpNode {
    op: BvOp,
    out: BvId,
}

#[derive(Debug, Clone)]
struct BvInfo {
    width: u32,
    bits: Vec<Lit>,
    constant: Option<u64>,
    name: Option<String>,
}

#[derive(Debug)]
struct ReasonEntry {
    level: u32,
    clause: Vec<Lit>,
}

/// The word-level bitvector solver.
///
/// Shared (via `Rc<RefCell<_>>`) between the plugin adapter registered
/// with the engine and the graph plugin, which reads current intervals
/// of bitvector-weighted edges and bounds.
pub struct BvCore {
    theory_id: TheoryId,
    bvs: Vec<BvInfo>,
    intervals: Vec<Interval>,
    undo: Vec<(BvId, Interval, u32)>,
    ops: Vec<OpNode>,
    ops_involving: Vec<Vec<usize>>,
    comparisons: Vec<Comparison>,
    comps_on: Vec<Vec<usize>>,
    lit_to_comp: FxHashMap<Var, usize>,
    bit_owner: FxHashMap<Var, (BvId, u32)>,
    /// Literals whose assignment must re-run an operator's transfer
    /// (ite conditions, popcount/unary inputs): var → affected outputs.
    watched_lits: FxHashMap<Var, Vec<BvId>>,
    assigned: Vec<(Lit, u32)>,
    pending: usize,
    queue: VecDeque<BvId>,
    in_queue: Vec<bool>,
    reasons: Vec<ReasonEntry>,
    names: FxHashMap<String, BvId>,
    named_order: Vec<BvId>,
    bitblasted: Vec<bool>,
    /// Interval snapshot taken at the last successful final check;
    /// survives the post-solve backtrack to level 0.
    model: Option<Vec<Interval>>,
}

impl BvCore {
    /// Create an empty bitvector store for the given theory id.
    #[must_use]
    pub fn new(theory_id: TheoryId) -> Self {
        Self {
            theory_id,
            bvs: Vec::new(),
            intervals: Vec::new(),
            undo: Vec::new(),
            ops: Vec::new(),
            ops_involving: Vec::new(),
            comparisons: Vec::new(),
            comps_on: Vec::new(),
            lit_to_comp: FxHashMap::default(),
            bit_owner: FxHashMap::default(),
            watched_lits: FxHashMap::default(),
            assigned: Vec::new(),
            pending: 0,
            queue: VecDeque::new(),
            in_queue: Vec::new(),
            reasons: Vec::new(),
            names: FxHashMap::default(),
            named_order: Vec::new(),
            bitblasted: Vec::new(),
            model: None,
        }
    }

    /// The theory id this store was registered under.
    #[must_use]
    pub fn theory_id(&self) -> TheoryId {
        self.theory_id
    }

    /// Number of bitvectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bvs.len()
    }

    /// Whether no bitvectors exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bvs.is_empty()
    }

    fn push_bv(&mut self, info: BvInfo) -> BvId {
        let id = BvId(self.bvs.len() as u32);
        let interval = match info.constant {
            Some(v) => Interval::point(v),
            None => Interval::full(info.width),
        };
        self.bvs.push(info);
        self.intervals.push(interval);
        self.ops_involving.push(Vec::new());
        self.comps_on.push(Vec::new());
        self.in_queue.push(false);
        self.bitblasted.push(false);
        id
    }

    /// Create an anonymous bitvector with no explicit bit literals.
    pub fn new_anon(&mut self, width: u32) -> Result<BvId, TheoryError> {
        check_width(width)?;
        Ok(self.push_bv(BvInfo {
            width,
            bits: Vec::new(),
            constant: None,
            name: None,
        }))
    }

    /// Create a constant bitvector.
    pub fn new_const(&mut self, width: u32, value: u64) -> Result<BvId, TheoryError> {
        check_width(width)?;
        if value > mask(width) {
            return Err(TheoryError::ConstantTooWide { value, width });
        }
        Ok(self.push_bv(BvInfo {
            width,
            bits: Vec::new(),
            constant: Some(value),
            name: None,
        }))
    }

    /// Create a bitvector from explicit bit literals (LSB first).
    pub fn new_bits(&mut self, bits: Vec<Lit>) -> Result<BvId, TheoryError> {
        let width = bits.len() as u32;
        check_width(width)?;
        let id = self.push_bv(BvInfo {
            width,
            bits: bits.clone(),
            constant: None,
            name: None,
        });
        for (i, l) in bits.iter().enumerate() {
            self.bit_owner.insert(l.var(), (id, i as u32));
        }
        Ok(id)
    }

    /// Name a bitvector; names are unique printable ASCII.
    pub fn set_name(&mut self, bv: BvId, name: &str) -> Result<(), TheoryError> {
        grix_core::validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(TheoryError::Core(grix_core::CoreError::BadName {
                name: name.to_string(),
                reason: "bitvector name already in use",
            }));
        }
        self.check_bv(bv)?;
        self.bvs[bv.index()].name = Some(name.to_string());
        self.names.insert(name.to_string(), bv);
        self.named_order.push(bv);
        Ok(())
    }

    /// Look up a bitvector by name.
    #[must_use]
    pub fn by_name(&self, name: &str) -> Option<BvId> {
        self.names.get(name).copied()
    }

    /// The name of a bitvector, if any.
    #[must_use]
    pub fn name_of(&self, bv: BvId) -> Option<&str> {
        self.bvs.get(bv.index()).and_then(|b| b.name.as_deref())
    }

    /// Number of named bitvectors.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.named_order.len()
    }

    /// The n-th named bitvector, in naming order.
    #[must_use]
    pub fn named_at(&self, n: usize) -> Option<BvId> {
        self.named_order.get(n).copied()
    }

    /// Width of a bitvector.
    pub fn width(&self, bv: BvId) -> Result<u32, TheoryError> {
        self.check_bv(bv)?;
        Ok(self.bvs[bv.index()].width)
    }

    /// Explicit bit literals (LSB first; empty for anonymous bvs).
    pub fn bits(&self, bv: BvId) -> Result<&[Lit], TheoryError> {
        self.check_bv(bv)?;
        Ok(&self.bvs[bv.index()].bits)
    }

    /// Constant value, if this is a constant bitvector.
    #[must_use]
    pub fn constant(&self, bv: BvId) -> Option<u64> {
        self.bvs.get(bv.index()).and_then(|b| b.constant)
    }

    /// Current interval of a bitvector.
    #[must_use]
    pub fn interval(&self, bv: BvId) -> Interval {
        self.intervals[bv.index()]
    }

    /// Whether a bitvector has been compiled to CNF.
    #[must_use]
    pub fn is_bitblasted(&self, bv: BvId) -> bool {
        self.bitblasted[bv.index()]
    }

    pub(crate) fn mark_bitblasted(&mut self, bv: BvId) {
        self.bitblasted[bv.index()] = true;
    }

    /// Validate a bitvector id.
    pub fn check_bv(&self, bv: BvId) -> Result<(), TheoryError> {
        if bv.index() >= self.bvs.len() {
            return Err(TheoryError::UnknownBitvector { bv: bv.0 });
        }
        Ok(())
    }

    /// The operator node defining `bv`, if any.
    pub(crate) fn op_defining(&self, bv: BvId) -> Option<BvOp> {
        self.ops
            .iter()
            .find(|n| n.out == bv)
            .map(|n| n.op.clone())
    }

    /// Install freshly allocated bit literals on a previously anonymous
    /// bitvector (bit-blasting).
    pub(crate) fn set_bits(&mut self, bv: BvId, bits: Vec<Lit>) {
        debug_assert!(self.bvs[bv.index()].bits.is_empty());
        debug_assert_eq!(bits.len() as u32, self.bvs[bv.index()].width);
        for (i, l) in bits.iter().enumerate() {
            self.bit_owner.insert(l.var(), (bv, i as u32));
        }
        self.bvs[bv.index()].bits = bits;
    }

    pub(crate) fn comparisons_on(&self, bv: BvId) -> Vec<(CmpOp, CmpRhs, Lit)> {
        self.comps_on[bv.index()]
            .iter()
            .map(|&ci| {
                let c = &self.comparisons[ci];
                (c.op, c.rhs, c.lit)
            })
            .collect()
    }

    /// Register an operator node writing into `out`.
    pub fn define(&mut self, out: BvId, op: BvOp) -> Result<(), TheoryError> {
        self.check_bv(out)?;
        self.check_op_widths(out, &op)?;
        let idx = self.ops.len();
        let mut involved: SmallVec<[BvId; 4]> = SmallVec::new();
        collect_args(&op, &mut involved);
        involved.push(out);
        match &op {
            BvOp::Ite { cond, .. } => {
                self.watched_lits.entry(cond.var()).or_default().push(out);
            }
            BvOp::Popcount(bits) | BvOp::Unary(bits) => {
                for b in bits {
                    self.watched_lits.entry(b.var()).or_default().push(out);
                }
            }
            _ => {}
        }
        self.ops.push(OpNode { op, out });
        for bv in involved {
            self.ops_involving[bv.index()].push(idx);
            self.mark_dirty(bv);
        }
        Ok(())
    }

    fn check_op_widths(&self, out: BvId, op: &BvOp) -> Result<(), TheoryError> {
        let w = self.bvs[out.index()].width;
        let same = |a: BvId, b: BvId| -> Result<(), TheoryError> {
            let (wa, wb) = (self.bvs[a.index()].width, self.bvs[b.index()].width);
            if wa != wb || wa != w {
                return Err(TheoryError::WidthMismatch {
                    left: wa,
                    right: wb,
                });
            }
            Ok(())
        };
        match op {
            BvOp::Add(a, b)
            | BvOp::Sub(a, b)
            | BvOp::Mul(a, b)
            | BvOp::Div(a, b)
            | BvOp::And(a, b)
            | BvOp::Or(a, b)
            | BvOp::Xor(a, b)
            | BvOp::Nand(a, b)
            | BvOp::Nor(a, b)
            | BvOp::Xnor(a, b) => same(*a, *b),
            BvOp::Not(a) => {
                if self.bvs[a.index()].width != w {
                    return Err(TheoryError::WidthMismatch {
                        left: self.bvs[a.index()].width,
                        right: w,
                    });
                }
                Ok(())
            }
            BvOp::Concat(a, b) => {
                let (wa, wb) = (self.bvs[a.index()].width, self.bvs[b.index()].width);
                if wa + wb != w {
                    return Err(TheoryError::WidthMismatch {
                        left: wa + wb,
                        right: w,
                    });
                }
                Ok(())
            }
            BvOp::Slice { arg, lo, hi } => {
                let wa = self.bvs[arg.index()].width;
                if *hi >= wa || lo > hi || hi - lo + 1 != w {
                    return Err(TheoryError::WidthMismatch {
                        left: wa,
                        right: w,
                    });
                }
                Ok(())
            }
            BvOp::Min(args) | BvOp::Max(args) => {
                for &a in args {
                    if self.bvs[a.index()].width != w {
                        return Err(TheoryError::WidthMismatch {
                            left: self.bvs[a.index()].width,
                            right: w,
                        });
                    }
                }
                Ok(())
            }
            BvOp::Popcount(_) | BvOp::Unary(_) | BvOp::Ite { .. } => Ok(()),
        }
    }

    /// Register a comparison literal. The literal's variable becomes
    /// theory-owned.
    pub fn add_comparison(
        &mut self,
        op: CmpOp,
        bv: BvId,
        rhs: CmpRhs,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        self.check_bv(bv)?;
        if let CmpRhs::Bv(other) = rhs {
            self.check_bv(other)?;
            let (wa, wb) = (self.bvs[bv.index()].width, self.bvs[other.index()].width);
            if wa != wb {
                return Err(TheoryError::WidthMismatch {
                    left: wa,
                    right: wb,
                });
            }
        }
        let idx = self.comparisons.len();
        self.comparisons.push(Comparison { op, bv, rhs, lit });
        self.comps_on[bv.index()].push(idx);
        if let CmpRhs::Bv(other) = rhs {
            self.comps_on[other.index()].push(idx);
        }
        self.lit_to_comp.insert(lit.var(), idx);
        self.mark_dirty(bv);
        Ok(())
    }

    /// Whether this plugin owns `var` (a comparison or bit literal, an
    /// ite condition, or a popcount input).
    #[must_use]
    pub fn owns_var(&self, var: Var) -> bool {
        self.lit_to_comp.contains_key(&var)
            || self.bit_owner.contains_key(&var)
            || self.watched_lits.contains_key(&var)
    }

    /// Record a theory-literal assignment (applied at the next
    /// propagation).
    pub fn enqueue_theory(&mut self, lit: Lit, level: u32) {
        self.assigned.push((lit, level));
    }

    fn mark_dirty(&mut self, bv: BvId) {
        if !self.in_queue[bv.index()] {
            self.in_queue[bv.index()] = true;
            self.queue.push_back(bv);
        }
    }

    /// Supporting literals currently constraining `bv`'s lower bound
    /// (conservatively: all assigned literals in the input cone).
    #[must_use]
    pub fn explain_bounds(&self, bv: BvId, view: &dyn TheoryView) -> Vec<Lit> {
        let mut cone: Vec<BvId> = vec![bv];
        let mut seen = vec![false; self.bvs.len()];
        seen[bv.index()] = true;
        let mut i = 0;
        while i < cone.len() {
            let b = cone[i];
            i += 1;
            for &oi in &self.ops_involving[b.index()] {
                let node = &self.ops[oi];
                if node.out != b {
                    continue;
                }
                let mut args: SmallVec<[BvId; 4]> = SmallVec::new();
                collect_args(&node.op, &mut args);
                for a in args {
                    if !seen[a.index()] {
                        seen[a.index()] = true;
                        cone.push(a);
                    }
                }
            }
        }
        let mut support = Vec::new();
        for &b in &cone {
            for &ci in &self.comps_on[b.index()] {
                let c = &self.comparisons[ci];
                match view.value(c.lit) {
                    LBool::True => support.push(c.lit),
                    LBool::False => support.push(!c.lit),
                    LBool::Undef => {}
                }
            }
            for &bit in &self.bvs[b.index()].bits {
                match view.value(bit) {
                    LBool::True => support.push(bit),
                    LBool::False => support.push(!bit),
                    LBool::Undef => {}
                }
            }
            for &oi in &self.ops_involving[b.index()] {
                if let BvOp::Ite { cond, .. } = &self.ops[oi].op
                    && self.ops[oi].out == b
                {
                    match view.value(*cond) {
                        LBool::True => support.push(*cond),
                        LBool::False => support.push(!*cond),
                        LBool::Undef => {}
                    }
                }
            }
        }
        support.sort_unstable_by_key(|arg0: &Lit| Lit::code(*arg0));
        support.dedup();
        support
    }

    fn conflict(&self, bv: BvId, view: &dyn TheoryView) -> TheoryConflict {
        let clause = self
            .explain_bounds(bv, view)
            .into_iter()
            .map(|l| !l)
            .collect();
        TheoryConflict::new(clause)
    }

    fn imply(&mut self, lit: Lit, bv: BvId, view: &mut dyn TheoryView) {
        let mut clause = vec![lit];
        for l in self.explain_bounds(bv, view) {
            if l.var() != lit.var() {
                clause.push(!l);
            }
        }
        let token = self.reasons.len() as u32;
        self.reasons.push(ReasonEntry {
            level: view.decision_level(),
            clause,
        });
        view.enqueue(
            lit,
            LazyReason {
                theory: self.theory_id,
                token,
            },
        );
    }

    /// Materialize a stored reason.
    #[must_use]
    pub fn explain(&self, token: u32) -> Vec<Lit> {
        self.reasons[token as usize].clause.clone()
    }

    fn update(
        &mut self,
        bv: BvId,
        tighter: Interval,
        level: u32,
    ) -> Result<bool, BvId> {
        if self.bitblasted[bv.index()] {
            return Ok(false);
        }
        let current = self.intervals[bv.index()];
        let next = current.meet(tighter);
        if next == current {
            return Ok(false);
        }
        self.undo.push((bv, current, level));
        self.intervals[bv.index()] = next;
        trace!(bv = bv.0, lo = next.lo, hi = next.hi, "interval tightened");
        if next.is_empty() {
            return Err(bv);
        }
        self.mark_dirty(bv);
        Ok(true)
    }

    /// Interval a comparison imposes on its left bitvector when the
    /// comparison holds (or, with `holds = false`, fails).
    fn constraint_interval(op: CmpOp, bound: u64, width: u32, holds: bool) -> Interval {
        let m = mask(width);
        let empty = Interval { lo: 1, hi: 0 };
        let (op, bound) = if holds {
            (op, bound)
        } else {
            // ¬(a < k) ⇔ a ≥ k, etc.
            match op {
                CmpOp::Lt => (CmpOp::Geq, bound),
                CmpOp::Leq => (CmpOp::Gt, bound),
                CmpOp::Gt => (CmpOp::Leq, bound),
                CmpOp::Geq => (CmpOp::Lt, bound),
            }
        };
        match op {
            CmpOp::Lt => {
                if bound == 0 {
                    empty
                } else {
                    Interval {
                        lo: 0,
                        hi: bound - 1,
                    }
                }
            }
            CmpOp::Leq => Interval { lo: 0, hi: bound },
            CmpOp::Gt => {
                if bound >= m {
                    empty
                } else {
                    Interval {
                        lo: bound + 1,
                        hi: m,
                    }
                }
            }
            CmpOp::Geq => Interval { lo: bound, hi: m },
        }
    }

    fn apply_assignment(
        &mut self,
        lit: Lit,
        level: u32,
        view: &dyn TheoryView,
    ) -> Result<(), TheoryConflict> {
        if let Some(&ci) = self.lit_to_comp.get(&lit.var()) {
            let c = self.comparisons[ci].clone();
            if self.bitblasted[c.bv.index()] {
                return Ok(());
            }
            // Whether the comparison itself is asserted or refuted.
            let holds = view.value(c.lit).is_true();
            match c.rhs {
                CmpRhs::Const(k) => {
                    let width = self.bvs[c.bv.index()].width;
                    let constraint = Self::constraint_interval(c.op, k, width, holds);
                    if constraint.is_empty() {
                        return Err(self.conflict(c.bv, view));
                    }
                    if let Err(bad) = self.update(c.bv, constraint, level) {
                        return Err(self.conflict(bad, view));
                    }
                }
                CmpRhs::Bv(other) => {
                    self.apply_bv_comparison(&c, holds, level, view)?;
                    self.mark_dirty(other);
                }
            }
        } else if let Some(&(bv, _)) = self.bit_owner.get(&lit.var()) {
            if !self.bitblasted[bv.index()] {
                let constraint = self.bits_interval(bv, view);
                if let Err(bad) = self.update(bv, constraint, level) {
                    return Err(self.conflict(bad, view));
                }
            }
        }
        if let Some(outs) = self.watched_lits.get(&lit.var()).cloned() {
            for out in outs {
                self.mark_dirty(out);
            }
        }
        Ok(())
    }

    /// Interval consistent with the currently assigned bit literals.
    fn bits_interval(&self, bv: BvId, view: &dyn TheoryView) -> Interval {
        let mut lo = 0u64;
        let mut hi = 0u64;
        for (i, &bit) in self.bvs[bv.index()].bits.iter().enumerate() {
            match view.value(bit) {
                LBool::True => {
                    lo |= 1 << i;
                    hi |= 1 << i;
                }
                LBool::Undef => {
                    hi |= 1 << i;
                }
                LBool::False => {}
            }
        }
        Interval { lo, hi }
    }

    fn apply_bv_comparison(
        &mut self,
        c: &Comparison,
        holds: bool,
        level: u32,
        view: &dyn TheoryView,
    ) -> Result<(), TheoryConflict> {
        let a = self.intervals[c.bv.index()];
        let b = self.intervals[match c.rhs {
            CmpRhs::Bv(o) => o.index(),
            CmpRhs::Const(_) => unreachable!("constant handled by caller"),
        }];
        let other = match c.rhs {
            CmpRhs::Bv(o) => o,
            CmpRhs::Const(_) => unreachable!(),
        };
        let wa = self.bvs[c.bv.index()].width;
        let m = mask(wa);
        // Normalize to "x + delta ≤ y" with (x, y) ∈ {(a, b), (b, a)}.
        let (strict, a_below_b) = match (c.op, holds) {
            (CmpOp::Lt, true) | (CmpOp::Geq, false) => (true, true),
            (CmpOp::Leq, true) | (CmpOp::Gt, false) => (false, true),
            (CmpOp::Gt, true) | (CmpOp::Leq, false) => (true, false),
            (CmpOp::Geq, true) | (CmpOp::Lt, false) => (false, false),
        };
        let delta = u64::from(strict);
        let (x, x_iv, y, y_iv) = if a_below_b {
            (c.bv, a, other, b)
        } else {
            (other, b, c.bv, a)
        };
        // x + delta ≤ y: x ≤ y.hi - delta, y ≥ x.lo + delta.
        if y_iv.hi < delta || x_iv.lo > m - delta {
            return Err(self.conflict(c.bv, view));
        }
        if let Err(bad) = self.update(
            x,
            Interval {
                lo: 0,
                hi: y_iv.hi - delta,
            },
            level,
        ) {
            return Err(self.conflict(bad, view));
        }
        if let Err(bad) = self.update(
            y,
            Interval {
                lo: x_iv.lo + delta,
                hi: m,
            },
            level,
        ) {
            return Err(self.conflict(bad, view));
        }
        Ok(())
    }

    /// Run interval propagation to a fixed point, enqueueing implied
    /// comparison literals.
    pub fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        let level = view.decision_level();
        while self.pending < self.assigned.len() {
            let (lit, lvl) = self.assigned[self.pending];
            self.pending += 1;
            self.apply_assignment(lit, lvl, view)?;
        }
        while let Some(bv) = self.queue.pop_front() {
            self.in_queue[bv.index()] = false;
            if self.bitblasted[bv.index()] {
                continue;
            }
            // Forward transfer through every operator touching this bv.
            let op_indices = self.ops_involving[bv.index()].clone();
            for oi in op_indices {
                let node = self.ops[oi].clone();
                if self.bitblasted[node.out.index()] {
                    continue;
                }
                let out_constraint = self.transfer(&node.op, node.out, view);
                if let Err(bad) = self.update(node.out, out_constraint, level) {
                    return Err(self.conflict(bad, view));
                }
            }
            // Re-apply assigned bv-vs-bv comparisons touching this bv.
            let comp_indices = self.comps_on[bv.index()].clone();
            for ci in comp_indices {
                let c = self.comparisons[ci].clone();
                if matches!(c.rhs, CmpRhs::Bv(_)) {
                    match view.value(c.lit) {
                        LBool::True => self.apply_bv_comparison(&c, true, level, view)?,
                        LBool::False => self.apply_bv_comparison(&c, false, level, view)?,
                        LBool::Undef => {}
                    }
                }
            }
            // Imply comparison literals decided by the interval.
            let comp_indices = self.comps_on[bv.index()].clone();
            for ci in comp_indices {
                let c = self.comparisons[ci].clone();
                if !view.value(c.lit).is_undef() || self.bitblasted[c.bv.index()] {
                    continue;
                }
                let a = self.intervals[c.bv.index()];
                let b = match c.rhs {
                    CmpRhs::Const(k) => Interval::point(k),
                    CmpRhs::Bv(o) => self.intervals[o.index()],
                };
                let verdict = match c.op {
                    CmpOp::Lt => {
                        if a.hi < b.lo {
                            Some(true)
                        } else if a.lo >= b.hi {
                            Some(false)
                        } else {
                            None
                        }
                    }
                    CmpOp::Leq => {
                        if a.hi <= b.lo {
                            Some(true)
                        } else if a.lo > b.hi {
                            Some(false)
                        } else {
                            None
                        }
                    }
                    CmpOp::Gt => {
                        if a.lo > b.hi {
                            Some(true)
                        } else if a.hi <= b.lo {
                            Some(false)
                        } else {
                            None
                        }
                    }
                    CmpOp::Geq => {
                        if a.lo >= b.hi {
                            Some(true)
                        } else if a.hi < b.lo {
                            Some(false)
                        } else {
                            None
                        }
                    }
                };
                if let Some(v) = verdict {
                    let lit = if v { c.lit } else { !c.lit };
                    self.imply(lit, c.bv, view);
                }
            }
        }
        Ok(())
    }

    /// Forward transfer function of one operator node.
    fn transfer(&self, op: &BvOp, out: BvId, view: &dyn TheoryView) -> Interval {
        let w = self.bvs[out.index()].width;
        let m = mask(w);
        let iv = |b: BvId| self.intervals[b.index()];
        match op {
            BvOp::Add(a, b) => modular_add(iv(*a), iv(*b), m),
            BvOp::Sub(a, b) => modular_sub(iv(*a), iv(*b), m),
            BvOp::Mul(a, b) => {
                let (a, b) = (iv(*a), iv(*b));
                let lo = u128::from(a.lo) * u128::from(b.lo);
                let hi = u128::from(a.hi) * u128::from(b.hi);
                if hi <= u128::from(m) {
                    Interval {
                        lo: lo as u64,
                        hi: hi as u64,
                    }
                } else {
                    Interval { lo: 0, hi: m }
                }
            }
            BvOp::Div(a, b) => {
                let (a, b) = (iv(*a), iv(*b));
                if b.hi == 0 {
                    // Division by an identically-zero divisor is
                    // unconstrained.
                    Interval { lo: 0, hi: m }
                } else {
                    Interval {
                        lo: a.lo / b.hi.max(1),
                        hi: a.hi / b.lo.max(1),
                    }
                }
            }
            BvOp::And(a, b) => Interval {
                lo: 0,
                hi: iv(*a).hi.min(iv(*b).hi),
            },
            BvOp::Or(a, b) => Interval {
                lo: iv(*a).lo.max(iv(*b).lo),
                hi: smear(iv(*a).hi | iv(*b).hi) & m,
            },
            BvOp::Xor(a, b) => Interval {
                lo: 0,
                hi: smear(iv(*a).hi | iv(*b).hi) & m,
            },
            BvOp::Nand(a, b) => complement(
                Interval {
                    lo: 0,
                    hi: iv(*a).hi.min(iv(*b).hi),
                },
                m,
            ),
            BvOp::Nor(a, b) => complement(
                Interval {
                    lo: iv(*a).lo.max(iv(*b).lo),
                    hi: smear(iv(*a).hi | iv(*b).hi) & m,
                },
                m,
            ),
            BvOp::Xnor(a, b) => complement(
                Interval {
                    lo: 0,
                    hi: smear(iv(*a).hi | iv(*b).hi) & m,
                },
                m,
            ),
            BvOp::Not(a) => complement(iv(*a), m),
            BvOp::Concat(a, b) => {
                let wb = self.bvs[b.index()].width;
                Interval {
                    lo: (iv(*a).lo << wb) | iv(*b).lo,
                    hi: (iv(*a).hi << wb) | iv(*b).hi,
                }
            }
            BvOp::Slice { arg, lo, hi: _ } => {
                let a = iv(*arg);
                if a.is_point() {
                    Interval::point((a.lo >> lo) & m)
                } else {
                    Interval { lo: 0, hi: m }
                }
            }
            BvOp::Min(args) => Interval {
                lo: args.iter().map(|&a| iv(a).lo).min().unwrap_or(0),
                hi: args.iter().map(|&a| iv(a).hi).min().unwrap_or(m),
            },
            BvOp::Max(args) => Interval {
                lo: args.iter().map(|&a| iv(a).lo).max().unwrap_or(0),
                hi: args.iter().map(|&a| iv(a).hi).max().unwrap_or(m),
            },
            BvOp::Popcount(bits) | BvOp::Unary(bits) => {
                let mut lo = 0u64;
                let mut hi = 0u64;
                for &bit in bits {
                    match view.value(bit) {
                        LBool::True => {
                            lo += 1;
                            hi += 1;
                        }
                        LBool::Undef => hi += 1,
                        LBool::False => {}
                    }
                }
                Interval { lo, hi: hi.min(m) }
            }
            BvOp::Ite {
                cond,
                then_bv,
                else_bv,
            } => match view.value(*cond) {
                LBool::True => iv(*then_bv),
                LBool::False => iv(*else_bv),
                LBool::Undef => Interval {
                    lo: iv(*then_bv).lo.min(iv(*else_bv).lo),
                    hi: iv(*then_bv).hi.max(iv(*else_bv).hi),
                },
            },
        }
    }

    /// Undo all interval changes and assignments above `level`.
    pub fn backtrack(&mut self, level: u32) {
        while let Some(&(bv, old, lvl)) = self.undo.last() {
            if lvl <= level {
                break;
            }
            self.intervals[bv.index()] = old;
            self.undo.pop();
        }
        while let Some(&(_, lvl)) = self.assigned.last() {
            if lvl <= level {
                break;
            }
            self.assigned.pop();
        }
        self.pending = self.pending.min(self.assigned.len());
        // Reason levels are non-decreasing, so this only drops a
        // suffix; surviving tokens keep their indices.
        while self.reasons.last().is_some_and(|r| r.level > level) {
            self.reasons.pop();
        }
        self.queue.clear();
        for q in &mut self.in_queue {
            *q = false;
        }
    }

    /// Whether the current assignment is consistent (no pending work).
    #[must_use]
    pub fn check_satisfied(&self) -> bool {
        self.pending >= self.assigned.len()
            && self.intervals.iter().all(|iv| !iv.is_empty())
    }

    /// Record the current intervals as the model approximation.
    pub fn snapshot_model(&mut self) {
        self.model = Some(self.intervals.clone());
    }

    /// The model interval of a bitvector: the snapshot taken at the
    /// last successful final check, or the live interval before any.
    #[must_use]
    pub fn model_interval(&self, bv: BvId) -> Interval {
        self.model
            .as_ref()
            .and_then(|m| m.get(bv.index()).copied())
            .unwrap_or(self.intervals[bv.index()])
    }

    /// Model value of a bitvector: the under-approximation (`lo`) after
    /// a SAT answer, or the over-approximation (`hi`) when asked.
    #[must_use]
    pub fn model_value(&self, bv: BvId, maximum: bool) -> u64 {
        let iv = self.model_interval(bv);
        if maximum { iv.hi } else { iv.lo }
    }
}

fn collect_args(op: &BvOp, out: &mut SmallVec<[BvId; 4]>) {
    match op {
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
        | BvOp::Concat(a, b) => {
            out.push(*a);
            out.push(*b);
        }
        BvOp::Not(a) | BvOp::Slice { arg: a, .. } => out.push(*a),
        BvOp::Min(args) | BvOp::Max(args) => out.extend(args.iter().copied()),
        BvOp::Popcount(_) | BvOp::Unary(_) => {}
        BvOp::Ite {
            then_bv, else_bv, ..
        } => {
            out.push(*then_bv);
            out.push(*else_bv);
        }
    }
}

fn check_width(width: u32) -> Result<(), TheoryError> {
    if width == 0 || width > 64 {
        return Err(TheoryError::WidthOutOfRange { width });
    }
    Ok(())
}

/// Fill every bit below the most significant set bit.
fn smear(mut x: u64) -> u64 {
    x |= x >> 1;
    x |= x >> 2;
    x |= x >> 4;
    x |= x >> 8;
    x |= x >> 16;
    x |= x >> 32;
    x
}

fn complement(iv: Interval, m: u64) -> Interval {
    Interval {
        lo: m - iv.hi.min(m),
        hi: m - iv.lo.min(m),
    }
}

fn modular_add(a: Interval, b: Interval, m: u64) -> Interval {
    let lo = u128::from(a.lo) + u128::from(b.lo);
    let hi = u128::from(a.hi) + u128::from(b.hi);
    let modulus = u128::from(m) + 1;
    if hi < modulus {
        Interval {
            lo: lo as u64,
            hi: hi as u64,
        }
    } else if lo >= modulus {
        Interval {
            lo: (lo - modulus) as u64,
            hi: (hi - modulus) as u64,
        }
    } else {
        Interval { lo: 0, hi: m }
    }
}

fn modular_sub(a: Interval, b: Interval, m: u64) -> Interval {
    let lo = i128::from(a.lo) - i128::from(b.hi);
    let hi = i128::from(a.hi) - i128::from(b.lo);
    let modulus = i128::from(m) + 1;
    if lo >= 0 {
        Interval {
            lo: lo as u64,
            hi: hi as u64,
        }
    } else if hi < 0 {
        Interval {
            lo: (lo + modulus) as u64,
            hi: (hi + modulus) as u64,
        }
    } else {
        Interval { lo: 0, hi: m }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_widths() {
        assert_eq!(mask(1), 1);
        assert_eq!(mask(8), 255);
        assert_eq!(mask(64), u64::MAX);
    }

    #[test]
    fn test_modular_add_wraps() {
        let m = mask(8);
        // Both endpoints wrap: [200,255] + [100,255] = [44, 254].
        let r = modular_add(
            Interval { lo: 200, hi: 255 },
            Interval { lo: 100, hi: 255 },
            m,
        );
        assert_eq!(r, Interval { lo: 44, hi: 254 });
        // No wrap.
        let r = modular_add(Interval { lo: 1, hi: 2 }, Interval { lo: 3, hi: 4 }, m);
        assert_eq!(r, Interval { lo: 4, hi: 6 });
        // Straddling wrap collapses to full.
        let r = modular_add(
            Interval { lo: 0, hi: 200 },
            Interval { lo: 0, hi: 200 },
            m,
        );
        assert_eq!(r, Interval { lo: 0, hi: 255 });
    }

    #[test]
    fn test_modular_sub() {
        let m = mask(8);
        let r = modular_sub(Interval { lo: 10, hi: 20 }, Interval { lo: 1, hi: 5 }, m);
        assert_eq!(r, Interval { lo: 5, hi: 19 });
        // Always negative: wraps.
        let r = modular_sub(Interval { lo: 0, hi: 1 }, Interval { lo: 10, hi: 10 }, m);
        assert_eq!(r, Interval { lo: 246, hi: 247 });
    }

    #[test]
    fn test_complement_matches_not() {
        let m = mask(4);
        let r = complement(Interval { lo: 3, hi: 10 }, m);
        assert_eq!(r, Interval { lo: 5, hi: 12 });
    }

    #[test]
    fn test_constant_too_wide_rejected() {
        let mut core = BvCore::new(TheoryId(0));
        assert!(core.new_const(4, 16).is_err());
        assert!(core.new_const(4, 15).is_ok());
        assert!(core.new_anon(0).is_err());
        assert!(core.new_anon(65).is_err());
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let mut core = BvCore::new(TheoryId(0));
        let a = core.new_anon(4).unwrap();
        let b = core.new_anon(8).unwrap();
        let out = core.new_anon(4).unwrap();
        assert!(core.define(out, BvOp::Add(a, b)).is_err());
    }

    #[test]
    fn test_constraint_interval() {
        let iv = BvCore::constraint_interval(CmpOp::Lt, 5, 8, true);
        assert_eq!(iv, Interval { lo: 0, hi: 4 });
        let iv = BvCore::constraint_interval(CmpOp::Lt, 5, 8, false);
        assert_eq!(iv, Interval { lo: 5, hi: 255 });
        let iv = BvCore::constraint_interval(CmpOp::Geq, 5, 8, true);
        assert_eq!(iv, Interval { lo: 5, hi: 255 });
        // a < 0 is unsatisfiable.
        let iv = BvCore::constraint_interval(CmpOp::Lt, 0, 8, true);
        assert!(iv.is_empty());
    }
}
