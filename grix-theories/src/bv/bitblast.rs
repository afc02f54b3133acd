//! Bit-blasting: compiling a bitvector's operator cone to CNF.
//!
//! On request, a bitvector and every bitvector in its input cone are
//! given explicit bit literals, their defining operators and comparison
//! literals are encoded as clauses through the engine's [`VarAlloc`],
//! and the word-level interval propagator is disabled for them.
//!
//! Supported operators: constants, explicit bits, add, sub, the bitwise
//! family, not, concat, slice, and ite. Multiplication uses a shift-add
//! array. Division, min/max, popcount, and unary counters have no CNF
//! encoding here and keep their interval semantics; requesting a blast
//! of their cone is an error.

use grix_core::error::TheoryError;
use grix_core::{Lit, VarAlloc};
use rustc_hash::FxHashSet;

use super::solver::{BvCore, BvId, BvOp, CmpOp, CmpRhs, mask};

/// Bit-blast `root` and its cone. Must be called at decision level 0.
pub fn bitblast(
    core: &mut BvCore,
    alloc: &mut dyn VarAlloc,
    root: BvId,
) -> Result<(), TheoryError> {
    core.check_bv(root)?;
    if core.is_bitblasted(root) {
        return Ok(());
    }
    // Collect the cone, inputs before outputs, closed under
    // bv-vs-bv comparison partners (both sides of a comparison must
    // carry bits for its comparator circuit).
    let mut order: Vec<BvId> = Vec::new();
    let mut seen: FxHashSet<BvId> = FxHashSet::default();
    collect_cone(core, root, &mut order, &mut seen)?;
    let mut i = 0;
    while i < order.len() {
        let bv = order[i];
        i += 1;
        for (_, rhs, _) in core.comparisons_on(bv) {
            if let CmpRhs::Bv(other) = rhs
                && !seen.contains(&other)
            {
                collect_cone(core, other, &mut order, &mut seen)?;
            }
        }
    }

    let mut ctx = Blaster {
        false_lit: None,
        true_lit: None,
    };

    // Give every cone member explicit bits.
    for &bv in &order {
        if core.bits(bv)?.is_empty() {
            let width = core.width(bv)?;
            let bits: Vec<Lit> = (0..width).map(|_| Lit::pos(alloc.new_var())).collect();
            core.set_bits(bv, bits);
        }
    }
    // Encode constants, operators, and comparisons.
    let mut encoded: FxHashSet<Lit> = FxHashSet::default();
    for &bv in &order {
        let bits = core.bits(bv)?.to_vec();
        if let Some(value) = core.constant(bv) {
            for (i, &b) in bits.iter().enumerate() {
                let unit = if value >> i & 1 == 1 { b } else { !b };
                alloc.add_clause(&[unit]);
            }
        }
        if let Some(op) = core.op_defining(bv) {
            ctx.encode_op(core, alloc, &op, &bits)?;
        }
        for (op, rhs, lit) in core.comparisons_on(bv) {
            // Comparisons are listed under both sides; encode each once,
            // from its left side.
            let is_left = match rhs {
                CmpRhs::Const(_) => true,
                CmpRhs::Bv(other) => other != bv,
            };
            if is_left && encoded.insert(lit) {
                ctx.encode_comparison(core, alloc, op, bv, rhs, lit)?;
            }
        }
    }
    for &bv in &order {
        core.mark_bitblasted(bv);
    }
    Ok(())
}

/// Encode one comparison on an already-blasted bitvector. Both sides
/// of a bv-vs-bv comparison must carry bits.
pub fn encode_comparison_now(
    core: &BvCore,
    alloc: &mut dyn VarAlloc,
    op: CmpOp,
    bv: BvId,
    rhs: CmpRhs,
    lit: Lit,
) -> Result<(), TheoryError> {
    let mut ctx = Blaster {
        false_lit: None,
        true_lit: None,
    };
    ctx.encode_comparison(core, alloc, op, bv, rhs, lit)
}

fn collect_cone(
    core: &BvCore,
    bv: BvId,
    order: &mut Vec<BvId>,
    seen: &mut FxHashSet<BvId>,
) -> Result<(), TheoryError> {
    if !seen.insert(bv) || core.is_bitblasted(bv) {
        return Ok(());
    }
    if let Some(op) = core.op_defining(bv) {
        for arg in op_args(&op) {
            collect_cone(core, arg, order, seen)?;
        }
        match op {
            BvOp::Div(..) => {
                return Err(TheoryError::Unsupported {
                    what: "bit-blasting division",
                });
            }
            BvOp::Min(_) | BvOp::Max(_) => {
                return Err(TheoryError::Unsupported {
                    what: "bit-blasting min/max",
                });
            }
            BvOp::Popcount(_) | BvOp::Unary(_) => {
                return Err(TheoryError::Unsupported {
                    what: "bit-blasting population counts",
                });
            }
            _ => {}
        }
    }
    order.push(bv);
    Ok(())
}

fn op_args(op: &BvOp) -> Vec<BvId> {
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
        | BvOp::Concat(a, b) => vec![*a, *b],
        BvOp::Not(a) | BvOp::Slice { arg: a, .. } => vec![*a],
        BvOp::Min(args) | BvOp::Max(args) => args.to_vec(),
        BvOp::Popcount(_) | BvOp::Unary(_) => Vec::new(),
        BvOp::Ite {
            then_bv, else_bv, ..
        } => vec![*then_bv, *else_bv],
    }
}

struct Blaster {
    false_lit: Option<Lit>,
    true_lit: Option<Lit>,
}

impl Blaster {
    fn false_lit(&mut self, alloc: &mut dyn VarAlloc) -> Lit {
        *self.false_lit.get_or_insert_with(|| {
            let l = Lit::pos(alloc.new_var());
            alloc.add_clause(&[!l]);
            l
        })
    }

    fn true_lit(&mut self, alloc: &mut dyn VarAlloc) -> Lit {
        *self.true_lit.get_or_insert_with(|| {
            let l = Lit::pos(alloc.new_var());
            alloc.add_clause(&[l]);
            l
        })
    }

    fn encode_op(
        &mut self,
        core: &BvCore,
        alloc: &mut dyn VarAlloc,
        op: &BvOp,
        out: &[Lit],
    ) -> Result<(), TheoryError> {
        match op {
            BvOp::Add(a, b) => {
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                let cin = self.false_lit(alloc);
                self.encode_adder(alloc, &a, &b, cin, out);
            }
            BvOp::Sub(a, b) => {
                // a - b = a + ¬b + 1.
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                let nb: Vec<Lit> = b
                    .iter()
                    .map(|&bi| {
                        let n = Lit::pos(alloc.new_var());
                        alloc.add_clause(&[n, bi]);
                        alloc.add_clause(&[!n, !bi]);
                        n
                    })
                    .collect();
                let cin = self.true_lit(alloc);
                self.encode_adder(alloc, &a, &nb, cin, out);
            }
            BvOp::Mul(a, b) => {
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                self.encode_multiplier(alloc, &a, &b, out);
            }
            BvOp::And(a, b) | BvOp::Nand(a, b) => {
                let neg = matches!(op, BvOp::Nand(..));
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                for i in 0..out.len() {
                    let o = if neg { !out[i] } else { out[i] };
                    encode_and_gate(alloc, a[i], b[i], o);
                }
            }
            BvOp::Or(a, b) | BvOp::Nor(a, b) => {
                let neg = matches!(op, BvOp::Nor(..));
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                for i in 0..out.len() {
                    // a ∨ b = ¬(¬a ∧ ¬b).
                    let o = if neg { out[i] } else { !out[i] };
                    encode_and_gate(alloc, !a[i], !b[i], o);
                }
            }
            BvOp::Xor(a, b) | BvOp::Xnor(a, b) => {
                let neg = matches!(op, BvOp::Xnor(..));
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                for i in 0..out.len() {
                    let o = if neg { !out[i] } else { out[i] };
                    encode_xor_gate(alloc, a[i], b[i], o);
                }
            }
            BvOp::Not(a) => {
                let a = core.bits(*a)?.to_vec();
                for i in 0..out.len() {
                    alloc.add_clause(&[out[i], a[i]]);
                    alloc.add_clause(&[!out[i], !a[i]]);
                }
            }
            BvOp::Concat(a, b) => {
                let (a, b) = (core.bits(*a)?.to_vec(), core.bits(*b)?.to_vec());
                for (i, &bi) in b.iter().enumerate() {
                    encode_equal(alloc, out[i], bi);
                }
                for (i, &ai) in a.iter().enumerate() {
                    encode_equal(alloc, out[b.len() + i], ai);
                }
            }
            BvOp::Slice { arg, lo, .. } => {
                let a = core.bits(*arg)?.to_vec();
                for (i, &o) in out.iter().enumerate() {
                    encode_equal(alloc, o, a[*lo as usize + i]);
                }
            }
            BvOp::Ite {
                cond,
                then_bv,
                else_bv,
            } => {
                let (t, e) = (core.bits(*then_bv)?.to_vec(), core.bits(*else_bv)?.to_vec());
                for i in 0..out.len() {
                    alloc.add_clause(&[!*cond, !t[i], out[i]]);
                    alloc.add_clause(&[!*cond, t[i], !out[i]]);
                    alloc.add_clause(&[*cond, !e[i], out[i]]);
                    alloc.add_clause(&[*cond, e[i], !out[i]]);
                }
            }
            BvOp::Div(..) | BvOp::Min(_) | BvOp::Max(_) | BvOp::Popcount(_) | BvOp::Unary(_) => {
                return Err(TheoryError::Unsupported {
                    what: "bit-blasting this operator",
                });
            }
        }
        Ok(())
    }

    /// Ripple-carry adder; the result is truncated to `out.len()` bits.
    fn encode_adder(
        &mut self,
        alloc: &mut dyn VarAlloc,
        a: &[Lit],
        b: &[Lit],
        cin: Lit,
        out: &[Lit],
    ) {
        let mut carry = cin;
        for i in 0..out.len() {
            // The carry out of the top bit is simply discarded
            // (modular arithmetic).
            let next_carry = Lit::pos(alloc.new_var());
            encode_full_adder(alloc, a[i], b[i], carry, out[i], next_carry);
            carry = next_carry;
        }
    }

    /// Shift-add array multiplier, truncated to the output width.
    fn encode_multiplier(
        &mut self,
        alloc: &mut dyn VarAlloc,
        a: &[Lit],
        b: &[Lit],
        out: &[Lit],
    ) {
        let w = out.len();
        let zero = self.false_lit(alloc);
        // acc = (a & b0 replicated) << 0
        let mut acc: Vec<Lit> = (0..w)
            .map(|i| {
                let pp = Lit::pos(alloc.new_var());
                encode_and_gate(alloc, a[i], b[0], pp);
                pp
            })
            .collect();
        for (j, &bj) in b.iter().enumerate().skip(1) {
            if j >= w {
                break;
            }
            // Row j: partial products shifted left by j.
            let row: Vec<Lit> = (0..w)
                .map(|i| {
                    if i < j {
                        zero
                    } else {
                        let pp = Lit::pos(alloc.new_var());
                        encode_and_gate(alloc, a[i - j], bj, pp);
                        pp
                    }
                })
                .collect();
            let sum: Vec<Lit> = (0..w).map(|_| Lit::pos(alloc.new_var())).collect();
            let cin = self.false_lit(alloc);
            self.encode_adder(alloc, &acc, &row, cin, &sum);
            acc = sum;
        }
        for i in 0..w {
            encode_equal(alloc, out[i], acc[i]);
        }
    }

    fn encode_comparison(
        &mut self,
        core: &BvCore,
        alloc: &mut dyn VarAlloc,
        op: CmpOp,
        bv: BvId,
        rhs: CmpRhs,
        lit: Lit,
    ) -> Result<(), TheoryError> {
        let a = core.bits(bv)?.to_vec();
        let width = core.width(bv)?;
        match rhs {
            CmpRhs::Const(k) => {
                // Reduce every operator to "a < bound" or a constant.
                let (target, bound, negate) = match op {
                    CmpOp::Lt => (lit, k, false),
                    CmpOp::Geq => (lit, k, true),
                    CmpOp::Leq => {
                        if k >= mask(width) {
                            alloc.add_clause(&[lit]);
                            return Ok(());
                        }
                        (lit, k + 1, false)
                    }
                    CmpOp::Gt => {
                        if k >= mask(width) {
                            alloc.add_clause(&[!lit]);
                            return Ok(());
                        }
                        (lit, k + 1, true)
                    }
                };
                let lt = self.encode_less_than_const(alloc, &a, bound);
                let target_pos = if negate { !target } else { target };
                encode_equal(alloc, target_pos, lt);
            }
            CmpRhs::Bv(other) => {
                let b = core.bits(other)?.to_vec();
                let (x, y, negate) = match op {
                    CmpOp::Lt => (a, b, false),
                    CmpOp::Geq => (a, b, true),
                    // a > b ⇔ b < a; a ≤ b ⇔ ¬(b < a).
                    CmpOp::Gt => (b, a, false),
                    CmpOp::Leq => (b, a, true),
                };
                let lt = self.encode_less_than_bv(alloc, &x, &y);
                let target = if negate { !lit } else { lit };
                encode_equal(alloc, target, lt);
            }
        }
        Ok(())
    }

    /// Returns a literal equivalent to `bits < k` (unsigned).
    fn encode_less_than_const(&mut self, alloc: &mut dyn VarAlloc, bits: &[Lit], k: u64) -> Lit {
        if k == 0 {
            return self.false_lit(alloc);
        }
        let w = bits.len();
        // eq[i] : the bits above position i all match k.
        let mut eq_above = self.true_lit(alloc);
        let mut disjuncts: Vec<Lit> = Vec::new();
        for i in (0..w).rev() {
            let ki = k >> i & 1 == 1;
            if ki {
                // a_i = 0 while everything above matches: a < k.
                let d = Lit::pos(alloc.new_var());
                encode_and_gate(alloc, eq_above, !bits[i], d);
                disjuncts.push(d);
            }
            let here = if ki { bits[i] } else { !bits[i] };
            let eq = Lit::pos(alloc.new_var());
            encode_and_gate(alloc, eq_above, here, eq);
            eq_above = eq;
        }
        let lt = Lit::pos(alloc.new_var());
        // lt ↔ ∨ disjuncts.
        let mut clause = vec![!lt];
        for &d in &disjuncts {
            alloc.add_clause(&[lt, !d]);
            clause.push(d);
        }
        alloc.add_clause(&clause);
        lt
    }

    /// Returns a literal equivalent to `x < y` (unsigned).
    fn encode_less_than_bv(&mut self, alloc: &mut dyn VarAlloc, x: &[Lit], y: &[Lit]) -> Lit {
        let w = x.len();
        let mut eq_above = self.true_lit(alloc);
        let mut disjuncts: Vec<Lit> = Vec::new();
        for i in (0..w).rev() {
            // x_i = 0 ∧ y_i = 1 while everything above is equal.
            let d = Lit::pos(alloc.new_var());
            encode_and3_gate(alloc, eq_above, !x[i], y[i], d);
            disjuncts.push(d);
            let xnor = Lit::pos(alloc.new_var());
            encode_xor_gate(alloc, x[i], y[i], !xnor);
            let eq = Lit::pos(alloc.new_var());
            encode_and_gate(alloc, eq_above, xnor, eq);
            eq_above = eq;
        }
        let lt = Lit::pos(alloc.new_var());
        let mut clause = vec![!lt];
        for &d in &disjuncts {
            alloc.add_clause(&[lt, !d]);
            clause.push(d);
        }
        alloc.add_clause(&clause);
        lt
    }
}

/// `o ↔ a ∧ b`.
fn encode_and_gate(alloc: &mut dyn VarAlloc, a: Lit, b: Lit, o: Lit) {
    alloc.add_clause(&[!a, !b, o]);
    alloc.add_clause(&[a, !o]);
    alloc.add_clause(&[b, !o]);
}

/// `o ↔ a ∧ b ∧ c`.
fn encode_and3_gate(alloc: &mut dyn VarAlloc, a: Lit, b: Lit, c: Lit, o: Lit) {
    alloc.add_clause(&[!a, !b, !c, o]);
    alloc.add_clause(&[a, !o]);
    alloc.add_clause(&[b, !o]);
    alloc.add_clause(&[c, !o]);
}

/// `o ↔ a ⊕ b`.
fn encode_xor_gate(alloc: &mut dyn VarAlloc, a: Lit, b: Lit, o: Lit) {
    alloc.add_clause(&[!a, !b, !o]);
    alloc.add_clause(&[a, b, !o]);
    alloc.add_clause(&[!a, b, o]);
    alloc.add_clause(&[a, !b, o]);
}

/// `a ↔ b`.
fn encode_equal(alloc: &mut dyn VarAlloc, a: Lit, b: Lit) {
    alloc.add_clause(&[!a, b]);
    alloc.add_clause(&[a, !b]);
}

/// `s ↔ a ⊕ b ⊕ cin`, `cout ↔ majority(a, b, cin)`.
fn encode_full_adder(alloc: &mut dyn VarAlloc, a: Lit, b: Lit, cin: Lit, s: Lit, cout: Lit) {
    // Sum: every combination with odd parity sets s.
    alloc.add_clause(&[!a, !b, !cin, s]);
    alloc.add_clause(&[!a, b, cin, s]);
    alloc.add_clause(&[a, !b, cin, s]);
    alloc.add_clause(&[a, b, !cin, s]);
    alloc.add_clause(&[a, b, cin, !s]);
    alloc.add_clause(&[a, !b, !cin, !s]);
    alloc.add_clause(&[!a, b, !cin, !s]);
    alloc.add_clause(&[!a, !b, cin, !s]);
    // Carry: majority.
    alloc.add_clause(&[!a, !b, cout]);
    alloc.add_clause(&[!a, !cin, cout]);
    alloc.add_clause(&[!b, !cin, cout]);
    alloc.add_clause(&[a, b, !cout]);
    alloc.add_clause(&[a, cin, !cout]);
    alloc.add_clause(&[b, cin, !cout]);
}
