//! The theory-plugin contract for CDCL(T) solving.
//!
//! Each plugin registers with a numeric [`TheoryId`], owns a set of
//! variables, and participates in the engine's propagation rounds through
//! this trait. Plugins never panic across the engine boundary: every
//! inconsistency is reported as a [`TheoryConflict`] clause.

use crate::literal::{LBool, Lit, Var};

/// Identifier of a registered theory plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TheoryId(pub u32);

/// A lazy reason: an opaque token a plugin can later materialize into a
/// full reason clause via [`Theory::explain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyReason {
    /// The plugin that enqueued the literal.
    pub theory: TheoryId,
    /// Plugin-private token identifying the stored reason.
    pub token: u32,
}

/// A conflict clause produced by a theory plugin.
///
/// Every literal in `clause` is false under the current assignment.
#[derive(Debug, Clone)]
pub struct TheoryConflict {
    /// The conflicting clause.
    pub clause: Vec<Lit>,
}

impl TheoryConflict {
    /// Wrap a clause as a conflict.
    #[must_use]
    pub fn new(clause: Vec<Lit>) -> Self {
        Self { clause }
    }
}

/// The engine-provided window a plugin sees during propagation.
///
/// Gives read access to the current assignment and lets the plugin
/// enqueue implied literals with lazy reasons.
pub trait TheoryView {
    /// Value of a literal under the current (partial) assignment.
    fn value(&self, lit: Lit) -> LBool;

    /// The engine's current decision level.
    fn decision_level(&self) -> u32;

    /// Enqueue an implied literal with a lazy reason.
    ///
    /// The engine assigns the literal after the plugin returns; if the
    /// literal is already false this will surface as a conflict.
    fn enqueue(&mut self, lit: Lit, reason: LazyReason);
}

/// The CDCL(T) theory contract.
///
/// Ordering guarantee: within one propagation round the engine drains
/// Boolean constraint propagation before re-entering any plugin, and
/// round-robins across plugins in registration order until a full fixed
/// point.
pub trait Theory {
    /// The id this plugin was registered under.
    fn id(&self) -> TheoryId;

    /// Human-readable plugin name ("graph", "bv", ...).
    fn name(&self) -> &str;

    /// Whether `var` is owned by this plugin.
    fn owns_var(&self, var: Var) -> bool;

    /// Called once per assignment of a theory-owned literal.
    fn enqueue_theory(&mut self, lit: Lit, level: u32);

    /// Run one propagation pass.
    ///
    /// May enqueue implied literals through `view`; must be idempotent
    /// within a fixed point (calling twice with no intervening
    /// assignments enqueues nothing new the second time).
    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict>;

    /// Materialize the reason for a lazily-enqueued literal.
    ///
    /// Returns the full reason clause with the implied literal first;
    /// every other literal in it is false at assignment time.
    fn explain(&mut self, token: u32) -> Vec<Lit>;

    /// Undo all plugin state created above `level`.
    fn backtrack(&mut self, level: u32);

    /// Final check at a full assignment.
    ///
    /// If this returns `false` the plugin must produce a conflict (or a
    /// new implication) on the next `propagate` call.
    fn check_satisfied(&mut self, view: &mut dyn TheoryView) -> bool;

    /// Optional branching suggestion, consulted before the engine's own
    /// activity-based decision.
    fn decide(&mut self, _view: &mut dyn TheoryView) -> Option<Lit> {
        None
    }
}

/// Fresh-variable allocation, provided by the coordination layer to
/// plugins that compile constraints to CNF (bit-blasting, edge sets).
pub trait VarAlloc {
    /// Allocate a fresh solver variable.
    fn new_var(&mut self) -> Var;

    /// Add a clause over existing variables. Returns `false` if the
    /// clause is trivially unsatisfiable at the root level.
    fn add_clause(&mut self, lits: &[Lit]) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NopTheory;

    impl Theory for NopTheory {
        fn id(&self) -> TheoryId {
            TheoryId(0)
        }

        fn name(&self) -> &str {
            "nop"
        }

        fn owns_var(&self, _var: Var) -> bool {
            false
        }

        fn enqueue_theory(&mut self, _lit: Lit, _level: u32) {}

        fn propagate(&mut self, _view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
            Ok(())
        }

        fn explain(&mut self, _token: u32) -> Vec<Lit> {
            Vec::new()
        }

        fn backtrack(&mut self, _level: u32) {}

        fn check_satisfied(&mut self, _view: &mut dyn TheoryView) -> bool {
            true
        }
    }

    struct FixedView;

    impl TheoryView for FixedView {
        fn value(&self, _lit: Lit) -> LBool {
            LBool::Undef
        }

        fn decision_level(&self) -> u32 {
            0
        }

        fn enqueue(&mut self, _lit: Lit, _reason: LazyReason) {
            unreachable!("nop theory never enqueues");
        }
    }

    #[test]
    fn test_default_decide_is_none() {
        let mut t = NopTheory;
        assert!(t.decide(&mut FixedView).is_none());
        assert!(t.check_satisfied(&mut FixedView));
    }
}
