//! Theory dispatch: routing assignments, propagation rounds, lazy
//! explanations, and backtracks between the engine and the registered
//! plugins.
//!
//! Plugins are visited in registration order. Within one round, the
//! first plugin that enqueues anything ends the round so the engine can
//! drain Boolean propagation before the next plugin runs; the engine
//! keeps calling back until a full fixed point.

use grix_core::{LBool, LazyReason, Lit, Theory, TheoryConflict, TheoryId, TheoryView, Var};
use grix_sat::TheoryHost;
use std::cell::RefCell;
use std::rc::Rc;

/// A registered plugin slot.
pub type PluginRef = Rc<RefCell<dyn Theory>>;

/// The plugin registry; implements the engine's [`TheoryHost`] side.
#[derive(Default)]
pub struct TheoryRegistry {
    plugins: Vec<PluginRef>,
}

impl TheoryRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The id the next registered plugin will receive.
    #[must_use]
    pub fn next_id(&self) -> TheoryId {
        TheoryId(self.plugins.len() as u32)
    }

    /// Register a plugin constructed with [`Self::next_id`].
    pub fn register(&mut self, plugin: PluginRef) -> TheoryId {
        let id = TheoryId(self.plugins.len() as u32);
        debug_assert_eq!(plugin.borrow().id(), id);
        self.plugins.push(plugin);
        id
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Counts enqueues so the registry can detect plugin progress without
/// inspecting the engine's queue.
struct CountingView<'a> {
    inner: &'a mut dyn TheoryView,
    enqueued: usize,
}

impl TheoryView for CountingView<'_> {
    fn value(&self, lit: Lit) -> LBool {
        self.inner.value(lit)
    }

    fn decision_level(&self) -> u32 {
        self.inner.decision_level()
    }

    fn enqueue(&mut self, lit: Lit, reason: LazyReason) {
        self.enqueued += 1;
        self.inner.enqueue(lit, reason);
    }
}

impl TheoryHost for TheoryRegistry {
    fn notify_assign(&mut self, lit: Lit, level: u32) {
        for plugin in &self.plugins {
            let mut p = plugin.borrow_mut();
            if p.owns_var(lit.var()) {
                p.enqueue_theory(lit, level);
            }
        }
    }

    fn propagate(&mut self, view: &mut dyn TheoryView) -> Result<(), TheoryConflict> {
        for plugin in &self.plugins {
            let mut counting = CountingView {
                inner: view,
                enqueued: 0,
            };
            plugin.borrow_mut().propagate(&mut counting)?;
            if counting.enqueued > 0 {
                // Let the engine drain BCP before the next plugin.
                return Ok(());
            }
        }
        Ok(())
    }

    fn explain(&mut self, reason: LazyReason) -> Vec<Lit> {
        self.plugins[reason.theory.0 as usize]
            .borrow_mut()
            .explain(reason.token)
    }

    fn backtrack(&mut self, level: u32) {
        for plugin in &self.plugins {
            plugin.borrow_mut().backtrack(level);
        }
    }

    fn final_check(&mut self, view: &mut dyn TheoryView) -> bool {
        self.plugins
            .iter()
            .all(|p| p.borrow_mut().check_satisfied(view))
    }

    fn decide(&mut self, view: &mut dyn TheoryView) -> Option<Lit> {
        for plugin in &self.plugins {
            if let Some(l) = plugin.borrow_mut().decide(view) {
                return Some(l);
            }
        }
        None
    }

    fn owns_var(&self, var: Var) -> bool {
        self.plugins.iter().any(|p| p.borrow().owns_var(var))
    }
}
