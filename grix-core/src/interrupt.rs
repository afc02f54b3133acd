//! Process-global interrupt registry.
//!
//! Each solver instance owns an [`InterruptFlag`]; a signal handler (or
//! any other thread) can broadcast an interrupt to every live solver via
//! [`interrupt_all`]. The engine observes its flag at propagation and
//! decision boundaries, finishes the current conflict analysis, and
//! returns `Unknown` with the trail unwound to level 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};

/// A shared, asynchronously settable stop signal.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    /// Create a new, unset flag and register it for broadcast.
    #[must_use]
    pub fn new() -> Self {
        let flag = Self(Arc::new(AtomicBool::new(false)));
        registry()
            .lock()
            .expect("interrupt registry poisoned")
            .push(Arc::downgrade(&flag.0));
        flag
    }

    /// Request a cooperative stop.
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Clear the flag (called on `solve` entry).
    pub fn clear(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

fn registry() -> &'static Mutex<Vec<Weak<AtomicBool>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<AtomicBool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Broadcast an interrupt to every live solver instance.
///
/// Flags belonging to dropped solvers are pruned as a side effect.
pub fn interrupt_all() {
    let mut reg = registry().lock().expect("interrupt registry poisoned");
    reg.retain(|weak| {
        if let Some(flag) = weak.upgrade() {
            flag.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_set_and_clear() {
        let flag = InterruptFlag::new();
        assert!(!flag.is_set());
        flag.interrupt();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn test_broadcast_reaches_all_live_flags() {
        let a = InterruptFlag::new();
        let b = InterruptFlag::new();
        interrupt_all();
        assert!(a.is_set());
        assert!(b.is_set());
    }
}
