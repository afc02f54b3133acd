//! Clause storage and watch lists.
//!
//! Clauses live in a flat arena addressed by [`CRef`]. The first two
//! literals of every clause are its watched positions; the watch-list
//! invariant is that they are never both false unless the clause is
//! conflicting.

use grix_core::Lit;
use smallvec::SmallVec;

/// Reference to a clause in the arena.
pub type CRef = u32;

/// A stored clause.
#[derive(Debug, Clone)]
pub struct Clause {
    /// The literals; positions 0 and 1 are watched.
    pub lits: SmallVec<[Lit; 4]>,
    /// Learned (as opposed to problem) clause.
    pub learnt: bool,
    /// Activity score for learned-clause reduction.
    pub activity: f32,
    /// Removed by the simplifier or clause-database reduction.
    pub deleted: bool,
}

impl Clause {
    /// Build a clause from literals.
    #[must_use]
    pub fn new(lits: impl Into<SmallVec<[Lit; 4]>>, learnt: bool) -> Self {
        Self {
            lits: lits.into(),
            learnt,
            activity: 0.0,
            deleted: false,
        }
    }

    /// Number of literals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lits.len()
    }

    /// Whether the clause has no literals.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lits.is_empty()
    }
}

/// The clause arena.
#[derive(Debug, Default)]
pub struct ClauseDb {
    clauses: Vec<Clause>,
    /// Number of live problem clauses.
    pub num_problem: usize,
    /// Number of live learned clauses.
    pub num_learnt: usize,
}

impl ClauseDb {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a clause, returning its reference.
    pub fn alloc(&mut self, clause: Clause) -> CRef {
        if clause.learnt {
            self.num_learnt += 1;
        } else {
            self.num_problem += 1;
        }
        let cref = self.clauses.len() as CRef;
        self.clauses.push(clause);
        cref
    }

    /// Mark a clause deleted. The slot is not reused; watch lists are
    /// rebuilt or lazily cleaned by the caller.
    pub fn free(&mut self, cref: CRef) {
        let c = &mut self.clauses[cref as usize];
        if !c.deleted {
            if c.learnt {
                self.num_learnt -= 1;
            } else {
                self.num_problem -= 1;
            }
            c.deleted = true;
        }
    }

    /// Immutable access.
    #[must_use]
    pub fn get(&self, cref: CRef) -> &Clause {
        &self.clauses[cref as usize]
    }

    /// Mutable access.
    pub fn get_mut(&mut self, cref: CRef) -> &mut Clause {
        &mut self.clauses[cref as usize]
    }

    /// Iterate over all live clause references.
    pub fn iter_refs(&self) -> impl Iterator<Item = CRef> + '_ {
        self.clauses
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.deleted)
            .map(|(i, _)| i as CRef)
    }

    /// Total number of slots (including deleted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

/// A watch-list entry: the clause plus a blocker literal that lets
/// propagation skip the clause without touching its memory when the
/// blocker is already true.
#[derive(Debug, Clone, Copy)]
pub struct Watcher {
    /// The watched clause.
    pub cref: CRef,
    /// A literal of the clause other than the watched one.
    pub blocker: Lit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use grix_core::Var;

    #[test]
    fn test_alloc_and_free() {
        let mut db = ClauseDb::new();
        let c = db.alloc(Clause::new(
            vec![Lit::pos(Var(0)), Lit::neg(Var(1))],
            false,
        ));
        assert_eq!(db.num_problem, 1);
        assert_eq!(db.get(c).len(), 2);
        db.free(c);
        assert_eq!(db.num_problem, 0);
        assert!(db.get(c).deleted);
        // double free is a no-op
        db.free(c);
        assert_eq!(db.num_problem, 0);
    }

    #[test]
    fn test_iter_refs_skips_deleted() {
        let mut db = ClauseDb::new();
        let a = db.alloc(Clause::new(vec![Lit::pos(Var(0))], false));
        let b = db.alloc(Clause::new(vec![Lit::pos(Var(1))], true));
        db.free(a);
        let live: Vec<CRef> = db.iter_refs().collect();
        assert_eq!(live, vec![b]);
    }
}
