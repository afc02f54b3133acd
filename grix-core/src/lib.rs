//! Core definitions for the grix SMT solver.
//!
//! This crate holds everything the SAT engine and the theory plugins
//! share without depending on each other: the literal algebra, the
//! CDCL(T) theory contract, solver options, error types, and the
//! process-global interrupt registry.

#![warn(missing_docs)]

pub mod error;
pub mod interrupt;
pub mod literal;
pub mod options;
pub mod theory;

pub use error::{CoreError, TheoryError};
pub use interrupt::{InterruptFlag, interrupt_all};
pub use literal::{LBool, Lit, Var};
pub use options::{
    AllPairsAlg, CycleAlg, DistAlg, MaxflowAlg, MstAlg, ReachAlg, SolverOptions,
};
pub use theory::{LazyReason, Theory, TheoryConflict, TheoryId, TheoryView, VarAlloc};

/// Validate an entity name: non-empty printable ASCII without whitespace.
pub fn validate_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::BadName {
            name: name.to_string(),
            reason: "name is empty",
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_graphic())
    {
        return Err(CoreError::BadName {
            name: name.to_string(),
            reason: "name must be printable ASCII without whitespace",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("x0").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a b").is_err());
        assert!(validate_name("café").is_err());
    }
}
