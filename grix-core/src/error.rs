//! Error taxonomy shared across the workspace.
//!
//! Malformed input and domain violations abort the offending call;
//! resource-limit trips are transient and leave the solver usable at
//! level 0. Root-level unsatisfiability is a permanent per-solver flag,
//! not an error.

use thiserror::Error;

/// Errors raised by core components and option parsing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An algorithm selector value was not recognized.
    #[error("unknown value `{value}` for {option}")]
    UnknownAlgorithm {
        /// The option being parsed.
        option: String,
        /// The offending value.
        value: String,
    },

    /// An option name was not recognized.
    #[error("unknown option `{option}`")]
    UnknownOption {
        /// The offending option name.
        option: String,
    },

    /// A name was empty, non-ASCII, contained whitespace, or collided
    /// with an existing name.
    #[error("invalid name `{name}`: {reason}")]
    BadName {
        /// The offending name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Errors raised by theory plugins at construction/registration time.
///
/// During search, plugins communicate exclusively through conflict
/// clauses; these errors can only surface from the public API.
#[derive(Debug, Error)]
pub enum TheoryError {
    /// Referenced an unknown graph id.
    #[error("unknown graph {graph}")]
    UnknownGraph {
        /// Offending graph id.
        graph: usize,
    },

    /// Referenced a node outside `[0, n_nodes)`.
    #[error("node {node} is not in graph {graph}")]
    UnknownNode {
        /// Graph id.
        graph: u32,
        /// Offending node.
        node: usize,
    },

    /// Referenced an unknown automaton id.
    #[error("unknown fsm {fsm}")]
    UnknownFsm {
        /// Offending automaton id.
        fsm: usize,
    },

    /// Referenced an unknown string id.
    #[error("unknown string {string}")]
    UnknownString {
        /// Offending string id.
        string: usize,
    },

    /// Referenced an unknown flow router id.
    #[error("unknown router {router}")]
    UnknownRouter {
        /// Offending router id.
        router: usize,
    },

    /// Referenced an unknown bitvector id.
    #[error("unknown bitvector {bv}")]
    UnknownBitvector {
        /// Offending bitvector id.
        bv: u32,
    },

    /// Bitvector width outside `[1, 64]`.
    #[error("bitvector width {width} is out of range [1, 64]")]
    WidthOutOfRange {
        /// Offending width.
        width: u32,
    },

    /// A constant does not fit in the bitvector's width.
    #[error("constant {value} does not fit in {width} bits")]
    ConstantTooWide {
        /// Offending value.
        value: u64,
        /// Bitvector width.
        width: u32,
    },

    /// Operands of a bitvector operation have mismatched widths.
    #[error("width mismatch: {left} vs {right}")]
    WidthMismatch {
        /// Left operand width.
        left: u32,
        /// Right operand width.
        right: u32,
    },

    /// A variable was used by a theory that does not own it.
    #[error("variable {var} is not owned by theory {theory}")]
    NotOwned {
        /// Offending variable index.
        var: u32,
        /// Theory id.
        theory: u32,
    },

    /// An operation is not supported in the requested mode
    /// (e.g. bit-blasting an operator with no CNF encoding here).
    #[error("unsupported operation: {what}")]
    Unsupported {
        /// Description of the unsupported operation.
        what: &'static str,
    },

    /// Pseudo-Boolean coefficient or sum overflow.
    #[error("pseudo-Boolean coefficient overflow")]
    PbOverflow,

    /// A core-level error.
    #[error(transparent)]
    Core(#[from] CoreError),
}
