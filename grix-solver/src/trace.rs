//! GNF trace writing.
//!
//! When an output sink is set, every state-mutating API call emits the
//! corresponding GNF line, so the session can be replayed byte-exactly
//! into a fresh solver.

use grix_core::Lit;
use std::io::Write;

/// The trace sink.
#[derive(Default)]
pub struct Trace {
    out: Option<Box<dyn Write>>,
}

impl Trace {
    /// Create a disabled trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the output sink.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = Some(out);
    }

    /// Remove the output sink.
    pub fn clear_output(&mut self) {
        self.out = None;
    }

    /// Whether a sink is installed (callers skip formatting otherwise).
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.out.is_some()
    }

    /// Write one line.
    pub fn line(&mut self, line: &str) {
        if let Some(out) = &mut self.out {
            // Trace output is best-effort: a failed write disables the
            // sink rather than failing the API call.
            if writeln!(out, "{line}").is_err() {
                self.out = None;
            }
        }
    }
}

/// DIMACS rendering of a literal sequence, space separated.
#[must_use]
pub fn dimacs_seq(lits: &[Lit]) -> String {
    lits.iter()
        .map(|l| l.dimacs().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
