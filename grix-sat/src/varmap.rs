//! External↔internal variable renaming and name tables.
//!
//! Clients see external variables; the engine works on internal ones.
//! The map is a bijection extended on allocation. When preprocessing
//! eliminates an internal variable the external view keeps its id and
//! simply reads back "undefined" (or the substituted value) from the
//! reconstructed model.

use grix_core::{CoreError, Lit, Var, validate_name};
use rustc_hash::FxHashMap;

/// The bidirectional variable map plus name tables.
#[derive(Debug, Default)]
pub struct VarMap {
    ext_to_int: Vec<Var>,
    int_to_ext: Vec<Var>,
    names: FxHashMap<String, Var>,
    name_of: FxHashMap<Var, String>,
    named_order: Vec<Var>,
}

impl VarMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fresh internal variable, returning its external id.
    pub fn alloc(&mut self, internal: Var) -> Var {
        let ext = Var(self.ext_to_int.len() as u32);
        self.ext_to_int.push(internal);
        self.int_to_ext.push(ext);
        debug_assert_eq!(self.int_to_ext.len(), self.ext_to_int.len());
        ext
    }

    /// Number of external variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ext_to_int.len()
    }

    /// Whether no variables are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ext_to_int.is_empty()
    }

    /// Internal variable for an external one.
    #[must_use]
    pub fn to_internal(&self, ext: Var) -> Option<Var> {
        self.ext_to_int.get(ext.index()).copied()
    }

    /// External variable for an internal one.
    #[must_use]
    pub fn to_external(&self, int: Var) -> Option<Var> {
        self.int_to_ext.get(int.index()).copied()
    }

    /// Internal literal for an external one.
    #[must_use]
    pub fn lit_to_internal(&self, ext: Lit) -> Option<Lit> {
        self.to_internal(ext.var()).map(|v| Lit::new(v, ext.sign()))
    }

    /// External literal for an internal one.
    #[must_use]
    pub fn lit_to_external(&self, int: Lit) -> Option<Lit> {
        self.to_external(int.var()).map(|v| Lit::new(v, int.sign()))
    }

    /// Name an external variable.
    ///
    /// Names must be unique, non-empty, printable ASCII without
    /// whitespace; a variable can carry at most one name.
    pub fn set_name(&mut self, ext: Var, name: &str) -> Result<(), CoreError> {
        validate_name(name)?;
        if self.names.contains_key(name) {
            return Err(CoreError::BadName {
                name: name.to_string(),
                reason: "name already in use",
            });
        }
        if self.name_of.contains_key(&ext) {
            return Err(CoreError::BadName {
                name: name.to_string(),
                reason: "variable already has a name",
            });
        }
        self.names.insert(name.to_string(), ext);
        self.name_of.insert(ext, name.to_string());
        self.named_order.push(ext);
        Ok(())
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn var_by_name(&self, name: &str) -> Option<Var> {
        self.names.get(name).copied()
    }

    /// The name of a variable, if any.
    #[must_use]
    pub fn name_of(&self, ext: Var) -> Option<&str> {
        self.name_of.get(&ext).map(String::as_str)
    }

    /// Number of named variables.
    #[must_use]
    pub fn named_count(&self) -> usize {
        self.named_order.len()
    }

    /// The n-th named variable, in naming order.
    #[must_use]
    pub fn named_at(&self, n: usize) -> Option<Var> {
        self.named_order.get(n).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bijection_round_trip() {
        let mut m = VarMap::new();
        for i in 0..10u32 {
            let ext = m.alloc(Var(i));
            assert_eq!(m.to_internal(ext), Some(Var(i)));
            assert_eq!(m.to_external(Var(i)), Some(ext));
        }
        let l = Lit::neg(Var(3));
        let ext = m.lit_to_external(l).unwrap();
        assert_eq!(m.lit_to_internal(ext), Some(l));
    }

    #[test]
    fn test_names_are_unique() {
        let mut m = VarMap::new();
        let a = m.alloc(Var(0));
        let b = m.alloc(Var(1));
        m.set_name(a, "x").unwrap();
        assert!(m.set_name(b, "x").is_err());
        assert!(m.set_name(a, "y").is_err());
        assert_eq!(m.var_by_name("x"), Some(a));
        assert_eq!(m.name_of(a), Some("x"));
        assert_eq!(m.named_count(), 1);
        assert_eq!(m.named_at(0), Some(a));
    }

    #[test]
    fn test_bad_names_rejected() {
        let mut m = VarMap::new();
        let a = m.alloc(Var(0));
        assert!(m.set_name(a, "").is_err());
        assert!(m.set_name(a, "two words").is_err());
        assert!(m.set_name(a, "päivä").is_err());
    }
}
