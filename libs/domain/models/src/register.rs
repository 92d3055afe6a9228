//! Register metadata and the case-preserving, case-insensitively-indexed
//! register map.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterFormat {
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
}

impl RegisterFormat {
    /// Word count implied by the format.
    pub fn word_count(self) -> u16 {
        match self {
            RegisterFormat::U16 | RegisterFormat::I16 => 1,
            RegisterFormat::U32 | RegisterFormat::I32 | RegisterFormat::F32 => 2,
            RegisterFormat::U64 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
    DiscreteInput,
}

/// Linear/quadratic formula coefficients `[a, b, c, ...]` applied as
/// `v = a + b*v + c*v^2 + ...` during decode. Only the coefficients
/// actually declared are applied.
pub type Formula = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub name: String,
    /// Present iff the register is *physical*.
    pub offset: Option<u32>,
    pub format: RegisterFormat,
    pub register_type: RegisterKind,
    #[serde(default)]
    pub readable: bool,
    #[serde(default)]
    pub writable: bool,
    pub scale: Option<f64>,
    pub offset_value: Option<f64>,
    pub formula: Option<Formula>,
    pub precision: Option<u32>,
    pub unit: Option<String>,
    /// Bit index for bit-packed pins within a wider register.
    pub bit: Option<u8>,
    /// Present iff the register is *computed* by composing other named
    /// registers.
    pub composed_of: Option<Vec<String>>,
    /// Name of a companion register whose current value selects the scale
    /// factor for this one.
    pub scale_from: Option<String>,
}

impl RegisterDefinition {
    pub fn is_physical(&self) -> bool {
        self.offset.is_some()
    }

    pub fn is_computed(&self) -> bool {
        self.composed_of.is_some()
    }

    /// Bulk-eligible: readable, holding/input, not composed, not
    /// scale-dependent.
    pub fn is_bulk_eligible(&self, default_register_type: RegisterKind) -> bool {
        self.readable
            && matches!(self.register_type, RegisterKind::Holding | RegisterKind::Input)
            && self.register_type == default_register_type
            && !self.is_computed()
            && self.scale_from.is_none()
    }
}

/// Case-preserving map from parameter name to [`RegisterDefinition`], with a
/// parallel lowercase index for case-insensitive lookup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterMap {
    entries: HashMap<String, RegisterDefinition>,
    #[serde(skip)]
    lower_index: HashMap<String, String>,
}

impl RegisterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, def: RegisterDefinition) {
        self.lower_index
            .insert(def.name.to_ascii_lowercase(), def.name.clone());
        self.entries.insert(def.name.clone(), def);
    }

    /// Rebuilds the lowercase index. Required after `serde` deserialization,
    /// which skips the derived index field.
    pub fn reindex(&mut self) {
        self.lower_index = self
            .entries
            .keys()
            .map(|k| (k.to_ascii_lowercase(), k.clone()))
            .collect();
    }

    pub fn get(&self, name: &str) -> Option<&RegisterDefinition> {
        self.entries.get(name)
    }

    pub fn get_case_insensitive(&self, name: &str) -> Option<&RegisterDefinition> {
        if let Some(def) = self.entries.get(name) {
            return Some(def);
        }
        let original = self.lower_index.get(&name.to_ascii_lowercase())?;
        self.entries.get(original)
    }

    pub fn contains_case_insensitive(&self, name: &str) -> bool {
        self.get_case_insensitive(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &RegisterDefinition)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, offset: Option<u32>) -> RegisterDefinition {
        RegisterDefinition {
            name: name.to_string(),
            offset,
            format: RegisterFormat::U16,
            register_type: RegisterKind::Holding,
            readable: true,
            writable: false,
            scale: None,
            offset_value: None,
            formula: None,
            precision: None,
            unit: None,
            bit: None,
            composed_of: None,
            scale_from: None,
        }
    }

    #[test]
    fn case_insensitive_lookup_preserves_original_case() {
        let mut map = RegisterMap::new();
        map.insert(def("AIn01", Some(0)));
        assert!(map.get("ain01").is_none());
        let found = map.get_case_insensitive("ain01").unwrap();
        assert_eq!(found.name, "AIn01");
    }

    #[test]
    fn physical_vs_computed() {
        let mut physical = def("A", Some(1));
        assert!(physical.is_physical());
        assert!(!physical.is_computed());
        physical.offset = None;
        physical.composed_of = Some(vec!["A_LO".into(), "A_HI".into()]);
        assert!(!physical.is_physical());
        assert!(physical.is_computed());
    }

    #[test]
    fn word_counts_match_format() {
        assert_eq!(RegisterFormat::U16.word_count(), 1);
        assert_eq!(RegisterFormat::I32.word_count(), 2);
        assert_eq!(RegisterFormat::U64.word_count(), 4);
    }
}
