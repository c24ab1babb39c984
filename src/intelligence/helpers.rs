use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::CatalogIndex;
use crate::pipeline::import::normalize::{normalize_name, strip_accents};

use super::types::AggregatedMedication;

/// Comparison key for an ingredient name: upper-case, accent-free,
/// single-spaced. `Ácido acetilsalicílico` → `ACIDO ACETILSALICILICO`.
pub fn ingredient_key(name: &str) -> String {
    strip_accents(&normalize_name(name))
}

/// Ingredients the rules run against, keyed by [`ingredient_key`], with the
/// display name first seen for each key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngredientSet {
    pub keys: BTreeSet<String>,
    pub display: BTreeMap<String, String>,
}

impl IngredientSet {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for name in names {
            set.insert(name.as_ref());
        }
        set
    }

    pub fn insert(&mut self, name: &str) {
        let key = ingredient_key(name);
        if key.is_empty() {
            return;
        }
        self.display
            .entry(key.clone())
            .or_insert_with(|| name.trim().to_uppercase());
        self.keys.insert(key);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains(&ingredient_key(name))
    }

    /// Display name for a key, falling back to the key itself.
    pub fn display_name(&self, key: &str) -> String {
        self.display
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Ingredients eligible for class and interaction matching.
///
/// Catalog-backed entries always count. Manual and self-reported entries
/// count only when their ingredient names a catalog base ingredient.
pub fn rule_ingredients(meds: &[AggregatedMedication], catalog: &CatalogIndex) -> IngredientSet {
    let mut set = IngredientSet::default();
    for med in meds {
        let base = med.ingredient();
        if med.entry.sku_ref.is_some() || catalog.contains_base(&base) {
            set.insert(&base);
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_case_accents_and_spacing() {
        assert_eq!(ingredient_key("  Ácido   acetilsalicílico "), "ACIDO ACETILSALICILICO");
        assert_eq!(ingredient_key("ibuprofeno"), ingredient_key("IBUPROFENO"));
    }

    #[test]
    fn first_display_name_wins() {
        let set = IngredientSet::from_names(["Ibuprofeno", "IBUPROFENO", ""]);
        assert_eq!(set.keys.len(), 1);
        assert_eq!(set.display_name("IBUPROFENO"), "IBUPROFENO");
        assert!(set.contains("ibuprofeno"));
        assert_eq!(set.display_name("NAPROXENO"), "NAPROXENO");
    }
}
