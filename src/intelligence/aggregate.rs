//! Medication Aggregator and Duplicate-Therapy Detector.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::enums::{RecipeKind, SourceKind};
use crate::models::{MedicationEntry, PatientRecord};

use super::types::{AggregatedMedication, DuplicateGroup};

/// Container id shared by every out-of-system entry.
pub const OUT_OF_SYSTEM_CONTAINER: &str = "extra";
/// Container id shared by every self-reported entry.
pub const SELF_MEDICATED_CONTAINER: &str = "automed";

fn source_key(source: SourceKind, container: &str) -> String {
    format!("{}:{}", source.as_str(), container)
}

fn tagged(entry: &MedicationEntry, source: SourceKind, container: &str) -> AggregatedMedication {
    AggregatedMedication {
        entry: entry.clone(),
        source,
        origin: source.as_str().to_string(),
        source_key: source_key(source, container),
    }
}

/// Flatten every medication source of a record, tagging provenance.
/// Order: primary-care recipes, secondary-care recipes, out-of-system,
/// self-reported. Herbal entries are not medications and are left out.
pub fn aggregate(record: &PatientRecord) -> Vec<AggregatedMedication> {
    let sources = &record.medications;
    let mut out = Vec::new();

    for kind in [RecipeKind::PrimaryCare, RecipeKind::SecondaryCare] {
        let source = SourceKind::from(kind);
        for recipe in sources.recipes(kind) {
            let container = recipe.id.to_string();
            out.extend(recipe.entries.iter().map(|e| tagged(e, source, &container)));
        }
    }

    out.extend(
        sources
            .out_of_system
            .iter()
            .map(|e| tagged(e, SourceKind::OutOfSystem, OUT_OF_SYSTEM_CONTAINER)),
    );

    for reported in &sources.self_reported {
        let mut entry = MedicationEntry::manual(&reported.text, "");
        entry.id = reported.id;
        entry.base_ingredient = reported.resolved_ingredient();
        out.push(tagged(&entry, SourceKind::SelfMedicated, SELF_MEDICATED_CONTAINER));
    }

    out
}

/// Group by upper-cased ingredient and keep groups spanning at least two
/// distinct source containers. Sorted by ingredient.
pub fn detect_duplicates(meds: &[AggregatedMedication]) -> Vec<DuplicateGroup> {
    let mut by_ingredient: BTreeMap<String, Vec<&AggregatedMedication>> = BTreeMap::new();
    for med in meds {
        let ingredient = med.ingredient();
        if ingredient.is_empty() {
            continue;
        }
        by_ingredient.entry(ingredient).or_default().push(med);
    }

    by_ingredient
        .into_iter()
        .filter(|(_, members)| {
            members
                .iter()
                .map(|m| m.source_key.as_str())
                .collect::<BTreeSet<_>>()
                .len()
                >= 2
        })
        .map(|(base_ingredient, members)| DuplicateGroup {
            origins: members.iter().map(|m| m.origin.clone()).collect(),
            members: members.into_iter().cloned().collect(),
            base_ingredient,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogIndex;
    use crate::models::{Dosage, Recipe, SelfReportedEntry};
    use chrono::{NaiveDate, Utc};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    fn sku_entry(catalog: &CatalogIndex, sku: &str) -> MedicationEntry {
        let sku = catalog.get(sku).unwrap();
        MedicationEntry::from_sku(sku, Dosage::default_for(sku.dosage_form), "")
    }

    #[test]
    fn provenance_is_tagged() {
        let catalog = CatalogIndex::load_test();
        let mut record = PatientRecord::new("ABC", Utc::now());
        let mut aps = Recipe::new(date(), 3);
        aps.entries.push(sku_entry(&catalog, "LOS50"));
        let aps_id = aps.id;
        record.medications.primary_care_recipes.push(aps);
        let mut sec = Recipe::new(date(), 3);
        sec.entries.push(sku_entry(&catalog, "MET850"));
        record.medications.secondary_care_recipes.push(sec);
        record.medications.out_of_system.push(MedicationEntry::manual("melatonina", ""));
        record
            .medications
            .self_reported
            .push(SelfReportedEntry::new("ibuprofeno cuando duele", date().and_hms_opt(9, 0, 0).unwrap()));

        let meds = aggregate(&record);
        assert_eq!(meds.len(), 4);
        assert_eq!(meds[0].origin, "primary-care");
        assert_eq!(meds[0].source_key, format!("primary-care:{aps_id}"));
        assert_eq!(meds[1].source, SourceKind::SecondaryCare);
        assert_eq!(meds[2].source_key, "out-of-system:extra");
        assert_eq!(meds[3].source_key, "self-medicated:automed");
        assert_eq!(meds[3].ingredient(), "IBUPROFENO");
        assert_eq!(meds[3].entry.id, record.medications.self_reported[0].id);
    }

    #[test]
    fn herbal_entries_are_not_aggregated() {
        let mut record = PatientRecord::new("ABC", Utc::now());
        record.medications.herbal.push(crate::models::HerbalEntry {
            id: "boldo".into(),
            name: "Boldo".into(),
        });
        assert!(aggregate(&record).is_empty());
    }

    #[test]
    fn same_recipe_twice_is_not_a_duplicate() {
        let catalog = CatalogIndex::load_test();
        let mut record = PatientRecord::new("ABC", Utc::now());
        let mut recipe = Recipe::new(date(), 3);
        recipe.entries.push(sku_entry(&catalog, "IBU400"));
        recipe.entries.push(sku_entry(&catalog, "IBU600"));
        record.medications.primary_care_recipes.push(recipe);

        assert!(detect_duplicates(&aggregate(&record)).is_empty());
    }

    #[test]
    fn ibuprofen_in_recipe_and_self_report_is_one_group() {
        let catalog = CatalogIndex::load_test();
        let mut record = PatientRecord::new("ABC", Utc::now());
        let mut recipe = Recipe::new(date(), 3);
        recipe.entries.push(sku_entry(&catalog, "IBU400"));
        recipe.entries.push(sku_entry(&catalog, "IBU600"));
        record.medications.primary_care_recipes.push(recipe);
        record
            .medications
            .self_reported
            .push(SelfReportedEntry::new("Ibuprofeno 400", date().and_hms_opt(9, 0, 0).unwrap()));

        let groups = detect_duplicates(&aggregate(&record));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].base_ingredient, "IBUPROFENO");
        assert_eq!(groups[0].members.len(), 3);
        assert_eq!(groups[0].origins.len(), 2);
    }

    #[test]
    fn two_recipes_of_one_kind_are_distinct_sources() {
        let catalog = CatalogIndex::load_test();
        let mut record = PatientRecord::new("ABC", Utc::now());
        for sku in ["IBU400", "IBU600"] {
            let mut recipe = Recipe::new(date(), 3);
            recipe.entries.push(sku_entry(&catalog, sku));
            record.medications.primary_care_recipes.push(recipe);
        }

        let groups = detect_duplicates(&aggregate(&record));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].origins.len(), 1);
    }

    #[test]
    fn groups_are_sorted_by_ingredient() {
        let catalog = CatalogIndex::load_test();
        let mut record = PatientRecord::new("ABC", Utc::now());
        let mut recipe = Recipe::new(date(), 3);
        recipe.entries.push(sku_entry(&catalog, "PCT500"));
        recipe.entries.push(sku_entry(&catalog, "IBU400"));
        record.medications.primary_care_recipes.push(recipe);
        record.medications.out_of_system.push(sku_entry(&catalog, "PCT500"));
        record.medications.out_of_system.push(sku_entry(&catalog, "IBU600"));

        let groups = detect_duplicates(&aggregate(&record));
        let names: Vec<&str> = groups.iter().map(|g| g.base_ingredient.as_str()).collect();
        assert_eq!(names, vec!["IBUPROFENO", "PARACETAMOL"]);
    }
}
