//! Transport-agnostic session state.
//!
//! `CoreState` bundles the read-only catalog and rule reference data with
//! the importer configuration and the patient record store. Every
//! operation a front end needs goes through here; record mutation always
//! goes through [`PatientStore::update`].

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{CatalogError, CatalogIndex};
use crate::config::{self, ImportConfig, StoreConfig};
use crate::intelligence::reference::{load_criteria, load_interactions, ReferenceData};
use crate::intelligence::{Detection, EvaluationReport, ReferenceError, RulesEngine};
use crate::models::enums::{ErrorStage, ModelError, RecipeKind, Sex};
use crate::models::{
    AdverseEvent, CatalogEntry, Dosage, HerbalEntry, MedicationEntry, MedicationError,
    PatientRecord, PrmEntry, Recipe, Reconciliation, SelfReportedEntry,
};
use crate::pipeline::import::{self, ImportContext, ImportError, ImportResult};
use crate::store::{MemoryPatientStore, PatientStore, StoreError};

/// Duration given to a recipe created by hand.
pub const MANUAL_RECIPE_MONTHS: u32 = 3;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Reference data error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Invalid value: {0}")]
    Model(#[from] ModelError),

    #[error("Unknown SKU: {0}")]
    UnknownSku(String),

    #[error("Recipe not found: {0}")]
    RecipeNotFound(Uuid),

    #[error("Entry not found: {0}")]
    EntryNotFound(Uuid),

    #[error("{0} is already listed here")]
    DuplicateEntry(String),

    #[error("Missing value: {0}")]
    EmptyValue(&'static str),
}

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    catalog: CatalogIndex,
    reference: ReferenceData,
    import_config: ImportConfig,
    store: Box<dyn PatientStore>,
}

impl CoreState {
    pub fn new(
        catalog: CatalogIndex,
        reference: ReferenceData,
        import_config: ImportConfig,
        store: Box<dyn PatientStore>,
    ) -> Self {
        Self {
            catalog,
            reference,
            import_config,
            store,
        }
    }

    /// Load catalog and reference documents from `dir`.
    ///
    /// A missing or broken document leaves that part empty: imports then
    /// fail with `CatalogUnavailable` and the matching rules stay silent.
    pub fn load(dir: &Path, import_config: ImportConfig, store_config: StoreConfig) -> Self {
        let catalog = match CatalogIndex::load(&dir.join(config::CATALOG_FILE)) {
            Ok(index) => index,
            Err(e) => {
                tracing::warn!(error = %e, "Catalog unavailable, imports disabled");
                CatalogIndex::default()
            }
        };
        let reference = ReferenceData::load(dir);
        tracing::info!(
            dir = %dir.display(),
            skus = catalog.len(),
            "Session state loaded"
        );
        Self::new(
            catalog,
            reference,
            import_config,
            Box::new(MemoryPatientStore::new(store_config)),
        )
    }

    /// Load from [`config::reference_data_dir`] with default settings.
    pub fn from_default_dir() -> Self {
        Self::load(
            &config::reference_data_dir(),
            ImportConfig::default(),
            StoreConfig::default(),
        )
    }

    pub fn catalog(&self) -> &CatalogIndex {
        &self.catalog
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn import_config(&self) -> &ImportConfig {
        &self.import_config
    }

    pub fn store(&self) -> &dyn PatientStore {
        self.store.as_ref()
    }

    /// Replace the catalog from a file. The current catalog is kept on failure.
    pub fn reload_catalog(&mut self, path: &Path) -> Result<usize, CoreError> {
        self.catalog = CatalogIndex::load(path)?;
        tracing::info!(skus = self.catalog.len(), "Catalog reloaded");
        Ok(self.catalog.len())
    }

    /// Replace both rule documents. Both must load or nothing changes.
    pub fn reload_reference(&mut self, dir: &Path) -> Result<(), CoreError> {
        let criteria = load_criteria(&dir.join(config::CRITERIA_FILE))?;
        let interactions = load_interactions(&dir.join(config::INTERACTIONS_FILE))?;
        self.reference = ReferenceData {
            criteria: Some(criteria),
            interactions: Some(interactions),
        };
        tracing::info!(dir = %dir.display(), "Reference data reloaded");
        Ok(())
    }

    fn import_context(&self, now: NaiveDateTime) -> ImportContext<'_> {
        ImportContext {
            catalog: &self.catalog,
            config: &self.import_config,
            today: now.date(),
            now,
        }
    }

    fn engine(&self) -> RulesEngine<'_> {
        RulesEngine::new(&self.catalog, &self.reference)
    }

    /// Run `change` inside a store update and hand back its result.
    /// `change` must validate before touching the record.
    fn mutate<T>(
        &self,
        patient_id: &str,
        mut change: impl FnMut(&mut PatientRecord) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let mut outcome = None;
        self.store
            .update(patient_id, &mut |record| outcome = Some(change(record)))?;
        outcome.unwrap_or_else(|| Err(StoreError::NotFound(patient_id.to_string()).into()))
    }

    fn sku(&self, sku_id: &str) -> Result<&CatalogEntry, CoreError> {
        self.catalog
            .get(sku_id)
            .ok_or_else(|| CoreError::UnknownSku(sku_id.to_string()))
    }

    // ═══════════════════════════════════════════════════════════
    // Records
    // ═══════════════════════════════════════════════════════════

    pub fn create_patient(&self, initials: &str) -> Result<PatientRecord, CoreError> {
        Ok(self.store.create(initials)?)
    }

    pub fn patient(&self, patient_id: &str) -> Result<PatientRecord, CoreError> {
        Ok(self.store.get(patient_id)?)
    }

    pub fn list_patients(&self) -> Result<Vec<PatientRecord>, CoreError> {
        Ok(self.store.list()?)
    }

    pub fn remove_patient(&self, patient_id: &str) -> Result<(), CoreError> {
        Ok(self.store.remove(patient_id)?)
    }

    pub fn set_locked(&self, patient_id: &str, locked: bool) -> Result<(), CoreError> {
        Ok(self.store.set_locked(patient_id, locked)?)
    }

    // ═══════════════════════════════════════════════════════════
    // Import & evaluation
    // ═══════════════════════════════════════════════════════════

    pub fn import_format_a(
        &self,
        patient_id: &str,
        raw: &str,
        now: NaiveDateTime,
    ) -> Result<ImportResult, CoreError> {
        let ctx = self.import_context(now);
        Ok(import::import_format_a(self.store(), patient_id, raw, &ctx)?)
    }

    pub fn import_format_b(
        &self,
        patient_id: &str,
        raw: &str,
        now: NaiveDateTime,
    ) -> Result<ImportResult, CoreError> {
        let ctx = self.import_context(now);
        Ok(import::import_format_b(self.store(), patient_id, raw, &ctx)?)
    }

    /// Findings for a record without persisting anything.
    pub fn detect(&self, patient_id: &str) -> Result<Detection, CoreError> {
        let record = self.store.get(patient_id)?;
        Ok(self.engine().detect(&record))
    }

    /// Full pass: detect and synchronize the automatic PRM entries.
    pub fn evaluate(
        &self,
        patient_id: &str,
        now: NaiveDateTime,
    ) -> Result<EvaluationReport, CoreError> {
        Ok(self.engine().evaluate(self.store(), patient_id, now)?)
    }

    // ═══════════════════════════════════════════════════════════
    // Recipes
    // ═══════════════════════════════════════════════════════════

    /// Empty recipe issued `today`.
    pub fn add_recipe(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        today: NaiveDate,
    ) -> Result<Uuid, CoreError> {
        self.mutate(patient_id, |record| {
            let recipe = Recipe::new(today, MANUAL_RECIPE_MONTHS);
            let id = recipe.id;
            record.medications.recipes_mut(kind).push(recipe);
            Ok(id)
        })
    }

    pub fn remove_recipe(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
    ) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            let recipes = record.medications.recipes_mut(kind);
            let before = recipes.len();
            recipes.retain(|r| r.id != recipe_id);
            if recipes.len() == before {
                return Err(CoreError::RecipeNotFound(recipe_id));
            }
            Ok(())
        })
    }

    pub fn set_recipe_duration(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
        months: u32,
    ) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            let recipe = record
                .medications
                .find_recipe_mut(kind, &recipe_id)
                .ok_or(CoreError::RecipeNotFound(recipe_id))?;
            recipe.duration_months = months.max(1);
            Ok(())
        })
    }

    /// Add a catalog SKU to a recipe with its form's default dosage.
    /// A recipe holds each base ingredient once.
    pub fn add_recipe_entry(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
        sku_id: &str,
        posology: &str,
    ) -> Result<Uuid, CoreError> {
        let sku = self.sku(sku_id)?;
        let entry = MedicationEntry::from_sku(sku, Dosage::default_for(sku.dosage_form), posology);
        self.push_recipe_entry(patient_id, kind, recipe_id, entry)
    }

    /// Add a typed entry that matches nothing in the catalog.
    pub fn add_manual_recipe_entry(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
        label: &str,
        posology: &str,
    ) -> Result<Uuid, CoreError> {
        if label.trim().is_empty() {
            return Err(CoreError::EmptyValue("medication name"));
        }
        self.push_recipe_entry(patient_id, kind, recipe_id, MedicationEntry::manual(label, posology))
    }

    fn push_recipe_entry(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
        entry: MedicationEntry,
    ) -> Result<Uuid, CoreError> {
        self.mutate(patient_id, |record| {
            let recipe = record
                .medications
                .find_recipe_mut(kind, &recipe_id)
                .ok_or(CoreError::RecipeNotFound(recipe_id))?;
            if recipe.contains_ingredient(&entry.base_ingredient) {
                return Err(CoreError::DuplicateEntry(entry.base_ingredient.clone()));
            }
            recipe.entries.push(entry.clone());
            Ok(entry.id)
        })
    }

    pub fn remove_recipe_entry(
        &self,
        patient_id: &str,
        kind: RecipeKind,
        recipe_id: Uuid,
        entry_id: Uuid,
    ) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            let recipe = record
                .medications
                .find_recipe_mut(kind, &recipe_id)
                .ok_or(CoreError::RecipeNotFound(recipe_id))?;
            remove_by_id(&mut recipe.entries, entry_id, |e| e.id)
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Flat lists
    // ═══════════════════════════════════════════════════════════

    /// Out-of-system medication from the catalog, once per base ingredient.
    pub fn add_out_of_system(
        &self,
        patient_id: &str,
        sku_id: &str,
        posology: &str,
    ) -> Result<Uuid, CoreError> {
        let sku = self.sku(sku_id)?;
        let entry = MedicationEntry::from_sku(sku, Dosage::default_for(sku.dosage_form), posology);
        self.push_out_of_system(patient_id, entry)
    }

    pub fn add_manual_out_of_system(
        &self,
        patient_id: &str,
        label: &str,
        posology: &str,
    ) -> Result<Uuid, CoreError> {
        if label.trim().is_empty() {
            return Err(CoreError::EmptyValue("medication name"));
        }
        self.push_out_of_system(patient_id, MedicationEntry::manual(label, posology))
    }

    fn push_out_of_system(&self, patient_id: &str, entry: MedicationEntry) -> Result<Uuid, CoreError> {
        self.mutate(patient_id, |record| {
            let list = &mut record.medications.out_of_system;
            if list
                .iter()
                .any(|e| e.base_ingredient.eq_ignore_ascii_case(&entry.base_ingredient))
            {
                return Err(CoreError::DuplicateEntry(entry.base_ingredient.clone()));
            }
            list.push(entry.clone());
            Ok(entry.id)
        })
    }

    pub fn remove_out_of_system(&self, patient_id: &str, entry_id: Uuid) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            remove_by_id(&mut record.medications.out_of_system, entry_id, |e| e.id)
        })
    }

    /// Free-text self-medication report. `base_ingredient` overrides the
    /// first-word guess when the pharmacist picked one.
    pub fn add_self_reported(
        &self,
        patient_id: &str,
        text: &str,
        base_ingredient: Option<&str>,
        now: NaiveDateTime,
    ) -> Result<Uuid, CoreError> {
        if text.trim().is_empty() {
            return Err(CoreError::EmptyValue("self-reported text"));
        }
        let mut entry = SelfReportedEntry::new(text, now);
        entry.base_ingredient = base_ingredient
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_uppercase);
        self.mutate(patient_id, |record| {
            record.medications.self_reported.push(entry.clone());
            Ok(entry.id)
        })
    }

    pub fn remove_self_reported(&self, patient_id: &str, entry_id: Uuid) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            remove_by_id(&mut record.medications.self_reported, entry_id, |e| e.id)
        })
    }

    /// Medicinal plant, once per name.
    pub fn add_herbal(&self, patient_id: &str, name: &str) -> Result<(), CoreError> {
        let name = name.trim().to_uppercase();
        if name.is_empty() {
            return Err(CoreError::EmptyValue("plant name"));
        }
        self.mutate(patient_id, |record| {
            let herbal = &mut record.medications.herbal;
            if herbal.iter().any(|h| h.name == name) {
                return Err(CoreError::DuplicateEntry(name.clone()));
            }
            herbal.push(HerbalEntry {
                id: Uuid::new_v4().to_string(),
                name: name.clone(),
            });
            Ok(())
        })
    }

    /// Returns whether a plant was removed.
    pub fn remove_herbal(&self, patient_id: &str, name: &str) -> Result<bool, CoreError> {
        let name = name.trim().to_uppercase();
        self.mutate(patient_id, |record| {
            let herbal = &mut record.medications.herbal;
            let before = herbal.len();
            herbal.retain(|h| h.name != name);
            Ok(herbal.len() != before)
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Patient profile
    // ═══════════════════════════════════════════════════════════

    /// Set the exact age; also sets the 65-or-older flag.
    pub fn set_age(&self, patient_id: &str, age: Option<u32>) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            record.age = age;
            if let Some(age) = age {
                record.age65 = age >= 65;
            }
            Ok(())
        })
    }

    pub fn set_age65(&self, patient_id: &str, flagged: bool) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            record.age65 = flagged;
            Ok(())
        })
    }

    pub fn set_egfr(&self, patient_id: &str, egfr: Option<f64>) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            record.egfr = egfr.filter(|v| v.is_finite() && *v >= 0.0);
            Ok(())
        })
    }

    /// `"F"`, `"M"` or `""`.
    pub fn set_sex(&self, patient_id: &str, sex: &str) -> Result<(), CoreError> {
        let sex: Sex = sex.trim().to_uppercase().parse()?;
        self.mutate(patient_id, |record| {
            record.sex = sex;
            Ok(())
        })
    }

    pub fn add_antecedent(&self, patient_id: &str, value: &str) -> Result<bool, CoreError> {
        self.mutate(patient_id, |record| Ok(record.add_antecedent(value)))
    }

    pub fn remove_antecedent(&self, patient_id: &str, value: &str) -> Result<(), CoreError> {
        let value = value.trim();
        self.mutate(patient_id, |record| {
            record.antecedents.retain(|a| a != value);
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Events, errors, PRM, reconciliation
    // ═══════════════════════════════════════════════════════════

    /// Adverse event against a catalog SKU or a free medication name.
    pub fn add_adverse_event(
        &self,
        patient_id: &str,
        medication: &str,
        effect: &str,
        date: NaiveDateTime,
    ) -> Result<(), CoreError> {
        if effect.trim().is_empty() {
            return Err(CoreError::EmptyValue("adverse effect"));
        }
        let event = match self.catalog.get(medication.trim()) {
            Some(sku) => AdverseEvent {
                sku_ref: Some(sku.id.clone()),
                base_ingredient: sku.base_ingredient.to_uppercase(),
                medication_name: sku.display_name.clone(),
                effect: effect.trim().to_string(),
                date,
            },
            None => {
                let name = medication.trim().to_uppercase();
                if name.is_empty() {
                    return Err(CoreError::EmptyValue("medication name"));
                }
                AdverseEvent {
                    sku_ref: None,
                    base_ingredient: name.clone(),
                    medication_name: name,
                    effect: effect.trim().to_string(),
                    date,
                }
            }
        };
        self.mutate(patient_id, |record| {
            record.adverse_events.push(event.clone());
            Ok(())
        })
    }

    /// `stage` is one of `prescription`, `transcription`, `dispensing`,
    /// `administration`.
    pub fn add_medication_error(
        &self,
        patient_id: &str,
        stage: &str,
        description: &str,
        date: NaiveDateTime,
    ) -> Result<(), CoreError> {
        let stage: ErrorStage = stage.trim().to_lowercase().parse()?;
        if description.trim().is_empty() {
            return Err(CoreError::EmptyValue("error description"));
        }
        let error = MedicationError {
            stage,
            description: description.trim().to_string(),
            date,
        };
        self.mutate(patient_id, |record| {
            record.medication_errors.push(error.clone());
            Ok(())
        })
    }

    pub fn add_manual_prm(
        &self,
        patient_id: &str,
        prm_type: &str,
        detail: &str,
        date: NaiveDateTime,
    ) -> Result<Uuid, CoreError> {
        if prm_type.trim().is_empty() {
            return Err(CoreError::EmptyValue("PRM type"));
        }
        let entry = PrmEntry::manual(prm_type.trim(), detail.trim(), date);
        self.mutate(patient_id, |record| {
            record.prm.push(entry.clone());
            Ok(entry.id)
        })
    }

    /// Remove a manual PRM entry. Automatic entries are owned by the
    /// evaluation pass and cannot be removed by hand.
    pub fn remove_manual_prm(&self, patient_id: &str, entry_id: Uuid) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            let before = record.prm.len();
            record.prm.retain(|p| p.auto || p.id != entry_id);
            if record.prm.len() == before {
                return Err(CoreError::EntryNotFound(entry_id));
            }
            Ok(())
        })
    }

    pub fn mark_reconciled(&self, patient_id: &str, at: NaiveDateTime) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            record.reconciliation = Reconciliation::Reconciled { at };
            Ok(())
        })
    }

    pub fn reopen_reconciliation(&self, patient_id: &str) -> Result<(), CoreError> {
        self.mutate(patient_id, |record| {
            record.reconciliation = Reconciliation::Pending;
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════
    // Catalog
    // ═══════════════════════════════════════════════════════════

    pub fn search_catalog(
        &self,
        query: &str,
        primary_care_only: bool,
        limit: usize,
    ) -> Vec<&CatalogEntry> {
        self.catalog.search(query, primary_care_only, limit)
    }
}

fn remove_by_id<T>(items: &mut Vec<T>, id: Uuid, key: impl Fn(&T) -> Uuid) -> Result<(), CoreError> {
    let before = items.len();
    items.retain(|item| key(item) != id);
    if items.len() == before {
        return Err(CoreError::EntryNotFound(id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::AutoSource;

    fn state() -> CoreState {
        CoreState::new(
            CatalogIndex::load_test(),
            ReferenceData::load_test(),
            ImportConfig::default(),
            Box::new(MemoryPatientStore::default()),
        )
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    const FORMAT_A: &str = "\
05-04-2024
(1) IBUPROFENO 600 MG: 1 COMPRIMIDO CADA 8 HORAS POR 3 MESES
(2) ENALAPRIL 10 MG: 1 COMPRIMIDO CADA 12 HORAS
(3) WARFARINA 5 MG: 1 COMPRIMIDO AL DIA";

    #[test]
    fn import_then_evaluate_end_to_end() {
        let state = state();
        state.create_patient("abc").unwrap();
        state.set_age("ABC", Some(78)).unwrap();

        let imported = state.import_format_a("ABC", FORMAT_A, now()).unwrap();
        assert_eq!(imported.kind, RecipeKind::PrimaryCare);
        assert_eq!(imported.matched_count(), 2);
        assert_eq!(imported.skipped_lines.len(), 1);
        assert_eq!(imported.duration_months, 3);

        state
            .add_self_reported("ABC", "Ibuprofeno 400 para la rodilla", None, now())
            .unwrap();
        state
            .add_manual_prm("ABC", "Adherencia", "Olvida la dosis nocturna", now())
            .unwrap();

        let report = state.evaluate("ABC", now()).unwrap();
        let kinds: Vec<_> = report.detection.findings.iter().map(|f| f.auto_source()).collect();
        assert!(kinds.contains(&AutoSource::Duplicates));
        assert!(kinds.contains(&AutoSource::Criteria));
        assert!(kinds.contains(&AutoSource::Interaction));
        assert!(kinds.contains(&AutoSource::Ppi));
        assert!(!kinds.contains(&AutoSource::Renal));

        let record = state.patient("ABC").unwrap();
        assert_eq!(record.prm[0].detail, "Olvida la dosis nocturna");
        assert_eq!(record.prm.len(), 1 + report.detection.findings.len());

        let again = state.evaluate("ABC", now()).unwrap();
        assert!(again.changed_sources.is_empty());
        assert_eq!(state.patient("ABC").unwrap().prm, record.prm);
    }

    #[test]
    fn format_b_goes_to_secondary_care() {
        let state = state();
        state.create_patient("XYZ").unwrap();
        let doc = "\
Establecimiento HOSPITAL DE VILLARRICA
Fecha: 01/02/2024 (2/6)
PRESCRIPCIÓN
1.- OMEPRAZOL 20 MG CAPSULA
1 CAPSULA CADA 24 HORAS";
        let imported = state.import_format_b("XYZ", doc, now()).unwrap();
        assert_eq!(imported.kind, RecipeKind::SecondaryCare);
        assert_eq!(imported.duration_months, 6);

        let record = state.patient("XYZ").unwrap();
        let recipe = &record.medications.secondary_care_recipes[0];
        assert_eq!(recipe.origin_label.as_deref(), Some("HOSPITAL DE VILLARRICA"));
        assert_eq!(recipe.entries[0].sku_ref.as_deref(), Some("OMP20"));
    }

    #[test]
    fn import_errors_surface() {
        let state = state();
        state.create_patient("ABC").unwrap();
        assert!(matches!(
            state.import_format_a("ABC", "   ", now()),
            Err(CoreError::Import(ImportError::EmptyInput))
        ));
        assert!(matches!(
            state.import_format_a("ABC", "(1) WARFARINA 5 MG: 1 AL DIA", now()),
            Err(CoreError::Import(ImportError::NothingRecognized))
        ));
        assert!(matches!(
            state.import_format_a("QQQ", FORMAT_A, now()),
            Err(CoreError::Import(ImportError::Store(StoreError::NotFound(_))))
        ));

        let empty = CoreState::new(
            CatalogIndex::default(),
            ReferenceData::default(),
            ImportConfig::default(),
            Box::new(MemoryPatientStore::default()),
        );
        empty.create_patient("ABC").unwrap();
        assert!(matches!(
            empty.import_format_a("ABC", FORMAT_A, now()),
            Err(CoreError::Import(ImportError::CatalogUnavailable))
        ));
    }

    #[test]
    fn recipe_management() {
        let state = state();
        state.create_patient("ABC").unwrap();
        let recipe = state
            .add_recipe("ABC", RecipeKind::PrimaryCare, now().date())
            .unwrap();

        let entry = state
            .add_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, "PCT500", "cada 8 horas")
            .unwrap();
        assert!(matches!(
            state.add_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, "PCT100S", ""),
            Err(CoreError::DuplicateEntry(_))
        ));
        assert!(matches!(
            state.add_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, "NOPE", ""),
            Err(CoreError::UnknownSku(_))
        ));
        state
            .add_manual_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, "melatonina", "")
            .unwrap();

        let record = state.patient("ABC").unwrap();
        let stored = &record.medications.primary_care_recipes[0];
        assert_eq!(stored.duration_months, MANUAL_RECIPE_MONTHS);
        assert_eq!(stored.entries.len(), 2);
        assert_eq!(stored.entries[0].posology_text, "CADA 8 HORAS");
        assert!(stored.entries[1].is_manual());

        state
            .remove_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, entry)
            .unwrap();
        assert!(matches!(
            state.remove_recipe_entry("ABC", RecipeKind::PrimaryCare, recipe, entry),
            Err(CoreError::EntryNotFound(_))
        ));
        assert!(matches!(
            state.remove_recipe("ABC", RecipeKind::SecondaryCare, recipe),
            Err(CoreError::RecipeNotFound(_))
        ));
        state.remove_recipe("ABC", RecipeKind::PrimaryCare, recipe).unwrap();
        assert!(state.patient("ABC").unwrap().medications.primary_care_recipes.is_empty());
    }

    #[test]
    fn flat_lists_reject_duplicates() {
        let state = state();
        state.create_patient("ABC").unwrap();
        state.add_out_of_system("ABC", "IBU400", "").unwrap();
        assert!(matches!(
            state.add_out_of_system("ABC", "IBU600", ""),
            Err(CoreError::DuplicateEntry(_))
        ));
        assert!(matches!(
            state.add_manual_out_of_system("ABC", "ibuprofeno", ""),
            Err(CoreError::DuplicateEntry(_))
        ));

        state.add_herbal("ABC", "boldo").unwrap();
        assert!(matches!(state.add_herbal("ABC", "Boldo "), Err(CoreError::DuplicateEntry(_))));
        assert!(state.remove_herbal("ABC", "BOLDO").unwrap());
        assert!(!state.remove_herbal("ABC", "BOLDO").unwrap());

        let reported = state
            .add_self_reported("ABC", "algo para dormir", Some("melatonina"), now())
            .unwrap();
        let record = state.patient("ABC").unwrap();
        assert_eq!(
            record.medications.self_reported[0].resolved_ingredient(),
            "MELATONINA"
        );
        state.remove_self_reported("ABC", reported).unwrap();
    }

    #[test]
    fn profile_and_clinical_notes() {
        let state = state();
        state.create_patient("ABC").unwrap();
        state.set_age("ABC", Some(70)).unwrap();
        state.set_egfr("ABC", Some(28.0)).unwrap();
        state.set_sex("ABC", "f").unwrap();
        assert!(state.add_antecedent("ABC", "ERC").unwrap());
        assert!(matches!(state.set_sex("ABC", "X"), Err(CoreError::Model(_))));

        state
            .add_adverse_event("ABC", "ENA10", "Tos seca", now())
            .unwrap();
        state
            .add_adverse_event("ABC", "jarabe casero", "Náuseas", now())
            .unwrap();
        state
            .add_medication_error("ABC", "Dispensing", "Se entregó dosis incorrecta", now())
            .unwrap();
        assert!(matches!(
            state.add_medication_error("ABC", "storage", "x", now()),
            Err(CoreError::Model(_))
        ));
        state.mark_reconciled("ABC", now()).unwrap();

        let record = state.patient("ABC").unwrap();
        assert!(record.age65);
        assert_eq!(record.sex, Sex::Female);
        assert!(record.has_chronic_kidney_disease());
        assert_eq!(record.adverse_events[0].base_ingredient, "ENALAPRIL");
        assert_eq!(record.adverse_events[1].sku_ref, None);
        assert_eq!(record.medication_errors[0].stage, ErrorStage::Dispensing);
        assert_eq!(record.reconciliation, Reconciliation::Reconciled { at: now() });

        state.reopen_reconciliation("ABC").unwrap();
        assert_eq!(state.patient("ABC").unwrap().reconciliation, Reconciliation::Pending);
    }

    #[test]
    fn automatic_prm_cannot_be_removed_by_hand() {
        let state = state();
        state.create_patient("ABC").unwrap();
        state.add_out_of_system("ABC", "ENA10", "").unwrap();
        state.add_out_of_system("ABC", "ESP25", "").unwrap();
        state.evaluate("ABC", now()).unwrap();

        let auto_id = state.patient("ABC").unwrap().prm[0].id;
        assert!(matches!(
            state.remove_manual_prm("ABC", auto_id),
            Err(CoreError::EntryNotFound(_))
        ));
        let manual = state.add_manual_prm("ABC", "Otro", "nota", now()).unwrap();
        state.remove_manual_prm("ABC", manual).unwrap();
    }

    #[test]
    fn locked_record_rejects_changes() {
        let state = state();
        state.create_patient("ABC").unwrap();
        state.set_locked("ABC", true).unwrap();
        assert!(matches!(
            state.add_herbal("ABC", "boldo"),
            Err(CoreError::Store(StoreError::Locked(_)))
        ));
        state.set_locked("ABC", false).unwrap();
        state.add_herbal("ABC", "boldo").unwrap();
    }

    #[test]
    fn load_tolerates_missing_documents() {
        let dir = tempfile::tempdir().unwrap();
        let state = CoreState::load(dir.path(), ImportConfig::default(), StoreConfig::default());
        assert!(state.catalog().is_empty());
        assert_eq!(state.reference(), &ReferenceData::default());

        let mut state = state;
        assert!(matches!(
            state.reload_catalog(&dir.path().join(config::CATALOG_FILE)),
            Err(CoreError::Catalog(_))
        ));
        assert!(matches!(
            state.reload_reference(dir.path()),
            Err(CoreError::Reference(_))
        ));

        std::fs::write(
            dir.path().join(config::CATALOG_FILE),
            r#"[{"id": "A1", "base_name": "amoxicilina", "fuerza": "500mg", "forma": "capsula"}]"#,
        )
        .unwrap();
        assert_eq!(state.reload_catalog(&dir.path().join(config::CATALOG_FILE)).unwrap(), 1);
        assert_eq!(state.search_catalog("amoxi", false, 10).len(), 1);
    }
}
