use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{ErrorStage, RecipeKind, Sex};
use super::medication::{HerbalEntry, MedicationEntry, Recipe, SelfReportedEntry};
use super::prm::PrmEntry;

/// Antecedent chip marking chronic kidney disease.
pub const CKD_ANTECEDENT: &str = "ERC";

/// All medication containers of one patient.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct MedicationSources {
    pub primary_care_recipes: Vec<Recipe>,
    pub secondary_care_recipes: Vec<Recipe>,
    /// Ad-hoc entries prescribed outside the two recipe systems.
    pub out_of_system: Vec<MedicationEntry>,
    pub self_reported: Vec<SelfReportedEntry>,
    pub herbal: Vec<HerbalEntry>,
}

impl MedicationSources {
    pub fn recipes(&self, kind: RecipeKind) -> &[Recipe] {
        match kind {
            RecipeKind::PrimaryCare => &self.primary_care_recipes,
            RecipeKind::SecondaryCare => &self.secondary_care_recipes,
        }
    }

    pub fn recipes_mut(&mut self, kind: RecipeKind) -> &mut Vec<Recipe> {
        match kind {
            RecipeKind::PrimaryCare => &mut self.primary_care_recipes,
            RecipeKind::SecondaryCare => &mut self.secondary_care_recipes,
        }
    }

    pub fn find_recipe_mut(&mut self, kind: RecipeKind, recipe_id: &Uuid) -> Option<&mut Recipe> {
        self.recipes_mut(kind).iter_mut().find(|r| r.id == *recipe_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdverseEvent {
    pub sku_ref: Option<String>,
    pub base_ingredient: String,
    pub medication_name: String,
    pub effect: String,
    pub date: NaiveDateTime,
}

/// A medication error attributed to one stage of the medication process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationError {
    pub stage: ErrorStage,
    pub description: String,
    pub date: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reconciliation {
    #[default]
    Pending,
    Reconciled { at: NaiveDateTime },
}

/// One patient's working clinical session record ("ficha").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientRecord {
    /// Three upper-case initials.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub locked: bool,
    pub age65: bool,
    pub age: Option<u32>,
    pub egfr: Option<f64>,
    pub sex: Sex,
    pub antecedents: Vec<String>,
    pub medications: MedicationSources,
    pub prm: Vec<PrmEntry>,
    pub adverse_events: Vec<AdverseEvent>,
    pub medication_errors: Vec<MedicationError>,
    pub reconciliation: Reconciliation,
}

impl PatientRecord {
    pub fn new(id: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            created_at,
            last_modified: created_at,
            locked: false,
            age65: false,
            age: None,
            egfr: None,
            sex: Sex::Unspecified,
            antecedents: Vec::new(),
            medications: MedicationSources::default(),
            prm: Vec::new(),
            adverse_events: Vec::new(),
            medication_errors: Vec::new(),
            reconciliation: Reconciliation::Pending,
        }
    }

    pub fn has_chronic_kidney_disease(&self) -> bool {
        self.antecedents
            .iter()
            .any(|a| a.trim().eq_ignore_ascii_case(CKD_ANTECEDENT))
    }

    /// Add an antecedent chip once.
    pub fn add_antecedent(&mut self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() || self.antecedents.iter().any(|a| a == value) {
            return false;
        }
        self.antecedents.push(value.to_string());
        true
    }
}
