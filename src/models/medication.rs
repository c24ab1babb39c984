use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{CatalogEntry, ClinicalFlags};
use super::enums::DosageForm;

/// Quantity fields, shaped by dosage form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dosage {
    /// Tablets, capsules and anything counted in discrete units.
    Units { quantity: String, unit: String },
    Volume { millilitres: String },
    Puffs { count: String },
    Insulin { am_units: String, pm_units: String },
}

impl Dosage {
    /// Default quantities offered when an entry is added by hand.
    pub fn default_for(form: DosageForm) -> Self {
        match form {
            DosageForm::Tablet => Self::Units {
                quantity: "1".into(),
                unit: "COMPRIMIDO(S)".into(),
            },
            DosageForm::Capsule => Self::Units {
                quantity: "1".into(),
                unit: "CAPSULA(S)".into(),
            },
            DosageForm::Suspension => Self::Volume {
                millilitres: "5".into(),
            },
            DosageForm::Inhaler => Self::Puffs { count: "2".into() },
            DosageForm::Insulin => Self::Insulin {
                am_units: "0".into(),
                pm_units: "0".into(),
            },
            DosageForm::Other | DosageForm::Manual => Self::Units {
                quantity: "1".into(),
                unit: "UNIDAD".into(),
            },
        }
    }

    /// Short rendering: `1 COMPRIMIDO(S)`, `10 UI AM - 4 UI PM`.
    pub fn describe(&self) -> String {
        match self {
            Self::Units { quantity, unit } => format!("{quantity} {unit}"),
            Self::Volume { millilitres } => format!("{millilitres} ML"),
            Self::Puffs { count } => format!("{count} PUFF"),
            Self::Insulin { am_units, pm_units } => {
                format!("{am_units} UI AM - {pm_units} UI PM")
            }
        }
    }
}

/// One medication line, owned by a recipe or a flat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MedicationEntry {
    pub id: Uuid,
    /// `None` marks a manually typed entry with no catalog match.
    pub sku_ref: Option<String>,
    /// Upper-cased grouping key.
    pub base_ingredient: String,
    pub display_name: String,
    pub presentation: String,
    pub dosage_form: DosageForm,
    pub posology_text: String,
    pub dosage: Dosage,
    /// Per-line treatment duration parsed from the source text.
    pub duration_months: Option<f64>,
    /// Snapshot of the SKU flags at creation time.
    pub clinical_flags: ClinicalFlags,
}

impl MedicationEntry {
    pub fn from_sku(sku: &CatalogEntry, dosage: Dosage, posology_text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            sku_ref: Some(sku.id.clone()),
            base_ingredient: sku.base_ingredient.to_uppercase(),
            display_name: sku.display_name.clone(),
            presentation: sku.presentation.clone(),
            dosage_form: sku.dosage_form,
            posology_text: posology_text.trim().to_uppercase(),
            dosage,
            duration_months: None,
            clinical_flags: sku.clinical_flags.clone(),
        }
    }

    /// An entry typed by hand that matched nothing in the catalog.
    pub fn manual(label: &str, posology_text: &str) -> Self {
        let upper = label.trim().to_uppercase();
        Self {
            id: Uuid::new_v4(),
            sku_ref: None,
            base_ingredient: upper.clone(),
            display_name: upper.clone(),
            presentation: upper,
            dosage_form: DosageForm::Manual,
            posology_text: posology_text.trim().to_uppercase(),
            dosage: Dosage::default_for(DosageForm::Manual),
            duration_months: None,
            clinical_flags: ClinicalFlags::default(),
        }
    }

    pub fn is_manual(&self) -> bool {
        self.sku_ref.is_none()
    }
}

/// One prescription document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub id: Uuid,
    pub issue_date: NaiveDate,
    pub duration_months: u32,
    pub entries: Vec<MedicationEntry>,
    /// Issuing facility, only set by the Format-B import path.
    pub origin_label: Option<String>,
}

impl Recipe {
    pub fn new(issue_date: NaiveDate, duration_months: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            issue_date,
            duration_months: duration_months.max(1),
            entries: Vec::new(),
            origin_label: None,
        }
    }

    /// Whether an entry with this base ingredient is already on the recipe.
    pub fn contains_ingredient(&self, base_ingredient: &str) -> bool {
        let needle = base_ingredient.to_uppercase();
        self.entries
            .iter()
            .any(|e| e.base_ingredient.to_uppercase() == needle)
    }
}

/// Free-text medication the patient reports taking on their own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfReportedEntry {
    pub id: Uuid,
    pub text: String,
    pub base_ingredient: Option<String>,
    pub recorded_at: NaiveDateTime,
}

impl SelfReportedEntry {
    pub fn new(text: &str, recorded_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.trim().to_string(),
            base_ingredient: None,
            recorded_at,
        }
    }

    /// Recorded ingredient, or the first word of the free text.
    pub fn resolved_ingredient(&self) -> String {
        match &self.base_ingredient {
            Some(b) if !b.trim().is_empty() => b.trim().to_uppercase(),
            _ => self
                .text
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_uppercase(),
        }
    }
}

/// Medicinal plant reported by the patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HerbalEntry {
    pub id: String,
    pub name: String,
}
