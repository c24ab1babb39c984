use serde::{Deserialize, Serialize};

use super::enums::DosageForm;

// ---------------------------------------------------------------------------
// Raw catalog document (medicamentos.json)
// ---------------------------------------------------------------------------

/// One drug record as exported in the catalog document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CatalogRecord {
    pub id: String,
    pub base_name: String,
    #[serde(rename = "fuerza")]
    pub strength: String,
    #[serde(rename = "forma")]
    pub form: String,
    #[serde(rename = "programas")]
    pub programs: RawPrograms,
    pub tags: Vec<String>,
    pub flags: RawFlags,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawPrograms {
    pub aps: bool,
    pub secundario: bool,
    pub cronico: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawFlags {
    pub start: bool,
    pub ppi: bool,
    pub ajuste_renal: Option<RawRenalAdjustment>,
    pub contraindicado_renal: Option<RawActive>,
    pub embarazo: Option<RawPregnancy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawRenalAdjustment {
    pub requerido: bool,
    pub detalle: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawActive {
    pub activo: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RawPregnancy {
    pub riesgo: Option<String>,
}

// ---------------------------------------------------------------------------
// Normalized projection
// ---------------------------------------------------------------------------

/// Program tags a SKU is dispensed under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProgramEligibility {
    pub primary_care: bool,
    pub secondary_care: bool,
    pub chronic: bool,
}

/// Safety flags copied onto every medication entry created from a SKU.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ClinicalFlags {
    pub ppi_risk: bool,
    pub start_criterion: bool,
    pub renal_adjustment_required: bool,
    pub renal_adjustment_detail: Option<String>,
    pub renal_contraindicated: bool,
    pub pregnancy_risk: Option<String>,
}

/// A canonical drug formulation (SKU).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: String,
    /// Lowercase canonical ingredient, the grouping key.
    pub base_ingredient: String,
    /// `BASE STRENGTH FORM`, upper-cased.
    pub display_name: String,
    /// `STRENGTH FORM`, upper-cased.
    pub presentation: String,
    pub dosage_form: DosageForm,
    pub programs: ProgramEligibility,
    pub tags: Vec<String>,
    pub clinical_flags: ClinicalFlags,
}

impl CatalogEntry {
    /// Project a raw record into its normalized form.
    pub fn from_record(record: &CatalogRecord) -> Self {
        let base = record.base_name.trim();
        let strength = record.strength.trim();
        let form = record.form.trim();

        let display_name = join_upper(&[base, strength, form]);
        let presentation = join_upper(&[strength, form]);

        let renal = record.flags.ajuste_renal.clone().unwrap_or_default();

        Self {
            id: record.id.clone(),
            base_ingredient: base.to_lowercase(),
            display_name,
            presentation,
            dosage_form: DosageForm::from_catalog_text(form),
            programs: ProgramEligibility {
                primary_care: record.programs.aps,
                secondary_care: record.programs.secundario,
                chronic: record.programs.cronico,
            },
            tags: record.tags.clone(),
            clinical_flags: ClinicalFlags {
                ppi_risk: record.flags.ppi,
                start_criterion: record.flags.start,
                renal_adjustment_required: renal.requerido,
                renal_adjustment_detail: renal.detalle.filter(|d| !d.trim().is_empty()),
                renal_contraindicated: record
                    .flags
                    .contraindicado_renal
                    .as_ref()
                    .is_some_and(|c| c.activo),
                pregnancy_risk: record.flags.embarazo.as_ref().and_then(|e| e.riesgo.clone()),
            },
        }
    }
}

fn join_upper(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}
