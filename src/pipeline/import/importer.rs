use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::CatalogIndex;
use crate::config::ImportConfig;
use crate::models::enums::{DosageForm, RecipeKind};
use crate::models::{CatalogEntry, Dosage, MedicationEntry, MedicationError, Recipe};
use crate::store::PatientStore;

use super::matcher::{match_candidate, MatchDetail};
use super::normalize::{extract_strength_tokens, normalize_name, DoseUnit, ParsedPosology};
use super::{rayen, ssasur, ImportError};

/// Everything an importer needs besides the raw text.
#[derive(Debug, Clone, Copy)]
pub struct ImportContext<'a> {
    pub catalog: &'a CatalogIndex,
    pub config: &'a ImportConfig,
    /// Issue date used when the text carries none.
    pub today: NaiveDate,
    /// Timestamp stamped on raised medication errors.
    pub now: NaiveDateTime,
}

/// Outcome of parsing one pasted export, before anything is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecipe {
    pub recipe: Recipe,
    /// Product names that looked like entries but matched no SKU.
    pub skipped_lines: Vec<String>,
    /// Prescription problems detected while importing.
    pub errors: Vec<MedicationError>,
}

/// One matched line, as reported back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchedMedication {
    pub entry_id: Uuid,
    pub sku_ref: String,
    pub display_name: String,
}

/// Import result returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportResult {
    pub patient_id: String,
    pub recipe_id: Uuid,
    pub kind: RecipeKind,
    pub duration_months: u32,
    pub matched: Vec<MatchedMedication>,
    pub skipped_lines: Vec<String>,
    pub medication_errors: Vec<MedicationError>,
}

impl ImportResult {
    pub fn matched_count(&self) -> usize {
        self.matched.len()
    }
}

// ═══════════════════════════════════════════════════════════
// Shared line handling
// ═══════════════════════════════════════════════════════════

/// Resolve a product name against the catalog.
pub(crate) fn resolve_sku<'a>(
    ctx: &ImportContext<'a>,
    raw_name: &str,
    unit: Option<DoseUnit>,
) -> Option<&'a CatalogEntry> {
    let name = normalize_name(raw_name);
    let detail = MatchDetail {
        strengths: extract_strength_tokens(raw_name),
        unit,
    };
    let hit = match_candidate(ctx.catalog.entries(), &name, &detail);
    if hit.is_none() {
        tracing::debug!(name = %name, "No catalog candidate, line skipped");
    }
    hit
}

/// Shape the parsed quantity for the SKU's dosage form.
pub(crate) fn dosage_for(form: DosageForm, quantity: Option<&str>, unit: Option<DoseUnit>) -> Dosage {
    let Some(quantity) = quantity else {
        return Dosage::default_for(form);
    };
    match form {
        DosageForm::Insulin => Dosage::Insulin {
            am_units: quantity.to_string(),
            pm_units: "0".into(),
        },
        DosageForm::Suspension => Dosage::Volume {
            millilitres: quantity.to_string(),
        },
        DosageForm::Inhaler => Dosage::Puffs {
            count: quantity.to_string(),
        },
        _ => {
            let unit = match (unit, Dosage::default_for(form)) {
                (Some(u), _) => u.label().to_string(),
                (None, Dosage::Units { unit, .. }) => unit,
                (None, _) => "UNIDAD".into(),
            };
            Dosage::Units {
                quantity: quantity.to_string(),
                unit,
            }
        }
    }
}

/// Build the medication entry for a matched line.
pub(crate) fn build_entry(sku: &CatalogEntry, parsed: &ParsedPosology) -> MedicationEntry {
    let dosage = dosage_for(sku.dosage_form, parsed.quantity.as_deref(), parsed.unit);
    let mut entry = MedicationEntry::from_sku(sku, dosage, &parsed.posology_text);
    entry.duration_months = parsed.duration_months;
    entry
}

/// Recipe-level duration: header value, else the longest line rounded
/// (at least one month), else the fallback.
pub fn recipe_duration_months(entries: &[MedicationEntry], header: Option<u32>, fallback: u32) -> u32 {
    if let Some(months) = header.filter(|m| *m > 0) {
        return months;
    }
    entries
        .iter()
        .filter_map(|e| e.duration_months)
        .fold(None, |acc: Option<f64>, m| Some(acc.map_or(m, |a| a.max(m))))
        .map(|m| (m.round() as u32).max(1))
        .unwrap_or(fallback.max(1))
}

// ═══════════════════════════════════════════════════════════
// Entry points
// ═══════════════════════════════════════════════════════════

/// Import a Format-A export into the patient's primary-care recipes.
pub fn import_format_a(
    store: &dyn PatientStore,
    patient_id: &str,
    raw: &str,
    ctx: &ImportContext<'_>,
) -> Result<ImportResult, ImportError> {
    import_with(store, patient_id, raw, ctx, RecipeKind::PrimaryCare, rayen::parse)
}

/// Import a Format-B export into the patient's secondary-care recipes.
pub fn import_format_b(
    store: &dyn PatientStore,
    patient_id: &str,
    raw: &str,
    ctx: &ImportContext<'_>,
) -> Result<ImportResult, ImportError> {
    import_with(store, patient_id, raw, ctx, RecipeKind::SecondaryCare, ssasur::parse)
}

fn import_with(
    store: &dyn PatientStore,
    patient_id: &str,
    raw: &str,
    ctx: &ImportContext<'_>,
    kind: RecipeKind,
    parse: fn(&str, &ImportContext<'_>) -> ParsedRecipe,
) -> Result<ImportResult, ImportError> {
    if raw.trim().is_empty() {
        return Err(ImportError::EmptyInput);
    }
    if ctx.catalog.is_empty() {
        return Err(ImportError::CatalogUnavailable);
    }

    tracing::info!(patient = %patient_id, kind = kind.as_str(), "Starting recipe import");

    let parsed = parse(raw, ctx);
    if parsed.recipe.entries.is_empty() {
        tracing::info!(
            patient = %patient_id,
            skipped = parsed.skipped_lines.len(),
            "Import recognized no medication"
        );
        return Err(ImportError::NothingRecognized);
    }

    let result = ImportResult {
        patient_id: patient_id.to_string(),
        recipe_id: parsed.recipe.id,
        kind,
        duration_months: parsed.recipe.duration_months,
        matched: parsed
            .recipe
            .entries
            .iter()
            .map(|e| MatchedMedication {
                entry_id: e.id,
                sku_ref: e.sku_ref.clone().unwrap_or_default(),
                display_name: e.display_name.clone(),
            })
            .collect(),
        skipped_lines: parsed.skipped_lines.clone(),
        medication_errors: parsed.errors.clone(),
    };

    let ParsedRecipe { recipe, errors, .. } = parsed;
    let mut pending = Some((recipe, errors));
    store.update(patient_id, &mut |record| {
        if let Some((recipe, errors)) = pending.take() {
            record.medications.recipes_mut(kind).push(recipe);
            record.medication_errors.extend(errors);
        }
    })?;

    tracing::info!(
        patient = %patient_id,
        kind = kind.as_str(),
        matched = result.matched_count(),
        skipped = result.skipped_lines.len(),
        errors = result.medication_errors.len(),
        months = result.duration_months,
        "Recipe import complete"
    );

    Ok(result)
}
